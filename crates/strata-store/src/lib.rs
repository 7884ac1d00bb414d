//! # strata-store
//!
//! Build identities, manifests and copy-on-write layer storage for strata.
//!
//! ## Quick Start
//!
//! ```no_run
//! use strata_store::{BuildId, BuildInfo, BuildType, DirDriver, StorageDriver, Tag};
//!
//! # async fn example() -> strata_store::Result<()> {
//! let driver = DirDriver::open("/var/lib/strata").await?;
//!
//! // Allocate a root, populate it, then seal it.
//! let id = BuildId::new(BuildType::Image);
//! let layer = driver.create_empty("alpine", &id).await?;
//! std::fs::write(layer.path().join("hello"), "world")?;
//! driver.finalize(layer).await?;
//!
//! driver.store_manifest(&BuildInfo::new(id.clone(), "alpine", None)).await?;
//! driver.tag(&id, &Tag::latest()).await?;
//! assert_eq!(driver.resolve("alpine").await?, id);
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Self-validating IDs**: type prefix, random payload and a checksum
//! - **Tag moves**: tagging a build detaches the tag from its previous owner
//! - **Parent protection**: layers with live clones cannot be dropped

mod dir;
mod driver;
mod error;
mod id;
mod manifest;

pub use dir::{copy_tree, DirDriver};
pub use driver::{detach_key, Layer, StorageDriver};
pub use error::{Result, StoreError};
pub use id::{validate_name, BuildId, BuildKey, BuildType, Tag, BUILD_ID_LEN, DEFAULT_TAG};
pub use manifest::{BootEntry, BuildInfo};
