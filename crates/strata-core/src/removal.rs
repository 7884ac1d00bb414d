//! Dependency-aware removal of stored builds.
//!
//! Storage refuses to drop a build while layers cloned from it exist, so a
//! batch must be removed children first. [`plan_removal`] orders a selection
//! against the `based_on` forest; [`remove_builds`] executes the plan and
//! keeps going past per-build failures.

use crate::error::Result;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use strata_store::{BuildId, StorageDriver, StoreError};

/// Outcome of a removal batch.
#[derive(Debug, Default)]
pub struct RemovalReport {
    /// Builds that were dropped, in drop order.
    pub removed: Vec<BuildId>,
    /// Builds that could not be dropped.
    pub failed: Vec<(BuildId, StoreError)>,
}

impl RemovalReport {
    /// Whether every selected build was dropped.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Order `selected` so that every build comes before its ancestors.
///
/// Each selected build's `based_on` chain is walked up to its root; the
/// chain is emitted root first, keeping only selected builds, and the
/// combined sequence is reversed. Ancestors outside the selection influence
/// the order but are never emitted.
pub fn plan_removal(
    selected: &[BuildId],
    parents: &HashMap<BuildId, Option<BuildId>>,
) -> Vec<BuildId> {
    let wanted: HashSet<&BuildId> = selected.iter().collect();
    let mut visited = HashSet::new();
    let mut order = Vec::with_capacity(selected.len());

    for id in selected {
        let mut chain = Vec::new();
        let mut cursor = Some(id.clone());
        while let Some(current) = cursor {
            if !visited.insert(current.clone()) {
                break;
            }
            cursor = parents.get(&current).cloned().flatten();
            chain.push(current);
        }
        order.extend(chain.into_iter().rev().filter(|id| wanted.contains(id)));
    }

    order.reverse();
    order
}

/// Drop `selected` in dependency order.
///
/// A failure on one build is recorded and the batch continues.
pub async fn remove_builds(
    driver: &dyn StorageDriver,
    selected: &[BuildId],
) -> Result<RemovalReport> {
    let parents = driver.parents().await?;
    let plan = plan_removal(selected, &parents);
    tracing::debug!(count = plan.len(), "Planned removal");

    let mut report = RemovalReport::default();
    for id in plan {
        match driver.drop_build(&id).await {
            Ok(()) => report.removed.push(id),
            Err(e) => {
                tracing::warn!(build_id = %id, error = %e, "Failed to remove build");
                report.failed.push((id, e));
            }
        }
    }

    tracing::info!(
        removed = report.removed.len(),
        failed = report.failed.len(),
        "Removal complete"
    );
    Ok(report)
}

/// Statistics from a garbage collection pass.
#[derive(Debug, Default, Serialize)]
pub struct GcStats {
    /// Builds inspected.
    pub builds_scanned: usize,
    /// Builds without a manifest.
    pub builds_orphaned: usize,
    /// Orphans actually dropped.
    pub builds_deleted: usize,
}

/// Result of a garbage collection pass.
#[derive(Debug, Default)]
pub struct GcResult {
    /// Counters.
    pub stats: GcStats,
    /// Builds without a manifest.
    pub orphans: Vec<BuildId>,
    /// What happened to them (empty on a dry run).
    pub removal: RemovalReport,
}

/// Drop builds that never received a manifest.
///
/// These are attempts abandoned before cleanup could run, e.g. after a
/// crash. With `dry_run` nothing is dropped.
pub async fn collect_garbage(driver: &dyn StorageDriver, dry_run: bool) -> Result<GcResult> {
    let mut result = GcResult::default();
    for id in driver.builds().await? {
        result.stats.builds_scanned += 1;
        match driver.info(&id).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => result.orphans.push(id),
            Err(e) => return Err(e.into()),
        }
    }
    result.stats.builds_orphaned = result.orphans.len();

    if !dry_run && !result.orphans.is_empty() {
        result.removal = remove_builds(driver, &result.orphans).await?;
        result.stats.builds_deleted = result.removal.removed.len();
    }

    tracing::info!(
        scanned = result.stats.builds_scanned,
        orphaned = result.stats.builds_orphaned,
        deleted = result.stats.builds_deleted,
        dry_run,
        "Garbage collection complete"
    );
    Ok(result)
}
