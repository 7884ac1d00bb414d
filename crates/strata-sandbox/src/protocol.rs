//! Wire types for the sandbox execution protocol.
//!
//! Messages travel as newline-delimited JSON, tagged by `type`:
//!
//! ```text
//! host    -> sandbox  {"type":"execute","command":"apk add curl"}
//! sandbox -> host     {"type":"log","content":"ZmV0Y2guLi4K"}      (0..N)
//! sandbox -> host     {"type":"result","error":""}                 (exactly 1)
//! ```
//!
//! Log content is raw bytes, base64 encoded on the wire.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Message sent by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    /// Run a shell command inside the sandbox root.
    Execute {
        /// Command line handed to the sandbox shell.
        command: String,
    },
}

/// Message sent by the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SandboxMessage {
    /// Chunk of command output.
    Log {
        /// Raw output bytes.
        #[serde(with = "base64_bytes")]
        content: Bytes,
    },
    /// Terminal message for the current command.
    Result {
        /// Failure description; empty on success.
        #[serde(default)]
        error: String,
    },
}

impl SandboxMessage {
    /// Log message carrying `content`.
    pub fn log(content: impl Into<Bytes>) -> Self {
        Self::Log {
            content: content.into(),
        }
    }

    /// Successful terminal message.
    pub fn ok() -> Self {
        Self::Result {
            error: String::new(),
        }
    }

    /// Failed terminal message.
    pub fn failed(error: impl Into<String>) -> Self {
        Self::Result {
            error: error.into(),
        }
    }
}

/// Encode a message as one protocol line, newline included.
pub fn encode<T: Serialize>(message: &T) -> serde_json::Result<Vec<u8>> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    Ok(line)
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
