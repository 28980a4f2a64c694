// ai
//! 💀 error.rs — the taxonomy of things that go bump in the bulk buffer.
//!
//! 🎬 *[a file refuses to open. a cluster refuses to answer. a stats document
//! refuses to be JSON. each of them gets a name here, and a Display impl.]*
//!
//! 🧠 Knowledge graph:
//! - The engine internals return `Result<_, BatchError>`.
//! - `BatchingEngine::evaluate` never lets these escape; it turns them into a
//!   forwarded request plus a line in `Stats::messages`.
//! - `BatchingEngine::try_evaluate` hands them to callers who want to fail loudly.
//! - Glue code (config, HTTP, CLI) stays on `anyhow`, like the rest of the crate. 🦆

use std::path::PathBuf;

use thiserror::Error;

/// 🏷️ Every way the batching layer can disappoint you, itemized.
#[derive(Debug, Error)]
pub enum BatchError {
    /// 📂 The buffer file could not be created, appended, read or deleted.
    #[error("💀 buffer I/O failed on '{path}': {source}")]
    BufferIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 🕳️ Somebody asked for the buffered payload and there is no buffer.
    #[error("💀 no buffered payload is present")]
    BufferUnavailable,

    /// 🧭 A residual flush was attempted but nobody remembered where requests go.
    #[error("💀 residual flush skipped: no last_url/last_args recorded to rebuild the request")]
    MissingFlushContext,

    /// 🐘 A single request was bigger than the cluster will ever accept in one go.
    #[error("⚠️ item of {size} bytes exceeds the hard ceiling of {ceiling} bytes")]
    OversizedItem { size: u64, ceiling: u64 },

    /// 📊 The stats file could not be read or written.
    #[error("💀 stats I/O failed on '{path}': {source}")]
    StatsIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 📊 The stats could not be turned into JSON. Unreadable documents never get here; they are quarantined.
    #[error("💀 stats document is not valid: {0}")]
    StatsFormat(#[from] serde_json::Error),

    /// 🗄️ The host key-value store said no.
    #[error("💀 stats option store failed: {0}")]
    StatsStore(String),

    /// 📡 The flush request never made it, or came back with a non-2xx.
    #[error("💀 flush to '{url}' failed: {reason}")]
    Transport { url: String, reason: String },

    /// 👻 The flush reported success, yet the buffer is still sitting there.
    #[error("💀 buffer still exists after a successful flush")]
    LingeringBuffer,
}

/// 📦 Shorthand, because typing the full thing forty times is a hate crime.
pub type BatchResult<T> = Result<T, BatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_io_errors_keep_their_source() {
        let the_error = BatchError::BufferIo {
            path: PathBuf::from("/tmp/nope.ndjson"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let the_message = the_error.to_string();
        assert!(the_message.contains("/tmp/nope.ndjson"));
        assert!(std::error::Error::source(&the_error).is_some());
    }

    #[test]
    fn the_one_where_oversized_items_say_how_big() {
        let the_error = BatchError::OversizedItem {
            size: 10,
            ceiling: 5,
        };
        assert!(the_error.to_string().contains("10 bytes"));
    }
}
