//! 🪣 Buffers — where small bulk bodies wait for their friends.
//!
//! 🚰 Requests pour in one at a time, the buffer holds them as NDJSON lines,
//! and when the interceptor says "ship it", the whole thing leaves at once.
//!
//! 🎭 Two backends, one contract:
//! - [`FileBuffer`]: the real one. A single NDJSON file on disk, append-only, synced.
//! - [`InMemoryBuffer`]: a `String` with a lock. For tests and for hosts that
//!   would rather lose data on restart than touch a disk.
//! - `Custom`: bring your own [`PayloadBuffer`]. Not reachable from config.
//!
//! 🦆 The duck is here because every module must have one. Do not question the duck.

mod file;
mod in_mem;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::BatchResult;

pub use file::FileBuffer;
pub use in_mem::InMemoryBuffer;

/// 🪣 An append-only staging area for bulk bodies.
///
/// # Contract
/// - `append` writes `trim(body) + "\n"` and is durable before it returns.
/// - `current_size` is the byte length of what is stored, `0` when absent.
/// - `read_all` fails with `BufferUnavailable` when there is nothing stored.
/// - `clear` deletes everything; clearing nothing is not an error.
///
/// None of these lock anything. The engine serializes every call.
#[async_trait]
pub trait PayloadBuffer: std::fmt::Debug + Send + Sync {
    async fn append(&mut self, body: &str) -> BatchResult<()>;
    async fn current_size(&self) -> BatchResult<u64>;
    async fn exists(&self) -> BatchResult<bool>;
    async fn read_all(&self) -> BatchResult<String>;
    async fn clear(&mut self) -> BatchResult<()>;
}

/// 🎭 The many faces of a buffer. Picked once at startup, never swapped mid-run.
#[derive(Debug)]
pub enum BufferBackend {
    File(FileBuffer),
    InMemory(InMemoryBuffer),
    /// 🧩 A host-supplied buffer (a blob store, a db row, whatever holds bytes).
    Custom(Box<dyn PayloadBuffer>),
}

#[async_trait]
impl PayloadBuffer for BufferBackend {
    async fn append(&mut self, body: &str) -> BatchResult<()> {
        match self {
            BufferBackend::File(buffer) => buffer.append(body).await,
            BufferBackend::InMemory(buffer) => buffer.append(body).await,
            BufferBackend::Custom(buffer) => buffer.append(body).await,
        }
    }

    async fn current_size(&self) -> BatchResult<u64> {
        match self {
            BufferBackend::File(buffer) => buffer.current_size().await,
            BufferBackend::InMemory(buffer) => buffer.current_size().await,
            BufferBackend::Custom(buffer) => buffer.current_size().await,
        }
    }

    async fn exists(&self) -> BatchResult<bool> {
        match self {
            BufferBackend::File(buffer) => buffer.exists().await,
            BufferBackend::InMemory(buffer) => buffer.exists().await,
            BufferBackend::Custom(buffer) => buffer.exists().await,
        }
    }

    async fn read_all(&self) -> BatchResult<String> {
        match self {
            BufferBackend::File(buffer) => buffer.read_all().await,
            BufferBackend::InMemory(buffer) => buffer.read_all().await,
            BufferBackend::Custom(buffer) => buffer.read_all().await,
        }
    }

    async fn clear(&mut self) -> BatchResult<()> {
        match self {
            BufferBackend::File(buffer) => buffer.clear().await,
            BufferBackend::InMemory(buffer) => buffer.clear().await,
            BufferBackend::Custom(buffer) => buffer.clear().await,
        }
    }
}

/// 🔧 `[buffer.File]` or `[buffer.InMemory]` in the TOML.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub enum BufferConfig {
    File(FileBufferConfig),
    InMemory,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct FileBufferConfig {
    #[serde(default = "default_buffer_file_name")]
    pub file_name: String,
}

fn default_buffer_file_name() -> String {
    "bpx-buffer.ndjson".to_string()
}

impl Default for BufferConfig {
    fn default() -> Self {
        BufferConfig::File(FileBufferConfig {
            file_name: default_buffer_file_name(),
        })
    }
}

impl BufferBackend {
    /// 🏗️ Config in, backend out. No I/O happens until the first append.
    pub fn from_config(config: &BufferConfig) -> Self {
        match config {
            BufferConfig::File(file_config) => {
                BufferBackend::File(FileBuffer::new(&file_config.file_name))
            }
            BufferConfig::InMemory => BufferBackend::InMemory(InMemoryBuffer::default()),
        }
    }
}

/// ✂️ What actually lands in the buffer for a given body: trimmed, newline-terminated.
pub(crate) fn as_record(body: &str) -> String {
    let mut the_record = String::with_capacity(body.len() + 1);
    the_record.push_str(body.trim());
    the_record.push('\n');
    the_record
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_records_get_exactly_one_newline() {
        assert_eq!(as_record("  {\"a\":1}\n{\"b\":2}\n\n"), "{\"a\":1}\n{\"b\":2}\n");
        assert_eq!(as_record("{}"), "{}\n");
    }

    #[test]
    fn the_one_where_the_config_picks_the_backend() {
        #[derive(Deserialize)]
        struct TheWrapper {
            buffer: BufferConfig,
        }
        let the_wrapper: TheWrapper =
            toml::from_str("[buffer.File]\nfile_name = \"/tmp/x.ndjson\"").expect("💀 should parse");
        assert!(matches!(
            BufferBackend::from_config(&the_wrapper.buffer),
            BufferBackend::File(_)
        ));
        assert!(matches!(
            BufferBackend::from_config(&BufferConfig::InMemory),
            BufferBackend::InMemory(_)
        ));
    }
}
