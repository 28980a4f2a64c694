// ai
//! 📂 Previously, on "Things That Could Go Wrong With A File"...
//!
//! The disk was quiet. Too quiet. Forty bulk bodies had been appended, one by
//! one, each synced before anyone was told "200 OK". Then the indexing job died.
//! The file stayed. That is the whole point of the file.
//!
//! 🚰 append → OpenOptions(create+append) → write_all → sync_data
//! 📏 size → metadata().len(), or 0 when the file is not there
//! 🗑️ clear → remove_file, and "it was already gone" counts as success
//! 🦆 (mandatory, no notes)

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::trace;

use super::{PayloadBuffer, as_record};
use crate::error::{BatchError, BatchResult};

/// 📂 The NDJSON buffer file. One per engine, one per installation.
///
/// ⚠️ Writes are append-only. Nothing is ever edited in place, so a crash
/// mid-write can lose the tail but never scramble the head.
#[derive(Debug)]
pub struct FileBuffer {
    path: PathBuf,
}

impl FileBuffer {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> BatchError {
        BatchError::BufferIo {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl PayloadBuffer for FileBuffer {
    async fn append(&mut self, body: &str) -> BatchResult<()> {
        let the_record = as_record(body);
        trace!(
            "📬 appending {} bytes to buffer '{}'",
            the_record.len(),
            self.path.display()
        );
        let mut the_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        the_file
            .write_all(the_record.as_bytes())
            .await
            .map_err(|e| self.io_error(e))?;
        // -- 💾 not "written", written. the kernel's page cache is not a promise.
        the_file.sync_data().await.map_err(|e| self.io_error(e))?;
        Ok(())
    }

    async fn current_size(&self) -> BatchResult<u64> {
        match fs::metadata(&self.path).await {
            Ok(the_metadata) => Ok(the_metadata.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(self.io_error(e)),
        }
    }

    async fn exists(&self) -> BatchResult<bool> {
        fs::try_exists(&self.path)
            .await
            .map_err(|e| self.io_error(e))
    }

    async fn read_all(&self) -> BatchResult<String> {
        match fs::read_to_string(&self.path).await {
            Ok(the_payload) if the_payload.is_empty() => Err(BatchError::BufferUnavailable),
            Ok(the_payload) => Ok(the_payload),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(BatchError::BufferUnavailable),
            Err(e) => Err(self.io_error(e)),
        }
    }

    async fn clear(&mut self) -> BatchResult<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                trace!("🗑️ buffer '{}' deleted", self.path.display());
                Ok(())
            }
            // -- 💤 already gone. clearing nothing is the easiest job there is.
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }
}
