//! 📂 The stats diary, as a single JSON document on disk.
//!
//! ⚠️ `save` never writes the real file in place. It writes a sibling `.tmp`,
//! syncs it, then renames over the original. A reader either sees the old
//! document or the new one. Never a sandwich of both.
//!
//! 🧟 A document that does not parse is moved aside to `<name>.corrupt` and
//! the diary starts over from zero. Losing counters beats losing batching.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{trace, warn};

use super::{Stats, StatsStore};
use crate::error::{BatchError, BatchResult};

#[derive(Debug)]
pub struct FileStatsStore {
    path: PathBuf,
}

impl FileStatsStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> BatchError {
        BatchError::StatsIo {
            path: self.path.clone(),
            source,
        }
    }

    fn scratch_path(&self) -> PathBuf {
        self.sibling(".tmp")
    }

    /// 🧟 Where an unreadable document is moved to.
    pub fn quarantine_path(&self) -> PathBuf {
        self.sibling(".corrupt")
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut the_name = self.path.as_os_str().to_owned();
        the_name.push(suffix);
        PathBuf::from(the_name)
    }
}

#[async_trait]
impl StatsStore for FileStatsStore {
    async fn load(&self) -> BatchResult<Stats> {
        let the_document = match fs::read_to_string(&self.path).await {
            Ok(the_document) => the_document,
            // -- 🌱 first access: nothing written yet, everything is zero
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Stats::default()),
            Err(e) => return Err(self.io_error(e)),
        };
        if the_document.trim().is_empty() {
            return Ok(Stats::default());
        }
        match serde_json::from_str(&the_document) {
            Ok(the_stats) => Ok(the_stats),
            Err(parse_error) => {
                let the_quarantine = self.quarantine_path();
                fs::rename(&self.path, &the_quarantine)
                    .await
                    .map_err(|e| self.io_error(e))?;
                warn!(
                    "🧟 stats document '{}' did not parse ({}); moved it to '{}' and starting from zero",
                    self.path.display(),
                    parse_error,
                    the_quarantine.display()
                );
                Ok(Stats::default())
            }
        }
    }

    async fn save(&mut self, stats: &Stats) -> BatchResult<()> {
        let the_document = serde_json::to_vec_pretty(stats)?;
        let the_scratch = self.scratch_path();
        let mut the_file = fs::File::create(&the_scratch)
            .await
            .map_err(|e| self.io_error(e))?;
        the_file
            .write_all(&the_document)
            .await
            .map_err(|e| self.io_error(e))?;
        the_file.sync_all().await.map_err(|e| self.io_error(e))?;
        drop(the_file);
        fs::rename(&the_scratch, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        trace!(
            "📊 stats saved to '{}' ({} bytes)",
            self.path.display(),
            the_document.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn the_one_where_a_fresh_install_starts_at_zero() -> anyhow::Result<()> {
        let the_dir = tempfile::tempdir()?;
        let the_store = FileStatsStore::new(the_dir.path().join("stats.json"));
        assert_eq!(the_store.load().await?, Stats::default());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_diary_survives_a_new_process() -> anyhow::Result<()> {
        let the_dir = tempfile::tempdir()?;
        let the_path = the_dir.path().join("stats.json");
        let mut the_store = FileStatsStore::new(&the_path);
        let mut the_stats = Stats::default();
        the_stats.total_mock_requests = 7;
        the_stats.push_message("hello from the past");
        the_store.save(&the_stats).await?;

        // 🔄 a brand new store on the same path, like a brand new PHP request
        let the_reborn_store = FileStatsStore::new(&the_path);
        assert_eq!(the_reborn_store.load().await?, the_stats);
        assert!(!the_reborn_store.scratch_path().exists());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_reset_wipes_the_slate() -> anyhow::Result<()> {
        let the_dir = tempfile::tempdir()?;
        let mut the_store = FileStatsStore::new(the_dir.path().join("stats.json"));
        let mut the_stats = Stats::default();
        the_stats.force_stop = true;
        the_store.save(&the_stats).await?;
        the_store.reset().await?;
        assert_eq!(the_store.load().await?, Stats::default());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_garbage_on_disk_gets_quarantined() -> anyhow::Result<()> {
        let the_dir = tempfile::tempdir()?;
        let the_path = the_dir.path().join("stats.json");
        std::fs::write(&the_path, "this is not json, it is a cry for help")?;
        let mut the_store = FileStatsStore::new(&the_path);

        assert_eq!(the_store.load().await?, Stats::default());
        assert!(!the_path.exists());
        assert_eq!(
            std::fs::read_to_string(the_store.quarantine_path())?,
            "this is not json, it is a cry for help"
        );

        // 🌱 the next save starts a clean document next to the corpse
        let mut the_stats = Stats::default();
        the_stats.total_mock_requests = 1;
        the_store.save(&the_stats).await?;
        assert_eq!(the_store.load().await?, the_stats);
        Ok(())
    }
}
