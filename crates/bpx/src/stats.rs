// ai
//! 📊 stats.rs — "How many requests did we actually send?" — every operator, every incident.
//!
//! 🎬 *[a counter ticks. another counter ticks. nobody is watching.]*
//! *[then the cluster goes red and suddenly everybody is watching.]*
//!
//! The engine keeps a running diary of what it did: how many requests it
//! forwarded untouched, how many it stashed, how many it answered with a mock,
//! how many real bulk requests left the building, and which items were simply
//! too big to ever batch. The diary is durable, because the process that wrote
//! the last entry is rarely the one that reads it.
//!
//! 🎭 Two places the diary can live:
//! - [`FileStatsStore`]: one JSON document on disk, replaced atomically.
//! - [`OptionsStatsStore`]: one JSON string in a host key-value option table.
//!
//! 🦆 The duck counts too. The duck is not in the stats.

mod file;
mod options;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::{IndexingRequest, RequestArgs};
use crate::error::BatchResult;

pub use file::FileStatsStore;
pub use options::{InMemoryKeyValueStore, KeyValueStore, OptionsStatsStore};

// 📜 the diary has a page limit. older complaints fall off the front.
const MAX_MESSAGES: usize = 100;

/// 📊 The counters. Every field defaults, so half-written documents still load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stats {
    /// 🚶 Requests that skipped the buffer because appending would overflow it.
    pub total_normal_requests: u64,
    /// 🪣 Requests appended to the buffer.
    pub total_stored_requests: u64,
    /// 🐘 Requests over the hard ceiling, forwarded on their own.
    pub total_large_requests: u64,
    /// 🚀 Bulk requests actually sent with the buffered payload.
    pub total_real_requests: u64,
    /// 🎭 Requests answered with the canned response.
    pub total_mock_requests: u64,
    /// 📏 Buffer size after the last mutation.
    pub bulk_body_size: u64,
    /// 🐘 Leading action line of each oversized item, `null` when it would not parse.
    pub large_files: Vec<Option<Value>>,
    /// 🔗 URL of the last buffered request.
    pub last_url: Option<String>,
    /// 🧠 Method/path/host of the last buffered request. Body deliberately absent.
    pub last_args: Option<RequestArgs>,
    /// 📜 Diagnostics, oldest first.
    pub messages: Vec<String>,
    /// 🔄 Sweeps that found something to flush.
    pub cleanup_loops: u64,
    /// 💀 Why the last residual flush failed, if it did.
    pub cleanup_error: Option<String>,
    /// 🛑 Operator kill switch: while set, nothing is batched.
    pub force_stop: bool,
}

impl Stats {
    /// 🧠 Remember where the last buffered request was headed.
    pub(crate) fn remember(&mut self, request: &IndexingRequest) {
        self.last_url = Some(request.url());
        self.last_args = Some(request.args());
    }

    /// 📜 Append a diagnostic, dropping the oldest once the page limit is hit.
    pub(crate) fn push_message(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
        if self.messages.len() > MAX_MESSAGES {
            let the_overflow = self.messages.len() - MAX_MESSAGES;
            self.messages.drain(..the_overflow);
        }
    }

    /// 🌱 What survives a new cycle: where leftovers go, and the kill switch.
    pub(crate) fn carried_into_new_cycle(&self) -> Stats {
        Stats {
            last_url: self.last_url.clone(),
            last_args: self.last_args.clone(),
            force_stop: self.force_stop,
            ..Stats::default()
        }
    }

    /// 🧮 Everything the interceptor forwarded, mocked or flushed.
    pub fn total_handled(&self) -> u64 {
        self.total_normal_requests
            + self.total_large_requests
            + self.total_real_requests
            + self.total_mock_requests
    }
}

/// 🗄️ Where the diary is kept.
///
/// # Contract
/// - `load` on a store that never saw a `save` returns `Stats::default()`.
/// - `load` on a document that does not parse moves it aside and returns
///   `Stats::default()`.
/// - `save` replaces the whole document; readers never see half of one.
/// - `reset` puts the defaults back.
#[async_trait]
pub trait StatsStore: std::fmt::Debug + Send + Sync {
    async fn load(&self) -> BatchResult<Stats>;
    async fn save(&mut self, stats: &Stats) -> BatchResult<()>;
    async fn reset(&mut self) -> BatchResult<()> {
        self.save(&Stats::default()).await
    }
}

/// 🎭 File or option table. Chosen once at startup.
#[derive(Debug)]
pub enum StatsBackend {
    File(FileStatsStore),
    Options(OptionsStatsStore),
}

#[async_trait]
impl StatsStore for StatsBackend {
    async fn load(&self) -> BatchResult<Stats> {
        match self {
            StatsBackend::File(store) => store.load().await,
            StatsBackend::Options(store) => store.load().await,
        }
    }

    async fn save(&mut self, stats: &Stats) -> BatchResult<()> {
        match self {
            StatsBackend::File(store) => store.save(stats).await,
            StatsBackend::Options(store) => store.save(stats).await,
        }
    }

    async fn reset(&mut self) -> BatchResult<()> {
        match self {
            StatsBackend::File(store) => store.reset().await,
            StatsBackend::Options(store) => store.reset().await,
        }
    }
}

/// 🔧 The stats backend selector: `[stats.File]` (file) or `[stats.Options]` (db).
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub enum StatsConfig {
    File(FileStatsConfig),
    Options(OptionsStatsConfig),
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct FileStatsConfig {
    #[serde(default = "default_stats_file_name")]
    pub file_name: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct OptionsStatsConfig {
    #[serde(default = "default_stats_option_name")]
    pub option_name: String,
}

fn default_stats_file_name() -> String {
    "bpx-stats.json".to_string()
}

fn default_stats_option_name() -> String {
    "bpx_bulk_stats".to_string()
}

impl Default for StatsConfig {
    fn default() -> Self {
        StatsConfig::File(FileStatsConfig {
            file_name: default_stats_file_name(),
        })
    }
}

impl StatsBackend {
    /// 🏗️ Config in, backend out. The option table is the host's; we only borrow it.
    pub fn from_config(
        config: &StatsConfig,
        options: std::sync::Arc<dyn KeyValueStore>,
    ) -> Self {
        match config {
            StatsConfig::File(file_config) => {
                StatsBackend::File(FileStatsStore::new(&file_config.file_name))
            }
            StatsConfig::Options(options_config) => StatsBackend::Options(
                OptionsStatsStore::new(options, options_config.option_name.clone()),
            ),
        }
    }
}
