// ai
//! 🗄️ The stats diary, folded into one option of the host's key-value table.
//!
//! 🎬 *[the host already has a settings table. every plugin on earth keeps its
//! junk in there. so do we. one key, one JSON string, no schema migrations.]*
//!
//! 🧠 Knowledge graph:
//! - [`KeyValueStore`]: the host's option table, seen through the narrowest keyhole.
//! - [`InMemoryKeyValueStore`]: a `HashMap` behind a lock. For tests and the CLI.
//! - [`OptionsStatsStore`]: serializes `Stats` under one option name. 🦆

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::warn;

use super::{Stats, StatsStore};
use crate::error::{BatchError, BatchResult};

/// 🗄️ The host's option table. Get, set, delete. That's the whole API.
pub trait KeyValueStore: std::fmt::Debug + Send + Sync {
    fn get_option(&self, key: &str) -> Option<String>;
    fn update_option(&self, key: &str, value: String) -> anyhow::Result<()>;
    fn delete_option(&self, key: &str) -> anyhow::Result<()>;
}

/// 🧠 A `HashMap` pretending to be a database table. It is very convincing.
#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    options: Mutex<HashMap<String, String>>,
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn get_option(&self, key: &str) -> Option<String> {
        self.options
            .lock()
            .ok()
            .and_then(|options| options.get(key).cloned())
    }

    fn update_option(&self, key: &str, value: String) -> anyhow::Result<()> {
        self.options
            .lock()
            .map_err(|_| anyhow::anyhow!("💀 option table lock poisoned"))?
            .insert(key.to_string(), value);
        Ok(())
    }

    fn delete_option(&self, key: &str) -> anyhow::Result<()> {
        self.options
            .lock()
            .map_err(|_| anyhow::anyhow!("💀 option table lock poisoned"))?
            .remove(key);
        Ok(())
    }
}

#[derive(Debug)]
pub struct OptionsStatsStore {
    options: Arc<dyn KeyValueStore>,
    option_name: String,
}

impl OptionsStatsStore {
    pub fn new(options: Arc<dyn KeyValueStore>, option_name: impl Into<String>) -> Self {
        Self {
            options,
            option_name: option_name.into(),
        }
    }

    /// 🧟 Option an unreadable document is copied to before starting over.
    pub fn quarantine_name(&self) -> String {
        format!("{}_corrupt", self.option_name)
    }
}

#[async_trait]
impl StatsStore for OptionsStatsStore {
    async fn load(&self) -> BatchResult<Stats> {
        match self.options.get_option(&self.option_name) {
            Some(the_document) if !the_document.trim().is_empty() => {
                match serde_json::from_str(&the_document) {
                    Ok(the_stats) => Ok(the_stats),
                    Err(parse_error) => {
                        let the_quarantine = self.quarantine_name();
                        self.options
                            .update_option(&the_quarantine, the_document)
                            .and_then(|_| self.options.delete_option(&self.option_name))
                            .map_err(|e| BatchError::StatsStore(format!("{e:#}")))?;
                        warn!(
                            "🧟 stats option '{}' did not parse ({}); copied it to '{}' and starting from zero",
                            self.option_name, parse_error, the_quarantine
                        );
                        Ok(Stats::default())
                    }
                }
            }
            _ => Ok(Stats::default()),
        }
    }

    async fn save(&mut self, stats: &Stats) -> BatchResult<()> {
        let the_document = serde_json::to_string(stats)?;
        self.options
            .update_option(&self.option_name, the_document)
            .map_err(|e| BatchError::StatsStore(format!("{e:#}")))
    }

    async fn reset(&mut self) -> BatchResult<()> {
        self.options
            .delete_option(&self.option_name)
            .map_err(|e| BatchError::StatsStore(format!("{e:#}")))
    }
}
