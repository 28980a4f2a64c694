//! 🔧 App Configuration — the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." — every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment. Every knob has a serde default, so an empty
//! environment and no file still gives you a working engine.

use std::path::{Path, PathBuf};

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::buffer::BufferConfig;
use crate::decision::BatchLimits;
use crate::reconciler::ReconcilerConfig;
use crate::stats::StatsConfig;
use crate::transport::ElasticsearchConfig;

/// 📦 One struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    /// ⚖️ The three thresholds.
    #[serde(default)]
    pub batching: BatchLimits,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    /// 📡 Where residual flushes go. No cluster, no replay, no sweep.
    #[serde(default)]
    pub elasticsearch: Option<ElasticsearchConfig>,
    /// 🎭 Replacement for the canned bulk reply body.
    #[serde(default)]
    pub mock_response_file: Option<PathBuf>,
}

/// 🚀 Load the config — from a file, from env vars, or from the sheer power of hoping.
///
/// 🔧 Merges `BPX_*` environment variables with an optional TOML file. Nested
/// keys use a double underscore: `BPX_BATCHING__MIN_FLUSH_SIZE=1000`.
///   - `None`  → env vars only.
///   - `Some`  → env vars + TOML file, merged. TOML wins on conflicts.
///
/// 💀 Fails when the config does not parse, or when the thresholds make no sense.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("BPX_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    // 💬 a context message that actually TELLS you what went wrong
    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (BPX_*). \
             The file exists in our hearts, but apparently not on disk.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (BPX_*). \
                 No file was provided — this one's all on the environment. Classic."
            .to_string(),
    };

    let app_config: AppConfig = config.extract().context(context_msg)?;
    app_config
        .batching
        .validate()
        .context("💀 The [batching] thresholds parsed fine and still make no sense.")?;
    Ok(app_config)
}
