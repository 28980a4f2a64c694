//! 🪣 bpx — bulk payload batching for Elasticsearch indexing.
//!
//! 🎬 *[forty tiny bulk requests walk into a cluster. the cluster sighs.]*
//!
//! The host hands every outbound indexing request to a [`BatchingEngine`].
//! Small bulk bodies are parked in a buffer and answered with a fake 200; once
//! enough has piled up, the whole lot leaves in one request. A [`Reconciler`]
//! sweeps whatever is left once the indexing job goes quiet. 🦆
//!
//! 🧠 Knowledge graph:
//! - `decision` → pure threshold policy
//! - `buffer`, `stats` → storage, each a trait plus an enum of backends
//! - `interceptor` → the engine, the single critical section
//! - `reconciler` → the periodic residual sweep, a `Worker`
//! - `transport`, `notify` → the outside world

pub mod app_config;
pub mod buffer;
pub mod common;
pub mod decision;
pub mod error;
pub mod interceptor;
pub mod notify;
pub mod reconciler;
pub mod stats;
pub mod transport;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

pub use app_config::{AppConfig, load_config};
pub use common::{IndexingRequest, MockResponse, Outcome};
pub use decision::{BatchLimits, Decision};
pub use error::{BatchError, BatchResult};
pub use interceptor::BatchingEngine;
pub use reconciler::{IndexingJob, JobFlag, Reconciler, SweepOutcome, Worker};

use buffer::BufferBackend;
use stats::{KeyValueStore, StatsBackend};
use transport::{ElasticsearchTransport, TransportBackend};

/// 🏗️ Config in, engine out. `options` backs `[stats.Options]`; file-mode ignores it.
pub async fn build_engine(
    config: &AppConfig,
    options: Arc<dyn KeyValueStore>,
) -> Result<BatchingEngine> {
    let the_engine = BatchingEngine::new(
        config.batching,
        BufferBackend::from_config(&config.buffer),
        StatsBackend::from_config(&config.stats, options),
    );
    let Some(mock_path) = &config.mock_response_file else {
        return Ok(the_engine);
    };
    let the_mock_body = tokio::fs::read_to_string(mock_path)
        .await
        .with_context(|| {
            format!(
                "💀 mock_response_file '{}' could not be read. The fake 200 needs a real file.",
                mock_path.display()
            )
        })?;
    info!("🎭 serving mock replies from '{}'", mock_path.display());
    Ok(the_engine.with_mock_body(the_mock_body))
}

/// 📡 The transport residual flushes go through. Needs an `[elasticsearch]` section.
pub fn build_transport(config: &AppConfig) -> Result<TransportBackend> {
    let the_es_config = config
        .elasticsearch
        .clone()
        .context("💀 No [elasticsearch] section configured. We can't flush to a cluster we've never heard of.")?;
    Ok(TransportBackend::Elasticsearch(ElasticsearchTransport::new(
        the_es_config,
    )?))
}
