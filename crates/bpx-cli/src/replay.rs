//! 📼 replay.rs — pretend to be an indexing job, on purpose.
//!
//! Reads a bulk NDJSON file, slices it into requests of N documents each, and
//! pushes every one through the engine the way a real indexer would. Whatever
//! the engine says to send gets sent. A flush that fails to send is handed back
//! to the engine. When the file runs out, the job "ends" and one sweep picks up
//! the leftovers.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use bpx::transport::{FlushRequest, Transport};
use bpx::{AppConfig, BatchingEngine, IndexingRequest, JobFlag, Outcome, SweepOutcome};
use tracing::{error, info, warn};

use crate::progress::{Landing, ReplayProgress};

/// ✂️ Cut a bulk body into requests of `docs_per_request` documents.
///
/// A document is an action line plus its source line, except `delete`, which
/// travels alone. Blank lines are dropped. Every chunk ends in a newline.
pub(crate) fn chunk_bulk_lines(ndjson: &str, docs_per_request: usize) -> Vec<String> {
    let the_docs_per_request = docs_per_request.max(1);
    let mut the_chunks = Vec::new();
    let mut the_chunk = String::new();
    let mut the_docs_in_chunk = 0;

    let mut the_lines = ndjson.lines().filter(|line| !line.trim().is_empty());
    while let Some(action) = the_lines.next() {
        the_chunk.push_str(action);
        the_chunk.push('\n');
        if !action.trim_start().starts_with("{\"delete\"") {
            if let Some(source) = the_lines.next() {
                the_chunk.push_str(source);
                the_chunk.push('\n');
            }
        }
        the_docs_in_chunk += 1;
        if the_docs_in_chunk == the_docs_per_request {
            the_chunks.push(std::mem::take(&mut the_chunk));
            the_docs_in_chunk = 0;
        }
    }
    if !the_chunk.is_empty() {
        the_chunks.push(the_chunk);
    }
    the_chunks
}

/// 📬 Send whatever the engine decided, and report where the request ended up.
///
/// A failed flush goes back into the buffer through `restore_flush`. Only a
/// failure to put it back is an error: that is the one way bytes get lost.
pub(crate) async fn deliver(
    engine: &BatchingEngine,
    transport: &dyn Transport,
    outcome: Outcome,
) -> Result<Landing> {
    match outcome {
        Outcome::Mock(_) => Ok(Landing::Mocked),
        Outcome::Forward(request) => {
            let the_url = request.url();
            let the_sent = transport
                .send(FlushRequest {
                    method: request.method,
                    url: the_url.clone(),
                    body: request.body,
                })
                .await;
            match the_sent {
                Ok(()) => Ok(Landing::Forwarded),
                Err(err) => {
                    warn!("⚠️ forwarding to '{}' failed: {:#}", the_url, err);
                    Ok(Landing::Failed)
                }
            }
        }
        Outcome::ForwardWithBody { request, body } => {
            let the_url = request.url();
            let the_sent = transport
                .send(FlushRequest {
                    method: request.method,
                    url: the_url.clone(),
                    body: body.clone(),
                })
                .await;
            match the_sent {
                Ok(()) => Ok(Landing::Flushed),
                Err(err) => {
                    error!("💀 flush to '{}' failed, putting {} bytes back: {:#}", the_url, body.len(), err);
                    engine
                        .restore_flush(body, format!("{err:#}"))
                        .await
                        .context("💀 a flush failed AND the payload could not be put back in the buffer")?;
                    Ok(Landing::Failed)
                }
            }
        }
    }
}

pub(crate) async fn run(
    config: &AppConfig,
    engine: Arc<BatchingEngine>,
    file: &Path,
    docs_per_request: usize,
    index: Option<String>,
) -> Result<()> {
    let the_host = config
        .elasticsearch
        .as_ref()
        .map(|es| es.url.clone())
        .context("💀 Replay needs an [elasticsearch] section. Somebody has to receive the flushes.")?;
    let the_transport = bpx::build_transport(config)?;

    let the_ndjson = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("💀 Couldn't read the bulk file '{}'", file.display()))?;
    let the_path = match index {
        Some(index) => format!("/{index}/_bulk"),
        None => "/_bulk".to_string(),
    };
    let the_chunks = chunk_bulk_lines(&the_ndjson, docs_per_request);
    info!(
        "📼 replaying {} requests of up to {} docs from '{}', flushing past {} buffered bytes",
        the_chunks.len(),
        docs_per_request,
        file.display(),
        engine.limits().min_flush_size
    );

    let the_job = Arc::new(JobFlag::new(true));
    let mut the_progress =
        ReplayProgress::new(file.display().to_string(), the_ndjson.len() as u64)?;

    for chunk in the_chunks {
        let the_bytes = chunk.len() as u64;
        let the_request = IndexingRequest::new("POST", the_path.clone(), chunk, the_host.clone());
        let the_outcome = engine.evaluate(the_request).await;
        let the_landing = deliver(&engine, &the_transport, the_outcome).await?;
        the_progress.record(the_bytes, the_landing);
    }
    the_progress.finish();

    // 🏁 the "indexing job" is over. whatever is left gets swept now.
    the_job.set_active(false);
    let the_reconciler = crate::reconciler_for(config, Arc::clone(&engine), the_job)?;
    match the_reconciler.sweep().await {
        SweepOutcome::Flushed { bytes } => info!("🧹 final sweep flushed {} bytes", bytes),
        SweepOutcome::Empty | SweepOutcome::Deferred => {}
        SweepOutcome::Failed(err) => warn!("⚠️ final sweep failed, leftovers stay buffered: {}", err),
    }

    let the_stats = engine.stats().await?;
    let the_buffered = engine.buffer_size().await?;
    println!(
        "✅ replayed {} requests\n{}",
        the_progress.requests(),
        crate::stats_table(&the_stats, the_buffered)
    );
    Ok(())
}
