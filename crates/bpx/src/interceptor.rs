// ai
//! 🚦 interceptor.rs — the `BatchingEngine`, where requests come to wait.
//!
//! 🎬 *[camera pans across a queue of tiny bulk requests]*
//! 🎬 "In a world where every forty posts meant one more HTTP round trip..."
//! 🎬 "One engine dared to say: not yet."
//! 🎬 *[record scratch]* 🦆
//!
//! The host hands us each outbound indexing request. We answer with one of:
//! - [`Outcome::Forward`]: send it as-is, we want nothing to do with it
//! - [`Outcome::Mock`]: don't send anything, here's a fake 200, it's in the buffer
//! - [`Outcome::ForwardWithBody`]: send it, but carry the whole buffer instead
//!
//! 🧠 Knowledge graph:
//! - policy lives in `decision.rs`, storage in `buffer.rs`, counters in `stats.rs`
//! - every call runs "read size → append → maybe flush → clear → save stats"
//!   under ONE async mutex. concurrent callers line up. order is arrival order.
//! - the reconciler shares this engine through an `Arc` and flushes leftovers
//!   through `flush_residual`, under the same mutex.
//! - every append arms the sweep trigger. no append goes unswept.
//! - a `ForwardWithBody` payload is the host's to deliver. if that send fails,
//!   the host hands it back through `restore_flush` and nothing is lost.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use crate::buffer::{BufferBackend, PayloadBuffer};
use crate::common::{IndexingRequest, MockResponse, Outcome, RequestArgs};
use crate::decision::{BatchLimits, Decision};
use crate::error::{BatchError, BatchResult};
use crate::reconciler::{SweepOutcome, SweepTrigger};
use crate::stats::{Stats, StatsBackend, StatsStore};
use crate::transport::{FlushRequest, Transport};

/// 🎭 The canned bulk reply shipped with the crate.
pub const DEFAULT_MOCK_BODY: &str = include_str!("../assets/mock_bulk_response.json");

// 🚫 paths that are reads, diagnostics or pipeline admin. never bulk, never batched.
const DISALLOWED_PATHS: [&str; 3] = ["_search", "_stats", "_ingest/pipeline"];
// 🚫 index creation / settings updates. batching these would be a war crime.
const DISALLOWED_BODY_PREFIX: &str = "{\"settings\":";

/// 🔍 Is this request even a candidate for batching?
///
/// POST or PUT, not a search/stats/pipeline path, not a settings payload,
/// and not blank. Everything else goes straight through.
pub fn is_eligible(request: &IndexingRequest) -> bool {
    let the_method_is_a_write = request.method.eq_ignore_ascii_case("POST")
        || request.method.eq_ignore_ascii_case("PUT");
    if !the_method_is_a_write {
        return false;
    }
    if DISALLOWED_PATHS
        .iter()
        .any(|disallowed| request.path.contains(disallowed))
    {
        return false;
    }
    let the_body = request.body.trim_start();
    !the_body.is_empty() && !the_body.starts_with(DISALLOWED_BODY_PREFIX)
}

/// 🏷️ First line of a bulk body, parsed. `{"index":{"_id":"42"}}` on a good day, `None` on a bad one.
pub(crate) fn leading_identifier(body: &str) -> Option<Value> {
    let the_body = body.trim_start().as_bytes();
    let the_first_line = match memchr::memchr(b'\n', the_body) {
        Some(end) => &the_body[..end],
        None => the_body,
    };
    serde_json::from_slice(the_first_line).ok()
}

/// 🔒 Everything the mutex protects. One buffer, one stats store, one at a time.
#[derive(Debug)]
struct EngineState {
    buffer: BufferBackend,
    stats: StatsBackend,
    /// 🧭 URL + args of the last buffered request, kept in memory in case the
    /// stats store could not save them.
    last_flush_context: Option<(String, RequestArgs)>,
}

/// 🛣️ Where a request ends up, before it is dressed as an `Outcome`.
enum Route {
    Forward,
    Mock,
    Flush(String),
}

/// 🛣️ A route, plus the stats save error that came after the buffer already moved.
struct Routed {
    route: Route,
    unsaved: Option<BatchError>,
}

/// 🚦 The batching engine. Build one at startup, share it with an `Arc`.
#[derive(Debug)]
pub struct BatchingEngine {
    limits: BatchLimits,
    mock_body: String,
    trigger: Arc<SweepTrigger>,
    state: Mutex<EngineState>,
}

impl BatchingEngine {
    /// 🏗️ Limits, a buffer and a stats store. No I/O happens here.
    pub fn new(limits: BatchLimits, buffer: BufferBackend, stats: StatsBackend) -> Self {
        Self {
            limits,
            mock_body: DEFAULT_MOCK_BODY.to_string(),
            trigger: Arc::new(SweepTrigger::default()),
            state: Mutex::new(EngineState {
                buffer,
                stats,
                last_flush_context: None,
            }),
        }
    }

    /// 🎭 Swap the canned reply body for one of your own.
    pub fn with_mock_body(mut self, mock_body: impl Into<String>) -> Self {
        self.mock_body = mock_body.into();
        self
    }

    /// ⚖️ The three thresholds every decision is made against.
    pub fn limits(&self) -> &BatchLimits {
        &self.limits
    }

    /// ⏰ The shared sweep trigger. The reconciler waits on it; appends arm it.
    pub fn trigger(&self) -> Arc<SweepTrigger> {
        Arc::clone(&self.trigger)
    }

    pub fn mock_response(&self) -> MockResponse {
        MockResponse::ok(self.mock_body.clone())
    }

    /// 🚦 Decide what happens to one request. Never fails.
    ///
    /// If the buffer or the stats store blows up, the request is forwarded
    /// untouched and the failure lands in `Stats::messages`. Availability beats
    /// batching efficiency. Every time.
    pub async fn evaluate(&self, request: IndexingRequest) -> Outcome {
        if !is_eligible(&request) {
            trace!("🚶 {} {} is not batchable, forwarding", request.method, request.path);
            return Outcome::Forward(request);
        }
        self.trigger.arm();
        match self.route(&request).await {
            Ok(Routed { route, unsaved }) => {
                if let Some(err) = unsaved {
                    warn!(
                        "⚠️ stats could not be saved after {} {}: {}",
                        request.method, request.path, err
                    );
                }
                self.dress(route, request)
            }
            Err(err) => {
                warn!(
                    "⚠️ batching failed for {} {}, forwarding as-is: {}",
                    request.method, request.path, err
                );
                self.record_message(format!("{} ({} {})", err, request.method, request.url()))
                    .await;
                Outcome::Forward(request)
            }
        }
    }

    /// 🚦 Same as [`evaluate`](Self::evaluate), but storage failures come back as errors.
    ///
    /// For hosts that would rather fail the individual request than forward it
    /// unbatched. A stats save failure is an error too, unless the decision was
    /// a flush: that payload already left the buffer and must reach the caller,
    /// so the failure is only logged.
    ///
    /// ⚠️ When a mock-path save fails, the body is already buffered. Retrying
    /// the same request will buffer it twice.
    pub async fn try_evaluate(&self, request: IndexingRequest) -> BatchResult<Outcome> {
        if !is_eligible(&request) {
            return Ok(Outcome::Forward(request));
        }
        self.trigger.arm();
        let Routed { route, unsaved } = self.route(&request).await?;
        match (unsaved, &route) {
            (Some(err), Route::Flush(_)) => {
                warn!("⚠️ stats could not be saved after a flush, handing the payload over anyway: {}", err);
            }
            (Some(err), _) => return Err(err),
            (None, _) => {}
        }
        Ok(self.dress(route, request))
    }

    fn dress(&self, route: Route, request: IndexingRequest) -> Outcome {
        match route {
            Route::Forward => Outcome::Forward(request),
            Route::Mock => Outcome::Mock(self.mock_response()),
            Route::Flush(body) => Outcome::ForwardWithBody { request, body },
        }
    }

    /// 🔒 The critical section: size → decide → append → maybe flush → save.
    async fn route(&self, request: &IndexingRequest) -> BatchResult<Routed> {
        let mut the_state = self.state.lock().await;
        let EngineState {
            buffer,
            stats: store,
            last_flush_context,
        } = &mut *the_state;

        let mut stats = store.load().await?;
        if stats.force_stop {
            debug!("🛑 force_stop is set, batching is off");
            stats.total_normal_requests += 1;
            return Ok(Routed {
                route: Route::Forward,
                unsaved: store.save(&stats).await.err(),
            });
        }

        let the_existing_size = buffer.current_size().await?;
        let the_incoming_size = request.body_size();
        let the_decision = self.limits.decide(the_existing_size, the_incoming_size);
        debug!(
            "⚖️ buffered={} incoming={} → {:?}",
            the_existing_size, the_incoming_size, the_decision
        );

        let the_route = match the_decision {
            Decision::PassThrough => {
                let the_complaint = BatchError::OversizedItem {
                    size: the_incoming_size,
                    ceiling: self.limits.hard_ceiling_size,
                };
                warn!("{} — forwarding it on its own", the_complaint);
                stats.large_files.push(leading_identifier(&request.body));
                stats.total_large_requests += 1;
                Route::Forward
            }
            Decision::RejectOversized => {
                stats.total_normal_requests += 1;
                Route::Forward
            }
            Decision::BufferOnly => {
                buffer.append(&request.body).await?;
                self.trigger.arm();
                stats.total_stored_requests += 1;
                stats.total_mock_requests += 1;
                stats.remember(request);
                *last_flush_context = Some((request.url(), request.args()));
                stats.bulk_body_size = buffer.current_size().await?;
                Route::Mock
            }
            Decision::BufferAndFlush => {
                buffer.append(&request.body).await?;
                self.trigger.arm();
                stats.total_stored_requests += 1;
                stats.remember(request);
                *last_flush_context = Some((request.url(), request.args()));
                let the_payload = buffer.read_all().await?;
                buffer.clear().await?;
                stats.total_real_requests += 1;
                stats.bulk_body_size = 0;
                info!(
                    "🚀 flushing {} buffered bytes with {} {}",
                    the_payload.len(),
                    request.method,
                    request.path
                );
                Route::Flush(the_payload)
            }
        };

        // -- 📊 the buffer already moved; a stats hiccup must not undo that
        let the_unsaved = store.save(&stats).await.err();
        if let Some(err) = &the_unsaved {
            debug!("📊 stats save failed after {:?}: {}", the_decision, err);
        }
        Ok(Routed {
            route: the_route,
            unsaved: the_unsaved,
        })
    }

    /// ↩️ The host could not deliver a [`Outcome::ForwardWithBody`] payload. Put it back.
    ///
    /// Hosts must call this whenever sending that body fails. The payload goes
    /// back in front of anything buffered since, so arrival order holds. The
    /// flush is taken off `total_real_requests`, `reason` lands in
    /// `Stats::messages`, and the sweep trigger is armed so the reconciler
    /// ships it once the job goes quiet.
    pub async fn restore_flush(
        &self,
        body: String,
        reason: impl std::fmt::Display,
    ) -> BatchResult<()> {
        if body.trim().is_empty() {
            return Ok(());
        }
        let mut the_state = self.state.lock().await;
        let EngineState {
            buffer,
            stats: store,
            ..
        } = &mut *the_state;

        let the_newer = match buffer.read_all().await {
            Ok(newer) => Some(newer),
            Err(BatchError::BufferUnavailable) => None,
            Err(err) => return Err(err),
        };
        if the_newer.is_some() {
            buffer.clear().await?;
        }
        buffer.append(&body).await?;
        if let Some(newer) = the_newer {
            buffer.append(&newer).await?;
        }
        self.trigger.arm();

        let mut stats = store.load().await?;
        stats.total_real_requests = stats.total_real_requests.saturating_sub(1);
        stats.bulk_body_size = buffer.current_size().await?;
        stats.push_message(format!(
            "💀 flush of {} bytes failed, payload put back in the buffer: {}",
            body.len(),
            reason
        ));
        store.save(&stats).await?;
        warn!(
            "↩️ restored {} bytes after a failed flush, buffer now holds {} bytes",
            body.len(),
            stats.bulk_body_size
        );
        Ok(())
    }

    /// 🧹 Flush whatever is left in the buffer with the last remembered request.
    ///
    /// Disarms the sweep trigger before releasing the lock, so an append that
    /// sneaks in right after re-arms it and is not forgotten.
    pub(crate) async fn flush_residual(&self, transport: &dyn Transport) -> SweepOutcome {
        let mut the_state = self.state.lock().await;
        let the_outcome = Self::flush_residual_locked(&mut the_state, transport).await;
        self.trigger.disarm();
        the_outcome
    }

    async fn flush_residual_locked(
        state: &mut EngineState,
        transport: &dyn Transport,
    ) -> SweepOutcome {
        let EngineState {
            buffer,
            stats: store,
            last_flush_context,
        } = state;

        let the_size = match buffer.current_size().await {
            Ok(size) => size,
            Err(err) => return SweepOutcome::Failed(err),
        };
        if the_size == 0 {
            return SweepOutcome::Empty;
        }
        let mut stats = match store.load().await {
            Ok(stats) => stats,
            Err(err) => return SweepOutcome::Failed(err),
        };
        stats.cleanup_loops += 1;

        let the_result =
            Self::send_residual(buffer, &mut stats, last_flush_context.as_ref(), transport).await;
        match &the_result {
            Ok(_) => {
                stats.cleanup_error = None;
                stats.bulk_body_size = 0;
            }
            Err(err) => {
                stats.push_message(err.to_string());
                stats.cleanup_error = Some(err.to_string());
                stats.bulk_body_size = buffer.current_size().await.unwrap_or(the_size);
            }
        }
        if let Err(err) = store.save(&stats).await {
            warn!("⚠️ stats could not be saved after residual flush: {}", err);
        }
        match the_result {
            Ok(bytes) => SweepOutcome::Flushed { bytes },
            Err(err) => SweepOutcome::Failed(err),
        }
    }

    async fn send_residual(
        buffer: &mut BufferBackend,
        stats: &mut Stats,
        fallback_context: Option<&(String, RequestArgs)>,
        transport: &dyn Transport,
    ) -> BatchResult<u64> {
        let the_context = match (stats.last_url.clone(), stats.last_args.clone()) {
            (Some(url), Some(args)) => Some((url, args)),
            // -- 🧭 the diary lost it, but this process still remembers
            _ => fallback_context.cloned(),
        };
        let Some((the_url, the_args)) = the_context else {
            return Err(BatchError::MissingFlushContext);
        };
        let the_payload = buffer.read_all().await?;
        let the_bytes = the_payload.len() as u64;
        transport
            .send(FlushRequest {
                method: the_args.method,
                url: the_url.clone(),
                body: the_payload,
            })
            .await
            .map_err(|err| BatchError::Transport {
                url: the_url,
                reason: format!("{err:#}"),
            })?;
        // -- ✅ it left the building. count it before anything else can go wrong.
        stats.total_real_requests += 1;
        buffer.clear().await?;
        if buffer.exists().await? {
            return Err(BatchError::LingeringBuffer);
        }
        info!("🧹 residual flush sent {} bytes", the_bytes);
        Ok(the_bytes)
    }

    /// 🌱 A fresh indexing cycle: counters and messages back to zero.
    ///
    /// The buffer is left alone, and so are `last_url`, `last_args` and
    /// `force_stop`, so leftovers from the previous cycle can still be swept.
    pub async fn begin_cycle(&self) -> BatchResult<()> {
        let mut the_state = self.state.lock().await;
        let the_carried = the_state.stats.load().await?.carried_into_new_cycle();
        the_state.stats.reset().await?;
        if the_carried != Stats::default() {
            the_state.stats.save(&the_carried).await?;
        }
        info!("🌱 stats reset for a new indexing cycle");
        Ok(())
    }

    /// 🛑 Flip the kill switch. While on, every request is forwarded untouched.
    pub async fn set_force_stop(&self, force_stop: bool) -> BatchResult<()> {
        let mut the_state = self.state.lock().await;
        let mut stats = the_state.stats.load().await?;
        stats.force_stop = force_stop;
        the_state.stats.save(&stats).await?;
        info!("🛑 force_stop = {}", force_stop);
        Ok(())
    }

    /// 📊 A snapshot of the counters.
    pub async fn stats(&self) -> BatchResult<Stats> {
        let the_state = self.state.lock().await;
        the_state.stats.load().await
    }

    /// 📏 Bytes currently waiting in the buffer.
    pub async fn buffer_size(&self) -> BatchResult<u64> {
        let the_state = self.state.lock().await;
        the_state.buffer.current_size().await
    }

    async fn record_message(&self, message: String) {
        let mut the_state = self.state.lock().await;
        let mut stats = match the_state.stats.load().await {
            Ok(stats) => stats,
            Err(err) => {
                warn!("⚠️ could not load stats to record '{}': {}", message, err);
                return;
            }
        };
        stats.push_message(message);
        if let Err(err) = the_state.stats.save(&stats).await {
            warn!("⚠️ could not save diagnostic message: {}", err);
        }
    }
}
