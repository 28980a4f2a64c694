//! 🎬 *[the indexing job has left the building. the buffer has not.]*
//! *[the clock on the wall reads 2:47am.]*
//! *[somewhere, four megabytes of documents wait for a flush that will never come.]*
//!
//! 🧹 The Reconciler — patient, periodic, and deeply unbothered by the chaos
//! upstream. Every few seconds it asks one question: "is anybody still indexing?"
//! If yes, it goes back to sleep. If no, and the buffer still holds something,
//! it flushes the leftovers with the last request anyone remembered, then goes
//! idle until the next append wakes it up.
//!
//! ```text
//!   Idle ──append/arm──▶ Armed ──tick, job idle──▶ Sweeping ──done──▶ Idle
//!                          ▲           │
//!                          └─job busy──┘
//! ```
//!
//! ⚠️ Every append arms the trigger, so data written after a sweep disarmed
//! is never stranded waiting for some future request to re-arm it. 🦆

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::BatchError;
use crate::interceptor::BatchingEngine;
use crate::notify::Notifier;
use crate::transport::Transport;

// ⏰ five seconds: long enough to not be a busy loop, short enough that nobody notices.
const DEFAULT_INTERVAL_SECS: u64 = 5;
// 📜 how many recent diagnostics ride along with an operator notification
const NOTIFY_TAIL: usize = 10;

/// 🏗️ A background worker, that does work. duh.
///
/// 🎯 The trait that all workers must implement, like a social contract
/// but enforced by the compiler instead of polite society.
pub trait Worker {
    /// 🚀 Start the worker. Returns a JoinHandle because we trust
    /// but verify. Mostly verify.
    fn start(self) -> JoinHandle<Result<()>>;
}

/// 🕵️ "Is an indexing job running right now?" Owned and answered by the host.
#[async_trait]
pub trait IndexingJob: std::fmt::Debug + Send + Sync {
    async fn is_active(&self) -> bool;
}

/// 🚩 The simplest possible answer to that question: a flag somebody flips.
#[derive(Debug, Default)]
pub struct JobFlag {
    active: AtomicBool,
}

impl JobFlag {
    pub fn new(active: bool) -> Self {
        Self {
            active: AtomicBool::new(active),
        }
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }
}

#[async_trait]
impl IndexingJob for JobFlag {
    async fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// 🚦 Where the reconciler is in its little life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilerState {
    Idle,
    Armed,
    Sweeping,
}

/// ⏰ The shared arm/disarm switch between the request path and the sweeper.
#[derive(Debug, Default)]
pub struct SweepTrigger {
    armed: AtomicBool,
    sweeping: AtomicBool,
    shut_down: AtomicBool,
    wake: Notify,
}

impl SweepTrigger {
    /// ⏰ Schedule sweeps. Idempotent; only the Idle → Armed edge wakes the worker.
    pub fn arm(&self) {
        if !self.armed.swap(true, Ordering::SeqCst) {
            debug!("⏰ sweep trigger armed");
            self.wake.notify_one();
        }
    }

    /// 💤 No more sweeps until the next arm.
    pub fn disarm(&self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            debug!("💤 sweep trigger disarmed");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// 🛑 Tell the worker loop to go home.
    pub fn shut_down(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn state(&self) -> ReconcilerState {
        if self.sweeping.load(Ordering::SeqCst) {
            ReconcilerState::Sweeping
        } else if self.is_armed() {
            ReconcilerState::Armed
        } else {
            ReconcilerState::Idle
        }
    }

    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

/// 📋 How one sweep went.
#[derive(Debug)]
pub enum SweepOutcome {
    /// 🏃 An indexing job is running. Nothing touched, still armed.
    Deferred,
    /// 💤 Nothing buffered. Back to idle.
    Empty,
    /// ✅ Leftovers sent, buffer gone.
    Flushed { bytes: u64 },
    /// 💀 Could not finish. Reported, buffer left for next time.
    Failed(BatchError),
}

/// 🔧 `[reconciler]` in the TOML.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_interval_secs() -> u64 {
    DEFAULT_INTERVAL_SECS
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INTERVAL_SECS,
        }
    }
}

/// 🧹 The periodic sweeper. Cheap to clone; every field is shared.
#[derive(Debug, Clone)]
pub struct Reconciler {
    engine: Arc<BatchingEngine>,
    transport: Arc<dyn Transport>,
    job: Arc<dyn IndexingJob>,
    notifier: Arc<dyn Notifier>,
    interval: Duration,
}

impl Reconciler {
    pub fn new(
        engine: Arc<BatchingEngine>,
        transport: Arc<dyn Transport>,
        job: Arc<dyn IndexingJob>,
        notifier: Arc<dyn Notifier>,
        config: &ReconcilerConfig,
    ) -> Self {
        Self {
            engine,
            transport,
            job,
            notifier,
            interval: Duration::from_secs(config.interval_secs),
        }
    }

    /// ⏱️ Override the tick interval. Tests are impatient.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn state(&self) -> ReconcilerState {
        self.engine.trigger().state()
    }

    /// 🧹 One tick. Flush the leftovers if nobody is indexing, then go idle.
    pub async fn sweep(&self) -> SweepOutcome {
        if self.job.is_active().await {
            debug!("🏃 indexing job still active, sweep deferred");
            return SweepOutcome::Deferred;
        }

        let the_trigger = self.engine.trigger();
        the_trigger.sweeping.store(true, Ordering::SeqCst);
        let the_outcome = self.engine.flush_residual(self.transport.as_ref()).await;
        the_trigger.sweeping.store(false, Ordering::SeqCst);

        match &the_outcome {
            SweepOutcome::Flushed { bytes } => {
                info!("✅ sweep flushed {} leftover bytes", bytes)
            }
            SweepOutcome::Empty => debug!("💤 sweep found an empty buffer"),
            SweepOutcome::Deferred => {}
            SweepOutcome::Failed(err) => {
                error!("💀 sweep could not complete: {}", err);
                self.report(err).await;
            }
        }
        the_outcome
    }

    async fn report(&self, err: &BatchError) {
        let mut the_details = vec![err.to_string()];
        if let Ok(stats) = self.engine.stats().await {
            let the_skip = stats.messages.len().saturating_sub(NOTIFY_TAIL);
            the_details.extend(stats.messages.into_iter().skip(the_skip));
            if let Some(cleanup_error) = stats.cleanup_error {
                the_details.push(format!("cleanup_error: {cleanup_error}"));
            }
        }
        self.notifier
            .notify("bulk buffer sweep could not complete", &the_details)
            .await;
    }
}

impl Worker for Reconciler {
    fn start(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            let the_trigger = self.engine.trigger();
            debug!("🧹 reconciler started, interval {:?}", self.interval);
            loop {
                if the_trigger.is_shut_down() {
                    debug!("🏁 reconciler shutting down");
                    return Ok(());
                }
                if !the_trigger.is_armed() {
                    the_trigger.wake.notified().await;
                    continue;
                }
                tokio::time::sleep(self.interval).await;
                if the_trigger.is_shut_down() {
                    continue;
                }
                self.sweep().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferBackend, FileBuffer, InMemoryBuffer, PayloadBuffer};
    use crate::error::BatchResult;
    use crate::common::IndexingRequest;
    use crate::decision::BatchLimits;
    use crate::notify::InMemoryNotifier;
    use crate::stats::{FileStatsStore, InMemoryKeyValueStore, OptionsStatsStore, StatsBackend};
    use crate::transport::{ElasticsearchConfig, ElasticsearchTransport, InMemoryTransport};
    use wiremock::matchers::{body_string, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const THE_BODY: &str = "{\"index\":{\"_id\":\"1\"}}\n{\"title\":\"leftover\"}\n";

    struct TheRig {
        engine: Arc<BatchingEngine>,
        transport: InMemoryTransport,
        job: Arc<JobFlag>,
        notifier: Arc<InMemoryNotifier>,
        reconciler: Reconciler,
    }

    fn the_rig_with(buffer: BufferBackend) -> TheRig {
        let the_engine = Arc::new(BatchingEngine::new(
            BatchLimits {
                min_flush_size: 1_000,
                max_buffer_size: 2_000,
                hard_ceiling_size: 3_000,
            },
            buffer,
            StatsBackend::Options(OptionsStatsStore::new(
                Arc::new(InMemoryKeyValueStore::default()),
                "bpx_bulk_stats",
            )),
        ));
        let the_transport = InMemoryTransport::default();
        let the_job = Arc::new(JobFlag::new(true));
        let the_notifier = Arc::new(InMemoryNotifier::default());
        let the_reconciler = Reconciler::new(
            Arc::clone(&the_engine),
            Arc::new(the_transport.clone()),
            the_job.clone(),
            the_notifier.clone(),
            &ReconcilerConfig::default(),
        );
        TheRig {
            engine: the_engine,
            transport: the_transport,
            job: the_job,
            notifier: the_notifier,
            reconciler: the_reconciler,
        }
    }

    fn the_rig() -> TheRig {
        the_rig_with(BufferBackend::InMemory(InMemoryBuffer::default()))
    }

    fn the_bulk_post() -> IndexingRequest {
        IndexingRequest::new("POST", "/posts-1/_bulk", THE_BODY, "http://localhost:9200")
    }

    #[tokio::test]
    async fn the_one_where_a_busy_job_means_hands_off() -> anyhow::Result<()> {
        let the_rig = the_rig();
        the_rig.engine.evaluate(the_bulk_post()).await;
        let the_stats_before = the_rig.engine.stats().await?;
        let the_size_before = the_rig.engine.buffer_size().await?;

        assert!(matches!(
            the_rig.reconciler.sweep().await,
            SweepOutcome::Deferred
        ));
        assert_eq!(the_rig.engine.stats().await?, the_stats_before);
        assert_eq!(the_rig.engine.buffer_size().await?, the_size_before);
        assert_eq!(the_rig.reconciler.state(), ReconcilerState::Armed);
        assert!(the_rig.transport.sent_requests().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_nobody_remembers_the_url() -> anyhow::Result<()> {
        // 🧪 a previous process left data but no flush context
        let the_dir = tempfile::tempdir()?;
        let the_buffer_path = the_dir.path().join("buffer.ndjson");
        std::fs::write(&the_buffer_path, THE_BODY)?;
        let the_rig = the_rig_with(BufferBackend::File(FileBuffer::new(&the_buffer_path)));
        the_rig.job.set_active(false);

        let the_outcome = the_rig.reconciler.sweep().await;
        assert!(matches!(
            the_outcome,
            SweepOutcome::Failed(BatchError::MissingFlushContext)
        ));
        let the_stats = the_rig.engine.stats().await?;
        assert_eq!(the_stats.messages.len(), 1);
        assert!(the_stats.messages[0].contains("no last_url/last_args"));
        assert!(the_stats.cleanup_error.is_some());
        assert_eq!(std::fs::read_to_string(&the_buffer_path)?, THE_BODY);
        assert!(the_rig.transport.sent_requests().await.is_empty());
        assert_eq!(the_rig.notifier.received.lock().await.len(), 1);
        assert_eq!(the_rig.reconciler.state(), ReconcilerState::Idle);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_leftovers_finally_ship() -> anyhow::Result<()> {
        let the_rig = the_rig();
        the_rig.engine.evaluate(the_bulk_post()).await;
        the_rig.engine.evaluate(the_bulk_post()).await;
        the_rig.job.set_active(false);

        let the_outcome = the_rig.reconciler.sweep().await;
        let the_expected_body = format!("{THE_BODY}{THE_BODY}");
        assert!(matches!(
            the_outcome,
            SweepOutcome::Flushed { bytes } if bytes == the_expected_body.len() as u64
        ));

        let the_sent = the_rig.transport.sent_requests().await;
        assert_eq!(the_sent.len(), 1);
        assert_eq!(the_sent[0].method, "POST");
        assert_eq!(the_sent[0].url, "http://localhost:9200/posts-1/_bulk");
        assert_eq!(the_sent[0].body, the_expected_body);

        assert_eq!(the_rig.engine.buffer_size().await?, 0);
        let the_stats = the_rig.engine.stats().await?;
        assert_eq!(the_stats.total_real_requests, 1);
        assert_eq!(the_stats.cleanup_loops, 1);
        assert!(the_stats.cleanup_error.is_none());
        assert_eq!(the_rig.reconciler.state(), ReconcilerState::Idle);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_cluster_is_down_and_the_buffer_stays() -> anyhow::Result<()> {
        let the_rig = the_rig();
        the_rig.engine.evaluate(the_bulk_post()).await;
        the_rig.job.set_active(false);
        the_rig.transport.set_failing(true);

        let the_outcome = the_rig.reconciler.sweep().await;
        assert!(matches!(
            the_outcome,
            SweepOutcome::Failed(BatchError::Transport { .. })
        ));
        assert_eq!(the_rig.engine.buffer_size().await?, THE_BODY.len() as u64);
        let the_stats = the_rig.engine.stats().await?;
        assert_eq!(the_stats.total_real_requests, 0);
        assert!(the_stats.cleanup_error.as_deref().unwrap_or_default().contains("connection refused"));

        let the_notes = the_rig.notifier.received.lock().await;
        assert_eq!(the_notes.len(), 1);
        assert!(the_notes[0].1.iter().any(|line| line.contains("connection refused")));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_new_cycle_still_sweeps_the_old_leftovers() -> anyhow::Result<()> {
        let the_rig = the_rig();
        the_rig.engine.evaluate(the_bulk_post()).await;
        the_rig.engine.begin_cycle().await?;
        the_rig.job.set_active(false);

        assert!(matches!(
            the_rig.reconciler.sweep().await,
            SweepOutcome::Flushed { .. }
        ));
        assert_eq!(the_rig.engine.buffer_size().await?, 0);
        assert_eq!(the_rig.transport.sent_requests().await[0].body, THE_BODY);
        assert!(the_rig.notifier.received.lock().await.is_empty());
        Ok(())
    }

    /// 👻 A buffer whose `clear` says "done" and does nothing.
    #[derive(Debug, Default)]
    struct TheStickyBuffer {
        inner: InMemoryBuffer,
    }

    #[async_trait]
    impl PayloadBuffer for TheStickyBuffer {
        async fn append(&mut self, body: &str) -> BatchResult<()> {
            self.inner.append(body).await
        }

        async fn current_size(&self) -> BatchResult<u64> {
            self.inner.current_size().await
        }

        async fn exists(&self) -> BatchResult<bool> {
            self.inner.exists().await
        }

        async fn read_all(&self) -> BatchResult<String> {
            self.inner.read_all().await
        }

        async fn clear(&mut self) -> BatchResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn the_one_where_the_buffer_refuses_to_leave() -> anyhow::Result<()> {
        let the_rig = the_rig_with(BufferBackend::Custom(Box::new(TheStickyBuffer::default())));
        the_rig.engine.evaluate(the_bulk_post()).await;
        the_rig.job.set_active(false);

        assert!(matches!(
            the_rig.reconciler.sweep().await,
            SweepOutcome::Failed(BatchError::LingeringBuffer)
        ));
        assert_eq!(the_rig.transport.sent_requests().await.len(), 1);
        let the_stats = the_rig.engine.stats().await?;
        assert_eq!(the_stats.total_real_requests, 1);
        assert!(the_stats.cleanup_error.as_deref().unwrap_or_default().contains("still exists"));

        let the_notes = the_rig.notifier.received.lock().await;
        assert_eq!(the_notes.len(), 1);
        assert!(the_notes[0].1[0].contains("still exists"));
        assert_eq!(the_rig.reconciler.state(), ReconcilerState::Idle);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_empty_buffer_just_goes_idle() -> anyhow::Result<()> {
        let the_rig = the_rig();
        the_rig.engine.trigger().arm();
        the_rig.job.set_active(false);
        assert!(matches!(the_rig.reconciler.sweep().await, SweepOutcome::Empty));
        assert_eq!(the_rig.reconciler.state(), ReconcilerState::Idle);
        assert_eq!(the_rig.engine.stats().await?.cleanup_loops, 0);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_append_after_a_sweep_re_arms() -> anyhow::Result<()> {
        let the_rig = the_rig();
        the_rig.job.set_active(false);
        the_rig.engine.evaluate(the_bulk_post()).await;
        the_rig.reconciler.sweep().await;
        assert_eq!(the_rig.reconciler.state(), ReconcilerState::Idle);

        the_rig.engine.evaluate(the_bulk_post()).await;
        assert_eq!(the_rig.reconciler.state(), ReconcilerState::Armed);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_worker_sweeps_on_its_own() -> anyhow::Result<()> {
        let the_rig = the_rig();
        the_rig.job.set_active(false);
        let the_handle = the_rig
            .reconciler
            .clone()
            .with_interval(Duration::from_millis(10))
            .start();

        the_rig.engine.evaluate(the_bulk_post()).await;
        let mut the_waited = Duration::ZERO;
        while the_rig.transport.sent_requests().await.is_empty() {
            assert!(the_waited < Duration::from_secs(5), "💀 the worker never swept");
            tokio::time::sleep(Duration::from_millis(10)).await;
            the_waited += Duration::from_millis(10);
        }
        assert_eq!(the_rig.engine.buffer_size().await?, 0);

        the_rig.engine.trigger().shut_down();
        the_handle.await??;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_real_http_cluster_gets_the_leftovers() -> anyhow::Result<()> {
        let the_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/posts-1/_bulk"))
            .and(body_string(THE_BODY))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"errors":false}"#))
            .expect(1)
            .mount(&the_server)
            .await;

        let the_dir = tempfile::tempdir()?;
        let the_engine = Arc::new(BatchingEngine::new(
            BatchLimits::default(),
            BufferBackend::File(FileBuffer::new(the_dir.path().join("buffer.ndjson"))),
            StatsBackend::File(FileStatsStore::new(the_dir.path().join("stats.json"))),
        ));
        let the_transport = ElasticsearchTransport::new(ElasticsearchConfig {
            url: the_server.uri(),
            username: None,
            password: None,
            api_key: None,
            connect_timeout_secs: 1,
            timeout_secs: 5,
        })?;
        let the_reconciler = Reconciler::new(
            Arc::clone(&the_engine),
            Arc::new(the_transport),
            Arc::new(JobFlag::new(false)),
            Arc::new(InMemoryNotifier::default()),
            &ReconcilerConfig::default(),
        );

        the_engine
            .evaluate(IndexingRequest::new(
                "POST",
                "/posts-1/_bulk",
                THE_BODY,
                the_server.uri(),
            ))
            .await;
        assert!(matches!(
            the_reconciler.sweep().await,
            SweepOutcome::Flushed { .. }
        ));
        assert!(!the_dir.path().join("buffer.ndjson").exists());
        Ok(())
    }
}
