//! 🧠 A transport that sends nothing and remembers everything.
//!
//! Collects every request behind an `Arc<Mutex<...>>` so tests can inspect what
//! "arrived". Can be told to fail, for tests that need the cluster to be down.
//! No network calls. No heartbeat. Just vibes and heap memory.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{FlushRequest, Transport};

#[derive(Debug, Default, Clone)]
pub struct InMemoryTransport {
    /// 🔒 The evidence locker. Shared so tests can peek after handing a clone away.
    pub sent: Arc<Mutex<Vec<FlushRequest>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryTransport {
    /// 💀 Make every following `send` fail, like a cluster on a bad day.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn sent_requests(&self) -> Vec<FlushRequest> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(&self, request: FlushRequest) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("💀 connection refused (in-memory cluster is pretending to be down)");
        }
        self.sent.lock().await.push(request);
        Ok(())
    }
}
