//! 📣 notify.rs — somebody should know about this.
//!
//! When a sweep can't finish cleanly, an operator gets told. How they get told
//! (email, chat, a pager that ruins dinner) is the host's business. The engine
//! only knows this trait. The default implementation shouts into `tracing`.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::error;

/// 📣 Out-of-band operator notification. Must not fail the caller.
#[async_trait]
pub trait Notifier: std::fmt::Debug + Send + Sync {
    async fn notify(&self, subject: &str, details: &[String]);
}

/// 📣 Logs at `error!`. Whoever tails the logs at 3am is, technically, an operator.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, subject: &str, details: &[String]) {
        error!("📣 {}", subject);
        for detail in details {
            error!("⚠️  {}", detail);
        }
    }
}

/// 🧠 Keeps every notification for later inspection. Test-grade pager.
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    pub received: Mutex<Vec<(String, Vec<String>)>>,
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, subject: &str, details: &[String]) {
        self.received
            .lock()
            .await
            .push((subject.to_string(), details.to_vec()));
    }
}
