//! 📡 Transports — how a residual flush actually leaves the building.
//!
//! The request path never sends anything itself: it hands the host a body and
//! the host sends it. The reconciler has no host to hand things to. Its request
//! context died with the indexing job. So it gets a transport.
//!
//! # Knowledge Graph 🧠
//! - Pattern: trait → concrete impls (`ElasticsearchTransport`, `InMemoryTransport`) → `TransportBackend` enum
//! - Transports do I/O. Just I/O. One request, no retries, no buffering.
//! - Ancient proverb: "He who retries inside the transport, DDoSes his own cluster."

mod elasticsearch;
mod in_mem;

use anyhow::Result;
use async_trait::async_trait;

pub use elasticsearch::{ElasticsearchConfig, ElasticsearchTransport};
pub use in_mem::InMemoryTransport;

/// 📦 One fully built request: where, how, and the NDJSON to carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushRequest {
    pub method: String,
    pub url: String,
    pub body: String,
}

/// 📡 Send one request. `Ok` means the cluster answered 2xx. Anything else is `Err`.
#[async_trait]
pub trait Transport: std::fmt::Debug + Send + Sync {
    async fn send(&self, request: FlushRequest) -> Result<()>;
}

/// 🎭 The many faces of a transport.
#[derive(Debug)]
pub enum TransportBackend {
    Elasticsearch(ElasticsearchTransport),
    InMemory(InMemoryTransport),
}

#[async_trait]
impl Transport for TransportBackend {
    async fn send(&self, request: FlushRequest) -> Result<()> {
        match self {
            TransportBackend::Elasticsearch(transport) => transport.send(request).await,
            TransportBackend::InMemory(transport) => transport.send(request).await,
        }
    }
}
