//! # 📡 THE ELASTICSEARCH TRANSPORT
//!
//! *Previously, on bpx...*
//!
//! 🎬 COLD OPEN — INT. SERVER ROOM — 3:47 AM
//!
//! The indexing job is gone. Killed, crashed, or simply finished. Nobody knows.
//! What remains is a buffer file holding four megabytes of perfectly good
//! documents that never reached the cluster. The reconciler wakes up, reads the
//! file, and reaches for this module. One POST. No retries. No second chances.
//!
//! ⚠️ NOTE: If you are reading this at 3am during an incident, take a breath.
//! The buffer is still on disk until a 2xx comes back. Probably.
//!
//! 🦆 (mandatory duck, no context provided, none shall be requested)

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use tracing::{debug, trace};

use super::{FlushRequest, Transport};

/// 🔧 How to reach the cluster, and who to say we are.
#[derive(Debug, Deserialize, Clone)]
pub struct ElasticsearchConfig {
    /// 📡 Scheme + host + port. `localhost` alone is not enough. Yes, I know it worked in dev.
    pub url: String,
    /// 🔒 Username for basic auth. Optional, like flossing.
    #[serde(default)]
    pub username: Option<String>,
    /// 🔒 Password. "password123" is not a password. It is a confession.
    #[serde(default)]
    pub password: Option<String>,
    /// 🔒 API key — the velvet rope variant of authentication. Beats basic auth.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

// 🔌 if the cluster can't handshake in 10 seconds, it's not having a good time and neither are we
fn default_connect_timeout_secs() -> u64 {
    10
}

// ⏱️ bulk requests can be meaty and we're not monsters
fn default_timeout_secs() -> u64 {
    30
}

/// 📡 Sends flush requests to Elasticsearch over HTTP. Pure I/O, zero buffering.
///
/// Internally holds:
/// - `client`: the HTTP muscle 💪, reused across requests
/// - `config`: auth and timeouts
#[derive(Debug)]
pub struct ElasticsearchTransport {
    client: reqwest::Client,
    config: ElasticsearchConfig,
}

impl ElasticsearchTransport {
    /// 🚀 Build the client. No ping: the reconciler may run long after the cluster
    /// was last seen, and a dead cluster at startup is not our business yet.
    pub fn new(config: ElasticsearchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("💀 The HTTP client refused to be born. The TLS stack wept. We tried to build a reqwest::Client and the universe said 'no'.")?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Transport for ElasticsearchTransport {
    /// 📡 Fire one request with the buffered NDJSON. 2xx or bust.
    ///
    /// 🔄 This function does not retry. Retries are the caller's problem. Good luck.
    async fn send(&self, request: FlushRequest) -> Result<()> {
        let the_method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .with_context(|| format!("💀 '{}' is not an HTTP method we can send", request.method))?;
        debug!(
            "📡 {} {} with {} bytes — the payload has left the building, Elvis-style",
            the_method,
            request.url,
            request.body.len()
        );
        let mut the_request = self
            .client
            .request(the_method, &request.url)
            // ⚠️ application/x-ndjson — not application/json. The bulk API cares. Deeply.
            .header("Content-Type", "application/x-ndjson");

        // -- 🔒 auth priority: API key wins over basic auth. This is not a democracy.
        if let Some(ref api_key) = self.config.api_key {
            the_request = the_request.header("Authorization", format!("ApiKey {}", api_key));
        } else if let Some(ref username) = self.config.username {
            the_request = the_request.basic_auth(username, self.config.password.as_ref());
        }

        let the_response = the_request
            .body(request.body)
            .send()
            .await
            .with_context(|| format!("💀 The flush never made it to '{}'. We launched the payload into the network and the network responded with what can only be described as 'not vibing with it.' Check connectivity, check timeouts, and check your feelings.", request.url))?;

        let the_status = the_response.status();
        if !the_status.is_success() {
            // -- 💀 we got a response! it just wasn't good news. the body usually says why.
            let the_body = the_response.text().await.unwrap_or_default();
            anyhow::bail!(
                "💀 The flush arrived, but Elasticsearch looked at our documents and said '{}'. The body of the response read: '{}'.",
                the_status,
                the_body
            );
        }
        trace!("🚀 flush landed — documents have left the building");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn the_config_for(server: &MockServer) -> ElasticsearchConfig {
        ElasticsearchConfig {
            url: server.uri(),
            username: None,
            password: None,
            api_key: None,
            connect_timeout_secs: 1,
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn the_one_where_ndjson_reaches_the_bulk_endpoint() -> Result<()> {
        let the_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/posts/_bulk"))
            .and(header("Content-Type", "application/x-ndjson"))
            .and(body_string("{\"index\":{}}\n{\"a\":1}\n"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"errors":false}"#))
            .expect(1)
            .mount(&the_server)
            .await;

        let the_transport = ElasticsearchTransport::new(the_config_for(&the_server))?;
        the_transport
            .send(FlushRequest {
                method: "post".to_string(),
                url: format!("{}/posts/_bulk", the_server.uri()),
                body: "{\"index\":{}}\n{\"a\":1}\n".to_string(),
            })
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_api_key_wins_the_auth_fight() -> Result<()> {
        let the_server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(header("Authorization", "ApiKey sekrit"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&the_server)
            .await;

        let mut the_config = the_config_for(&the_server);
        the_config.api_key = Some("sekrit".to_string());
        the_config.username = Some("elastic".to_string());
        let the_transport = ElasticsearchTransport::new(the_config)?;
        the_transport
            .send(FlushRequest {
                method: "PUT".to_string(),
                url: format!("{}/_bulk", the_server.uri()),
                body: "{}\n".to_string(),
            })
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_429_is_an_error_not_a_vibe() -> Result<()> {
        let the_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&the_server)
            .await;

        let the_transport = ElasticsearchTransport::new(the_config_for(&the_server))?;
        let the_result = the_transport
            .send(FlushRequest {
                method: "POST".to_string(),
                url: format!("{}/_bulk", the_server.uri()),
                body: "{}\n".to_string(),
            })
            .await;
        let the_error = the_result.expect_err("💀 a 429 should not count as success");
        assert!(format!("{the_error:#}").contains("slow down"));
        Ok(())
    }
}
