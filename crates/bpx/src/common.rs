// ai
//! 📦 Common data structures — the building blocks of bpx
//!
//! ---
//!
//! 🎬 COLD OPEN — INT. INDEXING JOB — 3:47 AM
//!
//! A sync job is walking every post on the site. Every forty posts it fires a
//! bulk request. Forty posts. Forty tiny bodies. The cluster flinches each time.
//! Then an `IndexingRequest` arrives at our door, and for once, somebody asks
//! it to wait for its friends.
//!
//! 🦆
//!
//! This module defines the values that cross the boundary between the host
//! pipeline and the engine: what comes in ([`IndexingRequest`]), what goes out
//! ([`Outcome`]), the fake "sure, done" answer ([`MockResponse`]) and the
//! body-less memory of the last request ([`RequestArgs`]).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 📡 One outbound request the host was about to send to the cluster.
///
/// The engine takes it by value and, when it decides to forward, hands the
/// very same value back. No field is ever touched on the way through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexingRequest {
    /// 🔧 HTTP verb, as the host spelled it. Compared case-insensitively.
    pub method: String,
    /// 🧭 Path on the cluster, e.g. `/posts-1/_bulk`.
    pub path: String,
    /// 📦 Raw body. For bulk requests this is NDJSON.
    pub body: String,
    /// 📡 Scheme + host + port of the cluster, e.g. `http://localhost:9200`.
    pub target_host: String,
}

impl IndexingRequest {
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        body: impl Into<String>,
        target_host: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            body: body.into(),
            target_host: target_host.into(),
        }
    }

    /// 🔗 Full URL. One slash between host and path, no matter how the host typed it.
    pub fn url(&self) -> String {
        join_url(&self.target_host, &self.path)
    }

    /// 📏 Body size in bytes. The unit every decision is made in.
    pub fn body_size(&self) -> u64 {
        self.body.len() as u64
    }

    /// 🧠 The body-less memory of this request, for a flush that happens later.
    pub fn args(&self) -> RequestArgs {
        RequestArgs {
            method: self.method.to_ascii_uppercase(),
            path: self.path.clone(),
            target_host: self.target_host.clone(),
        }
    }
}

/// 🧠 Request metadata with the body stripped off. Bodies are megabytes; this is bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestArgs {
    pub method: String,
    pub path: String,
    pub target_host: String,
}

/// 🎭 What the host should do with the request it handed us.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// 🚶 Send the original request, unchanged.
    Forward(IndexingRequest),
    /// 🚀 Send the original request's method/URL, but with this body instead.
    ForwardWithBody {
        request: IndexingRequest,
        body: String,
    },
    /// 🎭 Do not send anything. Pretend this was the response.
    Mock(MockResponse),
}

impl Outcome {
    /// 🎯 Short tag for logs and tables.
    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Forward(_) => "forward",
            Outcome::ForwardWithBody { .. } => "forward_with_body",
            Outcome::Mock(_) => "mock",
        }
    }
}

/// 📬 Status line of the canned response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseStatus {
    pub code: u16,
    pub message: String,
}

/// 🎭 The canned "everything went great" reply for buffered requests.
///
/// Serializes to exactly the shape the host HTTP layer expects:
/// `{"headers":{},"body":"...","response":{"code":200,"message":"OK"},"cookies":{},"http_response":[]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockResponse {
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub response: ResponseStatus,
    pub cookies: BTreeMap<String, String>,
    pub http_response: Vec<Value>,
}

impl MockResponse {
    /// ✅ HTTP 200, empty headers and cookies, the given body.
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            headers: BTreeMap::new(),
            body: body.into(),
            response: ResponseStatus {
                code: 200,
                message: "OK".to_string(),
            },
            cookies: BTreeMap::new(),
            http_response: Vec::new(),
        }
    }
}

/// 🔗 `http://host:9200/` + `/idx/_bulk` → `http://host:9200/idx/_bulk`.
/// One slash of difference. Infinite suffering of difference.
pub(crate) fn join_url(host: &str, path: &str) -> String {
    format!(
        "{}/{}",
        host.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_slashes_are_kept_to_exactly_one() {
        let the_request = IndexingRequest::new("post", "/posts/_bulk", "{}", "http://es:9200/");
        assert_eq!(the_request.url(), "http://es:9200/posts/_bulk");
        let the_sloppy_one = IndexingRequest::new("post", "posts/_bulk", "{}", "http://es:9200");
        assert_eq!(the_sloppy_one.url(), "http://es:9200/posts/_bulk");
    }

    #[test]
    fn the_one_where_args_forget_the_body() {
        let the_request =
            IndexingRequest::new("put", "/posts/_bulk", "{\"huge\":true}\n", "http://es:9200");
        let the_args = the_request.args();
        assert_eq!(the_args.method, "PUT");
        assert_eq!(the_args.path, "/posts/_bulk");
        let the_json = serde_json::to_string(&the_args).expect("💀 args should serialize");
        assert!(!the_json.contains("huge"));
    }

    #[test]
    fn the_one_where_the_mock_has_the_expected_shape() {
        let the_mock = MockResponse::ok(r#"{"errors":false}"#);
        let the_json = serde_json::to_value(&the_mock).expect("💀 mock should serialize");
        assert_eq!(the_json["response"]["code"], 200);
        assert_eq!(the_json["response"]["message"], "OK");
        assert_eq!(the_json["headers"], serde_json::json!({}));
        assert_eq!(the_json["cookies"], serde_json::json!({}));
        assert_eq!(the_json["http_response"], serde_json::json!([]));
        assert_eq!(the_json["body"], r#"{"errors":false}"#);
    }
}
