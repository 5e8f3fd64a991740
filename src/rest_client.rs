// =============================================================================
// REST Client — signed/unsigned HTTP execution shared by every adapter
// =============================================================================
//
// One `reqwest::Client` per account (so a proxy and per-account headers are
// isolated), built once and reused across calls the way the reference
// backend's `BinanceClient` holds a single `reqwest::Client`.
// =============================================================================

use std::time::{Duration, Instant};

use reqwest::Method;
use tracing::{debug, instrument, warn};

use crate::error::CoreError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const TOTAL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RestResponse {
    pub status: u16,
    pub body: serde_json::Value,
    pub headers: reqwest::header::HeaderMap,
    pub latency: Duration,
}

/// Thin, venue-agnostic HTTP executor. Adapters build the URL/query/body;
/// this type owns the transport concerns: proxy, timeouts, TLS, and mapping
/// transport/venue failures into [`CoreError`].
#[derive(Clone)]
pub struct RestClient {
    client: reqwest::Client,
    base_url: String,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, proxy: Option<&str>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(TOTAL_TIMEOUT)
            .http1_only();

        if let Some(proxy_url) = proxy {
            let proxy = reqwest::Proxy::https(proxy_url)
                .map_err(|e| anyhow::anyhow!("invalid proxy url {proxy_url}: {e}"))?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(|e| anyhow::anyhow!("failed to build reqwest client: {e}"))?;

        Ok(Self { client, base_url: base_url.into() })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[instrument(skip(self, body, headers), name = "rest_client::execute")]
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        query: Option<&str>,
        body: Option<String>,
        headers: Vec<(&'static str, String)>,
    ) -> Result<RestResponse, CoreError> {
        let mut url = format!("{}{}", self.base_url, path);
        if let Some(q) = query {
            if !q.is_empty() {
                url.push('?');
                url.push_str(q);
            }
        }

        let mut req = self.client.request(method, &url);
        for (name, value) in headers {
            req = req.header(name, value);
        }
        if let Some(b) = body {
            req = req.header("Content-Type", "application/json").body(b);
        }

        let started = Instant::now();
        let resp = req.send().await.map_err(|e| CoreError::Transport(e.to_string()))?;
        let latency = started.elapsed();

        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let raw = resp.text().await.map_err(|e| CoreError::Transport(e.to_string()))?;
        let body: serde_json::Value = if raw.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&raw).map_err(|e| {
                CoreError::Protocol(format!("response body is not valid JSON: {e}"))
            })?
        };

        debug!(status, latency_ms = latency.as_millis() as u64, "rest call completed");

        if let Some(code) = body.get("code").and_then(|c| c.as_i64()) {
            if code != 0 {
                let msg = body
                    .get("msg")
                    .and_then(|m| m.as_str())
                    .unwrap_or("venue returned a non-zero error code")
                    .to_string();
                warn!(code, msg = %msg, "venue returned an error envelope");
                return Err(CoreError::Venue { code, msg });
            }
        }

        if status >= 400 {
            return Err(CoreError::Venue {
                code: status as i64,
                msg: body.to_string(),
            });
        }

        Ok(RestResponse { status, body, headers, latency })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rest_client_builds_without_proxy() {
        let client = RestClient::new("https://api.binance.com", None);
        assert!(client.is_ok());
    }

    #[test]
    fn rest_client_rejects_malformed_proxy_url() {
        let client = RestClient::new("https://api.binance.com", Some("not a url"));
        assert!(client.is_err());
    }

    #[test]
    fn base_url_round_trips() {
        let client = RestClient::new("https://api.binance.com", None).unwrap();
        assert_eq!(client.base_url(), "https://api.binance.com");
    }
}
