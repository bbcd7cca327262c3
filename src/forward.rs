//! HTTP egress: the [`Forwarder`] seam and the production `reqwest`
//! implementation that POSTs event payloads to the server.

use std::time::Duration;

use serde_json::Value;

use crate::error::BridgeError;

/// Delivers one event payload to the remote server.
///
/// `Ok` carries the server's JSON-decoded response body from an HTTP 200.
/// Any other status maps to [`BridgeError::Http`]; a request that never got
/// a response maps to [`BridgeError::Request`]. Both are per-event failures
/// the loop survives.
#[allow(async_fn_in_trait)]
pub trait Forwarder {
    async fn forward(&self, event: &Value) -> Result<Value, BridgeError>;
}

/// Production forwarder: one `reqwest::Client` with bounded connect and
/// request timeouts, aimed at a fixed endpoint.
pub struct HttpForwarder {
    client: reqwest::Client,
    url: String,
}

impl HttpForwarder {
    pub fn new(
        url: impl Into<String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Self {
        // reqwest::Client::builder() can fail in extreme environments, but
        // unwrap_or_default() falls back to a default client instead of panicking.
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
        }
    }

    /// The endpoint this forwarder posts to.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Forwarder for HttpForwarder {
    async fn forward(&self, event: &Value) -> Result<Value, BridgeError> {
        let resp = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| BridgeError::Request {
                url: self.url.clone(),
                detail: e.to_string(),
            })?;

        let status = resp.status().as_u16();
        let text = resp.text().await.map_err(|e| BridgeError::Request {
            url: self.url.clone(),
            detail: e.to_string(),
        })?;

        // The server contract is HTTP 200 exactly, not any 2xx.
        if status != 200 {
            return Err(BridgeError::Http {
                status,
                url: self.url.clone(),
                body: text,
            });
        }

        // A 200 body is expected to be JSON, but the contents are opaque;
        // fall back to the raw text when it is not parseable.
        Ok(match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(_) => Value::String(text),
        })
    }
}
