//! HTTP transport behind the typed client.
//!
//! The client only needs "send method+path+JSON body, get status+bytes back
//! within a deadline". Everything else (endpoint knowledge, retry policy,
//! decoding) lives in the typed layer, so tests drive the engine with a
//! scripted transport instead of a live service.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Request, Uri};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{CspError, SpiderError};

/// Raw response from the service.
#[derive(Clone, Debug)]
pub struct SpiderResponse {
    pub status: u16,
    pub body: Bytes,
}

impl SpiderResponse {
    /// Decode a 2xx JSON body; map non-2xx to [`CspError`] with the body
    /// message carried verbatim.
    pub fn expect_json<T: DeserializeOwned>(self) -> Result<T, SpiderError> {
        self.check_status()?.decode()
    }

    /// Surface non-2xx as [`CspError`]; pass 2xx through for decoding.
    pub fn check_status(self) -> Result<Self, SpiderError> {
        if (200..300).contains(&self.status) {
            return Ok(self);
        }
        Err(CspError {
            status: self.status,
            message: error_message(&self.body),
        }
        .into())
    }

    fn decode<T: DeserializeOwned>(self) -> Result<T, SpiderError> {
        serde_json::from_slice(&self.body)
            .map_err(|err| SpiderError::BadResponse(format!("undecodable body: {err}")))
    }
}

/// Error bodies are either `{"message": "..."}` or plain text.
fn error_message(body: &Bytes) -> String {
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        if let Some(message) = value.get("message").and_then(Value::as_str) {
            return message.to_string();
        }
    }
    String::from_utf8_lossy(body).trim().to_string()
}

/// Transport seam for the typed client.
#[async_trait]
pub trait SpiderTransport: Send + Sync {
    /// Issue one request. `path` is relative to the service root and may
    /// carry a query string. The deadline covers the whole exchange.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        timeout: Duration,
    ) -> Result<SpiderResponse, SpiderError>;
}

/// Production transport over a plain-HTTP hyper client.
pub struct HyperTransport {
    client: Client<HttpConnector, Full<Bytes>>,
    base_url: String,
}

impl HyperTransport {
    /// `base_url` is the service root, e.g. `http://localhost:1024/spider`.
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn uri(&self, path: &str) -> Result<Uri, SpiderError> {
        format!("{}{}", self.base_url, path)
            .parse()
            .map_err(|err| SpiderError::Transport(format!("invalid request uri: {err}")))
    }
}

#[async_trait]
impl SpiderTransport for HyperTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        timeout: Duration,
    ) -> Result<SpiderResponse, SpiderError> {
        let uri = self.uri(path)?;
        let payload = match body {
            Some(value) => Bytes::from(value.to_string()),
            None => Bytes::new(),
        };

        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Full::new(payload))
            .map_err(|err| SpiderError::Transport(format!("failed to build request: {err}")))?;

        let exchange = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|err| SpiderError::Transport(err.to_string()))?;
            let status = response.status().as_u16();
            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|err| SpiderError::Transport(err.to_string()))?
                .to_bytes();
            Ok(SpiderResponse { status, body })
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(SpiderError::Timeout(timeout)),
        }
    }
}
