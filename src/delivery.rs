//! Outbound delivery transport.
//!
//! The transport attempts one delivery and reports the outcome. Retry and
//! backoff belong to the consumer of the notification queue.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::HttpMethod;

#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    pub url: String,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    /// Serialized JSON body.
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResponse {
    /// HTTP status, absent when no response arrived.
    pub status: Option<u16>,
    pub success: bool,
    pub detail: String,
}

impl DeliveryResponse {
    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            status: None,
            success: false,
            detail: detail.into(),
        }
    }
}

#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    /// Attempt one delivery. Transport failures come back as an unsuccessful
    /// response; `Err` is reserved for requests that could not be built.
    async fn deliver(&self, request: DeliveryRequest) -> Result<DeliveryResponse>;
}

/// Delivers over HTTP with a per-request timeout.
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl DeliveryTransport for HttpTransport {
    async fn deliver(&self, request: DeliveryRequest) -> Result<DeliveryResponse> {
        let mut builder = match request.method {
            HttpMethod::Post => self.client.post(&request.url),
            HttpMethod::Put => self.client.put(&request.url),
            HttpMethod::Patch => self.client.patch(&request.url),
        }
        .timeout(self.timeout)
        .header("Content-Type", "application/json")
        .body(request.body);

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        match builder.send().await {
            Ok(resp) => {
                let status = resp.status();
                Ok(DeliveryResponse {
                    status: Some(status.as_u16()),
                    success: status.is_success(),
                    detail: if status.is_success() {
                        format!("delivered ({status})")
                    } else if status.is_client_error() {
                        format!("rejected by target ({status})")
                    } else {
                        format!("target error ({status})")
                    },
                })
            }
            Err(err) if err.is_timeout() => Ok(DeliveryResponse::failed(format!(
                "timed out after {}ms",
                self.timeout.as_millis()
            ))),
            Err(err) => Ok(DeliveryResponse::failed(format!("network error: {err}"))),
        }
    }
}
