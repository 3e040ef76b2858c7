//! HTTP intent gateway client.
//! Connection pooling via reqwest, bounded retry (429 / 5xx / timeout each
//! retried once), cancellation-aware waits. Transport failures are reported
//! as errors here; the service layer above resolves them to a no-op intent.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{GatewayError, InputKind};

/// Request body for the interpretation service.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterpretRequest {
    pub request_id: String,
    pub input: String,
    pub kind: InputKind,
    pub locale: String,
    pub current_index: usize,
    pub page_count: usize,
}

/// Response body from the interpretation service.
#[derive(Debug, Clone, Deserialize)]
pub struct IntentResponse {
    pub action: String,
    #[serde(default)]
    pub page: Option<u32>,
}

/// Backend seam for the interpretation call; tests substitute a fake.
pub trait IntentBackend: Send + Sync {
    fn interpret<'a>(
        &'a self,
        request: &'a InterpretRequest,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<IntentResponse, GatewayError>> + Send + 'a>>;
}

/// Production backend: POSTs the request as JSON to the configured endpoint.
pub struct HttpIntentGateway {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpIntentGateway {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| GatewayError::ApiError(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }

    async fn send_with_retry(
        &self,
        request: &InterpretRequest,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, GatewayError> {
        let mut retried_429 = false;
        let mut retried_5xx = false;
        let mut retried_timeout = false;

        loop {
            if cancel.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }

            let result = self.http.post(&self.endpoint).json(request).send().await;

            match result {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if resp.status().as_u16() == 429 => {
                    if retried_429 {
                        return Err(GatewayError::Status(429));
                    }
                    retried_429 = true;
                    let wait = resp
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse::<u64>().ok())
                        .map(Duration::from_secs)
                        .unwrap_or(Duration::from_secs(1));
                    warn!(wait_ms = wait.as_millis() as u64, "429 rate limited, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                    }
                }
                Ok(resp) if resp.status().is_server_error() => {
                    let status = resp.status().as_u16();
                    if retried_5xx {
                        return Err(GatewayError::Status(status));
                    }
                    retried_5xx = true;
                    warn!(status, "5xx from intent service, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(500)) => {}
                        _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                    }
                }
                Ok(resp) => return Err(GatewayError::Status(resp.status().as_u16())),
                Err(e) if e.is_timeout() => {
                    if retried_timeout {
                        return Err(GatewayError::Timeout);
                    }
                    retried_timeout = true;
                    warn!("intent request timeout, retrying once");
                }
                Err(e) => return Err(GatewayError::ApiError(e.to_string())),
            }
        }
    }
}

impl IntentBackend for HttpIntentGateway {
    fn interpret<'a>(
        &'a self,
        request: &'a InterpretRequest,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<IntentResponse, GatewayError>> + Send + 'a>> {
        Box::pin(async move {
            let response = self.send_with_retry(request, cancel).await?;
            response
                .json::<IntentResponse>()
                .await
                .map_err(|e| GatewayError::ApiError(format!("malformed response: {e}")))
        })
    }
}
