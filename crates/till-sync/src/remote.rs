//! # Remote Delivery
//!
//! The seam between the outbox worker and whatever receives the changes.
//!
//! ## Wire Shape
//! ```text
//! POST {endpoint_url}
//! Idempotency-Key: {queue entry id}
//! X-Till-Device:   {device id}
//! Content-Type:    application/json
//!
//! {
//!   "entity": "invoices",
//!   "entity_id": "3f0c…",
//!   "action": "CREATE",
//!   "payload": { "schema_version": 1, "body": { "kind": "invoice", "data": {…} } },
//!   "idempotency_key": "9b1e…",
//!   "queued_at": 1700000000
//! }
//! ```
//!
//! The same entry may be delivered more than once (a crash between the POST
//! and `mark_synced`); the remote deduplicates on the idempotency key.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

use till_core::sync::{SyncAction, SyncQueueEntry};

use crate::config::SyncConfig;
use crate::error::{is_transient_status, SyncError, SyncResult};

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";
pub const DEVICE_HEADER: &str = "X-Till-Device";

/// Longest slice of a response body kept in an error message.
const MAX_ERROR_BODY: usize = 256;

// =============================================================================
// Outbound Operation
// =============================================================================

/// One outbox entry as the remote sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundOperation {
    pub entity: String,
    pub entity_id: String,
    pub action: SyncAction,
    /// The queued envelope, decoded so it is sent as JSON rather than a string.
    pub payload: serde_json::Value,
    /// The queue entry id.
    pub idempotency_key: String,
    pub queued_at: i64,
}

impl OutboundOperation {
    pub fn from_entry(entry: &SyncQueueEntry) -> SyncResult<Self> {
        let payload = serde_json::from_str(&entry.payload)?;

        Ok(OutboundOperation {
            entity: entry.entity.clone(),
            entity_id: entry.entity_id.clone(),
            action: entry.action,
            payload,
            idempotency_key: entry.id.clone(),
            queued_at: entry.created_at,
        })
    }
}

// =============================================================================
// Delivery Result
// =============================================================================

/// Why a push did not land.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DeliveryError {
    /// Whether pushing the same operation again may succeed.
    pub retryable: bool,
    pub message: String,
}

impl DeliveryError {
    pub fn retryable(message: impl Into<String>) -> Self {
        DeliveryError {
            retryable: true,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        DeliveryError {
            retryable: false,
            message: message.into(),
        }
    }
}

impl From<SyncError> for DeliveryError {
    fn from(err: SyncError) -> Self {
        DeliveryError {
            retryable: err.is_retryable(),
            message: err.to_string(),
        }
    }
}

/// Receives outbox operations. Implementations must be safe to call again
/// with an operation they already accepted.
#[async_trait]
pub trait RemoteSink: Send + Sync {
    async fn push(&self, operation: &OutboundOperation) -> Result<(), DeliveryError>;
}

// =============================================================================
// HTTP Sink
// =============================================================================

/// Delivers each operation as a JSON POST.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: Client,
    endpoint: Url,
    timeout: Duration,
}

impl HttpSink {
    /// Builds a sink posting to `endpoint` with a per-request timeout.
    pub fn new(endpoint: Url, device_id: &str, timeout: Duration) -> SyncResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            DEVICE_HEADER,
            HeaderValue::from_str(device_id)
                .map_err(|_| SyncError::InvalidConfig(format!("device id is not a valid header: {device_id}")))?,
        );

        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| SyncError::InvalidConfig(err.to_string()))?;

        Ok(HttpSink {
            client,
            endpoint,
            timeout,
        })
    }

    /// Builds the sink from a validated config.
    pub fn from_config(config: &SyncConfig) -> SyncResult<Self> {
        Self::new(config.endpoint()?, config.device_id(), config.remote.request_timeout())
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl RemoteSink for HttpSink {
    async fn push(&self, operation: &OutboundOperation) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(IDEMPOTENCY_HEADER, operation.idempotency_key.as_str())
            .json(operation)
            .send()
            .await
            .map_err(|err| match SyncError::from(err) {
                SyncError::Timeout(_) => DeliveryError::from(SyncError::Timeout(self.timeout.as_secs())),
                other => DeliveryError::from(other),
            })?;

        let status = response.status();
        if status.is_success() {
            debug!(
                key = %operation.idempotency_key,
                status = status.as_u16(),
                "Operation delivered"
            );
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status.as_u16(), &body))
    }
}

/// Maps a non-2xx answer to a delivery error.
fn classify_status(status: u16, body: &str) -> DeliveryError {
    let mut message: String = body.trim().chars().take(MAX_ERROR_BODY).collect();
    if message.is_empty() {
        message = "no response body".to_string();
    }

    let err = if is_transient_status(status) {
        SyncError::RemoteUnavailable { status, message }
    } else {
        SyncError::Rejected { status, message }
    };
    DeliveryError::from(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use till_core::sync::{SyncPayload, SyncStatus};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn entry() -> SyncQueueEntry {
        SyncQueueEntry {
            id: "entry-1".to_string(),
            seq: 1,
            entity: "customers".to_string(),
            entity_id: "cust-1".to_string(),
            action: SyncAction::Delete,
            payload: SyncPayload::deleted("cust-1").into_envelope().to_json().unwrap(),
            status: SyncStatus::Pending,
            retry_count: 0,
            last_error: None,
            created_at: 1_700_000_000,
            updated_at: 1_700_000_000,
        }
    }

    /// Accepts one connection, answers with `status_line` and returns the
    /// raw request it read.
    async fn serve_once(status_line: &'static str) -> (Url, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = vec![0u8; 16 * 1024];

            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);

                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|line| line.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().to_string()))
                        .and_then(|v| v.parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }

            let response = format!("HTTP/1.1 {status_line}\r\ncontent-length: 4\r\nconnection: close\r\n\r\nnope");
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
            String::from_utf8_lossy(&request).to_string()
        });

        let url = Url::parse(&format!("http://{addr}/outbox")).unwrap();
        (url, handle)
    }

    fn sink(url: Url) -> HttpSink {
        HttpSink::new(url, "counter-1", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_operation_from_entry() {
        let op = OutboundOperation::from_entry(&entry()).unwrap();
        assert_eq!(op.idempotency_key, "entry-1");
        assert_eq!(op.entity, "customers");
        assert_eq!(op.queued_at, 1_700_000_000);
        assert_eq!(op.payload["body"]["kind"], "deleted");
        assert_eq!(op.payload["body"]["data"]["id"], "cust-1");

        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["action"], "DELETE");
    }

    #[test]
    fn test_corrupt_payload_is_not_retryable() {
        let mut bad = entry();
        bad.payload = "{not json".to_string();

        let err = OutboundOperation::from_entry(&bad).unwrap_err();
        assert!(matches!(err, SyncError::SerializationFailed(_)));
        assert!(!DeliveryError::from(err).retryable);
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(503, "").retryable);
        assert!(classify_status(429, "slow down").retryable);
        assert!(classify_status(408, "").retryable);

        let rejected = classify_status(422, "unknown entity");
        assert!(!rejected.retryable);
        assert!(rejected.message.contains("422"));
        assert!(rejected.message.contains("unknown entity"));

        let long = "x".repeat(1000);
        assert!(classify_status(400, &long).message.len() < 400);
    }

    #[test]
    fn test_invalid_device_header() {
        let url = Url::parse("http://localhost/outbox").unwrap();
        let err = HttpSink::new(url, "bad\nid", Duration::from_secs(1)).unwrap_err();
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_push_sends_idempotency_key() {
        let (url, server) = serve_once("201 Created").await;
        let op = OutboundOperation::from_entry(&entry()).unwrap();

        sink(url).push(&op).await.unwrap();

        let request = server.await.unwrap();
        let lower = request.to_ascii_lowercase();
        assert!(request.starts_with("POST /outbox"));
        assert!(lower.contains("idempotency-key: entry-1"));
        assert!(lower.contains("x-till-device: counter-1"));
        assert!(request.contains("\"entity_id\":\"cust-1\""));
    }

    #[tokio::test]
    async fn test_push_classifies_server_errors() {
        let (url, server) = serve_once("503 Service Unavailable").await;
        let op = OutboundOperation::from_entry(&entry()).unwrap();

        let err = sink(url).push(&op).await.unwrap_err();
        server.await.unwrap();
        assert!(err.retryable);
        assert!(err.message.contains("503"));
    }

    #[tokio::test]
    async fn test_push_classifies_rejections() {
        let (url, server) = serve_once("400 Bad Request").await;
        let op = OutboundOperation::from_entry(&entry()).unwrap();

        let err = sink(url).push(&op).await.unwrap_err();
        server.await.unwrap();
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn test_unreachable_remote_is_retryable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = Url::parse(&format!("http://{addr}/outbox")).unwrap();
        let op = OutboundOperation::from_entry(&entry()).unwrap();

        let err = sink(url).push(&op).await.unwrap_err();
        assert!(err.retryable);
    }
}
