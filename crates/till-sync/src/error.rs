//! # Sync Error Types
//!
//! Error types for outbox delivery.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Delivery            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Connection     │  │  Rejected (4xx)         │ │
//! │  │  MissingDeviceId│  │  Timeout        │  │  RemoteUnavailable      │ │
//! │  │  InvalidUrl     │  │                 │  │  SerializationFailed    │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │    Database     │  │    Internal     │                              │
//! │  │                 │  │                 │                              │
//! │  │  DatabaseError  │  │  ShuttingDown   │                              │
//! │  │                 │  │  Internal       │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering configuration, transport and delivery failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Missing device ID (required for sync).
    #[error("Device ID not configured. Run initial setup first.")]
    MissingDeviceId,

    /// Invalid remote endpoint.
    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Could not reach the remote.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Request timeout.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    // =========================================================================
    // Delivery Errors
    // =========================================================================
    /// The remote answered with a transient status (408, 429, 5xx).
    #[error("Remote unavailable ({status}): {message}")]
    RemoteUnavailable { status: u16, message: String },

    /// The remote refused the operation for good.
    #[error("Remote rejected operation ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// A queued payload could not be encoded or decoded.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Database Errors
    // =========================================================================
    /// Store access failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal worker error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Worker is shutting down.
    #[error("Sync worker is shutting down")]
    ShuttingDown,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<till_db::DbError> for SyncError {
    fn from(err: till_db::DbError) -> Self {
        SyncError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest does not report the configured limit
            SyncError::Timeout(0)
        } else if let Some(status) = err.status() {
            let status = status.as_u16();
            if is_transient_status(status) {
                SyncError::RemoteUnavailable {
                    status,
                    message: err.to_string(),
                }
            } else {
                SyncError::Rejected {
                    status,
                    message: err.to_string(),
                }
            }
        } else if err.is_builder() {
            SyncError::InvalidConfig(err.to_string())
        } else {
            SyncError::ConnectionFailed(err.to_string())
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

/// 408, 429 and every 5xx are worth retrying.
pub(crate) fn is_transient_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the same operation may succeed later.
    ///
    /// ## Retryable Errors
    /// - Connection failures (network issues)
    /// - Timeouts
    /// - Transient remote statuses
    ///
    /// ## Non-Retryable Errors
    /// - Configuration errors
    /// - Rejections (4xx other than 408/429)
    /// - Payloads that do not decode
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionFailed(_)
                | SyncError::Timeout(_)
                | SyncError::RemoteUnavailable { .. }
                | SyncError::DatabaseError(_)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingDeviceId
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::ConnectionFailed("network error".into()).is_retryable());
        assert!(SyncError::Timeout(30).is_retryable());
        assert!(SyncError::RemoteUnavailable {
            status: 503,
            message: "maintenance".into()
        }
        .is_retryable());

        assert!(!SyncError::InvalidConfig("bad config".into()).is_retryable());
        assert!(!SyncError::MissingDeviceId.is_retryable());
        assert!(!SyncError::Rejected {
            status: 422,
            message: "unknown entity".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_transient_statuses() {
        for status in [408, 429, 500, 502, 503, 599] {
            assert!(is_transient_status(status), "{status}");
        }
        for status in [400, 401, 404, 409, 422] {
            assert!(!is_transient_status(status), "{status}");
        }
    }

    #[test]
    fn test_config_errors() {
        assert!(SyncError::InvalidUrl("ftp://x".into()).is_config_error());
        assert!(SyncError::ConfigLoadFailed("missing".into()).is_config_error());
        assert!(!SyncError::ShuttingDown.is_config_error());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::Rejected {
            status: 409,
            message: "duplicate".into(),
        };
        assert_eq!(err.to_string(), "Remote rejected operation (409): duplicate");
    }
}
