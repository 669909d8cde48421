//! # Error Types
//!
//! Domain-specific error types for till-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  till-core errors (this file)                                          │
//! │  ├── CoreError        - Unknown enum values, wrapped validation         │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  till-db errors (separate crate)                                       │
//! │  └── DbError          - Ledger, auth gate and persistence failures     │
//! │                                                                         │
//! │  till-sync errors (separate crate)                                     │
//! │  └── SyncError        - Config, transport, delivery                    │
//! │                                                                         │
//! │  Flow: ValidationError → DbError → SyncError / caller                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A stored or received string does not name a known variant.
    ///
    /// ## When This Occurs
    /// - A queue row carries an action other than CREATE/UPDATE/DELETE
    /// - A caller passes a status string from an older UI build
    #[error("Unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These are raised before any write happens, so a rejected call never
/// leaves a partial row behind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid UUID, non-numeric PIN).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

impl ValidationError {
    pub(crate) fn required(field: &str) -> Self {
        ValidationError::Required {
            field: field.to_string(),
        }
    }

    pub(crate) fn invalid_format(field: &str, reason: &str) -> Self {
        ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
