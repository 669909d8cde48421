//! # License Window
//!
//! A company carries an optional license expiry and an optional grace
//! deadline. The billing UI decides what to block; this module only answers
//! "where are we in the window".
//!
//! ```text
//!   ──────────── Active ─────────────┬──── Grace ────┬──── Expired ────►
//!                              license_expiry    grace_until
//! ```

use serde::{Deserialize, Serialize};
use ts_rs::TS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "state", rename_all = "snake_case")]
#[ts(export)]
pub enum LicenseState {
    /// No expiry recorded.
    Unlicensed,
    Active { expires_at: i64 },
    Grace { grace_until: i64 },
    Expired,
}

impl LicenseState {
    /// Whether the store should accept new sales.
    pub const fn is_usable(&self) -> bool {
        matches!(self, LicenseState::Active { .. } | LicenseState::Grace { .. })
    }
}

/// Evaluates the license window at `now`.
pub fn evaluate(license_expiry: Option<i64>, grace_until: Option<i64>, now: i64) -> LicenseState {
    let Some(expiry) = license_expiry else {
        return LicenseState::Unlicensed;
    };

    if now < expiry {
        return LicenseState::Active { expires_at: expiry };
    }

    match grace_until {
        Some(grace) if now < grace => LicenseState::Grace { grace_until: grace },
        _ => LicenseState::Expired,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_transitions() {
        assert_eq!(evaluate(None, None, 50), LicenseState::Unlicensed);
        assert_eq!(
            evaluate(Some(100), Some(200), 50),
            LicenseState::Active { expires_at: 100 }
        );
        assert_eq!(
            evaluate(Some(100), Some(200), 150),
            LicenseState::Grace { grace_until: 200 }
        );
        assert_eq!(evaluate(Some(100), Some(200), 200), LicenseState::Expired);
        assert_eq!(evaluate(Some(100), None, 100), LicenseState::Expired);
    }

    #[test]
    fn test_usable() {
        assert!(evaluate(Some(100), Some(200), 150).is_usable());
        assert!(!LicenseState::Expired.is_usable());
        assert!(!LicenseState::Unlicensed.is_usable());
    }
}
