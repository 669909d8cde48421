//! # Auth Gate
//!
//! Local PIN check with brute-force lockout. Nothing here talks to the
//! network, and nothing here is queued for sync.
//!
//! ## PIN State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  validate_company_pin(pin, device_id)                                  │
//! │                                                                         │
//! │  malformed pin ─────────────────────────► Validation   (no attempt)    │
//! │  no company ────────────────────────────► NotInitialized               │
//! │  device_id ≠ company.device_id ─────────► UnauthorizedDevice           │
//! │  pin_locked_until > now ────────────────► PinLocked    (no verify)     │
//! │  argon2 mismatch                                                        │
//! │     attempts += 1                                                       │
//! │     attempts ≥ 5 ? locked_until = now + 300                            │
//! │     persist ────────────────────────────► InvalidPin                   │
//! │  match                                                                  │
//! │     attempts = 0, locked_until = NULL                                  │
//! │     persist ────────────────────────────► Ok(Company)                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The lock expires on its own. Attempts keep counting until a successful
//! login, so a wrong PIN right after a lock expires locks again.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use ts_rs::TS;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::company::fetch_company;
use crate::store::Store;
use till_core::license::LicenseState;
use till_core::validation::{validate_device_id, validate_pin};
use till_core::{Company, COMPANY_ID, MAX_PIN_ATTEMPTS, PIN_LOCKOUT_SECS};

// =============================================================================
// Hashing
// =============================================================================

/// Hashes a PIN into an Argon2 PHC string with a random salt.
pub fn hash_pin(pin: &str) -> DbResult<String> {
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
        .map_err(|e| DbError::Internal(format!("Failed to build PIN salt: {e}")))?;

    let hash = Argon2::default()
        .hash_password(pin.as_bytes(), &salt)
        .map_err(|e| DbError::Internal(format!("Failed to hash PIN: {e}")))?;

    Ok(hash.to_string())
}

/// Checks a PIN against a stored PHC string. A corrupt hash never matches.
pub fn verify_pin(pin: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };

    Argon2::default()
        .verify_password(pin.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Runs [`verify_pin`] off the async executor.
async fn verify_pin_blocking(pin: &str, hash: &str) -> DbResult<bool> {
    let (pin, hash) = (pin.to_string(), hash.to_string());
    tokio::task::spawn_blocking(move || verify_pin(&pin, &hash))
        .await
        .map_err(|e| DbError::Internal(format!("PIN verification task failed: {e}")))
}

// =============================================================================
// Gate
// =============================================================================

/// Snapshot of the lockout counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LockStatus {
    pub pin_attempts: i64,
    pub locked_until: Option<i64>,
    pub is_locked: bool,
    pub attempts_remaining: i64,
}

/// The PIN gate in front of the local company.
#[derive(Debug, Clone)]
pub struct AuthGate {
    store: Store,
}

impl AuthGate {
    /// Creates a new AuthGate.
    pub fn new(store: Store) -> Self {
        AuthGate { store }
    }

    /// Validates a login attempt.
    ///
    /// ## Returns
    /// * `Ok(Company)` - PIN matched; counters were reset and persisted
    /// * `Err(Validation)` - PIN is not 4-6 digits
    /// * `Err(NotInitialized)` - no company on this device
    /// * `Err(UnauthorizedDevice)` - wrong device
    /// * `Err(PinLocked)` - locked; nothing was checked or counted
    /// * `Err(InvalidPin)` - wrong PIN; the attempt was counted and persisted
    pub async fn validate_company_pin(&self, pin: &str, device_id: &str) -> DbResult<Company> {
        validate_pin(pin)?;
        validate_device_id(device_id)?;

        let mut company = self.authorized_company(device_id).await?;
        let now = self.store.now();

        if company.is_locked(now) {
            let locked_until = company.pin_locked_until.unwrap_or(now);
            debug!(locked_until, "PIN entry refused while locked");
            return Err(DbError::PinLocked { locked_until });
        }

        if !verify_pin_blocking(pin, &company.pin_hash).await? {
            return Err(self.register_failure(&company, now).await);
        }

        self.write_counters(0, None, now).await?;
        self.store.persist().await?;

        info!(device_id = %device_id, "PIN accepted");
        company.pin_attempts = 0;
        company.pin_locked_until = None;
        company.updated_at = now;
        Ok(company)
    }

    /// Replaces the PIN after checking the current one through the gate.
    pub async fn change_pin(&self, device_id: &str, current: &str, new_pin: &str) -> DbResult<()> {
        validate_pin(new_pin)?;
        self.validate_company_pin(current, device_id).await?;

        let pin_hash = hash_pin(new_pin)?;
        let result = sqlx::query("UPDATE companies SET pin_hash = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(COMPANY_ID)
            .bind(&pin_hash)
            .bind(self.store.now())
            .execute(self.store.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotInitialized);
        }

        info!("PIN changed");
        self.store.persist().await
    }

    /// Current lockout counters.
    pub async fn lock_status(&self) -> DbResult<LockStatus> {
        let company = self.company().await?;
        let now = self.store.now();

        Ok(LockStatus {
            pin_attempts: company.pin_attempts,
            locked_until: company.pin_locked_until.filter(|until| *until > now),
            is_locked: company.is_locked(now),
            attempts_remaining: (MAX_PIN_ATTEMPTS - company.pin_attempts).max(0),
        })
    }

    /// Where the company is in its license window right now.
    pub async fn license_state(&self) -> DbResult<LicenseState> {
        let company = self.company().await?;
        Ok(company.license_state(self.store.now()))
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn company(&self) -> DbResult<Company> {
        let mut conn = self.store.pool().acquire().await?;
        fetch_company(&mut *conn).await?.ok_or(DbError::NotInitialized)
    }

    async fn authorized_company(&self, device_id: &str) -> DbResult<Company> {
        let company = self.company().await?;

        if company.device_id != device_id.trim() {
            warn!(device_id = %device_id, "PIN attempt from unknown device");
            return Err(DbError::UnauthorizedDevice);
        }

        Ok(company)
    }

    /// Counts a wrong PIN. Returns the error the caller should see.
    async fn register_failure(&self, company: &Company, now: i64) -> DbError {
        let attempts = company.pin_attempts + 1;
        let locked_until = (attempts >= MAX_PIN_ATTEMPTS).then_some(now + PIN_LOCKOUT_SECS);

        if let Err(e) = self.write_counters(attempts, locked_until, now).await {
            return e;
        }
        if let Err(e) = self.store.persist().await {
            return e;
        }

        match locked_until {
            Some(until) => warn!(attempts, locked_until = until, "PIN locked after repeated failures"),
            None => debug!(attempts, "Wrong PIN"),
        }

        DbError::InvalidPin {
            attempts_remaining: (MAX_PIN_ATTEMPTS - attempts).max(0),
        }
    }

    async fn write_counters(&self, attempts: i64, locked_until: Option<i64>, now: i64) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE companies SET
                pin_attempts = ?2,
                pin_locked_until = ?3,
                updated_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(COMPANY_ID)
        .bind(attempts)
        .bind(locked_until)
        .bind(now)
        .execute(self.store.pool())
        .await?;

        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{outbox, seeded_store, test_store, TEST_DEVICE, TEST_PIN, T0};

    async fn fail_times(gate: &AuthGate, n: usize) {
        for _ in 0..n {
            let err = gate.validate_company_pin("9999", TEST_DEVICE).await.unwrap_err();
            assert!(matches!(err, DbError::InvalidPin { .. }));
        }
    }

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_pin("4321").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_pin("4321", &hash));
        assert!(!verify_pin("4322", &hash));
        assert!(!verify_pin("4321", "not-a-phc-string"));
        assert_ne!(hash, hash_pin("4321").unwrap());
    }

    #[tokio::test]
    async fn test_correct_pin_returns_company() {
        let ctx = seeded_store().await;
        let company = ctx.store.auth().validate_company_pin(TEST_PIN, TEST_DEVICE).await.unwrap();

        assert_eq!(company.id, COMPANY_ID);
        assert_eq!(company.pin_attempts, 0);
    }

    #[tokio::test]
    async fn test_not_initialized() {
        let ctx = test_store().await;
        let err = ctx.store.auth().validate_company_pin(TEST_PIN, TEST_DEVICE).await.unwrap_err();
        assert!(matches!(err, DbError::NotInitialized));
    }

    #[tokio::test]
    async fn test_wrong_device_consumes_no_attempt() {
        let ctx = seeded_store().await;
        let gate = ctx.store.auth();

        let err = gate.validate_company_pin("9999", "device-2").await.unwrap_err();
        assert!(matches!(err, DbError::UnauthorizedDevice));
        assert_eq!(gate.lock_status().await.unwrap().pin_attempts, 0);
    }

    #[tokio::test]
    async fn test_malformed_pin_consumes_no_attempt() {
        let ctx = seeded_store().await;
        let gate = ctx.store.auth();

        let err = gate.validate_company_pin("12ab", TEST_DEVICE).await.unwrap_err();
        assert!(matches!(err, DbError::Validation(_)));
        assert_eq!(gate.lock_status().await.unwrap().pin_attempts, 0);
    }

    #[tokio::test]
    async fn test_lockout_after_five_failures() {
        let ctx = seeded_store().await;
        let gate = ctx.store.auth();

        fail_times(&gate, 4).await;
        let status = gate.lock_status().await.unwrap();
        assert_eq!(status.pin_attempts, 4);
        assert_eq!(status.attempts_remaining, 1);
        assert!(!status.is_locked);

        let err = gate.validate_company_pin("9999", TEST_DEVICE).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidPin { attempts_remaining: 0 }));

        let status = gate.lock_status().await.unwrap();
        assert!(status.is_locked);
        assert_eq!(status.locked_until, Some(T0 + PIN_LOCKOUT_SECS));

        // Locked: even the right PIN is refused and nothing is counted.
        ctx.clock.advance(PIN_LOCKOUT_SECS - 1);
        let err = gate.validate_company_pin(TEST_PIN, TEST_DEVICE).await.unwrap_err();
        assert!(matches!(err, DbError::PinLocked { locked_until } if locked_until == T0 + PIN_LOCKOUT_SECS));
        assert_eq!(gate.lock_status().await.unwrap().pin_attempts, 5);
    }

    #[tokio::test]
    async fn test_success_after_expiry_resets_counters() {
        let ctx = seeded_store().await;
        let gate = ctx.store.auth();

        fail_times(&gate, 5).await;
        ctx.clock.advance(PIN_LOCKOUT_SECS);

        gate.validate_company_pin(TEST_PIN, TEST_DEVICE).await.unwrap();

        let status = gate.lock_status().await.unwrap();
        assert_eq!(status.pin_attempts, 0);
        assert_eq!(status.locked_until, None);
        assert!(!status.is_locked);
    }

    #[tokio::test]
    async fn test_failed_attempts_are_persisted_not_queued() {
        let ctx = seeded_store().await;
        let before = ctx.storage.len_of(crate::store::DEFAULT_SNAPSHOT_KEY).await;

        fail_times(&ctx.store.auth(), 1).await;

        assert!(before.is_some());
        assert_eq!(outbox(&ctx.store).await.len(), 1);

        // Reopen from the same storage and the counter is still there.
        let dir = tempfile::tempdir().unwrap();
        let reopened = Store::open_with_clock(
            crate::store::StoreConfig::new(dir.path()),
            ctx.storage.clone(),
            ctx.clock.clone(),
        )
        .await
        .unwrap();
        assert_eq!(reopened.auth().lock_status().await.unwrap().pin_attempts, 1);
    }

    #[tokio::test]
    async fn test_change_pin() {
        let ctx = seeded_store().await;
        let gate = ctx.store.auth();

        gate.change_pin(TEST_DEVICE, TEST_PIN, "246810").await.unwrap();

        assert!(gate.validate_company_pin("246810", TEST_DEVICE).await.is_ok());
        assert!(matches!(
            gate.validate_company_pin(TEST_PIN, TEST_DEVICE).await,
            Err(DbError::InvalidPin { .. })
        ));

        let err = gate.change_pin(TEST_DEVICE, "0000", "1111").await.unwrap_err();
        assert!(matches!(err, DbError::InvalidPin { .. }));
    }

    #[tokio::test]
    async fn test_license_state() {
        let ctx = seeded_store().await;
        let gate = ctx.store.auth();

        assert!(matches!(gate.license_state().await.unwrap(), LicenseState::Active { .. }));

        ctx.clock.advance(86_400 * 31);
        assert!(matches!(gate.license_state().await.unwrap(), LicenseState::Grace { .. }));

        ctx.clock.advance(86_400 * 7);
        assert_eq!(gate.license_state().await.unwrap(), LicenseState::Expired);
    }
}
