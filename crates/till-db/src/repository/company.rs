//! # Company Repository
//!
//! The store holds exactly one company row (`id = LOCAL_COMPANY`, pinned by a
//! `CHECK`). Creating it is the device setup step; everything else in the
//! ledger hangs off it.
//!
//! Outbox payloads for the company are built from [`CompanyProfile`], so the
//! PIN hash and license material never reach the queue.

use sqlx::SqliteConnection;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::repository::auth::hash_pin;
use crate::repository::clean;
use crate::repository::sync::SyncQueueRepository;
use crate::store::Store;
use till_core::sync::{EntityKind, SyncAction, SyncPayload};
use till_core::validation::{validate_device_id, validate_email, validate_name, validate_pin};
use till_core::{Company, CompanyProfile, COMPANY_ID};

pub(crate) const COMPANY_COLUMNS: &str = "id, name, email, phone, address, license_key, \
     license_token, license_expiry, grace_until, pin_hash, pin_attempts, pin_locked_until, \
     device_id, last_sync_at, created_at, updated_at";

/// Device setup input.
#[derive(Clone, Default)]
pub struct NewCompany {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub license_key: String,
    pub license_token: String,
    pub license_expiry: Option<i64>,
    pub grace_until: Option<i64>,
    /// Plain PIN; hashed before it is stored.
    pub pin: String,
    pub device_id: String,
}

impl std::fmt::Debug for NewCompany {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewCompany")
            .field("name", &self.name)
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

/// Editable, non-secret company fields.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// A renewed license.
#[derive(Clone, Default)]
pub struct LicenseUpdate {
    pub license_key: String,
    pub license_token: String,
    pub license_expiry: Option<i64>,
    pub grace_until: Option<i64>,
}

impl std::fmt::Debug for LicenseUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LicenseUpdate")
            .field("license_expiry", &self.license_expiry)
            .field("grace_until", &self.grace_until)
            .finish_non_exhaustive()
    }
}

/// Repository for the company row.
#[derive(Debug, Clone)]
pub struct CompanyRepository {
    store: Store,
}

impl CompanyRepository {
    /// Creates a new CompanyRepository.
    pub fn new(store: Store) -> Self {
        CompanyRepository { store }
    }

    /// Registers the company on this device.
    ///
    /// ## What This Does
    /// 1. Validates input and hashes the PIN (before BEGIN)
    /// 2. Fails with `AlreadyExists` if a company row is present
    /// 3. Inserts the row with zero PIN attempts
    /// 4. Enqueues a `companies` CREATE carrying the profile only
    pub async fn create_company(&self, input: NewCompany) -> DbResult<Company> {
        validate_name("name", &input.name, 200)?;
        validate_pin(&input.pin)?;
        validate_device_id(&input.device_id)?;
        if let Some(email) = input.email.as_deref() {
            validate_email(email)?;
        }

        let pin_hash = hash_pin(&input.pin)?;
        let now = self.store.now();

        let company = Company {
            id: COMPANY_ID.to_string(),
            name: input.name.trim().to_string(),
            email: clean(input.email),
            phone: clean(input.phone),
            address: clean(input.address),
            license_key: input.license_key,
            license_token: input.license_token,
            license_expiry: input.license_expiry,
            grace_until: input.grace_until,
            pin_hash,
            pin_attempts: 0,
            pin_locked_until: None,
            device_id: input.device_id.trim().to_string(),
            last_sync_at: None,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.store.begin().await?;
        let result = insert_company(&mut *tx, &company).await;
        let company = self.store.finish("create_company", tx, result.map(|()| company)).await?;

        info!(device_id = %company.device_id, "Company registered");
        Ok(company)
    }

    /// Gets the company, if the device has been set up.
    pub async fn get_company(&self) -> DbResult<Option<Company>> {
        let mut conn = self.store.pool().acquire().await?;
        fetch_company(&mut *conn).await
    }

    /// Gets the company or fails with `NotInitialized`.
    pub async fn require_company(&self) -> DbResult<Company> {
        self.get_company().await?.ok_or(DbError::NotInitialized)
    }

    /// Gets the secret-free view of the company.
    pub async fn get_profile(&self) -> DbResult<Option<CompanyProfile>> {
        Ok(self.get_company().await?.map(|company| company.profile()))
    }

    /// Replaces the editable profile fields and enqueues a `companies` UPDATE.
    pub async fn update_profile(&self, update: ProfileUpdate) -> DbResult<CompanyProfile> {
        validate_name("name", &update.name, 200)?;
        if let Some(email) = update.email.as_deref() {
            validate_email(email)?;
        }

        let now = self.store.now();
        let mut tx = self.store.begin().await?;
        let result = write_profile(&mut *tx, &update, now).await;
        self.store.finish("update_profile", tx, result).await
    }

    /// Stores a renewed license. The license fields themselves are never
    /// queued; the remote only sees the new expiry through the profile.
    pub async fn update_license(&self, update: LicenseUpdate) -> DbResult<CompanyProfile> {
        let now = self.store.now();
        let mut tx = self.store.begin().await?;
        let result = write_license(&mut *tx, &update, now).await;
        self.store.finish("update_license", tx, result).await
    }

    /// Stamps `last_sync_at`. Sync bookkeeping, so it is not queued itself.
    pub async fn record_sync(&self, at: i64) -> DbResult<()> {
        let result = sqlx::query("UPDATE companies SET last_sync_at = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(COMPANY_ID)
            .bind(at)
            .bind(self.store.now())
            .execute(self.store.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotInitialized);
        }

        debug!(last_sync_at = at, "Recorded sync");
        self.store.persist().await
    }
}

/// Loads the company row on `conn`.
pub(crate) async fn fetch_company(conn: &mut SqliteConnection) -> DbResult<Option<Company>> {
    let company = sqlx::query_as::<_, Company>(&format!(
        "SELECT {COMPANY_COLUMNS} FROM companies WHERE id = ?1"
    ))
    .bind(COMPANY_ID)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(company)
}

async fn insert_company(conn: &mut SqliteConnection, company: &Company) -> DbResult<()> {
    if fetch_company(conn).await?.is_some() {
        return Err(DbError::AlreadyExists {
            entity: "Company".to_string(),
            id: COMPANY_ID.to_string(),
        });
    }

    sqlx::query(
        r#"
        INSERT INTO companies (
            id, name, email, phone, address,
            license_key, license_token, license_expiry, grace_until,
            pin_hash, pin_attempts, pin_locked_until, device_id,
            last_sync_at, created_at, updated_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5,
            ?6, ?7, ?8, ?9,
            ?10, ?11, ?12, ?13,
            ?14, ?15, ?16
        )
        "#,
    )
    .bind(&company.id)
    .bind(&company.name)
    .bind(&company.email)
    .bind(&company.phone)
    .bind(&company.address)
    .bind(&company.license_key)
    .bind(&company.license_token)
    .bind(company.license_expiry)
    .bind(company.grace_until)
    .bind(&company.pin_hash)
    .bind(company.pin_attempts)
    .bind(company.pin_locked_until)
    .bind(&company.device_id)
    .bind(company.last_sync_at)
    .bind(company.created_at)
    .bind(company.updated_at)
    .execute(&mut *conn)
    .await?;

    SyncQueueRepository::enqueue(
        conn,
        EntityKind::Companies,
        COMPANY_ID,
        SyncAction::Create,
        SyncPayload::Company(company.profile()),
        company.created_at,
    )
    .await?;

    Ok(())
}

async fn write_profile(
    conn: &mut SqliteConnection,
    update: &ProfileUpdate,
    now: i64,
) -> DbResult<CompanyProfile> {
    let done = sqlx::query(
        r#"
        UPDATE companies SET
            name = ?2,
            email = ?3,
            phone = ?4,
            address = ?5,
            updated_at = ?6
        WHERE id = ?1
        "#,
    )
    .bind(COMPANY_ID)
    .bind(update.name.trim())
    .bind(clean(update.email.clone()))
    .bind(clean(update.phone.clone()))
    .bind(clean(update.address.clone()))
    .bind(now)
    .execute(&mut *conn)
    .await?;

    if done.rows_affected() == 0 {
        return Err(DbError::NotInitialized);
    }

    enqueue_profile(conn, SyncAction::Update, now).await
}

async fn write_license(
    conn: &mut SqliteConnection,
    update: &LicenseUpdate,
    now: i64,
) -> DbResult<CompanyProfile> {
    let done = sqlx::query(
        r#"
        UPDATE companies SET
            license_key = ?2,
            license_token = ?3,
            license_expiry = ?4,
            grace_until = ?5,
            updated_at = ?6
        WHERE id = ?1
        "#,
    )
    .bind(COMPANY_ID)
    .bind(&update.license_key)
    .bind(&update.license_token)
    .bind(update.license_expiry)
    .bind(update.grace_until)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    if done.rows_affected() == 0 {
        return Err(DbError::NotInitialized);
    }

    enqueue_profile(conn, SyncAction::Update, now).await
}

/// Re-reads the company and queues its profile.
async fn enqueue_profile(conn: &mut SqliteConnection, action: SyncAction, now: i64) -> DbResult<CompanyProfile> {
    let profile = fetch_company(conn)
        .await?
        .ok_or(DbError::NotInitialized)?
        .profile();

    SyncQueueRepository::enqueue(
        conn,
        EntityKind::Companies,
        COMPANY_ID,
        action,
        SyncPayload::Company(profile.clone()),
        now,
    )
    .await?;

    Ok(profile)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{new_company, outbox, seeded_store, test_store, TEST_DEVICE, T0};

    #[tokio::test]
    async fn test_create_company_enqueues_profile_only() {
        let ctx = test_store().await;
        let company = ctx.store.company().create_company(new_company()).await.unwrap();

        assert_eq!(company.id, COMPANY_ID);
        assert_eq!(company.pin_attempts, 0);
        assert!(company.pin_hash.starts_with("$argon2"));
        assert_eq!(company.created_at, T0);

        let entries = outbox(&ctx.store).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entity, "companies");
        assert_eq!(entries[0].entity_id, COMPANY_ID);
        assert_eq!(entries[0].action, SyncAction::Create);

        let payload = &entries[0].payload;
        assert!(!payload.contains("pin"));
        assert!(!payload.contains("LIC-0001"));
        assert!(!payload.contains("tok-secret"));
        assert!(payload.contains(TEST_DEVICE));
    }

    #[tokio::test]
    async fn test_second_company_is_rejected() {
        let ctx = seeded_store().await;
        let err = ctx.store.company().create_company(new_company()).await.unwrap_err();

        assert!(matches!(err, DbError::AlreadyExists { .. }));
        assert_eq!(outbox(&ctx.store).await.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_pin_rejected_before_write() {
        let ctx = test_store().await;
        let mut input = new_company();
        input.pin = "12".to_string();

        let err = ctx.store.company().create_company(input).await.unwrap_err();
        assert!(matches!(err, DbError::Validation(_)));
        assert!(ctx.store.company().get_company().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_profile_enqueues_update() {
        let ctx = seeded_store().await;
        ctx.clock.advance(60);

        let profile = ctx
            .store
            .company()
            .update_profile(ProfileUpdate {
                name: "Corner Store & Co".to_string(),
                phone: Some("9822222222".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(profile.name, "Corner Store & Co");
        assert_eq!(profile.email, None);
        assert_eq!(profile.updated_at, T0 + 60);

        let entries = outbox(&ctx.store).await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].action, SyncAction::Update);
    }

    #[tokio::test]
    async fn test_update_profile_without_company() {
        let ctx = test_store().await;
        let err = ctx
            .store
            .company()
            .update_profile(ProfileUpdate {
                name: "x".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::TransactionAborted { .. }));
        assert!(matches!(err.root_cause(), DbError::NotInitialized));
    }

    #[tokio::test]
    async fn test_update_license_keeps_secrets_out_of_queue() {
        let ctx = seeded_store().await;
        ctx.store
            .company()
            .update_license(LicenseUpdate {
                license_key: "LIC-0002".to_string(),
                license_token: "tok-renewed".to_string(),
                license_expiry: Some(T0 + 1_000),
                grace_until: None,
            })
            .await
            .unwrap();

        let company = ctx.store.company().require_company().await.unwrap();
        assert_eq!(company.license_key, "LIC-0002");

        for entry in outbox(&ctx.store).await {
            assert!(!entry.payload.contains("LIC-0002"));
            assert!(!entry.payload.contains("tok-renewed"));
        }
    }

    #[tokio::test]
    async fn test_record_sync_is_not_queued() {
        let ctx = seeded_store().await;
        ctx.store.company().record_sync(T0 + 5).await.unwrap();

        let profile = ctx.store.company().get_profile().await.unwrap().unwrap();
        assert_eq!(profile.last_sync_at, Some(T0 + 5));
        assert_eq!(outbox(&ctx.store).await.len(), 1);
    }
}
