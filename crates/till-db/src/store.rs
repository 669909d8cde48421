//! # Store Handle
//!
//! The explicitly constructed handle every repository works through.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Store Lifecycle                                  │
//! │                                                                         │
//! │  Store::open(config, storage)                                          │
//! │       │                                                                 │
//! │       ├── storage.read("till.db") ──► Some(image) ──► working file     │
//! │       │                           └─► None        ──► fresh database   │
//! │       ├── connect SqlitePool (1 connection: single logical writer)     │
//! │       └── migrate(false) + persist  (if run_migrations)                │
//! │                                                                         │
//! │  every mutating repository call                                        │
//! │       │                                                                 │
//! │       ├── BEGIN                                                         │
//! │       ├── business writes + outbox enqueue (same connection)           │
//! │       ├── COMMIT   or   ROLLBACK + surface cause                       │
//! │       └── persist(): VACUUM INTO temp ──► bytes ──► storage.write      │
//! │                                                                         │
//! │  A failed persist leaves the commit in place and returns Persistence.  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use till_core::clock::{Clock, SystemClock};

use crate::error::{DbError, DbResult};
use crate::repository::auth::AuthGate;
use crate::repository::cart::CartRepository;
use crate::repository::catalog::CatalogRepository;
use crate::repository::company::CompanyRepository;
use crate::repository::customer::CustomerRepository;
use crate::repository::invoice::InvoiceRepository;
use crate::repository::payment::PaymentRepository;
use crate::repository::query::QueryFacade;
use crate::repository::sync::SyncQueueRepository;
use crate::schema;
use crate::storage::SnapshotStorage;

/// Fixed key the database image is stored under.
pub const DEFAULT_SNAPSHOT_KEY: &str = "till.db";

// =============================================================================
// Configuration
// =============================================================================

/// Store configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = StoreConfig::new("/var/lib/till")
///     .snapshot_key("shop.db")
///     .connect_timeout(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory for the working database file and persist staging.
    pub work_dir: PathBuf,

    /// Key the image is read from / written to in the storage collaborator.
    /// Default: `till.db`
    pub snapshot_key: String,

    /// Maximum number of pooled connections.
    /// Default: 1 (every caller serializes through one writer)
    pub max_connections: u32,

    /// Connection acquire timeout.
    /// Default: 30 seconds
    pub connect_timeout: Duration,

    /// Whether to run the schema migration on open.
    /// Default: true
    pub run_migrations: bool,
}

impl StoreConfig {
    /// Creates a configuration rooted at `work_dir`.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        StoreConfig {
            work_dir: work_dir.into(),
            snapshot_key: DEFAULT_SNAPSHOT_KEY.to_string(),
            max_connections: 1,
            connect_timeout: Duration::from_secs(30),
            run_migrations: true,
        }
    }

    pub fn snapshot_key(mut self, key: impl Into<String>) -> Self {
        self.snapshot_key = key.into();
        self
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    fn working_path(&self) -> PathBuf {
        self.work_dir.join(format!("{}.work", self.snapshot_key))
    }
}

// =============================================================================
// Store
// =============================================================================

/// Handle to the local ledger. Cheap to clone; clones share one pool.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
    storage: Arc<dyn SnapshotStorage>,
    clock: Arc<dyn Clock>,
    snapshot_key: Arc<str>,
    work_dir: Arc<Path>,
}

impl Store {
    /// Opens the store using the system clock.
    pub async fn open(config: StoreConfig, storage: Arc<dyn SnapshotStorage>) -> DbResult<Self> {
        Self::open_with_clock(config, storage, Arc::new(SystemClock)).await
    }

    /// Opens the store with an injected clock.
    ///
    /// ## What This Does
    /// 1. Reads the image under `config.snapshot_key`
    /// 2. Materializes it as the working database (or starts empty)
    /// 3. Connects with foreign keys on and a rollback journal
    /// 4. Migrates and persists, if enabled
    pub async fn open_with_clock(
        config: StoreConfig,
        storage: Arc<dyn SnapshotStorage>,
        clock: Arc<dyn Clock>,
    ) -> DbResult<Self> {
        let working = config.working_path();
        info!(
            work_dir = %config.work_dir.display(),
            key = %config.snapshot_key,
            "Opening store"
        );

        tokio::fs::create_dir_all(&config.work_dir)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;
        discard_working_files(&working).await;

        let image = storage
            .read(&config.snapshot_key)
            .await
            .map_err(|e| DbError::Persistence(e.to_string()))?;

        match image {
            Some(bytes) => {
                debug!(bytes = bytes.len(), "Restoring snapshot");
                tokio::fs::write(&working, &bytes)
                    .await
                    .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;
            }
            None => info!("No snapshot found, starting with an empty database"),
        }

        let connect_options = SqliteConnectOptions::new()
            .filename(&working)
            .create_if_missing(true)
            .foreign_keys(true)
            // The working file must be self-contained for VACUUM INTO.
            .journal_mode(SqliteJournalMode::Delete)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .connect_with(connect_options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        let store = Store {
            pool,
            storage,
            clock,
            snapshot_key: Arc::from(config.snapshot_key.as_str()),
            work_dir: Arc::from(config.work_dir.as_path()),
        };

        if config.run_migrations {
            store.migrate(false).await?;
        }

        Ok(store)
    }

    // -------------------------------------------------------------------------
    // Transactions & durability
    // -------------------------------------------------------------------------

    /// Starts an explicit transaction.
    pub async fn begin(&self) -> DbResult<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Commits or rolls back `tx` depending on `result`, then persists.
    ///
    /// ## Returns
    /// * `Ok(value)` - committed and persisted
    /// * `Err(Persistence)` - committed, snapshot not written
    /// * `Err(other)` - rolled back; see [`DbError::aborted`]
    pub(crate) async fn finish<T>(
        &self,
        operation: &str,
        tx: Transaction<'static, Sqlite>,
        result: DbResult<T>,
    ) -> DbResult<T> {
        match result {
            Ok(value) => {
                tx.commit()
                    .await
                    .map_err(|e| DbError::from(e).aborted(operation))?;
                self.persist().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(operation, error = %rollback, "Rollback failed");
                }
                if err.is_precondition() {
                    debug!(operation, error = %err, "Rejected");
                } else {
                    warn!(operation, error = %err, "Transaction rolled back");
                }
                Err(err.aborted(operation))
            }
        }
    }

    /// Runs raw statements atomically, then persists.
    ///
    /// ## Returns
    /// Total rows affected.
    pub async fn execute_batch(&self, statements: &[&str]) -> DbResult<u64> {
        let mut tx = self.begin().await?;
        let mut affected = 0;
        let mut result = Ok(());

        for statement in statements {
            match sqlx::query(statement).execute(&mut *tx).await {
                Ok(done) => affected += done.rows_affected(),
                Err(e) => {
                    result = Err(DbError::from(e));
                    break;
                }
            }
        }

        self.finish("execute_batch", tx, result.map(|()| affected)).await
    }

    /// Serializes the whole database and hands it to storage.
    ///
    /// ## What This Does
    /// 1. `VACUUM INTO` a uniquely named staging file
    /// 2. Reads the staging file
    /// 3. `storage.write(key, bytes)` replacing the previous image
    pub async fn persist(&self) -> DbResult<()> {
        let staging = self
            .work_dir
            .join(format!("{}.{}.snapshot", self.snapshot_key, Uuid::new_v4()));

        let result = self.write_snapshot(&staging).await;

        if let Err(e) = tokio::fs::remove_file(&staging).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(path = %staging.display(), error = %e, "Staging file left behind");
            }
        }

        result
    }

    async fn write_snapshot(&self, staging: &Path) -> DbResult<()> {
        sqlx::query("VACUUM INTO ?1")
            .bind(staging.to_string_lossy().into_owned())
            .execute(&self.pool)
            .await
            .map_err(|e| DbError::Persistence(e.to_string()))?;

        let bytes = tokio::fs::read(staging)
            .await
            .map_err(|e| DbError::Persistence(e.to_string()))?;

        self.storage
            .write(&self.snapshot_key, &bytes)
            .await
            .map_err(|e| DbError::Persistence(e.to_string()))?;

        debug!(bytes = bytes.len(), "Store persisted");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Schema
    // -------------------------------------------------------------------------

    /// Applies the schema (dropping everything first when `reset`), then
    /// persists.
    pub async fn migrate(&self, reset: bool) -> DbResult<()> {
        schema::migrate(&self.pool, reset).await?;
        self.persist().await
    }

    /// Wipes every table and recreates the schema.
    pub async fn reset(&self) -> DbResult<()> {
        warn!("Resetting store: all local data will be dropped");
        self.migrate(true).await
    }

    pub async fn schema_version(&self) -> DbResult<i64> {
        schema::schema_version(&self.pool).await
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Returns a reference to the connection pool.
    ///
    /// Prefer repository methods; reads here bypass nothing, but writes here
    /// bypass the outbox and persistence.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Current time from the injected clock.
    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn company(&self) -> CompanyRepository {
        CompanyRepository::new(self.clone())
    }

    pub fn auth(&self) -> AuthGate {
        AuthGate::new(self.clone())
    }

    pub fn customers(&self) -> CustomerRepository {
        CustomerRepository::new(self.clone())
    }

    pub fn catalog(&self) -> CatalogRepository {
        CatalogRepository::new(self.clone())
    }

    pub fn carts(&self) -> CartRepository {
        CartRepository::new(self.clone())
    }

    pub fn invoices(&self) -> InvoiceRepository {
        InvoiceRepository::new(self.clone())
    }

    pub fn payments(&self) -> PaymentRepository {
        PaymentRepository::new(self.clone())
    }

    pub fn sync_queue(&self) -> SyncQueueRepository {
        SyncQueueRepository::new(self.clone())
    }

    pub fn queries(&self) -> QueryFacade {
        QueryFacade::new(self.clone())
    }

    /// Checks if the database is healthy (can execute queries).
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    /// Closes the pool. Later repository calls fail with `ConnectionFailed`.
    pub async fn close(&self) {
        info!("Closing store");
        self.pool.close().await;
    }
}

/// Removes a stale working database and its journal from a previous run.
async fn discard_working_files(working: &Path) {
    let journal = PathBuf::from(format!("{}-journal", working.display()));
    for path in [working.to_path_buf(), journal] {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "Removed stale working file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Could not remove stale working file"),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FileStorage;
    use crate::test_support::test_store;
    use async_trait::async_trait;
    use std::io;

    #[tokio::test]
    async fn test_open_creates_and_persists_fresh_database() {
        let ctx = test_store().await;

        assert!(ctx.store.health_check().await);
        assert_eq!(ctx.store.schema_version().await.unwrap(), schema::SCHEMA_VERSION);
        assert!(ctx.storage.len_of(DEFAULT_SNAPSHOT_KEY).await.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_reopen_sees_persisted_state() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn SnapshotStorage> = Arc::new(FileStorage::new(dir.path().join("images")));

        let first = Store::open(StoreConfig::new(dir.path().join("work-a")), storage.clone())
            .await
            .unwrap();
        first
            .execute_batch(&["CREATE TABLE notes (body TEXT)", "INSERT INTO notes VALUES ('kept')"])
            .await
            .unwrap();
        first.close().await;

        let second = Store::open(StoreConfig::new(dir.path().join("work-b")), storage)
            .await
            .unwrap();
        let body: String = sqlx::query_scalar("SELECT body FROM notes")
            .fetch_one(second.pool())
            .await
            .unwrap();
        assert_eq!(body, "kept");
    }

    #[tokio::test]
    async fn test_execute_batch_is_atomic() {
        let ctx = test_store().await;
        ctx.store
            .execute_batch(&["CREATE TABLE notes (body TEXT NOT NULL)"])
            .await
            .unwrap();

        let err = ctx
            .store
            .execute_batch(&["INSERT INTO notes VALUES ('a')", "INSERT INTO notes VALUES (NULL)"])
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::TransactionAborted { .. }));

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notes")
            .fetch_one(ctx.store.pool())
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[derive(Debug, Default)]
    struct BrokenStorage;

    #[async_trait]
    impl SnapshotStorage for BrokenStorage {
        async fn read(&self, _key: &str) -> io::Result<Option<Vec<u8>>> {
            Ok(None)
        }

        async fn write(&self, _key: &str, _bytes: &[u8]) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_committed_state() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::new(dir.path()).run_migrations(false);
        let store = Store::open(config, Arc::new(BrokenStorage)).await.unwrap();

        let err = store
            .execute_batch(&["CREATE TABLE notes (body TEXT)", "INSERT INTO notes VALUES ('x')"])
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Persistence(_)));

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notes")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn test_reset_empties_store() {
        let ctx = test_store().await;
        ctx.store
            .execute_batch(&["CREATE TABLE scratch (x INTEGER)"])
            .await
            .unwrap();

        ctx.store.reset().await.unwrap();

        let exists: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'scratch'",
        )
        .fetch_one(ctx.store.pool())
        .await
        .unwrap();
        assert_eq!(exists, 0);
    }

    #[test]
    fn test_config_builder() {
        let config = StoreConfig::new("/tmp/till")
            .snapshot_key("shop.db")
            .max_connections(2)
            .run_migrations(false);

        assert_eq!(config.snapshot_key, "shop.db");
        assert_eq!(config.max_connections, 2);
        assert!(!config.run_migrations);
        assert!(config.working_path().ends_with("shop.db.work"));
    }
}
