//! # Schema & Migration
//!
//! The whole schema is declared here and applied idempotently with
//! `CREATE ... IF NOT EXISTS`.
//!
//! ## Migration Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  PRAGMA foreign_keys = OFF          (no-op inside a tx, so set first)   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  BEGIN                                                                  │
//! │   ├── reset? DROP every user table                                      │
//! │   ├── CREATE TABLE IF NOT EXISTS ... (13 tables)                        │
//! │   ├── CREATE INDEX IF NOT EXISTS ...                                    │
//! │   ├── CREATE TRIGGER trg_<table>_updated ...                            │
//! │   └── PRAGMA user_version = SCHEMA_VERSION                              │
//! │  COMMIT        (any failure → ROLLBACK + MigrationFailed)               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  PRAGMA foreign_keys = ON           (always, even after a failure)      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Money columns are INTEGER paise. Timestamps are INTEGER epoch seconds.

use sqlx::{Connection, SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};

/// Stored in `PRAGMA user_version` after a successful migration.
pub const SCHEMA_VERSION: i64 = 1;

/// Tables carrying an `updated_at` column (and therefore a touch trigger).
pub const TOUCHED_TABLES: &[&str] = &[
    "companies",
    "customers",
    "customer_addresses",
    "vendors",
    "categories",
    "products",
    "items",
    "carts",
    "cart_items",
    "invoices",
    "invoice_items",
    "payments",
    "sync_queue",
];

// =============================================================================
// DDL
// =============================================================================

const CREATE_TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS companies (
        id               TEXT PRIMARY KEY CHECK (id = 'LOCAL_COMPANY'),
        name             TEXT NOT NULL,
        email            TEXT,
        phone            TEXT,
        address          TEXT,
        license_key      TEXT NOT NULL,
        license_token    TEXT NOT NULL,
        license_expiry   INTEGER,
        grace_until      INTEGER,
        pin_hash         TEXT NOT NULL,
        pin_attempts     INTEGER NOT NULL DEFAULT 0,
        pin_locked_until INTEGER,
        device_id        TEXT NOT NULL,
        last_sync_at     INTEGER,
        created_at       INTEGER NOT NULL,
        updated_at       INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS customers (
        id         TEXT PRIMARY KEY,
        company_id TEXT NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
        name       TEXT NOT NULL,
        email      TEXT,
        phone      TEXT,
        gstin      TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS customer_addresses (
        id            TEXT PRIMARY KEY,
        customer_id   TEXT NOT NULL REFERENCES customers(id) ON DELETE CASCADE,
        address_line1 TEXT NOT NULL,
        address_line2 TEXT,
        address_line3 TEXT,
        city          TEXT,
        state         TEXT,
        country       TEXT,
        pincode       TEXT,
        is_default    INTEGER NOT NULL DEFAULT 0,
        created_at    INTEGER NOT NULL,
        updated_at    INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS vendors (
        id         TEXT PRIMARY KEY,
        company_id TEXT NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
        name       TEXT NOT NULL,
        email      TEXT,
        phone      TEXT,
        address    TEXT,
        gstin      TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS categories (
        id          TEXT PRIMARY KEY,
        company_id  TEXT NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
        name        TEXT NOT NULL,
        description TEXT,
        parent_id   TEXT REFERENCES categories(id) ON DELETE SET NULL,
        created_at  INTEGER NOT NULL,
        updated_at  INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS products (
        id              TEXT PRIMARY KEY,
        company_id      TEXT NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
        name            TEXT NOT NULL,
        sku             TEXT,
        description     TEXT,
        price           INTEGER NOT NULL DEFAULT 0,
        mrp             INTEGER,
        category_id     TEXT REFERENCES categories(id) ON DELETE SET NULL,
        sub_category_id TEXT REFERENCES categories(id) ON DELETE SET NULL,
        created_at      INTEGER NOT NULL,
        updated_at      INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS items (
        id          TEXT PRIMARY KEY,
        product_id  TEXT NOT NULL REFERENCES products(id) ON DELETE CASCADE,
        company_id  TEXT NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
        sku         TEXT,
        variant     TEXT,
        price       INTEGER NOT NULL DEFAULT 0,
        mrp         INTEGER,
        quantity    INTEGER NOT NULL DEFAULT 0,
        location    TEXT,
        tax_rate_id TEXT,
        created_at  INTEGER NOT NULL,
        updated_at  INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS carts (
        id           TEXT PRIMARY KEY,
        company_id   TEXT NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
        customer_id  TEXT REFERENCES customers(id) ON DELETE SET NULL,
        status       TEXT NOT NULL DEFAULT 'ACTIVE'
                     CHECK (status IN ('DRAFT','HOLD','PENDING','ACTIVE','CHECKEDOUT','COMPLETED','CANCELLED')),
        total_amount INTEGER NOT NULL DEFAULT 0,
        created_at   INTEGER NOT NULL,
        updated_at   INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cart_items (
        id          TEXT PRIMARY KEY,
        cart_id     TEXT NOT NULL REFERENCES carts(id) ON DELETE CASCADE,
        item_id     TEXT NOT NULL REFERENCES items(id) ON DELETE CASCADE,
        product_id  TEXT NOT NULL REFERENCES products(id) ON DELETE CASCADE,
        line_no     INTEGER NOT NULL,
        quantity    INTEGER NOT NULL DEFAULT 1,
        price       INTEGER NOT NULL DEFAULT 0,
        tax_rate_id TEXT,
        total       INTEGER NOT NULL DEFAULT 0,
        created_at  INTEGER NOT NULL,
        updated_at  INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS invoices (
        id             TEXT PRIMARY KEY,
        company_id     TEXT NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
        invoice_number TEXT NOT NULL UNIQUE,
        customer_id    TEXT REFERENCES customers(id) ON DELETE SET NULL,
        vendor_id      TEXT REFERENCES vendors(id) ON DELETE SET NULL,
        cart_id        TEXT REFERENCES carts(id) ON DELETE SET NULL,
        date           INTEGER NOT NULL,
        due_date       INTEGER,
        status         TEXT NOT NULL DEFAULT 'PENDING'
                       CHECK (status IN ('PENDING','PARTIALLY_PAID','PAYLATER','PAID','CANCELLED')),
        type           TEXT NOT NULL DEFAULT 'POS'
                       CHECK (type IN ('SALE','POS','EXPENSE','ONLINE','PURCHASE','RETURN','OTHER')),
        total_amount   INTEGER NOT NULL DEFAULT 0,
        tax_amount     INTEGER NOT NULL DEFAULT 0,
        paid_amount    INTEGER NOT NULL DEFAULT 0,
        balance_amount INTEGER NOT NULL DEFAULT 0,
        created_at     INTEGER NOT NULL,
        updated_at     INTEGER NOT NULL
    )
    "#,
    // Ledger lines reference the catalog without cascade: deleting a product
    // that was ever invoiced fails instead of erasing history.
    r#"
    CREATE TABLE IF NOT EXISTS invoice_items (
        id             TEXT PRIMARY KEY,
        invoice_id     TEXT NOT NULL REFERENCES invoices(id) ON DELETE CASCADE,
        item_id        TEXT NOT NULL REFERENCES items(id),
        product_id     TEXT NOT NULL REFERENCES products(id),
        line_no        INTEGER NOT NULL,
        quantity       INTEGER NOT NULL DEFAULT 1,
        price          INTEGER NOT NULL DEFAULT 0,
        total          INTEGER NOT NULL DEFAULT 0,
        paid_amount    INTEGER NOT NULL DEFAULT 0,
        status         TEXT NOT NULL DEFAULT 'ORDERED'
                       CHECK (status IN ('ORDERED','PROCESSING','SHIPPED','DELIVERED','CANCELLED','RETURNED')),
        payment_status TEXT NOT NULL DEFAULT 'UNPAID'
                       CHECK (payment_status IN ('UNPAID','PARTIALLY_PAID','PAID')),
        tax_rate_id    TEXT,
        created_at     INTEGER NOT NULL,
        updated_at     INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS payments (
        id                 TEXT PRIMARY KEY,
        company_id         TEXT NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
        invoice_id         TEXT REFERENCES invoices(id) ON DELETE SET NULL,
        customer_id        TEXT REFERENCES customers(id) ON DELETE SET NULL,
        amount             INTEGER NOT NULL,
        method             TEXT NOT NULL DEFAULT 'CASH'
                           CHECK (method IN ('CASH','BANK_TRANSFER','UPI','CHEQUE','CARD','OTHER')),
        type               TEXT NOT NULL DEFAULT 'FULL'
                           CHECK (type IN ('ADVANCE','PARTIAL','FULL')),
        reference_no       TEXT,
        gateway_payment_id TEXT,
        raw_response       TEXT,
        note               TEXT,
        date               INTEGER NOT NULL,
        created_at         INTEGER NOT NULL,
        updated_at         INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sync_queue (
        id          TEXT PRIMARY KEY,
        seq         INTEGER NOT NULL UNIQUE,
        entity      TEXT NOT NULL,
        entity_id   TEXT NOT NULL,
        action      TEXT NOT NULL CHECK (action IN ('CREATE','UPDATE','DELETE')),
        payload     TEXT NOT NULL,
        status      TEXT NOT NULL DEFAULT 'PENDING' CHECK (status IN ('PENDING','SYNCED')),
        retry_count INTEGER NOT NULL DEFAULT 0,
        last_error  TEXT,
        created_at  INTEGER NOT NULL,
        updated_at  INTEGER NOT NULL
    )
    "#,
];

const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_customer_addresses_customer ON customer_addresses(customer_id)",
    "CREATE INDEX IF NOT EXISTS idx_categories_parent ON categories(parent_id)",
    "CREATE INDEX IF NOT EXISTS idx_products_category ON products(category_id)",
    "CREATE INDEX IF NOT EXISTS idx_items_product ON items(product_id)",
    "CREATE INDEX IF NOT EXISTS idx_carts_status ON carts(status)",
    "CREATE INDEX IF NOT EXISTS idx_cart_items_cart ON cart_items(cart_id, line_no)",
    "CREATE INDEX IF NOT EXISTS idx_invoices_customer ON invoices(customer_id)",
    "CREATE INDEX IF NOT EXISTS idx_invoices_date ON invoices(date)",
    "CREATE INDEX IF NOT EXISTS idx_invoice_items_invoice ON invoice_items(invoice_id, line_no)",
    "CREATE INDEX IF NOT EXISTS idx_payments_invoice ON payments(invoice_id)",
    "CREATE INDEX IF NOT EXISTS idx_payments_customer ON payments(customer_id, type)",
    "CREATE INDEX IF NOT EXISTS idx_sync_queue_status ON sync_queue(status, seq)",
    "CREATE INDEX IF NOT EXISTS idx_sync_queue_entity ON sync_queue(entity, entity_id)",
];

/// Touch trigger for `table`.
///
/// Only fires when the UPDATE left `updated_at` as it was, so application
/// timestamps (including a test clock) are never overwritten.
fn touch_trigger(table: &str) -> String {
    format!(
        "CREATE TRIGGER IF NOT EXISTS trg_{table}_updated \
         AFTER UPDATE ON {table} FOR EACH ROW \
         WHEN NEW.updated_at IS OLD.updated_at \
         BEGIN \
             UPDATE {table} SET updated_at = CAST(strftime('%s','now') AS INTEGER) WHERE id = NEW.id; \
         END"
    )
}

// =============================================================================
// Migration
// =============================================================================

/// Applies the schema. With `reset`, every user table is dropped first.
///
/// ## Returns
/// * `Ok(())` - schema is current and foreign keys are enforced again
/// * `Err(DbError::MigrationFailed)` - nothing was changed
pub async fn migrate(pool: &SqlitePool, reset: bool) -> DbResult<()> {
    info!(reset, version = SCHEMA_VERSION, "Running schema migration");

    let mut conn = pool.acquire().await?;

    sqlx::query("PRAGMA foreign_keys = OFF")
        .execute(&mut *conn)
        .await
        .map_err(|e| DbError::MigrationFailed(e.to_string()))?;

    let outcome = apply(&mut *conn, reset).await;

    let restored = sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&mut *conn)
        .await;

    match (outcome, restored) {
        (Ok(()), Ok(_)) => {
            info!("Schema migration complete");
            Ok(())
        }
        (Err(e), _) => {
            warn!(error = %e, "Schema migration rolled back");
            Err(e)
        }
        (Ok(()), Err(e)) => Err(DbError::MigrationFailed(format!(
            "could not re-enable foreign keys: {e}"
        ))),
    }
}

async fn apply(conn: &mut SqliteConnection, reset: bool) -> DbResult<()> {
    let mut tx = conn
        .begin()
        .await
        .map_err(|e| DbError::MigrationFailed(e.to_string()))?;

    match apply_statements(&mut *tx, reset).await {
        Ok(()) => tx
            .commit()
            .await
            .map_err(|e| DbError::MigrationFailed(e.to_string())),
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "Rollback after failed migration also failed");
            }
            Err(DbError::MigrationFailed(e.to_string()))
        }
    }
}

async fn apply_statements(conn: &mut SqliteConnection, reset: bool) -> Result<(), sqlx::Error> {
    if reset {
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )
        .fetch_all(&mut *conn)
        .await?;

        for table in tables {
            debug!(table = %table, "Dropping table");
            sqlx::query(&format!("DROP TABLE IF EXISTS \"{}\"", table.replace('"', "\"\"")))
                .execute(&mut *conn)
                .await?;
        }
    }

    for ddl in CREATE_TABLES.iter().chain(CREATE_INDEXES) {
        sqlx::query(ddl).execute(&mut *conn).await?;
    }

    for table in TOUCHED_TABLES {
        sqlx::query(&touch_trigger(table)).execute(&mut *conn).await?;
    }

    sqlx::query(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Reads `PRAGMA user_version` (0 on a database that was never migrated).
pub async fn schema_version(pool: &SqlitePool) -> DbResult<i64> {
    let version: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    async fn table_names(pool: &SqlitePool) -> Vec<String> {
        sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(pool)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let pool = memory_pool().await;
        migrate(&pool, false).await.unwrap();
        migrate(&pool, false).await.unwrap();

        assert_eq!(table_names(&pool).await.len(), TOUCHED_TABLES.len());
        assert_eq!(schema_version(&pool).await.unwrap(), SCHEMA_VERSION);

        let fk: i64 = sqlx::query_scalar("PRAGMA foreign_keys").fetch_one(&pool).await.unwrap();
        assert_eq!(fk, 1);
    }

    #[tokio::test]
    async fn test_reset_drops_rows_and_stray_tables() {
        let pool = memory_pool().await;
        migrate(&pool, false).await.unwrap();
        sqlx::query("CREATE TABLE scratch (x INTEGER)").execute(&pool).await.unwrap();
        sqlx::query(
            "INSERT INTO sync_queue (id, seq, entity, entity_id, action, payload, created_at, updated_at)
             VALUES ('q1', 1, 'customers', 'c1', 'CREATE', '{}', 0, 0)",
        )
        .execute(&pool)
        .await
        .unwrap();

        migrate(&pool, true).await.unwrap();

        let names = table_names(&pool).await;
        assert!(!names.contains(&"scratch".to_string()));
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_queue")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn test_company_singleton_check() {
        let pool = memory_pool().await;
        migrate(&pool, false).await.unwrap();

        let insert = |id: &'static str| {
            sqlx::query(
                "INSERT INTO companies (id, name, license_key, license_token, pin_hash, device_id, created_at, updated_at)
                 VALUES (?1, 'x', 'k', 't', 'h', 'd', 0, 0)",
            )
            .bind(id)
        };

        assert!(insert("OTHER").execute(&pool).await.is_err());
        assert!(insert("LOCAL_COMPANY").execute(&pool).await.is_ok());
    }

    #[tokio::test]
    async fn test_touch_trigger_only_backfills_unchanged_timestamps() {
        let pool = memory_pool().await;
        migrate(&pool, false).await.unwrap();
        sqlx::query(
            "INSERT INTO companies (id, name, license_key, license_token, pin_hash, device_id, created_at, updated_at)
             VALUES ('LOCAL_COMPANY', 'x', 'k', 't', 'h', 'd', 5, 5)",
        )
        .execute(&pool)
        .await
        .unwrap();

        sqlx::query("UPDATE companies SET name = 'y', updated_at = 42")
            .execute(&pool)
            .await
            .unwrap();
        let stamped: i64 = sqlx::query_scalar("SELECT updated_at FROM companies")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(stamped, 42);

        sqlx::query("UPDATE companies SET name = 'z'").execute(&pool).await.unwrap();
        let stamped: i64 = sqlx::query_scalar("SELECT updated_at FROM companies")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(stamped > 1_577_836_800);
    }
}
