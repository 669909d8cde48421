//! # Sync Queue Repository
//!
//! The outbox: one row per committed mutation of a synced entity.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Outbox Pattern Implementation                        │
//! │                                                                         │
//! │  LOCAL OPERATION (e.g., generate_invoice_from_cart)                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   SINGLE TRANSACTION                            │   │
//! │  │                                                                 │   │
//! │  │  1. INSERT INTO invoices / invoice_items ...                   │   │
//! │  │  2. UPDATE carts SET status = 'COMPLETED'                      │   │
//! │  │  3. SyncQueueRepository::enqueue(&mut tx, Invoices, id,        │   │
//! │  │                                  Create, payload)              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  COMMIT ← both succeed or both fail; then persist()                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            OUTBOX WORKER (till-sync, out of band)               │   │
//! │  │                                                                 │   │
//! │  │  1. pending(batch)  → PENDING rows by seq (FIFO)               │   │
//! │  │  2. For each entry:                                            │   │
//! │  │     a. push to remote                                          │   │
//! │  │     b. ok  → mark_synced(id)                                   │   │
//! │  │     c. err → record_failure(id, error)                         │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rows are never deleted. The queue itself enforces no retry policy.

use sqlx::SqliteConnection;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::store::Store;
use till_core::sync::{EntityKind, SyncAction, SyncPayload, SyncQueueEntry, SyncStatus};

const ENTRY_COLUMNS: &str = "id, seq, entity, entity_id, action, payload, status, \
                             retry_count, last_error, created_at, updated_at";

/// Repository for outbox operations.
#[derive(Debug, Clone)]
pub struct SyncQueueRepository {
    store: Store,
}

impl SyncQueueRepository {
    /// Creates a new SyncQueueRepository.
    pub fn new(store: Store) -> Self {
        SyncQueueRepository { store }
    }

    /// Queues a mutation for synchronization.
    ///
    /// Runs on the caller's transaction connection, so a failed enqueue
    /// aborts the business write that produced it.
    ///
    /// ## Arguments
    /// * `conn` - The open transaction (`&mut *tx`)
    /// * `entity` - Synced table the row belongs to
    /// * `entity_id` - The row's id
    /// * `action` - CREATE / UPDATE / DELETE
    /// * `payload` - What the remote needs to replay the change
    /// * `now` - Store clock reading
    pub async fn enqueue(
        conn: &mut SqliteConnection,
        entity: EntityKind,
        entity_id: &str,
        action: SyncAction,
        payload: SyncPayload,
        now: i64,
    ) -> DbResult<SyncQueueEntry> {
        let id = Uuid::new_v4().to_string();
        let payload = payload.into_envelope().to_json()?;

        let seq: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(seq), 0) + 1 FROM sync_queue")
            .fetch_one(&mut *conn)
            .await?;

        debug!(
            entity = %entity,
            entity_id = %entity_id,
            action = %action,
            seq,
            "Queuing for sync"
        );

        let entry = SyncQueueEntry {
            id,
            seq,
            entity: entity.as_str().to_string(),
            entity_id: entity_id.to_string(),
            action,
            payload,
            status: SyncStatus::Pending,
            retry_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO sync_queue (
                id, seq, entity, entity_id, action, payload,
                status, retry_count, last_error, created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6,
                ?7, ?8, ?9, ?10, ?11
            )
            "#,
        )
        .bind(&entry.id)
        .bind(entry.seq)
        .bind(&entry.entity)
        .bind(&entry.entity_id)
        .bind(entry.action)
        .bind(&entry.payload)
        .bind(entry.status)
        .bind(entry.retry_count)
        .bind(&entry.last_error)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(entry)
    }

    /// Gets pending entries that need to be synced.
    ///
    /// ## Returns
    /// PENDING entries ordered by `seq` (oldest first).
    pub async fn pending(&self, limit: u32) -> DbResult<Vec<SyncQueueEntry>> {
        let entries = sqlx::query_as::<_, SyncQueueEntry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM sync_queue WHERE status = 'PENDING' ORDER BY seq ASC LIMIT ?1"
        ))
        .bind(limit)
        .fetch_all(self.store.pool())
        .await?;

        Ok(entries)
    }

    /// PENDING entries a drain pass may still deliver, oldest first.
    ///
    /// With `max_retries > 0`, entries that reached the limit are left out,
    /// as is every later entry for the same row, so a dead letter can
    /// neither fill the batch nor be overtaken by its own successors.
    /// `max_retries == 0` means unlimited and behaves like [`Self::pending`].
    pub async fn deliverable(&self, limit: u32, max_retries: u32) -> DbResult<Vec<SyncQueueEntry>> {
        let entries = sqlx::query_as::<_, SyncQueueEntry>(&format!(
            r#"
            SELECT {ENTRY_COLUMNS} FROM sync_queue q
            WHERE q.status = 'PENDING'
              AND (?2 = 0 OR q.retry_count < ?2)
              AND NOT EXISTS (
                  SELECT 1 FROM sync_queue d
                  WHERE ?2 > 0
                    AND d.status = 'PENDING'
                    AND d.retry_count >= ?2
                    AND d.entity = q.entity
                    AND d.entity_id = q.entity_id
                    AND d.seq < q.seq
              )
            ORDER BY q.seq ASC
            LIMIT ?1
            "#
        ))
        .bind(limit)
        .bind(max_retries)
        .fetch_all(self.store.pool())
        .await?;

        Ok(entries)
    }

    /// PENDING entries that exhausted `max_retries`. Empty when unlimited.
    pub async fn dead_letters(&self, max_retries: u32) -> DbResult<Vec<SyncQueueEntry>> {
        if max_retries == 0 {
            return Ok(Vec::new());
        }

        let entries = sqlx::query_as::<_, SyncQueueEntry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM sync_queue \
             WHERE status = 'PENDING' AND retry_count >= ?1 ORDER BY seq ASC"
        ))
        .bind(max_retries)
        .fetch_all(self.store.pool())
        .await?;

        Ok(entries)
    }

    /// Marks an entry as successfully synced.
    ///
    /// ## Returns
    /// * `Ok(true)` - the entry moved PENDING → SYNCED and the store persisted
    /// * `Ok(false)` - it was already SYNCED; nothing written
    /// * `Err(NotFound)` - no such entry
    pub async fn mark_synced(&self, id: &str) -> DbResult<bool> {
        let now = self.store.now();

        let result = sqlx::query(
            r#"
            UPDATE sync_queue SET
                status = 'SYNCED',
                updated_at = ?2
            WHERE id = ?1 AND status = 'PENDING'
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(self.store.pool())
        .await?;

        if result.rows_affected() == 0 {
            return match self.get(id).await? {
                Some(_) => Ok(false),
                None => Err(DbError::not_found("SyncQueueEntry", id)),
            };
        }

        debug!(id = %id, "Marked synced");
        self.store.persist().await?;
        Ok(true)
    }

    /// Records a failed delivery attempt.
    ///
    /// ## What This Does
    /// 1. `retry_count += 1`
    /// 2. Stores the error text in `last_error`
    ///
    /// The entry stays PENDING.
    pub async fn record_failure(&self, id: &str, error: &str) -> DbResult<()> {
        let now = self.store.now();

        let result = sqlx::query(
            r#"
            UPDATE sync_queue SET
                retry_count = retry_count + 1,
                last_error = ?2,
                updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(now)
        .execute(self.store.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("SyncQueueEntry", id));
        }

        debug!(id = %id, error = %error, "Recorded sync failure");
        self.store.persist().await
    }

    /// Gets the count of pending entries.
    pub async fn count_pending(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_queue WHERE status = 'PENDING'")
            .fetch_one(self.store.pool())
            .await?;

        Ok(count)
    }

    /// Gets one entry by id.
    pub async fn get(&self, id: &str) -> DbResult<Option<SyncQueueEntry>> {
        let entry = sqlx::query_as::<_, SyncQueueEntry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM sync_queue WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(self.store.pool())
        .await?;

        Ok(entry)
    }

    /// Every entry ever queued for one row, oldest first.
    pub async fn history(&self, entity: EntityKind, entity_id: &str) -> DbResult<Vec<SyncQueueEntry>> {
        let entries = sqlx::query_as::<_, SyncQueueEntry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM sync_queue WHERE entity = ?1 AND entity_id = ?2 ORDER BY seq ASC"
        ))
        .bind(entity.as_str())
        .bind(entity_id)
        .fetch_all(self.store.pool())
        .await?;

        Ok(entries)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_store;
    use till_core::sync::PayloadEnvelope;

    async fn enqueue_one(store: &Store, entity_id: &str) -> SyncQueueEntry {
        let mut tx = store.begin().await.unwrap();
        let entry = SyncQueueRepository::enqueue(
            &mut *tx,
            EntityKind::Customers,
            entity_id,
            SyncAction::Delete,
            SyncPayload::deleted(entity_id),
            store.now(),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
        entry
    }

    #[tokio::test]
    async fn test_pending_is_fifo_by_seq() {
        let ctx = test_store().await;
        let first = enqueue_one(&ctx.store, "c-1").await;
        let second = enqueue_one(&ctx.store, "c-2").await;

        assert_eq!(second.seq, first.seq + 1);

        let pending = ctx.store.sync_queue().pending(10).await.unwrap();
        let ids: Vec<&str> = pending.iter().map(|e| e.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["c-1", "c-2"]);
        assert_eq!(pending[0].entity_kind().unwrap(), EntityKind::Customers);

        let envelope = PayloadEnvelope::from_json(&pending[0].payload).unwrap();
        assert_eq!(envelope.body, SyncPayload::deleted("c-1"));
    }

    #[tokio::test]
    async fn test_mark_synced_is_idempotent() {
        let ctx = test_store().await;
        let entry = enqueue_one(&ctx.store, "c-1").await;
        let queue = ctx.store.sync_queue();

        assert!(queue.mark_synced(&entry.id).await.unwrap());
        assert!(!queue.mark_synced(&entry.id).await.unwrap());

        assert_eq!(queue.count_pending().await.unwrap(), 0);
        let stored = queue.get(&entry.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_mark_synced_unknown_id() {
        let ctx = test_store().await;
        let err = ctx.store.sync_queue().mark_synced("missing").await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_record_failure_keeps_entry_pending() {
        let ctx = test_store().await;
        let entry = enqueue_one(&ctx.store, "c-1").await;
        let queue = ctx.store.sync_queue();

        queue.record_failure(&entry.id, "503 Service Unavailable").await.unwrap();
        queue.record_failure(&entry.id, "timeout").await.unwrap();

        let stored = queue.get(&entry.id).await.unwrap().unwrap();
        assert!(stored.is_pending());
        assert_eq!(stored.retry_count, 2);
        assert_eq!(stored.last_error.as_deref(), Some("timeout"));

        let err = queue.record_failure("missing", "x").await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_deliverable_skips_dead_letters_and_their_successors() {
        let ctx = test_store().await;
        let dead = enqueue_one(&ctx.store, "c-1").await;
        let later_same_row = enqueue_one(&ctx.store, "c-1").await;
        let other = enqueue_one(&ctx.store, "c-2").await;
        let queue = ctx.store.sync_queue();

        for _ in 0..3 {
            queue.record_failure(&dead.id, "500").await.unwrap();
        }

        let ids: Vec<String> = queue
            .deliverable(10, 3)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![other.id.clone()]);

        let dead_ids: Vec<String> = queue.dead_letters(3).await.unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(dead_ids, vec![dead.id.clone()]);

        // Unlimited retries: nothing is ever dead.
        assert_eq!(queue.deliverable(10, 0).await.unwrap().len(), 3);
        assert!(queue.dead_letters(0).await.unwrap().is_empty());
        assert!(queue.get(&later_same_row.id).await.unwrap().unwrap().is_pending());
    }

    #[tokio::test]
    async fn test_history_filters_by_row() {
        let ctx = test_store().await;
        enqueue_one(&ctx.store, "c-1").await;
        enqueue_one(&ctx.store, "c-2").await;
        enqueue_one(&ctx.store, "c-1").await;

        let history = ctx
            .store
            .sync_queue()
            .history(EntityKind::Customers, "c-1")
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].seq < history[1].seq);
    }

    #[tokio::test]
    async fn test_rolled_back_enqueue_leaves_no_row() {
        let ctx = test_store().await;
        let mut tx = ctx.store.begin().await.unwrap();
        SyncQueueRepository::enqueue(
            &mut *tx,
            EntityKind::Items,
            "i-1",
            SyncAction::Update,
            SyncPayload::deleted("i-1"),
            ctx.store.now(),
        )
        .await
        .unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(ctx.store.sync_queue().count_pending().await.unwrap(), 0);
    }
}
