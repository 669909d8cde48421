//! # till-db: Database Layer for Till
//!
//! This crate owns the local ledger of a single-device point of sale. It
//! runs an SQLite working database and, after every committed write, hands
//! a full snapshot of it to a storage collaborator.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Till Data Flow                                 │
//! │                                                                         │
//! │  Billing UI (add to cart, checkout, take payment)                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     till-db (THIS CRATE)                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐   │   │
//! │  │   │    Store      │    │ Repositories  │    │   Schema     │   │   │
//! │  │   │  (store.rs)   │    │ (repository/) │    │ (schema.rs)  │   │   │
//! │  │   │               │    │               │    │              │   │   │
//! │  │   │ SqlitePool    │◄───│ Catalog, Cart │    │ idempotent   │   │   │
//! │  │   │ begin/finish  │    │ Invoice, ...  │    │ DDL + reset  │   │   │
//! │  │   │ persist()     │    │ + sync_queue  │    │              │   │   │
//! │  │   └───────┬───────┘    └───────────────┘    └──────────────┘   │   │
//! │  │           │                                                     │   │
//! │  └───────────┼─────────────────────────────────────────────────────┘   │
//! │              ▼                                                          │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  SnapshotStorage (storage.rs): FileStorage / MemoryStorage      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  sync_queue ──► till-sync (drains the outbox to the remote)             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`store`] - Store handle, transactions and snapshot persistence
//! - [`storage`] - Snapshot storage collaborators
//! - [`schema`] - Table definitions and migration
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations (catalog, invoice, etc.)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use till_db::{FileStorage, Store, StoreConfig};
//!
//! let storage = Arc::new(FileStorage::new("/var/lib/till"));
//! let store = Store::open(StoreConfig::new("/tmp/till"), storage).await?;
//!
//! let cart = store.carts().create_cart(None).await?;
//! store.carts().add_cart_item(&cart.id, &item_id, 2, None).await?;
//! let invoice = store.invoices().generate_invoice_from_cart(&cart.id).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod repository;
pub mod schema;
pub mod storage;
pub mod store;

#[cfg(test)]
mod test_support;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use repository::Page;
pub use storage::{FileStorage, MemoryStorage, SnapshotStorage};
pub use store::{Store, StoreConfig, DEFAULT_SNAPSHOT_KEY};

// Repository re-exports for convenience
pub use repository::auth::{AuthGate, LockStatus};
pub use repository::cart::CartRepository;
pub use repository::catalog::CatalogRepository;
pub use repository::company::CompanyRepository;
pub use repository::customer::CustomerRepository;
pub use repository::invoice::InvoiceRepository;
pub use repository::payment::PaymentRepository;
pub use repository::query::QueryFacade;
pub use repository::sync::SyncQueueRepository;
