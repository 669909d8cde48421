//! # Repository Module
//!
//! Database repository implementations for Till.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                   │
//! │                                                                         │
//! │  Billing UI / till-sync                                                │
//! │       │                                                                 │
//! │       │  store.payments().create_payment(new_payment)                  │
//! │       ▼                                                                 │
//! │  PaymentRepository { store }                                           │
//! │  ├── validate input            (before BEGIN)                          │
//! │  ├── BEGIN                                                              │
//! │  ├── write rows + enqueue       (same connection)                      │
//! │  └── store.finish(op, tx, result) → COMMIT + persist / ROLLBACK        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite working database ──► snapshot storage                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`CompanyRepository`](company::CompanyRepository) - The singleton company
//! - [`AuthGate`](auth::AuthGate) - PIN validation and lockout
//! - [`CustomerRepository`](customer::CustomerRepository) - Customers, addresses, vendors
//! - [`CatalogRepository`](catalog::CatalogRepository) - Categories, products, items
//! - [`CartRepository`](cart::CartRepository) - Carts and cart lines
//! - [`InvoiceRepository`](invoice::InvoiceRepository) - Invoices and cart → invoice
//! - [`PaymentRepository`](payment::PaymentRepository) - Payments and settlement
//! - [`SyncQueueRepository`](sync::SyncQueueRepository) - The outbox
//! - [`QueryFacade`](query::QueryFacade) - Read-only joined views

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use till_core::validation::{validate_page_size, ValidationResult};

pub mod auth;
pub mod cart;
pub mod catalog;
pub mod company;
pub mod customer;
pub mod invoice;
pub mod payment;
pub mod query;
pub mod sync;

/// Pagination window, applied to parent rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    pub const fn new(limit: u32, offset: u32) -> Self {
        Page { limit, offset }
    }

    pub fn validate(&self) -> ValidationResult<()> {
        validate_page_size(self.limit)
    }
}

impl Default for Page {
    fn default() -> Self {
        Page::new(50, 0)
    }
}

pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Trims an optional text field, turning blanks into `None`.
pub(crate) fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
