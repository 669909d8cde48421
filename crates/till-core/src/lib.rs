//! # till-core: Pure Business Logic for Till
//!
//! This crate holds every rule of the offline billing ledger that can be
//! expressed without touching a disk or a socket.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Till Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Billing UI (external)                        │   │
//! │  │    Catalog ──► Cart ──► Invoice ──► Payment ──► Receipt         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ till-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌────────────┐  ┌───────────┐ │   │
//! │  │   │   types   │  │   money   │  │ settlement │  │ validation│ │   │
//! │  │   │  Invoice  │  │   Money   │  │  allocate  │  │   rules   │ │   │
//! │  │   │  Payment  │  │  (paise)  │  │  status    │  │   PIN     │ │   │
//! │  │   └───────────┘  └───────────┘  └────────────┘  └───────────┘ │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌────────────┐                │   │
//! │  │   │ category  │  │  sync     │  │  clock /   │                │   │
//! │  │   │   tree    │  │  payload  │  │  license   │                │   │
//! │  │   └───────────┘  └───────────┘  └────────────┘                │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    till-db (Database Layer)                     │   │
//! │  │       SQLite ledger, snapshot persistence, outbox queue         │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Entity rows and status enums (Invoice, Payment, Cart, ...)
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`settlement`] - Greedy payment allocation and invoice status rules
//! - [`category_tree`] - Flat category rows to a parent/children forest
//! - [`sync`] - Outbox entities, actions and the versioned payload union
//! - [`clock`] - Time source seam (system clock or a manual test clock)
//! - [`license`] - License/grace window evaluation
//! - [`error`] - Domain error types
//! - [`validation`] - Business rule validation
//!
//! ## Example Usage
//!
//! ```rust
//! use till_core::money::Money;
//! use till_core::settlement::{allocate, LineBalance};
//!
//! let lines = vec![
//!     LineBalance::new("a", Money::from_paise(10_000), Money::zero()),
//!     LineBalance::new("b", Money::from_paise(10_000), Money::zero()),
//! ];
//! let outcome = allocate(&lines, Money::from_paise(12_000));
//!
//! assert_eq!(outcome.applied, Money::from_paise(12_000));
//! assert_eq!(outcome.lines[1].paid_amount, Money::from_paise(2_000));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod category_tree;
pub mod clock;
pub mod error;
pub mod license;
pub mod money;
pub mod settlement;
pub mod sync;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use till_core::Money` instead of
// `use till_core::money::Money`

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Fixed primary key of the one and only company row.
///
/// ## Why a constant?
/// The store is single-tenant: a `CHECK` constraint pins the company id to
/// this value so a second company can never be inserted.
pub const COMPANY_ID: &str = "LOCAL_COMPANY";

/// Consecutive wrong PINs that trigger a lockout.
pub const MAX_PIN_ATTEMPTS: i64 = 5;

/// Lockout duration after [`MAX_PIN_ATTEMPTS`] failures, in seconds.
pub const PIN_LOCKOUT_SECS: i64 = 300;

/// Maximum lines allowed in a single cart
///
/// ## Business Reason
/// Prevents runaway carts and ensures reasonable transaction sizes.
pub const MAX_CART_ITEMS: usize = 100;

/// Maximum quantity of a single line in a cart or invoice
///
/// ## Business Reason
/// Prevents accidental over-ordering (e.g., typing 1000 instead of 10)
pub const MAX_ITEM_QUANTITY: i64 = 999;

/// Highest unit price accepted on write, in paise (₹100 crore).
///
/// Keeps `price * MAX_ITEM_QUANTITY` summed over [`MAX_CART_ITEMS`] lines
/// well inside `i64`.
pub const MAX_PRICE_PAISE: i64 = 100_000_000_000;
