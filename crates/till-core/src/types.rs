//! # Domain Types
//!
//! Entity rows and status enums of the billing ledger.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │                      ┌─────────────────┐                                │
//! │                      │ Company (1 row) │  id = LOCAL_COMPANY            │
//! │                      └────────┬────────┘                                │
//! │        ┌──────────────┬───────┴──────┬──────────────┐                   │
//! │        ▼              ▼              ▼              ▼                   │
//! │  ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐              │
//! │  │ Customer │   │ Category │   │   Cart   │   │ Invoice  │◄── Payment   │
//! │  │ Address* │   │ Product  │   │ CartItem*│   │ InvItem* │              │
//! │  │ Vendor   │   │ Item*    │   └──────────┘   └──────────┘              │
//! │  └──────────┘   └──────────┘                                            │
//! │                                                                         │
//! │  Status enums persist as SCREAMING_SNAKE_CASE text (e.g. "PAID").      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Conventions
//! - Ids are UUID v4 strings, except the company (`LOCAL_COMPANY`).
//! - Timestamps are Unix epoch seconds.
//! - Field names match column names so rows decode with `sqlx::FromRow`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::CoreError;
use crate::license::{self, LicenseState};
use crate::money::Money;

/// Implements `as_str`, `Display` and `FromStr` for a text-backed enum.
macro_rules! text_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            /// The persisted text form.
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(CoreError::UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

pub(crate) use text_enum;

// =============================================================================
// Company
// =============================================================================

/// The single local company, including its secrets.
///
/// Deliberately not `Serialize`: the PIN hash and license material must never
/// leave the store. Hand [`CompanyProfile`] to anything outside.
#[derive(Clone)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Company {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub license_key: String,
    pub license_token: String,
    pub license_expiry: Option<i64>,
    pub grace_until: Option<i64>,
    /// Argon2 PHC string.
    pub pin_hash: String,
    pub pin_attempts: i64,
    pub pin_locked_until: Option<i64>,
    pub device_id: String,
    pub last_sync_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Company {
    /// Secret-free projection for the UI and for sync payloads.
    pub fn profile(&self) -> CompanyProfile {
        CompanyProfile {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
            address: self.address.clone(),
            device_id: self.device_id.clone(),
            license_expiry: self.license_expiry,
            grace_until: self.grace_until,
            last_sync_at: self.last_sync_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Whether the PIN gate is currently closed.
    pub fn is_locked(&self, now: i64) -> bool {
        self.pin_locked_until.is_some_and(|until| until > now)
    }

    /// Evaluates the license window at `now`.
    pub fn license_state(&self, now: i64) -> LicenseState {
        license::evaluate(self.license_expiry, self.grace_until, now)
    }
}

impl fmt::Debug for Company {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Company")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("device_id", &self.device_id)
            .field("pin_hash", &"<redacted>")
            .field("license_key", &"<redacted>")
            .field("license_token", &"<redacted>")
            .field("pin_attempts", &self.pin_attempts)
            .field("pin_locked_until", &self.pin_locked_until)
            .finish_non_exhaustive()
    }
}

/// Public view of the company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CompanyProfile {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub device_id: String,
    pub license_expiry: Option<i64>,
    pub grace_until: Option<i64>,
    pub last_sync_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

// =============================================================================
// Parties
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Customer {
    pub id: String,
    pub company_id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// GST identification number.
    pub gstin: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A postal address; at most one per customer has `is_default` set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CustomerAddress {
    pub id: String,
    pub customer_id: String,
    pub address_line1: String,
    pub address_line2: Option<String>,
    pub address_line3: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub pincode: Option<String>,
    pub is_default: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Vendor {
    pub id: String,
    pub company_id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub gstin: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

// =============================================================================
// Catalog
// =============================================================================

/// A catalog category. `parent_id` is not cycle-checked on write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Category {
    pub id: String,
    pub company_id: String,
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A sellable product. Stock lives on its [`Item`] variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    pub id: String,
    pub company_id: String,
    pub name: String,
    pub sku: Option<String>,
    pub description: Option<String>,
    pub price: Money,
    pub mrp: Option<Money>,
    pub category_id: Option<String>,
    pub sub_category_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A variant / stock unit of a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Item {
    pub id: String,
    pub product_id: String,
    pub company_id: String,
    pub sku: Option<String>,
    pub variant: Option<String>,
    pub price: Money,
    pub mrp: Option<Money>,
    /// Quantity on hand.
    pub quantity: i64,
    pub location: Option<String>,
    pub tax_rate_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

// =============================================================================
// Cart
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum CartStatus {
    Draft,
    Hold,
    Pending,
    #[default]
    Active,
    Checkedout,
    /// Converted into an invoice.
    Completed,
    Cancelled,
}

text_enum!(CartStatus, "cart status", {
    Draft => "DRAFT",
    Hold => "HOLD",
    Pending => "PENDING",
    Active => "ACTIVE",
    Checkedout => "CHECKEDOUT",
    Completed => "COMPLETED",
    Cancelled => "CANCELLED",
});

impl CartStatus {
    /// Whether lines may still be added, changed or removed.
    pub const fn is_open(&self) -> bool {
        !matches!(
            self,
            CartStatus::Checkedout | CartStatus::Completed | CartStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Cart {
    pub id: String,
    pub company_id: String,
    pub customer_id: Option<String>,
    pub status: CartStatus,
    /// Always re-summed from the cart's lines.
    pub total_amount: Money,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CartItem {
    pub id: String,
    pub cart_id: String,
    pub item_id: String,
    pub product_id: String,
    /// 1-based insertion position.
    pub line_no: i64,
    pub quantity: i64,
    pub price: Money,
    pub tax_rate_id: Option<String>,
    /// `quantity × price`
    pub total: Money,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CartWithItems {
    pub cart: Cart,
    pub items: Vec<CartItem>,
}

// =============================================================================
// Invoice
// =============================================================================

/// Settlement state of an invoice, derived from paid vs total.
///
/// `Paylater` and `Cancelled` are only ever set explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum InvoiceStatus {
    #[default]
    Pending,
    PartiallyPaid,
    Paylater,
    Paid,
    Cancelled,
}

text_enum!(InvoiceStatus, "invoice status", {
    Pending => "PENDING",
    PartiallyPaid => "PARTIALLY_PAID",
    Paylater => "PAYLATER",
    Paid => "PAID",
    Cancelled => "CANCELLED",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum InvoiceType {
    Sale,
    #[default]
    Pos,
    Expense,
    Online,
    Purchase,
    Return,
    Other,
}

text_enum!(InvoiceType, "invoice type", {
    Sale => "SALE",
    Pos => "POS",
    Expense => "EXPENSE",
    Online => "ONLINE",
    Purchase => "PURCHASE",
    Return => "RETURN",
    Other => "OTHER",
});

/// Fulfilment state of an invoice line. Independent of payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum FulfillmentStatus {
    #[default]
    Ordered,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Returned,
}

text_enum!(FulfillmentStatus, "fulfillment status", {
    Ordered => "ORDERED",
    Processing => "PROCESSING",
    Shipped => "SHIPPED",
    Delivered => "DELIVERED",
    Cancelled => "CANCELLED",
    Returned => "RETURNED",
});

/// Settlement state of a single invoice line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum PaymentStatus {
    #[default]
    Unpaid,
    PartiallyPaid,
    Paid,
}

text_enum!(PaymentStatus, "payment status", {
    Unpaid => "UNPAID",
    PartiallyPaid => "PARTIALLY_PAID",
    Paid => "PAID",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Invoice {
    pub id: String,
    pub company_id: String,
    pub invoice_number: String,
    pub customer_id: Option<String>,
    pub vendor_id: Option<String>,
    /// Source cart when materialized from one.
    pub cart_id: Option<String>,
    pub date: i64,
    pub due_date: Option<i64>,
    pub status: InvoiceStatus,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "type"))]
    #[serde(rename = "type")]
    pub invoice_type: InvoiceType,
    pub total_amount: Money,
    pub tax_amount: Money,
    pub paid_amount: Money,
    pub balance_amount: Money,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct InvoiceItem {
    pub id: String,
    pub invoice_id: String,
    pub item_id: String,
    pub product_id: String,
    /// Insertion position; also the settlement priority.
    pub line_no: i64,
    pub quantity: i64,
    pub price: Money,
    pub total: Money,
    pub paid_amount: Money,
    pub status: FulfillmentStatus,
    pub payment_status: PaymentStatus,
    pub tax_rate_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl InvoiceItem {
    /// Outstanding amount, never negative.
    pub fn due(&self) -> Money {
        self.total.saturating_due(self.paid_amount)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InvoiceWithItems {
    pub invoice: Invoice,
    pub items: Vec<InvoiceItem>,
}

// =============================================================================
// Payment
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum PaymentMethod {
    #[default]
    Cash,
    BankTransfer,
    Upi,
    Cheque,
    Card,
    Other,
}

text_enum!(PaymentMethod, "payment method", {
    Cash => "CASH",
    BankTransfer => "BANK_TRANSFER",
    Upi => "UPI",
    Cheque => "CHEQUE",
    Card => "CARD",
    Other => "OTHER",
});

/// How the caller classified the payment. Only `Advance` has ledger meaning
/// (it counts toward the customer's advance balance).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum PaymentType {
    Advance,
    Partial,
    #[default]
    Full,
}

text_enum!(PaymentType, "payment type", {
    Advance => "ADVANCE",
    Partial => "PARTIAL",
    Full => "FULL",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Payment {
    pub id: String,
    pub company_id: String,
    /// `None` for an unattached advance.
    pub invoice_id: Option<String>,
    pub customer_id: Option<String>,
    pub amount: Money,
    pub method: PaymentMethod,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "type"))]
    #[serde(rename = "type")]
    pub payment_type: PaymentType,
    pub reference_no: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub raw_response: Option<String>,
    pub note: Option<String>,
    pub date: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn company() -> Company {
        Company {
            id: crate::COMPANY_ID.to_string(),
            name: "Corner Store".to_string(),
            email: None,
            phone: Some("9800000000".to_string()),
            address: None,
            license_key: "KEY-123".to_string(),
            license_token: "token-abc".to_string(),
            license_expiry: None,
            grace_until: None,
            pin_hash: "$argon2id$v=19$secret".to_string(),
            pin_attempts: 0,
            pin_locked_until: Some(1_000),
            device_id: "device-1".to_string(),
            last_sync_at: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_company_debug_redacts_secrets() {
        let rendered = format!("{:?}", company());
        assert!(!rendered.contains("argon2"));
        assert!(!rendered.contains("KEY-123"));
        assert!(!rendered.contains("token-abc"));
        assert!(rendered.contains("Corner Store"));
    }

    #[test]
    fn test_company_profile_has_no_secrets() {
        let json = serde_json::to_string(&company().profile()).unwrap();
        assert!(!json.contains("pin"));
        assert!(!json.contains("license_key"));
        assert!(!json.contains("license_token"));
    }

    #[test]
    fn test_company_lock_window() {
        let company = company();
        assert!(company.is_locked(999));
        assert!(!company.is_locked(1_000));
    }

    #[test]
    fn test_status_text_round_trip() {
        assert_eq!(InvoiceStatus::PartiallyPaid.as_str(), "PARTIALLY_PAID");
        assert_eq!("PAYLATER".parse::<InvoiceStatus>().unwrap(), InvoiceStatus::Paylater);
        assert_eq!(PaymentMethod::BankTransfer.to_string(), "BANK_TRANSFER");
        assert!("PARTIAL".parse::<InvoiceStatus>().is_err());
    }

    #[test]
    fn test_serde_matches_persisted_text() {
        let json = serde_json::to_string(&CartStatus::Checkedout).unwrap();
        assert_eq!(json, "\"CHECKEDOUT\"");
        let json = serde_json::to_string(&PaymentMethod::Upi).unwrap();
        assert_eq!(json, "\"UPI\"");
    }

    #[test]
    fn test_cart_status_is_open() {
        assert!(CartStatus::Active.is_open());
        assert!(CartStatus::Hold.is_open());
        assert!(!CartStatus::Completed.is_open());
        assert!(!CartStatus::Cancelled.is_open());
    }

    #[test]
    fn test_defaults() {
        assert_eq!(CartStatus::default(), CartStatus::Active);
        assert_eq!(InvoiceType::default(), InvoiceType::Pos);
        assert_eq!(PaymentStatus::default(), PaymentStatus::Unpaid);
    }
}
