//! # Outbox Types
//!
//! Every committed mutation of a synced entity is mirrored into the
//! `sync_queue` table as one entry: which entity, which row, what happened,
//! and a JSON payload the remote can replay.
//!
//! ## Payload Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  {                                                                      │
//! │    "schema_version": 1,                                                 │
//! │    "body": {                                                            │
//! │      "kind": "invoice",          ◄── tag, one variant per entity kind   │
//! │      "data": { ...row... }                                              │
//! │    }                                                                    │
//! │  }                                                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! No variant carries the PIN hash or license material: the company variant
//! wraps [`CompanyProfile`], which has no such fields.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::CoreError;
use crate::types::{
    text_enum, Category, CompanyProfile, Customer, CustomerAddress, InvoiceItem, InvoiceWithItems,
    Item, Payment, Product, Vendor,
};

/// Bumped whenever a payload variant changes shape.
pub const PAYLOAD_SCHEMA_VERSION: u32 = 1;

// =============================================================================
// Entity / Action / Status
// =============================================================================

/// Synced tables. The text form is the table name sent as `entity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum EntityKind {
    Companies,
    Customers,
    CustomerAddresses,
    Vendors,
    Categories,
    Products,
    Items,
    Invoices,
    InvoiceItems,
    Payments,
}

text_enum!(EntityKind, "entity", {
    Companies => "companies",
    Customers => "customers",
    CustomerAddresses => "customer_addresses",
    Vendors => "vendors",
    Categories => "categories",
    Products => "products",
    Items => "items",
    Invoices => "invoices",
    InvoiceItems => "invoice_items",
    Payments => "payments",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

text_enum!(SyncAction, "sync action", {
    Create => "CREATE",
    Update => "UPDATE",
    Delete => "DELETE",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum SyncStatus {
    #[default]
    Pending,
    Synced,
}

text_enum!(SyncStatus, "sync status", {
    Pending => "PENDING",
    Synced => "SYNCED",
});

// =============================================================================
// Queue Entry
// =============================================================================

/// One row of the outbox.
///
/// `entity` is kept as text so rows written by a newer build still decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SyncQueueEntry {
    pub id: String,
    /// Monotonic FIFO position.
    pub seq: i64,
    pub entity: String,
    pub entity_id: String,
    pub action: SyncAction,
    /// Serialized [`PayloadEnvelope`].
    pub payload: String,
    pub status: SyncStatus,
    pub retry_count: i64,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SyncQueueEntry {
    pub fn entity_kind(&self) -> Result<EntityKind, CoreError> {
        self.entity.parse()
    }

    pub fn is_pending(&self) -> bool {
        self.status == SyncStatus::Pending
    }
}

// =============================================================================
// Payload Union
// =============================================================================

/// Row identity for deletes; the remote only needs to know what went away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Tombstone {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
#[ts(export)]
pub enum SyncPayload {
    Company(CompanyProfile),
    Customer(Customer),
    CustomerAddress(CustomerAddress),
    Vendor(Vendor),
    Category(Category),
    Product(Product),
    Item(Item),
    Invoice(InvoiceWithItems),
    InvoiceItem(InvoiceItem),
    Payment(Payment),
    Deleted(Tombstone),
}

impl SyncPayload {
    pub fn deleted(id: impl Into<String>) -> Self {
        SyncPayload::Deleted(Tombstone { id: id.into() })
    }

    /// Wraps the payload with the current schema version.
    pub fn into_envelope(self) -> PayloadEnvelope {
        PayloadEnvelope {
            schema_version: PAYLOAD_SCHEMA_VERSION,
            body: self,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PayloadEnvelope {
    pub schema_version: u32,
    pub body: SyncPayload,
}

impl PayloadEnvelope {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> CompanyProfile {
        CompanyProfile {
            id: crate::COMPANY_ID.to_string(),
            name: "Corner Store".to_string(),
            email: None,
            phone: None,
            address: None,
            device_id: "device-1".to_string(),
            license_expiry: None,
            grace_until: None,
            last_sync_at: None,
            created_at: 1,
            updated_at: 1,
        }
    }

    #[test]
    fn test_envelope_is_tagged_and_versioned() {
        let json = SyncPayload::Company(profile()).into_envelope().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["schema_version"], 1);
        assert_eq!(value["body"]["kind"], "company");
        assert_eq!(value["body"]["data"]["name"], "Corner Store");
        assert!(!json.contains("pin"));
    }

    #[test]
    fn test_envelope_parses_back() {
        let envelope = SyncPayload::deleted("abc").into_envelope();
        let parsed = PayloadEnvelope::from_json(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn test_entity_kind_text() {
        assert_eq!(EntityKind::CustomerAddresses.as_str(), "customer_addresses");
        assert_eq!("invoices".parse::<EntityKind>().unwrap(), EntityKind::Invoices);
        assert!("carts".parse::<EntityKind>().is_err());
    }
}
