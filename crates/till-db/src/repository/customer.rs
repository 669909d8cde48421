//! # Customer Repository
//!
//! Customers, their postal addresses, and vendors (the purchase-side party).
//!
//! ## Default Address Rule
//! ```text
//! add_address(is_default = true)  /  set_default_address(id)
//!      │
//!      ├── UPDATE customer_addresses SET is_default = 0 WHERE customer_id = ?
//!      └── INSERT / UPDATE the chosen row with is_default = 1
//!
//! Both steps share one transaction, so a customer never ends up with two
//! default addresses.
//! ```

use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::sync::SyncQueueRepository;
use crate::repository::{clean, new_id, Page};
use crate::store::Store;
use till_core::sync::{EntityKind, SyncAction, SyncPayload};
use till_core::validation::{validate_email, validate_gstin, validate_name, validate_search_query};
use till_core::{Customer, CustomerAddress, Vendor, COMPANY_ID};

const CUSTOMER_COLUMNS: &str = "id, company_id, name, email, phone, gstin, created_at, updated_at";
const ADDRESS_COLUMNS: &str = "id, customer_id, address_line1, address_line2, address_line3, \
                               city, state, country, pincode, is_default, created_at, updated_at";
const VENDOR_COLUMNS: &str = "id, company_id, name, email, phone, address, gstin, created_at, updated_at";

// =============================================================================
// Inputs
// =============================================================================

/// Customer fields for create and update.
#[derive(Debug, Clone, Default)]
pub struct NewCustomer {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub gstin: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewAddress {
    pub address_line1: String,
    pub address_line2: Option<String>,
    pub address_line3: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub pincode: Option<String>,
    pub is_default: bool,
}

/// Vendor fields for create and update.
#[derive(Debug, Clone, Default)]
pub struct NewVendor {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub gstin: Option<String>,
}

fn validate_party(name: &str, email: Option<&str>, gstin: Option<&str>) -> DbResult<()> {
    validate_name("name", name, 200)?;
    if let Some(email) = email.filter(|e| !e.trim().is_empty()) {
        validate_email(email)?;
    }
    if let Some(gstin) = gstin.map(str::trim).filter(|g| !g.is_empty()) {
        validate_gstin(gstin)?;
    }
    Ok(())
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for customers, addresses and vendors.
#[derive(Debug, Clone)]
pub struct CustomerRepository {
    store: Store,
}

impl CustomerRepository {
    /// Creates a new CustomerRepository.
    pub fn new(store: Store) -> Self {
        CustomerRepository { store }
    }

    // -------------------------------------------------------------------------
    // Customers
    // -------------------------------------------------------------------------

    /// Creates a customer and enqueues a `customers` CREATE.
    pub async fn create_customer(&self, input: NewCustomer) -> DbResult<Customer> {
        validate_party(&input.name, input.email.as_deref(), input.gstin.as_deref())?;

        let now = self.store.now();
        let customer = Customer {
            id: new_id(),
            company_id: COMPANY_ID.to_string(),
            name: input.name.trim().to_string(),
            email: clean(input.email),
            phone: clean(input.phone),
            gstin: clean(input.gstin),
            created_at: now,
            updated_at: now,
        };

        debug!(id = %customer.id, "Creating customer");

        let mut tx = self.store.begin().await?;
        let result = insert_customer(&mut *tx, &customer).await;
        self.store.finish("create_customer", tx, result.map(|()| customer)).await
    }

    /// Gets a customer by ID.
    pub async fn get_customer(&self, id: &str) -> DbResult<Option<Customer>> {
        let customer = sqlx::query_as::<_, Customer>(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(self.store.pool())
        .await?;

        Ok(customer)
    }

    /// Lists customers by name, optionally matching name / phone / email.
    pub async fn list_customers(&self, search: Option<&str>, page: Page) -> DbResult<Vec<Customer>> {
        page.validate()?;
        let pattern = match search {
            Some(query) => validate_search_query(query)?.map(|q| format!("%{q}%")),
            None => None,
        };

        let customers = sqlx::query_as::<_, Customer>(&format!(
            r#"
            SELECT {CUSTOMER_COLUMNS} FROM customers
            WHERE ?1 IS NULL OR name LIKE ?1 OR phone LIKE ?1 OR email LIKE ?1
            ORDER BY name COLLATE NOCASE, id
            LIMIT ?2 OFFSET ?3
            "#
        ))
        .bind(pattern)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(self.store.pool())
        .await?;

        Ok(customers)
    }

    /// Replaces a customer's fields and enqueues a `customers` UPDATE.
    pub async fn update_customer(&self, id: &str, input: NewCustomer) -> DbResult<Customer> {
        validate_party(&input.name, input.email.as_deref(), input.gstin.as_deref())?;

        let now = self.store.now();
        let mut tx = self.store.begin().await?;
        let result = update_customer_row(&mut *tx, id, input, now).await;
        self.store.finish("update_customer", tx, result).await
    }

    /// Deletes a customer (addresses cascade) and enqueues a DELETE.
    ///
    /// Invoices, carts and payments keep their rows with the customer cleared.
    pub async fn delete_customer(&self, id: &str) -> DbResult<()> {
        let now = self.store.now();
        let mut tx = self.store.begin().await?;
        let result = delete_row(&mut *tx, EntityKind::Customers, "Customer", id, now).await;
        self.store.finish("delete_customer", tx, result).await
    }

    // -------------------------------------------------------------------------
    // Addresses
    // -------------------------------------------------------------------------

    /// Adds an address. A default address demotes every other address of the
    /// customer first.
    pub async fn add_address(&self, customer_id: &str, input: NewAddress) -> DbResult<CustomerAddress> {
        validate_name("address_line1", &input.address_line1, 500)?;

        let now = self.store.now();
        let address = CustomerAddress {
            id: new_id(),
            customer_id: customer_id.to_string(),
            address_line1: input.address_line1.trim().to_string(),
            address_line2: clean(input.address_line2),
            address_line3: clean(input.address_line3),
            city: clean(input.city),
            state: clean(input.state),
            country: clean(input.country),
            pincode: clean(input.pincode),
            is_default: input.is_default,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.store.begin().await?;
        let result = insert_address(&mut *tx, &address).await;
        self.store.finish("add_address", tx, result.map(|()| address)).await
    }

    /// Makes one address the customer's only default.
    pub async fn set_default_address(&self, address_id: &str) -> DbResult<CustomerAddress> {
        let now = self.store.now();
        let mut tx = self.store.begin().await?;
        let result = promote_address(&mut *tx, address_id, now).await;
        self.store.finish("set_default_address", tx, result).await
    }

    /// Lists a customer's addresses, default first.
    pub async fn list_addresses(&self, customer_id: &str) -> DbResult<Vec<CustomerAddress>> {
        let addresses = sqlx::query_as::<_, CustomerAddress>(&format!(
            "SELECT {ADDRESS_COLUMNS} FROM customer_addresses WHERE customer_id = ?1 \
             ORDER BY is_default DESC, created_at, id"
        ))
        .bind(customer_id)
        .fetch_all(self.store.pool())
        .await?;

        Ok(addresses)
    }

    pub async fn delete_address(&self, address_id: &str) -> DbResult<()> {
        let now = self.store.now();
        let mut tx = self.store.begin().await?;
        let result = delete_row(&mut *tx, EntityKind::CustomerAddresses, "CustomerAddress", address_id, now).await;
        self.store.finish("delete_address", tx, result).await
    }

    // -------------------------------------------------------------------------
    // Vendors
    // -------------------------------------------------------------------------

    /// Creates a vendor and enqueues a `vendors` CREATE.
    pub async fn create_vendor(&self, input: NewVendor) -> DbResult<Vendor> {
        validate_party(&input.name, input.email.as_deref(), input.gstin.as_deref())?;

        let now = self.store.now();
        let vendor = Vendor {
            id: new_id(),
            company_id: COMPANY_ID.to_string(),
            name: input.name.trim().to_string(),
            email: clean(input.email),
            phone: clean(input.phone),
            address: clean(input.address),
            gstin: clean(input.gstin),
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.store.begin().await?;
        let result = insert_vendor(&mut *tx, &vendor).await;
        self.store.finish("create_vendor", tx, result.map(|()| vendor)).await
    }

    pub async fn get_vendor(&self, id: &str) -> DbResult<Option<Vendor>> {
        let vendor = sqlx::query_as::<_, Vendor>(&format!("SELECT {VENDOR_COLUMNS} FROM vendors WHERE id = ?1"))
            .bind(id)
            .fetch_optional(self.store.pool())
            .await?;

        Ok(vendor)
    }

    pub async fn list_vendors(&self, page: Page) -> DbResult<Vec<Vendor>> {
        page.validate()?;

        let vendors = sqlx::query_as::<_, Vendor>(&format!(
            "SELECT {VENDOR_COLUMNS} FROM vendors ORDER BY name COLLATE NOCASE, id LIMIT ?1 OFFSET ?2"
        ))
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(self.store.pool())
        .await?;

        Ok(vendors)
    }

    /// Replaces a vendor's fields and enqueues a `vendors` UPDATE.
    pub async fn update_vendor(&self, id: &str, input: NewVendor) -> DbResult<Vendor> {
        validate_party(&input.name, input.email.as_deref(), input.gstin.as_deref())?;

        let now = self.store.now();
        let mut tx = self.store.begin().await?;
        let result = update_vendor_row(&mut *tx, id, input, now).await;
        self.store.finish("update_vendor", tx, result).await
    }

    pub async fn delete_vendor(&self, id: &str) -> DbResult<()> {
        let now = self.store.now();
        let mut tx = self.store.begin().await?;
        let result = delete_row(&mut *tx, EntityKind::Vendors, "Vendor", id, now).await;
        self.store.finish("delete_vendor", tx, result).await
    }
}

// =============================================================================
// Transaction Steps
// =============================================================================

async fn insert_customer(conn: &mut SqliteConnection, customer: &Customer) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO customers (id, company_id, name, email, phone, gstin, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(&customer.id)
    .bind(&customer.company_id)
    .bind(&customer.name)
    .bind(&customer.email)
    .bind(&customer.phone)
    .bind(&customer.gstin)
    .bind(customer.created_at)
    .bind(customer.updated_at)
    .execute(&mut *conn)
    .await?;

    SyncQueueRepository::enqueue(
        conn,
        EntityKind::Customers,
        &customer.id,
        SyncAction::Create,
        SyncPayload::Customer(customer.clone()),
        customer.created_at,
    )
    .await?;

    Ok(())
}

async fn update_customer_row(
    conn: &mut SqliteConnection,
    id: &str,
    input: NewCustomer,
    now: i64,
) -> DbResult<Customer> {
    let customer = sqlx::query_as::<_, Customer>(&format!(
        r#"
        UPDATE customers SET
            name = ?2,
            email = ?3,
            phone = ?4,
            gstin = ?5,
            updated_at = ?6
        WHERE id = ?1
        RETURNING {CUSTOMER_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(input.name.trim())
    .bind(clean(input.email))
    .bind(clean(input.phone))
    .bind(clean(input.gstin))
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| DbError::not_found("Customer", id))?;

    SyncQueueRepository::enqueue(
        conn,
        EntityKind::Customers,
        id,
        SyncAction::Update,
        SyncPayload::Customer(customer.clone()),
        now,
    )
    .await?;

    Ok(customer)
}

async fn insert_address(conn: &mut SqliteConnection, address: &CustomerAddress) -> DbResult<()> {
    let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM customers WHERE id = ?1")
        .bind(&address.customer_id)
        .fetch_optional(&mut *conn)
        .await?;
    if exists.is_none() {
        return Err(DbError::not_found("Customer", &address.customer_id));
    }

    if address.is_default {
        clear_defaults(conn, &address.customer_id, address.created_at).await?;
    }

    sqlx::query(
        r#"
        INSERT INTO customer_addresses (
            id, customer_id, address_line1, address_line2, address_line3,
            city, state, country, pincode, is_default, created_at, updated_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5,
            ?6, ?7, ?8, ?9, ?10, ?11, ?12
        )
        "#,
    )
    .bind(&address.id)
    .bind(&address.customer_id)
    .bind(&address.address_line1)
    .bind(&address.address_line2)
    .bind(&address.address_line3)
    .bind(&address.city)
    .bind(&address.state)
    .bind(&address.country)
    .bind(&address.pincode)
    .bind(address.is_default)
    .bind(address.created_at)
    .bind(address.updated_at)
    .execute(&mut *conn)
    .await?;

    SyncQueueRepository::enqueue(
        conn,
        EntityKind::CustomerAddresses,
        &address.id,
        SyncAction::Create,
        SyncPayload::CustomerAddress(address.clone()),
        address.created_at,
    )
    .await?;

    Ok(())
}

async fn promote_address(conn: &mut SqliteConnection, address_id: &str, now: i64) -> DbResult<CustomerAddress> {
    let customer_id: String = sqlx::query_scalar("SELECT customer_id FROM customer_addresses WHERE id = ?1")
        .bind(address_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::not_found("CustomerAddress", address_id))?;

    clear_defaults(conn, &customer_id, now).await?;

    let address = sqlx::query_as::<_, CustomerAddress>(&format!(
        "UPDATE customer_addresses SET is_default = 1, updated_at = ?2 WHERE id = ?1 RETURNING {ADDRESS_COLUMNS}"
    ))
    .bind(address_id)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    SyncQueueRepository::enqueue(
        conn,
        EntityKind::CustomerAddresses,
        address_id,
        SyncAction::Update,
        SyncPayload::CustomerAddress(address.clone()),
        now,
    )
    .await?;

    Ok(address)
}

async fn clear_defaults(conn: &mut SqliteConnection, customer_id: &str, now: i64) -> DbResult<()> {
    sqlx::query(
        "UPDATE customer_addresses SET is_default = 0, updated_at = ?2 \
         WHERE customer_id = ?1 AND is_default = 1",
    )
    .bind(customer_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn insert_vendor(conn: &mut SqliteConnection, vendor: &Vendor) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO vendors (id, company_id, name, email, phone, address, gstin, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )
    .bind(&vendor.id)
    .bind(&vendor.company_id)
    .bind(&vendor.name)
    .bind(&vendor.email)
    .bind(&vendor.phone)
    .bind(&vendor.address)
    .bind(&vendor.gstin)
    .bind(vendor.created_at)
    .bind(vendor.updated_at)
    .execute(&mut *conn)
    .await?;

    SyncQueueRepository::enqueue(
        conn,
        EntityKind::Vendors,
        &vendor.id,
        SyncAction::Create,
        SyncPayload::Vendor(vendor.clone()),
        vendor.created_at,
    )
    .await?;

    Ok(())
}

async fn update_vendor_row(conn: &mut SqliteConnection, id: &str, input: NewVendor, now: i64) -> DbResult<Vendor> {
    let vendor = sqlx::query_as::<_, Vendor>(&format!(
        r#"
        UPDATE vendors SET
            name = ?2,
            email = ?3,
            phone = ?4,
            address = ?5,
            gstin = ?6,
            updated_at = ?7
        WHERE id = ?1
        RETURNING {VENDOR_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(input.name.trim())
    .bind(clean(input.email))
    .bind(clean(input.phone))
    .bind(clean(input.address))
    .bind(clean(input.gstin))
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| DbError::not_found("Vendor", id))?;

    SyncQueueRepository::enqueue(
        conn,
        EntityKind::Vendors,
        id,
        SyncAction::Update,
        SyncPayload::Vendor(vendor.clone()),
        now,
    )
    .await?;

    Ok(vendor)
}

/// Deletes one row of a synced table and queues its tombstone.
pub(crate) async fn delete_row(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    entity: &str,
    id: &str,
    now: i64,
) -> DbResult<()> {
    let result = sqlx::query(&format!("DELETE FROM {} WHERE id = ?1", kind.as_str()))
        .bind(id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found(entity, id));
    }

    debug!(entity = %kind, id = %id, "Deleted row");

    SyncQueueRepository::enqueue(conn, kind, id, SyncAction::Delete, SyncPayload::deleted(id), now).await?;
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{outbox, seed_customer, seeded_store, T0};

    fn address(line: &str, is_default: bool) -> NewAddress {
        NewAddress {
            address_line1: line.to_string(),
            city: Some("Bengaluru".to_string()),
            pincode: Some("560001".to_string()),
            is_default,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_and_get_customer() {
        let ctx = seeded_store().await;
        let customer = seed_customer(&ctx.store, "Ravi Kumar").await;

        let loaded = ctx.store.customers().get_customer(&customer.id).await.unwrap().unwrap();
        assert_eq!(loaded, customer);
        assert_eq!(loaded.created_at, T0);
        assert_eq!(loaded.company_id, COMPANY_ID);

        let entries = outbox(&ctx.store).await;
        let last = entries.last().unwrap();
        assert_eq!(last.entity, "customers");
        assert_eq!(last.entity_id, customer.id);
        assert_eq!(last.action, SyncAction::Create);
    }

    #[tokio::test]
    async fn test_create_customer_requires_company() {
        let ctx = crate::test_support::test_store().await;
        let err = ctx
            .store
            .customers()
            .create_customer(NewCustomer {
                name: "Ravi".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err.root_cause(), DbError::ForeignKeyViolation { .. }));
        assert!(outbox(&ctx.store).await.is_empty());
    }

    #[tokio::test]
    async fn test_blank_name_rejected() {
        let ctx = seeded_store().await;
        let err = ctx
            .store
            .customers()
            .create_customer(NewCustomer {
                name: "  ".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Validation(_)));
    }

    #[tokio::test]
    async fn test_malformed_gstin_rejected() {
        let ctx = seeded_store().await;
        let repo = ctx.store.customers();
        let before = outbox(&ctx.store).await.len();

        let err = repo
            .create_customer(NewCustomer {
                name: "Asha".to_string(),
                gstin: Some("29abcde1234f1z5".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Validation(_)));

        let err = repo
            .create_vendor(NewVendor {
                name: "Fresh Farms".to_string(),
                gstin: Some("GST-123".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Validation(_)));
        assert_eq!(outbox(&ctx.store).await.len(), before);

        let customer = repo
            .create_customer(NewCustomer {
                name: "Asha".to_string(),
                gstin: Some(" 29ABCDE1234F1Z5 ".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(customer.gstin.as_deref(), Some("29ABCDE1234F1Z5"));
    }

    #[tokio::test]
    async fn test_only_one_default_address() {
        let ctx = seeded_store().await;
        let customer = seed_customer(&ctx.store, "Ravi").await;
        let repo = ctx.store.customers();

        let home = repo.add_address(&customer.id, address("1 MG Road", true)).await.unwrap();
        let office = repo.add_address(&customer.id, address("9 Brigade Rd", true)).await.unwrap();
        repo.add_address(&customer.id, address("Warehouse", false)).await.unwrap();

        let addresses = repo.list_addresses(&customer.id).await.unwrap();
        let defaults: Vec<&str> = addresses
            .iter()
            .filter(|a| a.is_default)
            .map(|a| a.id.as_str())
            .collect();
        assert_eq!(defaults, vec![office.id.as_str()]);

        repo.set_default_address(&home.id).await.unwrap();
        let addresses = repo.list_addresses(&customer.id).await.unwrap();
        assert_eq!(addresses[0].id, home.id);
        assert_eq!(addresses.iter().filter(|a| a.is_default).count(), 1);
    }

    #[tokio::test]
    async fn test_address_for_unknown_customer() {
        let ctx = seeded_store().await;
        let err = ctx
            .store
            .customers()
            .add_address("missing", address("x", false))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_update_and_delete_customer() {
        let ctx = seeded_store().await;
        let customer = seed_customer(&ctx.store, "Ravi").await;
        let repo = ctx.store.customers();
        ctx.clock.advance(10);

        let updated = repo
            .update_customer(
                &customer.id,
                NewCustomer {
                    name: "Ravi K".to_string(),
                    gstin: Some("29ABCDE1234F1Z5".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Ravi K");
        assert_eq!(updated.phone, None);
        assert_eq!(updated.updated_at, T0 + 10);

        repo.delete_customer(&customer.id).await.unwrap();
        assert!(repo.get_customer(&customer.id).await.unwrap().is_none());

        let history = ctx
            .store
            .sync_queue()
            .history(EntityKind::Customers, &customer.id)
            .await
            .unwrap();
        let actions: Vec<SyncAction> = history.iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![SyncAction::Create, SyncAction::Update, SyncAction::Delete]);

        let err = repo.delete_customer(&customer.id).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_customers_search_and_page() {
        let ctx = seeded_store().await;
        for name in ["Asha", "Bala", "Chitra"] {
            seed_customer(&ctx.store, name).await;
        }
        let repo = ctx.store.customers();

        let found = repo.list_customers(Some("hit"), Page::default()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Chitra");

        let second_page = repo.list_customers(None, Page::new(2, 2)).await.unwrap();
        assert_eq!(second_page.len(), 1);

        assert!(repo.list_customers(None, Page::new(0, 0)).await.is_err());
    }

    #[tokio::test]
    async fn test_vendor_lifecycle() {
        let ctx = seeded_store().await;
        let repo = ctx.store.customers();

        let vendor = repo
            .create_vendor(NewVendor {
                name: "Fresh Farms".to_string(),
                email: Some("sales@freshfarms.in".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let updated = repo
            .update_vendor(
                &vendor.id,
                NewVendor {
                    name: "Fresh Farms Pvt".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.email, None);
        assert_eq!(repo.list_vendors(Page::default()).await.unwrap().len(), 1);

        repo.delete_vendor(&vendor.id).await.unwrap();
        assert!(repo.get_vendor(&vendor.id).await.unwrap().is_none());

        let history = ctx.store.sync_queue().history(EntityKind::Vendors, &vendor.id).await.unwrap();
        assert_eq!(history.len(), 3);
    }
}
