//! # Invoice Repository
//!
//! Invoices are the ledger's source of truth: totals, paid amounts and
//! status always follow the invoice's lines.
//!
//! ## Cart → Invoice
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  generate_invoice_from_cart(cart_id)          one transaction           │
//! │                                                                         │
//! │  1. load cart (NotFound / InvalidState when already closed)             │
//! │  2. INSERT invoices      (customer, cart total, status derived)         │
//! │  3. INSERT invoice_items (1:1 copy, same line order, paid 0, UNPAID)    │
//! │  4. UPDATE carts SET status = COMPLETED                                 │
//! │  5. enqueue invoices CREATE { invoice, items }                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Status Derivation
//! `recalc_invoice_status` re-sums the lines and derives PAID /
//! PARTIALLY_PAID / PENDING. CANCELLED is sticky, and PAYLATER survives
//! until the first money arrives.

use sqlx::SqliteConnection;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::cart::{fetch_cart, fetch_lines, write_status};
use crate::repository::catalog::ITEM_COLUMNS;
use crate::repository::sync::SyncQueueRepository;
use crate::repository::{new_id, Page};
use crate::store::Store;
use till_core::settlement::{invoice_totals, InvoiceTotals};
use till_core::sync::{EntityKind, SyncAction, SyncPayload};
use till_core::validation::{line_total, validate_price, validate_quantity};
use till_core::{
    CartStatus, FulfillmentStatus, Invoice, InvoiceItem, InvoiceStatus, InvoiceType, InvoiceWithItems, Item, Money,
    PaymentStatus, COMPANY_ID,
};

pub(crate) const INVOICE_COLUMNS: &str = "id, company_id, invoice_number, customer_id, vendor_id, cart_id, \
     date, due_date, status, type, total_amount, tax_amount, paid_amount, balance_amount, created_at, updated_at";
pub(crate) const INVOICE_ITEM_COLUMNS: &str = "id, invoice_id, item_id, product_id, line_no, quantity, price, \
     total, paid_amount, status, payment_status, tax_rate_id, created_at, updated_at";

// =============================================================================
// Inputs
// =============================================================================

/// One line of a directly created invoice.
#[derive(Debug, Clone, Default)]
pub struct NewInvoiceLine {
    pub item_id: String,
    pub quantity: i64,
    /// Defaults to the item's current price.
    pub price: Option<Money>,
}

/// An invoice created without a cart (purchase, expense, manual sale).
#[derive(Debug, Clone, Default)]
pub struct NewInvoice {
    pub customer_id: Option<String>,
    pub vendor_id: Option<String>,
    pub invoice_type: InvoiceType,
    pub due_date: Option<i64>,
    pub tax_amount: Money,
    pub lines: Vec<NewInvoiceLine>,
}

fn validate_line(line: &NewInvoiceLine) -> DbResult<()> {
    validate_quantity(line.quantity)?;
    if let Some(price) = line.price {
        validate_price(price)?;
    }
    Ok(())
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for invoices and invoice lines.
#[derive(Debug, Clone)]
pub struct InvoiceRepository {
    store: Store,
}

impl InvoiceRepository {
    /// Creates a new InvoiceRepository.
    pub fn new(store: Store) -> Self {
        InvoiceRepository { store }
    }

    /// Turns a cart into an invoice.
    ///
    /// ## Errors
    /// - `NotFound` if the cart does not exist
    /// - `InvalidState` if the cart was already completed or cancelled
    pub async fn generate_invoice_from_cart(&self, cart_id: &str) -> DbResult<InvoiceWithItems> {
        let now = self.store.now();
        let mut tx = self.store.begin().await?;
        let result = materialize_cart(&mut *tx, cart_id, now).await;
        self.store.finish("generate_invoice_from_cart", tx, result).await
    }

    /// Creates an invoice from explicit lines. Total is the sum of the lines.
    pub async fn create_invoice(&self, input: NewInvoice) -> DbResult<InvoiceWithItems> {
        for line in &input.lines {
            validate_line(line)?;
        }
        validate_price(input.tax_amount)?;

        let now = self.store.now();
        let mut tx = self.store.begin().await?;
        let result = insert_invoice_with_lines(&mut *tx, input, now).await;
        self.store.finish("create_invoice", tx, result).await
    }

    /// Appends a line and recomputes the invoice's totals and status.
    pub async fn add_invoice_item(&self, invoice_id: &str, line: NewInvoiceLine) -> DbResult<InvoiceWithItems> {
        validate_line(&line)?;

        let now = self.store.now();
        let mut tx = self.store.begin().await?;
        let result = append_line(&mut *tx, invoice_id, line, now).await;
        self.store.finish("add_invoice_item", tx, result).await
    }

    /// Marks the invoice CANCELLED. Lines and payments are left as they are.
    pub async fn cancel_invoice(&self, invoice_id: &str) -> DbResult<Invoice> {
        let now = self.store.now();
        let mut tx = self.store.begin().await?;
        let result = write_cancelled(&mut *tx, invoice_id, now).await;
        self.store.finish("cancel_invoice", tx, result).await
    }

    /// Defers settlement of an unpaid invoice.
    pub async fn mark_paylater(&self, invoice_id: &str) -> DbResult<Invoice> {
        let now = self.store.now();
        let mut tx = self.store.begin().await?;
        let result = write_paylater(&mut *tx, invoice_id, now).await;
        self.store.finish("mark_paylater", tx, result).await
    }

    /// Sets a line's fulfilment status. Payment state is not touched.
    pub async fn set_invoice_item_status(&self, line_id: &str, status: FulfillmentStatus) -> DbResult<InvoiceItem> {
        let now = self.store.now();
        let mut tx = self.store.begin().await?;
        let result = write_line_status(&mut *tx, line_id, status, now).await;
        self.store.finish("set_invoice_item_status", tx, result).await
    }

    pub async fn get_invoice(&self, invoice_id: &str) -> DbResult<Option<InvoiceWithItems>> {
        let mut conn = self.store.pool().acquire().await?;
        fetch_invoice_with_items(&mut *conn, invoice_id).await
    }

    /// Invoice headers, newest first.
    pub async fn list_invoices(&self, page: Page) -> DbResult<Vec<Invoice>> {
        page.validate()?;

        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices ORDER BY date DESC, rowid DESC LIMIT ?1 OFFSET ?2"
        ))
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(self.store.pool())
        .await?;

        Ok(invoices)
    }
}

// =============================================================================
// Shared Steps
// =============================================================================

pub(crate) async fn fetch_invoice(conn: &mut SqliteConnection, invoice_id: &str) -> DbResult<Option<Invoice>> {
    let invoice = sqlx::query_as::<_, Invoice>(&format!(
        "SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = ?1"
    ))
    .bind(invoice_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(invoice)
}

/// The invoice's lines in settlement order (`line_no`).
pub(crate) async fn fetch_invoice_items(conn: &mut SqliteConnection, invoice_id: &str) -> DbResult<Vec<InvoiceItem>> {
    let items = sqlx::query_as::<_, InvoiceItem>(&format!(
        "SELECT {INVOICE_ITEM_COLUMNS} FROM invoice_items WHERE invoice_id = ?1 ORDER BY line_no"
    ))
    .bind(invoice_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(items)
}

pub(crate) async fn fetch_invoice_with_items(
    conn: &mut SqliteConnection,
    invoice_id: &str,
) -> DbResult<Option<InvoiceWithItems>> {
    let Some(invoice) = fetch_invoice(conn, invoice_id).await? else {
        return Ok(None);
    };

    let items = fetch_invoice_items(conn, invoice_id).await?;
    Ok(Some(InvoiceWithItems { invoice, items }))
}

/// Re-sums the lines and writes total, paid, balance and status.
pub(crate) async fn recalc_invoice_status(
    conn: &mut SqliteConnection,
    invoice_id: &str,
    now: i64,
) -> DbResult<InvoiceTotals> {
    let current = fetch_invoice(conn, invoice_id)
        .await?
        .ok_or_else(|| DbError::not_found("Invoice", invoice_id))?;

    let lines: Vec<(Money, Money)> =
        sqlx::query_as("SELECT total, paid_amount FROM invoice_items WHERE invoice_id = ?1")
            .bind(invoice_id)
            .fetch_all(&mut *conn)
            .await?;

    let mut totals = invoice_totals(lines)?;
    totals.status = match (current.status, totals.status) {
        (InvoiceStatus::Cancelled, _) => InvoiceStatus::Cancelled,
        (InvoiceStatus::Paylater, InvoiceStatus::Pending) => InvoiceStatus::Paylater,
        (_, derived) => derived,
    };

    sqlx::query(
        r#"
        UPDATE invoices SET
            total_amount = ?2,
            paid_amount = ?3,
            balance_amount = ?4,
            status = ?5,
            updated_at = ?6
        WHERE id = ?1
        "#,
    )
    .bind(invoice_id)
    .bind(totals.total)
    .bind(totals.paid)
    .bind(totals.balance)
    .bind(totals.status)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    debug!(
        invoice_id = %invoice_id,
        total = %totals.total,
        paid = %totals.paid,
        status = %totals.status,
        "Invoice recalculated"
    );

    Ok(totals)
}

/// Enqueues the invoice header together with its current lines.
pub(crate) async fn enqueue_invoice(
    conn: &mut SqliteConnection,
    invoice_id: &str,
    action: SyncAction,
    now: i64,
) -> DbResult<InvoiceWithItems> {
    let invoice = fetch_invoice_with_items(conn, invoice_id)
        .await?
        .ok_or_else(|| DbError::not_found("Invoice", invoice_id))?;

    SyncQueueRepository::enqueue(
        conn,
        EntityKind::Invoices,
        invoice_id,
        action,
        SyncPayload::Invoice(invoice.clone()),
        now,
    )
    .await?;

    Ok(invoice)
}

fn invoice_number(now: i64) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("INV-{now}-{}", suffix[..8].to_uppercase())
}

// =============================================================================
// Transaction Steps
// =============================================================================

async fn materialize_cart(conn: &mut SqliteConnection, cart_id: &str, now: i64) -> DbResult<InvoiceWithItems> {
    let cart = fetch_cart(conn, cart_id)
        .await?
        .ok_or_else(|| DbError::not_found("Cart", cart_id))?;

    if matches!(cart.status, CartStatus::Completed | CartStatus::Cancelled) {
        return Err(DbError::invalid_state("Cart", cart_id, cart.status));
    }

    let lines = fetch_lines(conn, cart_id).await?;
    let totals = invoice_totals(lines.iter().map(|line| (line.total, Money::zero())))?;

    let invoice = Invoice {
        id: new_id(),
        company_id: cart.company_id.clone(),
        invoice_number: invoice_number(now),
        customer_id: cart.customer_id.clone(),
        vendor_id: None,
        cart_id: Some(cart.id.clone()),
        date: now,
        due_date: None,
        status: totals.status,
        invoice_type: InvoiceType::Pos,
        total_amount: cart.total_amount,
        tax_amount: Money::zero(),
        paid_amount: Money::zero(),
        balance_amount: cart.total_amount,
        created_at: now,
        updated_at: now,
    };
    insert_invoice(conn, &invoice).await?;

    for line in &lines {
        let item = InvoiceItem {
            id: new_id(),
            invoice_id: invoice.id.clone(),
            item_id: line.item_id.clone(),
            product_id: line.product_id.clone(),
            line_no: line.line_no,
            quantity: line.quantity,
            price: line.price,
            total: line.total,
            paid_amount: Money::zero(),
            status: FulfillmentStatus::Ordered,
            payment_status: PaymentStatus::Unpaid,
            tax_rate_id: line.tax_rate_id.clone(),
            created_at: now,
            updated_at: now,
        };
        insert_invoice_item(conn, &item).await?;
    }

    write_status(conn, cart_id, CartStatus::Completed, now).await?;

    let created = enqueue_invoice(conn, &invoice.id, SyncAction::Create, now).await?;
    info!(
        invoice_id = %invoice.id,
        cart_id = %cart_id,
        lines = created.items.len(),
        total = %invoice.total_amount,
        "Invoice generated from cart"
    );

    Ok(created)
}

async fn insert_invoice_with_lines(
    conn: &mut SqliteConnection,
    input: NewInvoice,
    now: i64,
) -> DbResult<InvoiceWithItems> {
    let invoice = Invoice {
        id: new_id(),
        company_id: COMPANY_ID.to_string(),
        invoice_number: invoice_number(now),
        customer_id: input.customer_id,
        vendor_id: input.vendor_id,
        cart_id: None,
        date: now,
        due_date: input.due_date,
        status: InvoiceStatus::Pending,
        invoice_type: input.invoice_type,
        total_amount: Money::zero(),
        tax_amount: input.tax_amount,
        paid_amount: Money::zero(),
        balance_amount: Money::zero(),
        created_at: now,
        updated_at: now,
    };
    insert_invoice(conn, &invoice).await?;

    for (index, line) in input.lines.into_iter().enumerate() {
        let item = line_from_catalog(conn, &invoice.id, index as i64 + 1, line, now).await?;
        insert_invoice_item(conn, &item).await?;
    }

    recalc_invoice_status(conn, &invoice.id, now).await?;
    enqueue_invoice(conn, &invoice.id, SyncAction::Create, now).await
}

async fn append_line(
    conn: &mut SqliteConnection,
    invoice_id: &str,
    line: NewInvoiceLine,
    now: i64,
) -> DbResult<InvoiceWithItems> {
    let invoice = fetch_invoice(conn, invoice_id)
        .await?
        .ok_or_else(|| DbError::not_found("Invoice", invoice_id))?;

    if invoice.status == InvoiceStatus::Cancelled {
        return Err(DbError::invalid_state("Invoice", invoice_id, invoice.status));
    }

    let last_line: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(line_no), 0) FROM invoice_items WHERE invoice_id = ?1")
        .bind(invoice_id)
        .fetch_one(&mut *conn)
        .await?;

    let item = line_from_catalog(conn, invoice_id, last_line + 1, line, now).await?;
    insert_invoice_item(conn, &item).await?;

    recalc_invoice_status(conn, invoice_id, now).await?;
    enqueue_invoice(conn, invoice_id, SyncAction::Update, now).await
}

/// Builds an unpaid line for `line.item_id`, priced from the catalog unless
/// the caller gave a price.
async fn line_from_catalog(
    conn: &mut SqliteConnection,
    invoice_id: &str,
    line_no: i64,
    line: NewInvoiceLine,
    now: i64,
) -> DbResult<InvoiceItem> {
    let item = sqlx::query_as::<_, Item>(&format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1"))
        .bind(&line.item_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::not_found("Item", &line.item_id))?;

    let price = line.price.unwrap_or(item.price);
    Ok(InvoiceItem {
        id: new_id(),
        invoice_id: invoice_id.to_string(),
        item_id: item.id,
        product_id: item.product_id,
        line_no,
        quantity: line.quantity,
        price,
        total: line_total(price, line.quantity)?,
        paid_amount: Money::zero(),
        status: FulfillmentStatus::Ordered,
        payment_status: PaymentStatus::Unpaid,
        tax_rate_id: item.tax_rate_id,
        created_at: now,
        updated_at: now,
    })
}

async fn insert_invoice(conn: &mut SqliteConnection, invoice: &Invoice) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO invoices (
            id, company_id, invoice_number, customer_id, vendor_id, cart_id,
            date, due_date, status, type, total_amount, tax_amount,
            paid_amount, balance_amount, created_at, updated_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6,
            ?7, ?8, ?9, ?10, ?11, ?12,
            ?13, ?14, ?15, ?16
        )
        "#,
    )
    .bind(&invoice.id)
    .bind(&invoice.company_id)
    .bind(&invoice.invoice_number)
    .bind(&invoice.customer_id)
    .bind(&invoice.vendor_id)
    .bind(&invoice.cart_id)
    .bind(invoice.date)
    .bind(invoice.due_date)
    .bind(invoice.status)
    .bind(invoice.invoice_type)
    .bind(invoice.total_amount)
    .bind(invoice.tax_amount)
    .bind(invoice.paid_amount)
    .bind(invoice.balance_amount)
    .bind(invoice.created_at)
    .bind(invoice.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn insert_invoice_item(conn: &mut SqliteConnection, item: &InvoiceItem) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO invoice_items (
            id, invoice_id, item_id, product_id, line_no, quantity, price,
            total, paid_amount, status, payment_status, tax_rate_id,
            created_at, updated_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7,
            ?8, ?9, ?10, ?11, ?12,
            ?13, ?14
        )
        "#,
    )
    .bind(&item.id)
    .bind(&item.invoice_id)
    .bind(&item.item_id)
    .bind(&item.product_id)
    .bind(item.line_no)
    .bind(item.quantity)
    .bind(item.price)
    .bind(item.total)
    .bind(item.paid_amount)
    .bind(item.status)
    .bind(item.payment_status)
    .bind(&item.tax_rate_id)
    .bind(item.created_at)
    .bind(item.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn write_invoice_status(
    conn: &mut SqliteConnection,
    invoice_id: &str,
    status: InvoiceStatus,
    now: i64,
) -> DbResult<Invoice> {
    sqlx::query("UPDATE invoices SET status = ?2, updated_at = ?3 WHERE id = ?1")
        .bind(invoice_id)
        .bind(status)
        .bind(now)
        .execute(&mut *conn)
        .await?;

    let updated = enqueue_invoice(conn, invoice_id, SyncAction::Update, now).await?;
    Ok(updated.invoice)
}

async fn write_cancelled(conn: &mut SqliteConnection, invoice_id: &str, now: i64) -> DbResult<Invoice> {
    let invoice = fetch_invoice(conn, invoice_id)
        .await?
        .ok_or_else(|| DbError::not_found("Invoice", invoice_id))?;

    if invoice.status == InvoiceStatus::Cancelled {
        return Err(DbError::invalid_state("Invoice", invoice_id, invoice.status));
    }

    info!(invoice_id = %invoice_id, paid = %invoice.paid_amount, "Cancelling invoice");
    write_invoice_status(conn, invoice_id, InvoiceStatus::Cancelled, now).await
}

async fn write_paylater(conn: &mut SqliteConnection, invoice_id: &str, now: i64) -> DbResult<Invoice> {
    let invoice = fetch_invoice(conn, invoice_id)
        .await?
        .ok_or_else(|| DbError::not_found("Invoice", invoice_id))?;

    if invoice.status != InvoiceStatus::Pending {
        return Err(DbError::invalid_state("Invoice", invoice_id, invoice.status));
    }

    write_invoice_status(conn, invoice_id, InvoiceStatus::Paylater, now).await
}

async fn write_line_status(
    conn: &mut SqliteConnection,
    line_id: &str,
    status: FulfillmentStatus,
    now: i64,
) -> DbResult<InvoiceItem> {
    let item = sqlx::query_as::<_, InvoiceItem>(&format!(
        "UPDATE invoice_items SET status = ?2, updated_at = ?3 WHERE id = ?1 RETURNING {INVOICE_ITEM_COLUMNS}"
    ))
    .bind(line_id)
    .bind(status)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| DbError::not_found("InvoiceItem", line_id))?;

    SyncQueueRepository::enqueue(
        conn,
        EntityKind::InvoiceItems,
        line_id,
        SyncAction::Update,
        SyncPayload::InvoiceItem(item.clone()),
        now,
    )
    .await?;

    Ok(item)
}

// =============================================================================
// Unit Tests
// =============================================================================
