//! # Payment Repository
//!
//! Records payments and settles them against invoice lines.
//!
//! ## Payment Flow
//! ```text
//! create_payment(NewPayment)                     one transaction
//!   │
//!   ├── INSERT payments
//!   ├── enqueue payments CREATE
//!   └── invoice_id given?
//!         ├── no  ──► done (ADVANCE stays on the customer's account)
//!         └── yes ──► apply_payment_to_invoice
//!                       ├── allocate over lines by line_no (greedy)
//!                       ├── UPDATE invoice_items paid_amount / payment_status
//!                       ├── recalc_invoice_status
//!                       └── enqueue invoices UPDATE { invoice, items }
//! ```
//!
//! Overpayment is absorbed: it is neither refunded nor credited, only
//! reported back as `unapplied`.

use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};
use ts_rs::TS;

use crate::error::{DbError, DbResult};
use crate::repository::invoice::{enqueue_invoice, fetch_invoice, fetch_invoice_items, recalc_invoice_status};
use crate::repository::sync::SyncQueueRepository;
use crate::repository::{clean, new_id, Page};
use crate::store::Store;
use till_core::settlement::{allocate, InvoiceTotals, LineBalance};
use till_core::sync::{EntityKind, SyncAction, SyncPayload};
use till_core::validation::validate_payment_amount;
use till_core::{InvoiceStatus, Money, Payment, PaymentMethod, PaymentType, COMPANY_ID};

const PAYMENT_COLUMNS: &str = "id, company_id, invoice_id, customer_id, amount, method, type, reference_no, \
     gateway_payment_id, raw_response, note, date, created_at, updated_at";

// =============================================================================
// Inputs / Outputs
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct NewPayment {
    /// `None` records an unattached payment (typically an advance).
    pub invoice_id: Option<String>,
    /// Defaults to the invoice's customer when an invoice is given.
    pub customer_id: Option<String>,
    pub amount: Money,
    pub method: PaymentMethod,
    pub payment_type: PaymentType,
    pub reference_no: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub raw_response: Option<String>,
    pub note: Option<String>,
}

/// What one payment did to an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentApplication {
    pub invoice_id: String,
    pub applied: Money,
    /// Overpayment left after every line was settled.
    pub unapplied: Money,
    pub totals: InvoiceTotals,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentReceipt {
    pub payment: Payment,
    /// Present when the payment was attached to an invoice.
    pub application: Option<PaymentApplication>,
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for payments.
#[derive(Debug, Clone)]
pub struct PaymentRepository {
    store: Store,
}

impl PaymentRepository {
    /// Creates a new PaymentRepository.
    pub fn new(store: Store) -> Self {
        PaymentRepository { store }
    }

    /// Records a payment and, when it names an invoice, settles it.
    ///
    /// ## Errors
    /// - `Validation` for a non-positive amount
    /// - `NotFound` if the invoice does not exist
    /// - `InvalidState` if the invoice is CANCELLED
    pub async fn create_payment(&self, input: NewPayment) -> DbResult<PaymentReceipt> {
        validate_payment_amount(input.amount)?;

        let now = self.store.now();
        let mut tx = self.store.begin().await?;
        let result = insert_payment(&mut *tx, input, now).await;
        self.store.finish("create_payment", tx, result).await
    }

    /// Applies `amount` to the invoice's lines without recording a payment
    /// row.
    pub async fn apply_payment_to_invoice(&self, invoice_id: &str, amount: Money) -> DbResult<PaymentApplication> {
        validate_payment_amount(amount)?;

        let now = self.store.now();
        let mut tx = self.store.begin().await?;
        let result = settle_invoice(&mut *tx, invoice_id, amount, now).await;
        self.store.finish("apply_payment_to_invoice", tx, result).await
    }

    /// Sum of the customer's ADVANCE payments. Advances are never applied
    /// automatically.
    pub async fn get_customer_advance_balance(&self, customer_id: &str) -> DbResult<Money> {
        let balance: Money =
            sqlx::query_scalar("SELECT COALESCE(SUM(amount), 0) FROM payments WHERE customer_id = ?1 AND type = ?2")
                .bind(customer_id)
                .bind(PaymentType::Advance)
                .fetch_one(self.store.pool())
                .await?;

        Ok(balance)
    }

    pub async fn get_payment(&self, id: &str) -> DbResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(&format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?1"))
            .bind(id)
            .fetch_optional(self.store.pool())
            .await?;

        Ok(payment)
    }

    /// Payments recorded against one invoice, oldest first.
    pub async fn list_invoice_payments(&self, invoice_id: &str) -> DbResult<Vec<Payment>> {
        let payments = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE invoice_id = ?1 ORDER BY date, rowid"
        ))
        .bind(invoice_id)
        .fetch_all(self.store.pool())
        .await?;

        Ok(payments)
    }

    /// All payments, newest first.
    pub async fn list_payments(&self, page: Page) -> DbResult<Vec<Payment>> {
        page.validate()?;

        let payments = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments ORDER BY date DESC, rowid DESC LIMIT ?1 OFFSET ?2"
        ))
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(self.store.pool())
        .await?;

        Ok(payments)
    }
}

// =============================================================================
// Transaction Steps
// =============================================================================

async fn insert_payment(conn: &mut SqliteConnection, input: NewPayment, now: i64) -> DbResult<PaymentReceipt> {
    let mut customer_id = input.customer_id;
    if let Some(invoice_id) = input.invoice_id.as_deref() {
        let invoice = fetch_invoice(conn, invoice_id)
            .await?
            .ok_or_else(|| DbError::not_found("Invoice", invoice_id))?;
        customer_id = customer_id.or(invoice.customer_id);
    }

    let payment = Payment {
        id: new_id(),
        company_id: COMPANY_ID.to_string(),
        invoice_id: input.invoice_id,
        customer_id,
        amount: input.amount,
        method: input.method,
        payment_type: input.payment_type,
        reference_no: clean(input.reference_no),
        gateway_payment_id: clean(input.gateway_payment_id),
        raw_response: input.raw_response,
        note: clean(input.note),
        date: now,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO payments (
            id, company_id, invoice_id, customer_id, amount, method, type,
            reference_no, gateway_payment_id, raw_response, note,
            date, created_at, updated_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7,
            ?8, ?9, ?10, ?11,
            ?12, ?13, ?14
        )
        "#,
    )
    .bind(&payment.id)
    .bind(&payment.company_id)
    .bind(&payment.invoice_id)
    .bind(&payment.customer_id)
    .bind(payment.amount)
    .bind(payment.method)
    .bind(payment.payment_type)
    .bind(&payment.reference_no)
    .bind(&payment.gateway_payment_id)
    .bind(&payment.raw_response)
    .bind(&payment.note)
    .bind(payment.date)
    .bind(payment.created_at)
    .bind(payment.updated_at)
    .execute(&mut *conn)
    .await?;

    SyncQueueRepository::enqueue(
        conn,
        EntityKind::Payments,
        &payment.id,
        SyncAction::Create,
        SyncPayload::Payment(payment.clone()),
        now,
    )
    .await?;

    info!(
        payment_id = %payment.id,
        amount = %payment.amount,
        method = %payment.method,
        kind = %payment.payment_type,
        "Payment recorded"
    );

    let application = match payment.invoice_id.as_deref() {
        Some(invoice_id) => Some(settle_invoice(conn, invoice_id, payment.amount, now).await?),
        None => None,
    };

    Ok(PaymentReceipt { payment, application })
}

async fn settle_invoice(
    conn: &mut SqliteConnection,
    invoice_id: &str,
    amount: Money,
    now: i64,
) -> DbResult<PaymentApplication> {
    let invoice = fetch_invoice(conn, invoice_id)
        .await?
        .ok_or_else(|| DbError::not_found("Invoice", invoice_id))?;

    if invoice.status == InvoiceStatus::Cancelled {
        return Err(DbError::invalid_state("Invoice", invoice_id, invoice.status));
    }

    let lines: Vec<LineBalance> = fetch_invoice_items(conn, invoice_id)
        .await?
        .into_iter()
        .map(|item| LineBalance::new(item.id, item.total, item.paid_amount))
        .collect();

    let allocation = allocate(&lines, amount);

    for line in &allocation.lines {
        sqlx::query("UPDATE invoice_items SET paid_amount = ?2, payment_status = ?3, updated_at = ?4 WHERE id = ?1")
            .bind(&line.id)
            .bind(line.paid_amount)
            .bind(line.payment_status)
            .bind(now)
            .execute(&mut *conn)
            .await?;

        debug!(
            line_id = %line.id,
            applied = %line.applied,
            paid = %line.paid_amount,
            status = %line.payment_status,
            "Line settled"
        );
    }

    let totals = recalc_invoice_status(conn, invoice_id, now).await?;

    if allocation.unapplied.is_positive() {
        warn!(
            invoice_id = %invoice_id,
            unapplied = %allocation.unapplied,
            "Payment exceeds amount due; excess absorbed"
        );
    }

    enqueue_invoice(conn, invoice_id, SyncAction::Update, now).await?;

    Ok(PaymentApplication {
        invoice_id: invoice_id.to_string(),
        applied: allocation.applied,
        unapplied: allocation.unapplied,
        totals,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{outbox, seed_customer, seed_item, seeded_store, TestStore};
    use till_core::{InvoiceWithItems, PaymentStatus};

    fn rupees(r: i64) -> Money {
        Money::from_rupees(r)
    }

    /// 2 × ₹50 tea + 1 × ₹100 sugar, invoiced for `customer_id`.
    async fn two_hundred_rupee_invoice(ctx: &TestStore, customer_id: Option<&str>) -> InvoiceWithItems {
        let (_, tea) = seed_item(&ctx.store, "Tea", 50).await;
        let (_, sugar) = seed_item(&ctx.store, "Sugar", 100).await;

        let carts = ctx.store.carts();
        let cart = carts.create_cart(customer_id).await.unwrap();
        carts.add_cart_item(&cart.id, &tea.id, 2, None).await.unwrap();
        carts.add_cart_item(&cart.id, &sugar.id, 1, None).await.unwrap();

        ctx.store.invoices().generate_invoice_from_cart(&cart.id).await.unwrap()
    }

    fn pay(invoice_id: &str, amount: Money) -> NewPayment {
        NewPayment {
            invoice_id: Some(invoice_id.to_string()),
            amount,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_first_line_settled_first() {
        let ctx = seeded_store().await;
        let customer = seed_customer(&ctx.store, "Asha").await;
        let invoice = two_hundred_rupee_invoice(&ctx, Some(&customer.id)).await;
        let id = invoice.invoice.id.clone();
        let payments = ctx.store.payments();

        let receipt = payments.create_payment(pay(&id, rupees(120))).await.unwrap();
        assert_eq!(receipt.payment.customer_id, Some(customer.id.clone()));
        let application = receipt.application.unwrap();
        assert_eq!(application.applied, rupees(120));
        assert_eq!(application.unapplied, Money::zero());
        assert_eq!(application.totals.status, InvoiceStatus::PartiallyPaid);
        assert_eq!(application.totals.balance, rupees(80));

        let loaded = ctx.store.invoices().get_invoice(&id).await.unwrap().unwrap();
        let lines: Vec<(Money, PaymentStatus)> =
            loaded.items.iter().map(|i| (i.paid_amount, i.payment_status)).collect();
        assert_eq!(
            lines,
            vec![
                (rupees(100), PaymentStatus::Paid),
                (rupees(20), PaymentStatus::PartiallyPaid)
            ]
        );
        assert_eq!(loaded.invoice.paid_amount, rupees(120));

        ctx.clock.advance(60);
        let receipt = payments.create_payment(pay(&id, rupees(80))).await.unwrap();
        let totals = receipt.application.unwrap().totals;
        assert_eq!(totals.status, InvoiceStatus::Paid);
        assert_eq!(totals.balance, Money::zero());

        let loaded = ctx.store.invoices().get_invoice(&id).await.unwrap().unwrap();
        assert!(loaded.items.iter().all(|i| i.payment_status == PaymentStatus::Paid));
        assert_eq!(payments.list_invoice_payments(&id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_overpayment_is_absorbed() {
        let ctx = seeded_store().await;
        let invoice = two_hundred_rupee_invoice(&ctx, None).await;

        let application = ctx
            .store
            .payments()
            .apply_payment_to_invoice(&invoice.invoice.id, rupees(250))
            .await
            .unwrap();

        assert_eq!(application.applied, rupees(200));
        assert_eq!(application.unapplied, rupees(50));
        assert_eq!(application.totals.status, InvoiceStatus::Paid);
        assert_eq!(application.totals.paid, rupees(200));
        assert_eq!(application.totals.balance, Money::zero());
    }

    #[tokio::test]
    async fn test_payment_outbox_entries() {
        let ctx = seeded_store().await;
        let invoice = two_hundred_rupee_invoice(&ctx, None).await;
        let before = outbox(&ctx.store).await.len();

        ctx.store
            .payments()
            .create_payment(pay(&invoice.invoice.id, rupees(50)))
            .await
            .unwrap();

        let queued = outbox(&ctx.store).await;
        let added: Vec<(&str, SyncAction)> = queued[before..]
            .iter()
            .map(|e| (e.entity.as_str(), e.action))
            .collect();
        assert_eq!(added, vec![("payments", SyncAction::Create), ("invoices", SyncAction::Update)]);
    }

    #[tokio::test]
    async fn test_cancelled_invoice_rejects_payment() {
        let ctx = seeded_store().await;
        let invoice = two_hundred_rupee_invoice(&ctx, None).await;
        let id = invoice.invoice.id.clone();
        ctx.store.invoices().cancel_invoice(&id).await.unwrap();

        let err = ctx.store.payments().create_payment(pay(&id, rupees(50))).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidState { .. }));
        assert!(ctx.store.payments().list_invoice_payments(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_payment_preconditions() {
        let ctx = seeded_store().await;
        let payments = ctx.store.payments();

        let err = payments.create_payment(pay("missing", rupees(10))).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));

        let err = payments.create_payment(pay("missing", Money::zero())).await.unwrap_err();
        assert!(matches!(err, DbError::Validation(_)));

        let err = payments.apply_payment_to_invoice("missing", rupees(10)).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_advance_balance() {
        let ctx = seeded_store().await;
        let customer = seed_customer(&ctx.store, "Asha").await;
        let payments = ctx.store.payments();

        for (amount, kind) in [
            (rupees(300), PaymentType::Advance),
            (rupees(200), PaymentType::Advance),
            (rupees(75), PaymentType::Full),
        ] {
            let receipt = payments
                .create_payment(NewPayment {
                    customer_id: Some(customer.id.clone()),
                    amount,
                    payment_type: kind,
                    method: PaymentMethod::Upi,
                    ..Default::default()
                })
                .await
                .unwrap();
            assert!(receipt.application.is_none());
        }

        assert_eq!(payments.get_customer_advance_balance(&customer.id).await.unwrap(), rupees(500));
        assert_eq!(payments.get_customer_advance_balance("nobody").await.unwrap(), Money::zero());
        assert_eq!(payments.list_payments(Page::default()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_enqueue_rolls_back_settlement() {
        let ctx = seeded_store().await;
        let invoice = two_hundred_rupee_invoice(&ctx, None).await;
        let id = invoice.invoice.id.clone();

        ctx.store.execute_batch(&["DROP TABLE sync_queue"]).await.unwrap();

        let err = ctx.store.payments().create_payment(pay(&id, rupees(120))).await.unwrap_err();
        assert!(matches!(err, DbError::TransactionAborted { .. }));

        let loaded = ctx.store.invoices().get_invoice(&id).await.unwrap().unwrap();
        assert_eq!(loaded.invoice.paid_amount, Money::zero());
        assert!(loaded.items.iter().all(|i| i.paid_amount.is_zero()));
        assert!(ctx.store.payments().list_invoice_payments(&id).await.unwrap().is_empty());
    }
}
