//! # Cart Repository
//!
//! The working basket at the till. Carts are local-only: nothing here is
//! queued for sync. A cart becomes synced state only when it is turned into
//! an invoice.
//!
//! ## Cart Lifecycle
//! ```text
//! create_cart ──► ACTIVE ◄──► HOLD / DRAFT / PENDING
//!                   │
//!                   ├── add / update / remove lines   (recalc_cart_total)
//!                   │
//!                   ├── generate_invoice_from_cart ──► COMPLETED
//!                   ├── close_cart                 ──► COMPLETED
//!                   └── set_cart_status(CANCELLED) ──► CANCELLED
//!
//! CHECKEDOUT, COMPLETED and CANCELLED carts reject line changes.
//! ```

use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::new_id;
use crate::store::Store;
use till_core::validation::{line_total, validate_cart_size, validate_price, validate_quantity};
use till_core::{Cart, CartItem, CartStatus, CartWithItems, Item, Money, COMPANY_ID};

pub(crate) const CART_COLUMNS: &str = "id, company_id, customer_id, status, total_amount, created_at, updated_at";
pub(crate) const CART_ITEM_COLUMNS: &str = "id, cart_id, item_id, product_id, line_no, quantity, price, \
     tax_rate_id, total, created_at, updated_at";

/// Repository for carts and their lines.
#[derive(Debug, Clone)]
pub struct CartRepository {
    store: Store,
}

impl CartRepository {
    /// Creates a new CartRepository.
    pub fn new(store: Store) -> Self {
        CartRepository { store }
    }

    /// Opens an empty ACTIVE cart.
    pub async fn create_cart(&self, customer_id: Option<&str>) -> DbResult<Cart> {
        let now = self.store.now();
        let cart = Cart {
            id: new_id(),
            company_id: COMPANY_ID.to_string(),
            customer_id: customer_id.map(str::to_string),
            status: CartStatus::Active,
            total_amount: Money::zero(),
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.store.begin().await?;
        let result = insert_cart(&mut *tx, &cart).await;
        self.store.finish("create_cart", tx, result.map(|()| cart)).await
    }

    /// Adds `quantity` of `item_id` as a new line. Without a `price` the
    /// line is priced at the item's current price.
    pub async fn add_cart_item(
        &self,
        cart_id: &str,
        item_id: &str,
        quantity: i64,
        price: Option<Money>,
    ) -> DbResult<CartItem> {
        validate_quantity(quantity)?;
        if let Some(price) = price {
            validate_price(price)?;
        }

        let now = self.store.now();
        let mut tx = self.store.begin().await?;
        let result = insert_line(&mut *tx, cart_id, item_id, quantity, price, now).await;
        self.store.finish("add_cart_item", tx, result).await
    }

    /// Changes a line's quantity, and its unit price when `price` is given.
    pub async fn update_cart_item(
        &self,
        cart_item_id: &str,
        quantity: i64,
        price: Option<Money>,
    ) -> DbResult<CartItem> {
        validate_quantity(quantity)?;
        if let Some(price) = price {
            validate_price(price)?;
        }

        let now = self.store.now();
        let mut tx = self.store.begin().await?;
        let result = update_line(&mut *tx, cart_item_id, quantity, price, now).await;
        self.store.finish("update_cart_item", tx, result).await
    }

    /// Removes a line and returns the re-totalled cart.
    pub async fn remove_cart_item(&self, cart_item_id: &str) -> DbResult<Cart> {
        let now = self.store.now();
        let mut tx = self.store.begin().await?;
        let result = delete_line(&mut *tx, cart_item_id, now).await;
        self.store.finish("remove_cart_item", tx, result).await
    }

    pub async fn get_cart(&self, cart_id: &str) -> DbResult<Option<CartWithItems>> {
        let mut conn = self.store.pool().acquire().await?;
        let Some(cart) = fetch_cart(&mut *conn, cart_id).await? else {
            return Ok(None);
        };

        let items = fetch_lines(&mut *conn, cart_id).await?;
        Ok(Some(CartWithItems { cart, items }))
    }

    /// The most recently opened ACTIVE cart, if any.
    pub async fn get_active_cart(&self) -> DbResult<Option<CartWithItems>> {
        let id: Option<String> = sqlx::query_scalar(
            "SELECT id FROM carts WHERE status = ?1 ORDER BY created_at DESC, rowid DESC LIMIT 1",
        )
        .bind(CartStatus::Active)
        .fetch_optional(self.store.pool())
        .await?;

        match id {
            Some(id) => self.get_cart(&id).await,
            None => Ok(None),
        }
    }

    /// Marks the cart COMPLETED. The cart and its lines are kept.
    pub async fn close_cart(&self, cart_id: &str) -> DbResult<Cart> {
        self.set_cart_status(cart_id, CartStatus::Completed).await
    }

    /// Moves the cart to `status` (hold, resume, cancel, ...).
    pub async fn set_cart_status(&self, cart_id: &str, status: CartStatus) -> DbResult<Cart> {
        let now = self.store.now();
        let mut tx = self.store.begin().await?;
        let result = write_status(&mut *tx, cart_id, status, now).await;
        self.store.finish("set_cart_status", tx, result).await
    }
}

// =============================================================================
// Transaction Steps
// =============================================================================

pub(crate) async fn fetch_cart(conn: &mut SqliteConnection, cart_id: &str) -> DbResult<Option<Cart>> {
    let cart = sqlx::query_as::<_, Cart>(&format!("SELECT {CART_COLUMNS} FROM carts WHERE id = ?1"))
        .bind(cart_id)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(cart)
}

/// A cart's lines in insertion order.
pub(crate) async fn fetch_lines(conn: &mut SqliteConnection, cart_id: &str) -> DbResult<Vec<CartItem>> {
    let lines = sqlx::query_as::<_, CartItem>(&format!(
        "SELECT {CART_ITEM_COLUMNS} FROM cart_items WHERE cart_id = ?1 ORDER BY line_no"
    ))
    .bind(cart_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(lines)
}

/// Loads the cart and fails unless lines may still change.
async fn require_open_cart(conn: &mut SqliteConnection, cart_id: &str) -> DbResult<Cart> {
    let cart = fetch_cart(conn, cart_id)
        .await?
        .ok_or_else(|| DbError::not_found("Cart", cart_id))?;

    if !cart.status.is_open() {
        return Err(DbError::invalid_state("Cart", cart_id, cart.status));
    }

    Ok(cart)
}

/// Re-sums the cart's lines into `total_amount`.
pub(crate) async fn recalc_cart_total(conn: &mut SqliteConnection, cart_id: &str, now: i64) -> DbResult<Money> {
    let total: Money = sqlx::query_scalar(
        r#"
        UPDATE carts SET
            total_amount = (SELECT COALESCE(SUM(total), 0) FROM cart_items WHERE cart_id = ?1),
            updated_at = ?2
        WHERE id = ?1
        RETURNING total_amount
        "#,
    )
    .bind(cart_id)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    debug!(cart_id = %cart_id, total = %total, "Cart total recalculated");
    Ok(total)
}

async fn insert_cart(conn: &mut SqliteConnection, cart: &Cart) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO carts (id, company_id, customer_id, status, total_amount, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(&cart.id)
    .bind(&cart.company_id)
    .bind(&cart.customer_id)
    .bind(cart.status)
    .bind(cart.total_amount)
    .bind(cart.created_at)
    .bind(cart.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn insert_line(
    conn: &mut SqliteConnection,
    cart_id: &str,
    item_id: &str,
    quantity: i64,
    price: Option<Money>,
    now: i64,
) -> DbResult<CartItem> {
    require_open_cart(conn, cart_id).await?;

    let item = sqlx::query_as::<_, Item>(&format!(
        "SELECT {} FROM items WHERE id = ?1",
        crate::repository::catalog::ITEM_COLUMNS
    ))
    .bind(item_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| DbError::not_found("Item", item_id))?;

    let (count, last_line): (i64, i64) =
        sqlx::query_as("SELECT COUNT(*), COALESCE(MAX(line_no), 0) FROM cart_items WHERE cart_id = ?1")
            .bind(cart_id)
            .fetch_one(&mut *conn)
            .await?;
    validate_cart_size(count as usize)?;

    let price = price.unwrap_or(item.price);
    let line = CartItem {
        id: new_id(),
        cart_id: cart_id.to_string(),
        item_id: item.id,
        product_id: item.product_id,
        line_no: last_line + 1,
        quantity,
        price,
        tax_rate_id: item.tax_rate_id,
        total: line_total(price, quantity)?,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO cart_items (
            id, cart_id, item_id, product_id, line_no, quantity, price,
            tax_rate_id, total, created_at, updated_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7,
            ?8, ?9, ?10, ?11
        )
        "#,
    )
    .bind(&line.id)
    .bind(&line.cart_id)
    .bind(&line.item_id)
    .bind(&line.product_id)
    .bind(line.line_no)
    .bind(line.quantity)
    .bind(line.price)
    .bind(&line.tax_rate_id)
    .bind(line.total)
    .bind(line.created_at)
    .bind(line.updated_at)
    .execute(&mut *conn)
    .await?;

    recalc_cart_total(conn, cart_id, now).await?;
    Ok(line)
}

async fn fetch_line(conn: &mut SqliteConnection, cart_item_id: &str) -> DbResult<CartItem> {
    sqlx::query_as::<_, CartItem>(&format!(
        "SELECT {CART_ITEM_COLUMNS} FROM cart_items WHERE id = ?1"
    ))
    .bind(cart_item_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| DbError::not_found("CartItem", cart_item_id))
}

async fn update_line(
    conn: &mut SqliteConnection,
    cart_item_id: &str,
    quantity: i64,
    price: Option<Money>,
    now: i64,
) -> DbResult<CartItem> {
    let line = fetch_line(conn, cart_item_id).await?;
    require_open_cart(conn, &line.cart_id).await?;

    let price = price.unwrap_or(line.price);
    let line = sqlx::query_as::<_, CartItem>(&format!(
        r#"
        UPDATE cart_items SET
            quantity = ?2,
            price = ?3,
            total = ?4,
            updated_at = ?5
        WHERE id = ?1
        RETURNING {CART_ITEM_COLUMNS}
        "#
    ))
    .bind(cart_item_id)
    .bind(quantity)
    .bind(price)
    .bind(line_total(price, quantity)?)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    recalc_cart_total(conn, &line.cart_id, now).await?;
    Ok(line)
}

async fn delete_line(conn: &mut SqliteConnection, cart_item_id: &str, now: i64) -> DbResult<Cart> {
    let line = fetch_line(conn, cart_item_id).await?;
    require_open_cart(conn, &line.cart_id).await?;

    sqlx::query("DELETE FROM cart_items WHERE id = ?1")
        .bind(cart_item_id)
        .execute(&mut *conn)
        .await?;

    recalc_cart_total(conn, &line.cart_id, now).await?;
    fetch_cart(conn, &line.cart_id)
        .await?
        .ok_or_else(|| DbError::not_found("Cart", &line.cart_id))
}

pub(crate) async fn write_status(
    conn: &mut SqliteConnection,
    cart_id: &str,
    status: CartStatus,
    now: i64,
) -> DbResult<Cart> {
    let cart = sqlx::query_as::<_, Cart>(&format!(
        "UPDATE carts SET status = ?2, updated_at = ?3 WHERE id = ?1 RETURNING {CART_COLUMNS}"
    ))
    .bind(cart_id)
    .bind(status)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| DbError::not_found("Cart", cart_id))?;

    debug!(cart_id = %cart_id, status = %status, "Cart status changed");
    Ok(cart)
}

// =============================================================================
// Unit Tests
// =============================================================================
