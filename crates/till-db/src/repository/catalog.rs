//! # Catalog Repository
//!
//! Categories, products and their stock-carrying items (variants).
//!
//! ## Catalog Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Category ◄── parent_id (nullable, ON DELETE SET NULL, no cycle check)  │
//! │     ▲                                                                   │
//! │     │ category_id / sub_category_id (ON DELETE SET NULL)                │
//! │  Product  ── price, mrp, no stock                                       │
//! │     │ 1..N (ON DELETE CASCADE)                                          │
//! │     ▼                                                                   │
//! │  Item     ── sku, variant, price, quantity on hand                      │
//! │                                                                         │
//! │  product stock = Σ item.quantity                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Invoice lines reference products and items without cascade, so deleting
//! anything that was ever invoiced fails with a foreign-key violation.

use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::debug;
use ts_rs::TS;

use crate::error::{DbError, DbResult};
use crate::repository::customer::delete_row;
use crate::repository::sync::SyncQueueRepository;
use crate::repository::{clean, new_id};
use crate::store::Store;
use till_core::category_tree::would_create_cycle;
use till_core::sync::{EntityKind, SyncAction, SyncPayload};
use till_core::validation::{validate_name, validate_price, validate_stock};
use till_core::{Category, Item, Money, Product, COMPANY_ID};

pub(crate) const CATEGORY_COLUMNS: &str =
    "id, company_id, name, description, parent_id, created_at, updated_at";
pub(crate) const PRODUCT_COLUMNS: &str = "id, company_id, name, sku, description, price, mrp, \
     category_id, sub_category_id, created_at, updated_at";
pub(crate) const ITEM_COLUMNS: &str = "id, product_id, company_id, sku, variant, price, mrp, \
     quantity, location, tax_rate_id, created_at, updated_at";

// =============================================================================
// Inputs / Outputs
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct NewCategory {
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<String>,
}

/// Product fields for create and update.
#[derive(Debug, Clone, Default)]
pub struct NewProduct {
    pub name: String,
    pub sku: Option<String>,
    pub description: Option<String>,
    pub price: Money,
    pub mrp: Option<Money>,
    pub category_id: Option<String>,
    pub sub_category_id: Option<String>,
}

/// A variant created together with its product. Price and MRP default to the
/// product's.
#[derive(Debug, Clone, Default)]
pub struct NewVariant {
    pub sku: Option<String>,
    pub variant: Option<String>,
    pub price: Option<Money>,
    pub mrp: Option<Money>,
    pub quantity: i64,
    pub location: Option<String>,
    pub tax_rate_id: Option<String>,
}

/// Item fields for update.
#[derive(Debug, Clone, Default)]
pub struct ItemUpdate {
    pub sku: Option<String>,
    pub variant: Option<String>,
    pub price: Money,
    pub mrp: Option<Money>,
    pub location: Option<String>,
    pub tax_rate_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ProductWithItems {
    pub product: Product,
    pub items: Vec<Item>,
}

impl ProductWithItems {
    /// Sum of the items' quantities on hand.
    pub fn stock(&self) -> i64 {
        self.items.iter().map(|item| item.quantity).sum()
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for categories, products and items.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    store: Store,
}

impl CatalogRepository {
    /// Creates a new CatalogRepository.
    pub fn new(store: Store) -> Self {
        CatalogRepository { store }
    }

    // -------------------------------------------------------------------------
    // Categories
    // -------------------------------------------------------------------------

    /// Creates a category and enqueues a `categories` CREATE.
    pub async fn create_category(&self, input: NewCategory) -> DbResult<Category> {
        validate_name("name", &input.name, 100)?;

        let now = self.store.now();
        let category = Category {
            id: new_id(),
            company_id: COMPANY_ID.to_string(),
            name: input.name.trim().to_string(),
            description: clean(input.description),
            parent_id: input.parent_id,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.store.begin().await?;
        let result = insert_category(&mut *tx, &category).await;
        self.store.finish("create_category", tx, result.map(|()| category)).await
    }

    pub async fn get_category(&self, id: &str) -> DbResult<Option<Category>> {
        let category = sqlx::query_as::<_, Category>(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(self.store.pool())
        .await?;

        Ok(category)
    }

    /// Every category, by name.
    pub async fn list_categories(&self) -> DbResult<Vec<Category>> {
        let categories = sqlx::query_as::<_, Category>(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories ORDER BY name COLLATE NOCASE, id"
        ))
        .fetch_all(self.store.pool())
        .await?;

        Ok(categories)
    }

    /// Direct children of `parent_id`, or the roots when `None`.
    pub async fn list_child_categories(&self, parent_id: Option<&str>) -> DbResult<Vec<Category>> {
        let categories = sqlx::query_as::<_, Category>(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories WHERE parent_id IS ?1 ORDER BY name COLLATE NOCASE, id"
        ))
        .bind(parent_id)
        .fetch_all(self.store.pool())
        .await?;

        Ok(categories)
    }

    /// Replaces a category's fields and enqueues a `categories` UPDATE.
    ///
    /// The new parent is not cycle-checked; see [`Self::would_create_cycle`].
    pub async fn update_category(&self, id: &str, input: NewCategory) -> DbResult<Category> {
        validate_name("name", &input.name, 100)?;

        let now = self.store.now();
        let mut tx = self.store.begin().await?;
        let result = update_category_row(&mut *tx, id, input, now).await;
        self.store.finish("update_category", tx, result).await
    }

    /// Whether re-parenting `id` under `new_parent` would close a loop.
    pub async fn would_create_cycle(&self, id: &str, new_parent: Option<&str>) -> DbResult<bool> {
        let categories = self.list_categories().await?;
        Ok(would_create_cycle(&categories, id, new_parent))
    }

    /// Deletes a category. Children and products keep their rows with the
    /// reference cleared.
    pub async fn delete_category(&self, id: &str) -> DbResult<()> {
        let now = self.store.now();
        let mut tx = self.store.begin().await?;
        let result = delete_row(&mut *tx, EntityKind::Categories, "Category", id, now).await;
        self.store.finish("delete_category", tx, result).await
    }

    // -------------------------------------------------------------------------
    // Products
    // -------------------------------------------------------------------------

    /// Creates a product together with its variants.
    ///
    /// Enqueues one `products` CREATE plus one `items` CREATE per variant.
    pub async fn create_product(&self, input: NewProduct, variants: Vec<NewVariant>) -> DbResult<ProductWithItems> {
        validate_name("name", &input.name, 200)?;
        validate_price(input.price)?;
        for variant in &variants {
            validate_stock(variant.quantity)?;
            if let Some(price) = variant.price {
                validate_price(price)?;
            }
        }

        let now = self.store.now();
        let product = Product {
            id: new_id(),
            company_id: COMPANY_ID.to_string(),
            name: input.name.trim().to_string(),
            sku: clean(input.sku),
            description: clean(input.description),
            price: input.price,
            mrp: input.mrp,
            category_id: input.category_id,
            sub_category_id: input.sub_category_id,
            created_at: now,
            updated_at: now,
        };

        let items: Vec<Item> = variants
            .into_iter()
            .map(|v| Item {
                id: new_id(),
                product_id: product.id.clone(),
                company_id: COMPANY_ID.to_string(),
                sku: clean(v.sku),
                variant: clean(v.variant),
                price: v.price.unwrap_or(product.price),
                mrp: v.mrp.or(product.mrp),
                quantity: v.quantity,
                location: clean(v.location),
                tax_rate_id: v.tax_rate_id,
                created_at: now,
                updated_at: now,
            })
            .collect();

        debug!(id = %product.id, variants = items.len(), "Creating product");

        let created = ProductWithItems { product, items };
        let mut tx = self.store.begin().await?;
        let result = insert_product(&mut *tx, &created).await;
        self.store.finish("create_product", tx, result.map(|()| created)).await
    }

    pub async fn get_product(&self, id: &str) -> DbResult<Option<ProductWithItems>> {
        let product = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(self.store.pool())
        .await?;

        let Some(product) = product else {
            return Ok(None);
        };

        let items = self.list_items(id).await?;
        Ok(Some(ProductWithItems { product, items }))
    }

    /// Replaces a product's fields and enqueues a `products` UPDATE.
    pub async fn update_product(&self, id: &str, input: NewProduct) -> DbResult<Product> {
        validate_name("name", &input.name, 200)?;
        validate_price(input.price)?;

        let now = self.store.now();
        let mut tx = self.store.begin().await?;
        let result = update_product_row(&mut *tx, id, input, now).await;
        self.store.finish("update_product", tx, result).await
    }

    /// Deletes a product and its items.
    ///
    /// Fails with a foreign-key violation if any invoice line references it.
    pub async fn delete_product(&self, id: &str) -> DbResult<()> {
        let now = self.store.now();
        let mut tx = self.store.begin().await?;
        let result = delete_row(&mut *tx, EntityKind::Products, "Product", id, now).await;
        self.store.finish("delete_product", tx, result).await
    }

    /// Sum of the product's item quantities.
    pub async fn product_stock(&self, product_id: &str) -> DbResult<i64> {
        let stock: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(quantity), 0) FROM items WHERE product_id = ?1")
            .bind(product_id)
            .fetch_one(self.store.pool())
            .await?;

        Ok(stock)
    }

    // -------------------------------------------------------------------------
    // Items
    // -------------------------------------------------------------------------

    /// Adds a variant to an existing product.
    pub async fn create_item(&self, product_id: &str, input: NewVariant) -> DbResult<Item> {
        validate_stock(input.quantity)?;
        if let Some(price) = input.price {
            validate_price(price)?;
        }

        let now = self.store.now();
        let mut tx = self.store.begin().await?;
        let result = insert_variant(&mut *tx, product_id, input, now).await;
        self.store.finish("create_item", tx, result).await
    }

    pub async fn get_item(&self, id: &str) -> DbResult<Option<Item>> {
        let item = sqlx::query_as::<_, Item>(&format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1"))
            .bind(id)
            .fetch_optional(self.store.pool())
            .await?;

        Ok(item)
    }

    /// A product's items in creation order.
    pub async fn list_items(&self, product_id: &str) -> DbResult<Vec<Item>> {
        let items = sqlx::query_as::<_, Item>(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE product_id = ?1 ORDER BY created_at, rowid"
        ))
        .bind(product_id)
        .fetch_all(self.store.pool())
        .await?;

        Ok(items)
    }

    /// Replaces an item's descriptive fields and price.
    pub async fn update_item(&self, id: &str, input: ItemUpdate) -> DbResult<Item> {
        validate_price(input.price)?;

        let now = self.store.now();
        let mut tx = self.store.begin().await?;
        let result = update_item_row(&mut *tx, id, input, now).await;
        self.store.finish("update_item", tx, result).await
    }

    /// Sets quantity on hand.
    pub async fn update_stock(&self, id: &str, quantity: i64) -> DbResult<Item> {
        validate_stock(quantity)?;

        let now = self.store.now();
        let mut tx = self.store.begin().await?;
        let result = set_item_quantity(&mut *tx, id, quantity, now).await;
        self.store.finish("update_stock", tx, result).await
    }

    pub async fn delete_item(&self, id: &str) -> DbResult<()> {
        let now = self.store.now();
        let mut tx = self.store.begin().await?;
        let result = delete_row(&mut *tx, EntityKind::Items, "Item", id, now).await;
        self.store.finish("delete_item", tx, result).await
    }
}

// =============================================================================
// Transaction Steps
// =============================================================================

async fn insert_category(conn: &mut SqliteConnection, category: &Category) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO categories (id, company_id, name, description, parent_id, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(&category.id)
    .bind(&category.company_id)
    .bind(&category.name)
    .bind(&category.description)
    .bind(&category.parent_id)
    .bind(category.created_at)
    .bind(category.updated_at)
    .execute(&mut *conn)
    .await?;

    SyncQueueRepository::enqueue(
        conn,
        EntityKind::Categories,
        &category.id,
        SyncAction::Create,
        SyncPayload::Category(category.clone()),
        category.created_at,
    )
    .await?;

    Ok(())
}

async fn update_category_row(
    conn: &mut SqliteConnection,
    id: &str,
    input: NewCategory,
    now: i64,
) -> DbResult<Category> {
    let category = sqlx::query_as::<_, Category>(&format!(
        r#"
        UPDATE categories SET
            name = ?2,
            description = ?3,
            parent_id = ?4,
            updated_at = ?5
        WHERE id = ?1
        RETURNING {CATEGORY_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(input.name.trim())
    .bind(clean(input.description))
    .bind(&input.parent_id)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| DbError::not_found("Category", id))?;

    SyncQueueRepository::enqueue(
        conn,
        EntityKind::Categories,
        id,
        SyncAction::Update,
        SyncPayload::Category(category.clone()),
        now,
    )
    .await?;

    Ok(category)
}

async fn insert_product(conn: &mut SqliteConnection, created: &ProductWithItems) -> DbResult<()> {
    let product = &created.product;

    sqlx::query(
        r#"
        INSERT INTO products (
            id, company_id, name, sku, description, price, mrp,
            category_id, sub_category_id, created_at, updated_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7,
            ?8, ?9, ?10, ?11
        )
        "#,
    )
    .bind(&product.id)
    .bind(&product.company_id)
    .bind(&product.name)
    .bind(&product.sku)
    .bind(&product.description)
    .bind(product.price)
    .bind(product.mrp)
    .bind(&product.category_id)
    .bind(&product.sub_category_id)
    .bind(product.created_at)
    .bind(product.updated_at)
    .execute(&mut *conn)
    .await?;

    SyncQueueRepository::enqueue(
        conn,
        EntityKind::Products,
        &product.id,
        SyncAction::Create,
        SyncPayload::Product(product.clone()),
        product.created_at,
    )
    .await?;

    for item in &created.items {
        insert_item(conn, item).await?;
    }

    Ok(())
}

async fn insert_variant(conn: &mut SqliteConnection, product_id: &str, input: NewVariant, now: i64) -> DbResult<Item> {
    let product = sqlx::query_as::<_, Product>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1"
    ))
    .bind(product_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| DbError::not_found("Product", product_id))?;

    let item = Item {
        id: new_id(),
        product_id: product.id.clone(),
        company_id: product.company_id.clone(),
        sku: clean(input.sku),
        variant: clean(input.variant),
        price: input.price.unwrap_or(product.price),
        mrp: input.mrp.or(product.mrp),
        quantity: input.quantity,
        location: clean(input.location),
        tax_rate_id: input.tax_rate_id,
        created_at: now,
        updated_at: now,
    };

    insert_item(conn, &item).await?;
    Ok(item)
}

async fn insert_item(conn: &mut SqliteConnection, item: &Item) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO items (
            id, product_id, company_id, sku, variant, price, mrp,
            quantity, location, tax_rate_id, created_at, updated_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7,
            ?8, ?9, ?10, ?11, ?12
        )
        "#,
    )
    .bind(&item.id)
    .bind(&item.product_id)
    .bind(&item.company_id)
    .bind(&item.sku)
    .bind(&item.variant)
    .bind(item.price)
    .bind(item.mrp)
    .bind(item.quantity)
    .bind(&item.location)
    .bind(&item.tax_rate_id)
    .bind(item.created_at)
    .bind(item.updated_at)
    .execute(&mut *conn)
    .await?;

    SyncQueueRepository::enqueue(
        conn,
        EntityKind::Items,
        &item.id,
        SyncAction::Create,
        SyncPayload::Item(item.clone()),
        item.created_at,
    )
    .await?;

    Ok(())
}

async fn update_product_row(conn: &mut SqliteConnection, id: &str, input: NewProduct, now: i64) -> DbResult<Product> {
    let product = sqlx::query_as::<_, Product>(&format!(
        r#"
        UPDATE products SET
            name = ?2,
            sku = ?3,
            description = ?4,
            price = ?5,
            mrp = ?6,
            category_id = ?7,
            sub_category_id = ?8,
            updated_at = ?9
        WHERE id = ?1
        RETURNING {PRODUCT_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(input.name.trim())
    .bind(clean(input.sku))
    .bind(clean(input.description))
    .bind(input.price)
    .bind(input.mrp)
    .bind(&input.category_id)
    .bind(&input.sub_category_id)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| DbError::not_found("Product", id))?;

    SyncQueueRepository::enqueue(
        conn,
        EntityKind::Products,
        id,
        SyncAction::Update,
        SyncPayload::Product(product.clone()),
        now,
    )
    .await?;

    Ok(product)
}

async fn update_item_row(conn: &mut SqliteConnection, id: &str, input: ItemUpdate, now: i64) -> DbResult<Item> {
    let item = sqlx::query_as::<_, Item>(&format!(
        r#"
        UPDATE items SET
            sku = ?2,
            variant = ?3,
            price = ?4,
            mrp = ?5,
            location = ?6,
            tax_rate_id = ?7,
            updated_at = ?8
        WHERE id = ?1
        RETURNING {ITEM_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(clean(input.sku))
    .bind(clean(input.variant))
    .bind(input.price)
    .bind(input.mrp)
    .bind(clean(input.location))
    .bind(&input.tax_rate_id)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| DbError::not_found("Item", id))?;

    enqueue_item_update(conn, &item, now).await?;
    Ok(item)
}

async fn set_item_quantity(conn: &mut SqliteConnection, id: &str, quantity: i64, now: i64) -> DbResult<Item> {
    let item = sqlx::query_as::<_, Item>(&format!(
        "UPDATE items SET quantity = ?2, updated_at = ?3 WHERE id = ?1 RETURNING {ITEM_COLUMNS}"
    ))
    .bind(id)
    .bind(quantity)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| DbError::not_found("Item", id))?;

    debug!(id = %id, quantity, "Stock updated");
    enqueue_item_update(conn, &item, now).await?;
    Ok(item)
}

async fn enqueue_item_update(conn: &mut SqliteConnection, item: &Item, now: i64) -> DbResult<()> {
    SyncQueueRepository::enqueue(
        conn,
        EntityKind::Items,
        &item.id,
        SyncAction::Update,
        SyncPayload::Item(item.clone()),
        now,
    )
    .await?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{outbox, seed_item, seeded_store};

    fn rupees(r: i64) -> Money {
        Money::from_rupees(r)
    }

    #[tokio::test]
    async fn test_create_product_with_variants() {
        let ctx = seeded_store().await;
        let catalog = ctx.store.catalog();

        let created = catalog
            .create_product(
                NewProduct {
                    name: "Cola".to_string(),
                    price: rupees(40),
                    mrp: Some(rupees(45)),
                    ..Default::default()
                },
                vec![
                    NewVariant {
                        variant: Some("500ml".to_string()),
                        quantity: 10,
                        ..Default::default()
                    },
                    NewVariant {
                        variant: Some("1L".to_string()),
                        price: Some(rupees(70)),
                        quantity: 4,
                        ..Default::default()
                    },
                ],
            )
            .await
            .unwrap();

        assert_eq!(created.items[0].price, rupees(40));
        assert_eq!(created.items[0].mrp, Some(rupees(45)));
        assert_eq!(created.items[1].price, rupees(70));
        assert_eq!(created.stock(), 14);
        assert_eq!(catalog.product_stock(&created.product.id).await.unwrap(), 14);

        let loaded = catalog.get_product(&created.product.id).await.unwrap().unwrap();
        assert_eq!(loaded, created);

        // company + product + two items
        let entities: Vec<String> = outbox(&ctx.store).await.into_iter().map(|e| e.entity).collect();
        assert_eq!(entities, vec!["companies", "products", "items", "items"]);
    }

    #[tokio::test]
    async fn test_negative_stock_rejected() {
        let ctx = seeded_store().await;
        let (_, item) = seed_item(&ctx.store, "Soap", 30).await;

        let err = ctx.store.catalog().update_stock(&item.id, -1).await.unwrap_err();
        assert!(matches!(err, DbError::Validation(_)));

        let updated = ctx.store.catalog().update_stock(&item.id, 0).await.unwrap();
        assert_eq!(updated.quantity, 0);
    }

    #[tokio::test]
    async fn test_create_item_for_missing_product() {
        let ctx = seeded_store().await;
        let err = ctx
            .store
            .catalog()
            .create_item("missing", NewVariant::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_category_clears_references() {
        let ctx = seeded_store().await;
        let catalog = ctx.store.catalog();

        let drinks = catalog
            .create_category(NewCategory {
                name: "Drinks".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let soda = catalog
            .create_category(NewCategory {
                name: "Soda".to_string(),
                parent_id: Some(drinks.id.clone()),
                ..Default::default()
            })
            .await
            .unwrap();
        let product = catalog
            .create_product(
                NewProduct {
                    name: "Cola".to_string(),
                    category_id: Some(drinks.id.clone()),
                    sub_category_id: Some(soda.id.clone()),
                    ..Default::default()
                },
                vec![],
            )
            .await
            .unwrap();

        assert_eq!(catalog.list_child_categories(None).await.unwrap().len(), 1);
        assert_eq!(catalog.list_child_categories(Some(&drinks.id)).await.unwrap(), vec![soda.clone()]);

        catalog.delete_category(&drinks.id).await.unwrap();

        let soda = catalog.get_category(&soda.id).await.unwrap().unwrap();
        assert_eq!(soda.parent_id, None);
        let product = catalog.get_product(&product.product.id).await.unwrap().unwrap();
        assert_eq!(product.product.category_id, None);
        assert_eq!(product.product.sub_category_id, Some(soda.id));
    }

    #[tokio::test]
    async fn test_cycle_helper_does_not_block_writes() {
        let ctx = seeded_store().await;
        let catalog = ctx.store.catalog();

        let a = catalog
            .create_category(NewCategory {
                name: "A".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let b = catalog
            .create_category(NewCategory {
                name: "B".to_string(),
                parent_id: Some(a.id.clone()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(catalog.would_create_cycle(&a.id, Some(&b.id)).await.unwrap());

        let updated = catalog
            .update_category(
                &a.id,
                NewCategory {
                    name: "A".to_string(),
                    parent_id: Some(b.id.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.parent_id, Some(b.id));
    }

    #[tokio::test]
    async fn test_update_product_and_item() {
        let ctx = seeded_store().await;
        let (product, item) = seed_item(&ctx.store, "Rice 1kg", 60).await;
        let catalog = ctx.store.catalog();

        let product = catalog
            .update_product(
                &product.id,
                NewProduct {
                    name: "Rice 1kg (Sona)".to_string(),
                    price: rupees(65),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(product.price, rupees(65));

        let item = catalog
            .update_item(
                &item.id,
                ItemUpdate {
                    variant: Some("1kg".to_string()),
                    price: rupees(65),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(item.variant.as_deref(), Some("1kg"));
        assert_eq!(item.quantity, 25);

        let history = ctx.store.sync_queue().history(EntityKind::Items, &item.id).await.unwrap();
        assert_eq!(history.len(), 2);
    }
}
