//! # Query Façade
//!
//! Read-only views for screens and reports. Filters and paging apply to the
//! parent rows; children are loaded for the whole page in one query and
//! grouped in memory.
//!
//! ## Loading a Page
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. SELECT parents WHERE <filters> ORDER BY ... LIMIT ? OFFSET ?        │
//! │  2. SELECT children JOIN products/items WHERE parent_id IN (page ids)   │
//! │  3. group children by parent id, keep parent order                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite};
use ts_rs::TS;

use crate::error::DbResult;
use crate::repository::cart::{CART_COLUMNS, CART_ITEM_COLUMNS};
use crate::repository::catalog::{CATEGORY_COLUMNS, ITEM_COLUMNS, PRODUCT_COLUMNS};
use crate::repository::invoice::{INVOICE_COLUMNS, INVOICE_ITEM_COLUMNS};
use crate::repository::Page;
use crate::store::Store;
use till_core::category_tree::{build_forest, CategoryForest};
use till_core::validation::validate_search_query;
use till_core::{
    Cart, CartItem, CartStatus, Category, Invoice, InvoiceItem, InvoiceStatus, Item, Money, Product,
};

// =============================================================================
// Filters
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ProductFilter {
    pub category_id: Option<String>,
    /// Matched against product name and SKU.
    pub search: Option<String>,
    pub min_price: Option<Money>,
    pub max_price: Option<Money>,
    #[serde(default)]
    pub page: Page,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CartFilter {
    pub customer_id: Option<String>,
    pub status: Option<CartStatus>,
    #[serde(default)]
    pub page: Page,
}

/// Invoice filter. Date bounds are inclusive epoch seconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InvoiceFilter {
    pub customer_id: Option<String>,
    pub status: Option<InvoiceStatus>,
    pub start_date: Option<i64>,
    pub end_date: Option<i64>,
    #[serde(default)]
    pub page: Page,
}

// =============================================================================
// Views
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CategoryRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ProductView {
    pub product: Product,
    pub category: Option<CategoryRef>,
    pub items: Vec<Item>,
    /// Σ item quantity.
    pub stock: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CategoryWithChildren {
    pub category: Category,
    pub subcategories: Vec<Category>,
}

/// A cart line with the names a receipt needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, sqlx::FromRow)]
#[ts(export)]
pub struct CartLineView {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub line: CartItem,
    pub product_name: String,
    pub item_sku: Option<String>,
    pub item_variant: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CartView {
    pub cart: Cart,
    pub items: Vec<CartLineView>,
}

/// An invoice line with the names a receipt needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, sqlx::FromRow)]
#[ts(export)]
pub struct InvoiceLineView {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub line: InvoiceItem,
    pub product_name: String,
    pub item_sku: Option<String>,
    pub item_variant: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InvoiceView {
    pub invoice: Invoice,
    pub items: Vec<InvoiceLineView>,
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    #[sqlx(flatten)]
    product: Product,
    category_name: Option<String>,
}

// =============================================================================
// Helpers
// =============================================================================

/// `"a, b"` → `"t.a, t.b"`.
fn qualified(columns: &str, alias: &str) -> String {
    columns
        .split(',')
        .map(|column| format!("{alias}.{}", column.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn push_page(qb: &mut QueryBuilder<'_, Sqlite>, page: Page) {
    qb.push(" LIMIT ").push_bind(page.limit).push(" OFFSET ").push_bind(page.offset);
}

fn push_in(qb: &mut QueryBuilder<'_, Sqlite>, ids: &[String]) {
    qb.push(" IN (");
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(id.clone());
    }
    separated.push_unseparated(")");
}

fn group_by<T>(rows: Vec<T>, key: impl Fn(&T) -> &str) -> HashMap<String, Vec<T>> {
    let mut grouped: HashMap<String, Vec<T>> = HashMap::new();
    for row in rows {
        grouped.entry(key(&row).to_string()).or_default().push(row);
    }
    grouped
}

// =============================================================================
// Façade
// =============================================================================

/// Read-only views over the ledger.
#[derive(Debug, Clone)]
pub struct QueryFacade {
    store: Store,
}

impl QueryFacade {
    pub fn new(store: Store) -> Self {
        QueryFacade { store }
    }

    /// Products with their category, items and stock, by name.
    pub async fn products_with_items(&self, filter: ProductFilter) -> DbResult<Vec<ProductView>> {
        filter.page.validate()?;
        let search = match filter.search.as_deref() {
            Some(query) => validate_search_query(query)?,
            None => None,
        };

        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {}, c.name AS category_name FROM products p \
             LEFT JOIN categories c ON c.id = p.category_id WHERE 1 = 1",
            qualified(PRODUCT_COLUMNS, "p")
        ));

        if let Some(category_id) = filter.category_id {
            qb.push(" AND (p.category_id = ")
                .push_bind(category_id.clone())
                .push(" OR p.sub_category_id = ")
                .push_bind(category_id)
                .push(")");
        }
        if let Some(search) = search {
            let pattern = format!("%{search}%");
            qb.push(" AND (p.name LIKE ")
                .push_bind(pattern.clone())
                .push(" OR p.sku LIKE ")
                .push_bind(pattern)
                .push(")");
        }
        if let Some(min) = filter.min_price {
            qb.push(" AND p.price >= ").push_bind(min);
        }
        if let Some(max) = filter.max_price {
            qb.push(" AND p.price <= ").push_bind(max);
        }
        qb.push(" ORDER BY p.name COLLATE NOCASE, p.id");
        push_page(&mut qb, filter.page);

        let rows = qb.build_query_as::<ProductRow>().fetch_all(self.store.pool()).await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = rows.iter().map(|row| row.product.id.clone()).collect();
        let mut items_qb = QueryBuilder::<Sqlite>::new(format!("SELECT {ITEM_COLUMNS} FROM items WHERE product_id"));
        push_in(&mut items_qb, &ids);
        items_qb.push(" ORDER BY created_at, rowid");
        let items = items_qb.build_query_as::<Item>().fetch_all(self.store.pool()).await?;
        let mut items = group_by(items, |item| item.product_id.as_str());

        Ok(rows
            .into_iter()
            .map(|row| {
                let items = items.remove(&row.product.id).unwrap_or_default();
                let category = match (&row.product.category_id, row.category_name) {
                    (Some(id), Some(name)) => Some(CategoryRef { id: id.clone(), name }),
                    _ => None,
                };
                ProductView {
                    stock: items.iter().map(|item| item.quantity).sum(),
                    product: row.product,
                    category,
                    items,
                }
            })
            .collect())
    }

    /// Top-level categories with their direct children, by name.
    pub async fn categories_with_subcategories(&self, page: Page) -> DbResult<Vec<CategoryWithChildren>> {
        page.validate()?;

        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories WHERE parent_id IS NULL ORDER BY name COLLATE NOCASE, id"
        ));
        push_page(&mut qb, page);
        let roots = qb.build_query_as::<Category>().fetch_all(self.store.pool()).await?;
        if roots.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = roots.iter().map(|c| c.id.clone()).collect();
        let mut children_qb =
            QueryBuilder::<Sqlite>::new(format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE parent_id"));
        push_in(&mut children_qb, &ids);
        children_qb.push(" ORDER BY name COLLATE NOCASE, id");
        let children = children_qb.build_query_as::<Category>().fetch_all(self.store.pool()).await?;
        let mut children = group_by(children, |c| c.parent_id.as_deref().unwrap_or_default());

        Ok(roots
            .into_iter()
            .map(|category| CategoryWithChildren {
                subcategories: children.remove(&category.id).unwrap_or_default(),
                category,
            })
            .collect())
    }

    /// The whole category forest. Categories caught in a parent cycle are
    /// listed under `detached`.
    pub async fn category_tree(&self) -> DbResult<CategoryForest> {
        let categories = sqlx::query_as::<_, Category>(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories ORDER BY name COLLATE NOCASE, id"
        ))
        .fetch_all(self.store.pool())
        .await?;

        Ok(build_forest(categories))
    }

    /// Carts with named lines, newest first.
    pub async fn carts_with_items(&self, filter: CartFilter) -> DbResult<Vec<CartView>> {
        filter.page.validate()?;

        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {CART_COLUMNS} FROM carts WHERE 1 = 1"));
        if let Some(customer_id) = filter.customer_id {
            qb.push(" AND customer_id = ").push_bind(customer_id);
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status);
        }
        qb.push(" ORDER BY created_at DESC, rowid DESC");
        push_page(&mut qb, filter.page);

        let carts = qb.build_query_as::<Cart>().fetch_all(self.store.pool()).await?;
        if carts.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = carts.iter().map(|c| c.id.clone()).collect();
        let mut lines_qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {}, p.name AS product_name, i.sku AS item_sku, i.variant AS item_variant \
             FROM cart_items ci \
             JOIN products p ON p.id = ci.product_id \
             JOIN items i ON i.id = ci.item_id \
             WHERE ci.cart_id",
            qualified(CART_ITEM_COLUMNS, "ci")
        ));
        push_in(&mut lines_qb, &ids);
        lines_qb.push(" ORDER BY ci.cart_id, ci.line_no");
        let lines = lines_qb.build_query_as::<CartLineView>().fetch_all(self.store.pool()).await?;
        let mut lines = group_by(lines, |l| l.line.cart_id.as_str());

        Ok(carts
            .into_iter()
            .map(|cart| CartView {
                items: lines.remove(&cart.id).unwrap_or_default(),
                cart,
            })
            .collect())
    }

    /// Invoices with named lines, newest first.
    pub async fn invoices_with_items(&self, filter: InvoiceFilter) -> DbResult<Vec<InvoiceView>> {
        filter.page.validate()?;

        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE 1 = 1"));
        if let Some(customer_id) = filter.customer_id {
            qb.push(" AND customer_id = ").push_bind(customer_id);
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status);
        }
        if let Some(start) = filter.start_date {
            qb.push(" AND date >= ").push_bind(start);
        }
        if let Some(end) = filter.end_date {
            qb.push(" AND date <= ").push_bind(end);
        }
        qb.push(" ORDER BY date DESC, rowid DESC");
        push_page(&mut qb, filter.page);

        let invoices = qb.build_query_as::<Invoice>().fetch_all(self.store.pool()).await?;
        if invoices.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = invoices.iter().map(|i| i.id.clone()).collect();
        let mut lines_qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {}, p.name AS product_name, i.sku AS item_sku, i.variant AS item_variant \
             FROM invoice_items ii \
             JOIN products p ON p.id = ii.product_id \
             JOIN items i ON i.id = ii.item_id \
             WHERE ii.invoice_id",
            qualified(INVOICE_ITEM_COLUMNS, "ii")
        ));
        push_in(&mut lines_qb, &ids);
        lines_qb.push(" ORDER BY ii.invoice_id, ii.line_no");
        let lines = lines_qb.build_query_as::<InvoiceLineView>().fetch_all(self.store.pool()).await?;
        let mut lines = group_by(lines, |l| l.line.invoice_id.as_str());

        Ok(invoices
            .into_iter()
            .map(|invoice| InvoiceView {
                items: lines.remove(&invoice.id).unwrap_or_default(),
                invoice,
            })
            .collect())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::catalog::{NewCategory, NewProduct, NewVariant};
    use crate::test_support::{seed_customer, seed_item, seeded_store};
    use till_core::Clock;

    fn rupees(r: i64) -> Money {
        Money::from_rupees(r)
    }

    #[test]
    fn test_qualified_columns() {
        assert_eq!(qualified("id, name", "p"), "p.id, p.name");
        assert!(qualified(INVOICE_COLUMNS, "ii").contains("ii.type"));
    }

    #[tokio::test]
    async fn test_products_with_items_filters() {
        let ctx = seeded_store().await;
        let catalog = ctx.store.catalog();
        let drinks = catalog
            .create_category(NewCategory {
                name: "Drinks".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        catalog
            .create_product(
                NewProduct {
                    name: "Cola".to_string(),
                    price: rupees(40),
                    category_id: Some(drinks.id.clone()),
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
                        quantity: 5,
                        ..Default::default()
                    },
                ],
            )
            .await
            .unwrap();
        seed_item(&ctx.store, "Soap", 30).await;
        seed_item(&ctx.store, "Rice", 120).await;

        let queries = ctx.store.queries();

        let all = queries.products_with_items(ProductFilter::default()).await.unwrap();
        let names: Vec<&str> = all.iter().map(|v| v.product.name.as_str()).collect();
        assert_eq!(names, vec!["Cola", "Rice", "Soap"]);
        assert_eq!(all[0].stock, 15);
        assert_eq!(all[0].items.len(), 2);
        assert_eq!(all[0].category.as_ref().map(|c| c.name.as_str()), Some("Drinks"));
        assert!(all[1].category.is_none());

        let drinks_only = queries
            .products_with_items(ProductFilter {
                category_id: Some(drinks.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(drinks_only.len(), 1);

        let cheap = queries
            .products_with_items(ProductFilter {
                min_price: Some(rupees(35)),
                max_price: Some(rupees(100)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(cheap.len(), 1);
        assert_eq!(cheap[0].product.name, "Cola");

        let searched = queries
            .products_with_items(ProductFilter {
                search: Some("  so ".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(searched.len(), 1);
        assert_eq!(searched[0].product.name, "Soap");

        let paged = queries
            .products_with_items(ProductFilter {
                page: Page::new(2, 1),
                ..Default::default()
            })
            .await
            .unwrap();
        let names: Vec<&str> = paged.iter().map(|v| v.product.name.as_str()).collect();
        assert_eq!(names, vec!["Rice", "Soap"]);
    }

    #[tokio::test]
    async fn test_category_views() {
        let ctx = seeded_store().await;
        let catalog = ctx.store.catalog();
        let new = |name: &str, parent: Option<&str>| NewCategory {
            name: name.to_string(),
            parent_id: parent.map(str::to_string),
            ..Default::default()
        };

        let food = catalog.create_category(new("Food", None)).await.unwrap();
        catalog.create_category(new("Snacks", Some(&food.id))).await.unwrap();
        catalog.create_category(new("Dairy", Some(&food.id))).await.unwrap();
        let a = catalog.create_category(new("Loop A", None)).await.unwrap();
        let b = catalog.create_category(new("Loop B", Some(&a.id))).await.unwrap();
        catalog.update_category(&a.id, new("Loop A", Some(&b.id))).await.unwrap();

        let queries = ctx.store.queries();
        let roots = queries.categories_with_subcategories(Page::default()).await.unwrap();
        assert_eq!(roots.len(), 1);
        let subs: Vec<&str> = roots[0].subcategories.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(subs, vec!["Dairy", "Snacks"]);

        let forest = queries.category_tree().await.unwrap();
        assert_eq!(forest.roots.len(), 1);
        assert_eq!(forest.roots[0].children.len(), 2);
        let mut detached = forest.detached.clone();
        detached.sort();
        let mut expected = vec![a.id, b.id];
        expected.sort();
        assert_eq!(detached, expected);
    }

    #[tokio::test]
    async fn test_carts_and_invoices_views() {
        let ctx = seeded_store().await;
        let asha = seed_customer(&ctx.store, "Asha").await;
        let (_, tea) = seed_item(&ctx.store, "Tea", 50).await;
        let carts = ctx.store.carts();

        let first = carts.create_cart(Some(&asha.id)).await.unwrap();
        carts.add_cart_item(&first.id, &tea.id, 2, None).await.unwrap();
        ctx.store.invoices().generate_invoice_from_cart(&first.id).await.unwrap();

        ctx.clock.advance(86_400);
        let second = carts.create_cart(None).await.unwrap();
        carts.add_cart_item(&second.id, &tea.id, 1, None).await.unwrap();
        ctx.store.invoices().generate_invoice_from_cart(&second.id).await.unwrap();

        let queries = ctx.store.queries();

        let asha_carts = queries
            .carts_with_items(CartFilter {
                customer_id: Some(asha.id.clone()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(asha_carts.len(), 1);
        assert_eq!(asha_carts[0].items[0].product_name, "Tea");
        assert_eq!(asha_carts[0].items[0].line.quantity, 2);

        let completed = queries
            .carts_with_items(CartFilter {
                status: Some(CartStatus::Completed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(completed.len(), 2);

        let invoices = queries.invoices_with_items(InvoiceFilter::default()).await.unwrap();
        assert_eq!(invoices.len(), 2);
        assert_eq!(invoices[0].invoice.cart_id, Some(second.id));
        assert_eq!(invoices[1].items[0].line.total, rupees(100));

        let first_day = queries
            .invoices_with_items(InvoiceFilter {
                end_date: Some(ctx.clock.now() - 1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(first_day.len(), 1);
        assert_eq!(first_day[0].invoice.customer_id, Some(asha.id));

        let pending = queries
            .invoices_with_items(InvoiceFilter {
                status: Some(InvoiceStatus::Paid),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_page_rejected() {
        let ctx = seeded_store().await;
        let err = ctx
            .store
            .queries()
            .carts_with_items(CartFilter {
                page: Page::new(0, 0),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::DbError::Validation(_)));
    }
}
