//! Shared fixtures for the in-crate tests.

use std::sync::Arc;
use tempfile::TempDir;

use till_core::sync::SyncQueueEntry;
use till_core::{Customer, Item, ManualClock, Money, Product};

use crate::repository::catalog::{NewProduct, NewVariant};
use crate::repository::company::NewCompany;
use crate::repository::customer::NewCustomer;
use crate::storage::MemoryStorage;
use crate::store::{Store, StoreConfig};

/// Clock reading every test store starts at.
pub(crate) const T0: i64 = 1_700_000_000;
pub(crate) const TEST_PIN: &str = "1234";
pub(crate) const TEST_DEVICE: &str = "device-1";

pub(crate) struct TestStore {
    pub store: Store,
    pub storage: Arc<MemoryStorage>,
    pub clock: Arc<ManualClock>,
    pub _dir: TempDir,
}

/// Fresh migrated store with no company.
pub(crate) async fn test_store() -> TestStore {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(MemoryStorage::new());
    let clock = Arc::new(ManualClock::new(T0));

    let store = Store::open_with_clock(StoreConfig::new(dir.path()), storage.clone(), clock.clone())
        .await
        .unwrap();

    TestStore {
        store,
        storage,
        clock,
        _dir: dir,
    }
}

/// Store with the company already registered.
pub(crate) async fn seeded_store() -> TestStore {
    let ctx = test_store().await;
    ctx.store.company().create_company(new_company()).await.unwrap();
    ctx
}

pub(crate) fn new_company() -> NewCompany {
    NewCompany {
        name: "Corner Store".to_string(),
        email: Some("owner@corner.in".to_string()),
        phone: Some("9800000000".to_string()),
        address: None,
        license_key: "LIC-0001".to_string(),
        license_token: "tok-secret".to_string(),
        license_expiry: Some(T0 + 86_400 * 30),
        grace_until: Some(T0 + 86_400 * 37),
        pin: TEST_PIN.to_string(),
        device_id: TEST_DEVICE.to_string(),
    }
}

/// A product with a single stock unit priced at `rupees`.
pub(crate) async fn seed_item(store: &Store, name: &str, rupees: i64) -> (Product, Item) {
    let price = Money::from_rupees(rupees);
    let created = store
        .catalog()
        .create_product(
            NewProduct {
                name: name.to_string(),
                price,
                ..Default::default()
            },
            vec![NewVariant {
                quantity: 25,
                ..Default::default()
            }],
        )
        .await
        .unwrap();

    let item = created.items[0].clone();
    (created.product, item)
}

pub(crate) async fn seed_customer(store: &Store, name: &str) -> Customer {
    store
        .customers()
        .create_customer(NewCustomer {
            name: name.to_string(),
            phone: Some("9811111111".to_string()),
            ..Default::default()
        })
        .await
        .unwrap()
}

/// Every outbox row, in `seq` order.
pub(crate) async fn outbox(store: &Store) -> Vec<SyncQueueEntry> {
    sqlx::query_as::<_, SyncQueueEntry>(
        "SELECT id, seq, entity, entity_id, action, payload, status, retry_count, \
         last_error, created_at, updated_at FROM sync_queue ORDER BY seq",
    )
    .fetch_all(store.pool())
    .await
    .unwrap()
}
