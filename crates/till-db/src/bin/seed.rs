//! # Seed Data Generator
//!
//! Registers a demo company and fills the catalog for development.
//!
//! ## Usage
//! ```bash
//! # Seed ./till_dev (default)
//! cargo run -p till-db --bin seed
//!
//! # Seed another data directory with a custom PIN
//! cargo run -p till-db --bin seed -- --dir ./data --pin 4321
//! ```
//!
//! ## Generated Data
//! - One company (`Demo Kirana`) licensed for a year from today
//! - Categories with subcategories (Beverages › Soft Drinks, ...)
//! - Products with size variants and stock
//! - A handful of walk-in customers

use chrono::{Duration, Utc};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use till_core::Money;
use till_db::repository::catalog::{NewCategory, NewProduct, NewVariant};
use till_db::repository::company::NewCompany;
use till_db::repository::customer::NewCustomer;
use till_db::{FileStorage, Store, StoreConfig};
use tracing_subscriber::EnvFilter;

/// (category, subcategory, products as (name, base price in rupees))
const CATALOG: &[(&str, &str, &[(&str, i64)])] = &[
    (
        "Beverages",
        "Soft Drinks",
        &[("Thums Up", 40), ("Limca", 40), ("Frooti", 25), ("Maaza", 35)],
    ),
    (
        "Snacks",
        "Namkeen",
        &[("Aloo Bhujia", 55), ("Moong Dal", 50), ("Khatta Meetha", 60)],
    ),
    (
        "Dairy",
        "Milk",
        &[("Toned Milk", 27), ("Full Cream Milk", 33), ("Dahi", 35)],
    ),
    (
        "Grocery",
        "Staples",
        &[("Basmati Rice", 120), ("Toor Dal", 140), ("Atta", 60)],
    ),
];

/// Size variants: (label, price add-on in rupees, opening stock)
const SIZES: &[(&str, i64, i64)] = &[("Small", 0, 40), ("Regular", 15, 25), ("Family", 45, 10)];

const CUSTOMERS: &[(&str, &str)] = &[
    ("Asha Verma", "9810000001"),
    ("Ravi Kumar", "9810000002"),
    ("Meena Iyer", "9810000003"),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")))
        .init();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    let mut data_dir = PathBuf::from("./till_dev");
    let mut pin = String::from("1234");
    let mut device_id = String::from("dev-device");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--dir" | "-d" => {
                if i + 1 < args.len() {
                    data_dir = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--pin" | "-p" => {
                if i + 1 < args.len() {
                    pin = args[i + 1].clone();
                    i += 1;
                }
            }
            "--device" => {
                if i + 1 < args.len() {
                    device_id = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Till Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --dir <PATH>     Data directory (default: ./till_dev)");
                println!("  -p, --pin <PIN>      Company PIN, 4-6 digits (default: 1234)");
                println!("      --device <ID>    Registered device id (default: dev-device)");
                println!("  -h, --help           Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🌱 Till Seed Data Generator");
    println!("===========================");
    println!("Data dir: {}", data_dir.display());
    println!();

    let storage = Arc::new(FileStorage::new(&data_dir));
    let store = Store::open(StoreConfig::new(data_dir.join("work")), storage).await?;
    println!("✓ Store opened, schema v{}", store.schema_version().await?);

    if store.company().get_company().await?.is_some() {
        println!("⚠ Store already has a company");
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the data directory to regenerate.");
        return Ok(());
    }

    let today = Utc::now();
    store
        .company()
        .create_company(NewCompany {
            name: "Demo Kirana".to_string(),
            email: Some("owner@demo-kirana.in".to_string()),
            phone: Some("9800000000".to_string()),
            address: Some("12 MG Road, Pune".to_string()),
            license_key: "DEV-LICENSE".to_string(),
            license_token: "dev-token".to_string(),
            license_expiry: Some((today + Duration::days(365)).timestamp()),
            grace_until: Some((today + Duration::days(372)).timestamp()),
            pin,
            device_id: device_id.clone(),
        })
        .await?;
    println!("✓ Company registered for device '{}'", device_id);

    let catalog = store.catalog();
    let start = std::time::Instant::now();
    let mut products = 0;

    for (category, subcategory, entries) in CATALOG {
        let parent = catalog
            .create_category(NewCategory {
                name: category.to_string(),
                ..Default::default()
            })
            .await?;
        let child = catalog
            .create_category(NewCategory {
                name: subcategory.to_string(),
                parent_id: Some(parent.id.clone()),
                ..Default::default()
            })
            .await?;

        for (name, rupees) in entries.iter() {
            let sku_stem: String = name.chars().filter(|c| c.is_ascii_alphabetic()).take(4).collect();
            let variants = SIZES
                .iter()
                .map(|(label, addon, stock)| NewVariant {
                    sku: Some(format!("{}-{}", sku_stem.to_uppercase(), label.to_uppercase())),
                    variant: Some(label.to_string()),
                    price: Some(Money::from_rupees(rupees + addon)),
                    quantity: *stock,
                    ..Default::default()
                })
                .collect();

            catalog
                .create_product(
                    NewProduct {
                        name: name.to_string(),
                        price: Money::from_rupees(*rupees),
                        mrp: Some(Money::from_rupees(rupees + 5)),
                        category_id: Some(parent.id.clone()),
                        sub_category_id: Some(child.id.clone()),
                        ..Default::default()
                    },
                    variants,
                )
                .await?;
            products += 1;
        }
    }

    for (name, phone) in CUSTOMERS {
        store
            .customers()
            .create_customer(NewCustomer {
                name: name.to_string(),
                phone: Some(phone.to_string()),
                ..Default::default()
            })
            .await?;
    }

    let pending = store.sync_queue().count_pending().await?;
    store.close().await;

    println!();
    println!("✓ {} products, {} customers in {:.2?}", products, CUSTOMERS.len(), start.elapsed());
    println!("✓ {} changes queued for sync", pending);

    Ok(())
}
