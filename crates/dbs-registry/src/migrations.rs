//! System database migrations and sample data

use dbs_core::{Result, SqlValue};
use dbs_drivers::Driver;
use dbs_orm::{Repository, Values};
use std::sync::Arc;

/// Saved connections, restored at startup
const CREATE_CONNECTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS connections (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    type TEXT NOT NULL,
    config TEXT NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT 1,
    created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#;

const CREATE_AUTH_USERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS auth_users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT 'user',
    created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    is_active BOOLEAN NOT NULL DEFAULT 1
);
"#;

const CREATE_USERS_TABLE: &str = r#"
CREATE TABLE users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    age INTEGER,
    city TEXT,
    is_active BOOLEAN DEFAULT 1,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
);
"#;

const CREATE_PRODUCTS_TABLE: &str = r#"
CREATE TABLE products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT,
    price REAL NOT NULL,
    category TEXT,
    stock INTEGER NOT NULL DEFAULT 0,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);
"#;

const CREATE_ORDERS_TABLE: &str = r#"
CREATE TABLE orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id),
    product_id INTEGER NOT NULL REFERENCES products(id),
    quantity INTEGER NOT NULL DEFAULT 1,
    total_price REAL NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    order_date DATETIME DEFAULT CURRENT_TIMESTAMP
);
"#;

const SAMPLE_USERS: &[(&str, &str, i64, &str)] = &[
    ("John Doe", "john@example.com", 30, "New York"),
    ("Jane Smith", "jane@example.com", 25, "Los Angeles"),
    ("Bob Johnson", "bob@example.com", 35, "Chicago"),
    ("Alice Brown", "alice@example.com", 28, "Houston"),
    ("Charlie Wilson", "charlie@example.com", 42, "Phoenix"),
];

const SAMPLE_PRODUCTS: &[(&str, &str, f64, &str, i64)] = &[
    ("Laptop", "14 inch ultrabook", 999.99, "Electronics", 50),
    ("Smartphone", "6.1 inch display", 699.99, "Electronics", 120),
    ("Desk Chair", "Ergonomic office chair", 199.99, "Furniture", 30),
    ("Coffee Mug", "Ceramic, 350ml", 12.99, "Kitchen", 200),
    ("Notebook", "A5 dotted", 4.99, "Stationery", 500),
];

/// (user_id, product_id, quantity, status)
const SAMPLE_ORDERS: &[(i64, i64, i64, &str)] = &[
    (1, 1, 1, "completed"),
    (1, 4, 2, "completed"),
    (2, 2, 1, "shipped"),
    (3, 3, 1, "pending"),
    (4, 5, 10, "completed"),
    (5, 1, 1, "cancelled"),
];

/// Create the registry's own tables
pub async fn run_system_migrations(driver: &dyn Driver) -> Result<()> {
    driver.execute(CREATE_CONNECTIONS_TABLE, &[]).await?;
    driver.execute(CREATE_AUTH_USERS_TABLE, &[]).await?;
    Ok(())
}

async fn table_exists(driver: &dyn Driver, table: &str) -> Result<bool> {
    let result = driver
        .fetch(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?",
            &[SqlValue::from(table)],
        )
        .await?;
    Ok(!result.rows.is_empty())
}

fn row(pairs: Vec<(&str, SqlValue)>) -> Values {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Create and fill `users`, `products` and `orders` when they are missing.
///
/// Each table is handled on its own, so a database where only some of them
/// exist gets the rest.
pub async fn seed_sample_data(driver: Arc<dyn Driver>) -> Result<()> {
    if !table_exists(driver.as_ref(), "users").await? {
        driver.execute(CREATE_USERS_TABLE, &[]).await?;
        let users = Repository::load(driver.clone(), "users").await?;
        for (name, email, age, city) in SAMPLE_USERS {
            users
                .insert(&row(vec![
                    ("name", (*name).into()),
                    ("email", (*email).into()),
                    ("age", SqlValue::Int(*age)),
                    ("city", (*city).into()),
                    ("is_active", SqlValue::Bool(true)),
                ]))
                .await?;
        }
        tracing::info!(rows = SAMPLE_USERS.len(), "Seeded users table");
    }

    if !table_exists(driver.as_ref(), "products").await? {
        driver.execute(CREATE_PRODUCTS_TABLE, &[]).await?;
        let products = Repository::load(driver.clone(), "products").await?;
        for (name, description, price, category, stock) in SAMPLE_PRODUCTS {
            products
                .insert(&row(vec![
                    ("name", (*name).into()),
                    ("description", (*description).into()),
                    ("price", SqlValue::Float(*price)),
                    ("category", (*category).into()),
                    ("stock", SqlValue::Int(*stock)),
                ]))
                .await?;
        }
        tracing::info!(rows = SAMPLE_PRODUCTS.len(), "Seeded products table");
    }

    if !table_exists(driver.as_ref(), "orders").await? {
        driver.execute(CREATE_ORDERS_TABLE, &[]).await?;
        let orders = Repository::load(driver.clone(), "orders").await?;
        for (user_id, product_id, quantity, status) in SAMPLE_ORDERS {
            let unit_price = SAMPLE_PRODUCTS
                .get((*product_id - 1) as usize)
                .map(|p| p.2)
                .unwrap_or_default();
            orders
                .insert(&row(vec![
                    ("user_id", SqlValue::Int(*user_id)),
                    ("product_id", SqlValue::Int(*product_id)),
                    ("quantity", SqlValue::Int(*quantity)),
                    ("total_price", SqlValue::Float(unit_price * *quantity as f64)),
                    ("status", (*status).into()),
                ]))
                .await?;
        }
        tracing::info!(rows = SAMPLE_ORDERS.len(), "Seeded orders table");
    }

    Ok(())
}
