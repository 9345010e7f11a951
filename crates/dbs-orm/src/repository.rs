//! Table repository: builder statements executed on a driver

use crate::builder::{QueryBuilder, Statement, Values};
use crate::condition::{Condition, Select};
use dbs_core::{Error, QueryResult, Result, SqlValue, TableSchema};
use dbs_drivers::Driver;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;

/// A row as returned by the drivers
pub type Record = Map<String, JsonValue>;

/// Typed access to one table of a connection
#[derive(Clone)]
pub struct Repository {
    driver: Arc<dyn Driver>,
    builder: QueryBuilder,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("dialect", &self.driver.dialect())
            .field("table", &self.builder.schema().name)
            .finish()
    }
}

impl Repository {
    pub fn new(driver: Arc<dyn Driver>, schema: TableSchema) -> Self {
        let builder = QueryBuilder::new(schema, driver.dialect());
        Self { driver, builder }
    }

    /// Build a repository from the table's live schema
    pub async fn load(driver: Arc<dyn Driver>, table: &str) -> Result<Self> {
        let schema = driver.describe_table(table).await?;
        Ok(Self::new(driver, schema))
    }

    pub fn builder(&self) -> &QueryBuilder {
        &self.builder
    }

    async fn rows(&self, statement: Statement) -> Result<Vec<Record>> {
        tracing::debug!(table = %self.builder.schema().name, sql = %statement.sql, "Repository fetch");
        Ok(self.driver.fetch(&statement.sql, &statement.params).await?.rows)
    }

    async fn first(&self, statement: Statement) -> Result<Option<Record>> {
        Ok(self.rows(statement).await?.into_iter().next())
    }

    async fn affected(&self, statement: Statement) -> Result<u64> {
        tracing::debug!(table = %self.builder.schema().name, sql = %statement.sql, "Repository execute");
        self.driver.execute(&statement.sql, &statement.params).await
    }

    pub async fn select(&self, select: &Select) -> Result<Vec<Record>> {
        self.rows(self.builder.select(select)?).await
    }

    pub async fn select_columns(&self, columns: &[&str], select: &Select) -> Result<Vec<Record>> {
        self.rows(self.builder.select_columns(columns, select)?).await
    }

    pub async fn find_by_id(&self, id: impl Into<SqlValue>) -> Result<Option<Record>> {
        self.first(self.builder.find_by_id(id)?).await
    }

    pub async fn find_one(&self, conditions: Vec<Condition>) -> Result<Option<Record>> {
        self.first(self.builder.find_one(conditions)?).await
    }

    pub async fn find_many(&self, conditions: Vec<Condition>) -> Result<Vec<Record>> {
        self.rows(self.builder.find_many(conditions)?).await
    }

    /// Insert one row and return it as stored
    pub async fn insert(&self, values: &Values) -> Result<Record> {
        self.first(self.builder.insert(values)?)
            .await?
            .ok_or_else(|| Error::message(format!(
                "Insert into '{}' returned no row",
                self.builder.schema().name
            )))
    }

    pub async fn update(&self, values: &Values, conditions: &[Condition]) -> Result<u64> {
        self.affected(self.builder.update(values, conditions)?).await
    }

    pub async fn update_by_id(&self, id: impl Into<SqlValue>, values: &Values) -> Result<u64> {
        self.affected(self.builder.update_by_id(id, values)?).await
    }

    pub async fn delete(&self, conditions: &[Condition]) -> Result<u64> {
        self.affected(self.builder.delete(conditions)?).await
    }

    pub async fn delete_by_id(&self, id: impl Into<SqlValue>) -> Result<u64> {
        self.affected(self.builder.delete_by_id(id)?).await
    }

    pub async fn count(&self, conditions: &[Condition]) -> Result<u64> {
        let row = self.first(self.builder.count(conditions)?).await?;
        let count = row
            .and_then(|r| r.get("count").cloned())
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        Ok(count)
    }

    pub async fn exists(&self, conditions: &[Condition]) -> Result<bool> {
        Ok(self.first(self.builder.exists(conditions)?).await?.is_some())
    }

    /// Run arbitrary SQL through the driver's fetch-or-execute dispatch
    pub async fn raw_query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        self.driver.execute_query(sql, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Direction, Join};
    use dbs_core::SqliteConfig;
    use dbs_drivers::SqliteDriver;
    use serde_json::json;

    async fn shop(dir: &tempfile::TempDir) -> Arc<dyn Driver> {
        let mut config = SqliteConfig::new(dir.path().join("shop.db").to_string_lossy());
        config.create_if_missing = true;
        let driver = SqliteDriver::open(&config).await.unwrap();
        for sql in [
            "CREATE TABLE customers (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, city TEXT)",
            "CREATE TABLE orders (id INTEGER PRIMARY KEY AUTOINCREMENT, customer_id INTEGER, total REAL)",
        ] {
            driver.execute(sql, &[]).await.unwrap();
        }
        Arc::new(driver)
    }

    fn values(pairs: &[(&str, SqlValue)]) -> Values {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn test_crud_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::load(shop(&dir).await, "customers").await.unwrap();

        let ann = repo
            .insert(&values(&[("name", "Ann".into()), ("city", "Oslo".into())]))
            .await
            .unwrap();
        assert_eq!(ann["id"], json!(1));
        assert_eq!(ann["city"], json!("Oslo"));

        repo.insert(&values(&[("name", "Bo".into()), ("city", SqlValue::Null)]))
            .await
            .unwrap();
        repo.insert(&values(&[("name", "Cy".into()), ("city", "Lima".into())]))
            .await
            .unwrap();

        assert_eq!(repo.count(&[]).await.unwrap(), 3);
        assert_eq!(repo.count(&[Condition::is_null("city")]).await.unwrap(), 1);
        assert!(repo.exists(&[Condition::eq("name", "Cy")]).await.unwrap());
        assert!(!repo.exists(&[Condition::eq("name", "Zed")]).await.unwrap());

        let updated = repo
            .update_by_id(2, &values(&[("city", "Rome".into())]))
            .await
            .unwrap();
        assert_eq!(updated, 1);
        let bo = repo.find_by_id(2).await.unwrap().unwrap();
        assert_eq!(bo["city"], json!("Rome"));

        let cities = repo
            .find_many(vec![Condition::is_in("city", vec!["Oslo", "Lima"])])
            .await
            .unwrap();
        assert_eq!(cities.len(), 2);

        assert_eq!(repo.delete_by_id(1).await.unwrap(), 1);
        assert!(repo.find_by_id(1).await.unwrap().is_none());
        assert_eq!(repo.delete(&[Condition::gte("id", 0)]).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_select_with_join_and_paging() {
        let dir = tempfile::tempdir().unwrap();
        let driver = shop(&dir).await;
        let customers = Repository::load(driver.clone(), "customers").await.unwrap();
        let orders = Repository::load(driver, "orders").await.unwrap();

        for name in ["Ann", "Bo"] {
            customers.insert(&values(&[("name", name.into())])).await.unwrap();
        }
        for (customer, total) in [(1, 10.0), (1, 25.5), (2, 7.25)] {
            orders
                .insert(&values(&[
                    ("customer_id", SqlValue::Int(customer)),
                    ("total", SqlValue::Float(total)),
                ]))
                .await
                .unwrap();
        }

        let select = Select::new()
            .join(Join::inner("orders", "customers.id", "orders.customer_id"))
            .filter(Condition::gt("orders.total", 8.0))
            .order_by("orders.total", Direction::Desc);
        let rows = customers
            .select_columns(&["customers.name", "orders.total"], &select)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["total"], json!(25.5));
        assert_eq!(rows[0]["name"], json!("Ann"));

        let page = orders
            .select(&Select::new().order_by("id", Direction::Asc).limit(1).offset(1))
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0]["id"], json!(2));

        let one = orders
            .find_one(vec![Condition::lt("total", 8.0)])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(one["customer_id"], json!(2));
    }

    #[tokio::test]
    async fn test_raw_query_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::load(shop(&dir).await, "customers").await.unwrap();

        let result = repo
            .raw_query("INSERT INTO customers (name) VALUES (?)", &["Dee".into()])
            .await
            .unwrap();
        assert_eq!(result.rows_affected, Some(1));

        let result = repo.raw_query("SELECT name FROM customers", &[]).await.unwrap();
        assert_eq!(result.rows[0]["name"], json!("Dee"));
    }
}
