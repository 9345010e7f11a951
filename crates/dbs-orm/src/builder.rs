//! SQL statement builder with bound parameters
//!
//! Values never reach the SQL text except `NULL`, which is written inline
//! so that no typed null has to be bound.

use crate::condition::{Condition, Direction, JoinKind, Operator, Select};
use dbs_core::{Dialect, Error, Result, SqlValue, TableSchema, quote_ident};

/// SQL text plus the values for its placeholders, in order
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Ordered `(column, value)` pairs for inserts and updates
pub type Values = Vec<(String, SqlValue)>;

/// Accumulates parameters and hands out dialect placeholders
struct Params {
    dialect: Dialect,
    values: Vec<SqlValue>,
}

impl Params {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            values: Vec::new(),
        }
    }

    fn push(&mut self, value: SqlValue) -> String {
        if value.is_null() {
            return "NULL".to_string();
        }
        self.values.push(value);
        match self.dialect {
            Dialect::Sqlite => "?".to_string(),
            Dialect::Postgres => format!("${}", self.values.len()),
        }
    }

    fn finish(self, sql: String) -> Statement {
        Statement {
            sql,
            params: self.values,
        }
    }
}

/// Builds statements for one table, validating column names against its
/// schema.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    schema: TableSchema,
    dialect: Dialect,
}

impl QueryBuilder {
    pub fn new(schema: TableSchema, dialect: Dialect) -> Self {
        Self { schema, dialect }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Name of the primary key column
    pub fn primary_key(&self) -> Result<&str> {
        self.schema
            .primary_key()
            .map(|c| c.name.as_str())
            .ok_or_else(|| Error::NoPrimaryKey(self.schema.name.clone()))
    }

    /// Validate and quote a column reference.
    ///
    /// Bare names must belong to this table. Qualified names may point at
    /// this table or at any table in `joined`.
    fn column(&self, name: &str, joined: &[&str]) -> Result<String> {
        match name.rsplit_once('.') {
            Some((table, column)) if table == self.schema.name => {
                self.require_column(column)?;
                Ok(quote_ident(name))
            }
            Some((table, _)) if joined.contains(&table) => Ok(quote_ident(name)),
            Some(_) => Err(Error::column_not_found(&self.schema.name, name)),
            None => {
                self.require_column(name)?;
                Ok(quote_ident(name))
            }
        }
    }

    fn require_column(&self, name: &str) -> Result<()> {
        if self.schema.column(name).is_some() {
            Ok(())
        } else {
            Err(Error::column_not_found(&self.schema.name, name))
        }
    }

    fn table(&self) -> String {
        quote_ident(&self.schema.name)
    }

    fn where_clause(&self, conditions: &[Condition], joined: &[&str], params: &mut Params) -> Result<String> {
        if conditions.is_empty() {
            return Ok(String::new());
        }
        let parts = conditions
            .iter()
            .map(|c| self.condition(c, joined, params))
            .collect::<Result<Vec<_>>>()?;
        Ok(format!(" WHERE {}", parts.join(" AND ")))
    }

    fn condition(&self, condition: &Condition, joined: &[&str], params: &mut Params) -> Result<String> {
        let column = self.column(&condition.column, joined)?;

        let sql = match condition.op {
            Operator::IsNull => format!("{} IS NULL", column),
            Operator::IsNotNull => format!("{} IS NOT NULL", column),
            Operator::Eq if condition.value.is_null() => format!("{} IS NULL", column),
            Operator::Ne if condition.value.is_null() => format!("{} IS NOT NULL", column),
            Operator::In | Operator::NotIn => {
                let items = match &condition.value {
                    SqlValue::List(items) => items.clone(),
                    single => vec![single.clone()],
                };
                if items.is_empty() {
                    // Nothing is IN an empty set; everything is NOT IN it
                    return Ok(match condition.op {
                        Operator::In => "1 = 0".to_string(),
                        _ => "1 = 1".to_string(),
                    });
                }
                let placeholders: Vec<String> = items.into_iter().map(|v| params.push(v)).collect();
                format!("{} {} ({})", column, condition.op.as_sql(), placeholders.join(", "))
            }
            op => {
                let placeholder = params.push(condition.value.clone());
                format!("{} {} {}", column, op.as_sql(), placeholder)
            }
        };
        Ok(sql)
    }

    fn select_inner(&self, columns: Option<&[&str]>, select: &Select) -> Result<Statement> {
        let mut params = Params::new(self.dialect);
        let joined: Vec<&str> = select.joins.iter().map(|j| j.table.as_str()).collect();

        let projection = match columns {
            Some(cols) if !cols.is_empty() => cols
                .iter()
                .map(|c| self.column(c, &joined))
                .collect::<Result<Vec<_>>>()?
                .join(", "),
            _ if joined.is_empty() => "*".to_string(),
            _ => format!("{}.*", self.table()),
        };

        let mut sql = format!("SELECT {} FROM {}", projection, self.table());

        for join in &select.joins {
            let kind = match join.kind {
                JoinKind::Inner => "INNER JOIN",
                JoinKind::Left => "LEFT JOIN",
            };
            sql.push_str(&format!(
                " {} {} ON {} = {}",
                kind,
                quote_ident(&join.table),
                self.column(&join.left, &joined)?,
                self.column(&join.right, &joined)?
            ));
        }

        sql.push_str(&self.where_clause(&select.conditions, &joined, &mut params)?);

        if !select.order_by.is_empty() {
            let order = select
                .order_by
                .iter()
                .map(|(col, dir)| {
                    let dir = match dir {
                        Direction::Asc => "ASC",
                        Direction::Desc => "DESC",
                    };
                    Ok(format!("{} {}", self.column(col, &joined)?, dir))
                })
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
        }

        if let Some(limit) = select.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = select.offset {
            if select.limit.is_none() && self.dialect == Dialect::Sqlite {
                // SQLite only accepts OFFSET after a LIMIT
                sql.push_str(" LIMIT -1");
            }
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        Ok(params.finish(sql))
    }

    pub fn select(&self, select: &Select) -> Result<Statement> {
        self.select_inner(None, select)
    }

    pub fn select_columns(&self, columns: &[&str], select: &Select) -> Result<Statement> {
        self.select_inner(Some(columns), select)
    }

    pub fn find_by_id(&self, id: impl Into<SqlValue>) -> Result<Statement> {
        let pk = self.primary_key()?;
        self.find_one(vec![Condition::eq(pk, id)])
    }

    pub fn find_one(&self, conditions: Vec<Condition>) -> Result<Statement> {
        self.select(&Select::from(conditions).limit(1))
    }

    pub fn find_many(&self, conditions: Vec<Condition>) -> Result<Statement> {
        self.select(&Select::from(conditions))
    }

    /// `INSERT ... RETURNING *`
    pub fn insert(&self, values: &Values) -> Result<Statement> {
        if values.is_empty() {
            return Err(Error::validation(format!(
                "Insert into '{}' needs at least one value",
                self.schema.name
            )));
        }

        let mut params = Params::new(self.dialect);
        let mut columns = Vec::with_capacity(values.len());
        let mut placeholders = Vec::with_capacity(values.len());
        for (column, value) in values {
            columns.push(self.column(column, &[])?);
            placeholders.push(params.push(value.clone()));
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
            self.table(),
            columns.join(", "),
            placeholders.join(", ")
        );
        Ok(params.finish(sql))
    }

    pub fn update(&self, values: &Values, conditions: &[Condition]) -> Result<Statement> {
        if values.is_empty() {
            return Err(Error::validation(format!(
                "Update of '{}' needs at least one assignment",
                self.schema.name
            )));
        }

        let mut params = Params::new(self.dialect);
        let assignments = values
            .iter()
            .map(|(column, value)| {
                let column = self.column(column, &[])?;
                Ok(format!("{} = {}", column, params.push(value.clone())))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut sql = format!("UPDATE {} SET {}", self.table(), assignments.join(", "));
        sql.push_str(&self.where_clause(conditions, &[], &mut params)?);
        Ok(params.finish(sql))
    }

    pub fn update_by_id(&self, id: impl Into<SqlValue>, values: &Values) -> Result<Statement> {
        let pk = self.primary_key()?;
        self.update(values, &[Condition::eq(pk, id)])
    }

    pub fn delete(&self, conditions: &[Condition]) -> Result<Statement> {
        let mut params = Params::new(self.dialect);
        let mut sql = format!("DELETE FROM {}", self.table());
        sql.push_str(&self.where_clause(conditions, &[], &mut params)?);
        Ok(params.finish(sql))
    }

    pub fn delete_by_id(&self, id: impl Into<SqlValue>) -> Result<Statement> {
        let pk = self.primary_key()?;
        self.delete(&[Condition::eq(pk, id)])
    }

    /// `SELECT COUNT(*) AS count ...`
    pub fn count(&self, conditions: &[Condition]) -> Result<Statement> {
        let mut params = Params::new(self.dialect);
        let mut sql = format!("SELECT COUNT(*) AS count FROM {}", self.table());
        sql.push_str(&self.where_clause(conditions, &[], &mut params)?);
        Ok(params.finish(sql))
    }

    pub fn exists(&self, conditions: &[Condition]) -> Result<Statement> {
        let mut params = Params::new(self.dialect);
        let mut sql = format!("SELECT 1 AS found FROM {}", self.table());
        sql.push_str(&self.where_clause(conditions, &[], &mut params)?);
        sql.push_str(" LIMIT 1");
        Ok(params.finish(sql))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Join;
    use dbs_core::ColumnSpec;

    fn users() -> TableSchema {
        TableSchema::new(
            "users",
            vec![
                ColumnSpec::new("id", "INTEGER").primary_key().auto_increment(),
                ColumnSpec::new("name", "TEXT"),
                ColumnSpec::new("age", "INTEGER"),
                ColumnSpec::new("city", "TEXT"),
            ],
        )
    }

    fn sqlite() -> QueryBuilder {
        QueryBuilder::new(users(), Dialect::Sqlite)
    }

    fn postgres() -> QueryBuilder {
        QueryBuilder::new(users(), Dialect::Postgres)
    }

    #[test]
    fn test_placeholders_per_dialect() {
        let select = Select::new()
            .filter(Condition::gte("age", 18))
            .filter(Condition::like("name", "J%"));

        let stmt = sqlite().select(&select).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT * FROM \"users\" WHERE \"age\" >= ? AND \"name\" LIKE ?"
        );
        assert_eq!(stmt.params, vec![SqlValue::Int(18), SqlValue::from("J%")]);

        let stmt = postgres().select(&select).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT * FROM \"users\" WHERE \"age\" >= $1 AND \"name\" LIKE $2"
        );
    }

    #[test]
    fn test_values_are_never_interpolated() {
        let stmt = sqlite()
            .find_many(vec![Condition::eq("name", "x'; DROP TABLE users; --")])
            .unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM \"users\" WHERE \"name\" = ?");
        assert_eq!(stmt.params.len(), 1);
    }

    #[test]
    fn test_in_lists() {
        let stmt = postgres()
            .find_many(vec![
                Condition::is_in("city", vec!["Oslo", "Lima"]),
                Condition::not_in("age", vec![1i64, 2]),
            ])
            .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT * FROM \"users\" WHERE \"city\" IN ($1, $2) AND \"age\" NOT IN ($3, $4)"
        );
        assert_eq!(stmt.params.len(), 4);

        let empty: Vec<i64> = Vec::new();
        let stmt = sqlite()
            .find_many(vec![
                Condition::is_in("id", empty.clone()),
                Condition::not_in("id", empty),
            ])
            .unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM \"users\" WHERE 1 = 0 AND 1 = 1");
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_null_handling() {
        let stmt = sqlite()
            .find_many(vec![
                Condition::is_null("city"),
                Condition::is_not_null("age"),
                Condition::eq("name", SqlValue::Null),
            ])
            .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT * FROM \"users\" WHERE \"city\" IS NULL AND \"age\" IS NOT NULL AND \"name\" IS NULL"
        );

        let stmt = postgres()
            .update_by_id(3, &vec![("city".into(), SqlValue::Null), ("age".into(), 40.into())])
            .unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE \"users\" SET \"city\" = NULL, \"age\" = $1 WHERE \"id\" = $2"
        );
        assert_eq!(stmt.params, vec![SqlValue::Int(40), SqlValue::Int(3)]);
    }

    #[test]
    fn test_joins_order_limit_offset() {
        let select = Select::new()
            .join(Join::left("orders", "users.id", "orders.user_id"))
            .filter(Condition::gt("orders.total", 10.5))
            .order_by("users.name", Direction::Desc)
            .limit(20)
            .offset(40);
        let stmt = sqlite()
            .select_columns(&["users.name", "orders.total"], &select)
            .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT \"users\".\"name\", \"orders\".\"total\" FROM \"users\" \
             LEFT JOIN \"orders\" ON \"users\".\"id\" = \"orders\".\"user_id\" \
             WHERE \"orders\".\"total\" > ? ORDER BY \"users\".\"name\" DESC LIMIT 20 OFFSET 40"
        );

        let stmt = sqlite().select(&Select::new().offset(5)).unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM \"users\" LIMIT -1 OFFSET 5");
        let stmt = postgres().select(&Select::new().offset(5)).unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM \"users\" OFFSET 5");
    }

    #[test]
    fn test_unknown_columns_are_rejected() {
        let err = sqlite()
            .find_many(vec![Condition::eq("nickname", "x")])
            .unwrap_err();
        assert!(matches!(err, Error::ColumnNotFound { .. }));

        let err = sqlite()
            .select_columns(&["ghosts.name"], &Select::new())
            .unwrap_err();
        assert!(matches!(err, Error::ColumnNotFound { .. }));

        let err = sqlite()
            .insert(&vec![("users.nope".into(), 1.into())])
            .unwrap_err();
        assert!(matches!(err, Error::ColumnNotFound { .. }));
    }

    #[test]
    fn test_insert_returning() {
        let stmt = postgres()
            .insert(&vec![("name".into(), "Ann".into()), ("age".into(), 31.into())])
            .unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"users\" (\"name\", \"age\") VALUES ($1, $2) RETURNING *"
        );
    }

    #[test]
    fn test_empty_writes_are_validation_errors() {
        assert!(matches!(sqlite().insert(&Vec::new()), Err(Error::Validation(_))));
        assert!(matches!(sqlite().update(&Vec::new(), &[]), Err(Error::Validation(_))));
    }

    #[test]
    fn test_id_operations_need_primary_key() {
        let builder = QueryBuilder::new(
            TableSchema::new("logs", vec![ColumnSpec::new("line", "TEXT")]),
            Dialect::Sqlite,
        );
        assert!(matches!(builder.find_by_id(1), Err(Error::NoPrimaryKey(_))));
        assert!(matches!(builder.delete_by_id(1), Err(Error::NoPrimaryKey(_))));
        assert!(matches!(
            builder.update_by_id(1, &vec![("line".into(), "x".into())]),
            Err(Error::NoPrimaryKey(_))
        ));
    }

    #[test]
    fn test_count_exists_delete() {
        let stmt = sqlite().count(&[Condition::eq("city", "Oslo")]).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT COUNT(*) AS count FROM \"users\" WHERE \"city\" = ?"
        );
        let stmt = postgres().exists(&[Condition::lt("age", 5)]).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT 1 AS found FROM \"users\" WHERE \"age\" < $1 LIMIT 1"
        );
        let stmt = sqlite().delete_by_id(7).unwrap();
        assert_eq!(stmt.sql, "DELETE FROM \"users\" WHERE \"id\" = ?");
    }
}
