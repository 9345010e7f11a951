//! SQLite schema editing
//!
//! SQLite cannot alter or drop a column in place, so [`SqliteSchemaEditor`]
//! rebuilds the table: create a temp table with the new definition, copy the
//! rows across, drop the original and rename the temp table into its place.
//! The whole rebuild runs in one transaction on one connection with foreign
//! key enforcement off and legacy `ALTER TABLE` semantics on, so views over
//! the table survive the swap; any failure rolls it back. Table-level
//! `UNIQUE`, `FOREIGN KEY` and `CHECK` constraints are carried over.

use super::{SqliteDriver, fetch_on};
use crate::Driver;
use dbs_core::{ColumnSpec, DefaultValue, Error, Result, SqlValue, TableSchema, quote_name};
use sqlx::sqlite::SqliteConnection;
use sqlx::{Connection, Row, Sqlite, Transaction};
use uuid::Uuid;

const KEYWORD_DEFAULTS: &[&str] = &["CURRENT_TIMESTAMP", "CURRENT_DATE", "CURRENT_TIME", "NULL"];

/// DDL operations for one SQLite database
#[derive(Debug, Clone)]
pub struct SqliteSchemaEditor {
    driver: SqliteDriver,
}

impl SqliteSchemaEditor {
    pub fn new(driver: SqliteDriver) -> Self {
        Self { driver }
    }

    /// Current column definitions, in declaration order
    pub async fn table_columns(&self, table: &str) -> Result<Vec<ColumnSpec>> {
        let mut conn = self.driver.connect().await?;
        let result = read_columns(&mut conn, table).await;
        SqliteDriver::release(conn).await;
        result
    }

    pub async fn describe(&self, table: &str) -> Result<TableSchema> {
        Ok(TableSchema::new(table, self.table_columns(table).await?))
    }

    /// Replace the definition of `column`, keeping its position and data.
    pub async fn modify_column(&self, table: &str, column: &str, new_spec: ColumnSpec) -> Result<()> {
        let current = self.table_columns(table).await?;
        let idx = current
            .iter()
            .position(|c| c.name == column)
            .ok_or_else(|| Error::column_not_found(table, column))?;

        if current
            .iter()
            .enumerate()
            .any(|(i, c)| i != idx && c.name == new_spec.name)
        {
            return Err(Error::validation(format!(
                "Column '{}' already exists in table '{}'",
                new_spec.name, table
            )));
        }

        let mut columns = current.clone();
        columns[idx] = new_spec;

        let copies: Vec<(String, String)> = columns
            .iter()
            .zip(current.iter())
            .map(|(new, old)| (new.name.clone(), old.name.clone()))
            .collect();

        tracing::info!(table = %table, column = %column, "Modifying SQLite column");
        self.rebuild(table, &columns, &copies).await
    }

    /// Remove `column`; a table cannot be left without columns.
    pub async fn drop_column(&self, table: &str, column: &str) -> Result<()> {
        let current = self.table_columns(table).await?;
        if !current.iter().any(|c| c.name == column) {
            return Err(Error::column_not_found(table, column));
        }
        if current.len() == 1 {
            return Err(Error::invariant(format!(
                "Cannot drop '{}': it is the only column of table '{}'",
                column, table
            )));
        }

        let columns: Vec<ColumnSpec> = current.into_iter().filter(|c| c.name != column).collect();
        let copies: Vec<(String, String)> = columns
            .iter()
            .map(|c| (c.name.clone(), c.name.clone()))
            .collect();

        tracing::info!(table = %table, column = %column, "Dropping SQLite column");
        self.rebuild(table, &columns, &copies).await
    }

    pub async fn add_column(&self, table: &str, spec: &ColumnSpec) -> Result<()> {
        if spec.primary_key {
            return Err(Error::invariant(
                "SQLite cannot add a PRIMARY KEY column to an existing table",
            ));
        }
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {}",
            quote_name(table),
            render_column(spec, false)?
        );
        tracing::info!(table = %table, column = %spec.name, "Adding SQLite column");
        self.driver.execute(&sql, &[]).await?;
        Ok(())
    }

    pub async fn create_table(&self, schema: &TableSchema) -> Result<()> {
        let sql = render_create_table(&schema.name, &schema.columns)?;
        tracing::info!(table = %schema.name, "Creating SQLite table");
        self.driver.execute(&sql, &[]).await?;
        Ok(())
    }

    pub async fn rename_table(&self, from: &str, to: &str) -> Result<()> {
        if to.trim().is_empty() {
            return Err(Error::validation("New table name must not be empty"));
        }
        let sql = format!("ALTER TABLE {} RENAME TO {}", quote_name(from), quote_name(to));
        tracing::info!(from = %from, to = %to, "Renaming SQLite table");
        self.driver.execute(&sql, &[]).await?;
        Ok(())
    }

    pub async fn drop_table(&self, table: &str) -> Result<()> {
        let sql = format!("DROP TABLE {}", quote_name(table));
        tracing::info!(table = %table, "Dropping SQLite table");
        self.driver.execute(&sql, &[]).await?;
        Ok(())
    }

    /// Rebuild `table` with `columns`, copying each `(new, old)` column pair.
    async fn rebuild(&self, table: &str, columns: &[ColumnSpec], copies: &[(String, String)]) -> Result<()> {
        let temp = format!("{}__rebuild_{}", table, &Uuid::new_v4().simple().to_string()[..8]);
        let mut conn = self.driver.connect().await?;
        let result = rebuild_on(&mut conn, table, &temp, columns, copies).await;
        SqliteDriver::release(conn).await;
        result
    }
}

async fn rebuild_on(
    conn: &mut SqliteConnection,
    table: &str,
    temp: &str,
    columns: &[ColumnSpec],
    copies: &[(String, String)],
) -> Result<()> {
    let old_columns: Vec<String> = read_columns(conn, table)
        .await?
        .into_iter()
        .map(|c| c.name)
        .collect();
    let constraints = read_constraints(conn, table)
        .await?
        .carried_over(table, &old_columns, copies);
    // Rendering errors surface before any DDL runs
    let create_sql = render_create_table_with(temp, columns, &constraints)?;
    let dependents = dependent_objects(conn, table).await?;

    // Both pragmas must be set outside the transaction to take effect
    sqlx::query("PRAGMA foreign_keys = OFF").execute(&mut *conn).await?;
    sqlx::query("PRAGMA legacy_alter_table = ON").execute(&mut *conn).await?;

    let result = match conn.begin().await {
        Ok(mut tx) => {
            match rebuild_steps(&mut tx, table, temp, &create_sql, copies, &dependents).await {
                Ok(()) => tx.commit().await.map_err(Error::from),
                Err(e) => {
                    if let Err(rollback) = tx.rollback().await {
                        tracing::warn!(table = %table, error = %rollback, "Rollback of table rebuild failed");
                    }
                    Err(e)
                }
            }
        }
        Err(e) => Err(Error::from(e)),
    };

    for pragma in ["PRAGMA legacy_alter_table = OFF", "PRAGMA foreign_keys = ON"] {
        if let Err(e) = sqlx::query(pragma).execute(&mut *conn).await {
            tracing::debug!(pragma = %pragma, error = %e, "Failed to restore connection setting");
        }
    }
    result
}

async fn rebuild_steps(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
    temp: &str,
    create_sql: &str,
    copies: &[(String, String)],
    dependents: &[(String, String)],
) -> Result<()> {
    sqlx::query(create_sql).execute(&mut **tx).await?;

    let targets: Vec<String> = copies.iter().map(|(new, _)| quote_name(new)).collect();
    let sources: Vec<String> = copies.iter().map(|(_, old)| quote_name(old)).collect();
    let copy_sql = format!(
        "INSERT INTO {} ({}) SELECT {} FROM {}",
        quote_name(temp),
        targets.join(", "),
        sources.join(", "),
        quote_name(table)
    );
    sqlx::query(&copy_sql).execute(&mut **tx).await?;

    sqlx::query(&format!("DROP TABLE {}", quote_name(table)))
        .execute(&mut **tx)
        .await?;
    sqlx::query(&format!(
        "ALTER TABLE {} RENAME TO {}",
        quote_name(temp),
        quote_name(table)
    ))
    .execute(&mut **tx)
    .await?;

    // Indexes and triggers died with the original table
    for (name, sql) in dependents {
        if let Err(e) = sqlx::query(sql).execute(&mut **tx).await {
            tracing::warn!(
                table = %table,
                object = %name,
                error = %e,
                "Skipping index or trigger that no longer applies after rebuild"
            );
        }
    }

    Ok(())
}

/// `FOREIGN KEY (...) REFERENCES parent (...)`; an empty `to` list targets
/// the parent's primary key
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ForeignKey {
    pub from: Vec<String>,
    pub table: String,
    pub to: Vec<String>,
    pub on_update: String,
    pub on_delete: String,
}

/// Table-level constraints that `pragma_table_info` does not report
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableConstraints {
    pub unique: Vec<Vec<String>>,
    pub foreign_keys: Vec<ForeignKey>,
    pub checks: Vec<String>,
}

impl TableConstraints {
    /// Map constraints through a rebuild's `(new, old)` column pairs.
    ///
    /// Constraints naming a column that no longer exists are dropped, and so
    /// is any `CHECK` mentioning a renamed or dropped column.
    fn carried_over(self, table: &str, old_columns: &[String], copies: &[(String, String)]) -> Self {
        let rename = |column: &String| {
            copies
                .iter()
                .find(|(_, old)| old.eq_ignore_ascii_case(column))
                .map(|(new, _)| new.clone())
        };
        let remap = |columns: &[String]| columns.iter().map(rename).collect::<Option<Vec<String>>>();

        let mut kept = TableConstraints::default();
        for columns in self.unique {
            match remap(&columns) {
                Some(columns) => kept.unique.push(columns),
                None => tracing::warn!(table = %table, columns = ?columns, "Dropping UNIQUE constraint on removed column"),
            }
        }
        for fk in self.foreign_keys {
            match remap(&fk.from) {
                Some(from) => kept.foreign_keys.push(ForeignKey { from, ..fk }),
                None => tracing::warn!(table = %table, parent = %fk.table, "Dropping FOREIGN KEY on removed column"),
            }
        }

        // Old columns that were renamed or removed
        let changed: Vec<&String> = old_columns
            .iter()
            .filter(|column| rename(*column).as_ref() != Some(*column))
            .collect();
        for check in self.checks {
            if changed.iter().any(|column| mentions_word(&check, column)) {
                tracing::warn!(table = %table, check = %check, "Dropping CHECK constraint on changed column");
            } else {
                kept.checks.push(check);
            }
        }
        kept
    }
}

async fn read_constraints(conn: &mut SqliteConnection, table: &str) -> Result<TableConstraints> {
    let mut constraints = TableConstraints::default();

    let indexes: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM pragma_index_list(?) WHERE origin = 'u' ORDER BY seq DESC",
    )
    .bind(table)
    .fetch_all(&mut *conn)
    .await?;
    for index in indexes {
        let columns: Vec<String> =
            sqlx::query_scalar("SELECT name FROM pragma_index_info(?) ORDER BY seqno")
                .bind(&index)
                .fetch_all(&mut *conn)
                .await?;
        if !columns.is_empty() {
            constraints.unique.push(columns);
        }
    }

    let rows = sqlx::query(
        "SELECT id, \"table\", \"from\", \"to\", on_update, on_delete \
         FROM pragma_foreign_key_list(?) ORDER BY id, seq",
    )
    .bind(table)
    .fetch_all(&mut *conn)
    .await?;
    let mut current: Option<(i64, ForeignKey)> = None;
    for row in &rows {
        let id: i64 = row.get("id");
        if current.as_ref().map(|(cur, _)| *cur) != Some(id) {
            if let Some((_, fk)) = current.take() {
                constraints.foreign_keys.push(fk);
            }
            current = Some((
                id,
                ForeignKey {
                    table: row.get("table"),
                    on_update: row.get("on_update"),
                    on_delete: row.get("on_delete"),
                    ..ForeignKey::default()
                },
            ));
        }
        if let Some((_, fk)) = current.as_mut() {
            fk.from.push(row.get("from"));
            if let Some(to) = row.get::<Option<String>, _>("to") {
                fk.to.push(to);
            }
        }
    }
    if let Some((_, fk)) = current {
        constraints.foreign_keys.push(fk);
    }

    let create_sql: Option<String> = sqlx::query_scalar::<_, Option<String>>(
        "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?",
    )
    .bind(table)
    .fetch_optional(&mut *conn)
    .await?
    .flatten();
    if let Some(sql) = create_sql {
        constraints.checks = check_expressions(&sql);
    }

    Ok(constraints)
}

/// Bodies of every `CHECK (...)` clause in a `CREATE TABLE` statement
pub fn check_expressions(create_sql: &str) -> Vec<String> {
    let chars: Vec<char> = create_sql.chars().collect();
    let mut checks = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '\'' | '"' | '`' | '[' => {
                i = skip_quoted(&chars, i);
                continue;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                if !word.eq_ignore_ascii_case("CHECK") {
                    continue;
                }
                let mut j = i;
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }
                if j < chars.len() && chars[j] == '(' {
                    if let Some(end) = matching_paren(&chars, j) {
                        checks.push(chars[j + 1..end].iter().collect::<String>().trim().to_string());
                        i = end + 1;
                    }
                }
                continue;
            }
            _ => i += 1,
        }
    }
    checks
}

/// Index just past the quoted section opening at `start`
fn skip_quoted(chars: &[char], start: usize) -> usize {
    let close = match chars[start] {
        '[' => ']',
        c => c,
    };
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == close {
            // A doubled quote is an escaped quote
            if close != ']' && chars.get(i + 1) == Some(&close) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

fn matching_paren(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i < chars.len() {
        match chars[i] {
            '\'' | '"' | '`' | '[' => {
                i = skip_quoted(chars, i);
                continue;
            }
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Whether `expr` mentions `word` as a whole identifier, case-insensitively
fn mentions_word(expr: &str, word: &str) -> bool {
    let is_ident = |c: char| c.is_ascii_alphanumeric() || c == '_';
    let lower = expr.to_ascii_lowercase();
    let word = word.to_ascii_lowercase();
    lower.match_indices(&word).any(|(idx, _)| {
        let before = lower[..idx].chars().next_back();
        let after = lower[idx + word.len()..].chars().next();
        !before.is_some_and(is_ident) && !after.is_some_and(is_ident)
    })
}

/// Explicit indexes and triggers defined on `table`, as `(name, sql)`
async fn dependent_objects(conn: &mut SqliteConnection, table: &str) -> Result<Vec<(String, String)>> {
    let rows = sqlx::query(
        "SELECT name, sql FROM sqlite_master \
         WHERE tbl_name = ? AND type IN ('index', 'trigger') AND sql IS NOT NULL",
    )
    .bind(table)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .iter()
        .map(|row| (row.get("name"), row.get("sql")))
        .collect())
}

async fn read_columns(conn: &mut SqliteConnection, table: &str) -> Result<Vec<ColumnSpec>> {
    let info = fetch_on(
        conn,
        "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?) ORDER BY cid",
        &[SqlValue::from(table)],
    )
    .await?;

    if info.rows.is_empty() {
        return Err(Error::not_found(format!("Table '{}' not found", table)));
    }

    let create_sql: Option<String> = sqlx::query_scalar::<_, Option<String>>(
        "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?",
    )
    .bind(table)
    .fetch_optional(&mut *conn)
    .await?
    .flatten();
    let autoincrement = create_sql
        .map(|sql| sql.to_ascii_uppercase().contains("AUTOINCREMENT"))
        .unwrap_or(false);

    let pk_count = info
        .rows
        .iter()
        .filter(|row| row.get("pk").and_then(|v| v.as_i64()).unwrap_or(0) > 0)
        .count();

    let columns = info
        .rows
        .iter()
        .map(|row| {
            let text = |key: &str| row.get(key).and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let int = |key: &str| row.get(key).and_then(|v| v.as_i64()).unwrap_or(0);

            let data_type = text("type");
            let primary_key = int("pk") > 0;
            ColumnSpec {
                name: text("name"),
                auto_increment: autoincrement
                    && primary_key
                    && pk_count == 1
                    && is_integer_type(&data_type),
                data_type,
                nullable: int("notnull") == 0,
                primary_key,
                default_value: row
                    .get("dflt_value")
                    .and_then(|v| v.as_str())
                    .map(parse_default),
            }
        })
        .collect();

    Ok(columns)
}

/// Interpret a `dflt_value` as reported by `PRAGMA table_info`
pub fn parse_default(raw: &str) -> DefaultValue {
    let trimmed = raw.trim();

    if trimmed.len() >= 2 && trimmed.starts_with('\'') && trimmed.ends_with('\'') {
        let inner = &trimmed[1..trimmed.len() - 1];
        return DefaultValue::Literal(SqlValue::Text(inner.replace("''", "'")));
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return DefaultValue::Literal(SqlValue::Int(i));
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if f.is_finite() {
            return DefaultValue::Literal(SqlValue::Float(f));
        }
    }
    match trimmed.to_ascii_uppercase().as_str() {
        "TRUE" => DefaultValue::Literal(SqlValue::Bool(true)),
        "FALSE" => DefaultValue::Literal(SqlValue::Bool(false)),
        _ => DefaultValue::Expression(trimmed.to_string()),
    }
}

fn is_integer_type(data_type: &str) -> bool {
    data_type.trim().eq_ignore_ascii_case("INTEGER")
}

/// Render a `DEFAULT` operand. Expressions that are not a keyword, number or
/// quoted string need parentheses in SQLite DDL.
pub fn render_default(default: &DefaultValue) -> String {
    match default {
        DefaultValue::Literal(value) => value.to_sql_literal(),
        DefaultValue::Expression(expr) => {
            let expr = expr.trim();
            let bare = KEYWORD_DEFAULTS.contains(&expr.to_ascii_uppercase().as_str())
                || expr.parse::<f64>().is_ok()
                || (expr.starts_with('\'') && expr.ends_with('\''))
                || (expr.starts_with('(') && expr.ends_with(')'));
            if bare {
                expr.to_string()
            } else {
                format!("({})", expr)
            }
        }
    }
}

/// Render one column definition.
///
/// `inline_pk` marks the sole primary-key column, which carries `PRIMARY
/// KEY` (and optionally `AUTOINCREMENT`) inline.
pub fn render_column(spec: &ColumnSpec, inline_pk: bool) -> Result<String> {
    if spec.name.trim().is_empty() {
        return Err(Error::validation("Column name must not be empty"));
    }

    let mut sql = quote_name(&spec.name);
    let data_type = spec.data_type.trim();
    if !data_type.is_empty() {
        sql.push(' ');
        sql.push_str(data_type);
    }

    if inline_pk {
        sql.push_str(" PRIMARY KEY");
        if spec.auto_increment {
            if !is_integer_type(data_type) {
                return Err(Error::invariant(format!(
                    "AUTOINCREMENT on '{}' requires type INTEGER, got '{}'",
                    spec.name, data_type
                )));
            }
            sql.push_str(" AUTOINCREMENT");
        }
    } else {
        if spec.auto_increment {
            return Err(Error::invariant(format!(
                "AUTOINCREMENT on '{}' requires a single-column INTEGER PRIMARY KEY",
                spec.name
            )));
        }
        if !spec.nullable {
            sql.push_str(" NOT NULL");
        }
    }

    if let Some(default) = &spec.default_value {
        sql.push_str(" DEFAULT ");
        sql.push_str(&render_default(default));
    }

    Ok(sql)
}

/// Render `CREATE TABLE` for `columns`; several key columns become a
/// table-level `PRIMARY KEY (...)` constraint.
pub fn render_create_table(table: &str, columns: &[ColumnSpec]) -> Result<String> {
    render_create_table_with(table, columns, &TableConstraints::default())
}

/// [`render_create_table`] followed by table-level constraints
pub fn render_create_table_with(
    table: &str,
    columns: &[ColumnSpec],
    constraints: &TableConstraints,
) -> Result<String> {
    if columns.is_empty() {
        return Err(Error::invariant(format!(
            "Table '{}' must have at least one column",
            table
        )));
    }

    let keys: Vec<&ColumnSpec> = columns.iter().filter(|c| c.primary_key).collect();
    let inline = keys.len() == 1;

    let mut definitions = columns
        .iter()
        .map(|c| render_column(c, inline && c.primary_key))
        .collect::<Result<Vec<_>>>()?;

    if keys.len() > 1 {
        let names: Vec<String> = keys.iter().map(|c| quote_name(&c.name)).collect();
        definitions.push(format!("PRIMARY KEY ({})", names.join(", ")));
    }

    let name_list = |names: &[String]| names.iter().map(|n| quote_name(n)).collect::<Vec<_>>().join(", ");
    for unique in &constraints.unique {
        definitions.push(format!("UNIQUE ({})", name_list(unique)));
    }
    for fk in &constraints.foreign_keys {
        let mut clause = format!(
            "FOREIGN KEY ({}) REFERENCES {}",
            name_list(&fk.from),
            quote_name(&fk.table)
        );
        if !fk.to.is_empty() {
            clause.push_str(&format!(" ({})", name_list(&fk.to)));
        }
        for (event, action) in [("UPDATE", &fk.on_update), ("DELETE", &fk.on_delete)] {
            if !action.is_empty() && !action.eq_ignore_ascii_case("NO ACTION") {
                clause.push_str(&format!(" ON {} {}", event, action));
            }
        }
        definitions.push(clause);
    }
    for check in &constraints.checks {
        definitions.push(format!("CHECK ({})", check));
    }

    Ok(format!(
        "CREATE TABLE {} ({})",
        quote_name(table),
        definitions.join(", ")
    ))
}
