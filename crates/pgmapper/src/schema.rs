//! Table schemas and the schema catalog.
//!
//! The catalog introspects each table once (two metadata queries against the
//! information schema) and memoizes the result. Loads are single-flight:
//! concurrent first requests for the same table share one introspection.

use crate::client::Executor;
use crate::error::{MapperError, MapperResult};
use crate::escape::format;
use crate::row::Row;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

const COLUMNS_SQL: &str = "SELECT column_name, is_nullable, data_type, character_maximum_length, column_default FROM information_schema.columns WHERE table_catalog = ? AND table_name = ?;";

const PRIMARY_KEY_SQL: &str = "SELECT column_name FROM information_schema.table_constraints TC INNER JOIN information_schema.key_column_usage KCU ON TC.constraint_name = KCU.constraint_name WHERE constraint_type = 'PRIMARY KEY' AND TC.table_catalog = ? AND TC.table_name = ?;";

/// Quote a SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    out.push('"');
    for ch in name.chars() {
        if ch == '"' {
            out.push_str("\"\"");
        } else {
            out.push(ch);
        }
    }
    out.push('"');
    out
}

/// Column list, primary key and pre-escaped identifiers for one table.
///
/// Never mutated after construction.
#[derive(Debug, Clone)]
pub struct Schema {
    pub table_name: String,
    pub columns: Vec<String>,
    escaped_columns: HashMap<String, String>,
    pub escaped_table_name: String,
    pub primary_key: Option<String>,
}

impl Schema {
    /// Build a schema from a known column list, pre-computing quoted forms.
    pub fn new(
        table_name: impl Into<String>,
        columns: Vec<String>,
        primary_key: Option<String>,
    ) -> Self {
        let table_name = table_name.into();
        let escaped_columns = columns
            .iter()
            .map(|c| (c.clone(), quote_ident(c)))
            .collect();
        let escaped_table_name = quote_ident(&table_name);
        Self {
            table_name,
            columns,
            escaped_columns,
            escaped_table_name,
            primary_key,
        }
    }

    /// Whether the table has a column with this name.
    pub fn has_column(&self, name: &str) -> bool {
        // dotted references validate on the leading segment
        let head = name.split('.').next().unwrap_or(name);
        self.escaped_columns.contains_key(head)
    }

    /// The quoted form of a known column.
    pub fn escaped_column(&self, name: &str) -> Option<&str> {
        self.escaped_columns.get(name).map(String::as_str)
    }

    /// Comma-join the quoted forms of the given columns, skipping unknowns.
    pub fn escaped_column_list<'a, I>(&self, names: I) -> String
    where
        I: IntoIterator<Item = &'a str>,
    {
        names
            .into_iter()
            .filter_map(|n| self.escaped_column(n))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// The primary key column, or a validation error for tables without one.
    pub fn require_primary_key(&self) -> MapperResult<&str> {
        self.primary_key.as_deref().ok_or_else(|| {
            MapperError::validation(format!(
                "table '{}' has no primary key",
                self.table_name
            ))
        })
    }

    /// The quoted primary key column.
    pub fn escaped_primary_key(&self) -> MapperResult<String> {
        Ok(quote_ident(self.require_primary_key()?))
    }
}

/// Process-wide schema catalog, passed by reference where needed.
pub struct Catalog {
    database: String,
    strict: bool,
    tables: Mutex<HashMap<String, Arc<OnceCell<Arc<Schema>>>>>,
}

impl Catalog {
    /// Create a catalog for one database.
    pub fn new(database: impl Into<String>, strict: bool) -> Self {
        Self {
            database: database.into(),
            strict,
            tables: Mutex::new(HashMap::new()),
        }
    }

    /// Load a table's schema, introspecting at most once per table.
    pub async fn load(&self, conn: &impl Executor, table: &str) -> MapperResult<Arc<Schema>> {
        let cell = {
            let mut tables = self.tables.lock().expect("catalog lock poisoned");
            Arc::clone(tables.entry(table.to_string()).or_default())
        };
        let schema = cell
            .get_or_try_init(|| self.introspect(conn, table))
            .await?;
        Ok(Arc::clone(schema))
    }

    async fn introspect(&self, conn: &impl Executor, table: &str) -> MapperResult<Arc<Schema>> {
        let columns_sql = format(COLUMNS_SQL, &[self.database.as_str().into(), table.into()])?;
        let column_rows = conn.query(&columns_sql).await?.rows;
        let columns: Vec<String> = column_rows
            .iter()
            .filter_map(column_name)
            .collect();
        if columns.is_empty() {
            tracing::warn!("no columns found for table '{table}'");
        }

        let pk_sql = format(
            PRIMARY_KEY_SQL,
            &[self.database.as_str().into(), table.into()],
        )?;
        let pk_rows = conn.query(&pk_sql).await?.rows;
        let primary_key = pk_rows.first().and_then(column_name);
        if primary_key.is_none() && self.strict {
            tracing::warn!("primary key not defined in database for '{table}'");
        }

        Ok(Arc::new(Schema::new(table, columns, primary_key)))
    }
}

fn column_name(row: &Row) -> Option<String> {
    row.get("column_name")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}
