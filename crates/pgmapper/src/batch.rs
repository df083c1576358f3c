//! Statement batch splitting and execution.
//!
//! Callers hand over a flat sequence of SQL fragments and parameter arrays;
//! [`split`] partitions it into discrete statements which are then executed
//! either strictly in order or concurrently.

use crate::client::Executor;
use crate::error::MapperResult;
use crate::escape::format;
use crate::row::Row;
use crate::value::Value;
use futures_util::future::join_all;

/// One item in a flat batch sequence.
#[derive(Debug, Clone)]
pub enum BatchItem {
    /// A SQL fragment.
    Sql(String),
    /// Parameters for the fragments accumulated so far. Always terminates
    /// the statement it belongs to.
    Params(Vec<Value>),
}

impl BatchItem {
    pub fn sql(fragment: impl Into<String>) -> Self {
        BatchItem::Sql(fragment.into())
    }

    pub fn params<V: Into<Value>, I: IntoIterator<Item = V>>(values: I) -> Self {
        BatchItem::Params(values.into_iter().map(Into::into).collect())
    }
}

impl From<&str> for BatchItem {
    fn from(s: &str) -> Self {
        BatchItem::Sql(s.to_string())
    }
}

impl From<String> for BatchItem {
    fn from(s: String) -> Self {
        BatchItem::Sql(s)
    }
}

impl From<Vec<Value>> for BatchItem {
    fn from(params: Vec<Value>) -> Self {
        BatchItem::Params(params)
    }
}

/// A single statement grouped out of a flat fragment sequence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statement {
    pub fragments: Vec<String>,
    pub params: Vec<Value>,
}

impl Statement {
    /// Render the statement: fragments space-joined, placeholders formatted.
    pub fn to_sql(&self) -> MapperResult<String> {
        format(&self.fragments.join(" "), &self.params)
    }

    fn is_empty(&self) -> bool {
        self.fragments.is_empty() && self.params.is_empty()
    }
}

/// Partition a flat item sequence into statements.
///
/// A boundary is declared when the current item is a parameter array, when it
/// is the last item, or when a fragment ends with `;` and the next item is
/// not a parameter array.
pub fn split(items: Vec<BatchItem>) -> Vec<Statement> {
    let mut statements = Vec::new();
    let mut current = Statement::default();
    let mut iter = items.into_iter().peekable();

    while let Some(item) = iter.next() {
        let ends = match &item {
            BatchItem::Params(_) => true,
            BatchItem::Sql(_) if iter.peek().is_none() => true,
            // a trailing ';' only closes the statement when no params follow
            BatchItem::Sql(fragment) => {
                fragment.ends_with(';') && !matches!(iter.peek(), Some(BatchItem::Params(_)))
            }
        };
        match item {
            BatchItem::Sql(fragment) => current.fragments.push(fragment),
            BatchItem::Params(params) => current.params.extend(params),
        }
        if ends {
            statements.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        statements.push(current);
    }
    statements
}

/// Run the statements strictly in order, stopping at the first failure.
pub async fn exec_series(
    conn: &impl Executor,
    items: Vec<BatchItem>,
) -> MapperResult<Vec<Vec<Row>>> {
    let mut results = Vec::new();
    for statement in split(items) {
        let sql = statement.to_sql()?;
        let output = conn.query(&sql).await?;
        results.push(output.rows);
    }
    Ok(results)
}

/// Run the statements concurrently; failures surface individually and
/// results keep the original input order regardless of completion order.
pub async fn exec_parallel(
    conn: &impl Executor,
    items: Vec<BatchItem>,
) -> Vec<MapperResult<Vec<Row>>> {
    let futures = split(items).into_iter().map(|statement| async move {
        let sql = statement.to_sql()?;
        let output = conn.query(&sql).await?;
        Ok(output.rows)
    });
    join_all(futures).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frags(statement: &Statement) -> Vec<&str> {
        statement.fragments.iter().map(String::as_str).collect()
    }

    #[test]
    fn param_array_terminates_statement() {
        let statements = split(vec![
            BatchItem::sql("select * from t where id = ?;"),
            BatchItem::params([1i64]),
            BatchItem::sql("select * from u;"),
        ]);
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].params, vec![Value::Int(1)]);
        assert_eq!(frags(&statements[1]), vec!["select * from u;"]);
    }

    #[test]
    fn semicolon_without_params_terminates() {
        let statements = split(vec![
            BatchItem::sql("select a"),
            BatchItem::sql("from b;"),
            BatchItem::sql("select c from d;"),
        ]);
        assert_eq!(statements.len(), 2);
        assert_eq!(frags(&statements[0]), vec!["select a", "from b;"]);
        assert_eq!(frags(&statements[1]), vec!["select c from d;"]);
    }

    #[test]
    fn semicolon_followed_by_params_keeps_accumulating() {
        let statements = split(vec![
            BatchItem::sql("select * from t where id = ?;"),
            BatchItem::params([7i64]),
        ]);
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].params, vec![Value::Int(7)]);
    }

    #[test]
    fn last_item_always_closes() {
        let statements = split(vec![
            BatchItem::sql("select a"),
            BatchItem::sql("from b"),
        ]);
        assert_eq!(statements.len(), 1);
        assert_eq!(frags(&statements[0]), vec!["select a", "from b"]);
    }

    #[test]
    fn statement_renders_with_params() {
        let statements = split(vec![
            BatchItem::sql("select *"),
            BatchItem::sql("from t where id = ?;"),
            BatchItem::params([3i64]),
        ]);
        assert_eq!(
            statements[0].to_sql().unwrap(),
            "select * from t where id = 3;"
        );
    }

    #[test]
    fn empty_input_yields_no_statements() {
        assert!(split(Vec::new()).is_empty());
    }
}
