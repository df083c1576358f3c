//! Clause-buffer SQL statement builder.
//!
//! One builder produces one statement. Clause methods chain by value and
//! defer any error they hit; [`QueryBuilder::build`] consumes the builder,
//! reports the first deferred error, and otherwise assembles the final
//! statement from the clause slots in fixed order.

use crate::error::{MapperError, MapperResult};
use crate::escape::{escape, format};
use crate::row::Row;
use crate::schema::{Schema, quote_ident};
use crate::value::Value;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryKind {
    Select,
    Insert,
    Update,
    Delete,
    Raw,
}

/// Clause slots, in assembly order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub(crate) enum Slot {
    Select = 0,
    Where,
    Set,
    Order,
    Limit,
    Offset,
    Returning,
}

const SLOT_COUNT: usize = 7;

/// A SQL statement under construction.
#[derive(Debug)]
pub struct QueryBuilder {
    schema: Option<Arc<Schema>>,
    strict: bool,
    kind: QueryKind,
    /// Escaped table name, or a raw FROM override.
    table: Option<String>,
    slots: [Option<String>; SLOT_COUNT],
    /// Per-slot bit set when a caller explicitly wrote the slot.
    changed: u16,
    /// INSERT column/value body, built eagerly.
    insert_body: Option<String>,
    raw_sql: Option<String>,
    /// First error hit while chaining, reported by `build()`.
    build_error: Option<MapperError>,
}

impl QueryBuilder {
    /// Create a builder bound to a table schema. Starts as `SELECT *`.
    pub fn new(schema: Arc<Schema>, strict: bool) -> Self {
        let table = schema.escaped_table_name.clone();
        let mut qb = Self {
            schema: Some(schema),
            strict,
            kind: QueryKind::Select,
            table: Some(table),
            slots: Default::default(),
            changed: 0,
            insert_body: None,
            raw_sql: None,
            build_error: None,
        };
        qb.slots[Slot::Select as usize] = Some("*".to_string());
        qb
    }

    /// Create an unbound builder, usable only for raw SQL.
    pub fn unbound() -> Self {
        Self {
            schema: None,
            strict: false,
            kind: QueryKind::Raw,
            table: None,
            slots: Default::default(),
            changed: 0,
            insert_body: None,
            raw_sql: None,
            build_error: None,
        }
    }

    fn reset(&mut self) {
        self.slots = Default::default();
        self.changed = 0;
        self.insert_body = None;
        self.raw_sql = None;
    }

    fn fail(&mut self, err: MapperError) {
        if self.build_error.is_none() {
            self.build_error = Some(err);
        }
    }

    fn put(&mut self, slot: Slot, clause: String) {
        self.slots[slot as usize] = Some(clause);
        self.changed |= 1 << slot as usize;
    }

    fn slot(&self, slot: Slot) -> Option<&str> {
        self.slots[slot as usize].as_deref()
    }

    pub(crate) fn has_clause(&self, slot: Slot) -> bool {
        self.changed & (1 << slot as usize) != 0
    }

    pub(crate) fn is_select(&self) -> bool {
        self.kind == QueryKind::Select
    }

    fn schema_or_fail(&mut self) -> Option<Arc<Schema>> {
        match &self.schema {
            Some(schema) => Some(Arc::clone(schema)),
            None => {
                self.fail(MapperError::validation("builder is not bound to a table"));
                None
            }
        }
    }

    // ==================== verbs ====================

    /// Start a `SELECT *`.
    pub fn select_all(mut self) -> Self {
        self.reset();
        self.kind = QueryKind::Select;
        self.slots[Slot::Select as usize] = Some("*".to_string());
        self
    }

    /// Start a SELECT over the given columns.
    ///
    /// Unknown names are dropped; an empty result falls back to `*`.
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.reset();
        self.kind = QueryKind::Select;
        let list = match self.schema_or_fail() {
            Some(schema) => {
                let list = schema.escaped_column_list(columns.iter().copied());
                if list.is_empty() { "*".to_string() } else { list }
            }
            None => "*".to_string(),
        };
        self.slots[Slot::Select as usize] = Some(list);
        self
    }

    /// Start a SELECT with a caller-trusted verbatim select list.
    pub fn select_raw(mut self, clause: &str) -> Self {
        self.reset();
        self.kind = QueryKind::Select;
        self.put(Slot::Select, clause.to_string());
        self
    }

    /// Start an UPDATE.
    pub fn update(mut self) -> Self {
        self.reset();
        self.kind = QueryKind::Update;
        self
    }

    /// Start a DELETE.
    pub fn delete(mut self) -> Self {
        self.reset();
        self.kind = QueryKind::Delete;
        self
    }

    /// Start an INSERT of one row.
    ///
    /// A `RETURNING` clause defaulting to the primary key is appended so the
    /// generated identifier is recoverable.
    pub fn insert(self, row: &Row) -> Self {
        self.insert_many(std::slice::from_ref(row))
    }

    /// Start a multi-row INSERT. Columns are taken from the first row's
    /// valid fields; missing values in later rows insert as `NULL`.
    pub fn insert_many(mut self, rows: &[Row]) -> Self {
        self.reset();
        self.kind = QueryKind::Insert;
        let Some(schema) = self.schema_or_fail() else {
            return self;
        };
        let Some(first) = rows.first() else {
            self.fail(MapperError::validation("insert of zero rows"));
            return self;
        };

        let fields = self.valid_fields(&schema, first);
        if fields.is_empty() {
            self.fail(MapperError::validation("insert has no usable columns"));
            return self;
        }

        let mut body = schema.escaped_table_name.clone();
        body.push_str(" (");
        body.push_str(&schema.escaped_column_list(fields.iter().map(String::as_str)));
        body.push_str(") VALUES ");
        for (i, row) in rows.iter().enumerate() {
            if i > 0 {
                body.push_str(", ");
            }
            body.push('(');
            for (j, field) in fields.iter().enumerate() {
                if j > 0 {
                    body.push_str(", ");
                }
                let value = row.get(field).cloned().unwrap_or(Value::Null);
                body.push_str(&escape(&value));
            }
            body.push(')');
        }
        self.insert_body = Some(body);

        if self.slot(Slot::Returning).is_none() {
            if let Ok(pk) = schema.escaped_primary_key() {
                self.slots[Slot::Returning as usize] = Some(pk);
            }
        }
        self
    }

    /// Raw SQL mode: the formatted template is emitted as-is.
    pub fn sql(mut self, template: &str, params: &[Value]) -> Self {
        self.reset();
        self.kind = QueryKind::Raw;
        match format(template, params) {
            Ok(sql) => self.raw_sql = Some(sql),
            Err(err) => self.fail(err),
        }
        self
    }

    // ==================== clauses ====================

    /// Override the FROM clause with a verbatim expression.
    pub fn from_raw(mut self, clause: &str) -> Self {
        self.table = Some(clause.to_string());
        self
    }

    /// WHERE from (key, value) pairs joined with AND.
    ///
    /// A key is a column name optionally followed by an operator
    /// (`"age >"`, `"title NOT IN"`). Array values produce `IN (...)`,
    /// null values produce `IS NULL`, anything else defaults to `=`.
    /// Unknown columns are dropped, or fail in strict mode; a predicate
    /// with nothing left is always an error.
    pub fn where_fields<I, K>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        let Some(schema) = self.schema_or_fail() else {
            return self;
        };

        let mut parts: Vec<String> = Vec::new();
        for (key, value) in fields {
            let key = key.as_ref();
            let (column, operator) = match key.find(' ') {
                Some(pos) => (&key[..pos], Some(key[pos + 1..].trim())),
                None => (key, None),
            };
            if !schema.has_column(column) {
                if self.strict {
                    self.fail(MapperError::validation(format!(
                        "unknown column '{column}' in WHERE clause"
                    )));
                    return self;
                }
                continue;
            }
            parts.push(build_expression(column, operator, &value));
        }

        if parts.is_empty() {
            self.fail(MapperError::validation("no usable WHERE clause"));
            return self;
        }
        self.put(Slot::Where, parts.join(" AND "));
        self
    }

    /// WHERE from a verbatim template with optional positional params.
    pub fn where_sql(mut self, template: &str, params: &[Value]) -> Self {
        match format(template, params) {
            Ok(clause) => self.put(Slot::Where, clause),
            Err(err) => self.fail(err),
        }
        self
    }

    /// AND a pre-rendered predicate onto the WHERE slot instead of
    /// replacing it. Used by eager loading to combine the batch `IN`
    /// filter with caller-supplied refinements.
    pub(crate) fn and_where(mut self, clause: &str) -> Self {
        let merged = match self.slot(Slot::Where) {
            Some(existing) => std::format!("{existing} AND {clause}"),
            None => clause.to_string(),
        };
        self.put(Slot::Where, merged);
        self
    }

    /// WHERE on the primary key. An array value becomes `IN (...)`.
    pub fn id(mut self, value: Value) -> Self {
        let Some(schema) = self.schema_or_fail() else {
            return self;
        };
        let pk = match schema.escaped_primary_key() {
            Ok(pk) => pk,
            Err(err) => {
                self.fail(err);
                return self;
            }
        };
        let clause = match &value {
            Value::Array(_) => std::format!("{} IN ({})", pk, escape(&value)),
            _ => std::format!("{} = {}", pk, escape(&value)),
        };
        self.put(Slot::Where, clause);
        self
    }

    /// SET from (column, value) pairs.
    pub fn set_fields<I, K>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        let Some(schema) = self.schema_or_fail() else {
            return self;
        };
        let mut sql = String::new();
        for (key, value) in fields {
            let key = key.as_ref();
            if !schema.has_column(key) {
                if self.strict {
                    self.fail(MapperError::validation(format!(
                        "unknown column '{key}' in SET clause"
                    )));
                    return self;
                }
                continue;
            }
            if !sql.is_empty() {
                sql.push_str(", ");
            }
            sql.push_str(&quote_ident(key));
            sql.push_str(" = ");
            sql.push_str(&escape(&value));
        }
        if sql.is_empty() {
            self.fail(MapperError::validation("no usable SET clause"));
            return self;
        }
        self.put(Slot::Set, sql);
        self
    }

    /// SET from a verbatim template.
    pub fn set_raw(mut self, template: &str, params: &[Value]) -> Self {
        match format(template, params) {
            Ok(clause) => self.put(Slot::Set, clause),
            Err(err) => self.fail(err),
        }
        self
    }

    /// ORDER BY, verbatim.
    pub fn order(mut self, clause: &str) -> Self {
        self.put(Slot::Order, clause.to_string());
        self
    }

    /// LIMIT.
    pub fn limit(mut self, n: u64) -> Self {
        self.put(Slot::Limit, n.to_string());
        self
    }

    /// OFFSET.
    pub fn offset(mut self, n: u64) -> Self {
        self.put(Slot::Offset, n.to_string());
        self
    }

    /// Zero-based pagination: `LIMIT page_size OFFSET page * page_size`.
    pub fn page(self, page: u64, page_size: u64) -> Self {
        self.limit(page_size).offset(page * page_size)
    }

    /// RETURNING over the given columns (unknown names dropped).
    pub fn returning(mut self, columns: &[&str]) -> Self {
        let Some(schema) = self.schema_or_fail() else {
            return self;
        };
        let list = schema.escaped_column_list(columns.iter().copied());
        if !list.is_empty() {
            self.put(Slot::Returning, list);
        }
        self
    }

    /// RETURNING, verbatim.
    pub fn returning_raw(mut self, clause: &str) -> Self {
        self.put(Slot::Returning, clause.to_string());
        self
    }

    fn valid_fields(&mut self, schema: &Schema, row: &Row) -> Vec<String> {
        let mut fields = Vec::new();
        for (name, _) in row.columns() {
            if schema.has_column(name) {
                fields.push(name.clone());
            } else if self.strict {
                self.fail(MapperError::validation(format!("unknown column '{name}'")));
                return Vec::new();
            }
        }
        fields
    }

    // ==================== finalize ====================

    /// Assemble the final statement, consuming the builder.
    pub fn build(mut self) -> MapperResult<String> {
        if let Some(err) = self.build_error.take() {
            return Err(err);
        }

        if self.kind == QueryKind::Raw {
            return self
                .raw_sql
                .take()
                .ok_or_else(|| MapperError::validation("raw builder has no SQL"));
        }

        if self.strict
            && matches!(self.kind, QueryKind::Update | QueryKind::Delete)
            && self.slot(Slot::Where).is_none()
        {
            let verb = if self.kind == QueryKind::Update {
                "UPDATE"
            } else {
                "DELETE"
            };
            return Err(MapperError::validation(format!(
                "WHERE clause missing for {verb} operation"
            )));
        }

        let table = self
            .table
            .as_deref()
            .ok_or_else(|| MapperError::validation("builder is not bound to a table"))?;

        let mut parts: Vec<String> = Vec::new();
        match self.kind {
            QueryKind::Select => {
                parts.push(std::format!(
                    "SELECT {}",
                    self.slot(Slot::Select).unwrap_or("*")
                ));
                parts.push(std::format!("FROM {table}"));
                self.push_clause(&mut parts, Slot::Where, "WHERE");
                self.push_clause(&mut parts, Slot::Order, "ORDER BY");
                self.push_clause(&mut parts, Slot::Limit, "LIMIT");
                self.push_clause(&mut parts, Slot::Offset, "OFFSET");
            }
            QueryKind::Update => {
                parts.push(std::format!("UPDATE {table}"));
                self.push_clause(&mut parts, Slot::Set, "SET");
                self.push_clause(&mut parts, Slot::Where, "WHERE");
            }
            QueryKind::Delete => {
                parts.push("DELETE".to_string());
                parts.push(std::format!("FROM {table}"));
                self.push_clause(&mut parts, Slot::Where, "WHERE");
            }
            QueryKind::Insert => {
                let body = self
                    .insert_body
                    .as_deref()
                    .ok_or_else(|| MapperError::validation("insert has no rows"))?;
                parts.push(std::format!("INSERT INTO {body}"));
            }
            QueryKind::Raw => unreachable!("handled above"),
        }
        self.push_clause(&mut parts, Slot::Returning, "RETURNING");

        let mut sql = parts.join(" ");
        sql.push(';');
        Ok(sql)
    }

    fn push_clause(&self, parts: &mut Vec<String>, slot: Slot, keyword: &str) {
        if let Some(clause) = self.slot(slot) {
            parts.push(std::format!("{keyword} {clause}"));
        }
    }
}

/// Render one `column OP value` expression for the field-map WHERE form.
fn build_expression(column: &str, operator: Option<&str>, value: &Value) -> String {
    let quoted = quote_ident(column);
    match value {
        Value::Array(_) => {
            let op = operator.unwrap_or("IN");
            std::format!("{quoted} {op} ({})", escape(value))
        }
        Value::Null => std::format!("{quoted} IS NULL"),
        _ => {
            let op = operator.unwrap_or("=");
            std::format!("{quoted} {op} {}", escape(value))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn posts_schema() -> Arc<Schema> {
        Arc::new(Schema::new(
            "posts",
            vec![
                "id".to_string(),
                "title".to_string(),
                "blurb".to_string(),
                "published".to_string(),
            ],
            Some("id".to_string()),
        ))
    }

    fn logs_schema() -> Arc<Schema> {
        Arc::new(Schema::new("logs", vec!["msg".to_string()], None))
    }

    fn qb() -> QueryBuilder {
        QueryBuilder::new(posts_schema(), false)
    }

    fn strict_qb() -> QueryBuilder {
        QueryBuilder::new(posts_schema(), true)
    }

    #[test]
    fn default_is_select_star() {
        assert_eq!(qb().build().unwrap(), "SELECT * FROM \"posts\";");
    }

    #[test]
    fn select_known_columns() {
        let sql = qb().select(&["id", "title"]).build().unwrap();
        assert_eq!(sql, "SELECT \"id\", \"title\" FROM \"posts\";");
    }

    #[test]
    fn select_empty_and_unknown_fall_back_to_star() {
        assert_eq!(qb().select(&[]).build().unwrap(), "SELECT * FROM \"posts\";");
        assert_eq!(
            qb().select(&["unknown_col"]).build().unwrap(),
            "SELECT * FROM \"posts\";"
        );
    }

    #[test]
    fn select_raw_is_verbatim() {
        let sql = qb().select_raw("count(*) AS n").build().unwrap();
        assert_eq!(sql, "SELECT count(*) AS n FROM \"posts\";");
    }

    #[test]
    fn where_fields_basic() {
        let sql = qb()
            .where_fields([("title", Value::from("a"))])
            .build()
            .unwrap();
        assert_eq!(sql, "SELECT * FROM \"posts\" WHERE \"title\" = 'a';");
    }

    #[test]
    fn where_fields_operator_in_key() {
        let sql = qb()
            .where_fields([("id >", Value::from(10i64))])
            .build()
            .unwrap();
        assert_eq!(sql, "SELECT * FROM \"posts\" WHERE \"id\" > 10;");
    }

    #[test]
    fn where_fields_array_defaults_to_in() {
        let sql = qb()
            .where_fields([("id", Value::from(vec![1i64, 2, 3]))])
            .build()
            .unwrap();
        assert_eq!(sql, "SELECT * FROM \"posts\" WHERE \"id\" IN (1,2,3);");
    }

    #[test]
    fn where_fields_not_in_operator() {
        let sql = qb()
            .where_fields([("title NOT IN", Value::from(vec!["a", "b"]))])
            .build()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM \"posts\" WHERE \"title\" NOT IN ('a','b');"
        );
    }

    #[test]
    fn where_fields_null_is_is_null() {
        let sql = qb()
            .where_fields([("blurb", Value::Null)])
            .build()
            .unwrap();
        assert_eq!(sql, "SELECT * FROM \"posts\" WHERE \"blurb\" IS NULL;");
    }

    #[test]
    fn where_fields_joined_with_and() {
        let sql = qb()
            .where_fields([("title", Value::from("a")), ("published", Value::from(true))])
            .build()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM \"posts\" WHERE \"title\" = 'a' AND \"published\" = true;"
        );
    }

    #[test]
    fn strict_where_unknown_column_fails() {
        let err = strict_qb()
            .where_fields([("unknown_col", Value::from(1i64))])
            .build()
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn non_strict_where_drops_unknown_but_never_goes_empty() {
        // unknown key dropped, known key survives
        let sql = qb()
            .where_fields([
                ("unknown_col", Value::from(1i64)),
                ("title", Value::from("a")),
            ])
            .build()
            .unwrap();
        assert_eq!(sql, "SELECT * FROM \"posts\" WHERE \"title\" = 'a';");

        // everything filtered away is an error, never an unfiltered query
        let err = qb()
            .where_fields([("unknown_col", Value::from(1i64))])
            .build()
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn empty_where_map_is_error() {
        let err = qb()
            .where_fields(Vec::<(&str, Value)>::new())
            .build()
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn where_sql_formats_params() {
        let sql = qb()
            .where_sql("title = ? AND id > ?", &["x".into(), 5i64.into()])
            .build()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM \"posts\" WHERE title = 'x' AND id > 5;"
        );
    }

    #[test]
    fn where_sql_param_mismatch_is_deferred() {
        let err = qb().where_sql("title = ?", &[]).build().unwrap_err();
        assert!(err.is_parameter_count());
    }

    #[test]
    fn id_scalar_and_array() {
        let sql = qb().id(7i64.into()).build().unwrap();
        assert_eq!(sql, "SELECT * FROM \"posts\" WHERE \"id\" = 7;");

        let sql = qb().id(vec![1i64, 2].into()).build().unwrap();
        assert_eq!(sql, "SELECT * FROM \"posts\" WHERE \"id\" IN (1,2);");
    }

    #[test]
    fn id_without_primary_key_fails() {
        let err = QueryBuilder::new(logs_schema(), false)
            .id(1i64.into())
            .build()
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn update_assembles_set_and_where() {
        let sql = qb()
            .update()
            .set_fields([("title", Value::from("new"))])
            .id(3i64.into())
            .build()
            .unwrap();
        assert_eq!(
            sql,
            "UPDATE \"posts\" SET \"title\" = 'new' WHERE \"id\" = 3;"
        );
    }

    #[test]
    fn strict_update_without_where_fails() {
        let err = strict_qb()
            .update()
            .set_fields([("title", Value::from("new"))])
            .build()
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn strict_delete_without_where_fails() {
        let err = strict_qb().delete().build().unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn non_strict_delete_without_where_builds() {
        assert_eq!(qb().delete().build().unwrap(), "DELETE FROM \"posts\";");
    }

    #[test]
    fn delete_with_empty_predicate_never_goes_unfiltered() {
        let err = qb()
            .delete()
            .where_fields(Vec::<(&str, Value)>::new())
            .build()
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn insert_single_row_returns_primary_key() {
        let row = Row::from_pairs(vec![("title", "a"), ("blurb", "b")]);
        let sql = qb().insert(&row).build().unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"posts\" (\"title\", \"blurb\") VALUES ('a', 'b') RETURNING \"id\";"
        );
    }

    #[test]
    fn insert_many_takes_columns_from_first_row() {
        let rows = vec![
            Row::from_pairs(vec![("title", "a")]),
            Row::from_pairs(vec![("title", "b"), ("blurb", "ignored")]),
        ];
        let sql = qb().insert_many(&rows).build().unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"posts\" (\"title\") VALUES ('a'), ('b') RETURNING \"id\";"
        );
    }

    #[test]
    fn insert_drops_unknown_fields() {
        let row = Row::from_pairs(vec![("title", "a"), ("bogus", "x")]);
        let sql = qb().insert(&row).build().unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"posts\" (\"title\") VALUES ('a') RETURNING \"id\";"
        );
    }

    #[test]
    fn strict_insert_unknown_field_fails() {
        let row = Row::from_pairs(vec![("bogus", "x")]);
        let err = strict_qb().insert(&row).build().unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn page_is_zero_based() {
        let sql = qb().page(0, 3).build().unwrap();
        assert_eq!(sql, "SELECT * FROM \"posts\" LIMIT 3 OFFSET 0;");

        let sql = qb().page(1, 7).build().unwrap();
        assert_eq!(sql, "SELECT * FROM \"posts\" LIMIT 7 OFFSET 7;");
    }

    #[test]
    fn order_limit_offset_slot_order() {
        let sql = qb()
            .offset(4)
            .limit(2)
            .order("\"title\" DESC")
            .build()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM \"posts\" ORDER BY \"title\" DESC LIMIT 2 OFFSET 4;"
        );
    }

    #[test]
    fn raw_sql_mode_formats_and_emits_verbatim() {
        let sql = QueryBuilder::unbound()
            .sql("select * from x where n = ?", &[9i64.into()])
            .build()
            .unwrap();
        assert_eq!(sql, "select * from x where n = 9");
    }

    #[test]
    fn returning_filters_to_known_columns() {
        let row = Row::from_pairs(vec![("title", "a")]);
        let sql = qb()
            .insert(&row)
            .returning(&["id", "title", "bogus"])
            .build()
            .unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"posts\" (\"title\") VALUES ('a') RETURNING \"id\", \"title\";"
        );
    }
}
