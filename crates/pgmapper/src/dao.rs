//! Per-table facade.
//!
//! A [`Dao`] owns one table's schema handle and its declared relations, and
//! hands out [`Relation`] query chains. Construction is cheap and synchronous;
//! the schema arrives later through [`Dao::bind`], so facades can be declared
//! up front and wired to the database in one initialization pass.

use crate::builder::QueryBuilder;
use crate::client::{Executor, QueryOutput};
use crate::error::{MapperError, MapperResult};
use crate::relation::{JoinSpec, Relation, RelationDef, RelationKind};
use crate::row::Row;
use crate::schema::{Catalog, Schema};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

/// Options for constructing a table facade.
#[derive(Debug, Clone, Default)]
pub struct DaoOptions {
    pub table_name: String,
    /// Overrides the introspected primary key when the database does not
    /// declare one.
    pub primary_key: Option<String>,
    pub strict: bool,
}

/// One table's facade: schema handle, relation registry, query entry points.
pub struct Dao {
    options: DaoOptions,
    schema: OnceLock<Arc<Schema>>,
    relations: RwLock<HashMap<String, RelationDef>>,
}

impl Dao {
    /// Create an unbound facade for a table.
    pub fn new(table_name: impl Into<String>) -> Arc<Self> {
        Self::with_options(DaoOptions {
            table_name: table_name.into(),
            ..Default::default()
        })
    }

    pub fn with_options(options: DaoOptions) -> Arc<Self> {
        Arc::new(Self {
            options,
            schema: OnceLock::new(),
            relations: RwLock::new(HashMap::new()),
        })
    }

    pub fn table_name(&self) -> &str {
        &self.options.table_name
    }

    /// Load this table's schema from the catalog and bind it.
    pub async fn bind(&self, catalog: &Catalog, conn: &impl Executor) -> MapperResult<()> {
        let schema = catalog.load(conn, &self.options.table_name).await?;
        self.bind_schema(schema);
        Ok(())
    }

    /// Bind an already-loaded schema, applying the primary-key override when
    /// introspection found none. Later binds are ignored.
    pub fn bind_schema(&self, schema: Arc<Schema>) {
        let schema = match (&schema.primary_key, &self.options.primary_key) {
            (None, Some(pk)) => Arc::new(Schema::new(
                schema.table_name.clone(),
                schema.columns.clone(),
                Some(pk.clone()),
            )),
            _ => schema,
        };
        let _ = self.schema.set(schema);
    }

    /// The bound schema, or an error for a facade not yet initialized.
    pub fn schema(&self) -> MapperResult<Arc<Schema>> {
        self.schema
            .get()
            .cloned()
            .ok_or_else(|| MapperError::Unbound(self.options.table_name.clone()))
    }

    pub(crate) fn builder(&self) -> MapperResult<QueryBuilder> {
        Ok(QueryBuilder::new(self.schema()?, self.options.strict))
    }

    // ==================== relation registry ====================

    fn register(&self, def: RelationDef) {
        // redeclaring a name replaces the earlier definition
        self.relations
            .write()
            .expect("relation registry lock poisoned")
            .insert(def.name.clone(), def);
    }

    /// Declare a one-to-many relation: `foreign_key` on the target table
    /// references this table's primary key.
    pub fn has_many(&self, name: &str, target: &Arc<Dao>, foreign_key: &str) {
        self.register(RelationDef {
            name: name.to_string(),
            kind: RelationKind::HasMany,
            target: Arc::clone(target),
            foreign_key: foreign_key.to_string(),
            join: None,
        });
    }

    /// Declare a one-to-one relation, resolved like has-many but keeping the
    /// first match only.
    pub fn has_one(&self, name: &str, target: &Arc<Dao>, foreign_key: &str) {
        self.register(RelationDef {
            name: name.to_string(),
            kind: RelationKind::HasOne,
            target: Arc::clone(target),
            foreign_key: foreign_key.to_string(),
            join: None,
        });
    }

    /// Declare the inverse relation: `foreign_key` on this table references
    /// the target table's primary key.
    pub fn belongs_to(&self, name: &str, target: &Arc<Dao>, foreign_key: &str) {
        self.register(RelationDef {
            name: name.to_string(),
            kind: RelationKind::BelongsTo,
            target: Arc::clone(target),
            foreign_key: foreign_key.to_string(),
            join: None,
        });
    }

    /// Declare a many-to-many relation through a join table. `join_key` is
    /// the owner-side column on the join table, `foreign_key` the target-side
    /// column.
    pub fn has_many_through(
        &self,
        name: &str,
        target: &Arc<Dao>,
        join: &Arc<Dao>,
        join_key: &str,
        foreign_key: &str,
    ) {
        self.register(RelationDef {
            name: name.to_string(),
            kind: RelationKind::HasManyThrough,
            target: Arc::clone(target),
            foreign_key: foreign_key.to_string(),
            join: Some(JoinSpec {
                dao: Arc::clone(join),
                foreign_key: join_key.to_string(),
            }),
        });
    }

    /// Look up a declared relation by name.
    pub fn relation(&self, name: &str) -> MapperResult<RelationDef> {
        self.relations
            .read()
            .expect("relation registry lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| MapperError::UnknownRelation {
                table: self.options.table_name.clone(),
                name: name.to_string(),
            })
    }

    // ==================== query entry points ====================

    /// A fresh `SELECT *` chain over this table.
    pub fn find(self: &Arc<Self>) -> Relation {
        Relation::new(Arc::clone(self))
    }

    pub fn select(self: &Arc<Self>, columns: &[&str]) -> Relation {
        self.find().select(columns)
    }

    pub fn select_raw(self: &Arc<Self>, clause: &str) -> Relation {
        self.find().select_raw(clause)
    }

    pub fn where_fields<I, K>(self: &Arc<Self>, fields: I) -> Relation
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        self.find().where_fields(fields)
    }

    pub fn where_sql(self: &Arc<Self>, template: &str, params: &[Value]) -> Relation {
        self.find().where_sql(template, params)
    }

    pub fn insert(self: &Arc<Self>, row: &Row) -> Relation {
        self.find().insert(row)
    }

    pub fn insert_many(self: &Arc<Self>, rows: &[Row]) -> Relation {
        self.find().insert_many(rows)
    }

    pub fn update(self: &Arc<Self>) -> Relation {
        self.find().update()
    }

    pub fn delete(self: &Arc<Self>) -> Relation {
        self.find().delete()
    }

    pub fn set_fields<I, K>(self: &Arc<Self>, fields: I) -> Relation
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        self.find().update().set_fields(fields)
    }

    /// A `SELECT *` chain with one relation already queued.
    pub fn load(self: &Arc<Self>, name: &str) -> Relation {
        self.find().load(name)
    }

    /// Raw SQL over this table's connection, still hydratable.
    pub fn sql(self: &Arc<Self>, template: &str, params: &[Value]) -> Relation {
        self.find().sql(template, params)
    }

    // ==================== one-shot sugar ====================

    /// All rows of the table.
    pub async fn all(self: &Arc<Self>, conn: &impl Executor) -> MapperResult<Vec<Row>> {
        self.find().all(conn).await
    }

    /// The first row of the table, if any.
    pub async fn first(self: &Arc<Self>, conn: &impl Executor) -> MapperResult<Option<Row>> {
        self.find().first(conn).await
    }

    /// `count(*)` over the table.
    pub async fn count(self: &Arc<Self>, conn: &impl Executor) -> MapperResult<i64> {
        let row = self.select_raw("count(*)").first(conn).await?;
        let count = row
            .as_ref()
            .and_then(Row::first_value)
            .and_then(Value::as_int);
        count.ok_or_else(|| MapperError::decode("count", "missing count(*) result"))
    }

    /// Remove every row.
    pub async fn truncate(self: &Arc<Self>, conn: &impl Executor) -> MapperResult<()> {
        let schema = self.schema()?;
        let sql = std::format!("TRUNCATE {};", schema.escaped_table_name);
        conn.query(&sql).await?;
        Ok(())
    }

    /// Insert one row and return the stored row (`RETURNING` the primary
    /// key by default).
    pub async fn create(self: &Arc<Self>, conn: &impl Executor, row: &Row) -> MapperResult<Option<Row>> {
        self.insert(row).first(conn).await
    }

    /// Update a row in place, keyed by its primary-key field.
    pub async fn save(self: &Arc<Self>, conn: &impl Executor, row: &Row) -> MapperResult<QueryOutput> {
        let schema = self.schema()?;
        let pk = schema.require_primary_key()?.to_string();
        let id = row.get(&pk).cloned().ok_or_else(|| {
            MapperError::validation(std::format!("row has no '{pk}' value to save by"))
        })?;
        self.set_fields(row.without(&pk)).id(id).exec(conn).await
    }

    /// Delete the row with this primary key.
    pub async fn delete_by_id(
        self: &Arc<Self>,
        conn: &impl Executor,
        id: Value,
    ) -> MapperResult<QueryOutput> {
        self.delete().id(id).exec(conn).await
    }

    /// Fetch the row with this primary key.
    pub async fn find_by_id(
        self: &Arc<Self>,
        conn: &impl Executor,
        id: Value,
    ) -> MapperResult<Option<Row>> {
        self.find().id(id).first(conn).await
    }
}
