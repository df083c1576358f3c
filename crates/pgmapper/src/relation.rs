//! Association resolution with batched eager loading.
//!
//! A [`Relation`] wraps a [`QueryBuilder`] bound to one table facade and
//! queues declared relationships to hydrate. Each queued relation costs
//! exactly one extra query regardless of parent row count (two for
//! through-relations: join table, then target table).

use crate::builder::{QueryBuilder, Slot};
use crate::client::{Executor, QueryOutput};
use crate::dao::Dao;
use crate::error::{MapperError, MapperResult};
use crate::escape::escape;
use crate::row::Row;
use crate::schema::quote_ident;
use crate::value::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// The closed set of relationship kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    HasOne,
    HasMany,
    HasManyThrough,
    BelongsTo,
}

/// Join-table half of a through-relation.
#[derive(Clone)]
pub struct JoinSpec {
    /// The join table's facade.
    pub dao: Arc<Dao>,
    /// Owner-side key column on the join table.
    pub foreign_key: String,
}

impl std::fmt::Debug for JoinSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinSpec")
            .field("table", &self.dao.table_name())
            .field("foreign_key", &self.foreign_key)
            .finish()
    }
}

/// A declared association between two tables.
#[derive(Clone)]
pub struct RelationDef {
    pub name: String,
    pub kind: RelationKind,
    pub target: Arc<Dao>,
    /// For has-one/has-many: the owner-key column on the target table.
    /// For belongs-to: the target-key column on the owner table.
    /// For through: the target-key column on the join table.
    pub foreign_key: String,
    pub join: Option<JoinSpec>,
}

impl std::fmt::Debug for RelationDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationDef")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("target", &self.target.table_name())
            .field("foreign_key", &self.foreign_key)
            .field("join", &self.join)
            .finish()
    }
}

/// Callback refining an eager-loaded child query before it executes.
///
/// The callback receives the child table's builder before the batch filter
/// is applied; if it narrows the select list it must keep the relation's
/// key column so results can be grouped back onto their parents.
pub type Configure = Box<dyn FnOnce(QueryBuilder) -> QueryBuilder + Send>;

struct QueuedLoad {
    name: String,
    configure: Option<Configure>,
}

/// A fluent query over one table, with optional eager loading.
///
/// Terminal methods (`exec`, `all`, `first`, `hydrate`) consume the
/// relation; it is not reusable past execution.
pub struct Relation {
    dao: Arc<Dao>,
    builder: QueryBuilder,
    loads: Vec<QueuedLoad>,
    error: Option<MapperError>,
}

impl Relation {
    pub(crate) fn new(dao: Arc<Dao>) -> Self {
        match dao.builder() {
            Ok(builder) => Self {
                dao,
                builder,
                loads: Vec::new(),
                error: None,
            },
            Err(err) => Self {
                dao,
                builder: QueryBuilder::unbound(),
                loads: Vec::new(),
                error: Some(err),
            },
        }
    }

    fn map_builder(mut self, f: impl FnOnce(QueryBuilder) -> QueryBuilder) -> Self {
        self.builder = f(self.builder);
        self
    }

    // ==================== fluent passthroughs ====================

    pub fn select_all(self) -> Self {
        self.map_builder(|b| b.select_all())
    }

    pub fn select(self, columns: &[&str]) -> Self {
        self.map_builder(|b| b.select(columns))
    }

    pub fn select_raw(self, clause: &str) -> Self {
        let clause = clause.to_string();
        self.map_builder(move |b| b.select_raw(&clause))
    }

    pub fn update(self) -> Self {
        self.map_builder(|b| b.update())
    }

    pub fn delete(self) -> Self {
        self.map_builder(|b| b.delete())
    }

    pub fn insert(self, row: &Row) -> Self {
        self.map_builder(|b| b.insert(row))
    }

    pub fn insert_many(self, rows: &[Row]) -> Self {
        self.map_builder(|b| b.insert_many(rows))
    }

    pub fn where_fields<I, K>(self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        self.map_builder(|b| b.where_fields(fields))
    }

    pub fn where_sql(self, template: &str, params: &[Value]) -> Self {
        self.map_builder(|b| b.where_sql(template, params))
    }

    pub fn id(self, value: Value) -> Self {
        self.map_builder(|b| b.id(value))
    }

    pub fn set_fields<I, K>(self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        self.map_builder(|b| b.set_fields(fields))
    }

    pub fn set_raw(self, template: &str, params: &[Value]) -> Self {
        self.map_builder(|b| b.set_raw(template, params))
    }

    pub fn order(self, clause: &str) -> Self {
        self.map_builder(|b| b.order(clause))
    }

    pub fn limit(self, n: u64) -> Self {
        self.map_builder(|b| b.limit(n))
    }

    pub fn offset(self, n: u64) -> Self {
        self.map_builder(|b| b.offset(n))
    }

    pub fn page(self, page: u64, page_size: u64) -> Self {
        self.map_builder(|b| b.page(page, page_size))
    }

    pub fn returning(self, columns: &[&str]) -> Self {
        self.map_builder(|b| b.returning(columns))
    }

    pub fn returning_raw(self, clause: &str) -> Self {
        self.map_builder(|b| b.returning_raw(clause))
    }

    pub fn sql(self, template: &str, params: &[Value]) -> Self {
        self.map_builder(|b| b.sql(template, params))
    }

    // ==================== eager loading ====================

    /// Queue a declared relation to hydrate when the query executes.
    pub fn load(mut self, name: &str) -> Self {
        self.loads.push(QueuedLoad {
            name: name.to_string(),
            configure: None,
        });
        self
    }

    /// Queue a relation with a callback refining the child query.
    pub fn load_with(
        mut self,
        name: &str,
        configure: impl FnOnce(QueryBuilder) -> QueryBuilder + Send + 'static,
    ) -> Self {
        self.loads.push(QueuedLoad {
            name: name.to_string(),
            configure: Some(Box::new(configure)),
        });
        self
    }

    // ==================== terminals ====================

    /// Build and execute the statement, without eager loading.
    pub async fn exec(self, conn: &impl Executor) -> MapperResult<QueryOutput> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let sql = self.builder.build()?;
        conn.query(&sql).await
    }

    /// Execute the base query and hydrate queued relations.
    pub async fn all(self, conn: &impl Executor) -> MapperResult<Vec<Row>> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let dao = Arc::clone(&self.dao);
        let loads = self.loads;
        let sql = self.builder.build()?;
        let mut rows = conn.query(&sql).await?.rows;
        resolve_loads(conn, &dao, &mut rows, loads).await?;
        Ok(rows)
    }

    /// Execute and return the first row, if any, with queued relations
    /// hydrated. Adds `LIMIT 1` to a SELECT without an explicit limit.
    pub async fn first(mut self, conn: &impl Executor) -> MapperResult<Option<Row>> {
        if self.builder.is_select() && !self.builder.has_clause(Slot::Limit) {
            self.builder = self.builder.limit(1);
        }
        Ok(self.all(conn).await?.into_iter().next())
    }

    /// Hydrate queued relations onto previously fetched rows instead of
    /// issuing the base query.
    pub async fn hydrate(self, conn: &impl Executor, mut rows: Vec<Row>) -> MapperResult<Vec<Row>> {
        if let Some(err) = self.error {
            return Err(err);
        }
        resolve_loads(conn, &self.dao, &mut rows, self.loads).await?;
        Ok(rows)
    }
}

async fn resolve_loads(
    conn: &impl Executor,
    dao: &Arc<Dao>,
    rows: &mut [Row],
    loads: Vec<QueuedLoad>,
) -> MapperResult<()> {
    if rows.is_empty() {
        return Ok(());
    }
    for load in loads {
        let def = dao.relation(&load.name)?;
        match def.kind {
            RelationKind::HasMany => {
                resolve_children(conn, dao, rows, &def, load.configure, true).await?
            }
            RelationKind::HasOne => {
                resolve_children(conn, dao, rows, &def, load.configure, false).await?
            }
            RelationKind::BelongsTo => {
                resolve_belongs_to(conn, rows, &def, load.configure).await?
            }
            RelationKind::HasManyThrough => {
                resolve_through(conn, dao, rows, &def, load.configure).await?
            }
        }
    }
    Ok(())
}

/// Distinct non-null values of one column, in first-seen order.
fn distinct_values(rows: &[Row], column: &str) -> Vec<Value> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for row in rows {
        if let Some(value) = row.get(column) {
            if !value.is_null() && seen.insert(value.clone()) {
                out.push(value.clone());
            }
        }
    }
    out
}

/// Child query: the target table filtered by `key_column IN (keys)`, with
/// any caller refinement applied first so the batch filter always survives.
async fn fetch_keyed(
    conn: &impl Executor,
    target: &Arc<Dao>,
    key_column: &str,
    keys: Vec<Value>,
    configure: Option<Configure>,
) -> MapperResult<Vec<Row>> {
    let mut qb = target.builder()?;
    if let Some(configure) = configure {
        qb = configure(qb);
    }
    let clause = std::format!(
        "{} IN ({})",
        quote_ident(key_column),
        escape(&Value::Array(keys))
    );
    qb = qb.and_where(&clause);
    let sql = qb.build()?;
    Ok(conn.query(&sql).await?.rows)
}

async fn resolve_children(
    conn: &impl Executor,
    dao: &Arc<Dao>,
    rows: &mut [Row],
    def: &RelationDef,
    configure: Option<Configure>,
    many: bool,
) -> MapperResult<()> {
    let schema = dao.schema()?;
    let pk = schema.require_primary_key()?.to_string();
    let keys = distinct_values(rows, &pk);

    if keys.is_empty() {
        if many {
            for row in rows.iter_mut() {
                row.attach_many(&def.name, Vec::new());
            }
        }
        return Ok(());
    }

    let children = fetch_keyed(conn, &def.target, &def.foreign_key, keys, configure).await?;

    let mut groups: HashMap<Value, Vec<Row>> = HashMap::new();
    for child in children {
        if let Some(fk) = child.get(&def.foreign_key) {
            if !fk.is_null() {
                groups.entry(fk.clone()).or_default().push(child);
            }
        }
    }

    for row in rows.iter_mut() {
        let group = row.get(&pk).and_then(|key| groups.get(key));
        if many {
            row.attach_many(&def.name, group.cloned().unwrap_or_default());
        } else if let Some(child) = group.and_then(|g| g.first()) {
            row.attach_one(&def.name, child.clone());
        }
    }
    Ok(())
}

async fn resolve_belongs_to(
    conn: &impl Executor,
    rows: &mut [Row],
    def: &RelationDef,
    configure: Option<Configure>,
) -> MapperResult<()> {
    let target_schema = def.target.schema()?;
    let target_pk = target_schema.require_primary_key()?.to_string();
    let keys = distinct_values(rows, &def.foreign_key);
    if keys.is_empty() {
        return Ok(());
    }

    let parents = fetch_keyed(conn, &def.target, &target_pk, keys, configure).await?;
    let mut by_pk: HashMap<Value, Row> = HashMap::new();
    for parent in parents {
        if let Some(pk) = parent.get(&target_pk) {
            by_pk.entry(pk.clone()).or_insert(parent);
        }
    }

    for row in rows.iter_mut() {
        let found = row.get(&def.foreign_key).and_then(|fk| by_pk.get(fk));
        if let Some(parent) = found {
            row.attach_one(&def.name, parent.clone());
        }
    }
    Ok(())
}

async fn resolve_through(
    conn: &impl Executor,
    dao: &Arc<Dao>,
    rows: &mut [Row],
    def: &RelationDef,
    configure: Option<Configure>,
) -> MapperResult<()> {
    let join = def.join.as_ref().ok_or_else(|| {
        MapperError::validation(std::format!(
            "through relation '{}' has no join table",
            def.name
        ))
    })?;
    let schema = dao.schema()?;
    let pk = schema.require_primary_key()?.to_string();
    let target_schema = def.target.schema()?;
    let target_pk = target_schema.require_primary_key()?.to_string();

    let attach_empty = |rows: &mut [Row]| {
        for row in rows.iter_mut() {
            row.attach_many(&def.name, Vec::new());
        }
    };

    let parent_keys = distinct_values(rows, &pk);
    if parent_keys.is_empty() {
        attach_empty(rows);
        return Ok(());
    }

    // one query on the join table, one on the target table
    let join_rows = fetch_keyed(conn, &join.dao, &join.foreign_key, parent_keys, None).await?;
    let target_keys = distinct_values(&join_rows, &def.foreign_key);
    if target_keys.is_empty() {
        attach_empty(rows);
        return Ok(());
    }

    let targets = fetch_keyed(conn, &def.target, &target_pk, target_keys, configure).await?;
    let mut by_pk: HashMap<Value, Row> = HashMap::new();
    for target in targets {
        if let Some(key) = target.get(&target_pk) {
            by_pk.entry(key.clone()).or_insert(target);
        }
    }

    // re-walk the join rows per parent to keep join-row order
    for row in rows.iter_mut() {
        let Some(parent_key) = row.get(&pk).cloned() else {
            row.attach_many(&def.name, Vec::new());
            continue;
        };
        let related: Vec<Row> = join_rows
            .iter()
            .filter(|jr| jr.get(&join.foreign_key) == Some(&parent_key))
            .filter_map(|jr| jr.get(&def.foreign_key))
            .filter_map(|key| by_pk.get(key))
            .cloned()
            .collect();
        row.attach_many(&def.name, related);
    }
    Ok(())
}
