//! A lightweight relational data mapper for PostgreSQL.
//!
//! pgmapper speaks to the database through plain SQL strings: values are
//! escaped into literals client-side, schemas are introspected once and
//! cached, and declared relations are hydrated with one batched query per
//! relation instead of one per row.
//!
//! # Features
//!
//! - `?`-placeholder templates rendered into complete SQL statements
//! - schema catalog with single-flight, memoized table introspection
//! - clause-buffer query builder with deferred error reporting
//! - table facades with CRUD sugar (`create`, `save`, `find_by_id`, ...)
//! - `has_many` / `has_one` / `belongs_to` / `has_many_through` eager loading
//! - statement batches run in series or in parallel over a deadpool pool
//!
//! # Example
//!
//! ```rust,ignore
//! use pgmapper::{Mapper, MapperConfig, Row, Value};
//!
//! let mapper = Mapper::new(MapperConfig::new().database("blog").user("app"));
//! let posts = mapper.map("posts")?;
//! let comments = mapper.map("comments")?;
//! posts.has_many("comments", &comments, "post_id");
//! mapper.initialize().await?;
//!
//! let conn = mapper.client()?;
//! let recent = posts
//!     .find()
//!     .where_fields([("published", Value::from(true))])
//!     .order("\"created_at\" DESC")
//!     .limit(10)
//!     .load("comments")
//!     .all(conn.as_ref())
//!     .await?;
//! ```

pub mod batch;
pub mod builder;
pub mod client;
pub mod config;
pub mod dao;
pub mod error;
pub mod escape;
pub mod mapper;
pub mod relation;
pub mod row;
pub mod schema;
pub mod value;

pub use batch::{BatchItem, Statement, exec_parallel, exec_series, split};
pub use builder::QueryBuilder;
pub use client::{Client, Executor, QueryOutput};
pub use config::MapperConfig;
pub use dao::{Dao, DaoOptions};
pub use error::{MapperError, MapperResult};
pub use escape::{escape, format};
pub use mapper::Mapper;
pub use relation::{JoinSpec, Relation, RelationDef, RelationKind};
pub use row::{Related, Row};
pub use schema::{Catalog, Schema, quote_ident};
pub use value::Value;
