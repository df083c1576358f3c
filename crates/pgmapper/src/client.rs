//! The driver capability boundary and the pooled client.
//!
//! The engine talks to the backend through [`Executor`]: a fully substituted
//! SQL string in, rows and a row count out. Implementations are provided for
//! `tokio_postgres::Client`, `tokio_postgres::Transaction`,
//! `deadpool_postgres::Client` and the pooled [`Client`] wrapper.

use crate::batch::{self, BatchItem};
use crate::config::MapperConfig;
use crate::error::{MapperError, MapperResult};
use crate::escape::format;
use crate::row::Row;
use crate::value::Value;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::NoTls;
use tokio_postgres::types::Type;

/// Result of executing one statement.
#[derive(Debug, Clone, Default)]
pub struct QueryOutput {
    pub rows: Vec<Row>,
    pub row_count: u64,
}

/// Opaque `execute(sql) -> {rows, rowCount}` capability over the backend.
pub trait Executor: Send + Sync {
    /// Execute a fully substituted SQL statement.
    fn query(&self, sql: &str) -> impl std::future::Future<Output = MapperResult<QueryOutput>> + Send;
}

/// Whether a statement produces a row set (SELECT, or DML with RETURNING).
fn is_row_returning(sql: &str) -> bool {
    let upper = sql.trim_start().to_ascii_uppercase();
    upper.starts_with("SELECT") || upper.starts_with("WITH") || upper.contains(" RETURNING ")
}

fn convert_row(row: &tokio_postgres::Row) -> MapperResult<Row> {
    let mut out = Row::new();
    for (i, col) in row.columns().iter().enumerate() {
        let name = col.name();
        let value = convert_value(row, i, col.type_())
            .map_err(|e| MapperError::decode(name, e.to_string()))?;
        out.set(name, value);
    }
    Ok(out)
}

fn convert_value(
    row: &tokio_postgres::Row,
    idx: usize,
    ty: &Type,
) -> Result<Value, tokio_postgres::Error> {
    let value = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx)?.into()
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)?.into()
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)?.into()
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx)?.into()
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx)?.into()
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx)?.into()
    } else if *ty == Type::DATE {
        row.try_get::<_, Option<chrono::NaiveDate>>(idx)?.into()
    } else if *ty == Type::TIMESTAMP {
        row.try_get::<_, Option<chrono::NaiveDateTime>>(idx)?
            .map(|t| t.and_utc())
            .into()
    } else if *ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)?
            .into()
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        row.try_get::<_, Option<serde_json::Value>>(idx)?.into()
    } else {
        // text-ish and anything else with a textual representation
        row.try_get::<_, Option<String>>(idx)?.into()
    };
    Ok(value)
}

async fn run_statement(
    client: &tokio_postgres::Client,
    sql: &str,
) -> MapperResult<QueryOutput> {
    if is_row_returning(sql) {
        let rows = client.query(sql, &[]).await?;
        let rows = rows.iter().map(convert_row).collect::<MapperResult<Vec<_>>>()?;
        let row_count = rows.len() as u64;
        Ok(QueryOutput { rows, row_count })
    } else {
        let row_count = client.execute(sql, &[]).await?;
        Ok(QueryOutput {
            rows: Vec::new(),
            row_count,
        })
    }
}

impl Executor for tokio_postgres::Client {
    async fn query(&self, sql: &str) -> MapperResult<QueryOutput> {
        run_statement(self, sql).await
    }
}

impl Executor for tokio_postgres::Transaction<'_> {
    async fn query(&self, sql: &str) -> MapperResult<QueryOutput> {
        if is_row_returning(sql) {
            let rows = tokio_postgres::Transaction::query(self, sql, &[]).await?;
            let rows = rows.iter().map(convert_row).collect::<MapperResult<Vec<_>>>()?;
            let row_count = rows.len() as u64;
            Ok(QueryOutput { rows, row_count })
        } else {
            let row_count = tokio_postgres::Transaction::execute(self, sql, &[]).await?;
            Ok(QueryOutput {
                rows: Vec::new(),
                row_count,
            })
        }
    }
}

impl Executor for deadpool_postgres::Client {
    async fn query(&self, sql: &str) -> MapperResult<QueryOutput> {
        run_statement(self, sql).await
    }
}

/// A pooled database client.
///
/// Acquires a connection per statement and carries the `verbose`/`strict`
/// flags from [`MapperConfig`]. Verbose mode logs each issued statement;
/// driver failures log the offending SQL and propagate unchanged.
pub struct Client {
    pool: Pool,
    pub verbose: bool,
    pub strict: bool,
}

impl Client {
    /// Create a pooled client from configuration.
    ///
    /// Fails with [`MapperError::Configuration`] before any query is
    /// attempted when the connection parameters are unusable.
    pub fn connect(config: &MapperConfig) -> MapperResult<Self> {
        let conn_string = config.build_connection_string()?;
        let pg_config: tokio_postgres::Config = conn_string
            .parse()
            .map_err(|e: tokio_postgres::Error| MapperError::configuration(e.to_string()))?;

        let mgr = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(mgr)
            .max_size(config.pool_size)
            .build()
            .map_err(|e| MapperError::Pool(e.to_string()))?;

        Ok(Self {
            pool,
            verbose: config.verbose,
            strict: config.strict,
        })
    }

    /// Format and execute a statement, acquiring a connection as needed.
    pub async fn exec(&self, template: &str, params: &[Value]) -> MapperResult<QueryOutput> {
        let sql = format(template, params)?;
        Executor::query(self, &sql).await
    }

    /// Execute and return all rows.
    pub async fn all(&self, template: &str, params: &[Value]) -> MapperResult<Vec<Row>> {
        Ok(self.exec(template, params).await?.rows)
    }

    /// Execute and return the first row, if any.
    pub async fn first(&self, template: &str, params: &[Value]) -> MapperResult<Option<Row>> {
        Ok(self.exec(template, params).await?.rows.into_iter().next())
    }

    /// Execute and return the first column of the first row.
    pub async fn scalar(&self, template: &str, params: &[Value]) -> MapperResult<Value> {
        let output = self.exec(template, params).await?;
        Ok(output
            .rows
            .first()
            .and_then(|row| row.first_value())
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Split a flat fragment sequence into statements and run them in order,
    /// stopping at the first failure.
    pub async fn series(&self, items: Vec<BatchItem>) -> MapperResult<Vec<Vec<Row>>> {
        batch::exec_series(self, items).await
    }

    /// Split a flat fragment sequence into statements and run them
    /// concurrently; results keep the input order.
    pub async fn parallel(&self, items: Vec<BatchItem>) -> Vec<MapperResult<Vec<Row>>> {
        batch::exec_parallel(self, items).await
    }
}

impl Executor for Client {
    async fn query(&self, sql: &str) -> MapperResult<QueryOutput> {
        if self.verbose {
            tracing::debug!("SQL=> {sql}");
        }
        let conn = self.pool.get().await?;
        match Executor::query(&conn, sql).await {
            Ok(output) => Ok(output),
            Err(err) => {
                tracing::error!("SQL=> {sql}");
                Err(err)
            }
        }
    }
}
