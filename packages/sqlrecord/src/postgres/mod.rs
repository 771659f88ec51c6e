//! `PostgreSQL` backend using `tokio-postgres` pooled through
//! `deadpool-postgres`.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDateTime, Utc};
use deadpool_postgres::Pool;
use postgres_protocol::types::{
    bool_from_sql, float4_from_sql, float8_from_sql, int2_from_sql, int4_from_sql, int8_from_sql,
    text_from_sql,
};
use tokio::sync::Mutex;
use tokio_postgres::types::{FromSql, IsNull, ToSql, Type};

use crate::{
    db::{Backend, ExecOutcome, PoolBackend},
    scan::Row,
    value::Value,
    Error,
};

/// `PostgreSQL` connection pool.
pub struct PostgresPool {
    pool: Pool,
}

impl PostgresPool {
    /// Create a pool from a connection URL and verify it with one checkout.
    ///
    /// # Errors
    ///
    /// * If the pool cannot be created or the first checkout fails.
    pub async fn open(dsn: &str) -> Result<Self, Error> {
        let mut cfg = deadpool_postgres::Config::new();
        cfg.url = Some(dsn.to_string());

        let pool = cfg.create_pool(
            Some(deadpool_postgres::Runtime::Tokio1),
            tokio_postgres::NoTls,
        )?;

        // Checkout once so a bad DSN fails at open, not first use.
        drop(pool.get().await?);

        Ok(Self { pool })
    }

    async fn get_client(&self) -> Result<deadpool_postgres::Object, Error> {
        Ok(self.pool.get().await?)
    }
}

impl std::fmt::Debug for PostgresPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresPool").finish_non_exhaustive()
    }
}

#[async_trait]
impl Backend for PostgresPool {
    async fn exec(&self, sql: &str, params: &[Value]) -> Result<ExecOutcome, Error> {
        let client = self.get_client().await?;
        exec_statement(&client, sql, params).await
    }

    async fn exec_script(&self, sql: &str) -> Result<u64, Error> {
        let client = self.get_client().await?;
        exec_script(&client, sql).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, Error> {
        let client = self.get_client().await?;
        query_statement(&client, sql, params).await
    }
}

#[async_trait]
impl PoolBackend for PostgresPool {
    async fn begin(&self, write: bool) -> Result<Box<dyn Backend>, Error> {
        let client = self.get_client().await?;

        client
            .execute(if write { "BEGIN" } else { "BEGIN READ ONLY" }, &[])
            .await?;

        Ok(Box::new(PostgresTransaction {
            client: Arc::new(Mutex::new(client)),
        }))
    }
}

/// A transaction's dedicated pooled client. The client returns to the pool
/// when the transaction handle drops.
pub struct PostgresTransaction {
    client: Arc<Mutex<deadpool_postgres::Object>>,
}

impl std::fmt::Debug for PostgresTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresTransaction").finish_non_exhaustive()
    }
}

#[async_trait]
impl Backend for PostgresTransaction {
    async fn exec(&self, sql: &str, params: &[Value]) -> Result<ExecOutcome, Error> {
        let client = self.client.lock().await;
        exec_statement(&client, sql, params).await
    }

    async fn exec_script(&self, sql: &str) -> Result<u64, Error> {
        let client = self.client.lock().await;
        exec_script(&client, sql).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, Error> {
        let client = self.client.lock().await;
        query_statement(&client, sql, params).await
    }
}

async fn exec_statement(
    client: &tokio_postgres::Client,
    sql: &str,
    params: &[Value],
) -> Result<ExecOutcome, Error> {
    log::trace!("exec: {sql} params: {params:?}");
    let pg_params: Vec<PgValue> = params.iter().cloned().map(PgValue).collect();
    let refs: Vec<&(dyn ToSql + Sync)> = pg_params
        .iter()
        .map(|param| param as &(dyn ToSql + Sync))
        .collect();

    let rows_affected = client.execute(sql, &refs).await?;

    // The driver has no last-insert-id; inserts learn their key via
    // RETURNING instead.
    Ok(ExecOutcome {
        rows_affected,
        last_insert_id: 0,
    })
}

/// Run a semicolon-separated script in one round trip, reporting the rows
/// affected by the last statement.
async fn exec_script(client: &tokio_postgres::Client, sql: &str) -> Result<u64, Error> {
    log::trace!("exec script:\n{sql}");
    let mut last = 0_u64;
    for message in client.simple_query(sql).await? {
        if let tokio_postgres::SimpleQueryMessage::CommandComplete(count) = message {
            last = count;
        }
    }
    Ok(last)
}

async fn query_statement(
    client: &tokio_postgres::Client,
    sql: &str,
    params: &[Value],
) -> Result<Vec<Row>, Error> {
    log::trace!("query: {sql} params: {params:?}");
    let pg_params: Vec<PgValue> = params.iter().cloned().map(PgValue).collect();
    let refs: Vec<&(dyn ToSql + Sync)> = pg_params
        .iter()
        .map(|param| param as &(dyn ToSql + Sync))
        .collect();

    let rows = client.query(sql, &refs).await?;
    rows.iter().map(from_row).collect()
}

fn from_row(row: &tokio_postgres::Row) -> Result<Row, Error> {
    let mut columns = Vec::with_capacity(row.columns().len());

    for (idx, column) in row.columns().iter().enumerate() {
        let value: Value = row.try_get(idx)?;
        columns.push((column.name().to_string(), value));
    }

    Ok(Row { columns })
}

impl<'a> FromSql<'a> for Value {
    fn from_sql(
        ty: &Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(match ty.name() {
            "bool" => Self::Bool(bool_from_sql(raw)?),
            "int2" | "smallint" | "smallserial" => Self::Int(i64::from(int2_from_sql(raw)?)),
            "int4" | "int" | "serial" => Self::Int(i64::from(int4_from_sql(raw)?)),
            "int8" | "bigint" | "bigserial" => Self::Int(int8_from_sql(raw)?),
            "float4" | "real" => Self::Real(f64::from(float4_from_sql(raw)?)),
            "float8" | "double precision" => Self::Real(float8_from_sql(raw)?),
            "varchar" | "text" | "bpchar" | "char" | "name" | "citext" | "unknown" => {
                Self::String(text_from_sql(raw)?.to_string())
            }
            "timestamp" => Self::DateTime(NaiveDateTime::from_sql(ty, raw)?.and_utc()),
            "timestamptz" => Self::DateTime(DateTime::<Utc>::from_sql(ty, raw)?),
            "bytea" => Self::Bytes(raw.to_vec()),
            "json" => Self::String(std::str::from_utf8(raw)?.to_string()),
            // jsonb carries a one-byte version prefix before the text
            "jsonb" => Self::String(std::str::from_utf8(&raw[1..])?.to_string()),
            _ => {
                return Err(Box::new(Error::TypeNotFound {
                    type_name: ty.to_string(),
                }))
            }
        })
    }

    fn from_sql_null(ty: &Type) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(match ty.name() {
            "bool" => Self::BoolOpt(None),
            "int2" | "smallint" | "smallserial" | "int4" | "int" | "serial" | "int8" | "bigint"
            | "bigserial" => Self::IntOpt(None),
            "float4" | "real" | "float8" | "double precision" => Self::RealOpt(None),
            "varchar" | "text" | "bpchar" | "char" | "name" | "citext" => Self::StringOpt(None),
            "timestamp" | "timestamptz" => Self::DateTimeOpt(None),
            "bytea" => Self::BytesOpt(None),
            _ => Self::Null,
        })
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// [`Value`] adapter implementing the driver's parameter encoding.
#[derive(Debug, Clone)]
pub struct PgValue(Value);

impl From<Value> for PgValue {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl ToSql for PgValue {
    fn accepts(_ty: &Type) -> bool
    where
        Self: Sized,
    {
        true
    }

    #[allow(clippy::too_many_lines)]
    fn to_sql_checked(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        Ok(match &self.0 {
            value if value.is_null() => IsNull::Yes,
            Value::String(value) | Value::StringOpt(Some(value)) => {
                if matches!(ty.name(), "json" | "jsonb") {
                    write_json_text(value, ty, out)
                } else {
                    value.to_sql(ty, out)?
                }
            }
            Value::Bool(value) | Value::BoolOpt(Some(value)) => value.to_sql(ty, out)?,
            Value::Int(value) | Value::IntOpt(Some(value)) => value.to_sql(ty, out)?,
            Value::UInt(value) | Value::UIntOpt(Some(value)) => {
                i64::try_from(*value)?.to_sql(ty, out)?
            }
            Value::Real(value) | Value::RealOpt(Some(value)) => value.to_sql(ty, out)?,
            Value::DateTime(value) | Value::DateTimeOpt(Some(value)) => {
                if ty.name() == "timestamptz" {
                    value.to_sql(ty, out)?
                } else {
                    value.naive_utc().to_sql(ty, out)?
                }
            }
            Value::Bytes(value) | Value::BytesOpt(Some(value)) => {
                value.as_slice().to_sql(ty, out)?
            }
            Value::Json(value) => write_json_text(&value.to_string(), ty, out),
            // is_null() above covered the remaining variants
            _ => IsNull::Yes,
        })
    }

    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>>
    where
        Self: Sized,
    {
        self.to_sql_checked(ty, out)
    }
}

fn write_json_text(text: &str, ty: &Type, out: &mut BytesMut) -> IsNull {
    if ty.name() == "jsonb" {
        out.extend_from_slice(&[1]);
    }
    out.extend_from_slice(text.as_bytes());
    IsNull::No
}
