//! `SQLite` backend using `rusqlite`.
//!
//! A pool of connections is used in round-robin fashion for pool-handle
//! operations; a transaction takes one connection out of rotation for its
//! lifetime. Write-transaction begin is serialized process-wide and issued
//! as `BEGIN IMMEDIATE`, so two write transactions never race the upgrade
//! from a deferred read lock.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use rusqlite::{Batch, Connection, Rows, Statement};
use tokio::sync::Mutex;

use crate::{
    db::{Backend, ExecOutcome, PoolBackend},
    scan::Row,
    value::{format_datetime, Value},
    Error,
};

const CONNECTION_POOL_SIZE: usize = 5;

/// Serializes write-transaction begin across every pool in the process.
static WRITE_BEGIN: Mutex<()> = Mutex::const_new(());

/// `SQLite` connection pool.
#[derive(Debug)]
pub struct SqlitePool {
    connections: Vec<Arc<Mutex<Connection>>>,
    next_connection: AtomicUsize,
}

impl SqlitePool {
    /// Open a pool of connections against `dsn` (a path or a
    /// `file:…?mode=memory&cache=shared` URI; plain `:memory:` gives each
    /// pooled connection its own database and is not useful here).
    ///
    /// # Errors
    ///
    /// * If a connection cannot be opened.
    pub fn open(dsn: &str) -> Result<Self, Error> {
        let mut connections = Vec::with_capacity(CONNECTION_POOL_SIZE);
        for _ in 0..CONNECTION_POOL_SIZE {
            let connection = Connection::open(dsn)?;
            // A later write begin must wait for a running writer's commit,
            // not fail with SQLITE_BUSY.
            connection.busy_timeout(std::time::Duration::from_secs(5))?;
            connections.push(Arc::new(Mutex::new(connection)));
        }
        Ok(Self {
            connections,
            next_connection: AtomicUsize::new(0),
        })
    }

    fn get_connection(&self) -> Arc<Mutex<Connection>> {
        let index = self.next_connection.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        Arc::clone(&self.connections[index])
    }
}

#[async_trait]
impl Backend for SqlitePool {
    async fn exec(&self, sql: &str, params: &[Value]) -> Result<ExecOutcome, Error> {
        let connection = self.get_connection();
        let connection = connection.lock().await;
        exec_statement(&connection, sql, params)
    }

    async fn exec_script(&self, sql: &str) -> Result<u64, Error> {
        let connection = self.get_connection();
        let connection = connection.lock().await;
        exec_script(&connection, sql)
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, Error> {
        let connection = self.get_connection();
        let connection = connection.lock().await;
        query_statement(&connection, sql, params)
    }
}

#[async_trait]
impl PoolBackend for SqlitePool {
    async fn begin(&self, write: bool) -> Result<Box<dyn Backend>, Error> {
        let connection = self.get_connection();

        if write {
            // The guard must cover the begin itself: the driver's deferred
            // BEGIN only takes its write lock at the first write, which is
            // too late to order concurrent writers.
            let _begin_guard = WRITE_BEGIN.lock().await;
            connection.lock().await.execute("BEGIN IMMEDIATE", [])?;
        } else {
            connection.lock().await.execute("BEGIN", [])?;
        }

        Ok(Box::new(SqliteTransaction { connection }))
    }
}

/// A transaction's dedicated connection.
#[derive(Debug)]
pub struct SqliteTransaction {
    connection: Arc<Mutex<Connection>>,
}

#[async_trait]
impl Backend for SqliteTransaction {
    async fn exec(&self, sql: &str, params: &[Value]) -> Result<ExecOutcome, Error> {
        let connection = self.connection.lock().await;
        exec_statement(&connection, sql, params)
    }

    async fn exec_script(&self, sql: &str) -> Result<u64, Error> {
        let connection = self.connection.lock().await;
        exec_script(&connection, sql)
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, Error> {
        let connection = self.connection.lock().await;
        query_statement(&connection, sql, params)
    }
}

fn exec_statement(
    connection: &Connection,
    sql: &str,
    params: &[Value],
) -> Result<ExecOutcome, Error> {
    log::trace!("exec: {sql} params: {params:?}");
    let mut statement = connection.prepare_cached(sql)?;
    bind_params(&mut statement, params)?;
    let rows_affected = statement.raw_execute()? as u64;
    Ok(ExecOutcome {
        rows_affected,
        last_insert_id: connection.last_insert_rowid(),
    })
}

/// Run a semicolon-separated script statement by statement, reporting the
/// rows affected by the last one (the count a multi-statement exec reports).
fn exec_script(connection: &Connection, sql: &str) -> Result<u64, Error> {
    log::trace!("exec script:\n{sql}");
    let mut last = 0_u64;
    let mut batch = Batch::new(connection, sql);
    while let Some(mut statement) = batch.next()? {
        last = statement.raw_execute()? as u64;
    }
    Ok(last)
}

fn query_statement(connection: &Connection, sql: &str, params: &[Value]) -> Result<Vec<Row>, Error> {
    log::trace!("query: {sql} params: {params:?}");
    let mut statement = connection.prepare_cached(sql)?;
    bind_params(&mut statement, params)?;
    let column_names: Vec<String> = statement
        .column_names()
        .iter()
        .map(|&name| name.to_string())
        .collect();
    to_rows(&column_names, statement.raw_query())
}

fn bind_params(statement: &mut Statement<'_>, params: &[Value]) -> Result<(), Error> {
    for (i, param) in params.iter().enumerate() {
        let i = i + 1;
        match param {
            Value::String(value) | Value::StringOpt(Some(value)) => {
                statement.raw_bind_parameter(i, value.as_str())?;
            }
            Value::Bool(value) | Value::BoolOpt(Some(value)) => {
                statement.raw_bind_parameter(i, i32::from(*value))?;
            }
            Value::Int(value) | Value::IntOpt(Some(value)) => {
                statement.raw_bind_parameter(i, *value)?;
            }
            Value::UInt(value) | Value::UIntOpt(Some(value)) => {
                statement.raw_bind_parameter(i, *value)?;
            }
            Value::Real(value) | Value::RealOpt(Some(value)) => {
                statement.raw_bind_parameter(i, *value)?;
            }
            Value::DateTime(value) | Value::DateTimeOpt(Some(value)) => {
                statement.raw_bind_parameter(i, format_datetime(value))?;
            }
            Value::Bytes(value) | Value::BytesOpt(Some(value)) => {
                statement.raw_bind_parameter(i, value.as_slice())?;
            }
            Value::Json(value) if !value.is_null() => {
                statement.raw_bind_parameter(i, value.to_string())?;
            }
            _ => {
                statement.raw_bind_parameter(i, Option::<i64>::None)?;
            }
        }
    }
    Ok(())
}

fn to_rows(column_names: &[String], mut rows: Rows<'_>) -> Result<Vec<Row>, Error> {
    let mut results = vec![];

    while let Some(row) = rows.next()? {
        results.push(from_row(column_names, row)?);
    }

    log::trace!(
        "got {} row{}",
        results.len(),
        if results.len() == 1 { "" } else { "s" }
    );

    Ok(results)
}

fn from_row(column_names: &[String], row: &rusqlite::Row<'_>) -> Result<Row, Error> {
    let mut columns = Vec::with_capacity(column_names.len());

    for (idx, column) in column_names.iter().enumerate() {
        let value: rusqlite::types::Value = row.get(idx)?;
        columns.push((column.clone(), value.into()));
    }

    Ok(Row { columns })
}

impl From<rusqlite::types::Value> for Value {
    fn from(value: rusqlite::types::Value) -> Self {
        match value {
            rusqlite::types::Value::Null => Self::Null,
            rusqlite::types::Value::Integer(value) => Self::Int(value),
            rusqlite::types::Value::Real(value) => Self::Real(value),
            rusqlite::types::Value::Text(value) => Self::String(value),
            rusqlite::types::Value::Blob(value) => Self::Bytes(value),
        }
    }
}
