//! Pool and transaction handles: driver dispatch, the query/exec surface,
//! record writes, transaction lifecycle, and scoped transactions.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex as StdMutex,
    },
};

use async_trait::async_trait;
use futures::FutureExt as _;

use crate::{
    rewrite::{self, Arg},
    scan::{self, FromValue, Row},
    schema::{self, Record},
    value::{quote_ident, Value},
    write, Config, Driver, Error, PlaceholderMode,
};

/// Result of a single exec: rows affected plus the driver's last-insert-id
/// (0 on drivers without one).
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExecOutcome {
    pub rows_affected: u64,
    pub last_insert_id: i64,
}

/// Uniform executor over a pooled connection or a live transaction.
#[async_trait]
pub(crate) trait Backend: Send + Sync + fmt::Debug {
    async fn exec(&self, sql: &str, params: &[Value]) -> Result<ExecOutcome, Error>;
    /// Run a semicolon-separated script, reporting the rows affected by the
    /// last statement.
    async fn exec_script(&self, sql: &str) -> Result<u64, Error>;
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, Error>;
}

/// A pool-owning backend that can hand out transaction backends.
#[async_trait]
pub(crate) trait PoolBackend: Backend {
    async fn begin(&self, write: bool) -> Result<Box<dyn Backend>, Error>;
}

/// Options for [`Db::begin_with`] and [`Db::exec_tx`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TxOptions {
    pub read_only: bool,
}

impl TxOptions {
    #[must_use]
    pub const fn read_only() -> Self {
        Self { read_only: true }
    }
}

type Hook = Box<dyn FnOnce() + Send>;

struct DbInner {
    backend: Arc<dyn PoolBackend>,
    driver: Driver,
    dsn: String,
    active_txs: AtomicUsize,
    last_error: StdMutex<Option<String>>,
}

/// Pool handle returned by [`Db::open`].
///
/// Safe to share across tasks; every operation checks a connection out of
/// the driver's pool. Transactions are started with [`Db::begin`] /
/// [`Db::begin_read`] or scoped with [`Db::exec_tx`].
pub struct Db {
    cfg: Config,
    inner: Arc<DbInner>,
}

/// Transaction handle returned by `begin*`.
///
/// Operations on the handle are serialized by an internal mutex, so sharing
/// it across tasks cannot interleave statements. [`Tx::commit`] and
/// [`Tx::rollback`] consume the handle; a finished transaction cannot be
/// reused.
pub struct Tx {
    cfg: Config,
    driver: Driver,
    backend: Box<dyn Backend>,
    write_mode: bool,
    op_lock: tokio::sync::Mutex<()>,
    after_commit: StdMutex<Vec<Hook>>,
    after_rollback: StdMutex<Vec<Hook>>,
    last_error: StdMutex<Option<String>>,
    finished: AtomicBool,
    pool: Arc<DbInner>,
}

/// Shared plumbing behind the public query/exec surface of [`Db`] and
/// [`Tx`].
trait Session: Sync {
    fn cfg(&self) -> &Config;
    fn backend(&self) -> &dyn Backend;
    fn op_lock(&self) -> Option<&tokio::sync::Mutex<()>>;
    fn check_write(&self, statement: &str) -> Result<(), Error>;
    fn store_error(&self, rendered: String);
}

impl Session for Db {
    fn cfg(&self) -> &Config {
        &self.cfg
    }

    fn backend(&self) -> &dyn Backend {
        self.inner.backend.as_ref()
    }

    fn op_lock(&self) -> Option<&tokio::sync::Mutex<()>> {
        None
    }

    fn check_write(&self, _statement: &str) -> Result<(), Error> {
        Ok(())
    }

    fn store_error(&self, rendered: String) {
        *self
            .inner
            .last_error
            .lock()
            .expect("last error lock poisoned") = Some(rendered);
    }
}

impl Session for Tx {
    fn cfg(&self) -> &Config {
        &self.cfg
    }

    fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    fn op_lock(&self) -> Option<&tokio::sync::Mutex<()>> {
        Some(&self.op_lock)
    }

    fn check_write(&self, statement: &str) -> Result<(), Error> {
        if self.write_mode {
            return Ok(());
        }
        Err(Error::ReadOnlyTransaction {
            driver: self.driver,
            statement: statement.to_string(),
        })
    }

    fn store_error(&self, rendered: String) {
        *self.last_error.lock().expect("last error lock poisoned") = Some(rendered);
    }
}

fn track<S: Session + ?Sized, T>(session: &S, result: Result<T, Error>) -> Result<T, Error> {
    if let Err(err) = &result {
        if !matches!(err, Error::NoRows) {
            log::debug!("sqlrecord error: {err}");
            session.store_error(err.to_string());
        }
    }
    result
}

async fn query_rows_core<S: Session + ?Sized>(
    session: &S,
    sql: &str,
    args: &[Arg],
) -> Result<Vec<Row>, Error> {
    let _guard = match session.op_lock() {
        Some(lock) => Some(lock.lock().await),
        None => None,
    };
    let (sql, params) = rewrite::replace_args(session.cfg(), sql, args)?;
    session
        .backend()
        .query(&sql, &params)
        .await
        .map_err(|err| err.with_statement(&sql, &params))
}

async fn exec_core<S: Session + ?Sized>(
    session: &S,
    sql: &str,
    args: &[Arg],
) -> Result<ExecOutcome, Error> {
    session.check_write(sql)?;
    let _guard = match session.op_lock() {
        Some(lock) => Some(lock.lock().await),
        None => None,
    };
    let (sql, params) = if args.is_empty() {
        (sql.to_string(), vec![])
    } else {
        rewrite::replace_args(session.cfg(), sql, args)?
    };
    session
        .backend()
        .exec(&sql, &params)
        .await
        .map_err(|err| err.with_statement(&sql, &params))
}

async fn exec_script_core<S: Session + ?Sized>(session: &S, sql: &str) -> Result<u64, Error> {
    session.check_write(sql)?;
    let _guard = match session.op_lock() {
        Some(lock) => Some(lock.lock().await),
        None => None,
    };
    session
        .backend()
        .exec_script(sql)
        .await
        .map_err(|err| err.with_statement(sql, &[]))
}

async fn insert_record_core<S: Session + ?Sized, R: Record>(
    session: &S,
    table: &str,
    record: &mut R,
) -> Result<(), Error> {
    let desc = schema::descriptor::<R>();
    let values = write::record_values(record, &desc)?;
    let (mut sql, args) = write::insert_sql(table, &values, &desc);
    let integer_pk = desc.only_primary_key().filter(|fd| fd.kind.is_integer());

    if session.cfg().use_returning_for_last_id {
        if let Some(pk) = integer_pk {
            session.check_write(&sql)?;
            sql.push_str(" RETURNING ");
            sql.push_str(&quote_ident(&pk.column));
            let rows = query_rows_core(session, &sql, &args).await?;
            let insert_id: i64 = scan::scan_scalar(&rows)?;
            record.set(&pk.column, Value::Int(insert_id))?;
            return Ok(());
        }
    }

    let outcome = exec_core(session, &sql, &args).await?;
    if outcome.rows_affected != 1 {
        return Err(Error::MismatchedRowsAffected);
    }

    if session.cfg().supports_last_insert_id {
        if let Some(pk) = integer_pk {
            record.set(&pk.column, Value::Int(outcome.last_insert_id))?;
        }
    }

    Ok(())
}

async fn update_record_core<S: Session + ?Sized, R: Record>(
    session: &S,
    table: &str,
    record: &R,
) -> Result<(), Error> {
    let desc = schema::descriptor::<R>();
    let values = write::record_values(record, &desc)?;
    let (sql, args) = write::update_sql(table, &values, &desc)?;
    let outcome = exec_core(session, &sql, &args).await?;
    if outcome.rows_affected != 1 {
        return Err(Error::MismatchedRowsAffected);
    }
    Ok(())
}

async fn insert_bulk_core<S: Session + ?Sized, R: Record>(
    session: &S,
    table: &str,
    records: &[R],
    on_conflict_do_nothing: bool,
    conflict_columns: &[&str],
) -> Result<(), Error> {
    if records.is_empty() {
        return Ok(());
    }
    let desc = schema::descriptor::<R>();
    let sql = write::bulk_insert_sql(
        table,
        records,
        &desc,
        on_conflict_do_nothing,
        conflict_columns,
    )?;
    let outcome = exec_core(session, &sql, &[]).await?;
    if !on_conflict_do_nothing && outcome.rows_affected != records.len() as u64 {
        return Err(Error::MismatchedRowsAffected);
    }
    Ok(())
}

async fn update_bulk_core<S: Session + ?Sized, R: Record>(
    session: &S,
    table: &str,
    records: &[R],
) -> Result<(), Error> {
    if records.is_empty() {
        return Ok(());
    }
    let desc = schema::descriptor::<R>();
    let script = write::bulk_update_script(table, records, &desc)?;
    let rows_affected = exec_script_core(session, &script).await?;
    if rows_affected != 1 {
        return Err(Error::MismatchedRowsAffected);
    }
    Ok(())
}

async fn save_record_core<S: Session + ?Sized, R: Record>(
    session: &S,
    table: &str,
    record: &mut R,
) -> Result<(), Error> {
    let desc = schema::descriptor::<R>();
    if write::save_is_insert(record, &desc)? {
        insert_record_core(session, table, record).await
    } else {
        update_record_core(session, table, record).await
    }
}

macro_rules! session_methods {
    () => {
        /// Run a query and return the raw rows; the caller owns them.
        ///
        /// # Errors
        ///
        /// * On rewrite or driver failure.
        pub async fn query_rows(&self, sql: &str, args: &[Arg]) -> Result<Vec<Row>, Error> {
            track(self, query_rows_core(self, sql, args).await)
        }

        /// First column of the first row.
        ///
        /// # Errors
        ///
        /// * [`Error::NoRows`] when the result is empty.
        pub async fn query_scalar<T: FromValue>(
            &self,
            sql: &str,
            args: &[Arg],
        ) -> Result<T, Error> {
            let rows = query_rows_core(self, sql, args).await;
            track(self, rows.and_then(|rows| scan::scan_scalar(&rows)))
        }

        /// First column of every row; an empty result is an empty vector.
        ///
        /// # Errors
        ///
        /// * On rewrite, driver, or conversion failure.
        pub async fn query_scalars<T: FromValue>(
            &self,
            sql: &str,
            args: &[Arg],
        ) -> Result<Vec<T>, Error> {
            let rows = query_rows_core(self, sql, args).await;
            track(self, rows.and_then(|rows| scan::scan_scalars(&rows)))
        }

        /// First row scanned into a record.
        ///
        /// # Errors
        ///
        /// * [`Error::NoRows`] when the result is empty.
        pub async fn query_one<R: Record>(&self, sql: &str, args: &[Arg]) -> Result<R, Error> {
            let rows = query_rows_core(self, sql, args).await;
            track(self, rows.and_then(|rows| scan::scan_one(&rows)))
        }

        /// Every row scanned into a record.
        ///
        /// # Errors
        ///
        /// * On rewrite, driver, or scan failure.
        pub async fn query_all<R: Record>(
            &self,
            sql: &str,
            args: &[Arg],
        ) -> Result<Vec<R>, Error> {
            let rows = query_rows_core(self, sql, args).await;
            track(self, rows.and_then(|rows| scan::scan_all(&rows)))
        }

        /// Every column of every row stringified; NULL renders empty.
        ///
        /// # Errors
        ///
        /// * On rewrite or driver failure.
        pub async fn query_matrix(
            &self,
            sql: &str,
            args: &[Arg],
        ) -> Result<Vec<Vec<String>>, Error> {
            let rows = query_rows_core(self, sql, args).await;
            track(self, rows.map(|rows| scan::scan_matrix(&rows)))
        }

        /// Execute a statement, discarding the outcome.
        ///
        /// # Errors
        ///
        /// * [`Error::EmptyStatement`] on empty input, otherwise as the
        ///   driver reports.
        pub async fn exec(&self, sql: &str, args: &[Arg]) -> Result<(), Error> {
            if sql.is_empty() {
                return track(self, Err(Error::EmptyStatement));
            }
            track(self, exec_core(self, sql, args).await.map(|_| ()))
        }

        /// Execute a statement and report `(rows_affected, last_insert_id)`.
        /// Drivers without last-insert-id report 0.
        ///
        /// # Errors
        ///
        /// * [`Error::EmptyStatement`] on empty input, otherwise as the
        ///   driver reports.
        pub async fn exec_rows_affected(
            &self,
            sql: &str,
            args: &[Arg],
        ) -> Result<(u64, i64), Error> {
            if sql.is_empty() {
                return track(self, Err(Error::EmptyStatement));
            }
            track(
                self,
                exec_core(self, sql, args)
                    .await
                    .map(|outcome| (outcome.rows_affected, outcome.last_insert_id)),
            )
        }

        /// Insert one record. With a single integer `pk` field the generated
        /// key is written back into the record.
        ///
        /// # Errors
        ///
        /// * [`Error::MismatchedRowsAffected`] when the insert did not
        ///   affect exactly one row.
        pub async fn insert<R: Record>(&self, table: &str, record: &mut R) -> Result<(), Error> {
            track(self, insert_record_core(self, table, record).await)
        }

        /// Insert a slice of records, one statement per row, with key
        /// write-back on each.
        ///
        /// # Errors
        ///
        /// * As [`Self::insert`]; stops at the first failing row.
        pub async fn insert_slice<R: Record>(
            &self,
            table: &str,
            records: &mut [R],
        ) -> Result<(), Error> {
            for record in records.iter_mut() {
                self.insert(table, record).await?;
            }
            Ok(())
        }

        /// Insert a slice of records with a single multi-row statement,
        /// values inlined as literals.
        ///
        /// # Errors
        ///
        /// * [`Error::MismatchedRowsAffected`] when fewer rows landed than
        ///   records were given.
        pub async fn insert_bulk<R: Record>(
            &self,
            table: &str,
            records: &[R],
        ) -> Result<(), Error> {
            track(self, insert_bulk_core(self, table, records, false, &[]).await)
        }

        /// As [`Self::insert_bulk`] with `ON CONFLICT [(cols)] DO NOTHING`
        /// appended; the row-count check is waived.
        ///
        /// # Errors
        ///
        /// * As the driver reports.
        pub async fn insert_bulk_on_conflict_do_nothing<R: Record>(
            &self,
            table: &str,
            records: &[R],
            conflict_columns: &[&str],
        ) -> Result<(), Error> {
            track(
                self,
                insert_bulk_core(self, table, records, true, conflict_columns).await,
            )
        }

        /// Update one record; the WHERE clause is built from its `pk`
        /// columns.
        ///
        /// # Errors
        ///
        /// * [`Error::NoPrimaryKey`] without a pk column,
        ///   [`Error::MismatchedRowsAffected`] when no row matched.
        pub async fn update<R: Record>(&self, table: &str, record: &R) -> Result<(), Error> {
            track(self, update_record_core(self, table, record).await)
        }

        /// Update a slice of records, one statement per record.
        ///
        /// # Errors
        ///
        /// * As [`Self::update`]; stops at the first failing row.
        pub async fn update_slice<R: Record>(
            &self,
            table: &str,
            records: &[R],
        ) -> Result<(), Error> {
            for record in records {
                self.update(table, record).await?;
            }
            Ok(())
        }

        /// Update a slice of records as one semicolon-separated script with
        /// inlined literals.
        ///
        /// # Errors
        ///
        /// * [`Error::MismatchedRowsAffected`] when the script's reported
        ///   row count differs from 1 (the last statement's count).
        pub async fn update_bulk<R: Record>(
            &self,
            table: &str,
            records: &[R],
        ) -> Result<(), Error> {
            track(self, update_bulk_core(self, table, records).await)
        }

        /// Insert when the record's single `pk` is zero, update otherwise.
        ///
        /// # Errors
        ///
        /// * [`Error::NoPrimaryKey`] unless the type has exactly one pk
        ///   field.
        pub async fn save<R: Record>(&self, table: &str, record: &mut R) -> Result<(), Error> {
            track(self, save_record_core(self, table, record).await)
        }

        /// Save a slice of records, one decision per record.
        ///
        /// # Errors
        ///
        /// * As [`Self::save`]; stops at the first failing row.
        pub async fn save_slice<R: Record>(
            &self,
            table: &str,
            records: &mut [R],
        ) -> Result<(), Error> {
            for record in records.iter_mut() {
                self.save(table, record).await?;
            }
            Ok(())
        }

        /// The last non-sentinel error rendered for diagnostics.
        #[must_use]
        pub fn last_error(&self) -> Option<String> {
            self.last_error_slot()
                .lock()
                .expect("last error lock poisoned")
                .clone()
        }
    };
}

impl Db {
    /// Open a pool handle. `driver` is `"sqlite3"` or `"postgres"`.
    ///
    /// # Errors
    ///
    /// * [`Error::UnknownDriver`] for anything else
    /// * If the driver fails to open or verify the connection.
    pub async fn open(driver: &str, dsn: &str) -> Result<Self, Error> {
        let (driver, backend, cfg): (Driver, Arc<dyn PoolBackend>, Config) = match driver {
            #[cfg(feature = "sqlite")]
            "sqlite3" => (
                Driver::Sqlite3,
                Arc::new(crate::sqlite::SqlitePool::open(dsn)?),
                Config {
                    placeholder_mode: PlaceholderMode::Question,
                    supports_last_insert_id: true,
                    use_returning_for_last_id: false,
                    ..Config::default()
                },
            ),
            #[cfg(feature = "postgres")]
            "postgres" => (
                Driver::Postgres,
                Arc::new(crate::postgres::PostgresPool::open(dsn).await?),
                Config {
                    placeholder_mode: PlaceholderMode::Dollar,
                    supports_last_insert_id: false,
                    use_returning_for_last_id: true,
                    ..Config::default()
                },
            ),
            other => return Err(Error::UnknownDriver(other.to_string())),
        };

        log::debug!("opened {driver} handle for {dsn}");

        Ok(Self {
            cfg,
            inner: Arc::new(DbInner {
                backend,
                driver,
                dsn: dsn.to_string(),
                active_txs: AtomicUsize::new(0),
                last_error: StdMutex::new(None),
            }),
        })
    }

    session_methods!();

    fn last_error_slot(&self) -> &StdMutex<Option<String>> {
        &self.inner.last_error
    }

    #[must_use]
    pub fn driver(&self) -> Driver {
        self.inner.driver
    }

    #[must_use]
    pub fn dsn(&self) -> &str {
        &self.inner.dsn
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.cfg
    }

    /// Version string of the connected database.
    ///
    /// # Errors
    ///
    /// * If the version query fails.
    pub async fn version(&self) -> Result<String, Error> {
        match self.inner.driver {
            Driver::Postgres => self.query_scalar("SELECT version()", &[]).await,
            Driver::Sqlite3 => {
                let version: String = self.query_scalar("SELECT sqlite_version()", &[]).await?;
                Ok(format!("Sqlite {version}"))
            }
        }
    }

    /// Begin a read-write transaction.
    ///
    /// # Errors
    ///
    /// * If the driver fails to begin.
    pub async fn begin(&self) -> Result<Tx, Error> {
        self.begin_with(TxOptions::default()).await
    }

    /// Begin a read-only transaction; write operations on it fail before
    /// reaching the driver.
    ///
    /// # Errors
    ///
    /// * If the driver fails to begin.
    pub async fn begin_read(&self) -> Result<Tx, Error> {
        self.begin_with(TxOptions::read_only()).await
    }

    /// Begin a transaction with explicit options.
    ///
    /// On `SQLite`, a read-write begin is serialized through a process-wide
    /// mutex and issued as `BEGIN IMMEDIATE`, taking the write lock up
    /// front instead of at the first write.
    ///
    /// # Errors
    ///
    /// * If the driver fails to begin.
    pub async fn begin_with(&self, opts: TxOptions) -> Result<Tx, Error> {
        let write = !opts.read_only;
        let backend = self.inner.backend.begin(write).await?;
        self.inner.active_txs.fetch_add(1, Ordering::SeqCst);

        Ok(Tx {
            cfg: self.cfg.clone(),
            driver: self.inner.driver,
            backend,
            write_mode: write,
            op_lock: tokio::sync::Mutex::new(()),
            after_commit: StdMutex::new(Vec::new()),
            after_rollback: StdMutex::new(Vec::new()),
            last_error: StdMutex::new(None),
            finished: AtomicBool::new(false),
            pool: Arc::clone(&self.inner),
        })
    }

    /// Run `job` inside a transaction scoped to this call: commit when it
    /// returns `Ok`, rollback when it returns `Err` or panics.
    ///
    /// In write mode, driver defaults are applied before the job runs
    /// (`SET LOCAL lock_timeout = '60s'` on `PostgreSQL`,
    /// `PRAGMA defer_foreign_keys='ON'` on `SQLite`). Nested scoped
    /// transactions cannot be expressed: the job only sees a [`Tx`], which
    /// has no `begin` or `exec_tx`.
    ///
    /// ```rust,ignore
    /// db.exec_tx(
    ///     |tx| Box::pin(async move {
    ///         tx.insert("events", &mut event).await?;
    ///         tx.after_commit(|| notify());
    ///         Ok(())
    ///     }),
    ///     TxOptions::default(),
    /// ).await?;
    /// ```
    ///
    /// # Errors
    ///
    /// * The job's error (combined with any rollback failure)
    /// * [`Error::JobPanic`] when the job panicked
    /// * The commit error when committing fails.
    pub async fn exec_tx<T, F>(&self, job: F, opts: TxOptions) -> Result<T, Error>
    where
        T: Send,
        F: for<'t> FnOnce(&'t Tx) -> futures::future::BoxFuture<'t, Result<T, Error>> + Send,
    {
        let tx = self.begin_with(opts).await?;

        if tx.is_write_mode() {
            let defaults = match self.inner.driver {
                Driver::Postgres => "SET LOCAL lock_timeout = '60s'",
                Driver::Sqlite3 => "PRAGMA defer_foreign_keys='ON'",
            };
            if let Err(err) = tx.exec(defaults, &[]).await {
                return Err(rollback_combined(tx, err).await);
            }
        }

        match std::panic::AssertUnwindSafe(job(&tx)).catch_unwind().await {
            Ok(Ok(value)) => {
                tx.commit().await?;
                Ok(value)
            }
            Ok(Err(err)) => Err(rollback_combined(tx, err).await),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(rollback_combined(tx, Error::JobPanic(message)).await)
            }
        }
    }

    /// Drop the pool.
    ///
    /// # Panics
    ///
    /// * If a transaction begun from this handle is still alive.
    pub fn close(self) {
        assert_eq!(
            self.inner.active_txs.load(Ordering::SeqCst),
            0,
            "close with a live transaction"
        );
    }
}

impl fmt::Display for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {:p}]", self.inner.driver, Arc::as_ptr(&self.inner))
    }
}

impl fmt::Debug for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Db")
            .field("driver", &self.inner.driver)
            .field("dsn", &self.inner.dsn)
            .finish_non_exhaustive()
    }
}

async fn rollback_combined(tx: Tx, err: Error) -> Error {
    match tx.rollback().await {
        Ok(()) => err,
        Err(rollback_err) => Error::RollbackFailed {
            source: Box::new(err),
            rollback: Box::new(rollback_err),
        },
    }
}

impl Tx {
    session_methods!();

    fn last_error_slot(&self) -> &StdMutex<Option<String>> {
        &self.last_error
    }

    #[must_use]
    pub const fn is_write_mode(&self) -> bool {
        self.write_mode
    }

    #[must_use]
    pub const fn driver(&self) -> Driver {
        self.driver
    }

    /// Register a hook to run after a successful commit. Hooks run in
    /// registration order and are fire-and-forget.
    pub fn after_commit<F: FnOnce() + Send + 'static>(&self, hook: F) {
        self.after_commit
            .lock()
            .expect("hook lock poisoned")
            .push(Box::new(hook));
    }

    /// Register a hook to run after a successful rollback.
    pub fn after_rollback<F: FnOnce() + Send + 'static>(&self, hook: F) {
        self.after_rollback
            .lock()
            .expect("hook lock poisoned")
            .push(Box::new(hook));
    }

    /// Register a hook on both the commit and the rollback queue.
    pub fn after_transaction<F: FnOnce() + Send + Clone + 'static>(&self, hook: F) {
        self.after_commit(hook.clone());
        self.after_rollback(hook);
    }

    /// Commit the transaction, consuming the handle. Post-commit hooks run
    /// after the driver confirms.
    ///
    /// # Errors
    ///
    /// * If the driver commit fails; hooks do not run in that case.
    pub async fn commit(self) -> Result<(), Error> {
        let result = {
            let _guard = self.op_lock.lock().await;
            self.backend.exec("COMMIT", &[]).await
        };
        self.finish();
        result?;

        let hooks = std::mem::take(
            &mut *self.after_commit.lock().expect("hook lock poisoned"),
        );
        for hook in hooks {
            hook();
        }
        Ok(())
    }

    /// Roll the transaction back, consuming the handle. Post-rollback hooks
    /// run after the driver confirms.
    ///
    /// # Errors
    ///
    /// * If the driver rollback fails; hooks do not run in that case.
    pub async fn rollback(self) -> Result<(), Error> {
        let result = {
            let _guard = self.op_lock.lock().await;
            self.backend.exec("ROLLBACK", &[]).await
        };
        self.finish();
        result?;

        let hooks = std::mem::take(
            &mut *self.after_rollback.lock().expect("hook lock poisoned"),
        );
        for hook in hooks {
            hook();
        }
        Ok(())
    }

    fn finish(&self) {
        if !self.finished.swap(true, Ordering::SeqCst) {
            self.pool.active_txs.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for Tx {
    fn drop(&mut self) {
        // A dropped, unfinished transaction leaks its BEGIN until the
        // connection is reused; the driver rolls back then. Keep the
        // counter honest either way.
        self.finish();
    }
}

impl fmt::Display for Tx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, tx]", self.driver)
    }
}

impl fmt::Debug for Tx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tx")
            .field("driver", &self.driver)
            .field("write_mode", &self.write_mode)
            .finish_non_exhaustive()
    }
}
