#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Record-mapped SQL access for `SQLite` and `PostgreSQL`.
//!
//! The crate removes the boilerplate of column binding and parameter
//! marshaling by letting applications address relational tables through
//! record types that carry column metadata. Three subsystems cooperate:
//!
//! - a **row scanner** that projects result sets into scalars, records,
//!   sequences of either, or string matrices, with explicit NULL discipline
//!   and opt-in JSON columns ([`scan`], [`Record`]);
//! - a **statement rewriter** that replaces `?` markers with the driver's
//!   placeholder dialect, expands slice arguments into parenthesized lists,
//!   and inlines `@` identifier markers as quoted names ([`rewrite`]);
//! - a **transaction manager** that layers read-only vs. read-write
//!   semantics on the drivers, serializes `SQLite` write-transaction begin
//!   process-wide, and runs scoped transactions with automatic
//!   commit/rollback and post-commit/post-rollback hooks ([`Db`], [`Tx`]).
//!
//! ```rust,ignore
//! use sqlrecord::{args, Db};
//!
//! let db = Db::open("sqlite3", "app.db").await?;
//! let mut user = User { name: "Max".into(), ..User::default() };
//! db.save("user", &mut user).await?;
//!
//! let names: Vec<String> = db
//!     .query_scalars("SELECT name FROM @ WHERE id IN ?", &args!["user", vec![1_i64, 2, 4]])
//!     .await?;
//! ```

use std::fmt;

use thiserror::Error;

pub mod db;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod rewrite;
pub mod scan;
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod value;
pub mod write;

pub use db::{Db, Tx, TxOptions};
pub use rewrite::Arg;
pub use scan::{FromValue, Row};
pub use schema::{descriptor, Descriptor, FieldDef, FieldDescriptor, FieldKind, Record};
pub use value::Value;

/// Supported database drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    /// `SQLite` through `rusqlite`.
    Sqlite3,
    /// `PostgreSQL` through `tokio-postgres`.
    Postgres,
}

impl Driver {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite3 => "sqlite3",
            Self::Postgres => "postgres",
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How value placeholders are rendered into driver SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderMode {
    /// Emit `?` (`SQLite`).
    Question,
    /// Emit `$n`, 1-based (`PostgreSQL`).
    Dollar,
}

/// Per-handle statement-rewriting and write-path configuration.
///
/// A transaction handle receives a copy of the pool handle's configuration
/// at begin time; changing the pool handle afterwards does not affect
/// transactions already running.
#[derive(Debug, Clone)]
pub struct Config {
    pub placeholder_mode: PlaceholderMode,
    /// Rune consuming one positional argument (default `?`).
    pub placeholder_value: char,
    /// Rune consuming one string argument, inlined as a quoted identifier
    /// (default `@`).
    pub placeholder_key: char,
    /// Reserved escape rune (default `\`). Has no effect in this revision.
    pub placeholder_escape: char,
    /// Slice arguments longer than this are inlined as literals instead of
    /// placeholders.
    pub max_placeholder: usize,
    /// Append `RETURNING <pk>` on insert to learn the generated key.
    pub use_returning_for_last_id: bool,
    /// The driver reports `last_insert_id` on exec.
    pub supports_last_insert_id: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            placeholder_mode: PlaceholderMode::Question,
            placeholder_value: '?',
            placeholder_key: '@',
            placeholder_escape: '\\',
            max_placeholder: 100,
            use_returning_for_last_id: false,
            supports_last_insert_id: true,
        }
    }
}

/// Errors surfaced by every operation in the crate.
///
/// The first group are sentinels: they carry no driver payload and are meant
/// to be matched programmatically (`matches!(err, Error::NoRows)`). Driver
/// errors pass through transparently; statement context is attached by the
/// [`Error::Statement`] wrapper.
#[derive(Debug, Error)]
pub enum Error {
    /// A single-row destination received an empty result set.
    #[error("query returned 0 rows")]
    NoRows,
    /// A write affected a different number of rows than required.
    #[error("mismatched rows affected")]
    MismatchedRowsAffected,
    #[error("unknown driver {0:?}")]
    UnknownDriver(String),
    /// A slice argument was empty; `IN ()` is not valid SQL.
    #[error("unable to expand empty slice argument")]
    EmptySlice,
    /// A write path was reached on a read-only transaction.
    #[error("[{driver}] trying to write into read-only transaction: {statement}")]
    ReadOnlyTransaction { driver: Driver, statement: String },
    /// `save`/`update` need a record type with exactly one `pk` column.
    #[error("record needs exactly one 'pk' column")]
    NoPrimaryKey,
    /// Fewer arguments than placeholders.
    #[error("expecting argument #{index}, got {supplied} arguments")]
    MissingArgument { index: usize, supplied: usize },
    /// A slice element past the placeholder threshold was neither an
    /// integer, a string, nor null.
    #[error("unable to inline {kind} element in slice placeholder, only integers and strings are supported")]
    UnsupportedLiteral { kind: &'static str },
    /// The identifier marker consumed a non-string argument.
    #[error("identifier placeholder needs a string argument, argument #{index} is {kind}")]
    IdentifierArgument { index: usize, kind: &'static str },
    #[error("empty statement")]
    EmptyStatement,
    #[error("unable to build UPDATE clause with empty primary key column {0:?}")]
    EmptyPrimaryKey(String),
    /// `update_bulk`/`save_slice` and friends need a non-record destination.
    #[error("could not convert value to '{0}'")]
    CouldNotConvert(&'static str),
    /// A result column's type has no mapping onto [`Value`].
    #[error("type not found: '{type_name}'")]
    TypeNotFound { type_name: String },
    /// The scoped transaction job panicked; the transaction was rolled back.
    #[error("transaction job panicked: {0}")]
    JobPanic(String),
    /// The original error plus the rollback failure that followed it.
    #[error("{source} (rollback: {rollback})")]
    RollbackFailed {
        source: Box<Error>,
        rollback: Box<Error>,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[cfg(feature = "postgres")]
    #[error(transparent)]
    Postgres(#[from] tokio_postgres::Error),
    #[cfg(feature = "postgres")]
    #[error(transparent)]
    Pool(#[from] deadpool_postgres::PoolError),
    #[cfg(feature = "postgres")]
    #[error(transparent)]
    CreatePool(#[from] deadpool_postgres::CreatePoolError),
    /// A driver error decorated with the rewritten SQL and its arguments.
    #[error("database error: {source} SQL:\n {sql} \nARGS:\n{args}")]
    Statement {
        source: Box<Error>,
        sql: String,
        args: String,
    },
}

impl Error {
    /// Attach statement context to a driver error. [`Error::NoRows`] passes
    /// through untouched so callers can keep matching it by identity.
    #[must_use]
    pub fn with_statement(self, sql: &str, params: &[Value]) -> Self {
        if matches!(self, Self::NoRows) {
            return self;
        }
        Self::Statement {
            source: Box::new(self),
            sql: truncate(sql, 2000),
            args: args_to_string(params),
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max).collect();
    format!("{cut}...")
}

fn args_to_string(params: &[Value]) -> String {
    if params.is_empty() {
        return " <none>".to_string();
    }
    let mut out = String::new();
    for (idx, param) in params.iter().enumerate() {
        out.push_str(&format!(" #{idx} {param:?}\n"));
    }
    out
}
