use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use chrono::{DateTime, Utc};
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use sqlrecord::{args, Db, Error, FieldDef, FieldKind, Record, TxOptions, Value};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Store {
    field: String,
    field2: String,
}

#[derive(Debug, Default, Clone, PartialEq)]
struct TestRow {
    a: i64,
    b: String,
    c: String,
    d: f64,
    e: Option<DateTime<Utc>>,
    f: Store,
    g: Option<Store>,
}

impl Record for TestRow {
    fn record_fields() -> Vec<FieldDef> {
        vec![
            FieldDef::new("a", "a,pk,omitempty", FieldKind::Int),
            FieldDef::new("b", "b,omitempty", FieldKind::String),
            FieldDef::new("c", "c,notnull", FieldKind::String),
            FieldDef::new("d", "d,omitempty", FieldKind::Real),
            FieldDef::new("e", "e", FieldKind::DateTime).optional(),
            FieldDef::new("f", "f,json", FieldKind::Bytes),
            FieldDef::new("g", "g,json_ignore_error", FieldKind::Bytes).optional(),
        ]
    }

    fn get(&self, column: &str) -> Value {
        match column {
            "a" => Value::Int(self.a),
            "b" => Value::String(self.b.clone()),
            "c" => Value::String(self.c.clone()),
            "d" => Value::Real(self.d),
            "e" => Value::DateTimeOpt(self.e),
            "f" => serde_json::to_value(&self.f).map_or(Value::Null, Value::Json),
            "g" => self
                .g
                .as_ref()
                .and_then(|g| serde_json::to_value(g).ok())
                .map_or(Value::Null, Value::Json),
            _ => Value::Null,
        }
    }

    fn set(&mut self, column: &str, value: Value) -> Result<(), Error> {
        match column {
            "a" => self.a = value.into_i64(),
            "b" => self.b = value.into_string(),
            "c" => self.c = value.into_string(),
            "d" => self.d = value.into_f64(),
            "e" => self.e = value.into_datetime_opt(),
            "f" => self.f = value.into_json()?,
            "g" => self.g = value.into_json_opt()?,
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Innermost {
    a: i64,
}

impl Record for Innermost {
    fn record_fields() -> Vec<FieldDef> {
        vec![FieldDef::new("a", "a,pk,omitempty", FieldKind::Int)]
    }

    fn get(&self, column: &str) -> Value {
        match column {
            "a" => Value::Int(self.a),
            _ => Value::Null,
        }
    }

    fn set(&mut self, column: &str, value: Value) -> Result<(), Error> {
        if column == "a" {
            self.a = value.into_i64();
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Inner {
    innermost: Innermost,
    b: String,
}

impl Record for Inner {
    fn record_fields() -> Vec<FieldDef> {
        vec![
            FieldDef::flatten::<Innermost>(),
            FieldDef::new("b", "b", FieldKind::String),
        ]
    }

    fn get(&self, column: &str) -> Value {
        match column {
            "b" => Value::String(self.b.clone()),
            _ => self.innermost.get(column),
        }
    }

    fn set(&mut self, column: &str, value: Value) -> Result<(), Error> {
        match column {
            "b" => {
                self.b = value.into_string();
                Ok(())
            }
            _ => self.innermost.set(column, value),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
struct Outer {
    inner: Inner,
    c: String,
    d: f64,
}

impl Record for Outer {
    fn record_fields() -> Vec<FieldDef> {
        vec![
            FieldDef::flatten::<Inner>(),
            FieldDef::new("c", "c", FieldKind::String),
            FieldDef::new("d", "d,omitempty", FieldKind::Real),
        ]
    }

    fn get(&self, column: &str) -> Value {
        match column {
            "c" => Value::String(self.c.clone()),
            "d" => Value::Real(self.d),
            _ => self.inner.get(column),
        }
    }

    fn set(&mut self, column: &str, value: Value) -> Result<(), Error> {
        match column {
            "c" => self.c = value.into_string(),
            "d" => self.d = value.into_f64(),
            _ => return self.inner.set(column, value),
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
struct ReadOnlyCol {
    a: i64,
    b: String,
    c: String,
}

impl Record for ReadOnlyCol {
    fn record_fields() -> Vec<FieldDef> {
        vec![
            FieldDef::new("a", "a,pk,omitempty", FieldKind::Int),
            FieldDef::new("b", "b", FieldKind::String),
            FieldDef::new("c", "c,readonly", FieldKind::String),
        ]
    }

    fn get(&self, column: &str) -> Value {
        match column {
            "a" => Value::Int(self.a),
            "b" => Value::String(self.b.clone()),
            "c" => Value::String(self.c.clone()),
            _ => Value::Null,
        }
    }

    fn set(&mut self, column: &str, value: Value) -> Result<(), Error> {
        match column {
            "a" => self.a = value.into_i64(),
            "b" => self.b = value.into_string(),
            "c" => self.c = value.into_string(),
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
struct ExplicitKey {
    a: i64,
    b: String,
}

impl Record for ExplicitKey {
    fn record_fields() -> Vec<FieldDef> {
        vec![
            FieldDef::new("a", "a,pk", FieldKind::Int),
            FieldDef::new("b", "b,omitempty", FieldKind::String),
        ]
    }

    fn get(&self, column: &str) -> Value {
        match column {
            "a" => Value::Int(self.a),
            "b" => Value::String(self.b.clone()),
            _ => Value::Null,
        }
    }

    fn set(&mut self, column: &str, value: Value) -> Result<(), Error> {
        match column {
            "a" => self.a = value.into_i64(),
            "b" => self.b = value.into_string(),
            _ => {}
        }
        Ok(())
    }
}

fn temp_dsn() -> String {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let thread_id = std::thread::current().id();
    std::env::temp_dir()
        .join(format!(
            "sqlrecord_test_{}_{timestamp}_{thread_id:?}.sqlite",
            std::process::id()
        ))
        .to_string_lossy()
        .into_owned()
}

async fn open_test_db() -> Db {
    let db = Db::open("sqlite3", &temp_dsn())
        .await
        .expect("open sqlite database");
    db.exec(
        "CREATE TABLE test(
            a INTEGER PRIMARY KEY AUTOINCREMENT,
            b TEXT,
            c TEXT,
            d REAL,
            e DATETIME,
            f TEXT,
            g TEXT
        )",
        &[],
    )
    .await
    .expect("create test table");
    db
}

#[test_log::test(tokio::test)]
async fn insert_slice_assigns_keys_and_stores_time() {
    let db = open_test_db().await;
    let now = Utc::now();

    let mut data = vec![
        TestRow {
            b: "fooUPDATEME".into(),
            f: Store {
                field: "Yo".into(),
                field2: "Mama".into(),
            },
            ..TestRow::default()
        },
        TestRow {
            b: "bar".into(),
            c: "other".into(),
            d: 1.2345,
            e: Some(now),
            f: Store {
                field: "Henk".into(),
                field2: "Torsten".into(),
            },
            ..TestRow::default()
        },
        TestRow {
            b: "torsten".into(),
            c: "other".into(),
            d: 1.2345,
            ..TestRow::default()
        },
    ];

    db.insert_slice("test", &mut data).await.unwrap();

    for (idx, row) in data.iter().enumerate() {
        assert!(row.a > 0, "data[{idx}].a needs to be set (pk)");
    }

    let stored: Option<DateTime<Utc>> = db
        .query_scalar("SELECT e FROM test WHERE e IS NOT NULL LIMIT 1", &args![])
        .await
        .unwrap();
    assert_eq!(stored, Some(now));
}

#[test_log::test(tokio::test)]
async fn record_round_trips_modulo_key_assignment() {
    let db = open_test_db().await;
    let mut row = TestRow {
        b: "round".into(),
        c: "trip".into(),
        d: 2.5,
        e: Some(Utc::now()),
        f: Store {
            field: "a".into(),
            field2: "b".into(),
        },
        g: Some(Store {
            field: "c".into(),
            field2: "d".into(),
        }),
        ..TestRow::default()
    };

    db.insert("test", &mut row).await.unwrap();
    assert!(row.a > 0);

    let read_back: TestRow = db
        .query_one("SELECT * FROM test WHERE a = ?", &args![row.a])
        .await
        .unwrap();
    assert_eq!(read_back, row);
}

#[test_log::test(tokio::test)]
async fn empty_optionals_store_null_and_read_back_empty() {
    let db = open_test_db().await;
    let mut row = TestRow {
        b: "nulls".into(),
        ..TestRow::default()
    };
    db.insert("test", &mut row).await.unwrap();

    let nulls: i64 = db
        .query_scalar(
            "SELECT count(*) FROM test WHERE a = ? AND e IS NULL AND g IS NULL",
            &args![row.a],
        )
        .await
        .unwrap();
    assert_eq!(nulls, 1);

    let read_back: TestRow = db
        .query_one("SELECT * FROM test WHERE a = ?", &args![row.a])
        .await
        .unwrap();
    assert_eq!(read_back.e, None);
    assert_eq!(read_back.g, None);
}

#[test_log::test(tokio::test)]
async fn zero_rows_is_the_sentinel_by_identity() {
    let db = open_test_db().await;
    let err = db
        .query_scalar::<i64>("SELECT * FROM test WHERE a IN ?", &args![vec![-1_i64, -2, -3]])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoRows));

    // and an empty scalar sequence is a success
    let rows: Vec<i64> = db
        .query_scalars("SELECT a FROM test WHERE a IN ?", &args![vec![-1_i64, -2, -3]])
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[test_log::test(tokio::test)]
async fn embedded_records_flatten_and_save_writes_back_the_key() {
    let db = open_test_db().await;

    let desc = sqlrecord::descriptor::<Outer>();
    let columns: Vec<&str> = desc.fields.iter().map(|fd| fd.column.as_str()).collect();
    assert_eq!(columns, vec!["a", "b", "c", "d"]);

    let mut outer = Outer {
        inner: Inner {
            innermost: Innermost { a: 0 },
            b: "nested".into(),
        },
        c: "outer".into(),
        d: 3.25,
    };

    db.save("test", &mut outer).await.unwrap();
    assert!(outer.inner.innermost.a > 0);

    // a present now, save turns into an update
    outer.c = "updated".into();
    db.save("test", &mut outer).await.unwrap();

    let read_back: Outer = db
        .query_one(
            "SELECT a, b, c, d FROM test WHERE a = ?",
            &args![outer.inner.innermost.a],
        )
        .await
        .unwrap();
    assert_eq!(read_back, outer);
}

#[test_log::test(tokio::test)]
async fn read_only_transaction_rejects_writes_before_the_driver() {
    let db = open_test_db().await;
    let tx = db.begin_read().await.unwrap();

    let mut row = TestRow {
        b: "denied".into(),
        ..TestRow::default()
    };
    let err = tx.insert("test", &mut row).await.unwrap_err();
    assert!(matches!(err, Error::ReadOnlyTransaction { .. }));

    let err = tx
        .exec("DELETE FROM test", &args![])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ReadOnlyTransaction { .. }));

    // reads still work
    let count: i64 = tx.query_scalar("SELECT count(*) FROM test", &args![]).await.unwrap();
    assert_eq!(count, 0);

    tx.rollback().await.unwrap();
    db.close();
}

#[test_log::test(tokio::test)]
async fn bulk_insert_lands_every_row_with_escaped_literals() {
    let db = open_test_db().await;
    let rows = vec![
        TestRow {
            b: "a'b".into(),
            ..TestRow::default()
        },
        TestRow {
            b: "c".into(),
            ..TestRow::default()
        },
    ];

    db.insert_bulk("test", &rows).await.unwrap();

    let stored: Vec<String> = db
        .query_scalars("SELECT b FROM test ORDER BY a", &args![])
        .await
        .unwrap();
    assert_eq!(stored, vec!["a'b".to_string(), "c".to_string()]);
}

#[test_log::test(tokio::test)]
async fn bulk_insert_on_conflict_do_nothing_waives_the_count() {
    let db = open_test_db().await;
    let rows = vec![
        ExplicitKey {
            a: 1,
            b: "first".into(),
        },
        ExplicitKey {
            a: 1,
            b: "dup".into(),
        },
    ];

    db.insert_bulk_on_conflict_do_nothing("test", &rows, &[])
        .await
        .unwrap();

    let count: i64 = db.query_scalar("SELECT count(*) FROM test", &args![]).await.unwrap();
    assert_eq!(count, 1);
}

#[test_log::test(tokio::test)]
async fn bulk_update_rewrites_every_record() {
    let db = open_test_db().await;
    let mut rows = vec![
        TestRow {
            b: "one".into(),
            ..TestRow::default()
        },
        TestRow {
            b: "two".into(),
            ..TestRow::default()
        },
    ];
    db.insert_slice("test", &mut rows).await.unwrap();

    rows[0].b = "one2".into();
    rows[1].b = "two2".into();
    db.update_bulk("test", &rows).await.unwrap();

    let stored: Vec<String> = db
        .query_scalars("SELECT b FROM test ORDER BY a", &args![])
        .await
        .unwrap();
    assert_eq!(stored, vec!["one2".to_string(), "two2".to_string()]);
}

#[test_log::test(tokio::test)]
async fn update_requires_exactly_one_matched_row() {
    let db = open_test_db().await;
    let row = TestRow {
        a: 999_999,
        b: "ghost".into(),
        ..TestRow::default()
    };
    let err = db.update("test", &row).await.unwrap_err();
    assert!(matches!(err, Error::MismatchedRowsAffected));
}

#[test_log::test(tokio::test)]
async fn save_inserts_then_updates() {
    let db = open_test_db().await;
    let mut row = TestRow {
        b: "foo_save".into(),
        ..TestRow::default()
    };

    db.save("test", &mut row).await.unwrap();
    let first_key = row.a;
    assert!(first_key > 0);

    row.b = "foo_saved".into();
    db.save("test", &mut row).await.unwrap();
    assert_eq!(row.a, first_key);

    let count: i64 = db.query_scalar("SELECT count(*) FROM test", &args![]).await.unwrap();
    assert_eq!(count, 1);
    let b: String = db
        .query_scalar("SELECT b FROM test WHERE a = ?", &args![first_key])
        .await
        .unwrap();
    assert_eq!(b, "foo_saved");
}

#[test_log::test(tokio::test)]
async fn readonly_fields_scan_but_never_write() {
    let db = open_test_db().await;
    let mut row = ReadOnlyCol {
        b: "body".into(),
        c: "never stored".into(),
        ..ReadOnlyCol::default()
    };
    db.insert("test", &mut row).await.unwrap();

    db.exec("UPDATE test SET c = ? WHERE a = ?", &args!["from db", row.a])
        .await
        .unwrap();

    let read_back: ReadOnlyCol = db
        .query_one("SELECT a, b, c FROM test WHERE a = ?", &args![row.a])
        .await
        .unwrap();
    assert_eq!(read_back.c, "from db");
}

#[test_log::test(tokio::test)]
async fn broken_json_zeroes_ignore_error_fields_only() {
    let db = open_test_db().await;
    db.exec(
        "INSERT INTO test (b, f, g) VALUES (?, ?, ?)",
        &args!["broken", r#"{"field":"ok","field2":""}"#, "{not json"],
    )
    .await
    .unwrap();

    let row: TestRow = db
        .query_one("SELECT b, f, g FROM test LIMIT 1", &args![])
        .await
        .unwrap();
    assert_eq!(row.f.field, "ok");
    assert_eq!(row.g, None);

    // without the ignore flag the parse error surfaces
    db.exec("UPDATE test SET f = ?", &args!["{not json"]).await.unwrap();
    let err = db
        .query_one::<TestRow>("SELECT b, f FROM test LIMIT 1", &args![])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Json(_)));
}

#[test_log::test(tokio::test)]
async fn matrix_and_raw_rows_destinations() {
    let db = open_test_db().await;
    let mut rows = vec![
        TestRow {
            b: "m1".into(),
            ..TestRow::default()
        },
        TestRow {
            b: "m2".into(),
            ..TestRow::default()
        },
    ];
    db.insert_slice("test", &mut rows).await.unwrap();

    let matrix = db
        .query_matrix("SELECT a, b, e FROM test ORDER BY a", &args![])
        .await
        .unwrap();
    assert_eq!(matrix.len(), 2);
    assert_eq!(matrix[0][1], "m1");
    assert_eq!(matrix[0][2], ""); // NULL renders empty

    let raw = db
        .query_rows("SELECT a, b FROM test ORDER BY a", &args![])
        .await
        .unwrap();
    assert_eq!(raw.len(), 2);
    assert_eq!(raw[1].get("b"), Some(Value::String("m2".into())));
}

#[test_log::test(tokio::test)]
async fn exec_reports_rows_affected_and_insert_id() {
    let db = open_test_db().await;
    let (affected, insert_id) = db
        .exec_rows_affected("INSERT INTO test (b) VALUES (?)", &args!["x"])
        .await
        .unwrap();
    assert_eq!(affected, 1);
    assert!(insert_id > 0);

    let err = db.exec("", &args![]).await.unwrap_err();
    assert!(matches!(err, Error::EmptyStatement));
}

#[test_log::test(tokio::test)]
async fn version_reports_the_driver() {
    let db = open_test_db().await;
    let version = db.version().await.unwrap();
    assert!(version.starts_with("Sqlite "));
}

#[test_log::test(tokio::test)]
async fn driver_errors_are_decorated_and_remembered() {
    let db = open_test_db().await;
    let err = db
        .query_rows("SELECT nope FROM missing WHERE x = ?", &args![1_i64])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Statement { .. }));
    let remembered = db.last_error().expect("last error stored");
    assert!(remembered.contains("SQL"));
}

#[test_log::test(tokio::test)]
async fn unknown_driver_is_rejected() {
    let err = Db::open("mysql", "whatever").await.unwrap_err();
    assert!(matches!(err, Error::UnknownDriver(name) if name == "mysql"));
}

#[test_log::test(tokio::test)]
async fn transaction_commit_publishes_and_fires_hooks_in_order() {
    let db = open_test_db().await;
    let order = Arc::new(Mutex::new(Vec::new()));

    let tx = db.begin().await.unwrap();
    let mut row = TestRow {
        b: "committed".into(),
        ..TestRow::default()
    };
    tx.insert("test", &mut row).await.unwrap();

    for tag in ["h1", "h2", "h3"] {
        let order = Arc::clone(&order);
        tx.after_commit(move || order.lock().unwrap().push(tag));
    }
    tx.commit().await.unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["h1", "h2", "h3"]);
    let count: i64 = db.query_scalar("SELECT count(*) FROM test", &args![]).await.unwrap();
    assert_eq!(count, 1);
}

#[test_log::test(tokio::test)]
async fn rollback_discards_and_fires_only_rollback_hooks() {
    let db = open_test_db().await;
    let fired = Arc::new(Mutex::new(Vec::new()));

    let tx = db.begin().await.unwrap();
    let mut row = TestRow {
        b: "discarded".into(),
        ..TestRow::default()
    };
    tx.insert("test", &mut row).await.unwrap();

    {
        let fired = Arc::clone(&fired);
        tx.after_commit(move || fired.lock().unwrap().push("commit"));
    }
    {
        let fired = Arc::clone(&fired);
        tx.after_rollback(move || fired.lock().unwrap().push("rollback"));
    }
    tx.rollback().await.unwrap();

    assert_eq!(*fired.lock().unwrap(), vec!["rollback"]);
    let count: i64 = db.query_scalar("SELECT count(*) FROM test", &args![]).await.unwrap();
    assert_eq!(count, 0);
}

#[test_log::test(tokio::test)]
async fn exec_tx_commits_on_ok() {
    let db = open_test_db().await;

    let key = db
        .exec_tx(
            |tx| {
                Box::pin(async move {
                    let mut row = TestRow {
                        b: "scoped".into(),
                        ..TestRow::default()
                    };
                    tx.insert("test", &mut row).await?;
                    Ok(row.a)
                })
            },
            TxOptions::default(),
        )
        .await
        .unwrap();

    assert!(key > 0);
    let count: i64 = db.query_scalar("SELECT count(*) FROM test", &args![]).await.unwrap();
    assert_eq!(count, 1);
}

#[test_log::test(tokio::test)]
async fn exec_tx_rolls_back_on_job_error_without_commit_hooks() {
    let db = open_test_db().await;
    let fired = Arc::new(Mutex::new(Vec::new()));

    let hook_probe = Arc::clone(&fired);
    let err = db
        .exec_tx::<(), _>(
            move |tx| {
                Box::pin(async move {
                    let mut row = TestRow {
                        b: "doomed".into(),
                        ..TestRow::default()
                    };
                    tx.insert("test", &mut row).await?;
                    let commits = Arc::clone(&hook_probe);
                    tx.after_commit(move || commits.lock().unwrap().push("commit"));
                    let rollbacks = Arc::clone(&hook_probe);
                    tx.after_rollback(move || rollbacks.lock().unwrap().push("rollback"));
                    Err(Error::NoRows)
                })
            },
            TxOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NoRows));
    assert_eq!(*fired.lock().unwrap(), vec!["rollback"]);
    let count: i64 = db.query_scalar("SELECT count(*) FROM test", &args![]).await.unwrap();
    assert_eq!(count, 0);
}

#[test_log::test(tokio::test)]
async fn exec_tx_turns_panics_into_errors_and_rolls_back() {
    let db = open_test_db().await;

    let err = db
        .exec_tx::<(), _>(
            |tx| {
                Box::pin(async move {
                    let mut row = TestRow {
                        b: "panic".into(),
                        ..TestRow::default()
                    };
                    tx.insert("test", &mut row).await?;
                    panic!("boom");
                })
            },
            TxOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::JobPanic(message) if message.contains("boom")));
    let count: i64 = db.query_scalar("SELECT count(*) FROM test", &args![]).await.unwrap();
    assert_eq!(count, 0);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn concurrent_sqlite_writers_are_serialized() {
    let db = Arc::new(open_test_db().await);
    let in_flight = Arc::new(AtomicUsize::new(0));
    let mut tasks = Vec::new();

    for i in 0..5_i64 {
        let db = Arc::clone(&db);
        let in_flight = Arc::clone(&in_flight);
        tasks.push(tokio::spawn(async move {
            let tx = db.begin().await.expect("begin write transaction");

            // between a successful write-begin and its commit, no other
            // writer may be inside its transaction
            assert_eq!(in_flight.fetch_add(1, Ordering::SeqCst), 0);

            let mut row = TestRow {
                b: "concurrency".into(),
                c: format!("writer {i}"),
                ..TestRow::default()
            };
            tx.insert("test", &mut row).await.expect("insert in transaction");
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;

            in_flight.fetch_sub(1, Ordering::SeqCst);
            tx.commit().await.expect("commit write transaction");
        }));
    }

    for task in tasks {
        task.await.expect("writer task");
    }

    let count: i64 = db.query_scalar("SELECT count(*) FROM test", &args![]).await.unwrap();
    assert_eq!(count, 5);
}

#[test_log::test(tokio::test)]
async fn shared_transaction_handle_serializes_operations() {
    let db = Arc::new(open_test_db().await);
    let tx = Arc::new(db.begin().await.unwrap());

    let mut tasks = Vec::new();
    for i in 0..10_i64 {
        let tx = Arc::clone(&tx);
        tasks.push(tokio::spawn(async move {
            tx.exec(
                "INSERT INTO test (b, c) VALUES (?, ?)",
                &args!["shared", format!("op {i}")],
            )
            .await
            .expect("insert through shared handle");
        }));
    }
    for task in tasks {
        task.await.expect("insert task");
    }

    let tx = Arc::into_inner(tx).expect("all tasks finished");
    tx.commit().await.unwrap();

    let count: i64 = db.query_scalar("SELECT count(*) FROM test", &args![]).await.unwrap();
    assert_eq!(count, 10);
}
