//! Building `INSERT`/`UPDATE` statements from records: value extraction,
//! single-row parameterized statements, and the literal-inlining bulk paths.

use crate::{
    rewrite::Arg,
    schema::{Descriptor, FieldDescriptor, Record},
    value::{literal, null_value, quote_ident, Value},
    Error,
};

/// Extract the writable `(column, value)` set of a record in descriptor
/// order: `readonly` fields are dropped, `omitempty` fields are dropped when
/// zero, and `json` fields are serialized.
///
/// # Errors
///
/// * If a `json` field fails to serialize.
pub fn record_values<R: Record>(
    record: &R,
    desc: &Descriptor,
) -> Result<Vec<(String, Value)>, Error> {
    let mut values = Vec::with_capacity(desc.fields.len());

    for fd in &desc.fields {
        if fd.read_only {
            continue;
        }

        let value = record.get(&fd.column);
        let zero = value.is_zero();

        if zero && fd.omit_empty {
            continue;
        }

        if fd.json {
            values.push((fd.column.clone(), marshal_json(value, zero, fd)));
            continue;
        }

        values.push((fd.column.clone(), value));
    }

    Ok(values)
}

/// Serialize a `json` field for storage. An absent document stores NULL
/// when the field admits it; a `notnull` field stores the literal text
/// `null` instead.
fn marshal_json(value: Value, zero: bool, fd: &FieldDescriptor) -> Value {
    let document = match value {
        Value::Json(v) => v,
        v if v.is_null() => serde_json::Value::Null,
        Value::String(v) | Value::StringOpt(Some(v)) => serde_json::Value::String(v),
        Value::Bool(v) | Value::BoolOpt(Some(v)) => serde_json::Value::Bool(v),
        Value::Int(v) | Value::IntOpt(Some(v)) => serde_json::Value::from(v),
        Value::UInt(v) | Value::UIntOpt(Some(v)) => serde_json::Value::from(v),
        Value::Real(v) | Value::RealOpt(Some(v)) => serde_json::Value::from(v),
        Value::DateTime(v) | Value::DateTimeOpt(Some(v)) => {
            serde_json::Value::String(crate::value::format_datetime(&v))
        }
        Value::Bytes(v) | Value::BytesOpt(Some(v)) => {
            serde_json::Value::String(String::from_utf8_lossy(&v).into_owned())
        }
        _ => serde_json::Value::Null,
    };

    let text = document.to_string();
    if zero && (fd.null || (!fd.not_null && text == "null")) {
        Value::Null
    } else {
        Value::String(text)
    }
}

/// `INSERT INTO "t" ("c1",…) VALUES(?,…)` with null-normalized arguments.
/// The `?` markers are rewritten to the driver dialect downstream.
#[must_use]
pub fn insert_sql(
    table: &str,
    values: &[(String, Value)],
    desc: &Descriptor,
) -> (String, Vec<Arg>) {
    let mut cols = Vec::with_capacity(values.len());
    let mut marks = Vec::with_capacity(values.len());
    let mut args = Vec::with_capacity(values.len());

    for (column, value) in values {
        cols.push(quote_ident(column));
        marks.push("?");
        let fd = desc.field(column).expect("descriptor covers extracted columns");
        args.push(Arg::Value(null_value(value.clone(), fd)));
    }

    (
        format!(
            "INSERT INTO {} ({}) VALUES({})",
            quote_ident(table),
            cols.join(","),
            marks.join(","),
        ),
        args,
    )
}

/// `UPDATE "t" SET c=?,… WHERE pk=? [AND pk=?]…` — set columns are the
/// non-pk values, the where clause is built from the pk columns.
///
/// # Errors
///
/// * [`Error::NoPrimaryKey`] when the value set carries no pk column
/// * [`Error::EmptyPrimaryKey`] when a pk normalizes to NULL.
pub fn update_sql(
    table: &str,
    values: &[(String, Value)],
    desc: &Descriptor,
) -> Result<(String, Vec<Arg>), Error> {
    let mut set = String::new();
    let mut where_clause = String::new();
    let mut args: Vec<Arg> = Vec::with_capacity(values.len());
    let mut where_args: Vec<Arg> = Vec::new();

    for (column, value) in values {
        let fd = desc.field(column).expect("descriptor covers extracted columns");
        let value = null_value(value.clone(), fd);

        if fd.primary_key {
            if value.is_null() {
                return Err(Error::EmptyPrimaryKey(column.clone()));
            }
            if !where_args.is_empty() {
                where_clause.push_str(" AND ");
            }
            where_clause.push_str(&quote_ident(column));
            where_clause.push_str("=?");
            where_args.push(Arg::Value(value));
        } else {
            if !args.is_empty() {
                set.push(',');
            }
            set.push_str(&quote_ident(column));
            set.push_str("=?");
            args.push(Arg::Value(value));
        }
    }

    if where_args.is_empty() {
        return Err(Error::NoPrimaryKey);
    }

    args.extend(where_args);

    Ok((
        format!("UPDATE {} SET {set} WHERE {where_clause}", quote_ident(table)),
        args,
    ))
}

/// One multi-row `INSERT … VALUES (…),(…)` with inlined literals over the
/// union of all observed columns (first-seen order). A row that omitted a
/// column contributes NULL when the field admits it, the field's empty
/// literal otherwise.
///
/// # Errors
///
/// * If a row's `json` field fails to serialize.
pub fn bulk_insert_sql<R: Record>(
    table: &str,
    records: &[R],
    desc: &Descriptor,
    on_conflict_do_nothing: bool,
    conflict_columns: &[&str],
) -> Result<String, Error> {
    let mut columns: Vec<String> = Vec::new();
    let mut rows: Vec<Vec<(String, Value)>> = Vec::with_capacity(records.len());

    for record in records {
        let values = record_values(record, desc)?;
        for (column, _) in &values {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
        rows.push(values);
    }

    let mut sql = String::new();
    sql.push_str("INSERT INTO ");
    sql.push_str(&quote_ident(table));
    sql.push_str(" (");
    for (idx, column) in columns.iter().enumerate() {
        if idx > 0 {
            sql.push(',');
        }
        sql.push_str(&quote_ident(column));
    }
    sql.push_str(") VALUES ");

    for (idx, row) in rows.iter().enumerate() {
        if idx > 0 {
            sql.push(',');
        }
        sql.push('(');
        for (idx2, column) in columns.iter().enumerate() {
            if idx2 > 0 {
                sql.push(',');
            }
            let fd = desc.field(column).expect("descriptor covers union columns");
            match row.iter().find(|(c, _)| c == column) {
                Some((_, value)) => sql.push_str(&literal(&null_value(value.clone(), fd))),
                None if fd.allow_null() => sql.push_str("NULL"),
                None => sql.push_str(fd.empty_literal),
            }
        }
        sql.push(')');
    }

    if on_conflict_do_nothing {
        if conflict_columns.is_empty() {
            sql.push_str(" ON CONFLICT DO NOTHING");
        } else {
            let cols: Vec<String> = conflict_columns.iter().map(|c| quote_ident(c)).collect();
            sql.push_str(&format!(" ON CONFLICT ({}) DO NOTHING", cols.join(",")));
        }
    }

    Ok(sql)
}

/// One `UPDATE …;` per record concatenated into a single script, values
/// inlined as literals.
///
/// # Errors
///
/// * [`Error::NoPrimaryKey`] / [`Error::EmptyPrimaryKey`] as for
///   [`update_sql`]
/// * If a `json` field fails to serialize.
pub fn bulk_update_script<R: Record>(
    table: &str,
    records: &[R],
    desc: &Descriptor,
) -> Result<String, Error> {
    let mut script = String::new();

    for record in records {
        let values = record_values(record, desc)?;
        let mut set = String::new();
        let mut where_clause = String::new();
        let mut set_count = 0_usize;
        let mut where_count = 0_usize;

        for (column, value) in &values {
            let fd = desc.field(column).expect("descriptor covers extracted columns");
            let value = null_value(value.clone(), fd);

            if fd.primary_key {
                if value.is_null() {
                    return Err(Error::EmptyPrimaryKey(column.clone()));
                }
                if where_count > 0 {
                    where_clause.push_str(" AND ");
                }
                where_clause.push_str(&quote_ident(column));
                where_clause.push('=');
                where_clause.push_str(&literal(&value));
                where_count += 1;
            } else {
                if set_count > 0 {
                    set.push(',');
                }
                set.push_str(&quote_ident(column));
                set.push('=');
                set.push_str(&literal(&value));
                set_count += 1;
            }
        }

        if where_count == 0 {
            return Err(Error::NoPrimaryKey);
        }

        script.push_str("UPDATE ");
        script.push_str(&quote_ident(table));
        script.push_str(" SET ");
        script.push_str(&set);
        script.push_str(" WHERE ");
        script.push_str(&where_clause);
        script.push_str(";\n");
    }

    Ok(script)
}

/// Whether `save` should insert (absent or zero pk) or update.
///
/// # Errors
///
/// * [`Error::NoPrimaryKey`] when the record type does not declare exactly
///   one pk field.
pub fn save_is_insert<R: Record>(record: &R, desc: &Descriptor) -> Result<bool, Error> {
    let pk = desc.only_primary_key().ok_or(Error::NoPrimaryKey)?;
    let values = record_values(record, desc)?;
    Ok(values
        .iter()
        .find(|(column, _)| *column == pk.column)
        .is_none_or(|(_, value)| value.is_zero()))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::schema::{descriptor, FieldDef, FieldKind};

    #[derive(Debug, Default, Clone)]
    struct Entry {
        a: i64,
        b: String,
        c: Option<String>,
    }

    impl Record for Entry {
        fn record_fields() -> Vec<FieldDef> {
            vec![
                FieldDef::new("a", "a,pk,omitempty", FieldKind::Int),
                FieldDef::new("b", "b,omitempty", FieldKind::String),
                FieldDef::new("c", "c", FieldKind::String).optional(),
            ]
        }

        fn get(&self, column: &str) -> Value {
            match column {
                "a" => Value::Int(self.a),
                "b" => Value::String(self.b.clone()),
                "c" => Value::StringOpt(self.c.clone()),
                _ => Value::Null,
            }
        }

        fn set(&mut self, column: &str, value: Value) -> Result<(), Error> {
            match column {
                "a" => self.a = value.into_i64(),
                "b" => self.b = value.into_string(),
                "c" => self.c = value.into_string_opt(),
                _ => {}
            }
            Ok(())
        }
    }

    #[test]
    fn insert_sql_lists_extracted_columns() {
        let desc = descriptor::<Entry>();
        let entry = Entry {
            a: 0,
            b: "x".into(),
            c: None,
        };
        let values = record_values(&entry, &desc).unwrap();
        let (sql, args) = insert_sql("test", &values, &desc);
        assert_eq!(sql, "INSERT INTO \"test\" (\"b\",\"c\") VALUES(?,?)");
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn update_sql_splits_set_and_where() {
        let desc = descriptor::<Entry>();
        let entry = Entry {
            a: 7,
            b: "x".into(),
            c: Some("y".into()),
        };
        let values = record_values(&entry, &desc).unwrap();
        let (sql, args) = update_sql("test", &values, &desc).unwrap();
        assert_eq!(sql, "UPDATE \"test\" SET \"b\"=?,\"c\"=? WHERE \"a\"=?");
        assert_eq!(args.len(), 3);
    }

    #[test]
    fn update_without_pk_value_fails() {
        let desc = descriptor::<Entry>();
        // a is omitempty, so a zero pk never reaches the value set
        let entry = Entry {
            a: 0,
            b: "x".into(),
            c: None,
        };
        let values = record_values(&entry, &desc).unwrap();
        let err = update_sql("test", &values, &desc).unwrap_err();
        assert!(matches!(err, Error::NoPrimaryKey));
    }

    #[test]
    fn bulk_insert_inlines_escaped_literals() {
        let desc = descriptor::<Entry>();
        let records = vec![
            Entry {
                a: 0,
                b: "a'b".into(),
                c: None,
            },
            Entry {
                a: 0,
                b: "c".into(),
                c: None,
            },
        ];
        let sql = bulk_insert_sql("t", &records, &desc, false, &[]).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"t\" (\"b\",\"c\") VALUES ('a''b',NULL),('c',NULL)"
        );
    }

    #[test]
    fn bulk_insert_fills_missing_columns_per_row() {
        let desc = descriptor::<Entry>();
        let records = vec![
            Entry {
                a: 0,
                b: String::new(), // omitted by omitempty
                c: Some("x".into()),
            },
            Entry {
                a: 0,
                b: "y".into(),
                c: None,
            },
        ];
        let sql = bulk_insert_sql("t", &records, &desc, false, &[]).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"t\" (\"c\",\"b\") VALUES ('x',''),(NULL,'y')"
        );
    }

    #[test]
    fn bulk_insert_appends_conflict_clause() {
        let desc = descriptor::<Entry>();
        let records = vec![Entry {
            a: 0,
            b: "x".into(),
            c: None,
        }];
        let sql = bulk_insert_sql("t", &records, &desc, true, &["b"]).unwrap();
        assert!(sql.ends_with(" ON CONFLICT (\"b\") DO NOTHING"));

        let sql = bulk_insert_sql("t", &records, &desc, true, &[]).unwrap();
        assert!(sql.ends_with(" ON CONFLICT DO NOTHING"));
    }

    #[test]
    fn bulk_update_emits_one_statement_per_record() {
        let desc = descriptor::<Entry>();
        let records = vec![
            Entry {
                a: 1,
                b: "x".into(),
                c: None,
            },
            Entry {
                a: 2,
                b: "y".into(),
                c: Some("z".into()),
            },
        ];
        let script = bulk_update_script("test", &records, &desc).unwrap();
        assert_eq!(
            script,
            "UPDATE \"test\" SET \"b\"='x',\"c\"=NULL WHERE \"a\"=1;\n\
             UPDATE \"test\" SET \"b\"='y',\"c\"='z' WHERE \"a\"=2;\n"
        );
    }

    #[test]
    fn save_dispatches_on_pk_presence() {
        let desc = descriptor::<Entry>();
        let fresh = Entry {
            a: 0,
            b: "x".into(),
            c: None,
        };
        let stored = Entry {
            a: 5,
            b: "x".into(),
            c: None,
        };
        assert!(save_is_insert(&fresh, &desc).unwrap());
        assert!(!save_is_insert(&stored, &desc).unwrap());
    }
}
