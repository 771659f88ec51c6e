//! Projection of materialized result rows into typed destinations: single
//! scalars, records, sequences of either, and string matrices.

use chrono::{DateTime, Utc};

use crate::{
    schema::{self, Record},
    value::Value,
    Error,
};

/// One result row: column names paired with driver-neutral values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub columns: Vec<(String, Value)>,
}

impl Row {
    #[must_use]
    pub fn get(&self, column: &str) -> Option<Value> {
        self.columns
            .iter()
            .find(|c| c.0 == column)
            .map(|c| c.1.clone())
    }

    fn first_value(&self) -> Value {
        self.columns
            .first()
            .map_or(Value::Null, |(_, value)| value.clone())
    }
}

/// Conversion from a scanned column value into a typed scalar destination.
///
/// Integer destinations accept any integer width and truncate two's
/// complement style; `Option` destinations map NULL to `None`; everything
/// else fails with [`Error::CouldNotConvert`].
pub trait FromValue: Sized {
    /// # Errors
    ///
    /// * If the value's kind has no conversion into `Self`.
    fn from_value(value: Value) -> Result<Self, Error>;
}

macro_rules! int_from_value {
    ($($t:ty),+ $(,)?) => {
        $(
            impl FromValue for $t {
                #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]
                fn from_value(value: Value) -> Result<Self, Error> {
                    match value {
                        Value::Int(v) | Value::IntOpt(Some(v)) => Ok(v as Self),
                        Value::UInt(v) | Value::UIntOpt(Some(v)) => Ok(v as Self),
                        value if value.is_null() => Ok(0),
                        other => Err(Error::CouldNotConvert(stringify!($t)).with_value(&other)),
                    }
                }
            }
        )+
    };
}

int_from_value!(i8, i16, i32, i64, u8, u16, u32, u64);

impl FromValue for f64 {
    #[allow(clippy::cast_precision_loss)]
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Real(v) | Value::RealOpt(Some(v)) => Ok(v),
            Value::Int(v) | Value::IntOpt(Some(v)) => Ok(v as Self),
            value if value.is_null() => Ok(0.0),
            other => Err(Error::CouldNotConvert("f64").with_value(&other)),
        }
    }
}

impl FromValue for f32 {
    #[allow(clippy::cast_possible_truncation)]
    fn from_value(value: Value) -> Result<Self, Error> {
        f64::from_value(value).map(|v| v as Self)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Bool(v) | Value::BoolOpt(Some(v)) => Ok(v),
            Value::Int(v) | Value::IntOpt(Some(v)) => Ok(v != 0),
            value if value.is_null() => Ok(false),
            other => Err(Error::CouldNotConvert("bool").with_value(&other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::String(v) | Value::StringOpt(Some(v)) => Ok(v),
            Value::Bytes(v) | Value::BytesOpt(Some(v)) => {
                Self::from_utf8(v).map_err(|_| Error::CouldNotConvert("String"))
            }
            value if value.is_null() => Ok(Self::new()),
            other => Err(Error::CouldNotConvert("String").with_value(&other)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Bytes(v) | Value::BytesOpt(Some(v)) => Ok(v),
            Value::String(v) | Value::StringOpt(Some(v)) => Ok(v.into_bytes()),
            value if value.is_null() => Ok(Self::new()),
            other => Err(Error::CouldNotConvert("Vec<u8>").with_value(&other)),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: Value) -> Result<Self, Error> {
        value
            .clone()
            .into_datetime_opt()
            .ok_or(Error::CouldNotConvert("DateTime").with_value(&value))
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Json(v) => Ok(v),
            Value::String(v) | Value::StringOpt(Some(v)) => Ok(serde_json::from_str(&v)?),
            Value::Bytes(v) | Value::BytesOpt(Some(v)) => Ok(serde_json::from_slice(&v)?),
            value if value.is_null() => Ok(Self::Null),
            other => Err(Error::CouldNotConvert("json").with_value(&other)),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, Error> {
        Ok(value)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, Error> {
        if value.is_null() {
            return Ok(None);
        }
        T::from_value(value).map(Some)
    }
}

impl Error {
    fn with_value(self, value: &Value) -> Self {
        log::trace!("scan: no conversion for {value:?}");
        self
    }
}

/// First column of the first row.
///
/// # Errors
///
/// * [`Error::NoRows`] on an empty result set.
pub fn scan_scalar<T: FromValue>(rows: &[Row]) -> Result<T, Error> {
    let row = rows.first().ok_or(Error::NoRows)?;
    T::from_value(row.first_value())
}

/// First column of every row; an empty result is an empty vector.
///
/// # Errors
///
/// * If a value does not convert into `T`.
pub fn scan_scalars<T: FromValue>(rows: &[Row]) -> Result<Vec<T>, Error> {
    rows.iter()
        .map(|row| T::from_value(row.first_value()))
        .collect()
}

/// First row into a record.
///
/// # Errors
///
/// * [`Error::NoRows`] on an empty result set.
pub fn scan_one<R: Record>(rows: &[Row]) -> Result<R, Error> {
    let row = rows.first().ok_or(Error::NoRows)?;
    scan_record(row)
}

/// Every row into its own record.
///
/// # Errors
///
/// * If a row fails to scan.
pub fn scan_all<R: Record>(rows: &[Row]) -> Result<Vec<R>, Error> {
    rows.iter().map(scan_record).collect()
}

/// Stringify every column of every row. NULL renders as the empty string.
#[must_use]
pub fn scan_matrix(rows: &[Row]) -> Vec<Vec<String>> {
    rows.iter()
        .map(|row| row.columns.iter().map(|(_, v)| render(v)).collect())
        .collect()
}

fn render(value: &Value) -> String {
    match value {
        Value::String(v) | Value::StringOpt(Some(v)) => v.clone(),
        Value::Bool(v) | Value::BoolOpt(Some(v)) => v.to_string(),
        Value::Int(v) | Value::IntOpt(Some(v)) => v.to_string(),
        Value::UInt(v) | Value::UIntOpt(Some(v)) => v.to_string(),
        Value::Real(v) | Value::RealOpt(Some(v)) => v.to_string(),
        Value::DateTime(v) | Value::DateTimeOpt(Some(v)) => crate::value::format_datetime(v),
        Value::Bytes(v) | Value::BytesOpt(Some(v)) => String::from_utf8_lossy(v).into_owned(),
        Value::Json(v) if !v.is_null() => v.to_string(),
        _ => String::new(),
    }
}

/// Scan one row into a fresh record.
///
/// Columns without a matching field descriptor are discarded. `json` fields
/// are parsed before assignment; a parse or conversion failure zeroes the
/// field when `json_ignore_error` is set and surfaces otherwise.
///
/// # Errors
///
/// * On JSON parse failures without `json_ignore_error`
/// * If `Record::set` rejects a value.
pub fn scan_record<R: Record>(row: &Row) -> Result<R, Error> {
    let desc = schema::descriptor::<R>();
    let mut record = R::default();

    for (column, value) in &row.columns {
        let Some(fd) = desc.field(column) else {
            // column not mapped by the record, discard
            continue;
        };

        if fd.json {
            let parsed = match parse_json_column(value) {
                Ok(parsed) => parsed,
                Err(err) if fd.json_ignore_error => {
                    log::debug!("ignoring json parse error on {column}: {err}");
                    Value::Null
                }
                Err(err) => return Err(err),
            };
            match record.set(column, parsed) {
                Err(err) if fd.json_ignore_error => {
                    log::debug!("ignoring json conversion error on {column}: {err}");
                    record.set(column, Value::Null)?;
                }
                result => result?,
            }
            continue;
        }

        record.set(column, value.clone())?;
    }

    Ok(record)
}

fn parse_json_column(value: &Value) -> Result<Value, Error> {
    let text = match value {
        Value::String(v) | Value::StringOpt(Some(v)) if !v.is_empty() => v.clone(),
        Value::Bytes(v) | Value::BytesOpt(Some(v)) if !v.is_empty() => {
            String::from_utf8(v.clone()).map_err(|_| Error::CouldNotConvert("json"))?
        }
        _ => return Ok(Value::Null),
    };
    Ok(Value::Json(serde_json::from_str(&text)?))
}
