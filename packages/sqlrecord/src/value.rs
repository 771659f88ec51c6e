//! Tagged values exchanged between records, the rewriter, and the drivers,
//! plus the literal encoder used by the bulk write paths.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::schema::FieldDescriptor;

/// A single column value in driver-neutral form.
///
/// The `*Opt` variants model nullable record fields: `StringOpt(None)` is a
/// NULL that remembers it wanted to be a string, which matters when a result
/// column is projected back into a typed destination.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    String(String),
    StringOpt(Option<String>),
    Bool(bool),
    BoolOpt(Option<bool>),
    Int(i64),
    IntOpt(Option<i64>),
    UInt(u64),
    UIntOpt(Option<u64>),
    Real(f64),
    RealOpt(Option<f64>),
    DateTime(DateTime<Utc>),
    DateTimeOpt(Option<DateTime<Utc>>),
    Bytes(Vec<u8>),
    BytesOpt(Option<Vec<u8>>),
    /// A parsed JSON document, produced and consumed by `json`-flagged
    /// record fields.
    Json(serde_json::Value),
}

impl Value {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(
            self,
            Self::Null
                | Self::StringOpt(None)
                | Self::BoolOpt(None)
                | Self::IntOpt(None)
                | Self::UIntOpt(None)
                | Self::RealOpt(None)
                | Self::DateTimeOpt(None)
                | Self::BytesOpt(None)
                | Self::Json(serde_json::Value::Null)
        )
    }

    /// Whether the value equals the zero value of its declared kind. Used by
    /// `omitempty` and the NULL normalizer. Datetimes have no zero; absence
    /// is modeled with `DateTimeOpt(None)`.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        match self {
            Self::String(value) | Self::StringOpt(Some(value)) => value.is_empty(),
            Self::Bool(value) | Self::BoolOpt(Some(value)) => !value,
            Self::Int(value) | Self::IntOpt(Some(value)) => *value == 0,
            Self::UInt(value) | Self::UIntOpt(Some(value)) => *value == 0,
            Self::Real(value) | Self::RealOpt(Some(value)) => *value == 0.0,
            Self::Bytes(value) | Self::BytesOpt(Some(value)) => value.is_empty(),
            Self::DateTime(_) | Self::DateTimeOpt(Some(_)) => false,
            _ => self.is_null(),
        }
    }

    /// Short kind tag for diagnostics.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::String(_) | Self::StringOpt(_) => "string",
            Self::Bool(_) | Self::BoolOpt(_) => "bool",
            Self::Int(_) | Self::IntOpt(_) => "int",
            Self::UInt(_) | Self::UIntOpt(_) => "uint",
            Self::Real(_) | Self::RealOpt(_) => "real",
            Self::DateTime(_) | Self::DateTimeOpt(_) => "datetime",
            Self::Bytes(_) | Self::BytesOpt(_) => "bytes",
            Self::Json(_) => "json",
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) | Self::StringOpt(Some(value)) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) | Self::IntOpt(Some(value)) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Real(value) | Self::RealOpt(Some(value)) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) | Self::BoolOpt(Some(value)) => Some(*value),
            _ => None,
        }
    }

    // Lossy projections for `Record::set` implementations: integer widths
    // cross with two's-complement truncation, NULL and foreign kinds become
    // the destination's zero.

    #[must_use]
    pub fn into_string(self) -> String {
        self.into_string_opt().unwrap_or_default()
    }

    #[must_use]
    pub fn into_string_opt(self) -> Option<String> {
        match self {
            Self::String(value) | Self::StringOpt(Some(value)) => Some(value),
            Self::Bytes(value) | Self::BytesOpt(Some(value)) => {
                String::from_utf8(value).ok()
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn into_i64(self) -> i64 {
        self.into_i64_opt().unwrap_or_default()
    }

    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn into_i64_opt(self) -> Option<i64> {
        match self {
            Self::Int(value) | Self::IntOpt(Some(value)) => Some(value),
            Self::UInt(value) | Self::UIntOpt(Some(value)) => Some(value as i64),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_u64(self) -> u64 {
        self.into_u64_opt().unwrap_or_default()
    }

    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn into_u64_opt(self) -> Option<u64> {
        match self {
            Self::UInt(value) | Self::UIntOpt(Some(value)) => Some(value),
            Self::Int(value) | Self::IntOpt(Some(value)) => Some(value as u64),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_f64(self) -> f64 {
        self.into_f64_opt().unwrap_or_default()
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn into_f64_opt(self) -> Option<f64> {
        match self {
            Self::Real(value) | Self::RealOpt(Some(value)) => Some(value),
            Self::Int(value) | Self::IntOpt(Some(value)) => Some(value as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_bool(self) -> bool {
        self.into_bool_opt().unwrap_or_default()
    }

    #[must_use]
    pub fn into_bool_opt(self) -> Option<bool> {
        match self {
            Self::Bool(value) | Self::BoolOpt(Some(value)) => Some(value),
            Self::Int(value) | Self::IntOpt(Some(value)) => Some(value != 0),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_datetime_opt(self) -> Option<DateTime<Utc>> {
        match self {
            Self::DateTime(value) | Self::DateTimeOpt(Some(value)) => Some(value),
            Self::String(value) | Self::StringOpt(Some(value)) => {
                DateTime::parse_from_rfc3339(&value)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.into_bytes_opt().unwrap_or_default()
    }

    #[must_use]
    pub fn into_bytes_opt(self) -> Option<Vec<u8>> {
        match self {
            Self::Bytes(value) | Self::BytesOpt(Some(value)) => Some(value),
            Self::String(value) | Self::StringOpt(Some(value)) => Some(value.into_bytes()),
            _ => None,
        }
    }

    /// Deserialize a `json`-flagged field's scanned document into its typed
    /// form. NULL yields the type's default.
    ///
    /// # Errors
    ///
    /// * If the document does not match the destination type.
    pub fn into_json<T: serde::de::DeserializeOwned + Default>(self) -> Result<T, crate::Error> {
        match self {
            Self::Json(value) if !value.is_null() => Ok(serde_json::from_value(value)?),
            _ => Ok(T::default()),
        }
    }

    /// As [`Value::into_json`] for optional fields; NULL yields `None`.
    ///
    /// # Errors
    ///
    /// * If the document does not match the destination type.
    pub fn into_json_opt<T: serde::de::DeserializeOwned>(
        self,
    ) -> Result<Option<T>, crate::Error> {
        match self {
            Self::Json(value) if !value.is_null() => Ok(Some(serde_json::from_value(value)?)),
            _ => Ok(None),
        }
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(val: Option<T>) -> Self {
        val.map_or(Self::Null, Into::into)
    }
}

impl From<bool> for Value {
    fn from(val: bool) -> Self {
        Self::Bool(val)
    }
}

impl From<&str> for Value {
    fn from(val: &str) -> Self {
        Self::String(val.to_string())
    }
}

impl From<String> for Value {
    fn from(val: String) -> Self {
        Self::String(val)
    }
}

impl From<f32> for Value {
    fn from(val: f32) -> Self {
        Self::Real(f64::from(val))
    }
}

impl From<f64> for Value {
    fn from(val: f64) -> Self {
        Self::Real(val)
    }
}

impl From<i8> for Value {
    fn from(val: i8) -> Self {
        Self::Int(i64::from(val))
    }
}

impl From<i16> for Value {
    fn from(val: i16) -> Self {
        Self::Int(i64::from(val))
    }
}

impl From<i32> for Value {
    fn from(val: i32) -> Self {
        Self::Int(i64::from(val))
    }
}

impl From<i64> for Value {
    fn from(val: i64) -> Self {
        Self::Int(val)
    }
}

impl From<u8> for Value {
    fn from(val: u8) -> Self {
        Self::UInt(u64::from(val))
    }
}

impl From<u16> for Value {
    fn from(val: u16) -> Self {
        Self::UInt(u64::from(val))
    }
}

impl From<u32> for Value {
    fn from(val: u32) -> Self {
        Self::UInt(u64::from(val))
    }
}

impl From<u64> for Value {
    fn from(val: u64) -> Self {
        Self::UInt(val)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(val: DateTime<Utc>) -> Self {
        Self::DateTime(val)
    }
}

impl From<Vec<u8>> for Value {
    fn from(val: Vec<u8>) -> Self {
        Self::Bytes(val)
    }
}

impl From<serde_json::Value> for Value {
    fn from(val: serde_json::Value) -> Self {
        Self::Json(val)
    }
}

/// Quote an identifier with double quotes, doubling embedded quotes.
#[must_use]
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a string literal with single quotes, doubling embedded quotes.
#[must_use]
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// RFC 3339 rendering used for datetime binds and literals, nanoseconds
/// included when present.
#[must_use]
pub fn format_datetime(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Normalize a record field value for `INSERT`/`UPDATE`: a zero value
/// becomes NULL when the field admits it.
///
/// # Panics
///
/// * If the field is an empty optional marked `notnull`; there is no value
///   to write and no literal zero to substitute, so this is a programming
///   error in the record definition.
#[must_use]
pub fn null_value(value: Value, field: &FieldDescriptor) -> Value {
    if value.is_zero() {
        if field.allow_null() {
            return Value::Null;
        }
        assert!(
            !(field.optional && value.is_null()),
            "unable to store empty value in \"notnull\" field: {}",
            field.field,
        );
    }
    value
}

/// Render a value as a SQL literal for the bulk write paths.
#[must_use]
pub fn literal(value: &Value) -> String {
    match value {
        Value::String(v) | Value::StringOpt(Some(v)) => quote_literal(v),
        Value::Bool(v) | Value::BoolOpt(Some(v)) => {
            if *v {
                "TRUE".to_string()
            } else {
                "FALSE".to_string()
            }
        }
        Value::Int(v) | Value::IntOpt(Some(v)) => v.to_string(),
        Value::UInt(v) | Value::UIntOpt(Some(v)) => v.to_string(),
        Value::Real(v) | Value::RealOpt(Some(v)) => v.to_string(),
        Value::DateTime(v) | Value::DateTimeOpt(Some(v)) => quote_literal(&format_datetime(v)),
        Value::Bytes(v) | Value::BytesOpt(Some(v)) => {
            quote_literal(&String::from_utf8_lossy(v))
        }
        Value::Json(v) if !v.is_null() => quote_literal(&v.to_string()),
        _ => "NULL".to_string(),
    }
}
