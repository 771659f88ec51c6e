//! Record metadata: the column-metadata string ABI, its parsed descriptor
//! form, and the process-wide descriptor cache.

use std::{
    any::TypeId,
    collections::HashMap,
    sync::{Arc, OnceLock, RwLock},
};

use crate::{value::Value, Error};

/// Declared kind of a record field, bucketed the way the scanner and the
/// write paths need to discriminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Int,
    UInt,
    Real,
    Bool,
    DateTime,
    Bytes,
    /// A byte column holding JSON that is stored and returned verbatim,
    /// never parsed.
    JsonRaw,
}

impl FieldKind {
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(self, Self::Int | Self::UInt)
    }
}

/// A record type addressable by column name.
///
/// Implementations list their fields once via [`Record::record_fields`] and
/// move values in and out by column name. The column metadata string on each
/// field is the contract: `"<col>,mod1,mod2,…"` where the first element is
/// the column name (empty falls back to the field name, `-` omits the field)
/// and the modifiers are drawn from `pk`, `omitempty`, `null`, `notnull`,
/// `json`, `json_ignore_error`, `readonly`.
///
/// ```rust,ignore
/// struct User {
///     id: i64,
///     name: String,
///     emails: Vec<String>,
/// }
///
/// impl Record for User {
///     fn record_fields() -> Vec<FieldDef> {
///         vec![
///             FieldDef::new("id", "id,pk,omitempty", FieldKind::Int),
///             FieldDef::new("name", "name", FieldKind::String),
///             FieldDef::new("emails", "emails,json", FieldKind::Bytes),
///         ]
///     }
///
///     fn get(&self, column: &str) -> Value { /* match on column */ }
///     fn set(&mut self, column: &str, value: Value) -> Result<(), Error> { /* … */ }
/// }
/// ```
pub trait Record: Default + Send + Sync + 'static {
    /// Static field metadata, parsed once per type and cached.
    fn record_fields() -> Vec<FieldDef>;

    /// Read the field mapped to `column`. Unknown columns return
    /// [`Value::Null`].
    fn get(&self, column: &str) -> Value;

    /// Write a scanned value into the field mapped to `column`. Unknown
    /// columns are ignored.
    ///
    /// # Errors
    ///
    /// * If a `json` document does not deserialize into the field's type.
    fn set(&mut self, column: &str, value: Value) -> Result<(), Error>;
}

/// One entry of [`Record::record_fields`]: either a column-bearing field or
/// a flattened anonymous sub-record.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub(crate) name: &'static str,
    pub(crate) meta: &'static str,
    pub(crate) kind: FieldKind,
    pub(crate) optional: bool,
    pub(crate) flatten: Option<fn() -> Vec<FieldDef>>,
}

impl FieldDef {
    #[must_use]
    pub const fn new(name: &'static str, meta: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            meta,
            kind,
            optional: false,
            flatten: None,
        }
    }

    /// Mark the field as nullable (an `Option` in the record type).
    #[must_use]
    pub const fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Splice an anonymous sub-record's columns into this type's
    /// descriptor. The sub-record's columns become first-class columns of
    /// the outer type; `get`/`set` are expected to delegate.
    #[must_use]
    pub fn flatten<R: Record>() -> Self {
        Self {
            name: "",
            meta: "",
            kind: FieldKind::Bytes,
            optional: false,
            flatten: Some(R::record_fields),
        }
    }
}

/// Parsed metadata for a single column-bearing field.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// Record field name, for diagnostics.
    pub field: &'static str,
    /// Column name addressed in SQL.
    pub column: String,
    pub kind: FieldKind,
    pub optional: bool,
    pub primary_key: bool,
    pub omit_empty: bool,
    pub null: bool,
    pub not_null: bool,
    pub json: bool,
    pub json_ignore_error: bool,
    pub read_only: bool,
    /// Literal substituted in bulk statements when a row omitted this
    /// column and NULL is not admissible.
    pub empty_literal: &'static str,
}

impl FieldDescriptor {
    /// Whether NULL may be written for this field's zero value.
    #[must_use]
    pub const fn allow_null(&self) -> bool {
        if self.optional {
            !self.not_null
        } else {
            self.null
        }
    }
}

/// Ordered column metadata for a record type.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub fields: Vec<FieldDescriptor>,
}

impl Descriptor {
    #[must_use]
    pub fn field(&self, column: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|fd| fd.column == column)
    }

    /// The single `pk` field, or `None` when the type declares zero or
    /// several.
    #[must_use]
    pub fn only_primary_key(&self) -> Option<&FieldDescriptor> {
        let mut found = None;
        for fd in self.fields.iter().filter(|fd| fd.primary_key) {
            if found.is_some() {
                return None;
            }
            found = Some(fd);
        }
        found
    }
}

pub(crate) fn parse_fields(defs: &[FieldDef]) -> Descriptor {
    let mut fields = Vec::with_capacity(defs.len());
    collect_fields(defs, &mut fields);
    Descriptor { fields }
}

fn collect_fields(defs: &[FieldDef], fields: &mut Vec<FieldDescriptor>) {
    for def in defs {
        if let Some(sub_fields) = def.flatten {
            collect_fields(&sub_fields(), fields);
            continue;
        }
        if let Some(fd) = parse_field(def) {
            fields.push(fd);
        }
    }
}

fn parse_field(def: &FieldDef) -> Option<FieldDescriptor> {
    let mut parts = def.meta.split(',');
    let column = parts.next().unwrap_or_default();
    if column == "-" {
        return None;
    }

    let mut fd = FieldDescriptor {
        field: def.name,
        column: if column.is_empty() {
            def.name.to_string()
        } else {
            column.to_string()
        },
        kind: def.kind,
        optional: def.optional,
        primary_key: false,
        omit_empty: false,
        null: false,
        not_null: false,
        json: false,
        json_ignore_error: false,
        read_only: false,
        empty_literal: match (def.optional, def.kind) {
            (true, _) => "null",
            (false, FieldKind::String) => "''",
            (false, FieldKind::Int | FieldKind::UInt) => "0",
            (false, _) => "''",
        },
    };

    for modifier in parts {
        match modifier {
            "pk" => fd.primary_key = true,
            "omitempty" => fd.omit_empty = true,
            "null" => fd.null = true,
            "notnull" => fd.not_null = true,
            "json" => fd.json = true,
            "json_ignore_error" => {
                fd.json = true;
                fd.json_ignore_error = true;
            }
            "readonly" => fd.read_only = true,
            _ => {} // ignore unrecognized
        }
    }

    if fd.allow_null() && fd.empty_literal == "null" {
        fd.empty_literal = "''";
    }

    Some(fd)
}

fn cache() -> &'static RwLock<HashMap<TypeId, Arc<Descriptor>>> {
    static CACHE: OnceLock<RwLock<HashMap<TypeId, Arc<Descriptor>>>> = OnceLock::new();
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Descriptor for `R`, parsed on first use and shared afterwards.
pub fn descriptor<R: Record>() -> Arc<Descriptor> {
    let key = TypeId::of::<R>();
    if let Some(found) = cache().read().expect("descriptor cache poisoned").get(&key) {
        return Arc::clone(found);
    }

    let parsed = Arc::new(parse_fields(&R::record_fields()));
    let mut write = cache().write().expect("descriptor cache poisoned");
    Arc::clone(write.entry(key).or_insert(parsed))
}
