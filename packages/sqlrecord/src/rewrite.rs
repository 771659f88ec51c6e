//! Statement rewriting: placeholder dialects, identifier markers, and slice
//! expansion.

use crate::{
    value::{quote_ident, quote_literal, Value},
    Config, Error, PlaceholderMode,
};

/// One positional argument of a rewritten statement.
#[derive(Debug, Clone)]
pub enum Arg {
    Value(Value),
    /// Expanded into a parenthesized list at its placeholder.
    List(Vec<Value>),
}

impl Arg {
    const fn kind_name(&self) -> &'static str {
        match self {
            Self::Value(value) => value.kind_name(),
            Self::List(_) => "list",
        }
    }
}

impl From<Value> for Arg {
    fn from(val: Value) -> Self {
        Self::Value(val)
    }
}

macro_rules! arg_from {
    ($($t:ty),+ $(,)?) => {
        $(
            impl From<$t> for Arg {
                fn from(val: $t) -> Self {
                    Self::Value(val.into())
                }
            }

            impl From<Option<$t>> for Arg {
                fn from(val: Option<$t>) -> Self {
                    Self::Value(val.into())
                }
            }
        )+
    };
}

arg_from!(
    bool,
    &str,
    String,
    f32,
    f64,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    chrono::DateTime<chrono::Utc>,
);

impl<T: Into<Value>> From<Vec<T>> for Arg {
    fn from(val: Vec<T>) -> Self {
        Self::List(val.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value> + Clone> From<&[T]> for Arg {
    fn from(val: &[T]) -> Self {
        Self::List(val.iter().cloned().map(Into::into).collect())
    }
}

/// Build an argument list for the query and exec methods.
///
/// ```rust,ignore
/// db.query_all::<User>("SELECT * FROM @ WHERE id IN ?", &args!["user", vec![1_i64, 2]]).await?;
/// ```
#[macro_export]
macro_rules! args {
    () => {
        ::std::vec::Vec::<$crate::Arg>::new()
    };
    ($($arg:expr),+ $(,)?) => {
        ::std::vec![$($crate::Arg::from($arg)),+]
    };
}

/// Rewrite `sql` for the configured placeholder dialect, consuming `args`.
///
/// Single- and double-quoted spans are copied verbatim (a doubled quote is a
/// literal quote inside its span); placeholder runes inside them are inert.
/// Outside quoted spans, the value rune consumes one argument and the key
/// rune consumes one string argument which is inlined as a quoted
/// identifier. Slice arguments expand to a parenthesized placeholder list,
/// or to inlined literals once they exceed `max_placeholder` elements.
/// Arguments beyond the last placeholder are appended to the output list
/// unchanged.
///
/// # Errors
///
/// * [`Error::MissingArgument`] when placeholders outnumber arguments
/// * [`Error::EmptySlice`] for an empty slice argument
/// * [`Error::UnsupportedLiteral`] for a slice element that cannot be
///   inlined as a literal
/// * [`Error::IdentifierArgument`] for a non-string identifier argument
pub fn replace_args(cfg: &Config, sql: &str, args: &[Arg]) -> Result<(String, Vec<Value>), Error> {
    let runes: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut new_args: Vec<Value> = Vec::with_capacity(args.len());
    let mut nth_arg = 0_usize;

    let mut i = 0_usize;
    while i < runes.len() {
        let curr = runes[i];

        if curr == '\'' || curr == '"' {
            i = copy_quoted_span(&runes, i, &mut out);
            continue;
        }

        if curr != cfg.placeholder_value && curr != cfg.placeholder_key {
            out.push(curr);
            i += 1;
            continue;
        }

        let Some(arg) = args.get(nth_arg) else {
            return Err(Error::MissingArgument {
                index: nth_arg + 1,
                supplied: args.len(),
            });
        };
        nth_arg += 1;
        i += 1;

        if curr == cfg.placeholder_key {
            match arg {
                Arg::Value(Value::String(name) | Value::StringOpt(Some(name))) => {
                    out.push_str(&quote_ident(name));
                }
                other => {
                    return Err(Error::IdentifierArgument {
                        index: nth_arg,
                        kind: other.kind_name(),
                    })
                }
            }
            continue;
        }

        match arg {
            Arg::Value(value) => {
                new_args.push(value.clone());
                push_placeholder(cfg, &mut out, new_args.len());
            }
            Arg::List(items) => {
                if items.is_empty() {
                    return Err(Error::EmptySlice);
                }
                out.push('(');
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        out.push(',');
                    }
                    if items.len() > cfg.max_placeholder {
                        out.push_str(&inline_literal(item)?);
                    } else {
                        new_args.push(item.clone());
                        push_placeholder(cfg, &mut out, new_args.len());
                    }
                }
                out.push(')');
            }
        }
    }

    // append left over args
    for arg in &args[nth_arg.min(args.len())..] {
        match arg {
            Arg::Value(value) => new_args.push(value.clone()),
            Arg::List(items) => new_args.extend(items.iter().cloned()),
        }
    }

    Ok((out, new_args))
}

/// Copy a quoted span starting at `start` into `out`, returning the index
/// past its closing quote. A doubled quote stays inside the span; an
/// unterminated span runs to the end of the input.
fn copy_quoted_span(runes: &[char], start: usize, out: &mut String) -> usize {
    let quote = runes[start];
    out.push(quote);
    let mut i = start + 1;
    while i < runes.len() {
        let curr = runes[i];
        out.push(curr);
        if curr == quote {
            if runes.get(i + 1) == Some(&quote) {
                out.push(quote);
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    i
}

fn push_placeholder(cfg: &Config, out: &mut String, num_arg: usize) {
    match cfg.placeholder_mode {
        PlaceholderMode::Question => out.push('?'),
        PlaceholderMode::Dollar => {
            out.push('$');
            out.push_str(&num_arg.to_string());
        }
    }
}

fn inline_literal(value: &Value) -> Result<String, Error> {
    match value {
        Value::Int(v) | Value::IntOpt(Some(v)) => Ok(v.to_string()),
        Value::UInt(v) | Value::UIntOpt(Some(v)) => Ok(v.to_string()),
        Value::String(v) | Value::StringOpt(Some(v)) => Ok(quote_literal(v)),
        value if value.is_null() => Ok("null".to_string()),
        other => Err(Error::UnsupportedLiteral {
            kind: other.kind_name(),
        }),
    }
}
