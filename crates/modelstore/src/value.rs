use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Dynamic value held by a record for one key.
///
/// Dates serialize as RFC 3339 strings and blobs as byte arrays, which keeps
/// [`crate::Record::to_json`] output JSON friendly.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(DateTime<Utc>),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view of the value. Bools become 0/1, floats truncate,
    /// dates become epoch milliseconds.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            Value::Float(f) => Some(*f as i64),
            Value::Date(d) => Some(d.timestamp_millis()),
            Value::String(s) => s.trim().parse().ok(),
            Value::Null | Value::Blob(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Truthiness used for bool columns and bitfield flags.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            Value::Float(f) => Some(*f != 0.0),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => Some(true),
                "0" | "false" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Date(d) => Some(*d),
            Value::Int(ms) => Utc.timestamp_millis_opt(*ms).single(),
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|d| d.with_timezone(&Utc)),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }

    /// Human-readable name for a Value variant.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Blob(_) => "blob",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Date(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Declared logical type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Int32,
    Int64,
    Bool,
    Float32,
    Float64,
    String,
    Date,
    Blob,
    /// Blob whose result buffer is borrowed rather than copied by the engine.
    /// Identical to `Blob` on the query path.
    BlobNoCopy,
}

impl ColumnType {
    /// SQLite storage affinity used in `CREATE TABLE` / `ADD COLUMN`.
    ///
    /// Dates are stored as epoch milliseconds, hence `INTEGER`.
    pub fn affinity(self) -> &'static str {
        match self {
            ColumnType::Int32 | ColumnType::Int64 | ColumnType::Bool | ColumnType::Date => {
                "INTEGER"
            }
            ColumnType::Float32 | ColumnType::Float64 => "REAL",
            ColumnType::String => "TEXT",
            ColumnType::Blob | ColumnType::BlobNoCopy => "BLOB",
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, ColumnType::Int32 | ColumnType::Int64)
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ColumnType::Int32
                | ColumnType::Int64
                | ColumnType::Bool
                | ColumnType::Float32
                | ColumnType::Float64
        )
    }

    pub fn is_blob(self) -> bool {
        matches!(self, ColumnType::Blob | ColumnType::BlobNoCopy)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Int32 => "int",
            ColumnType::Int64 => "long long",
            ColumnType::Bool => "bool",
            ColumnType::Float32 => "float",
            ColumnType::Float64 => "double",
            ColumnType::String => "string",
            ColumnType::Date => "date",
            ColumnType::Blob => "data",
            ColumnType::BlobNoCopy => "data nocopy",
        };
        f.write_str(name)
    }
}

/// Error for unrecognised declared type strings.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("unknown column type: '{0}'")]
pub struct UnknownColumnType(pub String);

impl FromStr for ColumnType {
    type Err = UnknownColumnType;

    /// Accepts the classic declaration strings: `int`, `long`, `long long`,
    /// `bool`, `float`, `double`, `string`, `date`, `data`, `data nocopy`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.to_ascii_lowercase().as_str() {
            "int" | "int32" | "integer" => Ok(ColumnType::Int32),
            "long" | "long long" | "int64" => Ok(ColumnType::Int64),
            "bool" | "boolean" => Ok(ColumnType::Bool),
            "float" | "float32" => Ok(ColumnType::Float32),
            "double" | "float64" => Ok(ColumnType::Float64),
            "string" | "text" => Ok(ColumnType::String),
            "date" => Ok(ColumnType::Date),
            "data" | "blob" => Ok(ColumnType::Blob),
            "data nocopy" | "blob nocopy" => Ok(ColumnType::BlobNoCopy),
            _ => Err(UnknownColumnType(s.to_string())),
        }
    }
}

/// Default quote character for [`smart_quote_value`].
pub const DEFAULT_QUOTE: char = '"';

/// Render `value` as a SQL literal for a column of `column_type`.
///
/// Returns `None` when the value may only travel as a bound parameter
/// (blob columns and blob values). Strings are wrapped in `quote` with
/// embedded quote characters doubled; numeric types are unquoted and bools
/// render as `0`/`1`; dates render as epoch milliseconds. Null renders as
/// `NULL` for every type.
pub fn smart_quote(quote: char, value: &Value, column_type: ColumnType) -> Option<String> {
    if matches!(value, Value::Blob(_)) {
        return None;
    }
    if value.is_null() && !column_type.is_blob() {
        return Some("NULL".to_string());
    }

    let literal = match column_type {
        ColumnType::Bool => match value.as_bool() {
            Some(b) => (if b { "1" } else { "0" }).to_string(),
            None => quote_text(quote, &render_text(value)),
        },
        ColumnType::Int32 | ColumnType::Int64 => match value {
            Value::Float(f) => render_float(*f),
            Value::String(s) => numeric_or_quoted(quote, s),
            other => match other.as_i64() {
                Some(i) => i.to_string(),
                None => quote_text(quote, &render_text(other)),
            },
        },
        ColumnType::Float32 | ColumnType::Float64 => match value {
            Value::String(s) => numeric_or_quoted(quote, s),
            other => match other.as_f64() {
                // Float32 columns hold the narrowed value
                Some(f) if column_type == ColumnType::Float32 => render_float(f as f32 as f64),
                Some(f) => render_float(f),
                None => match other.as_i64() {
                    Some(i) => i.to_string(),
                    None => quote_text(quote, &render_text(other)),
                },
            },
        },
        ColumnType::Date => match value.as_date() {
            Some(d) => d.timestamp_millis().to_string(),
            None => match value {
                Value::Float(f) => (*f as i64).to_string(),
                other => quote_text(quote, &render_text(other)),
            },
        },
        ColumnType::String => quote_text(quote, &render_text(value)),
        ColumnType::Blob | ColumnType::BlobNoCopy => return None,
    };
    Some(literal)
}

/// [`smart_quote`] with the default double-quote character.
pub fn smart_quote_value(value: &Value, column_type: ColumnType) -> Option<String> {
    smart_quote(DEFAULT_QUOTE, value, column_type)
}

fn quote_text(quote: char, text: &str) -> String {
    let doubled: String = [quote, quote].iter().collect();
    format!(
        "{q}{}{q}",
        text.replace(quote, &doubled),
        q = quote
    )
}

fn numeric_or_quoted(quote: char, s: &str) -> String {
    let trimmed = s.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return i.to_string();
    }
    match trimmed.parse::<f64>() {
        Ok(f) if f.is_finite() => render_float(f),
        _ => quote_text(quote, s),
    }
}

fn render_float(f: f64) -> String {
    if f.is_nan() {
        "NULL".to_string()
    } else if f.is_infinite() {
        // SQLite reads out-of-range literals as +/-Inf
        let literal = if f > 0.0 { "9e999" } else { "-9e999" };
        literal.to_string()
    } else {
        f.to_string()
    }
}

fn render_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => (if *b { "1" } else { "0" }).to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::String(s) => s.clone(),
        Value::Date(d) => d.to_rfc3339(),
        Value::Blob(b) => String::from_utf8_lossy(b).into_owned(),
    }
}
