//! Conversion between [`Value`] and SQLite storage values
//!
//! Writes coerce a record value toward the column's declared type; reads
//! interpret the stored value by the declared type. Dates are stored as
//! epoch milliseconds.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Value as SqlValue;

use crate::value::{ColumnType, Value};

/// Storage value for `value` in a column of `column_type`.
pub fn value_to_sql(value: &Value, column_type: ColumnType) -> SqlValue {
    if value.is_null() {
        return SqlValue::Null;
    }
    if let Value::Blob(bytes) = value {
        return SqlValue::Blob(bytes.clone());
    }

    let coerced = match column_type {
        ColumnType::Int32 | ColumnType::Int64 => value.as_i64().map(SqlValue::Integer),
        ColumnType::Bool => value.as_bool().map(|b| SqlValue::Integer(b as i64)),
        ColumnType::Float32 => value.as_f64().map(|f| SqlValue::Real(f as f32 as f64)),
        ColumnType::Float64 => value.as_f64().map(SqlValue::Real),
        ColumnType::Date => match value {
            Value::Float(f) => Some(SqlValue::Integer(*f as i64)),
            other => other.as_date().map(|d| SqlValue::Integer(d.timestamp_millis())),
        },
        ColumnType::String => Some(SqlValue::Text(text_of(value))),
        ColumnType::Blob | ColumnType::BlobNoCopy => match value {
            Value::String(s) => Some(SqlValue::Blob(s.as_bytes().to_vec())),
            _ => None,
        },
    };
    coerced.unwrap_or_else(|| natural(value))
}

/// Storage value for `value` when the column type is unknown.
pub fn natural(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Date(d) => SqlValue::Integer(d.timestamp_millis()),
        Value::Blob(b) => SqlValue::Blob(b.clone()),
    }
}

/// Record value for a stored `raw` read from a column of `column_type`.
pub fn sql_to_value(raw: SqlValue, column_type: ColumnType) -> Value {
    match (column_type, raw) {
        (_, SqlValue::Null) => Value::Null,

        (ColumnType::Int32 | ColumnType::Int64, SqlValue::Real(f)) => Value::Int(f as i64),
        (ColumnType::Int32 | ColumnType::Int64, SqlValue::Text(s)) => match s.trim().parse() {
            Ok(i) => Value::Int(i),
            Err(_) => Value::String(s),
        },

        (ColumnType::Bool, SqlValue::Integer(i)) => Value::Bool(i != 0),
        (ColumnType::Bool, SqlValue::Real(f)) => Value::Bool(f != 0.0),
        (ColumnType::Bool, SqlValue::Text(s)) => match Value::String(s.clone()).as_bool() {
            Some(b) => Value::Bool(b),
            None => Value::String(s),
        },

        (ColumnType::Float32, SqlValue::Real(f)) => Value::Float(f as f32 as f64),
        (ColumnType::Float32, SqlValue::Integer(i)) => Value::Float(i as f32 as f64),
        (ColumnType::Float64, SqlValue::Integer(i)) => Value::Float(i as f64),

        (ColumnType::String, SqlValue::Integer(i)) => Value::String(i.to_string()),
        (ColumnType::String, SqlValue::Real(f)) => Value::String(f.to_string()),
        (ColumnType::String, SqlValue::Blob(b)) => match String::from_utf8(b) {
            Ok(s) => Value::String(s),
            Err(e) => Value::Blob(e.into_bytes()),
        },

        (ColumnType::Date, SqlValue::Integer(ms)) => date_from_millis(ms),
        (ColumnType::Date, SqlValue::Real(ms)) => date_from_millis(ms as i64),
        (ColumnType::Date, SqlValue::Text(s)) => match DateTime::parse_from_rfc3339(&s) {
            Ok(d) => Value::Date(d.with_timezone(&Utc)),
            Err(_) => Value::String(s),
        },

        (ColumnType::Blob | ColumnType::BlobNoCopy, SqlValue::Text(s)) => {
            Value::Blob(s.into_bytes())
        }

        (_, other) => from_sql_natural(other),
    }
}

/// Record value for a stored `raw` when the column type is unknown.
pub fn from_sql_natural(raw: SqlValue) -> Value {
    match raw {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::Int(i),
        SqlValue::Real(f) => Value::Float(f),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(b) => Value::Blob(b),
    }
}

fn date_from_millis(ms: i64) -> Value {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(d) => Value::Date(d),
        None => Value::Int(ms),
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => (if *b { "1" } else { "0" }).to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Date(d) => d.to_rfc3339(),
        Value::Null => String::new(),
        Value::Blob(b) => String::from_utf8_lossy(b).into_owned(),
    }
}
