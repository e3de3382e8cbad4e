use std::collections::BTreeMap;

use rusqlite::types::Value as SqlValue;

use crate::criteria::Criteria;
use crate::error::{PersistError, Result};
use crate::metadata::{ColumnDef, EntityMetadata};
use crate::sql_value::{natural, value_to_sql};
use crate::value::{smart_quote, ColumnType, Value};

/// Statement text plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledStatement {
    pub text: String,
    pub params: Vec<SqlValue>,
}

impl CompiledStatement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Vec::new(),
        }
    }
}

/// WHERE and ORDER BY fragments of a fetch. Either may be empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledQuery {
    pub where_clause: String,
    pub params: Vec<SqlValue>,
    pub order_clause: String,
}

impl CompiledQuery {
    pub fn with_sort(mut self, sort: Option<&str>) -> Self {
        self.order_clause = order_clause(sort);
        self
    }
}

/// Translate criteria into a WHERE clause with type-aware literals.
///
/// Null values become `IS NULL` / `IS NOT NULL`; blob values are bound as
/// parameters. Bitfield virtual keys are rejected.
pub fn compile_criteria(
    meta: &EntityMetadata,
    criteria: &Criteria,
    quote: char,
) -> Result<CompiledQuery> {
    let mut params = Vec::new();
    let mut conditions = Vec::new();

    for criterion in criteria.iter() {
        if meta.is_bitfield_key(&criterion.key) {
            return Err(PersistError::BitfieldCriterion {
                entity: meta.type_name().to_string(),
                key: criterion.key.clone(),
            });
        }
        let column = meta.column_name_for_key(&criterion.key);
        let column_type = meta
            .column_type(&column)
            .unwrap_or_else(|| inferred_type(&criterion.value));

        let condition = if criterion.value.is_null() {
            let test = if criterion.negated { "IS NOT NULL" } else { "IS NULL" };
            format!("{} {}", column, test)
        } else {
            let op = if criterion.negated { "<>" } else { "=" };
            match smart_quote(quote, &criterion.value, column_type) {
                Some(literal) => format!("{} {} {}", column, op, literal),
                None => {
                    params.push(value_to_sql(&criterion.value, column_type));
                    format!("{} {} ?", column, op)
                }
            }
        };
        conditions.push(condition);
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    Ok(CompiledQuery {
        where_clause,
        params,
        order_clause: String::new(),
    })
}

/// Wrap a caller-supplied condition. A leading `WHERE` is accepted.
pub fn compile_where(where_clause: &str, sort: Option<&str>) -> CompiledQuery {
    let trimmed = where_clause.trim();
    let body = strip_keyword(trimmed, "where").unwrap_or(trimmed);
    CompiledQuery {
        where_clause: if body.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", body)
        },
        params: Vec::new(),
        order_clause: order_clause(sort),
    }
}

fn order_clause(sort: Option<&str>) -> String {
    let sort = sort.map(str::trim).unwrap_or_default();
    let body = strip_keyword(sort, "order")
        .and_then(|rest| strip_keyword(rest, "by"))
        .unwrap_or(sort);
    if body.is_empty() {
        String::new()
    } else {
        format!("ORDER BY {}", body)
    }
}

/// `text` after a leading case-insensitive `keyword` and the whitespace
/// that must follow it.
fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let head = text.get(..keyword.len())?;
    let rest = text.get(keyword.len()..)?;
    (head.eq_ignore_ascii_case(keyword) && rest.starts_with(char::is_whitespace))
        .then_some(rest.trim_start())
}

/// `SELECT <cols> FROM <table> [WHERE ...] [ORDER BY ...]`
pub fn select_statement(meta: &EntityMetadata, query: &CompiledQuery) -> CompiledStatement {
    let mut text = meta.base_query();
    for part in [&query.where_clause, &query.order_clause] {
        if !part.is_empty() {
            text.push(' ');
            text.push_str(part);
        }
    }
    CompiledStatement {
        text,
        params: query.params.clone(),
    }
}

pub fn select_by_id(meta: &EntityMetadata, id: &Value) -> CompiledStatement {
    CompiledStatement {
        text: format!(
            "{} WHERE {} = ?",
            meta.base_query(),
            meta.primary_key_column()
        ),
        params: vec![value_to_sql(id, meta.primary_key_type())],
    }
}

pub fn select_by_rowid(meta: &EntityMetadata, rowid: i64) -> CompiledStatement {
    CompiledStatement {
        text: format!("{} WHERE rowid = ?", meta.base_query()),
        params: vec![SqlValue::Integer(rowid)],
    }
}

/// Select one (possibly excluded) column of the row with `id`.
pub fn select_column_by_id(meta: &EntityMetadata, column: &str, id: &Value) -> CompiledStatement {
    CompiledStatement {
        text: format!(
            "SELECT {} FROM {} WHERE {} = ?",
            column,
            meta.table_name(),
            meta.primary_key_column()
        ),
        params: vec![value_to_sql(id, meta.primary_key_type())],
    }
}

/// INSERT for the declared, non-excluded columns present in `values`, in
/// declaration order. An auto-generated primary key is always left to the
/// engine.
pub fn insert_statement(meta: &EntityMetadata, values: &BTreeMap<String, Value>) -> CompiledStatement {
    let mut columns = Vec::new();
    let mut params = Vec::new();

    for def in meta.columns() {
        if meta.is_excluded(&def.name) {
            continue;
        }
        if def.name == meta.primary_key_column() && meta.primary_key_auto_generated() {
            continue;
        }
        if let Some(value) = lookup(meta, values, def) {
            columns.push(def.name.as_str());
            params.push(value_to_sql(value, def.column_type));
        }
    }

    if columns.is_empty() {
        return CompiledStatement::new(format!("INSERT INTO {} DEFAULT VALUES", meta.table_name()));
    }

    let placeholders = vec!["?"; columns.len()].join(", ");
    CompiledStatement {
        text: format!(
            "INSERT INTO {} ({}) VALUES ({})",
            meta.table_name(),
            columns.join(", "),
            placeholders
        ),
        params,
    }
}

/// UPDATE for the record with `values`.
///
/// With `columns`, exactly those columns are written (a missing value writes
/// NULL). Without, every declared, non-excluded, non-key column whose key is
/// present in `values`. `Ok(None)` when there is nothing to write.
pub fn update_statement(
    meta: &EntityMetadata,
    values: &BTreeMap<String, Value>,
    columns: Option<&[&str]>,
    quote: char,
) -> Result<Option<CompiledStatement>> {
    let id = values
        .get(meta.primary_key_key())
        .filter(|v| !v.is_null())
        .ok_or_else(|| PersistError::MissingPrimaryKey {
            entity: meta.type_name().to_string(),
        })?;

    let mut assignments: Vec<(String, SqlValue)> = Vec::new();
    match columns {
        Some(names) => {
            for name in names {
                if name.eq_ignore_ascii_case(meta.primary_key_column()) {
                    continue;
                }
                match meta.column(name) {
                    Some(def) => {
                        let value = lookup(meta, values, def).unwrap_or(&Value::Null);
                        assignments.push((def.name.clone(), value_to_sql(value, def.column_type)));
                    }
                    None => {
                        let key = meta.key_for_column_name(name);
                        let value = values.get(&key).unwrap_or(&Value::Null);
                        assignments.push((name.to_string(), natural(value)));
                    }
                }
            }
        }
        None => {
            for def in meta.columns() {
                if def.name == meta.primary_key_column() || meta.is_excluded(&def.name) {
                    continue;
                }
                if let Some(value) = lookup(meta, values, def) {
                    assignments.push((def.name.clone(), value_to_sql(value, def.column_type)));
                }
            }
        }
    }

    if assignments.is_empty() {
        return Ok(None);
    }
    Ok(Some(assignment_statement(meta, id, assignments, quote)))
}

/// `UPDATE <table> SET c1=?, ... WHERE <pk> = <idLiteral>`
pub fn assignment_statement(
    meta: &EntityMetadata,
    id: &Value,
    assignments: Vec<(String, SqlValue)>,
    quote: char,
) -> CompiledStatement {
    let (columns, params): (Vec<String>, Vec<SqlValue>) = assignments.into_iter().unzip();
    let sets: Vec<String> = columns.iter().map(|c| format!("{}=?", c)).collect();
    let id_literal = smart_quote(quote, id, meta.primary_key_type())
        .unwrap_or_else(|| "NULL".to_string());
    CompiledStatement {
        text: format!(
            "UPDATE {} SET {} WHERE {} = {}",
            meta.table_name(),
            sets.join(", "),
            meta.primary_key_column(),
            id_literal
        ),
        params,
    }
}

pub fn delete_statement(meta: &EntityMetadata, id: &Value) -> CompiledStatement {
    CompiledStatement {
        text: format!(
            "DELETE FROM {} WHERE {} = ?",
            meta.table_name(),
            meta.primary_key_column()
        ),
        params: vec![value_to_sql(id, meta.primary_key_type())],
    }
}

pub fn delete_all_statement(meta: &EntityMetadata) -> CompiledStatement {
    CompiledStatement::new(format!("DELETE FROM {}", meta.table_name()))
}

pub fn drop_table_statement(meta: &EntityMetadata) -> CompiledStatement {
    CompiledStatement::new(format!("DROP TABLE IF EXISTS {}", meta.table_name()))
}

pub fn add_column_statement(meta: &EntityMetadata, def: &ColumnDef) -> CompiledStatement {
    CompiledStatement::new(format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        meta.table_name(),
        def.name,
        def.column_type.affinity()
    ))
}

/// Value stored for a declared column: under its key, or under the column
/// name itself.
fn lookup<'a>(
    meta: &EntityMetadata,
    values: &'a BTreeMap<String, Value>,
    def: &ColumnDef,
) -> Option<&'a Value> {
    values
        .get(&meta.key_for_column_name(&def.name))
        .or_else(|| values.get(&def.name))
        .or_else(|| {
            values.iter().find_map(|(key, value)| {
                meta.column_name_for_key(key)
                    .eq_ignore_ascii_case(&def.name)
                    .then_some(value)
            })
        })
}

fn inferred_type(value: &Value) -> ColumnType {
    match value {
        Value::Bool(_) => ColumnType::Bool,
        Value::Int(_) => ColumnType::Int64,
        Value::Float(_) => ColumnType::Float64,
        Value::Date(_) => ColumnType::Date,
        Value::Blob(_) => ColumnType::Blob,
        Value::Null | Value::String(_) => ColumnType::String,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitfield::BitFieldMapping;
    use crate::metadata::EntityDescriptor;

    fn album() -> EntityMetadata {
        let desc = EntityDescriptor::new("albums")
            .column("ID", ColumnType::Int64)
            .column("MEDIA_KEY", ColumnType::String)
            .column("TITLE", ColumnType::String)
            .column("SIZE", ColumnType::String)
            .column("COVER_IMAGE_DATA", ColumnType::Blob)
            .column("FLAGS", ColumnType::Int32)
            .exclude("COVER_IMAGE_DATA")
            .bit_field(BitFieldMapping::new("flags").flag("autoDownload", 1));
        EntityMetadata::from_descriptor("Album", desc).unwrap()
    }

    fn values(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn negated_criterion() {
        let meta = album();
        let criteria: Criteria = [("<NOT>size", "large")].into_iter().collect();
        let q = compile_criteria(&meta, &criteria, '\'').unwrap();
        assert_eq!(q.where_clause, "WHERE SIZE <> 'large'");
        assert!(q.params.is_empty());
    }

    #[test]
    fn criteria_join_with_and() {
        let meta = album();
        let criteria = Criteria::new()
            .equals("mediaKey", "a'b")
            .equals("flags", 3)
            .not_equals("title", Value::Null);
        let q = compile_criteria(&meta, &criteria, '\'').unwrap();
        assert_eq!(
            q.where_clause,
            "WHERE MEDIA_KEY = 'a''b' AND FLAGS = 3 AND TITLE IS NOT NULL"
        );
    }

    #[test]
    fn empty_criteria_omits_where() {
        let meta = album();
        let q = compile_criteria(&meta, &Criteria::new(), '\'').unwrap();
        let stmt = select_statement(&meta, &q);
        assert_eq!(stmt.text, "SELECT ID, MEDIA_KEY, TITLE, SIZE, FLAGS FROM albums");
    }

    #[test]
    fn blob_criteria_are_bound() {
        let meta = album();
        let criteria = Criteria::new().equals("coverImageData", vec![1u8, 2]);
        let q = compile_criteria(&meta, &criteria, '\'').unwrap();
        assert_eq!(q.where_clause, "WHERE COVER_IMAGE_DATA = ?");
        assert_eq!(q.params, vec![SqlValue::Blob(vec![1, 2])]);
    }

    #[test]
    fn bitfield_criteria_rejected() {
        let meta = album();
        let criteria = Criteria::new().equals("autoDownload", true);
        let err = compile_criteria(&meta, &criteria, '\'').unwrap_err();
        assert!(matches!(err, PersistError::BitfieldCriterion { .. }));
    }

    #[test]
    fn raw_where_and_sort() {
        let meta = album();
        let q = compile_where("where TITLE LIKE 'A%'", Some("TITLE DESC"));
        let stmt = select_statement(&meta, &q);
        assert_eq!(
            stmt.text,
            "SELECT ID, MEDIA_KEY, TITLE, SIZE, FLAGS FROM albums WHERE TITLE LIKE 'A%' ORDER BY TITLE DESC"
        );
        let q = compile_where("  ", Some("ORDER BY ID"));
        assert_eq!(q.where_clause, "");
        assert_eq!(q.order_clause, "ORDER BY ID");
    }

    #[test]
    fn leading_keywords_accept_any_whitespace() {
        let q = compile_where("WHERE\n  TITLE = 'A'", Some("order\tby\nTITLE"));
        assert_eq!(q.where_clause, "WHERE TITLE = 'A'");
        assert_eq!(q.order_clause, "ORDER BY TITLE");

        let q = compile_where("WHEREVER = 1", Some("ORDERING"));
        assert_eq!(q.where_clause, "WHERE WHEREVER = 1");
        assert_eq!(q.order_clause, "ORDER BY ORDERING");

        let q = compile_where("été = 1", None);
        assert_eq!(q.where_clause, "WHERE été = 1");
    }

    #[test]
    fn insert_skips_auto_key_unknown_and_excluded() {
        let meta = album();
        let stmt = insert_statement(
            &meta,
            &values(&[
                ("ID", Value::Int(9)),
                ("title", Value::from("Album")),
                ("mediaKey", Value::from("k")),
                ("coverImageData", Value::Blob(vec![1])),
                ("nonsense", Value::Int(1)),
                ("flags", Value::Int(0)),
            ]),
        );
        assert_eq!(
            stmt.text,
            "INSERT INTO albums (MEDIA_KEY, TITLE, FLAGS) VALUES (?, ?, ?)"
        );
        assert_eq!(
            stmt.params,
            vec![
                SqlValue::Text("k".into()),
                SqlValue::Text("Album".into()),
                SqlValue::Integer(0)
            ]
        );
    }

    #[test]
    fn insert_with_nothing_uses_default_values() {
        let meta = album();
        let stmt = insert_statement(&meta, &BTreeMap::new());
        assert_eq!(stmt.text, "INSERT INTO albums DEFAULT VALUES");
    }

    #[test]
    fn full_update() {
        let meta = album();
        let stmt = update_statement(
            &meta,
            &values(&[("ID", Value::Int(4)), ("title", Value::from("T")), ("flags", Value::Int(2))]),
            None,
            '\'',
        )
        .unwrap()
        .unwrap();
        assert_eq!(stmt.text, "UPDATE albums SET TITLE=?, FLAGS=? WHERE ID = 4");
        assert_eq!(stmt.params.len(), 2);
    }

    #[test]
    fn explicit_column_update_includes_excluded() {
        let meta = album();
        let stmt = update_statement(
            &meta,
            &values(&[("ID", Value::Int(4)), ("coverImageData", Value::Blob(vec![7]))]),
            Some(&["COVER_IMAGE_DATA"][..]),
            '\'',
        )
        .unwrap()
        .unwrap();
        assert_eq!(stmt.text, "UPDATE albums SET COVER_IMAGE_DATA=? WHERE ID = 4");
        assert_eq!(stmt.params, vec![SqlValue::Blob(vec![7])]);
    }

    #[test]
    fn update_requires_id() {
        let meta = album();
        let err = update_statement(&meta, &values(&[("title", Value::from("x"))]), None, '\'')
            .unwrap_err();
        assert!(matches!(err, PersistError::MissingPrimaryKey { .. }));
    }

    #[test]
    fn ddl_text() {
        let meta = album();
        let def = ColumnDef {
            name: "RATING".into(),
            column_type: ColumnType::Float64,
        };
        assert_eq!(
            add_column_statement(&meta, &def).text,
            "ALTER TABLE albums ADD COLUMN RATING REAL"
        );
        assert_eq!(drop_table_statement(&meta).text, "DROP TABLE IF EXISTS albums");
        assert_eq!(delete_all_statement(&meta).text, "DELETE FROM albums");
        assert_eq!(
            delete_statement(&meta, &Value::Int(3)).text,
            "DELETE FROM albums WHERE ID = ?"
        );
    }
}
