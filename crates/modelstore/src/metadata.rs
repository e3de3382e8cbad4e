use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::bitfield::BitFieldMapping;
use crate::error::{PersistError, Result};
use crate::naming::{convert_column_name_to_key, convert_key_to_column_name};
use crate::registry::MetadataRegistry;
use crate::value::ColumnType;

/// Primary-key column used when a descriptor does not name one.
pub const DEFAULT_PRIMARY_KEY_COLUMN: &str = "ID";

/// A persisted entity type.
///
/// Implementors are usually zero-sized marker types; the rows themselves are
/// [`crate::Record`]s. `describe` is called once per process, on first use,
/// and the validated result is cached in [`MetadataRegistry::global`].
///
/// ```
/// use modelstore::{BitFieldMapping, ColumnType, EntityDescriptor, Model};
///
/// struct Album;
///
/// impl Model for Album {
///     const TYPE_NAME: &'static str = "Album";
///
///     fn describe() -> EntityDescriptor {
///         EntityDescriptor::new("albums")
///             .column("ID", ColumnType::Int64)
///             .column("TITLE", ColumnType::String)
///             .column("FLAGS", ColumnType::Int32)
///             .bit_field(BitFieldMapping::new("flags").flag("autoDownload", 1))
///     }
/// }
///
/// let metadata = Album::metadata().unwrap();
/// assert_eq!(metadata.column_names_csv(), "ID, TITLE, FLAGS");
/// ```
pub trait Model: 'static {
    /// Registry key; also the key change handlers are registered under.
    const TYPE_NAME: &'static str;

    /// Declarative persistence facts for this type.
    fn describe() -> EntityDescriptor;

    /// Cached, validated metadata for this type.
    fn metadata() -> Result<Arc<EntityMetadata>>
    where
        Self: Sized,
    {
        MetadataRegistry::global().resolve::<Self>()
    }
}

/// A declared column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
}

/// Builder for the declarative side of an entity type.
#[derive(Debug, Clone, Default)]
pub struct EntityDescriptor {
    table_name: String,
    columns: Vec<ColumnDef>,
    excluded_columns: Vec<String>,
    primary_key_column: Option<String>,
    primary_key_auto_generated: Option<bool>,
    bit_fields: Vec<BitFieldMapping>,
    keys_for_columns: Vec<(String, String)>,
    columns_for_keys: Vec<(String, String)>,
}

impl EntityDescriptor {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            ..Default::default()
        }
    }

    /// Declare a column. Declaration order is the DDL and insert order.
    pub fn column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.push(ColumnDef {
            name: name.into(),
            column_type,
        });
        self
    }

    /// Columns that are never auto-selected or auto-inserted.
    pub fn exclude(mut self, column: impl Into<String>) -> Self {
        self.excluded_columns.push(column.into());
        self
    }

    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key_column = Some(column.into());
        self
    }

    /// Defaults to `true`. When `false`, inserts must carry the key value.
    pub fn primary_key_auto_generated(mut self, auto_generated: bool) -> Self {
        self.primary_key_auto_generated = Some(auto_generated);
        self
    }

    pub fn bit_field(mut self, mapping: BitFieldMapping) -> Self {
        self.bit_fields.push(mapping);
        self
    }

    /// Use `key` for `column` instead of the converted name.
    pub fn key_for_column(mut self, key: impl Into<String>, column: impl Into<String>) -> Self {
        self.keys_for_columns.push((key.into(), column.into()));
        self
    }

    /// Persist `key` into `column`. Several keys may share one column.
    pub fn column_for_key(mut self, column: impl Into<String>, key: impl Into<String>) -> Self {
        self.columns_for_keys.push((column.into(), key.into()));
        self
    }
}

/// Where a virtual key lives: a bit of an integer backing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualFlag<'a> {
    pub backing_key: &'a str,
    pub mask: i64,
}

/// Validated, immutable metadata of one entity type.
#[derive(Debug, Clone)]
pub struct EntityMetadata {
    type_name: String,
    table_name: String,
    columns: Vec<ColumnDef>,
    excluded_columns: BTreeSet<String>,
    primary_key_column: String,
    primary_key_key: String,
    primary_key_auto_generated: bool,
    bit_fields: Vec<BitFieldMapping>,
    explicit_key_for_column: HashMap<String, String>,
    explicit_column_for_key: HashMap<String, String>,
    /// virtual key -> (index into `bit_fields`, mask)
    virtual_keys: HashMap<String, (usize, i64)>,
}

impl EntityMetadata {
    /// Validate a descriptor.
    ///
    /// Checks: the primary key is declared (an integer when auto-generated),
    /// excluded columns are declared, bitfield backing keys name an integer
    /// column and virtual keys do not shadow real columns.
    pub fn from_descriptor(type_name: &str, descriptor: EntityDescriptor) -> Result<Self> {
        let schema_err = |msg: String| PersistError::Schema(format!("{}: {}", type_name, msg));

        if descriptor.table_name.trim().is_empty() {
            return Err(schema_err("table name is empty".into()));
        }
        if descriptor.columns.is_empty() {
            return Err(schema_err("no columns declared".into()));
        }

        let mut seen = std::collections::HashSet::new();
        for column in &descriptor.columns {
            if !seen.insert(column.name.to_ascii_lowercase()) {
                return Err(schema_err(format!("duplicate column '{}'", column.name)));
            }
        }

        let mut metadata = Self {
            type_name: type_name.to_string(),
            table_name: descriptor.table_name,
            columns: descriptor.columns,
            excluded_columns: BTreeSet::new(),
            primary_key_column: String::new(),
            primary_key_key: String::new(),
            primary_key_auto_generated: descriptor.primary_key_auto_generated.unwrap_or(true),
            bit_fields: Vec::new(),
            explicit_key_for_column: descriptor.keys_for_columns.into_iter().map(|(k, c)| (c, k)).collect(),
            explicit_column_for_key: descriptor.columns_for_keys.into_iter().map(|(c, k)| (k, c)).collect(),
            virtual_keys: HashMap::new(),
        };

        let pk_requested = descriptor
            .primary_key_column
            .unwrap_or_else(|| DEFAULT_PRIMARY_KEY_COLUMN.to_string());
        metadata.primary_key_column = match metadata.column(&pk_requested) {
            Some(def) => {
                if def.column_type.is_blob() {
                    return Err(schema_err(format!("primary key '{}' cannot be a blob", def.name)));
                }
                if metadata.primary_key_auto_generated && !def.column_type.is_integer() {
                    return Err(schema_err(format!(
                        "auto-generated primary key '{}' must be an integer column",
                        def.name
                    )));
                }
                def.name.clone()
            }
            None => {
                return Err(schema_err(format!(
                    "primary key column '{}' is not declared",
                    pk_requested
                )));
            }
        };
        metadata.primary_key_key = metadata.key_for_column_name(&metadata.primary_key_column);

        for excluded in descriptor.excluded_columns {
            let declared = metadata
                .column(&excluded)
                .map(|def| def.name.clone())
                .ok_or_else(|| schema_err(format!("excluded column '{}' is not declared", excluded)))?;
            if declared == metadata.primary_key_column {
                return Err(schema_err("the primary key cannot be excluded".into()));
            }
            metadata.excluded_columns.insert(declared);
        }

        for mapping in descriptor.bit_fields {
            let backing_column = metadata.column_name_for_key(mapping.backing_key());
            match metadata.column(&backing_column) {
                Some(def) if def.column_type.is_integer() => {}
                Some(def) => {
                    return Err(schema_err(format!(
                        "bitfield backing column '{}' is {}, not an integer",
                        def.name, def.column_type
                    )));
                }
                None => {
                    return Err(schema_err(format!(
                        "bitfield backing key '{}' does not name a declared column",
                        mapping.backing_key()
                    )));
                }
            }

            let index = metadata.bit_fields.len();
            for (key, mask) in mapping.flags() {
                if metadata.declared_column_for_key(key).is_some() {
                    return Err(schema_err(format!("bitfield key '{}' shadows a column", key)));
                }
                if metadata.virtual_keys.insert(key.to_string(), (index, mask)).is_some() {
                    return Err(schema_err(format!("bitfield key '{}' declared twice", key)));
                }
            }
            metadata.bit_fields.push(mapping);
        }

        Ok(metadata)
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// All declared columns, in declaration order.
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn excluded_columns(&self) -> impl Iterator<Item = &str> {
        self.excluded_columns.iter().map(String::as_str)
    }

    pub fn is_excluded(&self, column: &str) -> bool {
        self.column(column)
            .is_some_and(|def| self.excluded_columns.contains(&def.name))
    }

    pub fn primary_key_column(&self) -> &str {
        &self.primary_key_column
    }

    pub fn primary_key_key(&self) -> &str {
        &self.primary_key_key
    }

    pub fn primary_key_auto_generated(&self) -> bool {
        self.primary_key_auto_generated
    }

    pub fn primary_key_type(&self) -> ColumnType {
        self.column_type(&self.primary_key_column)
            .unwrap_or(ColumnType::Int64)
    }

    pub fn bit_fields(&self) -> &[BitFieldMapping] {
        &self.bit_fields
    }

    /// Case-insensitive lookup of a declared column.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns
            .iter()
            .find(|def| def.name == name)
            .or_else(|| self.columns.iter().find(|def| def.name.eq_ignore_ascii_case(name)))
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.column(name).map(|def| def.column_type)
    }

    /// Names of auto-selected columns: every declared column except the
    /// excluded ones.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|def| !self.excluded_columns.contains(&def.name))
            .map(|def| def.name.as_str())
            .collect()
    }

    pub fn column_names_csv(&self) -> String {
        self.column_names().join(", ")
    }

    /// `CREATE TABLE IF NOT EXISTS` text for every declared column.
    pub fn schema_statement(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|def| self.column_declaration(def))
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.table_name,
            columns.join(", ")
        )
    }

    /// `<name> <affinity>`, with the primary-key clause on the key column.
    pub fn column_declaration(&self, def: &ColumnDef) -> String {
        if def.name != self.primary_key_column {
            return format!("{} {}", def.name, def.column_type.affinity());
        }
        if self.primary_key_auto_generated {
            format!("{} INTEGER PRIMARY KEY", def.name)
        } else {
            format!("{} {} PRIMARY KEY", def.name, def.column_type.affinity())
        }
    }

    /// `SELECT <auto-selected columns> FROM <table>`
    pub fn base_query(&self) -> String {
        format!("SELECT {} FROM {}", self.column_names_csv(), self.table_name)
    }

    /// Record key for a column. Explicit overrides win, otherwise the
    /// naming convention applies.
    pub fn key_for_column_name(&self, column: &str) -> String {
        if let Some(key) = self.explicit_key_for_column.get(column) {
            return key.clone();
        }
        if let Some(def) = self.column(column) {
            if let Some(key) = self.explicit_key_for_column.get(&def.name) {
                return key.clone();
            }
        }
        convert_column_name_to_key(column)
    }

    /// Column for a record key.
    ///
    /// Resolution order: explicit override, bitfield virtual key (its backing
    /// column), a declared column whose key is `key`, the converted name
    /// matched against declared columns, and finally the bare converted name.
    pub fn column_name_for_key(&self, key: &str) -> String {
        if let Some(column) = self.explicit_column_for_key.get(key) {
            return column.clone();
        }
        if let Some(flag) = self.virtual_flag(key) {
            return self.column_name_for_key(flag.backing_key);
        }
        if let Some(def) = self.declared_column_for_key(key) {
            return def.name.clone();
        }
        let converted = convert_key_to_column_name(key);
        match self.column(&converted) {
            Some(def) => def.name.clone(),
            None => converted,
        }
    }

    fn declared_column_for_key(&self, key: &str) -> Option<&ColumnDef> {
        self.columns
            .iter()
            .find(|def| self.key_for_column_name(&def.name) == key)
    }

    /// Bitfield dispatch entry for a virtual key.
    pub fn virtual_flag(&self, key: &str) -> Option<VirtualFlag<'_>> {
        self.virtual_keys.get(key).map(|(index, mask)| VirtualFlag {
            backing_key: self.bit_fields[*index].backing_key(),
            mask: *mask,
        })
    }

    pub fn is_bitfield_key(&self, key: &str) -> bool {
        self.virtual_keys.contains_key(key)
    }

    /// Backing keys of every bitfield mapping.
    pub fn bitfield_backing_keys(&self) -> impl Iterator<Item = &str> {
        self.bit_fields.iter().map(BitFieldMapping::backing_key)
    }

    pub(crate) fn set_key_for_column(&mut self, key: &str, column: &str) {
        self.explicit_key_for_column
            .insert(column.to_string(), key.to_string());
        if column == self.primary_key_column {
            self.primary_key_key = key.to_string();
        }
    }

    pub(crate) fn set_column_for_key(&mut self, column: &str, key: &str) {
        self.explicit_column_for_key
            .insert(key.to_string(), column.to_string());
    }
}
