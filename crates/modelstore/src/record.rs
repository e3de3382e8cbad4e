use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::bitfield::{is_bit_set, set_bit};
use crate::error::Result;
use crate::metadata::{EntityMetadata, Model};
use crate::value::Value;

/// One row of entity type `E`: a key/value map plus persistence state.
///
/// Bitfield virtual keys are not stored; [`Record::get`] and
/// [`Record::set`] route them through their integer backing key.
pub struct Record<E: Model> {
    metadata: Arc<EntityMetadata>,
    values: BTreeMap<String, Value>,
    has_persisted: bool,
    _model: PhantomData<fn() -> E>,
}

impl<E: Model> Record<E> {
    /// Empty, non-persisted record.
    pub fn new() -> Result<Self> {
        Ok(Self::with_metadata(E::metadata()?, BTreeMap::new(), false))
    }

    /// Non-persisted record populated from key/value pairs. Plain keys are
    /// stored first, then virtual keys set their bits on top of the backing
    /// key. Backing keys that are still absent start at 0.
    pub fn from_values<K, V, I>(values: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let metadata = E::metadata()?;
        let mut record = Self::with_metadata(metadata, BTreeMap::new(), false);
        let (flags, plain): (Vec<(String, Value)>, Vec<(String, Value)>) = values
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .partition(|(key, _)| record.metadata.is_bitfield_key(key));
        for (key, value) in plain.into_iter().chain(flags) {
            record.set(key, value);
        }
        record.fill_bitfield_defaults();
        Ok(record)
    }

    pub(crate) fn with_metadata(
        metadata: Arc<EntityMetadata>,
        values: BTreeMap<String, Value>,
        has_persisted: bool,
    ) -> Self {
        Self {
            metadata,
            values,
            has_persisted,
            _model: PhantomData,
        }
    }

    pub(crate) fn fill_bitfield_defaults(&mut self) {
        let backing: Vec<String> = self
            .metadata
            .bitfield_backing_keys()
            .map(str::to_string)
            .collect();
        for key in backing {
            self.values.entry(key).or_insert(Value::Int(0));
        }
    }

    pub(crate) fn replace_values(&mut self, values: BTreeMap<String, Value>) {
        self.values = values;
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.has_persisted = true;
    }

    pub fn metadata(&self) -> &EntityMetadata {
        &self.metadata
    }

    /// Whether the record was loaded from, or written to, the database.
    pub fn has_persisted(&self) -> bool {
        self.has_persisted
    }

    /// Primary-key value, if set and non-null.
    pub fn id(&self) -> Option<&Value> {
        self.values
            .get(self.metadata.primary_key_key())
            .filter(|v| !v.is_null())
    }

    /// Value for `key`, resolving bitfield virtual keys to a `Bool`.
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(flag) = self.metadata.virtual_flag(key) {
            let flags = self.backing_flags(flag.backing_key);
            return Some(Value::Bool(is_bit_set(flag.mask, flags)));
        }
        self.values.get(key).cloned()
    }

    /// Stored value for `key`, without virtual-key resolution.
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Set `key`. For a virtual key only its bit of the backing value changes.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        if let Some(flag) = self.metadata.virtual_flag(&key) {
            let on = value.as_bool().unwrap_or(false);
            let flags = set_bit(flag.mask, self.backing_flags(flag.backing_key), on);
            let backing = flag.backing_key.to_string();
            self.values.insert(backing, Value::Int(flags));
            return;
        }
        self.values.insert(key, value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Stored key/value pairs, virtual keys excluded.
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Copy every stored value of `other` into this record, keeping this
    /// record's primary key.
    pub fn copy_values_from(&mut self, other: &Record<E>) {
        let pk = self.metadata.primary_key_key().to_string();
        for (key, value) in &other.values {
            if *key != pk {
                self.values.insert(key.clone(), value.clone());
            }
        }
    }

    /// All stored values as a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), to_json_value(v)))
            .collect();
        serde_json::Value::Object(map)
    }

    /// The named keys as a JSON object; virtual keys resolve to booleans and
    /// absent keys become `null`.
    pub fn to_json_for_keys(&self, keys: &[&str]) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = keys
            .iter()
            .map(|k| {
                let v = self.get(k).unwrap_or(Value::Null);
                (k.to_string(), to_json_value(&v))
            })
            .collect();
        serde_json::Value::Object(map)
    }

    fn backing_flags(&self, backing_key: &str) -> i64 {
        self.values
            .get(backing_key)
            .and_then(Value::as_i64)
            .unwrap_or(0)
    }
}

fn to_json_value(value: &Value) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

/// Records are equal when both carry the same primary key value.
impl<E: Model> PartialEq for Record<E> {
    fn eq(&self, other: &Self) -> bool {
        match (self.id(), other.id()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl<E: Model> Clone for Record<E> {
    fn clone(&self) -> Self {
        Self::with_metadata(
            Arc::clone(&self.metadata),
            self.values.clone(),
            self.has_persisted,
        )
    }
}

impl<E: Model> fmt::Debug for Record<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("type", &E::TYPE_NAME)
            .field("has_persisted", &self.has_persisted)
            .field("values", &self.values)
            .finish()
    }
}
