use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::error::Result;
use crate::metadata::{EntityMetadata, Model};

/// Process-wide cache of validated entity metadata, keyed by
/// [`Model::TYPE_NAME`].
///
/// Metadata is computed from [`Model::describe`] on first use. Overrides
/// registered here replace the cached entry; readers holding an older `Arc`
/// keep seeing the old mapping.
pub struct MetadataRegistry {
    entries: RwLock<HashMap<String, Arc<EntityMetadata>>>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// The registry used by [`Model::metadata`].
    pub fn global() -> &'static MetadataRegistry {
        static GLOBAL: OnceLock<MetadataRegistry> = OnceLock::new();
        GLOBAL.get_or_init(MetadataRegistry::new)
    }

    /// Cached metadata for `E`, computing and validating it on first use.
    pub fn resolve<E: Model>(&self) -> Result<Arc<EntityMetadata>> {
        if let Some(found) = self.read().get(E::TYPE_NAME) {
            return Ok(Arc::clone(found));
        }

        let built = Arc::new(EntityMetadata::from_descriptor(
            E::TYPE_NAME,
            E::describe(),
        )?);
        debug!(
            entity = E::TYPE_NAME,
            table = built.table_name(),
            columns = built.columns().len(),
            "Registered entity metadata"
        );

        // A concurrent resolver may have won; keep whichever landed first.
        let mut entries = self.write();
        let entry = entries
            .entry(E::TYPE_NAME.to_string())
            .or_insert(built);
        Ok(Arc::clone(entry))
    }

    /// Look up already-resolved metadata by type name.
    pub fn get(&self, type_name: &str) -> Option<Arc<EntityMetadata>> {
        self.read().get(type_name).cloned()
    }

    /// Names of every resolved entity type, sorted.
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Map `column` to `key` for `E`.
    pub fn set_key_for_column<E: Model>(&self, key: &str, column: &str) -> Result<()> {
        self.modify::<E>(|meta| meta.set_key_for_column(key, column))
    }

    /// Bulk form of [`Self::set_key_for_column`]; pairs are `(key, column)`.
    pub fn add_keys_for_column_names<E, I, K, C>(&self, pairs: I) -> Result<()>
    where
        E: Model,
        I: IntoIterator<Item = (K, C)>,
        K: AsRef<str>,
        C: AsRef<str>,
    {
        let pairs: Vec<(K, C)> = pairs.into_iter().collect();
        self.modify::<E>(|meta| {
            for (key, column) in &pairs {
                meta.set_key_for_column(key.as_ref(), column.as_ref());
            }
        })
    }

    /// Persist `key` into `column` for `E`.
    pub fn set_column_name_for_key<E: Model>(&self, column: &str, key: &str) -> Result<()> {
        self.modify::<E>(|meta| meta.set_column_for_key(column, key))
    }

    // Read, change and replace under one write guard so concurrent
    // overrides for the same type all land.
    fn modify<E: Model>(&self, apply: impl FnOnce(&mut EntityMetadata)) -> Result<()> {
        let mut entries = self.write();
        let entry = match entries.entry(E::TYPE_NAME.to_string()) {
            Entry::Occupied(occupied) => occupied.into_mut(),
            Entry::Vacant(vacant) => vacant.insert(Arc::new(EntityMetadata::from_descriptor(
                E::TYPE_NAME,
                E::describe(),
            )?)),
        };
        apply(Arc::make_mut(entry));
        debug!(entity = E::TYPE_NAME, "Updated key/column overrides");
        Ok(())
    }

    // Entries are replaced wholesale, so a poisoned lock still guards a
    // consistent map.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<EntityMetadata>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<EntityMetadata>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MetadataRegistry {
    fn default() -> Self {
        Self::new()
    }
}
