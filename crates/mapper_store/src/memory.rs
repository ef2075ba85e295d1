use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::{ObjectMetadata, ObjectStore, StoreError};

/// An [`ObjectStore`] backed by process memory.
///
/// Used by the test suites and by offline pipeline runs that only want the
/// local file outputs. Clones share the same underlying map.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    objects: Arc<RwLock<BTreeMap<String, (Bytes, ObjectMetadata)>>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Whether the store holds no objects.
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }
}

#[async_trait::async_trait]
impl ObjectStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        Ok(self.objects.read().get(key).map(|(bytes, _)| bytes.clone()))
    }

    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        metadata: ObjectMetadata,
    ) -> Result<(), StoreError> {
        self.objects
            .write()
            .insert(key.to_owned(), (bytes, metadata));
        Ok(())
    }

    async fn head_metadata(&self, key: &str) -> Result<Option<ObjectMetadata>, StoreError> {
        Ok(self
            .objects
            .read()
            .get(key)
            .map(|(_, metadata)| metadata.clone()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .objects
            .read()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.objects.write().remove(key);
        Ok(())
    }
}
