use std::sync::Arc;

use bytes::Bytes;

use mapper_types::{
    Channel, IndexMapping, MappingEntry, PyPIPackageLookup, RelationsTableMetadata,
};

use crate::{ObjectMetadata, ObjectStore, StoreError};

const HASH_PREFIX: &str = "hash-v0";
const RELATIONS_PREFIX: &str = "relations-v1";
const LOOKUP_PREFIX: &str = "pypi-to-conda-v1";
const INDEX_FILE: &str = "index.json";

/// Typed read/write access to the §6 storage layout, generic over the
/// concrete [`ObjectStore`].
///
/// All operations are idempotent; the gateway adds no caching or locking of
/// its own.
#[derive(Clone)]
pub struct StoreGateway {
    store: Arc<dyn ObjectStore>,
}

impl StoreGateway {
    /// Wraps an object store.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    fn index_key(channel: Channel) -> String {
        format!("{HASH_PREFIX}/{channel}/{INDEX_FILE}")
    }

    fn mapping_key(sha256: &str) -> String {
        format!("{HASH_PREFIX}/{sha256}")
    }

    fn relations_table_key(channel: Channel) -> String {
        format!("{RELATIONS_PREFIX}/{channel}/relations.jsonl.gz")
    }

    fn relations_metadata_key(channel: Channel) -> String {
        format!("{RELATIONS_PREFIX}/{channel}/metadata.json")
    }

    fn lookup_prefix(channel: Channel) -> String {
        format!("{LOOKUP_PREFIX}/{channel}/")
    }

    fn lookup_key(channel: Channel, pypi_name: &str) -> String {
        format!("{LOOKUP_PREFIX}/{channel}/{pypi_name}.json")
    }

    /// Reads the canonical index of a channel. `None` when it was never
    /// published.
    pub async fn get_index(&self, channel: Channel) -> Result<Option<IndexMapping>, StoreError> {
        let key = Self::index_key(channel);
        let Some(bytes) = self.store.get(&key).await? else {
            return Ok(None);
        };
        IndexMapping::from_slice(&bytes)
            .map(Some)
            .map_err(|err| StoreError::Decode(key, err))
    }

    /// Writes the canonical index of a channel.
    pub async fn put_index(&self, channel: Channel, index: &IndexMapping) -> Result<(), StoreError> {
        let key = Self::index_key(channel);
        let bytes = index
            .to_vec()
            .map_err(|err| StoreError::Encode(key.clone(), err))?;
        self.store
            .put(&key, Bytes::from(bytes), ObjectMetadata::default())
            .await
    }

    /// Writes the per-hash mapping entry at `hash-v0/<sha256>`.
    pub async fn put_mapping(&self, sha256: &str, entry: &MappingEntry) -> Result<(), StoreError> {
        let key = Self::mapping_key(sha256);
        let bytes =
            serde_json::to_vec(entry).map_err(|err| StoreError::Encode(key.clone(), err))?;
        self.store
            .put(&key, Bytes::from(bytes), ObjectMetadata::default())
            .await
    }

    /// Reads the per-hash mapping entry. `None` when the hash is unknown.
    pub async fn get_mapping(&self, sha256: &str) -> Result<Option<MappingEntry>, StoreError> {
        let key = Self::mapping_key(sha256);
        let Some(bytes) = self.store.get(&key).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| StoreError::Decode(key, err))
    }

    /// Deletes the per-hash mapping entry (yank pathway).
    pub async fn delete_hash(&self, sha256: &str) -> Result<(), StoreError> {
        self.store.delete(&Self::mapping_key(sha256)).await
    }

    /// Writes the gzipped NDJSON relations table of a channel.
    pub async fn put_relations_table(
        &self,
        channel: Channel,
        gzipped_jsonl: Bytes,
    ) -> Result<(), StoreError> {
        self.store
            .put(
                &Self::relations_table_key(channel),
                gzipped_jsonl,
                ObjectMetadata::default(),
            )
            .await
    }

    /// Reads the gzipped NDJSON relations table of a channel.
    pub async fn get_relations_table(&self, channel: Channel) -> Result<Option<Bytes>, StoreError> {
        self.store.get(&Self::relations_table_key(channel)).await
    }

    /// Writes the relations metadata object of a channel.
    pub async fn put_relations_metadata(
        &self,
        channel: Channel,
        metadata: &RelationsTableMetadata,
    ) -> Result<(), StoreError> {
        let key = Self::relations_metadata_key(channel);
        let bytes =
            serde_json::to_vec(metadata).map_err(|err| StoreError::Encode(key.clone(), err))?;
        self.store
            .put(&key, Bytes::from(bytes), ObjectMetadata::default())
            .await
    }

    /// Writes a derived PyPI lookup with its `content_sha256` attached as
    /// object metadata.
    pub async fn put_pypi_lookup(
        &self,
        channel: Channel,
        pypi_name: &str,
        bytes: Bytes,
        content_sha256: String,
    ) -> Result<(), StoreError> {
        self.store
            .put(
                &Self::lookup_key(channel, pypi_name),
                bytes,
                ObjectMetadata {
                    content_sha256: Some(content_sha256),
                },
            )
            .await
    }

    /// Reads the raw bytes of a derived PyPI lookup.
    pub async fn get_pypi_lookup(
        &self,
        channel: Channel,
        pypi_name: &str,
    ) -> Result<Option<Bytes>, StoreError> {
        self.store.get(&Self::lookup_key(channel, pypi_name)).await
    }

    /// Reads and decodes a derived PyPI lookup.
    pub async fn get_pypi_lookup_typed(
        &self,
        channel: Channel,
        pypi_name: &str,
    ) -> Result<Option<PyPIPackageLookup>, StoreError> {
        let key = Self::lookup_key(channel, pypi_name);
        let Some(bytes) = self.store.get(&key).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| StoreError::Decode(key, err))
    }

    /// Reads only the stored `content_sha256` metadata of a lookup with a
    /// HEAD request. `None` when the object does not exist; `Some(None)`
    /// when it exists without the metadata (a legacy upload).
    pub async fn head_pypi_lookup_hash(
        &self,
        channel: Channel,
        pypi_name: &str,
    ) -> Result<Option<Option<String>>, StoreError> {
        Ok(self
            .store
            .head_metadata(&Self::lookup_key(channel, pypi_name))
            .await?
            .map(|metadata| metadata.content_sha256))
    }

    /// Lists the PyPI names that currently have a lookup stored for the
    /// channel.
    pub async fn list_pypi_lookup_names(
        &self,
        channel: Channel,
    ) -> Result<Vec<String>, StoreError> {
        let prefix = Self::lookup_prefix(channel);
        let keys = self.store.list(&prefix).await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| {
                key.strip_prefix(&prefix)
                    .and_then(|name| name.strip_suffix(".json"))
                    .map(ToOwned::to_owned)
            })
            .collect())
    }

    /// Deletes the lookup of a PyPI name.
    pub async fn delete_pypi_lookup(
        &self,
        channel: Channel,
        pypi_name: &str,
    ) -> Result<(), StoreError> {
        self.store
            .delete(&Self::lookup_key(channel, pypi_name))
            .await
    }
}

#[cfg(test)]
mod test {
    use indexmap::IndexMap;

    use crate::InMemoryStore;

    use super::*;

    fn gateway() -> (StoreGateway, InMemoryStore) {
        let store = InMemoryStore::new();
        (StoreGateway::new(Arc::new(store.clone())), store)
    }

    fn entry() -> MappingEntry {
        MappingEntry::new(
            "numpy",
            "numpy-1.26.4-py311h64a7726_0.conda",
            IndexMap::from([("numpy".to_owned(), "1.26.4".to_owned())]),
            None,
        )
    }

    #[tokio::test]
    async fn test_index_roundtrip() {
        let (gateway, store) = gateway();

        assert!(gateway.get_index(Channel::CondaForge).await.unwrap().is_none());

        let mut index = IndexMapping::new();
        index.insert("a".repeat(64), entry());
        gateway.put_index(Channel::CondaForge, &index).await.unwrap();

        assert_eq!(store.keys(), vec!["hash-v0/conda-forge/index.json"]);
        assert_eq!(
            gateway.get_index(Channel::CondaForge).await.unwrap().unwrap(),
            index
        );
    }

    #[tokio::test]
    async fn test_mapping_key_layout() {
        let (gateway, store) = gateway();
        let sha = "a".repeat(64);

        gateway.put_mapping(&sha, &entry()).await.unwrap();
        assert_eq!(store.keys(), vec![format!("hash-v0/{sha}")]);

        assert_eq!(gateway.get_mapping(&sha).await.unwrap().unwrap(), entry());
        gateway.delete_hash(&sha).await.unwrap();
        assert!(gateway.get_mapping(&sha).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lookup_metadata_and_listing() {
        let (gateway, _) = gateway();

        gateway
            .put_pypi_lookup(
                Channel::CondaForge,
                "numpy",
                Bytes::from_static(b"{}"),
                "cafe".to_owned(),
            )
            .await
            .unwrap();

        assert_eq!(
            gateway
                .head_pypi_lookup_hash(Channel::CondaForge, "numpy")
                .await
                .unwrap(),
            Some(Some("cafe".to_owned()))
        );
        assert_eq!(
            gateway
                .head_pypi_lookup_hash(Channel::CondaForge, "missing")
                .await
                .unwrap(),
            None
        );
        assert_eq!(
            gateway
                .list_pypi_lookup_names(Channel::CondaForge)
                .await
                .unwrap(),
            vec!["numpy"]
        );
        // other channels see nothing
        assert!(gateway
            .list_pypi_lookup_names(Channel::Bioconda)
            .await
            .unwrap()
            .is_empty());

        gateway
            .delete_pypi_lookup(Channel::CondaForge, "numpy")
            .await
            .unwrap();
        assert!(gateway
            .get_pypi_lookup(Channel::CondaForge, "numpy")
            .await
            .unwrap()
            .is_none());
    }
}
