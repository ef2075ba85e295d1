use bytes::Bytes;

/// User-visible metadata attached to a stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Lowercase hex SHA256 of the object body, attached by the incremental
    /// uploader so later runs can compare content with a HEAD request.
    pub content_sha256: Option<String>,
}

/// An error that can occur while talking to the object store.
///
/// Not-found is deliberately absent: reads return `Ok(None)` so callers can
/// treat a missing object as an ordinary state instead of an error.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying client failed.
    #[error("object store request failed for '{key}'")]
    Backend {
        /// The key the request addressed.
        key: String,
        /// The underlying client error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A stored object could not be decoded into its typed representation.
    #[error("could not decode the object at '{0}'")]
    Decode(String, #[source] serde_json::Error),

    /// A typed object could not be serialized for upload.
    #[error("could not encode the object for '{0}'")]
    Encode(String, #[source] serde_json::Error),
}

/// The contract of the S3-compatible bucket that durably owns the mapping.
///
/// Implementations must make every write idempotent: the pipeline retries
/// large writes and may re-upload the same object across runs. All methods
/// are safe to call concurrently; production implementations are expected to
/// pool at least 50 connections.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Reads an object. `Ok(None)` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    /// Writes an object, replacing any previous content and metadata.
    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        metadata: ObjectMetadata,
    ) -> Result<(), StoreError>;

    /// Reads only the metadata of an object. `Ok(None)` when the key does
    /// not exist.
    async fn head_metadata(&self, key: &str) -> Result<Option<ObjectMetadata>, StoreError>;

    /// Lists all keys under a prefix.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Deletes an object. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}
