#![deny(missing_docs)]

//! Typed access to the object store that durably owns the mapping.
//!
//! The store itself is abstracted behind the [`ObjectStore`] trait; the
//! concrete S3/R2 client is provided by the embedding application. This crate
//! contributes the typed [`StoreGateway`] over the storage layout, an
//! [`InMemoryStore`] used by tests and offline pipelines, and the
//! hash-compared incremental uploader for the derived PyPI lookups.

mod gateway;
pub mod incremental;
mod memory;
mod store;

pub use gateway::StoreGateway;
pub use incremental::{upload_pypi_lookups, UploadOptions, UploadSummary};
pub use memory::InMemoryStore;
pub use store::{ObjectMetadata, ObjectStore, StoreError};

use sha2::{Digest, Sha256};

/// Computes the lowercase hex SHA256 of the given bytes, the format stored in
/// the `content_sha256` object metadata.
pub fn content_sha256(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod test {
    use super::content_sha256;

    #[test]
    fn test_content_sha256() {
        assert_eq!(
            content_sha256(b"Hello, world!"),
            "315f5bdb76d078c43b8ac0064e4a0164612b1fce77c869345bfc94c75894edd3"
        );
    }
}
