#![deny(missing_docs)]

//! Data model for the conda <-> PyPI mapping pipeline.
//!
//! This crate defines the entities that flow through the pipeline: the closed
//! set of supported [`Channel`]s, conda archive naming ([`ArchiveType`],
//! [`ArchiveIdentifier`]), the repodata wire types, the per-artifact
//! [`MappingEntry`] and the per-channel [`IndexMapping`] it lives in, the
//! derived [`PackageRelation`] table with its PyPI lookups, and the yank
//! configuration.

mod archive;
mod channel;
mod mapping;
pub mod pypi;
mod relations;
mod repodata;
mod yank;

pub use archive::{ArchiveIdentifier, ArchiveType};
pub use channel::{Channel, Label, ParseChannelError, Subdir, DEFAULT_SUBDIRS};
pub use mapping::{IndexMapping, MappingEntry, PartialIndex};
pub use relations::{
    PackageRelation, ParseRelationsError, PyPIPackageLookup, RelationsTable,
    RelationsTableMetadata, LOOKUP_FORMAT_VERSION,
};
pub use repodata::{ChannelData, ChannelDataPackage, ChannelInfo, PackageRecord, RepoData};
pub use yank::{YankConfig, YankConfigError, YankedPackage};

/// Returns true if the string is a lowercase hex encoded SHA256 digest.
pub fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod test {
    use super::is_sha256_hex;

    #[test]
    fn test_is_sha256_hex() {
        assert!(is_sha256_hex(&"a".repeat(64)));
        assert!(is_sha256_hex(
            "7ed530efddd47a96c11197906b4008405b90e3bc2f4e0df722a36e0e6103fd9c"
        ));
        assert!(!is_sha256_hex(&"A".repeat(64)));
        assert!(!is_sha256_hex(&"a".repeat(63)));
        assert!(!is_sha256_hex("not-a-hash"));
    }
}
