use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// The PyPI-distribution evidence extracted from a single conda artifact.
///
/// Entries are keyed by the artifact's SHA256 inside an [`IndexMapping`].
/// `pypi_normalized_names` and `versions` are either both absent (no
/// dist-info or egg-info was found) or both present with identical key sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    /// The PEP 503 normalized names of the PyPI distributions found inside
    /// the artifact, in scan order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pypi_normalized_names: Option<Vec<String>>,

    /// The version of each distribution in `pypi_normalized_names`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versions: Option<IndexMap<String, String>>,

    /// The package name declared in the artifact's `index.json`.
    pub conda_name: String,

    /// The artifact filename, e.g. `numpy-1.26.4-py311h64a7726_0.conda`.
    pub package_name: String,

    /// Source URLs of the rendered recipe when the package was not built
    /// from a PyPI index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_url: Option<Vec<String>>,
}

impl MappingEntry {
    /// Creates an entry from the scanned name/version pairs. An empty map
    /// produces an entry without PyPI evidence.
    pub fn new(
        conda_name: impl Into<String>,
        package_name: impl Into<String>,
        names_and_versions: IndexMap<String, String>,
        direct_url: Option<Vec<String>>,
    ) -> Self {
        let (pypi_normalized_names, versions) = if names_and_versions.is_empty() {
            (None, None)
        } else {
            (
                Some(names_and_versions.keys().cloned().collect()),
                Some(names_and_versions),
            )
        };
        Self {
            pypi_normalized_names,
            versions,
            conda_name: conda_name.into(),
            package_name: package_name.into(),
            direct_url,
        }
    }

    /// Whether any PyPI distribution was found inside the artifact.
    pub fn has_pypi_names(&self) -> bool {
        self.pypi_normalized_names
            .as_ref()
            .is_some_and(|names| !names.is_empty())
    }

    /// Restores the names/versions invariant on an entry decoded from the
    /// wire: a name without a version is dropped with a warning, a version
    /// without a name likewise, and empty collections collapse to `None`.
    pub fn enforce_invariant(&mut self) {
        let names = self.pypi_normalized_names.take().unwrap_or_default();
        let mut versions = self.versions.take().unwrap_or_default();

        let mut kept_names = Vec::with_capacity(names.len());
        for name in names {
            if versions.contains_key(&name) {
                kept_names.push(name);
            } else {
                tracing::warn!(
                    "dropping pypi name '{name}' of {}: no version recorded for it",
                    self.package_name
                );
            }
        }

        let stray_versions: Vec<String> = versions
            .keys()
            .filter(|key| !kept_names.contains(*key))
            .cloned()
            .collect();
        for key in stray_versions {
            tracing::warn!(
                "dropping version entry '{key}' of {}: not listed as a pypi name",
                self.package_name
            );
            versions.shift_remove(&key);
        }

        if kept_names.is_empty() {
            self.pypi_normalized_names = None;
            self.versions = None;
        } else {
            self.pypi_normalized_names = Some(kept_names);
            self.versions = Some(versions);
        }
    }
}

/// Per-channel mapping from artifact SHA256 to [`MappingEntry`].
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexMapping {
    root: IndexMap<String, MappingEntry>,
}

/// The same structure as [`IndexMapping`], scoped to a single
/// `subdir@letter` shard.
pub type PartialIndex = IndexMapping;

impl IndexMapping {
    /// Creates an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a mapping from JSON bytes and enforces the entry invariant on
    /// every decoded entry.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let mut mapping: IndexMapping = serde_json::from_slice(bytes)?;
        for entry in mapping.root.values_mut() {
            entry.enforce_invariant();
        }
        Ok(mapping)
    }

    /// Serializes the mapping to JSON bytes.
    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Returns the entry stored for the given SHA256, if any.
    pub fn get(&self, sha256: &str) -> Option<&MappingEntry> {
        self.root.get(sha256)
    }

    /// Whether the given SHA256 is present.
    pub fn contains(&self, sha256: &str) -> bool {
        self.root.contains_key(sha256)
    }

    /// Inserts an entry, replacing any previous entry stored for the hash.
    pub fn insert(&mut self, sha256: impl Into<String>, entry: MappingEntry) {
        self.root.insert(sha256.into(), entry);
    }

    /// Removes the entry stored for the given SHA256.
    pub fn remove(&mut self, sha256: &str) -> Option<MappingEntry> {
        self.root.shift_remove(sha256)
    }

    /// Overlays every entry of `other` onto this mapping. Last writer wins
    /// per hash; shards are keyed disjointly so merge order is irrelevant
    /// across shards.
    pub fn merge(&mut self, other: IndexMapping) {
        for (sha256, entry) in other.root {
            self.root.insert(sha256, entry);
        }
    }

    /// The number of entries in the mapping.
    pub fn len(&self) -> usize {
        self.root.len()
    }

    /// Whether the mapping holds no entries.
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Iterates over `(sha256, entry)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &MappingEntry)> {
        self.root.iter()
    }
}

impl FromIterator<(String, MappingEntry)> for IndexMapping {
    fn from_iter<T: IntoIterator<Item = (String, MappingEntry)>>(iter: T) -> Self {
        Self {
            root: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for IndexMapping {
    type Item = (String, MappingEntry);
    type IntoIter = indexmap::map::IntoIter<String, MappingEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.root.into_iter()
    }
}

#[cfg(test)]
mod test {
    use indexmap::IndexMap;

    use super::*;

    fn numpy_entry() -> MappingEntry {
        MappingEntry::new(
            "numpy",
            "numpy-1.26.4-py311h64a7726_0.conda",
            IndexMap::from([("numpy".to_owned(), "1.26.4".to_owned())]),
            None,
        )
    }

    #[test]
    fn test_new_with_names() {
        let entry = numpy_entry();
        assert_eq!(
            entry.pypi_normalized_names.as_deref(),
            Some(&["numpy".to_owned()][..])
        );
        assert_eq!(entry.versions.as_ref().unwrap()["numpy"], "1.26.4");
        assert!(entry.has_pypi_names());
    }

    #[test]
    fn test_new_without_names() {
        let entry = MappingEntry::new("zlib", "zlib-1.2.8-3.tar.bz2", IndexMap::new(), None);
        assert_eq!(entry.pypi_normalized_names, None);
        assert_eq!(entry.versions, None);
        assert!(!entry.has_pypi_names());
    }

    #[test]
    fn test_absent_fields_are_not_serialized() {
        let entry = MappingEntry::new("zlib", "zlib-1.2.8-3.tar.bz2", IndexMap::new(), None);
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(
            json,
            r#"{"conda_name":"zlib","package_name":"zlib-1.2.8-3.tar.bz2"}"#
        );
    }

    #[test]
    fn test_enforce_invariant_drops_unversioned_name() {
        let mut entry = numpy_entry();
        entry
            .pypi_normalized_names
            .as_mut()
            .unwrap()
            .push("stray".to_owned());

        entry.enforce_invariant();
        assert_eq!(
            entry.pypi_normalized_names.as_deref(),
            Some(&["numpy".to_owned()][..])
        );
    }

    #[test]
    fn test_enforce_invariant_collapses_to_none() {
        let mut entry = numpy_entry();
        entry.versions.as_mut().unwrap().shift_remove("numpy");

        entry.enforce_invariant();
        assert_eq!(entry.pypi_normalized_names, None);
        assert_eq!(entry.versions, None);
    }

    #[test]
    fn test_index_roundtrip_preserves_entries() {
        let mut index = IndexMapping::new();
        index.insert("a".repeat(64), numpy_entry());
        index.insert(
            "b".repeat(64),
            MappingEntry::new("zlib", "zlib-1.2.8-3.tar.bz2", IndexMap::new(), None),
        );

        let decoded = IndexMapping::from_slice(&index.to_vec().unwrap()).unwrap();
        assert_eq!(decoded, index);
    }

    #[test]
    fn test_merge_last_writer_wins() {
        let mut canonical = IndexMapping::new();
        canonical.insert("a".repeat(64), numpy_entry());

        let mut partial = IndexMapping::new();
        let mut updated = numpy_entry();
        updated.conda_name = "numpy-base".to_owned();
        partial.insert("a".repeat(64), updated.clone());

        canonical.merge(partial);
        assert_eq!(canonical.len(), 1);
        assert_eq!(canonical.get(&"a".repeat(64)).unwrap().conda_name, "numpy-base");
    }
}
