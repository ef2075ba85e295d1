use std::io::{Read, Write};

use chrono::{DateTime, Utc};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{Channel, IndexMapping, MappingEntry};

/// The format version stamped on every derived lookup and on the relations
/// metadata object.
pub const LOOKUP_FORMAT_VERSION: &str = "1.0";

/// A single relation stating that a conda package includes a PyPI
/// distribution at a specific version.
///
/// Multiple relations form the complete mapping table; both directions of the
/// mapping are derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRelation {
    /// The conda package name declared inside the artifact.
    pub conda_name: String,

    /// The artifact filename.
    pub conda_filename: String,

    /// SHA256 hash of the conda artifact, lowercase hex.
    pub conda_hash: String,

    /// The PEP 503 normalized PyPI distribution name.
    pub pypi_name: String,

    /// The version of the PyPI distribution.
    pub pypi_version: String,

    /// The channel the artifact belongs to.
    pub channel: String,

    /// Direct source URLs when the package was not built from a PyPI index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_url: Option<Vec<String>>,
}

impl PackageRelation {
    fn validate(&self) -> Result<(), ParseRelationsError> {
        if self.conda_hash.is_empty()
            || !self
                .conda_hash
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            return Err(ParseRelationsError::InvalidHash(self.conda_hash.clone()));
        }
        Ok(())
    }
}

/// An error that can occur when decoding a serialized relations table.
#[derive(Debug, thiserror::Error)]
pub enum ParseRelationsError {
    /// A line could not be decoded as a relation.
    #[error("invalid relation record")]
    Json(#[from] serde_json::Error),

    /// The gzip stream or the line framing was broken.
    #[error("could not read the relations stream")]
    Io(#[from] std::io::Error),

    /// A relation carried a hash that is not lowercase hex.
    #[error("hash must be a lowercase hex string, got: {0}")]
    InvalidHash(String),
}

/// The ordered collection of [`PackageRelation`] rows for one channel,
/// serialized as gzipped JSON Lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationsTable {
    /// The channel all rows belong to.
    pub channel: Channel,

    /// The rows, in index iteration order.
    pub relations: Vec<PackageRelation>,
}

impl RelationsTable {
    /// Creates an empty table for a channel.
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            relations: Vec::new(),
        }
    }

    /// Denormalizes a per-channel index into relation rows: one row per
    /// `(sha256, pypi_name)` pair. Entries without PyPI names contribute no
    /// rows; a name without a recorded version is dropped with a warning.
    pub fn from_index(index: &IndexMapping, channel: Channel) -> Self {
        let mut table = Self::new(channel);
        for (conda_hash, entry) in index.iter() {
            table
                .relations
                .extend(entry_to_relations(conda_hash, entry, channel));
        }
        table
    }

    /// Serializes the table as gzip compressed JSON Lines.
    pub fn to_jsonl_gz(&self) -> Result<Vec<u8>, ParseRelationsError> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        for relation in &self.relations {
            serde_json::to_writer(&mut encoder, relation)?;
            encoder.write_all(b"\n")?;
        }
        Ok(encoder.finish()?)
    }

    /// Parses a table from gzip compressed JSON Lines, validating every row.
    pub fn from_jsonl_gz(bytes: &[u8], channel: Channel) -> Result<Self, ParseRelationsError> {
        let mut decoder = GzDecoder::new(bytes);
        let mut content = String::new();
        decoder.read_to_string(&mut content)?;

        let mut table = Self::new(channel);
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let relation: PackageRelation = serde_json::from_str(line)?;
            relation.validate()?;
            table.relations.push(relation);
        }
        Ok(table)
    }

    /// Generates the metadata object describing this table.
    pub fn metadata(&self) -> RelationsTableMetadata {
        let unique_conda: std::collections::HashSet<(&str, &str)> = self
            .relations
            .iter()
            .map(|relation| (relation.conda_name.as_str(), relation.conda_hash.as_str()))
            .collect();
        let unique_pypi: std::collections::HashSet<&str> = self
            .relations
            .iter()
            .map(|relation| relation.pypi_name.as_str())
            .collect();

        RelationsTableMetadata {
            format_version: LOOKUP_FORMAT_VERSION.to_owned(),
            channel: self.channel.to_string(),
            generated_at: Utc::now(),
            total_relations: self.relations.len(),
            unique_conda_packages: unique_conda.len(),
            unique_pypi_packages: unique_pypi.len(),
            description: "Conda to PyPI package relations table".to_owned(),
        }
    }
}

fn entry_to_relations(
    conda_hash: &str,
    entry: &MappingEntry,
    channel: Channel,
) -> Vec<PackageRelation> {
    let Some(names) = entry.pypi_normalized_names.as_ref() else {
        return Vec::new();
    };

    let mut relations = Vec::with_capacity(names.len());
    for pypi_name in names {
        let Some(pypi_version) = entry
            .versions
            .as_ref()
            .and_then(|versions| versions.get(pypi_name))
        else {
            tracing::warn!(
                "no version found for {pypi_name} in {}",
                entry.package_name
            );
            continue;
        };

        relations.push(PackageRelation {
            conda_name: entry.conda_name.clone(),
            conda_filename: entry.package_name.clone(),
            conda_hash: conda_hash.to_owned(),
            pypi_name: pypi_name.clone(),
            pypi_version: pypi_version.clone(),
            channel: channel.to_string(),
            direct_url: entry.direct_url.clone(),
        });
    }
    relations
}

/// Metadata stored next to the relations table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationsTableMetadata {
    /// Table format version.
    pub format_version: String,

    /// The channel the table describes.
    pub channel: String,

    /// When the table was generated.
    pub generated_at: DateTime<Utc>,

    /// Number of rows in the table.
    pub total_relations: usize,

    /// Number of distinct `(conda_name, conda_hash)` pairs.
    pub unique_conda_packages: usize,

    /// Number of distinct PyPI names.
    pub unique_pypi_packages: usize,

    /// Human readable description of the object.
    pub description: String,
}

/// The derived per-PyPI-name view served at
/// `pypi-to-conda-v1/{channel}/{pypi_name}.json`.
///
/// For every PyPI version a single conda package name is kept: the best match
/// among all providers of that `(pypi_name, pypi_version)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PyPIPackageLookup {
    /// Lookup format version.
    pub format_version: String,

    /// The channel the lookup was derived for.
    pub channel: String,

    /// The PEP 503 normalized PyPI name.
    pub pypi_name: String,

    /// Map of PyPI version to the conda package name that provides it.
    pub conda_versions: IndexMap<String, String>,
}

impl PyPIPackageLookup {
    /// Creates a lookup with the current format version.
    pub fn new(channel: Channel, pypi_name: impl Into<String>) -> Self {
        Self {
            format_version: LOOKUP_FORMAT_VERSION.to_owned(),
            channel: channel.to_string(),
            pypi_name: pypi_name.into(),
            conda_versions: IndexMap::new(),
        }
    }

    /// Serializes the lookup to the JSON bytes that get uploaded.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
