use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// The per-subdir catalog listing every artifact of a channel.
///
/// Only the fields the mapping pipeline consumes are modeled; everything else
/// in the upstream file is ignored on deserialization.
#[derive(Debug, Default, Deserialize, Serialize, Eq, PartialEq, Clone)]
pub struct RepoData {
    /// The channel information contained in the repodata.json file.
    pub info: Option<ChannelInfo>,

    /// The tar.bz2 packages contained in the repodata.json file.
    #[serde(default)]
    pub packages: IndexMap<String, PackageRecord>,

    /// The conda packages contained in the repodata.json file (under a
    /// different key for backwards compatibility with previous conda
    /// versions).
    #[serde(default, rename = "packages.conda")]
    pub conda_packages: IndexMap<String, PackageRecord>,

    /// The version of the repodata format.
    #[serde(rename = "repodata_version")]
    pub version: Option<u64>,
}

impl RepoData {
    /// Returns the legacy and new package sections merged into a single
    /// filename keyed map. When a filename occurs in both sections the
    /// `.conda` record wins.
    pub fn merged_records(&self) -> IndexMap<String, PackageRecord> {
        let mut records = self.packages.clone();
        for (filename, record) in &self.conda_packages {
            records.insert(filename.clone(), record.clone());
        }
        records
    }
}

/// Information about subdirectory of channel in the conda [`RepoData`].
#[derive(Debug, Deserialize, Serialize, Eq, PartialEq, Clone)]
pub struct ChannelInfo {
    /// The channel's subdirectory.
    pub subdir: Option<String>,
}

/// A single record in the conda repodata. A single record refers to a single
/// binary distribution of a package on a conda channel.
#[derive(Debug, Deserialize, Serialize, Eq, PartialEq, Clone)]
pub struct PackageRecord {
    /// The name of the package.
    pub name: String,

    /// The version of the package.
    pub version: String,

    /// The build string of the package.
    pub build: String,

    /// The build number of the package.
    #[serde(default)]
    pub build_number: u64,

    /// Specification of packages this package depends on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<String>,

    /// Optionally a SHA256 hash of the package archive. Records without it
    /// cannot be keyed into the index and are skipped by the producer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,

    /// Optionally an MD5 hash of the package archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,

    /// Optionally the size of the package archive in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    /// The subdirectory that contains this package.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdir: Option<String>,
}

/// The `channeldata.json` found at the root of a channel. It describes the
/// subdirs the channel contains and the packages stored in the channel.
#[derive(Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct ChannelData {
    /// Version of the format.
    #[serde(default)]
    pub channeldata_version: u32,

    /// A mapping of all packages in the channel.
    #[serde(default)]
    pub packages: HashMap<String, ChannelDataPackage>,

    /// The available subdirs for this channel. Not all channels fill this
    /// top-level field, the per-package `subdirs` are authoritative.
    #[serde(default)]
    pub subdirs: Vec<String>,
}

impl ChannelData {
    /// The union of every package's subdirs, sorted for reproducibility.
    pub fn all_subdirs(&self) -> Vec<String> {
        let mut subdirs: Vec<String> = self
            .packages
            .values()
            .flat_map(|package| package.subdirs.iter().cloned())
            .collect();
        subdirs.sort();
        subdirs.dedup();
        subdirs
    }
}

/// Information on a single package in a channel.
#[derive(Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
pub struct ChannelDataPackage {
    /// The subdirs the package is available for.
    #[serde(default)]
    pub subdirs: Vec<String>,

    /// The latest version of the package.
    #[serde(default)]
    pub version: Option<String>,
}

#[cfg(test)]
mod test {
    use super::*;

    const FAKE_REPO_DATA: &str = r#"{
        "info": { "subdir": "noarch" },
        "packages": {
            "six-1.16.0-pyhd3eb1b0_1.tar.bz2": {
                "name": "six",
                "version": "1.16.0",
                "build": "pyhd3eb1b0_1",
                "build_number": 1,
                "depends": ["python"],
                "sha256": "a1861e448e4a62b88dce47c95351bfbe7fc22451a73f89a09d782492540e0675"
            }
        },
        "packages.conda": {
            "asttokens-2.2.1-pyhd8ed1ab_0.conda": {
                "name": "asttokens",
                "version": "2.2.1",
                "build": "pyhd8ed1ab_0",
                "build_number": 0,
                "depends": ["python >=3.5", "six"],
                "license": "Apache-2.0",
                "sha256": "7ed530efddd47a96c11197906b4008405b90e3bc2f4e0df722a36e0e6103fd9c",
                "size": 27831,
                "subdir": "noarch",
                "timestamp": 1670264089059
            }
        },
        "repodata_version": 1
    }"#;

    #[test]
    fn test_parse_and_merge() {
        let repodata: RepoData = serde_json::from_str(FAKE_REPO_DATA).unwrap();
        assert_eq!(repodata.version, Some(1));

        let merged = repodata.merged_records();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged["six-1.16.0-pyhd3eb1b0_1.tar.bz2"].name, "six");
        assert_eq!(
            merged["asttokens-2.2.1-pyhd8ed1ab_0.conda"]
                .sha256
                .as_deref(),
            Some("7ed530efddd47a96c11197906b4008405b90e3bc2f4e0df722a36e0e6103fd9c")
        );
    }

    #[test]
    fn test_conda_section_wins_on_duplicate_filename() {
        let mut repodata: RepoData = serde_json::from_str(FAKE_REPO_DATA).unwrap();
        let mut duplicate = repodata.packages["six-1.16.0-pyhd3eb1b0_1.tar.bz2"].clone();
        duplicate.sha256 = Some("b".repeat(64));
        repodata
            .conda_packages
            .insert("six-1.16.0-pyhd3eb1b0_1.tar.bz2".to_owned(), duplicate);

        let merged = repodata.merged_records();
        assert_eq!(
            merged["six-1.16.0-pyhd3eb1b0_1.tar.bz2"].sha256.as_deref(),
            Some("b".repeat(64).as_str())
        );
    }

    #[test]
    fn test_channeldata_subdir_union() {
        let channel_data: ChannelData = serde_json::from_str(
            r#"{
                "channeldata_version": 1,
                "packages": {
                    "numpy": { "subdirs": ["linux-64", "osx-arm64"], "version": "1.26.4" },
                    "six": { "subdirs": ["noarch", "linux-64"] }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(
            channel_data.all_subdirs(),
            vec!["linux-64", "noarch", "osx-arm64"]
        );
    }
}
