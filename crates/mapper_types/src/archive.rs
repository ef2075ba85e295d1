use std::{
    fmt::{Display, Formatter},
    path::Path,
};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Describes the type of a conda package archive.
#[derive(Copy, Clone, Debug, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveType {
    /// A file with the `.tar.bz2` extension.
    TarBz2,

    /// A file with the `.conda` extension.
    Conda,
}

impl ArchiveType {
    /// Returns the file extension for this archive type.
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveType::TarBz2 => ".tar.bz2",
            ArchiveType::Conda => ".conda",
        }
    }

    /// Split the given string into its filename and archive type, removing
    /// the extension.
    #[allow(clippy::manual_map)]
    pub fn split_str(path: &str) -> Option<(&str, ArchiveType)> {
        if let Some(path) = path.strip_suffix(".conda") {
            Some((path, ArchiveType::Conda))
        } else if let Some(path) = path.strip_suffix(".tar.bz2") {
            Some((path, ArchiveType::TarBz2))
        } else {
            None
        }
    }

    /// Tries to determine the type of archive from its filename.
    pub fn try_from(path: impl AsRef<Path>) -> Option<ArchiveType> {
        Self::split_str(path.as_ref().to_string_lossy().as_ref())
            .map(|(_, archive_type)| archive_type)
    }
}

/// A package archive identifier contains the `name`, `version`,
/// `build_string` and `archive_type` of a package archive. This information
/// can be derived from the filename of a package archive using
/// [`ArchiveIdentifier::try_from_filename`].
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ArchiveIdentifier {
    /// The name of the package.
    pub name: String,
    /// The version of the package.
    pub version: String,
    /// The build string of the package.
    pub build_string: String,
    /// The archive type of the package (tar.bz2 or conda).
    pub archive_type: ArchiveType,
}

impl ArchiveIdentifier {
    /// Converts the archive identifier back into a filename.
    pub fn to_file_name(&self) -> String {
        self.to_string()
    }

    /// Tries to convert the specified filename into an [`ArchiveIdentifier`].
    ///
    /// Conda archives are named `<name>-<version>-<build>.<ext>`. The name
    /// itself may contain dashes, so the filename is split from the right.
    pub fn try_from_filename(filename: &str) -> Option<Self> {
        let (filename_without_ext, archive_type) = ArchiveType::split_str(filename)?;

        let (build_string, version, name) =
            filename_without_ext.rsplitn(3, '-').next_tuple()?;

        Some(Self {
            name: name.to_owned(),
            version: version.to_owned(),
            build_string: build_string.to_owned(),
            archive_type,
        })
    }
}

impl Display for ArchiveIdentifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}-{}{}",
            &self.name,
            &self.version,
            &self.build_string,
            self.archive_type.extension()
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_archive_type() {
        assert_eq!(
            ArchiveType::split_str("my-package.conda"),
            Some(("my-package", ArchiveType::Conda))
        );
        assert_eq!(
            ArchiveType::split_str("my-package.tar.bz2"),
            Some(("my-package", ArchiveType::TarBz2))
        );
        assert_eq!(ArchiveType::split_str("my-package.zip"), None);
    }

    #[test]
    fn test_identifier_from_filename() {
        assert_eq!(
            ArchiveIdentifier::try_from_filename(
                "ros-noetic-rosbridge-suite-0.11.14-py39h6fdeb60_14.tar.bz2"
            ),
            Some(ArchiveIdentifier {
                name: String::from("ros-noetic-rosbridge-suite"),
                version: String::from("0.11.14"),
                build_string: String::from("py39h6fdeb60_14"),
                archive_type: ArchiveType::TarBz2
            })
        );

        assert_eq!(
            ArchiveIdentifier::try_from_filename("clangdev-9.0.1-cling_v0.9_hd1e6b3a_3.conda"),
            Some(ArchiveIdentifier {
                name: String::from("clangdev"),
                version: String::from("9.0.1"),
                build_string: String::from("cling_v0.9_hd1e6b3a_3"),
                archive_type: ArchiveType::Conda
            })
        );

        assert_eq!(ArchiveIdentifier::try_from_filename("too-few.conda"), None);
    }

    #[test]
    fn test_identifier_roundtrip() {
        let filename = "numpy-1.26.4-py311h64a7726_0.conda";
        assert_eq!(
            ArchiveIdentifier::try_from_filename(filename)
                .unwrap()
                .to_file_name(),
            filename
        );
    }
}
