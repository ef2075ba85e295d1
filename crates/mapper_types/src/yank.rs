use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Channel, Subdir};

/// A single yank rule. An artifact is suppressed when its declared name, its
/// subdir and its channel all match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YankedPackage {
    /// The conda name declared inside the artifact's `index.json`.
    pub name: String,

    /// The subdirs this rule applies to.
    pub platforms: Vec<String>,

    /// The channels this rule applies to.
    pub channels: Vec<Channel>,
}

/// Administrative suppression list for known-bad extractions.
///
/// Some feedstocks ship a platform variant that does not contain the
/// `dist-info`/`egg-info` evidence present on other platforms. Storing a
/// mapping for those hashes would hide the package from consumers that fall
/// back to the name-based compressed mapping, so they are kept out of the
/// index entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct YankConfig {
    /// The yank rules.
    pub packages: Vec<YankedPackage>,
}

/// An error that can occur while loading the yank configuration.
#[derive(Debug, thiserror::Error)]
pub enum YankConfigError {
    /// The configuration file could not be read.
    #[error("could not read yank config at {0}")]
    Io(String, #[source] std::io::Error),

    /// The configuration file is not valid YAML of the expected shape.
    #[error("could not parse yank config at {0}")]
    Parse(String, #[source] serde_yaml::Error),
}

impl YankConfig {
    /// Loads the configuration from a YAML file.
    pub fn from_path(path: &Path) -> Result<Self, YankConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| YankConfigError::Io(path.display().to_string(), err))?;
        serde_yaml::from_str(&content)
            .map_err(|err| YankConfigError::Parse(path.display().to_string(), err))
    }

    /// Whether the artifact with the given declared name must be suppressed.
    pub fn should_yank(&self, artifact_name: &str, subdir: &Subdir, channel: Channel) -> bool {
        self.packages.iter().any(|package| {
            package.name == artifact_name
                && package.platforms.iter().any(|p| p == subdir.as_str())
                && package.channels.contains(&channel)
        })
    }

    /// The names of all yanked packages, used by the remover to prefilter
    /// repodata before fetching artifacts.
    pub fn names(&self) -> Vec<&str> {
        self.packages
            .iter()
            .map(|package| package.name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const YANK_YAML: &str = r#"
packages:
  - name: pyqt
    platforms:
      - osx-arm64
    channels:
      - conda-forge
"#;

    fn config() -> YankConfig {
        serde_yaml::from_str(YANK_YAML).unwrap()
    }

    #[test]
    fn test_should_yank_requires_all_three_matches() {
        let config = config();
        assert!(config.should_yank("pyqt", &Subdir::from("osx-arm64"), Channel::CondaForge));
        assert!(!config.should_yank("pyqt", &Subdir::from("linux-64"), Channel::CondaForge));
        assert!(!config.should_yank("pyqt", &Subdir::from("osx-arm64"), Channel::Bioconda));
        assert!(!config.should_yank("pyqt5-sip", &Subdir::from("osx-arm64"), Channel::CondaForge));
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("yank.yaml");
        std::fs::write(&path, YANK_YAML).unwrap();

        let config = YankConfig::from_path(&path).unwrap();
        assert_eq!(config.names(), vec!["pyqt"]);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(matches!(
            YankConfig::from_path(Path::new("/does/not/exist.yaml")),
            Err(YankConfigError::Io(..))
        ));
    }
}
