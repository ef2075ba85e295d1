//! Assembly of [`ArtifactInfo`] from the `info/` section of an artifact.

use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use crate::{recipe::LenientValue, ExtractError};

/// File name suffixes that never carry dist-info evidence and only bloat the
/// file list.
const IGNORED_FILE_SUFFIXES: [&str; 2] = [".pyc", ".txt"];

/// Directory names inside `info/` whose contents are copies of the recipe
/// used for testing and licensing, not the recipe the artifact was built
/// from.
const IGNORED_INFO_DIRS: [&str; 3] = ["test", "tests", "licenses"];

/// The raw contents of the interesting members of an `info/` section.
#[derive(Debug, Default)]
pub struct InfoFiles {
    /// `info/index.json`.
    pub index: Option<String>,
    /// `info/about.json`.
    pub about: Option<String>,
    /// `info/paths.json`.
    pub paths: Option<String>,
    /// The legacy `info/files` member.
    pub files: Option<String>,
    /// `info/recipe/meta.yaml` or `info/recipe/recipe.yaml`.
    pub rendered_recipe: Option<String>,
    /// `info/recipe/meta.yaml.template`.
    pub raw_recipe: Option<String>,
    /// `info/recipe/conda_build_config.yaml`.
    pub conda_build_config: Option<String>,
}

impl InfoFiles {
    /// Collects the info members from a tar archive.
    ///
    /// With `stop_after_info` set the iteration stops at the first member
    /// outside `info/` once `index.json` has been seen, which allows a
    /// network-streamed `.tar.bz2` to be abandoned long before its payload.
    pub fn collect_from_tar(
        mut archive: tar::Archive<impl Read>,
        stop_after_info: bool,
    ) -> Result<Self, ExtractError> {
        let mut info = InfoFiles::default();

        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = entry.path()?.into_owned();

            if !path.starts_with("info") {
                if stop_after_info && info.index.is_some() {
                    break;
                }
                continue;
            }
            if is_ignored_info_path(&path) {
                continue;
            }

            let Some(slot) = info.slot_for(&path) else {
                continue;
            };

            let mut contents = String::new();
            entry.read_to_string(&mut contents)?;
            *slot = Some(contents);
        }

        Ok(info)
    }

    fn slot_for(&mut self, path: &Path) -> Option<&mut Option<String>> {
        match path.to_str()? {
            "info/index.json" => Some(&mut self.index),
            "info/about.json" => Some(&mut self.about),
            "info/paths.json" => Some(&mut self.paths),
            "info/files" => Some(&mut self.files),
            "info/recipe/meta.yaml" | "info/recipe/recipe.yaml" => Some(&mut self.rendered_recipe),
            "info/recipe/meta.yaml.template" => Some(&mut self.raw_recipe),
            "info/recipe/conda_build_config.yaml" => Some(&mut self.conda_build_config),
            _ => None,
        }
    }
}

fn is_ignored_info_path(path: &Path) -> bool {
    path.components()
        .filter_map(|component| component.as_os_str().to_str())
        .any(|component| IGNORED_INFO_DIRS.contains(&component))
}

/// The `info/index.json` fields the pipeline consumes.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct IndexJson {
    /// The lowercase name of the package.
    pub name: String,

    /// The version of the package.
    pub version: String,

    /// The build string of the package.
    #[serde(default)]
    pub build: Option<String>,

    /// The subdirectory that contains this package.
    #[serde(default)]
    pub subdir: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PathsJson {
    #[serde(default)]
    paths: Vec<PathsEntry>,
}

#[derive(Debug, Deserialize)]
struct PathsEntry {
    #[serde(rename = "_path")]
    path: String,
}

/// The parsed metadata of a single conda artifact.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactInfo {
    /// The package name declared in `index.json`.
    pub name: String,

    /// The package version declared in `index.json`.
    pub version: String,

    /// The parsed `index.json`.
    pub index: IndexJson,

    /// The parsed `about.json`, when present.
    #[serde(default)]
    pub about: Option<serde_json::Value>,

    /// The rendered recipe. Duplicate keys are tolerated, last wins.
    #[serde(default = "empty_mapping")]
    pub rendered_recipe: LenientValue,

    /// The unexpanded recipe template, when the artifact carries both the
    /// rendered and the template form.
    #[serde(default)]
    pub raw_recipe: Option<String>,

    /// The parsed `conda_build_config.yaml`, when present.
    #[serde(default)]
    pub conda_build_config: Option<LenientValue>,

    /// The paths contained in the artifact, from `paths.json` or the legacy
    /// `files` member, without `.pyc` and `.txt` entries.
    #[serde(default)]
    pub files: Vec<String>,
}

fn empty_mapping() -> LenientValue {
    LenientValue::Mapping(Default::default())
}

impl ArtifactInfo {
    /// Builds the artifact metadata from collected info members.
    ///
    /// `index.json` is the only required member; everything else degrades to
    /// an absent field.
    pub fn from_info_files(info: InfoFiles) -> Result<Self, ExtractError> {
        let index_content = info.index.ok_or(ExtractError::MissingComponent)?;
        let index: IndexJson = serde_json::from_str(&index_content).map_err(|err| {
            ExtractError::ArchiveMemberParseError("info/index.json".to_owned(), err)
        })?;

        let about = match info.about {
            Some(content) => Some(serde_json::from_str(&content).map_err(|err| {
                ExtractError::ArchiveMemberParseError("info/about.json".to_owned(), err)
            })?),
            None => None,
        };

        let files = match info.paths {
            Some(content) => {
                let paths: PathsJson = serde_json::from_str(&content).map_err(|err| {
                    ExtractError::ArchiveMemberParseError("info/paths.json".to_owned(), err)
                })?;
                paths.paths.into_iter().map(|entry| entry.path).collect()
            }
            None => info
                .files
                .as_deref()
                .unwrap_or_default()
                .lines()
                .map(|line| line.trim().to_owned())
                .filter(|line| !line.is_empty())
                .collect(),
        };
        let files = filter_artifact_files(files);

        let rendered_recipe = match info.rendered_recipe.as_deref() {
            Some(content) => LenientValue::from_yaml_str(content)?,
            None => empty_mapping(),
        };

        // the template is only interesting when a rendered form exists too
        let raw_recipe = match (&info.raw_recipe, info.rendered_recipe.is_some()) {
            (Some(template), true) => Some(template.clone()),
            _ => None,
        };

        let conda_build_config = match info.conda_build_config.as_deref() {
            Some(content) => Some(LenientValue::from_yaml_str(content)?),
            None => None,
        };

        Ok(Self {
            name: index.name.clone(),
            version: index.version.clone(),
            index,
            about,
            rendered_recipe,
            raw_recipe,
            conda_build_config,
            files,
        })
    }

    /// Parses the per-artifact JSON document served by the legacy metadata
    /// mirror, which stores the same fields pre-extracted.
    pub fn from_mirror_json(bytes: &[u8]) -> Result<Self, ExtractError> {
        let mut artifact: ArtifactInfo = serde_json::from_slice(bytes).map_err(|err| {
            ExtractError::ArchiveMemberParseError("mirror artifact document".to_owned(), err)
        })?;
        artifact.files = filter_artifact_files(std::mem::take(&mut artifact.files));
        Ok(artifact)
    }
}

fn filter_artifact_files(files: Vec<String>) -> Vec<String> {
    files
        .into_iter()
        .filter(|file| {
            !IGNORED_FILE_SUFFIXES
                .iter()
                .any(|suffix| file.ends_with(suffix))
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::tar_archive;

    const INDEX_JSON: &str =
        r#"{"name": "numpy", "version": "1.26.4", "build": "py311h64a7726_0", "subdir": "linux-64"}"#;

    #[test]
    fn test_collect_and_assemble() {
        let archive = tar_archive(&[
            ("info/index.json", INDEX_JSON),
            ("info/about.json", r#"{"license": "BSD-3-Clause"}"#),
            (
                "info/paths.json",
                r#"{"paths": [
                    {"_path": "site-packages/numpy-1.26.4.dist-info/METADATA"},
                    {"_path": "site-packages/numpy/__init__.pyc"},
                    {"_path": "site-packages/numpy/LICENSE.txt"}
                ]}"#,
            ),
            (
                "info/recipe/meta.yaml",
                "package:\n  name: numpy\nsource:\n  url: https://pypi.org/packages/source/n/numpy/numpy-1.26.4.tar.gz\n",
            ),
            ("info/recipe/meta.yaml.template", "package:\n  name: {{ name }}\n"),
            // copies under test dirs must not shadow the real recipe
            ("info/test/recipe/meta.yaml", "package:\n  name: wrong\n"),
        ]);

        let info = InfoFiles::collect_from_tar(archive, false).unwrap();
        let artifact = ArtifactInfo::from_info_files(info).unwrap();

        assert_eq!(artifact.name, "numpy");
        assert_eq!(artifact.version, "1.26.4");
        assert_eq!(
            artifact.files,
            vec!["site-packages/numpy-1.26.4.dist-info/METADATA"]
        );
        assert!(artifact.raw_recipe.is_some());
        assert_eq!(
            artifact
                .rendered_recipe
                .get("package")
                .and_then(|p| p.get("name"))
                .and_then(LenientValue::as_str),
            Some("numpy")
        );
    }

    #[test]
    fn test_legacy_files_member() {
        let archive = tar_archive(&[
            ("info/index.json", INDEX_JSON),
            (
                "info/files",
                "lib/libfoo.so\nsite-packages/foo-1.0.egg-info/PKG-INFO\ndoc/README.txt\n",
            ),
        ]);

        let info = InfoFiles::collect_from_tar(archive, false).unwrap();
        let artifact = ArtifactInfo::from_info_files(info).unwrap();

        assert_eq!(
            artifact.files,
            vec!["lib/libfoo.so", "site-packages/foo-1.0.egg-info/PKG-INFO"]
        );
        // no rendered recipe degrades to an empty mapping
        assert_eq!(artifact.rendered_recipe.get("source"), None);
    }

    #[test]
    fn test_missing_index_is_an_error() {
        let archive = tar_archive(&[("info/about.json", "{}")]);
        let info = InfoFiles::collect_from_tar(archive, false).unwrap();
        assert!(matches!(
            ArtifactInfo::from_info_files(info),
            Err(ExtractError::MissingComponent)
        ));
    }

    #[test]
    fn test_stop_after_info() {
        let archive = tar_archive(&[
            ("info/index.json", INDEX_JSON),
            ("lib/libnumpy.so", "not read"),
            ("info/about.json", "{}"),
        ]);

        let info = InfoFiles::collect_from_tar(archive, true).unwrap();
        // iteration stopped at the first payload member
        assert!(info.about.is_none());
        assert!(info.index.is_some());
    }

    #[test]
    fn test_mirror_document() {
        let document = format!(
            r#"{{
                "name": "numpy",
                "version": "1.26.4",
                "index": {INDEX_JSON},
                "about": {{"license": "BSD-3-Clause"}},
                "rendered_recipe": {{"source": {{"url": "https://example.com/numpy.tar.gz"}}}},
                "files": ["site-packages/numpy-1.26.4.dist-info/METADATA", "x.pyc"]
            }}"#
        );

        let artifact = ArtifactInfo::from_mirror_json(document.as_bytes()).unwrap();
        assert_eq!(artifact.name, "numpy");
        assert_eq!(
            artifact.files,
            vec!["site-packages/numpy-1.26.4.dist-info/METADATA"]
        );
        assert_eq!(
            artifact
                .rendered_recipe
                .get("source")
                .and_then(|s| s.get("url"))
                .and_then(LenientValue::as_str),
            Some("https://example.com/numpy.tar.gz")
        );
    }
}
