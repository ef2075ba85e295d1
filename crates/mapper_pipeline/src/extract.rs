//! Extraction of a [`MappingEntry`] from a parsed artifact.
//!
//! The evidence for "this conda artifact ships PyPI distribution X" is the
//! presence of a `X-<version>.dist-info/METADATA` or
//! `X-<version>.egg-info/PKG-INFO` path in the artifact's file list. The
//! recipe's source URLs additionally tell whether the package was built from
//! a PyPI index or straight from an upstream repository.

use std::path::Path;
use std::sync::LazyLock;

use indexmap::IndexMap;
use mapper_streaming::{ArtifactInfo, LenientValue};
use mapper_types::{
    pypi::{clean_pypi_version, normalize_pypi_name},
    MappingEntry,
};
use regex::Regex;

static DIST_INFO_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^/]+)-(\d+[^/]*)\.dist-info/METADATA").expect("a valid regex"));

static EGG_INFO_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^/]+?)-(\d+[^/]*)\.egg-info/PKG-INFO").expect("a valid regex"));

/// Source URL prefixes that identify a build from a PyPI index. Anything else
/// counts as a direct URL.
const PYPI_INDEX_PREFIXES: [&str; 3] = [
    "https://pypi.io/packages/",
    "https://pypi.org/packages/",
    "https://pypi.python.org/packages/",
];

/// Scans the artifact's file list for dist-info/egg-info markers and returns
/// normalized name -> cleaned version, in scan order. When the same name
/// shows up twice with different versions the later occurrence wins.
pub fn pypi_names_and_versions(files: &[String]) -> IndexMap<String, String> {
    let mut names_and_versions = IndexMap::new();

    for file in files {
        // packages like setuptools vendor other distributions, e.g.
        // site-packages/setuptools/_vendor/zipp-3.19.2.dist-info; those are
        // not provided by the artifact
        let path = Path::new(file);
        if path.components().any(|component| {
            matches!(component.as_os_str().to_str(), Some("_vendor" | "_vendored"))
        }) {
            continue;
        }

        let Some(captures) = DIST_INFO_PATTERN
            .captures(file)
            .or_else(|| EGG_INFO_PATTERN.captures(file))
        else {
            continue;
        };

        let name = &captures[1];
        if name.is_empty() {
            continue;
        }

        names_and_versions.insert(
            normalize_pypi_name(name),
            clean_pypi_version(&captures[2]),
        );
    }

    names_and_versions
}

/// Pulls the source URLs out of the rendered recipe. A list-valued `source`
/// contributes its first element; the element's `url` may be a string or a
/// list of strings.
fn source_urls(recipe: &LenientValue) -> Option<Vec<String>> {
    let source = recipe.get("source")?;
    let element = match source {
        LenientValue::Sequence(elements) => elements.first()?,
        other => other,
    };
    element.get("url")?.as_string_list().filter(|urls| !urls.is_empty())
}

/// Whether the URLs point anywhere other than a PyPI index.
fn is_direct_url(urls: &[String]) -> bool {
    !urls.iter().all(|url| {
        PYPI_INDEX_PREFIXES
            .iter()
            .any(|prefix| url.starts_with(prefix))
    })
}

/// Computes the [`MappingEntry`] for an artifact: the PyPI distributions it
/// ships, and the direct source URLs when the recipe was not built from a
/// PyPI index.
pub fn extract_mapping(artifact: &ArtifactInfo, filename: &str) -> MappingEntry {
    let names_and_versions = pypi_names_and_versions(&artifact.files);

    let direct_url = source_urls(&artifact.rendered_recipe)
        .filter(|urls| is_direct_url(urls));

    MappingEntry::new(
        artifact.name.clone(),
        filename,
        names_and_versions,
        direct_url,
    )
}

#[cfg(test)]
mod test {
    use super::*;

    fn artifact(files: &[&str], recipe_yaml: &str) -> ArtifactInfo {
        let document = serde_json::json!({
            "name": "numpy",
            "version": "1.26.4",
            "index": {"name": "numpy", "version": "1.26.4"},
            "files": files,
        });
        let mut artifact = ArtifactInfo::from_mirror_json(
            serde_json::to_vec(&document).unwrap().as_slice(),
        )
        .unwrap();
        artifact.rendered_recipe = LenientValue::from_yaml_str(recipe_yaml).unwrap();
        artifact
    }

    #[test]
    fn test_dist_info_scan() {
        let names = pypi_names_and_versions(&[
            "site-packages/numpy-1.26.4.dist-info/METADATA".to_owned(),
            "site-packages/numpy/core/umath.py".to_owned(),
        ]);
        assert_eq!(names.len(), 1);
        assert_eq!(names["numpy"], "1.26.4");
    }

    #[test]
    fn test_egg_info_scan_strips_python_tag() {
        let names = pypi_names_and_versions(&[
            "lib/python3.11/site-packages/six-1.16.0-py3.11.egg-info/PKG-INFO".to_owned(),
        ]);
        assert_eq!(names["six"], "1.16.0");
    }

    #[test]
    fn test_vendored_distributions_are_skipped() {
        let names = pypi_names_and_versions(&[
            "site-packages/setuptools-68.0.0.dist-info/METADATA".to_owned(),
            "site-packages/setuptools/_vendor/zipp-3.19.2.dist-info/METADATA".to_owned(),
            "site-packages/pip/_vendored/rich-13.0.0.dist-info/METADATA".to_owned(),
        ]);
        assert_eq!(names.keys().collect::<Vec<_>>(), vec!["setuptools"]);
    }

    #[test]
    fn test_duplicate_name_later_version_wins() {
        let names = pypi_names_and_versions(&[
            "a/foo-1.0.dist-info/METADATA".to_owned(),
            "b/foo-2.0.dist-info/METADATA".to_owned(),
        ]);
        assert_eq!(names["foo"], "2.0");
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn test_names_are_normalized() {
        let names = pypi_names_and_versions(&[
            "site-packages/Flask_SQLAlchemy-3.1.1.dist-info/METADATA".to_owned(),
        ]);
        assert_eq!(names.keys().collect::<Vec<_>>(), vec!["flask-sqlalchemy"]);
    }

    #[test]
    fn test_direct_url_for_github_source() {
        let artifact = artifact(
            &["site-packages/foo-1.0.dist-info/METADATA"],
            "source:\n  url: https://github.com/foo/bar/archive/v1.tar.gz\n",
        );
        let entry = extract_mapping(&artifact, "foo-1.0-0.conda");

        assert_eq!(
            entry.direct_url.as_deref(),
            Some(&["https://github.com/foo/bar/archive/v1.tar.gz".to_owned()][..])
        );
        assert_eq!(
            entry.pypi_normalized_names.as_deref(),
            Some(&["foo".to_owned()][..])
        );
    }

    #[test]
    fn test_no_direct_url_for_pypi_source() {
        let artifact = artifact(
            &["site-packages/foo-1.0.dist-info/METADATA"],
            "source:\n  url: https://pypi.org/packages/source/f/foo/foo-1.0.tar.gz\n",
        );
        let entry = extract_mapping(&artifact, "foo-1.0-0.conda");
        assert_eq!(entry.direct_url, None);
    }

    #[test]
    fn test_direct_url_uses_first_source_element() {
        let artifact = artifact(
            &[],
            r#"
source:
  - url: https://example.com/foo-1.0.tar.gz
  - url: https://pypi.org/packages/source/f/foo/foo-1.0.tar.gz
"#,
        );
        let entry = extract_mapping(&artifact, "foo-1.0-0.conda");
        assert_eq!(
            entry.direct_url.as_deref(),
            Some(&["https://example.com/foo-1.0.tar.gz".to_owned()][..])
        );
    }

    #[test]
    fn test_mixed_urls_count_as_direct() {
        let artifact = artifact(
            &[],
            r#"
source:
  url:
    - https://pypi.org/packages/source/f/foo/foo-1.0.tar.gz
    - https://example.com/patches.tar.gz
"#,
        );
        let entry = extract_mapping(&artifact, "foo-1.0-0.conda");
        assert_eq!(entry.direct_url.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn test_entry_without_pypi_evidence() {
        let artifact = artifact(&["lib/libz.so"], "{}");
        let entry = extract_mapping(&artifact, "zlib-1.2.8-3.tar.bz2");

        assert_eq!(entry.conda_name, "numpy");
        assert_eq!(entry.package_name, "zlib-1.2.8-3.tar.bz2");
        assert_eq!(entry.pypi_normalized_names, None);
        assert_eq!(entry.versions, None);
    }

    #[test]
    fn test_source_without_url() {
        let artifact = artifact(&[], "source:\n  git: https://github.com/foo/bar.git\n");
        let entry = extract_mapping(&artifact, "foo-1.0-0.conda");
        assert_eq!(entry.direct_url, None);
    }
}
