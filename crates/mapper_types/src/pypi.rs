//! PyPI name and version canonicalization.
//!
//! Distribution names found inside artifacts come in whatever casing and
//! separator style the upstream project used; the index only ever stores the
//! PEP 503 normalized form. Versions are cleaned up the same way the original
//! dist-info scanner does: strip python-tag suffixes, then canonicalize
//! through a real PEP 440 parse where possible.

use std::str::FromStr;

use pep440_rs::Version;
use regex::Regex;
use std::sync::LazyLock;

static NAME_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-_.]+").expect("a valid regex"));

/// Normalizes a distribution name according to PEP 503: lowercase, with any
/// run of `-`, `_` and `.` collapsed to a single `-`.
pub fn normalize_pypi_name(name: &str) -> String {
    NAME_SEPARATORS.replace_all(name, "-").to_lowercase()
}

/// Cleans a version string scraped from a `dist-info`/`egg-info` directory
/// name.
///
/// Eggs embed the python tag in the directory name (`1.16.0-py3.11`), so
/// everything from `-py` onwards is dropped first. The remainder is parsed as
/// a PEP 440 version and re-emitted in canonical form; when that fails and a
/// dash remains, the final dash-separated segment is dropped and the parse is
/// retried. If no parse succeeds the cleaned string is kept as-is.
pub fn clean_pypi_version(raw: &str) -> String {
    let mut version = match raw.find("-py") {
        Some(index) => &raw[..index],
        None => raw,
    };

    let mut parsed = Version::from_str(version).ok();
    if parsed.is_none() {
        if let Some(index) = version.rfind('-') {
            version = &version[..index];
            parsed = Version::from_str(version).ok();
        }
    }

    match parsed {
        Some(parsed) => parsed.to_string(),
        None => version.to_owned(),
    }
}
