#![deny(missing_docs)]

//! This crate provides the ability to retrieve a single conda artifact and
//! extract the PyPI-relevant metadata from its `info/` section.
//!
//! Four interchangeable backends are available (see [`backends`]): an OCI
//! registry mirror, a range-streamed reader that fetches only the tail of a
//! `.conda` archive, a full download, and a legacy per-artifact metadata
//! mirror. All of them produce the same [`ArtifactInfo`].

pub mod backends;
mod info;
pub mod read;
pub mod recipe;
pub mod seek;
#[cfg(test)]
pub(crate) mod test_utils;

pub use info::{ArtifactInfo, IndexJson, InfoFiles};
pub use recipe::LenientValue;

/// An error that can occur when retrieving or parsing an artifact.
#[derive(thiserror::Error, Debug)]
#[allow(missing_docs)]
pub enum ExtractError {
    #[error("an io error occurred")]
    IoError(#[from] std::io::Error),

    #[error("invalid zip archive")]
    ZipError(#[from] zip::result::ZipError),

    #[error("a component is missing from the conda archive")]
    MissingComponent,

    #[error("unsupported compression method")]
    UnsupportedCompressionMethod,

    #[error(transparent)]
    ReqwestError(reqwest_middleware::Error),

    #[error("could not parse {0}")]
    ArchiveMemberParseError(String, #[source] serde_json::Error),

    #[error("could not parse the recipe")]
    RecipeParseError(#[from] serde_yaml::Error),

    #[error("unsupported package archive format")]
    UnsupportedArchiveType,

    #[error("the task was cancelled")]
    Cancelled,
}

impl From<tokio::task::JoinError> for ExtractError {
    fn from(err: tokio::task::JoinError) -> Self {
        // Rethrow any panic
        if let Ok(panic) = err.try_into_panic() {
            std::panic::resume_unwind(panic);
        }

        // Otherwise the operation has been cancelled
        ExtractError::Cancelled
    }
}

impl From<reqwest::Error> for ExtractError {
    fn from(err: reqwest::Error) -> Self {
        ExtractError::ReqwestError(err.into())
    }
}

impl From<reqwest_middleware::Error> for ExtractError {
    fn from(err: reqwest_middleware::Error) -> Self {
        ExtractError::ReqwestError(err)
    }
}

impl ExtractError {
    /// Whether this error belongs to the known set of failure modes of the
    /// range-streamed backend on `.tar.bz2` archives that are fixed by
    /// retrying with a full download: YAML tokenizer failures and the
    /// decoder errors raised on short reads of a bzip2/tar stream. Any other
    /// error propagates.
    pub fn triggers_download_fallback(&self) -> bool {
        match self {
            ExtractError::RecipeParseError(_) => true,
            ExtractError::IoError(err) => {
                let message = err.to_string();
                message.contains("Invalid data stream")
                    || message.contains("invalid header")
                    || message.contains("Truncated")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn io_error(message: &str) -> ExtractError {
        ExtractError::IoError(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            message.to_owned(),
        ))
    }

    #[test]
    fn test_fallback_set() {
        let yaml_error = serde_yaml::from_str::<serde_yaml::Value>(": {")
            .expect_err("a broken yaml document");
        assert!(ExtractError::RecipeParseError(yaml_error).triggers_download_fallback());

        assert!(io_error("Invalid data stream").triggers_download_fallback());
        assert!(io_error("invalid header in archive").triggers_download_fallback());
        assert!(io_error("Truncated bzip2 input").triggers_download_fallback());
    }

    #[test]
    fn test_other_errors_propagate() {
        assert!(!io_error("connection reset by peer").triggers_download_fallback());
        assert!(!ExtractError::MissingComponent.triggers_download_fallback());
        assert!(!ExtractError::UnsupportedArchiveType.triggers_download_fallback());
    }
}
