//! The legacy metadata mirror backend.
//!
//! A community mirror publishes the pre-extracted metadata of historical
//! conda-forge artifacts as one JSON document per artifact. It lags behind
//! the live channel, so it is only consulted by `check-one` and on explicit
//! request.

use http::StatusCode;
use mapper_types::ArchiveIdentifier;
use reqwest_middleware::ClientWithMiddleware;
use url::Url;

use super::{ArtifactRequest, ARTIFACT_FETCH_TIMEOUT};
use crate::{ArtifactInfo, ExtractError};

const MIRROR_BASE: &str = "https://raw.githubusercontent.com/regro/libcfgraph/master/artifacts";

fn document_url(request: &ArtifactRequest) -> Result<Url, ExtractError> {
    let identifier = ArchiveIdentifier::try_from_filename(&request.filename)
        .ok_or(ExtractError::UnsupportedArchiveType)?;

    // documents are keyed by the extension-less artifact name
    let stem = format!(
        "{}-{}-{}",
        identifier.name, identifier.version, identifier.build_string
    );

    format!(
        "{MIRROR_BASE}/{}/{}/{}/{stem}.json",
        identifier.name, request.channel, request.subdir
    )
    .parse()
    .map_err(|_| ExtractError::UnsupportedArchiveType)
}

pub(super) async fn fetch(
    client: &ClientWithMiddleware,
    request: &ArtifactRequest,
) -> Result<Option<ArtifactInfo>, ExtractError> {
    let url = document_url(request)?;

    tracing::debug!("fetching mirrored metadata from {url}");

    let response = client
        .get(url)
        .timeout(ARTIFACT_FETCH_TIMEOUT)
        .send()
        .await?;

    if response.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    let response = response.error_for_status()?;

    let bytes = response.bytes().await?;
    ArtifactInfo::from_mirror_json(&bytes).map(Some)
}

#[cfg(test)]
mod test {
    use mapper_types::{Channel, Subdir};

    use super::*;

    #[test]
    fn test_document_url() {
        let request = ArtifactRequest::new(
            Channel::CondaForge,
            Subdir::from("linux-64"),
            "numpy-1.26.4-py311h64a7726_0.conda",
        );
        assert_eq!(
            document_url(&request).unwrap().as_str(),
            "https://raw.githubusercontent.com/regro/libcfgraph/master/artifacts/numpy/conda-forge/linux-64/numpy-1.26.4-py311h64a7726_0.json"
        );
    }

    #[test]
    fn test_document_url_rejects_unknown_extension() {
        let request = ArtifactRequest::new(
            Channel::CondaForge,
            Subdir::from("linux-64"),
            "numpy-1.26.4.whl",
        );
        assert!(matches!(
            document_url(&request),
            Err(ExtractError::UnsupportedArchiveType)
        ));
    }
}
