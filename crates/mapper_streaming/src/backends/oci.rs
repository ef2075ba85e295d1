//! The OCI backend: pull the artifact blob from the ghcr.io channel mirror.
//!
//! The heavy lifting (token exchange, manifest resolution, blob addressing)
//! lives in the `oci://` middleware of the shared client; this backend only
//! builds the mirror URL and parses the returned bytes.

use std::io::Cursor;

use http::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use url::Url;

use super::{ArtifactRequest, ARTIFACT_FETCH_TIMEOUT};
use crate::{seek::read_artifact_info, ArtifactInfo, ExtractError};

const OCI_MIRROR_BASE: &str = "oci://ghcr.io/channel-mirrors";

fn mirror_url(request: &ArtifactRequest) -> Url {
    format!(
        "{OCI_MIRROR_BASE}/{}/{}/{}",
        request.channel, request.subdir, request.filename
    )
    .parse()
    .expect("mirror urls are valid")
}

pub(super) async fn fetch(
    client: &ClientWithMiddleware,
    request: &ArtifactRequest,
) -> Result<Option<ArtifactInfo>, ExtractError> {
    let archive_type = request.archive_type()?;
    let url = mirror_url(request);

    tracing::debug!("pulling {url} from the OCI mirror");

    let mut builder = client.get(url.clone()).timeout(ARTIFACT_FETCH_TIMEOUT);
    if let Some(sha256) = request.expected_sha256.as_deref() {
        builder = builder.header("X-Expected-Sha256", sha256);
    }

    let response = builder.send().await?;
    if response.status() == StatusCode::NOT_FOUND {
        tracing::debug!("{url} is not mirrored");
        return Ok(None);
    }
    let response = response.error_for_status()?;

    let bytes = response.bytes().await?;

    let artifact = tokio::task::spawn_blocking(move || {
        read_artifact_info(Cursor::new(bytes), archive_type)
    })
    .await??;

    Ok(Some(artifact))
}

#[cfg(test)]
mod test {
    use mapper_types::{Channel, Subdir};

    use super::*;

    #[test]
    fn test_mirror_url() {
        let request = ArtifactRequest::new(
            Channel::CondaForge,
            Subdir::from("osx-arm64"),
            "xtensor-0.25.0-h2ffa867_0.tar.bz2",
        );
        assert_eq!(
            mirror_url(&request).as_str(),
            "oci://ghcr.io/channel-mirrors/conda-forge/osx-arm64/xtensor-0.25.0-h2ffa867_0.tar.bz2"
        );
    }
}
