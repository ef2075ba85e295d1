//! The full-download backend: buffer the whole artifact and parse it in
//! memory. This is the slowest but most compatible path; it also serves as
//! the fallback for the range-streamed backend.

use std::io::Cursor;

use http::StatusCode;
use reqwest_middleware::ClientWithMiddleware;

use super::{ArtifactRequest, ARTIFACT_FETCH_TIMEOUT};
use crate::{seek::read_artifact_info, ArtifactInfo, ExtractError};

pub(super) async fn fetch(
    client: &ClientWithMiddleware,
    request: &ArtifactRequest,
) -> Result<Option<ArtifactInfo>, ExtractError> {
    let archive_type = request.archive_type()?;
    let url = request.artifact_url();

    tracing::debug!("downloading {url} in full");

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

    let artifact = tokio::task::spawn_blocking(move || {
        read_artifact_info(Cursor::new(bytes), archive_type)
    })
    .await??;

    Ok(Some(artifact))
}
