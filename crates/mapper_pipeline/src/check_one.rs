//! The one-shot path: resolve the mapping of a single artifact, walking
//! through the backends until one of them can serve it.

use mapper_repodata::fetch_merged_repodata;
use mapper_store::StoreGateway;
use mapper_streaming::backends::{fetch_artifact_info, ArtifactRequest, Backend};
use mapper_types::{is_sha256_hex, Channel, MappingEntry, Subdir};
use reqwest_middleware::ClientWithMiddleware;
use url::Url;

use crate::{extract::extract_mapping, producer::channel_labels, PipelineError};

/// Options for a `check-one` run.
#[derive(Debug, Clone)]
pub struct CheckOneOptions {
    /// The channel serving the artifact.
    pub channel: Channel,

    /// The subdir of the artifact.
    pub subdir: Subdir,

    /// The full artifact filename, e.g.
    /// `warp-lang-1.3.0-cpu38_h19ae9ab_0.conda`.
    pub filename: String,

    /// Forces a single backend instead of walking the default order.
    pub backend: Option<Backend>,

    /// Upload the resulting mapping entry.
    pub upload: bool,

    /// Token for the anaconda.org API, used to list labels of channels that
    /// need them.
    pub anaconda_token: Option<String>,

    /// Overrides the channel base URL. Tests point this at a fixture server.
    pub base_url: Option<Url>,
}

impl CheckOneOptions {
    /// Creates options for the given artifact.
    pub fn new(channel: Channel, subdir: Subdir, filename: impl Into<String>) -> Self {
        Self {
            channel,
            subdir,
            filename: filename.into(),
            backend: None,
            upload: false,
            anaconda_token: None,
            base_url: None,
        }
    }
}

/// Resolves the mapping for one artifact and returns `(sha256, entry)`.
///
/// The artifact must exist in the subdir's repodata; the backends are tried
/// in [`Backend::CHECK_ONE_ORDER`] unless one is forced. Not finding the
/// artifact on any backend is an error here, unlike in the shard worker.
pub async fn check_one(
    client: &ClientWithMiddleware,
    gateway: &StoreGateway,
    options: &CheckOneOptions,
) -> Result<(String, MappingEntry), PipelineError> {
    let channel = options.channel;
    let base_url = options
        .base_url
        .clone()
        .unwrap_or_else(|| channel.base_url());

    let labels = channel_labels(client, channel, options.anaconda_token.as_deref()).await;
    let records = fetch_merged_repodata(client, &base_url, &options.subdir, &labels).await?;

    let sha256 = records
        .get(&options.filename)
        .and_then(|record| record.sha256.clone())
        .filter(|sha| is_sha256_hex(sha))
        .ok_or_else(|| {
            PipelineError::Config(format!(
                "could not find the package {} in the repodata for subdir {}",
                options.filename, options.subdir
            ))
        })?;

    let mut request = ArtifactRequest::new(channel, options.subdir.clone(), &options.filename);
    request.expected_sha256 = Some(sha256.clone());
    request.base_url = options.base_url.clone();

    let backends: Vec<Backend> = match options.backend {
        Some(backend) => vec![backend],
        None => Backend::CHECK_ONE_ORDER.to_vec(),
    };

    let mut artifact = None;
    for backend in backends {
        tracing::debug!("trying backend {backend} for {}", options.filename);
        match fetch_artifact_info(client, &request, backend).await {
            Ok(Some(found)) => {
                artifact = Some(found);
                break;
            }
            Ok(None) => continue,
            Err(err) => {
                tracing::warn!("backend {backend} failed for {}: {err}", options.filename);
                continue;
            }
        }
    }

    let artifact = artifact.ok_or_else(|| {
        PipelineError::Config(format!(
            "could not get artifact for {} using any backend",
            options.filename
        ))
    })?;

    let entry = extract_mapping(&artifact, &options.filename);

    if options.upload {
        tracing::info!("uploading mapping for {sha256}");
        gateway.put_mapping(&sha256, &entry).await?;
    }

    Ok((sha256, entry))
}
