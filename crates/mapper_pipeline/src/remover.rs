//! The yank-driven removal path: find indexed artifacts that match the yank
//! rules and delete their mappings.

use futures::{stream, StreamExt};
use mapper_repodata::fetch_merged_repodata;
use mapper_store::StoreGateway;
use mapper_streaming::backends::{fetch_artifact_info, ArtifactRequest, Backend};
use mapper_types::{is_sha256_hex, Channel, Subdir, YankConfig};
use reqwest_middleware::ClientWithMiddleware;
use url::Url;

use crate::{producer::channel_labels, PipelineError};

/// Options for a remover run.
#[derive(Debug, Clone)]
pub struct RemoverOptions {
    /// The channel to clean.
    pub channel: Channel,

    /// The subdir to scan.
    pub subdir: Subdir,

    /// Report what would be removed without touching the store.
    pub dry_run: bool,

    /// The yank rules.
    pub yank: YankConfig,

    /// Maximum number of artifacts inspected concurrently.
    pub extraction_concurrency: usize,

    /// Token for the anaconda.org API, used to list labels of channels that
    /// need them.
    pub anaconda_token: Option<String>,

    /// Overrides the channel base URL. Tests point this at a fixture server.
    pub base_url: Option<Url>,
}

impl RemoverOptions {
    /// Creates dry-run options for a subdir.
    pub fn new(channel: Channel, subdir: Subdir, yank: YankConfig) -> Self {
        Self {
            channel,
            subdir,
            dry_run: true,
            yank,
            extraction_concurrency: 32,
            anaconda_token: None,
            base_url: None,
        }
    }
}

/// The result of a remover run.
#[derive(Debug, Clone)]
pub struct RemoverSummary {
    /// Indexed artifacts whose filename matched a yank name and were
    /// inspected.
    pub inspected: usize,

    /// Hashes confirmed yanked.
    pub to_remove: Vec<String>,

    /// Whether the removals were actually performed.
    pub removed: bool,
}

/// Scans a subdir for indexed artifacts matching the yank rules and removes
/// their mappings (unless `dry_run`): the per-hash objects are deleted, the
/// hashes drop out of the canonical index, and the index is re-uploaded.
pub async fn remove_yanked(
    client: &ClientWithMiddleware,
    gateway: &StoreGateway,
    options: &RemoverOptions,
) -> Result<RemoverSummary, PipelineError> {
    let channel = options.channel;
    let base_url = options
        .base_url
        .clone()
        .unwrap_or_else(|| channel.base_url());

    let mut index = gateway.get_index(channel).await?.ok_or_else(|| {
        PipelineError::Config(format!("no index exists for channel {channel}"))
    })?;

    let labels = channel_labels(client, channel, options.anaconda_token.as_deref()).await;
    let records = fetch_merged_repodata(client, &base_url, &options.subdir, &labels).await?;

    let yank_names = options.yank.names();

    // prefilter by filename before spending a fetch per artifact
    let candidates: Vec<(String, String)> = records
        .iter()
        .filter_map(|(filename, record)| {
            let sha256 = record.sha256.as_deref().filter(|sha| is_sha256_hex(sha))?;
            let is_candidate = index.contains(sha256)
                && yank_names.iter().any(|name| filename.contains(name));
            is_candidate.then(|| (filename.clone(), sha256.to_owned()))
        })
        .collect();

    tracing::info!(
        "total packages for processing: {} for {}",
        candidates.len(),
        options.subdir
    );
    let inspected = candidates.len();

    let mut to_remove = Vec::new();
    let mut results = stream::iter(candidates)
        .map(|(filename, sha256)| {
            let client = client.clone();
            let base_url = options.base_url.clone();
            let subdir = options.subdir.clone();
            async move {
                let mut request = ArtifactRequest::new(channel, subdir, filename.clone());
                request.expected_sha256 = Some(sha256.clone());
                request.base_url = base_url;

                let backend = match request.archive_type() {
                    Ok(archive_type) => Backend::preferred(channel, archive_type),
                    Err(_) => return (filename, sha256, Ok(None)),
                };
                let result = fetch_artifact_info(&client, &request, backend).await;
                (filename, sha256, result)
            }
        })
        .buffer_unordered(options.extraction_concurrency);

    while let Some((filename, sha256, result)) = results.next().await {
        match result {
            Ok(Some(artifact)) => {
                if options
                    .yank
                    .should_yank(&artifact.name, &options.subdir, channel)
                {
                    tracing::info!(
                        "adding {filename} from {} {channel} to remove list",
                        options.subdir
                    );
                    to_remove.push(sha256);
                }
            }
            Ok(None) => tracing::warn!("could not get artifact for {filename}"),
            Err(err) => tracing::error!("an error occurred: {err} for package {filename}"),
        }
    }

    tracing::info!(
        "based on the yank configuration {} hashes should be removed",
        to_remove.len()
    );

    if options.dry_run {
        tracing::warn!("running in dry-run mode, nothing is removed");
        return Ok(RemoverSummary {
            inspected,
            to_remove,
            removed: false,
        });
    }

    // delete the per-hash objects first; the index rewrite below is what
    // makes the removal visible to consumers
    stream::iter(to_remove.clone())
        .map(|sha256| {
            let gateway = gateway.clone();
            async move {
                if let Err(err) = gateway.delete_hash(&sha256).await {
                    tracing::error!("could not delete {sha256}: {err}");
                }
            }
        })
        .buffer_unordered(options.extraction_concurrency)
        .collect::<Vec<()>>()
        .await;

    for sha256 in &to_remove {
        index.remove(sha256);
    }
    gateway.put_index(channel, &index).await?;

    Ok(RemoverSummary {
        inspected,
        to_remove,
        removed: true,
    })
}
