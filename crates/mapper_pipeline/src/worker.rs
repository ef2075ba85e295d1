//! The shard worker: fetch, extract and record every new artifact of one
//! `subdir@letter` shard.

use std::path::PathBuf;

use futures::{stream, StreamExt};
use mapper_repodata::fetch_merged_repodata;
use mapper_store::StoreGateway;
use mapper_streaming::backends::{fetch_artifact_info, ArtifactRequest, Backend};
use mapper_types::{
    is_sha256_hex, Channel, IndexMapping, MappingEntry, PartialIndex, YankConfig,
};
use reqwest_middleware::ClientWithMiddleware;
use url::Url;

use crate::{
    extract::extract_mapping, index_snapshot_path, partial_index_path, producer::channel_labels,
    write_atomic, PipelineError, ShardId,
};

/// Options for a shard worker run.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// The channel being processed.
    pub channel: Channel,

    /// Directory holding the index snapshot written by the producer.
    pub output_dir: PathBuf,

    /// Directory the partial index is written to.
    pub partial_dir: PathBuf,

    /// Upload each extracted mapping to the object store as it is produced.
    pub upload: bool,

    /// The yank rules to apply before an entry enters the partial index.
    pub yank: YankConfig,

    /// Maximum number of artifacts fetched concurrently.
    pub extraction_concurrency: usize,

    /// Maximum number of concurrent mapping uploads.
    pub upload_concurrency: usize,

    /// Token for the anaconda.org API, used to list labels of channels that
    /// need them.
    pub anaconda_token: Option<String>,

    /// Overrides the channel base URL. Tests point this at a fixture server.
    pub base_url: Option<Url>,

    /// Forces a backend instead of the per-artifact preference.
    pub backend: Option<Backend>,
}

impl WorkerOptions {
    /// Creates options with the defaults of the production pipeline.
    pub fn new(
        channel: Channel,
        output_dir: impl Into<PathBuf>,
        partial_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            channel,
            output_dir: output_dir.into(),
            partial_dir: partial_dir.into(),
            upload: false,
            yank: YankConfig::default(),
            extraction_concurrency: 32,
            upload_concurrency: 50,
            anaconda_token: None,
            base_url: None,
            backend: None,
        }
    }
}

/// The result of a shard worker run.
#[derive(Debug, Clone)]
pub struct WorkerSummary {
    /// How many artifacts the shard had to process.
    pub queued: usize,

    /// How many mapping entries were extracted and recorded.
    pub extracted: usize,

    /// How many artifacts were suppressed by the yank rules.
    pub yanked: usize,

    /// How many artifacts failed or were not found on the backend. These are
    /// retried on the next run because the index has no entry for them.
    pub failed: usize,

    /// Where the partial index was written.
    pub partial_path: PathBuf,
}

/// Runs a single shard: re-fetch the subdir's repodata, process every record
/// of the shard that is missing from the snapshot, and write the partial
/// index.
///
/// Per-artifact failures are logged and swallowed; the shard always produces
/// a complete partial index of whatever succeeded.
pub async fn run_shard(
    client: &ClientWithMiddleware,
    gateway: &StoreGateway,
    shard: &ShardId,
    options: &WorkerOptions,
) -> Result<WorkerSummary, PipelineError> {
    let channel = options.channel;
    let base_url = options
        .base_url
        .clone()
        .unwrap_or_else(|| channel.base_url());

    // the snapshot is the read-only baseline of already-mapped hashes
    let snapshot_path = index_snapshot_path(&options.output_dir, channel);
    let snapshot_bytes = tokio::fs::read(&snapshot_path)
        .await
        .map_err(|err| PipelineError::Io(snapshot_path.display().to_string(), err))?;
    let baseline = IndexMapping::from_slice(&snapshot_bytes)
        .map_err(|err| PipelineError::Parse(snapshot_path.display().to_string(), err))?;

    let labels = channel_labels(client, channel, options.anaconda_token.as_deref()).await;
    let records = fetch_merged_repodata(client, &base_url, &shard.subdir, &labels).await?;

    let work: Vec<(String, String)> = records
        .iter()
        .filter(|(filename, _)| shard.matches(filename))
        .filter_map(|(filename, record)| {
            let sha256 = record.sha256.as_deref().filter(|sha| is_sha256_hex(sha))?;
            (!baseline.contains(sha256)).then(|| (filename.clone(), sha256.to_owned()))
        })
        .collect();

    tracing::info!("total packages for processing: {} for {shard}", work.len());

    let queued = work.len();
    let mut partial = PartialIndex::new();
    let mut yanked = 0;
    let mut failed = 0;

    let mut results = stream::iter(work)
        .map(|(filename, sha256)| {
            let client = client.clone();
            let base_url = options.base_url.clone();
            let subdir = shard.subdir.clone();
            let forced_backend = options.backend;
            async move {
                let mut request = ArtifactRequest::new(channel, subdir, filename.clone());
                request.expected_sha256 = Some(sha256.clone());
                request.base_url = base_url;

                let backend = match forced_backend {
                    Some(backend) => Some(backend),
                    None => request
                        .archive_type()
                        .ok()
                        .map(|archive_type| Backend::preferred(channel, archive_type)),
                };

                let result = match backend {
                    Some(backend) => fetch_artifact_info(&client, &request, backend).await,
                    None => Ok(None),
                };
                (filename, sha256, result)
            }
        })
        .buffer_unordered(options.extraction_concurrency);

    while let Some((filename, sha256, result)) = results.next().await {
        match result {
            Ok(Some(artifact)) => {
                if options
                    .yank
                    .should_yank(&artifact.name, &shard.subdir, channel)
                {
                    tracing::info!("{filename} is yanked for {} on {channel}", shard.subdir);
                    yanked += 1;
                    continue;
                }
                partial.insert(sha256, extract_mapping(&artifact, &filename));
            }
            Ok(None) => {
                tracing::warn!("could not get artifact for {filename}");
                failed += 1;
            }
            Err(err) => {
                tracing::error!("an error occurred: {err} for package {filename}");
                failed += 1;
            }
        }
    }

    if options.upload {
        tracing::info!("uploading {} mappings for {shard}", partial.len());
        upload_mappings(gateway, &partial, options.upload_concurrency).await;
    } else {
        tracing::info!("uploading is disabled for {shard}, skipping it");
    }

    let partial_path = partial_index_path(&options.partial_dir, channel, shard);
    let bytes = partial
        .to_vec()
        .map_err(|err| PipelineError::Parse(partial_path.display().to_string(), err))?;
    write_atomic(&partial_path, &bytes)?;

    tracing::info!(
        "processed {} packages out of {queued} for {shard}",
        partial.len()
    );

    Ok(WorkerSummary {
        queued,
        extracted: partial.len(),
        yanked,
        failed,
        partial_path,
    })
}

/// Pushes every entry of the partial index to the object store. Upload
/// failures are logged and do not fail the shard; the merger run will still
/// record the entry in the canonical index.
async fn upload_mappings(gateway: &StoreGateway, partial: &PartialIndex, concurrency: usize) {
    let entries: Vec<(String, MappingEntry)> = partial
        .iter()
        .map(|(sha256, entry)| (sha256.clone(), entry.clone()))
        .collect();

    stream::iter(entries)
        .map(|(sha256, entry)| async move {
            if let Err(err) = gateway.put_mapping(&sha256, &entry).await {
                tracing::error!("could not upload {sha256}: {err}");
            }
        })
        .buffer_unordered(concurrency)
        .collect::<Vec<()>>()
        .await;
}
