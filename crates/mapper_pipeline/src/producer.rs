//! The producer: diff the live repodata against the published index and emit
//! the shard set that has work to do.

use std::path::PathBuf;

use mapper_repodata::{fetch_merged_repodata, list_labels, list_subdirs};
use mapper_store::StoreGateway;
use mapper_types::{is_sha256_hex, Channel, IndexMapping, Label, Subdir};
use reqwest_middleware::ClientWithMiddleware;
use url::Url;

use crate::{index_snapshot_path, write_atomic, PipelineError, ShardId};

/// Options for a producer run.
#[derive(Debug, Clone)]
pub struct ProducerOptions {
    /// The channel to diff.
    pub channel: Channel,

    /// Restricts the run to a single subdir. Validated against the live
    /// subdir list.
    pub subdir: Option<Subdir>,

    /// When set (the default), artifacts already present in the published
    /// index are not re-queued. Disabling forces a full re-extraction.
    pub check_if_exists: bool,

    /// Re-queue artifacts whose existing entry carries no PyPI names, to
    /// give them another chance after extractor improvements.
    pub check_if_pypi_exists: bool,

    /// Directory the index snapshot is written to (consumed by the shard
    /// workers).
    pub output_dir: PathBuf,

    /// Token for the anaconda.org API, used to list labels of channels that
    /// need them.
    pub anaconda_token: Option<String>,

    /// Overrides the channel base URL. Tests point this at a fixture server.
    pub base_url: Option<Url>,
}

impl ProducerOptions {
    /// Creates options with the defaults of the production pipeline.
    pub fn new(channel: Channel, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            channel,
            subdir: None,
            check_if_exists: true,
            check_if_pypi_exists: false,
            output_dir: output_dir.into(),
            anaconda_token: None,
            base_url: None,
        }
    }
}

/// The result of a producer run.
#[derive(Debug, Clone)]
pub struct ProducerOutput {
    /// The shards that have at least one new artifact, sorted. The embedding
    /// CLI prints these as JSON to stdout for the orchestrator.
    pub shards: Vec<ShardId>,

    /// Where the index snapshot was written.
    pub snapshot_path: PathBuf,

    /// How many artifacts were queued across all shards.
    pub queued_artifacts: usize,
}

/// Runs the producer: enumerate subdirs, fetch repodata, diff against the
/// published index, write the index snapshot and return the shard set.
pub async fn run_producer(
    client: &ClientWithMiddleware,
    gateway: &StoreGateway,
    options: &ProducerOptions,
) -> Result<ProducerOutput, PipelineError> {
    let channel = options.channel;
    let base_url = options
        .base_url
        .clone()
        .unwrap_or_else(|| channel.base_url());

    let mut subdirs = list_subdirs(client, channel, options.base_url.as_ref()).await?;
    if let Some(filter) = &options.subdir {
        if !subdirs.contains(filter) {
            return Err(PipelineError::Config(format!(
                "'{filter}' is not a subdir of {channel}"
            )));
        }
        subdirs = vec![filter.clone()];
    }

    let labels = channel_labels(client, channel, options.anaconda_token.as_deref()).await;

    let index = if options.check_if_exists {
        gateway.get_index(channel).await?.unwrap_or_default()
    } else {
        IndexMapping::new()
    };
    tracing::info!(
        "diffing {} subdirs of {channel} against {} known artifacts",
        subdirs.len(),
        index.len()
    );

    let mut shards: Vec<ShardId> = Vec::new();
    let mut queued_artifacts = 0;

    for subdir in &subdirs {
        let records =
            match fetch_merged_repodata(client, &base_url, subdir, &labels).await {
                Ok(records) => records,
                Err(mapper_repodata::FetchRepodataError::NotFound(url)) => {
                    tracing::warn!("no repodata for {subdir} at {url}, skipping subdir");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

        for (filename, record) in &records {
            let Some(sha256) = record.sha256.as_deref().filter(|sha| is_sha256_hex(sha))
            else {
                tracing::warn!("{filename} in {subdir} has no usable sha256, skipping");
                continue;
            };

            let include = match index.get(sha256) {
                None => true,
                Some(entry) => options.check_if_pypi_exists && !entry.has_pypi_names(),
            };
            if !include {
                continue;
            }

            queued_artifacts += 1;
            if let Some(letter) = filename.chars().next() {
                let shard = ShardId::new(subdir.clone(), letter);
                if !shards.contains(&shard) {
                    shards.push(shard);
                }
            }
        }
    }

    shards.sort();

    // the snapshot feeds the shard workers, saving them one index download
    // per shard
    let snapshot_path = index_snapshot_path(&options.output_dir, channel);
    let bytes = index
        .to_vec()
        .map_err(|err| PipelineError::Parse(snapshot_path.display().to_string(), err))?;
    write_atomic(&snapshot_path, &bytes)?;

    tracing::info!(
        "queued {queued_artifacts} artifacts across {} shards",
        shards.len()
    );

    Ok(ProducerOutput {
        shards,
        snapshot_path,
        queued_artifacts,
    })
}

/// The labels to iterate for a channel: channels with channeldata only serve
/// `main`, the others are asked through the anaconda.org API. The listing
/// order is kept, it decides which record wins a filename collision.
pub(crate) async fn channel_labels(
    client: &ClientWithMiddleware,
    channel: Channel,
    token: Option<&str>,
) -> Vec<Label> {
    if channel.supports_channeldata() {
        vec![Label::main()]
    } else {
        list_labels(client, channel, token, None).await
    }
}
