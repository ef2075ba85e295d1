//! The merger: fold the partial per-shard indices into the canonical
//! per-channel index.

use std::path::PathBuf;

use mapper_store::StoreGateway;
use mapper_types::{Channel, IndexMapping};

use crate::PipelineError;

/// Options for a merger run.
#[derive(Debug, Clone)]
pub struct MergerOptions {
    /// The channel being merged.
    pub channel: Channel,

    /// Directory holding the partial indices written by the shard workers.
    pub partial_dir: PathBuf,

    /// Upload the merged canonical index to the object store.
    pub upload: bool,
}

/// The result of a merger run.
#[derive(Debug, Clone)]
pub struct MergerSummary {
    /// How many partial index files were merged.
    pub partial_files: usize,

    /// How many entries the canonical index gained.
    pub new_entries: usize,

    /// The size of the canonical index after the merge.
    pub total_entries: usize,
}

/// Runs the merger. Partials are keyed by disjoint `subdir@letter` sets, so
/// the merge order between files does not matter; within a key the partial
/// always wins over the canonical entry.
pub async fn run_merger(
    gateway: &StoreGateway,
    options: &MergerOptions,
) -> Result<MergerSummary, PipelineError> {
    let channel = options.channel;

    let mut canonical = gateway.get_index(channel).await?.unwrap_or_default();
    let before = canonical.len();

    let partial_dir = options.partial_dir.join(channel.as_str());
    let mut partial_files = 0;

    let entries = match std::fs::read_dir(&partial_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("no partial indices at {}", partial_dir.display());
            return Ok(MergerSummary {
                partial_files: 0,
                new_entries: 0,
                total_entries: before,
            });
        }
        Err(err) => return Err(PipelineError::Io(partial_dir.display().to_string(), err)),
    };

    for entry in entries {
        let entry = entry.map_err(|err| PipelineError::Io(partial_dir.display().to_string(), err))?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|err| PipelineError::Io(path.display().to_string(), err))?;
        let partial = IndexMapping::from_slice(&bytes)
            .map_err(|err| PipelineError::Parse(path.display().to_string(), err))?;

        tracing::debug!("merging {} entries from {}", partial.len(), path.display());
        canonical.merge(partial);
        partial_files += 1;
    }

    let total_entries = canonical.len();
    tracing::info!(
        "merged {partial_files} partials, index grew from {before} to {total_entries} entries"
    );

    if options.upload {
        tracing::info!("uploading the canonical index for {channel}");
        gateway.put_index(channel, &canonical).await?;
    } else {
        tracing::info!("uploading is disabled, skipping it");
    }

    Ok(MergerSummary {
        partial_files,
        new_entries: total_entries - before,
        total_entries,
    })
}
