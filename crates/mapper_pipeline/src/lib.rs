#![deny(missing_docs)]

//! The incremental conda <-> PyPI mapping pipeline.
//!
//! The run of a channel is split into independent operations that communicate
//! through the object store and a couple of local files:
//!
//! 1. [`run_producer`] diffs the live repodata against the published index
//!    and emits the set of `subdir@letter` shards that have work, plus a
//!    local snapshot of the index.
//! 2. [`run_shard`] processes one shard: it fetches and extracts every new
//!    artifact and writes a partial index (optionally uploading the per-hash
//!    mappings as it goes).
//! 3. [`run_merger`] folds the partial indices into the canonical index.
//! 4. [`build_relations`] denormalizes the index into the relations table and
//!    derives the per-PyPI-name lookups, uploading only what changed.
//!
//! [`check_one`] and [`remove_yanked`] are the one-shot maintenance paths.
//!
//! The embedding application owns argument parsing and the concrete object
//! store; everything here takes an options struct and returns a summary.

pub mod check_one;
pub mod extract;
pub mod merger;
pub mod producer;
pub mod relations;
pub mod remover;
mod shard;
pub mod worker;

pub use check_one::{check_one, CheckOneOptions};
pub use extract::extract_mapping;
/// The process-wide pooled client production runs pass to every operation.
/// It carries the retry policy and the `oci://` middleware the OCI backend
/// relies on; tests construct plain clients instead.
pub use mapper_networking::shared_client;
pub use merger::{run_merger, MergerOptions, MergerSummary};
pub use producer::{run_producer, ProducerOptions, ProducerOutput};
pub use relations::{build_relations, create_pypi_lookups, RelationsOptions, RelationsSummary};
pub use remover::{remove_yanked, RemoverOptions, RemoverSummary};
pub use shard::{ParseShardError, ShardId};
pub use worker::{run_shard, WorkerOptions, WorkerSummary};

use std::path::{Path, PathBuf};

use mapper_types::Channel;

/// An error that aborts a pipeline operation.
///
/// Per-artifact failures never surface here; they are logged and the shard
/// carries on. What does surface: repodata failures for a shard, object-store
/// failures, and configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Fetching repodata or channeldata failed.
    #[error(transparent)]
    Repodata(#[from] mapper_repodata::FetchRepodataError),

    /// The object store failed.
    #[error(transparent)]
    Store(#[from] mapper_store::StoreError),

    /// A local file could not be read or written.
    #[error("io error on {0}")]
    Io(String, #[source] std::io::Error),

    /// A local file could not be decoded.
    #[error("could not parse {0}")]
    Parse(String, #[source] serde_json::Error),

    /// The relations table could not be encoded or decoded.
    #[error(transparent)]
    Relations(#[from] mapper_types::ParseRelationsError),

    /// The operation was invoked with an invalid configuration.
    #[error("{0}")]
    Config(String),

    /// An HTTP request outside the repodata client failed.
    #[error(transparent)]
    Http(#[from] reqwest_middleware::Error),
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::Http(err.into())
    }
}

/// The local path of the index snapshot the producer writes and the shard
/// workers read: `<output_dir>/<channel>/index.json`.
pub fn index_snapshot_path(output_dir: &Path, channel: Channel) -> PathBuf {
    output_dir.join(channel.as_str()).join("index.json")
}

/// The local path of a shard's partial index:
/// `<partial_dir>/<channel>/<subdir>@<letter>.json`.
pub fn partial_index_path(partial_dir: &Path, channel: Channel, shard: &ShardId) -> PathBuf {
    partial_dir
        .join(channel.as_str())
        .join(format!("{shard}.json"))
}

/// Writes bytes to a path atomically: the content is staged in a temporary
/// file next to the target and renamed into place, so a cancelled run leaves
/// the file either absent or complete.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    use std::io::Write;

    let io_err = |err| PipelineError::Io(path.display().to_string(), err);

    let parent = path
        .parent()
        .ok_or_else(|| PipelineError::Config(format!("{} has no parent", path.display())))?;
    std::fs::create_dir_all(parent).map_err(io_err)?;

    let mut file = tempfile::NamedTempFile::new_in(parent).map_err(io_err)?;
    file.write_all(bytes).map_err(io_err)?;
    file.persist(path)
        .map_err(|err| PipelineError::Io(path.display().to_string(), err.error))?;
    Ok(())
}
