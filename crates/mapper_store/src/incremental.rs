//! Hash-compared incremental upload of the derived PyPI lookups.
//!
//! A full lookup regeneration touches hundreds of thousands of objects while
//! a typical run changes a handful. Every lookup object carries the SHA256 of
//! its body as metadata, so one HEAD request per object decides whether the
//! upload can be skipped. Objects that predate the metadata are downloaded
//! once and compared by content; anything inconclusive is conservatively
//! uploaded.

use bytes::Bytes;
use futures::{stream, StreamExt, TryStreamExt};
use indexmap::IndexMap;
use mapper_types::Channel;

use crate::{content_sha256, StoreError, StoreGateway};

/// Options for the incremental upload.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// When set (the default), lookups whose stored content hash matches are
    /// not re-uploaded. Disabling forces a full upload, which is slower but
    /// re-establishes metadata on every object.
    pub skip_unchanged: bool,

    /// Maximum number of in-flight HEAD/GET/PUT/DELETE requests.
    pub concurrency: usize,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            skip_unchanged: true,
            concurrency: 50,
        }
    }
}

/// What the incremental upload did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UploadSummary {
    /// Lookups uploaded because they were new or changed.
    pub uploaded: usize,
    /// Lookups skipped because their content hash matched.
    pub skipped: usize,
    /// Stale lookups deleted because no relation produces them anymore.
    pub deleted: usize,
}

/// A serialized lookup with its pre-computed content hash.
#[derive(Debug, Clone)]
struct PreparedLookup {
    pypi_name: String,
    bytes: Bytes,
    sha256: String,
}

/// Uploads the given serialized lookups (`pypi_name -> body bytes`) for a
/// channel, skipping unchanged objects, then deletes every stored lookup that
/// is not part of the new set.
///
/// Stale deletion only runs after every upload has succeeded; a failed upload
/// aborts the operation and leaves the stored set untouched apart from the
/// uploads that already went through (which are idempotent re-writes).
pub async fn upload_pypi_lookups(
    gateway: &StoreGateway,
    channel: Channel,
    lookups: &IndexMap<String, Vec<u8>>,
    options: &UploadOptions,
) -> Result<UploadSummary, StoreError> {
    // snapshot the existing names before uploading so the stale set is
    // computed against the state this run started from
    let existing_names = gateway.list_pypi_lookup_names(channel).await?;

    let prepared: Vec<PreparedLookup> = lookups
        .iter()
        .map(|(pypi_name, bytes)| PreparedLookup {
            pypi_name: pypi_name.clone(),
            bytes: Bytes::from(bytes.clone()),
            sha256: content_sha256(bytes),
        })
        .collect();

    let to_upload: Vec<PreparedLookup> = if options.skip_unchanged {
        tracing::info!("checking {} lookups for changes", prepared.len());
        stream::iter(prepared)
            .map(|lookup| async move {
                let needs_upload = needs_upload(gateway, channel, &lookup).await?;
                Ok::<_, StoreError>((lookup, needs_upload))
            })
            .buffer_unordered(options.concurrency)
            .try_filter_map(|(lookup, needs_upload)| async move {
                Ok(needs_upload.then_some(lookup))
            })
            .try_collect()
            .await?
    } else {
        tracing::info!("uploading all {} lookups (full mode)", prepared.len());
        prepared
    };

    let skipped = lookups.len() - to_upload.len();
    let uploaded = to_upload.len();

    if !to_upload.is_empty() {
        tracing::info!("uploading {uploaded} changed lookups, skipping {skipped}");
        stream::iter(to_upload)
            .map(|lookup| async move {
                gateway
                    .put_pypi_lookup(channel, &lookup.pypi_name, lookup.bytes, lookup.sha256)
                    .await
            })
            .buffer_unordered(options.concurrency)
            .try_collect::<Vec<()>>()
            .await?;
    } else {
        tracing::info!("no lookups need uploading");
    }

    // cleanup runs only after every upload succeeded
    let stale: Vec<String> = existing_names
        .into_iter()
        .filter(|name| !lookups.contains_key(name))
        .collect();
    let deleted = stale.len();

    if !stale.is_empty() {
        tracing::info!("deleting {deleted} stale lookups");
        stream::iter(stale)
            .map(|name| async move { gateway.delete_pypi_lookup(channel, &name).await })
            .buffer_unordered(options.concurrency)
            .try_collect::<Vec<()>>()
            .await?;
    }

    Ok(UploadSummary {
        uploaded,
        skipped,
        deleted,
    })
}

/// Decides whether a lookup must be uploaded. Any missing signal (no object,
/// no metadata) schedules an upload.
async fn needs_upload(
    gateway: &StoreGateway,
    channel: Channel,
    lookup: &PreparedLookup,
) -> Result<bool, StoreError> {
    let existing_hash = match gateway
        .head_pypi_lookup_hash(channel, &lookup.pypi_name)
        .await?
    {
        // object does not exist
        None => return Ok(true),
        Some(Some(hash)) => hash,
        // legacy object without metadata, compare by content
        Some(None) => match gateway.get_pypi_lookup(channel, &lookup.pypi_name).await? {
            Some(bytes) => content_sha256(&bytes),
            None => return Ok(true),
        },
    };

    Ok(existing_hash != lookup.sha256)
}
