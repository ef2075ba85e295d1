//! A conditionally-cached reader for the published channel index.
//!
//! The channel index weighs tens of megabytes and rarely changes between
//! interactive invocations, so it is cached on disk keyed by channel and
//! endpoint. On every fetch a conditional request is sent using the `ETag`
//! and `Last-Modified` values captured from the previous response; a `304`
//! reuses the cached file, a network failure falls back to the cache marked
//! as stale.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mapper_types::{Channel, IndexMapping};
use md5::{Digest, Md5};
use reqwest::{
    header,
    header::{HeaderMap, HeaderValue},
    Response, StatusCode,
};
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};
use url::Url;

/// The timeout applied to index downloads.
const INDEX_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Extracted HTTP response headers that enable caching the index files.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct CacheHeaders {
    /// The `ETag` HTTP cache header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    /// The `Last-Modified` HTTP cache header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

impl From<&Response> for CacheHeaders {
    fn from(response: &Response) -> Self {
        let etag = response
            .headers()
            .get(header::ETAG)
            .and_then(|header| header.to_str().ok())
            .map(ToOwned::to_owned);

        let last_modified = response
            .headers()
            .get(header::LAST_MODIFIED)
            .and_then(|header| header.to_str().ok())
            .map(ToOwned::to_owned);

        Self {
            etag,
            last_modified,
        }
    }
}

impl CacheHeaders {
    /// Adds the conditional headers to the specified request so the server
    /// only sends new data when the cached copy is out of date.
    pub fn add_to_request(&self, headers: &mut HeaderMap) {
        if let Some(etag) = self
            .etag
            .as_deref()
            .and_then(|etag| HeaderValue::from_str(etag).ok())
        {
            headers.insert(header::IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = self
            .last_modified
            .as_deref()
            .and_then(|last_modified| HeaderValue::from_str(last_modified).ok())
        {
            headers.insert(header::IF_MODIFIED_SINCE, last_modified);
        }
    }
}

/// How the returned index relates to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// A fresh copy was downloaded and cached.
    Downloaded,
    /// The server confirmed the cached copy is still current.
    CachedUpToDate,
    /// The network failed but a cached copy was available.
    CachedStale,
    /// The index does not exist on the endpoint.
    NotFound,
    /// The network failed and no cached copy exists.
    Failed,
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            CacheStatus::Downloaded => "downloaded",
            CacheStatus::CachedUpToDate => "cached (up to date)",
            CacheStatus::CachedStale => "cached (stale)",
            CacheStatus::NotFound => "not found",
            CacheStatus::Failed => "failed",
        };
        f.write_str(text)
    }
}

/// The on-disk cache of channel indices.
#[derive(Debug, Clone)]
pub struct IndexCache {
    cache_dir: PathBuf,
}

impl IndexCache {
    /// Creates a cache under the user's cache directory
    /// (`$XDG_CACHE_HOME/conda-pypi-mapper` on Linux).
    pub fn new() -> Result<Self, std::io::Error> {
        let base = dirs::cache_dir().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no cache directory available on this platform",
            )
        })?;
        Ok(Self::with_dir(base.join("conda-pypi-mapper")))
    }

    /// Creates a cache rooted at an explicit directory.
    pub fn with_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// The paths of the cached index and its metadata sidecar for a channel
    /// on a given endpoint. The endpoint URL is folded into the file name so
    /// caches of different endpoints never collide.
    pub fn cache_paths(&self, channel: Channel, base_url: &Url) -> (PathBuf, PathBuf) {
        let url_hash = hex::encode(Md5::digest(base_url.as_str().as_bytes()));
        let stem = format!("index_{channel}_{}", &url_hash[..8]);

        (
            self.cache_dir.join(format!("{stem}.json")),
            self.cache_dir.join(format!("{stem}.meta")),
        )
    }

    /// Fetches the channel index from `{base_url}/hash-v0/{channel}/index.json`
    /// with conditional caching.
    pub async fn fetch_index(
        &self,
        client: &ClientWithMiddleware,
        channel: Channel,
        base_url: &Url,
    ) -> (Option<IndexMapping>, CacheStatus) {
        let url = match base_url.join(&format!("hash-v0/{channel}/index.json")) {
            Ok(url) => url,
            Err(_) => return (None, CacheStatus::Failed),
        };

        let (index_path, meta_path) = self.cache_paths(channel, base_url);
        let cached_headers = load_cached_headers(&meta_path);

        let mut request_headers = HeaderMap::new();
        cached_headers.add_to_request(&mut request_headers);

        let response = client
            .get(url.clone())
            .timeout(INDEX_FETCH_TIMEOUT)
            .headers(request_headers)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!("failed to fetch channel index from {url}: {err}");
                return match self.load_cached_index(&index_path) {
                    Some(index) => (Some(index), CacheStatus::CachedStale),
                    None => (None, CacheStatus::Failed),
                };
            }
        };

        match response.status() {
            StatusCode::NOT_MODIFIED => {
                tracing::info!("index for {channel} not modified, using cache");
                match self.load_cached_index(&index_path) {
                    Some(index) => (Some(index), CacheStatus::CachedUpToDate),
                    None => {
                        // a 304 without a cached file means the sidecar
                        // outlived the index, re-fetch without conditions
                        tracing::warn!("got 304 but the cache file is missing, re-downloading");
                        let _ = fs_err::remove_file(&meta_path);
                        Box::pin(self.fetch_index(client, channel, base_url)).await
                    }
                }
            }
            StatusCode::NOT_FOUND => {
                tracing::warn!("channel index not found at {url}");
                (None, CacheStatus::NotFound)
            }
            status if status.is_success() => {
                let headers = CacheHeaders::from(&response);
                let bytes = match response.bytes().await {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        tracing::warn!("failed to read the index body from {url}: {err}");
                        return match self.load_cached_index(&index_path) {
                            Some(index) => (Some(index), CacheStatus::CachedStale),
                            None => (None, CacheStatus::Failed),
                        };
                    }
                };

                let index = match IndexMapping::from_slice(&bytes) {
                    Ok(index) => index,
                    Err(err) => {
                        tracing::error!("could not parse the channel index from {url}: {err}");
                        return (None, CacheStatus::Failed);
                    }
                };

                if let Err(err) = self.store(&index_path, &meta_path, &bytes, &headers) {
                    tracing::warn!("failed to cache the index for {channel}: {err}");
                }

                (Some(index), CacheStatus::Downloaded)
            }
            status => {
                tracing::warn!("fetching {url} returned {status}");
                match self.load_cached_index(&index_path) {
                    Some(index) => (Some(index), CacheStatus::CachedStale),
                    None => (None, CacheStatus::Failed),
                }
            }
        }
    }

    /// Removes cached indices, optionally only those of one channel. Returns
    /// the number of removed index files.
    pub fn clear(&self, channel: Option<Channel>) -> Result<usize, std::io::Error> {
        let prefix = match channel {
            Some(channel) => format!("index_{channel}_"),
            None => "index_".to_owned(),
        };

        let mut removed = 0;
        let entries = match fs_err::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err),
        };

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&prefix) && name.ends_with(".json") {
                fs_err::remove_file(entry.path())?;
                let meta = entry.path().with_extension("meta");
                if meta.exists() {
                    fs_err::remove_file(meta)?;
                }
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn load_cached_index(&self, index_path: &Path) -> Option<IndexMapping> {
        let bytes = fs_err::read(index_path).ok()?;
        match IndexMapping::from_slice(&bytes) {
            Ok(index) => Some(index),
            Err(err) => {
                tracing::error!("failed to load the cached index: {err}");
                None
            }
        }
    }

    /// Writes the index and its metadata sidecar atomically: both files are
    /// staged as temporary files in the cache directory and renamed into
    /// place.
    fn store(
        &self,
        index_path: &Path,
        meta_path: &Path,
        bytes: &[u8],
        headers: &CacheHeaders,
    ) -> Result<(), std::io::Error> {
        fs_err::create_dir_all(&self.cache_dir)?;

        let mut index_file = tempfile::NamedTempFile::new_in(&self.cache_dir)?;
        index_file.write_all(bytes)?;
        index_file.persist(index_path)?;

        let mut meta_file = tempfile::NamedTempFile::new_in(&self.cache_dir)?;
        meta_file.write_all(&serde_json::to_vec(headers)?)?;
        meta_file.persist(meta_path)?;

        Ok(())
    }
}

fn load_cached_headers(meta_path: &Path) -> CacheHeaders {
    let Ok(bytes) = fs_err::read(meta_path) else {
        return CacheHeaders::default();
    };
    match serde_json::from_slice(&bytes) {
        Ok(headers) => headers,
        Err(err) => {
            tracing::warn!("failed to load cache metadata: {err}");
            CacheHeaders::default()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_cache_paths_differ_per_endpoint() {
        let cache = IndexCache::with_dir("/tmp/cache");
        let (a, _) = cache.cache_paths(
            Channel::CondaForge,
            &Url::parse("https://mapping.example.com/").unwrap(),
        );
        let (b, _) = cache.cache_paths(
            Channel::CondaForge,
            &Url::parse("http://localhost:9000/conda/").unwrap(),
        );
        assert_ne!(a, b);
        assert!(a
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("index_conda-forge_"));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(CacheStatus::CachedUpToDate.to_string(), "cached (up to date)");
        assert_eq!(CacheStatus::CachedStale.to_string(), "cached (stale)");
    }
}
