//! Fetching `channeldata.json` and `repodata.json` from a channel.

use std::time::Duration;

use indexmap::IndexMap;
use mapper_types::{
    ChannelData, Channel, Label, PackageRecord, RepoData, Subdir, DEFAULT_SUBDIRS,
};
use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use url::Url;

/// The timeout applied to repodata and channeldata requests.
const REPODATA_TIMEOUT: Duration = Duration::from_secs(60);

/// The anaconda.org API used to enumerate the labels of a channel.
const ANACONDA_API_BASE: &str = "https://api.anaconda.org";

/// An error that can occur while fetching repodata or channeldata.
#[derive(Debug, thiserror::Error)]
pub enum FetchRepodataError {
    /// There was an error on the HTTP request.
    #[error(transparent)]
    HttpError(#[from] reqwest_middleware::Error),

    /// The requested file does not exist on the channel.
    #[error("no repodata found at {0}")]
    NotFound(Url),

    /// The response body could not be decoded.
    #[error("could not parse the response from {0}")]
    ParseError(Url, #[source] reqwest::Error),
}

impl From<reqwest::Error> for FetchRepodataError {
    fn from(err: reqwest::Error) -> Self {
        FetchRepodataError::HttpError(err.into())
    }
}

/// Builds the URL of a subdir's `repodata.json`, optionally inside a label
/// view. The `main` label is addressed without a `label/` segment.
pub fn repodata_url(base: &Url, subdir: &Subdir, label: Option<&Label>) -> Url {
    let path = match label.filter(|label| !label.is_main()) {
        Some(label) => format!("label/{label}/{subdir}/repodata.json"),
        None => format!("{subdir}/repodata.json"),
    };
    base.join(&path).expect("repodata paths are valid url segments")
}

/// Fetches and parses a single `repodata.json`.
///
/// A missing file is reported as [`FetchRepodataError::NotFound`] so callers
/// can skip the subdir; every other HTTP error is fatal for the shard that
/// requested it.
pub async fn fetch_repodata(
    client: &ClientWithMiddleware,
    url: &Url,
) -> Result<RepoData, FetchRepodataError> {
    tracing::debug!("fetching repodata from {url}");

    let response = client
        .get(url.clone())
        .timeout(REPODATA_TIMEOUT)
        .send()
        .await?;

    if response.status() == StatusCode::NOT_FOUND {
        return Err(FetchRepodataError::NotFound(url.clone()));
    }
    let response = response.error_for_status()?;

    response
        .json::<RepoData>()
        .await
        .map_err(|err| FetchRepodataError::ParseError(url.clone(), err))
}

/// Fetches the repodata of a subdir for every given label and overlays the
/// merged `packages`/`packages.conda` views into one filename-keyed map.
///
/// Labels are iterated in order; when two labels publish the same filename
/// the last one wins, which is logged because it usually points at a
/// mislabelled upload.
pub async fn fetch_merged_repodata(
    client: &ClientWithMiddleware,
    base: &Url,
    subdir: &Subdir,
    labels: &[Label],
) -> Result<IndexMap<String, PackageRecord>, FetchRepodataError> {
    let mut merged: IndexMap<String, PackageRecord> = IndexMap::new();

    let main = [Label::main()];
    let labels = if labels.is_empty() { &main[..] } else { labels };

    for label in labels {
        let url = repodata_url(base, subdir, Some(label));
        let repodata = match fetch_repodata(client, &url).await {
            Ok(repodata) => repodata,
            Err(FetchRepodataError::NotFound(url)) => {
                tracing::warn!("no repodata for label '{label}' at {url}, skipping");
                continue;
            }
            Err(err) => return Err(err),
        };

        for (filename, record) in repodata.merged_records() {
            if merged.contains_key(&filename) {
                tracing::warn!(
                    "{filename} is published under multiple labels, keeping the one from '{label}'"
                );
            }
            merged.insert(filename, record);
        }
    }

    Ok(merged)
}

/// Fetches and parses the `channeldata.json` at the root of a channel.
pub async fn fetch_channeldata(
    client: &ClientWithMiddleware,
    base: &Url,
) -> Result<ChannelData, FetchRepodataError> {
    let url = base
        .join("channeldata.json")
        .expect("channeldata.json is a valid url segment");

    tracing::debug!("fetching channeldata from {url}");

    let response = client
        .get(url.clone())
        .timeout(REPODATA_TIMEOUT)
        .send()
        .await?;

    if response.status() == StatusCode::NOT_FOUND {
        return Err(FetchRepodataError::NotFound(url));
    }
    let response = response.error_for_status()?;

    response
        .json::<ChannelData>()
        .await
        .map_err(|err| FetchRepodataError::ParseError(url, err))
}

/// Returns the subdirs of a channel: the union of the per-package subdirs in
/// `channeldata.json`, or the built-in default list for channels that do not
/// publish channeldata.
pub async fn list_subdirs(
    client: &ClientWithMiddleware,
    channel: Channel,
    base_url: Option<&Url>,
) -> Result<Vec<Subdir>, FetchRepodataError> {
    if !channel.supports_channeldata() {
        return Ok(DEFAULT_SUBDIRS.iter().map(|s| Subdir::from(*s)).collect());
    }

    let base = base_url.cloned().unwrap_or_else(|| channel.base_url());
    let channeldata = fetch_channeldata(client, &base).await?;

    Ok(channeldata
        .all_subdirs()
        .into_iter()
        .map(Subdir::new)
        .collect())
}

/// Lists the labels of a channel through the anaconda.org API, in the order
/// the API reports them.
///
/// Labels only matter for channels without channeldata. The order is
/// significant: [`fetch_merged_repodata`] overlays labels in iteration order
/// with last-label-wins on filename collisions, so the listing order decides
/// which record survives. The API accepts an optional token for channels
/// whose label listing is not public; on any failure (or an empty listing)
/// the label set degrades to just `main` with a warning, which keeps the
/// pipeline alive at the cost of missing labelled uploads.
///
/// `api_base` overrides the anaconda.org endpoint; tests point it at a
/// fixture server.
pub async fn list_labels(
    client: &ClientWithMiddleware,
    channel: Channel,
    token: Option<&str>,
    api_base: Option<&Url>,
) -> Vec<Label> {
    let api_base = match api_base {
        Some(base) => base.as_str().trim_end_matches('/').to_owned(),
        None => ANACONDA_API_BASE.to_owned(),
    };
    let url = format!("{api_base}/channels/{channel}");

    let mut builder = client.get(&url).timeout(REPODATA_TIMEOUT);
    if let Some(token) = token {
        builder = builder.bearer_auth(token);
    }

    let labels = async {
        let response = builder.send().await?.error_for_status()?;
        // the map is keyed by label name; keep the document order
        let listing: IndexMap<String, serde_json::Value> = response.json().await?;
        Ok::<_, reqwest_middleware::Error>(listing)
    }
    .await;

    match labels {
        Ok(listing) if !listing.is_empty() => listing.keys().map(Label::new).collect(),
        Ok(_) => {
            tracing::warn!("{channel} reported no labels, assuming 'main'");
            vec![Label::main()]
        }
        Err(err) => {
            tracing::warn!("could not list labels for {channel} ({err}), assuming 'main'");
            vec![Label::main()]
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_repodata_url() {
        let base = Url::parse("https://conda.anaconda.org/conda-forge/").unwrap();
        assert_eq!(
            repodata_url(&base, &Subdir::from("noarch"), None).as_str(),
            "https://conda.anaconda.org/conda-forge/noarch/repodata.json"
        );
        assert_eq!(
            repodata_url(&base, &Subdir::from("noarch"), Some(&Label::main())).as_str(),
            "https://conda.anaconda.org/conda-forge/noarch/repodata.json"
        );
        assert_eq!(
            repodata_url(&base, &Subdir::from("linux-64"), Some(&Label::new("rc"))).as_str(),
            "https://conda.anaconda.org/conda-forge/label/rc/linux-64/repodata.json"
        );
    }
}
