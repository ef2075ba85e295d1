//! The four interchangeable ways of retrieving a single artifact's metadata.
//!
//! Every backend resolves the same input, `(channel, subdir, filename)`, to
//! an [`ArtifactInfo`] or `None` when the artifact does not exist on that
//! backend. The shard worker picks a preferred backend per artifact (see
//! [`Backend::preferred`]); `check-one` walks through several of them.

mod download;
mod mirror;
mod oci;
mod streamed;

use std::fmt::{Display, Formatter};
use std::time::Duration;

use mapper_types::{ArchiveType, Channel, Label, Subdir};
use reqwest_middleware::ClientWithMiddleware;
use url::Url;

use crate::{ArtifactInfo, ExtractError};

/// The timeout applied to every artifact fetch request.
pub(crate) const ARTIFACT_FETCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Identifies one of the retrieval backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Pull the artifact from the ghcr.io OCI mirror.
    Oci,
    /// Fetch only the metadata bytes using HTTP range requests (`.conda`) or
    /// an early-terminated streamed read (`.tar.bz2`).
    Streamed,
    /// Download the whole artifact and parse it in memory.
    Download,
    /// Read the pre-extracted per-artifact JSON from the legacy metadata
    /// mirror. Only used by `check-one` and on explicit request.
    LegacyMirror,
}

impl Backend {
    /// The preferred backend for an artifact, following the production
    /// policy: the OCI mirror serves conda-forge `.tar.bz2` best, channels
    /// without range support must download in full, everything else is
    /// range-streamed.
    pub fn preferred(channel: Channel, archive_type: ArchiveType) -> Backend {
        if channel == Channel::CondaForge && archive_type == ArchiveType::TarBz2 {
            Backend::Oci
        } else if !channel.supports_range_requests() {
            Backend::Download
        } else {
            Backend::Streamed
        }
    }

    /// The order in which `check-one` walks the backends when none is forced.
    pub const CHECK_ONE_ORDER: [Backend; 3] =
        [Backend::Oci, Backend::Streamed, Backend::LegacyMirror];
}

impl Display for Backend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Backend::Oci => "oci",
            Backend::Streamed => "streamed",
            Backend::Download => "download",
            Backend::LegacyMirror => "legacy-mirror",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "oci" => Ok(Backend::Oci),
            "streamed" => Ok(Backend::Streamed),
            "download" => Ok(Backend::Download),
            "legacy-mirror" => Ok(Backend::LegacyMirror),
            other => Err(format!("'{other}' is not a known backend")),
        }
    }
}

/// Everything needed to locate one artifact on any backend.
#[derive(Debug, Clone)]
pub struct ArtifactRequest {
    /// The channel serving the artifact.
    pub channel: Channel,

    /// The subdir within the channel.
    pub subdir: Subdir,

    /// The artifact filename, e.g. `numpy-1.26.4-py311h64a7726_0.conda`.
    pub filename: String,

    /// The label the artifact was published under, for channels that use
    /// labels. `None` and `main` address the unlabelled URL.
    pub label: Option<Label>,

    /// The SHA256 the repodata declares for the artifact. Backends that can
    /// address content by hash use it to skip indirection.
    pub expected_sha256: Option<String>,

    /// Overrides the channel base URL. Tests point this at a local fixture
    /// server.
    pub base_url: Option<Url>,
}

impl ArtifactRequest {
    /// Creates a request for an artifact on the main label.
    pub fn new(channel: Channel, subdir: Subdir, filename: impl Into<String>) -> Self {
        Self {
            channel,
            subdir,
            filename: filename.into(),
            label: None,
            expected_sha256: None,
            base_url: None,
        }
    }

    /// The archive type derived from the filename.
    pub fn archive_type(&self) -> Result<ArchiveType, ExtractError> {
        ArchiveType::try_from(self.filename.as_str()).ok_or(ExtractError::UnsupportedArchiveType)
    }

    /// The plain HTTPS URL of the artifact on the channel.
    pub(crate) fn artifact_url(&self) -> Url {
        let base = self
            .base_url
            .clone()
            .unwrap_or_else(|| self.channel.base_url());
        let path = match self.label.as_ref().filter(|label| !label.is_main()) {
            Some(label) => format!("label/{label}/{}/{}", self.subdir, self.filename),
            None => format!("{}/{}", self.subdir, self.filename),
        };
        base.join(&path).expect("artifact paths are valid url segments")
    }
}

/// Retrieves and parses a single artifact through the given backend.
///
/// Returns `Ok(None)` when the backend does not know the artifact. The
/// range-streamed backend transparently downgrades to a full download when a
/// `.tar.bz2` fails with one of the known truncated-stream errors; any other
/// error propagates.
pub async fn fetch_artifact_info(
    client: &ClientWithMiddleware,
    request: &ArtifactRequest,
    backend: Backend,
) -> Result<Option<ArtifactInfo>, ExtractError> {
    match backend {
        Backend::Oci => oci::fetch(client, request).await,
        Backend::Download => download::fetch(client, request).await,
        Backend::LegacyMirror => mirror::fetch(client, request).await,
        Backend::Streamed => match streamed::fetch(client, request).await {
            Err(err)
                if request.archive_type()? == ArchiveType::TarBz2
                    && err.triggers_download_fallback() =>
            {
                tracing::warn!(
                    "streamed read of {} failed ({err}), falling back to full download",
                    request.filename
                );
                download::fetch(client, request).await
            }
            other => other,
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_preferred_backend() {
        assert_eq!(
            Backend::preferred(Channel::CondaForge, ArchiveType::TarBz2),
            Backend::Oci
        );
        assert_eq!(
            Backend::preferred(Channel::CondaForge, ArchiveType::Conda),
            Backend::Streamed
        );
        assert_eq!(
            Backend::preferred(Channel::TangoControls, ArchiveType::Conda),
            Backend::Download
        );
        assert_eq!(
            Backend::preferred(Channel::Bioconda, ArchiveType::TarBz2),
            Backend::Streamed
        );
    }

    #[test]
    fn test_artifact_url_with_label() {
        let mut request = ArtifactRequest::new(
            Channel::TangoControls,
            Subdir::from("linux-64"),
            "pytango-9.4.2-py311h5b7b71f_0.conda",
        );
        assert_eq!(
            request.artifact_url().as_str(),
            "https://conda.anaconda.org/tango-controls/linux-64/pytango-9.4.2-py311h5b7b71f_0.conda"
        );

        request.label = Some(Label::new("dev"));
        assert_eq!(
            request.artifact_url().as_str(),
            "https://conda.anaconda.org/tango-controls/label/dev/linux-64/pytango-9.4.2-py311h5b7b71f_0.conda"
        );

        request.label = Some(Label::main());
        assert_eq!(
            request.artifact_url().as_str(),
            "https://conda.anaconda.org/tango-controls/linux-64/pytango-9.4.2-py311h5b7b71f_0.conda"
        );
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!("oci".parse::<Backend>().unwrap(), Backend::Oci);
        assert_eq!("streamed".parse::<Backend>().unwrap(), Backend::Streamed);
        assert!("libcfgraph".parse::<Backend>().is_err());
    }
}
