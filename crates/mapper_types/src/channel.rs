use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use url::Url;

/// The closed set of upstream channels the pipeline knows how to mirror.
///
/// Each channel has a fixed base URL and a couple of capability flags that
/// drive backend selection: whether `channeldata.json` enumerates subdirs and
/// whether the hosting CDN honors HTTP range requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    /// The community driven conda-forge channel.
    CondaForge,
    /// The pytorch release channel.
    Pytorch,
    /// The bioconda channel.
    Bioconda,
    /// The tango-controls channel. Does not publish `channeldata.json` and is
    /// served from a host that rejects range requests.
    TangoControls,
}

impl Channel {
    /// All channels, in a stable order.
    pub const ALL: [Channel; 4] = [
        Channel::CondaForge,
        Channel::Pytorch,
        Channel::Bioconda,
        Channel::TangoControls,
    ];

    /// The canonical name of the channel as used in URLs and storage keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::CondaForge => "conda-forge",
            Channel::Pytorch => "pytorch",
            Channel::Bioconda => "bioconda",
            Channel::TangoControls => "tango-controls",
        }
    }

    /// The base URL of the channel, with a trailing slash so it can be
    /// extended with [`Url::join`].
    pub fn base_url(&self) -> Url {
        let url = match self {
            Channel::CondaForge => "https://conda.anaconda.org/conda-forge/",
            Channel::Pytorch => "https://conda.anaconda.org/pytorch/",
            Channel::Bioconda => "https://conda.anaconda.org/bioconda/",
            Channel::TangoControls => "https://conda.anaconda.org/tango-controls/",
        };
        Url::parse(url).expect("channel base urls are valid")
    }

    /// Whether `channeldata.json` on this channel enumerates the subdirs. For
    /// channels where it does not, [`DEFAULT_SUBDIRS`] is used and labels are
    /// iterated instead.
    pub fn supports_channeldata(&self) -> bool {
        !matches!(self, Channel::TangoControls)
    }

    /// Whether the host serving this channel supports HTTP range requests.
    /// Channels without range support always use the full-download backend.
    pub fn supports_range_requests(&self) -> bool {
        !matches!(self, Channel::TangoControls)
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An unrecognized channel name was encountered.
#[derive(Debug, Clone, thiserror::Error)]
#[error("'{0}' is not a supported channel")]
pub struct ParseChannelError(pub String);

impl FromStr for Channel {
    type Err = ParseChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .iter()
            .find(|channel| channel.as_str() == s)
            .copied()
            .ok_or_else(|| ParseChannelError(s.to_owned()))
    }
}

/// The architecture/platform tag of a directory within a channel, e.g.
/// `linux-64` or `noarch`.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Subdir(String);

impl Subdir {
    /// Constructs a new subdir from its tag.
    pub fn new(subdir: impl Into<String>) -> Self {
        Self(subdir.into())
    }

    /// The subdir tag as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Subdir {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Subdir {
    fn from(value: &str) -> Self {
        Subdir::new(value)
    }
}

/// Subdirs assumed for channels whose `channeldata.json` does not enumerate
/// them.
pub const DEFAULT_SUBDIRS: [&str; 6] = [
    "noarch",
    "linux-64",
    "linux-aarch64",
    "osx-64",
    "osx-arm64",
    "win-64",
];

/// A named view inside a channel. Only used for channels that do not support
/// `channeldata.json`; everything else is implicitly served from `main`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    /// The implicit default label.
    pub fn main() -> Self {
        Label("main".to_owned())
    }

    /// Constructs a new label from its name.
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// Whether this is the default `main` label, which is addressed without a
    /// `label/` URL segment.
    pub fn is_main(&self) -> bool {
        self.0 == "main"
    }

    /// The label name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Label {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_channel_roundtrip() {
        for channel in Channel::ALL {
            assert_eq!(Channel::from_str(channel.as_str()).unwrap(), channel);
        }
        assert!(Channel::from_str("defaults").is_err());
    }

    #[test]
    fn test_channel_serde_uses_kebab_case() {
        assert_eq!(
            serde_json::to_string(&Channel::CondaForge).unwrap(),
            "\"conda-forge\""
        );
        assert_eq!(
            serde_json::from_str::<Channel>("\"tango-controls\"").unwrap(),
            Channel::TangoControls
        );
    }

    #[test]
    fn test_base_url_is_joinable() {
        let url = Channel::CondaForge
            .base_url()
            .join("noarch/repodata.json")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://conda.anaconda.org/conda-forge/noarch/repodata.json"
        );
    }

    #[test]
    fn test_capabilities() {
        assert!(Channel::CondaForge.supports_channeldata());
        assert!(!Channel::TangoControls.supports_channeldata());
        assert!(!Channel::TangoControls.supports_range_requests());
    }
}
