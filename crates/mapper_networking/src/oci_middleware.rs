//! Middleware to handle `oci://` URLs to pull conda artifacts from an OCI
//! registry mirror.

use http::{
    header::{ACCEPT, AUTHORIZATION},
    Extensions, StatusCode,
};
use mapper_types::{ArchiveIdentifier, ArchiveType};
use reqwest::{Request, Response, ResponseBuilderExt};
use reqwest_middleware::{Middleware, Next};
use serde::Deserialize;
use url::{ParseError, Url};

#[derive(thiserror::Error, Debug)]
enum OciMiddlewareError {
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    ParseError(#[from] ParseError),

    #[error("Layer not found")]
    LayerNotFound,
}

/// Middleware to handle `oci://` URLs.
///
/// Requests whose URL uses any other scheme pass through untouched. For
/// `oci://` URLs the middleware fetches an anonymous pull token and rewrites
/// the request to the blob URL of the requested artifact. When the caller
/// knows the artifact hash it can send it in the `X-Expected-Sha256` header
/// to skip the manifest roundtrip.
#[derive(Default, Debug, Clone)]
pub struct OciMiddleware;

#[derive(Clone, Debug, Deserialize)]
struct OciToken {
    token: String,
}

// [oci://ghcr.io/channel-mirrors/conda-forge]/[osx-arm64/xtensor-0.25.0-h2ffa867_0.conda]
#[derive(Debug)]
struct OciUrl {
    host: String,
    path: String,
    tag: String,
    media_type: String,
}

/// OCI registry tags are not allowed to contain `+`, `!`, or `=`, so those
/// characters of the version/build tag are replaced with an escape sequence.
fn version_build_tag(tag: &str) -> String {
    tag.replace('+', "__p__")
        .replace('!', "__e__")
        .replace('=', "__eq__")
}

impl OciUrl {
    fn new(url: &Url) -> Result<Self, ParseError> {
        let filename = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default()
            .to_owned();

        let identifier = ArchiveIdentifier::try_from_filename(&filename);

        let (image_name, tag, media_type) = match identifier {
            Some(identifier) => {
                let media_type = match identifier.archive_type {
                    ArchiveType::Conda => "application/vnd.conda.package.v2",
                    ArchiveType::TarBz2 => "application/vnd.conda.package.v1",
                };
                let tag =
                    version_build_tag(&format!("{}-{}", identifier.version, identifier.build_string));
                (identifier.name, tag, media_type.to_owned())
            }
            None => (filename, "latest".to_owned(), String::new()),
        };

        // OCI image names cannot start with `_`, so it is prefixed with `zzz`
        let image_name = if image_name.starts_with('_') {
            format!("zzz{image_name}")
        } else {
            image_name
        };

        let resolved = url.join(&image_name).expect("image name is a valid segment");

        Ok(Self {
            host: url.host_str().unwrap_or("").to_owned(),
            path: resolved.path().trim_start_matches('/').to_owned(),
            tag,
            media_type,
        })
    }

    fn manifest_url(&self) -> Result<Url, ParseError> {
        format!(
            "https://{}/v2/{}/manifests/{}",
            self.host, self.path, self.tag
        )
        .parse()
    }

    fn token_url(&self) -> Result<Url, ParseError> {
        format!(
            "https://{}/token?scope=repository:{}:pull",
            self.host, self.path
        )
        .parse()
    }

    fn blob_url(&self, digest: &str) -> Result<Url, ParseError> {
        format!("https://{}/v2/{}/blobs/{}", self.host, self.path, digest).parse()
    }

    async fn get_token(&self) -> Result<String, OciMiddlewareError> {
        let token_url = self.token_url()?;

        tracing::trace!("requesting OCI pull token from {token_url}");

        let token = reqwest::get(token_url)
            .await?
            .json::<OciToken>()
            .await?
            .token;

        Ok(token)
    }

    async fn rewrite_to_blob_url(req: &mut Request) -> Result<(), OciMiddlewareError> {
        let oci_url = OciUrl::new(req.url())?;
        let token = oci_url.get_token().await?;

        req.headers_mut().insert(
            AUTHORIZATION,
            format!("Bearer {token}")
                .parse()
                .expect("a bearer token is a valid header value"),
        );

        // if we know the hash, we can pull the artifact directly
        // if we don't, we need to pull the manifest and then pull the artifact
        if let Some(expected_sha_hash) = req
            .headers()
            .get("X-Expected-Sha256")
            .and_then(|s| s.to_str().ok())
        {
            *req.url_mut() = oci_url.blob_url(&format!("sha256:{expected_sha_hash}"))?;
        } else {
            let manifest = reqwest::Client::new()
                .get(oci_url.manifest_url()?)
                .header(AUTHORIZATION, format!("Bearer {token}"))
                .header(ACCEPT, "application/vnd.oci.image.manifest.v1+json")
                .send()
                .await?;

            let manifest: Manifest = manifest.json().await?;

            let layer = manifest
                .layers
                .iter()
                .find(|l| l.media_type == oci_url.media_type)
                .ok_or(OciMiddlewareError::LayerNotFound)?;

            *req.url_mut() = oci_url.blob_url(&layer.digest)?;
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct Layer {
    digest: String,
    #[serde(rename = "mediaType")]
    media_type: String,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    layers: Vec<Layer>,
}

fn create_404_response(url: &Url, body: &str) -> Response {
    Response::from(
        http::response::Builder::new()
            .status(StatusCode::NOT_FOUND)
            .url(url.clone())
            .body(body.to_string())
            .expect("a valid response"),
    )
}

#[async_trait::async_trait]
impl Middleware for OciMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        // if the URL is not an OCI URL, we don't need to do anything
        if req.url().scheme() != "oci" {
            return next.run(req, extensions).await;
        }

        match OciUrl::rewrite_to_blob_url(&mut req).await {
            Ok(()) => next.run(req, extensions).await,
            Err(OciMiddlewareError::LayerNotFound) => Ok(create_404_response(
                req.url(),
                "No layer available for media type",
            )),
            Err(e) => Err(reqwest_middleware::Error::Middleware(e.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use sha2::{Digest, Sha256};

    use super::*;

    #[test]
    fn test_version_build_tag_mangling() {
        assert_eq!(version_build_tag("1.2.3-h123_0"), "1.2.3-h123_0");
        assert_eq!(version_build_tag("1.2.3+ab-0"), "1.2.3__p__ab-0");
        assert_eq!(version_build_tag("1!2.0-0"), "1__e__2.0-0");
    }

    #[test]
    fn test_oci_url_for_conda_package() {
        let url = Url::parse(
            "oci://ghcr.io/channel-mirrors/conda-forge/osx-arm64/xtensor-0.25.0-h2ffa867_0.conda",
        )
        .unwrap();
        let oci_url = OciUrl::new(&url).unwrap();

        assert_eq!(oci_url.host, "ghcr.io");
        assert_eq!(oci_url.path, "channel-mirrors/conda-forge/osx-arm64/xtensor");
        assert_eq!(oci_url.tag, "0.25.0-h2ffa867_0");
        assert_eq!(oci_url.media_type, "application/vnd.conda.package.v2");
        assert_eq!(
            oci_url.manifest_url().unwrap().as_str(),
            "https://ghcr.io/v2/channel-mirrors/conda-forge/osx-arm64/xtensor/manifests/0.25.0-h2ffa867_0"
        );
    }

    #[test]
    fn test_oci_url_prefixes_leading_underscore() {
        let url = Url::parse(
            "oci://ghcr.io/channel-mirrors/conda-forge/noarch/_r-mutex-1.0.1-anacondar_1.tar.bz2",
        )
        .unwrap();
        let oci_url = OciUrl::new(&url).unwrap();

        assert_eq!(
            oci_url.path,
            "channel-mirrors/conda-forge/noarch/zzz_r-mutex"
        );
        assert_eq!(oci_url.media_type, "application/vnd.conda.package.v1");
    }

    // test pulling an artifact through the middleware against the live mirror
    #[tokio::test]
    #[ignore = "requires network access to ghcr.io"]
    async fn test_oci_middleware() {
        let middleware = OciMiddleware;

        let client = reqwest::Client::new();
        let client_with_middleware = reqwest_middleware::ClientBuilder::new(client)
            .with(middleware)
            .build();

        let response = client_with_middleware
            .get("oci://ghcr.io/channel-mirrors/conda-forge/osx-arm64/xtensor-0.25.0-h2ffa867_0.conda")
            .header(
                "X-Expected-Sha256",
                "8485a64911c7011c0270b8266ab2bffa1da41c59ac4f0a48000c31d4f4a966dd",
            )
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let mut hasher = Sha256::new();
        std::io::copy(&mut response.bytes().await.unwrap().as_ref(), &mut hasher).unwrap();
        let hash = hasher.finalize();
        assert_eq!(
            format!("{hash:x}"),
            "8485a64911c7011c0270b8266ab2bffa1da41c59ac4f0a48000c31d4f4a966dd"
        );
    }
}
