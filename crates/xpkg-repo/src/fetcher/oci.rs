//! OCI registry fetcher

use async_trait::async_trait;
use oci_distribution::Reference;
use oci_distribution::client::{Client, ClientConfig, ClientProtocol};
use oci_distribution::errors::{OciDistributionError, OciErrorCode};
use oci_distribution::secrets::RegistryAuth;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use xpkg_core::PackageReference;

use super::Fetcher;
use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::error::{RepoError, Result};
use crate::image::{ImageLayer, ImageMeta, PackageImage, media_types};

/// Tags requested per page when listing a repository
const TAG_PAGE_SIZE: usize = 1000;

/// Pulls package images from OCI registries
pub struct OciFetcher {
    client: Client,
    credentials: CredentialStore,
    docker_config: Option<PathBuf>,
    timeout: Duration,
}

/// The parts of the image config we read
#[derive(Debug, Default, Deserialize)]
struct ImageConfig {
    #[serde(default)]
    config: ImageConfigBody,
}

#[derive(Debug, Default, Deserialize)]
struct ImageConfigBody {
    #[serde(rename = "Labels", default)]
    labels: Option<BTreeMap<String, String>>,
}

impl OciFetcher {
    pub fn new(config: &Config, credentials: CredentialStore) -> Self {
        let protocol = if config.insecure_registries.is_empty() {
            ClientProtocol::Https
        } else {
            ClientProtocol::HttpsExcept(config.insecure_registries.clone())
        };
        let client = Client::new(ClientConfig {
            protocol,
            ..Default::default()
        });

        Self {
            client,
            credentials,
            docker_config: config.docker_config.clone(),
            timeout: config.fetch_timeout,
        }
    }

    /// Bound a single registry call by the configured fetch timeout
    async fn bounded<T, F>(&self, reference: &PackageReference, what: &str, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, OciDistributionError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(registry_error(reference, what, e)),
            Err(_) => Err(RepoError::RegistryUnavailable {
                package: reference.source().to_string(),
                message: format!("{what}: timed out after {:?}", self.timeout),
            }),
        }
    }

    fn auth(&self, reference: &PackageReference) -> Result<RegistryAuth> {
        self.credentials
            .auth_for(reference.registry(), self.docker_config.as_deref())
    }

    fn oci_reference(reference: &PackageReference, tag: &str) -> Result<Reference> {
        let full = format!("{}:{}", reference.source(), tag);
        Reference::try_from(full.as_str()).map_err(|e| RepoError::InvalidReference {
            reference: full.clone(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl Fetcher for OciFetcher {
    async fn tags(&self, reference: &PackageReference) -> Result<Vec<String>> {
        let oci_ref = Self::oci_reference(reference, "latest")?;
        let auth = self.auth(reference)?;

        tracing::debug!(package = %reference.source(), "listing tags");
        let mut tags: Vec<String> = Vec::new();
        let mut last: Option<String> = None;
        loop {
            let page = self
                .bounded(
                    reference,
                    "Failed to list tags",
                    self.client
                        .list_tags(&oci_ref, &auth, Some(TAG_PAGE_SIZE), last.as_deref()),
                )
                .await?
                .tags;

            let next = next_page_start(&page, last.as_deref(), TAG_PAGE_SIZE);
            tags.extend(page);
            match next {
                Some(start) => last = Some(start),
                None => break,
            }
        }

        tracing::debug!(package = %reference.source(), count = tags.len(), "listed tags");
        Ok(tags)
    }

    async fn fetch(&self, reference: &PackageReference, tag: &str) -> Result<PackageImage> {
        let oci_ref = Self::oci_reference(reference, tag)?;
        let auth = self.auth(reference)?;

        tracing::info!(package = %reference.source(), tag, "pulling package image");
        let what = format!("Failed to pull {tag}");
        let data = self
            .bounded(
                reference,
                &what,
                self.client.pull(&oci_ref, &auth, media_types::LAYERS.to_vec()),
            )
            .await?;

        let descriptors = data
            .manifest
            .as_ref()
            .map(|m| m.layers.clone())
            .unwrap_or_default();

        let layers = data
            .layers
            .into_iter()
            .enumerate()
            .map(|(i, layer)| {
                let mut converted = ImageLayer::new(layer.media_type, layer.data);
                converted.annotations = layer
                    .annotations
                    .unwrap_or_default()
                    .into_iter()
                    .collect();
                if let Some(descriptor) = descriptors.get(i) {
                    converted.digest = descriptor.digest.clone();
                }
                converted
            })
            .collect();

        let config = parse_image_config(reference, &data.config.data)?;
        let digest = match data.digest {
            Some(digest) => digest,
            None => self.head(reference, tag).await?,
        };

        Ok(PackageImage {
            meta: ImageMeta {
                registry: reference.registry().to_string(),
                repository: reference.repository().to_string(),
                version: tag.to_string(),
                digest,
            },
            config_labels: config.config.labels.unwrap_or_default(),
            layers,
        })
    }

    async fn head(&self, reference: &PackageReference, tag: &str) -> Result<String> {
        let oci_ref = Self::oci_reference(reference, tag)?;
        let auth = self.auth(reference)?;

        let what = format!("Failed to fetch digest of {tag}");
        self.bounded(reference, &what, self.client.fetch_manifest_digest(&oci_ref, &auth))
            .await
    }
}

/// Where the next tag page starts, or `None` once the listing is complete
///
/// A short page ends the listing. So does a page that makes no progress,
/// which is what a registry that ignores `last` sends back.
fn next_page_start(page: &[String], previous: Option<&str>, page_size: usize) -> Option<String> {
    if page.len() < page_size {
        return None;
    }
    let last = page.last()?;
    if previous.is_some_and(|p| p >= last.as_str()) {
        return None;
    }
    Some(last.clone())
}

fn parse_image_config(reference: &PackageReference, data: &[u8]) -> Result<ImageConfig> {
    if data.is_empty() {
        return Ok(ImageConfig::default());
    }
    serde_json::from_slice(data).map_err(|e| RepoError::MalformedPackage {
        package: reference.source().to_string(),
        message: format!("invalid image config: {e}"),
    })
}

/// Map a registry client error to the matching error kind
fn registry_error(
    reference: &PackageReference,
    what: &str,
    error: OciDistributionError,
) -> RepoError {
    let message = format!("{what}: {error}");
    let auth_failed = match &error {
        OciDistributionError::AuthenticationFailure(_)
        | OciDistributionError::UnauthorizedError { .. } => true,
        OciDistributionError::ServerError { code, .. } => matches!(code, 401 | 403),
        OciDistributionError::RegistryError { envelope, .. } => envelope
            .errors
            .iter()
            .any(|e| matches!(e.code, OciErrorCode::Unauthorized | OciErrorCode::Denied)),
        _ => false,
    };
    if auth_failed {
        return RepoError::AuthFailed {
            registry: reference.registry().to_string(),
            message,
        };
    }

    match error {
        OciDistributionError::ManifestParsingError(_)
        | OciDistributionError::VersionedParsingError(_)
        | OciDistributionError::IncompatibleLayerMediaTypeError(_)
        | OciDistributionError::UnsupportedMediaTypeError(_)
        | OciDistributionError::UnsupportedSchemaVersionError(_)
        | OciDistributionError::PullNoLayersError => RepoError::MalformedPackage {
            package: reference.source().to_string(),
            message,
        },
        _ => RepoError::RegistryUnavailable {
            package: reference.source().to_string(),
            message,
        },
    }
}
