//! Package images
//!
//! A Crossplane package is an OCI image whose layers are tarballs. The layer
//! holding `package.yaml` is annotated `io.crossplane.xpkg: base`; optional
//! schema bundles are annotated `io.crossplane.xpkg: schema.<language>`.
//! Registries that drop layer annotations still carry them as config labels
//! keyed `io.crossplane.xpkg:<layer digest>`.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use tar::{Archive, Builder, Header};

use crate::error::{RepoError, Result};

/// Layer media types accepted when pulling
pub mod media_types {
    pub const OCI_LAYER_TAR: &str = "application/vnd.oci.image.layer.v1.tar";
    pub const OCI_LAYER_TAR_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
    pub const DOCKER_LAYER_TAR_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
    pub const OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";

    pub const LAYERS: [&str; 3] = [OCI_LAYER_TAR, OCI_LAYER_TAR_GZIP, DOCKER_LAYER_TAR_GZIP];
}

/// Layer annotation naming the layer's role
pub const XPKG_ANNOTATION: &str = "io.crossplane.xpkg";

/// Role of the layer carrying `package.yaml`
pub const BASE_ANNOTATION: &str = "base";

/// Role prefix of schema layers (`schema.kcl`, `schema.python`, ...)
pub const SCHEMA_ANNOTATION_PREFIX: &str = "schema.";

/// Config label prefix mirroring layer annotations
pub const LABEL_PREFIX: &str = "io.crossplane.xpkg:";

/// Package stream file inside the base layer
pub const STREAM_FILE: &str = "package.yaml";

const MANIFEST_FILE: &str = "manifest.json";
const BLOB_DIR: &str = "blobs/sha256";

/// Where an image came from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMeta {
    pub registry: String,
    pub repository: String,
    pub version: String,
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageLayer {
    pub media_type: String,
    pub digest: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl ImageLayer {
    pub fn new(media_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            media_type: media_type.into(),
            digest: sha256_digest(&data),
            annotations: BTreeMap::new(),
            data,
        }
    }

    /// Set the `io.crossplane.xpkg` annotation
    pub fn with_role(mut self, role: &str) -> Self {
        self.annotations
            .insert(XPKG_ANNOTATION.to_string(), role.to_string());
        self
    }

    pub fn is_gzip(&self) -> bool {
        self.data.starts_with(&[0x1f, 0x8b])
    }

    /// Open the layer as a tar archive, decompressing if needed
    pub fn archive(&self) -> Archive<Box<dyn Read + '_>> {
        let reader: Box<dyn Read + '_> = if self.is_gzip() {
            Box::new(GzDecoder::new(self.data.as_slice()))
        } else {
            Box::new(self.data.as_slice())
        };
        Archive::new(reader)
    }
}

/// A pulled package image
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackageImage {
    pub meta: ImageMeta,
    pub config_labels: BTreeMap<String, String>,
    pub layers: Vec<ImageLayer>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArchiveManifest {
    #[serde(default)]
    config_labels: BTreeMap<String, String>,
    layers: Vec<ImageLayer>,
}

impl PackageImage {
    pub fn new(layers: Vec<ImageLayer>) -> Self {
        let mut image = Self {
            meta: ImageMeta::default(),
            config_labels: BTreeMap::new(),
            layers,
        };
        image.meta.digest = image.manifest_digest();
        image
    }

    /// An image whose only layer is a base layer holding `package_yaml`
    pub fn from_package_yaml(package_yaml: &str) -> io::Result<Self> {
        let data = tar_files([(STREAM_FILE, package_yaml.as_bytes())])?;
        let layer = ImageLayer::new(media_types::OCI_LAYER_TAR, data).with_role(BASE_ANNOTATION);
        Ok(Self::new(vec![layer]))
    }

    pub fn with_layer(mut self, layer: ImageLayer) -> Self {
        self.layers.push(layer);
        self.meta.digest = self.manifest_digest();
        self
    }

    /// The role of a layer, from its annotation or the matching config label
    pub fn layer_role<'a>(&'a self, layer: &'a ImageLayer) -> Option<&'a str> {
        layer
            .annotations
            .get(XPKG_ANNOTATION)
            .or_else(|| {
                self.config_labels
                    .get(&format!("{LABEL_PREFIX}{}", layer.digest))
            })
            .map(String::as_str)
    }

    pub fn base_layer(&self) -> Option<&ImageLayer> {
        self.layers
            .iter()
            .find(|l| self.layer_role(l) == Some(BASE_ANNOTATION))
    }

    /// Schema layers with their language
    pub fn schema_layers(&self) -> impl Iterator<Item = (&str, &ImageLayer)> {
        self.layers.iter().filter_map(|l| {
            self.layer_role(l)
                .and_then(|role| role.strip_prefix(SCHEMA_ANNOTATION_PREFIX))
                .filter(|lang| !lang.is_empty())
                .map(|lang| (lang, l))
        })
    }

    /// Content digest over the layer descriptors and labels
    pub fn manifest_digest(&self) -> String {
        let manifest = self.manifest();
        let bytes = serde_json::to_vec(&manifest).unwrap_or_default();
        sha256_digest(&bytes)
    }

    fn manifest(&self) -> ArchiveManifest {
        ArchiveManifest {
            config_labels: self.config_labels.clone(),
            layers: self.layers.clone(),
        }
    }

    /// Serialize as a single-file `.xpkg` archive
    pub fn to_archive(&self) -> Result<Vec<u8>> {
        let manifest = serde_json::to_vec_pretty(&self.manifest())?;
        let mut builder = Builder::new(Vec::new());
        append_bytes(&mut builder, MANIFEST_FILE, &manifest)?;
        for layer in &self.layers {
            append_bytes(&mut builder, &blob_path(&layer.digest), &layer.data)?;
        }
        Ok(builder.into_inner()?)
    }

    /// Read an archive written by [`PackageImage::to_archive`]
    pub fn from_archive(data: &[u8]) -> Result<Self> {
        let mut archive = Archive::new(data);
        let mut files = BTreeMap::new();
        for entry in archive.entries()? {
            let mut entry = entry?;
            if entry.header().entry_type().is_dir() {
                continue;
            }
            let path = entry.path()?.to_string_lossy().into_owned();
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            files.insert(path, content);
        }

        let manifest = files
            .get(MANIFEST_FILE)
            .ok_or_else(|| RepoError::malformed("", "archive has no manifest.json"))?;
        let manifest: ArchiveManifest = serde_json::from_slice(manifest)
            .map_err(|e| RepoError::malformed("", format!("invalid archive manifest: {e}")))?;

        let mut layers = Vec::with_capacity(manifest.layers.len());
        for mut layer in manifest.layers {
            let data = files.remove(&blob_path(&layer.digest)).ok_or_else(|| {
                RepoError::malformed("", format!("archive is missing blob {}", layer.digest))
            })?;
            if sha256_digest(&data) != layer.digest {
                return Err(RepoError::malformed(
                    "",
                    format!("blob {} does not match its digest", layer.digest),
                ));
            }
            layer.data = data;
            layers.push(layer);
        }

        let mut image = Self {
            meta: ImageMeta::default(),
            config_labels: manifest.config_labels,
            layers,
        };
        image.meta.digest = image.manifest_digest();
        Ok(image)
    }
}

/// `sha256:<hex>` of some bytes
pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

fn blob_path(digest: &str) -> String {
    format!("{BLOB_DIR}/{}", digest.trim_start_matches("sha256:"))
}

/// Build an uncompressed tar from in-memory files
pub fn tar_files<'a>(files: impl IntoIterator<Item = (&'a str, &'a [u8])>) -> io::Result<Vec<u8>> {
    let mut builder = Builder::new(Vec::new());
    for (path, content) in files {
        append_bytes(&mut builder, path, content)?;
    }
    builder.into_inner()
}

pub fn gzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

fn append_bytes<W: Write>(builder: &mut Builder<W>, path: &str, content: &[u8]) -> io::Result<()> {
    let mut header = Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_cksum();
    builder.append_data(&mut header, path, content)
}
