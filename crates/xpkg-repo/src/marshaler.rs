//! Package marshaler
//!
//! Turns a pulled [`PackageImage`] or a cached package directory into a
//! [`ParsedPackage`], and writes the directory form back out.
//!
//! Directory layout of one package version:
//!
//! ```text
//! <registry>/<repository>@<version>/
//! ├── package.ndjson      # meta document first, then every object
//! ├── entry.json          # image metadata
//! └── schema.<language>/  # one tree per schema bundle
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use xpkg_core::fs::copy_tree;
use xpkg_core::parser::{self, PackageDocuments};
use xpkg_core::{
    Filesystem, MemFs, PackageMeta, PackageObject, PackageType, ParsedPackage, Scheme, lint, xcrd,
};

use crate::config::DEFAULT_MAX_SCHEMA_FILE_SIZE;
use crate::error::{RepoError, Result};
use crate::image::{ImageLayer, ImageMeta, PackageImage, STREAM_FILE};

pub const PACKAGE_FILE: &str = "package.ndjson";
pub const ENTRY_FILE: &str = "entry.json";
pub const SCHEMA_DIR_PREFIX: &str = "schema.";

/// Upper bound on `package.yaml`, independent of the schema file limit
const MAX_STREAM_SIZE: u64 = DEFAULT_MAX_SCHEMA_FILE_SIZE;

/// Image metadata stored next to a cached package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryRecord {
    pub registry: String,
    pub repository: String,
    pub version: String,
    pub digest: String,
    #[serde(rename = "type")]
    pub package_type: PackageType,
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Marshaler {
    scheme: Arc<Scheme>,
    max_file_size: u64,
}

impl Marshaler {
    pub fn new(scheme: Arc<Scheme>) -> Self {
        Self {
            scheme,
            max_file_size: DEFAULT_MAX_SCHEMA_FILE_SIZE,
        }
    }

    /// Largest single file accepted from a schema layer
    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    /// Parse, lint and expand a pulled image
    pub fn from_image(&self, image: &PackageImage) -> Result<ParsedPackage> {
        self.parse_image(image)
            .map_err(|e| e.for_package(&source_of(&image.meta)))
    }

    fn parse_image(&self, image: &PackageImage) -> Result<ParsedPackage> {
        let base = image.base_layer().ok_or_else(|| {
            RepoError::malformed("", "image has no layer annotated io.crossplane.xpkg: base")
        })?;

        let stream = self.read_stream(base)?;
        let docs = parser::parse_yaml_stream(&stream)
            .map_err(|e| RepoError::malformed("", format!("{STREAM_FILE}: {e}")))?;
        let docs = parser::decode_documents(&self.scheme, docs)?;

        let mut schemas: BTreeMap<String, MemFs> = BTreeMap::new();
        for (language, layer) in image.schema_layers() {
            let tree = schemas.entry(language.to_string()).or_default();
            self.extract_schema(language, layer, tree)?;
        }

        tracing::debug!(
            package = %source_of(&image.meta),
            version = %image.meta.version,
            objects = docs.objects.len(),
            schemas = schemas.len(),
            "parsed package image"
        );

        assemble(docs, &image.meta, schemas)
    }

    /// Load a package directory written by [`Marshaler::to_dir`]
    ///
    /// The last path component must be `<name>@<version>`. When `entry.json`
    /// is missing, registry and repository are read off a relative
    /// `<registry>/<repository>@<version>` path.
    pub fn from_dir(&self, fs: &dyn Filesystem, path: &Path) -> Result<ParsedPackage> {
        let image_meta = dir_meta(fs, path)?;
        let package = source_of(&image_meta);
        self.parse_dir(fs, path, image_meta)
            .map_err(|e| e.for_package(&package))
    }

    fn parse_dir(
        &self,
        fs: &dyn Filesystem,
        path: &Path,
        image_meta: ImageMeta,
    ) -> Result<ParsedPackage> {
        let stream = fs.read(&path.join(PACKAGE_FILE))?;
        let stream = String::from_utf8(stream)
            .map_err(|e| RepoError::malformed("", format!("{PACKAGE_FILE}: {e}")))?;
        let docs = parser::parse_ndjson_stream(&stream)
            .map_err(|e| RepoError::malformed("", format!("{PACKAGE_FILE}: {e}")))?;
        let mut docs = parser::decode_documents(&self.scheme, docs)?;

        // Synthesized CRDs are rebuilt from the XRDs below
        if let PackageMeta::Configuration(_) = docs.meta {
            docs.objects.retain(|o| o.is_xrd() || o.is_composition());
        }

        let mut schemas = BTreeMap::new();
        for entry in fs.read_dir(path)? {
            let Some(language) = entry.name.strip_prefix(SCHEMA_DIR_PREFIX) else {
                continue;
            };
            if !entry.is_dir || language.is_empty() {
                continue;
            }
            let tree = MemFs::new();
            copy_tree(fs, &path.join(&entry.name), &tree, Path::new(""))?;
            schemas.insert(language.to_string(), tree);
        }

        assemble(docs, &image_meta, schemas)
    }

    /// Write the directory form of `package` into `path`
    pub fn to_dir(&self, fs: &dyn Filesystem, path: &Path, package: &ParsedPackage) -> Result<()> {
        fs.create_dir_all(path)?;

        let stream = parser::to_ndjson(&package.meta, &package.objects)?;
        fs.write(&path.join(PACKAGE_FILE), stream.as_bytes())?;

        let record = EntryRecord {
            registry: package.registry.clone(),
            repository: package.repository.clone(),
            version: package.version.clone(),
            digest: package.digest.clone(),
            package_type: package.package_type(),
            cached_at: Utc::now(),
        };
        fs.write(&path.join(ENTRY_FILE), &serde_json::to_vec_pretty(&record)?)?;

        for (language, tree) in &package.schemas {
            let dir = path.join(format!("{SCHEMA_DIR_PREFIX}{language}"));
            copy_tree(tree, Path::new(""), fs, &dir)?;
        }
        Ok(())
    }

    fn read_stream(&self, layer: &ImageLayer) -> Result<String> {
        let mut archive = layer.archive();
        for entry in archive.entries().map_err(unreadable)? {
            let mut entry = entry.map_err(unreadable)?;
            let path = entry.path().map_err(unreadable)?.into_owned();
            let normalized: PathBuf = path
                .components()
                .filter(|c| matches!(c, Component::Normal(_)))
                .collect();
            if normalized != Path::new(STREAM_FILE) {
                continue;
            }

            let size = entry.header().size().map_err(unreadable)?;
            let data = read_limited(&mut entry, size, &path, MAX_STREAM_SIZE)?;
            return String::from_utf8(data)
                .map_err(|e| RepoError::malformed("", format!("{STREAM_FILE}: {e}")));
        }
        Err(RepoError::malformed(
            "",
            format!("base layer does not contain {STREAM_FILE}"),
        ))
    }

    fn extract_schema(&self, language: &str, layer: &ImageLayer, tree: &MemFs) -> Result<()> {
        let mut archive = layer.archive();
        for entry in archive.entries().map_err(unreadable)? {
            let mut entry = entry.map_err(unreadable)?;
            let path = entry.path().map_err(unreadable)?.into_owned();
            let target = safe_path(&path).ok_or_else(|| {
                RepoError::malformed(
                    "",
                    format!("schema.{language} layer has unsafe path {}", path.display()),
                )
            })?;

            let entry_type = entry.header().entry_type();
            if entry_type.is_dir() {
                tree.create_dir_all(&target)?;
                continue;
            }
            if !entry_type.is_file() {
                tracing::debug!(
                    language,
                    path = %path.display(),
                    "skipping non-regular schema entry"
                );
                continue;
            }

            let size = entry.header().size().map_err(unreadable)?;
            let data = read_limited(&mut entry, size, &path, self.max_file_size)?;
            tree.write(&target, &data)?;
        }
        Ok(())
    }
}

/// Lint, synthesize CRDs for XRDs, and collect dependencies
fn assemble(
    docs: PackageDocuments,
    image_meta: &ImageMeta,
    schemas: BTreeMap<String, MemFs>,
) -> Result<ParsedPackage> {
    let PackageDocuments { meta, mut objects } = docs;
    lint::lint(&meta, &objects)?;

    let mut synthesized = Vec::new();
    for object in &objects {
        if let PackageObject::CompositeResourceDefinition(xrd) = object {
            synthesized.extend(
                xcrd::for_xrd(xrd)?
                    .into_iter()
                    .map(|crd| PackageObject::CustomResourceDefinition(Box::new(crd))),
            );
        }
    }
    objects.extend(synthesized);

    let dependencies = meta.dependencies()?;

    Ok(ParsedPackage {
        meta,
        objects,
        dependencies,
        registry: image_meta.registry.clone(),
        repository: image_meta.repository.clone(),
        digest: image_meta.digest.clone(),
        version: image_meta.version.clone(),
        schemas,
    })
}

fn dir_meta(fs: &dyn Filesystem, path: &Path) -> Result<ImageMeta> {
    let invalid = || {
        RepoError::malformed(
            "",
            format!(
                "invalid path {}: expected <registry>/<repository>@<version>",
                path.display()
            ),
        )
    };

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(invalid)?;
    let (_, version) = name.rsplit_once('@').ok_or_else(invalid)?;
    if version.is_empty() {
        return Err(invalid());
    }

    let entry_path = path.join(ENTRY_FILE);
    if fs.is_file(&entry_path) {
        let record: EntryRecord = serde_json::from_slice(&fs.read(&entry_path)?)
            .map_err(|e| RepoError::malformed("", format!("{ENTRY_FILE}: {e}")))?;
        return Ok(ImageMeta {
            registry: record.registry,
            repository: record.repository,
            version: record.version,
            digest: record.digest,
        });
    }

    let parts: Vec<&str> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect();
    let Some((registry, rest)) = parts.split_first() else {
        return Err(invalid());
    };
    if rest.is_empty() {
        return Err(invalid());
    }
    let repository = rest.join("/");
    let repository = repository
        .rsplit_once('@')
        .map(|(repo, _)| repo.to_string())
        .ok_or_else(invalid)?;

    Ok(ImageMeta {
        registry: registry.to_string(),
        repository,
        version: version.to_string(),
        digest: String::new(),
    })
}

fn read_limited(reader: &mut impl Read, size: u64, path: &Path, limit: u64) -> Result<Vec<u8>> {
    let too_large = || {
        RepoError::malformed(
            "",
            format!(
                "{} exceeds the maximum file size of {limit} bytes",
                path.display()
            ),
        )
    };
    if size > limit {
        return Err(too_large());
    }

    let mut data = Vec::new();
    Read::take(reader, limit + 1)
        .read_to_end(&mut data)
        .map_err(unreadable)?;
    if data.len() as u64 > limit {
        return Err(too_large());
    }
    Ok(data)
}

/// Relative path with only normal components, or `None` if it escapes
fn safe_path(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

fn source_of(meta: &ImageMeta) -> String {
    if meta.registry.is_empty() {
        meta.repository.clone()
    } else {
        format!("{}/{}", meta.registry, meta.repository)
    }
}

fn unreadable(e: io::Error) -> RepoError {
    RepoError::malformed("", format!("unreadable layer: {e}"))
}
