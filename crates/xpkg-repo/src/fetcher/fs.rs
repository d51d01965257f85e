//! Offline fetcher over `.xpkg` archives
//!
//! Layout: `<root>/<registry>/<repository>/<tag>.xpkg`, where each archive
//! is written by [`PackageImage::to_archive`].

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use xpkg_core::{Filesystem, PackageReference};

use super::Fetcher;
use crate::error::{RepoError, Result};
use crate::image::PackageImage;

const ARCHIVE_EXTENSION: &str = "xpkg";

#[derive(Debug, Clone)]
pub struct FsFetcher {
    fs: Arc<dyn Filesystem>,
    root: PathBuf,
}

impl FsFetcher {
    pub fn new(fs: Arc<dyn Filesystem>, root: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            root: root.into(),
        }
    }

    fn repository_dir(&self, reference: &PackageReference) -> PathBuf {
        self.root.join(reference.source())
    }

    fn archive_path(&self, reference: &PackageReference, tag: &str) -> PathBuf {
        self.repository_dir(reference)
            .join(format!("{tag}.{ARCHIVE_EXTENSION}"))
    }

    /// Write `image` where a later fetch of `reference:tag` finds it
    pub fn publish(
        &self,
        reference: &PackageReference,
        tag: &str,
        image: &PackageImage,
    ) -> Result<()> {
        let path = self.archive_path(reference, tag);
        if let Some(parent) = path.parent() {
            self.fs.create_dir_all(parent)?;
        }
        self.fs.write(&path, &image.to_archive()?)?;
        Ok(())
    }

    fn unavailable(reference: &PackageReference, path: &Path, e: std::io::Error) -> RepoError {
        RepoError::RegistryUnavailable {
            package: reference.source().to_string(),
            message: format!("{}: {e}", path.display()),
        }
    }
}

#[async_trait]
impl Fetcher for FsFetcher {
    async fn tags(&self, reference: &PackageReference) -> Result<Vec<String>> {
        let dir = self.repository_dir(reference);
        if !self.fs.is_dir(&dir) {
            return Ok(Vec::new());
        }

        let entries = self
            .fs
            .read_dir(&dir)
            .map_err(|e| Self::unavailable(reference, &dir, e))?;

        Ok(entries
            .into_iter()
            .filter(|e| !e.is_dir)
            .filter_map(|e| {
                e.name
                    .strip_suffix(&format!(".{ARCHIVE_EXTENSION}"))
                    .map(str::to_string)
            })
            .collect())
    }

    async fn fetch(&self, reference: &PackageReference, tag: &str) -> Result<PackageImage> {
        let path = self.archive_path(reference, tag);
        let data = self
            .fs
            .read(&path)
            .map_err(|e| Self::unavailable(reference, &path, e))?;

        let mut image = PackageImage::from_archive(&data)
            .map_err(|e| e.for_package(reference.source()))?;
        image.meta.registry = reference.registry().to_string();
        image.meta.repository = reference.repository().to_string();
        image.meta.version = tag.to_string();
        Ok(image)
    }

    async fn head(&self, reference: &PackageReference, tag: &str) -> Result<String> {
        Ok(self.fetch(reference, tag).await?.meta.digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xpkg_core::{MemFs, OsFs};

    #[tokio::test]
    async fn test_publish_then_fetch() {
        let fetcher = FsFetcher::new(Arc::new(MemFs::new()), "/registry");
        let reference = PackageReference::parse("xpkg.upbound.io/org/provider-a").unwrap();
        let image = PackageImage::from_package_yaml("kind: Provider\n").unwrap();

        fetcher.publish(&reference, "v0.1.0", &image).unwrap();
        fetcher.publish(&reference, "v0.2.0", &image).unwrap();

        let mut tags = fetcher.tags(&reference).await.unwrap();
        tags.sort();
        assert_eq!(tags, vec!["v0.1.0", "v0.2.0"]);

        let fetched = fetcher.fetch(&reference, "v0.2.0").await.unwrap();
        assert_eq!(fetched.meta.registry, "xpkg.upbound.io");
        assert_eq!(fetched.meta.repository, "org/provider-a");
        assert_eq!(fetched.meta.version, "v0.2.0");
        assert_eq!(fetched.layers, image.layers);
        assert_eq!(
            fetcher.head(&reference, "v0.2.0").await.unwrap(),
            image.meta.digest
        );
    }

    #[tokio::test]
    async fn test_unknown_repository_has_no_tags() {
        let dir = tempfile::TempDir::new().unwrap();
        let fetcher = FsFetcher::new(Arc::new(OsFs::new()), dir.path());
        let reference = PackageReference::parse("xpkg.upbound.io/org/missing").unwrap();

        assert!(fetcher.tags(&reference).await.unwrap().is_empty());
        assert!(matches!(
            fetcher.fetch(&reference, "v1.0.0").await,
            Err(RepoError::RegistryUnavailable { .. })
        ));
    }
}
