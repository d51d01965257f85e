//! Image resolver
//!
//! Turns a [`PackageReference`] into one concrete tag and pulls that image.
//! Nothing is cached here; the manager decides when to call it.

use std::sync::Arc;
use xpkg_core::version::{self, Constraint};
use xpkg_core::{PackageReference, VersionConstraint};

use crate::context::Context;
use crate::error::{RepoError, Result};
use crate::fetcher::Fetcher;
use crate::image::PackageImage;

#[derive(Clone)]
pub struct ImageResolver {
    fetcher: Arc<dyn Fetcher>,
}

impl ImageResolver {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }

    /// Pick the tag satisfying the reference and fetch its image
    pub async fn resolve(
        &self,
        ctx: &Context,
        reference: &PackageReference,
    ) -> Result<(String, PackageImage)> {
        let tag = self.select_tag(ctx, reference).await?;
        let image = self.fetch(ctx, reference, &tag).await?;
        Ok((tag, image))
    }

    /// Pick the tag satisfying the reference and report its remote digest
    pub async fn resolve_digest(
        &self,
        ctx: &Context,
        reference: &PackageReference,
    ) -> Result<(String, String)> {
        let tag = self.select_tag(ctx, reference).await?;
        let digest = ctx.run(self.fetcher.head(reference, &tag)).await?;
        Ok((tag, digest))
    }

    /// Only lists tags; no image is pulled
    pub async fn select_tag(&self, ctx: &Context, reference: &PackageReference) -> Result<String> {
        let tags = ctx.run(self.fetcher.tags(reference)).await?;
        select_tag(reference, &tags)
    }

    /// Pull a tag chosen earlier by [`ImageResolver::select_tag`]
    pub async fn fetch(
        &self,
        ctx: &Context,
        reference: &PackageReference,
        tag: &str,
    ) -> Result<PackageImage> {
        ctx.run(self.fetcher.fetch(reference, tag)).await
    }
}

/// Choose a tag from `tags` for `reference`
pub fn select_tag(reference: &PackageReference, tags: &[String]) -> Result<String> {
    let not_found = || RepoError::VersionNotFound {
        package: reference.source().to_string(),
        constraint: reference.constraint().to_string(),
        available: available(tags),
    };

    match reference.constraint() {
        VersionConstraint::ExactTag(tag) => tags
            .iter()
            .find(|t| *t == tag)
            .cloned()
            .ok_or_else(not_found),
        VersionConstraint::SemverRange(range) => {
            let constraint = Constraint::parse(range)?;
            constraint
                .select_highest(tags.iter().map(String::as_str))
                .map(|(tag, _)| tag.to_string())
                .ok_or_else(not_found)
        }
        VersionConstraint::Latest => {
            for tag in tags {
                if version::parse_tag_version(tag).is_none() {
                    tracing::debug!(
                        package = %reference.source(),
                        tag = %tag,
                        "skipping non-semver tag"
                    );
                }
            }
            version::highest_version(tags.iter().map(String::as_str))
                .map(|(tag, _)| tag.to_string())
                .ok_or_else(not_found)
        }
    }
}

fn available(tags: &[String]) -> String {
    if tags.is_empty() {
        "none".to_string()
    } else {
        tags.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::MockFetcher;

    const SOURCE: &str = "xpkg.upbound.io/org/provider-a";

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    fn reference(raw: &str) -> PackageReference {
        PackageReference::parse(raw).unwrap()
    }

    #[test]
    fn test_range_selects_highest_match() {
        let tags = tags(&["v0.1.0", "v0.2.0", "v0.3.0"]);
        let range = reference(&format!("{SOURCE}@>=v0.1.0,<v0.3.0"));
        let selected = select_tag(&range, &tags).unwrap();
        assert_eq!(selected, "v0.2.0");
    }

    #[test]
    fn test_range_without_match() {
        let below = reference(&format!("{SOURCE}@<v0.2.0"));
        let err = select_tag(&below, &tags(&["v0.2.1"])).unwrap_err();
        match err {
            RepoError::VersionNotFound {
                package, available, ..
            } => {
                assert_eq!(package, SOURCE);
                assert_eq!(available, "v0.2.1");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_latest_ignores_non_semver_tags() {
        let tags = tags(&["v0.1.0", "v0.2.1", "latest-unparseable-tag"]);
        assert_eq!(select_tag(&reference(SOURCE), &tags).unwrap(), "v0.2.1");
    }

    #[test]
    fn test_latest_without_semver_tags() {
        let err = select_tag(&reference(SOURCE), &tags(&["main", "dev"])).unwrap_err();
        assert!(matches!(err, RepoError::VersionNotFound { .. }));
    }

    #[test]
    fn test_exact_tag_must_be_listed() {
        let tags = tags(&["v1.0.0", "nightly"]);
        assert_eq!(select_tag(&reference(&format!("{SOURCE}:nightly")), &tags).unwrap(), "nightly");
        assert!(select_tag(&reference(&format!("{SOURCE}:v2.0.0")), &tags).is_err());
    }

    #[test]
    fn test_at_version_pins_semver() {
        let tags = tags(&["v0.9.0", "v1.0.0", "v1.0.1"]);
        let pinned = reference(&format!("{SOURCE}@1.0.0"));
        assert_eq!(select_tag(&pinned, &tags).unwrap(), "v1.0.0");
    }

    #[tokio::test]
    async fn test_resolve_fetches_only_selected_tag() {
        let fetcher = MockFetcher::new();
        for tag in ["v0.1.0", "v0.2.0"] {
            let image = PackageImage::from_package_yaml(&format!("# {tag}\n")).unwrap();
            fetcher.insert(SOURCE, tag, image);
        }
        let resolver = ImageResolver::new(Arc::new(fetcher.clone()));

        let (tag, image) = resolver
            .resolve(&Context::background(), &reference(SOURCE))
            .await
            .unwrap();
        assert_eq!(tag, "v0.2.0");
        assert_eq!(image.meta.version, "v0.2.0");
        assert_eq!(fetcher.fetch_calls(), 1);

        let (tag, digest) = resolver
            .resolve_digest(&Context::background(), &reference(SOURCE))
            .await
            .unwrap();
        assert_eq!(tag, "v0.2.0");
        assert_eq!(digest, image.meta.digest);
        assert_eq!(fetcher.fetch_calls(), 1);
        assert_eq!(fetcher.head_calls(), 1);
    }
}
