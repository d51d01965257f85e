use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use xpkg_core::PackageReference;

use super::Fetcher;
use crate::error::{RepoError, Result};
use crate::image::PackageImage;

#[derive(Debug, Default)]
struct MockState {
    /// source -> tag -> image
    repositories: RwLock<BTreeMap<String, BTreeMap<String, PackageImage>>>,
    /// source -> extra tags that have no image behind them
    dangling_tags: RwLock<BTreeMap<String, Vec<String>>>,
    delay: RwLock<Option<Duration>>,
    tag_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    head_calls: AtomicUsize,
}

/// In-memory registry for tests
///
/// Clones share the same images and counters.
#[derive(Debug, Clone, Default)]
pub struct MockFetcher {
    state: Arc<MockState>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `image` as `source:tag`
    pub fn insert(&self, source: &str, tag: &str, image: PackageImage) {
        if let Ok(mut repos) = self.state.repositories.write() {
            repos
                .entry(source.to_string())
                .or_default()
                .insert(tag.to_string(), image);
        }
    }

    /// List `tag` for `source` without an image behind it
    pub fn insert_tag(&self, source: &str, tag: &str) {
        if let Ok(mut tags) = self.state.dangling_tags.write() {
            tags.entry(source.to_string())
                .or_default()
                .push(tag.to_string());
        }
    }

    /// Delay every call, to exercise cancellation
    pub fn set_delay(&self, delay: Duration) {
        if let Ok(mut d) = self.state.delay.write() {
            *d = Some(delay);
        }
    }

    pub fn tag_calls(&self) -> usize {
        self.state.tag_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.state.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn head_calls(&self) -> usize {
        self.state.head_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        let delay = self.state.delay.read().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn image(&self, reference: &PackageReference, tag: &str) -> Result<PackageImage> {
        let repos = self
            .state
            .repositories
            .read()
            .map_err(|_| RepoError::Serialization("mock registry lock poisoned".to_string()))?;
        repos
            .get(reference.source())
            .and_then(|tags| tags.get(tag))
            .cloned()
            .ok_or_else(|| RepoError::RegistryUnavailable {
                package: reference.source().to_string(),
                message: format!("manifest unknown: {tag}"),
            })
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn tags(&self, reference: &PackageReference) -> Result<Vec<String>> {
        self.state.tag_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        let mut tags: Vec<String> = self
            .state
            .repositories
            .read()
            .ok()
            .and_then(|repos| repos.get(reference.source()).map(|t| t.keys().cloned().collect()))
            .unwrap_or_default();
        if let Some(extra) = self
            .state
            .dangling_tags
            .read()
            .ok()
            .and_then(|d| d.get(reference.source()).cloned())
        {
            tags.extend(extra);
        }
        Ok(tags)
    }

    async fn fetch(&self, reference: &PackageReference, tag: &str) -> Result<PackageImage> {
        self.state.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        let mut image = self.image(reference, tag)?;
        image.meta.registry = reference.registry().to_string();
        image.meta.repository = reference.repository().to_string();
        image.meta.version = tag.to_string();
        Ok(image)
    }

    async fn head(&self, reference: &PackageReference, tag: &str) -> Result<String> {
        self.state.head_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Ok(self.image(reference, tag)?.meta.digest)
    }
}
