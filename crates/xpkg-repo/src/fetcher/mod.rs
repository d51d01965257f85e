//! Registry access
//!
//! The resolver only needs three calls from a registry, so they sit behind
//! the [`Fetcher`] trait:
//! - [`OciFetcher`]: OCI distribution API
//! - [`FsFetcher`]: `.xpkg` archives laid out on a [`Filesystem`](xpkg_core::Filesystem)
//! - [`MockFetcher`]: in-memory images with call counters

mod fs;
mod mock;
mod oci;

pub use fs::FsFetcher;
pub use mock::MockFetcher;
pub use oci::OciFetcher;

use async_trait::async_trait;
use xpkg_core::PackageReference;

use crate::error::Result;
use crate::image::PackageImage;

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Every tag of the referenced repository
    async fn tags(&self, reference: &PackageReference) -> Result<Vec<String>>;

    /// Pull one tag, with its layers
    async fn fetch(&self, reference: &PackageReference, tag: &str) -> Result<PackageImage>;

    /// Manifest digest of one tag without pulling layers
    async fn head(&self, reference: &PackageReference, tag: &str) -> Result<String>;
}
