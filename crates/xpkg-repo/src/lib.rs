//! xpkg Repository Management
//!
//! This crate fetches Crossplane packages from OCI registries, keeps them in
//! a local content cache, and resolves dependency trees:
//!
//! - **Image resolver**: picks the tag a reference asks for and pulls it
//! - **Marshaler**: turns an image or a cache directory into a `ParsedPackage`
//! - **Local cache**: one directory per package version, written atomically
//! - **Dependency manager**: walks `dependsOn`, fetching only cache misses
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use xpkg_core::{Dependency, Scheme};
//! use xpkg_repo::{
//!     Config, Context, CredentialStore, ImageResolver, LocalCache, Manager, Marshaler, OciFetcher,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load()?;
//! let marshaler = Marshaler::new(Arc::new(Scheme::crossplane()));
//! let cache = LocalCache::open(config.cache_dir(None)?, marshaler.clone());
//! let fetcher = OciFetcher::new(&config, CredentialStore::load()?);
//! let manager = Manager::new(cache, ImageResolver::new(Arc::new(fetcher)), marshaler);
//!
//! let dep = Dependency::from_reference("xpkg.upbound.io/upbound/provider-aws-s3@>=v1.0.0")?;
//! let (resolved, packages) = manager.add_all(&Context::background(), &dep).await?;
//! println!("{resolved} ({} packages)", packages.len());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod credentials;
pub mod error;
pub mod fetcher;
pub mod image;
pub mod manager;
pub mod marshaler;
pub mod resolver;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use cache::{CacheKey, LocalCache};
pub use config::Config;
pub use context::{CancelHandle, Context};
pub use credentials::{CredentialStore, Credentials, DockerConfig};
pub use error::{RepoError, Result};
pub use fetcher::{Fetcher, FsFetcher, MockFetcher, OciFetcher};
pub use image::{ImageLayer, ImageMeta, PackageImage};
pub use manager::{Manager, Resolution};
pub use marshaler::{EntryRecord, Marshaler};
pub use resolver::ImageResolver;
