//! Shared setup for CLI commands

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use xpkg_core::Scheme;
use xpkg_repo::{
    CancelHandle, Config, Context, CredentialStore, ImageResolver, LocalCache, Manager, Marshaler,
    OciFetcher,
};

use crate::error::Result;

/// Options shared by every subcommand
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions<'a> {
    pub cache_dir: Option<&'a Path>,
    pub config: Option<&'a Path>,
    pub timeout: Option<Duration>,
}

/// Load the config file named by `--config`, or the default one if it exists
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    Ok(config)
}

pub fn marshaler(config: &Config) -> Marshaler {
    Marshaler::new(Arc::new(Scheme::crossplane())).with_max_file_size(config.max_schema_file_size)
}

/// Open the package cache without touching the network
pub fn open_cache(opts: &GlobalOptions<'_>) -> Result<(Config, LocalCache)> {
    let config = load_config(opts.config)?;
    let root = config.cache_dir(opts.cache_dir)?;
    tracing::debug!(cache = %root.display(), "using package cache");
    let cache = LocalCache::open(root, marshaler(&config));
    Ok((config, cache))
}

/// A dependency manager backed by the configured registries
pub fn manager(opts: &GlobalOptions<'_>) -> Result<Manager> {
    let (config, cache) = open_cache(opts)?;
    let credentials = CredentialStore::load()?;
    let fetcher = OciFetcher::new(&config, credentials);

    Ok(Manager::new(cache, ImageResolver::new(Arc::new(fetcher)), marshaler(&config))
        .with_default_registry(config.default_registry.clone())
        .with_max_concurrency(config.max_concurrent_fetches))
}

/// Root context for one command: cancelled on Ctrl-C, bounded by `--timeout`
pub fn command_context(timeout: Option<Duration>) -> (Context, CancelHandle) {
    let (ctx, cancel) = Context::background().with_cancel();
    let ctx = match timeout {
        Some(timeout) => ctx.with_timeout(timeout),
        None => ctx,
    };
    (ctx, cancel)
}

/// Shorten a `sha256:` digest for display
#[must_use]
pub fn short_digest(digest: &str) -> &str {
    let hex = digest.strip_prefix("sha256:").unwrap_or(digest);
    let end = hex.len().min(12);
    &hex[..end]
}
