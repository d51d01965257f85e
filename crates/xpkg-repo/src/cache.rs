//! Local package cache
//!
//! Every cached package version lives in its own directory,
//! `<root>/<registry>/<repository>@<version>`, in the layout written by
//! [`Marshaler::to_dir`]. Entries are staged in a hidden sibling directory
//! and renamed into place, so a reader sees either the old entry, the new
//! one, or nothing.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use xpkg_core::{Filesystem, OsFs, PackageReference, ParsedPackage};

use crate::error::{RepoError, Result};
use crate::marshaler::{ENTRY_FILE, EntryRecord, Marshaler, PACKAGE_FILE};

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Rounds of move-aside and rename before a store gives up
const STORE_ATTEMPTS: usize = 8;

/// Identifies one cached package version
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub registry: String,
    pub repository: String,
    pub version: String,
}

impl CacheKey {
    pub fn new(
        registry: impl Into<String>,
        repository: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            registry: registry.into(),
            repository: repository.into(),
            version: version.into(),
        }
    }

    pub fn for_reference(reference: &PackageReference, version: &str) -> Self {
        Self::new(reference.registry(), reference.repository(), version)
    }

    pub fn for_package(package: &ParsedPackage) -> Self {
        Self::new(&package.registry, &package.repository, &package.version)
    }

    /// `<registry>/<repository>@<version>`, relative to the cache root
    pub fn relative_path(&self) -> PathBuf {
        let mut path = PathBuf::new();
        if !self.registry.is_empty() {
            path.push(&self.registry);
        }
        path.push(format!("{}@{}", self.repository, self.version));
        path
    }

    pub fn source(&self) -> String {
        if self.registry.is_empty() {
            self.repository.clone()
        } else {
            format!("{}/{}", self.registry, self.repository)
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.source(), self.version)
    }
}

/// On-disk package cache
#[derive(Debug, Clone)]
pub struct LocalCache {
    fs: Arc<dyn Filesystem>,
    root: PathBuf,
    marshaler: Marshaler,
}

impl LocalCache {
    pub fn new(fs: Arc<dyn Filesystem>, root: impl Into<PathBuf>, marshaler: Marshaler) -> Self {
        Self {
            fs,
            root: root.into(),
            marshaler,
        }
    }

    /// Cache on the real filesystem
    pub fn open(root: impl Into<PathBuf>, marshaler: Marshaler) -> Self {
        Self::new(Arc::new(OsFs::new()), root, marshaler)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.relative_path())
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.fs.is_file(&self.path_for(key).join(PACKAGE_FILE))
    }

    /// Load a cached package
    ///
    /// A missing entry is a miss. So is an entry that fails to load, which
    /// is logged and left in place for the next `store` to replace.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<ParsedPackage>> {
        let path = self.path_for(key);
        if !self.fs.is_dir(&path) {
            tracing::debug!(package = %key, "cache miss");
            return None;
        }

        match self.marshaler.from_dir(self.fs.as_ref(), &path) {
            Ok(package) => {
                tracing::debug!(package = %key, "cache hit");
                Some(Arc::new(package))
            }
            Err(e) => {
                tracing::warn!(
                    package = %key,
                    path = %path.display(),
                    error = %e,
                    "ignoring corrupt cache entry"
                );
                None
            }
        }
    }

    /// Write a package under `key`, replacing any previous entry
    pub fn store(&self, key: &CacheKey, package: &ParsedPackage) -> Result<()> {
        let target = self.path_for(key);
        let write_failed = |message: String| RepoError::CacheWriteFailed {
            path: target.display().to_string(),
            message,
        };

        let (parent, name) = match (target.parent(), target.file_name()) {
            (Some(parent), Some(name)) => {
                (parent.to_path_buf(), name.to_string_lossy().into_owned())
            }
            _ => return Err(write_failed("cache entry path has no parent".to_string())),
        };
        self.fs
            .create_dir_all(&parent)
            .map_err(|e| write_failed(e.to_string()))?;

        let staging = parent.join(format!(".{name}.staging-{}", unique_suffix()));
        if let Err(e) = self.marshaler.to_dir(self.fs.as_ref(), &staging, package) {
            self.discard(&staging);
            return Err(write_failed(e.to_string()));
        }

        // Entries we moved out of the way, newest last
        let mut asides: Vec<PathBuf> = Vec::new();
        let mut last_error = None;
        for _ in 0..STORE_ATTEMPTS {
            if self.fs.exists(&target) {
                let aside = parent.join(format!(".{name}.old-{}", unique_suffix()));
                match self.fs.rename(&target, &aside) {
                    Ok(()) => asides.push(aside),
                    // Another writer moved it aside first
                    Err(_) if !self.fs.exists(&target) => {}
                    Err(e) => {
                        last_error = Some(e);
                        break;
                    }
                }
            }

            match self.fs.rename(&staging, &target) {
                Ok(()) => {
                    last_error = None;
                    break;
                }
                // A version's content never changes, so a complete entry
                // placed by a concurrent writer is as good as ours.
                Err(_) if self.contains(key) => {
                    tracing::debug!(package = %key, "cache entry stored concurrently");
                    self.discard(&staging);
                    last_error = None;
                    break;
                }
                Err(e) => last_error = Some(e),
            }
        }

        if let Some(e) = last_error {
            self.discard(&staging);
            let mut message = e.to_string();
            if let Some(aside) = asides.pop() {
                if let Err(restore) = self.fs.rename(&aside, &target) {
                    tracing::warn!(
                        package = %key,
                        path = %aside.display(),
                        error = %restore,
                        "could not restore previous cache entry"
                    );
                    message = format!(
                        "{message}; previous entry left at {}: {restore}",
                        aside.display()
                    );
                }
            }
            for aside in &asides {
                self.discard(aside);
            }
            return Err(write_failed(message));
        }

        for aside in &asides {
            self.discard(aside);
        }

        tracing::info!(package = %key, path = %target.display(), "stored package in cache");
        Ok(())
    }

    /// Remove the whole cache
    ///
    /// The root is renamed aside first, so a failure leaves the cache either
    /// intact or gone.
    pub fn clean(&self) -> Result<()> {
        if !self.fs.exists(&self.root) {
            return Ok(());
        }

        let aside = match (self.root.parent(), self.root.file_name()) {
            (Some(parent), Some(name)) => parent.join(format!(
                ".{}.trash-{}",
                name.to_string_lossy(),
                unique_suffix()
            )),
            _ => self.root.clone(),
        };

        if aside != self.root {
            self.fs
                .rename(&self.root, &aside)
                .map_err(|e| RepoError::CacheWriteFailed {
                    path: self.root.display().to_string(),
                    message: format!("could not move cache aside: {e}"),
                })?;
        }

        if let Err(e) = self.fs.remove_dir_all(&aside) {
            if aside == self.root {
                return Err(RepoError::CacheWriteFailed {
                    path: self.root.display().to_string(),
                    message: e.to_string(),
                });
            }
            tracing::warn!(
                path = %aside.display(),
                error = %e,
                "cache moved aside but not fully removed"
            );
        }

        tracing::info!(root = %self.root.display(), "cleaned package cache");
        Ok(())
    }

    /// Every cached package version, sorted
    pub fn entries(&self) -> Result<Vec<CacheKey>> {
        if !self.fs.is_dir(&self.root) {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for rel in self.fs.walk_files(&self.root)? {
            if rel.file_name().is_none_or(|n| n != ENTRY_FILE) || is_hidden(&rel) {
                continue;
            }
            let path = self.root.join(&rel);
            match self.read_record(&path) {
                Ok(record) => {
                    keys.push(CacheKey::new(record.registry, record.repository, record.version))
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "skipping unreadable cache entry"
                    );
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Cached versions of one repository
    pub fn versions(&self, registry: &str, repository: &str) -> Result<Vec<String>> {
        let stem = CacheKey::new(registry, repository, "");
        let stem_path = self.path_for(&stem);
        let (Some(dir), Some(prefix)) = (stem_path.parent(), stem_path.file_name()) else {
            return Ok(Vec::new());
        };
        if !self.fs.is_dir(dir) {
            return Ok(Vec::new());
        }

        let prefix = prefix.to_string_lossy();
        let mut versions: Vec<String> = self
            .fs
            .read_dir(dir)?
            .into_iter()
            .filter(|e| e.is_dir)
            .filter_map(|e| e.name.strip_prefix(prefix.as_ref()).map(str::to_string))
            .filter(|v| !v.is_empty())
            .collect();
        versions.sort();
        Ok(versions)
    }

    fn read_record(&self, path: &Path) -> Result<EntryRecord> {
        Ok(serde_json::from_slice(&self.fs.read(path)?)?)
    }

    fn discard(&self, path: &Path) {
        if self.fs.exists(path) {
            if let Err(e) = self.fs.remove_dir_all(path) {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to remove temporary cache directory"
                );
            }
        }
    }
}

fn unique_suffix() -> String {
    format!(
        "{}-{}",
        std::process::id(),
        STAGING_COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

fn is_hidden(path: &Path) -> bool {
    path.components()
        .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{configuration_yaml, image, provider_yaml};
    use tempfile::TempDir;
    use xpkg_core::{MemFs, PackageType, Scheme};

    fn marshaler() -> Marshaler {
        Marshaler::new(Arc::new(Scheme::crossplane()))
    }

    fn package(yaml: &str, repository: &str, version: &str) -> ParsedPackage {
        let mut image = image(yaml);
        image.meta.registry = "xpkg.upbound.io".to_string();
        image.meta.repository = repository.to_string();
        image.meta.version = version.to_string();
        marshaler().from_image(&image).unwrap()
    }

    /// Refuses to rename staged entries, and optionally entries moved aside
    #[derive(Debug)]
    struct StuckRenames {
        inner: MemFs,
        refuse_restore: bool,
    }

    impl Filesystem for StuckRenames {
        fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
            self.inner.read(path)
        }
        fn write(&self, path: &Path, data: &[u8]) -> std::io::Result<()> {
            self.inner.write(path, data)
        }
        fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
            self.inner.create_dir_all(path)
        }
        fn read_dir(&self, path: &Path) -> std::io::Result<Vec<xpkg_core::fs::DirEntry>> {
            self.inner.read_dir(path)
        }
        fn is_dir(&self, path: &Path) -> bool {
            self.inner.is_dir(path)
        }
        fn is_file(&self, path: &Path) -> bool {
            self.inner.is_file(path)
        }
        fn remove_dir_all(&self, path: &Path) -> std::io::Result<()> {
            self.inner.remove_dir_all(path)
        }
        fn rename(&self, from: &Path, to: &Path) -> std::io::Result<()> {
            let name = from.file_name().unwrap_or_default().to_string_lossy();
            if name.contains(".staging-") || (self.refuse_restore && name.contains(".old-")) {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "rename refused",
                ));
            }
            self.inner.rename(from, to)
        }
        fn walk_files(&self, root: &Path) -> std::io::Result<Vec<PathBuf>> {
            self.inner.walk_files(root)
        }
    }

    fn disk_cache() -> (TempDir, LocalCache) {
        let dir = TempDir::new().unwrap();
        let cache = LocalCache::open(dir.path().join("cache"), marshaler());
        (dir, cache)
    }

    #[test]
    fn test_key_path() {
        let key = CacheKey::new("xpkg.upbound.io", "org/provider-a", "v1.0.0");
        assert_eq!(
            key.relative_path(),
            PathBuf::from("xpkg.upbound.io/org/provider-a@v1.0.0")
        );
        assert_eq!(key.to_string(), "xpkg.upbound.io/org/provider-a@v1.0.0");
    }

    #[test]
    fn test_get_miss_has_no_side_effects() {
        let (_dir, cache) = disk_cache();
        let key = CacheKey::new("xpkg.upbound.io", "org/provider-a", "v1.0.0");
        assert!(cache.get(&key).is_none());
        assert!(!cache.root().exists());
    }

    #[test]
    fn test_store_then_get() {
        let (_dir, cache) = disk_cache();
        let pkg = package(
            &configuration_yaml(
                "platform",
                &[("provider", "xpkg.upbound.io/org/provider-a", ">=v0.1.0")],
            ),
            "org/platform",
            "v1.0.0",
        );
        let key = CacheKey::for_package(&pkg);

        cache.store(&key, &pkg).unwrap();
        assert!(cache.contains(&key));

        let cached = cache.get(&key).unwrap();
        assert_eq!(cached.package_type(), PackageType::Configuration);
        assert_eq!(cached.dependencies, pkg.dependencies);
        assert_eq!(cached.objects.len(), pkg.objects.len());
        assert_eq!(cached.version, "v1.0.0");
    }

    #[test]
    fn test_store_overwrites_idempotently() {
        let (_dir, cache) = disk_cache();
        let pkg = package(&provider_yaml("provider-a", &[]), "org/provider-a", "v1.0.0");
        let key = CacheKey::for_package(&pkg);

        cache.store(&key, &pkg).unwrap();
        cache.store(&key, &pkg).unwrap();

        assert_eq!(cache.entries().unwrap(), vec![key.clone()]);
        let parent = cache.path_for(&key).parent().unwrap().to_path_buf();
        let leftovers: Vec<_> = std::fs::read_dir(parent)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(leftovers, vec!["provider-a@v1.0.0"]);
    }

    #[test]
    fn test_corrupt_entry_is_a_miss() {
        let (_dir, cache) = disk_cache();
        let key = CacheKey::new("xpkg.upbound.io", "org/provider-a", "v1.0.0");
        let path = cache.path_for(&key);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join(PACKAGE_FILE), "{not json").unwrap();

        assert!(cache.get(&key).is_none());
        assert!(path.exists());
    }

    #[test]
    fn test_entries_and_versions() {
        let cache = LocalCache::new(Arc::new(MemFs::new()), "/cache", marshaler());
        for version in ["v0.1.0", "v0.2.0"] {
            let pkg = package(&provider_yaml("provider-a", &[]), "org/provider-a", version);
            cache.store(&CacheKey::for_package(&pkg), &pkg).unwrap();
        }
        let pkg = package(&provider_yaml("provider-b", &[]), "org/provider-b", "v1.0.0");
        cache.store(&CacheKey::for_package(&pkg), &pkg).unwrap();

        let entries: Vec<String> = cache.entries().unwrap().iter().map(|k| k.to_string()).collect();
        assert_eq!(
            entries,
            vec![
                "xpkg.upbound.io/org/provider-a@v0.1.0",
                "xpkg.upbound.io/org/provider-a@v0.2.0",
                "xpkg.upbound.io/org/provider-b@v1.0.0",
            ]
        );
        assert_eq!(
            cache.versions("xpkg.upbound.io", "org/provider-a").unwrap(),
            vec!["v0.1.0", "v0.2.0"]
        );
        assert!(cache.versions("xpkg.upbound.io", "org/missing").unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_store_of_same_version() {
        let (_dir, cache) = disk_cache();
        let pkg = package(&provider_yaml("provider-a", &[]), "org/provider-a", "v1.0.0");
        let key = CacheKey::for_package(&pkg);
        let barrier = std::sync::Barrier::new(4);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    barrier.wait();
                    for _ in 0..50 {
                        cache.store(&key, &pkg).unwrap();
                    }
                });
            }
        });

        let loaded = cache.get(&key).unwrap();
        assert_eq!(loaded.digest, pkg.digest);
        let leftovers: Vec<_> = std::fs::read_dir(cache.path_for(&key).parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with('.'))
            .collect();
        assert!(leftovers.is_empty(), "stray directories: {leftovers:?}");
    }

    #[test]
    fn test_failed_store_restores_previous_entry() {
        let mem = MemFs::new();
        let pkg = package(&provider_yaml("provider-a", &[]), "org/provider-a", "v1.0.0");
        let key = CacheKey::for_package(&pkg);
        LocalCache::new(Arc::new(mem.clone()), "/cache", marshaler())
            .store(&key, &pkg)
            .unwrap();

        let stuck = StuckRenames {
            inner: mem.clone(),
            refuse_restore: false,
        };
        let cache = LocalCache::new(Arc::new(stuck), "/cache", marshaler());
        let err = cache.store(&key, &pkg).unwrap_err();
        assert!(matches!(err, RepoError::CacheWriteFailed { .. }));
        assert!(cache.get(&key).is_some());
    }

    #[test]
    fn test_failed_restore_is_reported() {
        let mem = MemFs::new();
        let pkg = package(&provider_yaml("provider-a", &[]), "org/provider-a", "v1.0.0");
        let key = CacheKey::for_package(&pkg);
        LocalCache::new(Arc::new(mem.clone()), "/cache", marshaler())
            .store(&key, &pkg)
            .unwrap();

        let stuck = StuckRenames {
            inner: mem.clone(),
            refuse_restore: true,
        };
        let cache = LocalCache::new(Arc::new(stuck), "/cache", marshaler());
        match cache.store(&key, &pkg).unwrap_err() {
            RepoError::CacheWriteFailed { message, .. } => {
                assert!(message.contains("previous entry left at"), "{message}");
                assert!(message.contains(".old-"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn test_clean_removes_everything() {
        let (dir, cache) = disk_cache();
        let pkg = package(&provider_yaml("provider-a", &[]), "org/provider-a", "v1.0.0");
        cache.store(&CacheKey::for_package(&pkg), &pkg).unwrap();

        cache.clean().unwrap();
        assert!(!cache.root().exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(cache.entries().unwrap().is_empty());

        // Cleaning an absent cache is a no-op
        cache.clean().unwrap();
    }
}
