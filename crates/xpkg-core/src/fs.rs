//! Filesystem abstraction
//!
//! Everything that touches package content on disk goes through the
//! [`Filesystem`] trait, so the cache, the fetchers and the marshaler can run
//! against the real disk ([`OsFs`]) or a purely in-memory tree ([`MemFs`]).
//! Schema bundles extracted from package images are always [`MemFs`] trees.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

/// A single entry returned by [`Filesystem::read_dir`]
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Minimal filesystem capability used across xpkg
pub trait Filesystem: Send + Sync + fmt::Debug {
    /// Read a whole file
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Write a whole file, replacing any previous content
    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    /// Create a directory and all of its parents
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// List the direct children of a directory, sorted by name
    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;

    fn is_dir(&self, path: &Path) -> bool;

    fn is_file(&self, path: &Path) -> bool;

    fn exists(&self, path: &Path) -> bool {
        self.is_dir(path) || self.is_file(path)
    }

    /// Remove a directory and everything below it
    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Rename a file or directory. The destination must not exist.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// All regular files below `root`, as paths relative to `root`, sorted
    fn walk_files(&self, root: &Path) -> io::Result<Vec<PathBuf>>;
}

/// Copy every file below `src_root` in `src` to `dst_root` in `dst`
///
/// Returns the number of files copied.
pub fn copy_tree(
    src: &dyn Filesystem,
    src_root: &Path,
    dst: &dyn Filesystem,
    dst_root: &Path,
) -> io::Result<usize> {
    let files = src.walk_files(src_root)?;
    dst.create_dir_all(dst_root)?;
    for rel in &files {
        let data = src.read(&src_root.join(rel))?;
        let target = dst_root.join(rel);
        if let Some(parent) = target.parent() {
            dst.create_dir_all(parent)?;
        }
        dst.write(&target, &data)?;
    }
    Ok(files.len())
}

// ============ OS filesystem ============

/// The real filesystem, optionally confined below a base directory
#[derive(Debug, Clone, Default)]
pub struct OsFs {
    base: Option<PathBuf>,
}

impl OsFs {
    /// Unrooted access; paths are used as given
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every path relative to `base`
    pub fn rooted(base: impl Into<PathBuf>) -> Self {
        Self {
            base: Some(base.into()),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base {
            Some(base) => {
                let rel: PathBuf = path
                    .components()
                    .filter(|c| matches!(c, Component::Normal(_)))
                    .collect();
                base.join(rel)
            }
            None => path.to_path_buf(),
        }
    }
}

impl Filesystem for OsFs {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(self.resolve(path))
    }

    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        std::fs::write(self.resolve(path), data)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(self.resolve(path))
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(self.resolve(path))? {
            let entry = entry?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: entry.file_type()?.is_dir(),
            });
        }
        entries.sort();
        Ok(entries)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.resolve(path).is_dir()
    }

    fn is_file(&self, path: &Path) -> bool {
        self.resolve(path).is_file()
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_dir_all(self.resolve(path))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let to = self.resolve(to);
        if to.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", to.display()),
            ));
        }
        std::fs::rename(self.resolve(from), to)
    }

    fn walk_files(&self, root: &Path) -> io::Result<Vec<PathBuf>> {
        let root = self.resolve(root);
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(&root).sort_by_file_name() {
            let entry = entry.map_err(io::Error::other)?;
            if entry.file_type().is_file() {
                let rel = entry
                    .path()
                    .strip_prefix(&root)
                    .map_err(io::Error::other)?
                    .to_path_buf();
                files.push(rel);
            }
        }
        Ok(files)
    }
}

// ============ In-memory filesystem ============

#[derive(Debug, Default)]
struct MemTree {
    files: BTreeMap<PathBuf, Vec<u8>>,
    dirs: BTreeSet<PathBuf>,
}

impl MemTree {
    fn add_parents(&mut self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir.as_os_str().is_empty() {
                break;
            }
            self.dirs.insert(dir.to_path_buf());
            current = dir.parent();
        }
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.as_os_str().is_empty() || self.dirs.contains(path)
    }
}

/// In-memory filesystem
///
/// Clones share the same tree. Paths are normalized: leading `/` and `.`
/// components are ignored and `..` is rejected.
#[derive(Clone, Default)]
pub struct MemFs {
    tree: Arc<RwLock<MemTree>>,
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from `(path, content)` pairs
    pub fn from_files<P, D>(files: impl IntoIterator<Item = (P, D)>) -> io::Result<Self>
    where
        P: AsRef<Path>,
        D: AsRef<[u8]>,
    {
        let fs = Self::new();
        for (path, data) in files {
            fs.write(path.as_ref(), data.as_ref())?;
        }
        Ok(fs)
    }

    /// Snapshot of every file in the tree
    pub fn files(&self) -> BTreeMap<PathBuf, Vec<u8>> {
        self.tree
            .read()
            .map(|t| t.files.clone())
            .unwrap_or_default()
    }

    pub fn file_count(&self) -> usize {
        self.tree.read().map(|t| t.files.len()).unwrap_or(0)
    }

    fn normalize(path: &Path) -> io::Result<PathBuf> {
        let mut out = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => out.push(part),
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
                Component::ParentDir => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("path escapes filesystem root: {}", path.display()),
                    ));
                }
            }
        }
        Ok(out)
    }

    fn read_tree(&self) -> io::Result<std::sync::RwLockReadGuard<'_, MemTree>> {
        self.tree
            .read()
            .map_err(|_| io::Error::other("in-memory filesystem lock poisoned"))
    }

    fn write_tree(&self) -> io::Result<std::sync::RwLockWriteGuard<'_, MemTree>> {
        self.tree
            .write()
            .map_err(|_| io::Error::other("in-memory filesystem lock poisoned"))
    }
}

impl fmt::Debug for MemFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemFs")
            .field("files", &self.file_count())
            .finish()
    }
}

impl PartialEq for MemFs {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.tree, &other.tree) || self.files() == other.files()
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{}: no such file or directory", path.display()),
    )
}

impl Filesystem for MemFs {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        let key = Self::normalize(path)?;
        self.read_tree()?
            .files
            .get(&key)
            .cloned()
            .ok_or_else(|| not_found(path))
    }

    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let key = Self::normalize(path)?;
        let mut tree = self.write_tree()?;
        if tree.is_dir(&key) {
            return Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("{} is a directory", path.display()),
            ));
        }
        tree.add_parents(&key);
        tree.files.insert(key, data.to_vec());
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let key = Self::normalize(path)?;
        if key.as_os_str().is_empty() {
            return Ok(());
        }
        let mut tree = self.write_tree()?;
        if tree.files.contains_key(&key) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} is a file", path.display()),
            ));
        }
        tree.add_parents(&key);
        tree.dirs.insert(key);
        Ok(())
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let key = Self::normalize(path)?;
        let tree = self.read_tree()?;
        if !tree.is_dir(&key) {
            return Err(not_found(path));
        }
        let parent = Some(key.as_path());
        let mut entries: Vec<DirEntry> = tree
            .dirs
            .iter()
            .filter(|p| p.parent() == parent)
            .map(|p| DirEntry {
                name: file_name(p),
                is_dir: true,
            })
            .chain(
                tree.files
                    .keys()
                    .filter(|p| p.parent() == parent)
                    .map(|p| DirEntry {
                        name: file_name(p),
                        is_dir: false,
                    }),
            )
            .collect();
        entries.sort();
        Ok(entries)
    }

    fn is_dir(&self, path: &Path) -> bool {
        match (Self::normalize(path), self.tree.read()) {
            (Ok(key), Ok(tree)) => tree.is_dir(&key),
            _ => false,
        }
    }

    fn is_file(&self, path: &Path) -> bool {
        match (Self::normalize(path), self.tree.read()) {
            (Ok(key), Ok(tree)) => tree.files.contains_key(&key),
            _ => false,
        }
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        let key = Self::normalize(path)?;
        let mut tree = self.write_tree()?;
        if !tree.is_dir(&key) {
            return Err(not_found(path));
        }
        tree.files.retain(|p, _| !p.starts_with(&key));
        tree.dirs.retain(|p| !p.starts_with(&key));
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let from_key = Self::normalize(from)?;
        let to_key = Self::normalize(to)?;
        let mut tree = self.write_tree()?;
        if tree.files.contains_key(&to_key) || tree.dirs.contains(&to_key) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", to.display()),
            ));
        }

        if let Some(data) = tree.files.remove(&from_key) {
            tree.add_parents(&to_key);
            tree.files.insert(to_key, data);
            return Ok(());
        }
        if !tree.dirs.contains(&from_key) {
            return Err(not_found(from));
        }

        let moved_files: Vec<(PathBuf, Vec<u8>)> = tree
            .files
            .iter()
            .filter(|(p, _)| p.starts_with(&from_key))
            .map(|(p, d)| (p.clone(), d.clone()))
            .collect();
        let moved_dirs: Vec<PathBuf> = tree
            .dirs
            .iter()
            .filter(|p| p.starts_with(&from_key))
            .cloned()
            .collect();

        for (path, data) in moved_files {
            tree.files.remove(&path);
            let rel = path.strip_prefix(&from_key).map_err(io::Error::other)?;
            tree.files.insert(to_key.join(rel), data);
        }
        for path in moved_dirs {
            tree.dirs.remove(&path);
            let rel = path.strip_prefix(&from_key).map_err(io::Error::other)?;
            let target = if rel.as_os_str().is_empty() {
                to_key.clone()
            } else {
                to_key.join(rel)
            };
            tree.dirs.insert(target);
        }
        tree.add_parents(&to_key);
        Ok(())
    }

    fn walk_files(&self, root: &Path) -> io::Result<Vec<PathBuf>> {
        let key = Self::normalize(root)?;
        let tree = self.read_tree()?;
        if !tree.is_dir(&key) {
            return Err(not_found(root));
        }
        tree.files
            .keys()
            .filter(|p| p.starts_with(&key))
            .map(|p| {
                p.strip_prefix(&key)
                    .map(Path::to_path_buf)
                    .map_err(io::Error::other)
            })
            .collect()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memfs_write_creates_parents() {
        let fs = MemFs::new();
        fs.write(Path::new("/a/b/c.txt"), b"hello").unwrap();

        assert!(fs.is_dir(Path::new("a")));
        assert!(fs.is_dir(Path::new("a/b")));
        assert!(fs.is_file(Path::new("a/b/c.txt")));
        assert_eq!(fs.read(Path::new("a/b/c.txt")).unwrap(), b"hello");
    }

    #[test]
    fn test_memfs_read_dir() {
        let fs = MemFs::from_files([("x/one.yaml", "1"), ("x/sub/two.yaml", "2")]).unwrap();

        let entries = fs.read_dir(Path::new("x")).unwrap();
        assert_eq!(
            entries,
            vec![
                DirEntry {
                    name: "one.yaml".to_string(),
                    is_dir: false
                },
                DirEntry {
                    name: "sub".to_string(),
                    is_dir: true
                },
            ]
        );
        assert!(fs.read_dir(Path::new("missing")).is_err());
    }

    #[test]
    fn test_memfs_rejects_parent_components() {
        let fs = MemFs::new();
        let err = fs.write(Path::new("../escape"), b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_memfs_rename_directory() {
        let fs = MemFs::from_files([("stage/a.json", "a"), ("stage/s/b.py", "b")]).unwrap();
        fs.rename(Path::new("stage"), Path::new("final/entry")).unwrap();

        assert!(!fs.exists(Path::new("stage")));
        assert_eq!(fs.read(Path::new("final/entry/a.json")).unwrap(), b"a");
        assert_eq!(fs.read(Path::new("final/entry/s/b.py")).unwrap(), b"b");

        let err = fs
            .rename(Path::new("final/entry/a.json"), Path::new("final/entry/s/b.py"))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_memfs_remove_dir_all() {
        let fs = MemFs::from_files([("root/a", "1"), ("root/b/c", "2"), ("other", "3")]).unwrap();
        fs.remove_dir_all(Path::new("root")).unwrap();

        assert_eq!(fs.file_count(), 1);
        assert!(fs.remove_dir_all(Path::new("root")).is_err());
    }

    #[test]
    fn test_memfs_walk_files() {
        let fs = MemFs::from_files([("r/b.txt", "b"), ("r/a/c.txt", "c"), ("s/d", "d")]).unwrap();
        let files = fs.walk_files(Path::new("r")).unwrap();
        assert_eq!(
            files,
            vec![PathBuf::from("a/c.txt"), PathBuf::from("b.txt")]
        );
    }

    #[test]
    fn test_copy_tree_between_filesystems() {
        let temp = TempDir::new().unwrap();
        let os = OsFs::rooted(temp.path());
        os.create_dir_all(Path::new("schema.python/models")).unwrap();
        os.write(Path::new("schema.python/models/v1.py"), b"class X: ...")
            .unwrap();
        os.write(Path::new("schema.python/__init__.py"), b"").unwrap();

        let mem = MemFs::new();
        let copied = copy_tree(&os, Path::new("schema.python"), &mem, Path::new("")).unwrap();

        assert_eq!(copied, 2);
        assert_eq!(
            mem.read(Path::new("models/v1.py")).unwrap(),
            b"class X: ..."
        );
    }

    #[test]
    fn test_osfs_rooted_ignores_absolute_prefix() {
        let temp = TempDir::new().unwrap();
        let os = OsFs::rooted(temp.path());
        os.write(Path::new("/file.txt"), b"x").unwrap();
        assert!(temp.path().join("file.txt").is_file());
    }

    #[test]
    fn test_memfs_equality_by_content() {
        let a = MemFs::from_files([("f", "1")]).unwrap();
        let b = MemFs::from_files([("f", "1")]).unwrap();
        let c = MemFs::from_files([("f", "2")]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
