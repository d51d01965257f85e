//! Tool configuration
//!
//! Stored in `~/.config/xpkg/config.yaml`. Every field is optional; the cache
//! directory can also come from `XPKG_CACHE_DIR` or a command-line flag,
//! which win over the file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RepoError, Result};

/// Environment variable overriding the cache directory
pub const CACHE_DIR_ENV: &str = "XPKG_CACHE_DIR";

/// Registry prepended to references that do not name one
pub const DEFAULT_REGISTRY: &str = "xpkg.upbound.io";

/// Largest single file accepted from a schema layer (1 GiB)
pub const DEFAULT_MAX_SCHEMA_FILE_SIZE: u64 = 1 << 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Package cache root (default: `~/.up/cache`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    #[serde(default = "default_registry")]
    pub default_registry: String,

    /// Registries reached over plain HTTP
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub insecure_registries: Vec<String>,

    /// Upper bound on a single registry call
    #[serde(default = "default_fetch_timeout", with = "humantime_serde")]
    pub fetch_timeout: Duration,

    #[serde(default = "default_max_schema_file_size")]
    pub max_schema_file_size: u64,

    /// Concurrent registry fetches shared across one process
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    /// Docker config.json used for registry credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_config: Option<PathBuf>,
}

fn default_registry() -> String {
    DEFAULT_REGISTRY.to_string()
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_schema_file_size() -> u64 {
    DEFAULT_MAX_SCHEMA_FILE_SIZE
}

fn default_max_concurrent_fetches() -> usize {
    4
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: None,
            default_registry: default_registry(),
            insecure_registries: Vec::new(),
            fetch_timeout: default_fetch_timeout(),
            max_schema_file_size: default_max_schema_file_size(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            docker_config: None,
        }
    }
}

impl Config {
    /// Load configuration from default location
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content).map_err(|e| RepoError::InvalidConfig {
            message: format!("{}: {e}", path.display()),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| RepoError::InvalidConfig {
            message: "Could not determine config directory".to_string(),
        })?;
        Ok(config_dir.join("xpkg").join("config.yaml"))
    }

    fn validate(&self) -> Result<()> {
        if self.max_concurrent_fetches == 0 {
            return Err(RepoError::InvalidConfig {
                message: "maxConcurrentFetches must be at least 1".to_string(),
            });
        }
        if self.max_schema_file_size == 0 {
            return Err(RepoError::InvalidConfig {
                message: "maxSchemaFileSize must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Cache root: flag, then `XPKG_CACHE_DIR`, then the file, then `~/.up/cache`
    pub fn cache_dir(&self, flag: Option<&Path>) -> Result<PathBuf> {
        self.cache_dir_with_env(flag, std::env::var_os(CACHE_DIR_ENV).map(PathBuf::from))
    }

    fn cache_dir_with_env(&self, flag: Option<&Path>, env: Option<PathBuf>) -> Result<PathBuf> {
        if let Some(dir) = flag {
            return Ok(dir.to_path_buf());
        }
        if let Some(dir) = env.filter(|d| !d.as_os_str().is_empty()) {
            return Ok(dir);
        }
        if let Some(dir) = &self.cache_dir {
            return Ok(expand_home(dir));
        }
        default_cache_dir()
    }

    pub fn is_insecure(&self, registry: &str) -> bool {
        self.insecure_registries.iter().any(|r| r == registry)
    }
}

/// `~/.up/cache`
pub fn default_cache_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| RepoError::InvalidConfig {
        message: "Could not determine home directory".to_string(),
    })?;
    Ok(home.join(".up").join("cache"))
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_from_empty_file() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.default_registry, "xpkg.upbound.io");
        assert_eq!(config.max_schema_file_size, 1 << 30);
    }

    #[test]
    fn test_parse_full_config() {
        let config: Config = serde_yaml::from_str(
            r#"
cacheDir: /var/cache/xpkg
defaultRegistry: registry.example.com
insecureRegistries: [localhost:5000]
fetchTimeout: 2m 30s
maxSchemaFileSize: 1048576
maxConcurrentFetches: 8
"#,
        )
        .unwrap();
        assert_eq!(config.fetch_timeout, Duration::from_secs(150));
        assert!(config.is_insecure("localhost:5000"));
        assert!(!config.is_insecure("registry.example.com"));
        assert_eq!(config.max_concurrent_fetches, 8);
    }

    #[test]
    fn test_cache_dir_precedence() {
        let config = Config {
            cache_dir: Some(PathBuf::from("/from/file")),
            ..Config::default()
        };

        let flag = Path::new("/from/flag");
        assert_eq!(
            config
                .cache_dir_with_env(Some(flag), Some(PathBuf::from("/from/env")))
                .unwrap(),
            PathBuf::from("/from/flag")
        );
        assert_eq!(
            config
                .cache_dir_with_env(None, Some(PathBuf::from("/from/env")))
                .unwrap(),
            PathBuf::from("/from/env")
        );
        assert_eq!(
            config.cache_dir_with_env(None, None).unwrap(),
            PathBuf::from("/from/file")
        );
        assert!(
            Config::default()
                .cache_dir_with_env(None, None)
                .unwrap()
                .ends_with(".up/cache")
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "maxConcurrentFetches: 0\n").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(RepoError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("xpkg").join("config.yaml");
        let config = Config {
            insecure_registries: vec!["localhost:5000".to_string()],
            ..Config::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }
}
