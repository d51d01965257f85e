//! Registry credentials
//!
//! Credentials are looked up per registry host:
//! - explicit entries in `~/.config/xpkg/credentials.yaml`
//! - environment variable references (CI/CD friendly)
//! - the Docker `config.json` auths map
//!
//! Anything else pulls anonymously.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use oci_distribution::secrets::RegistryAuth;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::{RepoError, Result};

/// Credential types supported
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Credentials {
    /// Basic authentication (username/password)
    Basic { username: String, password: String },

    /// Environment variable references
    Env {
        username_var: String,
        password_var: String,
    },

    /// Docker config.json reference
    DockerConfig { path: Option<PathBuf> },
}

impl Credentials {
    /// Resolve to registry auth for `registry`
    pub fn resolve(&self, registry: &str) -> Result<RegistryAuth> {
        match self {
            Credentials::Basic { username, password } => {
                Ok(RegistryAuth::Basic(username.clone(), password.clone()))
            }
            Credentials::Env {
                username_var,
                password_var,
            } => {
                let lookup = |var: &str| {
                    std::env::var(var).map_err(|_| RepoError::AuthFailed {
                        registry: registry.to_string(),
                        message: format!("Environment variable {var} not set"),
                    })
                };
                Ok(RegistryAuth::Basic(lookup(username_var)?, lookup(password_var)?))
            }
            Credentials::DockerConfig { path } => {
                let config = load_docker_config(path.as_deref())?;
                Ok(config.auth_for(registry).unwrap_or(RegistryAuth::Anonymous))
            }
        }
    }
}

/// Docker config.json format
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DockerConfig {
    #[serde(default)]
    pub auths: HashMap<String, DockerAuth>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DockerAuth {
    #[serde(default)]
    pub auth: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl DockerAuth {
    fn user_pass(&self) -> Option<(String, String)> {
        if let (Some(u), Some(p)) = (&self.username, &self.password) {
            return Some((u.clone(), p.clone()));
        }
        let decoded = STANDARD.decode(self.auth.as_deref()?).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (user, pass) = decoded.split_once(':')?;
        Some((user.to_string(), pass.to_string()))
    }
}

impl DockerConfig {
    /// Registry auth for a host, matching `auths` keys written with or
    /// without a scheme or path
    pub fn auth_for(&self, registry: &str) -> Option<RegistryAuth> {
        self.auths
            .iter()
            .find(|(key, _)| registry_host(key) == registry)
            .and_then(|(_, auth)| auth.user_pass())
            .map(|(user, pass)| RegistryAuth::Basic(user, pass))
    }
}

/// `https://index.docker.io/v1/` -> `index.docker.io`
fn registry_host(key: &str) -> String {
    if let Ok(url) = Url::parse(key) {
        if let Some(host) = url.host_str() {
            return match url.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            };
        }
    }
    key.split('/').next().unwrap_or(key).to_string()
}

/// Load Docker config from the given or the default path
pub fn load_docker_config(path: Option<&Path>) -> Result<DockerConfig> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let home = dirs::home_dir().ok_or_else(|| RepoError::InvalidConfig {
                message: "Could not determine home directory".to_string(),
            })?;
            home.join(".docker").join("config.json")
        }
    };

    if !config_path.exists() {
        return Ok(DockerConfig::default());
    }

    let content = std::fs::read_to_string(&config_path)?;
    let config: DockerConfig = serde_json::from_str(&content)?;
    Ok(config)
}

/// Credential store - credentials keyed by registry host
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialStore {
    #[serde(default)]
    credentials: BTreeMap<String, Credentials>,
}

impl CredentialStore {
    /// Load credential store from default location
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
        let store: Self = serde_yaml::from_str(&content)?;
        Ok(store)
    }

    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| RepoError::InvalidConfig {
            message: "Could not determine config directory".to_string(),
        })?;
        Ok(config_dir.join("xpkg").join("credentials.yaml"))
    }

    pub fn get(&self, registry: &str) -> Option<&Credentials> {
        self.credentials.get(registry)
    }

    /// Auth for a registry: explicit entry, then Docker config, then anonymous
    pub fn auth_for(&self, registry: &str, docker_config: Option<&Path>) -> Result<RegistryAuth> {
        if let Some(creds) = self.get(registry) {
            return creds.resolve(registry);
        }
        let config = load_docker_config(docker_config)?;
        Ok(config.auth_for(registry).unwrap_or(RegistryAuth::Anonymous))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn is_basic(auth: &RegistryAuth, user: &str, pass: &str) -> bool {
        matches!(auth, RegistryAuth::Basic(u, p) if u == user && p == pass)
    }

    #[test]
    fn test_basic_resolve() {
        let creds = Credentials::Basic {
            username: "user".to_string(),
            password: "pass".to_string(),
        };
        let auth = creds.resolve("ghcr.io").unwrap();
        assert!(is_basic(&auth, "user", "pass"));
    }

    #[test]
    fn test_env_credentials() {
        // SAFETY: variables are unique to this test
        unsafe {
            std::env::set_var("XPKG_TEST_USER_VAR", "robot");
            std::env::set_var("XPKG_TEST_PASS_VAR", "s3cret");
        }

        let env = |user: &str, pass: &str| Credentials::Env {
            username_var: user.to_string(),
            password_var: pass.to_string(),
        };
        let auth = env("XPKG_TEST_USER_VAR", "XPKG_TEST_PASS_VAR")
            .resolve("xpkg.upbound.io")
            .unwrap();
        assert!(is_basic(&auth, "robot", "s3cret"));

        let missing =
            env("XPKG_TEST_UNSET_USER", "XPKG_TEST_UNSET_PASS").resolve("xpkg.upbound.io");
        assert!(matches!(missing, Err(RepoError::AuthFailed { .. })));

        // SAFETY: variables are unique to this test
        unsafe {
            std::env::remove_var("XPKG_TEST_USER_VAR");
            std::env::remove_var("XPKG_TEST_PASS_VAR");
        }
    }

    #[test]
    fn test_docker_config_matching() {
        let encoded = STANDARD.encode("alice:hunter2");
        let config: DockerConfig = serde_json::from_value(serde_json::json!({
            "auths": {
                "https://xpkg.upbound.io/v1/": {"auth": encoded},
                "localhost:5000": {"username": "bob", "password": "pw"}
            }
        }))
        .unwrap();

        assert!(is_basic(
            &config.auth_for("xpkg.upbound.io").unwrap(),
            "alice",
            "hunter2"
        ));
        assert!(is_basic(&config.auth_for("localhost:5000").unwrap(), "bob", "pw"));
        assert!(config.auth_for("ghcr.io").is_none());
    }

    #[test]
    fn test_store_prefers_explicit_entry() {
        let dir = TempDir::new().unwrap();
        let docker = dir.path().join("config.json");
        std::fs::write(
            &docker,
            format!(
                r#"{{"auths": {{"ghcr.io": {{"auth": "{}"}}, "quay.io": {{"auth": "{}"}}}}}}"#,
                STANDARD.encode("docker:user"),
                STANDARD.encode("quay:user")
            ),
        )
        .unwrap();
        let path = dir.path().join("credentials.yaml");
        std::fs::write(
            &path,
            "credentials:\n  ghcr.io:\n    type: basic\n    username: explicit\n    password: pw\n",
        )
        .unwrap();

        let store = CredentialStore::load_from(&path).unwrap();
        assert!(is_basic(
            &store.auth_for("ghcr.io", Some(&docker)).unwrap(),
            "explicit",
            "pw"
        ));
        assert!(is_basic(
            &store.auth_for("quay.io", Some(&docker)).unwrap(),
            "quay",
            "user"
        ));
        assert!(matches!(
            store.auth_for("docker.io", Some(&docker)).unwrap(),
            RegistryAuth::Anonymous
        ));
    }

    #[test]
    fn test_store_reads_env_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.yaml");
        std::fs::write(
            &path,
            r#"credentials:
  xpkg.upbound.io:
    type: env
    username_var: XPKG_USER
    password_var: XPKG_TOKEN
"#,
        )
        .unwrap();

        let store = CredentialStore::load_from(&path).unwrap();
        assert!(matches!(
            store.get("xpkg.upbound.io"),
            Some(Credentials::Env { username_var, .. }) if username_var == "XPKG_USER"
        ));
        assert!(store.get("ghcr.io").is_none());
    }
}
