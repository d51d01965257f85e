//! Integration tests for CLI commands
//!
//! Every test points the binary at a temporary home and cache, so no real
//! configuration or registry is touched.

use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

const PROVIDER: &str = "xpkg.upbound.io/org/provider-a";

/// Helper to run xpkg against an isolated home directory
fn xpkg(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_xpkg"))
        .args(args)
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env_remove("XPKG_CACHE_DIR")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute xpkg")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// Write a cached Provider the way the cache lays it out on disk
fn seed_provider(cache: &Path, version: &str) {
    let dir = cache
        .join("xpkg.upbound.io")
        .join("org")
        .join(format!("provider-a@{version}"));
    std::fs::create_dir_all(&dir).unwrap();

    let meta = serde_json::json!({
        "apiVersion": "meta.pkg.crossplane.io/v1",
        "kind": "Provider",
        "metadata": { "name": "provider-a" },
        "spec": { "controller": { "image": "example.org/provider-a-controller:v1" } }
    });
    std::fs::write(dir.join("package.ndjson"), format!("{meta}\n")).unwrap();

    let entry = serde_json::json!({
        "registry": "xpkg.upbound.io",
        "repository": "org/provider-a",
        "version": version,
        "digest": "sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef",
        "type": "Provider",
        "cachedAt": "2024-01-01T00:00:00Z"
    });
    std::fs::write(dir.join("entry.json"), entry.to_string()).unwrap();
}

fn cache_flag(cache: &Path) -> String {
    format!("--cache-dir={}", cache.display())
}

mod help {
    use super::*;

    #[test]
    fn test_help_lists_dep_commands() {
        let home = TempDir::new().unwrap();
        let output = xpkg(home.path(), &["dep", "--help"]);

        assert!(output.status.success());
        let out = stdout(&output);
        for command in ["add", "update-cache", "clean-cache", "resolve", "list-cache"] {
            assert!(out.contains(command), "missing {command} in help:\n{out}");
        }
    }

    #[test]
    fn test_version() {
        let home = TempDir::new().unwrap();
        let output = xpkg(home.path(), &["--version"]);

        assert!(output.status.success());
        assert!(stdout(&output).contains(env!("CARGO_PKG_VERSION")));
    }
}

mod cache_commands {
    use super::*;

    #[test]
    fn test_list_empty_cache() {
        let home = TempDir::new().unwrap();
        let cache = home.path().join("cache");
        let output = xpkg(home.path(), &["dep", "list-cache", &cache_flag(&cache)]);

        assert!(output.status.success(), "stderr: {}", stderr(&output));
        assert!(stdout(&output).contains("Package cache is empty"));
    }

    #[test]
    fn test_list_cache_json() {
        let home = TempDir::new().unwrap();
        let cache = home.path().join("cache");
        seed_provider(&cache, "v0.1.0");
        seed_provider(&cache, "v0.2.0");

        let output = xpkg(home.path(), &["dep", "list-cache", "--json", &cache_flag(&cache)]);
        assert!(output.status.success(), "stderr: {}", stderr(&output));

        let listing: serde_json::Value =
            serde_json::from_str(&stdout(&output)).expect("Output should be valid JSON");
        let entries = listing.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["package"], PROVIDER);
        assert_eq!(entries[0]["version"], "v0.1.0");
        assert_eq!(entries[1]["version"], "v0.2.0");
    }

    #[test]
    fn test_cache_dir_from_environment() {
        let home = TempDir::new().unwrap();
        let cache = home.path().join("env-cache");
        seed_provider(&cache, "v0.1.0");

        let output = Command::new(env!("CARGO_BIN_EXE_xpkg"))
            .args(["dep", "list-cache"])
            .env("HOME", home.path())
            .env("XDG_CONFIG_HOME", home.path().join(".config"))
            .env("XPKG_CACHE_DIR", &cache)
            .output()
            .expect("Failed to execute xpkg");

        assert!(output.status.success(), "stderr: {}", stderr(&output));
        assert!(stdout(&output).contains(PROVIDER));
    }

    #[test]
    fn test_clean_cache() {
        let home = TempDir::new().unwrap();
        let cache = home.path().join("cache");
        seed_provider(&cache, "v0.1.0");

        let output = xpkg(home.path(), &["dep", "clean-cache", &cache_flag(&cache)]);
        assert!(output.status.success(), "stderr: {}", stderr(&output));
        assert!(stdout(&output).contains("Cleaned package cache"));

        let output = xpkg(home.path(), &["dep", "list-cache", &cache_flag(&cache)]);
        assert!(stdout(&output).contains("Package cache is empty"));
    }

    #[test]
    fn test_clean_missing_cache() {
        let home = TempDir::new().unwrap();
        let cache = home.path().join("never-created");
        let output = xpkg(home.path(), &["dep", "clean-cache", &cache_flag(&cache)]);

        assert!(output.status.success(), "stderr: {}", stderr(&output));
    }
}

mod resolve_command {
    use super::*;

    #[test]
    fn test_resolve_picks_highest_cached_version() {
        let home = TempDir::new().unwrap();
        let cache = home.path().join("cache");
        seed_provider(&cache, "v0.1.0");
        seed_provider(&cache, "v0.2.0");

        let output = xpkg(home.path(), &["dep", "resolve", PROVIDER, &cache_flag(&cache)]);

        assert!(output.status.success(), "stderr: {}", stderr(&output));
        let out = stdout(&output);
        assert!(out.contains(&format!("{PROVIDER}@v0.2.0")), "stdout: {out}");
        assert!(out.contains("Provider"));
        assert!(out.contains("0123456789ab"));
    }

    #[test]
    fn test_resolve_exact_version() {
        let home = TempDir::new().unwrap();
        let cache = home.path().join("cache");
        seed_provider(&cache, "v0.1.0");
        seed_provider(&cache, "v0.2.0");

        let reference = format!("{PROVIDER}:v0.1.0");
        let output = xpkg(home.path(), &["dep", "resolve", &reference, &cache_flag(&cache)]);

        assert!(output.status.success(), "stderr: {}", stderr(&output));
        assert!(stdout(&output).contains(&format!("{PROVIDER}@v0.1.0")));
    }

    #[test]
    fn test_resolve_not_cached() {
        let home = TempDir::new().unwrap();
        let cache = home.path().join("cache");
        let output = xpkg(home.path(), &["dep", "resolve", PROVIDER, &cache_flag(&cache)]);

        assert_eq!(output.status.code(), Some(2));
        assert!(stderr(&output).contains("not in the package cache"));
    }

    #[test]
    fn test_resolve_range_outside_cache() {
        let home = TempDir::new().unwrap();
        let cache = home.path().join("cache");
        seed_provider(&cache, "v0.1.0");

        let reference = format!("{PROVIDER}@>=v1.0.0");
        let output = xpkg(home.path(), &["dep", "resolve", &reference, &cache_flag(&cache)]);

        assert_eq!(output.status.code(), Some(2));
    }

    #[test]
    fn test_resolve_invalid_reference() {
        let home = TempDir::new().unwrap();
        let cache = home.path().join("cache");
        let output = xpkg(home.path(), &["dep", "resolve", "", &cache_flag(&cache)]);

        assert_eq!(output.status.code(), Some(64));
    }
}

mod project_commands {
    use super::*;

    #[test]
    fn test_update_cache_without_project_file() {
        let home = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let cache = home.path().join("cache");

        let output = xpkg(
            home.path(),
            &[
                "dep",
                "update-cache",
                project.path().to_str().unwrap(),
                &cache_flag(&cache),
            ],
        );

        assert_eq!(output.status.code(), Some(78));
        assert!(stderr(&output).contains("crossplane.yaml"));
    }

    #[test]
    fn test_update_cache_with_no_dependencies() {
        let home = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let cache = home.path().join("cache");
        std::fs::write(
            project.path().join("crossplane.yaml"),
            concat!(
                "apiVersion: meta.pkg.crossplane.io/v1\nkind: Configuration\n",
                "metadata:\n  name: platform\nspec: {}\n",
            ),
        )
        .unwrap();

        let output = xpkg(
            home.path(),
            &[
                "dep",
                "update-cache",
                project.path().to_str().unwrap(),
                &cache_flag(&cache),
            ],
        );

        assert!(output.status.success(), "stderr: {}", stderr(&output));
        assert!(stdout(&output).contains("No dependencies declared in crossplane.yaml"));
    }

    #[test]
    fn test_add_rejects_unknown_type() {
        let home = TempDir::new().unwrap();
        let cache = home.path().join("cache");
        let output = xpkg(
            home.path(),
            &["dep", "add", PROVIDER, "--type", "widget", &cache_flag(&cache)],
        );

        assert_eq!(output.status.code(), Some(64));
        assert!(stderr(&output).contains("widget"));
    }
}

mod configuration {
    use super::*;

    #[test]
    fn test_invalid_config_file() {
        let home = TempDir::new().unwrap();
        let config = home.path().join("config.yaml");
        std::fs::write(&config, "maxConcurrentFetches: 0\n").unwrap();

        let output = xpkg(
            home.path(),
            &["dep", "list-cache", &format!("--config={}", config.display())],
        );

        assert_eq!(output.status.code(), Some(78));
        assert!(stderr(&output).contains("maxConcurrentFetches"));
    }

    #[test]
    fn test_cache_dir_from_config_file() {
        let home = TempDir::new().unwrap();
        let cache = home.path().join("configured-cache");
        seed_provider(&cache, "v0.3.0");
        let config = home.path().join("config.yaml");
        std::fs::write(&config, format!("cacheDir: {}\n", cache.display())).unwrap();

        let output = xpkg(
            home.path(),
            &["dep", "list-cache", &format!("--config={}", config.display())],
        );

        assert!(output.status.success(), "stderr: {}", stderr(&output));
        assert!(stdout(&output).contains("v0.3.0"));
    }
}
