//! Project meta files
//!
//! A project directory holds a single meta document (`crossplane.yaml` or
//! `upbound.yaml`) whose `spec.dependsOn` lists the packages it needs.
//! Edits go through the raw YAML tree so fields this crate does not model
//! survive a rewrite.

use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};
use crate::fs::Filesystem;
use crate::meta::{Dependency, META_GROUP, MetaDependency, PackageType};

/// Meta file names, in lookup order
pub const PROJECT_FILES: [&str; 2] = ["crossplane.yaml", "upbound.yaml"];

/// API group of Upbound project files
pub const PROJECT_GROUP: &str = "meta.dev.upbound.io";

#[derive(Debug, Clone)]
pub struct ProjectMeta {
    doc: Value,
}

impl ProjectMeta {
    pub fn parse(contents: &str) -> Result<Self> {
        let doc: Value = serde_yaml::from_str(contents)?;

        let api_version = doc.get("apiVersion").and_then(Value::as_str).unwrap_or_default();
        let kind = doc.get("kind").and_then(Value::as_str).unwrap_or_default();
        let group = api_version.split('/').next().unwrap_or_default();

        let supported = match group {
            META_GROUP => kind.parse::<PackageType>().is_ok(),
            PROJECT_GROUP => kind == "Project",
            _ => false,
        };
        if !supported {
            return Err(CoreError::UnsupportedMeta {
                message: format!("apiVersion '{api_version}', kind '{kind}'"),
            });
        }

        Ok(Self { doc })
    }

    /// Locate the meta file in a project directory
    pub fn find(fs: &dyn Filesystem, dir: &Path) -> Option<PathBuf> {
        PROJECT_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| fs.is_file(path))
    }

    pub fn load(fs: &dyn Filesystem, path: &Path) -> Result<Self> {
        let bytes = fs.read(path)?;
        let contents = String::from_utf8(bytes)
            .map_err(|e| CoreError::UnsupportedMeta { message: e.to_string() })?;
        Self::parse(&contents)
    }

    pub fn save(&self, fs: &dyn Filesystem, path: &Path) -> Result<()> {
        fs.write(path, self.to_yaml()?.as_bytes())?;
        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.doc)?)
    }

    pub fn name(&self) -> Option<&str> {
        self.doc
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
    }

    /// Dependencies in declaration order
    pub fn depends_on(&self) -> Result<Vec<Dependency>> {
        self.entries()
            .iter()
            .map(|entry| {
                let parsed: MetaDependency = serde_yaml::from_value(entry.clone())?;
                parsed
                    .to_dependency()
                    .map_err(|message| CoreError::UnsupportedMeta { message })
            })
            .collect()
    }

    /// Update the entry for `dep.package` to `dep.constraints`, or append a
    /// new entry when the package is not listed yet
    pub fn upsert(&mut self, dep: &Dependency) -> Result<()> {
        let entries = self.entries_mut()?;

        let mut updated = false;
        for entry in entries.iter_mut() {
            let parsed: MetaDependency = serde_yaml::from_value(entry.clone())?;
            if parsed.package_name() != Some(dep.package.as_str()) {
                continue;
            }
            if updated {
                return Err(CoreError::DuplicateDependency {
                    package: dep.package.clone(),
                });
            }
            if let Some(map) = entry.as_mapping_mut() {
                map.insert(
                    Value::String("version".to_string()),
                    Value::String(dep.constraints.clone()),
                );
            }
            updated = true;
        }

        if !updated {
            let package_type = dep.package_type.ok_or_else(|| CoreError::UnsupportedMeta {
                message: format!("dependency '{}' needs a package type", dep.package),
            })?;
            let entry = serde_yaml::to_value(MetaDependency::keyed(dep, package_type))?;
            entries.push(entry);
        }

        Ok(())
    }

    fn entries(&self) -> Vec<Value> {
        self.doc
            .get("spec")
            .and_then(|s| s.get("dependsOn"))
            .and_then(Value::as_sequence)
            .cloned()
            .unwrap_or_default()
    }

    fn entries_mut(&mut self) -> Result<&mut Vec<Value>> {
        let root = self
            .doc
            .as_mapping_mut()
            .ok_or_else(|| CoreError::UnsupportedMeta {
                message: "meta file is not a mapping".to_string(),
            })?;

        let spec = root
            .entry(Value::String("spec".to_string()))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        if spec.is_null() {
            *spec = Value::Mapping(Mapping::new());
        }
        let spec = spec.as_mapping_mut().ok_or_else(|| CoreError::UnsupportedMeta {
            message: "spec is not a mapping".to_string(),
        })?;

        let deps = spec
            .entry(Value::String("dependsOn".to_string()))
            .or_insert_with(|| Value::Sequence(Vec::new()));
        if deps.is_null() {
            *deps = Value::Sequence(Vec::new());
        }
        deps.as_sequence_mut().ok_or_else(|| CoreError::UnsupportedMeta {
            message: "spec.dependsOn is not a list".to_string(),
        })
    }
}
