//! Unpacked package representation

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use std::collections::BTreeMap;

use crate::fs::MemFs;
use crate::meta::{Dependency, PackageMeta, PackageType, ResolvedDependency};
use crate::object::{CompositeResourceDefinition, Composition, PackageObject};

/// One version of a package, unpacked
///
/// Built once by the marshaler and shared read-only afterwards.
#[derive(Debug, Clone)]
pub struct ParsedPackage {
    pub meta: PackageMeta,

    /// Embedded objects, including CRDs synthesized from XRDs
    pub objects: Vec<PackageObject>,

    /// This version's own `dependsOn`, normalized
    pub dependencies: Vec<Dependency>,

    pub registry: String,
    pub repository: String,
    pub digest: String,
    pub version: String,

    /// Schema bundles keyed by language (`kcl`, `python`, ...)
    pub schemas: BTreeMap<String, MemFs>,
}

impl ParsedPackage {
    pub fn package_type(&self) -> PackageType {
        self.meta.package_type()
    }

    /// `registry/repository`, or just the repository without a registry
    pub fn source(&self) -> String {
        if self.registry.is_empty() {
            self.repository.clone()
        } else {
            format!("{}/{}", self.registry, self.repository)
        }
    }

    pub fn resolved(&self) -> ResolvedDependency {
        ResolvedDependency {
            package: self.source(),
            package_type: self.package_type(),
            version: self.version.clone(),
        }
    }

    pub fn schema(&self, language: &str) -> Option<&MemFs> {
        self.schemas.get(language)
    }

    pub fn crds(&self) -> impl Iterator<Item = &CustomResourceDefinition> {
        self.objects.iter().filter_map(|o| match o {
            PackageObject::CustomResourceDefinition(c) => Some(c.as_ref()),
            _ => None,
        })
    }

    pub fn xrds(&self) -> impl Iterator<Item = &CompositeResourceDefinition> {
        self.objects.iter().filter_map(|o| match o {
            PackageObject::CompositeResourceDefinition(x) => Some(x.as_ref()),
            _ => None,
        })
    }

    pub fn compositions(&self) -> impl Iterator<Item = &Composition> {
        self.objects.iter().filter_map(|o| match o {
            PackageObject::Composition(c) => Some(c.as_ref()),
            _ => None,
        })
    }
}
