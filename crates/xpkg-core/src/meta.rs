//! Package metadata
//!
//! Every package carries exactly one meta document describing it. The three
//! package kinds share most of their spec but differ in what they may embed
//! and how they are linted, so they are modelled as a closed enum.

use k8s_openapi::api::rbac::v1::PolicyRule;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};
use crate::reference::{Delimiter, PackageReference, VersionConstraint};

/// API group of package meta documents (`crossplane.yaml`)
pub const META_GROUP: &str = "meta.pkg.crossplane.io";

/// API group of installed package objects, used by `dependsOn` entries
pub const PKG_GROUP: &str = "pkg.crossplane.io";

/// Kind of a Crossplane package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PackageType {
    Provider,
    Configuration,
    Function,
}

impl PackageType {
    pub const ALL: [PackageType; 3] = [Self::Provider, Self::Configuration, Self::Function];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provider => "Provider",
            Self::Configuration => "Configuration",
            Self::Function => "Function",
        }
    }

    /// Lowercase key used in the keyed `dependsOn` form
    pub fn key(&self) -> &'static str {
        match self {
            Self::Provider => "provider",
            Self::Configuration => "configuration",
            Self::Function => "function",
        }
    }
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageType {
    type Err = CoreError;

    /// Case-insensitive: `provider`, `Provider` and `PROVIDER` are all accepted
    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                CoreError::malformed(format!(
                    "unknown package type '{s}', expected one of provider, configuration, function"
                ))
            })
    }
}

/// A requested dependency: a package, optionally its kind, and a constraint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub package: String,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub package_type: Option<PackageType>,

    #[serde(default)]
    pub constraints: String,
}

impl Dependency {
    pub fn new(
        package: impl Into<String>,
        package_type: Option<PackageType>,
        constraints: impl Into<String>,
    ) -> Self {
        Self {
            package: package.into(),
            package_type,
            constraints: constraints.into(),
        }
    }

    /// Build from a reference string such as `org/pkg@>=v1.0.0`
    pub fn from_reference(raw: &str) -> Result<Self> {
        let reference = PackageReference::parse(raw)?;
        Ok(Self {
            package: reference.source().to_string(),
            package_type: None,
            constraints: reference.constraint().as_str().to_string(),
        })
    }

    /// Build from a reference string and a package type name
    pub fn with_type(raw: &str, package_type: &str) -> Result<Self> {
        let mut dep = Self::from_reference(raw)?;
        dep.package_type = Some(package_type.parse()?);
        Ok(dep)
    }

    pub fn reference(&self) -> Result<PackageReference> {
        PackageReference::new(&self.package, &self.constraints)
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.constraints.as_str() {
            "" => write!(f, "{}", self.package),
            c => write!(f, "{}@{}", self.package, c),
        }
    }
}

/// A dependency pinned to the concrete version that satisfied it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedDependency {
    pub package: String,
    #[serde(rename = "type")]
    pub package_type: PackageType,
    pub version: String,
}

impl ResolvedDependency {
    /// The dependency as it should be recorded in a project file
    pub fn to_dependency(&self) -> Dependency {
        Dependency {
            package: self.package.clone(),
            package_type: Some(self.package_type),
            constraints: self.version.clone(),
        }
    }
}

impl fmt::Display for ResolvedDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.package, self.version)
    }
}

/// Crossplane version requirements of a package
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrossplaneConstraints {
    pub version: String,
}

/// One `dependsOn` entry as written in a meta document
///
/// Two shapes exist in the wild: the keyed form
/// (`provider: xpkg.upbound.io/org/pkg`) and the typed form
/// (`apiVersion: pkg.crossplane.io/v1`, `kind: Provider`, `package: ...`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaDependency {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,

    #[serde(default)]
    pub version: String,
}

impl MetaDependency {
    /// Keyed-form entry for a dependency
    pub fn keyed(dep: &Dependency, package_type: PackageType) -> Self {
        let mut entry = Self {
            version: dep.constraints.clone(),
            ..Self::default()
        };
        let package = Some(dep.package.clone());
        match package_type {
            PackageType::Provider => entry.provider = package,
            PackageType::Configuration => entry.configuration = package,
            PackageType::Function => entry.function = package,
        }
        entry
    }

    /// Every package this entry names, with the kind it names it as
    fn named(&self) -> Vec<(PackageType, &str)> {
        let mut named = Vec::new();
        if let Some(p) = &self.provider {
            named.push((PackageType::Provider, p.as_str()));
        }
        if let Some(c) = &self.configuration {
            named.push((PackageType::Configuration, c.as_str()));
        }
        if let Some(f) = &self.function {
            named.push((PackageType::Function, f.as_str()));
        }
        named
    }

    /// Package name regardless of which shape names it
    pub fn package_name(&self) -> Option<&str> {
        self.named()
            .first()
            .map(|(_, p)| *p)
            .or(self.package.as_deref())
    }

    /// Normalize into a [`Dependency`]
    pub fn to_dependency(&self) -> std::result::Result<Dependency, String> {
        let named = self.named();
        let typed = self.typed_package()?;

        let (package_type, package) = match (named.as_slice(), typed) {
            ([(t, p)], None) => (*t, p.to_string()),
            ([], Some((t, p))) => (t, p.to_string()),
            ([], None) => return Err("dependency does not name a package".to_string()),
            _ => {
                return Err(format!(
                    "dependency names more than one package ({})",
                    self.describe()
                ));
            }
        };

        if package.trim().is_empty() {
            return Err("dependency has an empty package name".to_string());
        }

        Ok(Dependency {
            package,
            package_type: Some(package_type),
            constraints: self.version.clone(),
        })
    }

    fn typed_package(&self) -> std::result::Result<Option<(PackageType, &str)>, String> {
        let Some(package) = self.package.as_deref() else {
            return Ok(None);
        };
        let kind = self
            .kind
            .as_deref()
            .ok_or_else(|| format!("dependency '{package}' has a package but no kind"))?;
        if let Some(api_version) = self.api_version.as_deref() {
            let group = api_version.split('/').next().unwrap_or_default();
            if group != PKG_GROUP {
                return Err(format!(
                    "dependency '{package}' has unsupported apiVersion '{api_version}'"
                ));
            }
        }
        let package_type = kind
            .parse::<PackageType>()
            .map_err(|_| format!("dependency '{package}' has unsupported kind '{kind}'"))?;
        Ok(Some((package_type, package)))
    }

    fn describe(&self) -> String {
        let mut parts: Vec<String> = self
            .named()
            .into_iter()
            .map(|(t, p)| format!("{}: {p}", t.key()))
            .collect();
        if let Some(p) = &self.package {
            parts.push(format!("package: {p}"));
        }
        parts.join(", ")
    }
}

/// Fields shared by every package kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crossplane: Option<CrossplaneConstraints>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<MetaDependency>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permission_requests: Vec<PolicyRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<ControllerSpec>,

    #[serde(flatten)]
    pub meta: MetaSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationSpec {
    #[serde(flatten)]
    pub meta: MetaSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(flatten)]
    pub meta: MetaSpec,
}

/// A meta document of one specific kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaObject<S> {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: S,
}

/// The meta document of a package
#[derive(Debug, Clone, PartialEq)]
pub enum PackageMeta {
    Provider(MetaObject<ProviderSpec>),
    Configuration(MetaObject<ConfigurationSpec>),
    Function(MetaObject<FunctionSpec>),
}

impl PackageMeta {
    /// Decode a meta document of a known kind
    pub fn from_value(package_type: PackageType, value: Value) -> Result<Self> {
        Ok(match package_type {
            PackageType::Provider => Self::Provider(serde_json::from_value(value)?),
            PackageType::Configuration => Self::Configuration(serde_json::from_value(value)?),
            PackageType::Function => Self::Function(serde_json::from_value(value)?),
        })
    }

    pub fn to_value(&self) -> Result<Value> {
        let value = match self {
            Self::Provider(m) => serde_json::to_value(m)?,
            Self::Configuration(m) => serde_json::to_value(m)?,
            Self::Function(m) => serde_json::to_value(m)?,
        };
        Ok(value)
    }

    pub fn package_type(&self) -> PackageType {
        match self {
            Self::Provider(_) => PackageType::Provider,
            Self::Configuration(_) => PackageType::Configuration,
            Self::Function(_) => PackageType::Function,
        }
    }

    pub fn api_version(&self) -> &str {
        match self {
            Self::Provider(m) => &m.api_version,
            Self::Configuration(m) => &m.api_version,
            Self::Function(m) => &m.api_version,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::Provider(m) => &m.metadata,
            Self::Configuration(m) => &m.metadata,
            Self::Function(m) => &m.metadata,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata().name.as_deref()
    }

    pub fn spec(&self) -> &MetaSpec {
        match self {
            Self::Provider(m) => &m.spec.meta,
            Self::Configuration(m) => &m.spec.meta,
            Self::Function(m) => &m.spec.meta,
        }
    }

    pub fn spec_mut(&mut self) -> &mut MetaSpec {
        match self {
            Self::Provider(m) => &mut m.spec.meta,
            Self::Configuration(m) => &mut m.spec.meta,
            Self::Function(m) => &mut m.spec.meta,
        }
    }

    pub fn depends_on(&self) -> &[MetaDependency] {
        &self.spec().depends_on
    }

    /// The package's own dependencies in declaration order
    ///
    /// Fails on the first entry that cannot be normalized; linting reports
    /// every bad entry instead.
    pub fn dependencies(&self) -> Result<Vec<Dependency>> {
        self.depends_on()
            .iter()
            .map(|d| d.to_dependency().map_err(CoreError::malformed))
            .collect()
    }

    /// Version constraint the package places on Crossplane itself
    pub fn crossplane_version(&self) -> Option<&str> {
        self.spec().crossplane.as_ref().map(|c| c.version.as_str())
    }
}

/// Check that a `dependsOn` version is usable as a constraint
pub fn validate_dependency_version(version: &str) -> std::result::Result<(), String> {
    VersionConstraint::classify(version, Delimiter::DependsOn).map(|_| ())
}
