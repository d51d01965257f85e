//! Objects embedded in a package and the scheme that decodes them

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceColumnDefinition, CustomResourceDefinition, CustomResourceDefinitionNames,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::DynamicObject;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{CoreError, Result};
use crate::meta::{META_GROUP, PackageMeta, PackageType};

pub const APIEXTENSIONS_GROUP: &str = "apiextensions.k8s.io";
pub const CROSSPLANE_APIEXTENSIONS_GROUP: &str = "apiextensions.crossplane.io";

pub const XRD_KIND: &str = "CompositeResourceDefinition";
pub const COMPOSITION_KIND: &str = "Composition";
pub const CRD_KIND: &str = "CustomResourceDefinition";

/// A Crossplane CompositeResourceDefinition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeResourceDefinition {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: XrdSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XrdSpec {
    pub group: String,
    pub names: CustomResourceDefinitionNames,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_names: Option<CustomResourceDefinitionNames>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connection_secret_keys: Vec<String>,

    #[serde(default)]
    pub versions: Vec<XrdVersion>,

    /// Fields this crate does not interpret (default composition refs, etc.)
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XrdVersion {
    pub name: String,
    #[serde(default)]
    pub served: bool,
    #[serde(default)]
    pub referenceable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecation_warning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<XrdSchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_printer_columns: Vec<CustomResourceColumnDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct XrdSchema {
    #[serde(
        rename = "openAPIV3Schema",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub open_api_v3_schema: Option<Value>,
}

/// A Crossplane Composition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Composition {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: CompositionSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionSpec {
    pub composite_type_ref: TypeReference,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pipeline: Vec<PipelineStep>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeReference {
    pub api_version: String,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStep {
    pub step: String,
    pub function_ref: FunctionReference,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionReference {
    pub name: String,
}

impl Composition {
    /// Names of the functions a pipeline-mode composition calls
    pub fn function_names(&self) -> Vec<&str> {
        self.spec
            .pipeline
            .iter()
            .map(|s| s.function_ref.name.as_str())
            .collect()
    }
}

/// A Kubernetes object embedded in a package
#[derive(Debug, Clone)]
pub enum PackageObject {
    CustomResourceDefinition(Box<CustomResourceDefinition>),
    CompositeResourceDefinition(Box<CompositeResourceDefinition>),
    Composition(Box<Composition>),
    /// A kind the scheme has no typed representation for
    Unstructured(Box<DynamicObject>),
}

impl PackageObject {
    pub fn api_version(&self) -> String {
        match self {
            Self::CustomResourceDefinition(_) => format!("{APIEXTENSIONS_GROUP}/v1"),
            Self::CompositeResourceDefinition(x) => x.api_version.clone(),
            Self::Composition(c) => c.api_version.clone(),
            Self::Unstructured(o) => o
                .types
                .as_ref()
                .map(|t| t.api_version.clone())
                .unwrap_or_default(),
        }
    }

    pub fn kind(&self) -> String {
        match self {
            Self::CustomResourceDefinition(_) => CRD_KIND.to_string(),
            Self::CompositeResourceDefinition(x) => x.kind.clone(),
            Self::Composition(c) => c.kind.clone(),
            Self::Unstructured(o) => o.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default(),
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::CustomResourceDefinition(c) => &c.metadata,
            Self::CompositeResourceDefinition(x) => &x.metadata,
            Self::Composition(c) => &c.metadata,
            Self::Unstructured(o) => &o.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or("")
    }

    pub fn is_crd(&self) -> bool {
        matches!(self, Self::CustomResourceDefinition(_))
    }

    pub fn is_xrd(&self) -> bool {
        matches!(self, Self::CompositeResourceDefinition(_))
    }

    pub fn is_composition(&self) -> bool {
        matches!(self, Self::Composition(_))
    }

    pub fn to_value(&self) -> Result<Value> {
        let value = match self {
            Self::CustomResourceDefinition(c) => serde_json::to_value(c)?,
            Self::CompositeResourceDefinition(x) => serde_json::to_value(x)?,
            Self::Composition(c) => serde_json::to_value(c)?,
            Self::Unstructured(o) => serde_json::to_value(o)?,
        };
        Ok(value)
    }
}

/// How a registered kind is decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Meta(PackageType),
    CustomResourceDefinition,
    CompositeResourceDefinition,
    Composition,
}

/// A decoded document: either the package meta or an embedded object
#[derive(Debug, Clone)]
pub enum Decoded {
    Meta(Box<PackageMeta>),
    Object(PackageObject),
}

/// Registry of the kinds a package may contain
///
/// Constructed once and handed to whatever needs to turn raw documents into
/// typed objects. Kinds are matched on API group and kind; every version of a
/// registered group decodes to the same type.
#[derive(Debug, Clone, Default)]
pub struct Scheme {
    kinds: BTreeMap<(String, String), ObjectKind>,
    allow_unstructured: bool,
}

impl Scheme {
    /// Empty scheme that rejects everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Scheme with every kind found in Crossplane packages
    ///
    /// Unregistered kinds decode as unstructured objects so linting can
    /// report them by name.
    pub fn crossplane() -> Self {
        let mut scheme = Self::new();
        for package_type in PackageType::ALL {
            scheme.register(META_GROUP, package_type.as_str(), ObjectKind::Meta(package_type));
        }
        scheme.register(
            APIEXTENSIONS_GROUP,
            CRD_KIND,
            ObjectKind::CustomResourceDefinition,
        );
        scheme.register(
            CROSSPLANE_APIEXTENSIONS_GROUP,
            XRD_KIND,
            ObjectKind::CompositeResourceDefinition,
        );
        scheme.register(
            CROSSPLANE_APIEXTENSIONS_GROUP,
            COMPOSITION_KIND,
            ObjectKind::Composition,
        );
        scheme.allow_unstructured = true;
        scheme
    }

    pub fn register(&mut self, group: &str, kind: &str, object_kind: ObjectKind) -> &mut Self {
        self.kinds
            .insert((group.to_string(), kind.to_string()), object_kind);
        self
    }

    /// Decode unregistered kinds as unstructured objects instead of failing
    pub fn allow_unstructured(mut self, allow: bool) -> Self {
        self.allow_unstructured = allow;
        self
    }

    pub fn lookup(&self, api_version: &str, kind: &str) -> Option<ObjectKind> {
        let group = group_of(api_version);
        self.kinds
            .get(&(group.to_string(), kind.to_string()))
            .copied()
    }

    /// Decode one document
    pub fn decode(&self, value: Value) -> Result<Decoded> {
        let api_version = value
            .get("apiVersion")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let kind = value
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if api_version.is_empty() || kind.is_empty() {
            return Err(CoreError::malformed(
                "document is missing apiVersion or kind",
            ));
        }

        let name = value
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let conversion = |e: serde_json::Error| CoreError::Conversion {
            kind: kind.clone(),
            name: name.clone(),
            message: e.to_string(),
        };

        let decoded = match self.lookup(&api_version, &kind) {
            Some(ObjectKind::Meta(package_type)) => {
                Decoded::Meta(Box::new(PackageMeta::from_value(package_type, value).map_err(
                    |e| match e {
                        CoreError::JsonParse(e) => conversion(e),
                        other => other,
                    },
                )?))
            }
            Some(ObjectKind::CustomResourceDefinition) => Decoded::Object(
                PackageObject::CustomResourceDefinition(Box::new(
                    serde_json::from_value(value).map_err(conversion)?,
                )),
            ),
            Some(ObjectKind::CompositeResourceDefinition) => Decoded::Object(
                PackageObject::CompositeResourceDefinition(Box::new(
                    serde_json::from_value(value).map_err(conversion)?,
                )),
            ),
            Some(ObjectKind::Composition) => Decoded::Object(PackageObject::Composition(
                Box::new(serde_json::from_value(value).map_err(conversion)?),
            )),
            None if self.allow_unstructured => {
                tracing::debug!(
                    %api_version,
                    %kind,
                    %name,
                    "no typed representation, keeping unstructured"
                );
                Decoded::Object(PackageObject::Unstructured(Box::new(
                    serde_json::from_value(value).map_err(conversion)?,
                )))
            }
            None => {
                return Err(CoreError::UnknownKind {
                    api_version: api_version.clone(),
                    kind: kind.clone(),
                });
            }
        };
        Ok(decoded)
    }
}

fn group_of(api_version: &str) -> &str {
    match api_version.split_once('/') {
        Some((group, _)) => group,
        // Core group objects carry only a version ("v1")
        None => "",
    }
}
