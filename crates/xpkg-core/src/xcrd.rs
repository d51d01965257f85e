//! CustomResourceDefinitions derived from CompositeResourceDefinitions
//!
//! An XRD declares a composite resource type (and optionally a namespaced
//! claim type). Crossplane serves both through generated CRDs; packages only
//! ship the XRD, so the CRDs are synthesized here once at unpack time.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use serde_json::{Map, Value, json};

use crate::error::{CoreError, Result};
use crate::object::{
    CRD_KIND, CROSSPLANE_APIEXTENSIONS_GROUP, CompositeResourceDefinition, XRD_KIND,
};

pub const CATEGORY_COMPOSITE: &str = "composite";
pub const CATEGORY_CLAIM: &str = "claim";

/// CRD for the cluster-scoped composite resource
pub fn for_composite_resource(
    xrd: &CompositeResourceDefinition,
) -> Result<CustomResourceDefinition> {
    let mut names = serde_json::to_value(&xrd.spec.names)?;
    push_category(&mut names, CATEGORY_COMPOSITE);

    let name = xrd
        .metadata
        .name
        .clone()
        .unwrap_or_else(|| format!("{}.{}", xrd.spec.names.plural, xrd.spec.group));

    build(
        xrd,
        name,
        names,
        "Cluster",
        composite_printer_columns(),
        composite_spec_props(),
    )
}

/// CRD for the namespaced claim, if the XRD offers one
pub fn for_composite_resource_claim(
    xrd: &CompositeResourceDefinition,
) -> Result<CustomResourceDefinition> {
    let claim_names = xrd.spec.claim_names.as_ref().ok_or_else(|| {
        conversion_error(xrd, "XRD does not declare claim names".to_string())
    })?;

    let mut names = serde_json::to_value(claim_names)?;
    push_category(&mut names, CATEGORY_CLAIM);

    build(
        xrd,
        format!("{}.{}", claim_names.plural, xrd.spec.group),
        names,
        "Namespaced",
        claim_printer_columns(),
        claim_spec_props(),
    )
}

/// Every CRD an XRD implies: the composite, then the claim when declared
pub fn for_xrd(xrd: &CompositeResourceDefinition) -> Result<Vec<CustomResourceDefinition>> {
    let mut crds = vec![for_composite_resource(xrd)?];
    if xrd.spec.claim_names.is_some() {
        crds.push(for_composite_resource_claim(xrd)?);
    }
    Ok(crds)
}

fn build(
    xrd: &CompositeResourceDefinition,
    name: String,
    names: Value,
    scope: &str,
    printer_columns: Vec<Value>,
    spec_props: Map<String, Value>,
) -> Result<CustomResourceDefinition> {
    if xrd.spec.versions.is_empty() {
        return Err(conversion_error(xrd, "XRD declares no versions".to_string()));
    }

    let mut versions = Vec::with_capacity(xrd.spec.versions.len());
    for version in &xrd.spec.versions {
        let schema = version
            .schema
            .as_ref()
            .and_then(|s| s.open_api_v3_schema.as_ref());

        let mut base = base_props();
        merge_props(xrd, &mut base, "spec", schema, &spec_props)?;
        merge_props(xrd, &mut base, "status", schema, &status_props())?;

        let mut columns: Vec<Value> = version
            .additional_printer_columns
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<_, _>>()?;
        columns.extend(printer_columns.iter().cloned());

        let mut v = json!({
            "name": version.name,
            "served": version.served,
            "storage": version.referenceable,
            "schema": {"openAPIV3Schema": base},
            "subresources": {"status": {}},
            "additionalPrinterColumns": columns,
        });
        if version.deprecated == Some(true) {
            v["deprecated"] = Value::Bool(true);
        }
        if let Some(warning) = &version.deprecation_warning {
            v["deprecationWarning"] = Value::String(warning.clone());
        }
        versions.push(v);
    }

    let xrd_name = xrd.metadata.name.clone().unwrap_or_default();
    let mut metadata = json!({
        "name": name,
        "ownerReferences": [{
            "apiVersion": format!("{CROSSPLANE_APIEXTENSIONS_GROUP}/v1"),
            "kind": XRD_KIND,
            "name": xrd_name,
            "uid": xrd.metadata.uid.clone().unwrap_or_default(),
            "controller": true,
            "blockOwnerDeletion": true,
        }],
    });
    if let Some(labels) = &xrd.metadata.labels {
        metadata["labels"] = serde_json::to_value(labels)?;
    }

    let crd = json!({
        "apiVersion": "apiextensions.k8s.io/v1",
        "kind": CRD_KIND,
        "metadata": metadata,
        "spec": {
            "group": xrd.spec.group,
            "names": names,
            "scope": scope,
            "versions": versions,
        },
    });

    serde_json::from_value(crd).map_err(|e| conversion_error(xrd, e.to_string()))
}

/// Merge the XRD's own `properties.<field>` into the generated schema,
/// then layer the Crossplane-managed props on top
fn merge_props(
    xrd: &CompositeResourceDefinition,
    base: &mut Value,
    field: &str,
    schema: Option<&Value>,
    managed: &Map<String, Value>,
) -> Result<()> {
    let declared = schema.and_then(|s| s.pointer(&format!("/properties/{field}")));

    let target = base
        .pointer_mut(&format!("/properties/{field}"))
        .filter(|v| v.is_object())
        .ok_or_else(|| conversion_error(xrd, format!("base schema lacks {field}")))?;

    if let Some(declared) = declared {
        let declared = declared.as_object().ok_or_else(|| {
            conversion_error(xrd, format!("schema property '{field}' must be an object"))
        })?;
        if let Some(required @ Value::Array(_)) = declared.get("required") {
            target["required"] = required.clone();
        }
        if let Some(Value::Object(props)) = declared.get("properties") {
            for (k, v) in props {
                target["properties"][k.as_str()] = v.clone();
            }
        }
        for key in ["description", "x-kubernetes-preserve-unknown-fields"] {
            if let Some(v) = declared.get(key) {
                target[key] = v.clone();
            }
        }
    }

    for (k, v) in managed {
        target["properties"][k.as_str()] = v.clone();
    }
    Ok(())
}

fn push_category(names: &mut Value, category: &str) {
    let Some(obj) = names.as_object_mut() else {
        return;
    };
    let categories = obj
        .entry("categories")
        .or_insert_with(|| Value::Array(Vec::new()));
    if let Value::Array(list) = categories {
        if !list.iter().any(|c| c == category) {
            list.push(Value::String(category.to_string()));
        }
    }
}

fn conversion_error(xrd: &CompositeResourceDefinition, message: String) -> CoreError {
    CoreError::Conversion {
        kind: XRD_KIND.to_string(),
        name: xrd.metadata.name.clone().unwrap_or_default(),
        message,
    }
}

fn base_props() -> Value {
    json!({
        "type": "object",
        "required": ["spec"],
        "properties": {
            "apiVersion": {"type": "string"},
            "kind": {"type": "string"},
            "metadata": {
                "type": "object",
                "properties": {"name": {"type": "string", "maxLength": 63}},
            },
            "spec": {"type": "object", "properties": {}},
            "status": {"type": "object", "properties": {}},
        },
    })
}

fn condition_column(name: &str, condition: &str) -> Value {
    json!({
        "name": name,
        "type": "string",
        "jsonPath": format!(".status.conditions[?(@.type=='{condition}')].status"),
    })
}

fn age_column() -> Value {
    json!({"name": "AGE", "type": "date", "jsonPath": ".metadata.creationTimestamp"})
}

fn composite_printer_columns() -> Vec<Value> {
    vec![
        condition_column("SYNCED", "Synced"),
        condition_column("READY", "Ready"),
        json!({"name": "COMPOSITION", "type": "string", "jsonPath": ".spec.compositionRef.name"}),
        age_column(),
    ]
}

fn claim_printer_columns() -> Vec<Value> {
    vec![
        condition_column("SYNCED", "Synced"),
        condition_column("READY", "Ready"),
        json!({
            "name": "CONNECTION-SECRET",
            "type": "string",
            "jsonPath": ".spec.writeConnectionSecretToRef.name",
        }),
        age_column(),
    ]
}

fn name_ref() -> Value {
    json!({
        "type": "object",
        "required": ["name"],
        "properties": {"name": {"type": "string"}},
    })
}

fn label_selector() -> Value {
    json!({
        "type": "object",
        "required": ["matchLabels"],
        "properties": {
            "matchLabels": {"type": "object", "additionalProperties": {"type": "string"}},
        },
    })
}

fn shared_spec_props() -> Map<String, Value> {
    let mut props = Map::new();
    props.insert("compositionRef".into(), name_ref());
    props.insert("compositionSelector".into(), label_selector());
    props.insert("compositionRevisionRef".into(), name_ref());
    props.insert("compositionRevisionSelector".into(), label_selector());
    props.insert(
        "compositionUpdatePolicy".into(),
        json!({"type": "string", "enum": ["Automatic", "Manual"]}),
    );
    props
}

fn composite_spec_props() -> Map<String, Value> {
    let mut props = shared_spec_props();
    props.insert(
        "claimRef".into(),
        json!({
            "type": "object",
            "required": ["apiVersion", "kind", "namespace", "name"],
            "properties": {
                "apiVersion": {"type": "string"},
                "kind": {"type": "string"},
                "namespace": {"type": "string"},
                "name": {"type": "string"},
            },
        }),
    );
    props.insert(
        "resourceRefs".into(),
        json!({
            "type": "array",
            "x-kubernetes-list-type": "atomic",
            "items": {
                "type": "object",
                "required": ["apiVersion", "kind"],
                "x-kubernetes-map-type": "atomic",
                "properties": {
                    "apiVersion": {"type": "string"},
                    "name": {"type": "string"},
                    "kind": {"type": "string"},
                },
            },
        }),
    );
    props.insert(
        "writeConnectionSecretToRef".into(),
        json!({
            "type": "object",
            "required": ["name", "namespace"],
            "properties": {
                "name": {"type": "string"},
                "namespace": {"type": "string"},
            },
        }),
    );
    props
}

fn claim_spec_props() -> Map<String, Value> {
    let mut props = shared_spec_props();
    props.insert(
        "compositeDeletePolicy".into(),
        json!({"type": "string", "enum": ["Background", "Foreground"]}),
    );
    props.insert(
        "resourceRef".into(),
        json!({
            "type": "object",
            "required": ["apiVersion", "kind", "name"],
            "properties": {
                "apiVersion": {"type": "string"},
                "kind": {"type": "string"},
                "name": {"type": "string"},
            },
        }),
    );
    props.insert("writeConnectionSecretToRef".into(), name_ref());
    props
}

fn status_props() -> Map<String, Value> {
    let mut props = Map::new();
    props.insert(
        "conditions".into(),
        json!({
            "description": "Conditions of the resource.",
            "type": "array",
            "x-kubernetes-list-type": "map",
            "x-kubernetes-list-map-keys": ["type"],
            "items": {
                "type": "object",
                "required": ["lastTransitionTime", "reason", "status", "type"],
                "properties": {
                    "lastTransitionTime": {"type": "string", "format": "date-time"},
                    "message": {"type": "string"},
                    "reason": {"type": "string"},
                    "status": {"type": "string"},
                    "type": {"type": "string"},
                },
            },
        }),
    );
    props.insert(
        "connectionDetails".into(),
        json!({
            "type": "object",
            "properties": {
                "lastPublishedTime": {"type": "string", "format": "date-time"},
            },
        }),
    );
    props
}
