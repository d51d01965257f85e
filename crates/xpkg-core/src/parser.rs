//! Document stream parsing
//!
//! Packages carry their content as a multi-document YAML stream
//! (`package.yaml` inside the image) or, once cached, as newline-delimited
//! JSON. Both decode through a [`Scheme`] into one meta document plus the
//! embedded objects.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{CoreError, Result};
use crate::meta::PackageMeta;
use crate::object::{Decoded, PackageObject, Scheme};

/// A package's meta document and embedded objects, in stream order
#[derive(Debug, Clone)]
pub struct PackageDocuments {
    pub meta: PackageMeta,
    pub objects: Vec<PackageObject>,
}

/// Split a YAML stream into documents, skipping empty ones
pub fn parse_yaml_stream(input: &str) -> Result<Vec<Value>> {
    let mut docs = Vec::new();
    for document in serde_yaml::Deserializer::from_str(input) {
        let value = Value::deserialize(document)?;
        if !value.is_null() {
            docs.push(value);
        }
    }
    Ok(docs)
}

/// Split newline-delimited JSON into documents
pub fn parse_ndjson_stream(input: &str) -> Result<Vec<Value>> {
    serde_json::Deserializer::from_str(input)
        .into_iter::<Value>()
        .map(|doc| doc.map_err(CoreError::from))
        .collect()
}

/// Decode documents, requiring exactly one package meta document
pub fn decode_documents(scheme: &Scheme, docs: Vec<Value>) -> Result<PackageDocuments> {
    let mut metas = Vec::new();
    let mut objects = Vec::new();

    for doc in docs {
        match scheme.decode(doc)? {
            Decoded::Meta(meta) => metas.push(*meta),
            Decoded::Object(object) => objects.push(object),
        }
    }

    let meta = match metas.len() {
        1 => metas.remove(0),
        0 => {
            return Err(CoreError::malformed(
                "package contains no meta document \
                 (expected a Provider, Configuration or Function)",
            ));
        }
        n => {
            let kinds: Vec<String> = metas
                .iter()
                .map(|m| format!("{}/{}", m.package_type(), m.name().unwrap_or("<unnamed>")))
                .collect();
            return Err(CoreError::malformed(format!(
                "package contains {n} meta documents ({}), expected exactly one",
                kinds.join(", ")
            )));
        }
    };

    Ok(PackageDocuments { meta, objects })
}

/// Render meta then objects as newline-delimited JSON
pub fn to_ndjson(meta: &PackageMeta, objects: &[PackageObject]) -> Result<String> {
    let mut out = serde_json::to_string(&meta.to_value()?)?;
    out.push('\n');
    for object in objects {
        out.push_str(&serde_json::to_string(&object.to_value()?)?);
        out.push('\n');
    }
    Ok(out)
}
