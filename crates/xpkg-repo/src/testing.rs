//! Package fixtures shared by unit tests

use crate::image::PackageImage;

/// `(kind key, package, version)` entries rendered into `spec.dependsOn`
pub type Deps<'a> = &'a [(&'a str, &'a str, &'a str)];

fn depends_on(deps: Deps<'_>) -> String {
    if deps.is_empty() {
        return String::new();
    }
    let mut out = String::from("  dependsOn:\n");
    for (key, package, version) in deps {
        out.push_str(&format!("    - {key}: {package}\n      version: \"{version}\"\n"));
    }
    out
}

pub fn provider_yaml(name: &str, deps: Deps<'_>) -> String {
    format!(
        r#"apiVersion: meta.pkg.crossplane.io/v1
kind: Provider
metadata:
  name: {name}
spec:
  controller:
    image: example.org/{name}-controller:v1
{deps}---
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: buckets.{name}.example.org
spec:
  group: {name}.example.org
  names:
    kind: Bucket
    plural: buckets
  scope: Cluster
  versions:
    - name: v1
      served: true
      storage: true
      schema:
        openAPIV3Schema:
          type: object
"#,
        deps = depends_on(deps),
    )
}

pub fn configuration_yaml(name: &str, deps: Deps<'_>) -> String {
    format!(
        r#"apiVersion: meta.pkg.crossplane.io/v1
kind: Configuration
metadata:
  name: {name}
spec:
  crossplane:
    version: ">=v1.14.0"
{deps}---
apiVersion: apiextensions.crossplane.io/v1
kind: CompositeResourceDefinition
metadata:
  name: xnetworks.{name}.example.org
spec:
  group: {name}.example.org
  names:
    kind: XNetwork
    plural: xnetworks
  claimNames:
    kind: Network
    plural: networks
  versions:
    - name: v1alpha1
      served: true
      referenceable: true
      schema:
        openAPIV3Schema:
          type: object
          properties:
            spec:
              type: object
              properties:
                region:
                  type: string
---
apiVersion: apiextensions.crossplane.io/v1
kind: Composition
metadata:
  name: xnetworks-aws
spec:
  compositeTypeRef:
    apiVersion: {name}.example.org/v1alpha1
    kind: XNetwork
  mode: Pipeline
  pipeline:
    - step: patch
      functionRef:
        name: function-patch-and-transform
"#,
        deps = depends_on(deps),
    )
}

pub fn image(package_yaml: &str) -> PackageImage {
    PackageImage::from_package_yaml(package_yaml).unwrap()
}
