//! Schema generator
//!
//! Converts the model catalog into apiextensions v1 CustomResourceDefinition
//! bodies, writes deterministic manifest files for GitOps, enforces strict
//! schema compatibility across regenerations, and installs CRDs in-cluster at
//! startup when the manage-CRDs flag is set.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, PostParams};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info};

use crate::registry::{FieldDescriptor, FieldType, ModelDescriptor, ModelRegistry, SchemaError};

/// Strict compatibility violation between a previously generated schema and a
/// regeneration. Never degraded to a warning: regenerating an incompatible
/// catalog fails outright.
#[derive(Debug, Error)]
pub enum SchemaCompatibilityError {
    /// A previously served field is gone
    #[error("{kind}: field '{field}' was removed from the schema")]
    FieldRemoved {
        /// Kind whose schema changed
        kind: String,
        /// The removed field
        field: String,
    },

    /// A field changed type
    #[error("{kind}: field '{field}' changed type from {from} to {to}")]
    TypeChanged {
        /// Kind whose schema changed
        kind: String,
        /// The changed field
        field: String,
        /// Previous type
        from: String,
        /// New type
        to: String,
    },

    /// A previously optional field became required
    #[error("{kind}: previously optional field '{field}' is now required")]
    RequiredAdded {
        /// Kind whose schema changed
        kind: String,
        /// The newly required field
        field: String,
    },
}

/// Errors from manifest generation and installation.
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// Catalog construction failure
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Incompatible regeneration
    #[error(transparent)]
    Compatibility(#[from] SchemaCompatibilityError),

    /// Two descriptors map to the same (group, kind)
    #[error("duplicate CRD for group '{group}' kind '{kind}'")]
    DuplicateDefinition {
        /// API group
        group: String,
        /// Kind name
        kind: String,
    },

    /// Manifest directory I/O failure
    #[error("manifest I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML encode/decode failure
    #[error("manifest YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Manifest JSON conversion failure
    #[error("manifest JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Kubernetes API failure while applying CRDs
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),
}

/// A generated CustomResourceDefinition body, one per registered model.
#[derive(Debug, Clone)]
pub struct CrdDefinition {
    /// Manifest metadata.name: `<plural>.<group>`
    pub name: String,
    /// API group
    pub group: String,
    /// Schema version
    pub version: String,
    /// Kind name
    pub kind: String,
    /// Plural resource name
    pub plural: String,
    /// Full apiextensions v1 manifest
    pub manifest: Value,
}

/// Summary of one spec field as recoverable from a written manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSummary {
    /// Schema type name ("string", "array", ...)
    pub type_name: String,
    /// Whether the field is listed as required
    pub required: bool,
}

fn schema_for_field(field_type: &FieldType) -> Value {
    match field_type {
        FieldType::String => json!({"type": "string"}),
        FieldType::Boolean => json!({"type": "boolean"}),
        FieldType::Integer => json!({"type": "integer"}),
        FieldType::Map => json!({"type": "object", "additionalProperties": true}),
        FieldType::Object(fields) => object_schema(fields),
        FieldType::Array(element) => json!({
            "type": "array",
            "items": schema_for_field(element),
        }),
    }
}

fn object_schema(fields: &[FieldDescriptor]) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();

    for field in fields {
        let mut schema = schema_for_field(&field.field_type);
        if let Some(object) = schema.as_object_mut() {
            if let Some(description) = &field.description {
                object.insert("description".to_string(), json!(description));
            }
            if let Some(default) = &field.default {
                object.insert("default".to_string(), default.clone());
            }
        }
        properties.insert(field.name.clone(), schema);
        if field.required {
            required.push(field.name.clone());
        }
    }

    let mut schema = json!({"type": "object", "properties": Value::Object(properties)});
    if !required.is_empty() {
        if let Some(object) = schema.as_object_mut() {
            object.insert("required".to_string(), json!(required));
        }
    }
    schema
}

fn status_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "phase": {"type": "string"},
            "conditions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "type": {"type": "string"},
                        "status": {"type": "string"},
                        "reason": {"type": "string"},
                        "message": {"type": "string"},
                        "lastTransitionTime": {"type": "string", "format": "date-time"},
                    },
                    "required": ["type", "status", "reason", "message"],
                },
            },
            "observedGeneration": {"type": "integer"},
            "lastReconciled": {"type": "string", "format": "date-time"},
            "appliedHash": {"type": "string"},
            "externalKey": {"type": "string"},
            "error": {"type": "string"},
        },
        "additionalProperties": true,
    })
}

fn manifest_for(descriptor: &ModelDescriptor) -> CrdDefinition {
    let name = format!("{}.{}", descriptor.plural, descriptor.group);
    let singular = descriptor.kind.to_lowercase();
    let short_name = singular.chars().take(3).collect::<String>();

    let manifest = json!({
        "apiVersion": "apiextensions.k8s.io/v1",
        "kind": "CustomResourceDefinition",
        "metadata": {"name": name},
        "spec": {
            "group": descriptor.group,
            "versions": [{
                "name": descriptor.version,
                "served": true,
                "storage": true,
                "schema": {
                    "openAPIV3Schema": {
                        "type": "object",
                        "properties": {
                            "spec": object_schema(&descriptor.fields),
                            "status": status_schema(),
                        },
                        "required": ["spec"],
                    }
                },
                "subresources": {"status": {}},
            }],
            "scope": "Namespaced",
            "names": {
                "plural": descriptor.plural,
                "singular": singular,
                "kind": descriptor.kind,
                "shortNames": [short_name],
            },
        },
    });

    CrdDefinition {
        name,
        group: descriptor.group.clone(),
        version: descriptor.version.clone(),
        kind: descriptor.kind.clone(),
        plural: descriptor.plural.clone(),
        manifest,
    }
}

/// Generates one CRD definition per registered model.
///
/// Invariant: no two definitions share a (group, kind) pair.
pub fn generate_crds(registry: &ModelRegistry) -> Result<Vec<CrdDefinition>, GeneratorError> {
    let mut seen: BTreeMap<(String, String), ()> = BTreeMap::new();
    let mut definitions = Vec::new();

    for descriptor in registry.all_models().values() {
        let pair = (descriptor.group.clone(), descriptor.kind.clone());
        if seen.insert(pair, ()).is_some() {
            return Err(GeneratorError::DuplicateDefinition {
                group: descriptor.group.clone(),
                kind: descriptor.kind.clone(),
            });
        }
        definitions.push(manifest_for(descriptor));
    }

    Ok(definitions)
}

/// Recovers per-field summaries from a written manifest, keyed by field name.
///
/// Returns `None` when the document is not a CRD manifest in the expected
/// shape.
#[must_use]
pub fn field_summaries_from_manifest(manifest: &Value) -> Option<(String, BTreeMap<String, FieldSummary>)> {
    if manifest.get("kind")?.as_str()? != "CustomResourceDefinition" {
        return None;
    }
    let kind = manifest
        .pointer("/spec/names/kind")?
        .as_str()?
        .to_string();
    let spec_schema = manifest.pointer("/spec/versions/0/schema/openAPIV3Schema/properties/spec")?;
    let properties = spec_schema.get("properties")?.as_object()?;
    let required: Vec<&str> = spec_schema
        .get("required")
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut summaries = BTreeMap::new();
    for (name, schema) in properties {
        let type_name = schema
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("object")
            .to_string();
        summaries.insert(
            name.clone(),
            FieldSummary {
                type_name,
                required: required.contains(&name.as_str()),
            },
        );
    }
    Some((kind, summaries))
}

/// Checks a regenerated definition against the previously written schema.
///
/// Field removal, type change, and optional-to-required promotion all fail.
pub fn check_compatibility(
    kind: &str,
    previous: &BTreeMap<String, FieldSummary>,
    next: &BTreeMap<String, FieldSummary>,
) -> Result<(), SchemaCompatibilityError> {
    for (field, old) in previous {
        let Some(new) = next.get(field) else {
            return Err(SchemaCompatibilityError::FieldRemoved {
                kind: kind.to_string(),
                field: field.clone(),
            });
        };
        if new.type_name != old.type_name {
            return Err(SchemaCompatibilityError::TypeChanged {
                kind: kind.to_string(),
                field: field.clone(),
                from: old.type_name.clone(),
                to: new.type_name.clone(),
            });
        }
        if new.required && !old.required {
            return Err(SchemaCompatibilityError::RequiredAdded {
                kind: kind.to_string(),
                field: field.clone(),
            });
        }
    }
    Ok(())
}

/// Writes one manifest file per model plus a kustomization.
///
/// Pure function of the catalog: no network, deterministic key and file
/// ordering, byte-identical output for an unchanged catalog. Existing
/// manifests in `dir` are parsed first and an incompatible regeneration fails
/// before anything is overwritten.
pub fn write_crd_manifests(registry: &ModelRegistry, dir: &Path) -> Result<Vec<String>, GeneratorError> {
    let definitions = generate_crds(registry)?;

    // Load previously written schemas for the strict compatibility gate.
    let mut previous: BTreeMap<String, BTreeMap<String, FieldSummary>> = BTreeMap::new();
    if dir.exists() {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let text = fs::read_to_string(&path)?;
            let Ok(value) = serde_yaml::from_str::<Value>(&text) else {
                continue;
            };
            if let Some((kind, summaries)) = field_summaries_from_manifest(&value) {
                previous.insert(kind, summaries);
            }
        }
    }

    for definition in &definitions {
        if let Some(old) = previous.get(&definition.kind) {
            let (_, new) = field_summaries_from_manifest(&definition.manifest)
                .unwrap_or_else(|| (definition.kind.clone(), BTreeMap::new()));
            check_compatibility(&definition.kind, old, &new)?;
        }
    }

    fs::create_dir_all(dir)?;
    let mut filenames = Vec::new();
    for definition in &definitions {
        let filename = format!("{}.yaml", definition.name);
        let yaml = serde_yaml::to_string(&definition.manifest)?;
        fs::write(dir.join(&filename), yaml)?;
        debug!(file = %filename, "wrote CRD manifest");
        filenames.push(filename);
    }

    let kustomization = json!({
        "apiVersion": "kustomize.config.k8s.io/v1beta1",
        "kind": "Kustomization",
        "resources": filenames,
    });
    fs::write(dir.join("kustomization.yaml"), serde_yaml::to_string(&kustomization)?)?;

    info!(count = filenames.len(), dir = %dir.display(), "generated CRD manifests");
    Ok(filenames)
}

/// Creates or replaces the generated CRDs in-cluster.
///
/// Returns the number of definitions applied.
pub async fn apply_crds(client: kube::Client, registry: &ModelRegistry) -> Result<usize, GeneratorError> {
    let definitions = generate_crds(registry)?;
    let api: Api<CustomResourceDefinition> = Api::all(client);
    let pp = PostParams::default();

    for definition in &definitions {
        let mut crd: CustomResourceDefinition = serde_json::from_value(definition.manifest.clone())?;
        match api.get_opt(&definition.name).await? {
            Some(existing) => {
                crd.metadata.resource_version = existing.metadata.resource_version;
                api.replace(&definition.name, &pp, &crd).await?;
                info!(crd = %definition.name, "updated CRD");
            }
            None => {
                api.create(&pp, &crd).await?;
                info!(crd = %definition.name, "created CRD");
            }
        }
    }

    Ok(definitions.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::builtin_sources;
    use serde_json::json;

    fn registry() -> ModelRegistry {
        ModelRegistry::discover(&builtin_sources()).unwrap()
    }

    #[test]
    fn test_generate_crds_one_per_model() {
        let definitions = generate_crds(&registry()).unwrap();
        assert_eq!(definitions.len(), 5);
        let names: Vec<_> = definitions.iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"users.identity.karectl.io"));
        assert!(names.contains(&"vdiinstances.karectl.io"));
        // no (group, kind) pair repeats
        let mut pairs: Vec<_> = definitions.iter().map(|d| (d.group.clone(), d.kind.clone())).collect();
        pairs.sort();
        pairs.dedup();
        assert_eq!(pairs.len(), 5);
    }

    #[test]
    fn test_schema_round_trip_preserves_fields() {
        // Every descriptor, converted to a manifest and parsed back, keeps
        // field name, type, and required flag exactly.
        let registry = registry();
        for descriptor in registry.all_models().values() {
            let definition = manifest_for(descriptor);
            let (kind, summaries) = field_summaries_from_manifest(&definition.manifest).unwrap();
            assert_eq!(kind, descriptor.kind);
            assert_eq!(summaries.len(), descriptor.fields.len());
            for field in &descriptor.fields {
                let summary = summaries.get(&field.name).unwrap();
                assert_eq!(summary.type_name, field.field_type.name(), "{kind}.{}", field.name);
                assert_eq!(summary.required, field.required, "{kind}.{}", field.name);
            }
        }
    }

    #[test]
    fn test_defaults_embedded_in_schema() {
        let registry = registry();
        let user = registry.by_kind("User").unwrap();
        let definition = manifest_for(user);
        let enabled_default = definition
            .manifest
            .pointer("/spec/versions/0/schema/openAPIV3Schema/properties/spec/properties/enabled/default");
        assert_eq!(enabled_default, Some(&json!(true)));
    }

    #[test]
    fn test_write_crd_manifests_is_deterministic() {
        let registry = registry();
        let dir_a = std::env::temp_dir().join("karectl-crdgen-a");
        let dir_b = std::env::temp_dir().join("karectl-crdgen-b");
        let _ = fs::remove_dir_all(&dir_a);
        let _ = fs::remove_dir_all(&dir_b);

        let files_a = write_crd_manifests(&registry, &dir_a).unwrap();
        let files_b = write_crd_manifests(&registry, &dir_b).unwrap();
        assert_eq!(files_a, files_b);

        for file in &files_a {
            let a = fs::read(dir_a.join(file)).unwrap();
            let b = fs::read(dir_b.join(file)).unwrap();
            assert_eq!(a, b, "{file} differs between runs");
        }

        // Rewriting into the same directory is compatible and byte-stable.
        let before = fs::read(dir_a.join(&files_a[0])).unwrap();
        write_crd_manifests(&registry, &dir_a).unwrap();
        let after = fs::read(dir_a.join(&files_a[0])).unwrap();
        assert_eq!(before, after);

        let _ = fs::remove_dir_all(&dir_a);
        let _ = fs::remove_dir_all(&dir_b);
    }

    #[test]
    fn test_compatibility_rejects_field_removal() {
        let mut previous = BTreeMap::new();
        previous.insert(
            "email".to_string(),
            FieldSummary { type_name: "string".to_string(), required: true },
        );
        let next = BTreeMap::new();
        let err = check_compatibility("User", &previous, &next).unwrap_err();
        assert!(matches!(err, SchemaCompatibilityError::FieldRemoved { .. }));
    }

    #[test]
    fn test_compatibility_rejects_type_narrowing() {
        let mut previous = BTreeMap::new();
        previous.insert(
            "groups".to_string(),
            FieldSummary { type_name: "array".to_string(), required: false },
        );
        let mut next = BTreeMap::new();
        next.insert(
            "groups".to_string(),
            FieldSummary { type_name: "string".to_string(), required: false },
        );
        let err = check_compatibility("User", &previous, &next).unwrap_err();
        assert!(matches!(err, SchemaCompatibilityError::TypeChanged { .. }));
    }

    #[test]
    fn test_compatibility_rejects_optional_to_required() {
        let mut previous = BTreeMap::new();
        previous.insert(
            "enabled".to_string(),
            FieldSummary { type_name: "boolean".to_string(), required: false },
        );
        let mut next = BTreeMap::new();
        next.insert(
            "enabled".to_string(),
            FieldSummary { type_name: "boolean".to_string(), required: true },
        );
        let err = check_compatibility("User", &previous, &next).unwrap_err();
        assert!(matches!(err, SchemaCompatibilityError::RequiredAdded { .. }));
    }

    #[test]
    fn test_compatibility_allows_added_optional_field() {
        let mut previous = BTreeMap::new();
        previous.insert(
            "username".to_string(),
            FieldSummary { type_name: "string".to_string(), required: true },
        );
        let mut next = previous.clone();
        next.insert(
            "displayName".to_string(),
            FieldSummary { type_name: "string".to_string(), required: false },
        );
        assert!(check_compatibility("User", &previous, &next).is_ok());
    }
}
