//! Model registry
//!
//! Domain entity definitions are declared as [`ModelDescriptor`]s by the CRD
//! modules and resolved once at startup into an immutable, deterministically
//! ordered catalog. Sources are an explicit list ([`builtin_sources`]) rather
//! than anything discovered at runtime.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Errors raised while building the model catalog.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// A field uses a type shape the generator cannot express
    #[error("unsupported field type for '{field}' in {kind}: {reason}")]
    UnsupportedType {
        /// Kind declaring the field
        kind: String,
        /// Offending field name
        field: String,
        /// Why the shape is rejected
        reason: String,
    },

    /// A required field declares no concrete shape
    #[error("required field '{field}' in {kind} has no concrete type")]
    MissingType {
        /// Kind declaring the field
        kind: String,
        /// Offending field name
        field: String,
    },

    /// Two sources declare the same kind name (case-insensitive)
    #[error("kind name collision: '{kind}' conflicts with already-registered '{existing}'")]
    KindCollision {
        /// Newly declared kind
        kind: String,
        /// Previously registered kind it collides with
        existing: String,
    },
}

/// Per-resource spec validation failure. Non-fatal: the resource is moved to
/// Degraded rather than crashing the operator.
#[derive(Debug, Error)]
#[error("invalid {kind} spec: {message}")]
pub struct ValidationError {
    /// Kind being validated
    pub kind: String,
    /// What was wrong
    pub message: String,
}

/// Schema-level type of a declared field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    /// UTF-8 string
    String,
    /// Boolean flag
    Boolean,
    /// Integer
    Integer,
    /// Closed object with a declared field list
    Object(Vec<FieldDescriptor>),
    /// Open string-keyed map (additionalProperties: true)
    Map,
    /// Homogeneous array
    Array(Box<FieldType>),
}

impl FieldType {
    /// Short name used in generated schemas and compatibility diffs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Object(_) | Self::Map => "object",
            Self::Array(_) => "array",
        }
    }
}

/// One declared field of a model.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    /// Field name as serialized (camelCase)
    pub name: String,
    /// Declared type shape
    pub field_type: FieldType,
    /// Whether the field must be present in a spec
    pub required: bool,
    /// Default embedded into the generated schema
    pub default: Option<Value>,
    /// Human-readable description
    pub description: Option<String>,
}

impl FieldDescriptor {
    /// Declares a required field.
    #[must_use]
    pub fn required(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required: true,
            default: None,
            description: None,
        }
    }

    /// Declares an optional field.
    #[must_use]
    pub fn optional(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required: false,
            default: None,
            description: None,
        }
    }

    /// Attaches a default value.
    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Attaches a description.
    #[must_use]
    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

/// A declared reference from one kind to another (e.g., User -> Group).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    /// Spec field holding the reference(s)
    pub field: String,
    /// Referenced kind name
    pub target_kind: String,
}

/// Immutable description of one domain entity. Produced by a schema source,
/// consumed by the generator and the spec validator.
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    /// API group (e.g., "identity.karectl.io")
    pub group: String,
    /// API version (e.g., "v1alpha1")
    pub version: String,
    /// Kind name (e.g., "User")
    pub kind: String,
    /// Plural resource name (e.g., "users")
    pub plural: String,
    /// Ordered field list
    pub fields: Vec<FieldDescriptor>,
    /// Declared cross-kind references
    pub relationships: Vec<Relationship>,
}

impl ModelDescriptor {
    /// Starts a descriptor for a namespaced kind.
    #[must_use]
    pub fn new(group: &str, version: &str, kind: &str, plural: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
            plural: plural.to_string(),
            fields: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// Appends a field, preserving declaration order.
    #[must_use]
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Declares that `field` references resources of `target_kind`.
    #[must_use]
    pub fn references(mut self, field: &str, target_kind: &str) -> Self {
        self.relationships.push(Relationship {
            field: field.to_string(),
            target_kind: target_kind.to_string(),
        });
        self
    }

    /// Catalog key: `group/version/Kind`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.group, self.version, self.kind)
    }

    fn check_fields(kind: &str, fields: &[FieldDescriptor]) -> Result<(), SchemaError> {
        for field in fields {
            match &field.field_type {
                FieldType::Object(nested) => {
                    if field.required && nested.is_empty() {
                        return Err(SchemaError::MissingType {
                            kind: kind.to_string(),
                            field: field.name.clone(),
                        });
                    }
                    Self::check_fields(kind, nested)?;
                }
                FieldType::Array(element) => {
                    if matches!(element.as_ref(), FieldType::Array(_)) {
                        return Err(SchemaError::UnsupportedType {
                            kind: kind.to_string(),
                            field: field.name.clone(),
                            reason: "nested arrays are not representable".to_string(),
                        });
                    }
                    if let FieldType::Object(nested) = element.as_ref() {
                        Self::check_fields(kind, nested)?;
                    }
                }
                FieldType::String | FieldType::Boolean | FieldType::Integer | FieldType::Map => {}
            }
        }
        Ok(())
    }

    /// Validates a spec document against this descriptor.
    ///
    /// Required fields must be present, present fields must match their
    /// declared type, and unknown fields are rejected.
    pub fn validate_spec(&self, spec: &Value) -> Result<(), ValidationError> {
        let object = spec.as_object().ok_or_else(|| ValidationError {
            kind: self.kind.clone(),
            message: "spec must be an object".to_string(),
        })?;

        validate_object(&self.kind, &self.fields, object)
    }
}

fn validate_object(
    kind: &str,
    fields: &[FieldDescriptor],
    object: &serde_json::Map<String, Value>,
) -> Result<(), ValidationError> {
    for field in fields {
        match object.get(&field.name) {
            None | Some(Value::Null) => {
                if field.required {
                    return Err(ValidationError {
                        kind: kind.to_string(),
                        message: format!("missing required field '{}'", field.name),
                    });
                }
            }
            Some(value) => validate_value(kind, &field.name, &field.field_type, value)?,
        }
    }

    for name in object.keys() {
        if !fields.iter().any(|f| f.name == *name) {
            return Err(ValidationError {
                kind: kind.to_string(),
                message: format!("unknown field '{name}'"),
            });
        }
    }

    Ok(())
}

fn validate_value(
    kind: &str,
    name: &str,
    field_type: &FieldType,
    value: &Value,
) -> Result<(), ValidationError> {
    let mismatch = |expected: &str| ValidationError {
        kind: kind.to_string(),
        message: format!("field '{name}' must be a {expected}"),
    };

    match field_type {
        FieldType::String => value.as_str().map(|_| ()).ok_or_else(|| mismatch("string")),
        FieldType::Boolean => value.as_bool().map(|_| ()).ok_or_else(|| mismatch("boolean")),
        FieldType::Integer => value.as_i64().map(|_| ()).ok_or_else(|| mismatch("integer")),
        FieldType::Map => value.as_object().map(|_| ()).ok_or_else(|| mismatch("object")),
        FieldType::Object(nested) => {
            let object = value.as_object().ok_or_else(|| mismatch("object"))?;
            validate_object(kind, nested, object)
        }
        FieldType::Array(element) => {
            let items = value.as_array().ok_or_else(|| mismatch("array"))?;
            for item in items {
                validate_value(kind, name, element, item)?;
            }
            Ok(())
        }
    }
}

/// Immutable, ordered catalog of all registered models.
///
/// Built once at startup and shared read-only; never rebuilt while
/// reconciliation is active.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, ModelDescriptor>,
}

impl ModelRegistry {
    /// Resolves the given schema sources into a catalog.
    ///
    /// Fails with [`SchemaError`] on unsupported field shapes, required
    /// fields without a concrete type, or case-insensitive kind collisions.
    pub fn discover(sources: &[fn() -> ModelDescriptor]) -> Result<Self, SchemaError> {
        let mut models: BTreeMap<String, ModelDescriptor> = BTreeMap::new();

        for source in sources {
            let descriptor = source();
            ModelDescriptor::check_fields(&descriptor.kind, &descriptor.fields)?;

            let lowered = descriptor.kind.to_lowercase();
            if let Some(existing) = models.values().find(|m| m.kind.to_lowercase() == lowered) {
                return Err(SchemaError::KindCollision {
                    kind: descriptor.kind.clone(),
                    existing: existing.key(),
                });
            }

            debug!(key = %descriptor.key(), "registered model");
            models.insert(descriptor.key(), descriptor);
        }

        Ok(Self { models })
    }

    /// Read-only snapshot of all models, ordered by catalog key.
    #[must_use]
    pub fn all_models(&self) -> &BTreeMap<String, ModelDescriptor> {
        &self.models
    }

    /// Looks up a descriptor by its full key.
    #[must_use]
    pub fn get(&self, group: &str, version: &str, kind: &str) -> Option<&ModelDescriptor> {
        self.models.get(&format!("{group}/{version}/{kind}"))
    }

    /// Looks up a descriptor by kind name alone.
    #[must_use]
    pub fn by_kind(&self, kind: &str) -> Option<&ModelDescriptor> {
        self.models.values().find(|m| m.kind == kind)
    }

    /// Validates a spec document for the given kind.
    pub fn validate_spec(&self, kind: &str, spec: &Value) -> Result<(), ValidationError> {
        let descriptor = self.by_kind(kind).ok_or_else(|| ValidationError {
            kind: kind.to_string(),
            message: "kind is not registered".to_string(),
        })?;
        descriptor.validate_spec(spec)
    }
}

/// The declared schema sources for this operator, in dependency order.
#[must_use]
pub fn builtin_sources() -> Vec<fn() -> ModelDescriptor> {
    vec![
        crate::identity::group::descriptor,
        crate::identity::user::descriptor,
        crate::identity::keycloak_client::descriptor,
        crate::research::project::descriptor,
        crate::workspaces::vdi_instance::descriptor,
    ]
}
