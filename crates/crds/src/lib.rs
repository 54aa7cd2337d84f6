//! karectl CRD Definitions
//!
//! Model catalog, schema generator, and Kubernetes Custom Resource
//! Definitions for the karectl identity controllers.

pub mod conditions;
pub mod generator;
pub mod identity;
pub mod registry;
pub mod research;
pub mod workspaces;

pub use conditions::*;
pub use identity::*;
pub use registry::{
    FieldDescriptor, FieldType, ModelDescriptor, ModelRegistry, Relationship, SchemaError,
    ValidationError, builtin_sources,
};
pub use research::*;
pub use workspaces::*;
