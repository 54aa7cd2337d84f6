//! Workspace CRDs
//!
//! Kinds under `karectl.io`: VDIInstance.

pub mod vdi_instance;

pub use vdi_instance::*;
