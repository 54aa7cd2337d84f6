//! Research CRDs
//!
//! Kinds under `research.karectl.io`: Project.

pub mod project;

pub use project::*;
