//! Domain layer types and invariants.

pub mod deployments;
pub mod urls;
