//! Transformation engine
//!
//! Masking, anonymization and pseudonymization over frozen identity clusters,
//! with cluster consistency and idempotence guarantees.

mod engine;
mod policy;

pub use engine::{DetectionRef, TransformEngine, TransformationResult};
pub use policy::TransformPolicy;
