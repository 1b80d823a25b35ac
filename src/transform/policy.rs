//! Transformation policies

use serde::{Deserialize, Serialize};

/// How a detected value is transformed.
///
/// Variant order is strictness order: `Retain < Mask < Pseudonymize <
/// Anonymize`. The derived `Ord` is what "strictest configured policy" means
/// for special-category data.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TransformPolicy {
    /// Pass the value through unchanged. Never valid for special-category
    /// data; requesting it there is a policy violation.
    Retain,
    /// Format-preserving replacement: length and character classes kept
    Mask,
    /// Deterministic salted-hash substitution; reversible only by the
    /// salt-holder
    Pseudonymize,
    /// Irreversible generalization or redaction to a category token
    Anonymize,
}

impl std::fmt::Display for TransformPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Retain => write!(f, "retain"),
            Self::Mask => write!(f, "mask"),
            Self::Pseudonymize => write!(f, "pseudonymize"),
            Self::Anonymize => write!(f, "anonymize"),
        }
    }
}
