//! PII detection
//!
//! The detector scans each record field against a configurable pattern set
//! and emits typed [`Detection`]s. Detection is a pure function: persisting
//! results and emitting audit entries is the orchestrator's job.

mod detector;
pub mod patterns;

pub use detector::Detector;

use serde::{Deserialize, Serialize};

/// PII category assigned by a detection rule
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PiiCategory {
    Email,
    Phone,
    NationalId,
    HealthCode,
    DateOfBirth,
    Address,
    Name,
    /// Category name not in the fixed taxonomy (kept, classified as unknown)
    Other(String),
}

impl PiiCategory {
    /// Canonical kebab-case name
    pub fn as_str(&self) -> &str {
        match self {
            Self::Email => "email",
            Self::Phone => "phone",
            Self::NationalId => "national-id",
            Self::HealthCode => "health-code",
            Self::DateOfBirth => "date-of-birth",
            Self::Address => "address",
            Self::Name => "free-text-name",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for PiiCategory {
    fn from(s: String) -> Self {
        match s.as_str() {
            "email" => Self::Email,
            "phone" => Self::Phone,
            "national-id" => Self::NationalId,
            "health-code" => Self::HealthCode,
            "date-of-birth" => Self::DateOfBirth,
            "address" => Self::Address,
            "free-text-name" => Self::Name,
            _ => Self::Other(s),
        }
    }
}

impl From<PiiCategory> for String {
    fn from(c: PiiCategory) -> Self {
        c.as_str().to_string()
    }
}

impl std::fmt::Display for PiiCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Byte span of a match within a field value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A single PII match in one record field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    /// Id of the record the match was found in
    pub record_id: String,
    /// Field the match was found in
    pub field_name: String,
    /// Category assigned by the matching rule
    pub category: PiiCategory,
    /// Rule-defined confidence in [0, 1]
    pub confidence: f64,
    /// Match position within the field value
    pub span: Span,
    /// The matched text
    pub value: String,
}

impl Detection {
    /// Stable reference string used as audit subject and result key
    pub fn reference(&self) -> String {
        format!(
            "{}/{}:{}-{}",
            self.record_id, self.field_name, self.span.start, self.span.end
        )
    }
}
