//! Sensitivity classification
//!
//! Maps each detection to a sensitivity tier through a fixed taxonomy table.
//! Direct identifiers pin a person on their own, indirect identifiers do so in
//! combination, and special-category data (health) is never used for linking.

use crate::detect::{Detection, PiiCategory};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Sensitivity tier of a detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitivityTier {
    /// Identifies a person on its own (national id, email, phone)
    Direct,
    /// Identifies a person in combination (address, date of birth, name)
    Indirect,
    /// Special-category data under GDPR Article 9 (health)
    Special,
    /// Category outside the taxonomy; retained but never linked
    Unknown,
}

impl std::fmt::Display for SensitivityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Indirect => write!(f, "indirect"),
            Self::Special => write!(f, "special"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A detection refined with its sensitivity tier (one-to-one)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub detection: Detection,
    pub tier: SensitivityTier,
}

/// Fixed-table classifier
#[derive(Debug, Clone, Copy, Default)]
pub struct Classifier;

impl Classifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify one detection.
    ///
    /// Fails with [`Error::UnclassifiedCategory`] for categories outside the
    /// taxonomy; the orchestrator catches that, retains the detection with
    /// tier [`SensitivityTier::Unknown`] and logs the recovery. No data loss.
    pub fn classify(&self, detection: Detection) -> Result<Classification> {
        let tier = match &detection.category {
            PiiCategory::NationalId | PiiCategory::Email | PiiCategory::Phone => {
                SensitivityTier::Direct
            }
            PiiCategory::Address | PiiCategory::DateOfBirth | PiiCategory::Name => {
                SensitivityTier::Indirect
            }
            PiiCategory::HealthCode => SensitivityTier::Special,
            PiiCategory::Other(name) => {
                return Err(Error::UnclassifiedCategory(name.clone()));
            }
        };

        Ok(Classification { detection, tier })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Span;

    fn detection(category: PiiCategory) -> Detection {
        Detection {
            record_id: "r-1".to_string(),
            field_name: "f".to_string(),
            category,
            confidence: 1.0,
            span: Span { start: 0, end: 5 },
            value: "value".to_string(),
        }
    }

    #[test]
    fn test_tier_table() {
        let classifier = Classifier::new();
        let cases = [
            (PiiCategory::NationalId, SensitivityTier::Direct),
            (PiiCategory::Email, SensitivityTier::Direct),
            (PiiCategory::Phone, SensitivityTier::Direct),
            (PiiCategory::Address, SensitivityTier::Indirect),
            (PiiCategory::DateOfBirth, SensitivityTier::Indirect),
            (PiiCategory::Name, SensitivityTier::Indirect),
            (PiiCategory::HealthCode, SensitivityTier::Special),
        ];
        for (category, tier) in cases {
            let got = classifier.classify(detection(category.clone())).unwrap();
            assert_eq!(got.tier, tier, "{category}");
        }
    }

    #[test]
    fn test_unknown_category_fails() {
        let classifier = Classifier::new();
        let result = classifier.classify(detection(PiiCategory::Other("iban".to_string())));
        assert!(matches!(result, Err(Error::UnclassifiedCategory(name)) if name == "iban"));
    }
}
