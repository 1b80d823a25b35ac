//! Default detection rule set
//!
//! Exact-format patterns (email, national id, ISO dates) carry confidence 1.0;
//! heuristic patterns (phone, address, free-text names) carry less. The set is
//! Nordic-flavoured: the national-id rule matches the Danish CPR format.

use serde::{Deserialize, Serialize};

/// A configurable detection rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRule {
    /// Rule name (unique within the set)
    pub name: String,
    /// Category assigned to matches, by canonical name
    pub category: String,
    /// Regular expression applied to each field value
    pub pattern: String,
    /// Confidence assigned to matches
    pub confidence: f64,
}

impl DetectionRule {
    fn new(name: &str, category: &str, pattern: &str, confidence: f64) -> Self {
        Self {
            name: name.to_string(),
            category: category.to_string(),
            pattern: pattern.to_string(),
            confidence,
        }
    }
}

/// Built-in rule set applied when the configuration carries no custom rules
pub fn default_detection_rules() -> Vec<DetectionRule> {
    vec![
        DetectionRule::new(
            "email",
            "email",
            r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
            1.0,
        ),
        // Danish CPR: DDMMYY-SSSS
        DetectionRule::new("cpr", "national-id", r"\b\d{6}-\d{4}\b", 1.0),
        // Prefixed national ids such as "DK-123"
        DetectionRule::new(
            "national_id_prefixed",
            "national-id",
            r"\b[A-Z]{2}-\d{3,10}\b",
            0.9,
        ),
        DetectionRule::new(
            "phone",
            "phone",
            r"\+?\d[\d ().-]{6,16}\d",
            0.7,
        ),
        // ICD-10 diagnosis codes, e.g. E11.9
        DetectionRule::new(
            "health_code",
            "health-code",
            r"\b[A-TV-Z]\d{2}\.\d{1,2}\b",
            0.9,
        ),
        DetectionRule::new(
            "date_of_birth_iso",
            "date-of-birth",
            r"\b(19|20)\d{2}-(0[1-9]|1[0-2])-(0[1-9]|[12]\d|3[01])\b",
            1.0,
        ),
        DetectionRule::new(
            "date_of_birth_slash",
            "date-of-birth",
            r"\b(0[1-9]|[12]\d|3[01])/(0[1-9]|1[0-2])/(19|20)\d{2}\b",
            0.6,
        ),
        // Nordic street address, e.g. "Hovedgaden 12"
        DetectionRule::new(
            "address",
            "address",
            r"\b[A-ZÆØÅ][a-zæøå]*(?:vej|gade|gaden|allé|alle|vænget|street|road|avenue)\s+\d{1,4}\b",
            0.6,
        ),
        DetectionRule::new(
            "person_name",
            "free-text-name",
            r"\b[A-ZÆØÅ][a-zæøå]+(?: [A-ZÆØÅ][a-zæøå]+)+\b",
            0.5,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rules_compile() {
        for rule in default_detection_rules() {
            assert!(
                regex::Regex::new(&rule.pattern).is_ok(),
                "rule '{}' has an invalid pattern",
                rule.name
            );
        }
    }

    #[test]
    fn test_confidence_in_range() {
        for rule in default_detection_rules() {
            assert!((0.0..=1.0).contains(&rule.confidence), "{}", rule.name);
        }
    }
}
