//! Identity key normalization
//!
//! An [`IdentityKey`] is the normalized representation of an identifying
//! attribute, used only as a join key during linking. Keys are derived from
//! detections on demand and never persisted on their own.

use crate::detect::{Detection, PiiCategory};
use serde::{Deserialize, Serialize};

/// Kind of identifying attribute a key was derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    Email,
    Phone,
    NationalId,
    /// Record-level composite of normalized name and date of birth
    NameDob,
    Address,
}

/// A normalized identifying attribute
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IdentityKey {
    pub kind: KeyKind,
    pub value: String,
}

impl IdentityKey {
    pub fn new(kind: KeyKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

/// Derive the key a detection contributes on its own, if any.
///
/// Name and date-of-birth detections carry no standalone key; they only link
/// through the record-level composite built in the graph builder.
pub fn detection_key(detection: &Detection) -> Option<IdentityKey> {
    match detection.category {
        PiiCategory::Email => Some(IdentityKey::new(
            KeyKind::Email,
            normalize_email(&detection.value),
        )),
        PiiCategory::Phone => {
            let digits = digits_only(&detection.value);
            // Fewer than 9 digits is a partial number (or a date the phone
            // heuristic over-matched), not a join key
            if digits.len() >= 9 {
                Some(IdentityKey::new(KeyKind::Phone, digits))
            } else {
                None
            }
        }
        PiiCategory::NationalId => Some(IdentityKey::new(
            KeyKind::NationalId,
            normalize_national_id(&detection.value),
        )),
        PiiCategory::Address => Some(IdentityKey::new(
            KeyKind::Address,
            normalize_text(&detection.value),
        )),
        _ => None,
    }
}

/// Normalized source value used for cluster-consistent transformation.
///
/// Follows the same folding as the join keys so that two spellings of one
/// attribute ("A@X.com " and "a@x.com") pseudonymize to one token.
pub fn canonical_value(detection: &Detection) -> String {
    match detection.category {
        PiiCategory::Email => normalize_email(&detection.value),
        PiiCategory::Phone => digits_only(&detection.value),
        PiiCategory::NationalId => normalize_national_id(&detection.value),
        PiiCategory::DateOfBirth => digits_only(&detection.value),
        _ => normalize_text(&detection.value),
    }
}

/// Lower-case and trim an email
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Strip everything but digits
pub fn digits_only(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Upper-case a national id and drop separators
pub fn normalize_national_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_uppercase()
}

/// Lower-case free text and collapse whitespace
pub fn normalize_text(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Build the record-level name + date-of-birth composite value
pub fn name_dob_value(name: &str, dob: &str) -> String {
    format!("{}|{}", normalize_text(name), digits_only(dob))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Span;

    fn detection(category: PiiCategory, value: &str) -> Detection {
        Detection {
            record_id: "r-1".to_string(),
            field_name: "f".to_string(),
            category,
            confidence: 1.0,
            span: Span {
                start: 0,
                end: value.len(),
            },
            value: value.to_string(),
        }
    }

    #[test]
    fn test_email_variants_fold_to_one_key() {
        let a = detection_key(&detection(PiiCategory::Email, "A@X.com ")).unwrap();
        let b = detection_key(&detection(PiiCategory::Email, "a@x.com")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.value, "a@x.com");
    }

    #[test]
    fn test_phone_digits_only() {
        let key = detection_key(&detection(PiiCategory::Phone, "+45 12 34 56 78")).unwrap();
        assert_eq!(key.kind, KeyKind::Phone);
        assert_eq!(key.value, "4512345678");
    }

    #[test]
    fn test_short_phone_is_no_key() {
        assert!(detection_key(&detection(PiiCategory::Phone, "123 4567")).is_none());
    }

    #[test]
    fn test_national_id_canonical() {
        let a = detection_key(&detection(PiiCategory::NationalId, "dk-123")).unwrap();
        let b = detection_key(&detection(PiiCategory::NationalId, "DK 123")).unwrap();
        assert_eq!(a.value, "DK123");
        assert_eq!(a, b);
    }

    #[test]
    fn test_name_and_dob_have_no_standalone_key() {
        assert!(detection_key(&detection(PiiCategory::Name, "Jon Doe")).is_none());
        assert!(detection_key(&detection(PiiCategory::DateOfBirth, "1988-03-12")).is_none());
    }

    #[test]
    fn test_name_dob_composite() {
        let a = name_dob_value("Jon  Doe", "1988-03-12");
        let b = name_dob_value("jon doe", "19880312");
        assert_eq!(a, b);
        assert_eq!(a, "jon doe|19880312");
    }

    #[test]
    fn test_canonical_value_matches_key_folding() {
        let det = detection(PiiCategory::Email, " Jon.Doe@X.COM");
        assert_eq!(canonical_value(&det), "jon.doe@x.com");
    }
}
