//! Cluster-consistent transformation engine
//!
//! Applies a transformation policy to every member of a frozen identity
//! cluster. Two guarantees carry the design:
//!
//! - **Cluster consistency**: within a cluster, detections sharing one
//!   normalized source value pseudonymize to one token. Two surviving
//!   occurrences of "the same" email transformed differently would let an
//!   adversary correlate records by elimination.
//! - **Idempotence**: the engine is pure in its inputs. The caller supplies
//!   the application timestamp, so re-running over the same cluster and
//!   policy version yields byte-identical results.

use crate::classify::SensitivityTier;
use crate::config::TransformConfig;
use crate::detect::{PiiCategory, Span};
use crate::error::{Error, Result};
use crate::link::keys::canonical_value;
use crate::link::IdentityCluster;
use crate::transform::TransformPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Reference from a transformation result back to its source detection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionRef {
    pub record_id: String,
    pub field_name: String,
    pub span: Span,
}

/// One transformed detection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformationResult {
    pub detection: DetectionRef,
    pub cluster_id: String,
    pub method: TransformPolicy,
    pub transformed_value: String,
    pub policy_version: String,
    pub applied_at: DateTime<Utc>,
}

/// Applies transformation policies across identity clusters
pub struct TransformEngine {
    config: TransformConfig,
}

impl TransformEngine {
    pub fn new(config: TransformConfig) -> Self {
        Self { config }
    }

    /// Transform every member of a frozen cluster.
    ///
    /// Policy selection: per-category override, else the configured default;
    /// special-category members always get the strictest configured policy
    /// regardless of override. A `Retain` landing on special-category data is
    /// a [`Error::PolicyViolation`] and fails the whole cluster.
    pub fn transform(
        &self,
        cluster: &IdentityCluster,
        applied_at: DateTime<Utc>,
    ) -> Result<Vec<TransformationResult>> {
        let mut results = Vec::with_capacity(cluster.members.len());

        for member in &cluster.members {
            let policy = self.policy_for(member.tier, &member.detection.category);
            if member.tier == SensitivityTier::Special && policy == TransformPolicy::Retain {
                return Err(Error::PolicyViolation(format!(
                    "special-category detection {} cannot be retained untransformed",
                    member.detection.reference()
                )));
            }

            let transformed_value = match policy {
                TransformPolicy::Retain => member.detection.value.clone(),
                TransformPolicy::Mask => mask(&member.detection.value),
                TransformPolicy::Pseudonymize => self.pseudonym(&member.detection),
                TransformPolicy::Anonymize => anonymize(&member.detection),
            };

            results.push(TransformationResult {
                detection: DetectionRef {
                    record_id: member.detection.record_id.clone(),
                    field_name: member.detection.field_name.clone(),
                    span: member.detection.span,
                },
                cluster_id: cluster.cluster_id.clone(),
                method: policy,
                transformed_value,
                policy_version: self.config.policy_version.clone(),
                applied_at,
            });
        }

        // Member order is already deterministic; keep results aligned with it
        Ok(results)
    }

    fn policy_for(&self, tier: SensitivityTier, category: &PiiCategory) -> TransformPolicy {
        if tier == SensitivityTier::Special {
            return self.config.strictest_policy();
        }
        self.config
            .category_overrides
            .get(category.as_str())
            .copied()
            .unwrap_or(self.config.default_policy)
    }

    /// Deterministic salted token over the normalized source value. The
    /// normalization is the same folding linking uses, so every spelling of
    /// one attribute maps to one token.
    fn pseudonym(&self, detection: &crate::detect::Detection) -> String {
        let canonical = canonical_value(detection);
        let mut hasher = Sha256::new();
        hasher.update(self.config.salt.as_bytes());
        hasher.update(b"|");
        hasher.update(self.config.policy_version.as_bytes());
        hasher.update(b"|");
        hasher.update(canonical.as_bytes());
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(16);
        for byte in &digest[..8] {
            use std::fmt::Write;
            let _ = write!(hex, "{byte:02x}");
        }
        format!("pid-{hex}")
    }
}

/// Format-preserving mask: letters become `x`, digits become `0`, everything
/// else (separators, `@`, punctuation) stays
fn mask(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_alphabetic() {
                'x'
            } else if c.is_ascii_digit() {
                '0'
            } else {
                c
            }
        })
        .collect()
}

/// Irreversible generalization: dates of birth collapse to a 5-year range,
/// everything else redacts to its category token
fn anonymize(detection: &crate::detect::Detection) -> String {
    if detection.category == PiiCategory::DateOfBirth {
        if let Some(year) = extract_year(&detection.value) {
            let lo = year - year.rem_euclid(5);
            return format!("[{}-{}]", lo, lo + 4);
        }
    }
    format!(
        "[{}]",
        detection.category.as_str().to_uppercase().replace('-', "_")
    )
}

/// First plausible four-digit year in the value
fn extract_year(value: &str) -> Option<i32> {
    let digits: Vec<char> = value.chars().collect();
    for window_start in 0..digits.len().saturating_sub(3) {
        let window = &digits[window_start..window_start + 4];
        if window.iter().all(|c| c.is_ascii_digit()) {
            let year: i32 = window.iter().collect::<String>().parse().ok()?;
            if (1900..=2100).contains(&year) {
                return Some(year);
            }
        }
    }
    None
}
