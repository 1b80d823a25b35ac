//! NordGuard configuration management

use crate::transform::TransformPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

// Re-export the built-in rule set next to the config that carries it
pub use crate::detect::patterns::{default_detection_rules, DetectionRule};

/// Main NordGuard configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NordGuardConfig {
    /// Detector configuration
    #[serde(default)]
    pub detector: DetectorConfig,

    /// Identity linking configuration
    #[serde(default)]
    pub linker: LinkerConfig,

    /// Transformation configuration
    #[serde(default)]
    pub transform: TransformConfig,

    /// Audit ledger configuration
    #[serde(default)]
    pub ledger: LedgerConfig,
}

impl NordGuardConfig {
    /// Parse a TOML configuration document
    pub fn from_toml(content: &str) -> crate::error::Result<Self> {
        toml::from_str(content)
            .map_err(|e| crate::error::Error::Config(format!("invalid config: {e}")))
    }
}

/// Detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Detection rules applied to every field
    pub rules: Vec<DetectionRule>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            rules: default_detection_rules(),
        }
    }
}

/// Identity linking configuration
///
/// The merge threshold and weights deliberately favour recall over precision:
/// for an audit/compliance workload, under-linking is the costlier error. The
/// threshold is tunable; only determinism and cluster consistency are
/// correctness-bearing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkerConfig {
    /// Aggregate match score at or above which two detections' clusters merge
    pub merge_threshold: f64,

    /// Weight of an exact normalized email match
    pub email_weight: f64,

    /// Weight of an exact normalized phone match
    pub phone_weight: f64,

    /// Weight of an exact canonical national-id match
    pub national_id_weight: f64,

    /// Weight of a normalized name + date-of-birth composite match
    pub name_dob_weight: f64,

    /// Weight of a normalized address match
    pub address_weight: f64,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        // Default 1.0: any single strong identifier match, or two weak matches
        Self {
            merge_threshold: 1.0,
            email_weight: 1.0,
            phone_weight: 1.0,
            national_id_weight: 1.0,
            name_dob_weight: 0.5,
            address_weight: 0.5,
        }
    }
}

/// Transformation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Policy applied to direct/indirect detections unless overridden
    pub default_policy: TransformPolicy,

    /// Minimum policy for special-category detections
    pub special_policy: TransformPolicy,

    /// Per-category policy overrides, by canonical category name
    #[serde(default)]
    pub category_overrides: HashMap<String, TransformPolicy>,

    /// Policy version stamped into every transformation result
    pub policy_version: String,

    /// Salt for pseudonymization (same input + salt → same token)
    pub salt: String,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            default_policy: TransformPolicy::Pseudonymize,
            special_policy: TransformPolicy::Anonymize,
            category_overrides: HashMap::new(),
            policy_version: "v1".to_string(),
            salt: "nordguard-default-salt".to_string(),
        }
    }
}

impl TransformConfig {
    /// Fresh random salt, for deployments that do not need pseudonyms
    /// stable across runs
    pub fn random_salt() -> String {
        use rand::RngCore;
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Strictest policy configured anywhere; applied to special-category
    /// detections regardless of per-category overrides
    pub fn strictest_policy(&self) -> TransformPolicy {
        self.category_overrides
            .values()
            .copied()
            .chain([self.default_policy, self.special_policy])
            .max()
            .unwrap_or(self.special_policy)
    }
}

/// Audit ledger configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Optional JSONL write-through sink; in-memory only when unset
    pub path: Option<PathBuf>,
}
