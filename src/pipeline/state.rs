//! Per-record pipeline state machine

use crate::ledger::PipelineStage;
use serde::{Deserialize, Serialize};

/// State a record moves through:
/// `Ingested → Detected → Classified → Linked → Transformed → Logged`,
/// with `Failed` reachable from any stage. The transition from Classified to
/// Linked happens only after the whole batch has reached Classified or Failed
/// (the batch barrier).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum RecordState {
    Ingested,
    Detected,
    Classified,
    Linked,
    Transformed,
    /// Terminal success: every decision about the record is in the ledger
    Logged,
    /// Terminal failure at one stage; the record is excluded from linking but
    /// still audited, and the batch continues
    Failed {
        stage: PipelineStage,
        reason: String,
    },
}

impl RecordState {
    /// True for `Logged` and `Failed`
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Logged | Self::Failed { .. })
    }

    /// True for `Failed`
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl std::fmt::Display for RecordState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ingested => write!(f, "ingested"),
            Self::Detected => write!(f, "detected"),
            Self::Classified => write!(f, "classified"),
            Self::Linked => write!(f, "linked"),
            Self::Transformed => write!(f, "transformed"),
            Self::Logged => write!(f, "logged"),
            Self::Failed { stage, reason } => write!(f, "failed({stage}: {reason})"),
        }
    }
}
