//! NordGuard - PII Detection and Consistent Anonymization Pipeline
//!
//! NordGuard scans semi-structured records for personal data, links the
//! findings that belong to the same natural person, and applies a
//! privacy-preserving transformation per identity so the output stays
//! internally consistent. Every decision lands in an append-only audit
//! ledger.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                         Batch Pipeline                         │
//! │                                                                │
//! │  records ──▶ ┌──────────┐   ┌────────────┐                     │
//! │              │ Detector │──▶│ Classifier │  (per record,       │
//! │              └──────────┘   └─────┬──────┘   concurrent)       │
//! │                                   │                            │
//! │                           batch barrier                        │
//! │                                   │                            │
//! │              ┌────────────────────▼─────────────────────┐      │
//! │              │        Identity Graph Builder            │      │
//! │              │  - canonical join keys, bucketed pairs   │      │
//! │              │  - weighted scoring, union-find merge    │      │
//! │              └────────────────────┬─────────────────────┘      │
//! │                                   │                            │
//! │              ┌────────────────────▼─────────────────────┐      │
//! │              │        Transformation Engine             │      │
//! │              │  - mask / anonymize / pseudonymize       │      │
//! │              │  - one replacement per linked identity   │      │
//! │              └────────────────────┬─────────────────────┘      │
//! │                                   │                            │
//! │                          ┌────────▼────────┐                   │
//! │                          │  Audit Ledger   │  gap-free,        │
//! │                          │  (single writer)│  append-only      │
//! │                          └─────────────────┘                   │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`detect`]: pattern-based PII detection over record fields
//! - [`classify`]: sensitivity tiers (direct / indirect / special)
//! - [`link`]: identity clustering with canonical keys and union-find
//! - [`transform`]: policy-driven, cluster-consistent value replacement
//! - [`ledger`]: append-only audit trail with gap-free sequencing
//! - [`pipeline`]: batch orchestration and the per-record state machine
//! - [`report`]: aggregated batch reporting
//! - [`config`]: configuration management

pub mod classify;
pub mod config;
pub mod detect;
pub mod error;
pub mod ledger;
pub mod link;
pub mod pipeline;
pub mod record;
pub mod report;
pub mod store;
pub mod transform;

pub use config::NordGuardConfig;
pub use error::{Error, Result};
