//! Identity linking
//!
//! Turns the batch's classified detections into identity clusters. The
//! conceptual match graph is undirected and cyclic; representing it as a
//! union-find forest over an index arena avoids materializing edges (and any
//! cycle handling) entirely.

pub mod keys;
mod builder;
mod union_find;

pub use builder::{IdentityCluster, IdentityGraphBuilder, LinkAmbiguity, LinkOutcome};
pub use keys::{IdentityKey, KeyKind};
pub use union_find::UnionFind;
