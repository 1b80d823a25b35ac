//! Identity graph builder
//!
//! Consumes the batch's classifications and unions matching detections into
//! identity clusters. The match graph is never materialized: bucketing by
//! identity key proposes candidate pairs, union-find absorbs them.
//!
//! Determinism is load-bearing. Working order is `(record_id, field_name)`
//! lexicographic regardless of arrival order, candidate pairs are scored in
//! sorted order, and cluster ids are derived from sorted member content, so
//! two runs over identical input produce identical clusters. Downstream
//! transformation consistency depends on this.

use crate::classify::{Classification, SensitivityTier};
use crate::config::LinkerConfig;
use crate::detect::PiiCategory;
use crate::error::Result;
use crate::link::keys::{self, IdentityKey, KeyKind};
use crate::link::union_find::UnionFind;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// A set of detections believed to belong to one natural person
#[derive(Debug, Clone)]
pub struct IdentityCluster {
    /// Content-derived id, stable across runs on identical input
    pub cluster_id: String,
    /// Member classifications, sorted by `(record_id, field_name, span)`
    pub members: Vec<Classification>,
}

impl IdentityCluster {
    /// Record ids represented in this cluster, deduplicated and sorted
    pub fn record_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .members
            .iter()
            .map(|m| m.detection.record_id.as_str())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// Conflicting evidence inside a merged cluster (two different values of one
/// strong identifier). Merged anyway (recall over precision), but surfaced
/// so investigators can audit the decision.
#[derive(Debug, Clone)]
pub struct LinkAmbiguity {
    pub cluster_id: String,
    pub kind: KeyKind,
    pub values: Vec<String>,
}

/// Result of one linking run over a frozen classification snapshot
#[derive(Debug, Clone)]
pub struct LinkOutcome {
    pub clusters: Vec<IdentityCluster>,
    pub ambiguities: Vec<LinkAmbiguity>,
    /// Candidate pairs scored (bucketed, never all-pairs)
    pub pairs_compared: usize,
    /// Pairs whose score reached the merge threshold
    pub pairs_merged: usize,
}

/// Builds identity clusters from a batch's classifications
pub struct IdentityGraphBuilder {
    config: LinkerConfig,
}

impl IdentityGraphBuilder {
    pub fn new(config: LinkerConfig) -> Self {
        Self { config }
    }

    /// Cluster the given classification snapshot.
    ///
    /// Direct and indirect detections participate in linking; special-category
    /// and unknown-tier detections are excluded and come back as singleton
    /// observer clusters. The returned clusters partition the input: every
    /// classification appears in exactly one cluster.
    ///
    /// Detections of one record are co-membership evidence for one person and
    /// are unioned up front. Cross-record match scores are therefore computed
    /// over each record's aggregated key set: a weighted sum over the key
    /// kinds shared with equal normalized values, merged when it reaches the
    /// configured threshold. Conflicting evidence (same email, different
    /// national id) still merges; the conflict is reported as an ambiguity.
    pub fn build(&self, classifications: &[Classification]) -> Result<LinkOutcome> {
        // Deterministic working order regardless of arrival order
        let mut order: Vec<usize> = (0..classifications.len()).collect();
        order.sort_by(|&a, &b| sort_key(&classifications[a]).cmp(&sort_key(&classifications[b])));

        let linkable: Vec<usize> = order
            .iter()
            .copied()
            .filter(|&i| {
                matches!(
                    classifications[i].tier,
                    SensitivityTier::Direct | SensitivityTier::Indirect
                )
            })
            .collect();
        let observers: Vec<usize> = order
            .iter()
            .copied()
            .filter(|&i| {
                matches!(
                    classifications[i].tier,
                    SensitivityTier::Special | SensitivityTier::Unknown
                )
            })
            .collect();

        // Same-record union: positions grouped per record, in sorted order
        let mut uf = UnionFind::new(linkable.len());
        let mut record_positions: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (pos, &idx) in linkable.iter().enumerate() {
            record_positions
                .entry(classifications[idx].detection.record_id.as_str())
                .or_default()
                .push(pos);
        }
        for positions in record_positions.values() {
            for window in positions.windows(2) {
                uf.union(window[0], window[1]);
            }
        }

        // Aggregate each record's identity keys
        let record_keys = self.record_key_sets(classifications, &linkable);

        // Bucket records by key; only records sharing a bucket are candidates
        let mut buckets: BTreeMap<&IdentityKey, Vec<&str>> = BTreeMap::new();
        for (record_id, keyset) in &record_keys {
            for key in keyset {
                buckets.entry(key).or_default().push(*record_id);
            }
        }
        let mut candidates: BTreeSet<(&str, &str)> = BTreeSet::new();
        for records in buckets.values() {
            for (i, &a) in records.iter().enumerate() {
                for &b in &records[i + 1..] {
                    if a != b {
                        candidates.insert((a.min(b), a.max(b)));
                    }
                }
            }
        }

        let pairs_compared = candidates.len();
        let mut pairs_merged = 0usize;
        for (a, b) in candidates {
            let score = self.pair_score(&record_keys[a], &record_keys[b]);
            if score >= self.config.merge_threshold - f64::EPSILON {
                let pa = record_positions[a][0];
                let pb = record_positions[b][0];
                if uf.union(pa, pb) {
                    pairs_merged += 1;
                }
                tracing::trace!(record_a = a, record_b = b, score, "records linked");
            }
        }

        // Materialize clusters
        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for pos in 0..linkable.len() {
            groups.entry(uf.find(pos)).or_default().push(pos);
        }

        let mut clusters = Vec::new();
        let mut ambiguities = Vec::new();
        for positions in groups.values() {
            let members: Vec<Classification> = positions
                .iter()
                .map(|&pos| classifications[linkable[pos]].clone())
                .collect();
            let cluster_id = derive_cluster_id(&members);
            ambiguities.extend(find_ambiguities(&cluster_id, &members, &record_keys));
            clusters.push(IdentityCluster {
                cluster_id,
                members,
            });
        }
        for &idx in &observers {
            let members = vec![classifications[idx].clone()];
            clusters.push(IdentityCluster {
                cluster_id: derive_cluster_id(&members),
                members,
            });
        }
        clusters.sort_by(|a, b| a.cluster_id.cmp(&b.cluster_id));

        tracing::debug!(
            clusters = clusters.len(),
            pairs_compared,
            pairs_merged,
            ambiguities = ambiguities.len(),
            "identity graph built"
        );

        Ok(LinkOutcome {
            clusters,
            ambiguities,
            pairs_compared,
            pairs_merged,
        })
    }

    /// Aggregated identity keys per record: every detection's normalized key
    /// plus the record-level name + date-of-birth composites
    fn record_key_sets<'a>(
        &self,
        classifications: &'a [Classification],
        linkable: &[usize],
    ) -> BTreeMap<&'a str, BTreeSet<IdentityKey>> {
        let mut sets: BTreeMap<&str, BTreeSet<IdentityKey>> = BTreeMap::new();
        let mut names: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        let mut dobs: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();

        for &idx in linkable {
            let det = &classifications[idx].detection;
            let record_id = det.record_id.as_str();
            let keyset = sets.entry(record_id).or_default();
            if let Some(key) = keys::detection_key(det) {
                keyset.insert(key);
            }
            match det.category {
                PiiCategory::Name => {
                    names.entry(record_id).or_default().insert(&det.value);
                }
                PiiCategory::DateOfBirth => {
                    dobs.entry(record_id).or_default().insert(&det.value);
                }
                _ => {}
            }
        }

        for (record_id, record_names) in &names {
            if let Some(record_dobs) = dobs.get(record_id) {
                let keyset = sets.entry(*record_id).or_default();
                for name in record_names {
                    for dob in record_dobs {
                        keyset.insert(IdentityKey::new(
                            KeyKind::NameDob,
                            keys::name_dob_value(name, dob),
                        ));
                    }
                }
            }
        }

        sets
    }

    /// Weighted sum over key kinds shared with equal normalized values.
    /// Each kind counts once per pair. Summed in `KeyKind` order so the
    /// score is bit-identical across runs even with non-exact weights.
    fn pair_score(&self, a: &BTreeSet<IdentityKey>, b: &BTreeSet<IdentityKey>) -> f64 {
        let shared: BTreeSet<KeyKind> = a.intersection(b).map(|key| key.kind).collect();
        shared.iter().map(|kind| self.weight(*kind)).sum()
    }

    fn weight(&self, kind: KeyKind) -> f64 {
        match kind {
            KeyKind::Email => self.config.email_weight,
            KeyKind::Phone => self.config.phone_weight,
            KeyKind::NationalId => self.config.national_id_weight,
            KeyKind::NameDob => self.config.name_dob_weight,
            KeyKind::Address => self.config.address_weight,
        }
    }
}

fn sort_key(c: &Classification) -> (&str, &str, usize, usize, &str) {
    (
        c.detection.record_id.as_str(),
        c.detection.field_name.as_str(),
        c.detection.span.start,
        c.detection.span.end,
        c.detection.category.as_str(),
    )
}

/// Content-derived cluster id: hash of the sorted member references
fn derive_cluster_id(members: &[Classification]) -> String {
    let mut hasher = Sha256::new();
    for member in members {
        hasher.update(member.detection.reference().as_bytes());
        hasher.update(b"\n");
    }
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(16);
    for byte in &digest[..8] {
        use std::fmt::Write;
        let _ = write!(hex, "{byte:02x}");
    }
    format!("ent-{hex}")
}

/// Distinct values of one strong identifier across a cluster's records
fn find_ambiguities(
    cluster_id: &str,
    members: &[Classification],
    record_keys: &BTreeMap<&str, BTreeSet<IdentityKey>>,
) -> Vec<LinkAmbiguity> {
    let mut by_kind: BTreeMap<KeyKind, BTreeSet<&str>> = BTreeMap::new();
    let mut records: Vec<&str> = members
        .iter()
        .map(|m| m.detection.record_id.as_str())
        .collect();
    records.sort_unstable();
    records.dedup();

    for record_id in records {
        let Some(keyset) = record_keys.get(record_id) else {
            continue;
        };
        for key in keyset {
            if matches!(
                key.kind,
                KeyKind::Email | KeyKind::Phone | KeyKind::NationalId
            ) {
                by_kind.entry(key.kind).or_default().insert(&key.value);
            }
        }
    }

    by_kind
        .into_iter()
        .filter(|(_, values)| values.len() > 1)
        .map(|(kind, values)| LinkAmbiguity {
            cluster_id: cluster_id.to_string(),
            kind,
            values: values.into_iter().map(String::from).collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Classifier;
    use crate::detect::patterns::default_detection_rules;
    use crate::detect::Detector;
    use crate::record::Record;

    fn classify_all(records: &[Record]) -> Vec<Classification> {
        let detector = Detector::new(default_detection_rules()).unwrap();
        let classifier = Classifier::new();
        records
            .iter()
            .flat_map(|r| detector.detect(r))
            .map(|d| classifier.classify(d).unwrap())
            .collect()
    }

    fn builder() -> IdentityGraphBuilder {
        IdentityGraphBuilder::new(LinkerConfig::default())
    }

    fn cluster_of(outcome: &LinkOutcome, record_id: &str) -> String {
        outcome
            .clusters
            .iter()
            .find(|c| c.record_ids().contains(&record_id))
            .map(|c| c.cluster_id.clone())
            .unwrap()
    }

    #[test]
    fn test_worked_example_merges_email_variants() {
        // Two records share one email modulo case/whitespace; a third does not
        let records = vec![
            Record::new("r-1")
                .with_field("email", "a@x.com")
                .with_field("name", "Jon Doe"),
            Record::new("r-2")
                .with_field("email", "A@X.com ")
                .with_field("national_id", "DK-123"),
            Record::new("r-3").with_field("email", "b@y.com"),
        ];
        let classifications = classify_all(&records);
        let outcome = builder().build(&classifications).unwrap();

        let of_r1 = cluster_of(&outcome, "r-1");
        let of_r2 = cluster_of(&outcome, "r-2");
        let of_r3 = cluster_of(&outcome, "r-3");
        assert_eq!(of_r1, of_r2, "email variants must fold to one key");
        assert_ne!(of_r1, of_r3, "unrelated email stays separate");

        // Same-record evidence pulls the name and national id into the merge
        let merged = outcome
            .clusters
            .iter()
            .find(|c| c.cluster_id == of_r1)
            .unwrap();
        assert!(merged
            .members
            .iter()
            .any(|m| m.detection.category == PiiCategory::Name));
        assert!(merged
            .members
            .iter()
            .any(|m| m.detection.category == PiiCategory::NationalId));
    }

    #[test]
    fn test_partition_invariant() {
        let records = vec![
            Record::new("r-1")
                .with_field("email", "a@x.com")
                .with_field("diagnosis", "E11.9"),
            Record::new("r-2").with_field("email", "a@x.com"),
            Record::new("r-3").with_field("email", "c@z.com"),
        ];
        let classifications = classify_all(&records);
        let outcome = builder().build(&classifications).unwrap();

        let total: usize = outcome.clusters.iter().map(|c| c.members.len()).sum();
        assert_eq!(total, classifications.len());

        let mut seen = BTreeSet::new();
        for cluster in &outcome.clusters {
            for member in &cluster.members {
                assert!(
                    seen.insert(member.detection.reference()),
                    "detection in two clusters"
                );
            }
        }
    }

    #[test]
    fn test_special_category_stays_singleton() {
        let records = vec![
            Record::new("r-1")
                .with_field("email", "a@x.com")
                .with_field("diagnosis", "E11.9"),
            Record::new("r-2").with_field("email", "a@x.com"),
        ];
        let classifications = classify_all(&records);
        let outcome = builder().build(&classifications).unwrap();

        let special = outcome
            .clusters
            .iter()
            .find(|c| {
                c.members
                    .iter()
                    .any(|m| m.tier == SensitivityTier::Special)
            })
            .unwrap();
        assert_eq!(special.members.len(), 1, "special detections never link");
    }

    #[test]
    fn test_determinism_across_input_order() {
        let records = vec![
            Record::new("r-1")
                .with_field("email", "a@x.com")
                .with_field("name", "Jon Doe"),
            Record::new("r-2").with_field("email", "a@x.com"),
            Record::new("r-3").with_field("phone", "+45 12 34 56 78"),
            Record::new("r-4").with_field("phone", "45 123 456 78"),
        ];
        let mut classifications = classify_all(&records);
        let first = builder().build(&classifications).unwrap();
        classifications.reverse();
        let second = builder().build(&classifications).unwrap();

        let ids = |o: &LinkOutcome| {
            o.clusters
                .iter()
                .map(|c| (c.cluster_id.clone(), c.members.len()))
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn test_two_weak_matches_merge() {
        // No shared strong identifier; shared name+dob composite (0.5) plus
        // shared address (0.5) reaches the default threshold
        let records = vec![
            Record::new("r-1")
                .with_field("name", "Jon Doe")
                .with_field("dob", "1988-03-12")
                .with_field("address", "Hovedgaden 12"),
            Record::new("r-2")
                .with_field("name", "Jon Doe")
                .with_field("dob", "1988-03-12")
                .with_field("address", "Hovedgaden  12"),
        ];
        let classifications = classify_all(&records);
        let outcome = builder().build(&classifications).unwrap();
        assert_eq!(cluster_of(&outcome, "r-1"), cluster_of(&outcome, "r-2"));
    }

    #[test]
    fn test_single_weak_match_does_not_merge() {
        // Only the name+dob composite (0.5) is shared: below threshold
        let records = vec![
            Record::new("r-1")
                .with_field("name", "Jon Doe")
                .with_field("dob", "1988-03-12"),
            Record::new("r-2")
                .with_field("name", "Jon Doe")
                .with_field("dob", "1988-03-12")
                .with_field("email", "distinct@y.com"),
        ];
        let classifications = classify_all(&records);
        let outcome = builder().build(&classifications).unwrap();
        assert_ne!(cluster_of(&outcome, "r-1"), cluster_of(&outcome, "r-2"));
    }

    #[test]
    fn test_conflicting_national_ids_still_merge_with_ambiguity() {
        let records = vec![
            Record::new("r-1")
                .with_field("email", "a@x.com")
                .with_field("national_id", "DK-123"),
            Record::new("r-2")
                .with_field("email", "a@x.com")
                .with_field("national_id", "DK-999"),
        ];
        let classifications = classify_all(&records);
        let outcome = builder().build(&classifications).unwrap();

        assert_eq!(cluster_of(&outcome, "r-1"), cluster_of(&outcome, "r-2"));
        assert!(outcome
            .ambiguities
            .iter()
            .any(|a| a.kind == KeyKind::NationalId && a.values.len() == 2));
    }

    #[test]
    fn test_unmatched_detection_is_singleton() {
        let records = vec![
            Record::new("r-1").with_field("email", "alone@x.com"),
            Record::new("r-2").with_field("email", "other@y.com"),
        ];
        let classifications = classify_all(&records);
        let outcome = builder().build(&classifications).unwrap();
        assert_eq!(outcome.clusters.len(), 2);
        assert!(outcome.clusters.iter().all(|c| c.members.len() == 1));
    }

    #[test]
    fn test_bucketing_limits_comparisons() {
        // 20 disjoint emails: no shared bucket, so no pair is ever scored
        let records: Vec<Record> = (0..20)
            .map(|i| Record::new(format!("r-{i:02}")).with_field("email", format!("u{i}@x.com")))
            .collect();
        let classifications = classify_all(&records);
        let outcome = builder().build(&classifications).unwrap();
        assert_eq!(outcome.pairs_compared, 0);
        assert_eq!(outcome.clusters.len(), 20);
    }

    #[test]
    fn test_tuned_weights_score_deterministically() {
        // 0.1 + 1.4 + 0.7 is exactly 2.2 only in this addition order; most
        // permutations fall one ulp short of the threshold. The outcome must
        // not depend on which order the shared kinds are summed in.
        let config = LinkerConfig {
            merge_threshold: 2.2,
            phone_weight: 0.1,
            name_dob_weight: 1.4,
            address_weight: 0.7,
            ..LinkerConfig::default()
        };
        let records = vec![
            Record::new("r-1")
                .with_field("phone", "+45 12 34 56 78")
                .with_field("name", "Jon Doe")
                .with_field("dob", "1988-03-12")
                .with_field("address", "Hovedgaden 12"),
            Record::new("r-2")
                .with_field("phone", "45 123 456 78")
                .with_field("name", "Jon Doe")
                .with_field("dob", "1988-03-12")
                .with_field("address", "Hovedgaden  12"),
        ];
        let classifications = classify_all(&records);
        for _ in 0..32 {
            let outcome = IdentityGraphBuilder::new(config.clone())
                .build(&classifications)
                .unwrap();
            assert_eq!(
                cluster_of(&outcome, "r-1"),
                cluster_of(&outcome, "r-2"),
                "near-threshold score flipped between runs"
            );
        }
    }

    #[test]
    fn test_raised_threshold_blocks_merges() {
        let config = LinkerConfig {
            merge_threshold: 2.0,
            ..LinkerConfig::default()
        };
        let records = vec![
            Record::new("r-1").with_field("email", "a@x.com"),
            Record::new("r-2").with_field("email", "a@x.com"),
        ];
        let classifications = classify_all(&records);
        let outcome = IdentityGraphBuilder::new(config)
            .build(&classifications)
            .unwrap();
        assert_eq!(outcome.clusters.len(), 2);
    }
}
