//! Batch reporting
//!
//! Aggregates a finished batch into counts and per-cluster summaries, with a
//! small set of before/after samples. Serializes to JSON for machine use and
//! renders a plain-text view for the CLI.

use crate::detect::Detection;
use crate::pipeline::BatchOutput;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const SAMPLE_LIMIT: usize = 5;

/// One linked identity, summarized
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub cluster_id: String,
    pub records: usize,
    pub detections: usize,
    /// Distinct categories present, sorted
    pub categories: Vec<String>,
    /// True when the merge carried conflicting strong identifiers
    pub ambiguous: bool,
}

/// Before/after view of one transformation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformSample {
    pub record_id: String,
    pub field_name: String,
    pub category: String,
    pub original: String,
    pub transformed: String,
    pub method: String,
}

/// Aggregated view of one batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: String,
    pub total_records: usize,
    pub logged: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub total_detections: usize,
    pub total_clusters: usize,
    /// Mean cluster size; 0.0 for an empty batch
    pub avg_detections_per_cluster: f64,
    pub detections_per_category: BTreeMap<String, usize>,
    pub detections_per_tier: BTreeMap<String, usize>,
    /// Cluster size (member detections) to number of clusters of that size
    pub cluster_size_distribution: BTreeMap<usize, usize>,
    pub clusters: Vec<ClusterSummary>,
    pub samples: Vec<TransformSample>,
}

impl BatchReport {
    pub fn from_output(output: &BatchOutput) -> Self {
        let mut detections_per_category: BTreeMap<String, usize> = BTreeMap::new();
        let mut detections_per_tier: BTreeMap<String, usize> = BTreeMap::new();
        let mut originals: BTreeMap<(&str, &str, usize), &Detection> = BTreeMap::new();
        for classification in &output.classifications {
            let detection = &classification.detection;
            *detections_per_category
                .entry(detection.category.to_string())
                .or_default() += 1;
            *detections_per_tier
                .entry(classification.tier.to_string())
                .or_default() += 1;
            originals.insert(
                (
                    detection.record_id.as_str(),
                    detection.field_name.as_str(),
                    detection.span.start,
                ),
                detection,
            );
        }

        let ambiguous: std::collections::BTreeSet<&str> = output
            .ambiguities
            .iter()
            .map(|a| a.cluster_id.as_str())
            .collect();

        let mut cluster_size_distribution: BTreeMap<usize, usize> = BTreeMap::new();
        let mut clusters = Vec::with_capacity(output.clusters.len());
        for cluster in &output.clusters {
            *cluster_size_distribution
                .entry(cluster.members.len())
                .or_default() += 1;
            let mut categories: Vec<String> = cluster
                .members
                .iter()
                .map(|m| m.detection.category.to_string())
                .collect();
            categories.sort();
            categories.dedup();
            clusters.push(ClusterSummary {
                cluster_id: cluster.cluster_id.clone(),
                records: cluster.record_ids().len(),
                detections: cluster.members.len(),
                categories,
                ambiguous: ambiguous.contains(cluster.cluster_id.as_str()),
            });
        }

        let samples = output
            .results
            .iter()
            .take(SAMPLE_LIMIT)
            .filter_map(|result| {
                let detection = originals.get(&(
                    result.detection.record_id.as_str(),
                    result.detection.field_name.as_str(),
                    result.detection.span.start,
                ))?;
                Some(TransformSample {
                    record_id: result.detection.record_id.clone(),
                    field_name: result.detection.field_name.clone(),
                    category: detection.category.to_string(),
                    original: detection.value.clone(),
                    transformed: result.transformed_value.clone(),
                    method: result.method.to_string(),
                })
            })
            .collect();

        let total_detections = output.classifications.len();
        let total_clusters = output.clusters.len();
        let avg_detections_per_cluster = if total_clusters == 0 {
            0.0
        } else {
            total_detections as f64 / total_clusters as f64
        };

        Self {
            batch_id: output.summary.batch_id.clone(),
            total_records: output.summary.total_records,
            logged: output.summary.logged,
            failed: output.summary.failed,
            cancelled: output.summary.cancelled,
            total_detections,
            total_clusters,
            avg_detections_per_cluster,
            detections_per_category,
            detections_per_tier,
            cluster_size_distribution,
            clusters,
            samples,
        }
    }

    /// Plain-text rendering for terminal output
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("batch {}\n", self.batch_id));
        out.push_str(&format!(
            "records: {} total, {} logged, {} failed{}\n",
            self.total_records,
            self.logged,
            self.failed,
            if self.cancelled { " (cancelled)" } else { "" }
        ));

        out.push_str("\ndetections by category:\n");
        for (category, count) in &self.detections_per_category {
            out.push_str(&format!("  {category:<18} {count}\n"));
        }

        out.push_str("\ndetections by tier:\n");
        for (tier, count) in &self.detections_per_tier {
            out.push_str(&format!("  {tier:<18} {count}\n"));
        }

        out.push_str(&format!(
            "\nclusters: {} ({} detections, {:.1} per cluster)\n",
            self.total_clusters, self.total_detections, self.avg_detections_per_cluster
        ));
        for (size, count) in &self.cluster_size_distribution {
            out.push_str(&format!("  {count} cluster(s) of {size} detection(s)\n"));
        }
        for cluster in &self.clusters {
            out.push_str(&format!(
                "  {} records={} detections={} [{}]\n",
                cluster.cluster_id,
                cluster.records,
                cluster.detections,
                cluster.categories.join(", ")
            ));
        }

        if !self.samples.is_empty() {
            out.push_str("\nsamples:\n");
            for sample in &self.samples {
                out.push_str(&format!(
                    "  {}/{} {} {:?} -> {:?} ({})\n",
                    sample.record_id,
                    sample.field_name,
                    sample.category,
                    sample.original,
                    sample.transformed,
                    sample.method
                ));
            }
        }

        out
    }
}
