//! Batch pipeline orchestrator
//!
//! Drives records through detect → classify → link → transform with audit
//! entries from every stage. Detection and classification run concurrently
//! per record; the batch barrier then hands an immutable classification
//! snapshot to the single-threaded graph builder; transformation runs one
//! task per cluster (clusters are disjoint by invariant, so no cross-cluster
//! synchronization is needed).
//!
//! A failing record is audited, excluded from linking and never aborts the
//! batch. The one fatal condition is a ledger write failure: no unaudited
//! transformation may exist, so the orchestrator halts rather than continue
//! unlogged.

use crate::classify::{Classification, Classifier, SensitivityTier};
use crate::config::NordGuardConfig;
use crate::detect::Detector;
use crate::error::{Error, Result};
use crate::ledger::{AuditLedger, AuditOutcome, PipelineStage};
use crate::link::{IdentityCluster, IdentityGraphBuilder, LinkAmbiguity};
use crate::pipeline::RecordState;
use crate::record::{Record, RecordSource};
use crate::store::PersistentStore;
use crate::transform::{TransformEngine, TransformationResult};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Terminal-state counts reported for every batch. No record is ever
/// silently dropped: `total == logged + failed + unfinished`.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub batch_id: String,
    pub total_records: usize,
    pub logged: usize,
    pub failed: usize,
    /// Records left mid-pipeline by a cancellation
    pub unfinished: usize,
    pub clusters: usize,
    pub detections: usize,
    pub transformations: usize,
    pub cancelled: bool,
}

/// Everything a completed (or cancelled) batch run produced
#[derive(Debug)]
pub struct BatchOutput {
    pub summary: BatchSummary,
    pub states: BTreeMap<String, RecordState>,
    pub classifications: Vec<Classification>,
    pub clusters: Vec<IdentityCluster>,
    pub ambiguities: Vec<LinkAmbiguity>,
    pub results: Vec<TransformationResult>,
}

struct StageOutput {
    record_id: String,
    classifications: Vec<Classification>,
    failure: Option<String>,
}

/// Pipeline orchestrator
pub struct Pipeline {
    detector: Arc<Detector>,
    classifier: Classifier,
    builder: IdentityGraphBuilder,
    engine: Arc<TransformEngine>,
    ledger: Arc<AuditLedger>,
    store: Arc<dyn PersistentStore>,
}

impl Pipeline {
    /// Build a pipeline from configuration. Fails if the detector's pattern
    /// set does not compile.
    pub fn new(
        config: &NordGuardConfig,
        ledger: Arc<AuditLedger>,
        store: Arc<dyn PersistentStore>,
    ) -> Result<Self> {
        Ok(Self {
            detector: Arc::new(Detector::new(config.detector.rules.clone())?),
            classifier: Classifier::new(),
            builder: IdentityGraphBuilder::new(config.linker.clone()),
            engine: Arc::new(TransformEngine::new(config.transform.clone())),
            ledger,
            store,
        })
    }

    /// Run one batch to completion
    pub async fn run(&self, records: Vec<Record>) -> Result<BatchOutput> {
        self.run_with_cancel(records, &CancellationToken::new())
            .await
    }

    /// Pull every record from a source and run them as one batch
    pub async fn run_source(
        &self,
        source: &dyn RecordSource,
        cancel: &CancellationToken,
    ) -> Result<BatchOutput> {
        let records = source.records().await?;
        self.run_with_cancel(records, cancel).await
    }

    /// Run one batch, stopping at the next stage boundary once `cancel`
    /// fires. Work already committed stays audited; the batch is marked
    /// incomplete in the ledger.
    pub async fn run_with_cancel(
        &self,
        records: Vec<Record>,
        cancel: &CancellationToken,
    ) -> Result<BatchOutput> {
        let batch_id = format!("batch-{}", uuid::Uuid::new_v4());
        let applied_at = Utc::now();
        let total_records = records.len();
        tracing::info!(%batch_id, records = total_records, "batch started");

        self.ledger
            .append(
                PipelineStage::Batch,
                batch_id.clone(),
                format!("start records={total_records}"),
                AuditOutcome::Ok,
            )
            .await?;

        let mut states: BTreeMap<String, RecordState> = BTreeMap::new();

        // Stage 1+2: detect and classify, concurrently per record
        let mut handles = Vec::with_capacity(records.len());
        for record in records {
            let detector = Arc::clone(&self.detector);
            let classifier = self.classifier;
            let ledger = Arc::clone(&self.ledger);
            handles.push(tokio::spawn(async move {
                detect_and_classify(record, detector, classifier, ledger).await
            }));
        }

        // Batch barrier: linking needs every record Classified or Failed
        let mut classifications: Vec<Classification> = Vec::new();
        for handle in futures::future::join_all(handles).await {
            let output = handle.map_err(|e| Error::Internal(format!("stage task: {e}")))??;
            match output.failure {
                Some(reason) => {
                    states.insert(
                        output.record_id,
                        RecordState::Failed {
                            stage: PipelineStage::Ingest,
                            reason,
                        },
                    );
                }
                None => {
                    states.insert(output.record_id, RecordState::Classified);
                    classifications.extend(output.classifications);
                }
            }
        }

        for classification in &classifications {
            self.store.append_classification(classification).await?;
        }

        if cancel.is_cancelled() {
            return self
                .finish_cancelled(
                    batch_id,
                    states,
                    classifications,
                    Vec::new(),
                    Vec::new(),
                    Vec::new(),
                )
                .await;
        }

        // Stage 3: single-threaded linking over the frozen snapshot
        let outcome = self.builder.build(&classifications)?;
        for cluster in &outcome.clusters {
            self.ledger
                .append(
                    PipelineStage::Link,
                    cluster.cluster_id.clone(),
                    format!("cluster members={}", cluster.members.len()),
                    AuditOutcome::Ok,
                )
                .await?;
        }
        for ambiguity in &outcome.ambiguities {
            self.ledger
                .append(
                    PipelineStage::Link,
                    ambiguity.cluster_id.clone(),
                    format!(
                        "merged on conflicting {:?} values: {}",
                        ambiguity.kind,
                        ambiguity.values.join(", ")
                    ),
                    AuditOutcome::LinkAmbiguity,
                )
                .await?;
        }
        for state in states.values_mut() {
            if *state == RecordState::Classified {
                *state = RecordState::Linked;
            }
        }

        if cancel.is_cancelled() {
            return self
                .finish_cancelled(
                    batch_id,
                    states,
                    classifications,
                    outcome.clusters,
                    outcome.ambiguities,
                    Vec::new(),
                )
                .await;
        }

        // Stage 4: one transform task per cluster
        let mut transform_handles = Vec::with_capacity(outcome.clusters.len());
        for cluster in &outcome.clusters {
            let engine = Arc::clone(&self.engine);
            let ledger = Arc::clone(&self.ledger);
            let cluster = cluster.clone();
            transform_handles.push(tokio::spawn(async move {
                transform_cluster(cluster, engine, ledger, applied_at).await
            }));
        }

        let mut results: Vec<TransformationResult> = Vec::new();
        for handle in futures::future::join_all(transform_handles).await {
            let cluster_outcome =
                handle.map_err(|e| Error::Internal(format!("transform task: {e}")))??;
            match cluster_outcome {
                Ok(cluster_results) => {
                    for result in &cluster_results {
                        self.store.append_result(result).await?;
                    }
                    results.extend(cluster_results);
                }
                Err((record_ids, reason)) => {
                    for record_id in record_ids {
                        states.insert(
                            record_id,
                            RecordState::Failed {
                                stage: PipelineStage::Transform,
                                reason: reason.clone(),
                            },
                        );
                    }
                }
            }
        }
        results.sort_by(|a, b| {
            (
                &a.detection.record_id,
                &a.detection.field_name,
                a.detection.span.start,
            )
                .cmp(&(
                    &b.detection.record_id,
                    &b.detection.field_name,
                    b.detection.span.start,
                ))
        });

        // Stage 5: close out surviving records
        for (record_id, state) in states.iter_mut() {
            if *state == RecordState::Linked {
                self.ledger
                    .append(
                        PipelineStage::Batch,
                        record_id.clone(),
                        "record complete",
                        AuditOutcome::Ok,
                    )
                    .await?;
                *state = RecordState::Logged;
            }
        }

        let summary = summarize(
            &batch_id,
            total_records,
            &states,
            &outcome.clusters,
            &classifications,
            &results,
            false,
        );
        self.ledger
            .append(
                PipelineStage::Batch,
                batch_id.clone(),
                format!(
                    "complete logged={} failed={} clusters={}",
                    summary.logged, summary.failed, summary.clusters
                ),
                AuditOutcome::Ok,
            )
            .await?;
        tracing::info!(
            %batch_id,
            logged = summary.logged,
            failed = summary.failed,
            clusters = summary.clusters,
            "batch complete"
        );

        Ok(BatchOutput {
            summary,
            states,
            classifications,
            clusters: outcome.clusters,
            ambiguities: outcome.ambiguities,
            results,
        })
    }

    /// Cancellation path: committed work is already in the ledger (appends
    /// are write-through); just mark the batch incomplete.
    async fn finish_cancelled(
        &self,
        batch_id: String,
        states: BTreeMap<String, RecordState>,
        classifications: Vec<Classification>,
        clusters: Vec<IdentityCluster>,
        ambiguities: Vec<LinkAmbiguity>,
        results: Vec<TransformationResult>,
    ) -> Result<BatchOutput> {
        self.ledger
            .append(
                PipelineStage::Batch,
                batch_id.clone(),
                "cancelled",
                AuditOutcome::Incomplete,
            )
            .await?;
        tracing::warn!(%batch_id, "batch cancelled");

        let total = states.len();
        let summary = summarize(
            &batch_id,
            total,
            &states,
            &clusters,
            &classifications,
            &results,
            true,
        );
        Ok(BatchOutput {
            summary,
            states,
            classifications,
            clusters,
            ambiguities,
            results,
        })
    }
}

async fn detect_and_classify(
    record: Record,
    detector: Arc<Detector>,
    classifier: Classifier,
    ledger: Arc<AuditLedger>,
) -> Result<StageOutput> {
    // A record without an id (or without fields) cannot be referenced by any
    // downstream artifact; fail it at ingest and keep the batch going
    if record.id.is_empty() || record.field_count() == 0 {
        let reason = if record.id.is_empty() {
            "record has no id".to_string()
        } else {
            "record has no fields".to_string()
        };
        ledger
            .append(
                PipelineStage::Ingest,
                record.id.clone(),
                reason.clone(),
                AuditOutcome::Failed,
            )
            .await?;
        tracing::warn!(record_id = %record.id, %reason, "record failed at ingest");
        return Ok(StageOutput {
            record_id: record.id,
            classifications: Vec::new(),
            failure: Some(reason),
        });
    }

    let detections = detector.detect(&record);
    for detection in &detections {
        ledger
            .append(
                PipelineStage::Detect,
                detection.reference(),
                format!(
                    "category={} confidence={:.2}",
                    detection.category, detection.confidence
                ),
                AuditOutcome::Ok,
            )
            .await?;
    }

    let mut classifications = Vec::with_capacity(detections.len());
    for detection in detections {
        match classifier.classify(detection.clone()) {
            Ok(classification) => {
                ledger
                    .append(
                        PipelineStage::Classify,
                        classification.detection.reference(),
                        format!("tier={}", classification.tier),
                        AuditOutcome::Ok,
                    )
                    .await?;
                classifications.push(classification);
            }
            Err(Error::UnclassifiedCategory(name)) => {
                // Retain with unknown tier rather than drop: no data loss
                tracing::warn!(
                    record_id = %record.id,
                    category = %name,
                    "category outside taxonomy, retained unlinked"
                );
                ledger
                    .append(
                        PipelineStage::Classify,
                        detection.reference(),
                        format!("category={name} outside taxonomy, tier=unknown"),
                        AuditOutcome::Recovered,
                    )
                    .await?;
                classifications.push(Classification {
                    detection,
                    tier: SensitivityTier::Unknown,
                });
            }
            Err(e) => return Err(e),
        }
    }

    Ok(StageOutput {
        record_id: record.id,
        classifications,
        failure: None,
    })
}

type ClusterTransformResult = std::result::Result<Vec<TransformationResult>, (Vec<String>, String)>;

async fn transform_cluster(
    cluster: IdentityCluster,
    engine: Arc<TransformEngine>,
    ledger: Arc<AuditLedger>,
    applied_at: DateTime<Utc>,
) -> Result<ClusterTransformResult> {
    match engine.transform(&cluster, applied_at) {
        Ok(results) => {
            for result in &results {
                ledger
                    .append(
                        PipelineStage::Transform,
                        format!(
                            "{}/{}:{}-{}",
                            result.detection.record_id,
                            result.detection.field_name,
                            result.detection.span.start,
                            result.detection.span.end
                        ),
                        format!("method={} cluster={}", result.method, result.cluster_id),
                        AuditOutcome::Ok,
                    )
                    .await?;
            }
            Ok(Ok(results))
        }
        Err(Error::PolicyViolation(reason)) => {
            ledger
                .append(
                    PipelineStage::Transform,
                    cluster.cluster_id.clone(),
                    reason.clone(),
                    AuditOutcome::Failed,
                )
                .await?;
            tracing::warn!(
                cluster_id = %cluster.cluster_id,
                %reason,
                "cluster transformation failed"
            );
            let record_ids = cluster
                .record_ids()
                .into_iter()
                .map(String::from)
                .collect();
            Ok(Err((record_ids, reason)))
        }
        Err(e) => Err(e),
    }
}

fn summarize(
    batch_id: &str,
    total_records: usize,
    states: &BTreeMap<String, RecordState>,
    clusters: &[IdentityCluster],
    classifications: &[Classification],
    results: &[TransformationResult],
    cancelled: bool,
) -> BatchSummary {
    let logged = states
        .values()
        .filter(|s| **s == RecordState::Logged)
        .count();
    let failed = states.values().filter(|s| s.is_failed()).count();
    BatchSummary {
        batch_id: batch_id.to_string(),
        total_records,
        logged,
        failed,
        unfinished: total_records - logged - failed,
        clusters: clusters.len(),
        detections: classifications.len(),
        transformations: results.len(),
        cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransformConfig;
    use crate::ledger::AuditSink;
    use crate::store::MemoryStore;
    use crate::transform::TransformPolicy;
    use async_trait::async_trait;

    fn pipeline() -> Pipeline {
        let config = NordGuardConfig::default();
        Pipeline::new(
            &config,
            Arc::new(AuditLedger::new()),
            Arc::new(MemoryStore::new()),
        )
        .unwrap()
    }

    fn person_record(id: &str, email: &str) -> Record {
        Record::new(id)
            .with_field("contact", format!("reach me at {email}"))
            .with_field("note", "no identifiers here")
    }

    #[tokio::test]
    async fn test_end_to_end_links_shared_email() {
        let pipeline = pipeline();
        let records = vec![
            Record::new("r-1")
                .with_field("contact", "jon.doe@example.com")
                .with_field("name", "Jon Doe"),
            Record::new("r-2").with_field("email", "Jon.Doe@Example.com"),
        ];

        let output = pipeline.run(records).await.unwrap();

        assert_eq!(output.summary.logged, 2);
        assert_eq!(output.summary.failed, 0);
        assert!(!output.summary.cancelled);

        let linked: Vec<&IdentityCluster> = output
            .clusters
            .iter()
            .filter(|c| c.record_ids().len() == 2)
            .collect();
        assert_eq!(linked.len(), 1, "both records share one email identity");

        // Same canonical email gets the same replacement in both records
        let values: std::collections::HashSet<&str> = output
            .results
            .iter()
            .filter(|r| matches!(r.detection.field_name.as_str(), "contact" | "email"))
            .map(|r| r.transformed_value.as_str())
            .collect();
        assert_eq!(values.len(), 1, "cluster-consistent pseudonym");
    }

    #[tokio::test]
    async fn test_malformed_record_does_not_abort_batch() {
        let pipeline = pipeline();
        let mut records: Vec<Record> = (0..99)
            .map(|i| person_record(&format!("r-{i}"), &format!("user{i}@example.com")))
            .collect();
        records.push(Record::new("").with_field("contact", "x@example.com"));

        let output = pipeline.run(records).await.unwrap();

        assert_eq!(output.summary.total_records, 100);
        assert_eq!(output.summary.logged, 99);
        assert_eq!(output.summary.failed, 1);
        assert!(matches!(
            output.states.get(""),
            Some(RecordState::Failed {
                stage: PipelineStage::Ingest,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_retain_on_special_fails_cluster_not_batch() {
        let ledger = Arc::new(AuditLedger::new());
        let mut config = NordGuardConfig::default();
        config.transform = TransformConfig {
            default_policy: TransformPolicy::Retain,
            special_policy: TransformPolicy::Retain,
            ..TransformConfig::default()
        };
        let pipeline = Pipeline::new(&config, Arc::clone(&ledger), Arc::new(MemoryStore::new()))
            .unwrap();

        let records = vec![
            Record::new("r-sick").with_field("diagnosis", "E11.9"),
            person_record("r-clean", "clean@example.com"),
        ];
        let output = pipeline.run(records).await.unwrap();

        assert_eq!(output.summary.logged, 1);
        assert_eq!(output.summary.failed, 1);
        assert!(matches!(
            output.states.get("r-sick"),
            Some(RecordState::Failed {
                stage: PipelineStage::Transform,
                ..
            })
        ));
        assert_eq!(output.states.get("r-clean"), Some(&RecordState::Logged));

        let failed = ledger
            .entries()
            .await
            .iter()
            .filter(|e| e.stage == PipelineStage::Transform && e.outcome == AuditOutcome::Failed)
            .count();
        assert_eq!(failed, 1, "one audited transform failure");
    }

    /// Accepts entries until the transform stage is reached, standing in for
    /// a disk that fills up mid-run
    struct TransformRejectingSink;

    #[async_trait]
    impl AuditSink for TransformRejectingSink {
        async fn write_line(&mut self, line: &[u8]) -> Result<()> {
            let text = std::str::from_utf8(line).unwrap();
            if text.contains("\"stage\":\"transform\"") {
                return Err(Error::LedgerWrite("no space left on device".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_ledger_write_failure_halts_batch() {
        let ledger = Arc::new(AuditLedger::from_sink(Box::new(TransformRejectingSink)));
        let store = Arc::new(MemoryStore::new());
        let config = NordGuardConfig::default();
        let pipeline = Pipeline::new(
            &config,
            Arc::clone(&ledger),
            Arc::clone(&store) as Arc<dyn PersistentStore>,
        )
        .unwrap();

        let records = vec![person_record("r-1", "a@example.com")];
        let err = pipeline.run(records).await.unwrap_err();
        assert!(matches!(err, Error::LedgerWrite(_)));

        // Nothing may be persisted past the failed audit write
        assert!(store.results().await.is_empty());
        let entries = ledger.entries().await;
        assert!(!entries.is_empty(), "pre-transform stages were audited");
        assert!(entries.iter().all(|e| e.stage != PipelineStage::Transform));
    }

    #[tokio::test]
    async fn test_ledger_is_gap_free_across_a_run() {
        let ledger = Arc::new(AuditLedger::new());
        let config = NordGuardConfig::default();
        let pipeline = Pipeline::new(&config, Arc::clone(&ledger), Arc::new(MemoryStore::new()))
            .unwrap();

        let records: Vec<Record> = (0..20)
            .map(|i| person_record(&format!("r-{i}"), &format!("user{i}@example.com")))
            .collect();
        pipeline.run(records).await.unwrap();

        let entries = ledger.entries().await;
        assert!(!entries.is_empty());
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.sequence_no, i as u64);
        }
        let last = entries.last().unwrap();
        assert_eq!(last.stage, PipelineStage::Batch);
        assert!(last.action.starts_with("complete"));
    }

    #[tokio::test]
    async fn test_cancellation_marks_batch_incomplete() {
        let ledger = Arc::new(AuditLedger::new());
        let config = NordGuardConfig::default();
        let pipeline = Pipeline::new(&config, Arc::clone(&ledger), Arc::new(MemoryStore::new()))
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let records = vec![person_record("r-1", "a@example.com")];
        let output = pipeline.run_with_cancel(records, &cancel).await.unwrap();

        assert!(output.summary.cancelled);
        assert_eq!(output.summary.logged, 0);
        assert_eq!(output.summary.unfinished, 1);
        assert!(output.results.is_empty());

        let last = ledger.entries().await.into_iter().last().unwrap();
        assert_eq!(last.outcome, AuditOutcome::Incomplete);
        assert_eq!(last.stage, PipelineStage::Batch);
    }

    #[tokio::test]
    async fn test_empty_batch_completes() {
        let pipeline = pipeline();
        let output = pipeline.run(Vec::new()).await.unwrap();
        assert_eq!(output.summary.total_records, 0);
        assert_eq!(output.summary.logged, 0);
        assert!(output.clusters.is_empty());
    }
}
