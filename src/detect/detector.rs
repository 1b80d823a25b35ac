//! Pattern-driven PII detector

use crate::detect::patterns::DetectionRule;
use crate::detect::{Detection, PiiCategory, Span};
use crate::error::{Error, Result};
use crate::record::Record;
use regex::Regex;

/// PII detector over a compiled pattern set
pub struct Detector {
    rules: Vec<CompiledRule>,
}

struct CompiledRule {
    name: String,
    category: PiiCategory,
    pattern: Regex,
    confidence: f64,
}

impl Detector {
    /// Compile a rule set into a detector.
    ///
    /// An invalid pattern fails construction; a rule set is configuration and
    /// a bad rule should be caught before any record is scanned.
    pub fn new(rules: Vec<DetectionRule>) -> Result<Self> {
        let compiled = rules
            .into_iter()
            .map(|rule| {
                let pattern = Regex::new(&rule.pattern).map_err(|e| {
                    Error::Pattern(format!("invalid pattern for rule '{}': {}", rule.name, e))
                })?;
                Ok(CompiledRule {
                    name: rule.name,
                    category: PiiCategory::from(rule.category),
                    pattern,
                    confidence: rule.confidence.clamp(0.0, 1.0),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { rules: compiled })
    }

    /// Scan one record and return every match across all fields.
    ///
    /// Pure function: no side effects, never fails. A field that no rule
    /// matches simply contributes no detections. Matches of a single rule are
    /// non-overlapping (leftmost-first, as `find_iter` yields them); different
    /// rules may overlap.
    pub fn detect(&self, record: &Record) -> Vec<Detection> {
        let mut detections = Vec::new();

        for (field_name, value) in record.fields() {
            for rule in &self.rules {
                for mat in rule.pattern.find_iter(value) {
                    detections.push(Detection {
                        record_id: record.id.clone(),
                        field_name: field_name.to_string(),
                        category: rule.category.clone(),
                        confidence: rule.confidence,
                        span: Span {
                            start: mat.start(),
                            end: mat.end(),
                        },
                        value: mat.as_str().to_string(),
                    });
                }
            }
        }

        detections.sort_by(|a, b| {
            (&a.field_name, a.span.start, &a.category).cmp(&(&b.field_name, b.span.start, &b.category))
        });
        detections
    }

    /// Rule names, in configuration order
    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name.as_str()).collect()
    }
}
