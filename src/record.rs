//! Record model and ingestion source contract
//!
//! A [`Record`] is an ordered mapping of field name to raw value, tagged with
//! a unique id. Records are immutable once ingested; every downstream artifact
//! (detections, classifications, transformation results) refers back to them
//! by `(record_id, field_name)`.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An ingested personal-data record.
///
/// Field order is preserved exactly as ingested, which is why fields are kept
/// as an insertion-ordered list rather than a map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Unique record identifier
    pub id: String,
    /// Ordered field-name → raw-value pairs
    fields: Vec<(String, String)>,
}

impl Record {
    /// Create an empty record with the given id
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Vec::new(),
        }
    }

    /// Add a field, preserving insertion order (builder style)
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    /// Look up a field value by name (first occurrence)
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Iterate fields in ingestion order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of fields
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

/// A finite, restartable source of records.
///
/// Arrival order carries no semantic meaning; all downstream tie-breaking is
/// done on `(record_id, field_name)`.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Yield the full record sequence from the beginning
    async fn records(&self) -> Result<Vec<Record>>;
}

/// In-memory record source used by tests and the CLI shell
pub struct MemorySource {
    records: Vec<Record>,
}

impl MemorySource {
    /// Create a source over a fixed record set
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    async fn records(&self) -> Result<Vec<Record>> {
        Ok(self.records.clone())
    }
}
