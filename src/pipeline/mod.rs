//! Batch orchestration: record state machine and the pipeline runner

mod orchestrator;
mod state;

pub use orchestrator::{BatchOutput, BatchSummary, Pipeline};
pub use state::RecordState;
