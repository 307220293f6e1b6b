//! Batch classification with a bounded worker pool and streaming events.
//!
//! Submissions of 1-1000 tickets are queued and processed by background
//! workers; subscribers follow per-batch progress over bounded channels, and
//! completion can trigger a fire-and-forget webhook callback.

mod processor;
mod types;

pub use processor::BatchProcessor;
pub use types::{
    BatchEvent, BatchJob, BatchStatus, BatchStatusReport, BatchSummary, ConfidenceComponents,
};
