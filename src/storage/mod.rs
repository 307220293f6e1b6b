//! Relational records: tickets, reviewers, HITL tasks and corrections, and
//! per-classification metrics.
//!
//! These are the ordinary CRUD rows the learning loop reads and writes. The
//! metric table is append-only except for the nullable `was_correct` flag,
//! which HITL review back-fills.

mod schema;
mod store;
mod types;

pub use schema::{initialize_schema, is_initialized, SCHEMA_VERSION};
pub use store::RecordStore;
pub use types::{
    CorrectionSubmission, HitlCorrection, HitlPriority, HitlStatus, HitlTask, MetricRecord,
    Reviewer, SimilarTicketRef, TicketPriority, TicketRecord, TicketStatus,
};
