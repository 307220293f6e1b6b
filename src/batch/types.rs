//! Types for batch submissions, job lifecycle, and the event stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::{ClassifyRequest, FinalClassification, RoutingDecision};

/// Status of a batch processing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal states cannot transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A batch job held in the in-memory registry.
///
/// Ticket payloads live only here; once the registry entry is dropped the
/// batch cannot be replayed (re-submission is the transport layer's job).
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub batch_id: String,
    pub tickets: Vec<ClassifyRequest>,
    pub callback_url: Option<String>,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Integer percentage, 0-100.
    pub progress: u8,
    pub result: Option<BatchSummary>,
    pub error: Option<String>,
}

impl BatchJob {
    pub fn new(
        batch_id: String,
        tickets: Vec<ClassifyRequest>,
        callback_url: Option<String>,
    ) -> Self {
        Self {
            batch_id,
            tickets,
            callback_url,
            status: BatchStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            progress: 0,
            result: None,
            error: None,
        }
    }
}

/// Aggregate result of a finished batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub total_tickets: usize,
    pub successful: usize,
    pub failed: usize,
    pub auto_resolved: usize,
    pub requires_hitl: usize,
    pub processing_time_ms: u64,
}

/// A status snapshot for polling clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStatusReport {
    pub batch_id: String,
    pub status: BatchStatus,
    pub ticket_count: usize,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl BatchStatusReport {
    pub fn from_job(job: &BatchJob) -> Self {
        Self {
            batch_id: job.batch_id.clone(),
            status: job.status,
            ticket_count: job.tickets.len(),
            progress: job.progress,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            error: job.error.clone(),
        }
    }
}

/// Per-ticket confidence components carried in stream events.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceComponents {
    pub graph: f64,
    pub vector: f64,
    pub llm: f64,
    #[serde(rename = "final")]
    pub final_score: f64,
}

/// Events streamed to batch subscribers, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    BatchStarted {
        batch_id: String,
        total_tickets: usize,
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
    TicketProcessing {
        batch_id: String,
        /// 1-based submission index.
        ticket_index: usize,
        total: usize,
        title: String,
        timestamp: DateTime<Utc>,
    },
    TicketClassified {
        batch_id: String,
        ticket_index: usize,
        total: usize,
        progress: u8,
        title: String,
        classification: FinalClassification,
        confidence: ConfidenceComponents,
        routing: RoutingDecision,
        processing_ms: u64,
        auto_resolved_so_far: usize,
        hitl_so_far: usize,
        timestamp: DateTime<Utc>,
    },
    TicketFailed {
        batch_id: String,
        ticket_index: usize,
        total: usize,
        error: String,
        timestamp: DateTime<Utc>,
    },
    BatchCompleted {
        batch_id: String,
        total_tickets: usize,
        auto_resolved: usize,
        requires_hitl: usize,
        failed: usize,
        processing_time_ms: u64,
        timestamp: DateTime<Utc>,
    },
    BatchFailed {
        batch_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// Keepalive for idle streams; transports emit these on a timer.
    Heartbeat {
        batch_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl BatchEvent {
    /// The batch this event belongs to.
    pub fn batch_id(&self) -> &str {
        match self {
            Self::BatchStarted { batch_id, .. }
            | Self::TicketProcessing { batch_id, .. }
            | Self::TicketClassified { batch_id, .. }
            | Self::TicketFailed { batch_id, .. }
            | Self::BatchCompleted { batch_id, .. }
            | Self::BatchFailed { batch_id, .. }
            | Self::Heartbeat { batch_id, .. } => batch_id,
        }
    }
}
