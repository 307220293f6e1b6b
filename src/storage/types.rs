//! Record types for tickets, HITL review, and classification metrics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::graph::CategoryPath;

/// Ticket priority levels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl TicketPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Ticket processing status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    #[default]
    New,
    Processing,
    Classified,
    Resolved,
    PendingReview,
    Escalated,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Processing => "processing",
            Self::Classified => "classified",
            Self::Resolved => "resolved",
            Self::PendingReview => "pending_review",
            Self::Escalated => "escalated",
            Self::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "processing" => Some(Self::Processing),
            "classified" => Some(Self::Classified),
            "resolved" => Some(Self::Resolved),
            "pending_review" => Some(Self::PendingReview),
            "escalated" => Some(Self::Escalated),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// A persisted ticket row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketRecord {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    pub source: Option<String>,
    pub customer_id: Option<String>,
    /// Opaque pass-through bag; never interpreted by the core.
    pub metadata: HashMap<String, Value>,

    pub level1: Option<String>,
    pub level2: Option<String>,
    pub level3: Option<String>,
    pub classification_confidence: Option<f64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub classified_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub processing_time_ms: Option<u64>,
}

impl TicketRecord {
    pub fn new(id: Uuid, title: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: title.into(),
            description: description.into(),
            priority: TicketPriority::default(),
            status: TicketStatus::default(),
            source: None,
            customer_id: None,
            metadata: HashMap::new(),
            level1: None,
            level2: None,
            level3: None,
            classification_confidence: None,
            created_at: now,
            updated_at: now,
            classified_at: None,
            resolved_at: None,
            processing_time_ms: None,
        }
    }

    /// The assigned path, present only when all three levels are set.
    pub fn category_path(&self) -> Option<CategoryPath> {
        match (&self.level1, &self.level2, &self.level3) {
            (Some(l1), Some(l2), Some(l3)) => Some(CategoryPath::new(l1, l2, l3)),
            _ => None,
        }
    }
}

/// Status of a HITL review task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitlStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Skipped,
    Escalated,
}

impl HitlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Escalated => "escalated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "skipped" => Some(Self::Skipped),
            "escalated" => Some(Self::Escalated),
            _ => None,
        }
    }
}

/// Priority of a HITL review task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitlPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl HitlPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }
}

/// A similar ticket snapshot attached to a task for reviewer context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarTicketRef {
    pub ticket_id: Uuid,
    pub category: String,
    pub similarity: f64,
}

/// A task requiring human review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitlTask {
    pub id: Uuid,
    pub ticket_id: Uuid,

    // Denormalized ticket info for quick display
    pub ticket_title: String,
    pub ticket_description: String,
    pub ticket_source: Option<String>,

    // AI classification under review
    pub ai_level1: String,
    pub ai_level2: String,
    pub ai_level3: String,
    pub ai_confidence: f64,

    pub routing_reason: String,
    /// Numeric confidence components for the reviewer UI.
    pub confidence_details: HashMap<String, f64>,

    pub status: HitlStatus,
    pub priority: HitlPriority,
    pub created_at: DateTime<Utc>,

    pub assigned_to: Option<Uuid>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub completed_by: Option<Uuid>,
    pub completed_at: Option<DateTime<Utc>>,
    pub review_time_seconds: Option<u64>,

    pub similar_tickets: Vec<SimilarTicketRef>,
}

impl HitlTask {
    pub fn new(
        ticket_id: Uuid,
        ticket_title: impl Into<String>,
        ticket_description: impl Into<String>,
        ai_path: &CategoryPath,
        ai_confidence: f64,
        routing_reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ticket_id,
            ticket_title: ticket_title.into(),
            ticket_description: ticket_description.into(),
            ticket_source: None,
            ai_level1: ai_path.level1.clone(),
            ai_level2: ai_path.level2.clone(),
            ai_level3: ai_path.level3.clone(),
            ai_confidence,
            routing_reason: routing_reason.into(),
            confidence_details: HashMap::new(),
            status: HitlStatus::default(),
            priority: HitlPriority::default(),
            created_at: Utc::now(),
            assigned_to: None,
            assigned_at: None,
            completed_by: None,
            completed_at: None,
            review_time_seconds: None,
            similar_tickets: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: HitlPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.ticket_source = Some(source.into());
        self
    }

    pub fn with_confidence_details(mut self, details: HashMap<String, f64>) -> Self {
        self.confidence_details = details;
        self
    }

    pub fn with_similar_tickets(mut self, similar: Vec<SimilarTicketRef>) -> Self {
        self.similar_tickets = similar;
        self
    }

    pub fn ai_path(&self) -> CategoryPath {
        CategoryPath::new(&self.ai_level1, &self.ai_level2, &self.ai_level3)
    }
}

/// A correction persisted after human review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitlCorrection {
    pub id: Uuid,
    pub task_id: Uuid,
    pub ticket_id: Uuid,
    pub reviewer_id: Uuid,

    pub original_level1: String,
    pub original_level2: String,
    pub original_level3: String,
    pub original_confidence: f64,

    pub corrected_level1: String,
    pub corrected_level2: String,
    pub corrected_level3: String,

    /// True iff all three levels match the AI's original classification.
    pub is_correct: bool,
    pub notes: Option<String>,

    pub submitted_at: DateTime<Utc>,
    pub review_time_seconds: u64,

    pub should_update_graph: bool,
    pub should_retrain_model: bool,
}

impl HitlCorrection {
    pub fn original_path(&self) -> CategoryPath {
        CategoryPath::new(
            &self.original_level1,
            &self.original_level2,
            &self.original_level3,
        )
    }

    pub fn corrected_path(&self) -> CategoryPath {
        CategoryPath::new(
            &self.corrected_level1,
            &self.corrected_level2,
            &self.corrected_level3,
        )
    }
}

/// Reviewer-submitted input for a correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionSubmission {
    pub task_id: Uuid,
    pub corrected_level1: String,
    pub corrected_level2: String,
    pub corrected_level3: String,
    pub notes: Option<String>,
    pub review_time_seconds: u64,
}

impl CorrectionSubmission {
    pub fn corrected_path(&self) -> CategoryPath {
        CategoryPath::new(
            &self.corrected_level1,
            &self.corrected_level2,
            &self.corrected_level3,
        )
    }
}

/// A human reviewer with activity counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reviewer {
    pub id: Uuid,
    pub name: String,
    pub reviews_completed: u64,
    pub corrections_made: u64,
    pub created_at: DateTime<Utc>,
}

/// Immutable per-classification metric snapshot.
///
/// `was_correct` is the single nullable field back-filled after HITL review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub timestamp: DateTime<Utc>,

    pub level1: String,
    pub level2: String,
    pub level3: String,

    pub graph_confidence: f64,
    pub vector_confidence: f64,
    pub llm_confidence: f64,
    pub final_confidence: f64,
    pub component_agreement: f64,

    pub auto_resolved: bool,
    pub requires_hitl: bool,
    pub processing_time_ms: u64,

    pub was_correct: Option<bool>,
}
