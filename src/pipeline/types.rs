//! Request, analysis, and outcome types for the classification pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::confidence::EnsembleResult;
use crate::error::{Error, Result};
use crate::graph::{CandidatePath, CategoryPath};
use crate::storage::TicketPriority;
use crate::vector::SearchMatch;

/// Maximum accepted title length.
pub const MAX_TITLE_LEN: usize = 500;

/// A classification request for one ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifyRequest {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub priority: TicketPriority,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
    /// Opaque pass-through bag; never interpreted by the pipeline.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl ClassifyRequest {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            priority: TicketPriority::default(),
            source: None,
            customer_id: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: TicketPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Boundary validation; invalid requests never reach the pipeline.
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::validation("title must not be empty"));
        }
        if self.title.len() > MAX_TITLE_LEN {
            return Err(Error::validation(format!(
                "title exceeds {} characters",
                MAX_TITLE_LEN
            )));
        }
        if self.description.trim().is_empty() {
            return Err(Error::validation("description must not be empty"));
        }
        Ok(())
    }

    /// Title and description joined for embedding and keyword extraction.
    pub fn combined_text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }
}

/// Graph component output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphAnalysis {
    pub paths: Vec<CandidatePath>,
    pub prediction: Option<CategoryPath>,
    pub confidence: f64,
}

/// Vector component output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorAnalysis {
    pub matches: Vec<SearchMatch>,
    pub prediction: Option<CategoryPath>,
    pub confidence: f64,
}

/// LLM component output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmAnalysis {
    pub prediction: Option<CategoryPath>,
    pub confidence: f64,
    pub reasoning: String,
}

/// Terminal routing outcome for a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingOutcome {
    /// Accepted without human review.
    AutoResolve,
    /// Routed to the HITL review queue.
    Review,
    /// Very low confidence; needs attention above routine review.
    Escalate,
}

/// The routing decision with its triggering reasons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub outcome: RoutingOutcome,
    pub requires_hitl: bool,
    pub auto_resolved: bool,
    /// Semicolon-joined list of triggered conditions; absent on auto-resolve.
    pub hitl_reason: Option<String>,
}

impl RoutingDecision {
    pub fn auto_resolve() -> Self {
        Self {
            outcome: RoutingOutcome::AutoResolve,
            requires_hitl: false,
            auto_resolved: true,
            hitl_reason: None,
        }
    }

    pub fn review(reason: impl Into<String>) -> Self {
        Self {
            outcome: RoutingOutcome::Review,
            requires_hitl: true,
            auto_resolved: false,
            hitl_reason: Some(reason.into()),
        }
    }

    pub fn escalate(reason: impl Into<String>) -> Self {
        Self {
            outcome: RoutingOutcome::Escalate,
            requires_hitl: true,
            auto_resolved: false,
            hitl_reason: Some(reason.into()),
        }
    }
}

/// The final assigned category with its calibrated confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalClassification {
    pub level1: String,
    pub level2: String,
    pub level3: String,
    pub confidence: f64,
}

impl FinalClassification {
    pub fn path(&self) -> CategoryPath {
        CategoryPath::new(&self.level1, &self.level2, &self.level3)
    }
}

/// Processing metadata for one classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingInfo {
    pub time_ms: u64,
    pub errors: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Complete result of classifying one ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationOutcome {
    pub ticket_id: Uuid,
    pub classification: FinalClassification,
    pub confidence: EnsembleResult,
    pub graph_analysis: GraphAnalysis,
    pub vector_analysis: VectorAnalysis,
    pub llm_analysis: LlmAnalysis,
    pub routing: RoutingDecision,
    pub processing: ProcessingInfo,
}
