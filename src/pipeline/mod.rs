//! The six-step classification pipeline.
//!
//! Orchestrates keyword extraction, graph traversal, vector search, LLM
//! judgment, ensemble fusion, and threshold routing for one ticket, then
//! persists the side effects (embedding, graph link, ticket row, metric row,
//! and a HITL task when review is required).
//!
//! ## Example
//!
//! ```rust,ignore
//! use triage_core::pipeline::{ClassificationPipeline, ClassifyRequest};
//!
//! let pipeline = ClassificationPipeline::new(graph, vectors, records, llm, config)?;
//! let outcome = pipeline.classify(ClassifyRequest::new(
//!     "Cannot access email after password reset",
//!     "User reports being unable to login after resetting password yesterday.",
//! )).await?;
//!
//! if outcome.routing.auto_resolved {
//!     println!("{} ({:.2})", outcome.classification.level3, outcome.classification.confidence);
//! }
//! ```

mod engine;
mod types;

pub use engine::ClassificationPipeline;
pub use types::{
    ClassificationOutcome, ClassifyRequest, FinalClassification, GraphAnalysis, LlmAnalysis,
    ProcessingInfo, RoutingDecision, RoutingOutcome, VectorAnalysis, MAX_TITLE_LEN,
};
