//! # triage-core
//!
//! An intelligent support-ticket classification engine. Each ticket is
//! classified into a three-level hierarchy by an ensemble of three
//! independent components (taxonomy-graph traversal, embedding similarity,
//! and LLM judgment), given a calibrated confidence score, and routed to
//! auto-resolve, human review, or escalation. Human corrections feed back
//! into graph edge weights, per-category accuracy, and optional
//! LLM-proposed taxonomy evolution.
//!
//! ## Core Components
//!
//! - **Graph**: Weighted 3-level taxonomy with ticket links and learned statistics
//! - **Vector**: Ticket embeddings with cosine-similarity search
//! - **Confidence**: Pure ensemble calculator with Platt and temperature calibration
//! - **Pipeline**: Six-step classification state machine with routing and side effects
//! - **Batch**: Bounded worker pool with streaming progress events
//! - **Learning**: HITL correction application and taxonomy evolution
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use triage_core::{
//!     ClassificationPipeline, ClassifyRequest, ClientConfig, EngineConfig,
//!     GraphStore, OpenAiClient, RecordStore, VectorStore,
//! };
//!
//! let config = EngineConfig::default();
//! let pipeline = ClassificationPipeline::new(
//!     Arc::new(GraphStore::open("graph.db")?),
//!     Arc::new(VectorStore::open("vectors.db", config.embedding_dim)?),
//!     Arc::new(RecordStore::open("records.db")?),
//!     Arc::new(OpenAiClient::new(ClientConfig::new(api_key))),
//!     config,
//! )?;
//!
//! let outcome = pipeline.classify(ClassifyRequest::new(
//!     "Cannot access email after password reset",
//!     "User reports being unable to login after resetting password yesterday.",
//! )).await?;
//! ```

pub mod batch;
pub mod confidence;
pub mod config;
pub mod error;
pub mod events;
pub mod graph;
pub mod learning;
pub mod llm;
pub mod pipeline;
pub mod storage;
pub mod vector;

// Re-exports for convenience
pub use batch::{BatchEvent, BatchProcessor, BatchStatus, BatchStatusReport, BatchSummary};
pub use confidence::{
    ComponentPrediction, ConfidenceCalculator, EnsembleResult, PredictionSource,
};
pub use config::{EdgeWeightBounds, EngineConfig, EnsembleWeights};
pub use error::{Error, Result};
pub use events::{ClassificationEvent, ClassificationEventType, EventBus, Stage};
pub use graph::{
    CandidatePath, CategoryLevel, CategoryNode, CategoryPath, ContainsEdge, ExpansionOutcome,
    ExpansionSuggestion, GraphStatistics, GraphStore, Hierarchy, PathRecord,
};
pub use learning::{
    CorrectionReport, DatasetAnalysis, EvolutionOutcome, EvolutionSuggestion, ExpansionProposal,
    GraphEvolution, LearningService, TicketSample,
};
pub use llm::{
    ChatMessage, ChatRole, ClientConfig, CompletionRequest, CompletionResponse, EmbeddingCache,
    EmbeddingRequest, EmbeddingResponse, LLMClient, OpenAiClient,
};
pub use pipeline::{
    ClassificationOutcome, ClassificationPipeline, ClassifyRequest, FinalClassification,
    RoutingDecision, RoutingOutcome,
};
pub use storage::{
    CorrectionSubmission, HitlCorrection, HitlPriority, HitlStatus, HitlTask, MetricRecord,
    RecordStore, Reviewer, TicketPriority, TicketRecord, TicketStatus,
};
pub use vector::{CategoryConfidence, MatchFilter, SearchMatch, VectorRecord, VectorStore};
