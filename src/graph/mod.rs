//! Weighted 3-level taxonomy graph.
//!
//! The graph holds category nodes at three levels connected by `Contains`
//! edges, plus `ClassifiedAs` links from tickets to leaf categories. Edge
//! weights and per-node accuracy shift as HITL corrections arrive, so the
//! traversal query gets better at ranking paths over time.
//!
//! ## Example
//!
//! ```rust,ignore
//! use triage_core::graph::{GraphStore, Hierarchy};
//!
//! let store = GraphStore::in_memory()?;
//!
//! let mut hierarchy = Hierarchy::new();
//! hierarchy.add_path("Technical Support", "Authentication", "Password Reset Issues");
//! store.load_hierarchy(&hierarchy)?;
//!
//! let paths = store.find_candidate_paths(&["password".into()], 5)?;
//! ```

mod schema;
mod store;
mod types;

pub use schema::{get_schema_version, initialize_schema, is_initialized, SCHEMA_VERSION};
pub use store::GraphStore;
pub use types::{
    CandidatePath, CategoryLevel, CategoryNode, CategoryPath, ContainsEdge, ExpansionOutcome,
    ExpansionSuggestion, GraphStatistics, Hierarchy, PathRecord,
};
