//! Types for the classification taxonomy graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The three taxonomy levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryLevel {
    Level1,
    Level2,
    Level3,
}

impl CategoryLevel {
    /// Numeric level, 1 through 3.
    pub fn depth(&self) -> u8 {
        match self {
            Self::Level1 => 1,
            Self::Level2 => 2,
            Self::Level3 => 3,
        }
    }

    pub fn from_depth(depth: u8) -> Option<Self> {
        match depth {
            1 => Some(Self::Level1),
            2 => Some(Self::Level2),
            3 => Some(Self::Level3),
            _ => None,
        }
    }

    /// The level a child of this level lives at, if any.
    pub fn child(&self) -> Option<Self> {
        match self {
            Self::Level1 => Some(Self::Level2),
            Self::Level2 => Some(Self::Level3),
            Self::Level3 => None,
        }
    }
}

impl std::fmt::Display for CategoryLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "level{}", self.depth())
    }
}

/// A category node with its learned statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryNode {
    pub level: CategoryLevel,
    pub name: String,
    pub description: String,
    pub keywords: Vec<String>,
    /// Monotonic count of tickets attributed to this node.
    pub ticket_count: u64,
    /// EMA of classification correctness, in [0, 1].
    pub accuracy: f64,
    /// True when the node was proposed by the learning subsystem.
    pub ai_generated: bool,
    pub created_at: DateTime<Utc>,
}

/// A containment edge between consecutive levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainsEdge {
    pub parent_level: CategoryLevel,
    pub parent_name: String,
    pub child_name: String,
    /// Multiplicative scoring factor, clamped to the configured bounds.
    pub weight: f64,
    pub traversal_count: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

/// An L1 > L2 > L3 path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CategoryPath {
    pub level1: String,
    pub level2: String,
    pub level3: String,
}

impl CategoryPath {
    pub fn new(
        level1: impl Into<String>,
        level2: impl Into<String>,
        level3: impl Into<String>,
    ) -> Self {
        Self {
            level1: level1.into(),
            level2: level2.into(),
            level3: level3.into(),
        }
    }
}

impl std::fmt::Display for CategoryPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} > {} > {}", self.level1, self.level2, self.level3)
    }
}

/// A scored candidate path returned by the traversal query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePath {
    pub level1: String,
    pub level2: String,
    pub level3: String,
    /// Combined keyword/accuracy/edge-weight score, in [0, 1].
    pub confidence: f64,
    /// L3 ticket count at query time.
    pub historical_count: u64,
    /// L3 accuracy at query time.
    pub historical_accuracy: f64,
}

impl CandidatePath {
    pub fn path(&self) -> CategoryPath {
        CategoryPath::new(&self.level1, &self.level2, &self.level3)
    }
}

/// One enumerated hierarchy path with L3 statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathRecord {
    pub level1: String,
    pub level2: String,
    pub level3: String,
    pub ticket_count: u64,
    pub accuracy: f64,
}

/// The taxonomy shape used by bulk loads: L1 name -> L2 name -> L3 names.
///
/// `BTreeMap` keeps iteration deterministic, which keeps `load_hierarchy`
/// logs and tests stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hierarchy(pub BTreeMap<String, BTreeMap<String, Vec<String>>>);

impl Hierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one full path, creating intermediate entries as needed.
    pub fn add_path(
        &mut self,
        level1: impl Into<String>,
        level2: impl Into<String>,
        level3: impl Into<String>,
    ) {
        self.0
            .entry(level1.into())
            .or_default()
            .entry(level2.into())
            .or_default()
            .push(level3.into());
    }

    /// Build a hierarchy from enumerated paths.
    pub fn from_paths(paths: &[PathRecord]) -> Self {
        let mut hierarchy = Self::new();
        for p in paths {
            hierarchy.add_path(&p.level1, &p.level2, &p.level3);
        }
        hierarchy
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Aggregate statistics for the graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStatistics {
    pub level1_categories: u64,
    pub level2_categories: u64,
    pub level3_categories: u64,
    pub classified_tickets: u64,
    pub average_accuracy: f64,
}

/// A new child category to merge under an existing parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpansionSuggestion {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Outcome of applying a set of expansion suggestions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpansionOutcome {
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
    pub errors: Vec<String>,
}
