//! Types for the ticket embedding store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Maximum stored title length.
pub const MAX_TITLE_LEN: usize = 500;
/// Maximum stored description snippet length.
pub const MAX_SNIPPET_LEN: usize = 1000;

/// A stored ticket embedding with its classification metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub ticket_id: Uuid,
    pub embedding: Vec<f32>,
    pub title: String,
    pub description_snippet: String,
    pub level1: String,
    pub level2: String,
    pub level3: String,
    /// Flipped to false when a HITL correction contradicts the stored
    /// classification.
    pub was_correct: bool,
    /// Calibrated confidence at insertion time.
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

impl VectorRecord {
    /// Build a record, truncating title and description to storage limits.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ticket_id: Uuid,
        embedding: Vec<f32>,
        title: &str,
        description: &str,
        level1: impl Into<String>,
        level2: impl Into<String>,
        level3: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            ticket_id,
            embedding,
            title: truncate(title, MAX_TITLE_LEN),
            description_snippet: truncate(description, MAX_SNIPPET_LEN),
            level1: level1.into(),
            level2: level2.into(),
            level3: level3.into(),
            was_correct: true,
            confidence,
            created_at: Utc::now(),
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    // Cut on a char boundary at or below the byte limit.
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// A similarity-search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMatch {
    pub ticket_id: Uuid,
    pub title: String,
    pub description_snippet: String,
    pub level1: String,
    pub level2: String,
    pub level3: String,
    pub was_correct: bool,
    pub confidence: f64,
    /// Cosine-derived similarity, normalized to [0, 1].
    pub similarity: f64,
}

/// Optional equality filters for similarity search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchFilter {
    pub level1: Option<String>,
    pub level2: Option<String>,
    pub level3: Option<String>,
    pub was_correct: Option<bool>,
}

impl MatchFilter {
    pub fn by_level1(level1: impl Into<String>) -> Self {
        Self {
            level1: Some(level1.into()),
            ..Self::default()
        }
    }

    pub fn by_path(
        level1: impl Into<String>,
        level2: impl Into<String>,
        level3: impl Into<String>,
    ) -> Self {
        Self {
            level1: Some(level1.into()),
            level2: Some(level2.into()),
            level3: Some(level3.into()),
            was_correct: None,
        }
    }

    pub fn correct_only() -> Self {
        Self {
            was_correct: Some(true),
            ..Self::default()
        }
    }

    /// True when no condition is set.
    pub fn is_empty(&self) -> bool {
        self.level1.is_none()
            && self.level2.is_none()
            && self.level3.is_none()
            && self.was_correct.is_none()
    }

    pub fn matches(&self, record: &VectorRecord) -> bool {
        if let Some(l1) = &self.level1 {
            if &record.level1 != l1 {
                return false;
            }
        }
        if let Some(l2) = &self.level2 {
            if &record.level2 != l2 {
                return false;
            }
        }
        if let Some(l3) = &self.level3 {
            if &record.level3 != l3 {
                return false;
            }
        }
        if let Some(correct) = self.was_correct {
            if record.was_correct != correct {
                return false;
            }
        }
        true
    }
}

/// Classification vote derived from similar tickets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryConfidence {
    pub level1: Option<String>,
    pub level2: Option<String>,
    pub level3: Option<String>,
    /// Mean of the three per-level winner shares.
    pub confidence: f64,
    pub level1_confidence: f64,
    pub level2_confidence: f64,
    pub level3_confidence: f64,
    pub match_count: usize,
    /// Normalized vote distributions per level.
    pub level1_votes: HashMap<String, f64>,
    pub level2_votes: HashMap<String, f64>,
    pub level3_votes: HashMap<String, f64>,
}

/// Collection statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorStoreStats {
    pub records: u64,
    pub dimension: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_truncates_long_fields() {
        let record = VectorRecord::new(
            Uuid::new_v4(),
            vec![0.0; 4],
            &"t".repeat(600),
            &"d".repeat(1500),
            "A",
            "B",
            "C",
            0.9,
        );
        assert_eq!(record.title.len(), MAX_TITLE_LEN);
        assert_eq!(record.description_snippet.len(), MAX_SNIPPET_LEN);
        assert!(record.was_correct);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        // Multibyte char straddling the limit must not split.
        let s = format!("{}é", "a".repeat(499));
        let t = truncate(&s, 500);
        assert_eq!(t.len(), 499);
    }

    #[test]
    fn test_filter_matching() {
        let record = VectorRecord::new(
            Uuid::new_v4(),
            vec![],
            "t",
            "d",
            "A",
            "B",
            "C",
            1.0,
        );

        assert!(MatchFilter::default().matches(&record));
        assert!(MatchFilter::by_level1("A").matches(&record));
        assert!(!MatchFilter::by_level1("X").matches(&record));
        assert!(MatchFilter::by_path("A", "B", "C").matches(&record));
        assert!(!MatchFilter::by_path("A", "B", "X").matches(&record));
        assert!(MatchFilter::correct_only().matches(&record));
    }
}
