//! Types for the learning subsystem: correction reports, taxonomy-evolution
//! suggestions, and dataset analysis results.

use serde::{Deserialize, Serialize};

use crate::graph::ExpansionSuggestion;
use crate::storage::HitlCorrection;

/// A structured taxonomy-edit suggestion from the LLM.
///
/// Keyword and description updates may be auto-applied at high confidence;
/// structural additions always require operator approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EvolutionSuggestion {
    UpdateKeywords {
        target_category: String,
        target_level: u8,
        #[serde(default)]
        keywords: Vec<String>,
    },
    UpdateDescription {
        target_category: String,
        target_level: u8,
        #[serde(default)]
        new_description: String,
    },
    AddCategory {
        parent: String,
        parent_level: u8,
        new_name: String,
        #[serde(default)]
        description: String,
    },
}

/// The LLM's analysis of why a misclassification happened.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrectionAnalysis {
    #[serde(default)]
    pub error_type: String,
    #[serde(default)]
    pub confusion_factors: Vec<String>,
    #[serde(default)]
    pub pattern_identified: String,
}

/// Outcome of analyzing one correction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvolutionOutcome {
    pub analysis: CorrectionAnalysis,
    pub suggestions: Vec<EvolutionSuggestion>,
    /// Human-readable descriptions of the changes that were auto-applied.
    pub applied_changes: Vec<String>,
    pub graph_updated: bool,
}

/// A suggested child category with the LLM's rationale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedChild {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

impl SuggestedChild {
    pub fn to_expansion(&self) -> ExpansionSuggestion {
        ExpansionSuggestion {
            name: self.name.clone(),
            description: self.description.clone(),
            keywords: self.keywords.clone(),
        }
    }
}

/// Proposed expansions for one category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpansionProposal {
    pub suggestions: Vec<SuggestedChild>,
    pub reasoning: String,
}

/// A new top-level or mid-level category surfaced by dataset analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCategorySuggestion {
    pub level: u8,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub example_tickets: Vec<String>,
    #[serde(default)]
    pub children: Vec<String>,
}

/// A proposed child under an existing category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildSuggestion {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// An existing category the analysis wants expanded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpansionCandidate {
    pub parent_name: String,
    pub parent_level: u8,
    #[serde(default)]
    pub new_children: Vec<ChildSuggestion>,
    #[serde(default)]
    pub reasoning: String,
}

/// Hierarchy coverage estimate over the analyzed sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    #[serde(default)]
    pub well_covered_areas: Vec<String>,
    #[serde(default)]
    pub gaps_identified: Vec<String>,
    #[serde(default)]
    pub coverage_percentage: f64,
}

/// Full dataset-analysis report. Analysis never writes to the graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetAnalysis {
    #[serde(default)]
    pub new_categories: Vec<NewCategorySuggestion>,
    #[serde(default)]
    pub expanded_categories: Vec<ExpansionCandidate>,
    #[serde(default)]
    pub coverage: CoverageReport,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// A minimal ticket view for dataset analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketSample {
    pub title: String,
    pub description: String,
}

/// Everything that happened while applying one correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionReport {
    pub correction: HitlCorrection,
    /// Whether the graph's edge weights and accuracy were updated.
    pub graph_updated: bool,
    /// Present when LLM evolution analysis ran for this correction.
    pub evolution: Option<EvolutionOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suggestion_deserialization() {
        let json = r#"{
            "type": "update_keywords",
            "target_category": "Password Reset Issues",
            "target_level": 3,
            "keywords": ["lockout", "expired link"]
        }"#;
        let suggestion: EvolutionSuggestion = serde_json::from_str(json).unwrap();
        match suggestion {
            EvolutionSuggestion::UpdateKeywords {
                target_category,
                target_level,
                keywords,
            } => {
                assert_eq!(target_category, "Password Reset Issues");
                assert_eq!(target_level, 3);
                assert_eq!(keywords.len(), 2);
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_add_category_deserialization() {
        let json = r#"{
            "type": "add_category",
            "parent": "Authentication",
            "parent_level": 2,
            "new_name": "Session Expiry"
        }"#;
        let suggestion: EvolutionSuggestion = serde_json::from_str(json).unwrap();
        assert!(matches!(suggestion, EvolutionSuggestion::AddCategory { .. }));
    }

    #[test]
    fn test_suggested_child_to_expansion() {
        let child = SuggestedChild {
            name: "Account Lockouts".to_string(),
            description: "Repeated failed logins".to_string(),
            keywords: vec!["lockout".to_string()],
            reasoning: "Common pattern".to_string(),
        };
        let expansion = child.to_expansion();
        assert_eq!(expansion.name, "Account Lockouts");
        assert_eq!(expansion.keywords, vec!["lockout"]);
    }

    #[test]
    fn test_dataset_analysis_tolerates_missing_fields() {
        let analysis: DatasetAnalysis = serde_json::from_str("{}").unwrap();
        assert!(analysis.new_categories.is_empty());
        assert_eq!(analysis.coverage.coverage_percentage, 0.0);
    }
}
