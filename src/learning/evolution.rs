//! LLM-driven taxonomy evolution.
//!
//! Asks the LLM to analyze corrections, propose category expansions, and
//! review whole datasets against the current hierarchy. Keyword and
//! description updates can be auto-applied at high confidence; structural
//! changes (new nodes) are only ever proposed, never applied here — the
//! operator applies them through [`crate::graph::GraphStore::apply_expansion`].

use regex::Regex;
use serde::Deserialize;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::graph::{CategoryLevel, CategoryPath, GraphStore};
use crate::learning::types::{
    CorrectionAnalysis, DatasetAnalysis, EvolutionOutcome, EvolutionSuggestion, ExpansionProposal,
    SuggestedChild, TicketSample,
};
use crate::llm::{ChatMessage, CompletionRequest, LLMClient};

/// Confidence the LLM must report before suggestions are auto-applied.
const AUTO_APPLY_CONFIDENCE: f64 = 0.8;
/// Maximum tickets sampled for dataset analysis.
const ANALYSIS_SAMPLE: usize = 100;
/// Ticket summaries included in the analysis prompt.
const PROMPT_SAMPLE: usize = 50;

const TAXONOMY_SYSTEM_PROMPT: &str =
    "You are a classification taxonomy expert. Respond only with valid JSON.";

/// LLM-backed evolution engine over the taxonomy graph.
pub struct GraphEvolution {
    llm: Arc<dyn LLMClient>,
    graph: Arc<GraphStore>,
    chat_model: String,
}

impl GraphEvolution {
    pub fn new(llm: Arc<dyn LLMClient>, graph: Arc<GraphStore>, chat_model: impl Into<String>) -> Self {
        Self {
            llm,
            graph,
            chat_model: chat_model.into(),
        }
    }

    /// Suggest new child categories under an existing one.
    pub async fn suggest_expansion(
        &self,
        category_name: &str,
        level: CategoryLevel,
        context: Option<&str>,
        num_suggestions: usize,
    ) -> Result<ExpansionProposal> {
        if level == CategoryLevel::Level3 {
            return Ok(ExpansionProposal {
                suggestions: Vec::new(),
                reasoning: "Level 3 categories cannot be expanded further".to_string(),
            });
        }

        let hierarchy = self.graph.hierarchy()?;
        let current_children: Vec<String> = match level {
            CategoryLevel::Level1 => hierarchy
                .0
                .get(category_name)
                .map(|l2| l2.keys().cloned().collect())
                .unwrap_or_default(),
            CategoryLevel::Level2 => hierarchy
                .0
                .values()
                .find_map(|l2| l2.get(category_name))
                .cloned()
                .unwrap_or_default(),
            CategoryLevel::Level3 => Vec::new(),
        };
        let child_type = match level {
            CategoryLevel::Level1 => "Level 2 subcategories",
            _ => "Level 3 specific issue types",
        };

        let prompt = format!(
            "You are an expert in customer support ticket classification systems.\n\n\
             Current Category: {name}\n\
             Category Level: {depth} ({kind})\n\
             Current Children: {children}\n\n\
             Additional Context: {context}\n\n\
             TASK: Suggest {num} new {child_type} that should be added under \"{name}\".\n\n\
             Requirements:\n\
             1. Each suggestion should be distinct from existing children\n\
             2. Names should be concise but descriptive (2-5 words)\n\
             3. Follow the naming convention of existing categories\n\
             4. Consider common patterns in customer support tickets\n\
             5. Ensure suggestions are mutually exclusive (no overlap)\n\n\
             Respond in this exact JSON format:\n\
             {{\n\
                 \"suggestions\": [\n\
                     {{\n\
                         \"name\": \"Category Name\",\n\
                         \"description\": \"Brief description of what tickets belong here\",\n\
                         \"keywords\": [\"keyword1\", \"keyword2\", \"keyword3\"],\n\
                         \"reasoning\": \"Why this category is needed\"\n\
                     }}\n\
                 ],\n\
                 \"overall_reasoning\": \"Explanation of the expansion strategy\"\n\
             }}",
            name = category_name,
            depth = level.depth(),
            kind = if level == CategoryLevel::Level1 {
                "top-level domain"
            } else {
                "subcategory"
            },
            children = if current_children.is_empty() {
                "None".to_string()
            } else {
                current_children.join(", ")
            },
            context = context.unwrap_or("Standard SaaS customer support system"),
            num = num_suggestions,
        );

        let reply = self.ask(prompt, 0.7).await?;

        #[derive(Deserialize)]
        struct ExpansionReply {
            #[serde(default)]
            suggestions: Vec<SuggestedChild>,
            #[serde(default)]
            overall_reasoning: String,
        }

        let parsed: ExpansionReply = parse_json_reply(&reply)?;
        Ok(ExpansionProposal {
            suggestions: parsed.suggestions,
            reasoning: parsed.overall_reasoning,
        })
    }

    /// Analyze a dataset against the current hierarchy. Read-only: no graph
    /// writes happen from analysis alone.
    pub async fn analyze_dataset(&self, tickets: &[TicketSample]) -> Result<DatasetAnalysis> {
        let hierarchy = self.graph.hierarchy()?;
        let sample = &tickets[..tickets.len().min(ANALYSIS_SAMPLE)];

        let summaries: Vec<String> = sample
            .iter()
            .take(PROMPT_SAMPLE)
            .map(|t| format!("- {}: {}", t.title, truncate_at(&t.description, 200)))
            .collect();

        let prompt = format!(
            "You are a classification taxonomy expert analyzing support tickets.\n\n\
             CURRENT HIERARCHY:\n{hierarchy}\n\n\
             SAMPLE TICKETS TO ANALYZE:\n{tickets}\n\n\
             TASK: Analyze these tickets and suggest how to evolve the classification graph.\n\n\
             Consider:\n\
             1. Are there tickets that don't fit well into existing categories?\n\
             2. Are there patterns suggesting new top-level categories?\n\
             3. Should any existing categories be expanded with new subcategories?\n\
             4. Are there coverage gaps in the current hierarchy?\n\n\
             Respond in this exact JSON format:\n\
             {{\n\
                 \"new_categories\": [\n\
                     {{\"level\": 1, \"name\": \"Category Name\", \"description\": \"What this category covers\",\n\
                       \"example_tickets\": [\"example1\"], \"children\": [\"suggested child 1\"]}}\n\
                 ],\n\
                 \"expanded_categories\": [\n\
                     {{\"parent_name\": \"Existing Category\", \"parent_level\": 2,\n\
                       \"new_children\": [{{\"name\": \"New Subcategory\", \"description\": \"What it covers\"}}],\n\
                       \"reasoning\": \"Why expansion is needed\"}}\n\
                 ],\n\
                 \"coverage\": {{\n\
                     \"well_covered_areas\": [\"area1\"],\n\
                     \"gaps_identified\": [\"gap1\"],\n\
                     \"coverage_percentage\": 85\n\
                 }},\n\
                 \"recommendations\": [\"Recommendation 1\"]\n\
             }}",
            hierarchy = serde_json::to_string_pretty(&hierarchy)?,
            tickets = summaries.join("\n"),
        );

        let reply = self.ask(prompt, 0.5).await?;
        parse_json_reply(&reply)
    }

    /// Analyze one HITL correction and optionally auto-apply low-risk
    /// suggestions.
    pub async fn evolve_from_correction(
        &self,
        original: &CategoryPath,
        corrected: &CategoryPath,
        ticket_content: &str,
        reviewer_notes: Option<&str>,
    ) -> Result<EvolutionOutcome> {
        let hierarchy = self.graph.hierarchy()?;
        let content_snippet = truncate_at(ticket_content, 500);

        let prompt = format!(
            "You are analyzing a human correction to an AI classification to improve the taxonomy.\n\n\
             ORIGINAL CLASSIFICATION: {original}\n\
             CORRECTED CLASSIFICATION: {corrected}\n\n\
             TICKET CONTENT:\n{content}\n\n\
             REVIEWER NOTES: {notes}\n\n\
             CURRENT HIERARCHY STRUCTURE:\n{hierarchy}\n\n\
             TASK: Analyze this correction and suggest graph modifications.\n\n\
             Consider:\n\
             1. Why did the AI make this mistake?\n\
             2. Are the categories too similar or confusing?\n\
             3. Should keywords be updated?\n\
             4. Is a new category needed?\n\n\
             Respond in this exact JSON format:\n\
             {{\n\
                 \"analysis\": {{\n\
                     \"error_type\": \"misclassification reason\",\n\
                     \"confusion_factors\": [\"factor1\"],\n\
                     \"pattern_identified\": \"Description of the pattern\"\n\
                 }},\n\
                 \"suggestions\": [\n\
                     {{\"type\": \"update_keywords\", \"target_category\": \"Category Name\",\n\
                       \"target_level\": 3, \"keywords\": [\"keyword1\", \"keyword2\"]}},\n\
                     {{\"type\": \"update_description\", \"target_category\": \"Category Name\",\n\
                       \"target_level\": 3, \"new_description\": \"Updated description\"}},\n\
                     {{\"type\": \"add_category\", \"parent\": \"Parent Category\",\n\
                       \"parent_level\": 2, \"new_name\": \"New Category Name\", \"description\": \"What it covers\"}}\n\
                 ],\n\
                 \"should_auto_apply\": false,\n\
                 \"confidence\": 0.8\n\
             }}",
            original = original,
            corrected = corrected,
            content = content_snippet,
            notes = reviewer_notes.unwrap_or("None provided"),
            hierarchy = serde_json::to_string_pretty(&hierarchy)?,
        );

        let reply = self.ask(prompt, 0.3).await?;

        #[derive(Deserialize)]
        struct EvolutionReply {
            #[serde(default)]
            analysis: CorrectionAnalysis,
            #[serde(default)]
            suggestions: Vec<EvolutionSuggestion>,
            #[serde(default)]
            should_auto_apply: bool,
            #[serde(default)]
            confidence: f64,
        }

        let parsed: EvolutionReply = parse_json_reply(&reply)?;

        let mut applied_changes = Vec::new();
        if parsed.should_auto_apply && parsed.confidence >= AUTO_APPLY_CONFIDENCE {
            applied_changes = self.apply_suggestions(&parsed.suggestions);
        }

        Ok(EvolutionOutcome {
            analysis: parsed.analysis,
            suggestions: parsed.suggestions,
            graph_updated: !applied_changes.is_empty(),
            applied_changes,
        })
    }

    /// Apply the auto-applicable subset of suggestions.
    ///
    /// New nodes are structural and never applied here regardless of
    /// confidence.
    fn apply_suggestions(&self, suggestions: &[EvolutionSuggestion]) -> Vec<String> {
        let mut applied = Vec::new();

        for suggestion in suggestions {
            let result = match suggestion {
                EvolutionSuggestion::UpdateKeywords {
                    target_category,
                    target_level,
                    keywords,
                } => match CategoryLevel::from_depth(*target_level) {
                    Some(level) => self
                        .graph
                        .update_keywords(level, target_category, keywords)
                        .map(|()| format!("Updated keywords for {}", target_category)),
                    None => Err(Error::graph(format!("invalid level {}", target_level))),
                },
                EvolutionSuggestion::UpdateDescription {
                    target_category,
                    target_level,
                    new_description,
                } => match CategoryLevel::from_depth(*target_level) {
                    Some(level) => self
                        .graph
                        .update_description(level, target_category, new_description)
                        .map(|()| format!("Updated description for {}", target_category)),
                    None => Err(Error::graph(format!("invalid level {}", target_level))),
                },
                EvolutionSuggestion::AddCategory { new_name, .. } => {
                    info!("Structural suggestion requires operator approval: {}", new_name);
                    continue;
                }
            };

            match result {
                Ok(change) => {
                    info!("{}", change);
                    applied.push(change);
                }
                Err(e) => warn!("Failed to apply suggestion: {}", e),
            }
        }

        applied
    }

    async fn ask(&self, prompt: String, temperature: f64) -> Result<String> {
        let response = self
            .llm
            .complete(
                CompletionRequest::new()
                    .with_model(&self.chat_model)
                    .with_temperature(temperature)
                    .with_max_tokens(3000)
                    .with_message(ChatMessage::system(TAXONOMY_SYSTEM_PROMPT))
                    .with_message(ChatMessage::user(prompt)),
            )
            .await?;
        Ok(response.content)
    }
}

/// Truncate to a byte budget without splitting a character.
fn truncate_at(s: &str, max: usize) -> &str {
    let mut end = s.len().min(max);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Extract and parse the first JSON object in an LLM reply.
fn parse_json_reply<T: serde::de::DeserializeOwned>(reply: &str) -> Result<T> {
    static JSON_OBJECT: OnceLock<Regex> = OnceLock::new();
    let re = JSON_OBJECT.get_or_init(|| Regex::new(r"\{[\s\S]*\}").expect("valid regex"));

    let json = re
        .find(reply)
        .map(|m| m.as_str())
        .ok_or_else(|| Error::llm("no JSON object in reply"))?;

    serde_json::from_str(json).map_err(|e| Error::llm(format!("failed to parse reply JSON: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Probe {
        value: i32,
    }

    #[test]
    fn test_parse_json_reply_extracts_object() {
        let reply = "Here is the result:\n```json\n{\"value\": 7}\n```\nDone.";
        let probe: Probe = parse_json_reply(reply).unwrap();
        assert_eq!(probe.value, 7);
    }

    #[test]
    fn test_parse_json_reply_plain_object() {
        let probe: Probe = parse_json_reply("{\"value\": 3}").unwrap();
        assert_eq!(probe.value, 3);
    }

    #[test]
    fn test_parse_json_reply_no_object() {
        let result: Result<Probe> = parse_json_reply("no json here");
        assert!(result.is_err());
    }
}
