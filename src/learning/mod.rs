//! The learning subsystem.
//!
//! Applies HITL corrections across every store: the correction row, the
//! ticket's final category, the task status, reviewer counters, graph edge
//! weights and accuracy, the vector-store correctness flag, and the metric
//! back-fill. Optionally asks the LLM to analyze the correction and propose
//! taxonomy edits.
//!
//! A correction that persists but whose graph update fails is logged as a
//! warning and remains replayable: re-applying the same correction is safe
//! because the weight deltas self-correct over many samples.

mod evolution;
mod types;

pub use evolution::GraphEvolution;
pub use types::{
    ChildSuggestion, CorrectionAnalysis, CorrectionReport, CoverageReport, DatasetAnalysis,
    EvolutionOutcome, EvolutionSuggestion, ExpansionCandidate, ExpansionProposal,
    NewCategorySuggestion, SuggestedChild, TicketSample,
};

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::graph::{CategoryLevel, ExpansionOutcome, ExpansionSuggestion, GraphStore};
use crate::llm::LLMClient;
use crate::storage::{CorrectionSubmission, HitlCorrection, HitlStatus, RecordStore};
use crate::vector::VectorStore;

/// Coordinates correction application and taxonomy evolution.
pub struct LearningService {
    graph: Arc<GraphStore>,
    vectors: Arc<VectorStore>,
    records: Arc<RecordStore>,
    evolution: Option<GraphEvolution>,
}

impl LearningService {
    pub fn new(
        graph: Arc<GraphStore>,
        vectors: Arc<VectorStore>,
        records: Arc<RecordStore>,
    ) -> Self {
        Self {
            graph,
            vectors,
            records,
            evolution: None,
        }
    }

    /// Enable LLM-driven evolution analysis on corrections.
    pub fn with_evolution(mut self, llm: Arc<dyn LLMClient>, chat_model: impl Into<String>) -> Self {
        self.evolution = Some(GraphEvolution::new(llm, Arc::clone(&self.graph), chat_model));
        self
    }

    /// Apply a reviewer-submitted correction.
    ///
    /// The correction row and ticket/task updates must succeed; everything
    /// downstream (graph learning, vector flip, metric back-fill, LLM
    /// evolution) is best-effort and logged on failure.
    pub async fn submit_correction(
        &self,
        reviewer_id: Uuid,
        submission: CorrectionSubmission,
    ) -> Result<CorrectionReport> {
        let task = self
            .records
            .get_task(submission.task_id)?
            .ok_or_else(|| Error::validation(format!("unknown task: {}", submission.task_id)))?;

        if task.status == HitlStatus::Completed {
            return Err(Error::validation("task already completed"));
        }

        let original = task.ai_path();
        let corrected = submission.corrected_path();
        let is_correct = original == corrected;

        let correction = HitlCorrection {
            id: Uuid::new_v4(),
            task_id: task.id,
            ticket_id: task.ticket_id,
            reviewer_id,
            original_level1: original.level1.clone(),
            original_level2: original.level2.clone(),
            original_level3: original.level3.clone(),
            original_confidence: task.ai_confidence,
            corrected_level1: corrected.level1.clone(),
            corrected_level2: corrected.level2.clone(),
            corrected_level3: corrected.level3.clone(),
            is_correct,
            notes: submission.notes.clone(),
            submitted_at: Utc::now(),
            review_time_seconds: submission.review_time_seconds,
            should_update_graph: true,
            should_retrain_model: false,
        };

        self.records.insert_correction(&correction)?;
        self.records
            .apply_ticket_correction(task.ticket_id, &corrected)?;
        self.records
            .complete_task(task.id, reviewer_id, submission.review_time_seconds)?;
        self.records
            .increment_reviewer_counts(reviewer_id, !is_correct)?;

        info!(
            "Correction recorded for ticket {}: AI was {}",
            task.ticket_id,
            if is_correct { "correct" } else { "corrected" }
        );

        // Graph learning only fires when the AI was wrong; identical paths
        // leave the weights untouched.
        let mut graph_updated = false;
        if !is_correct {
            match self
                .graph
                .record_correction(&task.ticket_id.to_string(), &original, &corrected)
            {
                Ok(()) => graph_updated = true,
                Err(e) => {
                    // The correction row is persisted, so this step can be
                    // replayed later.
                    warn!("Graph update for correction failed: {}", e);
                }
            }
        }

        if let Err(e) = self.vectors.update_correctness(task.ticket_id, is_correct) {
            warn!("Vector correctness flip failed: {}", e);
        }
        if let Err(e) = self.records.set_metric_correctness(task.ticket_id, is_correct) {
            warn!("Metric back-fill failed: {}", e);
        }

        let evolution = if !is_correct {
            match &self.evolution {
                Some(engine) => {
                    let content =
                        format!("{}\n\n{}", task.ticket_title, task.ticket_description);
                    match engine
                        .evolve_from_correction(
                            &original,
                            &corrected,
                            &content,
                            submission.notes.as_deref(),
                        )
                        .await
                    {
                        Ok(outcome) => Some(outcome),
                        Err(e) => {
                            warn!("Evolution analysis failed: {}", e);
                            None
                        }
                    }
                }
                None => None,
            }
        } else {
            None
        };

        Ok(CorrectionReport {
            correction,
            graph_updated,
            evolution,
        })
    }

    /// Ask the LLM to analyze a dataset against the current hierarchy.
    /// Analysis alone never writes to the graph.
    pub async fn analyze_dataset(&self, tickets: &[TicketSample]) -> Result<DatasetAnalysis> {
        let engine = self
            .evolution
            .as_ref()
            .ok_or_else(|| Error::Config("evolution analysis requires an LLM client".to_string()))?;
        engine.analyze_dataset(tickets).await
    }

    /// Ask the LLM to propose child categories for an existing one.
    pub async fn suggest_expansion(
        &self,
        category_name: &str,
        level: CategoryLevel,
        context: Option<&str>,
        num_suggestions: usize,
    ) -> Result<ExpansionProposal> {
        let engine = self
            .evolution
            .as_ref()
            .ok_or_else(|| Error::Config("evolution analysis requires an LLM client".to_string()))?;
        engine
            .suggest_expansion(category_name, level, context, num_suggestions)
            .await
    }

    /// Operator-approved application of expansion suggestions.
    pub fn apply_expansion(
        &self,
        parent_level: CategoryLevel,
        parent_name: &str,
        suggestions: &[ExpansionSuggestion],
    ) -> Result<ExpansionOutcome> {
        self.graph
            .apply_expansion(parent_level, parent_name, suggestions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{CategoryPath, Hierarchy};
    use crate::llm::{
        CompletionRequest, CompletionResponse, EmbeddingRequest, EmbeddingResponse, TokenUsage,
    };
    use crate::storage::HitlTask;
    use crate::vector::VectorRecord;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    struct MockLlm {
        completions: Mutex<VecDeque<String>>,
    }

    impl MockLlm {
        fn new(completions: Vec<String>) -> Self {
            Self {
                completions: Mutex::new(completions.into()),
            }
        }
    }

    #[async_trait]
    impl LLMClient for MockLlm {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse> {
            let content = self
                .completions
                .lock()
                .await
                .pop_front()
                .ok_or_else(|| Error::llm("mock exhausted"))?;
            Ok(CompletionResponse {
                id: "mock".to_string(),
                model: "mock-model".to_string(),
                content,
                usage: TokenUsage::default(),
                timestamp: Utc::now(),
            })
        }

        async fn embed(&self, _request: EmbeddingRequest) -> Result<EmbeddingResponse> {
            Err(Error::embedding("not used in learning tests"))
        }

        fn provider(&self) -> &'static str {
            "mock"
        }
    }

    struct Fixture {
        graph: Arc<GraphStore>,
        vectors: Arc<VectorStore>,
        records: Arc<RecordStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let graph = Arc::new(GraphStore::in_memory().unwrap());
            let mut hierarchy = Hierarchy::new();
            hierarchy.add_path("Technical Support", "Authentication", "Password Reset Issues");
            hierarchy.add_path("Billing", "Payments", "Failed Transactions");
            graph.load_hierarchy(&hierarchy).unwrap();

            Self {
                graph,
                vectors: Arc::new(VectorStore::in_memory(2).unwrap()),
                records: Arc::new(RecordStore::in_memory().unwrap()),
            }
        }

        fn service(&self) -> LearningService {
            LearningService::new(
                Arc::clone(&self.graph),
                Arc::clone(&self.vectors),
                Arc::clone(&self.records),
            )
        }

        /// Create a pending task whose AI path is Billing > Payments >
        /// Failed Transactions, plus the supporting ticket and vector rows.
        fn seed_task(&self) -> (HitlTask, Uuid) {
            let ticket_id = Uuid::new_v4();
            let ai_path = CategoryPath::new("Billing", "Payments", "Failed Transactions");

            let mut ticket =
                crate::storage::TicketRecord::new(ticket_id, "Payment stuck", "Charge pending");
            ticket.level1 = Some(ai_path.level1.clone());
            ticket.level2 = Some(ai_path.level2.clone());
            ticket.level3 = Some(ai_path.level3.clone());
            self.records.upsert_ticket(&ticket).unwrap();

            self.vectors
                .insert(&VectorRecord::new(
                    ticket_id,
                    vec![1.0, 0.0],
                    "Payment stuck",
                    "Charge pending",
                    &ai_path.level1,
                    &ai_path.level2,
                    &ai_path.level3,
                    0.55,
                ))
                .unwrap();

            self.records
                .record_metric(&crate::storage::MetricRecord {
                    id: Uuid::new_v4(),
                    ticket_id,
                    timestamp: Utc::now(),
                    level1: ai_path.level1.clone(),
                    level2: ai_path.level2.clone(),
                    level3: ai_path.level3.clone(),
                    graph_confidence: 0.5,
                    vector_confidence: 0.5,
                    llm_confidence: 0.6,
                    final_confidence: 0.55,
                    component_agreement: 0.6,
                    auto_resolved: false,
                    requires_hitl: true,
                    processing_time_ms: 100,
                    was_correct: None,
                })
                .unwrap();

            let task = HitlTask::new(
                ticket_id,
                "Payment stuck",
                "Charge pending",
                &ai_path,
                0.55,
                "Below auto-resolve threshold (0.55)",
            );
            self.records.create_task(&task).unwrap();
            (task, ticket_id)
        }
    }

    fn submission(task_id: Uuid, path: (&str, &str, &str)) -> CorrectionSubmission {
        CorrectionSubmission {
            task_id,
            corrected_level1: path.0.to_string(),
            corrected_level2: path.1.to_string(),
            corrected_level3: path.2.to_string(),
            notes: None,
            review_time_seconds: 45,
        }
    }

    #[tokio::test]
    async fn test_correction_with_changed_path_updates_everything() {
        let fixture = Fixture::new();
        let service = fixture.service();
        let reviewer = fixture.records.create_reviewer("ana").unwrap();
        let (task, ticket_id) = fixture.seed_task();

        let corrected = (
            "Technical Support",
            "Authentication",
            "Password Reset Issues",
        );
        let report = service
            .submit_correction(reviewer.id, submission(task.id, corrected))
            .await
            .unwrap();

        assert!(!report.correction.is_correct);
        assert!(report.graph_updated);
        assert!(report.evolution.is_none());

        // Exactly one correction exists for the task.
        let stored = fixture.records.correction_for_task(task.id).unwrap().unwrap();
        assert_eq!(stored.corrected_level3, "Password Reset Issues");

        // The ticket now carries the corrected path and is resolved.
        let ticket = fixture.records.get_ticket(ticket_id).unwrap().unwrap();
        assert_eq!(ticket.status, crate::storage::TicketStatus::Resolved);
        assert_eq!(
            ticket.category_path().unwrap(),
            CategoryPath::new(corrected.0, corrected.1, corrected.2)
        );

        // The task is completed with the review duration.
        let task = fixture.records.get_task(task.id).unwrap().unwrap();
        assert_eq!(task.status, HitlStatus::Completed);
        assert_eq!(task.review_time_seconds, Some(45));

        // Graph weights moved the way the correction dictates.
        let penalized = fixture
            .graph
            .get_edge(CategoryLevel::Level1, "Billing", "Payments")
            .unwrap()
            .unwrap();
        assert!((penalized.weight - 0.9).abs() < 1e-9);
        let reinforced = fixture
            .graph
            .get_edge(CategoryLevel::Level1, "Technical Support", "Authentication")
            .unwrap()
            .unwrap();
        assert!((reinforced.weight - 1.1).abs() < 1e-9);

        // Vector row flipped, metric back-filled, reviewer counted.
        let vector = fixture.vectors.get(ticket_id).unwrap().unwrap();
        assert!(!vector.was_correct);
        let metric = fixture.records.metric_for_ticket(ticket_id).unwrap().unwrap();
        assert_eq!(metric.was_correct, Some(false));
        let reviewer = fixture.records.get_reviewer(reviewer.id).unwrap().unwrap();
        assert_eq!(reviewer.reviews_completed, 1);
        assert_eq!(reviewer.corrections_made, 1);
    }

    #[tokio::test]
    async fn test_correct_classification_leaves_weights_unchanged() {
        let fixture = Fixture::new();
        let service = fixture.service();
        let reviewer = fixture.records.create_reviewer("bo").unwrap();
        let (task, ticket_id) = fixture.seed_task();

        let report = service
            .submit_correction(
                reviewer.id,
                submission(task.id, ("Billing", "Payments", "Failed Transactions")),
            )
            .await
            .unwrap();

        assert!(report.correction.is_correct);
        assert!(!report.graph_updated);

        let edge = fixture
            .graph
            .get_edge(CategoryLevel::Level1, "Billing", "Payments")
            .unwrap()
            .unwrap();
        assert_eq!(edge.weight, 1.0);

        // The vector row stays marked correct and the metric says so.
        assert!(fixture.vectors.get(ticket_id).unwrap().unwrap().was_correct);
        let metric = fixture.records.metric_for_ticket(ticket_id).unwrap().unwrap();
        assert_eq!(metric.was_correct, Some(true));

        let reviewer = fixture.records.get_reviewer(reviewer.id).unwrap().unwrap();
        assert_eq!(reviewer.reviews_completed, 1);
        assert_eq!(reviewer.corrections_made, 0);
    }

    #[tokio::test]
    async fn test_completed_task_rejects_second_correction() {
        let fixture = Fixture::new();
        let service = fixture.service();
        let reviewer = fixture.records.create_reviewer("cy").unwrap();
        let (task, _) = fixture.seed_task();

        service
            .submit_correction(
                reviewer.id,
                submission(task.id, ("Billing", "Payments", "Failed Transactions")),
            )
            .await
            .unwrap();

        let err = service
            .submit_correction(
                reviewer.id,
                submission(task.id, ("Billing", "Payments", "Failed Transactions")),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already completed"));
    }

    #[tokio::test]
    async fn test_unknown_task_rejected() {
        let fixture = Fixture::new();
        let service = fixture.service();
        let reviewer = fixture.records.create_reviewer("dee").unwrap();

        let err = service
            .submit_correction(
                reviewer.id,
                submission(Uuid::new_v4(), ("A", "B", "C")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_evolution_auto_applies_only_low_risk_suggestions() {
        let fixture = Fixture::new();
        let reply = r#"{
            "analysis": {
                "error_type": "keyword overlap",
                "confusion_factors": ["payment wording"],
                "pattern_identified": "auth failures described as payment issues"
            },
            "suggestions": [
                {"type": "update_keywords", "target_category": "Password Reset Issues",
                 "target_level": 3, "keywords": ["stuck", "pending login"]},
                {"type": "add_category", "parent": "Authentication",
                 "parent_level": 2, "new_name": "Session Expiry", "description": "Expired sessions"}
            ],
            "should_auto_apply": true,
            "confidence": 0.9
        }"#;
        let service = fixture
            .service()
            .with_evolution(Arc::new(MockLlm::new(vec![reply.to_string()])), "mock-model");
        let reviewer = fixture.records.create_reviewer("eve").unwrap();
        let (task, _) = fixture.seed_task();

        let report = service
            .submit_correction(
                reviewer.id,
                submission(
                    task.id,
                    ("Technical Support", "Authentication", "Password Reset Issues"),
                ),
            )
            .await
            .unwrap();

        let evolution = report.evolution.unwrap();
        assert!(evolution.graph_updated);
        assert_eq!(evolution.applied_changes.len(), 1);
        assert_eq!(evolution.suggestions.len(), 2);

        // Keywords were applied; the structural addition was not.
        let leaf = fixture
            .graph
            .get_category(CategoryLevel::Level3, "Password Reset Issues")
            .unwrap()
            .unwrap();
        assert!(leaf.keywords.contains(&"stuck".to_string()));
        assert!(fixture
            .graph
            .get_category(CategoryLevel::Level3, "Session Expiry")
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_evolution_respects_confidence_floor() {
        let fixture = Fixture::new();
        let reply = r#"{
            "suggestions": [
                {"type": "update_keywords", "target_category": "Password Reset Issues",
                 "target_level": 3, "keywords": ["stuck"]}
            ],
            "should_auto_apply": true,
            "confidence": 0.5
        }"#;
        let service = fixture
            .service()
            .with_evolution(Arc::new(MockLlm::new(vec![reply.to_string()])), "mock-model");
        let reviewer = fixture.records.create_reviewer("fay").unwrap();
        let (task, _) = fixture.seed_task();

        let report = service
            .submit_correction(
                reviewer.id,
                submission(
                    task.id,
                    ("Technical Support", "Authentication", "Password Reset Issues"),
                ),
            )
            .await
            .unwrap();

        let evolution = report.evolution.unwrap();
        assert!(!evolution.graph_updated);
        assert!(evolution.applied_changes.is_empty());

        let leaf = fixture
            .graph
            .get_category(CategoryLevel::Level3, "Password Reset Issues")
            .unwrap()
            .unwrap();
        assert!(leaf.keywords.is_empty());
    }

    #[tokio::test]
    async fn test_dataset_analysis_is_read_only() {
        let fixture = Fixture::new();
        let reply = r#"{
            "new_categories": [
                {"level": 1, "name": "Data & Privacy", "description": "GDPR and export requests",
                 "example_tickets": ["Delete my data"], "children": ["Export Requests"]}
            ],
            "expanded_categories": [],
            "coverage": {"well_covered_areas": ["auth"], "gaps_identified": ["privacy"],
                         "coverage_percentage": 72},
            "recommendations": ["Add a privacy category"]
        }"#;
        let service = fixture
            .service()
            .with_evolution(Arc::new(MockLlm::new(vec![reply.to_string()])), "mock-model");

        let before = fixture.graph.statistics().unwrap();
        let tickets: Vec<TicketSample> = (0..150)
            .map(|i| TicketSample {
                title: format!("Ticket {}", i),
                description: "Please delete my account data".to_string(),
            })
            .collect();

        let analysis = service.analyze_dataset(&tickets).await.unwrap();
        assert_eq!(analysis.new_categories.len(), 1);
        assert!((analysis.coverage.coverage_percentage - 72.0).abs() < 1e-9);

        // No writes from analysis alone.
        let after = fixture.graph.statistics().unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_analysis_requires_llm() {
        let fixture = Fixture::new();
        let service = fixture.service();
        let err = service.analyze_dataset(&[]).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_suggest_and_apply_expansion() {
        let fixture = Fixture::new();
        let reply = r#"{
            "suggestions": [
                {"name": "Account Lockouts", "description": "Too many failed attempts",
                 "keywords": ["lockout"], "reasoning": "Frequent in the queue"}
            ],
            "overall_reasoning": "Authentication needs finer leaves"
        }"#;
        let service = fixture
            .service()
            .with_evolution(Arc::new(MockLlm::new(vec![reply.to_string()])), "mock-model");

        let proposal = service
            .suggest_expansion("Authentication", CategoryLevel::Level2, None, 5)
            .await
            .unwrap();
        assert_eq!(proposal.suggestions.len(), 1);

        let expansions: Vec<_> = proposal.suggestions.iter().map(|s| s.to_expansion()).collect();
        let outcome = service
            .apply_expansion(CategoryLevel::Level2, "Authentication", &expansions)
            .unwrap();
        assert_eq!(outcome.applied, vec!["Account Lockouts"]);

        let node = fixture
            .graph
            .get_category(CategoryLevel::Level3, "Account Lockouts")
            .unwrap()
            .unwrap();
        assert!(node.ai_generated);
    }

    #[tokio::test]
    async fn test_suggest_expansion_rejects_leaf() {
        let fixture = Fixture::new();
        let service = fixture
            .service()
            .with_evolution(Arc::new(MockLlm::new(vec![])), "mock-model");

        let proposal = service
            .suggest_expansion("Password Reset Issues", CategoryLevel::Level3, None, 5)
            .await
            .unwrap();
        assert!(proposal.suggestions.is_empty());
        assert!(proposal.reasoning.contains("cannot be expanded"));
    }
}
