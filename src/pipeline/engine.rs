//! The six-step classification pipeline.
//!
//! Stages run strictly in order: keyword extraction, graph query, vector
//! search, LLM judgment, ensemble confidence, routing. A failing stage
//! records an error string and degrades its component's confidence to zero;
//! the pipeline never aborts on a single component failure. Classification
//! is the product — the persistence side effects that follow a completed
//! classification are logged-and-tolerated, never surfaced to the caller.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::confidence::{ComponentPrediction, ConfidenceCalculator, PredictionSource};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::events::{ClassificationEvent, EventBus, Stage};
use crate::graph::{CategoryPath, GraphStore};
use crate::llm::{
    ChatMessage, CompletionRequest, CompletionResponse, EmbeddingCache, EmbeddingRequest,
    LLMClient,
};
use crate::pipeline::types::{
    ClassificationOutcome, ClassifyRequest, FinalClassification, GraphAnalysis, LlmAnalysis,
    ProcessingInfo, RoutingDecision, RoutingOutcome, VectorAnalysis,
};
use crate::storage::{
    HitlPriority, HitlTask, MetricRecord, RecordStore, SimilarTicketRef, TicketPriority,
    TicketRecord, TicketStatus,
};
use crate::vector::{VectorRecord, VectorStore};

/// Candidate paths requested from the graph.
const GRAPH_CANDIDATES: usize = 5;
/// Neighbours requested from the vector store.
const VECTOR_MATCHES: usize = 10;
/// Matches aggregated into the vector prediction.
const VECTOR_TOP: usize = 5;
/// Graph paths included in the judge prompt.
const PROMPT_PATHS: usize = 3;
/// Similar tickets included in the judge prompt.
const PROMPT_TICKETS: usize = 3;
/// Confidence multiplier when the judge falls back to another component.
const JUDGE_FALLBACK_FACTOR: f64 = 0.8;

/// The ticket classification pipeline.
pub struct ClassificationPipeline {
    graph: Arc<GraphStore>,
    vectors: Arc<VectorStore>,
    records: Arc<RecordStore>,
    llm: Arc<dyn LLMClient>,
    embedding_cache: EmbeddingCache,
    calculator: ConfidenceCalculator,
    config: EngineConfig,
    events: EventBus,
}

impl ClassificationPipeline {
    pub fn new(
        graph: Arc<GraphStore>,
        vectors: Arc<VectorStore>,
        records: Arc<RecordStore>,
        llm: Arc<dyn LLMClient>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let calculator = ConfidenceCalculator::new(config.ensemble_weights)
            .with_calibration(config.calibration_a, config.calibration_b)
            .with_temperature(config.calibration_temperature);

        Ok(Self {
            graph,
            vectors,
            records,
            llm,
            embedding_cache: EmbeddingCache::default(),
            calculator,
            config,
            events: EventBus::default(),
        })
    }

    /// Replace the event bus (to share one bus across services).
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// The event bus this pipeline publishes to.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Classify a ticket, assigning it a fresh id.
    pub async fn classify(&self, request: ClassifyRequest) -> Result<ClassificationOutcome> {
        self.classify_with_id(Uuid::new_v4(), request).await
    }

    /// Classify a ticket under a caller-supplied id.
    pub async fn classify_with_id(
        &self,
        ticket_id: Uuid,
        request: ClassifyRequest,
    ) -> Result<ClassificationOutcome> {
        request.validate()?;

        let started = Instant::now();
        let id_str = ticket_id.to_string();
        let mut errors: Vec<String> = Vec::new();

        info!("Classifying ticket {}: {}", id_str, snippet(&request.title, 50));

        // Stage 1: extract_keywords
        let stage_start = self.stage_started(&id_str, Stage::ExtractKeywords);
        let keywords = match self.extract_keywords(&request).await {
            Ok(keywords) => keywords,
            Err(e) => {
                errors.push(format!("Keyword extraction: {}", e));
                Vec::new()
            }
        };
        self.stage_completed(&id_str, Stage::ExtractKeywords, stage_start);

        // Stage 2: query_graph
        let stage_start = self.stage_started(&id_str, Stage::QueryGraph);
        let graph_analysis = match self.query_graph(&keywords) {
            Ok(analysis) => {
                if analysis.paths.is_empty() {
                    errors.push("No graph paths found".to_string());
                }
                analysis
            }
            Err(e) => {
                errors.push(format!("Graph query: {}", e));
                GraphAnalysis::default()
            }
        };
        self.stage_completed(&id_str, Stage::QueryGraph, stage_start);

        // Stage 3: search_vectors
        let stage_start = self.stage_started(&id_str, Stage::SearchVectors);
        let (vector_analysis, embedding) = match self.search_vectors(&request).await {
            Ok((analysis, embedding)) => (analysis, Some(embedding)),
            Err(e) => {
                errors.push(format!("Vector search: {}", e));
                (VectorAnalysis::default(), None)
            }
        };
        self.stage_completed(&id_str, Stage::SearchVectors, stage_start);

        // Stage 4: llm_judge
        let stage_start = self.stage_started(&id_str, Stage::LlmJudge);
        let llm_analysis = match self.llm_judge(&request, &graph_analysis, &vector_analysis).await {
            Ok(analysis) => analysis,
            Err(e) => {
                errors.push(format!("LLM judgment: {}", e));
                self.judge_fallback(&graph_analysis, &vector_analysis)
            }
        };
        self.stage_completed(&id_str, Stage::LlmJudge, stage_start);

        // Stage 5: calculate_confidence
        let stage_start = self.stage_started(&id_str, Stage::CalculateConfidence);
        let graph_pred = component(PredictionSource::Graph, &graph_analysis.prediction, graph_analysis.confidence);
        let vector_pred = component(PredictionSource::Vector, &vector_analysis.prediction, vector_analysis.confidence);
        let llm_pred = component(PredictionSource::Llm, &llm_analysis.prediction, llm_analysis.confidence);
        let mut ensemble = self.calculator.calculate(&graph_pred, &vector_pred, &llm_pred);
        self.stage_completed(&id_str, Stage::CalculateConfidence, stage_start);

        // Stage 6: route_decision
        let stage_start = self.stage_started(&id_str, Stage::RouteDecision);
        let all_failed = graph_analysis.confidence == 0.0
            && vector_analysis.confidence == 0.0
            && llm_analysis.confidence == 0.0;
        if all_failed {
            ensemble.calibrated_score = 0.0;
        }
        let routing = self.route(all_failed, ensemble.calibrated_score, ensemble.component_agreement, &errors);
        self.stage_completed(&id_str, Stage::RouteDecision, stage_start);

        match routing.outcome {
            RoutingOutcome::AutoResolve => {
                info!("Auto-resolved ticket {} at {:.2}", id_str, ensemble.calibrated_score)
            }
            _ => info!(
                "Routing ticket {} to {:?}: {}",
                id_str,
                routing.outcome,
                routing.hitl_reason.as_deref().unwrap_or("")
            ),
        }

        let outcome = ClassificationOutcome {
            ticket_id,
            classification: FinalClassification {
                level1: ensemble.level1.clone(),
                level2: ensemble.level2.clone(),
                level3: ensemble.level3.clone(),
                confidence: ensemble.calibrated_score,
            },
            confidence: ensemble,
            graph_analysis,
            vector_analysis,
            llm_analysis,
            routing,
            processing: ProcessingInfo {
                time_ms: started.elapsed().as_millis() as u64,
                errors,
                timestamp: chrono::Utc::now(),
            },
        };

        // Side effects never fail the classification.
        self.persist_results(&request, &outcome, embedding).await;

        if let Ok(payload) = serde_json::to_value(&outcome.confidence) {
            self.events
                .emit(ClassificationEvent::classification_complete(&id_str, payload));
        }

        Ok(outcome)
    }

    // ==================== Stages ====================

    /// Ask the LLM for 5-10 classification keywords.
    ///
    /// Falls back to comma-splitting when the reply is not a JSON array.
    async fn extract_keywords(&self, request: &ClassifyRequest) -> Result<Vec<String>> {
        let prompt = format!(
            "Extract 5-10 relevant keywords from this support ticket that would help classify it.\n\
             Return only the keywords as a JSON array of strings.\n\n\
             Ticket:\nTitle: {}\nDescription: {}\n\nKeywords (JSON array):",
            request.title, request.description
        );

        let response = self
            .complete_with_timeout(
                CompletionRequest::new()
                    .with_model(&self.config.chat_model)
                    .with_temperature(0.1)
                    .with_message(ChatMessage::user(prompt)),
            )
            .await?;

        let keywords = parse_keywords(&response.content);
        debug!("Extracted {} keywords", keywords.len());
        Ok(keywords)
    }

    /// Query the taxonomy graph for candidate paths.
    fn query_graph(&self, keywords: &[String]) -> Result<GraphAnalysis> {
        let paths = self.graph.find_candidate_paths(keywords, GRAPH_CANDIDATES)?;

        let (prediction, confidence) = match paths.first() {
            Some(top) => (Some(top.path()), top.confidence),
            None => (None, 0.0),
        };

        debug!(
            "Graph query found {} paths, top confidence {:.2}",
            paths.len(),
            confidence
        );
        Ok(GraphAnalysis {
            paths,
            prediction,
            confidence,
        })
    }

    /// Embed the ticket and aggregate similar tickets into a prediction.
    async fn search_vectors(
        &self,
        request: &ClassifyRequest,
    ) -> Result<(VectorAnalysis, Vec<f32>)> {
        let text = request.combined_text();
        let embedding = self.embed_text(&text).await?;

        let matches = self.vectors.search(&embedding, VECTOR_MATCHES, 0.0, None)?;
        if matches.is_empty() {
            return Ok((
                VectorAnalysis {
                    matches: Vec::new(),
                    prediction: None,
                    confidence: 0.0,
                },
                embedding,
            ));
        }

        let considered = &matches[..matches.len().min(VECTOR_TOP)];
        let (path, count, total_score) =
            aggregate_matches(considered).expect("non-empty matches produce at least one group");

        let confidence =
            ((total_score / count as f64) * (count as f64 / considered.len() as f64)).min(1.0);

        debug!(
            "Vector search: {} matches, prediction {} with confidence {:.2}",
            matches.len(),
            path,
            confidence
        );

        let analysis = VectorAnalysis {
            matches: considered.to_vec(),
            prediction: Some(path),
            confidence,
        };
        Ok((analysis, embedding))
    }

    /// Ask the LLM for the decisive classification judgment.
    async fn llm_judge(
        &self,
        request: &ClassifyRequest,
        graph: &GraphAnalysis,
        vectors: &VectorAnalysis,
    ) -> Result<LlmAnalysis> {
        let mut graph_context = String::new();
        if !graph.paths.is_empty() {
            graph_context.push_str("Graph-based suggestions:\n");
            for (i, path) in graph.paths.iter().take(PROMPT_PATHS).enumerate() {
                graph_context.push_str(&format!(
                    "{}. {} > {} > {} (confidence: {:.2})\n",
                    i + 1,
                    path.level1,
                    path.level2,
                    path.level3,
                    path.confidence
                ));
            }
        }

        let mut vector_context = String::new();
        if !vectors.matches.is_empty() {
            vector_context.push_str("\nSimilar historical tickets:\n");
            for (i, m) in vectors.matches.iter().take(PROMPT_TICKETS).enumerate() {
                vector_context.push_str(&format!(
                    "{}. [{} > {} > {}] \"{}\" (similarity: {:.2})\n",
                    i + 1,
                    m.level1,
                    m.level2,
                    m.level3,
                    snippet(&m.title, 80),
                    m.similarity
                ));
            }
        }

        let system_prompt = "You are an expert support ticket classifier. Your task is to classify tickets into a 3-level hierarchy.\n\n\
            Classification Hierarchy Levels:\n\
            - Level 1: Main category (e.g., \"Technical Support\", \"Billing & Payments\", \"Account Management\")\n\
            - Level 2: Subcategory (e.g., \"Authentication\", \"Performance\", \"Invoicing\")\n\
            - Level 3: Specific issue type (e.g., \"Password Reset Issues\", \"Slow Response Time\", \"Missing Invoice\")\n\n\
            You will be provided with suggestions from a graph database and similar historical tickets. Use these as guidance but make your own judgment.\n\n\
            Respond with a JSON object containing:\n\
            {\n\
                \"level1\": \"Category name\",\n\
                \"level2\": \"Subcategory name\",\n\
                \"level3\": \"Specific issue type\",\n\
                \"confidence\": 0.0-1.0,\n\
                \"reasoning\": \"Brief explanation of classification decision\"\n\
            }";

        let user_prompt = format!(
            "Classify this support ticket:\n\n\
             Title: {}\nDescription: {}\nPriority: {}\n\n{}\n{}\n\
             Provide your classification as JSON:",
            request.title,
            request.description,
            request.priority.as_str(),
            graph_context,
            vector_context
        );

        let response = self
            .complete_with_timeout(
                CompletionRequest::new()
                    .with_model(&self.config.chat_model)
                    .with_temperature(0.1)
                    .with_message(ChatMessage::system(system_prompt))
                    .with_message(ChatMessage::user(user_prompt)),
            )
            .await?;

        let judgment = parse_judgment(&response.content)?;
        debug!(
            "LLM judgment: {} > {} > {} at {:.2}",
            judgment.level1, judgment.level2, judgment.level3, judgment.confidence
        );

        Ok(LlmAnalysis {
            prediction: Some(CategoryPath::new(
                judgment.level1,
                judgment.level2,
                judgment.level3,
            )),
            confidence: judgment.confidence,
            reasoning: judgment.reasoning,
        })
    }

    /// Degrade gracefully when the judge fails: prefer the graph prediction,
    /// then the vector prediction, each discounted.
    fn judge_fallback(&self, graph: &GraphAnalysis, vectors: &VectorAnalysis) -> LlmAnalysis {
        if let Some(prediction) = &graph.prediction {
            return LlmAnalysis {
                prediction: Some(prediction.clone()),
                confidence: graph.confidence * JUDGE_FALLBACK_FACTOR,
                reasoning: "Fell back to graph prediction".to_string(),
            };
        }
        if let Some(prediction) = &vectors.prediction {
            return LlmAnalysis {
                prediction: Some(prediction.clone()),
                confidence: vectors.confidence * JUDGE_FALLBACK_FACTOR,
                reasoning: "Fell back to vector prediction".to_string(),
            };
        }
        LlmAnalysis::default()
    }

    /// Deterministic routing on the final ensemble result.
    fn route(
        &self,
        all_failed: bool,
        calibrated: f64,
        agreement: f64,
        errors: &[String],
    ) -> RoutingDecision {
        if all_failed {
            return RoutingDecision::escalate("classification failed");
        }

        let mut needs_hitl = false;
        let mut reasons: Vec<String> = Vec::new();

        if calibrated < self.config.auto_resolve_threshold {
            needs_hitl = true;
            if calibrated < self.config.hitl_threshold {
                reasons.push(format!("Very low confidence ({:.2}) - escalation", calibrated));
            } else {
                reasons.push(format!("Below auto-resolve threshold ({:.2})", calibrated));
            }
        }
        if agreement < self.config.agreement_floor_review {
            needs_hitl = true;
            reasons.push(format!("Low component agreement ({:.2})", agreement));
        }
        if !errors.is_empty() {
            needs_hitl = true;
            reasons.push(format!("Processing errors: {}", errors.len()));
        }

        if !needs_hitl {
            RoutingDecision::auto_resolve()
        } else if calibrated < self.config.hitl_threshold {
            RoutingDecision::escalate(reasons.join("; "))
        } else {
            RoutingDecision::review(reasons.join("; "))
        }
    }

    // ==================== Side Effects ====================

    /// Persist everything a finished classification leaves behind.
    ///
    /// Failures here are logged and swallowed: storage feeds the learning
    /// loop and is tolerable to miss occasionally.
    async fn persist_results(
        &self,
        request: &ClassifyRequest,
        outcome: &ClassificationOutcome,
        embedding: Option<Vec<f32>>,
    ) {
        let classification = &outcome.classification;
        let has_path = !classification.level3.is_empty();

        if has_path {
            // Store the embedding tagged with the final category so future
            // classifications see this ticket.
            let embedding = match embedding {
                Some(e) => Some(e),
                None => self.embed_text(&request.combined_text()).await.ok(),
            };
            match embedding {
                Some(embedding) => {
                    let record = VectorRecord::new(
                        outcome.ticket_id,
                        embedding,
                        &request.title,
                        &request.description,
                        &classification.level1,
                        &classification.level2,
                        &classification.level3,
                        classification.confidence,
                    );
                    if let Err(e) = self.vectors.insert(&record) {
                        warn!("Failed to store ticket embedding: {}", e);
                    }
                }
                None => warn!("Skipping vector insert: no embedding available"),
            }

            match self.graph.add_ticket_classification(
                &outcome.ticket_id.to_string(),
                &classification.level3,
                classification.confidence,
            ) {
                Ok(true) => {
                    if let Err(e) = self.graph.reinforce_path(&classification.path()) {
                        warn!("Failed to reinforce path: {}", e);
                    }
                }
                Ok(false) => {}
                Err(e) => warn!("Failed to link ticket in graph: {}", e),
            }
        }

        let status = match outcome.routing.outcome {
            RoutingOutcome::AutoResolve => TicketStatus::Classified,
            RoutingOutcome::Review => TicketStatus::PendingReview,
            RoutingOutcome::Escalate => TicketStatus::Escalated,
        };

        let mut ticket = TicketRecord::new(outcome.ticket_id, &request.title, &request.description);
        ticket.priority = request.priority;
        ticket.source = request.source.clone();
        ticket.customer_id = request.customer_id.clone();
        ticket.metadata = request.metadata.clone();
        ticket.status = status;
        ticket.processing_time_ms = Some(outcome.processing.time_ms);
        if has_path {
            ticket.level1 = Some(classification.level1.clone());
            ticket.level2 = Some(classification.level2.clone());
            ticket.level3 = Some(classification.level3.clone());
            ticket.classification_confidence = Some(classification.confidence);
            ticket.classified_at = Some(chrono::Utc::now());
        }
        if let Err(e) = self.records.upsert_ticket(&ticket) {
            warn!("Failed to persist ticket row: {}", e);
        }

        let metric = MetricRecord {
            id: Uuid::new_v4(),
            ticket_id: outcome.ticket_id,
            timestamp: outcome.processing.timestamp,
            level1: classification.level1.clone(),
            level2: classification.level2.clone(),
            level3: classification.level3.clone(),
            graph_confidence: outcome.confidence.graph_confidence,
            vector_confidence: outcome.confidence.vector_confidence,
            llm_confidence: outcome.confidence.llm_confidence,
            final_confidence: outcome.confidence.calibrated_score,
            component_agreement: outcome.confidence.component_agreement,
            auto_resolved: outcome.routing.auto_resolved,
            requires_hitl: outcome.routing.requires_hitl,
            processing_time_ms: outcome.processing.time_ms,
            was_correct: None,
        };
        if let Err(e) = self.records.record_metric(&metric) {
            warn!("Failed to record classification metric: {}", e);
        }

        if outcome.routing.requires_hitl {
            self.create_review_task(request, outcome);
        }
    }

    /// Create the HITL task for a classification routed to review.
    fn create_review_task(&self, request: &ClassifyRequest, outcome: &ClassificationOutcome) {
        let similar: Vec<SimilarTicketRef> = outcome
            .vector_analysis
            .matches
            .iter()
            .take(VECTOR_TOP)
            .map(|m| SimilarTicketRef {
                ticket_id: m.ticket_id,
                category: format!("{} > {} > {}", m.level1, m.level2, m.level3),
                similarity: m.similarity,
            })
            .collect();

        let details = HashMap::from([
            ("graph_confidence".to_string(), outcome.confidence.graph_confidence),
            ("vector_confidence".to_string(), outcome.confidence.vector_confidence),
            ("llm_confidence".to_string(), outcome.confidence.llm_confidence),
            ("raw_combined_score".to_string(), outcome.confidence.raw_combined_score),
            ("calibrated_score".to_string(), outcome.confidence.calibrated_score),
            ("component_agreement".to_string(), outcome.confidence.component_agreement),
            ("entropy".to_string(), outcome.confidence.entropy),
        ]);

        let priority = match request.priority {
            TicketPriority::Critical => HitlPriority::Urgent,
            TicketPriority::High => HitlPriority::High,
            TicketPriority::Medium => HitlPriority::Normal,
            TicketPriority::Low => HitlPriority::Low,
        };

        let reason = outcome
            .routing
            .hitl_reason
            .clone()
            .unwrap_or_else(|| "Manual review required".to_string());

        let mut task = HitlTask::new(
            outcome.ticket_id,
            &request.title,
            &request.description,
            &outcome.classification.path(),
            outcome.confidence.calibrated_score,
            reason,
        )
        .with_priority(priority)
        .with_confidence_details(details)
        .with_similar_tickets(similar);
        task.ticket_source = request.source.clone();

        if let Err(e) = self.records.create_task(&task) {
            warn!("Failed to create HITL task: {}", e);
        }
    }

    // ==================== Helpers ====================

    async fn complete_with_timeout(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let timeout = Duration::from_secs(self.config.llm_timeout_secs);
        match tokio::time::timeout(timeout, self.llm.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(timeout.as_millis() as u64)),
        }
    }

    /// Embed a text, consulting the content-keyed cache first.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(embedding) = self.embedding_cache.get(text).await {
            return Ok(embedding);
        }

        let response = self
            .llm
            .embed(EmbeddingRequest::single(text).with_model(&self.config.embedding_model))
            .await?;
        let embedding = response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| Error::embedding("provider returned no embedding"))?;

        self.embedding_cache.put(text, embedding.clone()).await;
        Ok(embedding)
    }

    fn stage_started(&self, ticket_id: &str, stage: Stage) -> Instant {
        self.events
            .emit(ClassificationEvent::stage_started(ticket_id, stage));
        Instant::now()
    }

    fn stage_completed(&self, ticket_id: &str, stage: Stage, started: Instant) {
        self.events.emit(ClassificationEvent::stage_completed(
            ticket_id,
            stage,
            started.elapsed().as_millis() as u64,
        ));
    }
}

fn component(
    source: PredictionSource,
    prediction: &Option<CategoryPath>,
    confidence: f64,
) -> ComponentPrediction {
    match prediction {
        Some(path) => ComponentPrediction::new(
            source,
            &path.level1,
            &path.level2,
            &path.level3,
            confidence,
        ),
        None => ComponentPrediction::absent(source),
    }
}

fn snippet(s: &str, max: usize) -> &str {
    let mut end = s.len().min(max);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Group matches by full path and pick the winner: most votes first, then
/// summed similarity.
///
/// Groups are kept in first-seen order (matches arrive ranked by similarity)
/// and a later group must strictly beat the running best, so an exact
/// count-and-score tie goes to the group of the higher-ranked match. Near-
/// duplicate tickets make such ties real, not hypothetical.
fn aggregate_matches(considered: &[crate::vector::SearchMatch]) -> Option<(CategoryPath, usize, f64)> {
    let mut groups: Vec<(CategoryPath, usize, f64)> = Vec::new();
    for m in considered {
        let path = CategoryPath::new(&m.level1, &m.level2, &m.level3);
        match groups.iter_mut().find(|(p, _, _)| *p == path) {
            Some((_, count, total)) => {
                *count += 1;
                *total += m.similarity;
            }
            None => groups.push((path, 1, m.similarity)),
        }
    }

    let mut best: Option<(CategoryPath, usize, f64)> = None;
    for (path, count, total) in groups {
        match &best {
            Some((_, best_count, best_total))
                if (count, total) <= (*best_count, *best_total) => {}
            _ => best = Some((path, count, total)),
        }
    }
    best
}

/// Strip a Markdown code fence wrapper from an LLM reply.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.split_once("```json").map(|(_, rest)| rest) {
        if let Some((inner, _)) = rest.split_once("```") {
            return inner.trim();
        }
        return rest.trim();
    }
    if let Some(rest) = trimmed.split_once("```").map(|(_, rest)| rest) {
        if let Some((inner, _)) = rest.split_once("```") {
            return inner.trim();
        }
        return rest.trim();
    }
    trimmed
}

/// Parse a keyword reply: JSON array if possible, comma-split otherwise.
fn parse_keywords(text: &str) -> Vec<String> {
    let cleaned = strip_code_fences(text);

    if cleaned.starts_with('[') {
        if let Ok(keywords) = serde_json::from_str::<Vec<String>>(cleaned) {
            return keywords
                .into_iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
        }
    }

    cleaned
        .split(',')
        .map(|k| k.trim().trim_matches(['"', '\'', '[', ']']).trim().to_string())
        .filter(|k| !k.is_empty())
        .collect()
}

#[derive(Debug, Deserialize)]
struct LlmJudgment {
    level1: String,
    level2: String,
    level3: String,
    #[serde(default = "default_judgment_confidence")]
    confidence: f64,
    #[serde(default)]
    reasoning: String,
}

fn default_judgment_confidence() -> f64 {
    0.8
}

/// Parse the judge reply as strict JSON after removing fence wrappers.
fn parse_judgment(text: &str) -> Result<LlmJudgment> {
    let cleaned = strip_code_fences(text);
    serde_json::from_str(cleaned)
        .map_err(|e| Error::llm(format!("failed to parse judgment JSON: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ClassificationEventType;
    use crate::graph::Hierarchy;
    use crate::llm::{CompletionResponse, EmbeddingResponse, TokenUsage};
    use crate::storage::HitlStatus;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    const DIM: usize = 4;

    /// Scripted mock client: pops completion replies in order; embeddings
    /// are a fixed vector or a scripted failure.
    struct MockLlm {
        completions: Mutex<VecDeque<std::result::Result<String, String>>>,
        embedding: std::result::Result<Vec<f32>, String>,
    }

    impl MockLlm {
        fn new(
            completions: Vec<std::result::Result<String, String>>,
            embedding: std::result::Result<Vec<f32>, String>,
        ) -> Self {
            Self {
                completions: Mutex::new(completions.into()),
                embedding,
            }
        }
    }

    #[async_trait]
    impl LLMClient for MockLlm {
        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
            let next = self
                .completions
                .lock()
                .await
                .pop_front()
                .unwrap_or(Err("mock exhausted".to_string()));
            match next {
                Ok(content) => Ok(CompletionResponse {
                    id: "mock".to_string(),
                    model: request.model.unwrap_or_else(|| "mock-model".to_string()),
                    content,
                    usage: TokenUsage {
                        input_tokens: 10,
                        output_tokens: 5,
                    },
                    timestamp: chrono::Utc::now(),
                }),
                Err(message) => Err(Error::llm(message)),
            }
        }

        async fn embed(&self, _request: EmbeddingRequest) -> Result<EmbeddingResponse> {
            match &self.embedding {
                Ok(embedding) => Ok(EmbeddingResponse {
                    model: "mock-embed".to_string(),
                    embeddings: vec![embedding.clone()],
                    usage: TokenUsage::default(),
                }),
                Err(message) => Err(Error::embedding(message.clone())),
            }
        }

        fn provider(&self) -> &'static str {
            "mock"
        }
    }

    fn auth_hierarchy() -> Hierarchy {
        let mut h = Hierarchy::new();
        h.add_path("Technical Support", "Authentication", "Password Reset Issues");
        h.add_path("Technical Support", "Performance", "Slow Response Time");
        h.add_path("Billing", "Payments", "Failed Transactions");
        h
    }

    fn judge_reply(path: (&str, &str, &str), confidence: f64) -> String {
        format!(
            "```json\n{{\"level1\": \"{}\", \"level2\": \"{}\", \"level3\": \"{}\", \
             \"confidence\": {}, \"reasoning\": \"test\"}}\n```",
            path.0, path.1, path.2, confidence
        )
    }

    fn pipeline_with(llm: MockLlm) -> ClassificationPipeline {
        let graph = Arc::new(GraphStore::in_memory().unwrap());
        graph.load_hierarchy(&auth_hierarchy()).unwrap();
        let vectors = Arc::new(VectorStore::in_memory(DIM).unwrap());
        let records = Arc::new(RecordStore::in_memory().unwrap());
        let config = EngineConfig::default().with_embedding_dim(DIM);

        ClassificationPipeline::new(graph, vectors, records, Arc::new(llm), config).unwrap()
    }

    fn seed_similar_tickets(pipeline: &ClassificationPipeline, path: (&str, &str, &str)) {
        for i in 0..3 {
            let record = VectorRecord::new(
                Uuid::new_v4(),
                vec![1.0, 0.01 * i as f32, 0.0, 0.0],
                &format!("Similar ticket {}", i),
                "Historical description",
                path.0,
                path.1,
                path.2,
                0.9,
            );
            pipeline.vectors.insert(&record).unwrap();
        }
    }

    fn password_request() -> ClassifyRequest {
        ClassifyRequest::new(
            "Cannot access email after password reset",
            "User reports being unable to login after resetting password",
        )
        .with_priority(TicketPriority::High)
    }

    #[tokio::test]
    async fn test_unanimous_high_confidence_auto_resolves() {
        let path = ("Technical Support", "Authentication", "Password Reset Issues");
        let llm = MockLlm::new(
            vec![
                Ok(r#"["password", "reset"]"#.to_string()),
                Ok(judge_reply(path, 0.85)),
            ],
            Ok(vec![1.0, 0.0, 0.0, 0.0]),
        );
        let pipeline = pipeline_with(llm);
        seed_similar_tickets(&pipeline, path);

        let outcome = pipeline.classify(password_request()).await.unwrap();

        assert_eq!(outcome.classification.level3, "Password Reset Issues");
        assert_eq!(outcome.confidence.component_agreement, 1.0);
        assert!(outcome.routing.auto_resolved);
        assert!(!outcome.routing.requires_hitl);
        assert!(outcome.processing.errors.is_empty());
        assert!(outcome.confidence.calibrated_score >= 0.7);

        // ClassifiedAs link exists and the leaf count moved exactly once.
        let leaf = pipeline
            .graph
            .get_category(crate::graph::CategoryLevel::Level3, "Password Reset Issues")
            .unwrap()
            .unwrap();
        assert_eq!(leaf.ticket_count, 1);

        // Ticket row, vector row, and metric row were persisted.
        let ticket = pipeline.records.get_ticket(outcome.ticket_id).unwrap().unwrap();
        assert_eq!(ticket.status, TicketStatus::Classified);
        assert!(pipeline.vectors.get(outcome.ticket_id).unwrap().is_some());
        let metric = pipeline
            .records
            .metric_for_ticket(outcome.ticket_id)
            .unwrap()
            .unwrap();
        assert!(metric.auto_resolved);

        // No review task for an auto-resolved classification.
        assert!(pipeline
            .records
            .list_tasks(Some(HitlStatus::Pending), 10)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_vector_failure_degrades_and_routes_to_review() {
        let path = ("Technical Support", "Authentication", "Password Reset Issues");
        let llm = MockLlm::new(
            vec![
                Ok(r#"["password", "reset"]"#.to_string()),
                Ok(judge_reply(path, 0.85)),
            ],
            Err("embedding service down".to_string()),
        );
        let pipeline = pipeline_with(llm);

        let outcome = pipeline.classify(password_request()).await.unwrap();

        assert_eq!(outcome.vector_analysis.confidence, 0.0);
        assert!(outcome
            .processing
            .errors
            .iter()
            .any(|e| e.starts_with("Vector search")));
        // Graph and judge still agree, but errors force review.
        assert!(!outcome.routing.auto_resolved);
        assert_eq!(outcome.routing.outcome, RoutingOutcome::Review);

        let tasks = pipeline.records.list_tasks(Some(HitlStatus::Pending), 10).unwrap();
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].routing_reason.contains("Processing errors"));

        let ticket = pipeline.records.get_ticket(outcome.ticket_id).unwrap().unwrap();
        assert_eq!(ticket.status, TicketStatus::PendingReview);
    }

    #[tokio::test]
    async fn test_llm_failure_falls_back_to_graph_prediction() {
        let llm = MockLlm::new(
            vec![
                Ok(r#"["password", "reset"]"#.to_string()),
                Err("model overloaded".to_string()),
            ],
            Ok(vec![1.0, 0.0, 0.0, 0.0]),
        );
        let pipeline = pipeline_with(llm);

        let outcome = pipeline.classify(password_request()).await.unwrap();

        let graph_prediction = outcome.graph_analysis.prediction.clone().unwrap();
        assert_eq!(outcome.llm_analysis.prediction, Some(graph_prediction));
        assert!(
            (outcome.llm_analysis.confidence
                - outcome.graph_analysis.confidence * JUDGE_FALLBACK_FACTOR)
                .abs()
                < 1e-9
        );
        assert!(outcome
            .processing
            .errors
            .iter()
            .any(|e| e.starts_with("LLM judgment")));
    }

    #[tokio::test]
    async fn test_all_components_failed_escalates_with_zero_score() {
        // Empty graph, failing embeddings, failing LLM.
        let llm = MockLlm::new(
            vec![
                Err("down".to_string()),
                Err("down".to_string()),
            ],
            Err("down".to_string()),
        );
        let graph = Arc::new(GraphStore::in_memory().unwrap());
        let vectors = Arc::new(VectorStore::in_memory(DIM).unwrap());
        let records = Arc::new(RecordStore::in_memory().unwrap());
        let config = EngineConfig::default().with_embedding_dim(DIM);
        let pipeline =
            ClassificationPipeline::new(graph, vectors, records, Arc::new(llm), config).unwrap();

        let outcome = pipeline.classify(password_request()).await.unwrap();

        assert_eq!(outcome.confidence.calibrated_score, 0.0);
        assert_eq!(outcome.routing.outcome, RoutingOutcome::Escalate);
        assert_eq!(
            outcome.routing.hitl_reason.as_deref(),
            Some("classification failed")
        );

        let ticket = pipeline.records.get_ticket(outcome.ticket_id).unwrap().unwrap();
        assert_eq!(ticket.status, TicketStatus::Escalated);
        assert!(ticket.level3.is_none());

        // Escalations still open a review task.
        let tasks = pipeline.records.list_tasks(Some(HitlStatus::Pending), 10).unwrap();
        assert_eq!(tasks.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_request_rejected_at_boundary() {
        let llm = MockLlm::new(vec![], Ok(vec![0.0; DIM]));
        let pipeline = pipeline_with(llm);

        let err = pipeline
            .classify(ClassifyRequest::new("", "description"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_stage_events_emitted_in_order() {
        let path = ("Technical Support", "Authentication", "Password Reset Issues");
        let llm = MockLlm::new(
            vec![
                Ok(r#"["password"]"#.to_string()),
                Ok(judge_reply(path, 0.9)),
            ],
            Ok(vec![1.0, 0.0, 0.0, 0.0]),
        );
        let pipeline = pipeline_with(llm);
        let mut rx = pipeline.events().subscribe();

        pipeline.classify(password_request()).await.unwrap();

        // Six started/completed pairs in stage order, then the completion.
        for stage in Stage::ALL {
            let started = rx.recv().await.unwrap();
            assert_eq!(started.event_type, ClassificationEventType::StageStarted);
            assert_eq!(started.stage, Some(stage));
            let completed = rx.recv().await.unwrap();
            assert_eq!(completed.event_type, ClassificationEventType::StageCompleted);
            assert_eq!(completed.stage, Some(stage));
        }
        let last = rx.recv().await.unwrap();
        assert_eq!(
            last.event_type,
            ClassificationEventType::ClassificationComplete
        );
        assert!(last.get_metadata("ensemble").is_some());
    }

    #[tokio::test]
    async fn test_reclassification_does_not_double_count() {
        let path = ("Technical Support", "Authentication", "Password Reset Issues");
        let mk_llm = || {
            MockLlm::new(
                vec![
                    Ok(r#"["password", "reset"]"#.to_string()),
                    Ok(judge_reply(path, 0.85)),
                ],
                Ok(vec![1.0, 0.0, 0.0, 0.0]),
            )
        };
        let pipeline = pipeline_with(mk_llm());
        let ticket_id = Uuid::new_v4();

        pipeline
            .classify_with_id(ticket_id, password_request())
            .await
            .unwrap();

        // Re-run the same ticket with a fresh scripted client.
        let pipeline2 = ClassificationPipeline::new(
            Arc::clone(&pipeline.graph),
            Arc::clone(&pipeline.vectors),
            Arc::clone(&pipeline.records),
            Arc::new(mk_llm()),
            EngineConfig::default().with_embedding_dim(DIM),
        )
        .unwrap();
        pipeline2
            .classify_with_id(ticket_id, password_request())
            .await
            .unwrap();

        let leaf = pipeline
            .graph
            .get_category(crate::graph::CategoryLevel::Level3, "Password Reset Issues")
            .unwrap()
            .unwrap();
        assert_eq!(leaf.ticket_count, 1);
        // Exactly one vector row survives the duplicate insert.
        assert_eq!(pipeline.vectors.stats().unwrap().records, 1);
    }

    fn search_match(path: (&str, &str, &str), similarity: f64) -> crate::vector::SearchMatch {
        crate::vector::SearchMatch {
            ticket_id: Uuid::new_v4(),
            title: "t".to_string(),
            description_snippet: "d".to_string(),
            level1: path.0.to_string(),
            level2: path.1.to_string(),
            level3: path.2.to_string(),
            was_correct: true,
            confidence: 0.9,
            similarity,
        }
    }

    #[test]
    fn test_aggregate_matches_count_beats_score() {
        let winner = aggregate_matches(&[
            search_match(("A", "B", "C"), 0.9),
            search_match(("X", "Y", "Z"), 0.5),
            search_match(("X", "Y", "Z"), 0.4),
        ])
        .unwrap();
        // Two weaker matches outvote one strong one.
        assert_eq!(winner.0, CategoryPath::new("X", "Y", "Z"));
        assert_eq!(winner.1, 2);
    }

    #[test]
    fn test_aggregate_matches_tie_prefers_higher_ranked_group() {
        // Both groups have count 2 and summed similarity 1.5; the group of
        // the top-ranked match wins, deterministically.
        let winner = aggregate_matches(&[
            search_match(("A", "B", "C"), 1.0),
            search_match(("X", "Y", "Z"), 0.75),
            search_match(("X", "Y", "Z"), 0.75),
            search_match(("A", "B", "C"), 0.5),
        ])
        .unwrap();
        assert_eq!(winner.0, CategoryPath::new("A", "B", "C"));
        assert_eq!(winner.1, 2);
        assert!((winner.2 - 1.5).abs() < 1e-9);

        // A later group still wins when it is strictly better.
        let winner = aggregate_matches(&[
            search_match(("A", "B", "C"), 0.5),
            search_match(("X", "Y", "Z"), 0.9),
        ])
        .unwrap();
        assert_eq!(winner.0, CategoryPath::new("X", "Y", "Z"));

        assert!(aggregate_matches(&[]).is_none());
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(
            strip_code_fences("Here you go:\n```json\n{\"a\": 1}\n```\nDone."),
            "{\"a\": 1}"
        );
    }

    #[test]
    fn test_parse_keywords_json_array() {
        let keywords = parse_keywords(r#"["password", "reset", "login"]"#);
        assert_eq!(keywords, vec!["password", "reset", "login"]);
    }

    #[test]
    fn test_parse_keywords_comma_fallback() {
        let keywords = parse_keywords("\"password\", 'reset', login");
        assert_eq!(keywords, vec!["password", "reset", "login"]);
    }

    #[test]
    fn test_parse_keywords_empty() {
        assert!(parse_keywords("").is_empty());
        assert!(parse_keywords("   ").is_empty());
    }

    #[test]
    fn test_parse_judgment_defaults() {
        let judgment =
            parse_judgment(r#"{"level1": "A", "level2": "B", "level3": "C"}"#).unwrap();
        assert_eq!(judgment.confidence, 0.8);
        assert_eq!(judgment.reasoning, "");

        assert!(parse_judgment("not json").is_err());
        assert!(parse_judgment(r#"{"level1": "A"}"#).is_err());
    }
}
