//! Ensemble confidence calculation.
//!
//! Fuses the three component predictions (graph traversal, vector
//! similarity, LLM judgment) into one calibrated score. The calculator is a
//! pure function of its inputs: thresholds and routing policy live in
//! [`crate::config::EngineConfig`], not here.
//!
//! The fusion steps:
//! 1. Hierarchical agreement across the three levels
//! 2. Weighted raw ensemble score
//! 3. Agreement adjustment
//! 4. Prediction entropy (diagnostic only)
//! 5. Platt scaling
//! 6. Temperature scaling
//! 7. Per-level weighted majority vote for the final path

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::EnsembleWeights;

/// Which classifier produced a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionSource {
    Graph,
    Vector,
    Llm,
}

impl std::fmt::Display for PredictionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Graph => write!(f, "graph"),
            Self::Vector => write!(f, "vector"),
            Self::Llm => write!(f, "llm"),
        }
    }
}

/// A prediction from a single component.
///
/// An absent prediction (component failed or returned nothing) is modeled as
/// empty level names with confidence 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentPrediction {
    pub level1: String,
    pub level2: String,
    pub level3: String,
    pub confidence: f64,
    pub source: PredictionSource,
}

impl ComponentPrediction {
    pub fn new(
        source: PredictionSource,
        level1: impl Into<String>,
        level2: impl Into<String>,
        level3: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            level1: level1.into(),
            level2: level2.into(),
            level3: level3.into(),
            confidence,
            source,
        }
    }

    /// A zero-confidence placeholder for a failed component.
    pub fn absent(source: PredictionSource) -> Self {
        Self::new(source, "", "", "", 0.0)
    }
}

/// Result of ensemble confidence calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleResult {
    /// Final per-level majority prediction.
    pub level1: String,
    pub level2: String,
    pub level3: String,

    /// Component scores as supplied.
    pub graph_confidence: f64,
    pub vector_confidence: f64,
    pub llm_confidence: f64,

    /// Weights used for the fusion.
    pub weights: EnsembleWeights,

    /// Weighted sum of component confidences, before any adjustment.
    pub raw_combined_score: f64,
    /// Score after agreement adjustment and calibration; used for routing.
    pub calibrated_score: f64,

    /// Hierarchically weighted agreement in [0, 1].
    pub component_agreement: f64,
    /// Normalized Shannon entropy of the confidence distribution.
    pub entropy: f64,

    /// Temperature applied during calibration.
    pub calibration_temperature: f64,
}

/// Ensemble confidence calculator with Platt and temperature calibration.
#[derive(Debug, Clone)]
pub struct ConfidenceCalculator {
    weights: EnsembleWeights,
    platt_a: f64,
    platt_b: f64,
    temperature: f64,
}

impl Default for ConfidenceCalculator {
    fn default() -> Self {
        Self {
            weights: EnsembleWeights::default(),
            platt_a: 1.0,
            platt_b: 0.0,
            temperature: 1.0,
        }
    }
}

impl ConfidenceCalculator {
    pub fn new(weights: EnsembleWeights) -> Self {
        Self {
            weights,
            ..Self::default()
        }
    }

    pub fn with_calibration(mut self, a: f64, b: f64) -> Self {
        self.platt_a = a;
        self.platt_b = b;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Fitted Platt parameters (a, b).
    pub fn calibration(&self) -> (f64, f64) {
        (self.platt_a, self.platt_b)
    }

    /// Calculate the ensemble result from the three component predictions.
    pub fn calculate(
        &self,
        graph: &ComponentPrediction,
        vector: &ComponentPrediction,
        llm: &ComponentPrediction,
    ) -> EnsembleResult {
        let agreement = self.agreement(graph, vector, llm);

        let raw_score = self.weights.graph * graph.confidence
            + self.weights.vector * vector.confidence
            + self.weights.llm * llm.confidence;

        // Unanimous agreement keeps the raw score; full disagreement
        // attenuates it by 30%.
        let agreement_adjusted = raw_score * (0.7 + 0.3 * agreement);

        let entropy = normalized_entropy(&[
            graph.confidence,
            vector.confidence,
            llm.confidence,
        ]);

        let calibrated = self.apply_temperature(self.apply_platt(agreement_adjusted));

        let (level1, level2, level3) = self.majority_prediction(graph, vector, llm);

        EnsembleResult {
            level1,
            level2,
            level3,
            graph_confidence: graph.confidence,
            vector_confidence: vector.confidence,
            llm_confidence: llm.confidence,
            weights: self.weights,
            raw_combined_score: raw_score,
            calibrated_score: calibrated,
            component_agreement: agreement,
            entropy,
            calibration_temperature: self.temperature,
        }
    }

    /// Hierarchically weighted agreement between the components.
    ///
    /// Disagreement at L1 devalues downstream agreement: L2 agreement
    /// conditional on L1 disagreement is typically coincidental.
    fn agreement(
        &self,
        graph: &ComponentPrediction,
        vector: &ComponentPrediction,
        llm: &ComponentPrediction,
    ) -> f64 {
        let l1 = level_agreement(&[
            graph.level1.as_str(),
            vector.level1.as_str(),
            llm.level1.as_str(),
        ]);
        let l2 = level_agreement(&[
            graph.level2.as_str(),
            vector.level2.as_str(),
            llm.level2.as_str(),
        ]);
        let l3 = level_agreement(&[
            graph.level3.as_str(),
            vector.level3.as_str(),
            llm.level3.as_str(),
        ]);

        0.4 * l1 + 0.35 * l2 * l1 + 0.25 * l3 * l2
    }

    /// Platt scaling: sigmoid(a * score + b).
    ///
    /// Saturates instead of overflowing: a large positive exponent yields
    /// 1.0, a large negative one yields 0.0.
    fn apply_platt(&self, score: f64) -> f64 {
        let exponent = self.platt_a * score + self.platt_b;
        if exponent > 100.0 {
            return 1.0;
        }
        if exponent < -100.0 {
            return 0.0;
        }
        1.0 / (1.0 + (-exponent).exp())
    }

    /// Temperature scaling in logit space. T = 1 is the identity;
    /// T > 1 softens, T < 1 sharpens.
    fn apply_temperature(&self, score: f64) -> f64 {
        if self.temperature == 1.0 {
            return score;
        }

        let clipped = score.clamp(0.001, 0.999);
        let logit = (clipped / (1.0 - clipped)).ln();
        let scaled = logit / self.temperature;
        1.0 / (1.0 + (-scaled).exp())
    }

    /// Per-level weighted majority vote.
    ///
    /// Each level is decided independently, so the combined path may be one
    /// that no single component produced.
    fn majority_prediction(
        &self,
        graph: &ComponentPrediction,
        vector: &ComponentPrediction,
        llm: &ComponentPrediction,
    ) -> (String, String, String) {
        let graph_vote = self.weights.graph * graph.confidence;
        let vector_vote = self.weights.vector * vector.confidence;
        let llm_vote = self.weights.llm * llm.confidence;

        (
            weighted_vote(&[
                (graph.level1.as_str(), graph_vote),
                (vector.level1.as_str(), vector_vote),
                (llm.level1.as_str(), llm_vote),
            ]),
            weighted_vote(&[
                (graph.level2.as_str(), graph_vote),
                (vector.level2.as_str(), vector_vote),
                (llm.level2.as_str(), llm_vote),
            ]),
            weighted_vote(&[
                (graph.level3.as_str(), graph_vote),
                (vector.level3.as_str(), vector_vote),
                (llm.level3.as_str(), llm_vote),
            ]),
        )
    }

    /// Fit Platt parameters on validation data by minimizing the negative
    /// log-likelihood of the sigmoid with plain gradient descent.
    ///
    /// The defaults (a = 1, b = 0) work without fitting; this is an optional
    /// refinement once enough HITL-labeled classifications exist. Inputs of
    /// mismatched or zero length leave the parameters unchanged.
    pub fn fit(&mut self, scores: &[f64], labels: &[bool]) {
        if scores.is_empty() || scores.len() != labels.len() {
            return;
        }

        let n = scores.len() as f64;
        let mut a = self.platt_a;
        let mut b = self.platt_b;
        let learning_rate = 0.1;
        let iterations = 500;

        for _ in 0..iterations {
            let mut grad_a = 0.0;
            let mut grad_b = 0.0;

            for (&score, &label) in scores.iter().zip(labels) {
                let exponent = (a * score + b).clamp(-100.0, 100.0);
                let p = 1.0 / (1.0 + (-exponent).exp());
                let y = if label { 1.0 } else { 0.0 };
                // dNLL/dz for sigmoid cross-entropy is (p - y)
                grad_a += (p - y) * score;
                grad_b += p - y;
            }

            a -= learning_rate * grad_a / n;
            b -= learning_rate * grad_b / n;
        }

        self.platt_a = a;
        self.platt_b = b;
        tracing::info!("Fitted Platt scaling parameters: a={:.4}, b={:.4}", a, b);
    }
}

/// Winner of one level's confidence-weighted vote.
///
/// Ballots are tallied in component order (graph, vector, llm) and a later
/// value must strictly beat the running best, so exact ties resolve to the
/// earliest component. Ties are common at cold start, when components carry
/// identical default statistics.
fn weighted_vote(ballots: &[(&str, f64)]) -> String {
    let mut tallies: Vec<(&str, f64)> = Vec::with_capacity(ballots.len());
    for &(value, weight) in ballots {
        match tallies.iter_mut().find(|(v, _)| *v == value) {
            Some((_, total)) => *total += weight,
            None => tallies.push((value, weight)),
        }
    }

    let mut best: Option<(&str, f64)> = None;
    for (value, total) in tallies {
        match best {
            Some((_, best_total)) if total <= best_total => {}
            _ => best = Some((value, total)),
        }
    }

    best.map(|(value, _)| value.to_string()).unwrap_or_default()
}

/// Fraction of predictions sharing the modal value at one level.
fn level_agreement(values: &[&str]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for &v in values {
        *counts.entry(v).or_insert(0) += 1;
    }
    let most_common = counts.values().copied().max().unwrap_or(0);

    most_common as f64 / values.len() as f64
}

/// Shannon entropy of the confidence distribution, normalized to [0, 1].
///
/// The confidences are normalized into a probability distribution first; an
/// all-zero input means maximum uncertainty.
fn normalized_entropy(confidences: &[f64]) -> f64 {
    let total: f64 = confidences.iter().sum();
    if total == 0.0 {
        return 1.0;
    }

    let mut entropy = 0.0;
    for &c in confidences {
        let p = c / total;
        if p > 0.0 {
            entropy -= p * p.log2();
        }
    }

    let max_entropy = (confidences.len() as f64).log2();
    if max_entropy > 0.0 {
        entropy / max_entropy
    } else {
        0.0
    }
}
