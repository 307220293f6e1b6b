//! Engine configuration.
//!
//! All thresholds and tuning knobs for the classification engine live here so
//! the calculator, pipeline, batch processor, and learning loop stay free of
//! hard-coded policy. Every field can be overridden at startup; the routing
//! thresholds can also be swapped at runtime by rebuilding the pipeline with
//! a new config.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default floor for auto-resolve routing.
pub const DEFAULT_AUTO_RESOLVE_THRESHOLD: f64 = 0.70;
/// Default floor below which routing escalates.
pub const DEFAULT_HITL_THRESHOLD: f64 = 0.50;
/// Default embedding dimension (text-embedding-3-small).
pub const DEFAULT_EMBEDDING_DIM: usize = 1536;

/// Ensemble weights for the three classifier components.
///
/// Must sum to 1.0; validated by [`EngineConfig::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnsembleWeights {
    pub graph: f64,
    pub vector: f64,
    pub llm: f64,
}

impl Default for EnsembleWeights {
    fn default() -> Self {
        Self {
            graph: 0.35,
            vector: 0.35,
            llm: 0.30,
        }
    }
}

impl EnsembleWeights {
    /// Check that the weights form a convex combination.
    pub fn is_valid(&self) -> bool {
        let sum = self.graph + self.vector + self.llm;
        (sum - 1.0).abs() < 1e-9 && self.graph >= 0.0 && self.vector >= 0.0 && self.llm >= 0.0
    }
}

/// Inclusive clamping interval for graph edge weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeWeightBounds {
    pub min: f64,
    pub max: f64,
}

impl Default for EdgeWeightBounds {
    fn default() -> Self {
        Self { min: 0.1, max: 2.0 }
    }
}

impl EdgeWeightBounds {
    /// Clamp a weight into the interval.
    pub fn clamp(&self, weight: f64) -> f64 {
        weight.clamp(self.min, self.max)
    }
}

/// Configuration for the classification engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Calibrated-score floor for auto-resolve routing.
    pub auto_resolve_threshold: f64,
    /// Calibrated-score floor below which routing escalates.
    pub hitl_threshold: f64,
    /// Component-agreement floor required for auto-resolve.
    pub agreement_floor_auto_resolve: f64,
    /// Component-agreement floor below which review is forced.
    pub agreement_floor_review: f64,

    /// Maximum tickets per batch submission; larger submissions are rejected.
    pub batch_max_size: usize,
    /// Number of parallel batch workers.
    pub batch_worker_count: usize,

    /// Embedding vector dimension; must match the embedding capability.
    pub embedding_dim: usize,

    /// Ensemble weights for graph/vector/LLM components.
    pub ensemble_weights: EnsembleWeights,

    /// Platt scaling slope.
    pub calibration_a: f64,
    /// Platt scaling intercept.
    pub calibration_b: f64,
    /// Temperature for temperature scaling; 1.0 is the identity.
    pub calibration_temperature: f64,

    /// Clamping interval for graph edge weights.
    pub edge_weight_bounds: EdgeWeightBounds,
    /// EMA learning rate for category accuracy.
    pub accuracy_learning_rate: f64,

    /// Per-call LLM timeout in seconds.
    pub llm_timeout_secs: u64,
    /// Chat model used for keyword extraction, judgment, and evolution.
    pub chat_model: String,
    /// Embedding model name.
    pub embedding_model: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_resolve_threshold: DEFAULT_AUTO_RESOLVE_THRESHOLD,
            hitl_threshold: DEFAULT_HITL_THRESHOLD,
            agreement_floor_auto_resolve: 0.6,
            agreement_floor_review: 0.4,
            batch_max_size: 1000,
            batch_worker_count: 3,
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            ensemble_weights: EnsembleWeights::default(),
            calibration_a: 1.0,
            calibration_b: 0.0,
            calibration_temperature: 1.0,
            edge_weight_bounds: EdgeWeightBounds::default(),
            accuracy_learning_rate: 0.1,
            llm_timeout_secs: 120,
            chat_model: "gpt-4o".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auto_resolve_threshold(mut self, threshold: f64) -> Self {
        self.auto_resolve_threshold = threshold;
        self
    }

    pub fn with_hitl_threshold(mut self, threshold: f64) -> Self {
        self.hitl_threshold = threshold;
        self
    }

    pub fn with_batch_max_size(mut self, size: usize) -> Self {
        self.batch_max_size = size;
        self
    }

    pub fn with_batch_worker_count(mut self, count: usize) -> Self {
        self.batch_worker_count = count.max(1);
        self
    }

    pub fn with_embedding_dim(mut self, dim: usize) -> Self {
        self.embedding_dim = dim;
        self
    }

    pub fn with_ensemble_weights(mut self, weights: EnsembleWeights) -> Self {
        self.ensemble_weights = weights;
        self
    }

    pub fn with_calibration(mut self, a: f64, b: f64) -> Self {
        self.calibration_a = a;
        self.calibration_b = b;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.calibration_temperature = temperature;
        self
    }

    pub fn with_accuracy_learning_rate(mut self, alpha: f64) -> Self {
        self.accuracy_learning_rate = alpha;
        self
    }

    pub fn with_chat_model(mut self, model: impl Into<String>) -> Self {
        self.chat_model = model.into();
        self
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    /// Whether a score/agreement pair clears the high-confidence bar.
    ///
    /// Stricter than auto-resolve routing: dashboards and transports use
    /// this to label classifications, while routing only requires the
    /// review-floor agreement.
    pub fn is_high_confidence(&self, calibrated_score: f64, agreement: f64) -> bool {
        calibrated_score >= self.auto_resolve_threshold
            && agreement >= self.agreement_floor_auto_resolve
    }

    /// Whether a score/agreement pair demands human review on its own.
    pub fn needs_review(&self, calibrated_score: f64, agreement: f64) -> bool {
        calibrated_score < self.hitl_threshold || agreement < self.agreement_floor_review
    }

    /// Validate cross-field consistency.
    pub fn validate(&self) -> Result<()> {
        if !self.ensemble_weights.is_valid() {
            return Err(Error::Config(
                "ensemble weights must be non-negative and sum to 1.0".to_string(),
            ));
        }
        if self.edge_weight_bounds.min >= self.edge_weight_bounds.max {
            return Err(Error::Config(
                "edge weight bounds must satisfy min < max".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.accuracy_learning_rate) {
            return Err(Error::Config(
                "accuracy learning rate must be in [0, 1]".to_string(),
            ));
        }
        if self.hitl_threshold > self.auto_resolve_threshold {
            return Err(Error::Config(
                "hitl threshold must not exceed auto-resolve threshold".to_string(),
            ));
        }
        if self.batch_max_size == 0 || self.batch_worker_count == 0 {
            return Err(Error::Config(
                "batch sizing parameters must be positive".to_string(),
            ));
        }
        if self.calibration_temperature <= 0.0 {
            return Err(Error::Config(
                "calibration temperature must be positive".to_string(),
            ));
        }
        if self.embedding_dim == 0 {
            return Err(Error::Config("embedding dimension must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.auto_resolve_threshold, 0.70);
        assert_eq!(config.hitl_threshold, 0.50);
        assert_eq!(config.batch_max_size, 1000);
        assert_eq!(config.batch_worker_count, 3);
        assert_eq!(config.embedding_dim, 1536);
    }

    #[test]
    fn test_builder_chain() {
        let config = EngineConfig::new()
            .with_auto_resolve_threshold(0.8)
            .with_batch_worker_count(5)
            .with_temperature(1.5)
            .with_chat_model("gpt-4o-mini");

        assert_eq!(config.auto_resolve_threshold, 0.8);
        assert_eq!(config.batch_worker_count, 5);
        assert_eq!(config.calibration_temperature, 1.5);
        assert_eq!(config.chat_model, "gpt-4o-mini");
    }

    #[test]
    fn test_invalid_weights_rejected() {
        let config = EngineConfig::new().with_ensemble_weights(EnsembleWeights {
            graph: 0.5,
            vector: 0.5,
            llm: 0.5,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let config = EngineConfig::new()
            .with_auto_resolve_threshold(0.4)
            .with_hitl_threshold(0.6);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_edge_weight_bounds_clamp() {
        let bounds = EdgeWeightBounds::default();
        assert_eq!(bounds.clamp(3.0), 2.0);
        assert_eq!(bounds.clamp(0.0), 0.1);
        assert_eq!(bounds.clamp(1.3), 1.3);
    }

    #[test]
    fn test_worker_count_floor() {
        let config = EngineConfig::new().with_batch_worker_count(0);
        assert_eq!(config.batch_worker_count, 1);
    }

    #[test]
    fn test_confidence_policy_helpers() {
        let config = EngineConfig::default();

        assert!(config.is_high_confidence(0.75, 0.9));
        // Routing would auto-resolve at agreement 0.5, but the
        // high-confidence label needs 0.6.
        assert!(!config.is_high_confidence(0.75, 0.5));
        assert!(!config.is_high_confidence(0.65, 0.9));

        assert!(config.needs_review(0.45, 0.9));
        assert!(config.needs_review(0.9, 0.3));
        assert!(!config.needs_review(0.6, 0.5));
    }

    #[test]
    fn test_config_deserializes_with_partial_keys() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"auto_resolve_threshold": 0.75}"#).unwrap();
        assert_eq!(config.auto_resolve_threshold, 0.75);
        assert_eq!(config.hitl_threshold, 0.50);
    }
}
