//! Flow classification engine
//!
//! This module provides:
//! - Model backends (ONNX via tract, JSON linear models)
//! - The confidence policy and deterministic fallbacks
//! - `ModelManager`, which owns model lifecycle, inference and stats

mod backend;
mod categories;
mod decision;
mod fallback;
mod features;
mod manager;
mod stats;


pub use backend::{softmax, LinearModel, LoadedBackend};
pub use categories::{category_cookie, CategoryRegistry};
pub use decision::{decide, Decision, LOW_CONFIDENCE_CEILING, MAX_RUNNER_UP, MIN_MARGIN};
pub use fallback::{Disambiguator, DEFAULT_LOOKUP_TIMEOUT};
pub use features::flatten_payload;
pub use manager::{ManagerConfig, ModelManager, StatsOutcome};
pub use stats::{StatsQuery, StatsRepository, StatsWorker, DEFAULT_STATS_INTERVAL};

use crate::models::ModelConfiguration;
use anyhow::Result;

/// Trait for inference implementations
pub trait Classifier: Send + Sync {
    /// Probability vector for one flattened sample
    fn predict(&self, input: &[f32]) -> Result<Vec<f32>>;

    /// Name of the model this classifier serves
    fn model_name(&self) -> &str;
}

/// A model configuration paired with its resident backend
#[derive(Debug)]
pub struct LoadedModel {
    config: ModelConfiguration,
    backend: LoadedBackend,
}

impl LoadedModel {
    /// Load the artifact named by `config`. Blocking.
    pub fn load(config: ModelConfiguration) -> Result<Self> {
        let backend = LoadedBackend::load(config.backend, &config.artifact, &config.input_shape)?;
        Ok(Self { config, backend })
    }

    pub fn config(&self) -> &ModelConfiguration {
        &self.config
    }
}

impl Classifier for LoadedModel {
    fn predict(&self, input: &[f32]) -> Result<Vec<f32>> {
        let probabilities = self.backend.predict(input, &self.config.input_shape)?;
        if probabilities.len() != self.config.categories.len() {
            anyhow::bail!(
                "Model {} produced {} outputs for {} categories",
                self.config.name,
                probabilities.len(),
                self.config.categories.len()
            );
        }
        Ok(probabilities)
    }

    fn model_name(&self) -> &str {
        &self.config.name
    }
}
