//! Model backends
//!
//! One load/predict implementation per `ModelBackend` variant. ONNX graphs
//! run through tract; linear models are JSON softmax-regression weights.

use crate::models::ModelBackend;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tract_onnx::prelude::*;

type TractModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Artifact extensions that need converting to ONNX before they can be served
const UNSUPPORTED_EXTENSIONS: [&str; 3] = ["h5", "keras", "pb"];

/// Softmax regression: `softmax(W·x + b)`
#[derive(Debug, Clone, Deserialize)]
pub struct LinearModel {
    /// One row of weights per output class
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
}

impl LinearModel {
    fn validate(&self, input_len: usize) -> Result<()> {
        if self.weights.is_empty() {
            anyhow::bail!("Linear model has no output classes");
        }
        if self.weights.len() != self.bias.len() {
            anyhow::bail!(
                "Linear model has {} weight rows but {} biases",
                self.weights.len(),
                self.bias.len()
            );
        }
        if let Some(row) = self.weights.iter().find(|r| r.len() != input_len) {
            anyhow::bail!(
                "Linear model row has {} weights, input has {} features",
                row.len(),
                input_len
            );
        }
        Ok(())
    }

    fn logits(&self, input: &[f32]) -> Vec<f32> {
        self.weights
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| row.iter().zip(input).map(|(w, x)| w * x).sum::<f32>() + b)
            .collect()
    }
}

/// A model resident in memory, ready for inference
pub enum LoadedBackend {
    Onnx(TractModel),
    Linear(LinearModel),
}

impl std::fmt::Debug for LoadedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadedBackend::Onnx(_) => f.write_str("LoadedBackend::Onnx"),
            LoadedBackend::Linear(m) => write!(f, "LoadedBackend::Linear({} classes)", m.weights.len()),
        }
    }
}

impl LoadedBackend {
    /// Load an artifact. Blocking; callers run it on the blocking pool.
    pub fn load(backend: ModelBackend, artifact: &Path, input_shape: &[usize]) -> Result<Self> {
        if let Some(ext) = artifact.extension().and_then(|e| e.to_str()) {
            if UNSUPPORTED_EXTENSIONS.contains(&ext) {
                anyhow::bail!(
                    "{} is a TensorFlow/Keras artifact; convert it to ONNX before importing",
                    artifact.display()
                );
            }
        }

        match backend {
            ModelBackend::Onnx => Ok(Self::Onnx(Self::load_onnx(artifact, input_shape)?)),
            ModelBackend::Linear => {
                let raw = std::fs::read_to_string(artifact)
                    .with_context(|| format!("Failed to read {}", artifact.display()))?;
                let model: LinearModel =
                    serde_json::from_str(&raw).context("Failed to parse linear model")?;
                model.validate(input_shape.iter().product())?;
                Ok(Self::Linear(model))
            }
        }
    }

    fn load_onnx(artifact: &Path, input_shape: &[usize]) -> Result<TractModel> {
        let mut shape = Vec::with_capacity(input_shape.len() + 1);
        shape.push(1);
        shape.extend_from_slice(input_shape);

        let model = tract_onnx::onnx()
            .model_for_path(artifact)
            .context("Failed to parse ONNX model")?
            .with_input_fact(0, f32::fact(&shape).into())
            .context("Failed to set input shape")?
            .into_optimized()
            .context("Failed to optimize model")?
            .into_runnable()
            .context("Failed to create runnable model")?;
        Ok(model)
    }

    /// Run one sample and return a probability vector
    pub fn predict(&self, input: &[f32], input_shape: &[usize]) -> Result<Vec<f32>> {
        let raw = match self {
            LoadedBackend::Onnx(model) => {
                let mut shape = Vec::with_capacity(input_shape.len() + 1);
                shape.push(1);
                shape.extend_from_slice(input_shape);

                let tensor: Tensor =
                    tract_ndarray::ArrayD::from_shape_vec(tract_ndarray::IxDyn(&shape), input.to_vec())
                        .context("Input does not match model shape")?
                        .into();
                let result = model.run(tvec!(tensor.into()))?;
                let output = result.first().context("No output from model")?;
                output.to_array_view::<f32>()?.iter().copied().collect()
            }
            LoadedBackend::Linear(model) => model.logits(input),
        };

        if raw.is_empty() {
            anyhow::bail!("Model produced an empty output");
        }
        Ok(normalize(raw))
    }
}

/// Pass probability vectors through, softmax anything else
fn normalize(values: Vec<f32>) -> Vec<f32> {
    let sum: f32 = values.iter().sum();
    let is_distribution = values.iter().all(|v| (0.0..=1.0).contains(v)) && (sum - 1.0).abs() < 1e-3;
    if is_distribution {
        values
    } else {
        softmax(&values)
    }
}

pub fn softmax(values: &[f32]) -> Vec<f32> {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = values.iter().map(|v| (v - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}
