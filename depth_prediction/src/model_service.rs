use crate::transform::InputTransform;
use ndarray::{Array4, ArrayD};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum LoadError {
    #[error("Model file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to build inference session: {0}")]
    Session(String),
    #[error("Model load task failed: {0}")]
    Task(String),
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Invalid tensor shape: {0}")]
    Shape(String),
    #[error("Failed to build tensor: {0}")]
    Tensor(String),
    #[error("Inference failed: {0}")]
    Run(String),
}

/// A depth network ready to evaluate in inference mode.
pub trait DepthModel: Send + Sync + 'static {
    /// Runs a forward pass on a `(N, 3, H, W)` batch and returns the raw output.
    fn predict(&self, input: &Array4<f32>) -> Result<ArrayD<f32>, InferenceError>;
}

/// The model and the preprocessing it was trained with. Built once, never mutated.
pub struct ModelHandle<D: DepthModel> {
    pub model: D,
    pub transform: InputTransform,
    pub identifier: String,
}

/// Acquires a model by name. Called from a blocking context.
pub trait ModelSource: Send + Sync + 'static {
    type Model: DepthModel;

    fn load(&self) -> Result<ModelHandle<Self::Model>, LoadError>;
}
