//! Digit Classification Inference Engine
//!
//! Wraps a fixed classifier behind a batch-in, class-ids-out contract.
//! Backends: ONNX via tract, and a rule-based mock for development.

mod batcher;
mod classifier;
mod engine;
mod loader;
mod onnx;

pub use batcher::BatchTensor;
pub use classifier::{Classifier, MockClassifier};
pub use engine::InferenceEngine;
pub use loader::{BackendKind, ModelConfig, ModelLoader};
pub use onnx::OnnxClassifier;

use std::path::PathBuf;
use thiserror::Error;

/// Predicted digit class
pub type ClassId = u8;

/// Number of output classes (digits 0-9)
pub const NUM_CLASSES: usize = 10;

/// Shape of one input row: [channels, height, width]
pub const INPUT_SHAPE: [usize; 3] = [1, 28, 28];

/// Errors during model loading or inference
#[derive(Debug, Clone, Error)]
pub enum InferenceError {
    #[error("Model load failed: {0}")]
    ModelLoad(String),
    #[error("Model weights not found, tried: {tried:?}")]
    ModelNotFound { tried: Vec<PathBuf> },
    #[error("Inference failed: {0}")]
    InferenceFailed(String),
    #[error("Invalid input shape: expected {expected}, got {actual}")]
    InvalidInputShape { expected: String, actual: String },
    #[error("Classifier returned {actual} class ids for a batch of {expected}")]
    OutputMismatch { expected: usize, actual: usize },
    #[error("Classifier returned class id {0}, outside 0..10")]
    InvalidClass(ClassId),
    #[error("Refusing to run inference on an empty batch")]
    EmptyBatch,
}
