//! Model configuration and loading

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::classifier::{Classifier, MockClassifier};
use crate::onnx::OnnxClassifier;
use crate::InferenceError;

/// Which classifier implementation to load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// ONNX export of the trained network
    Onnx,
    /// Rule-based mock, no weights required
    Mock,
}

/// Model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Backend to load
    pub backend: BackendKind,
    /// Candidate weight paths, tried in order
    pub paths: Vec<PathBuf>,
    /// Run one dummy inference at startup
    pub warmup: bool,
    /// Force serialized inference calls even for re-entrant backends
    pub serialize_inference: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Onnx,
            paths: vec![
                PathBuf::from("/app/model.onnx"),
                PathBuf::from("model.onnx"),
            ],
            warmup: true,
            serialize_inference: false,
        }
    }
}

impl ModelConfig {
    /// Create mock config (no weights)
    pub fn mock() -> Self {
        Self {
            backend: BackendKind::Mock,
            paths: Vec::new(),
            warmup: false,
            ..Default::default()
        }
    }
}

/// Resolves model weights and builds the configured classifier
pub struct ModelLoader<'a> {
    config: &'a ModelConfig,
}

impl<'a> ModelLoader<'a> {
    pub fn new(config: &'a ModelConfig) -> Self {
        Self { config }
    }

    /// First candidate path that exists on disk
    pub fn resolve(&self) -> Result<PathBuf, InferenceError> {
        for path in &self.config.paths {
            if path.is_file() {
                return Ok(path.clone());
            }
            warn!("Model weights not found at {}", path.display());
        }
        Err(InferenceError::ModelNotFound {
            tried: self.config.paths.clone(),
        })
    }

    /// Build the classifier once for the process lifetime
    pub fn load(&self) -> Result<Arc<dyn Classifier>, InferenceError> {
        match self.config.backend {
            BackendKind::Mock => {
                info!("Using mock classifier");
                Ok(Arc::new(MockClassifier))
            }
            BackendKind::Onnx => {
                let path = self.resolve()?;
                Ok(Arc::new(OnnxClassifier::load(&path)?))
            }
        }
    }
}
