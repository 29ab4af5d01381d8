//! ONNX classifier backend (tract)

use std::path::Path;
use tract_onnx::prelude::*;
use tracing::{debug, info};

use crate::classifier::Classifier;
use crate::{BatchTensor, ClassId, InferenceError, NUM_CLASSES};

/// Classifier backed by an ONNX export of the digit network
///
/// The graph must accept `[N, 1, 28, 28]` f32 input with a dynamic batch
/// axis and produce `[N, 10]` logits.
pub struct OnnxClassifier {
    plan: TypedRunnableModel<TypedModel>,
}

impl OnnxClassifier {
    /// Load, optimize and plan the model once
    pub fn load(path: &Path) -> Result<Self, InferenceError> {
        info!("Loading ONNX classifier from {}", path.display());

        let model = tract_onnx::onnx()
            .model_for_path(path)
            .and_then(|model| model.into_optimized())
            .map_err(|e| InferenceError::ModelLoad(format!("{}: {}", path.display(), e)))?;
        let classifier = Self::from_model(model)
            .map_err(|e| InferenceError::ModelLoad(format!("{}: {}", path.display(), e)))?;

        info!("Model loaded successfully");
        Ok(classifier)
    }

    /// Plan an already typed graph
    pub fn from_model(model: TypedModel) -> Result<Self, InferenceError> {
        let plan = model
            .into_runnable()
            .map_err(|e| InferenceError::ModelLoad(e.to_string()))?;
        Ok(Self { plan })
    }
}

impl Classifier for OnnxClassifier {
    fn classify(&self, batch: &BatchTensor) -> Result<Vec<ClassId>, InferenceError> {
        let rows = batch.len();
        let input = Tensor::from_shape(batch.shape(), &batch.to_vec())
            .map_err(|e| InferenceError::InferenceFailed(format!("input tensor: {}", e)))?;

        let outputs = self
            .plan
            .run(tvec!(input.into()))
            .map_err(|e| InferenceError::InferenceFailed(e.to_string()))?;

        let logits = outputs
            .first()
            .ok_or_else(|| InferenceError::InferenceFailed("model produced no outputs".to_string()))?;

        if logits.shape() != [rows, NUM_CLASSES] {
            return Err(InferenceError::InferenceFailed(format!(
                "expected logits of shape [{}, {}], got {:?}",
                rows,
                NUM_CLASSES,
                logits.shape()
            )));
        }

        let values = logits
            .as_slice::<f32>()
            .map_err(|e| InferenceError::InferenceFailed(e.to_string()))?;

        debug!("Classified batch of {} rows", rows);
        Ok(values.chunks(NUM_CLASSES).map(argmax).collect())
    }

    fn backend(&self) -> &'static str {
        "onnx"
    }
}

/// Index of the largest logit; ties go to the lowest class id
pub(crate) fn argmax(logits: &[f32]) -> ClassId {
    let mut best = 0;
    for (i, v) in logits.iter().enumerate() {
        if *v > logits[best] || logits[best].is_nan() {
            best = i;
        }
    }
    best as ClassId
}
