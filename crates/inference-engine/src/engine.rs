//! Inference Engine Implementation

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::classifier::{Classifier, MockClassifier};
use crate::loader::{ModelConfig, ModelLoader};
use crate::{BatchTensor, ClassId, InferenceError, NUM_CLASSES};

/// Shared, read-only handle to the loaded classifier
///
/// Created once at startup and injected wherever inference is needed.
/// Failed calls are never retried here; a batch fails as a unit.
pub struct InferenceEngine {
    classifier: Arc<dyn Classifier>,
    /// Held for the duration of a call when the backend is not re-entrant
    gate: Option<Mutex<()>>,
    /// Completed `infer` calls, successful or not
    calls: AtomicU64,
}

impl InferenceEngine {
    /// Wrap a classifier, serializing calls only if it requires it
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        let serialize = !classifier.is_reentrant();
        Self::with_serialization(classifier, serialize)
    }

    /// Wrap a classifier with explicit call serialization
    pub fn with_serialization(classifier: Arc<dyn Classifier>, serialize: bool) -> Self {
        info!(
            "Creating inference engine: backend={}, serialized={}",
            classifier.backend(),
            serialize
        );
        Self {
            classifier,
            gate: serialize.then(|| Mutex::new(())),
            calls: AtomicU64::new(0),
        }
    }

    /// Load the configured backend
    pub fn from_config(config: &ModelConfig) -> Result<Self, InferenceError> {
        let classifier = ModelLoader::new(config).load()?;
        let serialize = config.serialize_inference || !classifier.is_reentrant();
        Ok(Self::with_serialization(classifier, serialize))
    }

    /// Create a mock inference engine for testing
    pub fn mock() -> Self {
        Self::new(Arc::new(MockClassifier))
    }

    /// Classify every row of `batch`, returning one class id per row in row order
    pub fn infer(&self, batch: &BatchTensor) -> Result<Vec<ClassId>, InferenceError> {
        if batch.is_empty() {
            return Err(InferenceError::EmptyBatch);
        }

        let start = Instant::now();
        let result = match &self.gate {
            Some(gate) => {
                // The gate guards no data, so a poisoned lock is still usable
                let _guard = gate.lock().unwrap_or_else(PoisonError::into_inner);
                self.classify_caught(batch)
            }
            None => self.classify_caught(batch),
        };
        self.calls.fetch_add(1, Ordering::Relaxed);

        let class_ids = result?;
        if class_ids.len() != batch.len() {
            return Err(InferenceError::OutputMismatch {
                expected: batch.len(),
                actual: class_ids.len(),
            });
        }
        if let Some(bad) = class_ids.iter().find(|id| **id as usize >= NUM_CLASSES) {
            return Err(InferenceError::InvalidClass(*bad));
        }

        debug!(
            "Inference on {} rows completed in {}ms",
            batch.len(),
            start.elapsed().as_millis()
        );
        Ok(class_ids)
    }

    /// Call the backend, turning a panic into an inference failure
    fn classify_caught(&self, batch: &BatchTensor) -> Result<Vec<ClassId>, InferenceError> {
        panic::catch_unwind(AssertUnwindSafe(|| self.classifier.classify(batch))).unwrap_or_else(
            |payload| {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!("Classifier backend panicked: {}", message);
                Err(InferenceError::InferenceFailed(format!(
                    "backend panicked: {}",
                    message
                )))
            },
        )
    }

    /// Run one all-zero single-row batch so the first request does not pay setup cost
    pub fn warm_up(&self) -> Result<(), InferenceError> {
        let start = Instant::now();
        match self.infer(&BatchTensor::zeros(1)?) {
            Ok(_) => {
                info!("Model warm-up completed in {}ms", start.elapsed().as_millis());
                Ok(())
            }
            Err(e) => {
                warn!("Model warm-up failed: {}", e);
                Err(e)
            }
        }
    }

    /// Backend name
    pub fn backend(&self) -> &'static str {
        self.classifier.backend()
    }

    /// Whether calls are serialized
    pub fn is_serialized(&self) -> bool {
        self.gate.is_some()
    }

    /// Number of `infer` calls that reached the classifier
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::INPUT_SHAPE;
    use ndarray::Array3;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    fn batch(values: &[f32]) -> BatchTensor {
        let rows: Vec<_> = values.iter().map(|v| Array3::from_elem(INPUT_SHAPE, *v)).collect();
        let views: Vec<_> = rows.iter().map(|r| r.view()).collect();
        BatchTensor::stack(&views).unwrap()
    }

    struct FixedOutput(Vec<ClassId>);

    impl Classifier for FixedOutput {
        fn classify(&self, _batch: &BatchTensor) -> Result<Vec<ClassId>, InferenceError> {
            Ok(self.0.clone())
        }

        fn backend(&self) -> &'static str {
            "fixed"
        }
    }

    /// Fails the test if two calls overlap
    struct NonReentrant {
        busy: AtomicBool,
    }

    impl Classifier for NonReentrant {
        fn classify(&self, batch: &BatchTensor) -> Result<Vec<ClassId>, InferenceError> {
            assert!(!self.busy.swap(true, Ordering::SeqCst), "concurrent classify call");
            std::thread::sleep(std::time::Duration::from_millis(2));
            self.busy.store(false, Ordering::SeqCst);
            Ok(vec![0; batch.len()])
        }

        fn backend(&self) -> &'static str {
            "non-reentrant"
        }

        fn is_reentrant(&self) -> bool {
            false
        }
    }

    /// Panics on its first call only
    struct PanicOnce {
        calls: AtomicUsize,
    }

    impl Classifier for PanicOnce {
        fn classify(&self, batch: &BatchTensor) -> Result<Vec<ClassId>, InferenceError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("backend exploded");
            }
            Ok(vec![7; batch.len()])
        }

        fn backend(&self) -> &'static str {
            "panic-once"
        }

        fn is_reentrant(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_mock_prediction() {
        let engine = InferenceEngine::mock();
        let ids = engine.infer(&batch(&[0.05, 0.55, 0.95])).unwrap();
        assert_eq!(ids, vec![0, 5, 9]);
        assert_eq!(engine.calls(), 1);
        assert!(!engine.is_serialized());
    }

    #[test]
    fn test_output_count_mismatch() {
        let engine = InferenceEngine::new(Arc::new(FixedOutput(vec![1])));
        let err = engine.infer(&batch(&[0.1, 0.2])).unwrap_err();
        assert!(matches!(err, InferenceError::OutputMismatch { expected: 2, actual: 1 }));
    }

    #[test]
    fn test_out_of_range_class() {
        let engine = InferenceEngine::new(Arc::new(FixedOutput(vec![3, 12])));
        let err = engine.infer(&batch(&[0.1, 0.2])).unwrap_err();
        assert!(matches!(err, InferenceError::InvalidClass(12)));
    }

    #[test]
    fn test_non_reentrant_calls_serialized() {
        let engine = InferenceEngine::new(Arc::new(NonReentrant {
            busy: AtomicBool::new(false),
        }));
        assert!(engine.is_serialized());

        let input = batch(&[0.5]);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..5 {
                        engine.infer(&input).unwrap();
                    }
                });
            }
        });
        assert_eq!(engine.calls(), 40);
    }

    #[test]
    fn test_backend_panic_becomes_error_and_gate_recovers() {
        let engine = InferenceEngine::new(Arc::new(PanicOnce {
            calls: AtomicUsize::new(0),
        }));
        assert!(engine.is_serialized());

        let input = batch(&[0.1, 0.2]);
        match engine.infer(&input) {
            Err(InferenceError::InferenceFailed(msg)) => assert!(msg.contains("backend exploded")),
            other => panic!("expected inference failure, got {:?}", other),
        }

        assert_eq!(engine.infer(&input).unwrap(), vec![7, 7]);
        assert_eq!(engine.calls(), 2);
    }

    #[test]
    fn test_forced_serialization_from_config() {
        let config = ModelConfig {
            serialize_inference: true,
            ..ModelConfig::mock()
        };
        let engine = InferenceEngine::from_config(&config).unwrap();
        assert!(engine.is_serialized());
        assert_eq!(engine.backend(), "mock");
    }

    #[test]
    fn test_warm_up() {
        let engine = InferenceEngine::mock();
        engine.warm_up().unwrap();
        assert_eq!(engine.calls(), 1);
    }
}
