//! Classifier seam and the rule-based mock backend

use crate::{BatchTensor, ClassId, InferenceError, NUM_CLASSES};

/// A fixed classifier: N input rows in, N class ids out, same order
pub trait Classifier: Send + Sync {
    /// Run one forward pass over the whole batch
    fn classify(&self, batch: &BatchTensor) -> Result<Vec<ClassId>, InferenceError>;

    /// Short backend name for logs and health output
    fn backend(&self) -> &'static str;

    /// Whether concurrent `classify` calls are safe.
    /// The engine serializes calls when this returns false.
    fn is_reentrant(&self) -> bool {
        true
    }
}

/// Mock classifier for development and testing
///
/// Buckets the mean intensity of each row into one of ten classes, so a
/// uniform image of gray level `v` is classified as `floor(v / 255 * 10)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockClassifier;

impl Classifier for MockClassifier {
    fn classify(&self, batch: &BatchTensor) -> Result<Vec<ClassId>, InferenceError> {
        Ok((0..batch.len())
            .map(|r| {
                let mean = batch.row(r).mean().unwrap_or(0.0);
                let bucket = (mean * NUM_CLASSES as f32).floor();
                bucket.clamp(0.0, (NUM_CLASSES - 1) as f32) as ClassId
            })
            .collect())
    }

    fn backend(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::INPUT_SHAPE;
    use ndarray::Array3;

    #[test]
    fn test_mock_buckets_mean_intensity() {
        let rows: Vec<_> = [0.0f32, 0.349, 0.749, 1.0]
            .iter()
            .map(|v| Array3::from_elem(INPUT_SHAPE, *v))
            .collect();
        let views: Vec<_> = rows.iter().map(|r| r.view()).collect();
        let batch = BatchTensor::stack(&views).unwrap();

        assert_eq!(MockClassifier.classify(&batch).unwrap(), vec![0, 3, 7, 9]);
    }

    #[test]
    fn test_mock_clamps_normalized_input() {
        let row = Array3::from_elem(INPUT_SHAPE, -1.0f32);
        let batch = BatchTensor::stack(&[row.view()]).unwrap();
        assert_eq!(MockClassifier.classify(&batch).unwrap(), vec![0]);
    }
}
