//! Batch coordinator: preprocess, batch, infer once, merge

use image_preprocessor::{ImagePreprocessor, ImageTensor};
use inference_engine::{BatchTensor, ClassId, InferenceEngine, InferenceError};
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::item::{ItemResult, RequestItem, ResponseList};
use crate::merger::ResultMerger;
use crate::PredictError;

/// What happened to the batched forward pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferenceStatus {
    /// Nothing preprocessed successfully; the model was not called
    Skipped,
    Succeeded,
    /// The single call failed; every batched item carries this reason
    Failed(String),
}

/// Per-request counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub request_id: Uuid,
    pub total: usize,
    pub preprocessed: usize,
    pub preprocess_failures: usize,
    pub inference: InferenceStatus,
}

/// Results plus summary for one request
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub results: ResponseList,
    pub summary: BatchSummary,
}

/// Batch row to original request slot. Row `r` of the batch tensor belongs
/// to `rows[r].position`.
struct BatchRow {
    position: usize,
    name: String,
}

/// Orchestrates one request's items through preprocessing and a single inference call
///
/// Holds no per-request state; one instance serves concurrent requests.
pub struct BatchCoordinator {
    preprocessor: ImagePreprocessor,
    engine: Arc<InferenceEngine>,
}

impl BatchCoordinator {
    pub fn new(preprocessor: ImagePreprocessor, engine: Arc<InferenceEngine>) -> Self {
        Self {
            preprocessor,
            engine,
        }
    }

    pub fn engine(&self) -> &InferenceEngine {
        &self.engine
    }

    /// Classify every item; the returned list has one entry per item in upload order
    pub fn process(&self, items: Vec<RequestItem>) -> ResponseList {
        self.run(items).results
    }

    /// [`process`](Self::process) with a summary of what happened
    pub fn run(&self, items: Vec<RequestItem>) -> BatchOutcome {
        let request_id = Uuid::new_v4();
        let total = items.len();
        let span = info_span!("batch", %request_id, items = total);
        let _enter = span.enter();

        let names: Vec<String> = items.iter().map(|item| item.name().to_string()).collect();
        let mut merger = ResultMerger::new(total);
        let mut tensors: Vec<ImageTensor> = Vec::with_capacity(total);
        let mut rows: Vec<BatchRow> = Vec::with_capacity(total);

        for item in items {
            let (position, name, payload) = item.into_parts();
            match self.preprocessor.preprocess(&payload) {
                Ok(tensor) => {
                    tensors.push(tensor);
                    rows.push(BatchRow { position, name });
                }
                Err(e) => {
                    warn!("Skipping image {} at position {}: {}", name, position, e);
                    counter!("classifier_items_total", "outcome" => "preprocess_error").increment(1);
                    place(&mut merger, ItemResult::error(position, name, e.to_string()));
                }
            }
        }

        let preprocessed = rows.len();
        let inference = if rows.is_empty() {
            if total > 0 {
                info!("None of the {} images could be preprocessed, skipping inference", total);
            }
            InferenceStatus::Skipped
        } else {
            match self.infer(&tensors) {
                Ok(class_ids) => {
                    counter!("classifier_items_total", "outcome" => "predicted")
                        .increment(rows.len() as u64);
                    for (row, class_id) in rows.into_iter().zip(class_ids) {
                        place(
                            &mut merger,
                            ItemResult::prediction(row.position, row.name, class_id),
                        );
                    }
                    InferenceStatus::Succeeded
                }
                Err(e) => {
                    error!("Batch inference failed for {} images: {}", rows.len(), e);
                    counter!("classifier_items_total", "outcome" => "inference_error")
                        .increment(rows.len() as u64);
                    let reason = format!("Batch inference failed: {}", e);
                    for row in rows {
                        place(&mut merger, ItemResult::error(row.position, row.name, reason.as_str()));
                    }
                    InferenceStatus::Failed(e.to_string())
                }
            }
        };

        let missing = merger.missing();
        if !missing.is_empty() {
            error!("Coordinator produced no result for positions {:?}", missing);
            debug_assert!(missing.is_empty(), "unfilled positions {:?}", missing);
        }
        let results = merger.finish_with(|position| {
            ItemResult::error(
                position,
                names.get(position).cloned().unwrap_or_default(),
                "Internal error: no result produced",
            )
        });

        info!("Processed {} of {} images", preprocessed, total);
        BatchOutcome {
            results,
            summary: BatchSummary {
                request_id,
                total,
                preprocessed,
                preprocess_failures: total - preprocessed,
                inference,
            },
        }
    }

    /// Single-item path: any failure is returned as an error instead of a list entry
    pub fn predict_one(&self, name: impl Into<String>, payload: &[u8]) -> Result<ItemResult, PredictError> {
        let name = name.into();
        let span = info_span!("predict", request_id = %Uuid::new_v4(), name = %name);
        let _enter = span.enter();

        let tensor = self.preprocessor.preprocess(payload).map_err(|e| {
            warn!("Could not preprocess {}: {}", name, e);
            counter!("classifier_items_total", "outcome" => "preprocess_error").increment(1);
            e
        })?;
        let class_id = self
            .infer(std::slice::from_ref(&tensor))
            .and_then(|ids| {
                ids.first().copied().ok_or(InferenceError::OutputMismatch {
                    expected: 1,
                    actual: 0,
                })
            })
            .map_err(|e| {
                error!("Inference failed for {}: {}", name, e);
                counter!("classifier_items_total", "outcome" => "inference_error").increment(1);
                e
            })?;

        counter!("classifier_items_total", "outcome" => "predicted").increment(1);
        info!("Prediction for {}: {}", name, class_id);
        Ok(ItemResult::prediction(0, name, class_id))
    }

    /// Stack and run the one forward pass for this request
    fn infer(&self, tensors: &[ImageTensor]) -> Result<Vec<ClassId>, InferenceError> {
        let views: Vec<_> = tensors.iter().map(|t| t.view()).collect();
        let batch = BatchTensor::stack(&views)?;

        let start = Instant::now();
        let result = self.engine.infer(&batch);
        let elapsed = start.elapsed();

        let status = if result.is_ok() { "ok" } else { "error" };
        counter!("classifier_inference_calls_total", "status" => status).increment(1);
        histogram!("classifier_batch_size").record(batch.len() as f64);
        histogram!("classifier_inference_seconds").record(elapsed.as_secs_f64());
        debug!("Forward pass over {} rows took {:?}", batch.len(), elapsed);

        result
    }
}

fn place(merger: &mut ResultMerger, result: ItemResult) {
    if let Err(e) = merger.place(result) {
        error!("Dropping misplaced result: {}", e);
        debug_assert!(false, "merge invariant violated: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, ImageFormat, Luma};
    use inference_engine::{Classifier, MockClassifier};
    use proptest::prelude::*;
    use std::io::Cursor;
    use std::sync::Mutex;

    /// Gray level that the mock classifier maps to `digit`
    fn gray_for(digit: u8) -> u8 {
        (digit as f32 * 25.5 + 12.0) as u8
    }

    fn digit_png(digit: u8) -> Vec<u8> {
        let img = GrayImage::from_pixel(28, 28, Luma([gray_for(digit)]));
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(img)
            .write_to(&mut buffer, ImageFormat::Png)
            .unwrap();
        buffer.into_inner()
    }

    fn corrupt() -> Vec<u8> {
        b"\x89PNG but not really".to_vec()
    }

    /// Mock classifier that records every batch size it is called with
    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<usize>>,
    }

    impl Classifier for Recording {
        fn classify(&self, batch: &BatchTensor) -> Result<Vec<ClassId>, InferenceError> {
            self.calls.lock().unwrap().push(batch.len());
            MockClassifier.classify(batch)
        }

        fn backend(&self) -> &'static str {
            "recording"
        }
    }

    struct Failing;

    impl Classifier for Failing {
        fn classify(&self, _batch: &BatchTensor) -> Result<Vec<ClassId>, InferenceError> {
            Err(InferenceError::InferenceFailed("device out of memory".to_string()))
        }

        fn backend(&self) -> &'static str {
            "failing"
        }
    }

    /// Non-re-entrant backend that panics on its first call only
    #[derive(Default)]
    struct PanicsOnce {
        panicked: std::sync::atomic::AtomicBool,
    }

    impl Classifier for PanicsOnce {
        fn classify(&self, batch: &BatchTensor) -> Result<Vec<ClassId>, InferenceError> {
            if !self.panicked.swap(true, std::sync::atomic::Ordering::SeqCst) {
                panic!("kernel crashed");
            }
            MockClassifier.classify(batch)
        }

        fn backend(&self) -> &'static str {
            "panics-once"
        }

        fn is_reentrant(&self) -> bool {
            false
        }
    }

    fn coordinator_with(classifier: Arc<dyn Classifier>) -> BatchCoordinator {
        BatchCoordinator::new(
            ImagePreprocessor::default(),
            Arc::new(InferenceEngine::new(classifier)),
        )
    }

    fn recording() -> (Arc<Recording>, BatchCoordinator) {
        let recording = Arc::new(Recording::default());
        let coordinator = coordinator_with(recording.clone());
        (recording, coordinator)
    }

    #[test]
    fn test_gray_levels_map_to_digits() {
        let coordinator = coordinator_with(Arc::new(MockClassifier));
        for digit in 0..10 {
            let result = coordinator.predict_one("d.png", &digit_png(digit)).unwrap();
            assert_eq!(result.predicted_class(), Some(digit));
        }
    }

    #[test]
    fn test_mixed_batch_keeps_order_and_errors() {
        let (recording, coordinator) = recording();
        let items = RequestItem::from_uploads(vec![
            ("a.png", digit_png(7)),
            ("b.png", corrupt()),
            ("c.png", digit_png(3)),
        ]);

        let results = coordinator.process(items);

        assert_eq!(results.len(), 3);
        assert_eq!(results[0], ItemResult::prediction(0, "a.png".into(), 7));
        assert_eq!(results[1].position(), 1);
        assert_eq!(results[1].name(), "b.png");
        assert!(results[1].error_message().unwrap().starts_with("Cannot identify image file"));
        assert_eq!(results[2], ItemResult::prediction(2, "c.png".into(), 3));
        assert_eq!(*recording.calls.lock().unwrap(), vec![2]);
    }

    #[test]
    fn test_all_corrupt_skips_inference() {
        let (recording, coordinator) = recording();
        let items = RequestItem::from_uploads(vec![
            ("a.png", corrupt()),
            ("b.png", Vec::new()),
            ("c.png", b"GIF89a".to_vec()),
        ]);

        let outcome = coordinator.run(items);

        assert_eq!(outcome.results.len(), 3);
        assert!(outcome.results.iter().all(|r| r.is_error()));
        assert_eq!(outcome.summary.inference, InferenceStatus::Skipped);
        assert_eq!(outcome.summary.preprocess_failures, 3);
        assert!(recording.calls.lock().unwrap().is_empty());
        assert_eq!(coordinator.engine().calls(), 0);
    }

    #[test]
    fn test_empty_request() {
        let (recording, coordinator) = recording();
        let outcome = coordinator.run(Vec::new());
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.summary.inference, InferenceStatus::Skipped);
        assert!(recording.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_all_valid_single_inference_call() {
        let (recording, coordinator) = recording();
        let items = RequestItem::from_uploads((0..10u8).map(|d| (format!("{}.png", d), digit_png(d))));

        let results = coordinator.process(items);

        assert_eq!(*recording.calls.lock().unwrap(), vec![10]);
        for (digit, result) in results.iter().enumerate() {
            assert_eq!(result.predicted_class(), Some(digit as u8));
        }
    }

    #[test]
    fn test_duplicate_names_resolved_by_position() {
        let coordinator = coordinator_with(Arc::new(MockClassifier));
        let items = RequestItem::from_uploads(vec![("x.png", digit_png(2)), ("x.png", digit_png(8))]);

        let results = coordinator.process(items);

        assert_eq!(
            results,
            vec![
                ItemResult::prediction(0, "x.png".into(), 2),
                ItemResult::prediction(1, "x.png".into(), 8),
            ]
        );
    }

    #[test]
    fn test_inference_failure_fans_out_but_keeps_preprocess_errors() {
        let coordinator = coordinator_with(Arc::new(Failing));
        let items = RequestItem::from_uploads(vec![
            ("a.png", digit_png(1)),
            ("b.png", corrupt()),
            ("c.png", digit_png(4)),
        ]);

        let outcome = coordinator.run(items);
        let results = &outcome.results;

        assert_eq!(results.len(), 3);
        assert!(results[0].error_message().unwrap().contains("device out of memory"));
        assert!(results[1].error_message().unwrap().starts_with("Cannot identify image file"));
        assert!(results[2].error_message().unwrap().contains("device out of memory"));
        assert!(matches!(outcome.summary.inference, InferenceStatus::Failed(_)));
        assert_eq!(outcome.summary.preprocessed, 2);
    }

    #[test]
    fn test_backend_panic_reported_per_item_and_next_request_succeeds() {
        let coordinator = coordinator_with(Arc::new(PanicsOnce::default()));
        assert!(coordinator.engine().is_serialized());

        let first = coordinator.run(RequestItem::from_uploads(vec![
            ("a.png", digit_png(6)),
            ("b.png", corrupt()),
        ]));
        assert_eq!(first.results.len(), 2);
        assert!(first.results[0].error_message().unwrap().contains("kernel crashed"));
        assert!(first.results[1].error_message().unwrap().starts_with("Cannot identify image file"));
        assert!(matches!(first.summary.inference, InferenceStatus::Failed(_)));

        let second = coordinator.process(RequestItem::from_uploads(vec![("a.png", digit_png(6))]));
        assert_eq!(second, vec![ItemResult::prediction(0, "a.png".into(), 6)]);
    }

    #[test]
    fn test_process_is_deterministic() {
        let coordinator = coordinator_with(Arc::new(MockClassifier));
        let uploads = vec![("a.png", digit_png(5)), ("b.png", corrupt()), ("a.png", digit_png(9))];

        let first = coordinator.process(RequestItem::from_uploads(uploads.clone()));
        let second = coordinator.process(RequestItem::from_uploads(uploads));
        assert_eq!(first, second);
    }

    #[test]
    fn test_predict_one_errors() {
        let coordinator = coordinator_with(Arc::new(MockClassifier));
        assert!(matches!(
            coordinator.predict_one("bad.png", &corrupt()),
            Err(PredictError::Preprocess(_))
        ));

        let failing = coordinator_with(Arc::new(Failing));
        assert!(matches!(
            failing.predict_one("ok.png", &digit_png(3)),
            Err(PredictError::Inference(_))
        ));
    }

    #[test]
    fn test_predict_one_counts_item_outcomes() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let coordinator = coordinator_with(Arc::new(MockClassifier));

        metrics::with_local_recorder(&recorder, || {
            coordinator.predict_one("ok.png", &digit_png(4)).unwrap();
            coordinator.predict_one("bad.png", &corrupt()).unwrap_err();
        });

        let rendered = handle.render();
        assert!(rendered.contains(r#"classifier_items_total{outcome="predicted"} 1"#));
        assert!(rendered.contains(r#"classifier_items_total{outcome="preprocess_error"} 1"#));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_one_ordered_result_per_item(
            spec in proptest::collection::vec((any::<bool>(), 0u8..10), 0..16)
        ) {
            let (recording, coordinator) = recording();
            let uploads: Vec<_> = spec
                .iter()
                .map(|(valid, digit)| {
                    let payload = if *valid { digit_png(*digit) } else { corrupt() };
                    ("same.png", payload)
                })
                .collect();

            let results = coordinator.process(RequestItem::from_uploads(uploads));

            prop_assert_eq!(results.len(), spec.len());
            for (i, (result, (valid, digit))) in results.iter().zip(&spec).enumerate() {
                prop_assert_eq!(result.position(), i);
                if *valid {
                    prop_assert_eq!(result.predicted_class(), Some(*digit));
                } else {
                    prop_assert!(result.is_error());
                }
            }

            let valid = spec.iter().filter(|(v, _)| *v).count();
            let calls = recording.calls.lock().unwrap().clone();
            if valid == 0 {
                prop_assert!(calls.is_empty());
            } else {
                prop_assert_eq!(calls, vec![valid]);
            }
        }
    }
}
