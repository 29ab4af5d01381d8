//! Batch Inference Coordinator
//!
//! Preprocesses every uploaded item independently, runs the classifier once
//! over the items that survived, and returns exactly one result per item in
//! upload order. Results are correlated by position, never by name.

mod coordinator;
mod item;
mod merger;

pub use coordinator::{BatchCoordinator, BatchOutcome, BatchSummary, InferenceStatus};
pub use item::{ItemResult, RequestItem, ResponseList};
pub use merger::ResultMerger;

use image_preprocessor::PreprocessError;
use inference_engine::InferenceError;
use thiserror::Error;

/// Failure of the single-item path, surfaced as a whole-request error
#[derive(Debug, Clone, Error)]
pub enum PredictError {
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

/// Internal merge invariant violations; any of these is a coordinator bug
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("Result for position {0} placed twice")]
    Duplicate(usize),
    #[error("Position {position} outside request of {len} items")]
    OutOfRange { position: usize, len: usize },
    #[error("No result for positions {0:?}")]
    Missing(Vec<usize>),
}
