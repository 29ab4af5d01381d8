//! Image Preprocessing for Digit Classification
//!
//! Turns raw upload bytes into the fixed-shape tensor the classifier consumes:
//! - Decode any format the `image` crate recognizes
//! - Reduce to a single grayscale channel
//! - Resize to exactly 28x28
//! - Scale intensities to [0, 1], optionally normalize

pub mod config;
pub mod preprocess;

pub use config::{GrayscaleWeights, Normalization, PreprocessConfig, ResizeFilter};
pub use preprocess::ImagePreprocessor;

use ndarray::Array3;
use thiserror::Error;

/// Side length of the square model input
pub const IMAGE_SIDE: u32 = 28;

/// Number of channels in the model input
pub const CHANNELS: usize = 1;

/// Shape of a single preprocessed item: [channels, height, width]
pub const TENSOR_SHAPE: [usize; 3] = [CHANNELS, IMAGE_SIDE as usize, IMAGE_SIDE as usize];

/// Preprocessed single-image tensor, shape [`TENSOR_SHAPE`]
pub type ImageTensor = Array3<f32>;

/// Per-item preprocessing failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PreprocessError {
    #[error("Cannot identify image file: {0}")]
    Decode(String),

    #[error("Image cannot be normalized to the model input shape: {0}")]
    Format(String),
}
