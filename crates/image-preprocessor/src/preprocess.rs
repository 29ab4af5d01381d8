//! Image bytes to model input tensor

use image::imageops;
use image::{DynamicImage, GrayImage, Luma};
use ndarray::Array3;
use tracing::{debug, info};

use crate::config::PreprocessConfig;
use crate::{ImageTensor, PreprocessError, IMAGE_SIDE, TENSOR_SHAPE};

/// Stateless image preprocessor
///
/// A pure function of the input bytes once constructed; safe to share
/// between threads and requests.
#[derive(Debug, Clone, Default)]
pub struct ImagePreprocessor {
    config: PreprocessConfig,
}

impl ImagePreprocessor {
    /// Create a preprocessor, rejecting a normalization that would divide by zero
    pub fn new(config: PreprocessConfig) -> Result<Self, PreprocessError> {
        if let Some(norm) = &config.normalization {
            if !(norm.std > 0.0) {
                return Err(PreprocessError::Format(format!(
                    "normalization std must be positive, got {}",
                    norm.std
                )));
            }
        }
        info!(
            "Creating image preprocessor: filter={:?}, grayscale={:?}, normalization={:?}",
            config.filter, config.grayscale, config.normalization
        );
        Ok(Self { config })
    }

    /// Decode, convert, resize and scale one payload into a [1, 28, 28] tensor
    pub fn preprocess(&self, payload: &[u8]) -> Result<ImageTensor, PreprocessError> {
        let decoded = image::load_from_memory(payload)
            .map_err(|e| PreprocessError::Decode(e.to_string()))?;

        let (width, height) = (decoded.width(), decoded.height());
        if width == 0 || height == 0 {
            return Err(PreprocessError::Format(format!(
                "decoded image has an empty dimension ({}x{})",
                width, height
            )));
        }

        let gray = self.to_grayscale(decoded);
        let resized = if gray.dimensions() == (IMAGE_SIDE, IMAGE_SIDE) {
            gray
        } else {
            imageops::resize(&gray, IMAGE_SIDE, IMAGE_SIDE, self.config.filter.filter_type())
        };

        debug!("Preprocessed {}x{} image", width, height);
        self.to_tensor(&resized)
    }

    fn to_grayscale(&self, image: DynamicImage) -> GrayImage {
        match image {
            DynamicImage::ImageLuma8(gray) => gray,
            img @ (DynamicImage::ImageLumaA8(_)
            | DynamicImage::ImageLuma16(_)
            | DynamicImage::ImageLumaA16(_)) => img.to_luma8(),
            other => {
                // Alpha is dropped, not composited
                let rgb = other.to_rgb8();
                let weights = self.config.grayscale;
                GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
                    Luma([weights.luma(rgb.get_pixel(x, y).0)])
                })
            }
        }
    }

    fn to_tensor(&self, gray: &GrayImage) -> Result<ImageTensor, PreprocessError> {
        if gray.dimensions() != (IMAGE_SIDE, IMAGE_SIDE) {
            return Err(PreprocessError::Format(format!(
                "expected {}x{} after resize, got {}x{}",
                IMAGE_SIDE,
                IMAGE_SIDE,
                gray.width(),
                gray.height()
            )));
        }

        let mut tensor = Array3::<f32>::zeros(TENSOR_SHAPE);
        for (x, y, pixel) in gray.enumerate_pixels() {
            tensor[[0, y as usize, x as usize]] = pixel[0] as f32 / 255.0;
        }

        if let Some(norm) = self.config.normalization {
            tensor.mapv_inplace(|v| (v - norm.mean) / norm.std);
        }

        Ok(tensor)
    }
}
