//! Preprocessing configuration

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

/// Interpolation used when resizing to the model input size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFilter {
    Nearest,
    /// Bilinear
    Triangle,
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl ResizeFilter {
    pub fn filter_type(self) -> FilterType {
        match self {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Triangle => FilterType::Triangle,
            ResizeFilter::CatmullRom => FilterType::CatmullRom,
            ResizeFilter::Gaussian => FilterType::Gaussian,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Luma weighting applied to color images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrayscaleWeights {
    /// ITU-R BT.601: 0.299*R + 0.587*G + 0.114*B
    Rec601,
    /// ITU-R BT.709: 0.2126*R + 0.7152*G + 0.0722*B
    Rec709,
}

impl GrayscaleWeights {
    /// Weights in 16.16 fixed point, summing to 65536
    pub(crate) fn fixed_point(self) -> [u32; 3] {
        match self {
            GrayscaleWeights::Rec601 => [19595, 38470, 7471],
            GrayscaleWeights::Rec709 => [13933, 46871, 4732],
        }
    }

    /// Reduce one RGB pixel to luma, rounding to nearest
    pub fn luma(self, rgb: [u8; 3]) -> u8 {
        let [wr, wg, wb] = self.fixed_point();
        let acc = rgb[0] as u32 * wr + rgb[1] as u32 * wg + rgb[2] as u32 * wb + 0x8000;
        (acc >> 16) as u8
    }
}

/// Per-channel normalization applied after scaling to [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub mean: f32,
    pub std: f32,
}

/// Preprocessing configuration
///
/// Must match what the deployed model was trained against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Resize interpolation
    pub filter: ResizeFilter,
    /// Color to grayscale reduction
    pub grayscale: GrayscaleWeights,
    /// Optional (x - mean) / std step, off unless the model was trained with it
    pub normalization: Option<Normalization>,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            filter: ResizeFilter::Triangle,
            grayscale: GrayscaleWeights::Rec601,
            normalization: None,
        }
    }
}
