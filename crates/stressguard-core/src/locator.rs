//! Face location stage.

use crate::cascade::{CascadeError, HaarCascade};
use crate::types::FaceRegion;
use image::{GrayImage, Luma, RgbImage};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Pyramid step between detection scales.
pub const DEFAULT_SCALE_FACTOR: f64 = 1.3;
/// A face must be confirmed by more than this many overlapping raw hits.
pub const DEFAULT_MIN_NEIGHBORS: u32 = 5;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LocateError {
    #[error("invalid image: {width}x{height} raster")]
    InvalidImage { width: u32, height: u32 },
    #[error("face detector failed: {0}")]
    Backend(String),
}

/// Finds face rectangles in a decoded image.
///
/// Implementations must be read-only after construction; the pipeline shares
/// one locator across requests.
pub trait FaceLocator: Send + Sync {
    fn locate(&self, image: &RgbImage) -> Result<Vec<FaceRegion>, LocateError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorParams {
    /// Ratio between consecutive pyramid levels. Must be greater than 1.
    pub scale_factor: f64,
    pub min_neighbors: u32,
    /// Smallest face edge (pixels) to search for. `None` searches every level.
    pub min_face_size: Option<u32>,
}

impl Default for LocatorParams {
    fn default() -> Self {
        Self {
            scale_factor: DEFAULT_SCALE_FACTOR,
            min_neighbors: DEFAULT_MIN_NEIGHBORS,
            min_face_size: None,
        }
    }
}

impl LocatorParams {
    pub fn validate(&self) -> Result<(), CascadeError> {
        if !self.scale_factor.is_finite() || self.scale_factor <= 1.0 {
            return Err(CascadeError::InvalidParams(format!(
                "scale_factor must be > 1.0, got {}",
                self.scale_factor
            )));
        }
        Ok(())
    }
}

/// Frontal-face locator backed by a Haar cascade.
pub struct CascadeLocator {
    cascade: HaarCascade,
    params: LocatorParams,
}

impl CascadeLocator {
    pub fn new(cascade: HaarCascade, params: LocatorParams) -> Result<Self, CascadeError> {
        params.validate()?;
        Ok(Self { cascade, params })
    }

    /// Load the cascade XML at `path`.
    pub fn load(path: impl AsRef<Path>, params: LocatorParams) -> Result<Self, CascadeError> {
        Self::new(HaarCascade::load(path)?, params)
    }

    pub fn params(&self) -> &LocatorParams {
        &self.params
    }
}

impl FaceLocator for CascadeLocator {
    fn locate(&self, image: &RgbImage) -> Result<Vec<FaceRegion>, LocateError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(LocateError::InvalidImage { width, height });
        }

        let gray = to_gray(image);
        Ok(self.cascade.detect_multi_scale(&gray, &self.params))
    }
}

/// BT.601 luma, rounded to the nearest integer.
pub fn to_gray(image: &RgbImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        let luma = (r as u32 * 299 + g as u32 * 587 + b as u32 * 114 + 500) / 1000;
        Luma([luma as u8])
    })
}
