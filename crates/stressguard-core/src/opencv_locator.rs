//! Face locator backed by OpenCV's `CascadeClassifier`.
//!
//! Built with the `opencv` feature. Detections are the ones
//! `detectMultiScale` returns for the same cascade file and parameters,
//! including OpenCV's own pyramid resize and neighbour grouping.

use crate::cascade::CascadeError;
use crate::locator::{to_gray, FaceLocator, LocateError, LocatorParams};
use crate::types::FaceRegion;
use image::RgbImage;
use opencv::core::{Mat, Rect, Size, Vector};
use opencv::objdetect::CascadeClassifier;
use opencv::prelude::*;
use std::path::Path;
use std::sync::Mutex;

/// Frontal-face locator running OpenCV's cascade detector.
pub struct OpencvLocator {
    // detect_multi_scale takes &mut self
    classifier: Mutex<CascadeClassifier>,
    params: LocatorParams,
}

impl OpencvLocator {
    /// Load the cascade XML at `path` through OpenCV.
    pub fn load(path: impl AsRef<Path>, params: LocatorParams) -> Result<Self, CascadeError> {
        params.validate()?;
        let path = path.as_ref();
        if !path.exists() {
            return Err(CascadeError::NotFound(path.display().to_string()));
        }
        let path_str = path
            .to_str()
            .ok_or_else(|| CascadeError::Invalid(format!("non UTF-8 path {}", path.display())))?;

        let classifier =
            CascadeClassifier::new(path_str).map_err(|e| CascadeError::Invalid(e.to_string()))?;
        if classifier.empty().map_err(|e| CascadeError::Invalid(e.to_string()))? {
            return Err(CascadeError::Invalid(format!(
                "OpenCV could not read a cascade from {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "OpenCV cascade loaded");
        Ok(Self {
            classifier: Mutex::new(classifier),
            params,
        })
    }

    pub fn params(&self) -> &LocatorParams {
        &self.params
    }
}

impl FaceLocator for OpencvLocator {
    fn locate(&self, image: &RgbImage) -> Result<Vec<FaceRegion>, LocateError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(LocateError::InvalidImage { width, height });
        }

        let gray = to_gray(image);
        let mat = Mat::from_slice_rows_cols(gray.as_raw(), height as usize, width as usize)
            .map_err(backend_error)?;
        let min = self.params.min_face_size.unwrap_or(0).min(i32::MAX as u32) as i32;

        let mut found = Vector::<Rect>::new();
        {
            let mut classifier = self
                .classifier
                .lock()
                .map_err(|_| LocateError::Backend("cascade lock poisoned".into()))?;
            classifier
                .detect_multi_scale(
                    &mat,
                    &mut found,
                    self.params.scale_factor,
                    self.params.min_neighbors.min(i32::MAX as u32) as i32,
                    0,
                    Size::new(min, min),
                    Size::default(),
                )
                .map_err(backend_error)?;
        }

        Ok(found
            .iter()
            .filter_map(|r| {
                if r.width <= 0 || r.height <= 0 {
                    return None;
                }
                let x = r.x.max(0) as u32;
                let y = r.y.max(0) as u32;
                FaceRegion::new(x, y, r.width as u32, r.height as u32).clamp_to(width, height)
            })
            .collect())
    }
}

fn backend_error(err: opencv::Error) -> LocateError {
    LocateError::Backend(err.to_string())
}
