//! Face crop normalization into classifier input tensors.
//!
//! Crop → resize to the model input size → reorder channels to the trained
//! order → apply the network family's pixel preprocessing. Output is a
//! height × width × channel `f32` array.

use crate::types::FaceRegion;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::{Array3, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_INPUT_SIZE: u32 = 224;

// ImageNet statistics used by the keras.applications preprocessing modes.
const CAFFE_MEAN_BGR: [f32; 3] = [103.939, 116.779, 123.68];
const TORCH_MEAN_RGB: [f32; 3] = [0.485, 0.456, 0.406];
const TORCH_STD_RGB: [f32; 3] = [0.229, 0.224, 0.225];

/// A normalized face crop, shape (size, size, 3).
pub type FaceTensor = Array3<f32>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("empty face region at ({}, {}) size {}x{}", .0.x, .0.y, .0.width, .0.height)]
    EmptyRegion(FaceRegion),
}

/// Channel order the classifier was trained on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// Pixel scaling applied after channel reordering.
///
/// The variants follow the `keras.applications` preprocessing modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preprocessing {
    /// `x / 127.5 - 1` (MobileNet, Inception, Xception).
    #[default]
    Tf,
    /// RGB→BGR, then subtract the ImageNet BGR mean (VGG, ResNet50).
    Caffe,
    /// `x / 255`, then ImageNet mean/std per channel (DenseNet).
    Torch,
    /// Pixel values as floats in [0, 255].
    Raw,
}

impl Preprocessing {
    pub fn apply(self, tensor: &mut FaceTensor) {
        match self {
            Preprocessing::Tf => tensor.mapv_inplace(|v| v / 127.5 - 1.0),
            Preprocessing::Caffe => {
                let first = tensor.index_axis(Axis(2), 0).to_owned();
                let third = tensor.index_axis(Axis(2), 2).to_owned();
                tensor.index_axis_mut(Axis(2), 0).assign(&third);
                tensor.index_axis_mut(Axis(2), 2).assign(&first);
                for (c, mut plane) in tensor.axis_iter_mut(Axis(2)).enumerate() {
                    let mean = CAFFE_MEAN_BGR[c];
                    plane.mapv_inplace(|v| v - mean);
                }
            }
            Preprocessing::Torch => {
                for (c, mut plane) in tensor.axis_iter_mut(Axis(2)).enumerate() {
                    let (mean, std) = (TORCH_MEAN_RGB[c], TORCH_STD_RGB[c]);
                    plane.mapv_inplace(|v| (v / 255.0 - mean) / std);
                }
            }
            Preprocessing::Raw => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Square model input edge in pixels.
    pub input_size: u32,
    pub channel_order: ChannelOrder,
    pub preprocessing: Preprocessing,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            input_size: DEFAULT_INPUT_SIZE,
            channel_order: ChannelOrder::Rgb,
            preprocessing: Preprocessing::Tf,
        }
    }
}

/// Crop `region` out of `image` and turn it into a classifier input tensor.
///
/// The crop is taken verbatim (no padding or letterboxing). Parts of the
/// region outside the image are cut off.
pub fn normalize(
    image: &RgbImage,
    region: &FaceRegion,
    config: &NormalizerConfig,
) -> Result<FaceTensor, NormalizeError> {
    let clamped = region
        .clamp_to(image.width(), image.height())
        .ok_or(NormalizeError::EmptyRegion(*region))?;

    let crop =
        imageops::crop_imm(image, clamped.x, clamped.y, clamped.width, clamped.height).to_image();

    let size = config.input_size;
    let resized = if crop.dimensions() == (size, size) {
        crop
    } else {
        imageops::resize(&crop, size, size, FilterType::Triangle)
    };

    let mut tensor = FaceTensor::zeros((size as usize, size as usize, 3));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        let ordered = match config.channel_order {
            ChannelOrder::Rgb => [r, g, b],
            ChannelOrder::Bgr => [b, g, r],
        };
        for (c, value) in ordered.into_iter().enumerate() {
            tensor[[y as usize, x as usize, c]] = value as f32;
        }
    }

    config.preprocessing.apply(&mut tensor);
    Ok(tensor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    const MID_GRAY: u8 = 128;

    fn gray_image(w: u32, h: u32) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb([MID_GRAY; 3]))
    }

    fn config(preprocessing: Preprocessing) -> NormalizerConfig {
        NormalizerConfig {
            preprocessing,
            ..NormalizerConfig::default()
        }
    }

    fn assert_every_pixel(tensor: &FaceTensor, expected: [f32; 3], tol: f32) {
        for ((_, _, c), &v) in tensor.indexed_iter() {
            assert!(
                (v - expected[c]).abs() < tol,
                "channel {c}: got {v}, expected {}",
                expected[c]
            );
        }
    }

    #[test]
    fn test_mid_gray_tf_reference() {
        let image = gray_image(224, 224);
        let tensor = normalize(&image, &FaceRegion::new(0, 0, 224, 224), &config(Preprocessing::Tf)).unwrap();
        assert_eq!(tensor.shape(), &[224, 224, 3]);
        // 128 / 127.5 - 1
        let v = 0.003_921_569;
        assert_every_pixel(&tensor, [v, v, v], 1e-6);
    }

    #[test]
    fn test_mid_gray_caffe_reference() {
        let image = gray_image(224, 224);
        let tensor = normalize(&image, &FaceRegion::new(0, 0, 224, 224), &config(Preprocessing::Caffe)).unwrap();
        assert_every_pixel(&tensor, [24.061, 11.221, 4.32], 1e-3);
    }

    #[test]
    fn test_mid_gray_torch_reference() {
        let image = gray_image(224, 224);
        let tensor = normalize(&image, &FaceRegion::new(0, 0, 224, 224), &config(Preprocessing::Torch)).unwrap();
        assert_every_pixel(&tensor, [0.074_065, 0.205_182, 0.426_492], 1e-4);
    }

    #[test]
    fn test_resized_crop_keeps_uniform_value() {
        let image = gray_image(400, 300);
        let tensor = normalize(&image, &FaceRegion::new(50, 40, 100, 80), &config(Preprocessing::Raw)).unwrap();
        assert_eq!(tensor.shape(), &[224, 224, 3]);
        assert_every_pixel(&tensor, [128.0; 3], 1e-6);
    }

    #[test]
    fn test_crop_is_verbatim() {
        // Left half red, right half blue; crop only the blue half.
        let image = RgbImage::from_fn(100, 50, |x, _| {
            if x < 50 { Rgb([255, 0, 0]) } else { Rgb([0, 0, 255]) }
        });
        let tensor = normalize(&image, &FaceRegion::new(50, 0, 50, 50), &config(Preprocessing::Raw)).unwrap();
        assert_every_pixel(&tensor, [0.0, 0.0, 255.0], 1e-6);
    }

    #[test]
    fn test_channel_order() {
        let image = RgbImage::from_pixel(30, 30, Rgb([255, 10, 0]));
        let region = FaceRegion::new(0, 0, 30, 30);

        let rgb = normalize(&image, &region, &config(Preprocessing::Raw)).unwrap();
        assert_eq!(rgb[[0, 0, 0]], 255.0);
        assert_eq!(rgb[[0, 0, 2]], 0.0);

        let bgr_config = NormalizerConfig {
            channel_order: ChannelOrder::Bgr,
            preprocessing: Preprocessing::Raw,
            ..NormalizerConfig::default()
        };
        let bgr = normalize(&image, &region, &bgr_config).unwrap();
        assert_eq!(bgr[[0, 0, 0]], 0.0);
        assert_eq!(bgr[[0, 0, 1]], 10.0);
        assert_eq!(bgr[[0, 0, 2]], 255.0);
    }

    #[test]
    fn test_empty_region_fails() {
        let image = gray_image(50, 50);
        for region in [
            FaceRegion::new(0, 0, 0, 10),
            FaceRegion::new(0, 0, 10, 0),
            FaceRegion::new(60, 60, 10, 10),
        ] {
            assert_eq!(
                normalize(&image, &region, &NormalizerConfig::default()),
                Err(NormalizeError::EmptyRegion(region))
            );
        }
    }

    #[test]
    fn test_region_past_edge_is_clipped() {
        let image = gray_image(50, 50);
        let tensor = normalize(&image, &FaceRegion::new(40, 40, 30, 30), &config(Preprocessing::Raw)).unwrap();
        assert_eq!(tensor.shape(), &[224, 224, 3]);
        assert_every_pixel(&tensor, [128.0; 3], 1e-6);
    }

    #[test]
    fn test_custom_input_size() {
        let image = gray_image(64, 64);
        let cfg = NormalizerConfig {
            input_size: 96,
            ..NormalizerConfig::default()
        };
        let tensor = normalize(&image, &FaceRegion::new(0, 0, 64, 64), &cfg).unwrap();
        assert_eq!(tensor.shape(), &[96, 96, 3]);
    }

    #[test]
    fn test_config_from_toml() {
        let cfg: NormalizerConfig =
            toml::from_str("channel_order = \"bgr\"\npreprocessing = \"caffe\"").unwrap();
        assert_eq!(cfg.channel_order, ChannelOrder::Bgr);
        assert_eq!(cfg.preprocessing, Preprocessing::Caffe);
        assert_eq!(cfg.input_size, DEFAULT_INPUT_SIZE);
    }
}
