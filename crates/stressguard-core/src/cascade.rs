//! Haar cascade face detector.
//!
//! Loads boosted Haar cascades in the OpenCV XML format (for example
//! `haarcascade_frontalface_default.xml`) and evaluates them over an image
//! pyramid with integral images, then merges overlapping hits into face
//! rectangles by neighbour voting.

use crate::locator::LocatorParams;
use crate::types::FaceRegion;
use image::imageops::{self, FilterType};
use image::GrayImage;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
/// Relative tolerance used when clustering overlapping detections.
const GROUP_EPS: f64 = 0.2;
/// Subtracted from every stage threshold on load, as the cascade trainer expects.
const STAGE_THRESHOLD_EPS: f64 = 1e-5;
/// Window stride switches from 2 to 1 pixel above this pyramid factor.
const DENSE_STEP_FACTOR: f64 = 2.0;

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("cascade file not found: {0}")]
    NotFound(String),
    #[error("failed to read cascade {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed cascade XML: {0}")]
    Xml(#[from] quick_xml::DeError),
    #[error("unsupported cascade: {0}")]
    Unsupported(String),
    #[error("invalid cascade: {0}")]
    Invalid(String),
    #[error("invalid detector parameters: {0}")]
    InvalidParams(String),
}

// --- XML schema (only the fields the detector needs) ---

#[derive(Deserialize)]
struct StorageXml {
    cascade: CascadeXml,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CascadeXml {
    stage_type: String,
    feature_type: String,
    height: u32,
    width: u32,
    stages: ItemsXml<StageXml>,
    features: ItemsXml<FeatureXml>,
}

/// OpenCV serializes sequences as repeated `<_>` children.
#[derive(Deserialize)]
struct ItemsXml<T> {
    #[serde(rename = "_", default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StageXml {
    stage_threshold: f64,
    weak_classifiers: ItemsXml<WeakXml>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WeakXml {
    internal_nodes: String,
    leaf_values: String,
}

#[derive(Deserialize)]
struct FeatureXml {
    rects: ItemsXml<String>,
    #[serde(default)]
    tilted: u8,
}

// --- Compiled cascade ---

#[derive(Debug, Clone, Copy)]
struct WeightedRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    weight: f64,
}

#[derive(Debug, Clone)]
struct HaarFeature {
    rects: Vec<WeightedRect>,
}

impl HaarFeature {
    fn eval(&self, ii: &IntegralImage, x: u32, y: u32) -> f64 {
        self.rects
            .iter()
            .map(|r| r.weight * ii.sum(x + r.x, y + r.y, r.width, r.height) as f64)
            .sum()
    }
}

/// Tree node. Child values `> 0` index another node; `<= 0` select leaf `-child`.
#[derive(Debug, Clone, Copy)]
struct Node {
    feature: usize,
    threshold: f64,
    left: i32,
    right: i32,
}

#[derive(Debug, Clone)]
struct WeakClassifier {
    nodes: Vec<Node>,
    leaves: Vec<f64>,
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f64,
    weak: Vec<WeakClassifier>,
}

/// Outcome of evaluating every stage at one window position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowVerdict {
    Accepted,
    RejectedAtFirstStage,
    Rejected,
}

/// A boosted Haar cascade, read-only after load.
#[derive(Debug, Clone)]
pub struct HaarCascade {
    window_width: u32,
    window_height: u32,
    stages: Vec<Stage>,
    features: Vec<HaarFeature>,
}

impl HaarCascade {
    /// Load an OpenCV cascade XML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CascadeError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CascadeError::NotFound(path.display().to_string()));
        }

        let xml = std::fs::read_to_string(path).map_err(|source| CascadeError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let cascade = Self::from_xml(&xml)?;

        tracing::info!(
            path = %path.display(),
            window = ?cascade.window_size(),
            stages = cascade.stages.len(),
            features = cascade.features.len(),
            "loaded Haar cascade"
        );

        Ok(cascade)
    }

    /// Parse a cascade from OpenCV XML text.
    pub fn from_xml(xml: &str) -> Result<Self, CascadeError> {
        let storage: StorageXml = quick_xml::de::from_str(xml)?;
        let raw = storage.cascade;

        if raw.stage_type.trim() != "BOOST" {
            return Err(CascadeError::Unsupported(format!(
                "stage type {:?}, expected BOOST",
                raw.stage_type.trim()
            )));
        }
        if raw.feature_type.trim() != "HAAR" {
            return Err(CascadeError::Unsupported(format!(
                "feature type {:?}, expected HAAR",
                raw.feature_type.trim()
            )));
        }
        if raw.width < 3 || raw.height < 3 {
            return Err(CascadeError::Invalid(format!(
                "window {}x{} is too small",
                raw.width, raw.height
            )));
        }

        let features = raw
            .features
            .items
            .iter()
            .enumerate()
            .map(|(i, f)| parse_feature(i, f, raw.width, raw.height))
            .collect::<Result<Vec<_>, _>>()?;

        let stages = raw
            .stages
            .items
            .iter()
            .enumerate()
            .map(|(i, s)| parse_stage(i, s, features.len()))
            .collect::<Result<Vec<_>, _>>()?;

        if stages.is_empty() {
            return Err(CascadeError::Invalid("cascade has no stages".into()));
        }

        Ok(Self {
            window_width: raw.width,
            window_height: raw.height,
            stages,
            features,
        })
    }

    /// Base detection window (width, height) in pixels.
    pub fn window_size(&self) -> (u32, u32) {
        (self.window_width, self.window_height)
    }

    /// Run the cascade over an image pyramid and group the raw hits.
    ///
    /// Parameters that fail [`LocatorParams::validate`] yield no detections.
    pub(crate) fn detect_multi_scale(&self, gray: &GrayImage, params: &LocatorParams) -> Vec<FaceRegion> {
        if let Err(e) = params.validate() {
            tracing::warn!(error = %e, "cascade pass skipped");
            return Vec::new();
        }

        let (img_w, img_h) = gray.dimensions();
        let (win_w, win_h) = self.window_size();
        let min_size = params.min_face_size.unwrap_or(0);

        let mut hits = Vec::new();
        let mut factor = 1.0f64;
        let mut levels = 0usize;

        loop {
            let scaled_w = (img_w as f64 / factor).round() as u32;
            let scaled_h = (img_h as f64 / factor).round() as u32;
            if scaled_w <= win_w || scaled_h <= win_h {
                break;
            }

            let mapped_w = (win_w as f64 * factor).round() as u32;
            let mapped_h = (win_h as f64 * factor).round() as u32;
            if mapped_w < min_size || mapped_h < min_size {
                factor *= params.scale_factor;
                continue;
            }

            let ii = if scaled_w == img_w && scaled_h == img_h {
                IntegralImage::new(gray)
            } else {
                IntegralImage::new(&imageops::resize(gray, scaled_w, scaled_h, FilterType::Triangle))
            };

            let step = if factor > DENSE_STEP_FACTOR { 1 } else { 2 };
            for (x, y) in self.scan_level(&ii, scaled_w - win_w, scaled_h - win_h, step) {
                let region = FaceRegion::new(
                    (x as f64 * factor).round() as u32,
                    (y as f64 * factor).round() as u32,
                    mapped_w,
                    mapped_h,
                );
                if let Some(region) = region.clamp_to(img_w, img_h) {
                    hits.push(region);
                }
            }

            levels += 1;
            factor *= params.scale_factor;
        }

        let raw_hits = hits.len();
        let grouped = group_rectangles(hits, params.min_neighbors, GROUP_EPS);
        tracing::debug!(
            levels,
            raw_hits,
            faces = grouped.len(),
            "cascade pass complete"
        );
        grouped
    }

    /// Window origins accepted at one pyramid level. A window rejected by the
    /// first stage also skips the next position on its row.
    fn scan_level(&self, ii: &IntegralImage, span_x: u32, span_y: u32, step: u32) -> Vec<(u32, u32)> {
        let mut accepted = Vec::new();
        let mut y = 0;
        while y < span_y {
            let mut x = 0;
            while x < span_x {
                match self.run_at(ii, x, y) {
                    WindowVerdict::Accepted => accepted.push((x, y)),
                    WindowVerdict::RejectedAtFirstStage => x += step,
                    WindowVerdict::Rejected => {}
                }
                x += step;
            }
            y += step;
        }
        accepted
    }

    /// Standard deviation scale over the window minus a 1-pixel border.
    fn variance_norm(&self, ii: &IntegralImage, x: u32, y: u32) -> f64 {
        let (nw, nh) = (self.window_width - 2, self.window_height - 2);
        let area = (nw as f64) * (nh as f64);
        let sum = ii.sum(x + 1, y + 1, nw, nh) as f64;
        let sq_sum = ii.sq_sum(x + 1, y + 1, nw, nh) as f64;
        let nf = area * sq_sum - sum * sum;
        if nf > 0.0 {
            nf.sqrt()
        } else {
            1.0
        }
    }

    /// Walk one weak tree from its root and return the selected leaf value.
    fn weak_response(&self, weak: &WeakClassifier, ii: &IntegralImage, x: u32, y: u32, nf: f64) -> f64 {
        let mut idx = 0i32;
        loop {
            let node = &weak.nodes[idx as usize];
            let value = self.features[node.feature].eval(ii, x, y) / nf;
            idx = if value < node.threshold { node.left } else { node.right };
            if idx <= 0 {
                break;
            }
        }
        weak.leaves[(-idx) as usize]
    }

    fn run_at(&self, ii: &IntegralImage, x: u32, y: u32) -> WindowVerdict {
        let nf = self.variance_norm(ii, x, y);

        for (si, stage) in self.stages.iter().enumerate() {
            let total: f64 = stage
                .weak
                .iter()
                .map(|weak| self.weak_response(weak, ii, x, y, nf))
                .sum();
            if total < stage.threshold {
                return if si == 0 {
                    WindowVerdict::RejectedAtFirstStage
                } else {
                    WindowVerdict::Rejected
                };
            }
        }

        WindowVerdict::Accepted
    }
}

fn parse_numbers<T: std::str::FromStr>(text: &str, what: &str) -> Result<Vec<T>, CascadeError> {
    text.split_whitespace()
        .map(|tok| {
            tok.parse::<T>()
                .map_err(|_| CascadeError::Invalid(format!("bad number {tok:?} in {what}")))
        })
        .collect()
}

fn parse_feature(
    index: usize,
    raw: &FeatureXml,
    win_w: u32,
    win_h: u32,
) -> Result<HaarFeature, CascadeError> {
    if raw.tilted != 0 {
        return Err(CascadeError::Unsupported(format!(
            "feature {index} is tilted; only upright Haar features are supported"
        )));
    }

    let rects = raw
        .rects
        .items
        .iter()
        .map(|text| {
            let v: Vec<f64> = parse_numbers(text, "feature rect")?;
            let [x, y, w, h, weight] = v[..] else {
                return Err(CascadeError::Invalid(format!(
                    "feature {index}: rect needs 5 values, got {}",
                    v.len()
                )));
            };
            if x < 0.0 || y < 0.0 || w <= 0.0 || h <= 0.0 || x + w > win_w as f64 || y + h > win_h as f64 {
                return Err(CascadeError::Invalid(format!(
                    "feature {index}: rect ({x}, {y}, {w}, {h}) outside {win_w}x{win_h} window"
                )));
            }
            Ok(WeightedRect {
                x: x as u32,
                y: y as u32,
                width: w as u32,
                height: h as u32,
                weight,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if rects.is_empty() {
        return Err(CascadeError::Invalid(format!("feature {index} has no rects")));
    }

    Ok(HaarFeature { rects })
}

fn parse_stage(index: usize, raw: &StageXml, num_features: usize) -> Result<Stage, CascadeError> {
    let weak = raw
        .weak_classifiers
        .items
        .iter()
        .map(|w| parse_weak(index, w, num_features))
        .collect::<Result<Vec<_>, _>>()?;

    if weak.is_empty() {
        return Err(CascadeError::Invalid(format!("stage {index} has no weak classifiers")));
    }

    Ok(Stage {
        threshold: raw.stage_threshold - STAGE_THRESHOLD_EPS,
        weak,
    })
}

fn parse_weak(stage: usize, raw: &WeakXml, num_features: usize) -> Result<WeakClassifier, CascadeError> {
    let values: Vec<f64> = parse_numbers(&raw.internal_nodes, "internalNodes")?;
    let leaves: Vec<f64> = parse_numbers(&raw.leaf_values, "leafValues")?;

    if values.is_empty() || values.len() % 4 != 0 {
        return Err(CascadeError::Invalid(format!(
            "stage {stage}: internalNodes must hold groups of 4 values, got {}",
            values.len()
        )));
    }

    let nodes: Vec<Node> = values
        .chunks_exact(4)
        .map(|c| Node {
            left: c[0] as i32,
            right: c[1] as i32,
            feature: c[2] as usize,
            threshold: c[3],
        })
        .collect();

    for node in &nodes {
        if node.feature >= num_features {
            return Err(CascadeError::Invalid(format!(
                "stage {stage}: feature index {} out of range ({num_features} features)",
                node.feature
            )));
        }
        for child in [node.left, node.right] {
            let ok = if child > 0 {
                (child as usize) < nodes.len()
            } else {
                ((-child) as usize) < leaves.len()
            };
            if !ok {
                return Err(CascadeError::Invalid(format!(
                    "stage {stage}: child reference {child} out of range"
                )));
            }
        }
    }

    Ok(WeakClassifier { nodes, leaves })
}

/// Summed-area tables for pixel values and squared pixel values.
struct IntegralImage {
    stride: usize,
    sum: Vec<u64>,
    sq_sum: Vec<u64>,
}

impl IntegralImage {
    fn new(gray: &GrayImage) -> Self {
        let (w, h) = (gray.width() as usize, gray.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0u64; stride * (h + 1)];
        let mut sq_sum = vec![0u64; stride * (h + 1)];
        let pixels = gray.as_raw();

        for y in 0..h {
            let mut row = 0u64;
            let mut row_sq = 0u64;
            for x in 0..w {
                let p = pixels[y * w + x] as u64;
                row += p;
                row_sq += p * p;
                let idx = (y + 1) * stride + (x + 1);
                sum[idx] = sum[idx - stride] + row;
                sq_sum[idx] = sq_sum[idx - stride] + row_sq;
            }
        }

        Self { stride, sum, sq_sum }
    }

    fn rect(table: &[u64], stride: usize, x: u32, y: u32, w: u32, h: u32) -> u64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        (table[y1 * stride + x1] + table[y0 * stride + x0])
            - (table[y0 * stride + x1] + table[y1 * stride + x0])
    }

    fn sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        Self::rect(&self.sum, self.stride, x, y, w, h)
    }

    fn sq_sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        Self::rect(&self.sq_sum, self.stride, x, y, w, h)
    }
}

fn similar(a: &FaceRegion, b: &FaceRegion, eps: f64) -> bool {
    let delta = eps * (a.width.min(b.width) as f64 + a.height.min(b.height) as f64) * 0.5;
    let close = |p: u32, q: u32| (p as f64 - q as f64).abs() <= delta;
    close(a.x, b.x)
        && close(a.y, b.y)
        && close(a.x + a.width, b.x + b.width)
        && close(a.y + a.height, b.y + b.height)
}

/// Union-find clustering. Labels are numbered in order of first appearance.
fn partition(rects: &[FaceRegion], eps: f64) -> (Vec<usize>, usize) {
    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    let n = rects.len();
    let mut parent: Vec<usize> = (0..n).collect();
    for i in 0..n {
        for j in (i + 1)..n {
            if similar(&rects[i], &rects[j], eps) {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    let mut root_label = vec![usize::MAX; n];
    let mut labels = Vec::with_capacity(n);
    let mut next = 0;
    for i in 0..n {
        let root = find(&mut parent, i);
        if root_label[root] == usize::MAX {
            root_label[root] = next;
            next += 1;
        }
        labels.push(root_label[root]);
    }

    (labels, next)
}

/// Merge raw detections: average each cluster, keep clusters with more than
/// `min_neighbors` members, and drop clusters nested inside a stronger one.
fn group_rectangles(rects: Vec<FaceRegion>, min_neighbors: u32, eps: f64) -> Vec<FaceRegion> {
    if min_neighbors == 0 || rects.is_empty() {
        return rects;
    }

    let (labels, classes) = partition(&rects, eps);
    let mut sums = vec![[0u64; 4]; classes];
    let mut counts = vec![0u32; classes];
    for (r, &label) in rects.iter().zip(&labels) {
        let s = &mut sums[label];
        s[0] += r.x as u64;
        s[1] += r.y as u64;
        s[2] += r.width as u64;
        s[3] += r.height as u64;
        counts[label] += 1;
    }

    let averaged: Vec<(FaceRegion, u32)> = sums
        .iter()
        .zip(&counts)
        .map(|(s, &n)| {
            let avg = |v: u64| (v as f64 / n as f64).round() as u32;
            (FaceRegion::new(avg(s[0]), avg(s[1]), avg(s[2]), avg(s[3])), n)
        })
        .collect();

    let mut out = Vec::new();
    for (i, &(r1, n1)) in averaged.iter().enumerate() {
        if n1 <= min_neighbors {
            continue;
        }
        let nested = averaged.iter().enumerate().any(|(j, &(r2, n2))| {
            if j == i || n2 <= min_neighbors {
                return false;
            }
            let dx = (r2.width as f64 * eps).round() as i64;
            let dy = (r2.height as f64 * eps).round() as i64;
            let (x1, y1, w1, h1) = (r1.x as i64, r1.y as i64, r1.width as i64, r1.height as i64);
            let (x2, y2, w2, h2) = (r2.x as i64, r2.y as i64, r2.width as i64, r2.height as i64);
            x1 >= x2 - dx
                && y1 >= y2 - dy
                && x1 + w1 <= x2 + w2 + dx
                && y1 + h1 <= y2 + h2 + dy
                && (n2 > n1.max(3) || n1 < 3)
        });
        if !nested {
            out.push(r1);
        }
    }

    out
}
