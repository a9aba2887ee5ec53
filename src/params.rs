use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which geometry the evaluation scores and which similarity it uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationType {
    /// Box IoU.
    Bbox,
    /// Mask IoU over run-length encoded masks.
    Segm,
    /// Object keypoint similarity.
    Keypoints,
}

impl AnnotationType {
    /// Ground-truth file prefix for this annotation type.
    pub fn prefix(self) -> &'static str {
        match self {
            AnnotationType::Keypoints => "person_keypoints",
            AnnotationType::Bbox | AnnotationType::Segm => "instances",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AnnotationType::Bbox => "bbox",
            AnnotationType::Segm => "segm",
            AnnotationType::Keypoints => "keypoints",
        }
    }
}

impl fmt::Display for AnnotationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnnotationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bbox" => Ok(AnnotationType::Bbox),
            "segm" => Ok(AnnotationType::Segm),
            "keypoints" => Ok(AnnotationType::Keypoints),
            other => Err(format!(
                "unknown annotation type '{}' (expected bbox, segm or keypoints)",
                other
            )),
        }
    }
}

/// Upper bound used for the open-ended area ranges.
pub const AREA_MAX: f64 = 1e10;
const SMALL_AREA: f64 = 32.0 * 32.0;
const MEDIUM_AREA: f64 = 96.0 * 96.0;

/// Per-keypoint falloff constants for the 17 COCO person keypoints.
pub const COCO_KPT_OKS_SIGMAS: [f64; 17] = [
    0.026, 0.025, 0.025, 0.035, 0.035, 0.079, 0.079, 0.072, 0.072, 0.062, 0.062, 0.107, 0.107,
    0.087, 0.087, 0.089, 0.089,
];

/// An area bucket with its report label.
#[derive(Clone, Debug, PartialEq)]
pub struct AreaRange {
    pub label: String,
    pub min: f64,
    pub max: f64,
}

impl AreaRange {
    pub fn new(label: &str, min: f64, max: f64) -> Self {
        Self {
            label: label.to_string(),
            min,
            max,
        }
    }

    /// True when `area` falls outside this bucket.
    pub fn excludes(&self, area: f64) -> bool {
        area < self.min || area > self.max
    }
}

/// Evaluation parameters.
#[derive(Clone, Debug)]
pub struct Params {
    pub iou_type: AnnotationType,
    /// Images to evaluate. Empty means every ground-truth image.
    pub img_ids: Vec<u64>,
    /// Categories to evaluate. Empty means every ground-truth category.
    pub cat_ids: Vec<u64>,
    pub iou_thrs: Vec<f64>,
    pub rec_thrs: Vec<f64>,
    pub max_dets: Vec<usize>,
    pub area_rng: Vec<AreaRange>,
    /// When false, categories are pooled and matching ignores labels.
    pub use_cats: bool,
    pub kpt_oks_sigmas: Vec<f64>,
}

impl Params {
    pub fn new(iou_type: AnnotationType) -> Self {
        let (max_dets, area_rng) = match iou_type {
            AnnotationType::Keypoints => (
                vec![20],
                vec![
                    AreaRange::new("all", 0.0, AREA_MAX),
                    AreaRange::new("medium", SMALL_AREA, MEDIUM_AREA),
                    AreaRange::new("large", MEDIUM_AREA, AREA_MAX),
                ],
            ),
            AnnotationType::Bbox | AnnotationType::Segm => (
                vec![1, 10, 100],
                vec![
                    AreaRange::new("all", 0.0, AREA_MAX),
                    AreaRange::new("small", 0.0, SMALL_AREA),
                    AreaRange::new("medium", SMALL_AREA, MEDIUM_AREA),
                    AreaRange::new("large", MEDIUM_AREA, AREA_MAX),
                ],
            ),
        };

        Self {
            iou_type,
            img_ids: Vec::new(),
            cat_ids: Vec::new(),
            iou_thrs: linspace(0.5, 0.95, 10),
            rec_thrs: linspace(0.0, 1.0, 101),
            max_dets,
            area_rng,
            use_cats: true,
            kpt_oks_sigmas: COCO_KPT_OKS_SIGMAS.to_vec(),
        }
    }

    /// Largest detection cap; detections beyond it are never scored.
    pub fn max_det_cap(&self) -> usize {
        self.max_dets.iter().copied().max().unwrap_or(0)
    }

    /// Index of an IoU threshold, tolerant of float noise.
    pub fn iou_index(&self, thr: f64) -> Option<usize> {
        self.iou_thrs.iter().position(|t| (t - thr).abs() < 1e-9)
    }

    pub fn area_index(&self, label: &str) -> Option<usize> {
        self.area_rng.iter().position(|a| a.label == label)
    }

    pub fn max_det_index(&self, max_det: usize) -> Option<usize> {
        self.max_dets.iter().position(|m| *m == max_det)
    }
}

/// Evenly spaced values over `[start, stop]`, endpoints included.
fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    if num < 2 {
        return vec![start; num];
    }
    let step = (stop - start) / (num - 1) as f64;
    (0..num)
        .map(|i| {
            if i == num - 1 {
                stop
            } else {
                start + step * i as f64
            }
        })
        .collect()
}
