//! Similarity measures between detections and ground truth.
//!
//! Every function returns a D×G matrix: one row per detection, one column per
//! ground-truth instance.

pub mod mask;

use ndarray::Array2;

use crate::dataset::Annotation;
use crate::error::{EvalError, Result};

pub use mask::{rle_iou, Rle};

/// Box IoU for `[x, y, w, h]` boxes.
///
/// Against crowd ground truth the union is the detection's own area, so a
/// detection fully inside a crowd region scores 1.
pub fn bbox_iou(dts: &[[f64; 4]], gts: &[[f64; 4]], iscrowd: &[bool]) -> Array2<f64> {
    let mut ious = Array2::zeros((dts.len(), gts.len()));
    for (g, gt) in gts.iter().enumerate() {
        let g_area = gt[2] * gt[3];
        let crowd = iscrowd.get(g).copied().unwrap_or(false);
        for (d, dt) in dts.iter().enumerate() {
            let d_area = dt[2] * dt[3];
            let w = (dt[0] + dt[2]).min(gt[0] + gt[2]) - dt[0].max(gt[0]);
            if w <= 0.0 {
                continue;
            }
            let h = (dt[1] + dt[3]).min(gt[1] + gt[3]) - dt[1].max(gt[1]);
            if h <= 0.0 {
                continue;
            }
            let inter = w * h;
            let union = if crowd { d_area } else { d_area + g_area - inter };
            ious[[d, g]] = inter / union;
        }
    }
    ious
}

/// Object keypoint similarity.
///
/// Only labelled ground-truth keypoints (visibility > 0) count. When a
/// ground truth has none, detections are scored by their distance outside a
/// box twice the size of the ground-truth box.
pub fn oks(dts: &[&Annotation], gts: &[&Annotation], sigmas: &[f64]) -> Result<Array2<f64>> {
    let k = sigmas.len();
    let vars: Vec<f64> = sigmas.iter().map(|s| (2.0 * s).powi(2)).collect();
    let mut ious = Array2::zeros((dts.len(), gts.len()));
    if dts.is_empty() || gts.is_empty() {
        return Ok(ious);
    }

    for (j, gt) in gts.iter().enumerate() {
        let g = keypoints_of(gt, k)?;
        let labelled = (0..k).filter(|&i| g[3 * i + 2] > 0.0).count();
        let [bx, by, bw, bh] = gt.bbox_xywh().unwrap_or([0.0; 4]);
        let (x0, x1) = (bx - bw, bx + bw * 2.0);
        let (y0, y1) = (by - bh, by + bh * 2.0);
        let scale = gt.area() + f64::EPSILON;

        for (i, dt) in dts.iter().enumerate() {
            let d = keypoints_of(dt, k)?;
            let mut total = 0.0;
            let mut n = 0usize;
            for p in 0..k {
                let (xd, yd) = (d[3 * p], d[3 * p + 1]);
                let (dx, dy) = if labelled > 0 {
                    if g[3 * p + 2] <= 0.0 {
                        continue;
                    }
                    (xd - g[3 * p], yd - g[3 * p + 1])
                } else {
                    (
                        (x0 - xd).max(0.0) + (xd - x1).max(0.0),
                        (y0 - yd).max(0.0) + (yd - y1).max(0.0),
                    )
                };
                let e = (dx * dx + dy * dy) / vars[p] / scale / 2.0;
                total += (-e).exp();
                n += 1;
            }
            ious[[i, j]] = if n > 0 { total / n as f64 } else { 0.0 };
        }
    }
    Ok(ious)
}

fn keypoints_of(ann: &Annotation, k: usize) -> Result<&[f64]> {
    match ann.keypoints.as_deref() {
        Some(kps) if kps.len() >= 3 * k => Ok(kps),
        Some(kps) => Err(EvalError::Geometry(format!(
            "annotation {} has {} keypoint values, expected {}",
            ann.id,
            kps.len(),
            3 * k
        ))),
        None => Err(EvalError::Geometry(format!(
            "annotation {} has no keypoints",
            ann.id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn iou_perfect_overlap() {
        let boxes = [[0.0, 0.0, 10.0, 10.0]];
        let ious = bbox_iou(&boxes, &boxes, &[false]);
        assert_relative_eq!(ious[[0, 0]], 1.0, epsilon = 1e-10);
    }

    #[test]
    fn iou_no_overlap() {
        let ious = bbox_iou(&[[0.0, 0.0, 10.0, 10.0]], &[[20.0, 20.0, 10.0, 10.0]], &[false]);
        assert_relative_eq!(ious[[0, 0]], 0.0, epsilon = 1e-10);
    }

    #[test]
    fn iou_partial_overlap() {
        let ious = bbox_iou(&[[0.0, 0.0, 10.0, 10.0]], &[[5.0, 5.0, 10.0, 10.0]], &[false]);
        // Intersection: 5x5 = 25, Union: 100 + 100 - 25 = 175
        assert_relative_eq!(ious[[0, 0]], 25.0 / 175.0, epsilon = 1e-10);
    }

    #[test]
    fn iou_against_crowd_uses_detection_area() {
        let ious = bbox_iou(&[[0.0, 0.0, 10.0, 10.0]], &[[0.0, 0.0, 100.0, 100.0]], &[true]);
        assert_relative_eq!(ious[[0, 0]], 1.0, epsilon = 1e-10);
    }

    #[test]
    fn iou_shape_is_dets_by_gts() {
        let ious = bbox_iou(
            &[[0.0, 0.0, 1.0, 1.0], [0.0, 0.0, 2.0, 2.0]],
            &[[0.0, 0.0, 1.0, 1.0]],
            &[false],
        );
        assert_eq!(ious.dim(), (2, 1));
        assert_relative_eq!(ious[[1, 0]], 0.25, epsilon = 1e-10);
    }

    fn person(keypoints: Vec<f64>, area: f64) -> Annotation {
        Annotation {
            keypoints: Some(keypoints),
            area: Some(area),
            bbox: Some(vec![0.0, 0.0, 10.0, 10.0]),
            ..Default::default()
        }
    }

    #[test]
    fn oks_is_one_for_identical_keypoints() {
        let gt = person(vec![1.0, 1.0, 2.0, 5.0, 5.0, 2.0], 100.0);
        let dt = person(vec![1.0, 1.0, 1.0, 5.0, 5.0, 1.0], 100.0);
        let ious = oks(&[&dt], &[&gt], &[0.05, 0.05]).unwrap();
        assert_relative_eq!(ious[[0, 0]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn oks_skips_unlabelled_ground_truth_points() {
        let gt = person(vec![1.0, 1.0, 2.0, 5.0, 5.0, 0.0], 100.0);
        let dt = person(vec![1.0, 1.0, 1.0, 50.0, 50.0, 1.0], 100.0);
        let ious = oks(&[&dt], &[&gt], &[0.05, 0.05]).unwrap();
        assert_relative_eq!(ious[[0, 0]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn oks_decays_with_distance() {
        let gt = person(vec![0.0, 0.0, 2.0], 100.0);
        let dt = person(vec![1.0, 0.0, 1.0], 100.0);
        let ious = oks(&[&dt], &[&gt], &[0.5]).unwrap();
        // e = 1 / (2 * 0.5)^2 / 100 / 2
        assert_relative_eq!(ious[[0, 0]], (-0.005f64).exp(), epsilon = 1e-9);
    }

    #[test]
    fn oks_rejects_short_keypoint_arrays() {
        let gt = person(vec![0.0, 0.0, 2.0], 100.0);
        let dt = person(vec![0.0, 0.0], 100.0);
        assert!(matches!(
            oks(&[&dt], &[&gt], &[0.5]),
            Err(EvalError::Geometry(_))
        ));
    }
}
