use std::collections::HashMap;

use ndarray::Array2;

use crate::dataset::{Annotation, AnnotationStore};
use crate::error::{EvalError, Result};
use crate::geometry::{bbox_iou, oks, rle_iou, Rle};
use crate::params::{AnnotationType, Params};

/// `(image id, category id)`; the category is `None` when categories are pooled.
pub(crate) type CellKey = (u64, Option<u64>);

/// Matching outcome for one image, one category and one area range.
#[derive(Clone, Debug)]
pub struct EvalImg {
    pub image_id: u64,
    pub category_id: Option<u64>,
    pub area_index: usize,
    pub max_det: usize,
    /// Detection ids, highest score first.
    pub dt_ids: Vec<u64>,
    /// Ground-truth ids, non-ignored first.
    pub gt_ids: Vec<u64>,
    /// T×D: ground-truth id each detection matched per threshold.
    pub dt_matches: Array2<Option<u64>>,
    /// T×G: detection id each ground truth matched per threshold.
    pub gt_matches: Array2<Option<u64>>,
    pub dt_scores: Vec<f64>,
    pub gt_ignore: Vec<bool>,
    /// T×D
    pub dt_ignore: Array2<bool>,
}

struct GroundTruth<'a> {
    ann: &'a Annotation,
    ignore: bool,
}

/// Everything matching needs for one (image, category) pair.
struct Cell<'a> {
    gts: Vec<GroundTruth<'a>>,
    /// Detections sorted by descending score, capped at the largest max-dets.
    dts: Vec<&'a Annotation>,
    /// D×G against `gts` in their original order.
    ious: Array2<f64>,
}

/// Normalize `params` against the ground truth and run per-image matching.
///
/// Results are laid out category-major, then area range, then image, matching
/// the index arithmetic in accumulation.
pub(crate) fn evaluate(
    gt: &AnnotationStore,
    dt: &AnnotationStore,
    params: &mut Params,
) -> Result<Vec<Option<EvalImg>>> {
    normalize(gt, params);
    let params: &Params = params;
    let cats = cell_categories(params);

    let gt_anns = gt.annotations_for(&params.img_ids, category_filter(params));
    let dt_anns = dt.annotations_for(&params.img_ids, category_filter(params));
    log::debug!(
        "evaluating {} images, {} categories, {} ground truths, {} detections",
        params.img_ids.len(),
        cats.len(),
        gt_anns.len(),
        dt_anns.len()
    );

    let mut gts: HashMap<CellKey, Vec<GroundTruth<'_>>> = HashMap::new();
    for ann in gt_anns {
        let ignore = ann.iscrowd
            || (params.iou_type == AnnotationType::Keypoints && labelled_keypoints(ann) == 0);
        gts.entry(cell_key(params, ann))
            .or_default()
            .push(GroundTruth { ann, ignore });
    }
    let mut dts: HashMap<CellKey, Vec<&Annotation>> = HashMap::new();
    for ann in dt_anns {
        dts.entry(cell_key(params, ann)).or_default().push(ann);
    }

    let cap = params.max_det_cap();
    let mut cells: HashMap<CellKey, Cell<'_>> = HashMap::new();
    for &img_id in &params.img_ids {
        for &cat in &cats {
            let key = (img_id, cat);
            let cell_gts = gts.remove(&key).unwrap_or_default();
            let mut cell_dts = dts.remove(&key).unwrap_or_default();
            if cell_gts.is_empty() && cell_dts.is_empty() {
                continue;
            }
            sort_by_score(&mut cell_dts);
            cell_dts.truncate(cap);
            let ious = similarity(gt, dt, params, &cell_dts, &cell_gts)?;
            cells.insert(
                key,
                Cell {
                    gts: cell_gts,
                    dts: cell_dts,
                    ious,
                },
            );
        }
    }

    let mut eval_imgs =
        Vec::with_capacity(cats.len() * params.area_rng.len() * params.img_ids.len());
    for &cat in &cats {
        for area_index in 0..params.area_rng.len() {
            for &img_id in &params.img_ids {
                let eval = cells
                    .get(&(img_id, cat))
                    .map(|cell| evaluate_img(params, cell, img_id, cat, area_index, cap));
                eval_imgs.push(eval);
            }
        }
    }
    Ok(eval_imgs)
}

/// De-duplicate and sort ids, defaulting to the full ground-truth namespace.
fn normalize(gt: &AnnotationStore, params: &mut Params) {
    if params.img_ids.is_empty() {
        params.img_ids = gt.img_ids();
    }
    params.img_ids.sort_unstable();
    params.img_ids.dedup();
    if params.cat_ids.is_empty() {
        params.cat_ids = gt.cat_ids();
    }
    params.cat_ids.sort_unstable();
    params.cat_ids.dedup();
    params.max_dets.sort_unstable();
}

fn cell_categories(params: &Params) -> Vec<Option<u64>> {
    if params.use_cats {
        params.cat_ids.iter().copied().map(Some).collect()
    } else {
        vec![None]
    }
}

fn category_filter(params: &Params) -> &[u64] {
    if params.use_cats {
        params.cat_ids.as_slice()
    } else {
        &[]
    }
}

fn cell_key(params: &Params, ann: &Annotation) -> CellKey {
    let cat = params.use_cats.then_some(ann.category_id);
    (ann.image_id, cat)
}

fn labelled_keypoints(ann: &Annotation) -> u32 {
    ann.num_keypoints.unwrap_or_else(|| {
        ann.keypoints
            .as_deref()
            .map(|kps| kps.iter().skip(2).step_by(3).filter(|&&v| v > 0.0).count() as u32)
            .unwrap_or(0)
    })
}

/// Stable sort, highest score first.
fn sort_by_score(dts: &mut [&Annotation]) {
    dts.sort_by(|a, b| b.score().total_cmp(&a.score()));
}

fn similarity(
    gt: &AnnotationStore,
    dt: &AnnotationStore,
    params: &Params,
    dts: &[&Annotation],
    gts: &[GroundTruth<'_>],
) -> Result<Array2<f64>> {
    let iscrowd: Vec<bool> = gts.iter().map(|g| g.ann.iscrowd).collect();
    match params.iou_type {
        AnnotationType::Bbox => {
            let d = dts.iter().map(|a| boxed(a)).collect::<Result<Vec<_>>>()?;
            let g = gts.iter().map(|g| boxed(g.ann)).collect::<Result<Vec<_>>>()?;
            Ok(bbox_iou(&d, &g, &iscrowd))
        }
        AnnotationType::Segm => {
            let d = dts
                .iter()
                .map(|a| masked(dt, a))
                .collect::<Result<Vec<_>>>()?;
            let g = gts
                .iter()
                .map(|g| masked(gt, g.ann))
                .collect::<Result<Vec<_>>>()?;
            Ok(rle_iou(&d, &g, &iscrowd))
        }
        AnnotationType::Keypoints => {
            let g: Vec<&Annotation> = gts.iter().map(|g| g.ann).collect();
            oks(dts, &g, &params.kpt_oks_sigmas)
        }
    }
}

fn boxed(ann: &Annotation) -> Result<[f64; 4]> {
    ann.bbox_xywh()
        .ok_or_else(|| EvalError::Geometry(format!("annotation {} has no bbox", ann.id)))
}

fn masked(store: &AnnotationStore, ann: &Annotation) -> Result<Rle> {
    let segmentation = ann.segmentation.as_ref().ok_or_else(|| {
        EvalError::Geometry(format!("annotation {} has no segmentation", ann.id))
    })?;
    let (h, w) = store
        .image(ann.image_id)
        .map(|img| (img.height, img.width))
        .unwrap_or((0, 0));
    Rle::from_segmentation(segmentation, h, w)
}

/// Greedy matching of one cell under one area range, for every threshold.
fn evaluate_img(
    params: &Params,
    cell: &Cell<'_>,
    image_id: u64,
    category_id: Option<u64>,
    area_index: usize,
    max_det: usize,
) -> EvalImg {
    let area = &params.area_rng[area_index];

    let ignore_raw: Vec<bool> = cell
        .gts
        .iter()
        .map(|g| g.ignore || area.excludes(g.ann.area()))
        .collect();
    let mut gt_order: Vec<usize> = (0..cell.gts.len()).collect();
    gt_order.sort_by_key(|&g| ignore_raw[g]);
    let gt_ignore: Vec<bool> = gt_order.iter().map(|&g| ignore_raw[g]).collect();
    let gt_crowd: Vec<bool> = gt_order.iter().map(|&g| cell.gts[g].ann.iscrowd).collect();
    let gt_ids: Vec<u64> = gt_order.iter().map(|&g| cell.gts[g].ann.id).collect();

    let dts = &cell.dts[..cell.dts.len().min(max_det)];
    let dt_ids: Vec<u64> = dts.iter().map(|d| d.id).collect();

    let t_count = params.iou_thrs.len();
    let mut gt_matches = Array2::from_elem((t_count, gt_ids.len()), None);
    let mut dt_matches = Array2::from_elem((t_count, dts.len()), None);
    let mut dt_ignore = Array2::from_elem((t_count, dts.len()), false);

    for (t, &thr) in params.iou_thrs.iter().enumerate() {
        for (d, dt) in dts.iter().enumerate() {
            let mut best = thr.min(1.0 - 1e-10);
            let mut matched: Option<usize> = None;
            for g in 0..gt_ids.len() {
                if gt_matches[[t, g]].is_some() && !gt_crowd[g] {
                    continue;
                }
                // Past the real ground truth; only ignored ones remain.
                if let Some(m) = matched {
                    if !gt_ignore[m] && gt_ignore[g] {
                        break;
                    }
                }
                let iou = cell.ious[[d, gt_order[g]]];
                if iou < best {
                    continue;
                }
                best = iou;
                matched = Some(g);
            }
            if let Some(m) = matched {
                dt_ignore[[t, d]] = gt_ignore[m];
                dt_matches[[t, d]] = Some(gt_ids[m]);
                gt_matches[[t, m]] = Some(dt.id);
            }
        }
    }

    // Unmatched detections outside the area range do not count against precision.
    for (d, dt) in dts.iter().enumerate() {
        if area.excludes(dt.area()) {
            for t in 0..t_count {
                if dt_matches[[t, d]].is_none() {
                    dt_ignore[[t, d]] = true;
                }
            }
        }
    }

    EvalImg {
        image_id,
        category_id,
        area_index,
        max_det,
        dt_ids,
        gt_ids,
        dt_matches,
        gt_matches,
        dt_scores: dts.iter().map(|d| d.score()).collect(),
        gt_ignore,
        dt_ignore,
    }
}
