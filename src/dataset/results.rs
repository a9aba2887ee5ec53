use std::path::Path;
use std::time::Instant;

use crate::dataset::read_json;
use crate::dataset::store::AnnotationStore;
use crate::dataset::types::{Annotation, Segmentation};
use crate::error::{EvalError, Result};
use crate::geometry::mask::Rle;

/// Detections bound to a ground-truth store's image and category namespace.
#[derive(Clone, Debug, Default)]
pub struct DetectionStore {
    store: AnnotationStore,
}

impl DetectionStore {
    pub fn store(&self) -> &AnnotationStore {
        &self.store
    }

    pub fn len(&self) -> usize {
        self.store.annotations().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Geometry a results file carries, decided by its first record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ResultShape {
    Bbox,
    Segm,
    Keypoints,
}

impl ResultShape {
    fn of(record: &Annotation) -> Result<Self> {
        if record.bbox.as_ref().is_some_and(|b| !b.is_empty()) {
            Ok(ResultShape::Bbox)
        } else if record.segmentation.is_some() {
            Ok(ResultShape::Segm)
        } else if record.keypoints.is_some() {
            Ok(ResultShape::Keypoints)
        } else {
            Err(EvalError::SchemaMismatch(
                "detections carry no bbox, segmentation or keypoints".to_string(),
            ))
        }
    }
}

/// Read a results file and bind it to `gt`.
pub fn load_detections<P: AsRef<Path>>(gt: &AnnotationStore, path: P) -> Result<DetectionStore> {
    let path = path.as_ref();
    log::info!("loading and preparing results from {}", path.display());
    let start = Instant::now();
    let records: Vec<Annotation> = read_json(path)?;
    let detections = load_detections_from(gt, records)?;
    log::info!("done (t={:.2}s)", start.elapsed().as_secs_f64());
    Ok(detections)
}

/// Bind already-parsed detection records to `gt`.
///
/// Every record must reference an image and category known to `gt` and carry
/// a score. Ids are reassigned in record order starting at 1, and missing
/// area/bbox/segmentation is derived from the geometry the records carry.
pub fn load_detections_from(
    gt: &AnnotationStore,
    mut records: Vec<Annotation>,
) -> Result<DetectionStore> {
    for (idx, record) in records.iter().enumerate() {
        if !gt.contains_image(record.image_id) {
            return Err(EvalError::SchemaMismatch(format!(
                "results do not correspond to current annotation set: detection {} has unknown image_id {}",
                idx, record.image_id
            )));
        }
        if !gt.contains_category(record.category_id) {
            return Err(EvalError::SchemaMismatch(format!(
                "detection {} has unknown category_id {}",
                idx, record.category_id
            )));
        }
        if record.score.is_none() {
            return Err(EvalError::SchemaMismatch(format!(
                "detection {} has no score",
                idx
            )));
        }
    }

    match records.first() {
        None => log::warn!("results file contains no detections"),
        Some(first) => {
            let shape = ResultShape::of(first)?;
            log::debug!("deriving geometry for {} {:?} detections", records.len(), shape);
            for (idx, record) in records.iter_mut().enumerate() {
                record.id = idx as u64 + 1;
                record.iscrowd = false;
                match shape {
                    ResultShape::Bbox => derive_from_bbox(idx, record)?,
                    ResultShape::Segm => derive_from_segmentation(gt, idx, record)?,
                    ResultShape::Keypoints => derive_from_keypoints(idx, record)?,
                }
            }
        }
    }

    let store = AnnotationStore::from_parts(
        gt.images().cloned().collect(),
        gt.categories().cloned().collect(),
        records,
    );
    Ok(DetectionStore { store })
}

fn derive_from_bbox(idx: usize, record: &mut Annotation) -> Result<()> {
    let [x, y, w, h] = record.bbox_xywh().ok_or_else(|| {
        EvalError::SchemaMismatch(format!("detection {} has no [x, y, w, h] bbox", idx))
    })?;
    if record.segmentation.is_none() {
        let (x1, y1, x2, y2) = (x, y, x + w, y + h);
        record.segmentation = Some(Segmentation::Polygons(vec![vec![
            x1, y1, x1, y2, x2, y2, x2, y1,
        ]]));
    }
    record.area = Some(w * h);
    Ok(())
}

fn derive_from_segmentation(
    gt: &AnnotationStore,
    idx: usize,
    record: &mut Annotation,
) -> Result<()> {
    let segmentation = record.segmentation.as_ref().ok_or_else(|| {
        EvalError::SchemaMismatch(format!("detection {} has no segmentation", idx))
    })?;
    let (height, width) = gt
        .image(record.image_id)
        .map(|img| (img.height, img.width))
        .unwrap_or((0, 0));
    let rle = Rle::from_segmentation(segmentation, height, width)?;
    record.area = Some(rle.area() as f64);
    if record.bbox_xywh().is_none() {
        record.bbox = Some(rle.to_bbox().to_vec());
    }
    Ok(())
}

fn derive_from_keypoints(idx: usize, record: &mut Annotation) -> Result<()> {
    let keypoints = record
        .keypoints
        .as_deref()
        .filter(|kps| kps.len() >= 3)
        .ok_or_else(|| {
            EvalError::SchemaMismatch(format!("detection {} has no keypoints", idx))
        })?;
    let xs = keypoints.iter().step_by(3);
    let ys = keypoints.iter().skip(1).step_by(3);
    let (x0, x1) = min_max(xs);
    let (y0, y1) = min_max(ys);
    record.area = Some((x1 - x0) * (y1 - y0));
    record.bbox = Some(vec![x0, y0, x1 - x0, y1 - y0]);
    Ok(())
}

fn min_max<'a>(values: impl Iterator<Item = &'a f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
        (lo.min(v), hi.max(v))
    })
}
