//! Evaluation engine.
//!
//! An [`Evaluator`] walks a fixed sequence of stages. Each operation is valid
//! in exactly one stage and advances to the next:
//!
//! ```text
//! Created --evaluate()--> Evaluated --accumulate()--> Accumulated --summarize()--> Summarized
//! ```
//!
//! Calling an operation out of order returns [`EvalError::Sequencing`] and
//! leaves the evaluator untouched.

mod accumulate;
mod evaluate;
mod summarize;

use std::io::Write;
use std::time::Instant;

use crate::dataset::{AnnotationStore, DetectionStore, ImageIdSet};
use crate::error::{EvalError, Result};
use crate::params::{AnnotationType, Params};

pub use accumulate::Accumulation;
pub use evaluate::EvalImg;
pub use summarize::{Metric, Stat, Summary};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Created,
    Evaluated,
    Accumulated,
    Summarized,
}

pub struct Evaluator<'a> {
    gt: &'a AnnotationStore,
    dt: &'a AnnotationStore,
    params: Params,
    stage: Stage,
    eval_imgs: Vec<Option<EvalImg>>,
    accumulation: Option<Accumulation>,
    summary: Option<Summary>,
}

impl<'a> Evaluator<'a> {
    pub fn new(gt: &'a AnnotationStore, dt: &'a DetectionStore, iou_type: AnnotationType) -> Self {
        Self {
            gt,
            dt: dt.store(),
            params: Params::new(iou_type),
            stage: Stage::Created,
            eval_imgs: Vec::new(),
            accumulation: None,
            summary: None,
        }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Parameters may be adjusted until `evaluate()` runs.
    pub fn params_mut(&mut self) -> &mut Params {
        &mut self.params
    }

    /// Restrict evaluation to `ids`.
    pub fn set_image_ids(&mut self, ids: ImageIdSet) {
        self.params.img_ids = ids.into_vec();
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Per-image records, category-major, then area range, then image.
    pub fn eval_imgs(&self) -> &[Option<EvalImg>] {
        &self.eval_imgs
    }

    pub fn accumulation(&self) -> Option<&Accumulation> {
        self.accumulation.as_ref()
    }

    pub fn summary(&self) -> Option<&Summary> {
        self.summary.as_ref()
    }

    /// Match detections to ground truth per image and category.
    pub fn evaluate(&mut self) -> Result<()> {
        self.expect_stage("evaluate", Stage::Created)?;
        log::info!(
            "running per image evaluation (annotation type *{}*)",
            self.params.iou_type
        );
        let start = Instant::now();
        let mut params = self.params.clone();
        let eval_imgs = evaluate::evaluate(self.gt, self.dt, &mut params)?;
        log::info!("done (t={:.2}s)", start.elapsed().as_secs_f64());

        self.params = params;
        self.eval_imgs = eval_imgs;
        self.stage = Stage::Evaluated;
        Ok(())
    }

    /// Integrate match records into precision/recall curves.
    pub fn accumulate(&mut self) -> Result<()> {
        self.expect_stage("accumulate", Stage::Evaluated)?;
        log::info!("accumulating evaluation results");
        let start = Instant::now();
        let accumulation = accumulate::accumulate(&self.params, &self.eval_imgs);
        log::info!("done (t={:.2}s)", start.elapsed().as_secs_f64());

        self.accumulation = Some(accumulation);
        self.stage = Stage::Accumulated;
        Ok(())
    }

    /// Reduce the curves to the standard stats and print them to stdout.
    pub fn summarize(&mut self) -> Result<&Summary> {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        self.summarize_to(&mut lock)
    }

    /// Like [`Evaluator::summarize`], writing the report to `out`.
    pub fn summarize_to<W: Write>(&mut self, out: &mut W) -> Result<&Summary> {
        self.expect_stage("summarize", Stage::Accumulated)?;
        let accumulation = self.accumulation.as_ref().ok_or(EvalError::Sequencing {
            operation: "summarize",
            expected: Stage::Accumulated,
            actual: self.stage,
        })?;
        let summary = summarize::summarize(&self.params, accumulation);
        write!(out, "{}", summary).map_err(EvalError::Report)?;

        self.stage = Stage::Summarized;
        let summary: &Summary = self.summary.insert(summary);
        Ok(summary)
    }

    fn expect_stage(&self, operation: &'static str, expected: Stage) -> Result<()> {
        if self.stage != expected {
            return Err(EvalError::Sequencing {
                operation,
                expected,
                actual: self.stage,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{load_detections_from, Annotation, Category, Dataset, Image};

    fn stores() -> (AnnotationStore, DetectionStore) {
        let gt = AnnotationStore::from_dataset(Dataset {
            images: vec![Image {
                id: 1,
                width: 100,
                height: 100,
                file_name: None,
            }],
            categories: vec![Category {
                id: 1,
                name: "thing".to_string(),
                supercategory: None,
                keypoints: None,
                skeleton: None,
            }],
            annotations: vec![Annotation {
                id: 1,
                image_id: 1,
                category_id: 1,
                bbox: Some(vec![10.0, 10.0, 40.0, 40.0]),
                ..Default::default()
            }],
            ..Default::default()
        });
        let dt = load_detections_from(
            &gt,
            vec![Annotation {
                image_id: 1,
                category_id: 1,
                bbox: Some(vec![10.0, 10.0, 40.0, 40.0]),
                score: Some(0.9),
                ..Default::default()
            }],
        )
        .unwrap();
        (gt, dt)
    }

    /// Ground truth in category 1, an exact box detection labelled category 2.
    fn mislabelled_stores() -> (AnnotationStore, DetectionStore) {
        let category = |id: u64| Category {
            id,
            name: format!("thing{id}"),
            supercategory: None,
            keypoints: None,
            skeleton: None,
        };
        let gt = AnnotationStore::from_dataset(Dataset {
            images: vec![Image {
                id: 1,
                width: 100,
                height: 100,
                file_name: None,
            }],
            categories: vec![category(1), category(2)],
            annotations: vec![Annotation {
                id: 1,
                image_id: 1,
                category_id: 1,
                bbox: Some(vec![10.0, 10.0, 40.0, 40.0]),
                ..Default::default()
            }],
            ..Default::default()
        });
        let dt = load_detections_from(
            &gt,
            vec![Annotation {
                image_id: 1,
                category_id: 2,
                bbox: Some(vec![10.0, 10.0, 40.0, 40.0]),
                score: Some(0.9),
                ..Default::default()
            }],
        )
        .unwrap();
        (gt, dt)
    }

    fn run_ap(gt: &AnnotationStore, dt: &DetectionStore, use_cats: bool) -> (f64, usize) {
        let mut ev = Evaluator::new(gt, dt, AnnotationType::Bbox);
        ev.params_mut().use_cats = use_cats;
        ev.evaluate().unwrap();
        let records = ev.eval_imgs().len();
        ev.accumulate().unwrap();
        let ap = ev.summarize_to(&mut Vec::new()).unwrap().ap();
        (ap, records)
    }

    #[test]
    fn pooled_categories_ignore_labels() {
        let (gt, dt) = mislabelled_stores();

        let (ap, records) = run_ap(&gt, &dt, false);
        assert!((ap - 1.0).abs() < 1e-9);
        // One pooled category, four area ranges, one image.
        assert_eq!(records, 4);

        let (ap, records) = run_ap(&gt, &dt, true);
        assert_eq!(ap, 0.0);
        assert_eq!(records, 8);
    }

    #[test]
    fn accumulate_before_evaluate_is_rejected() {
        let (gt, dt) = stores();
        let mut ev = Evaluator::new(&gt, &dt, AnnotationType::Bbox);
        let err = ev.accumulate().unwrap_err();
        assert!(matches!(
            err,
            EvalError::Sequencing {
                operation: "accumulate",
                expected: Stage::Evaluated,
                actual: Stage::Created,
            }
        ));
        assert_eq!(ev.stage(), Stage::Created);
    }

    #[test]
    fn stages_advance_in_order() {
        let (gt, dt) = stores();
        let mut ev = Evaluator::new(&gt, &dt, AnnotationType::Bbox);
        ev.evaluate().unwrap();
        assert_eq!(ev.stage(), Stage::Evaluated);
        assert!(ev.evaluate().is_err());
        assert!(ev.summarize_to(&mut Vec::new()).is_err());
        ev.accumulate().unwrap();
        assert_eq!(ev.stage(), Stage::Accumulated);

        let mut out = Vec::new();
        let ap = ev.summarize_to(&mut out).unwrap().ap();
        assert!((ap - 1.0).abs() < 1e-9);
        assert_eq!(ev.stage(), Stage::Summarized);
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 12);
        assert!(ev.summarize_to(&mut Vec::new()).is_err());
    }
}
