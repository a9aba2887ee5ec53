//! One evaluation run: load ground truth, bind detections, evaluate,
//! accumulate, summarize.

use std::io::Write;

use crate::config::EvalConfig;
use crate::dataset::{load_detections, AnnotationStore, DetectionStore};
use crate::error::Result;
use crate::eval::{Evaluator, Summary};

/// Load the ground-truth file `cfg` points at.
pub fn load_ground_truth(cfg: &EvalConfig) -> Result<AnnotationStore> {
    AnnotationStore::load(cfg.annotation_path())
}

/// Load the configured results file against `gt`.
pub fn load_results(cfg: &EvalConfig, gt: &AnnotationStore) -> Result<DetectionStore> {
    load_detections(gt, &cfg.results_file)
}

/// Build an evaluator for `cfg` over loaded inputs.
///
/// Unless the config restricts images, the scope is every ground-truth
/// image in ascending id order.
pub fn evaluator<'a>(
    cfg: &EvalConfig,
    gt: &'a AnnotationStore,
    dt: &'a DetectionStore,
) -> Evaluator<'a> {
    let mut evaluator = Evaluator::new(gt, dt, cfg.ann_type);
    *evaluator.params_mut() = cfg.eval_params();
    if cfg.params.img_ids.is_none() {
        evaluator.set_image_ids(gt.image_id_set());
    }
    evaluator
}

/// Run the whole pipeline, writing the report to `out`.
pub fn run_to<W: Write>(cfg: &EvalConfig, out: &mut W) -> Result<Summary> {
    log::info!("running evaluation for *{}* results", cfg.ann_type);
    let gt = load_ground_truth(cfg)?;
    let dt = load_results(cfg, &gt)?;

    let mut evaluator = evaluator(cfg, &gt, &dt);
    evaluator.evaluate()?;
    evaluator.accumulate()?;
    let summary = evaluator.summarize_to(out)?.clone();
    Ok(summary)
}
