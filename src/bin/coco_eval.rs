//! coco_eval - score a results file against COCO ground truth
//!
//! 1. Resolves the run configuration (defaults, config file, env, flags)
//! 2. Loads the ground-truth annotation file for the split
//! 3. Binds the results file to the ground-truth ids
//! 4. Evaluates, accumulates and prints the standard summary

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use coco_eval::{pipeline, AnnotationType, EvalConfig};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about = "Evaluate COCO detection or keypoint results")]
struct Args {
    /// Config file (TOML or JSON).
    #[arg(long, env = "COCO_EVAL_CONFIG")]
    config: Option<PathBuf>,
    /// Results JSON file to score.
    #[arg(long)]
    results: Option<PathBuf>,
    /// Annotation type: bbox, segm or keypoints.
    #[arg(long)]
    ann_type: Option<AnnotationType>,
    /// Dataset root holding `annotations/`.
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Dataset split, e.g. val2017.
    #[arg(long)]
    data_type: Option<String>,
    #[arg(long, value_enum, default_value_t = ui::UiMode::Auto)]
    ui: ui::UiMode,
}

impl Args {
    fn apply(self, cfg: &mut EvalConfig) {
        if let Some(results) = self.results {
            cfg.results_file = results;
        }
        if let Some(ann_type) = self.ann_type {
            cfg.ann_type = ann_type;
        }
        if let Some(data_dir) = self.data_dir {
            cfg.data_dir = data_dir;
        }
        if let Some(data_type) = self.data_type {
            cfg.data_type = data_type;
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = ui::Ui::detect(args.ui);
    let mut cfg = EvalConfig::load_from(args.config.as_deref())?;
    args.apply(&mut cfg);

    println!("Running evaluation for *{}* results.", cfg.ann_type);
    log::info!("results file: {}", cfg.results_file.display());

    let annotation_path = cfg.annotation_path();
    let gt = ui
        .run_stage("Load ground truth", || pipeline::load_ground_truth(&cfg))
        .with_context(|| format!("loading ground truth {}", annotation_path.display()))?;
    let dt = ui
        .run_stage("Load detections", || pipeline::load_results(&cfg, &gt))
        .with_context(|| format!("loading results {}", cfg.results_file.display()))?;

    let mut evaluator = pipeline::evaluator(&cfg, &gt, &dt);
    ui.run_stage("Evaluate", || evaluator.evaluate())?;
    ui.run_stage("Accumulate", || evaluator.accumulate())?;
    let ap = evaluator.summarize()?.ap();
    log::info!("AP @[ IoU=0.50:0.95 | area=all ] = {:.3}", ap);
    Ok(())
}
