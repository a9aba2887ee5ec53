//! COCO evaluation pipeline
//!
//! This crate scores a detection or keypoint results file against a COCO
//! ground-truth annotation file and reports the standard summary metrics.
//!
//! # Architecture
//!
//! A run is a single linear pipeline:
//!
//! 1. **Config**: results path, annotation type, dataset root and split.
//! 2. **Ground-Truth Loader**: annotation JSON into an indexed [`AnnotationStore`].
//! 3. **Detections Loader**: results JSON bound to the store's id namespace.
//! 4. **Evaluator**: `evaluate()` → `accumulate()` → `summarize()`.
//!
//! # Module Structure
//!
//! - `config`: layered run configuration (defaults, config file, env)
//! - `params`: annotation types and evaluation parameters
//! - `dataset`: annotation/results data model and loaders
//! - `geometry`: box IoU, keypoint OKS, run-length masks
//! - `eval`: matching, accumulation, summary
//! - `pipeline`: wires the above for one run

pub mod config;
pub mod dataset;
pub mod error;
pub mod eval;
pub mod geometry;
pub mod params;
pub mod pipeline;

pub use config::{EvalConfig, ParamOverrides};
pub use dataset::{
    load_detections, load_detections_from, Annotation, AnnotationStore, Dataset,
    DetectionStore, ImageIdSet,
};
pub use error::{EvalError, Result};
pub use eval::{Evaluator, Stage, Summary};
pub use params::{AnnotationType, Params};
