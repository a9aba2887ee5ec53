mod results;
mod store;
mod types;

use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::{EvalError, Result};

pub use results::{load_detections, load_detections_from, DetectionStore};
pub use store::{AnnotationStore, ImageIdSet};
pub use types::{Annotation, Category, Dataset, Image, RleCounts, RleObject, Segmentation};

/// Read and parse a JSON input file, mapping failures onto the error taxonomy.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            EvalError::FileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            EvalError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    serde_json::from_str(&raw).map_err(|source| EvalError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
