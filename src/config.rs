use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::params::{AnnotationType, Params};

const DEFAULT_RESULTS_FILE: &str = "vitpose-b256x192_fp16_results.json";
const DEFAULT_ANN_TYPE: AnnotationType = AnnotationType::Keypoints;
const DEFAULT_DATA_DIR: &str = ".";
const DEFAULT_DATA_TYPE: &str = "val2017";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct EvalConfigFile {
    results_file: Option<PathBuf>,
    ann_type: Option<String>,
    data_dir: Option<PathBuf>,
    data_type: Option<String>,
    params: Option<ParamsConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ParamsConfigFile {
    use_cats: Option<bool>,
    max_dets: Option<Vec<usize>>,
    img_ids: Option<Vec<u64>>,
}

/// Inputs for one evaluation run.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalConfig {
    pub results_file: PathBuf,
    pub ann_type: AnnotationType,
    pub data_dir: PathBuf,
    pub data_type: String,
    pub params: ParamOverrides,
}

/// Optional adjustments to the default evaluation parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamOverrides {
    pub use_cats: Option<bool>,
    pub max_dets: Option<Vec<usize>>,
    /// Restrict evaluation to these images instead of every ground-truth image.
    pub img_ids: Option<Vec<u64>>,
}

impl ParamOverrides {
    pub fn apply(&self, params: &mut Params) {
        if let Some(use_cats) = self.use_cats {
            params.use_cats = use_cats;
        }
        if let Some(max_dets) = &self.max_dets {
            params.max_dets = max_dets.clone();
        }
        if let Some(img_ids) = &self.img_ids {
            params.img_ids = img_ids.clone();
        }
    }
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            results_file: PathBuf::from(DEFAULT_RESULTS_FILE),
            ann_type: DEFAULT_ANN_TYPE,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            data_type: DEFAULT_DATA_TYPE.to_string(),
            params: ParamOverrides::default(),
        }
    }
}

impl EvalConfig {
    /// Defaults, then the file named by `COCO_EVAL_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("COCO_EVAL_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty());
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like [`EvalConfig::load`] with an explicit config file.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// `{data_dir}/annotations/{prefix}_{data_type}.json`
    pub fn annotation_path(&self) -> PathBuf {
        self.data_dir.join("annotations").join(format!(
            "{}_{}.json",
            self.ann_type.prefix(),
            self.data_type
        ))
    }

    /// Default evaluation parameters for the annotation type, with overrides applied.
    pub fn eval_params(&self) -> Params {
        let mut params = Params::new(self.ann_type);
        self.params.apply(&mut params);
        params
    }

    fn from_file(file: EvalConfigFile) -> Result<Self> {
        let ann_type = match file.ann_type.as_deref() {
            Some(raw) => parse_ann_type(raw)?,
            None => DEFAULT_ANN_TYPE,
        };
        let params = file
            .params
            .map(|p| ParamOverrides {
                use_cats: p.use_cats,
                max_dets: p.max_dets,
                img_ids: p.img_ids,
            })
            .unwrap_or_default();
        Ok(Self {
            results_file: file
                .results_file
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RESULTS_FILE)),
            ann_type,
            data_dir: file
                .data_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            data_type: file
                .data_type
                .unwrap_or_else(|| DEFAULT_DATA_TYPE.to_string()),
            params,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("COCO_EVAL_RESULTS") {
            if !path.trim().is_empty() {
                self.results_file = PathBuf::from(path);
            }
        }
        if let Ok(raw) = std::env::var("COCO_EVAL_ANN_TYPE") {
            if !raw.trim().is_empty() {
                self.ann_type = parse_ann_type(&raw)?;
            }
        }
        if let Ok(dir) = std::env::var("COCO_EVAL_DATA_DIR") {
            if !dir.trim().is_empty() {
                self.data_dir = PathBuf::from(dir);
            }
        }
        if let Ok(split) = std::env::var("COCO_EVAL_DATA_TYPE") {
            if !split.trim().is_empty() {
                self.data_type = split.trim().to_string();
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.data_type.trim().is_empty() {
            return Err(anyhow!("data_type must not be empty"));
        }
        if let Some(max_dets) = &self.params.max_dets {
            if max_dets.is_empty() || max_dets.contains(&0) {
                return Err(anyhow!("params.max_dets must be a non-empty list of positive caps"));
            }
        }
        Ok(())
    }
}

fn parse_ann_type(raw: &str) -> Result<AnnotationType> {
    raw.parse::<AnnotationType>().map_err(|e| anyhow!(e))
}

fn read_config_file(path: &Path) -> Result<EvalConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
