use serde::{Deserialize, Deserializer, Serialize};

/// Top-level annotation file.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Dataset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<serde_json::Value>,
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub licenses: Vec<serde_json::Value>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Image {
    pub id: u64,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// A ground-truth instance or, in a results file, a detection.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Annotation {
    #[serde(default)]
    pub id: u64,
    pub image_id: u64,
    pub category_id: u64,
    /// `[x, y, w, h]`. Results files may carry an empty list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segmentation: Option<Segmentation>,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub iscrowd: bool,
    /// Flat `[x1, y1, v1, x2, y2, v2, ...]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keypoints: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_keypoints: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl Annotation {
    /// The box as `[x, y, w, h]`, if present and well formed.
    pub fn bbox_xywh(&self) -> Option<[f64; 4]> {
        match self.bbox.as_deref() {
            Some([x, y, w, h]) => Some([*x, *y, *w, *h]),
            _ => None,
        }
    }

    pub fn area(&self) -> f64 {
        self.area.unwrap_or(0.0)
    }

    pub fn score(&self) -> f64 {
        self.score.unwrap_or(0.0)
    }
}

fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }
    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Int(i) => Ok(i != 0),
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Segmentation {
    /// One or more polygons, each a flat `[x, y, x, y, ...]` list.
    Polygons(Vec<Vec<f64>>),
    Rle(RleObject),
}

/// Run-length mask as stored in JSON; `size` is `[height, width]`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct RleObject {
    pub size: [u32; 2],
    pub counts: RleCounts,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RleCounts {
    Compressed(String),
    Uncompressed(Vec<u32>),
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Category {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supercategory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keypoints: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skeleton: Option<Vec<[u32; 2]>>,
}
