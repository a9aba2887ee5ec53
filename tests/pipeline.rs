use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tempfile::TempDir;

use coco_eval::{pipeline, AnnotationType, EvalConfig, EvalError};

const DATA_TYPE: &str = "val2017";

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::create_dir_all(dir.path().join("annotations")).expect("annotations dir");
        Self { dir }
    }

    fn write_ground_truth(&self, ann_type: AnnotationType, dataset: &Value) {
        let path = self
            .dir
            .path()
            .join("annotations")
            .join(format!("{}_{}.json", ann_type.prefix(), DATA_TYPE));
        fs::write(path, dataset.to_string()).expect("write ground truth");
    }

    fn write_results(&self, contents: &str) -> PathBuf {
        let path = self.dir.path().join("results.json");
        fs::write(&path, contents).expect("write results");
        path
    }

    fn config(&self, ann_type: AnnotationType, results_file: &Path) -> EvalConfig {
        EvalConfig {
            results_file: results_file.to_path_buf(),
            ann_type,
            data_dir: self.dir.path().to_path_buf(),
            data_type: DATA_TYPE.to_string(),
            ..EvalConfig::default()
        }
    }
}

fn person_keypoints() -> Vec<f64> {
    (0..17)
        .flat_map(|i| [100.0 + 5.0 * i as f64, 100.0 + 8.0 * i as f64, 2.0])
        .collect()
}

fn keypoint_dataset() -> Value {
    json!({
        "images": [{ "id": 397133, "width": 640, "height": 427, "file_name": "000000397133.jpg" }],
        "categories": [{ "id": 1, "name": "person", "supercategory": "person" }],
        "annotations": [{
            "id": 1,
            "image_id": 397133,
            "category_id": 1,
            "bbox": [100.0, 100.0, 100.0, 140.0],
            "area": 10000.0,
            "iscrowd": 0,
            "num_keypoints": 17,
            "keypoints": person_keypoints(),
        }],
    })
}

fn box_dataset() -> Value {
    json!({
        "images": [
            { "id": 1, "width": 320, "height": 320 },
            { "id": 2, "width": 320, "height": 320 },
        ],
        "categories": [{ "id": 3, "name": "car" }],
        "annotations": [
            { "id": 1, "image_id": 1, "category_id": 3, "bbox": [10.0, 10.0, 40.0, 40.0], "area": 1600.0, "iscrowd": 0 },
            { "id": 2, "image_id": 2, "category_id": 3, "bbox": [50.0, 50.0, 100.0, 100.0], "area": 10000.0, "iscrowd": 0 },
        ],
    })
}

fn run(cfg: &EvalConfig) -> (coco_eval::Summary, String) {
    let mut out = Vec::new();
    let summary = pipeline::run_to(cfg, &mut out).expect("evaluation run");
    (summary, String::from_utf8(out).expect("utf8 report"))
}

#[test]
fn perfect_keypoint_detection_scores_full_ap() {
    let ws = Workspace::new();
    ws.write_ground_truth(AnnotationType::Keypoints, &keypoint_dataset());
    let results = json!([{
        "image_id": 397133,
        "category_id": 1,
        "keypoints": person_keypoints(),
        "score": 0.9,
    }]);
    let results_file = ws.write_results(&results.to_string());

    let (summary, report) = run(&ws.config(AnnotationType::Keypoints, &results_file));

    let stats = summary.values();
    assert_eq!(stats.len(), 10);
    assert!((summary.ap() - 1.0).abs() < 1e-9);
    // AP50, AP75, AP large, then AR, AR50, AR75, AR large.
    for idx in [1, 2, 4, 5, 6, 7, 9] {
        assert!((stats[idx] - 1.0).abs() < 1e-9, "stat {idx} = {}", stats[idx]);
    }
    // No medium ground truth.
    assert_eq!(stats[3], -1.0);
    assert_eq!(stats[8], -1.0);

    let lines: Vec<&str> = report.lines().collect();
    assert_eq!(lines.len(), 10);
    assert_eq!(
        lines[0],
        " Average Precision  (AP) @[ IoU=0.50:0.95 | area=   all | maxDets= 20 ] = 1.000"
    );
}

#[test]
fn box_run_with_one_miss_halves_recall() {
    let ws = Workspace::new();
    ws.write_ground_truth(AnnotationType::Bbox, &box_dataset());
    let results = json!([
        { "image_id": 1, "category_id": 3, "bbox": [10.0, 10.0, 40.0, 40.0], "score": 0.9 },
        { "image_id": 2, "category_id": 3, "bbox": [200.0, 200.0, 50.0, 50.0], "score": 0.8 },
    ]);
    let results_file = ws.write_results(&results.to_string());

    let (summary, report) = run(&ws.config(AnnotationType::Bbox, &results_file));

    let stats = summary.values();
    assert_eq!(stats.len(), 12);
    // Precision is 1.0 up to recall 0.5 and 0 beyond: 51 of 101 thresholds.
    let expected_ap = 51.0 / 101.0;
    assert!((stats[0] - expected_ap).abs() < 1e-9, "AP = {}", stats[0]);
    assert!((stats[1] - expected_ap).abs() < 1e-9);
    assert_eq!(stats[3], -1.0);
    // The only medium ground truth is found at rank 1, before the false positive.
    assert!((stats[4] - 1.0).abs() < 1e-9, "AP medium = {}", stats[4]);
    assert!((stats[10] - 1.0).abs() < 1e-9);
    assert!(stats[5].abs() < 1e-9);
    assert!((stats[8] - 0.5).abs() < 1e-9);
    assert_eq!(report.lines().count(), 12);
    assert!(report
        .lines()
        .next()
        .is_some_and(|line| line.ends_with("= 0.505")));
}

#[test]
fn identical_polygon_masks_score_full_ap() {
    let ws = Workspace::new();
    let square = [10.0, 10.0, 50.0, 10.0, 50.0, 50.0, 10.0, 50.0];
    ws.write_ground_truth(
        AnnotationType::Segm,
        &json!({
            "images": [{ "id": 7, "width": 100, "height": 100 }],
            "categories": [{ "id": 1, "name": "blob" }],
            "annotations": [{
                "id": 1,
                "image_id": 7,
                "category_id": 1,
                "segmentation": [square],
                "bbox": [10.0, 10.0, 40.0, 40.0],
                "area": 1600.0,
                "iscrowd": 0,
            }],
        }),
    );
    let results = json!([{
        "image_id": 7,
        "category_id": 1,
        "segmentation": [square],
        "score": 0.7,
    }]);
    let results_file = ws.write_results(&results.to_string());

    let (summary, _) = run(&ws.config(AnnotationType::Segm, &results_file));

    assert!((summary.ap() - 1.0).abs() < 1e-9);
}

fn rle_dataset() -> Value {
    // 4x4 mask, column-major: rows 1-2 of columns 1 and 2.
    json!({
        "images": [{ "id": 1, "width": 4, "height": 4 }],
        "categories": [{ "id": 1, "name": "blob" }],
        "annotations": [{
            "id": 1,
            "image_id": 1,
            "category_id": 1,
            "segmentation": { "size": [4, 4], "counts": [5, 2, 2, 2, 5] },
            "bbox": [1.0, 1.0, 2.0, 2.0],
            "area": 4.0,
            "iscrowd": 0,
        }],
    })
}

#[test]
fn compressed_rle_matches_uncompressed_ground_truth() {
    let ws = Workspace::new();
    ws.write_ground_truth(AnnotationType::Segm, &rle_dataset());
    let results = json!([{
        "image_id": 1,
        "category_id": 1,
        "segmentation": { "size": [4, 4], "counts": "52203" },
        "score": 0.6,
    }]);
    let results_file = ws.write_results(&results.to_string());

    let (summary, _) = run(&ws.config(AnnotationType::Segm, &results_file));

    let stats = summary.values();
    assert!((stats[0] - 1.0).abs() < 1e-9);
    // Area 4 falls in the small bucket.
    assert!((stats[3] - 1.0).abs() < 1e-9);
    assert_eq!(stats[4], -1.0);
}

#[test]
fn rle_runs_not_covering_the_image_are_rejected() {
    let ws = Workspace::new();
    ws.write_ground_truth(AnnotationType::Segm, &rle_dataset());
    let results = json!([{
        "image_id": 1,
        "category_id": 1,
        "segmentation": { "size": [4, 4], "counts": [0, 5] },
        "score": 0.6,
    }]);
    let results_file = ws.write_results(&results.to_string());

    let err = pipeline::run_to(&ws.config(AnnotationType::Segm, &results_file), &mut Vec::new())
        .expect_err("short runs");
    assert!(matches!(err, EvalError::Geometry(_)), "{err}");
}

#[test]
fn empty_results_score_zero() {
    let ws = Workspace::new();
    ws.write_ground_truth(AnnotationType::Bbox, &box_dataset());
    let results_file = ws.write_results("[]");

    let (summary, _) = run(&ws.config(AnnotationType::Bbox, &results_file));

    assert_eq!(summary.ap(), 0.0);
}

#[test]
fn unknown_image_id_is_schema_mismatch() {
    let ws = Workspace::new();
    ws.write_ground_truth(AnnotationType::Bbox, &box_dataset());
    let results = json!([
        { "image_id": 999, "category_id": 3, "bbox": [0.0, 0.0, 5.0, 5.0], "score": 0.5 },
    ]);
    let results_file = ws.write_results(&results.to_string());

    let err = pipeline::run_to(&ws.config(AnnotationType::Bbox, &results_file), &mut Vec::new())
        .expect_err("unknown image");
    assert!(matches!(err, EvalError::SchemaMismatch(_)), "{err}");
}

#[test]
fn missing_ground_truth_is_file_not_found() {
    let ws = Workspace::new();
    let results_file = ws.write_results("[]");

    let err = pipeline::run_to(&ws.config(AnnotationType::Keypoints, &results_file), &mut Vec::new())
        .expect_err("missing ground truth");
    match err {
        EvalError::FileNotFound { path } => {
            assert!(path.ends_with("annotations/person_keypoints_val2017.json"))
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn malformed_results_are_parse_errors() {
    let ws = Workspace::new();
    ws.write_ground_truth(AnnotationType::Bbox, &box_dataset());
    let results_file = ws.write_results("[{\"image_id\": 1,");

    let err = pipeline::run_to(&ws.config(AnnotationType::Bbox, &results_file), &mut Vec::new())
        .expect_err("truncated results");
    assert!(matches!(err, EvalError::Parse { .. }), "{err}");
}
