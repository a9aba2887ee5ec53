use std::fmt;

use serde::Serialize;

use crate::eval::accumulate::Accumulation;
use crate::params::{AnnotationType, Params};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Precision,
    Recall,
}

/// One reported scalar.
#[derive(Clone, Debug, Serialize)]
pub struct Stat {
    pub metric: Metric,
    /// `None` averages over every threshold.
    pub iou_thr: Option<f64>,
    pub area: String,
    pub max_dets: usize,
    /// Mean over defined entries, or -1 when none are defined.
    pub value: f64,
    #[serde(skip)]
    iou_label: String,
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (title, short) = match self.metric {
            Metric::Precision => ("Average Precision", "(AP)"),
            Metric::Recall => ("Average Recall", "(AR)"),
        };
        write!(
            f,
            " {:<18} {} @[ IoU={:<9} | area={:>6} | maxDets={:>3} ] = {:.3}",
            title, short, self.iou_label, self.area, self.max_dets, self.value
        )
    }
}

/// The standard COCO stat list for one evaluation.
#[derive(Clone, Debug, Serialize)]
pub struct Summary {
    pub iou_type: AnnotationType,
    pub stats: Vec<Stat>,
}

impl Summary {
    pub fn values(&self) -> Vec<f64> {
        self.stats.iter().map(|s| s.value).collect()
    }

    /// Headline AP averaged over all thresholds and areas.
    pub fn ap(&self) -> f64 {
        self.stats.first().map(|s| s.value).unwrap_or(-1.0)
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for stat in &self.stats {
            writeln!(f, "{}", stat)?;
        }
        Ok(())
    }
}

type StatSpec = (Metric, Option<f64>, &'static str, usize);

pub(crate) fn summarize(params: &Params, acc: &Accumulation) -> Summary {
    let specs = match params.iou_type {
        AnnotationType::Keypoints => keypoint_specs(),
        AnnotationType::Bbox | AnnotationType::Segm => detection_specs(params),
    };
    let stats = specs
        .into_iter()
        .map(|(metric, iou_thr, area, max_dets)| {
            stat(params, acc, metric, iou_thr, area, max_dets)
        })
        .collect();
    Summary {
        iou_type: params.iou_type,
        stats,
    }
}

fn detection_specs(params: &Params) -> Vec<StatSpec> {
    let cap = |i: usize| {
        params
            .max_dets
            .get(i)
            .or(params.max_dets.last())
            .copied()
            .unwrap_or(0)
    };
    let top = cap(2);
    vec![
        (Metric::Precision, None, "all", top),
        (Metric::Precision, Some(0.5), "all", top),
        (Metric::Precision, Some(0.75), "all", top),
        (Metric::Precision, None, "small", top),
        (Metric::Precision, None, "medium", top),
        (Metric::Precision, None, "large", top),
        (Metric::Recall, None, "all", cap(0)),
        (Metric::Recall, None, "all", cap(1)),
        (Metric::Recall, None, "all", top),
        (Metric::Recall, None, "small", top),
        (Metric::Recall, None, "medium", top),
        (Metric::Recall, None, "large", top),
    ]
}

fn keypoint_specs() -> Vec<StatSpec> {
    vec![
        (Metric::Precision, None, "all", 20),
        (Metric::Precision, Some(0.5), "all", 20),
        (Metric::Precision, Some(0.75), "all", 20),
        (Metric::Precision, None, "medium", 20),
        (Metric::Precision, None, "large", 20),
        (Metric::Recall, None, "all", 20),
        (Metric::Recall, Some(0.5), "all", 20),
        (Metric::Recall, Some(0.75), "all", 20),
        (Metric::Recall, None, "medium", 20),
        (Metric::Recall, None, "large", 20),
    ]
}

fn stat(
    params: &Params,
    acc: &Accumulation,
    metric: Metric,
    iou_thr: Option<f64>,
    area: &str,
    max_dets: usize,
) -> Stat {
    let iou_label = match iou_thr {
        Some(thr) => format!("{:.2}", thr),
        None => format!(
            "{:.2}:{:.2}",
            params.iou_thrs.first().copied().unwrap_or(0.0),
            params.iou_thrs.last().copied().unwrap_or(0.0)
        ),
    };

    let thresholds: Vec<usize> = match iou_thr {
        Some(thr) => params.iou_index(thr).into_iter().collect(),
        None => (0..params.iou_thrs.len()).collect(),
    };
    let a = params.area_index(area);
    let m = params.max_det_index(max_dets);

    let mut sum = 0.0;
    let mut n = 0usize;
    if let (Some(a), Some(m)) = (a, m) {
        let mut take = |v: f64| {
            if v > -1.0 {
                sum += v;
                n += 1;
            }
        };
        match metric {
            Metric::Precision => {
                let (_, r_count, k_count, _, _) = acc.precision.dim();
                for &t in &thresholds {
                    for r in 0..r_count {
                        for k in 0..k_count {
                            take(acc.precision[[t, r, k, a, m]]);
                        }
                    }
                }
            }
            Metric::Recall => {
                let (_, k_count, _, _) = acc.recall.dim();
                for &t in &thresholds {
                    for k in 0..k_count {
                        take(acc.recall[[t, k, a, m]]);
                    }
                }
            }
        }
    }

    Stat {
        metric,
        iou_thr,
        area: area.to_string(),
        max_dets,
        value: if n == 0 { -1.0 } else { sum / n as f64 },
        iou_label,
    }
}
