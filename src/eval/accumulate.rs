use ndarray::{Array4, Array5};

use crate::eval::evaluate::EvalImg;
use crate::params::Params;

/// Precision/recall curves for every threshold, category, area range and
/// max-dets cap. Entries with no non-ignored ground truth stay at -1.
#[derive(Clone, Debug)]
pub struct Accumulation {
    /// T×R×K×A×M
    pub precision: Array5<f64>,
    /// T×K×A×M
    pub recall: Array4<f64>,
    /// T×R×K×A×M: score of the detection that reached each recall threshold.
    pub scores: Array5<f64>,
}

pub(crate) fn accumulate(params: &Params, eval_imgs: &[Option<EvalImg>]) -> Accumulation {
    let t_count = params.iou_thrs.len();
    let r_count = params.rec_thrs.len();
    let k_count = if params.use_cats {
        params.cat_ids.len()
    } else {
        1
    };
    let a_count = params.area_rng.len();
    let m_count = params.max_dets.len();
    let i_count = params.img_ids.len();

    let mut precision = Array5::from_elem((t_count, r_count, k_count, a_count, m_count), -1.0);
    let mut recall = Array4::from_elem((t_count, k_count, a_count, m_count), -1.0);
    let mut scores = Array5::from_elem((t_count, r_count, k_count, a_count, m_count), -1.0);

    for k in 0..k_count {
        for a in 0..a_count {
            let base = k * a_count * i_count + a * i_count;
            let evals: Vec<&EvalImg> = eval_imgs
                .get(base..base + i_count)
                .unwrap_or(&[])
                .iter()
                .flatten()
                .collect();
            if evals.is_empty() {
                continue;
            }

            for (m, &max_det) in params.max_dets.iter().enumerate() {
                // (score, image record, detection column), best first.
                let mut ranked: Vec<(f64, usize, usize)> = Vec::new();
                for (e, eval) in evals.iter().enumerate() {
                    let n = eval.dt_scores.len().min(max_det);
                    ranked.extend(eval.dt_scores[..n].iter().enumerate().map(|(d, &s)| (s, e, d)));
                }
                ranked.sort_by(|x, y| y.0.total_cmp(&x.0));

                let npig = evals
                    .iter()
                    .flat_map(|eval| eval.gt_ignore.iter())
                    .filter(|&&ignored| !ignored)
                    .count();
                if npig == 0 {
                    continue;
                }

                for t in 0..t_count {
                    let mut tp = 0.0f64;
                    let mut fp = 0.0f64;
                    let mut rc = Vec::with_capacity(ranked.len());
                    let mut pr = Vec::with_capacity(ranked.len());
                    for &(_, e, d) in &ranked {
                        let eval = evals[e];
                        if !eval.dt_ignore[[t, d]] {
                            if eval.dt_matches[[t, d]].is_some() {
                                tp += 1.0;
                            } else {
                                fp += 1.0;
                            }
                        }
                        rc.push(tp / npig as f64);
                        pr.push(tp / (tp + fp + f64::EPSILON));
                    }

                    recall[[t, k, a, m]] = rc.last().copied().unwrap_or(0.0);

                    // Interpolate: precision never rises as recall drops.
                    for i in (1..pr.len()).rev() {
                        if pr[i] > pr[i - 1] {
                            pr[i - 1] = pr[i];
                        }
                    }

                    for (r, &thr) in params.rec_thrs.iter().enumerate() {
                        let pos = rc.partition_point(|&v| v < thr);
                        let (p, s) = match pr.get(pos) {
                            Some(&p) => (p, ranked[pos].0),
                            None => (0.0, 0.0),
                        };
                        precision[[t, r, k, a, m]] = p;
                        scores[[t, r, k, a, m]] = s;
                    }
                }
            }
        }
    }

    Accumulation {
        precision,
        recall,
        scores,
    }
}
