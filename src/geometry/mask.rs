//! Run-length encoded binary masks.
//!
//! Masks are stored column-major as alternating runs of zeros and ones,
//! starting with zeros. The compressed string form packs each run (as a
//! delta against the run two positions back once past the first three) into
//! 5-bit groups offset by ASCII '0'.

use ndarray::Array2;

use crate::dataset::{RleCounts, RleObject, Segmentation};
use crate::error::{EvalError, Result};
use crate::geometry::bbox_iou;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Rle {
    pub h: u32,
    pub w: u32,
    pub counts: Vec<u32>,
}

impl Rle {
    pub fn new(h: u32, w: u32, counts: Vec<u32>) -> Self {
        Self { h, w, counts }
    }

    /// Like [`Rle::new`], but the runs must cover exactly `h`×`w` pixels.
    pub fn checked(h: u32, w: u32, counts: Vec<u32>) -> Result<Self> {
        let covered: u64 = counts.iter().map(|&c| c as u64).sum();
        let expected = h as u64 * w as u64;
        if covered != expected {
            return Err(EvalError::Geometry(format!(
                "RLE runs cover {} pixels, expected {} for a {}x{} mask",
                covered, expected, h, w
            )));
        }
        Ok(Self::new(h, w, counts))
    }

    /// Decode an annotation's segmentation against an image of `h`×`w`.
    ///
    /// Polygons are rasterized and unioned; RLE objects carry their own size.
    pub fn from_segmentation(segmentation: &Segmentation, h: u32, w: u32) -> Result<Self> {
        match segmentation {
            Segmentation::Polygons(polygons) => Ok(Self::from_polygons(polygons, h, w)),
            Segmentation::Rle(RleObject { size, counts }) => {
                let [h, w] = *size;
                match counts {
                    RleCounts::Compressed(s) => Self::from_compressed(s, h, w),
                    RleCounts::Uncompressed(c) => Self::checked(h, w, c.clone()),
                }
            }
        }
    }

    /// Union of several polygons.
    pub fn from_polygons(polygons: &[Vec<f64>], h: u32, w: u32) -> Self {
        let rles: Vec<Rle> = polygons
            .iter()
            .map(|poly| Self::from_polygon(poly, h, w))
            .collect();
        if rles.is_empty() {
            return Self::new(h, w, vec![h * w]);
        }
        Self::merge(&rles, false)
    }

    /// Rasterize a single polygon given as `[x, y, x, y, ...]`.
    pub fn from_polygon(xy: &[f64], h: u32, w: u32) -> Self {
        const SCALE: f64 = 5.0;
        let k = xy.len() / 2;
        if k == 0 {
            return Self::new(h, w, vec![h * w]);
        }

        // Upsample and walk the boundary densely.
        let mut x: Vec<i64> = (0..k).map(|j| (SCALE * xy[2 * j] + 0.5) as i64).collect();
        let mut y: Vec<i64> = (0..k)
            .map(|j| (SCALE * xy[2 * j + 1] + 0.5) as i64)
            .collect();
        x.push(x[0]);
        y.push(y[0]);

        let mut u: Vec<i64> = Vec::new();
        let mut v: Vec<i64> = Vec::new();
        for j in 0..k {
            let (mut xs, mut xe, mut ys, mut ye) = (x[j], x[j + 1], y[j], y[j + 1]);
            let dx = (xe - xs).abs();
            let dy = (ys - ye).abs();
            let flip = (dx >= dy && xs > xe) || (dx < dy && ys > ye);
            if flip {
                std::mem::swap(&mut xs, &mut xe);
                std::mem::swap(&mut ys, &mut ye);
            }
            if dx >= dy {
                let s = if dx == 0 {
                    0.0
                } else {
                    (ye - ys) as f64 / dx as f64
                };
                for d in 0..=dx {
                    let t = if flip { dx - d } else { d };
                    u.push(t + xs);
                    v.push((ys as f64 + s * t as f64 + 0.5) as i64);
                }
            } else {
                let s = (xe - xs) as f64 / dy as f64;
                for d in 0..=dy {
                    let t = if flip { dy - d } else { d };
                    v.push(t + ys);
                    u.push((xs as f64 + s * t as f64 + 0.5) as i64);
                }
            }
        }

        // Keep y-boundary crossings and downsample back to pixel space.
        let hf = h as f64;
        let wf = w as f64;
        let mut starts: Vec<u32> = Vec::new();
        for j in 1..u.len() {
            if u[j] == u[j - 1] {
                continue;
            }
            let xd = if u[j] < u[j - 1] { u[j] } else { u[j] - 1 };
            let xd = (xd as f64 + 0.5) / SCALE - 0.5;
            if xd.floor() != xd || xd < 0.0 || xd > wf - 1.0 {
                continue;
            }
            let yd = v[j].min(v[j - 1]) as f64;
            let yd = ((yd + 0.5) / SCALE - 0.5).clamp(0.0, hf).ceil();
            starts.push((xd as i64 * h as i64 + yd as i64) as u32);
        }
        starts.push(h * w);
        starts.sort_unstable();

        // Differences between sorted boundary positions, dropping empty runs.
        let mut prev = 0u32;
        for a in starts.iter_mut() {
            let t = *a;
            *a -= prev;
            prev = t;
        }
        let mut counts = Vec::with_capacity(starts.len());
        let mut j = 0;
        counts.push(starts[j]);
        j += 1;
        while j < starts.len() {
            if starts[j] > 0 {
                counts.push(starts[j]);
                j += 1;
            } else {
                j += 1;
                if j < starts.len() {
                    if let Some(last) = counts.last_mut() {
                        *last += starts[j];
                    }
                    j += 1;
                }
            }
        }
        Self::new(h, w, counts)
    }

    /// Decode the compressed string form.
    pub fn from_compressed(s: &str, h: u32, w: u32) -> Result<Self> {
        let bytes = s.as_bytes();
        let mut counts: Vec<u32> = Vec::new();
        let mut p = 0;
        while p < bytes.len() {
            let mut x: i64 = 0;
            let mut k = 0;
            let mut more = true;
            while more {
                let byte = *bytes.get(p).ok_or_else(|| {
                    EvalError::Geometry(format!("truncated RLE string '{}'", s))
                })?;
                if byte < 48 || k >= 12 {
                    return Err(EvalError::Geometry(format!("malformed RLE string '{}'", s)));
                }
                let c = (byte - 48) as i64;
                x |= (c & 0x1f) << (5 * k);
                more = c & 0x20 != 0;
                p += 1;
                k += 1;
                if !more && (c & 0x10) != 0 {
                    x |= -1i64 << (5 * k);
                }
            }
            if counts.len() > 2 {
                x += counts[counts.len() - 2] as i64;
            }
            if x < 0 || x > u32::MAX as i64 {
                return Err(EvalError::Geometry(format!("malformed RLE string '{}'", s)));
            }
            counts.push(x as u32);
        }
        Self::checked(h, w, counts)
    }

    /// Encode to the compressed string form; the inverse of [`Rle::from_compressed`].
    pub fn to_compressed(&self) -> String {
        let mut out = String::new();
        for (i, &count) in self.counts.iter().enumerate() {
            let mut x = count as i64;
            if i > 2 {
                x -= self.counts[i - 2] as i64;
            }
            let mut more = true;
            while more {
                let mut c = (x & 0x1f) as u8;
                x >>= 5;
                more = if c & 0x10 != 0 { x != -1 } else { x != 0 };
                if more {
                    c |= 0x20;
                }
                out.push((c + 48) as char);
            }
        }
        out
    }

    /// Number of foreground pixels.
    pub fn area(&self) -> u64 {
        self.counts.iter().skip(1).step_by(2).map(|&c| c as u64).sum()
    }

    /// Tight `[x, y, w, h]` box around the foreground.
    pub fn to_bbox(&self) -> [f64; 4] {
        let counts = self.nonempty_runs();
        let h = self.h as u64;
        let m = (counts.len() / 2) * 2;
        if m == 0 || h == 0 {
            return [0.0; 4];
        }
        let (mut xs, mut ys) = (self.w as u64, h);
        let (mut xe, mut ye) = (0u64, 0u64);
        let mut cc = 0u64;
        let mut xp = 0u64;
        for j in 0..m {
            cc += counts[j] as u64;
            let t = cc - (j % 2) as u64;
            let y = t % h;
            let x = (t - y) / h;
            if j % 2 == 0 {
                xp = x;
            } else if xp < x {
                ys = 0;
                ye = h - 1;
            }
            xs = xs.min(x);
            xe = xe.max(x);
            ys = ys.min(y);
            ye = ye.max(y);
        }
        [
            xs as f64,
            ys as f64,
            (xe - xs + 1) as f64,
            (ye - ys + 1) as f64,
        ]
    }

    /// Runs with interior zero-length runs folded into their neighbours.
    ///
    /// Only the leading run may be empty, so every foreground run is non-empty.
    fn nonempty_runs(&self) -> Vec<u32> {
        let mut runs: Vec<u32> = Vec::with_capacity(self.counts.len());
        let mut iter = self.counts.iter().copied();
        if let Some(first) = iter.next() {
            runs.push(first);
        }
        while let Some(c) = iter.next() {
            if c > 0 {
                runs.push(c);
            } else if let Some(next) = iter.next() {
                if let Some(last) = runs.last_mut() {
                    *last += next;
                }
            }
        }
        runs
    }

    /// Union (or intersection) of masks sharing one size.
    ///
    /// Masks of differing size merge to an empty 0×0 mask.
    pub fn merge(rles: &[Rle], intersect: bool) -> Self {
        let Some(first) = rles.first() else {
            return Self::default();
        };
        let (h, w) = (first.h, first.w);
        let mut acc = first.counts.clone();
        for b in &rles[1..] {
            if b.h != h || b.w != w {
                return Self::default();
            }
            let a = std::mem::take(&mut acc);
            let (mut ca, mut cb) = (first_run(&a), first_run(&b.counts));
            let (mut va, mut vb, mut v) = (false, false, false);
            let (mut ia, mut ib) = (1usize, 1usize);
            let mut cc = 0u32;
            let mut ct = 1u32;
            while ct > 0 {
                let c = ca.min(cb);
                cc += c;
                ct = 0;
                let mut advanced = c > 0;
                ca -= c;
                if ca == 0 && ia < a.len() {
                    ca = a[ia];
                    ia += 1;
                    va = !va;
                    advanced = true;
                }
                ct += ca;
                cb -= c;
                if cb == 0 && ib < b.counts.len() {
                    cb = b.counts[ib];
                    ib += 1;
                    vb = !vb;
                    advanced = true;
                }
                ct += cb;
                // One side ran out of runs before the other.
                if !advanced {
                    if cc > 0 {
                        acc.push(cc);
                    }
                    break;
                }
                let vp = v;
                v = if intersect { va && vb } else { va || vb };
                if v != vp || ct == 0 {
                    acc.push(cc);
                    cc = 0;
                }
            }
        }
        Self::new(h, w, acc)
    }
}

fn first_run(counts: &[u32]) -> u32 {
    counts.first().copied().unwrap_or(0)
}

/// Intersection of two run sequences: `(intersection, union)` pixel counts.
fn overlap(dt: &Rle, gt: &Rle) -> (u64, u64) {
    let (mut ca, mut cb) = (first_run(&dt.counts), first_run(&gt.counts));
    let (mut va, mut vb) = (false, false);
    let (mut a, mut b) = (1usize, 1usize);
    let (mut inter, mut union) = (0u64, 0u64);
    let mut ct = 1u32;
    while ct > 0 {
        let c = ca.min(cb);
        if va || vb {
            union += c as u64;
            if va && vb {
                inter += c as u64;
            }
        }
        ct = 0;
        let mut advanced = c > 0;
        ca -= c;
        if ca == 0 && a < dt.counts.len() {
            ca = dt.counts[a];
            a += 1;
            va = !va;
            advanced = true;
        }
        ct += ca;
        cb -= c;
        if cb == 0 && b < gt.counts.len() {
            cb = gt.counts[b];
            b += 1;
            vb = !vb;
            advanced = true;
        }
        ct += cb;
        if !advanced {
            break;
        }
    }
    (inter, union)
}

/// D×G mask IoU. Against crowd ground truth the union is the detection area.
///
/// Masks of mismatched size score -1.
pub fn rle_iou(dts: &[Rle], gts: &[Rle], iscrowd: &[bool]) -> Array2<f64> {
    let db: Vec<[f64; 4]> = dts.iter().map(Rle::to_bbox).collect();
    let gb: Vec<[f64; 4]> = gts.iter().map(Rle::to_bbox).collect();
    let mut ious = bbox_iou(&db, &gb, iscrowd);
    for (d, dt) in dts.iter().enumerate() {
        for (g, gt) in gts.iter().enumerate() {
            if ious[[d, g]] <= 0.0 {
                continue;
            }
            if dt.h != gt.h || dt.w != gt.w {
                ious[[d, g]] = -1.0;
                continue;
            }
            let crowd = iscrowd.get(g).copied().unwrap_or(false);
            let (inter, mut union) = overlap(dt, gt);
            if inter == 0 {
                union = 1;
            } else if crowd {
                union = dt.area();
            }
            ious[[d, g]] = inter as f64 / union as f64;
        }
    }
    ious
}
