//! Gap filling for per-frame series.

use nalgebra::SVector;
use serde::{Deserialize, Serialize};

/// How a run of missing frames is filled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpolationMethod {
    /// Leave the gap alone.
    #[default]
    None,
    /// Hold the last value before the gap.
    Repeat,
    Linear,
    /// Natural cubic spline through up to two samples on each side.
    Cubic,
}

/// A maximal run `start..end` of missing samples with defined samples at
/// `start - 1` and `end`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Gap {
    pub start: usize,
    pub end: usize,
}

/// Interior gaps of a series. Missing samples at either end have nothing to
/// interpolate from and are not reported.
pub fn find_gaps<T>(series: &[Option<T>]) -> Vec<Gap> {
    let mut gaps = Vec::new();
    let mut last_defined: Option<usize> = None;
    for (i, v) in series.iter().enumerate() {
        if v.is_some() {
            if let Some(prev) = last_defined {
                if i > prev + 1 {
                    gaps.push(Gap {
                        start: prev + 1,
                        end: i,
                    });
                }
            }
            last_defined = Some(i);
        }
    }
    gaps
}

/// Fill every interior gap using the method chosen for its first frame.
///
/// Returns `(frame, value)` for each filled sample; the input is untouched.
pub fn fill_gaps<const D: usize>(
    series: &[Option<SVector<f64, D>>],
    method_at: impl Fn(usize) -> InterpolationMethod,
) -> Vec<(usize, SVector<f64, D>)> {
    let mut out = Vec::new();
    for gap in find_gaps(series) {
        let (Some(before), Some(after)) = (series[gap.start - 1], series[gap.end]) else {
            continue;
        };
        match method_at(gap.start) {
            InterpolationMethod::None => {}
            InterpolationMethod::Repeat => {
                out.extend((gap.start..gap.end).map(|f| (f, before)));
            }
            InterpolationMethod::Linear => {
                let span = (gap.end - gap.start + 1) as f64;
                out.extend((gap.start..gap.end).map(|f| {
                    let k = (f - gap.start + 1) as f64;
                    (f, before + (after - before) * k / span)
                }));
            }
            InterpolationMethod::Cubic => {
                let knots = cubic_knots(series, gap);
                let spline = NaturalSpline::new(&knots);
                out.extend((gap.start..gap.end).map(|f| (f, spline.eval(f as f64))));
            }
        }
    }
    out
}

fn cubic_knots<const D: usize>(series: &[Option<SVector<f64, D>>], gap: Gap) -> Vec<(f64, SVector<f64, D>)> {
    let defined = |i: usize| series[i].map(|v| (i as f64, v));
    let mut knots: Vec<_> = (0..gap.start).rev().filter_map(defined).take(2).collect();
    knots.reverse();
    knots.extend((gap.end..series.len()).filter_map(defined).take(2));
    knots
}

/// Natural cubic spline over vector-valued knots.
///
/// With fewer than three knots the second derivatives are all zero and the
/// spline reduces to linear interpolation.
struct NaturalSpline<'a, const D: usize> {
    knots: &'a [(f64, SVector<f64, D>)],
    m: Vec<SVector<f64, D>>,
}

impl<'a, const D: usize> NaturalSpline<'a, D> {
    fn new(knots: &'a [(f64, SVector<f64, D>)]) -> Self {
        let n = knots.len();
        let mut m = vec![SVector::<f64, D>::zeros(); n];
        if n >= 3 {
            let k = n - 2;
            let h = |i: usize| knots[i + 1].0 - knots[i].0;
            let mut diag = Vec::with_capacity(k);
            let mut upper = Vec::with_capacity(k);
            let mut rhs = Vec::with_capacity(k);
            for j in 0..k {
                let i = j + 1;
                let slope_r = (knots[i + 1].1 - knots[i].1) / h(i);
                let slope_l = (knots[i].1 - knots[i - 1].1) / h(i - 1);
                diag.push(2.0 * (h(i - 1) + h(i)));
                upper.push(h(i));
                rhs.push((slope_r - slope_l) * 6.0);
            }
            // Thomas algorithm; the sub-diagonal entry of row j is h(j).
            for j in 1..k {
                let w = h(j) / diag[j - 1];
                diag[j] -= w * upper[j - 1];
                let prev = rhs[j - 1];
                rhs[j] -= prev * w;
            }
            m[k] = rhs[k - 1] / diag[k - 1];
            for j in (0..k - 1).rev() {
                m[j + 1] = (rhs[j] - m[j + 2] * upper[j]) / diag[j];
            }
        }
        Self { knots, m }
    }

    fn eval(&self, x: f64) -> SVector<f64, D> {
        let n = self.knots.len();
        let i = (0..n - 1)
            .find(|&i| x <= self.knots[i + 1].0)
            .unwrap_or(n - 2);
        let (t0, y0) = self.knots[i];
        let (t1, y1) = self.knots[i + 1];
        let h = t1 - t0;
        let a = t1 - x;
        let b = x - t0;
        self.m[i] * (a.powi(3) / (6.0 * h))
            + self.m[i + 1] * (b.powi(3) / (6.0 * h))
            + (y0 / h - self.m[i] * (h / 6.0)) * a
            + (y1 / h - self.m[i + 1] * (h / 6.0)) * b
    }
}
