//! Subpixel centre refinement by local quartic surface fitting.
//!
//! Around the current estimate the intensity surface is fitted with a full
//! 4th-order bivariate polynomial (weighted least squares, gaussian weights).
//! Its quadratic block is a conic whose stationary point gives a Newton step
//! towards the intensity peak; the quartic block gives the peak's principal
//! widths and thus a radius.

use marker_track_core::{ImageError, ImageSource};
use nalgebra::{DMatrix, DVector, Point2};
use serde::{Deserialize, Serialize};

use crate::params::RefineParams;

/// How a refinement run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefineOutcome {
    Converged,
    BudgetExhausted,
    /// The fitted conic was not an ellipse (`J <= 0`) or the system was singular.
    Degenerate,
    TooFewPixels,
    NonFinite,
}

impl RefineOutcome {
    pub fn is_converged(self) -> bool {
        self == RefineOutcome::Converged
    }
}

/// Shape indicators from the last successful fit.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefineDiagnostics {
    /// Major-axis angle in radians.
    pub angle: f64,
    pub sigma_major: f64,
    pub sigma_minor: f64,
    /// `sqrt(1 - (minor / major)²)`; 0 for a round peak.
    pub eccentricity: f64,
    /// Cubic-to-quadratic coefficient ratio; grows with peak asymmetry.
    pub skewness: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Refinement {
    pub center: Point2<f64>,
    pub radius: f64,
    pub outcome: RefineOutcome,
    pub iterations: usize,
    pub diagnostics: Option<RefineDiagnostics>,
}

/// Coefficients of the fitted polynomial in pixel units, ordered
/// `1, x, y, x², xy, y², x³, x²y, xy², y³, x⁴, x³y, x²y², xy³, y⁴`.
struct QuarticFit([f64; 15]);

struct FitStep {
    offset: (f64, f64),
    widths: Option<(f64, f64)>,
    diagnostics: Option<RefineDiagnostics>,
}

fn monomials(u: f64, v: f64) -> [f64; 15] {
    let (u2, v2) = (u * u, v * v);
    [
        1.0,
        u,
        v,
        u2,
        u * v,
        v2,
        u2 * u,
        u2 * v,
        u * v2,
        v2 * v,
        u2 * u2,
        u2 * u * v,
        u2 * v2,
        u * v2 * v,
        v2 * v2,
    ]
}

/// Monomial degree per coefficient, used to undo the coordinate scaling.
const DEGREE: [i32; 15] = [0, 1, 1, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 4];

enum FitError {
    TooFewPixels,
    Degenerate,
    Unavailable(ImageError),
}

fn fit_window<S: ImageSource + ?Sized>(
    image: &S,
    center: Point2<f64>,
    radius: f64,
    dark: bool,
    params: &RefineParams,
) -> Result<QuarticFit, FitError> {
    let half = (params.limmult * radius).round().max(1.0) as i64;
    let (rx, ry) = (center.x.round() as i64, center.y.round() as i64);
    let patch = match image.sub_image(half as u32, rx - half, ry - half) {
        Ok(p) => p,
        Err(ImageError::EmptyRegion { .. }) => return Err(FitError::TooFewPixels),
        Err(e) => return Err(FitError::Unavailable(e)),
    };
    let (w, h) = (patch.image.width, patch.image.height);
    let n = w * h;
    if n < params.min_pixels.max(15) {
        return Err(FitError::TooFewPixels);
    }

    // Offsets are scaled by the radius so all monomials stay O(1).
    let inv_r = 1.0 / radius;
    let inv_r2 = inv_r * inv_r;
    let mut a = DMatrix::<f64>::zeros(n, 15);
    let mut b = DVector::<f64>::zeros(n);
    for py in 0..h {
        for px in 0..w {
            let (fx, fy) = patch.to_frame(px as f64, py as f64);
            let (tx, ty) = (fx - center.x, fy - center.y);
            let weight = (-(tx * tx + ty * ty) * inv_r2).exp();
            let raw = patch.image.get(px, py) as f64;
            let value = if dark { 255.0 - raw } else { raw };
            let row = py * w + px;
            for (k, m) in monomials(tx * inv_r, ty * inv_r).iter().enumerate() {
                a[(row, k)] = weight * m;
            }
            b[row] = weight * value;
        }
    }

    let qr = a.qr();
    let qtb = qr.q().transpose() * &b;
    let scaled = qr
        .r()
        .solve_upper_triangular(&qtb)
        .ok_or(FitError::Degenerate)?;

    let mut coeffs = [0.0; 15];
    for (k, c) in coeffs.iter_mut().enumerate() {
        *c = scaled[k] * inv_r.powi(DEGREE[k]);
        if !c.is_finite() {
            return Err(FitError::Degenerate);
        }
    }
    Ok(QuarticFit(coeffs))
}

impl QuarticFit {
    /// Newton step to the conic centre plus principal widths when the
    /// quartic supports them.
    fn step(&self) -> Option<FitStep> {
        let c = &self.0;
        let (a, b, cc) = (c[3], 0.5 * c[4], c[5]);
        let (d, f) = (0.5 * c[1], 0.5 * c[2]);
        let j = a * cc - b * b;
        // A flat window leaves only round-off in the quadratic block.
        let negligible = a.abs() + cc.abs() <= 1e-9 * c[0].abs().max(1.0);
        if j.is_nan() || j <= 0.0 || negligible {
            return None;
        }
        let offset = ((b * f - cc * d) / j, (b * d - a * f) / j);

        let theta = 0.5 * (2.0 * b).atan2(a - cc);
        let (s, co) = theta.sin_cos();
        let lambda1 = a * co * co + 2.0 * b * s * co + cc * s * s;
        let lambda2 = a * s * s - 2.0 * b * s * co + cc * co * co;
        let q1 = c[10] * co.powi(4)
            + c[11] * co.powi(3) * s
            + c[12] * co * co * s * s
            + c[13] * co * s.powi(3)
            + c[14] * s.powi(4);
        let q2 = c[10] * s.powi(4) - c[11] * s.powi(3) * co + c[12] * s * s * co * co
            - c[13] * s * co.powi(3)
            + c[14] * co.powi(4);
        let s1 = -lambda1 / (4.0 * q1);
        let s2 = -lambda2 / (4.0 * q2);

        let (widths, diagnostics) = if s1 > 0.0 && s2 > 0.0 && s1.is_finite() && s2.is_finite() {
            let (w1, w2) = (s1.sqrt(), s2.sqrt());
            let (major, minor, angle) = if w1 >= w2 {
                (w1, w2, theta)
            } else {
                (w2, w1, theta + std::f64::consts::FRAC_PI_2)
            };
            let cubic = (c[6].powi(2) + c[7].powi(2) + c[8].powi(2) + c[9].powi(2)).sqrt();
            let quad = (lambda1 * lambda1 + lambda2 * lambda2).sqrt();
            let skewness = if quad > 0.0 {
                cubic * (w1 * w2).sqrt() / quad
            } else {
                0.0
            };
            (
                Some((w1, w2)),
                Some(RefineDiagnostics {
                    angle,
                    sigma_major: major,
                    sigma_minor: minor,
                    eccentricity: (1.0 - (minor / major).powi(2)).max(0.0).sqrt(),
                    skewness,
                }),
            )
        } else {
            (None, None)
        };

        Some(FitStep {
            offset,
            widths,
            diagnostics,
        })
    }
}

/// Refine a coarse marker centre.
///
/// `dark` selects dark-on-bright markers (intensities are inverted so the
/// marker becomes a peak). The window and weights are sized from the
/// incoming `radius`; the returned radius is the fitted one when available.
/// Never fails: on any problem the last good estimate is returned with a
/// non-converged outcome.
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(level = "debug", skip(image, params), fields(x = center.x, y = center.y))
)]
pub fn refine_center<S: ImageSource + ?Sized>(
    image: &S,
    center: Point2<f64>,
    radius: f64,
    dark: bool,
    params: &RefineParams,
) -> Refinement {
    refine_passes(image, center, radius, dark, params, |_| {})
}

/// Refinement loop; `on_pass` receives the unclamped offset norm of each pass.
fn refine_passes<S: ImageSource + ?Sized>(
    image: &S,
    center: Point2<f64>,
    radius: f64,
    dark: bool,
    params: &RefineParams,
    mut on_pass: impl FnMut(f64),
) -> Refinement {
    let initial = Refinement {
        center,
        radius,
        outcome: RefineOutcome::Degenerate,
        iterations: 0,
        diagnostics: None,
    };
    if !(radius.is_finite() && radius > 0.0 && center.x.is_finite() && center.y.is_finite()) {
        return Refinement {
            outcome: RefineOutcome::NonFinite,
            ..initial
        };
    }

    let thresh = params.improver_thresh.max(f64::EPSILON);
    let budget = ((params.limmult * radius / thresh).ceil() as usize).max(1);
    let mut best = initial;
    let mut extra = 0usize;

    for iteration in 1..=budget {
        let fit = match fit_window(image, best.center, radius, dark, params) {
            Ok(fit) => fit,
            Err(FitError::TooFewPixels) => {
                best.outcome = RefineOutcome::TooFewPixels;
                return best;
            }
            Err(FitError::Unavailable(e)) => {
                log::warn!("refine: window unavailable at {:?}: {e}", best.center);
                best.outcome = RefineOutcome::TooFewPixels;
                return best;
            }
            Err(FitError::Degenerate) => {
                best.outcome = RefineOutcome::Degenerate;
                return best;
            }
        };
        let Some(step) = fit.step() else {
            best.outcome = RefineOutcome::Degenerate;
            return best;
        };

        let (ox, oy) = step.offset;
        let next_center = Point2::new(
            best.center.x + ox.clamp(-thresh, thresh),
            best.center.y + oy.clamp(-thresh, thresh),
        );
        let next_radius = step
            .widths
            .map(|(w1, w2)| params.radius_scale * (w1 * w2).sqrt())
            .unwrap_or(best.radius);
        if !(next_center.x.is_finite() && next_center.y.is_finite() && next_radius.is_finite()) {
            log::debug!("refine: non-finite update, keeping {:?}", center);
            return Refinement {
                outcome: RefineOutcome::NonFinite,
                iterations: iteration,
                ..initial
            };
        }

        best = Refinement {
            center: next_center,
            radius: next_radius,
            outcome: RefineOutcome::BudgetExhausted,
            iterations: iteration,
            diagnostics: step.diagnostics.or(best.diagnostics),
        };

        let moved = ox.hypot(oy);
        on_pass(moved);
        if moved <= thresh {
            extra += 1;
            if moved < params.settle_eps || extra >= params.extra_passes.max(1) {
                best.outcome = RefineOutcome::Converged;
                return best;
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{dark_disk, gaussian_blob};
    use marker_track_core::GrayImage;

    #[test]
    fn converges_on_gaussian_blob() {
        let img = gaussian_blob(100, 100, 50.3, 49.6, 2.5, 40.0, 180.0);
        let r = refine_center(&img, Point2::new(49.1, 50.5), 4.0, false, &RefineParams::default());
        assert_eq!(r.outcome, RefineOutcome::Converged, "{r:?}");
        assert!((r.center.x - 50.3).abs() < 0.05, "{r:?}");
        assert!((r.center.y - 49.6).abs() < 0.05, "{r:?}");
        let diag = r.diagnostics.expect("diagnostics");
        assert!(diag.eccentricity < 0.3, "{diag:?}");
        assert!(r.radius > 0.0 && r.radius.is_finite());
    }

    #[test]
    fn passes_shrink_within_budget() {
        let img = gaussian_blob(100, 100, 50.3, 49.6, 2.5, 40.0, 180.0);
        let params = RefineParams::default();
        let radius = 4.0;
        let mut steps = Vec::new();
        let r = refine_passes(&img, Point2::new(48.3, 49.6), radius, false, &params, |m| {
            steps.push(m)
        });

        assert_eq!(r.outcome, RefineOutcome::Converged, "{r:?}");
        assert_eq!(r.iterations, steps.len());
        let budget = (params.limmult * radius / params.improver_thresh).ceil() as usize;
        assert!(steps.len() <= budget + params.extra_passes, "{steps:?}");
        assert!(steps[0] > 1.0, "{steps:?}");
        for pair in steps.windows(2) {
            assert!(pair[1] < pair[0], "{steps:?}");
        }
        assert!(*steps.last().unwrap() < params.improver_thresh, "{steps:?}");
        assert!((r.center - Point2::new(50.3, 49.6)).norm() < 0.05, "{r:?}");
    }

    #[test]
    fn dark_flag_handles_dark_disk() {
        let img = dark_disk(200, 200, 103.2, 98.7, 4.0, 200, 30);
        let r = refine_center(&img, Point2::new(103.0, 99.1), 5.0, true, &RefineParams::default());
        assert!(r.outcome.is_converged(), "{r:?}");
        assert!((r.center - Point2::new(103.2, 98.7)).norm() < 0.1, "{r:?}");
    }

    #[test]
    fn flat_image_is_degenerate_and_keeps_estimate() {
        let img = GrayImage::try_filled(50, 50, 120).unwrap();
        let start = Point2::new(25.3, 24.8);
        let r = refine_center(&img, start, 4.0, false, &RefineParams::default());
        assert_eq!(r.outcome, RefineOutcome::Degenerate);
        assert_eq!(r.center, start);
        assert_eq!(r.radius, 4.0);
    }

    #[test]
    fn tiny_window_reports_too_few_pixels() {
        let img = gaussian_blob(20, 20, 0.0, 0.0, 2.0, 10.0, 200.0);
        let start = Point2::new(-1.9, -1.9);
        let r = refine_center(&img, start, 1.5, false, &RefineParams::default());
        assert_eq!(r.outcome, RefineOutcome::TooFewPixels);
        assert_eq!(r.center, start);
    }

    #[test]
    fn non_finite_input_is_returned_unchanged() {
        let img = GrayImage::try_filled(10, 10, 0).unwrap();
        let r = refine_center(&img, Point2::new(f64::NAN, 1.0), 3.0, true, &RefineParams::default());
        assert_eq!(r.outcome, RefineOutcome::NonFinite);
        assert_eq!(r.iterations, 0);
    }
}
