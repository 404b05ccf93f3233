//! Harris corners refined by the gradient-orthogonality subpixel search.

use marker_track_core::{sample_bilinear, GrayImageView, SubImage};
use nalgebra::Point2;

use crate::filters::ImageF32;
use crate::params::CornerParams;
use crate::strategy::{nearest, Locate, LocateContext, Located};
use crate::DetectError;

pub struct CornerLocator<'a> {
    pub params: &'a CornerParams,
}

impl Locate for CornerLocator<'_> {
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
    fn locate(&self, patch: &SubImage, ctx: &LocateContext) -> Result<Option<Located>, DetectError> {
        let p = self.params;
        let src = ImageF32::from_gray(&patch.image)?;
        let response = harris_response(&src, p.block_size, p.harris_k)?;
        let seeds = good_features(&response, p);
        log::trace!("corner: {} harris candidates", seeds.len());

        let view = patch.image.view();
        let radius = p.subpix_half_window as f64;
        let candidates = seeds.into_iter().map(|(x, y)| {
            let (rx, ry) = corner_subpix(
                &view,
                (x as f64, y as f64),
                p.subpix_half_window,
                p.subpix_max_iter,
                p.subpix_eps,
            );
            let (fx, fy) = patch.to_frame(rx, ry);
            Located {
                center: Point2::new(fx, fy),
                radius,
            }
        });
        Ok(nearest(candidates, ctx.predicted))
    }
}

/// 3x3 Sobel derivatives with reflect-101 borders.
fn sobel(src: &ImageF32) -> Result<(ImageF32, ImageF32), DetectError> {
    let mut gx = ImageF32::try_new(src.w, src.h)?;
    let mut gy = ImageF32::try_new(src.w, src.h)?;
    for y in 0..src.h as i64 {
        for x in 0..src.w as i64 {
            let v = |dx: i64, dy: i64| src.get_reflect(x + dx, y + dy);
            let dx = (v(1, -1) + 2.0 * v(1, 0) + v(1, 1)) - (v(-1, -1) + 2.0 * v(-1, 0) + v(-1, 1));
            let dy = (v(-1, 1) + 2.0 * v(0, 1) + v(1, 1)) - (v(-1, -1) + 2.0 * v(0, -1) + v(1, -1));
            gx.set(x as usize, y as usize, dx);
            gy.set(x as usize, y as usize, dy);
        }
    }
    Ok((gx, gy))
}

/// Box-summed structure tensor turned into `det - k * trace²`.
fn harris_response(src: &ImageF32, block: usize, k: f64) -> Result<ImageF32, DetectError> {
    let (gx, gy) = sobel(src)?;
    let (w, h) = (src.w, src.h);
    let mut xx = ImageF32::try_new(w, h)?;
    let mut xy = ImageF32::try_new(w, h)?;
    let mut yy = ImageF32::try_new(w, h)?;
    for i in 0..w * h {
        let (a, b) = (gx.data[i], gy.data[i]);
        xx.data[i] = a * a;
        xy.data[i] = a * b;
        yy.data[i] = b * b;
    }
    let half = (block.max(1) / 2) as i64;
    let mut out = ImageF32::try_new(w, h)?;
    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let (mut sxx, mut sxy, mut syy) = (0.0f64, 0.0f64, 0.0f64);
            for dy in -half..=half {
                for dx in -half..=half {
                    sxx += xx.get_reflect(x + dx, y + dy) as f64;
                    sxy += xy.get_reflect(x + dx, y + dy) as f64;
                    syy += yy.get_reflect(x + dx, y + dy) as f64;
                }
            }
            let det = sxx * syy - sxy * sxy;
            let tr = sxx + syy;
            out.set(x as usize, y as usize, (det - k * tr * tr) as f32);
        }
    }
    Ok(out)
}

/// Strongest 3x3 local maxima above `quality_level * max`, thinned to
/// `min_distance` and capped at `max_corners`.
fn good_features(response: &ImageF32, p: &CornerParams) -> Vec<(usize, usize)> {
    let (w, h) = (response.w, response.h);
    let (_, max) = response.min_max();
    if max.is_nan() || max <= 0.0 || w < 3 || h < 3 {
        return Vec::new();
    }
    let thresh = (p.quality_level * max as f64) as f32;

    let mut peaks = Vec::new();
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let v = response.get(x, y);
            if v <= thresh {
                continue;
            }
            let is_max = (-1i64..=1).all(|dy| {
                (-1i64..=1).all(|dx| {
                    response.get((x as i64 + dx) as usize, (y as i64 + dy) as usize) <= v
                })
            });
            if is_max {
                peaks.push((v, x, y));
            }
        }
    }
    peaks.sort_by(|a, b| b.0.total_cmp(&a.0));

    let min_d2 = p.min_distance * p.min_distance;
    let mut kept: Vec<(usize, usize)> = Vec::new();
    for (_, x, y) in peaks {
        if kept.len() >= p.max_corners {
            break;
        }
        let far = kept.iter().all(|&(kx, ky)| {
            let dx = kx as f64 - x as f64;
            let dy = ky as f64 - y as f64;
            dx * dx + dy * dy >= min_d2
        });
        if far {
            kept.push((x, y));
        }
    }
    kept
}

/// Iterative corner refinement: find the point where image gradients in the
/// window are orthogonal to the vectors pointing at them.
///
/// Falls back to the start point if the search drifts out of the window.
pub fn corner_subpix(
    img: &GrayImageView<'_>,
    start: (f64, f64),
    half_win: usize,
    max_iter: usize,
    eps: f64,
) -> (f64, f64) {
    let win = half_win.max(1) as i64;
    let inv_w2 = 1.0 / (win * win) as f64;
    let (mut cx, mut cy) = start;

    for _ in 0..max_iter.max(1) {
        let (mut a, mut b, mut c, mut bb1, mut bb2) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for dy in -win..=win {
            for dx in -win..=win {
                let (px, py) = (dx as f64, dy as f64);
                let m = (-(px * px) * inv_w2).exp() * (-(py * py) * inv_w2).exp();
                let (sx, sy) = (cx + px, cy + py);
                let gx = 0.5 * (sample_bilinear(img, sx + 1.0, sy) - sample_bilinear(img, sx - 1.0, sy));
                let gy = 0.5 * (sample_bilinear(img, sx, sy + 1.0) - sample_bilinear(img, sx, sy - 1.0));
                let gxx = gx * gx * m;
                let gxy = gx * gy * m;
                let gyy = gy * gy * m;
                a += gxx;
                b += gxy;
                c += gyy;
                bb1 += gxx * px + gxy * py;
                bb2 += gxy * px + gyy * py;
            }
        }
        let det = a * c - b * b;
        if det.abs() <= f64::EPSILON * f64::EPSILON {
            break;
        }
        let scale = 1.0 / det;
        let nx = cx + c * scale * bb1 - b * scale * bb2;
        let ny = cy - b * scale * bb1 + a * scale * bb2;
        let moved2 = (nx - cx).powi(2) + (ny - cy).powi(2);
        cx = nx;
        cy = ny;
        if (cx - start.0).abs() > win as f64 || (cy - start.1).abs() > win as f64 {
            return start;
        }
        if moved2 <= eps * eps {
            break;
        }
    }
    (cx, cy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{patch_around, saddle};

    #[test]
    fn subpix_converges_on_saddle() {
        let img = saddle(80, 80, 40.3, 39.6);
        let (x, y) = corner_subpix(&img.view(), (41.0, 39.0), 7, 100, 1e-3);
        assert!((x - 40.3).abs() < 0.1, "x = {x}");
        assert!((y - 39.6).abs() < 0.1, "y = {y}");
    }

    #[test]
    fn harris_peaks_at_saddle() {
        let img = saddle(40, 40, 20.0, 20.0);
        let resp = harris_response(&ImageF32::from_gray(&img).unwrap(), 7, 0.04).unwrap();
        let seeds = good_features(&resp, &CornerParams::default());
        assert!(!seeds.is_empty());
        let (x, y) = seeds[0];
        assert!((x as i64 - 20).abs() <= 1 && (y as i64 - 20).abs() <= 1, "{seeds:?}");
    }

    #[test]
    fn flat_patch_has_no_corners() {
        let img = marker_track_core::GrayImage::try_filled(30, 30, 90).unwrap();
        let resp = harris_response(&ImageF32::from_gray(&img).unwrap(), 7, 0.04).unwrap();
        assert!(good_features(&resp, &CornerParams::default()).is_empty());
    }

    #[test]
    fn locator_reports_half_window_radius() {
        let img = saddle(160, 140, 80.3, 70.6);
        let patch = patch_around(&img, 79.0, 71.0, 50);
        let params = CornerParams::default();
        let found = CornerLocator { params: &params }
            .locate(
                &patch,
                &LocateContext {
                    predicted: Point2::new(79.0, 71.0),
                    size: 5.0,
                    threshold_offset: 8.0,
                },
            )
            .unwrap()
            .expect("corner");
        assert!((found.center - Point2::new(80.3, 70.6)).norm() < 0.25, "{found:?}");
        assert_eq!(found.radius, 7.0);
    }
}
