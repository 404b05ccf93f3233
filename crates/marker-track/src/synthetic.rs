//! Synthetic marker images for demos and tests.

use marker_track_core::{CameraModel, GrayImage};
use nalgebra::Point3;

const SUPERSAMPLE: usize = 8;

/// Render disks `(cx, cy, radius)` of intensity `fg` on `bg`.
///
/// Edge pixels are blended by 8x8 supersampled coverage.
pub fn render_disks(width: usize, height: usize, disks: &[(f64, f64, f64)], bg: u8, fg: u8) -> GrayImage {
    let step = 1.0 / SUPERSAMPLE as f64;
    GrayImage::from_fn(width, height, |x, y| {
        let near: Vec<&(f64, f64, f64)> = disks
            .iter()
            .filter(|(cx, cy, r)| (x as f64 - cx).abs() <= r + 1.0 && (y as f64 - cy).abs() <= r + 1.0)
            .collect();
        if near.is_empty() {
            return bg;
        }
        let mut inside = 0usize;
        for sy in 0..SUPERSAMPLE {
            for sx in 0..SUPERSAMPLE {
                let px = x as f64 - 0.5 + (sx as f64 + 0.5) * step;
                let py = y as f64 - 0.5 + (sy as f64 + 0.5) * step;
                if near
                    .iter()
                    .any(|(cx, cy, r)| (px - cx).powi(2) + (py - cy).powi(2) <= r * r)
                {
                    inside += 1;
                }
            }
        }
        let t = inside as f64 / (SUPERSAMPLE * SUPERSAMPLE) as f64;
        (bg as f64 + t * (fg as f64 - bg as f64)).round() as u8
    })
}

/// Project world points through `camera` and render the visible ones as
/// disks of `radius` pixels.
pub fn render_view<C: CameraModel + ?Sized>(
    camera: &C,
    points: &[Point3<f64>],
    size: (usize, usize),
    radius: f64,
    bg: u8,
    fg: u8,
) -> GrayImage {
    let disks: Vec<(f64, f64, f64)> = points
        .iter()
        .filter_map(|p| camera.project(p))
        .map(|p| (p.x, p.y, radius))
        .collect();
    render_disks(size.0, size.1, &disks, bg, fg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_centre_is_foreground_and_corners_background() {
        let img = render_disks(40, 40, &[(20.0, 20.0, 5.0)], 200, 30);
        assert_eq!(img.get(20, 20), 30);
        assert_eq!(img.get(0, 0), 200);
        let edge = img.get(25, 20);
        assert!(edge > 30 && edge < 200, "{edge}");
    }

    #[test]
    fn overlapping_disks_do_not_double_count() {
        let img = render_disks(40, 40, &[(20.0, 20.0, 5.0), (21.0, 20.0, 5.0)], 200, 30);
        assert_eq!(img.get(20, 20), 30);
    }
}
