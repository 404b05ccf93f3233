//! Multi-threshold blob detector.
//!
//! The patch is binarised at a ladder of thresholds; components passing the
//! shape filters at each level are grouped across levels by centre distance,
//! and groups seen at enough levels become keypoints.

use marker_track_core::{GrayImage, SubImage};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::contours::{convex_hull, label_components, polygon_area, polygon_moments, polygon_perimeter};
use crate::params::BlobDetectorParams;
use crate::strategy::{nearest, Locate, LocateContext, Located};
use crate::DetectError;

/// Blob keypoint in patch-local coordinates. `size` is a diameter.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlobKeypoint {
    pub x: f64,
    pub y: f64,
    pub size: f64,
    /// Number of threshold levels the blob was found at.
    pub repeats: usize,
}

#[derive(Clone, Copy, Debug)]
struct LevelBlob {
    x: f64,
    y: f64,
    radius: f64,
}

pub struct BlobLocator<'a> {
    pub params: &'a BlobDetectorParams,
    pub inverted: bool,
}

impl Locate for BlobLocator<'_> {
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "trace", skip_all, fields(inverted = self.inverted))
    )]
    fn locate(&self, patch: &SubImage, ctx: &LocateContext) -> Result<Option<Located>, DetectError> {
        let mut gray = patch.image.clone();
        if self.inverted {
            gray.invert();
        }
        let keypoints = detect_blobs(&gray, self.params);
        log::trace!("blob: {} keypoints", keypoints.len());
        let candidates = keypoints.into_iter().map(|k| {
            let (fx, fy) = patch.to_frame(k.x, k.y);
            Located {
                center: Point2::new(fx, fy),
                radius: k.size,
            }
        });
        Ok(nearest(candidates, ctx.predicted))
    }
}

fn in_range(v: f64, lo: f64, hi: f64) -> bool {
    v >= lo && v < hi
}

fn blobs_at_level(gray: &GrayImage, thresh: f64, p: &BlobDetectorParams) -> Vec<LevelBlob> {
    let (w, h) = (gray.width, gray.height);
    let dark = !p.filter_by_color || p.blob_color == 0;
    let bright = !p.filter_by_color || p.blob_color != 0;

    let mut out = Vec::new();
    for polarity_dark in [true, false] {
        if (polarity_dark && !dark) || (!polarity_dark && !bright) {
            continue;
        }
        let mask: Vec<bool> = gray
            .data
            .iter()
            .map(|&v| ((v as f64) <= thresh) == polarity_dark)
            .collect();
        let components = label_components(&mask, w, h);
        for contour in components.contours() {
            let m = polygon_moments(&contour);
            let Some((cx, cy)) = m.centroid() else {
                continue;
            };
            if p.filter_by_color {
                // The contour ignores holes: a ring around an opposite-colour
                // region has its centroid outside the mask.
                let (ix, iy) = (cx.round(), cy.round());
                let inside = ix >= 0.0
                    && iy >= 0.0
                    && (ix as usize) < w
                    && (iy as usize) < h
                    && mask[iy as usize * w + ix as usize];
                if !inside {
                    continue;
                }
            }
            if p.filter_by_area && !in_range(m.m00, p.min_area, p.max_area) {
                continue;
            }
            if p.filter_by_circularity {
                let perimeter = polygon_perimeter(&contour);
                let circularity = 4.0 * std::f64::consts::PI * m.m00 / (perimeter * perimeter);
                if !in_range(circularity, p.min_circularity, p.max_circularity) {
                    continue;
                }
            }
            if p.filter_by_inertia
                && !in_range(m.inertia_ratio(), p.min_inertia_ratio, p.max_inertia_ratio)
            {
                continue;
            }
            if p.filter_by_convexity {
                let hull_area = polygon_area(&convex_hull(&contour));
                if hull_area <= 0.0 || !in_range(m.m00 / hull_area, p.min_convexity, p.max_convexity) {
                    continue;
                }
            }

            let mut dists: Vec<f64> = contour
                .iter()
                .map(|&(x, y)| (x as f64 - cx).hypot(y as f64 - cy))
                .collect();
            dists.sort_by(f64::total_cmp);
            let radius = if dists.len() % 2 == 1 {
                dists[dists.len() / 2]
            } else {
                0.5 * (dists[dists.len() / 2 - 1] + dists[dists.len() / 2])
            };
            out.push(LevelBlob {
                x: cx,
                y: cy,
                radius,
            });
        }
    }
    out
}

/// Run the full threshold ladder over an 8-bit patch.
pub fn detect_blobs(gray: &GrayImage, p: &BlobDetectorParams) -> Vec<BlobKeypoint> {
    let step = if p.threshold_step > 0.0 {
        p.threshold_step
    } else {
        1.0
    };
    let mut groups: Vec<Vec<LevelBlob>> = Vec::new();
    let mut t = p.min_threshold;
    while t < p.max_threshold {
        let level = blobs_at_level(gray, t, p);
        let mut fresh = Vec::new();
        for blob in level {
            let mut matched = false;
            for group in groups.iter_mut() {
                let Some(last) = group.last() else {
                    continue;
                };
                let median_radius = group[group.len() / 2].radius;
                let d = (last.x - blob.x).hypot(last.y - blob.y);
                let gap = p.min_dist_between_blobs.max(median_radius).max(blob.radius);
                if d < gap {
                    group.push(blob);
                    // Keep each group sorted by radius so the median is cheap.
                    let mut k = group.len() - 1;
                    while k > 0 && group[k].radius < group[k - 1].radius {
                        group.swap(k, k - 1);
                        k -= 1;
                    }
                    matched = true;
                    break;
                }
            }
            if !matched {
                fresh.push(vec![blob]);
            }
        }
        groups.extend(fresh);
        t += step;
    }

    groups
        .into_iter()
        .filter(|g| g.len() >= p.min_repeatability.max(1))
        .map(|g| {
            let n = g.len() as f64;
            let x = g.iter().map(|b| b.x).sum::<f64>() / n;
            let y = g.iter().map(|b| b.y).sum::<f64>() / n;
            BlobKeypoint {
                x,
                y,
                size: 2.0 * g[g.len() / 2].radius,
                repeats: g.len(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{dark_disk, patch_around};

    #[test]
    fn dark_disk_is_found_across_thresholds() {
        let img = dark_disk(60, 60, 30.4, 29.3, 6.0, 230, 30);
        let kps = detect_blobs(&img, &BlobDetectorParams::default());
        assert_eq!(kps.len(), 1, "{kps:?}");
        let k = kps[0];
        assert!((k.x - 30.4).abs() < 0.5 && (k.y - 29.3).abs() < 0.5, "{k:?}");
        assert!(k.size > 8.0 && k.size < 14.0, "{k:?}");
        assert!(k.repeats >= 2);
    }

    #[test]
    fn area_filter_rejects_small_specks() {
        let img = dark_disk(60, 60, 30.0, 30.0, 1.2, 230, 30);
        let params = BlobDetectorParams {
            min_area: 40.0,
            ..BlobDetectorParams::default()
        };
        assert!(detect_blobs(&img, &params).is_empty());
    }

    #[test]
    fn white_blob_needs_inverted_locator() {
        let img = dark_disk(80, 80, 41.2, 38.9, 6.0, 25, 225);
        let patch = patch_around(&img, 40.0, 40.0, 15);
        let params = BlobDetectorParams::default();
        let ctx = LocateContext {
            predicted: Point2::new(40.0, 40.0),
            size: 6.0,
            threshold_offset: 8.0,
        };
        let plain = BlobLocator {
            params: &params,
            inverted: false,
        };
        assert!(plain.locate(&patch, &ctx).unwrap().is_none());

        let inverted = BlobLocator {
            params: &params,
            inverted: true,
        };
        let found = inverted.locate(&patch, &ctx).unwrap().expect("white blob");
        assert!((found.center - Point2::new(41.2, 38.9)).norm() < 0.5, "{found:?}");
    }
}
