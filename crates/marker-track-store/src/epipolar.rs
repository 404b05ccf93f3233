//! Epipolar geometry between two calibrated views.

use marker_track_core::CameraModel;
use nalgebra::{Matrix3, Matrix3x4, Point2, Vector3, Vector4};

/// Camera centre as the null vector of `P`, from signed 3x3 minors.
fn null_vector(p: &Matrix3x4<f64>) -> Vector4<f64> {
    let minor = |skip: usize| {
        let cols: Vec<usize> = (0..4).filter(|&c| c != skip).collect();
        Matrix3::from_columns(&[p.column(cols[0]), p.column(cols[1]), p.column(cols[2])]).determinant()
    };
    Vector4::new(minor(0), -minor(1), minor(2), -minor(3))
}

fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y, //
        v.z, 0.0, -v.x, //
        -v.y, v.x, 0.0,
    )
}

/// Fundamental matrix mapping ideal points of view 1 to lines in view 2:
/// `F = [e₂]ₓ P₂ P₁⁺`.
pub fn fundamental_from_projections(p1: &Matrix3x4<f64>, p2: &Matrix3x4<f64>) -> Option<Matrix3<f64>> {
    let c1 = null_vector(p1);
    if c1.norm() <= f64::EPSILON {
        return None;
    }
    let e2 = p2 * c1;
    let pinv = p1.transpose() * (p1 * p1.transpose()).try_inverse()?;
    let f = skew(&e2) * p2 * pinv;
    let n = f.norm();
    (n.is_finite() && n > f64::EPSILON).then(|| f / n)
}

/// Sample the epipolar line `l` across an image of `size` (ideal pixels),
/// then map each sample into the observed image.
///
/// Steep lines are sampled along y, shallow ones along x.
pub fn sample_line<C: CameraModel + ?Sized>(
    line: &Vector3<f64>,
    camera: &C,
    size: (u32, u32),
    samples: usize,
) -> Vec<Point2<f64>> {
    let (a, b, c) = (line.x, line.y, line.z);
    let samples = samples.max(2);
    let along_x = b.abs() >= a.abs();
    let extent = if along_x { size.0 } else { size.1 } as f64 - 1.0;
    if (a.abs() <= f64::EPSILON && b.abs() <= f64::EPSILON) || extent < 0.0 {
        return Vec::new();
    }
    let distort = camera.has_distortion_model();
    (0..samples)
        .map(|i| {
            let s = extent * i as f64 / (samples - 1) as f64;
            let ideal = if along_x {
                Point2::new(s, -(a * s + c) / b)
            } else {
                Point2::new(-(b * s + c) / a, s)
            };
            if distort {
                camera.distort(&ideal)
            } else {
                ideal
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use marker_track_core::{BrownConrady5, Intrinsics, PinholeCamera};
    use nalgebra::{Point3, Rotation3};

    fn k() -> Intrinsics {
        Intrinsics {
            fx: 700.0,
            fy: 700.0,
            cx: 320.0,
            cy: 240.0,
            skew: 0.0,
        }
    }

    #[test]
    fn null_vector_is_camera_centre() {
        let cam = PinholeCamera::new(
            k(),
            Rotation3::from_euler_angles(0.1, -0.2, 0.05),
            Vector3::new(0.3, -0.1, 2.0),
        );
        let c = null_vector(&cam.projection_matrix());
        let centre = cam.center();
        assert!((c.xyz() / c.w - centre.coords).norm() < 1e-9);
    }

    #[test]
    fn corresponding_points_satisfy_epipolar_constraint() {
        let c1 = PinholeCamera::new(k(), Rotation3::identity(), Vector3::new(0.0, 0.0, 3.0));
        let c2 = PinholeCamera::new(
            k(),
            Rotation3::from_euler_angles(0.0, -0.3, 0.0),
            Vector3::new(-0.8, 0.1, 3.2),
        );
        let f = fundamental_from_projections(&c1.projection_matrix(), &c2.projection_matrix()).unwrap();
        for x in [Point3::new(0.1, 0.2, 0.0), Point3::new(-0.3, 0.05, 0.4)] {
            let a = c1.project(&x).unwrap().to_homogeneous();
            let b = c2.project(&x).unwrap().to_homogeneous();
            let line = f * a;
            let dist = b.dot(&line).abs() / line.xy().norm();
            assert!(dist < 1e-6, "{dist}");
        }
    }

    #[test]
    fn sampled_line_passes_through_the_match() {
        let c1 = PinholeCamera::new(k(), Rotation3::identity(), Vector3::new(0.0, 0.0, 3.0));
        let c2 = PinholeCamera::new(k(), Rotation3::identity(), Vector3::new(-0.5, 0.0, 3.0));
        let f = fundamental_from_projections(&c1.projection_matrix(), &c2.projection_matrix()).unwrap();
        let x = Point3::new(0.05, 0.1, 0.0);
        let a = c1.project(&x).unwrap();
        let line = f * a.to_homogeneous();
        let pts = sample_line(&line, &c2, (640, 480), 11);
        assert_eq!(pts.len(), 11);
        assert_eq!(pts[0].x, 0.0);
        assert_eq!(pts[10].x, 639.0);
        // Pure x translation: horizontal line at the same row.
        for p in &pts {
            assert!((p.y - a.y).abs() < 1e-6, "{p:?}");
        }
    }

    #[test]
    fn distortion_bends_samples() {
        let c1 = PinholeCamera::new(k(), Rotation3::identity(), Vector3::new(0.0, 0.0, 3.0));
        let c2 = PinholeCamera::new(k(), Rotation3::identity(), Vector3::new(-0.5, 0.0, 3.0))
            .with_distortion(BrownConrady5 {
                k1: -0.2,
                ..BrownConrady5::default()
            });
        let f = fundamental_from_projections(&c1.projection_matrix(), &c2.projection_matrix()).unwrap();
        let line = f * Point2::new(320.0, 100.0).to_homogeneous();
        let pts = sample_line(&line, &c2, (640, 480), 5);
        let ys: Vec<f64> = pts.iter().map(|p| p.y).collect();
        assert!(ys.iter().any(|&y| (y - ys[0]).abs() > 1.0), "{ys:?}");
    }
}
