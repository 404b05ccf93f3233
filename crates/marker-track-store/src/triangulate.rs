//! Multi-view triangulation on undistorted pixel coordinates.
//!
//! Two views use the linear DLT solution directly. With three or more views
//! the DLT point seeds a Gauss-Newton minimisation of the summed squared
//! reprojection error.

use nalgebra::{DMatrix, Matrix3, Matrix3x4, Point2, Point3, RowVector3, Vector3};

const GAUSS_NEWTON_ITERS: usize = 10;

/// Linear triangulation: the right singular vector of the stacked
/// `u P₃ - P₁`, `v P₃ - P₂` rows.
pub fn triangulate_dlt(projections: &[Matrix3x4<f64>], points: &[Point2<f64>]) -> Option<Point3<f64>> {
    if projections.len() < 2 || projections.len() != points.len() {
        return None;
    }
    let mut a = DMatrix::<f64>::zeros(2 * projections.len(), 4);
    for (i, (p, cam)) in points.iter().zip(projections).enumerate() {
        let row0 = p.x * cam.row(2) - cam.row(0);
        let row1 = p.y * cam.row(2) - cam.row(1);
        // Unit rows keep views with large pixel coordinates from dominating.
        let n0 = row0.norm();
        let n1 = row1.norm();
        if n0 <= f64::EPSILON || n1 <= f64::EPSILON {
            return None;
        }
        a.row_mut(2 * i).copy_from(&(row0 / n0));
        a.row_mut(2 * i + 1).copy_from(&(row1 / n1));
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let x_h = v_t.row(v_t.nrows() - 1);
    let w = x_h[3];
    if w.abs() <= f64::EPSILON {
        return None;
    }
    let p = Point3::new(x_h[0] / w, x_h[1] / w, x_h[2] / w);
    p.coords.iter().all(|v| v.is_finite()).then_some(p)
}

/// Summed squared pixel residual of `x` over all views, `None` if any view
/// sees it on or behind the camera plane.
pub fn reprojection_cost(projections: &[Matrix3x4<f64>], points: &[Point2<f64>], x: &Point3<f64>) -> Option<f64> {
    let xh = x.to_homogeneous();
    let mut cost = 0.0;
    for (cam, p) in projections.iter().zip(points) {
        let h = cam * xh;
        if h.z <= f64::EPSILON {
            return None;
        }
        cost += (h.x / h.z - p.x).powi(2) + (h.y / h.z - p.y).powi(2);
    }
    Some(cost)
}

/// Gauss-Newton on the 3D point. Steps that do not lower the cost end the
/// iteration, so the result is never worse than `seed`.
pub fn refine_gauss_newton(
    projections: &[Matrix3x4<f64>],
    points: &[Point2<f64>],
    seed: Point3<f64>,
) -> Point3<f64> {
    let Some(mut best_cost) = reprojection_cost(projections, points, &seed) else {
        return seed;
    };
    let mut x = seed;
    for _ in 0..GAUSS_NEWTON_ITERS {
        let xh = x.to_homogeneous();
        let mut jtj = Matrix3::<f64>::zeros();
        let mut jtr = Vector3::<f64>::zeros();
        for (cam, p) in projections.iter().zip(points) {
            let h = cam * xh;
            let (u, v) = (h.x / h.z, h.y / h.z);
            let p0 = RowVector3::new(cam[(0, 0)], cam[(0, 1)], cam[(0, 2)]);
            let p1 = RowVector3::new(cam[(1, 0)], cam[(1, 1)], cam[(1, 2)]);
            let p2 = RowVector3::new(cam[(2, 0)], cam[(2, 1)], cam[(2, 2)]);
            let ju = (p0 - u * p2) / h.z;
            let jv = (p1 - v * p2) / h.z;
            jtj += ju.transpose() * ju + jv.transpose() * jv;
            jtr += ju.transpose() * (u - p.x) + jv.transpose() * (v - p.y);
        }
        let Some(step) = jtj.cholesky().map(|c| c.solve(&jtr)) else {
            break;
        };
        let candidate = x - step;
        match reprojection_cost(projections, points, &candidate) {
            Some(cost) if cost < best_cost => {
                let gain = best_cost - cost;
                x = candidate;
                best_cost = cost;
                if gain <= 1e-12 * best_cost.max(1e-12) {
                    break;
                }
            }
            _ => break,
        }
    }
    x
}

/// Triangulate from ideal (undistorted) pixel positions.
#[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all, fields(views = points.len())))]
pub fn triangulate(projections: &[Matrix3x4<f64>], points: &[Point2<f64>]) -> Option<Point3<f64>> {
    let seed = triangulate_dlt(projections, points)?;
    if projections.len() == 2 {
        return Some(seed);
    }
    Some(refine_gauss_newton(projections, points, seed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use marker_track_core::{CameraModel, Intrinsics, PinholeCamera};
    use nalgebra::{Rotation3, Vector3};

    fn rig() -> Vec<PinholeCamera> {
        let k = Intrinsics {
            fx: 800.0,
            fy: 800.0,
            cx: 320.0,
            cy: 240.0,
            skew: 0.0,
        };
        vec![
            PinholeCamera::new(k, Rotation3::identity(), Vector3::new(0.0, 0.0, 4.0)),
            PinholeCamera::new(k, Rotation3::from_euler_angles(0.0, -0.4, 0.0), Vector3::new(-1.0, 0.0, 4.2)),
            PinholeCamera::new(k, Rotation3::from_euler_angles(0.3, 0.2, 0.0), Vector3::new(0.5, -0.8, 3.8)),
        ]
    }

    fn observe(cams: &[PinholeCamera], x: &Point3<f64>) -> (Vec<Matrix3x4<f64>>, Vec<Point2<f64>>) {
        let ps = cams.iter().map(|c| c.projection_matrix()).collect();
        let pts = cams.iter().map(|c| c.project(x).unwrap()).collect();
        (ps, pts)
    }

    #[test]
    fn two_view_dlt_recovers_point() {
        let cams = rig();
        let x = Point3::new(0.2, -0.1, 0.3);
        let (ps, pts) = observe(&cams[..2], &x);
        let est = triangulate(&ps, &pts).expect("point");
        assert_relative_eq!(est, x, epsilon = 1e-6);
    }

    #[test]
    fn gauss_newton_does_not_increase_cost_on_noisy_views() {
        let cams = rig();
        let x = Point3::new(-0.1, 0.25, 0.1);
        let (ps, mut pts) = observe(&cams, &x);
        pts[0].x += 0.8;
        pts[1].y -= 0.6;
        pts[2].x -= 0.4;
        let seed = triangulate_dlt(&ps, &pts).unwrap();
        let refined = triangulate(&ps, &pts).unwrap();
        let c_seed = reprojection_cost(&ps, &pts, &seed).unwrap();
        let c_ref = reprojection_cost(&ps, &pts, &refined).unwrap();
        assert!(c_ref <= c_seed, "{c_ref} > {c_seed}");
        assert!((refined - x).norm() < 0.01);
    }

    #[test]
    fn single_view_is_rejected() {
        let cams = rig();
        let (ps, pts) = observe(&cams[..1], &Point3::new(0.0, 0.0, 0.0));
        assert!(triangulate(&ps, &pts).is_none());
        assert!(triangulate(&ps, &[]).is_none());
    }
}
