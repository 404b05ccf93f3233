//! Camera model contract consumed by triangulation and error computation.
//!
//! Calibration itself happens elsewhere; this module only needs a camera that
//! can project world points and map pixels between the distorted (observed)
//! and ideal pinhole image planes.

use nalgebra::{Matrix3, Matrix3x4, Point2, Point3, Rotation3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Projection contract for one calibrated camera.
///
/// Pixel coordinates passed to `undistort` and returned by `project`/`distort`
/// live in the observed (distorted) image. `projection_matrix` acts on the
/// ideal, undistorted image plane.
pub trait CameraModel {
    /// 3x4 projection matrix `P = K [R | t]` mapping world points to ideal pixels.
    fn projection_matrix(&self) -> Matrix3x4<f64>;

    fn has_distortion_model(&self) -> bool;

    /// Ideal pixel -> observed pixel.
    fn distort(&self, p: &Point2<f64>) -> Point2<f64>;

    /// Observed pixel -> ideal pixel.
    fn undistort(&self, p: &Point2<f64>) -> Point2<f64>;

    /// Project a world point into the observed image.
    ///
    /// Returns `None` for points on or behind the camera plane.
    fn project(&self, p: &Point3<f64>) -> Option<Point2<f64>> {
        let x = self.projection_matrix() * p.to_homogeneous();
        if x.z <= f64::EPSILON {
            return None;
        }
        let ideal = Point2::new(x.x / x.z, x.y / x.z);
        Some(if self.has_distortion_model() {
            self.distort(&ideal)
        } else {
            ideal
        })
    }
}

impl<T: CameraModel + ?Sized> CameraModel for &T {
    fn projection_matrix(&self) -> Matrix3x4<f64> {
        (**self).projection_matrix()
    }

    fn has_distortion_model(&self) -> bool {
        (**self).has_distortion_model()
    }

    fn distort(&self, p: &Point2<f64>) -> Point2<f64> {
        (**self).distort(p)
    }

    fn undistort(&self, p: &Point2<f64>) -> Point2<f64> {
        (**self).undistort(p)
    }

    fn project(&self, p: &Point3<f64>) -> Option<Point2<f64>> {
        (**self).project(p)
    }
}

/// Pinhole intrinsics with optional skew.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    #[serde(default)]
    pub skew: f64,
}

impl Intrinsics {
    pub fn k_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, self.skew, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    #[inline]
    fn pixel_to_normalized(&self, p: &Point2<f64>) -> Vector2<f64> {
        let y = (p.y - self.cy) / self.fy;
        let x = (p.x - self.cx - self.skew * y) / self.fx;
        Vector2::new(x, y)
    }

    #[inline]
    fn normalized_to_pixel(&self, n: &Vector2<f64>) -> Point2<f64> {
        Point2::new(
            self.fx * n.x + self.skew * n.y + self.cx,
            self.fy * n.y + self.cy,
        )
    }
}

/// Brown-Conrady radial (k1, k2, k3) + tangential (p1, p2) lens distortion,
/// applied on normalized image coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BrownConrady5 {
    pub k1: f64,
    pub k2: f64,
    pub k3: f64,
    pub p1: f64,
    pub p2: f64,
    /// Fixed-point iterations used by `undistort` (0 selects 8).
    #[serde(default)]
    pub iters: u32,
}

impl BrownConrady5 {
    pub fn distort(&self, n: &Vector2<f64>) -> Vector2<f64> {
        let (x, y) = (n.x, n.y);
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = 1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6;
        let x_tan = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let y_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        Vector2::new(x * radial + x_tan, y * radial + y_tan)
    }

    pub fn undistort(&self, n_dist: &Vector2<f64>) -> Vector2<f64> {
        let iters = if self.iters == 0 { 8 } else { self.iters };
        let mut n = *n_dist;
        for _ in 0..iters {
            let err = self.distort(&n) - n_dist;
            n -= err;
        }
        n
    }

    fn is_identity(&self) -> bool {
        self.k1 == 0.0 && self.k2 == 0.0 && self.k3 == 0.0 && self.p1 == 0.0 && self.p2 == 0.0
    }
}

/// Pinhole camera with world-to-camera pose and optional lens distortion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PinholeCamera {
    pub intrinsics: Intrinsics,
    /// Rotation taking world coordinates into the camera frame.
    pub rotation: Rotation3<f64>,
    /// Translation taking world coordinates into the camera frame.
    pub translation: Vector3<f64>,
    #[serde(default)]
    pub distortion: Option<BrownConrady5>,
}

impl PinholeCamera {
    pub fn new(intrinsics: Intrinsics, rotation: Rotation3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            intrinsics,
            rotation,
            translation,
            distortion: None,
        }
    }

    pub fn with_distortion(mut self, distortion: BrownConrady5) -> Self {
        self.distortion = Some(distortion);
        self
    }

    /// Camera centre in world coordinates.
    pub fn center(&self) -> Point3<f64> {
        Point3::from(-(self.rotation.inverse() * self.translation))
    }
}

impl CameraModel for PinholeCamera {
    fn projection_matrix(&self) -> Matrix3x4<f64> {
        let mut rt = Matrix3x4::zeros();
        rt.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(self.rotation.matrix());
        rt.set_column(3, &self.translation);
        self.intrinsics.k_matrix() * rt
    }

    fn has_distortion_model(&self) -> bool {
        self.distortion.is_some_and(|d| !d.is_identity())
    }

    fn distort(&self, p: &Point2<f64>) -> Point2<f64> {
        match &self.distortion {
            Some(d) => {
                let n = self.intrinsics.pixel_to_normalized(p);
                self.intrinsics.normalized_to_pixel(&d.distort(&n))
            }
            None => *p,
        }
    }

    fn undistort(&self, p: &Point2<f64>) -> Point2<f64> {
        match &self.distortion {
            Some(d) => {
                let n = self.intrinsics.pixel_to_normalized(p);
                self.intrinsics.normalized_to_pixel(&d.undistort(&n))
            }
            None => *p,
        }
    }

    fn project(&self, p: &Point3<f64>) -> Option<Point2<f64>> {
        let pc = self.rotation * p.coords + self.translation;
        if pc.z <= f64::EPSILON {
            return None;
        }
        let n = Vector2::new(pc.x / pc.z, pc.y / pc.z);
        let n = match &self.distortion {
            Some(d) => d.distort(&n),
            None => n,
        };
        Some(self.intrinsics.normalized_to_pixel(&n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn intrinsics() -> Intrinsics {
        Intrinsics {
            fx: 900.0,
            fy: 880.0,
            cx: 320.0,
            cy: 240.0,
            skew: 0.0,
        }
    }

    #[test]
    fn projection_matrix_agrees_with_direct_projection() {
        let cam = PinholeCamera::new(
            intrinsics(),
            Rotation3::from_euler_angles(0.05, -0.1, 0.02),
            Vector3::new(0.1, -0.2, 2.0),
        );
        let pw = Point3::new(0.3, 0.1, 1.5);
        let direct = cam.project(&pw).expect("in front");
        let x = cam.projection_matrix() * pw.to_homogeneous();
        assert_relative_eq!(direct.x, x.x / x.z, epsilon = 1e-9);
        assert_relative_eq!(direct.y, x.y / x.z, epsilon = 1e-9);
    }

    #[test]
    fn points_behind_camera_do_not_project() {
        let cam = PinholeCamera::new(intrinsics(), Rotation3::identity(), Vector3::zeros());
        assert!(cam.project(&Point3::new(0.0, 0.0, -1.0)).is_none());
    }

    #[test]
    fn undistort_inverts_distort() {
        let cam = PinholeCamera::new(intrinsics(), Rotation3::identity(), Vector3::zeros())
            .with_distortion(BrownConrady5 {
                k1: -0.12,
                k2: 0.03,
                k3: 0.0,
                p1: 0.001,
                p2: -0.0005,
                iters: 20,
            });
        assert!(cam.has_distortion_model());
        let ideal = Point2::new(410.0, 170.0);
        let observed = cam.distort(&ideal);
        assert!((observed - ideal).norm() > 0.1);
        let back = cam.undistort(&observed);
        assert_relative_eq!(back.x, ideal.x, epsilon = 1e-6);
        assert_relative_eq!(back.y, ideal.y, epsilon = 1e-6);
    }

    #[test]
    fn camera_center_projects_nowhere_and_origin_is_recovered() {
        let cam = PinholeCamera::new(
            intrinsics(),
            Rotation3::from_euler_angles(0.0, 0.3, 0.0),
            Vector3::new(-0.5, 0.0, 1.0),
        );
        let c = cam.center();
        let pc = cam.rotation * c.coords + cam.translation;
        assert_relative_eq!(pc.norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn camera_round_trips_through_json() {
        let cam = PinholeCamera::new(intrinsics(), Rotation3::identity(), Vector3::new(1.0, 2.0, 3.0));
        let json = serde_json::to_string(&cam).expect("serialize");
        let back: PinholeCamera = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(cam, back);
    }
}
