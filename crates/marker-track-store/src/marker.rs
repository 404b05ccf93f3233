//! Per-marker observation store.
//!
//! A [`Marker`] holds one tracked feature across every camera and frame: the
//! 2D observation grid, the per-frame 3D series and the size statistics the
//! detector uses to choose its search window.

use std::ops::Range;

use log::debug;
use marker_track_core::CameraModel;
use marker_track_detect::{Detection, DetectionMethod, DetectionRequest};
use nalgebra::{Point2, Point3, Vector3};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::epipolar::{fundamental_from_projections, sample_line};
use crate::interpolation::{fill_gaps, InterpolationMethod};
use crate::prediction::predict_position;
use crate::triangulate::triangulate;
use crate::{DetectionMode, Grid, MarkerStatus, StoreError, WritePolicy};

/// Size used when nothing better is known.
pub const DEFAULT_MARKER_SIZE: f64 = 5.0;

const MIN_SEARCH_RADIUS: u32 = 10;

/// User-facing marker settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerConfig {
    pub method: DetectionMethod,
    /// Threshold shift in percent of the intensity range.
    pub threshold_offset: f64,
    /// Fixed feature size replacing the measured mean.
    pub size_override: Option<f64>,
    /// Stored for external acceptance logic.
    pub max_penalty: f64,
    pub description: String,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            method: DetectionMethod::default(),
            threshold_offset: 8.0,
            size_override: None,
            max_penalty: 125.0,
            description: String::new(),
        }
    }
}

/// One (camera, frame) cell.
///
/// `error` and `projection` are only present while both this cell and the
/// frame's 3D point are defined, and the point lies in front of the camera.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Observation {
    pub point: Point2<f64>,
    pub status: MarkerStatus,
    pub error: Option<f64>,
    pub projection: Option<Point2<f64>>,
    /// Radius reported by the detector.
    pub size: Option<f64>,
}

impl Default for Observation {
    fn default() -> Self {
        Self {
            point: Point2::origin(),
            status: MarkerStatus::Undefined,
            error: None,
            projection: None,
            size: None,
        }
    }
}

impl Observation {
    #[inline]
    pub fn is_defined(&self) -> bool {
        self.status.is_defined()
    }

    fn clear_error(&mut self) {
        self.error = None;
        self.projection = None;
    }
}

/// 3D state of one frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct FrameState {
    pub point: Point3<f64>,
    pub status: MarkerStatus,
    pub interpolation: InterpolationMethod,
    /// 2D data changed since the last reconstruction.
    pub dirty: bool,
}

impl Default for FrameState {
    fn default() -> Self {
        Self {
            point: Point3::origin(),
            status: MarkerStatus::Undefined,
            interpolation: InterpolationMethod::None,
            dirty: false,
        }
    }
}

/// Summary of reprojection errors. `stddev` is the population deviation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorStats {
    pub mean: f64,
    pub stddev: f64,
    pub count: usize,
}

impl ErrorStats {
    pub fn from_samples(samples: impl IntoIterator<Item = f64>) -> Option<Self> {
        let (mut n, mut sum, mut sum_sq) = (0usize, 0.0, 0.0);
        for v in samples {
            n += 1;
            sum += v;
            sum_sq += v * v;
        }
        if n == 0 {
            return None;
        }
        let mean = sum / n as f64;
        let var = (sum_sq / n as f64 - mean * mean).max(0.0);
        Some(Self {
            mean,
            stddev: var.sqrt(),
            count: n,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Marker {
    config: MarkerConfig,
    observations: Grid<Observation>,
    frames: Vec<FrameState>,
    reference_point: Option<Point3<f64>>,
    mean_size: Option<f64>,
    size_range: Option<f64>,
    has_interpolation: bool,
}

impl Marker {
    pub fn new(cameras: usize, frames: usize) -> Self {
        Self::with_config(cameras, frames, MarkerConfig::default())
    }

    pub fn with_config(cameras: usize, frames: usize, config: MarkerConfig) -> Self {
        Self {
            config,
            observations: Grid::new(cameras, frames),
            frames: vec![FrameState::default(); frames],
            reference_point: None,
            mean_size: None,
            size_range: None,
            has_interpolation: false,
        }
    }

    pub fn config(&self) -> &MarkerConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut MarkerConfig {
        &mut self.config
    }

    pub fn cameras(&self) -> usize {
        self.observations.cameras()
    }

    pub fn frames(&self) -> usize {
        self.frames.len()
    }

    /// Grow or truncate to a new camera/frame count, keeping existing data.
    pub fn resize(&mut self, cameras: usize, frames: usize) {
        self.observations.resize(cameras, frames);
        self.frames.resize(frames, FrameState::default());
        self.update_has_interpolation();
    }

    fn frame_state(&self, frame: usize) -> Result<&FrameState, StoreError> {
        self.frames.get(frame).ok_or(StoreError::FrameOutOfRange {
            frame,
            frames: self.frames.len(),
        })
    }

    fn frame_state_mut(&mut self, frame: usize) -> Result<&mut FrameState, StoreError> {
        let frames = self.frames.len();
        self.frames
            .get_mut(frame)
            .ok_or(StoreError::FrameOutOfRange { frame, frames })
    }

    fn check_cameras<C>(&self, cameras: &[C]) -> Result<(), StoreError> {
        if cameras.len() != self.cameras() {
            return Err(StoreError::CameraCountMismatch {
                expected: self.cameras(),
                got: cameras.len(),
            });
        }
        Ok(())
    }

    // ---- read accessors ----

    pub fn observation(&self, camera: usize, frame: usize) -> Result<&Observation, StoreError> {
        self.observations.get(camera, frame)
    }

    /// The observed point, if its status is defined.
    pub fn point_2d(&self, camera: usize, frame: usize) -> Result<Option<Point2<f64>>, StoreError> {
        let obs = self.observations.get(camera, frame)?;
        Ok(obs.is_defined().then_some(obs.point))
    }

    pub fn status_2d(&self, camera: usize, frame: usize) -> Result<MarkerStatus, StoreError> {
        Ok(self.observations.get(camera, frame)?.status)
    }

    pub fn error_2d(&self, camera: usize, frame: usize) -> Result<Option<f64>, StoreError> {
        Ok(self.observations.get(camera, frame)?.error)
    }

    pub fn projected_2d(&self, camera: usize, frame: usize) -> Result<Option<Point2<f64>>, StoreError> {
        Ok(self.observations.get(camera, frame)?.projection)
    }

    pub fn marker_size(&self, camera: usize, frame: usize) -> Result<Option<f64>, StoreError> {
        Ok(self.observations.get(camera, frame)?.size)
    }

    pub fn point_3d(&self, frame: usize) -> Result<Option<Point3<f64>>, StoreError> {
        let state = self.frame_state(frame)?;
        Ok(state.status.is_defined().then_some(state.point))
    }

    pub fn status_3d(&self, frame: usize) -> Result<MarkerStatus, StoreError> {
        Ok(self.frame_state(frame)?.status)
    }

    pub fn interpolation(&self, frame: usize) -> Result<InterpolationMethod, StoreError> {
        Ok(self.frame_state(frame)?.interpolation)
    }

    pub fn frame(&self, frame: usize) -> Result<&FrameState, StoreError> {
        self.frame_state(frame)
    }

    /// Frames whose 2D data changed since they were last reconstructed.
    pub fn dirty_frames(&self) -> impl Iterator<Item = usize> + '_ {
        self.frames
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.dirty.then_some(i))
    }

    pub fn reference_point(&self) -> Option<Point3<f64>> {
        self.reference_point
    }

    pub fn set_reference_point(&mut self, point: Option<Point3<f64>>) {
        self.reference_point = point;
    }

    pub fn mean_size(&self) -> Option<f64> {
        self.mean_size
    }

    /// Standard deviation of the measured sizes.
    pub fn size_range(&self) -> Option<f64> {
        self.size_range
    }

    pub fn has_interpolation(&self) -> bool {
        self.has_interpolation
    }

    // ---- 2D writes ----

    /// Unconditional write from a user action. Clears the cell's error and
    /// flags the frame for reconstruction.
    pub fn set_point(
        &mut self,
        camera: usize,
        frame: usize,
        point: Point2<f64>,
        status: MarkerStatus,
    ) -> Result<(), StoreError> {
        let obs = self.observations.get_mut(camera, frame)?;
        obs.point = point;
        obs.status = status;
        obs.clear_error();
        self.frame_state_mut(frame)?.dirty = true;
        Ok(())
    }

    /// Automated write of a detector result. Returns `false` when the cell's
    /// current status is above the policy ceiling or terminal.
    pub fn write_detection(
        &mut self,
        camera: usize,
        frame: usize,
        detection: &Detection,
        mode: DetectionMode,
        policy: &WritePolicy,
    ) -> Result<bool, StoreError> {
        let obs = self.observations.get_mut(camera, frame)?;
        if !policy.allows(obs.status) {
            debug!(
                "cam {camera} frame {frame}: keeping {:?} (ceiling {:?})",
                obs.status, policy.max_overwrite
            );
            return Ok(false);
        }
        obs.point = detection.center;
        obs.status = mode.status();
        obs.size = Some(detection.radius);
        obs.clear_error();
        self.frame_state_mut(frame)?.dirty = true;
        Ok(true)
    }

    /// Mark a cell as refined by an external optimiser. A triangulated 3D
    /// status follows the promoted cells.
    pub fn promote_optimized(&mut self, camera: usize, frame: usize) -> Result<bool, StoreError> {
        let obs = self.observations.get_mut(camera, frame)?;
        let Some(next) = obs.status.optimized() else {
            return Ok(false);
        };
        obs.status = next;
        if self.frame_state(frame)?.status.is_measured() {
            let lowest = self
                .observations
                .frame(frame)
                .map(|o| o.status)
                .filter(|s| s.is_measured())
                .min();
            if let Some(status) = lowest {
                self.frame_state_mut(frame)?.status = status;
            }
        }
        Ok(true)
    }

    /// User reset of several frames of one camera to `Undefined` or
    /// `Untrackable`. This is the only path that clears terminal cells.
    pub fn reset_multiple_frames(
        &mut self,
        camera: usize,
        frames: impl IntoIterator<Item = usize>,
        status: MarkerStatus,
    ) -> Result<(), StoreError> {
        if !matches!(status, MarkerStatus::Undefined | MarkerStatus::Untrackable) {
            return Err(StoreError::InvalidResetStatus(status));
        }
        let frames: Vec<usize> = frames.into_iter().collect();
        for &f in &frames {
            self.observations.get(camera, f)?;
        }
        for f in frames {
            let obs = self.observations.get_mut(camera, f)?;
            *obs = Observation {
                status,
                ..Observation::default()
            };
            self.frame_state_mut(f)?.dirty = true;
        }
        Ok(())
    }

    // ---- 3D ----

    /// Triangulate one frame from every camera with a measured 2D point and
    /// refresh that frame's reprojection errors.
    ///
    /// Interpolated and predicted cells never contribute. The 3D status is
    /// the lowest contributing 2D status, or `Undefined` with fewer than two
    /// measured views or a failed solve; such frames are left to
    /// [`Marker::interpolate`].
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self, cameras)))]
    pub fn reconstruct_3d_point<C: CameraModel>(
        &mut self,
        frame: usize,
        cameras: &[C],
    ) -> Result<MarkerStatus, StoreError> {
        self.check_cameras(cameras)?;
        self.frame_state(frame)?;

        let mut projections = Vec::new();
        let mut points = Vec::new();
        let mut status = MarkerStatus::ManualAndOptimized;
        for (cam, model) in cameras.iter().enumerate() {
            let obs = self.observations.get(cam, frame)?;
            if !obs.status.is_measured() {
                continue;
            }
            projections.push(model.projection_matrix());
            points.push(if model.has_distortion_model() {
                model.undistort(&obs.point)
            } else {
                obs.point
            });
            status = status.min(obs.status);
        }

        let solved = if points.len() >= 2 {
            triangulate(&projections, &points)
        } else {
            None
        };
        let state = self.frame_state_mut(frame)?;
        state.dirty = false;
        match solved {
            Some(p) => {
                state.point = p;
                state.status = status;
            }
            None => {
                if points.len() >= 2 {
                    debug!("frame {frame}: triangulation from {} views failed", points.len());
                }
                state.point = Point3::origin();
                state.status = MarkerStatus::Undefined;
            }
        }
        let status = state.status;
        self.update_error(frame, cameras)?;
        Ok(status)
    }

    /// Reconstruct every frame flagged as changed. Returns how many ran.
    pub fn reconstruct_all<C: CameraModel>(&mut self, cameras: &[C]) -> Result<usize, StoreError> {
        self.check_cameras(cameras)?;
        let dirty: Vec<usize> = self.dirty_frames().collect();
        for &f in &dirty {
            self.reconstruct_3d_point(f, cameras)?;
        }
        Ok(dirty.len())
    }

    /// Recompute error and reprojection for every camera at `frame`.
    ///
    /// A camera that sees the 3D point behind it gets no error even when
    /// both statuses are defined.
    pub fn update_error<C: CameraModel>(&mut self, frame: usize, cameras: &[C]) -> Result<(), StoreError> {
        self.check_cameras(cameras)?;
        let state = *self.frame_state(frame)?;
        for (cam, model) in cameras.iter().enumerate() {
            let obs = self.observations.get_mut(cam, frame)?;
            obs.clear_error();
            if !(obs.is_defined() && state.status.is_defined()) {
                continue;
            }
            match model.project(&state.point) {
                Some(proj) => {
                    obs.error = Some((proj - obs.point).norm());
                    obs.projection = Some(proj);
                }
                None => debug!("frame {frame}: point is behind camera {cam}"),
            }
        }
        Ok(())
    }

    /// Error statistics over all cameras for frames in `range`.
    pub fn reprojection_error(&self, range: Range<usize>) -> Option<ErrorStats> {
        let range = range.start.min(self.frames())..range.end.min(self.frames());
        ErrorStats::from_samples((0..self.cameras()).flat_map(|cam| {
            let range = range.clone();
            range.filter_map(move |f| self.observations.get(cam, f).ok().and_then(|o| o.error))
        }))
    }

    pub fn reprojection_error_for_camera(
        &self,
        camera: usize,
        range: Range<usize>,
    ) -> Result<Option<ErrorStats>, StoreError> {
        let row = self.observations.camera(camera)?;
        let end = range.end.min(row.len());
        let start = range.start.min(end);
        Ok(ErrorStats::from_samples(row[start..end].iter().filter_map(|o| o.error)))
    }

    /// Epipolar curve of the origin camera's point, sampled across the
    /// destination image. `None` if the origin point is undefined.
    pub fn epipolar_line<C: CameraModel>(
        &self,
        cam_origin: usize,
        cam_dest: usize,
        frame: usize,
        cameras: &[C],
        image_size: (u32, u32),
        samples: usize,
    ) -> Result<Option<Vec<Point2<f64>>>, StoreError> {
        self.check_cameras(cameras)?;
        if cam_origin == cam_dest {
            return Err(StoreError::SameCamera(cam_origin));
        }
        self.observations.get(cam_dest, frame)?;
        let Some(origin) = self.point_2d(cam_origin, frame)? else {
            return Ok(None);
        };
        let (src, dst) = (&cameras[cam_origin], &cameras[cam_dest]);
        let ideal = if src.has_distortion_model() {
            src.undistort(&origin)
        } else {
            origin
        };
        let Some(f) = fundamental_from_projections(&src.projection_matrix(), &dst.projection_matrix()) else {
            return Ok(None);
        };
        let line = f * ideal.to_homogeneous();
        Ok(Some(sample_line(&line, dst, image_size, samples)))
    }

    // ---- size ----

    /// Recompute mean size and spread from every defined cell with a size.
    pub fn update_marker_size(&mut self) {
        let stats = ErrorStats::from_samples(
            self.observations
                .iter()
                .filter(|o| o.is_defined())
                .filter_map(|o| o.size),
        );
        self.mean_size = stats.map(|s| s.mean);
        self.size_range = stats.map(|s| s.stddev);
    }

    pub fn effective_size(&self) -> f64 {
        self.config
            .size_override
            .or(self.mean_size)
            .unwrap_or(DEFAULT_MARKER_SIZE)
    }

    pub fn search_radius_hint(&self) -> u32 {
        let r = (3.0 * self.effective_size()).ceil();
        if r.is_finite() && r > 0.0 {
            (r as u32).max(MIN_SEARCH_RADIUS)
        } else {
            MIN_SEARCH_RADIUS
        }
    }

    // ---- prediction & interpolation ----

    /// Predicted 2D position at `frame` from this camera's history.
    pub fn marker_prediction(
        &self,
        camera: usize,
        frame: usize,
        forward: bool,
    ) -> Result<Option<Point2<f64>>, StoreError> {
        self.observations.get(camera, frame)?;
        let row = self.observations.camera(camera)?;
        Ok(predict_position(
            |f| row.get(f).filter(|o| o.is_defined()).map(|o| o.point),
            row.len(),
            frame,
            forward,
        ))
    }

    /// Detector request for a cell built from the prediction and marker
    /// settings. `None` without any history to predict from.
    ///
    /// In [`DetectionMode::RefineAfterSet`] a `Set` cell is searched around
    /// its own clicked point. Writing the result back needs a policy ceiling
    /// of at least `Set`, see [`WritePolicy::refine_after_set`].
    pub fn detection_request(
        &self,
        camera: usize,
        frame: usize,
        forward: bool,
        mode: DetectionMode,
    ) -> Result<Option<DetectionRequest>, StoreError> {
        let obs = self.observations.get(camera, frame)?;
        let clicked = (mode == DetectionMode::RefineAfterSet && obs.status == MarkerStatus::Set)
            .then_some(obs.point);
        let Some(center) = clicked.or(self.marker_prediction(camera, frame, forward)?) else {
            return Ok(None);
        };
        Ok(Some(DetectionRequest {
            center,
            search_radius: self.search_radius_hint(),
            size: self.effective_size(),
            threshold_offset: self.config.threshold_offset,
            method: self.config.method,
        }))
    }

    pub fn set_interpolation(
        &mut self,
        frames: Range<usize>,
        method: InterpolationMethod,
    ) -> Result<(), StoreError> {
        if frames.end > self.frames() {
            return Err(StoreError::FrameOutOfRange {
                frame: frames.end - 1,
                frames: self.frames(),
            });
        }
        for f in frames {
            self.frames[f].interpolation = method;
        }
        self.update_has_interpolation();
        Ok(())
    }

    pub fn update_has_interpolation(&mut self) {
        self.has_interpolation = self
            .frames
            .iter()
            .any(|f| f.interpolation != InterpolationMethod::None);
    }

    /// Refill every interior 3D gap according to its interpolation policy
    /// and project filled points into `Undefined` 2D cells.
    ///
    /// Earlier interpolation results are discarded first. Returns the number
    /// of frames filled.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all))]
    pub fn interpolate<C: CameraModel>(&mut self, cameras: &[C]) -> Result<usize, StoreError> {
        self.check_cameras(cameras)?;

        let mut cleared = Vec::new();
        for (f, state) in self.frames.iter_mut().enumerate() {
            if state.status == MarkerStatus::Interpolated {
                *state = FrameState {
                    interpolation: state.interpolation,
                    ..FrameState::default()
                };
                cleared.push(f);
            }
            for obs in self.observations.frame_mut(f) {
                if obs.status == MarkerStatus::Interpolated {
                    *obs = Observation::default();
                }
            }
        }
        // Measured cells at cleared frames still carry errors against the
        // discarded point.
        for f in cleared {
            self.update_error(f, cameras)?;
        }

        let series: Vec<Option<Vector3<f64>>> = self
            .frames
            .iter()
            .map(|s| s.status.is_defined().then_some(s.point.coords))
            .collect();
        let filled = fill_gaps(&series, |f| self.frames[f].interpolation);

        for &(f, v) in &filled {
            let point = Point3::from(v);
            self.frames[f].point = point;
            self.frames[f].status = MarkerStatus::Interpolated;
            for (cam, model) in cameras.iter().enumerate() {
                let obs = self.observations.get_mut(cam, f)?;
                if obs.status != MarkerStatus::Undefined {
                    continue;
                }
                if let Some(p) = model.project(&point) {
                    obs.point = p;
                    obs.status = MarkerStatus::Interpolated;
                }
            }
            self.update_error(f, cameras)?;
        }
        self.update_has_interpolation();
        debug!("interpolated {} frames", filled.len());
        Ok(filled.len())
    }
}
