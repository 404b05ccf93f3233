//! Parallel tracking step.
//!
//! One step detects every marker in every camera at a single frame. Each
//! (marker, camera) pair becomes a task on the rayon pool; tasks of the same
//! marker share a [`StepBarrier`] and the last one to finish triangulates the
//! frame while still holding the marker lock.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info};
use marker_track_core::{CameraModel, GrayImage, GrayImageView};
use marker_track_detect::{DetectionRequest, DetectorParams, MarkerDetector};
use marker_track_store::{DetectionMode, Marker, StoreError, WritePolicy};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{StepBarrier, TrackError};

/// Per-camera frame images for the tracker.
pub trait FrameSource: Sync {
    fn image(&self, camera: usize, frame: usize) -> Option<GrayImageView<'_>>;
}

/// Images indexed `[camera][frame]`.
impl FrameSource for Vec<Vec<GrayImage>> {
    fn image(&self, camera: usize, frame: usize) -> Option<GrayImageView<'_>> {
        self.get(camera)?.get(frame).map(GrayImage::view)
    }
}

impl FrameSource for Vec<Vec<Arc<GrayImage>>> {
    fn image(&self, camera: usize, frame: usize) -> Option<GrayImageView<'_>> {
        self.get(camera)?.get(frame).map(|img| img.view())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingParams {
    pub detector: DetectorParams,
    pub mode: DetectionMode,
    pub policy: WritePolicy,
    /// Predict from earlier frames and walk ranges upwards.
    pub forward: bool,
    /// Refresh each marker's size statistics after its frame is aggregated.
    pub update_size: bool,
}

impl Default for TrackingParams {
    fn default() -> Self {
        Self {
            detector: DetectorParams::default(),
            mode: DetectionMode::Track,
            policy: WritePolicy::default(),
            forward: true,
            update_size: true,
        }
    }
}

/// Cooperative stop flag checked between tracking steps.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Counts for one tracking step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub frame: usize,
    /// Detector tasks started.
    pub dispatched: usize,
    pub detected: usize,
    /// Detections accepted by the write policy.
    pub written: usize,
    /// Markers with a defined 3D point after aggregation.
    pub reconstructed: usize,
}

/// Wrap markers for sharing with the worker pool.
pub fn share_markers(markers: Vec<Marker>) -> Vec<Arc<Mutex<Marker>>> {
    markers.into_iter().map(|m| Arc::new(Mutex::new(m))).collect()
}

fn lock(marker: &Mutex<Marker>) -> MutexGuard<'_, Marker> {
    marker.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Task<'img> {
    camera: usize,
    request: DetectionRequest,
    image: GrayImageView<'img>,
}

pub struct Tracker<C> {
    cameras: Vec<C>,
    detector: MarkerDetector,
    params: TrackingParams,
    stop: StopHandle,
}

impl<C: CameraModel + Sync> Tracker<C> {
    pub fn new(cameras: Vec<C>, params: TrackingParams) -> Self {
        Self {
            cameras,
            detector: MarkerDetector::new(params.detector.clone()),
            params,
            stop: StopHandle::default(),
        }
    }

    pub fn cameras(&self) -> &[C] {
        &self.cameras
    }

    pub fn params(&self) -> &TrackingParams {
        &self.params
    }

    /// Handle that halts [`Tracker::track_range`] before its next step.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    fn plan<'img, S: FrameSource + ?Sized>(
        &self,
        marker: &Marker,
        source: &'img S,
        frame: usize,
    ) -> Result<Vec<Task<'img>>, TrackError> {
        if marker.cameras() != self.cameras.len() {
            return Err(StoreError::CameraCountMismatch {
                expected: marker.cameras(),
                got: self.cameras.len(),
            }
            .into());
        }
        marker.frame(frame)?;
        let mut tasks = Vec::new();
        for camera in 0..self.cameras.len() {
            if !self.params.policy.allows(marker.status_2d(camera, frame)?) {
                continue;
            }
            let Some(image) = source.image(camera, frame) else {
                continue;
            };
            let request =
                marker.detection_request(camera, frame, self.params.forward, self.params.mode)?;
            if let Some(request) = request {
                tasks.push(Task {
                    camera,
                    request,
                    image,
                });
            }
        }
        Ok(tasks)
    }

    /// Detect all markers at `frame`, write accepted results and triangulate.
    ///
    /// Returns once every dispatched task has finished.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, markers, source), fields(markers = markers.len()))
    )]
    pub fn track_step<S: FrameSource + ?Sized>(
        &self,
        markers: &[Arc<Mutex<Marker>>],
        source: &S,
        frame: usize,
    ) -> Result<StepReport, TrackError> {
        let mut plans = Vec::with_capacity(markers.len());
        for marker in markers {
            let tasks = self.plan(&lock(marker), source, frame)?;
            plans.push(tasks);
        }
        let barriers: Vec<StepBarrier> = plans.iter().map(|t| StepBarrier::new(t.len())).collect();

        let detected = AtomicUsize::new(0);
        let written = AtomicUsize::new(0);
        let reconstructed = AtomicUsize::new(0);
        let failure: Mutex<Option<TrackError>> = Mutex::new(None);
        let fail = |e: TrackError| {
            let mut slot = failure.lock().unwrap_or_else(PoisonError::into_inner);
            slot.get_or_insert(e);
        };

        rayon::scope(|s| {
            for (id, (tasks, barrier)) in plans.iter().zip(&barriers).enumerate() {
                let marker = &markers[id];
                for task in tasks {
                    let (detected, written, reconstructed, fail) = (&detected, &written, &reconstructed, &fail);
                    s.spawn(move |_| {
                        let found = self.detector.detect(&task.image, &task.request);
                        let mut m = lock(marker);
                        match &found {
                            Some(det) => {
                                detected.fetch_add(1, Ordering::Relaxed);
                                debug!(
                                    "marker {id} cam {} frame {frame}: ({:.2}, {:.2}) r={:.2}",
                                    task.camera, det.center.x, det.center.y, det.radius
                                );
                                match m.write_detection(task.camera, frame, det, self.params.mode, &self.params.policy) {
                                    Ok(true) => {
                                        written.fetch_add(1, Ordering::Relaxed);
                                    }
                                    Ok(false) => {}
                                    Err(e) => fail(e.into()),
                                }
                            }
                            None => debug!("marker {id} cam {} frame {frame}: not found", task.camera),
                        }
                        if barrier.arrive() {
                            match m.reconstruct_3d_point(frame, &self.cameras) {
                                Ok(status) if status.is_defined() => {
                                    reconstructed.fetch_add(1, Ordering::Relaxed);
                                }
                                Ok(_) => {}
                                Err(e) => fail(e.into()),
                            }
                            if self.params.update_size {
                                m.update_marker_size();
                            }
                        }
                    });
                }
            }
        });

        if let Some(e) = failure.into_inner().unwrap_or_else(PoisonError::into_inner) {
            return Err(e);
        }
        let report = StepReport {
            frame,
            dispatched: plans.iter().map(Vec::len).sum(),
            detected: detected.into_inner(),
            written: written.into_inner(),
            reconstructed: reconstructed.into_inner(),
        };
        debug!("step {report:?}");
        Ok(report)
    }

    /// Run consecutive steps over `frames`, in reverse when tracking
    /// backwards. The stop handle is checked before each step; a step that
    /// has started always completes.
    pub fn track_range<S: FrameSource + ?Sized>(
        &self,
        markers: &[Arc<Mutex<Marker>>],
        source: &S,
        frames: Range<usize>,
    ) -> Result<Vec<StepReport>, TrackError> {
        let order: Vec<usize> = if self.params.forward {
            frames.collect()
        } else {
            frames.rev().collect()
        };
        let mut reports = Vec::with_capacity(order.len());
        for frame in order {
            if self.stop.is_stopped() {
                info!("tracking stopped before frame {frame}");
                break;
            }
            reports.push(self.track_step(markers, source, frame)?);
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::render_disks;
    use marker_track_core::{Intrinsics, PinholeCamera};
    use marker_track_store::MarkerStatus;
    use nalgebra::{Point2, Rotation3, Vector3};

    fn mono_camera() -> PinholeCamera {
        PinholeCamera::new(
            Intrinsics {
                fx: 1000.0,
                fy: 1000.0,
                cx: 100.0,
                cy: 100.0,
                skew: 0.0,
            },
            Rotation3::identity(),
            Vector3::zeros(),
        )
    }

    #[test]
    fn step_without_history_dispatches_nothing() {
        let tracker = Tracker::new(vec![mono_camera()], TrackingParams::default());
        let markers = share_markers(vec![Marker::new(1, 3)]);
        let images = vec![vec![GrayImage::try_filled(200, 200, 200).unwrap(); 3]];
        let report = tracker.track_step(&markers, &images, 1).unwrap();
        assert_eq!(report.dispatched, 0);
        assert_eq!(report.frame, 1);
    }

    #[test]
    fn protected_cells_are_not_dispatched() {
        let tracker = Tracker::new(vec![mono_camera()], TrackingParams::default());
        let mut marker = Marker::new(1, 2);
        marker.set_point(0, 0, Point2::new(100.0, 100.0), MarkerStatus::Set).unwrap();
        marker.set_point(0, 1, Point2::new(90.0, 90.0), MarkerStatus::Manual).unwrap();
        let markers = share_markers(vec![marker]);
        let img = render_disks(200, 200, &[(101.0, 100.5, 4.0)], 200, 30);
        let images = vec![vec![img.clone(), img]];
        let report = tracker.track_step(&markers, &images, 1).unwrap();
        assert_eq!(report.dispatched, 0);
        assert_eq!(lock(&markers[0]).point_2d(0, 1).unwrap(), Some(Point2::new(90.0, 90.0)));
    }

    #[test]
    fn mismatched_rig_is_an_error() {
        let tracker = Tracker::new(vec![mono_camera(), mono_camera()], TrackingParams::default());
        let markers = share_markers(vec![Marker::new(1, 2)]);
        let images: Vec<Vec<GrayImage>> = Vec::new();
        assert!(matches!(
            tracker.track_step(&markers, &images, 0),
            Err(TrackError::Store(StoreError::CameraCountMismatch { .. }))
        ));
        assert!(matches!(
            Tracker::new(vec![mono_camera()], TrackingParams::default()).track_step(&markers, &images, 5),
            Err(TrackError::Store(StoreError::FrameOutOfRange { .. }))
        ));
    }

    #[test]
    fn single_camera_detection_is_written_as_tracked() {
        let tracker = Tracker::new(vec![mono_camera()], TrackingParams::default());
        let mut marker = Marker::new(1, 2);
        marker.config_mut().size_override = Some(4.0);
        marker.set_point(0, 0, Point2::new(100.0, 100.0), MarkerStatus::Set).unwrap();
        let markers = share_markers(vec![marker]);
        let img = render_disks(200, 200, &[(102.6, 98.9, 4.0)], 200, 30);
        let images = vec![vec![img.clone(), img]];
        let report = tracker.track_step(&markers, &images, 1).unwrap();
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.written, 1);
        // One view cannot be triangulated.
        assert_eq!(report.reconstructed, 0);
        let m = lock(&markers[0]);
        assert_eq!(m.status_2d(0, 1).unwrap(), MarkerStatus::Tracked);
        let p = m.point_2d(0, 1).unwrap().unwrap();
        assert!((p - Point2::new(102.6, 98.9)).norm() < 1.0, "{p:?}");
        assert!(m.mean_size().is_some());
    }

    #[test]
    fn refine_after_set_rewrites_the_click() {
        let params = TrackingParams {
            mode: DetectionMode::RefineAfterSet,
            policy: WritePolicy::refine_after_set(),
            ..TrackingParams::default()
        };
        let tracker = Tracker::new(vec![mono_camera()], params);
        let mut marker = Marker::new(1, 1);
        marker.config_mut().size_override = Some(4.0);
        marker.set_point(0, 0, Point2::new(100.0, 100.0), MarkerStatus::Set).unwrap();
        let markers = share_markers(vec![marker]);
        let images = vec![vec![render_disks(200, 200, &[(102.6, 98.9, 4.0)], 200, 30)]];

        let report = tracker.track_step(&markers, &images, 0).unwrap();
        assert_eq!(report.written, 1);
        let m = lock(&markers[0]);
        assert_eq!(m.status_2d(0, 0).unwrap(), MarkerStatus::Set);
        let p = m.point_2d(0, 0).unwrap().unwrap();
        assert!((p - Point2::new(102.6, 98.9)).norm() < 1.0, "{p:?}");
    }
}
