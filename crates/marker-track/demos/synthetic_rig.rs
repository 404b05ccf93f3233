//! Track two markers through a rendered three-camera rig and print a JSON
//! report (or write it to the path given as the first argument).

use std::f64::consts::PI;

use marker_track::core::Intrinsics;
use marker_track::store::ErrorStats;
use marker_track::synthetic::render_view;
use marker_track::{
    share_markers, CameraModel, DetectionMethod, GrayImage, InterpolationMethod, Marker, MarkerStatus,
    PinholeCamera, Tracker, TrackingParams,
};
use nalgebra::{Point3, Rotation3, Vector3};
use serde::Serialize;

#[cfg(feature = "tracing")]
use marker_track::core::{init_tracing, TraceOutput};
#[cfg(not(feature = "tracing"))]
use {
    log::LevelFilter,
    marker_track::core::{init, LogOptions},
};

const FRAMES: usize = 30;
const SIZE: (usize, usize) = (640, 480);

#[derive(Serialize)]
struct MarkerReport {
    description: String,
    tracked_cells: usize,
    reconstructed_frames: usize,
    interpolated_frames: usize,
    mean_3d_error: f64,
    reprojection: Option<ErrorStats>,
    mean_size: Option<f64>,
}

fn rig() -> Vec<PinholeCamera> {
    let k = Intrinsics {
        fx: 900.0,
        fy: 900.0,
        cx: 320.0,
        cy: 240.0,
        skew: 0.0,
    };
    [-0.35, 0.0, 0.35]
        .into_iter()
        // Every camera looks at the origin from 2 m away.
        .map(|yaw| PinholeCamera::new(k, Rotation3::from_euler_angles(0.0, yaw, 0.0), Vector3::new(0.0, 0.0, 2.0)))
        .collect()
}

fn trajectory(marker: usize, frame: usize) -> Point3<f64> {
    let t = frame as f64 / FRAMES as f64;
    let phase = marker as f64 * PI;
    Point3::new(
        0.15 * (2.0 * PI * t + phase).cos(),
        -0.05 + 0.1 * marker as f64,
        0.15 * (2.0 * PI * t + phase).sin(),
    )
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(feature = "tracing")]
    init_tracing(TraceOutput::Text);
    // Keep this binary's own lines alongside the library's.
    #[cfg(not(feature = "tracing"))]
    init(LogOptions {
        level: LevelFilter::Info,
        own_crates_only: false,
        ..LogOptions::default()
    })?;

    let cams = rig();
    let images: Vec<Vec<GrayImage>> = cams
        .iter()
        .map(|c| {
            (0..FRAMES)
                .map(|f| {
                    let points = [trajectory(0, f), trajectory(1, f)];
                    render_view(c, &points, SIZE, 4.0, 210, 35)
                })
                .collect()
        })
        .collect();

    let mut markers = Vec::new();
    for id in 0..2 {
        let mut marker = Marker::new(cams.len(), FRAMES);
        let config = marker.config_mut();
        config.method = DetectionMethod::DarkContourRefined;
        config.size_override = Some(4.0);
        config.description = format!("bead {id}");
        for (cam, c) in cams.iter().enumerate() {
            if let Some(p) = c.project(&trajectory(id, 0)) {
                marker.set_point(cam, 0, p, MarkerStatus::Set)?;
            }
        }
        marker.reconstruct_all(&cams)?;
        markers.push(marker);
    }
    let markers = share_markers(markers);

    let tracker = Tracker::new(cams.clone(), TrackingParams::default());
    let reports = tracker.track_range(&markers, &images, 1..FRAMES)?;
    let detected: usize = reports.iter().map(|r| r.detected).sum();
    log::info!("tracked {} frames, {detected} detections", reports.len());

    let mut out = Vec::new();
    for (id, shared) in markers.iter().enumerate() {
        let mut m = shared.lock().map_err(|_| "marker lock poisoned")?;
        // Drop a few frames and let linear interpolation fill them back in.
        for cam in 0..cams.len() {
            m.reset_multiple_frames(cam, 12..15, MarkerStatus::Undefined)?;
        }
        m.reconstruct_all(&cams)?;
        m.set_interpolation(0..FRAMES, InterpolationMethod::Cubic)?;
        let interpolated = m.interpolate(&cams)?;

        let mut err_sum = 0.0;
        let mut reconstructed = 0;
        for f in 0..FRAMES {
            if let Some(p) = m.point_3d(f)? {
                err_sum += (p - trajectory(id, f)).norm();
                reconstructed += 1;
            }
        }
        let tracked_cells = (0..cams.len())
            .flat_map(|c| (0..FRAMES).map(move |f| (c, f)))
            .filter(|&(c, f)| m.status_2d(c, f).is_ok_and(|s| s == MarkerStatus::Tracked))
            .count();
        out.push(MarkerReport {
            description: m.config().description.clone(),
            tracked_cells,
            reconstructed_frames: reconstructed,
            interpolated_frames: interpolated,
            mean_3d_error: if reconstructed > 0 {
                err_sum / reconstructed as f64
            } else {
                f64::NAN
            },
            reprojection: m.reprojection_error(0..FRAMES),
            mean_size: m.mean_size(),
        });
    }

    let json = serde_json::to_string_pretty(&out)?;
    match std::env::args().nth(1) {
        Some(path) => {
            std::fs::write(&path, json)?;
            log::info!("report written to {path}");
        }
        None => println!("{json}"),
    }
    Ok(())
}
