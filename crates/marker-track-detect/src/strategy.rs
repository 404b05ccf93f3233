//! Strategy dispatch: every localiser maps a patch plus a prediction to an
//! optional circle in frame coordinates.

use marker_track_core::SubImage;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::blob::BlobLocator;
use crate::contour_blob::ContourLocator;
use crate::corner::CornerLocator;
use crate::{DetectError, DetectorParams, Strategy};

/// Circle found by a strategy, in frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Located {
    pub center: Point2<f64>,
    pub radius: f64,
}

/// Per-request inputs shared by all strategies.
#[derive(Clone, Copy, Debug)]
pub struct LocateContext {
    pub predicted: Point2<f64>,
    /// Running feature size estimate in pixels.
    pub size: f64,
    /// Threshold shift in percent of the 8-bit range.
    pub threshold_offset: f64,
}

pub trait Locate {
    /// `Ok(None)` means the patch holds no acceptable candidate.
    fn locate(&self, patch: &SubImage, ctx: &LocateContext) -> Result<Option<Located>, DetectError>;
}

impl Strategy {
    pub fn locate(
        &self,
        patch: &SubImage,
        ctx: &LocateContext,
        params: &DetectorParams,
    ) -> Result<Option<Located>, DetectError> {
        match *self {
            Strategy::ContourBlob { inverted } => ContourLocator {
                params: &params.contour,
                inverted,
            }
            .locate(patch, ctx),
            Strategy::CornerFeature => CornerLocator {
                params: &params.corner,
            }
            .locate(patch, ctx),
            Strategy::ParametricBlob { inverted } => BlobLocator {
                params: &params.blob,
                inverted,
            }
            .locate(patch, ctx),
        }
    }
}

/// Pick the candidate closest to `target`; ties keep the earliest.
pub(crate) fn nearest<I>(candidates: I, target: Point2<f64>) -> Option<Located>
where
    I: IntoIterator<Item = Located>,
{
    candidates.into_iter().fold(None, |best: Option<(f64, Located)>, c| {
        let d = (c.center - target).norm_squared();
        match best {
            Some((bd, _)) if bd <= d => best,
            _ => Some((d, c)),
        }
    })
    .map(|(_, c)| c)
}
