//! Point status codes and the rules for overwriting them.

use serde::{Deserialize, Serialize};

use crate::StoreError;

/// Status of a 2D observation or a 3D point.
///
/// Ordered by numeric code. Anything above [`MarkerStatus::Undefined`] counts
/// as a defined value.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "i32", into = "i32")]
#[repr(i32)]
pub enum MarkerStatus {
    Untrackable = -30,
    Deleted = -20,
    Lost = -10,
    #[default]
    Undefined = 0,
    Predicted = 10,
    Interpolated = 20,
    Tracked = 40,
    TrackedAndOptimized = 45,
    Set = 50,
    SetAndOptimized = 55,
    Manual = 60,
    ManualAndOptimized = 65,
}

impl MarkerStatus {
    pub const ALL: [MarkerStatus; 12] = [
        MarkerStatus::Untrackable,
        MarkerStatus::Deleted,
        MarkerStatus::Lost,
        MarkerStatus::Undefined,
        MarkerStatus::Predicted,
        MarkerStatus::Interpolated,
        MarkerStatus::Tracked,
        MarkerStatus::TrackedAndOptimized,
        MarkerStatus::Set,
        MarkerStatus::SetAndOptimized,
        MarkerStatus::Manual,
        MarkerStatus::ManualAndOptimized,
    ];

    #[inline]
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    #[inline]
    pub fn is_defined(self) -> bool {
        self > MarkerStatus::Undefined
    }

    /// Positions coming from an image measurement rather than from
    /// prediction or interpolation. Only these feed triangulation.
    #[inline]
    pub fn is_measured(self) -> bool {
        self >= MarkerStatus::Tracked
    }

    /// Cells the detector and interpolation must leave alone until a user
    /// resets them.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, MarkerStatus::Deleted | MarkerStatus::Untrackable)
    }

    /// Status after an external optimisation pass, if it has one.
    pub fn optimized(self) -> Option<Self> {
        match self {
            MarkerStatus::Tracked => Some(MarkerStatus::TrackedAndOptimized),
            MarkerStatus::Set => Some(MarkerStatus::SetAndOptimized),
            MarkerStatus::Manual => Some(MarkerStatus::ManualAndOptimized),
            _ => None,
        }
    }
}

impl TryFrom<i32> for MarkerStatus {
    type Error = StoreError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or(StoreError::UnknownStatus(code))
    }
}

impl From<MarkerStatus> for i32 {
    fn from(s: MarkerStatus) -> Self {
        s.code()
    }
}

/// How an automated detector result is labelled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    /// Regular tracking, written as `Tracked`.
    #[default]
    Track,
    /// Refinement of a user click, written as `Set`.
    RefineAfterSet,
}

impl DetectionMode {
    pub fn status(self) -> MarkerStatus {
        match self {
            DetectionMode::Track => MarkerStatus::Tracked,
            DetectionMode::RefineAfterSet => MarkerStatus::Set,
        }
    }
}

/// Ceiling for automated writers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WritePolicy {
    /// Highest status an automated write may replace.
    pub max_overwrite: MarkerStatus,
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self {
            max_overwrite: MarkerStatus::Tracked,
        }
    }
}

impl WritePolicy {
    /// Ceiling needed by [`DetectionMode::RefineAfterSet`], which rewrites
    /// the user's `Set` clicks.
    pub fn refine_after_set() -> Self {
        Self {
            max_overwrite: MarkerStatus::Set,
        }
    }

    pub fn allows(&self, current: MarkerStatus) -> bool {
        !current.is_terminal() && current <= self.max_overwrite
    }
}
