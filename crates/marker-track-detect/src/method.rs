use serde::{Deserialize, Serialize};

use crate::DetectError;

/// Localisation family used to find a marker inside a patch.
///
/// `inverted` flips intensities first so bright features look like dark ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    ContourBlob { inverted: bool },
    CornerFeature,
    ParametricBlob { inverted: bool },
}

impl Strategy {
    /// Smallest search radius that still gives the strategy enough context.
    pub fn min_search_radius(&self, params: &crate::DetectorParams) -> u32 {
        match self {
            Strategy::CornerFeature => params.corner.min_search_radius,
            Strategy::ContourBlob { .. } => params.contour.min_search_radius,
            Strategy::ParametricBlob { .. } => params.blob.min_search_radius,
        }
    }

    /// Whether a dark marker on a bright background is expected after the
    /// optional inversion has been undone.
    pub fn expects_dark(&self) -> bool {
        match self {
            Strategy::ContourBlob { inverted } | Strategy::ParametricBlob { inverted } => {
                !inverted
            }
            Strategy::CornerFeature => true,
        }
    }
}

/// Integer method code stored on each marker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum DetectionMethod {
    #[default]
    DarkContour,
    Blob,
    LightContour,
    Corner,
    DarkContourRefined,
    LightContourRefined,
    WhiteBlob,
}

impl DetectionMethod {
    pub const ALL: [DetectionMethod; 7] = [
        DetectionMethod::DarkContour,
        DetectionMethod::Blob,
        DetectionMethod::LightContour,
        DetectionMethod::Corner,
        DetectionMethod::DarkContourRefined,
        DetectionMethod::LightContourRefined,
        DetectionMethod::WhiteBlob,
    ];

    pub fn from_code(code: i32) -> Result<Self, DetectError> {
        usize::try_from(code)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .ok_or(DetectError::UnknownMethod(code))
    }

    pub fn code(self) -> i32 {
        match self {
            DetectionMethod::DarkContour => 0,
            DetectionMethod::Blob => 1,
            DetectionMethod::LightContour => 2,
            DetectionMethod::Corner => 3,
            DetectionMethod::DarkContourRefined => 4,
            DetectionMethod::LightContourRefined => 5,
            DetectionMethod::WhiteBlob => 6,
        }
    }

    pub fn strategy(self) -> Strategy {
        match self {
            DetectionMethod::DarkContour | DetectionMethod::DarkContourRefined => {
                Strategy::ContourBlob { inverted: false }
            }
            DetectionMethod::LightContour | DetectionMethod::LightContourRefined => {
                Strategy::ContourBlob { inverted: true }
            }
            DetectionMethod::Corner => Strategy::CornerFeature,
            DetectionMethod::Blob => Strategy::ParametricBlob { inverted: false },
            DetectionMethod::WhiteBlob => Strategy::ParametricBlob { inverted: true },
        }
    }

    /// Methods 4 and 5 hand the coarse result to the subpixel refiner.
    pub fn refines(self) -> bool {
        matches!(
            self,
            DetectionMethod::DarkContourRefined | DetectionMethod::LightContourRefined
        )
    }
}

impl TryFrom<i32> for DetectionMethod {
    type Error = DetectError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Self::from_code(code)
    }
}

impl From<DetectionMethod> for i32 {
    fn from(m: DetectionMethod) -> Self {
        m.code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_and_unknown_codes_fail() {
        for m in DetectionMethod::ALL {
            assert_eq!(DetectionMethod::from_code(m.code()).unwrap(), m);
        }
        assert!(matches!(
            DetectionMethod::from_code(7),
            Err(DetectError::UnknownMethod(7))
        ));
        assert!(DetectionMethod::from_code(-1).is_err());
    }

    #[test]
    fn white_variants_map_to_inverted_strategies() {
        assert_eq!(
            DetectionMethod::LightContourRefined.strategy(),
            Strategy::ContourBlob { inverted: true }
        );
        assert_eq!(
            DetectionMethod::WhiteBlob.strategy(),
            Strategy::ParametricBlob { inverted: true }
        );
        assert!(DetectionMethod::DarkContourRefined.refines());
        assert!(!DetectionMethod::DarkContour.refines());
        assert!(!DetectionMethod::WhiteBlob.strategy().expects_dark());
    }

    #[test]
    fn method_serializes_as_its_code() {
        let json = serde_json::to_string(&DetectionMethod::Corner).unwrap();
        assert_eq!(json, "3");
        let back: DetectionMethod = serde_json::from_str("5").unwrap();
        assert_eq!(back, DetectionMethod::LightContourRefined);
        assert!(serde_json::from_str::<DetectionMethod>("9").is_err());
    }
}
