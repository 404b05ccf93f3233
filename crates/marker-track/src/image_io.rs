//! Conversions between `image::GrayImage` and the workspace image types.

use marker_track_core::{GrayImage, GrayImageView};

use crate::tracking::FrameSource;
use crate::TrackError;

/// Borrow an `image::GrayImage` as a detector view.
pub fn gray_view(img: &::image::GrayImage) -> GrayImageView<'_> {
    GrayImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}

/// Build an `image::GrayImage` from a raw 8-bit row-major buffer.
pub fn gray_image_from_slice(width: u32, height: u32, pixels: &[u8]) -> Result<::image::GrayImage, TrackError> {
    let w = usize::try_from(width).ok();
    let h = usize::try_from(height).ok();
    let Some((w, h)) = w.zip(h) else {
        return Err(TrackError::InvalidGrayDimensions { width, height });
    };
    let Some(expected) = w.checked_mul(h) else {
        return Err(TrackError::InvalidGrayDimensions { width, height });
    };
    if pixels.len() != expected {
        return Err(TrackError::InvalidGrayBuffer {
            expected,
            got: pixels.len(),
        });
    }
    ::image::GrayImage::from_raw(width, height, pixels.to_vec())
        .ok_or(TrackError::InvalidGrayDimensions { width, height })
}

/// Copy a workspace image into an `image::GrayImage`, e.g. for saving.
pub fn to_image(img: &GrayImage) -> Result<::image::GrayImage, TrackError> {
    let width = u32::try_from(img.width).map_err(|_| TrackError::InvalidGrayDimensions {
        width: u32::MAX,
        height: 0,
    })?;
    let height = u32::try_from(img.height).map_err(|_| TrackError::InvalidGrayDimensions {
        width,
        height: u32::MAX,
    })?;
    gray_image_from_slice(width, height, &img.data)
}

/// Images indexed `[camera][frame]`.
impl FrameSource for Vec<Vec<::image::GrayImage>> {
    fn image(&self, camera: usize, frame: usize) -> Option<GrayImageView<'_>> {
        self.get(camera)?.get(frame).map(gray_view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_length_is_checked() {
        let err = gray_image_from_slice(4, 3, &[0u8; 11]).unwrap_err();
        assert!(matches!(err, TrackError::InvalidGrayBuffer { expected: 12, got: 11 }));
    }

    #[test]
    fn views_share_pixels() {
        let img = gray_image_from_slice(3, 2, &[1, 2, 3, 4, 5, 6]).unwrap();
        let view = gray_view(&img);
        assert_eq!((view.width, view.height), (3, 2));
        assert_eq!(view.get(2, 1), 6);

        let own = GrayImage::from_fn(3, 2, |x, y| (x + 3 * y + 1) as u8);
        assert_eq!(to_image(&own).unwrap(), img);
    }

    #[test]
    fn image_frames_act_as_frame_source() {
        let img = gray_image_from_slice(2, 2, &[9, 9, 9, 9]).unwrap();
        let frames = vec![vec![img]];
        assert!(frames.image(0, 0).is_some());
        assert!(frames.image(0, 1).is_none());
        assert!(frames.image(1, 0).is_none());
    }
}
