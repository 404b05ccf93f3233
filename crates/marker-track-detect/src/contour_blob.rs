//! Background-flattened intensity threshold followed by contour extraction.

use marker_track_core::SubImage;
use nalgebra::Point2;

use crate::contours::{label_components, min_enclosing_circle};
use crate::filters::{gaussian_blur, median3x3, normalize_min_max, soften_mask, threshold_inv, ImageF32};
use crate::params::ContourParams;
use crate::strategy::{nearest, Locate, LocateContext, Located};
use crate::DetectError;

pub struct ContourLocator<'a> {
    pub params: &'a ContourParams,
    pub inverted: bool,
}

/// Sigma that makes the kernel fall to ~1/255 at `radius`.
fn background_sigma(radius: usize) -> f64 {
    let s = radius as f64 * (2.0 * 255f64.ln()).sqrt() - 1.0;
    s.max(0.5)
}

impl Locate for ContourLocator<'_> {
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "trace", skip_all, fields(inverted = self.inverted))
    )]
    fn locate(&self, patch: &SubImage, ctx: &LocateContext) -> Result<Option<Located>, DetectError> {
        if !(ctx.size.is_finite() && ctx.size > 0.0) {
            return Err(DetectError::InvalidSize(ctx.size));
        }
        let mut gray = patch.image.clone();
        if self.inverted {
            gray.invert();
        }
        let (w, h) = (gray.width, gray.height);

        let src = ImageF32::from_gray(&gray)?;
        let blur_radius = ((self.params.background_blur_scale * ctx.size).round() as usize).max(1);
        let background = gaussian_blur(&src, 2 * blur_radius + 1, background_sigma(blur_radius))?;
        let mut flat = src;
        for (v, b) in flat.data.iter_mut().zip(background.data.iter()) {
            *v -= *b;
        }
        let filtered = median3x3(&normalize_min_max(&flat)?)?;

        let min = filtered.data.iter().copied().min().unwrap_or(0) as f64;
        let (cx, cy) = patch
            .local_pixel(ctx.predicted.x, ctx.predicted.y)
            .unwrap_or((w / 2, h / 2));
        let center_intensity = filtered.get(cx, cy) as f64;
        let thresh = 0.5 * min + 0.5 * center_intensity + ctx.threshold_offset * 0.01 * 255.0;

        let mask = threshold_inv(&filtered, thresh)?;
        let fg = soften_mask(&mask, 3, self.params.mask_blur_sigma)?;
        let components = label_components(&fg, w, h);
        log::trace!(
            "contour: threshold {:.1}, {} components in {}x{} patch",
            thresh,
            components.count,
            w,
            h
        );

        let circles = components.contours().into_iter().filter_map(|contour| {
            let (x, y, r) = min_enclosing_circle(&contour)?;
            let (fx, fy) = patch.to_frame(x, y);
            Some(Located {
                center: Point2::new(fx, fy),
                radius: r,
            })
        });
        Ok(nearest(circles, ctx.predicted))
    }
}
