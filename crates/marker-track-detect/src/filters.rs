//! Small image filters used by the localisation strategies.
//!
//! Borders follow the reflect-101 convention (`dcb|abcd|cba`) except the
//! median filter, which replicates edge pixels.

use marker_track_core::{GrayImage, ImageError};

/// Owned single-channel f32 image in row-major layout.
#[derive(Clone, Debug)]
pub struct ImageF32 {
    pub w: usize,
    pub h: usize,
    pub data: Vec<f32>,
}

impl ImageF32 {
    pub fn try_new(w: usize, h: usize) -> Result<Self, ImageError> {
        let len = w
            .checked_mul(h)
            .ok_or(ImageError::InvalidDimensions {
                width: w,
                height: h,
            })?;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| ImageError::Allocation {
                bytes: len * std::mem::size_of::<f32>(),
            })?;
        data.resize(len, 0.0);
        Ok(Self { w, h, data })
    }

    pub fn from_gray(src: &GrayImage) -> Result<Self, ImageError> {
        let mut out = Self::try_new(src.width, src.height)?;
        for (d, &s) in out.data.iter_mut().zip(src.data.iter()) {
            *d = s as f32;
        }
        Ok(out)
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.w + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, v: f32) {
        self.data[y * self.w + x] = v;
    }

    /// Read with reflect-101 border handling.
    #[inline]
    pub fn get_reflect(&self, x: i64, y: i64) -> f32 {
        self.get(reflect101(x, self.w), reflect101(y, self.h))
    }

    pub fn min_max(&self) -> (f32, f32) {
        self.data
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    }
}

#[inline]
pub(crate) fn reflect101(i: i64, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let n = n as i64;
    let period = 2 * (n - 1);
    let mut i = i.rem_euclid(period);
    if i >= n {
        i = period - i;
    }
    i as usize
}

/// Normalised 1D gaussian taps for an odd kernel size.
pub fn gaussian_kernel(ksize: usize, sigma: f64) -> Vec<f32> {
    let ksize = ksize.max(1) | 1;
    let half = (ksize / 2) as f64;
    let sigma = if sigma > 0.0 {
        sigma
    } else {
        // Same fallback as the usual `0.3 * ((k - 1) * 0.5 - 1) + 0.8` rule.
        0.3 * (half - 1.0) + 0.8
    };
    let denom = 2.0 * sigma * sigma;
    let taps: Vec<f64> = (0..ksize)
        .map(|i| {
            let d = i as f64 - half;
            (-d * d / denom).exp()
        })
        .collect();
    let sum: f64 = taps.iter().sum();
    taps.into_iter().map(|t| (t / sum) as f32).collect()
}

/// Separable gaussian blur with a square `ksize × ksize` kernel.
pub fn gaussian_blur(src: &ImageF32, ksize: usize, sigma: f64) -> Result<ImageF32, ImageError> {
    let kernel = gaussian_kernel(ksize, sigma);
    let half = (kernel.len() / 2) as i64;
    let mut tmp = ImageF32::try_new(src.w, src.h)?;
    for y in 0..src.h {
        for x in 0..src.w {
            let mut acc = 0.0f32;
            for (k, &wk) in kernel.iter().enumerate() {
                acc += wk * src.get_reflect(x as i64 + k as i64 - half, y as i64);
            }
            tmp.set(x, y, acc);
        }
    }
    let mut out = ImageF32::try_new(src.w, src.h)?;
    for y in 0..src.h {
        for x in 0..src.w {
            let mut acc = 0.0f32;
            for (k, &wk) in kernel.iter().enumerate() {
                acc += wk * tmp.get_reflect(x as i64, y as i64 + k as i64 - half);
            }
            out.set(x, y, acc);
        }
    }
    Ok(out)
}

/// Stretch values linearly onto `0..=255` and round to 8 bits.
///
/// A constant image maps to all zeros.
pub fn normalize_min_max(src: &ImageF32) -> Result<GrayImage, ImageError> {
    let (lo, hi) = src.min_max();
    let mut out = GrayImage::try_filled(src.w, src.h, 0)?;
    let range = hi - lo;
    if !range.is_finite() || range <= f32::EPSILON {
        return Ok(out);
    }
    let scale = 255.0 / range;
    for (d, &s) in out.data.iter_mut().zip(src.data.iter()) {
        *d = ((s - lo) * scale).round().clamp(0.0, 255.0) as u8;
    }
    Ok(out)
}

/// 3x3 median with replicated borders.
pub fn median3x3(src: &GrayImage) -> Result<GrayImage, ImageError> {
    let mut out = GrayImage::try_filled(src.width, src.height, 0)?;
    let (w, h) = (src.width as i64, src.height as i64);
    let mut window = [0u8; 9];
    for y in 0..h {
        for x in 0..w {
            let mut n = 0;
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let sx = (x + dx).clamp(0, w - 1) as usize;
                    let sy = (y + dy).clamp(0, h - 1) as usize;
                    window[n] = src.get(sx, sy);
                    n += 1;
                }
            }
            window.sort_unstable();
            out.set(x as usize, y as usize, window[4]);
        }
    }
    Ok(out)
}

/// Inverse binary threshold: `255` where `v <= thresh`, `0` elsewhere.
pub fn threshold_inv(src: &GrayImage, thresh: f64) -> Result<GrayImage, ImageError> {
    let mut out = GrayImage::try_filled(src.width, src.height, 0)?;
    for (d, &s) in out.data.iter_mut().zip(src.data.iter()) {
        *d = if (s as f64) > thresh { 0 } else { 255 };
    }
    Ok(out)
}

/// Gaussian-blur a binary mask and keep every pixel whose rounded 8-bit value
/// is non-zero. With a small kernel this grows the mask by about one pixel.
pub fn soften_mask(mask: &GrayImage, ksize: usize, sigma: f64) -> Result<Vec<bool>, ImageError> {
    let blurred = gaussian_blur(&ImageF32::from_gray(mask)?, ksize, sigma)?;
    Ok(blurred.data.iter().map(|&v| v >= 0.5).collect())
}
