use crate::ImageError;

/// Borrowed 8-bit grayscale image, row-major with `stride == width`.
#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // row-major, len = w*h
}

impl<'a> GrayImageView<'a> {
    /// Wrap a raw buffer, checking that its length matches the dimensions.
    pub fn new(width: usize, height: usize, data: &'a [u8]) -> Result<Self, ImageError> {
        let expected = width
            .checked_mul(height)
            .ok_or(ImageError::InvalidDimensions { width, height })?;
        if data.len() != expected {
            return Err(ImageError::InvalidBuffer {
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height
    }
}

/// Owned 8-bit grayscale image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl GrayImage {
    /// Allocate an image filled with `value`, reporting allocation failure
    /// instead of aborting.
    pub fn try_filled(width: usize, height: usize, value: u8) -> Result<Self, ImageError> {
        let len = width
            .checked_mul(height)
            .ok_or(ImageError::InvalidDimensions { width, height })?;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| ImageError::Allocation { bytes: len })?;
        data.resize(len, value);
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Build an image by evaluating `f(x, y)` at every pixel.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> u8) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn view(&self) -> GrayImageView<'_> {
        GrayImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, v: u8) {
        self.data[y * self.width + x] = v;
    }

    /// Replace every pixel `v` with `255 - v`.
    pub fn invert(&mut self) {
        for v in &mut self.data {
            *v = 255 - *v;
        }
    }
}

/// A square patch cut out of a larger frame, clipped to the frame bounds.
///
/// `origin_x/origin_y` are the frame coordinates of the patch's top-left
/// pixel; they differ from the requested offset when clipping happened.
#[derive(Clone, Debug)]
pub struct SubImage {
    pub image: GrayImage,
    pub origin_x: i64,
    pub origin_y: i64,
}

impl SubImage {
    /// Convert frame coordinates to patch-local coordinates.
    #[inline]
    pub fn to_local(&self, x: f64, y: f64) -> (f64, f64) {
        (x - self.origin_x as f64, y - self.origin_y as f64)
    }

    /// Convert patch-local coordinates back to frame coordinates.
    #[inline]
    pub fn to_frame(&self, x: f64, y: f64) -> (f64, f64) {
        (x + self.origin_x as f64, y + self.origin_y as f64)
    }

    /// Patch pixel holding the given frame coordinate, if inside the patch.
    pub fn local_pixel(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let (lx, ly) = self.to_local(x, y);
        let (ix, iy) = (lx.round(), ly.round());
        if ix < 0.0 || iy < 0.0 {
            return None;
        }
        let (ix, iy) = (ix as usize, iy as usize);
        (ix < self.image.width && iy < self.image.height).then_some((ix, iy))
    }
}

/// Source of grayscale patches for the detector and the refiner.
pub trait ImageSource {
    fn dimensions(&self) -> (usize, usize);

    /// Copy the `(2 * radius + 1)²` square starting at `(offset_x, offset_y)`,
    /// clipped to the image bounds.
    fn sub_image(&self, radius: u32, offset_x: i64, offset_y: i64)
        -> Result<SubImage, ImageError>;
}

impl ImageSource for GrayImageView<'_> {
    fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn sub_image(
        &self,
        radius: u32,
        offset_x: i64,
        offset_y: i64,
    ) -> Result<SubImage, ImageError> {
        let side = 2 * radius as i64 + 1;
        let x0 = offset_x.max(0);
        let y0 = offset_y.max(0);
        let x1 = (offset_x + side).min(self.width as i64);
        let y1 = (offset_y + side).min(self.height as i64);
        if x1 <= x0 || y1 <= y0 {
            return Err(ImageError::EmptyRegion {
                x: offset_x,
                y: offset_y,
                side: side as usize,
            });
        }

        let (w, h) = ((x1 - x0) as usize, (y1 - y0) as usize);
        let mut image = GrayImage::try_filled(w, h, 0)?;
        for row in 0..h {
            let src_start = (y0 as usize + row) * self.width + x0 as usize;
            image.data[row * w..(row + 1) * w]
                .copy_from_slice(&self.data[src_start..src_start + w]);
        }
        Ok(SubImage {
            image,
            origin_x: x0,
            origin_y: y0,
        })
    }
}

impl ImageSource for GrayImage {
    fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn sub_image(
        &self,
        radius: u32,
        offset_x: i64,
        offset_y: i64,
    ) -> Result<SubImage, ImageError> {
        self.view().sub_image(radius, offset_x, offset_y)
    }
}

#[inline]
fn get_gray_clamped(src: &GrayImageView<'_>, x: i64, y: i64) -> u8 {
    let x = x.clamp(0, src.width as i64 - 1) as usize;
    let y = y.clamp(0, src.height as i64 - 1) as usize;
    src.data[y * src.width + x]
}

/// Bilinear sample with edge replication outside the image.
#[inline]
pub fn sample_bilinear(src: &GrayImageView<'_>, x: f64, y: f64) -> f64 {
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let p00 = get_gray_clamped(src, x0, y0) as f64;
    let p10 = get_gray_clamped(src, x0 + 1, y0) as f64;
    let p01 = get_gray_clamped(src, x0, y0 + 1) as f64;
    let p11 = get_gray_clamped(src, x0 + 1, y0 + 1) as f64;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}
