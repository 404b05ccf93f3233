/// Errors raised while accessing or allocating image buffers.
#[derive(thiserror::Error, Debug)]
pub enum ImageError {
    #[error("invalid grayscale image buffer length (expected {expected} bytes, got {got})")]
    InvalidBuffer { expected: usize, got: usize },

    #[error("invalid grayscale image dimensions (width={width}, height={height})")]
    InvalidDimensions { width: usize, height: usize },

    #[error("patch at ({x}, {y}) with side {side} does not overlap the image")]
    EmptyRegion { x: i64, y: i64, side: usize },

    #[error("failed to allocate {bytes} bytes for an image buffer")]
    Allocation { bytes: usize },
}
