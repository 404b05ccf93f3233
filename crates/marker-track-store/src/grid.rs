use serde::Serialize;

use crate::StoreError;

/// Dense camera × frame table with checked indexing.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Grid<T> {
    cameras: usize,
    frames: usize,
    data: Vec<T>, // camera-major, len = cameras * frames
}

impl<T: Clone + Default> Grid<T> {
    pub fn new(cameras: usize, frames: usize) -> Self {
        Self {
            cameras,
            frames,
            data: vec![T::default(); cameras * frames],
        }
    }

    /// Grow or truncate, keeping every cell that stays in range.
    pub fn resize(&mut self, cameras: usize, frames: usize) {
        let mut data = vec![T::default(); cameras * frames];
        for cam in 0..self.cameras.min(cameras) {
            let keep = self.frames.min(frames);
            let src = cam * self.frames;
            let dst = cam * frames;
            data[dst..dst + keep].clone_from_slice(&self.data[src..src + keep]);
        }
        self.cameras = cameras;
        self.frames = frames;
        self.data = data;
    }
}

impl<T> Grid<T> {
    #[inline]
    pub fn cameras(&self) -> usize {
        self.cameras
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    fn index(&self, camera: usize, frame: usize) -> Result<usize, StoreError> {
        if camera >= self.cameras {
            return Err(StoreError::CameraOutOfRange {
                camera,
                cameras: self.cameras,
            });
        }
        if frame >= self.frames {
            return Err(StoreError::FrameOutOfRange {
                frame,
                frames: self.frames,
            });
        }
        Ok(camera * self.frames + frame)
    }

    pub fn get(&self, camera: usize, frame: usize) -> Result<&T, StoreError> {
        let i = self.index(camera, frame)?;
        Ok(&self.data[i])
    }

    pub fn get_mut(&mut self, camera: usize, frame: usize) -> Result<&mut T, StoreError> {
        let i = self.index(camera, frame)?;
        Ok(&mut self.data[i])
    }

    /// All frames of one camera.
    pub fn camera(&self, camera: usize) -> Result<&[T], StoreError> {
        let start = self.index(camera, 0).or_else(|e| match e {
            // A zero-frame grid still has valid (empty) camera rows.
            StoreError::FrameOutOfRange { .. } => Ok(camera * self.frames),
            other => Err(other),
        })?;
        Ok(&self.data[start..start + self.frames])
    }

    /// One frame across all cameras.
    pub fn frame(&self, frame: usize) -> impl Iterator<Item = &T> + '_ {
        let frames = self.frames;
        self.data.iter().skip(frame).step_by(frames.max(1)).take(if frame < frames {
            self.cameras
        } else {
            0
        })
    }

    pub fn frame_mut(&mut self, frame: usize) -> impl Iterator<Item = &mut T> + '_ {
        let frames = self.frames;
        let cameras = if frame < frames { self.cameras } else { 0 };
        self.data.iter_mut().skip(frame).step_by(frames.max(1)).take(cameras)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.data.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexing_is_bounds_checked() {
        let mut g: Grid<i32> = Grid::new(2, 3);
        *g.get_mut(1, 2).unwrap() = 7;
        assert_eq!(*g.get(1, 2).unwrap(), 7);
        assert_eq!(
            g.get(2, 0),
            Err(StoreError::CameraOutOfRange {
                camera: 2,
                cameras: 2
            })
        );
        assert_eq!(
            g.get(0, 3),
            Err(StoreError::FrameOutOfRange {
                frame: 3,
                frames: 3
            })
        );
    }

    #[test]
    fn frame_iterators_walk_across_cameras() {
        let mut g: Grid<usize> = Grid::new(3, 4);
        for cam in 0..3 {
            for f in 0..4 {
                *g.get_mut(cam, f).unwrap() = cam * 10 + f;
            }
        }
        assert_eq!(g.frame(2).copied().collect::<Vec<_>>(), vec![2, 12, 22]);
        for v in g.frame_mut(1) {
            *v = 0;
        }
        assert_eq!(g.camera(2).unwrap(), &[20, 0, 22, 23]);
        assert_eq!(g.frame(4).count(), 0);
    }

    #[test]
    fn resize_keeps_overlapping_cells() {
        let mut g: Grid<usize> = Grid::new(2, 3);
        *g.get_mut(0, 1).unwrap() = 5;
        *g.get_mut(1, 2).unwrap() = 9;
        g.resize(3, 2);
        assert_eq!(*g.get(0, 1).unwrap(), 5);
        assert_eq!(*g.get(2, 1).unwrap(), 0);
        assert!(g.get(1, 2).is_err());
        g.resize(3, 5);
        assert_eq!(*g.get(0, 1).unwrap(), 5);
        assert_eq!(*g.get(1, 4).unwrap(), 0);
    }
}
