pub mod diagnostics;
pub mod inverse;
pub mod resample;

use image::{GrayImage, ImageBuffer, Luma, Rgba, RgbaImage};
use nalgebra::Point3;

use crate::error::StraightenError;

pub use diagnostics::{sample_counts, FoldOverReport};
pub use inverse::{InverseMapper, InverseMatch, SliceScope};
pub use resample::{
    forward_map, forward_map_point, resample_slices, CoverageWarning, ResampleOptions,
};

pub type Gray16Image = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Read access to a voxel grid. Multi-channel images expose one scalar per
/// channel; the resampler copies every channel with the same geometry.
pub trait VoxelSource: Sync {
    /// `[x, y, z]` dimensions.
    fn extents(&self) -> [usize; 3];
    fn channels(&self) -> usize;
    fn voxel(&self, x: usize, y: usize, z: usize, channel: usize) -> f32;
}

/// Nearest voxel to `p`, or `None` when it falls outside `extents`.
pub fn nearest_voxel(p: &Point3<f64>, extents: [usize; 3]) -> Option<[usize; 3]> {
    let mut out = [0usize; 3];
    for (axis, value) in [p.x, p.y, p.z].into_iter().enumerate() {
        let rounded = (value + 0.5).floor();
        if !(rounded >= 0.0) || rounded >= extents[axis] as f64 {
            return None;
        }
        out[axis] = rounded as usize;
    }
    Some(out)
}

/// Dense in-memory voxel grid, x fastest, channels interleaved.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelVolume {
    extents: [usize; 3],
    channels: usize,
    data: Vec<f32>,
}

impl VoxelVolume {
    pub fn new(extents: [usize; 3], channels: usize) -> Self {
        let len = extents[0] * extents[1] * extents[2] * channels;
        VoxelVolume {
            extents,
            channels,
            data: vec![0.0; len],
        }
    }

    pub fn from_data(
        extents: [usize; 3],
        channels: usize,
        data: Vec<f32>,
    ) -> Result<Self, StraightenError> {
        let expected = extents[0] * extents[1] * extents[2] * channels;
        if data.len() != expected {
            return Err(StraightenError::VolumeShape {
                expected,
                actual: data.len(),
            });
        }
        Ok(VoxelVolume {
            extents,
            channels,
            data,
        })
    }

    /// Fills a single-channel volume from `f(x, y, z)`.
    pub fn from_fn<F: Fn(usize, usize, usize) -> f32>(extents: [usize; 3], f: F) -> Self {
        let mut volume = Self::new(extents, 1);
        for z in 0..extents[2] {
            for y in 0..extents[1] {
                for x in 0..extents[0] {
                    volume.set(x, y, z, 0, f(x, y, z));
                }
            }
        }
        volume
    }

    pub fn index(&self, x: usize, y: usize, z: usize, channel: usize) -> usize {
        ((z * self.extents[1] + y) * self.extents[0] + x) * self.channels + channel
    }

    pub fn get(&self, x: usize, y: usize, z: usize, channel: usize) -> Option<f32> {
        if x >= self.extents[0]
            || y >= self.extents[1]
            || z >= self.extents[2]
            || channel >= self.channels
        {
            return None;
        }
        Some(self.data[self.index(x, y, z, channel)])
    }

    pub fn set(&mut self, x: usize, y: usize, z: usize, channel: usize, value: f32) {
        let i = self.index(x, y, z, channel);
        self.data[i] = value;
    }

    /// Values in one z slice.
    pub fn slice_len(&self) -> usize {
        self.extents[0] * self.extents[1] * self.channels
    }

    pub fn slice(&self, z: usize) -> &[f32] {
        let len = self.slice_len();
        &self.data[z * len..(z + 1) * len]
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Single-channel volume from equally sized 16-bit grayscale slices.
    pub fn from_image_stack(slices: &[Gray16Image]) -> Result<Self, StraightenError> {
        let dims: Vec<(u32, u32)> = slices.iter().map(|s| s.dimensions()).collect();
        Self::from_scalar_slices(&dims, |z, x, y| slices[z].get_pixel(x, y).0[0] as f32)
    }

    /// Single-channel volume from equally sized 8-bit grayscale slices.
    pub fn from_gray8_stack(slices: &[GrayImage]) -> Result<Self, StraightenError> {
        let dims: Vec<(u32, u32)> = slices.iter().map(|s| s.dimensions()).collect();
        Self::from_scalar_slices(&dims, |z, x, y| slices[z].get_pixel(x, y).0[0] as f32)
    }

    fn from_scalar_slices<F>(dims: &[(u32, u32)], value: F) -> Result<Self, StraightenError>
    where
        F: Fn(usize, u32, u32) -> f32,
    {
        let (w, h) = dims.first().copied().unwrap_or((0, 0));
        let extents = [w as usize, h as usize, dims.len()];
        if let Some(&(sw, sh)) = dims.iter().find(|d| **d != (w, h)) {
            return Err(StraightenError::VolumeShape {
                expected: extents[0] * extents[1],
                actual: sw as usize * sh as usize,
            });
        }
        let mut volume = Self::new(extents, 1);
        for z in 0..dims.len() {
            for y in 0..h {
                for x in 0..w {
                    volume.set(x as usize, y as usize, z, 0, value(z, x, y));
                }
            }
        }
        Ok(volume)
    }

    /// Four-channel volume from equally sized RGBA slices.
    pub fn from_rgba_stack(slices: &[RgbaImage]) -> Result<Self, StraightenError> {
        let (w, h) = slices.first().map(|s| s.dimensions()).unwrap_or((0, 0));
        let extents = [w as usize, h as usize, slices.len()];
        let mut volume = Self::new(extents, 4);
        for (z, slice) in slices.iter().enumerate() {
            if slice.dimensions() != (w, h) {
                let (sw, sh) = slice.dimensions();
                return Err(StraightenError::VolumeShape {
                    expected: extents[0] * extents[1],
                    actual: sw as usize * sh as usize,
                });
            }
            for (x, y, pixel) in slice.enumerate_pixels() {
                for (c, value) in pixel.0.iter().enumerate() {
                    volume.set(x as usize, y as usize, z, c, *value as f32);
                }
            }
        }
        Ok(volume)
    }

    /// One z slice of `channel` as a 16-bit grayscale image, stretched from the
    /// slice minimum to its maximum.
    pub fn slice_image(&self, z: usize, channel: usize) -> Option<Gray16Image> {
        if z >= self.extents[2] || channel >= self.channels {
            return None;
        }
        let values: Vec<f32> = self
            .slice(z)
            .iter()
            .skip(channel)
            .step_by(self.channels)
            .cloned()
            .collect();
        let min = values.iter().cloned().fold(f32::INFINITY, f32::min);
        let max = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let range = if max > min { max - min } else { 1.0 };
        let w = self.extents[0];
        Some(ImageBuffer::from_fn(
            self.extents[0] as u32,
            self.extents[1] as u32,
            |x, y| {
                let v = values[y as usize * w + x as usize];
                Luma([(((v - min) / range) * u16::MAX as f32).round() as u16])
            },
        ))
    }

    /// One z slice of a four-channel volume as an RGBA image (values clamped to
    /// `0..=255`).
    pub fn slice_rgba(&self, z: usize) -> Option<RgbaImage> {
        if z >= self.extents[2] || self.channels != 4 {
            return None;
        }
        Some(ImageBuffer::from_fn(
            self.extents[0] as u32,
            self.extents[1] as u32,
            |x, y| {
                let mut px = [0u8; 4];
                for (c, out) in px.iter_mut().enumerate() {
                    let v = self.data[self.index(x as usize, y as usize, z, c)];
                    *out = v.round().clamp(0.0, 255.0) as u8;
                }
                Rgba(px)
            },
        ))
    }
}

impl VoxelSource for VoxelVolume {
    fn extents(&self) -> [usize; 3] {
        self.extents
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn voxel(&self, x: usize, y: usize, z: usize, channel: usize) -> f32 {
        self.data[self.index(x, y, z, channel)]
    }
}
