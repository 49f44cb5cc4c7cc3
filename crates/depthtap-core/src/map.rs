//! Per-frame pixel maps produced by processing nodes
//!
//! Maps are immutable once built. A node replaces its map wholesale on every
//! generation cycle; clones share the underlying buffer.

use std::collections::BTreeSet;
use std::sync::Arc;

/// Depth grid in millimeters, row-major. A sample of 0 means no reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthMap {
    width: usize,
    height: usize,
    data: Arc<[u16]>,
}

impl DepthMap {
    /// Build a map from row-major samples. Returns `None` when the buffer
    /// length does not match `width * height`.
    pub fn new(width: usize, height: usize, data: Vec<u16>) -> Option<Self> {
        if data.len() != width * height {
            return None;
        }
        Some(Self {
            width,
            height,
            data: data.into(),
        })
    }

    /// Build a map by evaluating `f(x, y)` for every pixel
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> u16) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data: data.into(),
        }
    }

    /// Map of the given size with every sample set to `millimeters`
    pub fn filled(width: usize, height: usize, millimeters: u16) -> Self {
        Self {
            width,
            height,
            data: vec![millimeters; width * height].into(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn samples(&self) -> &[u16] {
        &self.data
    }

    /// Distance at `(x, y)`, or `None` outside `[0, width) x [0, height)`
    pub fn sample_at(&self, x: usize, y: usize) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data.get(y * self.width + x).copied()
    }

    /// Integer midpoint `(width / 2, height / 2)`
    pub fn midpoint(&self) -> (usize, usize) {
        (self.width / 2, self.height / 2)
    }

    /// Sample at the midpoint; `None` only for an empty map
    pub fn center_sample(&self) -> Option<u16> {
        let (x, y) = self.midpoint();
        self.sample_at(x, y)
    }

    /// Closest and farthest valid (non-zero) readings
    pub fn valid_range(&self) -> Option<(u16, u16)> {
        self.data
            .iter()
            .copied()
            .filter(|&d| d != 0)
            .fold(None, |acc, d| match acc {
                None => Some((d, d)),
                Some((lo, hi)) => Some((lo.min(d), hi.max(d))),
            })
    }
}

/// RGB24 color image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMap {
    width: usize,
    height: usize,
    data: Arc<[u8]>,
}

impl ImageMap {
    pub fn new(width: usize, height: usize, rgb: Vec<u8>) -> Option<Self> {
        if rgb.len() != width * height * 3 {
            return None;
        }
        Some(Self {
            width,
            height,
            data: rgb.into(),
        })
    }

    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> [u8; 3]) -> Self {
        let mut data = Vec::with_capacity(width * height * 3);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&f(x, y));
            }
        }
        Self {
            width,
            height,
            data: data.into(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixel_at(&self, x: usize, y: usize) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y * self.width + x) * 3;
        Some([self.data[offset], self.data[offset + 1], self.data[offset + 2]])
    }
}

/// Per-pixel user labels; 0 is background
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    width: usize,
    height: usize,
    data: Arc<[u16]>,
}

impl LabelMap {
    pub fn new(width: usize, height: usize, labels: Vec<u16>) -> Option<Self> {
        if labels.len() != width * height {
            return None;
        }
        Some(Self {
            width,
            height,
            data: labels.into(),
        })
    }

    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> u16) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data: data.into(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn label_at(&self, x: usize, y: usize) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data.get(y * self.width + x).copied()
    }

    /// Number of distinct non-background labels
    pub fn user_count(&self) -> usize {
        self.data
            .iter()
            .filter(|&&l| l != 0)
            .collect::<BTreeSet<_>>()
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midpoint_uses_truncating_division() {
        let map = DepthMap::filled(640, 480, 0);
        assert_eq!(map.midpoint(), (320, 240));

        let odd = DepthMap::filled(5, 3, 0);
        assert_eq!(odd.midpoint(), (2, 1));
    }

    #[test]
    fn sample_at_reads_row_major() {
        let map = DepthMap::new(3, 2, vec![1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(map.sample_at(0, 0), Some(1));
        assert_eq!(map.sample_at(2, 0), Some(3));
        assert_eq!(map.sample_at(0, 1), Some(4));
        assert_eq!(map.sample_at(2, 1), Some(6));
        assert_eq!(map.center_sample(), Some(5));
    }

    #[test]
    fn sample_outside_grid_is_none() {
        let map = DepthMap::filled(4, 4, 900);
        assert_eq!(map.sample_at(4, 0), None);
        assert_eq!(map.sample_at(0, 4), None);
        assert_eq!(DepthMap::filled(0, 0, 0).center_sample(), None);
    }

    #[test]
    fn from_fn_visits_every_pixel_row_major() {
        let map = DepthMap::from_fn(3, 2, |x, y| (y * 10 + x) as u16);
        assert_eq!(map.samples(), &[0, 1, 2, 10, 11, 12]);
    }

    #[test]
    fn rejects_mismatched_buffers() {
        assert!(DepthMap::new(2, 2, vec![0; 3]).is_none());
        assert!(ImageMap::new(2, 2, vec![0; 11]).is_none());
        assert!(LabelMap::new(2, 2, vec![0; 5]).is_none());
    }

    #[test]
    fn valid_range_skips_zero_readings() {
        let map = DepthMap::new(2, 2, vec![0, 800, 2400, 0]).unwrap();
        assert_eq!(map.valid_range(), Some((800, 2400)));
        assert_eq!(DepthMap::filled(2, 2, 0).valid_range(), None);
    }

    #[test]
    fn counts_distinct_users() {
        let labels = LabelMap::new(3, 2, vec![0, 1, 1, 2, 0, 2]).unwrap();
        assert_eq!(labels.user_count(), 2);
        assert_eq!(labels.label_at(1, 0), Some(1));
    }

    #[test]
    fn image_pixels_are_rgb_triplets() {
        let image = ImageMap::new(2, 1, vec![10, 20, 30, 40, 50, 60]).unwrap();
        assert_eq!(image.pixel_at(1, 0), Some([40, 50, 60]));
        assert_eq!(image.pixel_at(2, 0), None);
    }
}
