//! Flat feature-map volumes paired with their shape.
//!
//! # Layout
//!
//! A [`Volume`] is a flat sequence of `f32` laid out as `[depth][height][width]`,
//! row-major within each depth slice. The buffer itself carries no shape; the
//! [`Shape`] next to it does, and every constructor checks the two agree.
//!
//! ## Example
//!
//! ```rust
//! use briny_conv::volume::{Shape, Volume};
//!
//! let shape = Shape::new(3, 3, 1);
//! let v = Volume::new(shape, (1..=9).map(|x| x as f32).collect()).unwrap();
//! assert_eq!(v.get(0, 1, 2), 6.0);
//! ```

use crate::error::ConfigError;

/// Width, height and depth of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Shape {
    /// Columns per feature map.
    pub width: usize,
    /// Rows per feature map.
    pub height: usize,
    /// Number of feature maps.
    pub depth: usize,
}

impl Shape {
    /// Creates a new shape.
    #[must_use]
    pub const fn new(width: usize, height: usize, depth: usize) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Elements in one feature map (`width * height`).
    #[must_use]
    pub const fn plane(&self) -> usize {
        self.width * self.height
    }

    /// Total number of elements.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.width * self.height * self.depth
    }

    /// Returns `true` if any dimension is zero.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of elements, or `None` on overflow.
    #[must_use]
    pub fn checked_len(&self) -> Option<usize> {
        self.width
            .checked_mul(self.height)?
            .checked_mul(self.depth)
    }
}

impl core::fmt::Display for Shape {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.depth)
    }
}

/// A feature-map volume: flat `f32` data and the shape it is read with.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    shape: Shape,
    data: Vec<f32>,
}

impl Volume {
    /// Wraps `data` as a volume of the given shape.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::VolumeLength`] if `data.len()` does not match the shape.
    pub fn new(shape: Shape, data: Vec<f32>) -> Result<Self, ConfigError> {
        let expected = shape.checked_len().ok_or(ConfigError::Overflow)?;
        if data.len() != expected {
            return Err(ConfigError::VolumeLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// A zero-filled volume.
    #[must_use]
    pub fn zeros(shape: Shape) -> Self {
        Self {
            shape,
            data: vec![0.0; shape.len()],
        }
    }

    /// The shape of this volume.
    #[must_use]
    pub const fn shape(&self) -> Shape {
        self.shape
    }

    /// Flat row-major data.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Element at feature map `d`, row `r`, column `c`.
    ///
    /// # Panics
    ///
    /// Panics if the position lies outside the volume.
    #[must_use]
    pub fn get(&self, d: usize, r: usize, c: usize) -> f32 {
        assert!(
            d < self.shape.depth && r < self.shape.height && c < self.shape.width,
            "position ({d}, {r}, {c}) outside volume {}",
            self.shape
        );
        self.data[d * self.shape.plane() + r * self.shape.width + c]
    }

    /// Consumes the volume, returning the flat data.
    #[must_use]
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_rejects_wrong_length() {
        let err = Volume::new(Shape::new(2, 2, 2), vec![0.0; 7]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::VolumeLength {
                expected: 8,
                actual: 7
            }
        ));
    }

    #[test]
    fn volume_indexing_is_depth_row_column() {
        let data: Vec<f32> = (0..12).map(|x| x as f32).collect();
        let v = Volume::new(Shape::new(3, 2, 2), data).unwrap();
        assert_eq!(v.get(0, 0, 0), 0.0);
        assert_eq!(v.get(0, 1, 0), 3.0);
        assert_eq!(v.get(1, 0, 2), 8.0);
        assert_eq!(v.get(1, 1, 2), 11.0);
    }

    #[test]
    fn checked_len_detects_overflow() {
        assert_eq!(Shape::new(usize::MAX, 2, 1).checked_len(), None);
        assert_eq!(Shape::new(4, 5, 6).checked_len(), Some(120));
    }
}
