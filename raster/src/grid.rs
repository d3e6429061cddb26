use std::fmt::Display;

use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::error::{RasterError, Result};

/// North-up pixel grid in projected metres.
///
/// `origin` is the upper-left corner; rows grow southwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub width: usize,
    pub height: usize,
    pub origin: DVec2,
    pub pixel_size: f64,
}

impl GridSpec {
    pub fn new(width: usize, height: usize, origin: DVec2, pixel_size: f64) -> Self {
        assert!(pixel_size > 0.0, "pixel size must be positive");
        Self {
            width,
            height,
            origin,
            pixel_size,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Area covered by one pixel, in square metres.
    #[inline]
    pub fn pixel_area_m2(&self) -> f64 {
        self.pixel_size * self.pixel_size
    }

    #[inline]
    pub fn pixel_center(&self, x: usize, y: usize) -> DVec2 {
        DVec2::new(
            self.origin.x + (x as f64 + 0.5) * self.pixel_size,
            self.origin.y - (y as f64 + 0.5) * self.pixel_size,
        )
    }

    /// Lower-left and upper-right corners.
    pub fn bounds(&self) -> (DVec2, DVec2) {
        let min = DVec2::new(
            self.origin.x,
            self.origin.y - self.height as f64 * self.pixel_size,
        );
        let max = DVec2::new(
            self.origin.x + self.width as f64 * self.pixel_size,
            self.origin.y,
        );
        (min, max)
    }

    /// Grids deserialized from files bypass [`GridSpec::new`]; check them here.
    pub fn validate(&self) -> Result<()> {
        if !(self.pixel_size.is_finite() && self.pixel_size > 0.0) {
            return Err(RasterError::InvalidParameter {
                name: "pixel_size",
                value: self.pixel_size.to_string(),
                reason: "must be a positive number of metres".to_string(),
            });
        }
        if self.is_empty() {
            return Err(RasterError::InvalidParameter {
                name: "grid",
                value: format!("{}x{}", self.width, self.height),
                reason: "must contain at least one pixel".to_string(),
            });
        }
        if !(self.origin.x.is_finite() && self.origin.y.is_finite()) {
            return Err(RasterError::InvalidParameter {
                name: "origin",
                value: format!("({}, {})", self.origin.x, self.origin.y),
                reason: "must be finite".to_string(),
            });
        }
        Ok(())
    }

    pub fn ensure_same(&self, other: &GridSpec, context: &str) -> Result<()> {
        if self == other {
            return Ok(());
        }
        Err(RasterError::GridMismatch {
            context: context.to_string(),
            expected: self.to_string(),
            actual: other.to_string(),
        })
    }
}

impl Display for GridSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{} @ {} m from ({}, {})",
            self.width, self.height, self.pixel_size, self.origin.x, self.origin.y
        )
    }
}
