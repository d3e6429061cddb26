use common::BitBuffer2;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};

use crate::band::{Band, BandStack};
use crate::error::{RasterError, Result};
use crate::grid::GridSpec;
use crate::region::Region;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    #[strum(to_string = ">")]
    Gt,
    #[strum(to_string = ">=")]
    Ge,
    #[strum(to_string = "<")]
    Lt,
    #[strum(to_string = "<=")]
    Le,
    #[strum(to_string = "==")]
    Eq,
}

impl Comparison {
    #[inline]
    pub fn test(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Gt => value > threshold,
            Comparison::Ge => value >= threshold,
            Comparison::Lt => value < threshold,
            Comparison::Le => value <= threshold,
            Comparison::Eq => value == threshold,
        }
    }
}

/// Boolean classification over a grid.
///
/// `truth` is only ever set where `valid` is set. Invalid pixels are neither
/// true nor false and take no part in statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    grid: GridSpec,
    truth: BitBuffer2,
    valid: BitBuffer2,
}

impl Mask {
    pub fn new(grid: GridSpec, truth: BitBuffer2, valid: BitBuffer2) -> Self {
        assert_eq!((truth.width(), truth.height()), (grid.width, grid.height));
        assert_eq!((valid.width(), valid.height()), (grid.width, grid.height));
        let truth = truth.and(&valid);
        Self { grid, truth, valid }
    }

    /// Every pixel valid and set to `value`.
    pub fn filled(grid: GridSpec, value: bool) -> Self {
        Self::new(
            grid,
            BitBuffer2::new_filled(grid.width, grid.height, value),
            BitBuffer2::new_filled(grid.width, grid.height, true),
        )
    }

    pub fn threshold(grid: GridSpec, band: &Band, cmp: Comparison, value: f64) -> Self {
        let truth = BitBuffer2::from_fn(grid.width, grid.height, |idx| {
            band.value(idx).is_some_and(|v| cmp.test(v, value))
        });
        Self::new(grid, truth, band.valid.clone())
    }

    /// Thresholds the band `name` of `stack`.
    pub fn threshold_band(stack: &BandStack, name: &str, cmp: Comparison, value: f64) -> Result<Self> {
        let band = stack.require("threshold", name)?;
        Ok(Self::threshold(*stack.grid(), band, cmp, value))
    }

    #[inline]
    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    #[inline]
    pub fn truth(&self) -> &BitBuffer2 {
        &self.truth
    }

    #[inline]
    pub fn valid(&self) -> &BitBuffer2 {
        &self.valid
    }

    /// `Some(bool)` for a valid pixel, `None` otherwise.
    #[inline]
    pub fn get(&self, idx: usize) -> Option<bool> {
        self.valid.get(idx).then(|| self.truth.get(idx))
    }

    pub fn count_true(&self) -> usize {
        self.truth.count_ones()
    }

    pub fn count_valid(&self) -> usize {
        self.valid.count_ones()
    }

    pub fn and(&self, other: &Mask) -> Result<Mask> {
        self.combine(other, "and", BitBuffer2::and)
    }

    pub fn or(&self, other: &Mask) -> Result<Mask> {
        self.combine(other, "or", BitBuffer2::or)
    }

    /// `self AND NOT other`
    pub fn and_not(&self, other: &Mask) -> Result<Mask> {
        self.combine(other, "and not", BitBuffer2::and_not)
    }

    pub fn not(&self) -> Mask {
        Mask::new(self.grid, self.truth.not(), self.valid.clone())
    }

    /// Invalidates every pixel whose centre lies outside `region`.
    pub fn clip(&self, region: &Region) -> Mask {
        let inside = region.rasterize(&self.grid);
        Mask::new(self.grid, self.truth.clone(), self.valid.and(&inside))
    }

    /// Same as [`Mask::clip`] with a precomputed footprint.
    pub fn clip_to(&self, inside: &BitBuffer2) -> Mask {
        Mask::new(self.grid, self.truth.clone(), self.valid.and(inside))
    }

    pub fn is_subset_of(&self, other: &Mask) -> bool {
        self.truth.is_subset_of(&other.truth)
    }

    pub fn is_disjoint(&self, other: &Mask) -> bool {
        self.truth.is_disjoint(&other.truth)
    }

    /// 1.0 / 0.0 band, masked where the mask is invalid.
    pub fn to_band(&self) -> Band {
        let values = (0..self.grid.len())
            .map(|idx| match self.get(idx) {
                Some(true) => 1.0,
                Some(false) => 0.0,
                None => f64::NAN,
            })
            .collect();
        Band::from_values(self.grid.width, self.grid.height, values)
    }

    fn combine<F>(&self, other: &Mask, op: &str, f: F) -> Result<Mask>
    where
        F: Fn(&BitBuffer2, &BitBuffer2) -> BitBuffer2,
    {
        self.grid.ensure_same(&other.grid, &format!("mask {op}"))?;
        let valid = self.valid.and(&other.valid);
        Ok(Mask::new(self.grid, f(&self.truth, &other.truth), valid))
    }
}

impl TryFrom<(&BandStack, &str)> for Mask {
    type Error = RasterError;

    /// Reads a 0/1 band back into a mask.
    fn try_from((stack, name): (&BandStack, &str)) -> Result<Self> {
        Self::threshold_band(stack, name, Comparison::Gt, 0.5)
    }
}

#[cfg(test)]
mod tests {
    use glam::DVec2;

    use super::*;
    use crate::band::names;
    use crate::region::Polygon;
    use crate::test_utils::{grid, single_band_stack};

    fn mask(values: &[Option<bool>]) -> Mask {
        let grid = grid(values.len(), 1);
        let truth = BitBuffer2::from_fn(values.len(), 1, |idx| values[idx] == Some(true));
        let valid = BitBuffer2::from_fn(values.len(), 1, |idx| values[idx].is_some());
        Mask::new(grid, truth, valid)
    }

    fn states(mask: &Mask) -> Vec<Option<bool>> {
        (0..mask.grid().len()).map(|idx| mask.get(idx)).collect()
    }

    #[test]
    fn threshold_keeps_invalid_pixels_invalid() -> anyhow::Result<()> {
        let stack = single_band_stack("BSI", 4, 1, vec![0.2, -0.1, f64::NAN, 0.0])?;
        let bare = Mask::threshold_band(&stack, "BSI", Comparison::Gt, 0.0)?;
        assert_eq!(states(&bare), [Some(true), Some(false), None, Some(false)]);

        let ge = Mask::threshold_band(&stack, "BSI", Comparison::Ge, 0.0)?;
        assert_eq!(ge.get(3), Some(true));
        Ok(())
    }

    #[test]
    fn threshold_on_missing_band() -> anyhow::Result<()> {
        let stack = single_band_stack(names::RED, 1, 1, vec![0.2])?;
        assert!(matches!(
            Mask::threshold_band(&stack, "SAVI", Comparison::Lt, 0.3),
            Err(RasterError::MissingBand { .. })
        ));
        Ok(())
    }

    #[test]
    fn algebra_propagates_validity() -> anyhow::Result<()> {
        let a = mask(&[Some(true), Some(true), Some(false), None]);
        let b = mask(&[Some(true), Some(false), Some(false), Some(true)]);

        assert_eq!(states(&a.and(&b)?), [Some(true), Some(false), Some(false), None]);
        assert_eq!(states(&a.or(&b)?), [Some(true), Some(true), Some(false), None]);
        assert_eq!(states(&a.and_not(&b)?), [Some(false), Some(true), Some(false), None]);
        assert_eq!(states(&a.not()), [Some(false), Some(false), Some(true), None]);
        Ok(())
    }

    #[test]
    fn and_is_subset_and_delta_disjoint() -> anyhow::Result<()> {
        let winter = mask(&[Some(true), Some(true), Some(false), Some(false)]);
        let summer = mask(&[Some(true), Some(false), Some(true), Some(false)]);
        let common = winter.and(&summer)?;
        let delta = winter.and_not(&summer)?;

        assert!(common.is_subset_of(&winter));
        assert!(common.is_subset_of(&summer));
        assert!(delta.is_disjoint(&common));
        Ok(())
    }

    #[test]
    fn clip_excludes_outside_pixels() {
        let all = Mask::filled(grid(4, 1), true);
        let region = Region::new("left", vec![Polygon::rectangle(DVec2::ZERO, DVec2::new(20.0, 10.0))]);
        let clipped = all.clip(&region);

        assert_eq!(states(&clipped), [Some(true), Some(true), None, None]);
        assert_eq!(clipped.count_true(), 2);
        assert_eq!(clipped.count_valid(), 2);
    }

    #[test]
    fn grid_mismatch_is_an_error() {
        let a = Mask::filled(grid(2, 2), true);
        let b = Mask::filled(grid(4, 1), true);
        assert!(matches!(a.and(&b), Err(RasterError::GridMismatch { .. })));
    }

    #[test]
    fn band_round_trip() -> anyhow::Result<()> {
        let original = mask(&[Some(true), None, Some(false)]);
        let stack = BandStack::new(*original.grid(), None).with_band("bare", original.to_band())?;
        let restored = Mask::try_from((&stack, "bare"))?;
        assert_eq!(restored, original);
        Ok(())
    }

    #[test]
    fn comparison_display() {
        assert_eq!(Comparison::Lt.to_string(), "<");
        assert!(Comparison::Le.test(0.3, 0.3));
        assert!(!Comparison::Lt.test(0.3, 0.3));
    }
}
