use std::sync::Arc;

use chrono::NaiveDate;
use common::{BitBuffer2, Buffer2};
use serde::{Deserialize, Serialize};

use crate::error::{RasterError, Result};
use crate::grid::GridSpec;

/// Sentinel-2 band names used by the indices and the cloud mask.
pub mod names {
    pub const BLUE: &str = "B2";
    pub const GREEN: &str = "B3";
    pub const RED: &str = "B4";
    pub const NIR: &str = "B8";
    pub const SWIR: &str = "B11";
    pub const CLOUD_PROBABILITY: &str = "MSK_CLDPRB";

    pub const REFLECTANCE: [&str; 5] = [BLUE, GREEN, RED, NIR, SWIR];
}

/// Per-scene metadata carried by catalog stacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneInfo {
    pub id: String,
    pub date: NaiveDate,
    pub cloudy_pixel_percentage: f64,
}

/// One channel of per-pixel values with a validity flag per pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct Band {
    pub values: Buffer2<f64>,
    pub valid: BitBuffer2,
}

impl Band {
    /// Builds a band; non-finite values are marked invalid.
    pub fn from_values(width: usize, height: usize, values: Vec<f64>) -> Self {
        let values = Buffer2::new(width, height, values);
        let valid = BitBuffer2::from_fn(width, height, |idx| values[idx].is_finite());
        Self { values, valid }
    }

    pub fn filled(width: usize, height: usize, value: f64) -> Self {
        Self::from_values(width, height, vec![value; width * height])
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.values.width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.values.height()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at linear index `idx`, `None` when the pixel is masked.
    #[inline]
    pub fn value(&self, idx: usize) -> Option<f64> {
        self.valid.get(idx).then(|| self.values[idx])
    }

    pub fn valid_count(&self) -> usize {
        self.valid.count_ones()
    }

    /// Keeps values, masks every pixel where `keep` is false.
    pub fn update_mask(&self, keep: &BitBuffer2) -> Band {
        Band {
            values: self.values.clone(),
            valid: self.valid.and(keep),
        }
    }

    fn fits(&self, grid: &GridSpec) -> bool {
        self.width() == grid.width && self.height() == grid.height
    }
}

#[derive(Debug, Clone)]
pub struct NamedBand {
    pub name: String,
    pub band: Arc<Band>,
}

/// Named bands aligned on one grid.
///
/// Stacks are never mutated in place; every operation returns a new stack
/// sharing the untouched bands.
#[derive(Debug, Clone)]
pub struct BandStack {
    grid: GridSpec,
    bands: Vec<NamedBand>,
    scene: Option<SceneInfo>,
}

impl BandStack {
    pub fn new(grid: GridSpec, scene: Option<SceneInfo>) -> Self {
        Self {
            grid,
            bands: Vec::new(),
            scene,
        }
    }

    #[inline]
    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    #[inline]
    pub fn scene(&self) -> Option<&SceneInfo> {
        self.scene.as_ref()
    }

    /// Scene id, or `composite` for derived stacks without one.
    pub fn label(&self) -> &str {
        self.scene
            .as_ref()
            .map_or("composite", |scene| scene.id.as_str())
    }

    pub fn band_names(&self) -> impl Iterator<Item = &str> {
        self.bands.iter().map(|named| named.name.as_str())
    }

    pub fn bands(&self) -> &[NamedBand] {
        &self.bands
    }

    pub fn has_band(&self, name: &str) -> bool {
        self.bands.iter().any(|named| named.name == name)
    }

    pub fn band(&self, name: &str) -> Option<&Band> {
        self.bands
            .iter()
            .find(|named| named.name == name)
            .map(|named| named.band.as_ref())
    }

    /// Looks up a band needed by `formula`.
    pub fn require(&self, formula: &str, name: &str) -> Result<&Band> {
        self.band(name).ok_or_else(|| RasterError::MissingBand {
            formula: formula.to_string(),
            band: name.to_string(),
            stack: self.label().to_string(),
        })
    }

    /// Checks every band in `names` before any pixel is touched.
    pub fn require_all(&self, formula: &str, names: &[&str]) -> Result<()> {
        for name in names {
            self.require(formula, name)?;
        }
        Ok(())
    }

    /// Returns a stack with `band` added, replacing a band of the same name.
    pub fn with_band(&self, name: &str, band: Band) -> Result<BandStack> {
        if !band.fits(&self.grid) {
            return Err(RasterError::GridMismatch {
                context: format!("adding band {name} to {}", self.label()),
                expected: self.grid.to_string(),
                actual: format!("{}x{}", band.width(), band.height()),
            });
        }

        let mut stack = self.clone();
        let band = Arc::new(band);
        match stack.bands.iter_mut().find(|named| named.name == name) {
            Some(existing) => existing.band = band,
            None => stack.bands.push(NamedBand {
                name: name.to_string(),
                band,
            }),
        }
        Ok(stack)
    }

    pub fn select(&self, names: &[&str]) -> Result<BandStack> {
        let mut bands = Vec::with_capacity(names.len());
        for name in names {
            let named = self
                .bands
                .iter()
                .find(|named| named.name == *name)
                .cloned()
                .ok_or_else(|| RasterError::MissingBand {
                    formula: "select".to_string(),
                    band: name.to_string(),
                    stack: self.label().to_string(),
                })?;
            bands.push(named);
        }
        Ok(BandStack {
            grid: self.grid,
            bands,
            scene: self.scene.clone(),
        })
    }

    /// Masks every band where `keep` is false.
    pub fn update_mask(&self, keep: &BitBuffer2) -> BandStack {
        BandStack {
            grid: self.grid,
            bands: self
                .bands
                .iter()
                .map(|named| NamedBand {
                    name: named.name.clone(),
                    band: Arc::new(named.band.update_mask(keep)),
                })
                .collect(),
            scene: self.scene.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::DVec2;

    use super::*;

    fn grid() -> GridSpec {
        GridSpec::new(2, 2, DVec2::ZERO, 10.0)
    }

    #[test]
    fn non_finite_values_are_masked() {
        let band = Band::from_values(2, 2, vec![0.1, f64::NAN, 0.3, f64::INFINITY]);
        assert_eq!(band.value(0), Some(0.1));
        assert_eq!(band.value(1), None);
        assert_eq!(band.value(3), None);
        assert_eq!(band.valid_count(), 2);
    }

    #[test]
    fn with_band_leaves_input_untouched() -> anyhow::Result<()> {
        let stack = BandStack::new(grid(), None).with_band(names::RED, Band::filled(2, 2, 0.2))?;
        let augmented = stack.with_band("NDVI", Band::filled(2, 2, 0.5))?;

        assert!(!stack.has_band("NDVI"));
        assert_eq!(augmented.band_names().collect::<Vec<_>>(), [names::RED, "NDVI"]);

        let replaced = augmented.with_band(names::RED, Band::filled(2, 2, 0.9))?;
        assert_eq!(replaced.band(names::RED).and_then(|b| b.value(0)), Some(0.9));
        assert_eq!(augmented.band(names::RED).and_then(|b| b.value(0)), Some(0.2));
        Ok(())
    }

    #[test]
    fn band_of_wrong_shape_is_rejected() {
        let result = BandStack::new(grid(), None).with_band("X", Band::filled(3, 1, 0.0));
        assert!(matches!(result, Err(RasterError::GridMismatch { .. })));
    }

    #[test]
    fn missing_band_names_formula_and_stack() {
        let scene = SceneInfo {
            id: "S2A_20220301".to_string(),
            date: NaiveDate::from_ymd_opt(2022, 3, 1).unwrap(),
            cloudy_pixel_percentage: 3.0,
        };
        let stack = BandStack::new(grid(), Some(scene));
        let err = stack.require_all("BSI", &[names::SWIR]).unwrap_err();
        assert_eq!(
            err,
            RasterError::MissingBand {
                formula: "BSI".to_string(),
                band: "B11".to_string(),
                stack: "S2A_20220301".to_string(),
            }
        );
    }

    #[test]
    fn update_mask_applies_to_all_bands() -> anyhow::Result<()> {
        let stack = BandStack::new(grid(), None)
            .with_band(names::RED, Band::filled(2, 2, 0.2))?
            .with_band(names::NIR, Band::filled(2, 2, 0.4))?;
        let keep = BitBuffer2::from_slice(2, 2, &[true, false, true, true]);
        let masked = stack.update_mask(&keep);

        for named in masked.bands() {
            assert_eq!(named.band.value(1), None);
            assert_eq!(named.band.valid_count(), 3);
        }
        assert_eq!(stack.band(names::RED).map(Band::valid_count), Some(4));
        Ok(())
    }
}
