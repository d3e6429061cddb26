//! Spectral indices
//!
//! Each index is a fixed formula over named Sentinel-2 bands. Computing one
//! index never requires another, and the input stack is left unchanged.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::band::{names, Band, BandStack};
use crate::error::Result;

/// Soil brightness correction factor for SAVI.
pub const SAVI_L: f64 = 0.5;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumIter,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum SpectralIndex {
    /// Bare Soil Index
    Bsi,
    /// Soil Adjusted Vegetation Index
    Savi,
    /// Normalized Difference Vegetation Index
    Ndvi,
    /// Normalized Difference Snow Index
    Ndsi,
    /// Normalized Difference Moisture Index
    Ndmi,
}

impl SpectralIndex {
    /// Name of the band the index is stored under.
    pub fn band_name(&self) -> &'static str {
        match self {
            SpectralIndex::Bsi => "BSI",
            SpectralIndex::Savi => "SAVI",
            SpectralIndex::Ndvi => "NDVI",
            SpectralIndex::Ndsi => "NDSI",
            SpectralIndex::Ndmi => "NDMI",
        }
    }

    /// Input bands, in the order `evaluate` expects them.
    pub fn input_bands(&self) -> &'static [&'static str] {
        match self {
            SpectralIndex::Bsi => &[names::SWIR, names::RED, names::NIR, names::BLUE],
            SpectralIndex::Savi | SpectralIndex::Ndvi => &[names::NIR, names::RED],
            SpectralIndex::Ndsi => &[names::GREEN, names::SWIR],
            SpectralIndex::Ndmi => &[names::NIR, names::SWIR],
        }
    }

    /// Evaluates the formula for one pixel.
    ///
    /// Returns `None` when the denominator is zero or the result is not finite.
    pub fn evaluate(&self, inputs: &[f64]) -> Option<f64> {
        assert_eq!(inputs.len(), self.input_bands().len());

        match *self {
            SpectralIndex::Bsi => {
                let (swir, red, nir, blue) = (inputs[0], inputs[1], inputs[2], inputs[3]);
                let soil = swir + red;
                let veg = nir + blue;
                ratio(soil - veg, soil + veg)
            }
            SpectralIndex::Savi => {
                let (nir, red) = (inputs[0], inputs[1]);
                ratio(nir - red, nir + red + SAVI_L).map(|v| v * (1.0 + SAVI_L))
            }
            SpectralIndex::Ndvi | SpectralIndex::Ndsi | SpectralIndex::Ndmi => {
                normalized_difference(inputs[0], inputs[1])
            }
        }
    }

    /// Computes the index band for every pixel of `stack`.
    ///
    /// All input bands are checked before any pixel is computed. A pixel is
    /// invalid in the result when any input pixel is invalid or the formula
    /// is singular there.
    pub fn compute(&self, stack: &BandStack) -> Result<Band> {
        let formula = self.band_name();
        stack.require_all(formula, self.input_bands())?;
        let bands: Vec<&Band> = self
            .input_bands()
            .iter()
            .map(|name| stack.require(formula, name))
            .collect::<Result<_>>()?;

        let width = stack.grid().width;
        let height = stack.grid().height;

        let values: Vec<f64> = (0..height)
            .into_par_iter()
            .flat_map_iter(|y| {
                let bands = &bands;
                (0..width).map(move |x| {
                    let idx = y * width + x;
                    let mut pixel = [0.0f64; 4];
                    for (slot, band) in pixel.iter_mut().zip(bands.iter()) {
                        match band.value(idx) {
                            Some(value) => *slot = value,
                            None => return f64::NAN,
                        }
                    }
                    self.evaluate(&pixel[..bands.len()]).unwrap_or(f64::NAN)
                })
            })
            .collect();

        Ok(Band::from_values(width, height, values))
    }

    /// Returns `stack` augmented with this index band.
    pub fn add_to(&self, stack: &BandStack) -> Result<BandStack> {
        let band = self.compute(stack)?;
        stack.with_band(self.band_name(), band)
    }
}

/// Adds every index in `indices`, in order.
pub fn add_indices(stack: &BandStack, indices: &[SpectralIndex]) -> Result<BandStack> {
    indices
        .iter()
        .try_fold(stack.clone(), |stack, index| index.add_to(&stack))
}

/// `(a - b) / (a + b)`
pub fn normalized_difference(a: f64, b: f64) -> Option<f64> {
    ratio(a - b, a + b)
}

fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator.abs() < common::EPSILON {
        return None;
    }
    let value = numerator / denominator;
    value.is_finite().then_some(value)
}
