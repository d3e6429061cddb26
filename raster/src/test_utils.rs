use chrono::NaiveDate;
use glam::DVec2;
use rand::rngs::StdRng;
use rand::Rng;

use crate::band::{names, Band, BandStack, SceneInfo};
use crate::error::Result;
use crate::grid::GridSpec;

pub(crate) fn grid(width: usize, height: usize) -> GridSpec {
    GridSpec::new(width, height, DVec2::new(0.0, height as f64 * 10.0), 10.0)
}

pub(crate) fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub(crate) fn scene(id: &str, date: NaiveDate, cloudy_pixel_percentage: f64) -> SceneInfo {
    SceneInfo {
        id: id.to_string(),
        date,
        cloudy_pixel_percentage,
    }
}

/// Reflectance stack with one constant per band, in `names::REFLECTANCE` order.
pub(crate) fn constant_stack(width: usize, height: usize, values: [f64; 5]) -> Result<BandStack> {
    names::REFLECTANCE
        .iter()
        .zip(values)
        .try_fold(BandStack::new(grid(width, height), None), |stack, (name, value)| {
            stack.with_band(name, Band::filled(width, height, value))
        })
}

/// Reflectance stack with uniform values in `[0, 1)`.
pub(crate) fn random_stack(rng: &mut StdRng, width: usize, height: usize) -> Result<BandStack> {
    names::REFLECTANCE
        .iter()
        .try_fold(BandStack::new(grid(width, height), None), |stack, name| {
            let values = (0..width * height).map(|_| rng.random_range(0.0..1.0)).collect();
            stack.with_band(name, Band::from_values(width, height, values))
        })
}

/// Single-band stack holding `values`.
pub(crate) fn single_band_stack(name: &str, width: usize, height: usize, values: Vec<f64>) -> Result<BandStack> {
    BandStack::new(grid(width, height), None).with_band(name, Band::from_values(width, height, values))
}
