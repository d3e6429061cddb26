//! Region statistics under a pixel budget.
//!
//! Reductions sample the region's pixels every `stride` pixels, following
//! the requested scale. When the region holds more samples than
//! `max_pixels` they are thinned further and the result is flagged
//! approximate instead of failing.

use std::fmt::Display;

use common::BitBuffer2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::band::Band;
use crate::error::{RasterError, Result};
use crate::grid::GridSpec;
use crate::mask::Mask;
use crate::region::Region;

pub const M2_PER_KM2: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReduceParams {
    /// Sampling resolution in metres.
    pub scale: f64,
    pub max_pixels: u64,
}

impl Default for ReduceParams {
    fn default() -> Self {
        Self {
            scale: 10.0,
            max_pixels: 1_000_000_000,
        }
    }
}

impl ReduceParams {
    pub fn new(scale: f64, max_pixels: u64) -> Self {
        Self { scale, max_pixels }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(RasterError::InvalidParameter {
                name: "scale",
                value: self.scale.to_string(),
                reason: "must be a positive number of metres".to_string(),
            });
        }
        if self.max_pixels == 0 {
            return Err(RasterError::InvalidParameter {
                name: "max_pixels",
                value: "0".to_string(),
                reason: "must allow at least one pixel".to_string(),
            });
        }
        Ok(())
    }
}

/// Result of a region reduction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Statistic {
    Value {
        value: f64,
        pixel_count: usize,
        approximate: bool,
    },
    NoData {
        reason: String,
    },
}

impl Statistic {
    pub fn no_data(reason: impl Into<String>) -> Self {
        Statistic::NoData {
            reason: reason.into(),
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Statistic::Value { value, .. } => Some(*value),
            Statistic::NoData { .. } => None,
        }
    }

    pub fn is_no_data(&self) -> bool {
        matches!(self, Statistic::NoData { .. })
    }

    pub fn is_approximate(&self) -> bool {
        matches!(
            self,
            Statistic::Value {
                approximate: true,
                ..
            }
        )
    }
}

impl Display for Statistic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Statistic::Value {
                value,
                approximate: false,
                ..
            } => write!(f, "{value:.4}"),
            Statistic::Value { value, .. } => write!(f, "~{value:.4} (approximate)"),
            Statistic::NoData { reason } => write!(f, "no data ({reason})"),
        }
    }
}

/// How the pixels of one region are sampled for a reduction.
///
/// Candidates are footprint pixels on the `stride` lattice set by the scale.
/// When there are more than `max_pixels` of them, only every `step`-th
/// candidate in row-major order is visited and each sample stands for `step`
/// candidates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampling {
    pub stride: usize,
    pub step: u64,
    pub approximate: bool,
}

impl Sampling {
    pub fn plan(grid: &GridSpec, footprint: &BitBuffer2, params: &ReduceParams) -> Result<Sampling> {
        params.validate()?;
        grid.validate()?;

        let mut stride = scale_stride(grid, params);
        let mut candidates = lattice_count(footprint, stride);
        if candidates == 0 && stride > 1 && footprint.any() {
            // region smaller than one sample at this scale
            stride = 1;
            candidates = footprint.count_ones() as u64;
        }

        let step = candidates.div_ceil(params.max_pixels).max(1);
        let approximate = step > 1;
        if approximate {
            log::warn!(
                "{} pixels at {} m exceed max_pixels {}, keeping every {}th",
                candidates,
                params.scale,
                params.max_pixels,
                step
            );
        }
        Ok(Sampling {
            stride,
            step,
            approximate,
        })
    }

    /// Ground area one sample stands for.
    pub fn sample_area_m2(&self, grid: &GridSpec) -> f64 {
        let side = self.stride as f64 * grid.pixel_size;
        side * side * self.step as f64
    }

    #[inline]
    fn on_lattice(&self, x: usize, y: usize) -> bool {
        x % self.stride == 0 && y % self.stride == 0
    }
}

/// Lattice stride for `params.scale` on `grid`, at least one pixel.
pub fn scale_stride(grid: &GridSpec, params: &ReduceParams) -> usize {
    ((params.scale / grid.pixel_size).round() as usize).max(1)
}

/// Footprint pixels on the `stride` lattice.
pub fn lattice_count(footprint: &BitBuffer2, stride: usize) -> u64 {
    (0..footprint.height())
        .step_by(stride)
        .map(|y| {
            (0..footprint.width())
                .step_by(stride)
                .filter(|x| footprint.get_xy(*x, y))
                .count() as u64
        })
        .sum()
}

#[derive(Debug, Default, Clone, Copy)]
struct Accumulator {
    count: usize,
    sum: f64,
}

/// Visits sampled pixels inside `footprint` row by row; rows are summed in
/// order so the result does not depend on scheduling.
fn accumulate<F>(grid: &GridSpec, footprint: &BitBuffer2, sampling: Sampling, sample: F) -> Accumulator
where
    F: Fn(usize) -> Option<f64> + Sync,
{
    let rows: Vec<usize> = (0..grid.height).step_by(sampling.stride).collect();

    // ordinal of each row's first candidate, so thinning is independent of scheduling
    let mut offsets = Vec::with_capacity(rows.len());
    let mut seen = 0u64;
    for &y in &rows {
        offsets.push(seen);
        seen += (0..grid.width)
            .filter(|x| sampling.on_lattice(*x, y) && footprint.get_xy(*x, y))
            .count() as u64;
    }

    let sums: Vec<Accumulator> = rows
        .par_iter()
        .zip(offsets.par_iter())
        .map(|(&y, &offset)| {
            let mut acc = Accumulator::default();
            let mut ordinal = offset;
            for x in (0..grid.width).filter(|x| sampling.on_lattice(*x, y)) {
                let idx = y * grid.width + x;
                if !footprint.get(idx) {
                    continue;
                }
                let keep = ordinal % sampling.step == 0;
                ordinal += 1;
                if !keep {
                    continue;
                }
                if let Some(value) = sample(idx) {
                    acc.count += 1;
                    acc.sum += value;
                }
            }
            acc
        })
        .collect();

    sums.into_iter().fold(Accumulator::default(), |total, row| Accumulator {
        count: total.count + row.count,
        sum: total.sum + row.sum,
    })
}

/// Area of true pixels of `mask` inside `region`, in km².
pub fn area_km2(mask: &Mask, region: &Region, params: &ReduceParams) -> Result<Statistic> {
    let grid = mask.grid();
    let footprint = region.rasterize(grid);
    let sampling = Sampling::plan(grid, &footprint, params)?;
    let acc = accumulate(grid, &footprint, sampling, |idx| {
        mask.get(idx).map(|truth| if truth { 1.0 } else { 0.0 })
    });

    if acc.count == 0 {
        return Ok(Statistic::no_data(format!(
            "no valid pixels in region {}",
            region.name
        )));
    }
    Ok(Statistic::Value {
        value: acc.sum * sampling.sample_area_m2(grid) / M2_PER_KM2,
        pixel_count: acc.count,
        approximate: sampling.approximate,
    })
}

/// Area of `region` covered by `grid`, in km².
pub fn total_area_km2(grid: &GridSpec, region: &Region, params: &ReduceParams) -> Result<Statistic> {
    let footprint = region.rasterize(grid);
    let sampling = Sampling::plan(grid, &footprint, params)?;
    let acc = accumulate(grid, &footprint, sampling, |_| Some(1.0));

    if acc.count == 0 {
        return Ok(Statistic::no_data(format!(
            "region {} does not intersect the grid",
            region.name
        )));
    }
    Ok(Statistic::Value {
        value: acc.sum * sampling.sample_area_m2(grid) / M2_PER_KM2,
        pixel_count: acc.count,
        approximate: sampling.approximate,
    })
}

/// Mean of valid `band` values inside `region`.
pub fn mean(grid: &GridSpec, band: &Band, region: &Region, params: &ReduceParams) -> Result<Statistic> {
    let acc = reduce_band(grid, band, region, params)?;
    Ok(match acc {
        (acc, _) if acc.count == 0 => Statistic::no_data(format!(
            "no valid pixels in region {}",
            region.name
        )),
        (acc, sampling) => Statistic::Value {
            value: acc.sum / acc.count as f64,
            pixel_count: acc.count,
            approximate: sampling.approximate,
        },
    })
}

/// Sum of valid `band` values inside `region`, one term per sample.
pub fn sum(grid: &GridSpec, band: &Band, region: &Region, params: &ReduceParams) -> Result<Statistic> {
    let acc = reduce_band(grid, band, region, params)?;
    Ok(match acc {
        (acc, _) if acc.count == 0 => Statistic::no_data(format!(
            "no valid pixels in region {}",
            region.name
        )),
        (acc, sampling) => Statistic::Value {
            value: acc.sum,
            pixel_count: acc.count,
            approximate: sampling.approximate,
        },
    })
}

fn reduce_band(
    grid: &GridSpec,
    band: &Band,
    region: &Region,
    params: &ReduceParams,
) -> Result<(Accumulator, Sampling)> {
    if band.width() != grid.width || band.height() != grid.height {
        return Err(RasterError::GridMismatch {
            context: format!("reducing over region {}", region.name),
            expected: grid.to_string(),
            actual: format!("{}x{}", band.width(), band.height()),
        });
    }
    let footprint = region.rasterize(grid);
    let sampling = Sampling::plan(grid, &footprint, params)?;
    Ok((accumulate(grid, &footprint, sampling, |idx| band.value(idx)), sampling))
}

#[cfg(test)]
mod tests {
    use glam::DVec2;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::index::SpectralIndex;
    use crate::mask::Comparison;
    use crate::region::Polygon;
    use crate::test_utils::{grid, single_band_stack};

    fn everywhere() -> Region {
        Region::new("all", vec![Polygon::rectangle(DVec2::splat(-1e6), DVec2::splat(1e6))])
    }

    #[test]
    fn area_is_reported_in_km2() -> anyhow::Result<()> {
        // 100x100 pixels of 10 m = 1 km²
        let mask = Mask::filled(grid(100, 100), true);
        let area = area_km2(&mask, &everywhere(), &ReduceParams::default())?;
        assert_eq!(area.value(), Some(1.0));
        assert!(!area.is_approximate());

        let total = total_area_km2(mask.grid(), &everywhere(), &ReduceParams::default())?;
        assert_eq!(total.value(), Some(1.0));
        Ok(())
    }

    #[test]
    fn valid_but_false_is_zero_not_no_data() -> anyhow::Result<()> {
        let mask = Mask::filled(grid(4, 4), false);
        let area = area_km2(&mask, &everywhere(), &ReduceParams::default())?;
        assert_eq!(area.value(), Some(0.0));
        Ok(())
    }

    #[test]
    fn no_valid_pixels_is_no_data() -> anyhow::Result<()> {
        let stack = single_band_stack("BSI", 2, 2, vec![f64::NAN; 4])?;
        let mask = Mask::threshold_band(&stack, "BSI", Comparison::Gt, 0.0)?;
        let area = area_km2(&mask, &everywhere(), &ReduceParams::default())?;
        assert!(area.is_no_data());
        assert_eq!(area.value(), None);

        let mean = mean(stack.grid(), stack.require("test", "BSI")?, &everywhere(), &ReduceParams::default())?;
        assert!(mean.is_no_data());
        Ok(())
    }

    #[test]
    fn singular_bsi_pixel_is_excluded_from_mean_and_area() -> anyhow::Result<()> {
        let stack = crate::test_utils::constant_stack(2, 1, [0.05, 0.1, 0.25, 0.10, 0.30])?
            .with_band(crate::band::names::SWIR, Band::from_values(2, 1, vec![0.0, 0.30]))?
            .with_band(crate::band::names::RED, Band::from_values(2, 1, vec![0.0, 0.25]))?
            .with_band(crate::band::names::NIR, Band::from_values(2, 1, vec![0.0, 0.10]))?
            .with_band(crate::band::names::BLUE, Band::from_values(2, 1, vec![0.0, 0.05]))?;
        let bsi = SpectralIndex::Bsi.compute(&stack)?;

        let mean = mean(stack.grid(), &bsi, &everywhere(), &ReduceParams::default())?;
        let Statistic::Value { value, pixel_count, approximate } = mean else {
            panic!("expected a value");
        };
        assert!((value - 0.4 / 0.7).abs() < 1e-12);
        assert_eq!(pixel_count, 1);
        assert!(!approximate);

        let bare = Mask::threshold(*stack.grid(), &bsi, Comparison::Gt, 0.0);
        let area = area_km2(&bare, &everywhere(), &ReduceParams::default())?;
        assert_eq!(area.value(), Some(100.0 / M2_PER_KM2));
        Ok(())
    }

    #[test]
    fn coarser_scale_samples_fewer_pixels() -> anyhow::Result<()> {
        let mask = Mask::filled(grid(60, 60), true);
        let area = area_km2(&mask, &everywhere(), &ReduceParams::new(30.0, 1_000_000))?;
        let Statistic::Value { value, pixel_count, approximate } = area else {
            panic!("expected a value");
        };
        assert_eq!(pixel_count, 400);
        assert!((value - 0.36).abs() < 1e-12);
        assert!(!approximate);
        Ok(())
    }

    #[test]
    fn budget_overflow_degrades_to_approximate() -> anyhow::Result<()> {
        let mask = Mask::filled(grid(100, 100), true);
        let area = area_km2(&mask, &everywhere(), &ReduceParams::new(10.0, 100))?;

        assert!(area.is_approximate());
        let Statistic::Value { value, pixel_count, .. } = area else {
            panic!("expected a value");
        };
        assert!(pixel_count <= 100);
        assert!((value - 1.0).abs() < 0.25, "{value}");
        Ok(())
    }

    #[test]
    fn small_region_on_large_grid_is_budgeted_by_its_own_pixels() -> anyhow::Result<()> {
        // 4 pixels at x 51..=52, y 47..=48 of a 100x100 grid
        let mask = Mask::filled(grid(100, 100), true);
        let field = Region::new("field", vec![Polygon::rectangle(DVec2::splat(512.0), DVec2::splat(532.0))]);
        assert_eq!(field.rasterize(mask.grid()).count_ones(), 4);

        let area = area_km2(&mask, &field, &ReduceParams::new(10.0, 100))?;
        let Statistic::Value { value, pixel_count, approximate } = area else {
            panic!("expected a value, got {area:?}");
        };
        assert_eq!(pixel_count, 4);
        assert!((value - 400.0 / M2_PER_KM2).abs() < 1e-12);
        assert!(!approximate);

        // over budget within the region itself: thinned, never empty
        let area = area_km2(&mask, &field, &ReduceParams::new(10.0, 1))?;
        assert!(area.is_approximate());
        assert!((area.value().unwrap_or_default() - 400.0 / M2_PER_KM2).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn region_between_coarse_samples_still_gets_one() -> anyhow::Result<()> {
        // single pixel at x 52, y 47, off the 3-pixel lattice of a 30 m scale
        let mask = Mask::filled(grid(100, 100), true);
        let field = Region::new("field", vec![Polygon::rectangle(DVec2::splat(522.0), DVec2::splat(528.0))]);

        let area = area_km2(&mask, &field, &ReduceParams::new(30.0, 1_000_000))?;
        assert_eq!(area.value(), Some(100.0 / M2_PER_KM2));
        Ok(())
    }

    #[test]
    fn thinning_keeps_row_major_order() {
        let footprint = BitBuffer2::new_filled(10, 10, true);
        assert_eq!(lattice_count(&footprint, 1), 100);
        assert_eq!(lattice_count(&footprint, 3), 16);

        let sampling = Sampling::plan(&grid(10, 10), &footprint, &ReduceParams::new(10.0, 30)).unwrap();
        assert_eq!(sampling.stride, 1);
        assert_eq!(sampling.step, 4);
        assert!(sampling.approximate);

        let acc = accumulate(&grid(10, 10), &footprint, sampling, |idx| Some(idx as f64));
        assert_eq!(acc.count, 25);
        assert_eq!(acc.sum, (0..100).step_by(4).sum::<usize>() as f64);
    }

    #[test]
    fn zero_budget_is_a_parameter_error() {
        let mask = Mask::filled(grid(2, 2), true);
        assert!(matches!(
            area_km2(&mask, &everywhere(), &ReduceParams::new(10.0, 0)),
            Err(RasterError::InvalidParameter { name: "max_pixels", .. })
        ));
    }

    #[test]
    fn area_is_monotonic_under_containment() -> anyhow::Result<()> {
        let mut rng = StdRng::seed_from_u64(11);
        let grid = grid(32, 32);
        for _ in 0..16 {
            let truth = BitBuffer2::from_fn(32, 32, |_| rng.random_bool(0.4));
            let valid = BitBuffer2::from_fn(32, 32, |_| rng.random_bool(0.9));
            let mask = Mask::new(grid, truth, valid);

            let min = DVec2::new(rng.random_range(0.0..150.0), rng.random_range(0.0..150.0));
            let inner_max = min + DVec2::new(rng.random_range(10.0..100.0), rng.random_range(10.0..100.0));
            let outer_max = inner_max + DVec2::splat(rng.random_range(0.0..80.0));
            let inner = Region::new("inner", vec![Polygon::rectangle(min, inner_max)]);
            let outer = Region::new("outer", vec![Polygon::rectangle(min - DVec2::splat(5.0), outer_max)]);

            let params = ReduceParams::default();
            let a = area_km2(&mask, &inner, &params)?.value().unwrap_or(0.0);
            let b = area_km2(&mask, &outer, &params)?.value().unwrap_or(0.0);
            assert!(a <= b, "{a} > {b}");
        }
        Ok(())
    }

    #[test]
    fn display_distinguishes_no_data() {
        assert_eq!(Statistic::no_data("empty").to_string(), "no data (empty)");
        let approx = Statistic::Value {
            value: 1.5,
            pixel_count: 3,
            approximate: true,
        };
        assert_eq!(approx.to_string(), "~1.5000 (approximate)");
    }
}
