use rayon::prelude::*;

use crate::band::{Band, BandStack};
use crate::error::{RasterError, Result};
use crate::time::DateRange;

/// Scene-level filter applied before compositing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneFilter {
    pub range: DateRange,
    /// Scenes must be strictly below this cloudy pixel percentage.
    pub max_cloud: f64,
}

impl SceneFilter {
    /// Stacks without scene metadata never match.
    pub fn matches(&self, stack: &BandStack) -> bool {
        stack.scene().is_some_and(|scene| {
            self.range.contains(scene.date) && scene.cloudy_pixel_percentage < self.max_cloud
        })
    }

    pub fn apply(&self, stacks: &[BandStack]) -> Vec<BandStack> {
        stacks
            .iter()
            .filter(|stack| self.matches(stack))
            .cloned()
            .collect()
    }
}

/// Pixel-wise median of every band of the first stack across `stacks`.
///
/// Invalid samples are skipped; a pixel with no valid sample stays invalid.
pub fn median_composite(stacks: &[BandStack]) -> Result<BandStack> {
    let Some(first) = stacks.first() else {
        return Err(RasterError::EmptyCollection {
            context: "median composite over zero scenes".to_string(),
        });
    };

    let grid = *first.grid();
    let names: Vec<&str> = first.band_names().collect();
    for stack in &stacks[1..] {
        grid.ensure_same(stack.grid(), &format!("median composite of {}", stack.label()))?;
        stack.require_all("median composite", &names)?;
    }

    let mut composite = BandStack::new(grid, None);
    for name in names {
        let bands: Vec<&Band> = stacks
            .iter()
            .map(|stack| stack.require("median composite", name))
            .collect::<Result<_>>()?;
        composite = composite.with_band(name, median_band(&bands, grid.width, grid.height))?;
    }

    log::debug!(
        "Median composite of {} scenes, {} bands on {}",
        stacks.len(),
        composite.bands().len(),
        grid
    );
    Ok(composite)
}

fn median_band(bands: &[&Band], width: usize, height: usize) -> Band {
    let values: Vec<f64> = (0..height)
        .into_par_iter()
        .flat_map_iter(|y| {
            let mut samples = Vec::with_capacity(bands.len());
            (0..width)
                .map(|x| {
                    let idx = y * width + x;
                    samples.clear();
                    samples.extend(bands.iter().filter_map(|band| band.value(idx)));
                    median(&mut samples).unwrap_or(f64::NAN)
                })
                .collect::<Vec<_>>()
        })
        .collect();

    Band::from_values(width, height, values)
}

/// Median of `samples`; the mean of the two middle values for an even count.
pub fn median(samples: &mut [f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    samples.sort_unstable_by(f64::total_cmp);
    let mid = samples.len() / 2;
    if samples.len() % 2 == 1 {
        Some(samples[mid])
    } else {
        Some((samples[mid - 1] + samples[mid]) / 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::band::names;
    use crate::test_utils::{constant_stack, date, grid, scene, single_band_stack};

    fn scene_stack(id: &str, d: chrono::NaiveDate, cloud: f64) -> anyhow::Result<BandStack> {
        let stack = constant_stack(1, 1, [0.1; 5])?;
        let named = BandStack::new(*stack.grid(), Some(scene(id, d, cloud)));
        Ok(names::REFLECTANCE.iter().try_fold(named, |acc, name| {
            acc.with_band(name, stack.require("test", name)?.clone())
        })?)
    }

    #[test]
    fn median_odd_and_even() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&mut []), None);
    }

    #[test]
    fn composite_skips_invalid_samples() -> anyhow::Result<()> {
        let stacks = [
            single_band_stack(names::RED, 3, 1, vec![0.1, f64::NAN, f64::NAN])?,
            single_band_stack(names::RED, 3, 1, vec![0.9, 0.4, f64::NAN])?,
            single_band_stack(names::RED, 3, 1, vec![0.2, f64::NAN, f64::NAN])?,
        ];
        let composite = median_composite(&stacks)?;
        let red = composite.require("test", names::RED)?;

        assert_eq!(red.value(0), Some(0.2));
        assert_eq!(red.value(1), Some(0.4));
        assert_eq!(red.value(2), None);
        assert!(composite.scene().is_none());
        Ok(())
    }

    #[test]
    fn outlier_is_suppressed() -> anyhow::Result<()> {
        let stacks: Vec<_> = [0.12, 0.11, 0.95, 0.13, 0.10]
            .into_iter()
            .map(|v| single_band_stack(names::NIR, 1, 1, vec![v]))
            .collect::<Result<_>>()?;
        let composite = median_composite(&stacks)?;
        assert_eq!(composite.require("test", names::NIR)?.value(0), Some(0.12));
        Ok(())
    }

    #[test]
    fn zero_stacks_is_an_empty_collection() {
        assert!(matches!(
            median_composite(&[]),
            Err(RasterError::EmptyCollection { .. })
        ));
    }

    #[test]
    fn mismatched_grids_are_rejected() -> anyhow::Result<()> {
        let a = single_band_stack(names::RED, 2, 2, vec![0.1; 4])?;
        let b = BandStack::new(grid(4, 1), None).with_band(names::RED, Band::filled(4, 1, 0.1))?;
        assert!(matches!(
            median_composite(&[a, b]),
            Err(RasterError::GridMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn later_stack_missing_band_is_reported() -> anyhow::Result<()> {
        let a = constant_stack(1, 1, [0.1; 5])?;
        let b = a.select(&[names::RED])?;
        assert!(matches!(
            median_composite(&[a, b]),
            Err(RasterError::MissingBand { .. })
        ));
        Ok(())
    }

    #[test]
    fn scene_filter_is_half_open_and_strict() -> anyhow::Result<()> {
        let filter = SceneFilter {
            range: DateRange::new(date(2022, 2, 15), date(2022, 3, 31))?,
            max_cloud: 20.0,
        };
        let stacks = [
            scene_stack("in", date(2022, 3, 1), 5.0)?,
            scene_stack("cloudy", date(2022, 3, 1), 20.0)?,
            scene_stack("late", date(2022, 3, 31), 1.0)?,
            scene_stack("first-day", date(2022, 2, 15), 19.9)?,
        ];
        let kept: Vec<_> = filter
            .apply(&stacks)
            .iter()
            .map(|stack| stack.label().to_string())
            .collect();
        assert_eq!(kept, ["in", "first-day"]);
        Ok(())
    }
}
