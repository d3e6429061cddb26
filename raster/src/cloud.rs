use serde::{Deserialize, Serialize};

use crate::band::{names, BandStack};
use crate::error::{RasterError, Result};
use common::BitBuffer2;

pub const DEFAULT_CLOUD_BIT: u8 = 10;

/// Per-pixel cloud test over the `MSK_CLDPRB` band.
///
/// A pixel whose cloud band is itself masked counts as cloudy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CloudMask {
    /// Cloudy when probability (percent) is at or above `threshold`.
    Probability { threshold: f64 },
    /// Cloudy when the integer band value has `bit` set.
    BitFlag { bit: u8 },
}

impl Default for CloudMask {
    fn default() -> Self {
        CloudMask::Probability { threshold: 5.0 }
    }
}

impl CloudMask {
    pub fn probability(threshold: f64) -> Result<Self> {
        let mask = CloudMask::Probability { threshold };
        mask.validate()?;
        Ok(mask)
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            CloudMask::Probability { threshold } if !(0.0..=100.0).contains(&threshold) => {
                Err(RasterError::InvalidParameter {
                    name: "cloud_threshold",
                    value: threshold.to_string(),
                    reason: "must be a percentage in 0..=100".to_string(),
                })
            }
            CloudMask::BitFlag { bit } if bit >= 32 => Err(RasterError::InvalidParameter {
                name: "cloud_bit",
                value: bit.to_string(),
                reason: "must be below 32".to_string(),
            }),
            _ => Ok(()),
        }
    }

    #[inline]
    pub fn is_cloudy(&self, value: f64) -> bool {
        match *self {
            CloudMask::Probability { threshold } => value >= threshold,
            CloudMask::BitFlag { bit } => (value as i64) & (1i64 << bit) != 0,
        }
    }

    /// Pixels that are clear of cloud.
    pub fn clear_pixels(&self, stack: &BandStack) -> Result<BitBuffer2> {
        self.validate()?;
        let cloud = stack.require("cloud mask", names::CLOUD_PROBABILITY)?;
        Ok(BitBuffer2::from_fn(cloud.width(), cloud.height(), |idx| {
            cloud
                .value(idx)
                .is_some_and(|value| !self.is_cloudy(value))
        }))
    }

    /// Returns `stack` with cloudy pixels masked in every band.
    pub fn apply(&self, stack: &BandStack) -> Result<BandStack> {
        let clear = self.clear_pixels(stack)?;
        let masked = stack.update_mask(&clear);
        log::trace!(
            "Cloud mask on {}: {} of {} pixels clear",
            stack.label(),
            clear.count_ones(),
            clear.len()
        );
        Ok(masked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::band::Band;
    use crate::test_utils::constant_stack;

    fn stack_with_cloud(values: Vec<f64>) -> anyhow::Result<BandStack> {
        let stack = constant_stack(2, 2, [0.05, 0.1, 0.25, 0.10, 0.30])?;
        Ok(stack.with_band(names::CLOUD_PROBABILITY, Band::from_values(2, 2, values))?)
    }

    #[test]
    fn threshold_is_inclusive() -> anyhow::Result<()> {
        let stack = stack_with_cloud(vec![0.0, 4.9, 5.0, 80.0])?;
        let masked = CloudMask::probability(5.0)?.apply(&stack)?;

        let red = masked.require("test", names::RED)?;
        assert_eq!(red.value(0), Some(0.25));
        assert_eq!(red.value(1), Some(0.25));
        assert_eq!(red.value(2), None);
        assert_eq!(red.value(3), None);
        Ok(())
    }

    #[test]
    fn masked_cloud_band_counts_as_cloudy() -> anyhow::Result<()> {
        let stack = stack_with_cloud(vec![0.0, f64::NAN, 0.0, 0.0])?;
        let clear = CloudMask::default().clear_pixels(&stack)?;
        assert_eq!(clear.iter().collect::<Vec<_>>(), [true, false, true, true]);
        Ok(())
    }

    #[test]
    fn bit_flag_form() -> anyhow::Result<()> {
        let flagged = (1 << 10) as f64;
        let stack = stack_with_cloud(vec![0.0, flagged, flagged + 3.0, 512.0])?;
        let clear = CloudMask::BitFlag { bit: DEFAULT_CLOUD_BIT }.clear_pixels(&stack)?;
        assert_eq!(clear.iter().collect::<Vec<_>>(), [true, false, false, true]);
        Ok(())
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        assert!(matches!(
            CloudMask::probability(120.0),
            Err(RasterError::InvalidParameter { name: "cloud_threshold", .. })
        ));
        assert!(CloudMask::probability(-1.0).is_err());
        assert!(CloudMask::probability(100.0).is_ok());
    }

    #[test]
    fn missing_cloud_band_is_reported() -> anyhow::Result<()> {
        let stack = constant_stack(2, 2, [0.05, 0.1, 0.25, 0.10, 0.30])?;
        let err = CloudMask::default().apply(&stack).unwrap_err();
        assert!(matches!(err, RasterError::MissingBand { ref band, .. } if band == names::CLOUD_PROBABILITY));
        Ok(())
    }

    #[test]
    fn parses_from_yaml_shape() -> anyhow::Result<()> {
        let mask: CloudMask = serde_json::from_str(r#"{"kind":"bit_flag","bit":10}"#)?;
        assert_eq!(mask, CloudMask::BitFlag { bit: 10 });
        Ok(())
    }
}
