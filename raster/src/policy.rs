use serde::{Deserialize, Serialize};

use crate::index::SpectralIndex;
use crate::mask::Comparison;

/// One bare-soil rule: `index cmp threshold`, applied to the index band
/// of a composite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BareRule {
    pub index: SpectralIndex,
    pub cmp: Comparison,
    pub threshold: f64,
}

/// Bare land thresholds.
///
/// The winter candidates are kept apart; only the BSI rule takes part in
/// the seasonal comparison.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BareLandPolicy {
    pub bsi_bare: f64,
    pub savi_bare: f64,
    pub ndvi_bare: f64,
}

impl Default for BareLandPolicy {
    fn default() -> Self {
        Self {
            bsi_bare: 0.0,
            savi_bare: 0.3,
            ndvi_bare: 0.3,
        }
    }
}

impl BareLandPolicy {
    pub fn bsi_rule(&self) -> BareRule {
        BareRule {
            index: SpectralIndex::Bsi,
            cmp: Comparison::Gt,
            threshold: self.bsi_bare,
        }
    }

    pub fn savi_rule(&self) -> BareRule {
        BareRule {
            index: SpectralIndex::Savi,
            cmp: Comparison::Lt,
            threshold: self.savi_bare,
        }
    }

    pub fn ndvi_rule(&self) -> BareRule {
        BareRule {
            index: SpectralIndex::Ndvi,
            cmp: Comparison::Lt,
            threshold: self.ndvi_bare,
        }
    }

    pub fn winter_rules(&self) -> [BareRule; 3] {
        [self.bsi_rule(), self.savi_rule(), self.ndvi_rule()]
    }
}
