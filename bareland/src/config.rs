//! Scenario configuration, read from YAML.
//!
//! Every field has a default, so a partial file (or no file) runs the
//! Browney farmland analysis with the 2022-2023 campaign dates and thresholds.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use raster::{BareLandPolicy, CloudMask, DateRange, ReduceParams, Season, SpectralIndex};
use serde::{Deserialize, Serialize};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}

fn range(start: NaiveDate, end: NaiveDate) -> DateRange {
    DateRange { start, end }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    /// JSON scene file read by the in-memory catalog.
    pub scenes: String,
    /// GeoJSON FeatureCollection of fields.
    pub regions: String,
    /// Feature property used as region name.
    pub region_name_property: String,
    pub output_dir: String,
    pub log_dir: String,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            scenes: "data/scenes.json".to_string(),
            regions: "data/fields.geojson".to_string(),
            region_name_property: "osm_id".to_string(),
            output_dir: "out".to_string(),
            log_dir: "logs".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub enabled: bool,
    pub name: String,
    pub params: ReduceParams,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: "BSI_Mask_Winter_Bare_Land".to_string(),
            params: ReduceParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BareLandConfig {
    /// Scenes at or above this cloudy pixel percentage are dropped.
    pub max_scene_cloud: f64,
    pub cloud_mask: CloudMask,
    pub winter: Season,
    pub summer: Season,
    pub policy: BareLandPolicy,
    pub reduce: ReduceParams,
    pub export: ExportConfig,
    /// Gamma of the winter false and true colour layers.
    pub winter_gamma: f64,
    /// Gamma of the summer false colour layer.
    pub summer_gamma: f64,
    /// The summer true colour layer keeps the winter stretch of 1.4.
    pub summer_tcc_gamma: f64,
}

impl Default for BareLandConfig {
    fn default() -> Self {
        Self {
            max_scene_cloud: 20.0,
            cloud_mask: CloudMask::Probability { threshold: 5.0 },
            winter: Season {
                name: "Winter".to_string(),
                range: range(date(2022, 2, 15), date(2022, 3, 31)),
            },
            summer: Season {
                name: "Summer".to_string(),
                range: range(date(2023, 6, 1), date(2023, 9, 1)),
            },
            policy: BareLandPolicy::default(),
            reduce: ReduceParams::default(),
            export: ExportConfig::default(),
            winter_gamma: 1.4,
            summer_gamma: 1.2,
            summer_tcc_gamma: 1.4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeSeriesConfig {
    pub range: DateRange,
    pub max_scene_cloud: f64,
    pub cloud_mask: CloudMask,
    pub indices: Vec<SpectralIndex>,
    pub reduce: ReduceParams,
    /// One row per field instead of one per date over the whole study area.
    pub per_feature: bool,
}

impl Default for TimeSeriesConfig {
    fn default() -> Self {
        Self {
            range: range(date(2022, 12, 20), date(2023, 2, 28)),
            max_scene_cloud: 50.0,
            cloud_mask: CloudMask::Probability { threshold: 20.0 },
            indices: vec![
                SpectralIndex::Ndvi,
                SpectralIndex::Savi,
                SpectralIndex::Bsi,
                SpectralIndex::Ndmi,
                SpectralIndex::Ndsi,
            ],
            reduce: ReduceParams::new(30.0, 10_000_000),
            per_feature: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub name: String,
    /// `date,value` CSV.
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RainfallConfig {
    pub range: DateRange,
    pub stations: Vec<Station>,
}

impl Default for RainfallConfig {
    fn default() -> Self {
        let station = |name: &str, file: &str| Station {
            name: name.to_string(),
            path: format!("data/{file}"),
        };
        Self {
            range: range(date(2022, 12, 1), date(2023, 2, 28)),
            stations: vec![
                station("ESH-Winning", "esh_winning_rainfall.csv"),
                station("Knitsley Mill", "knitsley_mill_rainfall.csv"),
                station("Tunstall", "tunstall_rainfall.csv"),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub paths: Paths,
    /// Name of the region formed by the union of every field.
    pub study_area: String,
    pub bare_land: BareLandConfig,
    pub time_series: TimeSeriesConfig,
    pub rainfall: RainfallConfig,
    /// Initial layer visibility; layers not listed start visible.
    pub layers: BTreeMap<String, bool>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        let layers = ["NDVI", "SAVI", "BSI"]
            .into_iter()
            .map(|index| (format!("{index} Legend"), false))
            .collect();

        Self {
            paths: Paths::default(),
            study_area: "study area".to_string(),
            bare_land: BareLandConfig::default(),
            time_series: TimeSeriesConfig::default(),
            rainfall: RainfallConfig::default(),
            layers,
        }
    }
}

impl ScenarioConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let config: ScenarioConfig = common::file_format::load_file(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let bare_land = &self.bare_land;
        bare_land.cloud_mask.validate()?;
        bare_land.reduce.validate()?;
        bare_land.export.params.validate()?;
        self.time_series.cloud_mask.validate()?;
        self.time_series.reduce.validate()?;
        anyhow::ensure!(
            !self.time_series.indices.is_empty(),
            "time_series.indices must name at least one index"
        );
        Ok(())
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yml::to_string(self)?)
    }

    pub fn layer_visible(&self, layer: &str) -> bool {
        self.layers.get(layer).copied().unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_field_campaign() {
        let config = ScenarioConfig::default();
        let bare_land = &config.bare_land;
        assert_eq!(bare_land.max_scene_cloud, 20.0);
        assert_eq!(bare_land.cloud_mask, CloudMask::Probability { threshold: 5.0 });
        assert_eq!(bare_land.winter.range.to_string(), "2022-02-15..2022-03-31");
        assert_eq!(bare_land.summer.range.to_string(), "2023-06-01..2023-09-01");
        assert_eq!(bare_land.reduce, ReduceParams::new(10.0, 1_000_000_000));
        assert_eq!(config.time_series.reduce, ReduceParams::new(30.0, 10_000_000));
        assert_eq!(config.time_series.indices.len(), 5);

        assert!(!config.layer_visible("BSI Legend"));
        assert!(config.layer_visible("BSI Winter"));
        assert!(config.layer_visible("FCC Winter"));
        assert_eq!(bare_land.summer_tcc_gamma, 1.4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() -> anyhow::Result<()> {
        let yaml = "
bare_land:
  max_scene_cloud: 10
  policy:
    bsi_bare: 0.1
time_series:
  per_feature: true
";
        let config: ScenarioConfig = serde_yml::from_str(yaml)?;
        assert_eq!(config.bare_land.max_scene_cloud, 10.0);
        assert_eq!(config.bare_land.policy.bsi_bare, 0.1);
        assert_eq!(config.bare_land.policy.savi_bare, 0.3);
        assert!(config.time_series.per_feature);
        assert_eq!(config.paths, Paths::default());
        Ok(())
    }

    #[test]
    fn yaml_round_trip() -> anyhow::Result<()> {
        let config = ScenarioConfig::default();
        let parsed: ScenarioConfig = serde_yml::from_str(&config.to_yaml()?)?;
        assert_eq!(parsed, config);
        Ok(())
    }

    #[test]
    fn invalid_cloud_threshold_is_rejected() {
        let mut config = ScenarioConfig::default();
        config.bare_land.cloud_mask = CloudMask::Probability { threshold: 150.0 };
        assert!(config.validate().is_err());
    }
}
