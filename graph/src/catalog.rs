//! Imagery catalog collaborator.
//!
//! # Scene file format (JSON)
//!
//! ```text
//! {
//!   "grid": { "width": 2, "height": 1, "origin": [0.0, 10.0], "pixel_size": 10.0 },
//!   "scenes": [
//!     { "id": "S2A_20220301", "date": "2022-03-01", "cloudy_pixel_percentage": 3.5,
//!       "bands": { "B4": [812.0, null], "MSK_CLDPRB": [0.0, 0.0] } }
//!   ]
//! }
//! ```
//!
//! `null` marks a masked pixel.

use std::collections::BTreeMap;
use std::fmt::Debug;

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use glam::DVec2;
use raster::{Band, BandStack, DateRange, GridSpec, SceneFilter, SceneInfo};
use serde::{Deserialize, Serialize};

pub const SENTINEL2_SR: &str = "COPERNICUS/S2_SR_HARMONIZED";

fn default_collection() -> String {
    SENTINEL2_SR.to_string()
}

/// Scenes intersecting `bounds`, inside `range`, strictly below `max_cloud`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogQuery {
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<(DVec2, DVec2)>,
    pub range: DateRange,
    pub max_cloud: f64,
    /// Bands to keep; all bands when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bands: Vec<String>,
}

impl CatalogQuery {
    pub fn new(range: DateRange, max_cloud: f64) -> Self {
        Self {
            collection: default_collection(),
            bounds: None,
            range,
            max_cloud,
            bands: Vec::new(),
        }
    }

    pub fn with_bounds(mut self, bounds: Option<(DVec2, DVec2)>) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_bands(mut self, bands: &[&str]) -> Self {
        self.bands = bands.iter().map(|b| b.to_string()).collect();
        self
    }

    pub fn filter(&self) -> SceneFilter {
        SceneFilter {
            range: self.range,
            max_cloud: self.max_cloud,
        }
    }
}

impl std::fmt::Display for CatalogQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} cloud < {}%",
            self.collection, self.range, self.max_cloud
        )
    }
}

#[async_trait]
pub trait ImageryCatalog: Debug + Send + Sync {
    /// Matching scenes ordered by date.
    async fn query(&self, query: &CatalogQuery) -> anyhow::Result<Vec<BandStack>>;
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryCatalog {
    scenes: Vec<BandStack>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SceneFile {
    grid: GridSpec,
    scenes: Vec<SceneRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SceneRecord {
    id: String,
    date: NaiveDate,
    cloudy_pixel_percentage: f64,
    bands: BTreeMap<String, Vec<Option<f64>>>,
}

impl InMemoryCatalog {
    pub fn new(scenes: Vec<BandStack>) -> Self {
        Self { scenes }
    }

    pub fn push(&mut self, scene: BandStack) {
        self.scenes.push(scene);
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let file: SceneFile = serde_json::from_str(json)?;
        let grid = file.grid;
        grid.validate().context("scene file grid")?;

        let mut scenes = Vec::with_capacity(file.scenes.len());
        for record in file.scenes {
            let info = SceneInfo {
                id: record.id,
                date: record.date,
                cloudy_pixel_percentage: record.cloudy_pixel_percentage,
            };
            let scene_id = info.id.clone();
            let mut stack = BandStack::new(grid, Some(info));
            for (name, values) in record.bands {
                anyhow::ensure!(
                    values.len() == grid.len(),
                    "scene {scene_id} band {name}: {} values for a {} grid",
                    values.len(),
                    grid
                );
                let values = values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect();
                stack = stack.with_band(&name, Band::from_values(grid.width, grid.height, values))?;
            }
            scenes.push(stack);
        }

        log::debug!("Loaded {} scenes on {}", scenes.len(), grid);
        Ok(Self { scenes })
    }

    pub fn load(path: &str) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path).with_context(|| format!("reading scenes from {path}"))?;
        Self::from_json(&json).with_context(|| format!("parsing scenes from {path}"))
    }
}

fn intersects(grid: &GridSpec, (min, max): (DVec2, DVec2)) -> bool {
    let (grid_min, grid_max) = grid.bounds();
    grid_min.x <= max.x && min.x <= grid_max.x && grid_min.y <= max.y && min.y <= grid_max.y
}

#[async_trait]
impl ImageryCatalog for InMemoryCatalog {
    async fn query(&self, query: &CatalogQuery) -> anyhow::Result<Vec<BandStack>> {
        let filter = query.filter();
        let bands: Vec<&str> = query.bands.iter().map(String::as_str).collect();

        let mut matched = Vec::new();
        for stack in &self.scenes {
            if !filter.matches(stack) {
                continue;
            }
            if query.bounds.is_some_and(|bounds| !intersects(stack.grid(), bounds)) {
                continue;
            }
            matched.push(if bands.is_empty() {
                stack.clone()
            } else {
                stack.select(&bands)?
            });
        }
        matched.sort_by_key(|stack| stack.scene().map(|scene| scene.date));
        Ok(matched)
    }
}
