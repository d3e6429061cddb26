use std::collections::BTreeMap;
use std::fmt::Debug;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use glam::DVec2;
use raster::{Polygon, Region};
use serde::Deserialize;

/// Named vector regions with attributes.
#[async_trait]
pub trait RegionStore: Debug + Send + Sync {
    async fn region(&self, name: &str) -> anyhow::Result<Region>;

    async fn regions(&self) -> anyhow::Result<Vec<Region>>;

    /// Regions whose `attribute` equals `value`, e.g. `crop_type = Cropland`.
    async fn filter(&self, attribute: &str, value: &str) -> anyhow::Result<Vec<Region>> {
        Ok(self
            .regions()
            .await?
            .into_iter()
            .filter(|region| region.attribute(attribute) == Some(value))
            .collect())
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryRegionStore {
    regions: Vec<Region>,
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    properties: BTreeMap<String, serde_json::Value>,
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Geometry {
    Polygon {
        coordinates: Vec<Vec<[f64; 2]>>,
    },
    MultiPolygon {
        coordinates: Vec<Vec<Vec<[f64; 2]>>>,
    },
}

fn polygon(rings: Vec<Vec<[f64; 2]>>) -> Option<Polygon> {
    let mut rings = rings
        .into_iter()
        .map(|ring| ring.into_iter().map(DVec2::from).collect::<Vec<_>>());
    let exterior = rings.next()?;
    Some(Polygon {
        exterior,
        holes: rings.collect(),
    })
}

impl InMemoryRegionStore {
    pub fn new(regions: Vec<Region>) -> Self {
        Self { regions }
    }

    pub fn insert(&mut self, region: Region) {
        match self.regions.iter_mut().find(|r| r.name == region.name) {
            Some(existing) => *existing = region,
            None => self.regions.push(region),
        }
    }

    /// Parses a GeoJSON FeatureCollection in grid coordinates.
    ///
    /// Regions are named by the `name_property` attribute, or `feature-<n>`
    /// when it is absent. Every property is kept as a string attribute.
    pub fn from_geojson(json: &str, name_property: &str) -> anyhow::Result<Self> {
        let collection: FeatureCollection = serde_json::from_str(json)?;
        let mut store = Self::default();

        for (idx, feature) in collection.features.into_iter().enumerate() {
            let attributes: BTreeMap<String, String> = feature
                .properties
                .into_iter()
                .map(|(key, value)| {
                    let value = match value {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (key, value)
                })
                .collect();
            let name = attributes
                .get(name_property)
                .cloned()
                .unwrap_or_else(|| format!("feature-{idx}"));

            let polygons: Vec<Polygon> = match feature.geometry {
                Geometry::Polygon { coordinates } => polygon(coordinates).into_iter().collect(),
                Geometry::MultiPolygon { coordinates } => {
                    coordinates.into_iter().filter_map(polygon).collect()
                }
            };
            if polygons.is_empty() {
                log::warn!("Feature {name} has no rings, skipped");
                continue;
            }

            store.insert(Region {
                name,
                polygons,
                attributes,
            });
        }

        Ok(store)
    }

    pub fn load(path: &str, name_property: &str) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path).with_context(|| format!("reading regions from {path}"))?;
        Self::from_geojson(&json, name_property).with_context(|| format!("parsing regions from {path}"))
    }
}

#[async_trait]
impl RegionStore for InMemoryRegionStore {
    async fn region(&self, name: &str) -> anyhow::Result<Region> {
        self.regions
            .iter()
            .find(|region| region.name == name)
            .cloned()
            .ok_or_else(|| anyhow!("Unknown region {name:?}"))
    }

    async fn regions(&self) -> anyhow::Result<Vec<Region>> {
        Ok(self.regions.clone())
    }
}
