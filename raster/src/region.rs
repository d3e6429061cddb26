//! Polygonal regions in grid coordinates.

use std::collections::BTreeMap;

use common::BitBuffer2;
use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::grid::GridSpec;

/// Exterior ring with optional holes. Rings need not be closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub exterior: Vec<DVec2>,
    #[serde(default)]
    pub holes: Vec<Vec<DVec2>>,
}

impl Polygon {
    pub fn new(exterior: Vec<DVec2>) -> Self {
        Self {
            exterior,
            holes: Vec::new(),
        }
    }

    pub fn rectangle(min: DVec2, max: DVec2) -> Self {
        Self::new(vec![
            min,
            DVec2::new(max.x, min.y),
            max,
            DVec2::new(min.x, max.y),
        ])
    }

    pub fn with_hole(mut self, hole: Vec<DVec2>) -> Self {
        self.holes.push(hole);
        self
    }

    pub fn contains(&self, point: DVec2) -> bool {
        ring_contains(&self.exterior, point) && !self.holes.iter().any(|hole| ring_contains(hole, point))
    }

    pub fn bounds(&self) -> Option<(DVec2, DVec2)> {
        ring_bounds(&self.exterior)
    }
}

// even-odd ray casting towards +x
fn ring_contains(ring: &[DVec2], point: DVec2) -> bool {
    if ring.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let (a, b) = (ring[i], ring[j]);
        if (a.y > point.y) != (b.y > point.y) {
            let x = a.x + (point.y - a.y) / (b.y - a.y) * (b.x - a.x);
            if point.x < x {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn ring_bounds(ring: &[DVec2]) -> Option<(DVec2, DVec2)> {
    let first = *ring.first()?;
    Some(
        ring.iter()
            .fold((first, first), |(min, max), p| (min.min(*p), max.max(*p))),
    )
}

/// Named area with string attributes, e.g. `crop_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    pub polygons: Vec<Polygon>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Region {
    pub fn new(name: impl Into<String>, polygons: Vec<Polygon>) -> Self {
        Self {
            name: name.into(),
            polygons,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn contains(&self, point: DVec2) -> bool {
        self.polygons.iter().any(|polygon| polygon.contains(point))
    }

    pub fn bounds(&self) -> Option<(DVec2, DVec2)> {
        self.polygons
            .iter()
            .filter_map(Polygon::bounds)
            .reduce(|(min_a, max_a), (min_b, max_b)| (min_a.min(min_b), max_a.max(max_b)))
    }

    /// Pixels of `grid` whose centre lies inside the region.
    pub fn rasterize(&self, grid: &GridSpec) -> BitBuffer2 {
        let mut inside = BitBuffer2::new_filled(grid.width, grid.height, false);
        let Some((min, max)) = self.bounds() else {
            return inside;
        };

        for y in 0..grid.height {
            let row_y = grid.pixel_center(0, y).y;
            if row_y < min.y || row_y > max.y {
                continue;
            }
            for x in 0..grid.width {
                let center = grid.pixel_center(x, y);
                if center.x >= min.x && center.x <= max.x && self.contains(center) {
                    inside.set_xy(x, y, true);
                }
            }
        }
        inside
    }

    /// Union of several regions under a new name.
    pub fn union(name: impl Into<String>, regions: &[Region]) -> Region {
        Region::new(
            name,
            regions
                .iter()
                .flat_map(|region| region.polygons.iter().cloned())
                .collect(),
        )
    }
}
