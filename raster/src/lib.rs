pub mod band;
pub mod cloud;
pub mod composite;
pub mod error;
pub mod grid;
pub mod index;
pub mod mask;
pub mod policy;
pub mod region;
pub mod series;
pub mod stats;
pub mod time;
pub mod visualize;

#[cfg(test)]
pub(crate) mod test_utils;

pub use band::{Band, BandStack, SceneInfo};
pub use cloud::CloudMask;
pub use composite::{median_composite, SceneFilter};
pub use error::{RasterError, Result};
pub use grid::GridSpec;
pub use index::SpectralIndex;
pub use mask::{Comparison, Mask};
pub use policy::{BareLandPolicy, BareRule};
pub use region::{Polygon, Region};
pub use stats::{ReduceParams, Statistic};
pub use time::{DateRange, Season};
pub use visualize::VisParams;
