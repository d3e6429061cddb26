use std::fmt::Debug;

use common::Buffer2;
use raster::series::ChartSpec;
use raster::visualize::Rgba;
use raster::{Mask, VisParams};

use crate::value::Value;

/// Sink for rendered layers and charts.
pub trait Presenter: Debug + Send + Sync {
    fn layer(&self, name: &str, image: &Buffer2<Rgba>) -> anyhow::Result<()>;

    fn chart(&self, name: &str, chart: &ChartSpec) -> anyhow::Result<()>;

    /// Called when a layer is switched off.
    fn hide(&self, _name: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// How a node value is drawn as a map layer.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerStyle {
    Stack(VisParams),
    Mask { color: String },
}

/// Renders `value` with `style`. Returns `None` for values with nothing
/// to draw, such as no-data.
pub fn render_value(value: &Value, style: &LayerStyle) -> anyhow::Result<Option<Buffer2<Rgba>>> {
    let image = match (value, style) {
        (Value::Stack(stack), LayerStyle::Stack(params)) => raster::visualize::render(stack, params)?,
        (Value::Mask(mask), LayerStyle::Mask { color }) => raster::visualize::render_mask(mask, color)?,
        (Value::Mask(mask), LayerStyle::Stack(params)) => render_mask_band(mask, params)?,
        (Value::NoData { .. }, _) => return Ok(None),
        (other, _) => anyhow::bail!("{} values cannot be drawn as a layer", other.value_type()),
    };
    Ok(Some(image))
}

fn render_mask_band(mask: &Mask, params: &VisParams) -> anyhow::Result<Buffer2<Rgba>> {
    let band = params.bands.first().map_or("mask", String::as_str);
    let stack = raster::BandStack::new(*mask.grid(), None).with_band(band, mask.to_band())?;
    Ok(raster::visualize::render(&stack, params)?)
}
