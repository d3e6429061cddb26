//! Band stacks and masks to RGBA images.

use common::Buffer2;
use serde::{Deserialize, Serialize};

use crate::band::{names, Band, BandStack};
use crate::error::{RasterError, Result};
use crate::mask::Mask;

pub type Rgba = [u8; 4];

pub const TRANSPARENT: Rgba = [0, 0, 0, 0];

/// Parses a CSS-style colour name or `#rrggbb`.
pub fn parse_color(name: &str) -> Result<[u8; 3]> {
    let rgb = match name.to_ascii_lowercase().as_str() {
        "black" => [0, 0, 0],
        "white" => [255, 255, 255],
        "red" => [255, 0, 0],
        "green" => [0, 128, 0],
        "lightgreen" => [144, 238, 144],
        "blue" => [0, 0, 255],
        "brown" => [165, 42, 42],
        "orange" => [255, 165, 0],
        "yellow" => [255, 255, 0],
        "gray" | "grey" => [128, 128, 128],
        hex if hex.len() == 7 && hex.starts_with('#') => {
            let channel = |at: usize| u8::from_str_radix(&hex[at..at + 2], 16);
            match (channel(1), channel(3), channel(5)) {
                (Ok(r), Ok(g), Ok(b)) => [r, g, b],
                _ => return Err(invalid_color(name)),
            }
        }
        _ => return Err(invalid_color(name)),
    };
    Ok(rgb)
}

fn invalid_color(name: &str) -> RasterError {
    RasterError::InvalidParameter {
        name: "palette",
        value: name.to_string(),
        reason: "unknown colour".to_string(),
    }
}

fn default_gamma() -> f64 {
    1.0
}

/// Display parameters for one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisParams {
    pub bands: Vec<String>,
    pub min: f64,
    pub max: f64,
    #[serde(default = "default_gamma")]
    pub gamma: f64,
    #[serde(default)]
    pub palette: Vec<String>,
}

impl VisParams {
    /// NIR/red/green over Sentinel-2 digital numbers.
    pub fn false_color(gamma: f64) -> Self {
        Self::rgb([names::NIR, names::RED, names::GREEN], gamma)
    }

    /// Red/green/blue over Sentinel-2 digital numbers.
    pub fn true_color(gamma: f64) -> Self {
        Self::rgb([names::RED, names::GREEN, names::BLUE], gamma)
    }

    fn rgb(bands: [&str; 3], gamma: f64) -> Self {
        Self {
            bands: bands.iter().map(|b| b.to_string()).collect(),
            min: 0.0,
            max: 3000.0,
            gamma,
            palette: Vec::new(),
        }
    }

    /// Single band over `[-1, 1]` with a palette ramp.
    pub fn index(band: &str, palette: &[&str]) -> Self {
        Self {
            bands: vec![band.to_string()],
            min: -1.0,
            max: 1.0,
            gamma: 1.0,
            palette: palette.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn bsi() -> Self {
        Self::index("BSI", &["blue", "white", "brown"])
    }

    pub fn vegetation(band: &str) -> Self {
        Self::index(band, &["white", "lightgreen", "green"])
    }

    fn validate(&self) -> Result<()> {
        if !(self.max > self.min) {
            return Err(RasterError::InvalidParameter {
                name: "max",
                value: self.max.to_string(),
                reason: format!("must exceed min {}", self.min),
            });
        }
        if !(self.gamma > 0.0) {
            return Err(RasterError::InvalidParameter {
                name: "gamma",
                value: self.gamma.to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    #[inline]
    fn normalize(&self, value: f64) -> f64 {
        ((value - self.min) / (self.max - self.min)).clamp(0.0, 1.0)
    }

    fn stretch(&self, value: f64) -> u8 {
        let t = self.normalize(value).powf(1.0 / self.gamma);
        (t * 255.0).round() as u8
    }
}

/// Piecewise-linear ramp over evenly spaced stops.
#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
    stops: Vec<[u8; 3]>,
}

impl Palette {
    pub fn parse(colors: &[String]) -> Result<Self> {
        let stops = if colors.is_empty() {
            vec![[0, 0, 0], [255, 255, 255]]
        } else {
            colors
                .iter()
                .map(|c| parse_color(c))
                .collect::<Result<_>>()?
        };
        Ok(Self { stops })
    }

    /// Colour at `t` in `[0, 1]`.
    pub fn at(&self, t: f64) -> [u8; 3] {
        if self.stops.len() == 1 {
            return self.stops[0];
        }
        let scaled = t.clamp(0.0, 1.0) * (self.stops.len() - 1) as f64;
        let lower = (scaled.floor() as usize).min(self.stops.len() - 2);
        let frac = scaled - lower as f64;
        let (a, b) = (self.stops[lower], self.stops[lower + 1]);
        std::array::from_fn(|c| (a[c] as f64 + (b[c] as f64 - a[c] as f64) * frac).round() as u8)
    }
}

/// Renders one band through a palette or three bands as RGB.
///
/// A pixel masked in any displayed band is transparent.
pub fn render(stack: &BandStack, params: &VisParams) -> Result<Buffer2<Rgba>> {
    params.validate()?;
    let grid = stack.grid();
    let bands: Vec<&Band> = params
        .bands
        .iter()
        .map(|name| stack.require("visualize", name))
        .collect::<Result<_>>()?;

    match bands.as_slice() {
        [band] => {
            let palette = Palette::parse(&params.palette)?;
            Ok(Buffer2::from_fn(grid.width, grid.height, |x, y| {
                match band.value(y * grid.width + x) {
                    Some(value) => {
                        let [r, g, b] = palette.at(params.normalize(value));
                        [r, g, b, 255]
                    }
                    None => TRANSPARENT,
                }
            }))
        }
        [r, g, b] => Ok(Buffer2::from_fn(grid.width, grid.height, |x, y| {
            let idx = y * grid.width + x;
            match (r.value(idx), g.value(idx), b.value(idx)) {
                (Some(r), Some(g), Some(b)) => {
                    [params.stretch(r), params.stretch(g), params.stretch(b), 255]
                }
                _ => TRANSPARENT,
            }
        })),
        _ => Err(RasterError::InvalidParameter {
            name: "bands",
            value: params.bands.join(","),
            reason: "expected one or three bands".to_string(),
        }),
    }
}

/// True pixels in `color`, everything else transparent.
pub fn render_mask(mask: &Mask, color: &str) -> Result<Buffer2<Rgba>> {
    let [r, g, b] = parse_color(color)?;
    let grid = mask.grid();
    Ok(Buffer2::from_fn(grid.width, grid.height, |x, y| {
        match mask.get(y * grid.width + x) {
            Some(true) => [r, g, b, 255],
            _ => TRANSPARENT,
        }
    }))
}

/// Horizontal legend strip for a palette, left is `min`.
pub fn color_bar(palette: &[String], width: usize, height: usize) -> Result<Buffer2<Rgba>> {
    let palette = Palette::parse(palette)?;
    let span = width.saturating_sub(1).max(1) as f64;
    Ok(Buffer2::from_fn(width, height, |x, _| {
        let [r, g, b] = palette.at(x as f64 / span);
        [r, g, b, 255]
    }))
}
