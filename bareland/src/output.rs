use std::path::{Path, PathBuf};

use anyhow::Context;
use common::Buffer2;
use graph::prelude::Presenter;
use raster::series::ChartSpec;
use raster::visualize::Rgba;

/// File name for a layer or chart title: lowercase, words joined by `_`.
pub fn slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    slug
}

/// Writes layers as PNG and charts as JSON under one directory.
#[derive(Debug, Clone)]
pub struct DirectoryPresenter {
    dir: PathBuf,
}

impl DirectoryPresenter {
    pub fn new(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn layer_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.png", slug(name)))
    }

    pub fn chart_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", slug(name)))
    }
}

impl Presenter for DirectoryPresenter {
    fn layer(&self, name: &str, image: &Buffer2<Rgba>) -> anyhow::Result<()> {
        let path = self.layer_path(name);
        let bytes: Vec<u8> = image.pixels().iter().flatten().copied().collect();
        image::save_buffer_with_format(
            &path,
            &bytes,
            image.width() as u32,
            image.height() as u32,
            image::ColorType::Rgba8,
            image::ImageFormat::Png,
        )
        .with_context(|| format!("Failed to write layer {name:?}"))?;
        log::debug!("Layer {name:?} written to {}", path.display());
        Ok(())
    }

    fn chart(&self, name: &str, chart: &ChartSpec) -> anyhow::Result<()> {
        let path = self.chart_path(name);
        std::fs::write(&path, chart.to_json()?)
            .with_context(|| format!("Failed to write chart {name:?}"))?;
        log::info!("Chart {:?} written to {}", chart.title, path.display());
        Ok(())
    }

    fn hide(&self, name: &str) -> anyhow::Result<()> {
        let path = self.layer_path(name);
        if path.exists() {
            std::fs::remove_file(&path)?;
            log::debug!("Layer {name:?} hidden");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use raster::series::{ChartKind, ChartSeries};

    use super::*;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("bareland-out-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn slugs_are_file_friendly() {
        assert_eq!(slug("BSI Mask - Winter Bare Cropland"), "bsi_mask_winter_bare_cropland");
        assert_eq!(slug("  FCC Winter "), "fcc_winter");
        assert_eq!(slug("ESH-Winning Daily Rainfall (2022-2023)"), "esh_winning_daily_rainfall_2022_2023");
    }

    #[test]
    fn layers_are_png_and_hide_removes_them() -> anyhow::Result<()> {
        let dir = temp_dir();
        let presenter = DirectoryPresenter::new(&dir)?;
        let image = Buffer2::from_fn(3, 2, |x, _| [x as u8 * 80, 0, 0, 255]);

        presenter.layer("Delta Bare Cropland", &image)?;
        let path = presenter.layer_path("Delta Bare Cropland");
        let decoded = image::open(&path)?.to_rgba8();
        assert_eq!(decoded.dimensions(), (3, 2));
        assert_eq!(decoded.get_pixel(2, 1).0, [160, 0, 0, 255]);

        presenter.hide("Delta Bare Cropland")?;
        assert!(!path.exists());
        presenter.hide("never shown")?;

        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[test]
    fn charts_are_json() -> anyhow::Result<()> {
        let dir = temp_dir();
        let presenter = DirectoryPresenter::new(&dir)?;
        let chart = ChartSpec {
            kind: ChartKind::Column,
            title: "Rain".to_string(),
            x_label: "Date".to_string(),
            y_label: "Rainfall (mm)".to_string(),
            series: vec![ChartSeries {
                name: "value".to_string(),
                points: vec![("2023-01-01".to_string(), 2.5)],
            }],
        };
        presenter.chart("Rain", &chart)?;

        let parsed: ChartSpec = serde_json::from_str(&std::fs::read_to_string(presenter.chart_path("Rain"))?)?;
        assert_eq!(parsed, chart);

        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }
}
