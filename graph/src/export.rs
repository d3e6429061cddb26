//! Export sink collaborator.
//!
//! [`FileExportSink`] writes one JSON file per export, on the sampled grid:
//!
//! ```text
//! { "name": "winter_composite", "grid": { ... },
//!   "bands": { "BSI": [0.12, null, ...] } }
//! ```

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use raster::stats::{lattice_count, scale_stride};
use raster::{BandStack, GridSpec, ReduceParams, Region};
use serde::{Deserialize, Serialize};

/// Where and how a stack was persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportReceipt {
    pub name: String,
    pub location: String,
    pub grid: GridSpec,
    pub bands: Vec<String>,
    pub approximate: bool,
}

#[async_trait]
pub trait ExportSink: Debug + Send + Sync {
    /// Persists `stack` clipped to `region` at `params.scale`.
    async fn export(
        &self,
        name: &str,
        stack: Arc<BandStack>,
        region: Region,
        params: ReduceParams,
    ) -> anyhow::Result<ExportReceipt>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExportFile {
    pub name: String,
    pub grid: GridSpec,
    pub bands: BTreeMap<String, Vec<Option<f64>>>,
}

/// Samples `stack` every `stride` pixels, masking pixels outside `region`.
///
/// The stride follows `params.scale` and coarsens while the region holds
/// more than `max_pixels` samples.
pub fn resample(name: &str, stack: &BandStack, region: &Region, params: &ReduceParams) -> anyhow::Result<(ExportFile, bool)> {
    params.validate()?;
    let grid = stack.grid();
    grid.validate()?;
    let inside = region.rasterize(grid);

    let mut stride = scale_stride(grid, params);
    let mut approximate = false;
    while lattice_count(&inside, stride) > params.max_pixels {
        stride += 1;
        approximate = true;
    }
    if approximate {
        log::warn!("Export {name} over max_pixels {}, sampling every {stride} pixels", params.max_pixels);
    }

    let out = GridSpec::new(
        grid.width.div_ceil(stride),
        grid.height.div_ceil(stride),
        grid.origin,
        grid.pixel_size * stride as f64,
    );

    let mut bands = BTreeMap::new();
    for named in stack.bands() {
        let mut values = Vec::with_capacity(out.len());
        for y in 0..out.height {
            for x in 0..out.width {
                let idx = (y * stride) * grid.width + x * stride;
                values.push(if inside.get(idx) {
                    named.band.value(idx)
                } else {
                    None
                });
            }
        }
        bands.insert(named.name.clone(), values);
    }

    Ok((
        ExportFile {
            name: name.to_string(),
            grid: out,
            bands,
        },
        approximate,
    ))
}

#[derive(Debug, Clone)]
pub struct FileExportSink {
    dir: PathBuf,
}

impl FileExportSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ExportSink for FileExportSink {
    async fn export(
        &self,
        name: &str,
        stack: Arc<BandStack>,
        region: Region,
        params: ReduceParams,
    ) -> anyhow::Result<ExportReceipt> {
        let export_name = name.to_string();
        let (file, approximate) =
            tokio::task::spawn_blocking(move || resample(&export_name, &stack, &region, &params)).await??;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating export directory {}", self.dir.display()))?;
        let path = self.dir.join(format!("{name}.json"));
        let json = serde_json::to_string(&file)?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("writing export {}", path.display()))?;

        log::info!("Exported {name} to {}", path.display());
        Ok(ExportReceipt {
            name: name.to_string(),
            location: path.display().to_string(),
            grid: file.grid,
            bands: file.bands.into_keys().collect(),
            approximate,
        })
    }
}
