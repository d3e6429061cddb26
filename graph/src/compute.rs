use std::collections::BTreeMap;
use std::sync::Arc;

use raster::series::IndexSeries;
use raster::{index, median_composite, BandStack, Mask, RasterError, Region, Statistic};

use crate::aggregator::{LocalAggregator, SpatialAggregator};
use crate::catalog::ImageryCatalog;
use crate::execution_graph::{ExecutionError, ExecutionResult};
use crate::export::{ExportSink, FileExportSink};
use crate::graph::{NodeKind, RegionSelector};
use crate::region_store::RegionStore;
use crate::value::Value;

/// External services a graph evaluation reads from and writes to.
#[derive(Debug, Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn ImageryCatalog>,
    pub regions: Arc<dyn RegionStore>,
    pub aggregator: Arc<dyn SpatialAggregator>,
    pub export: Arc<dyn ExportSink>,
}

impl Collaborators {
    /// Local aggregation, exports written under `export_dir`.
    pub fn local(
        catalog: Arc<dyn ImageryCatalog>,
        regions: Arc<dyn RegionStore>,
        export_dir: &str,
    ) -> Self {
        Self {
            catalog,
            regions,
            aggregator: Arc::new(LocalAggregator),
            export: Arc::new(FileExportSink::new(export_dir)),
        }
    }
}

fn raster_err(node: &str) -> impl Fn(RasterError) -> ExecutionError + '_ {
    move |source| ExecutionError::Raster {
        node: node.to_string(),
        source,
    }
}

fn collaborator_err(node: &str) -> impl Fn(anyhow::Error) -> ExecutionError + '_ {
    move |err| ExecutionError::Collaborator {
        node: node.to_string(),
        message: format!("{err:#}"),
    }
}

fn mismatch(node: &str, expected: &str, found: &Value) -> ExecutionError {
    ExecutionError::TypeMismatch {
        node: node.to_string(),
        expected: expected.to_string(),
        found: found.value_type(),
    }
}

/// Applies `f` to a single stack or to every stack of a collection.
fn map_stacks<F>(node: &str, input: &Value, f: F) -> ExecutionResult<Value>
where
    F: Fn(&BandStack) -> raster::Result<BandStack>,
{
    match input {
        Value::Collection(stacks) => {
            let mapped = stacks
                .iter()
                .map(&f)
                .collect::<raster::Result<Vec<_>>>()
                .map_err(raster_err(node))?;
            Ok(Value::Collection(Arc::new(mapped)))
        }
        Value::Stack(stack) => Ok(f(stack).map_err(raster_err(node))?.into()),
        Value::NoData { .. } => Ok(input.clone()),
        other => Err(mismatch(node, "Collection or Stack", other)),
    }
}

fn mask_of<'a>(node: &str, input: &'a Value) -> ExecutionResult<Option<&'a Arc<Mask>>> {
    match input {
        Value::Mask(mask) => Ok(Some(mask)),
        Value::NoData { .. } => Ok(None),
        other => Err(mismatch(node, "Mask", other)),
    }
}

fn no_data_reason(value: &Value) -> String {
    match value {
        Value::NoData { reason } => reason.clone(),
        _ => String::new(),
    }
}

async fn region(node: &str, name: &str, collaborators: &Collaborators) -> ExecutionResult<Region> {
    collaborators
        .regions
        .region(name)
        .await
        .map_err(collaborator_err(node))
}

fn log_statistic(node: &str, stat: &Statistic) {
    match stat {
        Statistic::NoData { .. } => log::warn!("{node}: {stat}"),
        Statistic::Value {
            approximate: true, ..
        } => log::warn!("{node}: {stat}"),
        Statistic::Value { .. } => log::info!("{node}: {stat}"),
    }
}

/// Evaluates one node from the values of its inputs, in `NodeKind::inputs` order.
pub(crate) async fn invoke(
    node: &str,
    kind: &NodeKind,
    inputs: &[Value],
    collaborators: &Collaborators,
) -> ExecutionResult<Value> {
    match kind {
        NodeKind::Scenes { query } => {
            let scenes = collaborators
                .catalog
                .query(query)
                .await
                .map_err(collaborator_err(node))?;
            if scenes.is_empty() {
                log::warn!("{node}: no scenes match {query}");
            } else {
                log::debug!("{node}: {} scenes match {query}", scenes.len());
            }
            Ok(Value::Collection(Arc::new(scenes)))
        }

        NodeKind::CloudMask { mask, .. } => {
            mask.validate().map_err(raster_err(node))?;
            map_stacks(node, &inputs[0], |stack| mask.apply(stack))
        }

        NodeKind::AddIndex { indices, .. } => {
            map_stacks(node, &inputs[0], |stack| index::add_indices(stack, indices))
        }

        NodeKind::Composite { .. } => match &inputs[0] {
            Value::Collection(stacks) => match median_composite(stacks) {
                Ok(composite) => Ok(composite.into()),
                Err(RasterError::EmptyCollection { context }) => {
                    log::warn!("{node}: nothing to composite ({context})");
                    Ok(Value::no_data(format!("{node}: no scenes")))
                }
                Err(err) => Err(raster_err(node)(err)),
            },
            Value::NoData { .. } => Ok(inputs[0].clone()),
            other => Err(mismatch(node, "Collection", other)),
        },

        NodeKind::Threshold {
            band, cmp, value, ..
        } => match &inputs[0] {
            Value::Stack(stack) => Ok(Mask::threshold_band(stack, band, *cmp, *value)
                .map_err(raster_err(node))?
                .into()),
            Value::NoData { .. } => Ok(inputs[0].clone()),
            other => Err(mismatch(node, "Stack", other)),
        },

        NodeKind::And { .. } | NodeKind::Or { .. } => {
            let (Some(a), Some(b)) = (mask_of(node, &inputs[0])?, mask_of(node, &inputs[1])?) else {
                let missing = if inputs[0].is_no_data() { &inputs[0] } else { &inputs[1] };
                return Ok(missing.clone());
            };
            let combined = match kind {
                NodeKind::And { .. } => a.and(b),
                _ => a.or(b),
            };
            Ok(combined.map_err(raster_err(node))?.into())
        }

        NodeKind::Not { .. } => Ok(match mask_of(node, &inputs[0])? {
            Some(mask) => mask.not().into(),
            None => inputs[0].clone(),
        }),

        NodeKind::Clip { region: name, .. } => {
            let region = region(node, name, collaborators).await?;
            match &inputs[0] {
                Value::Mask(mask) => Ok(mask.clip(&region).into()),
                Value::Stack(stack) => Ok(stack.update_mask(&region.rasterize(stack.grid())).into()),
                Value::NoData { .. } => Ok(inputs[0].clone()),
                other => Err(mismatch(node, "Mask or Stack", other)),
            }
        }

        NodeKind::Area {
            region: name, params, ..
        } => {
            let stat = match mask_of(node, &inputs[0])? {
                Some(mask) => {
                    let region = region(node, name, collaborators).await?;
                    collaborators
                        .aggregator
                        .area_km2(Arc::clone(mask), region, *params)
                        .await
                        .map_err(collaborator_err(node))?
                }
                None => Statistic::no_data(no_data_reason(&inputs[0])),
            };
            log_statistic(node, &stat);
            Ok(stat.into())
        }

        NodeKind::TotalArea {
            region: name, params, ..
        } => {
            let mut grid = None;
            for input in inputs {
                match input {
                    Value::Mask(mask) => grid = Some(*mask.grid()),
                    Value::Stack(stack) => grid = Some(*stack.grid()),
                    Value::NoData { .. } => continue,
                    other => return Err(mismatch(node, "Mask or Stack", other)),
                }
                break;
            }
            let stat = match grid {
                Some(grid) => {
                    let region = region(node, name, collaborators).await?;
                    collaborators
                        .aggregator
                        .total_area_km2(grid, region, *params)
                        .await
                        .map_err(collaborator_err(node))?
                }
                None if inputs.is_empty() => Statistic::no_data("no input grid"),
                None => Statistic::no_data(
                    inputs
                        .iter()
                        .map(no_data_reason)
                        .collect::<Vec<_>>()
                        .join("; "),
                ),
            };
            log_statistic(node, &stat);
            Ok(stat.into())
        }

        NodeKind::Mean {
            band,
            region: name,
            params,
            ..
        } => {
            let stat = match &inputs[0] {
                Value::Stack(stack) => {
                    stack.require("mean", band).map_err(raster_err(node))?;
                    let region = region(node, name, collaborators).await?;
                    collaborators
                        .aggregator
                        .mean(Arc::clone(stack), band.clone(), region, *params)
                        .await
                        .map_err(collaborator_err(node))?
                }
                Value::NoData { reason } => Statistic::no_data(reason.clone()),
                other => return Err(mismatch(node, "Stack", other)),
            };
            log_statistic(node, &stat);
            Ok(stat.into())
        }

        NodeKind::RegionSeries {
            indices,
            regions,
            params,
            ..
        } => {
            let stacks = match &inputs[0] {
                Value::Collection(stacks) => Arc::clone(stacks),
                Value::NoData { .. } => return Ok(inputs[0].clone()),
                other => return Err(mismatch(node, "Collection", other)),
            };
            let regions = select_regions(regions, collaborators)
                .await
                .map_err(collaborator_err(node))?;
            let series = region_series(node, &stacks, indices, &regions, *params, collaborators).await?;
            Ok(Value::Series(Arc::new(series)))
        }

        NodeKind::Export {
            region: name,
            name: export_name,
            params,
            ..
        } => {
            let stack = match &inputs[0] {
                Value::Stack(stack) => Arc::clone(stack),
                Value::Mask(mask) => Arc::new(
                    BandStack::new(*mask.grid(), None)
                        .with_band(export_name, mask.to_band())
                        .map_err(raster_err(node))?,
                ),
                Value::NoData { reason } => {
                    log::warn!("{node}: nothing to export ({reason})");
                    return Ok(inputs[0].clone());
                }
                other => return Err(mismatch(node, "Stack or Mask", other)),
            };
            let region = region(node, name, collaborators).await?;
            let receipt = collaborators
                .export
                .export(export_name, stack, region, *params)
                .await
                .map_err(collaborator_err(node))?;
            Ok(Value::Export(receipt))
        }
    }
}

async fn select_regions(selector: &RegionSelector, collaborators: &Collaborators) -> anyhow::Result<Vec<Region>> {
    let store = &collaborators.regions;
    match selector {
        RegionSelector::All => store.regions().await,
        RegionSelector::Attribute { attribute, value } => store.filter(attribute, value).await,
        RegionSelector::Names { names } => {
            let mut regions = Vec::with_capacity(names.len());
            for name in names {
                regions.push(store.region(name).await?);
            }
            Ok(regions)
        }
    }
}

/// Mean of every index over every region for every dated scene.
async fn region_series(
    node: &str,
    stacks: &[BandStack],
    indices: &[raster::SpectralIndex],
    regions: &[Region],
    params: raster::ReduceParams,
    collaborators: &Collaborators,
) -> ExecutionResult<IndexSeries> {
    let columns: Vec<String> = indices.iter().map(|index| index.band_name().to_string()).collect();
    let mut series = IndexSeries::new(columns.clone());
    if stacks.is_empty() {
        log::warn!("{node}: empty collection, series has no rows");
    }

    for stack in stacks {
        let Some(scene) = stack.scene() else {
            log::warn!("{node}: skipping {} without a scene date", stack.label());
            continue;
        };
        let stack = Arc::new(index::add_indices(stack, indices).map_err(raster_err(node))?);

        for region in regions {
            let mut stats = BTreeMap::new();
            for column in &columns {
                let stat = collaborators
                    .aggregator
                    .mean(Arc::clone(&stack), column.clone(), region.clone(), params)
                    .await
                    .map_err(collaborator_err(node))?;
                stats.insert(column.clone(), stat);
            }
            series.push(&region.name, scene.date, &stats);
        }
    }

    log::info!(
        "{node}: {} rows, {} dropped for missing values",
        series.len(),
        series.dropped
    );
    Ok(series)
}
