//! The bare-land, time-series and rainfall analyses expressed as graphs
//! and run on a [`Worker`].

use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use chrono::Datelike;
use common::Buffer2;
use glam::DVec2;
use graph::prelude::*;
use graph::view_model::Layer;
use log::{info, warn};
use raster::series::{rainfall_chart, read_rainfall_csv, IndexSeries};
use raster::visualize::{color_bar, render_mask, Rgba};
use raster::{BareRule, Mask, Region, Season, SpectralIndex, Statistic, VisParams};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;

use crate::config::{BareLandConfig, ScenarioConfig};

/// Indices drawn as map layers, each with a legend.
const LAYER_INDICES: [SpectralIndex; 3] = [SpectralIndex::Ndvi, SpectralIndex::Savi, SpectralIndex::Bsi];

const LEGEND_SIZE: (usize, usize) = (100, 10);

/// Loaded collaborators and the study area built from the field regions.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub collaborators: Collaborators,
    pub study_area: Region,
    /// Field region names, without the study area.
    pub fields: Vec<String>,
}

impl Workspace {
    pub async fn load(config: &ScenarioConfig) -> anyhow::Result<Self> {
        let paths = &config.paths;
        let catalog = InMemoryCatalog::load(&paths.scenes)?;
        let regions = InMemoryRegionStore::load(&paths.regions, &paths.region_name_property)?;
        info!(
            "Loaded {} scenes from {} and regions from {}",
            catalog.len(),
            paths.scenes,
            paths.regions
        );
        Self::new(config, catalog, regions).await
    }

    /// Registers the study area as the union of every field, unless the
    /// store already has a region of that name.
    pub async fn new(
        config: &ScenarioConfig,
        catalog: InMemoryCatalog,
        mut regions: InMemoryRegionStore,
    ) -> anyhow::Result<Self> {
        let all = regions.regions().await?;
        let (named, fields): (Vec<Region>, Vec<Region>) = all
            .into_iter()
            .partition(|region| region.name == config.study_area);
        if fields.is_empty() && named.is_empty() {
            bail!("Region store has no regions to form {:?}", config.study_area);
        }

        let study_area = match named.into_iter().next() {
            Some(region) => region,
            None => {
                let union = Region::union(&config.study_area, &fields);
                regions.insert(union.clone());
                union
            }
        };

        let export_dir = std::path::Path::new(&config.paths.output_dir).join("exports");
        let collaborators = Collaborators::local(
            Arc::new(catalog),
            Arc::new(regions),
            &export_dir.display().to_string(),
        );

        Ok(Self {
            collaborators,
            study_area,
            fields: fields.into_iter().map(|region| region.name).collect(),
        })
    }

    pub fn bounds(&self) -> Option<(DVec2, DVec2)> {
        self.study_area.bounds()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerSpec {
    pub name: String,
    pub node: NodeId,
    pub style: LayerStyle,
}

/// The bare-land graph and the nodes the report reads.
#[derive(Debug, Clone)]
pub struct BareLandPlan {
    pub graph: Graph,
    /// Report label and node of each area, in report order.
    pub areas: Vec<(String, NodeId)>,
    pub layers: Vec<LayerSpec>,
    pub export: Option<NodeId>,
    /// Clipped winter composite, its grid carries the cropland outline.
    pub footprint: NodeId,
}

struct SeasonNodes {
    composite: NodeId,
    clipped: NodeId,
}

fn season_nodes(
    graph: &mut Graph,
    season: &Season,
    config: &BareLandConfig,
    area: &str,
    bounds: Option<(DVec2, DVec2)>,
) -> SeasonNodes {
    let name = &season.name;
    let scenes = graph.add(
        &format!("{name} scenes"),
        NodeKind::Scenes {
            query: CatalogQuery::new(season.range, config.max_scene_cloud).with_bounds(bounds),
        },
    );
    let clear = graph.add(
        &format!("{name} clear"),
        NodeKind::CloudMask {
            input: scenes,
            mask: config.cloud_mask,
        },
    );
    let indices = graph.add(
        &format!("{name} indices"),
        NodeKind::AddIndex {
            input: clear,
            indices: LAYER_INDICES.to_vec(),
        },
    );
    let composite = graph.add(&format!("{name} composite"), NodeKind::Composite { input: indices });
    let clipped = graph.add(
        &format!("{name} clipped composite"),
        NodeKind::Clip {
            input: composite,
            region: area.to_string(),
        },
    );
    SeasonNodes { composite, clipped }
}

fn rule_mask(graph: &mut Graph, name: &str, input: NodeId, rule: BareRule, area: &str) -> NodeId {
    let threshold = graph.add(
        &format!("{name} threshold"),
        NodeKind::Threshold {
            input,
            band: rule.index.band_name().to_string(),
            cmp: rule.cmp,
            value: rule.threshold,
        },
    );
    graph.add(
        name,
        NodeKind::Clip {
            input: threshold,
            region: area.to_string(),
        },
    )
}

fn index_style(index: SpectralIndex) -> LayerStyle {
    match index {
        SpectralIndex::Bsi => LayerStyle::Stack(VisParams::bsi()),
        other => LayerStyle::Stack(VisParams::vegetation(other.band_name())),
    }
}

fn legend_name(index: SpectralIndex) -> String {
    format!("{} Legend", index.band_name())
}

/// Seasonal composites, the independent winter candidates, the summer
/// mask and their delta and intersection, with areas, layers and export.
pub fn bare_land_plan(config: &ScenarioConfig, bounds: Option<(DVec2, DVec2)>) -> BareLandPlan {
    let bare_land = &config.bare_land;
    let area = config.study_area.as_str();
    let winter_name = &bare_land.winter.name;
    let summer_name = &bare_land.summer.name;
    let policy = &bare_land.policy;

    let mut graph = Graph::default();
    let winter = season_nodes(&mut graph, &bare_land.winter, bare_land, area, bounds);
    let summer = season_nodes(&mut graph, &bare_land.summer, bare_land, area, bounds);

    let [winter_bsi, winter_savi, winter_ndvi] = policy.winter_rules().map(|rule| {
        let name = format!("{winter_name} {} bare", rule.index.band_name());
        rule_mask(&mut graph, &name, winter.composite, rule, area)
    });
    let summer_bsi = rule_mask(&mut graph, &format!("{summer_name} BSI bare"), summer.composite, policy.bsi_rule(), area);

    let not_summer = graph.add(&format!("not {summer_name} BSI bare"), NodeKind::Not { input: summer_bsi });
    let delta = graph.add(
        "delta bare",
        NodeKind::And {
            a: winter_bsi,
            b: not_summer,
        },
    );
    let common = graph.add(
        "common bare",
        NodeKind::And {
            a: winter_bsi,
            b: summer_bsi,
        },
    );

    let mut areas = Vec::new();
    let total = graph.add_output(
        "Total Study Area",
        NodeKind::TotalArea {
            inputs: vec![winter.clipped, summer.clipped],
            region: area.to_string(),
            params: bare_land.reduce,
        },
    );
    areas.push(("Total Study Area".to_string(), total));

    let delta_label = format!("BSI Mask - {winter_name} Only Bare Cropland");
    let common_label = "Common Bare Cropland".to_string();
    for (label, mask) in [
        (format!("BSI Mask - {winter_name} Bare Cropland"), winter_bsi),
        (format!("SAVI Mask - {winter_name} Bare Cropland"), winter_savi),
        (format!("NDVI Mask - {winter_name} Bare Cropland"), winter_ndvi),
        (format!("BSI Mask - {summer_name} Bare Cropland"), summer_bsi),
        (delta_label.clone(), delta),
        (common_label.clone(), common),
    ] {
        let id = graph.add_output(
            &format!("{label} area"),
            NodeKind::Area {
                input: mask,
                region: area.to_string(),
                params: bare_land.reduce,
            },
        );
        areas.push((label, id));
    }

    let mut layers = vec![
        LayerSpec {
            name: format!("FCC {winter_name}"),
            node: winter.clipped,
            style: LayerStyle::Stack(VisParams::false_color(bare_land.winter_gamma)),
        },
        LayerSpec {
            name: format!("FCC {summer_name}"),
            node: summer.clipped,
            style: LayerStyle::Stack(VisParams::false_color(bare_land.summer_gamma)),
        },
        LayerSpec {
            name: format!("TCC {winter_name}"),
            node: winter.clipped,
            style: LayerStyle::Stack(VisParams::true_color(bare_land.winter_gamma)),
        },
        LayerSpec {
            name: format!("TCC {summer_name}"),
            node: summer.clipped,
            style: LayerStyle::Stack(VisParams::true_color(bare_land.summer_tcc_gamma)),
        },
    ];
    for index in [SpectralIndex::Bsi, SpectralIndex::Savi, SpectralIndex::Ndvi] {
        for (season, node) in [(winter_name, winter.clipped), (summer_name, summer.clipped)] {
            layers.push(LayerSpec {
                name: format!("{} {season}", index.band_name()),
                node,
                style: index_style(index),
            });
        }
    }
    for (name, node, color) in [
        (format!("BSI Mask - {summer_name} Bare Cropland"), summer_bsi, "blue"),
        (delta_label, delta, "orange"),
        ("BSI Mask - All Seasons Bare Cropland".to_string(), common, "green"),
    ] {
        layers.push(LayerSpec {
            name,
            node,
            style: LayerStyle::Mask { color: color.to_string() },
        });
    }

    let export = bare_land.export.enabled.then(|| {
        graph.add_output(
            "export",
            NodeKind::Export {
                input: winter_bsi,
                region: area.to_string(),
                name: bare_land.export.name.clone(),
                params: bare_land.export.params,
            },
        )
    });

    BareLandPlan {
        graph,
        areas,
        layers,
        export,
        footprint: winter.clipped,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaLine {
    pub label: String,
    pub statistic: Statistic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BareLandReport {
    pub areas: Vec<AreaLine>,
    pub export: Option<ExportReceipt>,
    /// Final layer visibility.
    pub layers: Vec<Layer>,
}

impl BareLandReport {
    pub fn area(&self, label: &str) -> Option<&Statistic> {
        self.areas
            .iter()
            .find(|line| line.label == label)
            .map(|line| &line.statistic)
    }
}

impl Display for BareLandReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for line in &self.areas {
            writeln!(f, "{} (km²): {}", line.label, line.statistic)?;
        }
        if let Some(export) = &self.export {
            writeln!(f, "Exported {} to {}", export.name, export.location)?;
        }
        Ok(())
    }
}

/// Applies one toggle. An index name such as `BSI` switches both season
/// layers and the legend together.
pub fn apply_toggle(view_model: &LayerViewModel, name: &str, seasons: [&str; 2]) -> anyhow::Result<()> {
    if view_model.is_visible(name).is_some() {
        view_model.toggle(name)?;
        return Ok(());
    }

    let group: Vec<String> = [
        format!("{name} {}", seasons[0]),
        format!("{name} {}", seasons[1]),
        format!("{name} Legend"),
    ]
    .into_iter()
    .filter(|layer| view_model.is_visible(layer).is_some())
    .collect();
    if group.is_empty() {
        return Err(anyhow!("Unknown layer {name:?}"));
    }

    // the group follows its legend, or its first member, so mixed states converge
    let leader = group.iter().find(|layer| layer.ends_with(" Legend")).unwrap_or(&group[0]);
    let visible = !view_model.is_visible(leader).unwrap_or(false);
    for layer in &group {
        view_model.set_visible(layer, visible)?;
    }
    Ok(())
}

fn cropland_layer(value: Option<&Value>, area: &Region) -> anyhow::Result<Option<Buffer2<Rgba>>> {
    let Some(Value::Stack(stack)) = value else {
        return Ok(None);
    };
    let outline = Mask::filled(*stack.grid(), true).clip(area);
    Ok(Some(render_mask(&outline, "orange")?))
}

/// Runs the bare-land analysis, presents its layers and applies `toggles`.
pub async fn run_bare_land(
    config: &ScenarioConfig,
    workspace: &Workspace,
    presenter: Arc<dyn Presenter>,
    toggles: &[String],
) -> anyhow::Result<BareLandReport> {
    let plan = bare_land_plan(config, workspace.bounds());
    let mut worker = Worker::new(workspace.collaborators.clone());
    worker.update(plan.graph.clone());

    let mut statistic_nodes: Vec<NodeId> = plan.areas.iter().map(|(_, id)| *id).collect();
    statistic_nodes.extend(plan.export);
    let mut layer_nodes: Vec<NodeId> = vec![plan.footprint];
    for layer in &plan.layers {
        if !layer_nodes.contains(&layer.node) {
            layer_nodes.push(layer.node);
        }
    }

    // both requests are in flight before either is awaited
    let statistics = worker.request(statistic_nodes);
    let rendered = worker.request(layer_nodes);

    let statistics = statistics.await??;
    let rendered = rendered.await??;
    worker.exit().await;

    let mut areas = Vec::with_capacity(plan.areas.len());
    for (label, id) in &plan.areas {
        let statistic = statistics
            .by_id(id)
            .and_then(Value::as_statistic)
            .cloned()
            .ok_or_else(|| anyhow!("No statistic for {label:?}"))?;
        areas.push(AreaLine {
            label: label.clone(),
            statistic,
        });
    }
    let export = plan
        .export
        .and_then(|id| statistics.by_id(&id))
        .and_then(Value::as_export)
        .cloned();

    let mut images: BTreeMap<String, Buffer2<Rgba>> = BTreeMap::new();
    for layer in &plan.layers {
        let Some(value) = rendered.by_id(&layer.node) else {
            continue;
        };
        match render_value(value, &layer.style)? {
            Some(image) => {
                images.insert(layer.name.clone(), image);
            }
            None => warn!("Layer {:?} has no data", layer.name),
        }
    }
    if let Some(image) = cropland_layer(rendered.by_id(&plan.footprint), &workspace.study_area)? {
        images.insert("Cropland".to_string(), image);
    }
    for index in LAYER_INDICES {
        let palette = match index_style(index) {
            LayerStyle::Stack(params) => params.palette,
            LayerStyle::Mask { color } => vec![color],
        };
        images.insert(legend_name(index), color_bar(&palette, LEGEND_SIZE.0, LEGEND_SIZE.1)?);
    }

    let view_model = LayerViewModel::new();
    for name in images.keys() {
        view_model.add_layer(name, config.layer_visible(name));
    }
    for layer in view_model.layers().iter().filter(|layer| layer.visible) {
        presenter.layer(&layer.name, &images[&layer.name])?;
    }

    let mut changes = view_model.subscribe();
    let listener = {
        let presenter = Arc::clone(&presenter);
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) if change.visible => {
                        if let Some(image) = images.get(&change.layer) {
                            presenter.layer(&change.layer, image)?;
                        }
                    }
                    Ok(change) => presenter.hide(&change.layer)?,
                    Err(RecvError::Lagged(skipped)) => warn!("Missed {skipped} layer changes"),
                    Err(RecvError::Closed) => break,
                }
            }
            anyhow::Ok(())
        })
    };

    let seasons = [config.bare_land.winter.name.as_str(), config.bare_land.summer.name.as_str()];
    let toggled = toggles
        .iter()
        .try_for_each(|name| apply_toggle(&view_model, name, seasons));
    let layers = view_model.layers();
    drop(view_model);
    listener.await??;
    toggled?;

    info!(
        "{} of {} layers shown",
        layers.iter().filter(|layer| layer.visible).count(),
        layers.len()
    );

    Ok(BareLandReport { areas, export, layers })
}

/// Cloud-masked scenes reduced to index means per date, over the study
/// area or per field.
pub fn time_series_plan(config: &ScenarioConfig, workspace: &Workspace) -> (Graph, NodeId) {
    let series = &config.time_series;
    let mut graph = Graph::default();
    let scenes = graph.add(
        "series scenes",
        NodeKind::Scenes {
            query: CatalogQuery::new(series.range, series.max_scene_cloud).with_bounds(workspace.bounds()),
        },
    );
    let clear = graph.add(
        "series clear",
        NodeKind::CloudMask {
            input: scenes,
            mask: series.cloud_mask,
        },
    );
    let names = if series.per_feature {
        workspace.fields.clone()
    } else {
        vec![config.study_area.clone()]
    };
    let output = graph.add_output(
        "index series",
        NodeKind::RegionSeries {
            input: clear,
            indices: series.indices.clone(),
            regions: RegionSelector::Names { names },
            params: series.reduce,
        },
    );
    (graph, output)
}

/// "NDVI, SAVI, BSI, NDMI & NDSI"
fn index_list(indices: &[SpectralIndex]) -> String {
    let names: Vec<&str> = indices.iter().map(SpectralIndex::band_name).collect();
    match names.split_last() {
        Some((last, rest)) if !rest.is_empty() => format!("{} & {last}", rest.join(", ")),
        Some((last, _)) => last.to_string(),
        None => String::new(),
    }
}

pub async fn run_time_series(
    config: &ScenarioConfig,
    workspace: &Workspace,
    presenter: &dyn Presenter,
) -> anyhow::Result<Arc<IndexSeries>> {
    let (graph, output) = time_series_plan(config, workspace);
    let mut worker = Worker::new(workspace.collaborators.clone());
    worker.update(graph);
    let report = worker.request(vec![output]).await??;
    worker.exit().await;

    let series = match report.by_id(&output) {
        Some(Value::Series(series)) => Arc::clone(series),
        Some(Value::NoData { reason }) => bail!("No time series: {reason}"),
        _ => bail!("Time series node produced no series"),
    };
    if series.is_empty() {
        warn!("Time series over {} has no rows", config.time_series.range);
    }

    let range = &config.time_series.range;
    let chart = if config.time_series.per_feature {
        series.table(&format!(
            "Index Values for Each Date and {}",
            config.paths.region_name_property
        ))
    } else {
        series.line_chart(
            &config.study_area,
            &format!(
                "Time Series of {} ({}-{})",
                index_list(&config.time_series.indices),
                range.start.year(),
                range.end.year()
            ),
        )
    };
    presenter.chart(&chart.title, &chart)?;
    info!("Time series: {} rows over {}", series.len(), range);
    Ok(series)
}

pub fn write_series_csv(series: &IndexSeries, path: &std::path::Path) -> anyhow::Result<()> {
    let file = std::fs::File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    series.write_csv(file)
}

/// Daily rainfall charts for every configured station. Stations whose file
/// is missing are skipped; returns the number of charts presented.
pub fn run_rainfall(config: &ScenarioConfig, presenter: &dyn Presenter) -> anyhow::Result<usize> {
    let range = &config.rainfall.range;
    let mut presented = 0;
    for station in &config.rainfall.stations {
        let file = match std::fs::File::open(&station.path) {
            Ok(file) => file,
            Err(err) => {
                warn!("Skipping station {:?}: {} ({err})", station.name, station.path);
                continue;
            }
        };
        let records = read_rainfall_csv(file).with_context(|| format!("Station {:?}", station.name))?;
        let chart = rainfall_chart(&station.name, &records, range);
        if chart.series.iter().all(|series| series.points.is_empty()) {
            warn!("Station {:?} has no readings in {range}", station.name);
        }
        presenter.chart(&chart.title, &chart)?;
        presented += 1;
    }
    Ok(presented)
}
