use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use raster::{Comparison, DateRange, RasterError, ReduceParams, SpectralIndex, Statistic};

use super::fixtures::*;
use crate::catalog::CatalogQuery;
use crate::execution_graph::{ExecutionError, ExecutionGraph};
use crate::graph::{Graph, Node, NodeId, NodeKind, RegionSelector};
use crate::value::{Value, ValueType};

fn km2(stat: Option<&Statistic>) -> f64 {
    stat.and_then(Statistic::value).unwrap_or(f64::NAN)
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-12
}

#[tokio::test]
async fn delta_and_common_areas() -> anyhow::Result<()> {
    let collaborators = collaborators(&temp_dir("delta"))?;
    let mut execution_graph = ExecutionGraph::default();
    execution_graph.update(&bare_land_graph(winter(), summer()))?;

    let report = execution_graph.evaluate(&[], &collaborators).await?;
    assert_eq!(report.values.len(), 3);
    assert!(close(km2(report.statistic("winter bare area")), 0.0008));
    assert!(close(km2(report.statistic("delta area")), 0.0004));
    assert!(close(km2(report.statistic("common area")), 0.0004));
    Ok(())
}

#[tokio::test]
async fn delta_and_common_partition_winter_bare() -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(5);
    for _ in 0..8 {
        let catalog = crate::catalog::InMemoryCatalog::new(vec![
            random_scene(&mut rng, "winter-1", date(2022, 2, 20))?,
            random_scene(&mut rng, "winter-2", date(2022, 3, 10))?,
            random_scene(&mut rng, "summer-1", date(2023, 6, 15))?,
        ]);
        let collaborators = crate::compute::Collaborators::local(
            Arc::new(catalog),
            Arc::new(regions()),
            &temp_dir("partition"),
        );
        let mut execution_graph = ExecutionGraph::default();
        execution_graph.update(&bare_land_graph(winter(), summer()))?;
        execution_graph.evaluate(&[], &collaborators).await?;

        let mask = |name: &str| {
            execution_graph
                .by_name(name)
                .and_then(|node| node.value())
                .and_then(Value::as_mask)
                .cloned()
                .unwrap_or_else(|| panic!("{name} has no mask"))
        };
        let (winter_bare, summer_bare) = (mask("winter bare"), mask("summer bare"));
        let (delta, common) = (mask("delta"), mask("common"));

        assert!(common.is_subset_of(&winter_bare));
        assert!(common.is_subset_of(&summer_bare));
        assert!(delta.is_subset_of(&winter_bare));
        assert!(delta.is_disjoint(&common));
        assert!(delta.is_disjoint(&summer_bare));
        assert_eq!(delta.count_true() + common.count_true(), winter_bare.count_true());
    }
    Ok(())
}

#[tokio::test]
async fn empty_scene_filter_yields_no_data() -> anyhow::Result<()> {
    let collaborators = collaborators(&temp_dir("empty"))?;
    let nothing = DateRange {
        start: date(2021, 1, 1),
        end: date(2021, 2, 1),
    };
    let mut execution_graph = ExecutionGraph::default();
    execution_graph.update(&bare_land_graph(nothing, summer()))?;

    let report = execution_graph.evaluate(&[], &collaborators).await?;
    let winter_area = report.statistic("winter bare area").unwrap();
    assert!(winter_area.is_no_data());
    assert_eq!(winter_area.value(), None);
    assert!(report.statistic("delta area").unwrap().is_no_data());
    assert!(report.statistic("common area").unwrap().is_no_data());

    let composite = execution_graph.by_name("winter composite").unwrap();
    assert!(composite.value().is_some_and(Value::is_no_data));
    Ok(())
}

#[tokio::test]
async fn total_area_takes_the_first_grid_with_data() -> anyhow::Result<()> {
    let collaborators = collaborators(&temp_dir("total"))?;
    let nothing = DateRange {
        start: date(2021, 1, 1),
        end: date(2021, 2, 1),
    };
    let mut graph = Graph::default();
    let mut composite = |name: &str, range: DateRange| {
        let scenes = graph.add(
            &format!("{name} scenes"),
            NodeKind::Scenes {
                query: CatalogQuery::new(range, 20.0),
            },
        );
        graph.add(&format!("{name} composite"), NodeKind::Composite { input: scenes })
    };
    let empty = composite("empty", nothing);
    let summer_composite = composite("summer", summer());
    for (name, inputs) in [("total", vec![empty, summer_composite]), ("none", vec![empty])] {
        graph.add_output(
            name,
            NodeKind::TotalArea {
                inputs,
                region: "study area".to_string(),
                params: ReduceParams::default(),
            },
        );
    }

    let mut execution_graph = ExecutionGraph::default();
    execution_graph.update(&graph)?;
    let report = execution_graph.evaluate(&[], &collaborators).await?;
    assert!(close(km2(report.statistic("total")), 0.0016));
    assert!(report.statistic("none").unwrap().is_no_data());
    Ok(())
}

#[tokio::test]
async fn only_requested_upstream_nodes_run() -> anyhow::Result<()> {
    let collaborators = collaborators(&temp_dir("pull"))?;
    let graph = bare_land_graph(winter(), summer());
    let winter_area = graph.id_of("winter bare area")?;

    let mut execution_graph = ExecutionGraph::default();
    execution_graph.update(&graph)?;
    let report = execution_graph.evaluate(&[winter_area], &collaborators).await?;

    assert_eq!(report.values.len(), 1);
    assert_eq!(report.stats.executed_nodes, 6);
    assert!(!execution_graph.by_name("summer scenes").unwrap().is_cached());
    Ok(())
}

#[tokio::test]
async fn cached_values_survive_unrelated_updates() -> anyhow::Result<()> {
    let collaborators = collaborators(&temp_dir("cache"))?;
    let mut graph = bare_land_graph(winter(), summer());
    let mut execution_graph = ExecutionGraph::default();
    execution_graph.update(&graph)?;

    let first = execution_graph.evaluate(&[], &collaborators).await?;
    assert_eq!(first.stats.executed_nodes, graph.nodes.len());

    let again = execution_graph.evaluate(&[], &collaborators).await?;
    assert_eq!(again.stats.executed_nodes, 0);

    // a stricter summer threshold only reruns the summer mask and its dependants
    let summer_bare = graph.id_of("summer bare")?;
    let node = graph.by_id_mut(&summer_bare).unwrap();
    let NodeKind::Threshold { value, .. } = &mut node.kind else {
        panic!("summer bare is a threshold");
    };
    *value = 0.9;
    execution_graph.update(&graph)?;

    let rerun = execution_graph.evaluate(&[], &collaborators).await?;
    // summer bare, not summer bare, delta, common, delta area, common area
    assert_eq!(rerun.stats.executed_nodes, 6);
    assert!(close(km2(rerun.statistic("delta area")), 0.0008));
    assert_eq!(km2(rerun.statistic("common area")), 0.0);
    Ok(())
}

#[tokio::test]
async fn invalidate_reruns_downstream() -> anyhow::Result<()> {
    let collaborators = collaborators(&temp_dir("invalidate"))?;
    let graph = bare_land_graph(winter(), summer());
    let mut execution_graph = ExecutionGraph::default();
    execution_graph.update(&graph)?;
    execution_graph.evaluate(&[], &collaborators).await?;

    execution_graph.invalidate_recursively([graph.id_of("winter composite")?]);
    assert!(execution_graph.by_name("winter scenes").unwrap().is_cached());
    assert!(!execution_graph.by_name("delta area").unwrap().is_cached());

    let report = execution_graph.evaluate(&[], &collaborators).await?;
    // composite, indices, bare, delta, common and the three areas
    assert_eq!(report.stats.executed_nodes, 8);
    Ok(())
}

#[test]
fn cycles_are_rejected() {
    let a = NodeId::from_u128(1);
    let b = NodeId::from_u128(2);
    let mut graph = Graph::default();
    graph.add_node(Node {
        id: a,
        name: "a".to_string(),
        kind: NodeKind::Not { input: b },
        output: true,
    });
    graph.add_node(Node {
        id: b,
        name: "b".to_string(),
        kind: NodeKind::Not { input: a },
        output: false,
    });

    let err = ExecutionGraph::default().update(&graph).unwrap_err();
    assert!(matches!(err, ExecutionError::CycleDetected { .. }));
}

#[test]
fn unknown_input_is_rejected() {
    let mut graph = Graph::default();
    graph.add(
        "dangling",
        NodeKind::Composite {
            input: NodeId::from_u128(7),
        },
    );
    let err = ExecutionGraph::default().update(&graph).unwrap_err();
    assert!(matches!(err, ExecutionError::UnknownNode { .. }));
}

#[tokio::test]
async fn wrong_input_type_is_reported() -> anyhow::Result<()> {
    let collaborators = collaborators(&temp_dir("types"))?;
    let mut graph = Graph::default();
    let scenes = graph.add(
        "scenes",
        NodeKind::Scenes {
            query: CatalogQuery::new(winter(), 20.0),
        },
    );
    graph.add_output(
        "bare",
        NodeKind::Threshold {
            input: scenes,
            band: "BSI".to_string(),
            cmp: Comparison::Gt,
            value: 0.0,
        },
    );

    let mut execution_graph = ExecutionGraph::default();
    execution_graph.update(&graph)?;
    let err = execution_graph.evaluate(&[], &collaborators).await.unwrap_err();
    assert_eq!(
        err,
        ExecutionError::TypeMismatch {
            node: "bare".to_string(),
            expected: "Stack".to_string(),
            found: ValueType::Collection,
        }
    );
    Ok(())
}

#[tokio::test]
async fn missing_band_names_node_and_formula() -> anyhow::Result<()> {
    let collaborators = collaborators(&temp_dir("band"))?;
    let mut graph = Graph::default();
    let scenes = graph.add(
        "scenes",
        NodeKind::Scenes {
            query: CatalogQuery::new(winter(), 20.0).with_bands(&["B4", "B8"]),
        },
    );
    graph.add_output(
        "indices",
        NodeKind::AddIndex {
            input: scenes,
            indices: vec![SpectralIndex::Ndvi, SpectralIndex::Bsi],
        },
    );

    let mut execution_graph = ExecutionGraph::default();
    execution_graph.update(&graph)?;
    let err = execution_graph.evaluate(&[], &collaborators).await.unwrap_err();
    let ExecutionError::Raster {
        node,
        source: RasterError::MissingBand { formula, band, .. },
    } = err
    else {
        panic!("expected a missing band error, got {err}");
    };
    assert_eq!(node, "indices");
    assert_eq!(formula, "BSI");
    assert_eq!(band, "B11");
    Ok(())
}

#[tokio::test]
async fn region_series_has_a_row_per_scene_and_region() -> anyhow::Result<()> {
    let collaborators = collaborators(&temp_dir("series"))?;
    let mut graph = Graph::default();
    let scenes = graph.add(
        "summer scenes",
        NodeKind::Scenes {
            query: CatalogQuery::new(summer(), 20.0),
        },
    );
    let series = graph.add_output(
        "cropland series",
        NodeKind::RegionSeries {
            input: scenes,
            indices: vec![SpectralIndex::Ndvi, SpectralIndex::Bsi],
            regions: RegionSelector::Attribute {
                attribute: "crop_type".to_string(),
                value: "Cropland".to_string(),
            },
            params: ReduceParams::new(30.0, 10_000_000),
        },
    );

    let mut execution_graph = ExecutionGraph::default();
    execution_graph.update(&graph)?;
    let report = execution_graph.evaluate(&[series], &collaborators).await?;
    let series = report.get("cropland series").and_then(Value::as_series).unwrap();

    assert_eq!(series.columns, ["NDVI", "BSI"]);
    assert_eq!(series.len(), 2);
    assert!(series.rows.iter().all(|row| row.region == "west"));
    assert_eq!(series.rows[0].date, date(2023, 6, 15));
    Ok(())
}

#[tokio::test]
async fn export_writes_clipped_composite() -> anyhow::Result<()> {
    let dir = temp_dir("export");
    let collaborators = collaborators(&dir)?;
    let mut graph = bare_land_graph(winter(), summer());
    let indices = graph.id_of("winter indices")?;
    let export = graph.add(
        "export winter",
        NodeKind::Export {
            input: indices,
            region: "west".to_string(),
            name: "winter_composite".to_string(),
            params: ReduceParams::default(),
        },
    );

    let mut execution_graph = ExecutionGraph::default();
    execution_graph.update(&graph)?;
    let report = execution_graph.evaluate(&[export], &collaborators).await?;
    let receipt = report.get("export winter").and_then(Value::as_export).unwrap();
    assert!(receipt.bands.contains(&"BSI".to_string()));
    assert!(std::path::Path::new(&receipt.location).exists());

    std::fs::remove_dir_all(&dir)?;
    Ok(())
}
