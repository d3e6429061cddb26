pub mod aggregator;
pub mod catalog;
pub mod compute;
pub mod execution_graph;
pub mod export;
pub mod graph;
pub mod pending;
pub mod presentation;
pub mod region_store;
pub mod value;
pub mod view_model;
pub mod worker;

#[cfg(test)]
mod tests;

pub mod prelude {
    pub use crate::aggregator::{LocalAggregator, SpatialAggregator};
    pub use crate::catalog::{CatalogQuery, ImageryCatalog, InMemoryCatalog};
    pub use crate::compute::Collaborators;
    pub use crate::execution_graph::{EvalReport, ExecutionError, ExecutionGraph, ExecutionResult};
    pub use crate::export::{ExportReceipt, ExportSink, FileExportSink};
    pub use crate::graph::{Graph, Node, NodeId, NodeKind, RegionSelector};
    pub use crate::pending::{Cancelled, Pending};
    pub use crate::presentation::{render_value, LayerStyle, Presenter};
    pub use crate::region_store::{InMemoryRegionStore, RegionStore};
    pub use crate::value::{Value, ValueType};
    pub use crate::view_model::{LayerViewModel, VisibilityChange};
    pub use crate::worker::Worker;
}
