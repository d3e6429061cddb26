use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use raster::{stats, BandStack, GridSpec, Mask, ReduceParams, Region, Statistic};

/// Reduces masks and bands over regions under a pixel budget.
#[async_trait]
pub trait SpatialAggregator: Debug + Send + Sync {
    async fn area_km2(&self, mask: Arc<Mask>, region: Region, params: ReduceParams) -> anyhow::Result<Statistic>;

    async fn total_area_km2(&self, grid: GridSpec, region: Region, params: ReduceParams)
        -> anyhow::Result<Statistic>;

    async fn mean(
        &self,
        stack: Arc<BandStack>,
        band: String,
        region: Region,
        params: ReduceParams,
    ) -> anyhow::Result<Statistic>;
}

/// Runs the raster reducers on the blocking pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalAggregator;

#[async_trait]
impl SpatialAggregator for LocalAggregator {
    async fn area_km2(&self, mask: Arc<Mask>, region: Region, params: ReduceParams) -> anyhow::Result<Statistic> {
        let stat = tokio::task::spawn_blocking(move || stats::area_km2(&mask, &region, &params)).await??;
        Ok(stat)
    }

    async fn total_area_km2(
        &self,
        grid: GridSpec,
        region: Region,
        params: ReduceParams,
    ) -> anyhow::Result<Statistic> {
        let stat = tokio::task::spawn_blocking(move || stats::total_area_km2(&grid, &region, &params)).await??;
        Ok(stat)
    }

    async fn mean(
        &self,
        stack: Arc<BandStack>,
        band: String,
        region: Region,
        params: ReduceParams,
    ) -> anyhow::Result<Statistic> {
        let stat = tokio::task::spawn_blocking(move || {
            let values = stack.require("mean", &band)?;
            stats::mean(stack.grid(), values, &region, &params)
        })
        .await??;
        Ok(stat)
    }
}

#[cfg(test)]
mod tests {
    use glam::DVec2;
    use raster::{Band, Polygon};

    use super::*;

    fn grid() -> GridSpec {
        GridSpec::new(10, 10, DVec2::new(0.0, 100.0), 10.0)
    }

    fn area() -> Region {
        Region::new("area", vec![Polygon::rectangle(DVec2::ZERO, DVec2::new(50.0, 100.0))])
    }

    #[tokio::test]
    async fn reductions_run_off_the_async_threads() -> anyhow::Result<()> {
        let aggregator = LocalAggregator;
        let mask = Arc::new(Mask::filled(grid(), true));

        let bare = aggregator.area_km2(mask, area(), ReduceParams::default()).await?;
        assert_eq!(bare.value(), Some(0.005));

        let total = aggregator.total_area_km2(grid(), area(), ReduceParams::default()).await?;
        assert_eq!(total.value(), Some(0.005));

        let stack = BandStack::new(grid(), None).with_band("NDVI", Band::filled(10, 10, 0.25))?;
        let mean = aggregator
            .mean(Arc::new(stack), "NDVI".to_string(), area(), ReduceParams::default())
            .await?;
        assert_eq!(mean.value(), Some(0.25));
        Ok(())
    }

    #[tokio::test]
    async fn missing_band_surfaces_as_error() -> anyhow::Result<()> {
        let stack = Arc::new(BandStack::new(grid(), None));
        let result = LocalAggregator
            .mean(stack, "BSI".to_string(), area(), ReduceParams::default())
            .await;
        assert!(result.is_err());
        Ok(())
    }
}
