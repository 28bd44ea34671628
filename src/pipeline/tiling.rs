// Tiling pipeline
//   Region rasters are opened once (headers only), their footprints decide the
//   tile set, then every tile reads just the source windows it needs.

use super::{in_pool, with_retry, CancellationToken, PipelineError, RetryPolicy, UnitError, UnitOutcome};
use crate::cog::{CloudTiff, CloudTiffError};
use crate::config::{Config, RegionConfig, TilingConfig};
use crate::encode::Encoder;
use crate::grid::{union_tiles, TileGrid, TileId, TileSpec};
use crate::projection::{Crs, Region, Transformer};
use crate::raster::mosaic::mosaic;
use crate::raster::resample::{reproject, Resampling};
use crate::raster::{DataType, PixelGrid, Raster, ResizeFilter};
use rayon::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

pub const LAYER: &str = "mukey";

/// Extra source pixels read around each tile window.
const WINDOW_MARGIN: u32 = 2;

/// An opened region raster.
#[derive(Debug)]
pub struct SourceRegion {
    pub id: String,
    pub path: PathBuf,
    pub crs: Crs,
    pub nodata: f64,
    /// Densified bounds in the tile grid's CRS.
    pub footprint: Region<f64>,
    cog: CloudTiff,
    file: File,
}

impl SourceRegion {
    pub fn open(config: &RegionConfig, grid_crs: Crs) -> Result<Self, CloudTiffError> {
        let mut file = File::open(&config.path)?;
        let cog = CloudTiff::open(&mut file)?;
        let crs = config
            .epsg
            .map(Crs::from_epsg)
            .or(cog.crs)
            .ok_or(CloudTiffError::NoCrs)?;
        let nodata = config.nodata.unwrap_or_else(|| cog.nodata_or_default());
        cog.data_type().check_nodata(nodata)?;
        let bounds = cog.pixel_grid(Some(crs))?.bounds();
        let footprint = Transformer::new(crs, grid_crs)?.transform_bounds(&bounds)?;
        debug!(
            "region {} {}: {} nodata {}, footprint {:?}",
            config.id,
            crs,
            cog.data_type(),
            nodata,
            footprint.as_tuple()
        );
        Ok(Self {
            id: config.id.clone(),
            path: config.path.clone(),
            crs,
            nodata,
            footprint,
            cog,
            file,
        })
    }

    pub fn data_type(&self) -> DataType {
        self.cog.data_type()
    }

    pub fn grid(&self) -> Result<PixelGrid, CloudTiffError> {
        self.cog.pixel_grid(Some(self.crs))
    }

    /// This region resampled onto `tile`, or None when it has no pixels there.
    pub fn read_onto(&self, tile: &TileSpec) -> Result<Option<Raster>, UnitError> {
        let bounds = Transformer::new(tile.grid.crs, self.crs)?.transform_bounds(&tile.footprint)?;
        let Some(window) = self.grid()?.window_covering(&bounds, WINDOW_MARGIN) else {
            return Ok(None);
        };
        let source = self
            .cog
            .read_window(&self.file, &window, Some(self.crs), self.nodata)?;
        Ok(Some(reproject(&source, &tile.grid, Resampling::Nearest)?))
    }
}

/// Tiles of one tile set and the regions feeding them, lowest priority first.
#[derive(Debug)]
pub struct TileSetPlan {
    pub grid: TileGrid,
    pub regions: Vec<SourceRegion>,
    pub tiles: Vec<TileSpec>,
}

impl TileSetPlan {
    /// Output data type and nodata, taken from the first region.
    pub fn output_type(&self) -> (DataType, f64) {
        match self.regions.first() {
            Some(region) => (region.data_type(), region.nodata),
            None => (DataType::U32, DataType::U32.default_nodata()),
        }
    }
}

pub fn plan(config: &Config) -> Result<Vec<TileSetPlan>, PipelineError> {
    let mut plans = vec![];
    for tile_set in config.tile_sets.iter() {
        let grid = tile_set.tile_grid()?;
        let regions = tile_set
            .regions
            .iter()
            .map(|region| {
                SourceRegion::open(region, grid.crs).map_err(|source| PipelineError::Region {
                    id: region.id.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut tiles = vec![];
        for region in regions.iter() {
            tiles.extend(grid.tiles_intersecting(&region.footprint)?);
        }
        let tiles = union_tiles(tiles);
        info!(
            "tile set {}: {} regions, {} tiles",
            grid.name,
            regions.len(),
            tiles.len()
        );
        plans.push(TileSetPlan {
            grid,
            regions,
            tiles,
        });
    }
    Ok(plans)
}

pub enum TileProduct {
    Written(PathBuf),
    Empty,
}

/// `{out}/{tile}/mukey_{tile}.tif`
pub fn key_raster_path(output_dir: &Path, tile_id: &TileId) -> PathBuf {
    output_dir
        .join(tile_id.as_str())
        .join(format!("{LAYER}_{tile_id}.tif"))
}

/// Mosaic every region overlapping `tile` and write the result.
pub fn process_tile(
    plan: &TileSetPlan,
    tile: &TileSpec,
    settings: &TilingConfig,
    output_dir: &Path,
) -> Result<TileProduct, UnitError> {
    let mut layers = vec![];
    for region in plan.regions.iter() {
        if !region.footprint.intersects(&tile.footprint) {
            continue;
        }
        if let Some(raster) = region.read_onto(tile)? {
            debug!("tile {}: {} valid cells from {}", tile.id, raster.valid_count(), region.id);
            layers.push(raster);
        }
    }

    let (data_type, nodata) = plan.output_type();
    let raster = mosaic(&tile.grid, data_type, nodata, &layers)?;
    if settings.skip_empty_tiles && raster.is_empty() {
        return Ok(TileProduct::Empty);
    }

    let path = key_raster_path(output_dir, &tile.id);
    Encoder::from_raster(raster)
        .with_tile_size(settings.block_size)
        .with_compression(settings.compression)
        .with_big_tiff(settings.big_tiff)
        .with_filter(ResizeFilter::Nearest)
        .with_description(Some("Map unit key".to_string()))
        .write(&path)?;
    Ok(TileProduct::Written(path))
}

/// Tile every configured tile set. Tile failures are recorded, not raised.
pub fn run(config: &Config, token: &CancellationToken) -> Result<Vec<UnitOutcome>, PipelineError> {
    let plans = plan(config)?;
    let retry = RetryPolicy::from(&config.execution);
    let units: Vec<(&TileSetPlan, &TileSpec)> = plans
        .iter()
        .flat_map(|plan| plan.tiles.iter().map(move |tile| (plan, tile)))
        .collect();

    in_pool(config.execution.threads, || {
        units
            .par_iter()
            .map(|(plan, tile)| {
                if token.is_cancelled() {
                    return UnitOutcome::cancelled(tile.id.clone(), LAYER);
                }
                let (result, attempts) = with_retry(retry, tile.id.as_str(), || {
                    process_tile(plan, tile, &config.tiling, &config.output_dir)
                });
                match result {
                    Ok(TileProduct::Written(path)) => {
                        info!("tile {} written", tile.id);
                        UnitOutcome::written(tile.id.clone(), LAYER, path, attempts)
                    }
                    Ok(TileProduct::Empty) => {
                        warn!("tile {} is empty, skipped", tile.id);
                        UnitOutcome::skipped(tile.id.clone(), LAYER, "empty", attempts)
                    }
                    Err(e) => {
                        error!("tile {} failed: {e}", tile.id);
                        UnitOutcome::failed(tile.id.clone(), LAYER, e, attempts)
                    }
                }
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_rasters_live_in_tile_directories() {
        let id = TileId("conus_0_20_20_0".into());
        assert_eq!(
            key_raster_path(Path::new("out"), &id),
            Path::new("out/conus_0_20_20_0/mukey_conus_0_20_20_0.tif")
        );
    }
}
