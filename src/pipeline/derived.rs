// Derived rasters pipeline
//   Each tile's key raster is read and indexed once; every property of the
//   tile is then an independent unit that joins, materializes and writes.

use super::tiling::{self, key_raster_path};
use super::{
    in_pool, with_retry, CancellationToken, ErrorKind, PipelineError, RetryPolicy, UnitError,
    UnitOutcome, UnitStatus,
};
use crate::cog::CloudTiff;
use crate::config::{Config, DerivedConfig, TilingConfig};
use crate::derive::{file_name, materialize, NodataValues};
use crate::encode::Encoder;
use crate::grid::TileId;
use crate::raster::Raster;
use crate::table::join::join_property;
use crate::table::{AggregationPolicy, CombinedTable, KeyIndex};
use rayon::prelude::*;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Where the key rasters of a derived run come from.
#[derive(Clone, Debug)]
pub enum DerivedInputs {
    /// Outcomes of a tiling run. Failed tiles give skipped units, cancelled
    /// tiles cancelled ones.
    Tiling(Vec<UnitOutcome>),
    /// Explicit `mukey_{tile}.tif` files.
    Files(Vec<PathBuf>),
    /// Every `{dir}/{tile}/mukey_{tile}.tif`.
    Scan(PathBuf),
}

#[derive(Clone, Debug, PartialEq)]
enum TileSource {
    KeyRaster(PathBuf),
    Skip(String),
    Cancel,
    Fail(UnitError),
}

#[derive(Clone, Debug, PartialEq)]
struct TileInput {
    tile_id: TileId,
    source: TileSource,
}

/// Tile id of a `mukey_{tile}.tif` path.
pub fn tile_id_from_path(path: &Path) -> Option<TileId> {
    let name = path.file_name()?.to_str()?;
    let id = name
        .strip_prefix(&format!("{}_", tiling::LAYER))?
        .strip_suffix(".tif")?;
    (!id.is_empty()).then(|| TileId(id.to_string()))
}

fn resolve_inputs(inputs: DerivedInputs) -> Result<Vec<TileInput>, PipelineError> {
    let resolved = match inputs {
        DerivedInputs::Tiling(outcomes) => outcomes
            .into_iter()
            .filter_map(|outcome| {
                let source = match outcome.status {
                    UnitStatus::Written => TileSource::KeyRaster(outcome.path?),
                    UnitStatus::Failed => TileSource::Skip("upstream tiling failed".into()),
                    UnitStatus::Cancelled => TileSource::Cancel,
                    UnitStatus::Skipped => return None,
                };
                Some(TileInput {
                    tile_id: outcome.tile_id,
                    source,
                })
            })
            .collect(),
        DerivedInputs::Files(paths) => paths
            .into_iter()
            .map(|path| match tile_id_from_path(&path) {
                Some(tile_id) => TileInput {
                    tile_id,
                    source: TileSource::KeyRaster(path),
                },
                None => TileInput {
                    tile_id: TileId(path.display().to_string()),
                    source: TileSource::Fail(UnitError::new(
                        ErrorKind::Data,
                        format!("{} is not a {}_{{tile}}.tif file", path.display(), tiling::LAYER),
                    )),
                },
            })
            .collect(),
        DerivedInputs::Scan(dir) => {
            let entries = fs::read_dir(&dir).map_err(|source| PipelineError::Scan {
                path: dir.clone(),
                source,
            })?;
            let mut found = vec![];
            for entry in entries {
                let entry = entry.map_err(|source| PipelineError::Scan {
                    path: dir.clone(),
                    source,
                })?;
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                let tile_id = TileId(name);
                let path = key_raster_path(&dir, &tile_id);
                if path.is_file() {
                    found.push(TileInput {
                        tile_id,
                        source: TileSource::KeyRaster(path),
                    });
                }
            }
            found.sort_by(|a, b| a.tile_id.cmp(&b.tile_id));
            found
        }
    };
    Ok(resolved)
}

/// Properties to derive: the configured list, or every property column.
pub fn resolve_properties(
    table: &CombinedTable,
    settings: &DerivedConfig,
) -> Result<Vec<String>, PipelineError> {
    if let Some(weight_column) = settings.aggregation.weight_column() {
        table.column(weight_column)?;
    }
    if settings.properties.is_empty() {
        return Ok(table.property_names());
    }
    for property in settings.properties.iter() {
        table.column(property)?;
    }
    Ok(settings.properties.clone())
}

fn load_keys(path: &Path) -> Result<(Raster, KeyIndex), UnitError> {
    let mut file = File::open(path)?;
    let cog = CloudTiff::open(&mut file)?;
    let keys = cog.read_raster(&file, None, cog.nodata_or_default())?;
    let index = KeyIndex::from_raster(&keys)?;
    debug!("{}: {} distinct keys", path.display(), index.keys().len());
    Ok((keys, index))
}

/// Shared read-only state of a derived run.
struct DerivedContext<'a> {
    table: &'a CombinedTable,
    policy: &'a AggregationPolicy,
    nodata_values: NodataValues,
    settings: &'a DerivedConfig,
    tiling: &'a TilingConfig,
    retry: RetryPolicy,
}

enum PropertyProduct {
    Written(PathBuf),
    Empty,
}

impl DerivedContext<'_> {
    fn derive_property(
        &self,
        tile_id: &TileId,
        key_path: &Path,
        keys: &Raster,
        index: &KeyIndex,
        property: &str,
    ) -> Result<PropertyProduct, UnitError> {
        let mapping = join_property(self.table, property, index, self.policy)?;
        let derived = materialize(keys, index, &mapping, &self.nodata_values)?;
        if self.settings.skip_empty && derived.is_empty() {
            return Ok(PropertyProduct::Empty);
        }

        let dir = key_path.parent().unwrap_or(Path::new("."));
        let path = dir.join(file_name(property, tile_id));
        let description = mapping.description.clone().unwrap_or_else(|| property.to_string());
        Encoder::from_raster(derived)
            .with_tile_size(self.tiling.block_size)
            .with_compression(self.tiling.compression)
            .with_big_tiff(self.tiling.big_tiff)
            .with_filter(self.settings.overview_resampling)
            .with_description(Some(description))
            .write(&path)?;
        Ok(PropertyProduct::Written(path))
    }

    fn derive_tile(
        &self,
        input: &TileInput,
        properties: &[String],
        token: &CancellationToken,
    ) -> Vec<UnitOutcome> {
        let tile_id = &input.tile_id;
        let all = |f: &dyn Fn(&str) -> UnitOutcome| -> Vec<UnitOutcome> {
            properties.iter().map(|p| f(p)).collect()
        };
        let key_path = match &input.source {
            TileSource::Skip(reason) => {
                warn!("tile {tile_id}: {reason}, skipping {} properties", properties.len());
                return all(&|p| UnitOutcome::skipped(tile_id.clone(), p, reason, 0));
            }
            TileSource::Fail(e) => {
                return all(&|p| UnitOutcome::failed(tile_id.clone(), p, e.clone(), 0));
            }
            TileSource::Cancel => return all(&|p| UnitOutcome::cancelled(tile_id.clone(), p)),
            TileSource::KeyRaster(path) => path,
        };
        if token.is_cancelled() {
            return all(&|p| UnitOutcome::cancelled(tile_id.clone(), p));
        }

        let (loaded, load_attempts) = with_retry(self.retry, tile_id.as_str(), || load_keys(key_path));
        let (keys, index) = match loaded {
            Ok(loaded) => loaded,
            Err(e) => {
                error!("tile {tile_id}: cannot read key raster: {e}");
                return all(&|p| UnitOutcome::failed(tile_id.clone(), p, e.clone(), load_attempts));
            }
        };
        let missing = index.missing_keys(self.table);
        if !missing.is_empty() {
            let warning = UnitError::new(
                ErrorKind::MissingKey,
                format!("{} keys absent from the table", missing.len()),
            );
            warn!("tile {tile_id}: {warning} {missing:?}");
        }

        properties
            .par_iter()
            .map(|property| {
                if token.is_cancelled() {
                    return UnitOutcome::cancelled(tile_id.clone(), property);
                }
                let what = format!("{tile_id} {property}");
                let (result, attempts) = with_retry(self.retry, &what, || {
                    self.derive_property(tile_id, key_path, &keys, &index, property)
                });
                let outcome = match result {
                    Ok(PropertyProduct::Written(path)) => {
                        info!("{what} written");
                        UnitOutcome::written(tile_id.clone(), property, path, attempts)
                    }
                    Ok(PropertyProduct::Empty) => {
                        warn!("{what} is empty, skipped");
                        UnitOutcome::skipped(tile_id.clone(), property, "empty", attempts)
                    }
                    Err(e) => {
                        error!("{what} failed: {e}");
                        UnitOutcome::failed(tile_id.clone(), property, e, attempts)
                    }
                };
                outcome.with_missing_keys(missing.clone())
            })
            .collect()
    }
}

/// Derive every property for every input tile.
pub fn run(
    config: &Config,
    settings: &DerivedConfig,
    inputs: DerivedInputs,
    token: &CancellationToken,
) -> Result<Vec<UnitOutcome>, PipelineError> {
    let table = CombinedTable::open(&settings.table)?;
    info!("{table}");
    let properties = resolve_properties(&table, settings)?;
    let tiles = resolve_inputs(inputs)?;
    info!(
        "deriving {} properties for {} tiles with {} aggregation",
        properties.len(),
        tiles.len(),
        settings.aggregation
    );

    let context = DerivedContext {
        table: &table,
        policy: &settings.aggregation,
        nodata_values: settings.nodata_values(),
        settings,
        tiling: &config.tiling,
        retry: RetryPolicy::from(&config.execution),
    };
    in_pool(config.execution.threads, || {
        tiles
            .par_iter()
            .map(|input| context.derive_tile(input, &properties, token))
            .collect::<Vec<Vec<UnitOutcome>>>()
            .into_iter()
            .flatten()
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_ids_come_from_key_raster_names() {
        assert_eq!(
            tile_id_from_path(Path::new("out/x/mukey_conus_0_10_10_0.tif")),
            Some(TileId("conus_0_10_10_0".into()))
        );
        assert_eq!(tile_id_from_path(Path::new("aws0-5_conus.tif")), None);
        assert_eq!(tile_id_from_path(Path::new("mukey_.tif")), None);
    }

    #[test]
    fn tiling_outcomes_become_inputs() {
        let id = |s: &str| TileId(s.into());
        let outcomes = vec![
            UnitOutcome::written(id("a"), "mukey", PathBuf::from("out/a/mukey_a.tif"), 1),
            UnitOutcome::skipped(id("b"), "mukey", "empty", 1),
            UnitOutcome::failed(id("c"), "mukey", UnitError::new(ErrorKind::Write, "disk"), 1),
        ];
        let inputs = resolve_inputs(DerivedInputs::Tiling(outcomes)).unwrap();
        assert_eq!(inputs.len(), 2);
        assert_eq!(
            inputs[0].source,
            TileSource::KeyRaster(PathBuf::from("out/a/mukey_a.tif"))
        );
        assert_eq!(inputs[1].tile_id, id("c"));
        assert!(matches!(inputs[1].source, TileSource::Skip(_)));
    }

    #[test]
    fn badly_named_files_fail_their_units() {
        let inputs = resolve_inputs(DerivedInputs::Files(vec![PathBuf::from("keys.tif")])).unwrap();
        assert!(matches!(
            &inputs[0].source,
            TileSource::Fail(UnitError { kind: ErrorKind::Data, .. })
        ));
    }
}
