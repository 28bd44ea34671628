// Run configuration
//   One YAML document describing the tile sets to build, the derived layers to
//   compute from them and how hard to push the machine.

use crate::cog::OutputCompression;
use crate::derive::{NodataValues, DEFAULT_INT16_NODATA};
use crate::encode::MAX_TILE_SIZE;
use crate::grid::{GridError, TileGrid};
use crate::projection::Crs;
use crate::raster::{DataType, ResizeFilter};
use crate::table::AggregationPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path:?}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub output_dir: PathBuf,
    pub tile_sets: Vec<TileSetConfig>,
    #[serde(default)]
    pub tiling: TilingConfig,
    #[serde(default)]
    pub derived: Option<DerivedConfig>,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TileSetConfig {
    pub name: String,
    pub grid: GridConfig,
    /// Lowest priority first.
    pub regions: Vec<RegionConfig>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GridConfig {
    pub epsg: u16,
    pub origin: [f64; 2],
    pub tile_size: f64,
    pub resolution: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegionConfig {
    pub id: String,
    pub path: PathBuf,
    /// Overrides the file's GeoKeys.
    #[serde(default)]
    pub epsg: Option<u16>,
    /// Overrides the file's GDAL_NODATA.
    #[serde(default)]
    pub nodata: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TilingConfig {
    pub block_size: u32,
    pub compression: OutputCompression,
    pub skip_empty_tiles: bool,
    pub big_tiff: bool,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            block_size: crate::encode::DEFAULT_TILE_SIZE,
            compression: OutputCompression::Deflate,
            skip_empty_tiles: true,
            big_tiff: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DerivedConfig {
    pub table: PathBuf,
    /// Empty means every property column of the table.
    #[serde(default)]
    pub properties: Vec<String>,
    #[serde(default)]
    pub aggregation: AggregationPolicy,
    #[serde(default)]
    pub overview_resampling: ResizeFilter,
    #[serde(default = "default_true")]
    pub skip_empty: bool,
    #[serde(default = "default_int16_nodata")]
    pub int16_nodata: f64,
    #[serde(default = "default_int32_nodata")]
    pub int32_nodata: f64,
    #[serde(default = "default_float_nodata")]
    pub float_nodata: f64,
}

impl DerivedConfig {
    pub fn nodata_values(&self) -> NodataValues {
        NodataValues {
            int16: self.int16_nodata,
            int32: self.int32_nodata,
            float32: self.float_nodata,
            float64: self.float_nodata,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionConfig {
    pub threads: Option<usize>,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            threads: None,
            max_retries: 2,
            retry_backoff_ms: 200,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_int16_nodata() -> f64 {
    DEFAULT_INT16_NODATA
}

fn default_int32_nodata() -> f64 {
    i32::MIN as f64
}

fn default_float_nodata() -> f64 {
    f64::NAN
}

impl Config {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&text)?;
        Ok(config.relative_to(path.parent().unwrap_or(Path::new(""))))
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve relative paths against `dir`.
    fn relative_to(mut self, dir: &Path) -> Self {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = dir.join(&*p);
            }
        };
        resolve(&mut self.output_dir);
        for tile_set in self.tile_sets.iter_mut() {
            for region in tile_set.regions.iter_mut() {
                resolve(&mut region.path);
            }
        }
        if let Some(derived) = self.derived.as_mut() {
            resolve(&mut derived.table);
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tile_sets.is_empty() {
            return Err(ConfigError::Invalid("no tile sets".into()));
        }
        let mut names = HashSet::new();
        for tile_set in self.tile_sets.iter() {
            if !names.insert(tile_set.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "tile set {:?} is defined twice",
                    tile_set.name
                )));
            }
            if tile_set.regions.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "tile set {:?} has no regions",
                    tile_set.name
                )));
            }
            tile_set.tile_grid()?;
        }
        let block = self.tiling.block_size;
        if block == 0 || block % 16 != 0 || block > MAX_TILE_SIZE {
            return Err(ConfigError::Invalid(format!(
                "block size {block} is not a multiple of 16 in 16..={MAX_TILE_SIZE}"
            )));
        }
        if let Some(derived) = self.derived.as_ref() {
            let sentinels = [
                ("int16_nodata", DataType::I16, derived.int16_nodata),
                ("int32_nodata", DataType::I32, derived.int32_nodata),
                ("float_nodata", DataType::F32, derived.float_nodata),
            ];
            for (name, data_type, nodata) in sentinels {
                data_type
                    .check_nodata(nodata)
                    .map_err(|e| ConfigError::Invalid(format!("derived.{name}: {e}")))?;
            }
        }
        if let Some(threads) = self.execution.threads {
            if threads == 0 {
                return Err(ConfigError::Invalid("threads must be positive".into()));
            }
        }
        Ok(())
    }

    pub fn derived(&self) -> Result<&DerivedConfig, ConfigError> {
        self.derived
            .as_ref()
            .ok_or_else(|| ConfigError::Invalid("no derived section".into()))
    }
}

impl TileSetConfig {
    pub fn tile_grid(&self) -> Result<TileGrid, GridError> {
        TileGrid::new(
            &self.name,
            Crs::from_epsg(self.grid.epsg),
            (self.grid.origin[0], self.grid.origin[1]),
            self.grid.tile_size,
            self.grid.resolution,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
output_dir: out
tile_sets:
  - name: conus
    grid: { epsg: 5070, origin: [-2400000, 3200000], tile_size: 163840, resolution: 10 }
    regions:
      - { id: gSSURGO_AL, path: in/gSSURGO_AL.tif }
      - { id: gNATSGO_AR, path: in/gNATSGO_AR.tif, epsg: 5070, nodata: 2147483647 }
derived:
  table: tables/valu1.json
  aggregation: { policy: weighted_mean, weight_column: comppct_r }
execution:
  threads: 4
"#;

    #[test]
    fn parses_with_defaults() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(config.tile_sets[0].regions[1].nodata, Some(2147483647.0));
        assert_eq!(config.tiling, TilingConfig::default());
        assert_eq!(config.execution.max_retries, 2);
        assert_eq!(config.execution.threads, Some(4));

        let derived = config.derived().unwrap();
        assert!(derived.skip_empty);
        assert_eq!(derived.overview_resampling, ResizeFilter::Nearest);
        assert_eq!(
            derived.aggregation,
            AggregationPolicy::WeightedMean {
                weight_column: "comppct_r".into()
            }
        );
        let nodata = derived.nodata_values();
        assert_eq!(nodata.int16, -9999.0);
        assert!(nodata.float32.is_nan());

        let grid = config.tile_sets[0].tile_grid().unwrap();
        assert_eq!(grid.tile_pixels(), 16384);
    }

    #[test]
    fn rejects_invalid_configs() {
        let duplicate = YAML.replace(
            "derived:",
            "  - name: conus\n    grid: { epsg: 5070, origin: [0, 0], tile_size: 10, resolution: 1 }\n    regions: [{ id: a, path: a.tif }]\nderived:",
        );
        assert!(matches!(
            Config::from_yaml(&duplicate),
            Err(ConfigError::Invalid(_))
        ));

        for bad in ["int16_nodata: 40000", "int32_nodata: 3000000000", "float_nodata: 1.0e300"] {
            let yaml = YAML.replace(
                "  aggregation:",
                &format!("  {bad}\n  aggregation:"),
            );
            assert!(
                matches!(Config::from_yaml(&yaml), Err(ConfigError::Invalid(_))),
                "{bad}"
            );
        }

        let fractional = YAML.replace("resolution: 10", "resolution: 3");
        assert!(matches!(
            Config::from_yaml(&fractional),
            Err(ConfigError::Grid(GridError::FractionalTile { .. }))
        ));

        let huge_block = format!("{YAML}tiling:\n  block_size: 65536\n");
        assert!(matches!(
            Config::from_yaml(&huge_block),
            Err(ConfigError::Invalid(_))
        ));

        let unknown = format!("{YAML}surprise: 1\n");
        assert!(matches!(
            Config::from_yaml(&unknown),
            Err(ConfigError::ParseError(_))
        ));
    }
}
