//! Fixed tiling of a projected plane.
//!
//! Tile (0, 0) has its top-left corner at the grid origin, columns grow
//! eastwards and rows southwards. Everything here is pure arithmetic.

use crate::projection::{Crs, Region};
use crate::raster::{GeoTransform, PixelGrid};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GridError {
    #[error("grid {name}: tile size {tile_size} and resolution {resolution} must be positive and finite")]
    NonPositive {
        name: String,
        tile_size: f64,
        resolution: f64,
    },
    #[error("grid {name}: tile size {tile_size} is not a whole number of {resolution} pixels")]
    FractionalTile {
        name: String,
        tile_size: f64,
        resolution: f64,
    },
    #[error("bounding box {0:?} is not finite")]
    BadBounds((f64, f64, f64, f64)),
}

#[derive(Clone, Debug, PartialEq)]
pub struct TileGrid {
    pub name: String,
    pub crs: Crs,
    pub origin: (f64, f64),
    pub tile_size: f64,
    pub resolution: f64,
    tile_pixels: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileKey {
    pub row: i64,
    pub col: i64,
}

/// Deterministic tile name, `{grid}_{left}_{top}_{right}_{bottom}`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TileId(pub String);

impl TileId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TileSpec {
    pub id: TileId,
    pub key: TileKey,
    pub footprint: Region<f64>,
    pub grid: PixelGrid,
}

impl TileGrid {
    pub fn new(
        name: &str,
        crs: Crs,
        origin: (f64, f64),
        tile_size: f64,
        resolution: f64,
    ) -> Result<Self, GridError> {
        let valid = |v: f64| v.is_finite() && v > 0.0;
        if !valid(tile_size) || !valid(resolution) {
            return Err(GridError::NonPositive {
                name: name.into(),
                tile_size,
                resolution,
            });
        }
        let pixels = tile_size / resolution;
        if pixels.fract() != 0.0 || pixels > u32::MAX as f64 {
            return Err(GridError::FractionalTile {
                name: name.into(),
                tile_size,
                resolution,
            });
        }
        Ok(Self {
            name: name.into(),
            crs,
            origin,
            tile_size,
            resolution,
            tile_pixels: pixels as u32,
        })
    }

    /// Edge length of a tile in pixels.
    pub fn tile_pixels(&self) -> u32 {
        self.tile_pixels
    }

    pub fn tile(&self, key: TileKey) -> TileSpec {
        let left = self.origin.0 + key.col as f64 * self.tile_size;
        let top = self.origin.1 - key.row as f64 * self.tile_size;
        let right = left + self.tile_size;
        let bottom = top - self.tile_size;
        let id = TileId(format!("{}_{left}_{top}_{right}_{bottom}", self.name));
        TileSpec {
            id,
            key,
            footprint: Region::new(left, bottom, right, top),
            grid: PixelGrid::new(
                self.crs,
                GeoTransform::new(left, top, self.resolution, self.resolution),
                self.tile_pixels,
                self.tile_pixels,
            ),
        }
    }

    /// Tiles whose footprint overlaps `bbox` with positive area, row-major.
    ///
    /// A zero-area box yields the tile containing it.
    pub fn tiles_intersecting(&self, bbox: &Region<f64>) -> Result<Vec<TileSpec>, GridError> {
        if !bbox.is_finite() {
            return Err(GridError::BadBounds(bbox.as_tuple()));
        }
        let (col_min, col_max) = span(
            (bbox.x_min() - self.origin.0) / self.tile_size,
            (bbox.x_max() - self.origin.0) / self.tile_size,
        );
        let (row_min, row_max) = span(
            (self.origin.1 - bbox.y_max()) / self.tile_size,
            (self.origin.1 - bbox.y_min()) / self.tile_size,
        );
        let mut tiles = vec![];
        for row in row_min..row_max {
            for col in col_min..col_max {
                tiles.push(self.tile(TileKey { row, col }));
            }
        }
        Ok(tiles)
    }
}

fn span(from: f64, to: f64) -> (i64, i64) {
    let low = from.floor() as i64;
    let high = (to.ceil() as i64).max(low + 1);
    (low, high)
}

/// Union of tile sets by key, in row-major order.
pub fn union_tiles<I: IntoIterator<Item = TileSpec>>(tiles: I) -> Vec<TileSpec> {
    tiles
        .into_iter()
        .map(|tile| (tile.key, tile))
        .collect::<BTreeMap<_, _>>()
        .into_values()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> TileGrid {
        TileGrid::new("conus", Crs::from_epsg(5070), (0.0, 0.0), 100.0, 10.0).unwrap()
    }

    #[test]
    fn tile_ids_follow_footprints() {
        let tile = grid().tile(TileKey { row: 1, col: -2 });
        assert_eq!(tile.id.as_str(), "conus_-200_-100_-100_-200");
        assert_eq!(tile.footprint.as_tuple(), (-200.0, -200.0, -100.0, -100.0));
        assert_eq!((tile.grid.width, tile.grid.height), (10, 10));
        assert_eq!(tile.grid.bounds(), tile.footprint);
    }

    #[test]
    fn intersecting_tiles_are_row_major() {
        let tiles = grid()
            .tiles_intersecting(&Region::new(50.0, -150.0, 150.0, 20.0))
            .unwrap();
        let keys: Vec<(i64, i64)> = tiles.iter().map(|t| (t.key.row, t.key.col)).collect();
        assert_eq!(keys, vec![(-1, 0), (-1, 1), (0, 0), (0, 1), (1, 0), (1, 1)]);
    }

    #[test]
    fn edges_do_not_count_as_overlap() {
        let tiles = grid()
            .tiles_intersecting(&Region::new(0.0, -100.0, 100.0, 0.0))
            .unwrap();
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].key, TileKey { row: 0, col: 0 });
    }

    #[test]
    fn degenerate_box_gets_containing_tile() {
        let tiles = grid()
            .tiles_intersecting(&Region::new(150.0, -50.0, 150.0, -50.0))
            .unwrap();
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].key, TileKey { row: 0, col: 1 });
    }

    #[test]
    fn fractional_tiles_are_rejected() {
        assert!(matches!(
            TileGrid::new("x", Crs::from_epsg(5070), (0.0, 0.0), 100.0, 30.0),
            Err(GridError::FractionalTile { .. })
        ));
        assert!(matches!(
            TileGrid::new("x", Crs::from_epsg(5070), (0.0, 0.0), 0.0, 30.0),
            Err(GridError::NonPositive { .. })
        ));
    }

    #[test]
    fn union_dedupes_and_sorts() {
        let g = grid();
        let a = g.tiles_intersecting(&Region::new(0.0, -100.0, 200.0, 0.0)).unwrap();
        let b = g.tiles_intersecting(&Region::new(100.0, -200.0, 200.0, 0.0)).unwrap();
        let keys: Vec<TileKey> = union_tiles(b.into_iter().chain(a)).iter().map(|t| t.key).collect();
        assert_eq!(
            keys,
            vec![
                TileKey { row: 0, col: 0 },
                TileKey { row: 0, col: 1 },
                TileKey { row: 1, col: 1 },
            ]
        );
    }
}
