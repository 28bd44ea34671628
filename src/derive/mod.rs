// Derived rasters
//   Substitutes every map unit key of a tile through a property mapping,
//   producing a raster on the key raster's grid.

use crate::grid::TileId;
use crate::raster::{DataType, Raster, RasterError, Samples};
use crate::table::join::NODATA_INDEX;
use crate::table::{ColumnType, KeyIndex, TileMapping};
use thiserror::Error;

pub const DEFAULT_INT16_NODATA: f64 = -9999.0;

#[derive(Debug, Error)]
pub enum DeriveError {
    #[error("{property:?} maps key {key} to {value}, which is the nodata value")]
    NodataCollision { property: String, key: i64, value: f64 },
    #[error("key {key} has no {property:?} entry")]
    UnmappedKey { property: String, key: i64 },
    #[error("{property:?} value {value} for key {key} does not fit {data_type}")]
    OutOfRange {
        property: String,
        key: i64,
        value: f64,
        data_type: DataType,
    },
    #[error("key index covers {index} cells, raster has {raster}")]
    IndexMismatch { index: usize, raster: usize },
    #[error(transparent)]
    Nodata(#[from] RasterError),
}

/// Output nodata sentinels per column type.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NodataValues {
    pub int16: f64,
    pub int32: f64,
    pub float32: f64,
    pub float64: f64,
}

impl Default for NodataValues {
    fn default() -> Self {
        Self {
            int16: DEFAULT_INT16_NODATA,
            int32: i32::MIN as f64,
            float32: f64::NAN,
            float64: f64::NAN,
        }
    }
}

impl NodataValues {
    pub fn for_column(&self, column_type: ColumnType) -> f64 {
        match column_type {
            ColumnType::Int16 => self.int16,
            ColumnType::Int32 => self.int32,
            ColumnType::Float32 => self.float32,
            ColumnType::Float64 => self.float64,
        }
    }
}

/// Derived raster of `mapping` over the cells of `keys`.
pub fn materialize(
    keys: &Raster,
    index: &KeyIndex,
    mapping: &TileMapping,
    nodata_values: &NodataValues,
) -> Result<Raster, DeriveError> {
    if index.inverse().len() != keys.grid.pixel_count() {
        return Err(DeriveError::IndexMismatch {
            index: index.inverse().len(),
            raster: keys.grid.pixel_count(),
        });
    }
    let data_type = mapping.column_type.data_type();
    let nodata = nodata_values.for_column(mapping.column_type);
    data_type.check_nodata(nodata)?;

    // One lookup per distinct key, then a gather over the cells
    let lookup = index
        .keys()
        .iter()
        .map(|key| {
            let value = mapping.values.get(*key).ok_or_else(|| DeriveError::UnmappedKey {
                property: mapping.property.clone(),
                key: *key,
            })?;
            let Some(value) = value else {
                return Ok(nodata);
            };
            let value = if data_type.is_integer() { value.round() } else { value };
            if !data_type.can_represent(value) && data_type.is_integer() {
                return Err(DeriveError::OutOfRange {
                    property: mapping.property.clone(),
                    key: *key,
                    value,
                    data_type,
                });
            }
            let stored = if data_type == DataType::F32 {
                value as f32 as f64
            } else {
                value
            };
            if stored == nodata {
                return Err(DeriveError::NodataCollision {
                    property: mapping.property.clone(),
                    key: *key,
                    value,
                });
            }
            Ok(stored)
        })
        .collect::<Result<Vec<f64>, DeriveError>>()?;

    let mut samples = Samples::filled(data_type, index.inverse().len(), nodata);
    for (cell, position) in index.inverse().iter().enumerate() {
        if *position != NODATA_INDEX {
            samples.set(cell, lookup[*position as usize]);
        }
    }
    Ok(Raster {
        grid: keys.grid,
        nodata,
        samples,
    })
}

/// `{property}_{tile}.tif` with underscores of the property turned into dashes.
pub fn file_name(property: &str, tile_id: &TileId) -> String {
    format!("{}_{}.tif", property.replace('_', "-"), tile_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::Crs;
    use crate::raster::{GeoTransform, PixelGrid};
    use crate::table::ValueMap;

    fn keys() -> Raster {
        let grid = PixelGrid::new(
            Crs::from_epsg(5070),
            GeoTransform::new(100.0, 200.0, 10.0, 10.0),
            3,
            2,
        );
        Raster::new(grid, 0.0, Samples::U32(vec![1, 2, 0, 2, 9999, 1])).unwrap()
    }

    fn mapping(column_type: ColumnType, entries: Vec<(i64, Option<f64>)>) -> TileMapping {
        TileMapping {
            property: "aws0_5".into(),
            column_type,
            description: None,
            values: entries.into_iter().collect::<ValueMap>(),
            missing_keys: vec![],
        }
    }

    #[test]
    fn substitutes_values_on_the_same_grid() {
        let keys = keys();
        let index = KeyIndex::from_raster(&keys).unwrap();
        let mapping = mapping(
            ColumnType::Int16,
            vec![(1, Some(4.6)), (2, Some(-3.0)), (9999, None)],
        );
        let derived = materialize(&keys, &index, &mapping, &NodataValues::default()).unwrap();
        assert_eq!(derived.grid, keys.grid);
        assert_eq!(derived.data_type(), DataType::I16);
        assert_eq!(derived.nodata, -9999.0);
        assert_eq!(
            derived.samples,
            Samples::I16(vec![5, -3, -9999, -3, -9999, 5])
        );
    }

    #[test]
    fn float_outputs_use_nan_nodata() {
        let keys = keys();
        let index = KeyIndex::from_raster(&keys).unwrap();
        let mapping = mapping(
            ColumnType::Float32,
            vec![(1, Some(0.25)), (2, None), (9999, Some(1.0))],
        );
        let derived = materialize(&keys, &index, &mapping, &NodataValues::default()).unwrap();
        assert!(derived.nodata.is_nan());
        assert_eq!(derived.get(0, 0), Some(0.25));
        assert!(derived.get(1, 0).unwrap().is_nan());
        assert!(derived.get(2, 0).unwrap().is_nan());
        assert_eq!(derived.valid_count(), 3);
    }

    #[test]
    fn rejects_collisions_and_unmapped_keys() {
        let keys = keys();
        let index = KeyIndex::from_raster(&keys).unwrap();

        let colliding = mapping(
            ColumnType::Int16,
            vec![(1, Some(-9999.0)), (2, None), (9999, None)],
        );
        let result = materialize(&keys, &index, &colliding, &NodataValues::default());
        assert!(matches!(result, Err(DeriveError::NodataCollision { key: 1, .. })));

        let partial = mapping(ColumnType::Int32, vec![(1, Some(1.0)), (2, Some(2.0))]);
        let result = materialize(&keys, &index, &partial, &NodataValues::default());
        assert!(matches!(result, Err(DeriveError::UnmappedKey { key: 9999, .. })));
    }

    #[test]
    fn nodata_outside_the_output_type_is_rejected() {
        let keys = keys();
        let index = KeyIndex::from_raster(&keys).unwrap();
        let mapping = mapping(
            ColumnType::Int16,
            vec![(1, Some(5.0)), (2, None), (9999, None)],
        );
        let nodata_values = NodataValues {
            int16: 40000.0,
            ..NodataValues::default()
        };
        let result = materialize(&keys, &index, &mapping, &nodata_values);
        assert!(matches!(
            result,
            Err(DeriveError::Nodata(RasterError::NodataOutOfRange { .. }))
        ));
    }

    #[test]
    fn names_files_after_property_and_tile() {
        let id = TileId("conus_0_10_10_0".into());
        assert_eq!(file_name("aws0_5", &id), "aws0-5_conus_0_10_10_0.tif");
    }
}
