use super::{ColumnType, CombinedTable, TableError};
use crate::raster::Raster;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use thiserror::Error;

/// Inverse index value of nodata cells.
pub const NODATA_INDEX: u32 = u32::MAX;

#[derive(Debug, Error)]
pub enum JoinError {
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("key {key} has conflicting {property:?} values {values:?}")]
    ConflictingValues {
        key: i64,
        property: String,
        values: Vec<f64>,
    },
    #[error("key {0} is not an integer")]
    NonIntegerKey(f64),
    #[error("{0} distinct keys overflow the key index")]
    TooManyKeys(usize),
}

/// How several table rows sharing one key collapse into one value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum AggregationPolicy {
    #[default]
    First,
    Strict,
    Mean,
    WeightedMean {
        weight_column: String,
    },
    Dominant {
        weight_column: String,
    },
}

impl AggregationPolicy {
    pub fn weight_column(&self) -> Option<&str> {
        match self {
            Self::WeightedMean { weight_column } | Self::Dominant { weight_column } => {
                Some(weight_column)
            }
            _ => None,
        }
    }

    fn aggregate(
        &self,
        key: i64,
        property: &str,
        values: &[Option<f64>],
        weights: Option<&[Option<f64>]>,
        rows: &[usize],
    ) -> Result<Option<f64>, JoinError> {
        let present = || rows.iter().filter_map(|r| values[*r]);
        let weighted = || {
            rows.iter().filter_map(move |r| {
                let w = weights.and_then(|w| w[*r])?;
                Some((values[*r], w))
            })
        };
        let value = match self {
            Self::First => present().next(),
            Self::Strict => {
                let distinct = present().fold(Vec::<f64>::new(), |mut acc, v| {
                    if !acc.contains(&v) {
                        acc.push(v);
                    }
                    acc
                });
                if distinct.len() > 1 {
                    return Err(JoinError::ConflictingValues {
                        key,
                        property: property.to_string(),
                        values: distinct,
                    });
                }
                distinct.first().copied()
            }
            Self::Mean => {
                let (sum, n) = present().fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
                (n > 0).then(|| sum / n as f64)
            }
            Self::WeightedMean { .. } => {
                let (sum, total) = weighted()
                    .filter_map(|(v, w)| Some((v?, w)))
                    .fold((0.0, 0.0), |(s, t), (v, w)| (s + v * w, t + w));
                (total > 0.0).then(|| sum / total)
            }
            Self::Dominant { .. } => weighted()
                .fold(None, |best: Option<(Option<f64>, f64)>, (v, w)| match best {
                    Some((_, bw)) if bw >= w => best,
                    _ => Some((v, w)),
                })
                .and_then(|(v, _)| v),
        };
        Ok(value)
    }
}

impl Display for AggregationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::First => write!(f, "first"),
            Self::Strict => write!(f, "strict"),
            Self::Mean => write!(f, "mean"),
            Self::WeightedMean { weight_column } => write!(f, "weighted_mean({weight_column})"),
            Self::Dominant { weight_column } => write!(f, "dominant({weight_column})"),
        }
    }
}

/// Distinct keys of a key raster plus, for every cell, the position of its key.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyIndex {
    keys: Vec<i64>,
    inverse: Vec<u32>,
}

impl KeyIndex {
    pub fn from_raster(raster: &Raster) -> Result<Self, JoinError> {
        let mut keys = Vec::new();
        for v in raster.samples.iter().filter(|v| !raster.is_nodata(*v)) {
            if v.fract() != 0.0 {
                return Err(JoinError::NonIntegerKey(v));
            }
            keys.push(v as i64);
        }
        keys.sort_unstable();
        keys.dedup();
        if keys.len() >= NODATA_INDEX as usize {
            return Err(JoinError::TooManyKeys(keys.len()));
        }

        let inverse = raster
            .samples
            .iter()
            .map(|v| {
                if raster.is_nodata(v) {
                    NODATA_INDEX
                } else {
                    keys.binary_search(&(v as i64))
                        .map_or(NODATA_INDEX, |i| i as u32)
                }
            })
            .collect();
        Ok(Self { keys, inverse })
    }

    /// Sorted distinct keys.
    pub fn keys(&self) -> &[i64] {
        &self.keys
    }

    /// Per-cell positions into `keys`, `NODATA_INDEX` for nodata cells.
    pub fn inverse(&self) -> &[u32] {
        &self.inverse
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Keys of this index with no row in `table`.
    pub fn missing_keys(&self, table: &CombinedTable) -> Vec<i64> {
        self.keys
            .iter()
            .copied()
            .filter(|k| !table.contains_key(*k))
            .collect()
    }
}

/// Key to value mapping for one property of one tile.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValueMap(BTreeMap<i64, Option<f64>>);

impl ValueMap {
    pub fn insert(&mut self, key: i64, value: Option<f64>) {
        self.0.insert(key, value);
    }

    /// `None` when the key has no entry, `Some(None)` when it maps to no value.
    pub fn get(&self, key: i64) -> Option<Option<f64>> {
        self.0.get(&key).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(i64, Option<f64>)> for ValueMap {
    fn from_iter<I: IntoIterator<Item = (i64, Option<f64>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Result of joining one property against one tile's keys.
#[derive(Clone, Debug)]
pub struct TileMapping {
    pub property: String,
    pub column_type: ColumnType,
    pub description: Option<String>,
    pub values: ValueMap,
    pub missing_keys: Vec<i64>,
}

/// Map every key of `index` to its `property` value under `policy`.
///
/// Keys without table rows map to no value and are listed in `missing_keys`.
pub fn join_property(
    table: &CombinedTable,
    property: &str,
    index: &KeyIndex,
    policy: &AggregationPolicy,
) -> Result<TileMapping, JoinError> {
    let column = table.column(property)?;
    let weights = match policy.weight_column() {
        Some(name) => Some(table.column(name)?.values.as_slice()),
        None => None,
    };

    let mut values = ValueMap::default();
    let mut missing_keys = vec![];
    for key in index.keys().iter().copied() {
        let rows = table.rows(key);
        if rows.is_empty() {
            missing_keys.push(key);
            values.insert(key, None);
            continue;
        }
        let value = policy.aggregate(key, property, &column.values, weights, rows)?;
        values.insert(key, value);
    }

    Ok(TileMapping {
        property: property.to_string(),
        column_type: column.column_type,
        description: column.description.clone(),
        values,
        missing_keys,
    })
}

/// `join_property` for each of `properties`.
pub fn join(
    table: &CombinedTable,
    properties: &[String],
    index: &KeyIndex,
    policy: &AggregationPolicy,
) -> Result<Vec<TileMapping>, JoinError> {
    properties
        .iter()
        .map(|p| join_property(table, p, index, policy))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::Crs;
    use crate::raster::{GeoTransform, PixelGrid, Samples};

    const TABLE: &str = r#"{
        "key_column": "mukey",
        "columns": [
            {"name": "mukey", "type": "int32", "values": [10, 20, 20, 20, 30]},
            {"name": "depth", "type": "float64", "values": [1.0, null, 2.0, 4.0, null]},
            {"name": "pct", "type": "int16", "values": [100, 10, 30, 60, null]}
        ]
    }"#;

    fn table() -> CombinedTable {
        CombinedTable::from_reader(TABLE.as_bytes()).unwrap()
    }

    fn key_raster(keys: Vec<i32>) -> Raster {
        let grid = PixelGrid::new(
            Crs::from_epsg(5070),
            GeoTransform::new(0.0, 0.0, 1.0, 1.0),
            keys.len() as u32,
            1,
        );
        Raster::new(grid, -1.0, Samples::I32(keys)).unwrap()
    }

    fn value(policy: AggregationPolicy, key: i64) -> Option<f64> {
        let index = KeyIndex::from_raster(&key_raster(vec![key as i32])).unwrap();
        let mapping = join_property(&table(), "depth", &index, &policy).unwrap();
        mapping.values.get(key).unwrap()
    }

    #[test]
    fn key_index_is_sorted_with_inverse() {
        let index = KeyIndex::from_raster(&key_raster(vec![30, -1, 10, 30])).unwrap();
        assert_eq!(index.keys(), &[10, 30]);
        assert_eq!(index.inverse(), &[1, NODATA_INDEX, 0, 1]);
    }

    #[test]
    fn policies_collapse_repeated_keys() {
        assert_eq!(value(AggregationPolicy::First, 20), Some(2.0));
        assert_eq!(value(AggregationPolicy::Mean, 20), Some(3.0));
        let weighted = AggregationPolicy::WeightedMean {
            weight_column: "pct".into(),
        };
        // (2*30 + 4*60) / 90
        assert_eq!(value(weighted, 20), Some(300.0 / 90.0));
        let dominant = AggregationPolicy::Dominant {
            weight_column: "pct".into(),
        };
        assert_eq!(value(dominant, 20), Some(4.0));
        assert_eq!(value(AggregationPolicy::First, 30), None);
        assert_eq!(value(AggregationPolicy::Mean, 30), None);
    }

    #[test]
    fn strict_rejects_disagreement() {
        let index = KeyIndex::from_raster(&key_raster(vec![10, 20])).unwrap();
        let result = join_property(&table(), "depth", &index, &AggregationPolicy::Strict);
        assert!(matches!(
            result,
            Err(JoinError::ConflictingValues { key: 20, .. })
        ));

        let index = KeyIndex::from_raster(&key_raster(vec![10])).unwrap();
        let mapping = join_property(&table(), "depth", &index, &AggregationPolicy::Strict).unwrap();
        assert_eq!(mapping.values.get(10), Some(Some(1.0)));
    }

    #[test]
    fn every_raster_key_gets_an_entry() {
        let index = KeyIndex::from_raster(&key_raster(vec![10, 9999, 20, -1])).unwrap();
        let mappings = join(
            &table(),
            &["depth".to_string(), "pct".to_string()],
            &index,
            &AggregationPolicy::First,
        )
        .unwrap();
        for mapping in mappings.iter() {
            assert_eq!(mapping.values.len(), index.keys().len());
            assert_eq!(mapping.missing_keys, vec![9999]);
            assert_eq!(mapping.values.get(9999), Some(None));
        }
        assert_eq!(index.missing_keys(&table()), vec![9999]);
        assert_eq!(mappings[1].column_type, ColumnType::Int16);
        assert_eq!(mappings[1].values.get(20), Some(Some(10.0)));
    }

    #[test]
    fn unknown_property_is_a_table_error() {
        let index = KeyIndex::from_raster(&key_raster(vec![10])).unwrap();
        let result = join_property(&table(), "nope", &index, &AggregationPolicy::First);
        assert!(matches!(result, Err(JoinError::Table(TableError::MissingColumn(_)))));
    }
}
