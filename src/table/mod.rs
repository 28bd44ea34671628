// Combined tabular dataset
//   Columnar JSON produced by the table normalization step: one key column and
//   any number of nullable numeric property columns.

use crate::raster::DataType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use thiserror::Error;

pub mod join;

pub use join::{join, AggregationPolicy, JoinError, KeyIndex, TileMapping, ValueMap};

#[derive(Debug, Error)]
pub enum TableError {
    #[error("cannot read table: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("malformed table: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("no column named {0:?}")]
    MissingColumn(String),
    #[error("column {0:?} appears more than once")]
    DuplicateColumn(String),
    #[error("column {name:?} has {actual} values, expected {expected}")]
    RaggedColumn {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("key column {0:?} holds a null or non-integer value at row {1}")]
    BadKey(String, usize),
    #[error("value {value} at row {row} does not fit {column:?} ({data_type})")]
    OutOfRange {
        column: String,
        row: usize,
        value: f64,
        data_type: ColumnType,
    },
}

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int16,
    Int32,
    Float32,
    Float64,
}

impl ColumnType {
    /// Sample type of rasters derived from this column.
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Int16 => DataType::I16,
            Self::Int32 => DataType::I32,
            Self::Float32 => DataType::F32,
            Self::Float64 => DataType::F64,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Int16 | Self::Int32)
    }
}

impl Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub values: Vec<Option<f64>>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct TableDocument {
    key_column: String,
    columns: Vec<Column>,
}

/// Lookup table keyed by map unit key. Rows may repeat keys.
#[derive(Clone, Debug)]
pub struct CombinedTable {
    key_column: String,
    keys: Vec<i64>,
    columns: Vec<Column>,
    rows_by_key: HashMap<i64, Vec<usize>>,
}

impl CombinedTable {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TableError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, TableError> {
        let document: TableDocument = serde_json::from_reader(reader)?;
        Self::from_columns(document.key_column, document.columns)
    }

    pub fn from_columns(key_column: String, columns: Vec<Column>) -> Result<Self, TableError> {
        let mut seen = std::collections::HashSet::new();
        for column in columns.iter() {
            if !seen.insert(column.name.as_str()) {
                return Err(TableError::DuplicateColumn(column.name.clone()));
            }
        }

        let key_position = columns
            .iter()
            .position(|c| c.name == key_column)
            .ok_or_else(|| TableError::MissingColumn(key_column.clone()))?;
        let row_count = columns[key_position].values.len();

        for column in columns.iter() {
            if column.values.len() != row_count {
                return Err(TableError::RaggedColumn {
                    name: column.name.clone(),
                    expected: row_count,
                    actual: column.values.len(),
                });
            }
            let data_type = column.column_type.data_type();
            for (row, value) in column.values.iter().enumerate() {
                if let Some(v) = value {
                    let fits = match column.column_type {
                        ColumnType::Int16 | ColumnType::Int32 => data_type.can_represent(v.round()),
                        ColumnType::Float32 => !v.is_finite() || v.abs() <= f32::MAX as f64,
                        ColumnType::Float64 => true,
                    };
                    if !fits {
                        return Err(TableError::OutOfRange {
                            column: column.name.clone(),
                            row,
                            value: *v,
                            data_type: column.column_type,
                        });
                    }
                }
            }
        }

        let mut keys = Vec::with_capacity(row_count);
        let mut rows_by_key: HashMap<i64, Vec<usize>> = HashMap::new();
        for (row, value) in columns[key_position].values.iter().enumerate() {
            let key = match value {
                Some(v) if v.fract() == 0.0 && v.is_finite() => *v as i64,
                _ => return Err(TableError::BadKey(key_column.clone(), row)),
            };
            keys.push(key);
            rows_by_key.entry(key).or_default().push(row);
        }

        Ok(Self {
            key_column,
            keys,
            columns,
            rows_by_key,
        })
    }

    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    pub fn row_count(&self) -> usize {
        self.keys.len()
    }

    pub fn column(&self, name: &str) -> Result<&Column, TableError> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| TableError::MissingColumn(name.to_string()))
    }

    /// Every column except the key column, in table order.
    pub fn property_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.name != self.key_column)
            .map(|c| c.name.clone())
            .collect()
    }

    /// Rows holding `key`, in table order.
    pub fn rows(&self, key: i64) -> &[usize] {
        self.rows_by_key.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains_key(&self, key: i64) -> bool {
        self.rows_by_key.contains_key(&key)
    }

    pub fn distinct_key_count(&self) -> usize {
        self.rows_by_key.len()
    }
}

impl Display for CombinedTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CombinedTable({} rows, {} keys, key {:?}, {} properties)",
            self.row_count(),
            self.distinct_key_count(),
            self.key_column,
            self.columns.len().saturating_sub(1)
        )
    }
}
