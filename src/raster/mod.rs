use crate::tiff::Endian;
use num_enum::{FromPrimitive, IntoPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use thiserror::Error;

mod grid;
pub mod mosaic;
mod ops;
pub mod resample;

pub use grid::{GeoTransform, PixelGrid, PixelWindow};
pub use ops::ResizeFilter;

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("buffer holds {actual} samples, grid needs {expected}")]
    BufferSize { expected: usize, actual: usize },
    #[error("unsupported sample layout: {0}")]
    NotSupported(String),
    #[error("window {0:?} is outside the raster")]
    WindowOutOfBounds(PixelWindow),
    #[error("nodata {nodata} cannot be stored as {data_type}")]
    NodataOutOfRange { nodata: f64, data_type: DataType },
}

#[derive(Debug, PartialEq, Clone, Copy, IntoPrimitive, FromPrimitive)]
#[repr(u16)]
pub enum SampleFormat {
    Unsigned = 1,
    Signed = 2,
    Float = 3,
    Undefined = 4,

    #[num_enum(default)]
    Unknown = 0xFFFF,
}

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    U8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl DataType {
    pub fn from_tiff(format: SampleFormat, bits: u16) -> Result<Self, RasterError> {
        match (format, bits) {
            (SampleFormat::Unsigned, 8) => Ok(Self::U8),
            (SampleFormat::Unsigned, 16) => Ok(Self::U16),
            (SampleFormat::Signed, 16) => Ok(Self::I16),
            (SampleFormat::Unsigned, 32) => Ok(Self::U32),
            (SampleFormat::Signed, 32) => Ok(Self::I32),
            (SampleFormat::Float, 32) => Ok(Self::F32),
            (SampleFormat::Float, 64) => Ok(Self::F64),
            (format, bits) => Err(RasterError::NotSupported(format!(
                "{bits}-bit {format:?} samples"
            ))),
        }
    }

    pub fn bits(&self) -> u16 {
        match self {
            Self::U8 => 8,
            Self::U16 | Self::I16 => 16,
            Self::U32 | Self::I32 | Self::F32 => 32,
            Self::F64 => 64,
        }
    }

    pub fn bytes(&self) -> usize {
        self.bits() as usize / 8
    }

    pub fn sample_format(&self) -> SampleFormat {
        match self {
            Self::U8 | Self::U16 | Self::U32 => SampleFormat::Unsigned,
            Self::I16 | Self::I32 => SampleFormat::Signed,
            Self::F32 | Self::F64 => SampleFormat::Float,
        }
    }

    pub fn is_integer(&self) -> bool {
        !matches!(self, Self::F32 | Self::F64)
    }

    /// Sentinel used when a source declares no nodata value.
    pub fn default_nodata(&self) -> f64 {
        match self {
            Self::U8 => u8::MAX as f64,
            Self::U16 => u16::MAX as f64,
            Self::I16 => i16::MIN as f64,
            Self::U32 => u32::MAX as f64,
            Self::I32 => i32::MIN as f64,
            Self::F32 | Self::F64 => f64::NAN,
        }
    }

    /// Whether `value` is stored exactly by this type.
    pub fn can_represent(&self, value: f64) -> bool {
        let (min, max) = match self {
            Self::U8 => (u8::MIN as f64, u8::MAX as f64),
            Self::U16 => (u16::MIN as f64, u16::MAX as f64),
            Self::I16 => (i16::MIN as f64, i16::MAX as f64),
            Self::U32 => (u32::MIN as f64, u32::MAX as f64),
            Self::I32 => (i32::MIN as f64, i32::MAX as f64),
            Self::F32 => return value.is_nan() || (value as f32) as f64 == value,
            Self::F64 => return true,
        };
        value.fract() == 0.0 && value >= min && value <= max
    }

    /// Rejects nodata sentinels this type would clamp or truncate.
    pub fn check_nodata(&self, nodata: f64) -> Result<(), RasterError> {
        if self.can_represent(nodata) {
            Ok(())
        } else {
            Err(RasterError::NodataOutOfRange {
                nodata,
                data_type: *self,
            })
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::U8 => "uint8",
            Self::U16 => "uint16",
            Self::I16 => "int16",
            Self::U32 => "uint32",
            Self::I32 => "int32",
            Self::F32 => "float32",
            Self::F64 => "float64",
        };
        write!(f, "{name}")
    }
}

/// Typed sample storage, row-major.
#[derive(Clone, Debug, PartialEq)]
pub enum Samples {
    U8(Vec<u8>),
    U16(Vec<u16>),
    I16(Vec<i16>),
    U32(Vec<u32>),
    I32(Vec<i32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

macro_rules! each_variant {
    ($samples:expr, $v:ident => $body:expr) => {
        match $samples {
            Samples::U8($v) => $body,
            Samples::U16($v) => $body,
            Samples::I16($v) => $body,
            Samples::U32($v) => $body,
            Samples::I32($v) => $body,
            Samples::F32($v) => $body,
            Samples::F64($v) => $body,
        }
    };
}

impl Samples {
    pub fn filled(data_type: DataType, len: usize, value: f64) -> Self {
        match data_type {
            DataType::U8 => Self::U8(vec![value as u8; len]),
            DataType::U16 => Self::U16(vec![value as u16; len]),
            DataType::I16 => Self::I16(vec![value as i16; len]),
            DataType::U32 => Self::U32(vec![value as u32; len]),
            DataType::I32 => Self::I32(vec![value as i32; len]),
            DataType::F32 => Self::F32(vec![value as f32; len]),
            DataType::F64 => Self::F64(vec![value; len]),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Self::U8(_) => DataType::U8,
            Self::U16(_) => DataType::U16,
            Self::I16(_) => DataType::I16,
            Self::U32(_) => DataType::U32,
            Self::I32(_) => DataType::I32,
            Self::F32(_) => DataType::F32,
            Self::F64(_) => DataType::F64,
        }
    }

    pub fn len(&self) -> usize {
        each_variant!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> f64 {
        each_variant!(self, v => v[index] as f64)
    }

    /// Store `value`, rounding to nearest and saturating for integer types.
    pub fn set(&mut self, index: usize, value: f64) {
        match self {
            Self::U8(v) => v[index] = value.round() as u8,
            Self::U16(v) => v[index] = value.round() as u16,
            Self::I16(v) => v[index] = value.round() as i16,
            Self::U32(v) => v[index] = value.round() as u32,
            Self::I32(v) => v[index] = value.round() as i32,
            Self::F32(v) => v[index] = value as f32,
            Self::F64(v) => v[index] = value,
        }
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = f64> + '_> {
        each_variant!(self, v => Box::new(v.iter().map(|x| *x as f64)) as Box<dyn Iterator<Item = f64> + '_>)
    }

    pub fn from_bytes(data_type: DataType, bytes: &[u8], endian: Endian) -> Result<Self, RasterError> {
        if bytes.len() % data_type.bytes() != 0 {
            return Err(RasterError::NotSupported(format!(
                "{} bytes is not a whole number of {data_type} samples",
                bytes.len()
            )));
        }
        let samples = match data_type {
            DataType::U8 => Some(Self::U8(bytes.to_vec())),
            DataType::U16 => endian.decode_all::<2, u16>(bytes).map(Self::U16),
            DataType::I16 => endian.decode_all::<2, i16>(bytes).map(Self::I16),
            DataType::U32 => endian.decode_all::<4, u32>(bytes).map(Self::U32),
            DataType::I32 => endian.decode_all::<4, i32>(bytes).map(Self::I32),
            DataType::F32 => endian.decode_all::<4, f32>(bytes).map(Self::F32),
            DataType::F64 => endian.decode_all::<8, f64>(bytes).map(Self::F64),
        };
        samples.ok_or(RasterError::NotSupported(format!("undecodable {data_type} buffer")))
    }

    pub fn to_bytes(&self, endian: Endian) -> Vec<u8> {
        match self {
            Self::U8(v) => v.clone(),
            Self::U16(v) => endian.encode_all::<2, u16>(v),
            Self::I16(v) => endian.encode_all::<2, i16>(v),
            Self::U32(v) => endian.encode_all::<4, u32>(v),
            Self::I32(v) => endian.encode_all::<4, i32>(v),
            Self::F32(v) => endian.encode_all::<4, f32>(v),
            Self::F64(v) => endian.encode_all::<8, f64>(v),
        }
    }
}

/// NaN cells are always nodata; a NaN sentinel matches only NaN cells.
pub fn is_nodata(value: f64, nodata: f64) -> bool {
    value.is_nan() || value == nodata
}

/// Single band georeferenced raster.
#[derive(Clone, Debug, PartialEq)]
pub struct Raster {
    pub grid: PixelGrid,
    pub nodata: f64,
    pub samples: Samples,
}

impl Raster {
    pub fn new(grid: PixelGrid, nodata: f64, samples: Samples) -> Result<Self, RasterError> {
        let expected = grid.pixel_count();
        if samples.len() != expected {
            return Err(RasterError::BufferSize {
                expected,
                actual: samples.len(),
            });
        }
        samples.data_type().check_nodata(nodata)?;
        Ok(Self {
            grid,
            nodata,
            samples,
        })
    }

    /// All-nodata raster.
    pub fn filled(grid: PixelGrid, data_type: DataType, nodata: f64) -> Result<Self, RasterError> {
        data_type.check_nodata(nodata)?;
        let samples = Samples::filled(data_type, grid.pixel_count(), nodata);
        Ok(Self {
            grid,
            nodata,
            samples,
        })
    }

    pub fn width(&self) -> u32 {
        self.grid.width
    }

    pub fn height(&self) -> u32 {
        self.grid.height
    }

    pub fn data_type(&self) -> DataType {
        self.samples.data_type()
    }

    fn index(&self, col: u32, row: u32) -> usize {
        row as usize * self.grid.width as usize + col as usize
    }

    pub fn get(&self, col: u32, row: u32) -> Option<f64> {
        if col >= self.grid.width || row >= self.grid.height {
            return None;
        }
        Some(self.samples.get(self.index(col, row)))
    }

    /// Value at (col, row) or None when out of bounds or nodata.
    pub fn valid(&self, col: u32, row: u32) -> Option<f64> {
        self.get(col, row).filter(|v| !is_nodata(*v, self.nodata))
    }

    pub fn set(&mut self, col: u32, row: u32, value: f64) {
        let index = self.index(col, row);
        self.samples.set(index, value);
    }

    pub fn is_nodata(&self, value: f64) -> bool {
        is_nodata(value, self.nodata)
    }

    pub fn valid_count(&self) -> usize {
        self.samples.iter().filter(|v| !self.is_nodata(*v)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.iter().all(|v| self.is_nodata(v))
    }
}

impl Display for Raster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Raster({}x{}, {}, nodata {}, {})",
            self.grid.width,
            self.grid.height,
            self.data_type(),
            self.nodata,
            self.grid.crs
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::Crs;

    fn grid(width: u32, height: u32) -> PixelGrid {
        PixelGrid::new(
            Crs::from_epsg(5070),
            GeoTransform::new(0.0, 100.0, 10.0, 10.0),
            width,
            height,
        )
    }

    #[test]
    fn buffer_size_is_checked() {
        let err = Raster::new(grid(2, 2), 0.0, Samples::U8(vec![1, 2, 3])).unwrap_err();
        assert!(matches!(
            err,
            RasterError::BufferSize {
                expected: 4,
                actual: 3
            }
        ));
    }

    #[test]
    fn nan_nodata_matches_nan_cells() {
        let mut raster = Raster::filled(grid(2, 1), DataType::F32, f64::NAN).unwrap();
        assert!(raster.is_empty());
        raster.set(1, 0, 2.5);
        assert_eq!(raster.valid(0, 0), None);
        assert_eq!(raster.valid(1, 0), Some(2.5));
        assert_eq!(raster.valid_count(), 1);
    }

    #[test]
    fn nodata_must_fit_the_sample_type() {
        assert!(matches!(
            Raster::filled(grid(2, 1), DataType::U8, 300.0),
            Err(RasterError::NodataOutOfRange { data_type: DataType::U8, .. })
        ));
        assert!(Raster::filled(grid(2, 1), DataType::U32, -9999.0).is_err());
        assert!(Raster::new(grid(2, 1), 40000.0, Samples::I16(vec![5, 6])).is_err());
        assert!(Raster::new(grid(2, 1), 0.5, Samples::F32(vec![5.0, 6.0])).is_ok());
        assert!(DataType::I16.check_nodata(-9999.0).is_ok());
    }

    #[test]
    fn integer_set_rounds() {
        let mut samples = Samples::filled(DataType::I16, 3, -9999.0);
        samples.set(0, 2.5);
        samples.set(1, -1.4);
        assert_eq!(samples, Samples::I16(vec![3, -1, -9999]));
    }

    #[test]
    fn bytes_follow_endianness() {
        let samples = Samples::I32(vec![1, -2]);
        let bytes = samples.to_bytes(Endian::Big);
        assert_eq!(&bytes[..4], &[0, 0, 0, 1]);
        assert_eq!(Samples::from_bytes(DataType::I32, &bytes, Endian::Big).unwrap(), samples);
        assert!(Samples::from_bytes(DataType::I32, &bytes[..5], Endian::Big).is_err());
    }

    #[test]
    fn representable_values() {
        assert!(DataType::I16.can_represent(-9999.0));
        assert!(!DataType::I16.can_represent(40000.0));
        assert!(!DataType::U8.can_represent(1.5));
        assert!(DataType::F32.can_represent(0.5));
        assert!(DataType::F32.can_represent(f64::NAN));
        assert_eq!(DataType::from_tiff(SampleFormat::Signed, 32).unwrap(), DataType::I32);
        assert!(DataType::from_tiff(SampleFormat::Float, 16).is_err());
    }
}
