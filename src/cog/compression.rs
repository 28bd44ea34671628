// https://en.wikipedia.org/wiki/TIFF#TIFF_Compression_Tag
// https://exiftool.org/TagNames/EXIF.html#Compression

use crate::tiff::Endian;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use num_enum::{FromPrimitive, IntoPrimitive};
use salzweg::decoder::{DecodingError, TiffStyleDecoder};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecompressError {
    #[error("LZW stream: {0:?}")]
    LzwError(DecodingError),
    #[error("{0:?} compression is not supported")]
    CompressionNotSupported(Compression),
    #[error("{0:?} predictor is not supported for {1}-bit samples")]
    PredictorNotSupported(Predictor, usize),
    #[error(transparent)]
    IoError(#[from] io::Error),
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, IntoPrimitive, FromPrimitive)]
#[repr(u16)]
pub enum Compression {
    Uncompressed = 1,
    CCITT1D = 2,
    T4Group3Fax = 3,
    T6Group4Fax = 4,
    Lzw = 5,
    JpegOld = 6,
    Jpeg = 7,
    DeflateAdobe = 8,
    PackBits = 32773,
    Deflate = 32946,
    ESRILerc = 34887,
    LZMA2 = 34925,
    Zstd = 34926,
    WebP = 34927,

    #[num_enum(default)]
    Unknown = 0x0000,
}

/// Compression choices for written files.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputCompression {
    #[default]
    Deflate,
    None,
}

impl From<OutputCompression> for Compression {
    fn from(c: OutputCompression) -> Self {
        match c {
            OutputCompression::Deflate => Compression::DeflateAdobe,
            OutputCompression::None => Compression::Uncompressed,
        }
    }
}

impl Compression {
    pub fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, DecompressError> {
        match self {
            Self::Uncompressed => Ok(bytes.to_vec()),
            Self::Lzw => TiffStyleDecoder::decode_to_vec(bytes).map_err(DecompressError::LzwError),
            Self::DeflateAdobe | Self::Deflate => {
                let mut buf = vec![];
                ZlibDecoder::new(bytes).read_to_end(&mut buf)?;
                Ok(buf)
            }
            other => Err(DecompressError::CompressionNotSupported(*other)),
        }
    }

    pub fn encode(&self, bytes: &[u8]) -> Result<Vec<u8>, DecompressError> {
        match self {
            Self::Uncompressed => Ok(bytes.to_vec()),
            Self::DeflateAdobe | Self::Deflate => {
                let mut encoder = ZlibEncoder::new(vec![], flate2::Compression::default());
                encoder.write_all(bytes)?;
                Ok(encoder.finish()?)
            }
            other => Err(DecompressError::CompressionNotSupported(*other)),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, IntoPrimitive, FromPrimitive)]
#[repr(u16)]
pub enum Predictor {
    No = 1,
    Horizontal = 2,
    FloatingPoint = 3,

    #[num_enum(default)]
    Unknown = 0x0000,
}

impl Predictor {
    /// Undo prediction in place on a decompressed single band block.
    pub fn predict(
        &self,
        buffer: &mut [u8],
        width: usize,
        bit_depth: usize,
        endian: Endian,
    ) -> Result<(), DecompressError> {
        let row_bytes = width * bit_depth / 8;
        if row_bytes == 0 {
            return Ok(());
        }
        match (self, bit_depth) {
            (Self::No, _) => {}
            (Self::Horizontal, 8) => {
                for row in buffer.chunks_mut(row_bytes) {
                    for i in 1..row.len() {
                        row[i] = row[i].wrapping_add(row[i - 1]);
                    }
                }
            }
            (Self::Horizontal, 16) => {
                for row in buffer.chunks_mut(row_bytes) {
                    accumulate::<2, u16>(row, endian, u16::wrapping_add);
                }
            }
            (Self::Horizontal, 32) => {
                for row in buffer.chunks_mut(row_bytes) {
                    accumulate::<4, u32>(row, endian, u32::wrapping_add);
                }
            }
            (Self::Horizontal, 64) => {
                for row in buffer.chunks_mut(row_bytes) {
                    accumulate::<8, u64>(row, endian, u64::wrapping_add);
                }
            }
            (Self::FloatingPoint, 32 | 64) => {
                let bytes_per_sample = bit_depth / 8;
                for row in buffer.chunks_mut(row_bytes) {
                    unshuffle_floats(row, bytes_per_sample, endian);
                }
            }
            (other, bits) => return Err(DecompressError::PredictorNotSupported(*other, bits)),
        }
        Ok(())
    }
}

fn accumulate<const N: usize, T>(row: &mut [u8], endian: Endian, add: fn(T, T) -> T)
where
    T: eio::FromBytes<N> + eio::ToBytes<N> + Copy,
{
    let mut previous: Option<T> = None;
    for chunk in row.chunks_exact_mut(N) {
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(chunk);
        let Ok(value) = endian.decode::<N, T>(bytes) else {
            return;
        };
        let value = match previous {
            Some(p) => add(p, value),
            None => value,
        };
        chunk.copy_from_slice(&endian.encode::<N, T>(value));
        previous = Some(value);
    }
}

/// Floating point predictor: byte-wise differencing over a row whose sample
/// bytes were split into planes, most significant plane first.
fn unshuffle_floats(row: &mut [u8], bytes_per_sample: usize, endian: Endian) {
    for i in 1..row.len() {
        row[i] = row[i].wrapping_add(row[i - 1]);
    }
    let count = row.len() / bytes_per_sample;
    let planes = row.to_vec();
    for sample in 0..count {
        for byte in 0..bytes_per_sample {
            let plane_value = planes[byte * count + sample];
            let position = match endian {
                Endian::Big => byte,
                Endian::Little => bytes_per_sample - 1 - byte,
            };
            row[sample * bytes_per_sample + position] = plane_value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deflate_round_trip() {
        let data: Vec<u8> = (0..1000u32).map(|v| (v % 7) as u8).collect();
        let packed = Compression::DeflateAdobe.encode(&data).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(Compression::DeflateAdobe.decode(&packed).unwrap(), data);
        assert!(matches!(
            Compression::Jpeg.decode(&packed),
            Err(DecompressError::CompressionNotSupported(Compression::Jpeg))
        ));
    }

    #[test]
    fn horizontal_predictor_16_bit() {
        let endian = Endian::Little;
        // differences of [100, 101, 99] per row, two rows
        let mut buffer = endian.encode_all::<2, u16>(&[100, 1, 0xFFFE, 5, 1, 1]);
        Predictor::Horizontal
            .predict(&mut buffer, 3, 16, endian)
            .unwrap();
        assert_eq!(
            endian.decode_all::<2, u16>(&buffer).unwrap(),
            vec![100, 101, 99, 5, 6, 7]
        );
    }

    #[test]
    fn floating_point_predictor() {
        let values = [1.5f32, -2.25];
        for endian in [Endian::Big, Endian::Little] {
            // planes: most significant bytes of every sample first
            let be: Vec<[u8; 4]> = values.iter().map(|v| v.to_be_bytes()).collect();
            let mut planes = vec![];
            for byte in 0..4 {
                for sample in be.iter() {
                    planes.push(sample[byte]);
                }
            }
            let mut diffed = planes.clone();
            for i in (1..diffed.len()).rev() {
                diffed[i] = diffed[i].wrapping_sub(diffed[i - 1]);
            }
            Predictor::FloatingPoint
                .predict(&mut diffed, 2, 32, endian)
                .unwrap();
            assert_eq!(
                endian.decode_all::<4, f32>(&diffed).unwrap(),
                values.to_vec()
            );
        }
    }
}
