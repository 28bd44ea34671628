use super::compression::{Compression, Predictor};
use super::CloudTiffError;
use crate::raster::{DataType, PixelWindow, SampleFormat, Samples};
use crate::tiff::{Endian, Ifd, TagId, TiffError};
use std::fmt::Display;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockLayout {
    Tiles,
    Strips,
}

/// One image of the file, either full resolution or an overview.
#[derive(Clone, Debug)]
pub struct Level {
    pub dimensions: (u32, u32),
    pub block_width: u32,
    pub block_height: u32,
    pub layout: BlockLayout,
    pub compression: Compression,
    pub predictor: Predictor,
    pub data_type: DataType,
    pub endian: Endian,
    pub offsets: Vec<u64>,
    pub byte_counts: Vec<u64>,
    pub is_overview: bool,
}

impl Level {
    pub fn from_ifd(ifd: &Ifd, endian: Endian) -> Result<Self, CloudTiffError> {
        let width: u32 = ifd.get_tag_value(TagId::ImageWidth)?;
        let height: u32 = ifd.get_tag_value(TagId::ImageHeight)?;
        let compression = ifd.get_tag_value::<u16>(TagId::Compression).unwrap_or(1).into();
        let predictor = ifd.get_tag_value::<u16>(TagId::Predictor).unwrap_or(1).into();
        let samples_per_pixel: u16 = ifd.get_tag_value(TagId::SamplesPerPixel).unwrap_or(1);
        if samples_per_pixel != 1 {
            return Err(CloudTiffError::NotSupported(format!(
                "{samples_per_pixel} samples per pixel"
            )));
        }
        let bits: u16 = ifd.get_tag_value(TagId::BitsPerSample).unwrap_or(1);
        let format: SampleFormat = ifd
            .get_tag_value::<u16>(TagId::SampleFormat)
            .unwrap_or(SampleFormat::Unsigned.into())
            .into();
        let data_type = DataType::from_tiff(format, bits)?;
        let subfile_type = ifd.get_tag_value::<u32>(TagId::NewSubfileType).unwrap_or(0);
        if subfile_type & 4 != 0 {
            return Err(CloudTiffError::NotSupported("transparency mask".into()));
        }
        let is_overview = subfile_type & 1 == 1;

        let (layout, block_width, block_height, offsets, byte_counts) =
            if ifd.get_tag(TagId::TileOffsets).is_ok() {
                (
                    BlockLayout::Tiles,
                    ifd.get_tag_value(TagId::TileWidth)?,
                    ifd.get_tag_value(TagId::TileLength)?,
                    ifd.get_tag_values(TagId::TileOffsets)?,
                    ifd.get_tag_values(TagId::TileByteCounts)?,
                )
            } else {
                let rows_per_strip: u32 = ifd
                    .get_tag_value(TagId::RowsPerStrip)
                    .unwrap_or(height)
                    .min(height);
                (
                    BlockLayout::Strips,
                    width,
                    rows_per_strip.max(1),
                    ifd.get_tag_values(TagId::StripOffsets)?,
                    ifd.get_tag_values(TagId::StripByteCounts)?,
                )
            };

        let level = Self {
            dimensions: (width, height),
            block_width,
            block_height,
            layout,
            compression,
            predictor,
            data_type,
            endian,
            offsets,
            byte_counts,
            is_overview,
        };

        let bad_tag = match layout {
            BlockLayout::Tiles => TagId::TileOffsets,
            BlockLayout::Strips => TagId::StripOffsets,
        };
        if block_width == 0
            || block_height == 0
            || level.offsets.len() != level.byte_counts.len()
            || level.offsets.len() < level.col_count() * level.row_count()
        {
            return Err(CloudTiffError::BadTiff(TiffError::BadTag(bad_tag)));
        }
        Ok(level)
    }

    pub fn megapixels(&self) -> f64 {
        (self.dimensions.0 as f64 * self.dimensions.1 as f64) / 1e6
    }

    pub fn width(&self) -> u32 {
        self.dimensions.0
    }

    pub fn height(&self) -> u32 {
        self.dimensions.1
    }

    pub fn col_count(&self) -> usize {
        self.width().div_ceil(self.block_width) as usize
    }

    pub fn row_count(&self) -> usize {
        self.height().div_ceil(self.block_height) as usize
    }

    /// (col, row) of every block overlapping `window`.
    pub fn blocks_in_window(&self, window: &PixelWindow) -> Vec<(u32, u32)> {
        if window.is_empty() {
            return vec![];
        }
        let col_min = window.col_off / self.block_width;
        let row_min = window.row_off / self.block_height;
        let col_max = (window.col_end().min(self.width())).div_ceil(self.block_width);
        let row_max = (window.row_end().min(self.height())).div_ceil(self.block_height);
        let mut blocks = vec![];
        for row in row_min..row_max {
            for col in col_min..col_max {
                blocks.push((col, row));
            }
        }
        blocks
    }

    pub fn block_index(&self, col: u32, row: u32) -> usize {
        row as usize * self.col_count() + col as usize
    }

    pub fn block_byte_range(&self, index: usize) -> Result<(u64, u64), CloudTiffError> {
        let max_valid_index = self.offsets.len().min(self.byte_counts.len());
        if index >= max_valid_index {
            return Err(CloudTiffError::BlockIndexOutOfRange((index, max_valid_index)));
        }
        let offset = self.offsets[index];
        Ok((offset, offset + self.byte_counts[index]))
    }

    /// Rows actually stored in the block at `row`; the last strip may be short.
    pub fn block_rows(&self, row: u32) -> u32 {
        match self.layout {
            BlockLayout::Tiles => self.block_height,
            BlockLayout::Strips => self
                .block_height
                .min(self.height() - row * self.block_height),
        }
    }

    pub fn decode_block(&self, row: u32, bytes: &[u8]) -> Result<Samples, CloudTiffError> {
        let mut buffer = self.compression.decode(bytes)?;
        let expected =
            self.block_width as usize * self.block_rows(row) as usize * self.data_type.bytes();
        if buffer.len() < expected {
            return Err(CloudTiffError::NotSupported(format!(
                "block holds {} bytes, expected {expected}",
                buffer.len()
            )));
        }
        buffer.truncate(expected);
        self.predictor.predict(
            buffer.as_mut_slice(),
            self.block_width as usize,
            self.data_type.bits() as usize,
            self.endian,
        )?;
        Ok(Samples::from_bytes(self.data_type, &buffer, self.endian)?)
    }
}

impl Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Level({}x{}, {} {:?} of {}x{}, {}, {:?} Compression, {:?} Predictor)",
            self.dimensions.0,
            self.dimensions.1,
            self.offsets.len(),
            self.layout,
            self.block_width,
            self.block_height,
            self.data_type,
            self.compression,
            self.predictor
        )
    }
}
