use crate::cog::{escape_xml, Compression, OutputCompression, Predictor};
use crate::geotags::GeoTags;
use crate::raster::{Raster, ResizeFilter, SampleFormat, Samples};
use crate::tiff::{Endian, Ifd, TagData, TagId, Tiff, Variant};
use rayon::prelude::*;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

mod error;

pub use error::{EncodeError, EncodeResult};

pub const DEFAULT_TILE_SIZE: u32 = 512;
/// Largest accepted tile edge.
pub const MAX_TILE_SIZE: u32 = 4096;

const SOFTWARE: &str = concat!("gnatsgo ", env!("CARGO_PKG_VERSION"));

/// Cloud Optimized GeoTIFF writer.
///
/// All IFDs come first, full resolution then overviews, followed by tile
/// data from the smallest overview up to full resolution.
#[derive(Debug)]
pub struct Encoder {
    raster: Raster,
    endian: Endian,
    force_big_tiff: bool,
    compression: Compression,
    tile_size: u32,
    filter: ResizeFilter,
    overviews: Option<usize>,
    description: Option<String>,
}

struct EncodedLevel {
    raster: Raster,
    tiles: Vec<Vec<u8>>,
}

impl Encoder {
    pub fn from_raster(raster: Raster) -> Self {
        Self {
            raster,
            endian: Endian::Little,
            force_big_tiff: false,
            compression: Compression::DeflateAdobe,
            tile_size: DEFAULT_TILE_SIZE,
            filter: ResizeFilter::Nearest,
            overviews: None,
            description: None,
        }
    }

    pub fn with_tile_size(mut self, pixels: u32) -> Self {
        self.tile_size = pixels;
        self
    }

    pub fn with_compression(mut self, compression: OutputCompression) -> Self {
        self.compression = compression.into();
        self
    }

    pub fn with_filter(mut self, filter: ResizeFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Fixed overview count instead of halving until one tile remains.
    pub fn with_overviews(mut self, count: usize) -> Self {
        self.overviews = Some(count);
        self
    }

    pub fn with_big_endian(mut self, big: bool) -> Self {
        self.endian = if big { Endian::Big } else { Endian::Little };
        self
    }

    /// Force BigTIFF. Classic files switch on their own when they outgrow 32-bit offsets.
    pub fn with_big_tiff(mut self, big: bool) -> Self {
        self.force_big_tiff = big;
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    fn build_levels(&self) -> Vec<Raster> {
        let mut levels = vec![self.raster.clone()];
        loop {
            let Some(last) = levels.last() else { break };
            let more = match self.overviews {
                Some(count) => levels.len() <= count && (last.width() > 1 || last.height() > 1),
                None => last.width() > self.tile_size || last.height() > self.tile_size,
            };
            if !more {
                break;
            }
            let next = last.overview(self.filter);
            levels.push(next);
        }
        levels
    }

    fn encode_tiles(&self, raster: &Raster) -> EncodeResult<Vec<Vec<u8>>> {
        let size = self.tile_size;
        let edge = size as usize;
        let cols = raster.width().div_ceil(size);
        let rows = raster.height().div_ceil(size);
        (0..rows * cols)
            .into_par_iter()
            .map(|index| -> EncodeResult<Vec<u8>> {
                let (col, row) = (index % cols, index / cols);
                let mut samples = Samples::filled(
                    raster.data_type(),
                    edge * edge,
                    raster.nodata,
                );
                for j in 0..size {
                    for i in 0..size {
                        if let Some(v) = raster.get(col * size + i, row * size + j) {
                            samples.set(j as usize * edge + i as usize, v);
                        }
                    }
                }
                Ok(self.compression.encode(&samples.to_bytes(self.endian))?)
            })
            .collect()
    }

    fn level_ifd(&self, level: &EncodedLevel, is_overview: bool, variant: Variant) -> Ifd {
        let endian = self.endian;
        let data_type = level.raster.data_type();
        let n = level.tiles.len();
        let mut ifd = Ifd::default();
        ifd.set_tag(TagId::NewSubfileType, TagData::from_long(is_overview as u32), endian);
        ifd.set_tag(TagId::ImageWidth, TagData::from_long(level.raster.width()), endian);
        ifd.set_tag(TagId::ImageHeight, TagData::from_long(level.raster.height()), endian);
        ifd.set_tag(TagId::BitsPerSample, TagData::from_short(data_type.bits()), endian);
        ifd.set_tag(TagId::Compression, TagData::from_short(self.compression.into()), endian);
        // BlackIsZero
        ifd.set_tag(TagId::PhotometricInterpretation, TagData::from_short(1), endian);
        ifd.set_tag(TagId::SamplesPerPixel, TagData::from_short(1), endian);
        ifd.set_tag(TagId::PlanarConfiguration, TagData::from_short(1), endian);
        ifd.set_tag(TagId::Predictor, TagData::from_short(Predictor::No.into()), endian);
        ifd.set_tag(TagId::TileWidth, TagData::from_long(self.tile_size), endian);
        ifd.set_tag(TagId::TileLength, TagData::from_long(self.tile_size), endian);
        let format: SampleFormat = data_type.sample_format();
        ifd.set_tag(TagId::SampleFormat, TagData::from_short(format.into()), endian);
        ifd.set_tag(TagId::GDALNoData, TagData::from_string(&nodata_string(level.raster.nodata)), endian);
        let (offsets, byte_counts) = match variant {
            Variant::Normal => (TagData::Long(vec![0; n]), TagData::Long(vec![0; n])),
            Variant::Big => (TagData::Long8(vec![0; n]), TagData::Long8(vec![0; n])),
        };
        ifd.set_tag(TagId::TileOffsets, offsets, endian);
        ifd.set_tag(TagId::TileByteCounts, byte_counts, endian);
        ifd
    }

    fn build_tiff(&self, levels: &[EncodedLevel], variant: Variant) -> EncodeResult<Tiff> {
        let endian = self.endian;
        let mut tiff = Tiff::new(endian, variant);
        for (i, level) in levels.iter().enumerate() {
            tiff.ifds.push(self.level_ifd(level, i > 0, variant));
        }

        let grid = &self.raster.grid;
        let geo = GeoTags::from_epsg(
            grid.crs.epsg,
            grid.crs.is_geographic()?,
            (grid.transform.origin_x, grid.transform.origin_y),
            (grid.transform.pixel_width, grid.transform.pixel_height),
        );
        let ifd0 = &mut tiff.ifds[0];
        geo.add_to_ifd(ifd0, endian);
        ifd0.set_tag(TagId::Software, TagData::from_string(SOFTWARE), endian);
        if let Some(description) = &self.description {
            let xml = format!(
                "<GDALMetadata>\n  <Item name=\"DESCRIPTION\" sample=\"0\" role=\"description\">{}</Item>\n</GDALMetadata>",
                escape_xml(description)
            );
            ifd0.set_tag(TagId::GDALMetadata, TagData::from_string(&xml), endian);
        }

        // Tile data, smallest overview first
        let mut cursor = tiff.directories_size() as u64;
        for (i, level) in levels.iter().enumerate().rev() {
            let mut offsets = Vec::with_capacity(level.tiles.len());
            let mut counts = Vec::with_capacity(level.tiles.len());
            for tile in level.tiles.iter() {
                offsets.push(cursor);
                counts.push(tile.len() as u64);
                cursor += tile.len() as u64;
            }
            let (offsets, counts) = match variant {
                Variant::Normal => {
                    if cursor > u32::MAX as u64 {
                        return Err(EncodeError::NotSupported(
                            "classic TIFF offsets overflow".into(),
                        ));
                    }
                    (
                        TagData::Long(offsets.iter().map(|v| *v as u32).collect()),
                        TagData::Long(counts.iter().map(|v| *v as u32).collect()),
                    )
                }
                Variant::Big => (TagData::Long8(offsets), TagData::Long8(counts)),
            };
            tiff.ifds[i].set_tag(TagId::TileOffsets, offsets, endian);
            tiff.ifds[i].set_tag(TagId::TileByteCounts, counts, endian);
        }
        Ok(tiff)
    }

    pub fn encode<W: Write>(&self, writer: &mut W) -> EncodeResult<()> {
        if self.tile_size == 0 || self.tile_size % 16 != 0 || self.tile_size > MAX_TILE_SIZE {
            return Err(EncodeError::NotSupported(format!(
                "tile size {} is not a multiple of 16 in 16..={MAX_TILE_SIZE}",
                self.tile_size
            )));
        }
        if self.raster.width() == 0 || self.raster.height() == 0 {
            return Err(EncodeError::NotSupported("empty raster".into()));
        }

        let levels = self
            .build_levels()
            .into_iter()
            .map(|raster| -> EncodeResult<EncodedLevel> {
                let tiles = self.encode_tiles(&raster)?;
                Ok(EncodedLevel { raster, tiles })
            })
            .collect::<EncodeResult<Vec<_>>>()?;

        let data_size: u64 = levels
            .iter()
            .flat_map(|level| level.tiles.iter())
            .map(|tile| tile.len() as u64)
            .sum();
        let variant = if self.force_big_tiff {
            Variant::Big
        } else {
            let classic = self.build_tiff(&levels, Variant::Normal);
            match classic {
                Ok(tiff) if tiff.directories_size() as u64 + data_size <= u32::MAX as u64 => {
                    Variant::Normal
                }
                _ => Variant::Big,
            }
        };
        let tiff = self.build_tiff(&levels, variant)?;
        debug!(
            "encoding {} levels, {:?} TIFF, {} data bytes",
            levels.len(),
            variant,
            data_size
        );

        writer.write_all(&tiff.encode_directories())?;
        for level in levels.iter().rev() {
            for tile in level.tiles.iter() {
                writer.write_all(tile)?;
            }
        }
        Ok(())
    }

    /// Encode to `path` through a temporary file in the same directory.
    ///
    /// Nothing appears at `path` unless the whole file was written.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> EncodeResult<()> {
        let path = path.as_ref();
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            self.encode(&mut writer)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| EncodeError::WriteError(e.error))?;
        Ok(())
    }
}

fn nodata_string(nodata: f64) -> String {
    if nodata.is_nan() {
        "nan".to_string()
    } else {
        format!("{nodata}")
    }
}
