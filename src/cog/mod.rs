use crate::geotags::GeoTags;
use crate::io::ReadRange;
use crate::projection::{Crs, Region, Transformer};
use crate::raster::{DataType, GeoTransform, PixelGrid, PixelWindow, Raster};
use crate::tiff::{TagId, Tiff};
use serde::Serialize;
use std::fmt::Display;
use std::io::{BufReader, Read, Seek};
use tracing::debug;

mod compression;
mod error;
mod level;

pub use compression::{Compression, DecompressError, OutputCompression, Predictor};
pub use error::{CloudTiffError, CloudTiffResult};
pub use level::{BlockLayout, Level};

/// Georeferenced header of a GeoTIFF, enough to read any window of it.
#[derive(Clone, Debug)]
pub struct CloudTiff {
    levels: Vec<Level>,
    pub geo_tags: GeoTags,
    pub crs: Option<Crs>,
    pub transform: GeoTransform,
    pub nodata: Option<f64>,
    pub description: Option<String>,
}

/// Header summary consumed by catalog tooling.
#[derive(Clone, Debug, Serialize)]
pub struct RasterInfo {
    pub epsg: Option<u16>,
    pub width: u32,
    pub height: u32,
    pub data_type: DataType,
    pub nodata: Option<f64>,
    pub bounds: (f64, f64, f64, f64),
    pub bounds_lat_lon_deg: Option<(f64, f64, f64, f64)>,
    pub pixel_size: (f64, f64),
    pub block_size: (u32, u32),
    pub overview_count: usize,
    pub compression: String,
    pub description: Option<String>,
}

impl CloudTiff {
    pub fn open<R: Read + Seek>(source: &mut R) -> CloudTiffResult<Self> {
        let stream = &mut BufReader::new(source);

        // TIFF indexing
        let tiff = Tiff::open(stream)?;

        // Parse GeoTIFF tags
        let ifd0 = tiff.ifd0()?;
        let geo_tags = GeoTags::parse(ifd0)?;
        let (origin, pixel_size) = geo_tags.origin_and_pixel_size()?;
        let transform = GeoTransform::new(origin.0, origin.1, pixel_size.0, pixel_size.1);

        // Map IFDs into levels, skipping masks and anything unreadable
        let mut levels: Vec<Level> = tiff
            .ifds
            .iter()
            .filter_map(|ifd| Level::from_ifd(ifd, tiff.endian).ok())
            .collect();
        levels.sort_by(|a, b| b.megapixels().total_cmp(&a.megapixels()));
        let Some(full) = levels.first() else {
            // Surface why the first IFD failed when nothing is readable
            Level::from_ifd(ifd0, tiff.endian)?;
            return Err(CloudTiffError::NoLevels);
        };
        debug!("opened {} levels, full resolution {}", levels.len(), full);

        let nodata = ifd0
            .get_tag(TagId::GDALNoData)
            .ok()
            .and_then(|tag| tag.as_string())
            .and_then(|s| parse_nodata(&s));
        let description = ifd0
            .get_tag(TagId::GDALMetadata)
            .ok()
            .and_then(|tag| tag.as_string())
            .and_then(|xml| band_description(&xml));

        Ok(Self {
            crs: geo_tags.epsg().map(Crs::from_epsg),
            levels,
            geo_tags,
            transform,
            nodata,
            description,
        })
    }

    pub fn full_dimensions(&self) -> (u32, u32) {
        self.levels[0].dimensions
    }

    pub fn data_type(&self) -> DataType {
        self.levels[0].data_type
    }

    pub fn overview_count(&self) -> usize {
        self.levels.len() - 1
    }

    pub fn get_level(&self, level: usize) -> CloudTiffResult<&Level> {
        self.levels
            .get(level)
            .ok_or(CloudTiffError::LevelOutOfRange((level, self.levels.len() - 1)))
    }

    /// Full resolution grid, with `crs_override` taking precedence over GeoKeys.
    pub fn pixel_grid(&self, crs_override: Option<Crs>) -> CloudTiffResult<PixelGrid> {
        let crs = crs_override.or(self.crs).ok_or(CloudTiffError::NoCrs)?;
        let (width, height) = self.full_dimensions();
        Ok(PixelGrid::new(crs, self.transform, width, height))
    }

    /// Declared nodata, or the data type's default sentinel.
    pub fn nodata_or_default(&self) -> f64 {
        self.nodata
            .unwrap_or_else(|| self.data_type().default_nodata())
    }

    pub fn bounds(&self) -> Region<f64> {
        let (width, height) = self.full_dimensions();
        let (left, top) = self.transform.pixel_to_world(0.0, 0.0);
        let (right, bottom) = self.transform.pixel_to_world(width as f64, height as f64);
        Region::new(left, bottom, right, top)
    }

    /// (west, south, east, north) in degrees.
    pub fn bounds_lat_lon_deg(&self) -> CloudTiffResult<(f64, f64, f64, f64)> {
        let crs = self.crs.ok_or(CloudTiffError::NoCrs)?;
        let transformer = Transformer::new(crs, Crs::WGS84)?;
        Ok(transformer.transform_bounds(&self.bounds())?.as_tuple())
    }

    pub fn info(&self) -> RasterInfo {
        let full = &self.levels[0];
        RasterInfo {
            epsg: self.crs.map(|crs| crs.epsg),
            width: full.width(),
            height: full.height(),
            data_type: full.data_type,
            nodata: self.nodata,
            bounds: self.bounds().as_tuple(),
            bounds_lat_lon_deg: self.bounds_lat_lon_deg().ok(),
            pixel_size: (self.transform.pixel_width, self.transform.pixel_height),
            block_size: (full.block_width, full.block_height),
            overview_count: self.overview_count(),
            compression: format!("{:?}", full.compression),
            description: self.description.clone(),
        }
    }

    /// Read `window` of the full resolution level, fetching only the blocks it
    /// touches. Cells outside the image are `nodata`.
    pub fn read_window<R: ReadRange + ?Sized>(
        &self,
        source: &R,
        window: &PixelWindow,
        crs_override: Option<Crs>,
        nodata: f64,
    ) -> CloudTiffResult<Raster> {
        let level = &self.levels[0];
        let grid = self.pixel_grid(crs_override)?.window_grid(window);
        let mut raster = Raster::filled(grid, level.data_type, nodata)?;

        let blocks = level.blocks_in_window(window);
        debug!("reading {} blocks for window {:?}", blocks.len(), window);
        for (col, row) in blocks {
            let index = level.block_index(col, row);
            let (start, end) = level.block_byte_range(index)?;
            let bytes = source.read_range_to_vec(start, end)?;
            let samples = level.decode_block(row, &bytes)?;
            let rows = level.block_rows(row);

            let block_col = col * level.block_width;
            let block_row = row * level.block_height;
            let col_from = window.col_off.max(block_col);
            let col_to = window
                .col_end()
                .min(block_col + level.block_width)
                .min(level.width());
            let row_from = window.row_off.max(block_row);
            let row_to = window.row_end().min(block_row + rows);
            for r in row_from..row_to {
                for c in col_from..col_to {
                    let i = (r - block_row) as usize * level.block_width as usize
                        + (c - block_col) as usize;
                    raster.set(c - window.col_off, r - window.row_off, samples.get(i));
                }
            }
        }
        Ok(raster)
    }

    /// Whole full resolution image.
    pub fn read_raster<R: ReadRange + ?Sized>(
        &self,
        source: &R,
        crs_override: Option<Crs>,
        nodata: f64,
    ) -> CloudTiffResult<Raster> {
        let (width, height) = self.full_dimensions();
        self.read_window(source, &PixelWindow::new(0, 0, width, height), crs_override, nodata)
    }
}

pub fn parse_nodata(s: &str) -> Option<f64> {
    let s = s.trim();
    match s.to_ascii_lowercase().as_str() {
        "nan" | "-nan" => Some(f64::NAN),
        "inf" => Some(f64::INFINITY),
        "-inf" => Some(f64::NEG_INFINITY),
        _ => s.parse().ok(),
    }
}

/// Text of the band 0 DESCRIPTION item in a GDAL_METADATA document.
pub fn band_description(xml: &str) -> Option<String> {
    xml.split("<Item").skip(1).find_map(|item| {
        let (attributes, rest) = item.split_once('>')?;
        let is_description = attributes.contains("name=\"DESCRIPTION\"")
            && attributes.contains("role=\"description\"");
        if !is_description {
            return None;
        }
        let (text, _) = rest.split_once("</Item>")?;
        Some(unescape_xml(text))
    })
}

pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}

impl Display for CloudTiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CloudTiff({} Levels)", self.levels.len())?;
        for level in self.levels.iter() {
            write!(f, "\n  {level}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiff::{Endian, Ifd, TagData, Variant};
    use std::io::Cursor;
    use std::sync::Mutex;

    /// Striped, LZW-free uncompressed GeoTIFF with 3 rows per strip.
    fn striped_tiff(endian: Endian) -> Vec<u8> {
        let (width, height) = (4u32, 5u32);
        let values: Vec<u16> = (0..(width * height) as u16).collect();
        let data = endian.encode_all::<2, u16>(&values);
        let strip_rows = 3;
        let strip_bytes = (width * strip_rows * 2) as usize;

        let mut ifd = Ifd::default();
        ifd.set_tag(TagId::ImageWidth, TagData::from_long(width), endian);
        ifd.set_tag(TagId::ImageHeight, TagData::from_long(height), endian);
        ifd.set_tag(TagId::BitsPerSample, TagData::from_short(16), endian);
        ifd.set_tag(TagId::Compression, TagData::from_short(1), endian);
        ifd.set_tag(TagId::RowsPerStrip, TagData::from_long(strip_rows), endian);
        ifd.set_tag(TagId::GDALNoData, TagData::from_string("0"), endian);
        GeoTags::from_epsg(5070, false, (100.0, 200.0), (10.0, 10.0)).add_to_ifd(&mut ifd, endian);
        ifd.set_tag(TagId::StripOffsets, TagData::Long(vec![0, 0]), endian);
        ifd.set_tag(
            TagId::StripByteCounts,
            TagData::Long(vec![strip_bytes as u32, (data.len() - strip_bytes) as u32]),
            endian,
        );

        let mut tiff = Tiff::new(endian, Variant::Normal);
        tiff.ifds.push(ifd);
        let data_start = tiff.directories_size() as u32;
        tiff.ifds[0].set_tag(
            TagId::StripOffsets,
            TagData::Long(vec![data_start, data_start + strip_bytes as u32]),
            endian,
        );
        let mut bytes = tiff.encode_directories();
        bytes.extend(data);
        bytes
    }

    #[test]
    fn reads_windows_across_strips() {
        for endian in [Endian::Big, Endian::Little] {
            let bytes = striped_tiff(endian);
            let cog = CloudTiff::open(&mut Cursor::new(bytes.clone())).unwrap();
            assert_eq!(cog.full_dimensions(), (4, 5));
            assert_eq!(cog.nodata, Some(0.0));
            assert_eq!(cog.crs, Some(Crs::from_epsg(5070)));
            assert_eq!(cog.get_level(0).unwrap().layout, BlockLayout::Strips);

            let source = Mutex::new(Cursor::new(bytes));
            let window = PixelWindow::new(1, 2, 2, 2);
            let raster = cog.read_window(&source, &window, None, 0.0).unwrap();
            assert_eq!(raster.get(0, 0), Some(9.0));
            assert_eq!(raster.get(1, 1), Some(14.0));
            assert_eq!(raster.grid.transform.origin_x, 110.0);
            assert_eq!(raster.grid.transform.origin_y, 180.0);

            let full = cog.read_raster(&source, None, 0.0).unwrap();
            assert_eq!(full.get(3, 4), Some(19.0));
        }
    }

    #[test]
    fn crs_override_and_bounds() {
        let cog = CloudTiff::open(&mut Cursor::new(striped_tiff(Endian::Little))).unwrap();
        assert_eq!(cog.bounds().as_tuple(), (100.0, 150.0, 140.0, 200.0));
        let grid = cog.pixel_grid(Some(Crs::from_epsg(3857))).unwrap();
        assert_eq!(grid.crs.epsg, 3857);
        let info = cog.info();
        assert_eq!(info.data_type, DataType::U16);
        assert_eq!(info.overview_count, 0);
    }

    #[test]
    fn metadata_helpers() {
        assert!(parse_nodata("nan").unwrap().is_nan());
        assert_eq!(parse_nodata(" -9999 "), Some(-9999.0));
        assert_eq!(parse_nodata("none"), None);
        let xml = r#"<GDALMetadata>
  <Item name="DESCRIPTION" sample="0" role="description">Available water &amp; storage</Item>
</GDALMetadata>"#;
        assert_eq!(
            band_description(xml).as_deref(),
            Some("Available water & storage")
        );
        assert_eq!(band_description("<GDALMetadata></GDALMetadata>"), None);
    }
}
