use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Tags read or written by this crate. Baseline and extension tags from
/// TIFF 6.0, then GeoTIFF 1.1, then the GDAL private tags.
#[derive(Debug, PartialEq, Clone, Copy, IntoPrimitive, TryFromPrimitive, Eq, Hash)]
#[repr(u16)]
pub enum TagId {
    NewSubfileType = 0x00FE,
    ImageWidth = 0x0100,
    ImageHeight = 0x0101,
    BitsPerSample = 0x0102,
    Compression = 0x0103,
    PhotometricInterpretation = 0x0106,
    StripOffsets = 0x0111,
    SamplesPerPixel = 0x0115,
    RowsPerStrip = 0x0116,
    StripByteCounts = 0x0117,
    PlanarConfiguration = 0x011C,
    Software = 0x0131,
    Predictor = 0x013D,
    TileWidth = 0x0142,
    TileLength = 0x0143,
    TileOffsets = 0x0144,
    TileByteCounts = 0x0145,
    SampleFormat = 0x0153,

    // https://docs.ogc.org/is/19-008r4/19-008r4.html#_geotiff_tags_for_coordinate_transformations
    ModelPixelScale = 0x830E,
    ModelTiepoint = 0x8482,
    ModelTransformation = 0x85D8,
    GeoKeyDirectory = 0x87AF,
    GeoDoubleParams = 0x87B0,
    GeoAsciiParams = 0x87B1,

    GDALMetadata = 0xA480,
    GDALNoData = 0xA481,
}
