use super::compression::DecompressError;
use crate::geotags::GeoTiffError;
use crate::projection::ProjectionError;
use crate::raster::RasterError;
use crate::tiff::TiffError;
use std::io;
use thiserror::Error;

pub type CloudTiffResult<T> = Result<T, CloudTiffError>;

#[derive(Debug, Error)]
pub enum CloudTiffError {
    #[error("bad TIFF: {0}")]
    BadTiff(TiffError),
    #[error("bad GeoTIFF: {0}")]
    BadGeoTiff(#[from] GeoTiffError),
    #[error("level out of range (index, max): {0:?}")]
    LevelOutOfRange((usize, usize)),
    #[error("block out of range (index, count): {0:?}")]
    BlockIndexOutOfRange((usize, usize)),
    #[error("read failed: {0}")]
    ReadError(#[from] io::Error),
    #[error("decompression failed: {0}")]
    DecompresionError(#[from] DecompressError),
    #[error(transparent)]
    RasterizationError(#[from] RasterError),
    #[error(transparent)]
    ProjectionError(#[from] ProjectionError),
    #[error("file has no readable image levels")]
    NoLevels,
    #[error("no CRS: file lacks an EPSG GeoKey and no override was given")]
    NoCrs,
    #[error("not supported: {0}")]
    NotSupported(String),
}

impl From<TiffError> for CloudTiffError {
    fn from(e: TiffError) -> Self {
        match e {
            TiffError::ReadError(io_error) => CloudTiffError::ReadError(io_error),
            tiff_error => CloudTiffError::BadTiff(tiff_error),
        }
    }
}

impl CloudTiffError {
    /// True for IO failures, the only errors worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, CloudTiffError::ReadError(_))
    }
}
