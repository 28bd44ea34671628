use crate::cog::DecompressError;
use crate::projection::ProjectionError;
use std::io;
use thiserror::Error;

pub type EncodeResult<T> = Result<T, EncodeError>;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("write failed: {0}")]
    WriteError(#[from] io::Error),
    #[error("compression failed: {0}")]
    CompressionError(#[from] DecompressError),
    #[error("cannot georeference output: {0}")]
    UnsupportedProjection(#[from] ProjectionError),
    #[error("cannot encode: {0}")]
    NotSupported(String),
}
