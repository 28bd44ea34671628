use super::TagId;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TiffError {
    #[error("bad TIFF magic bytes")]
    BadMagicBytes,
    #[error("TIFF has no image file directories")]
    NoIfd,
    #[error("missing tag {0:?}")]
    MissingTag(TagId),
    #[error("malformed tag {0:?}")]
    BadTag(TagId),
    #[error("TIFF read failed: {0}")]
    ReadError(#[from] io::Error),
}
