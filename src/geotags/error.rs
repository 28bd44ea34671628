use super::GeoKeyId;
use crate::tiff::TagId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeoTiffError {
    #[error("missing GeoTIFF tag {0:?}")]
    MissingTag(TagId),
    #[error("malformed GeoTIFF tag {0:?}")]
    BadTag(TagId),
    #[error("missing GeoKey {0:?}")]
    MissingKey(GeoKeyId),
    #[error("unsupported raster model: {0}")]
    UnsupportedModel(String),
}
