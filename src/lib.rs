pub mod cog;
pub mod config;
pub mod derive;
pub mod encode;
pub mod geotags;
pub mod grid;
pub mod io;
pub mod pipeline;
pub mod projection;
pub mod raster;
pub mod table;
pub mod tiff;

pub use cog::{CloudTiff, CloudTiffError, RasterInfo};
pub use encode::{EncodeError, Encoder};
pub use grid::{TileGrid, TileId, TileSpec};
pub use pipeline::{CancellationToken, RunReport, RunStatus};
pub use projection::Crs;
pub use raster::{DataType, Raster};
