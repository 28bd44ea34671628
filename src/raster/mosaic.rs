//! Priority compositing of rasters sharing one pixel grid.

use super::{DataType, PixelGrid, Raster, RasterError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MosaicError {
    #[error("input {index} is not on the mosaic grid ({found:?} vs {expected:?})")]
    GridMismatch {
        index: usize,
        expected: Box<PixelGrid>,
        found: Box<PixelGrid>,
    },
    #[error(transparent)]
    Raster(#[from] RasterError),
}

/// Composite `inputs`, lowest priority first.
///
/// Each input overwrites the composite at its valid cells, so the last
/// input wins where inputs overlap. Nodata never overwrites valid data.
pub fn mosaic(
    grid: &PixelGrid,
    data_type: DataType,
    nodata: f64,
    inputs: &[Raster],
) -> Result<Raster, MosaicError> {
    let mut out = Raster::filled(*grid, data_type, nodata)?;
    for (index, input) in inputs.iter().enumerate() {
        if input.grid != *grid {
            return Err(MosaicError::GridMismatch {
                index,
                expected: Box::new(*grid),
                found: Box::new(input.grid),
            });
        }
        for (i, value) in input.samples.iter().enumerate() {
            if !input.is_nodata(value) {
                out.samples.set(i, value);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::Crs;
    use crate::raster::{GeoTransform, Samples};

    fn grid() -> PixelGrid {
        PixelGrid::new(Crs::from_epsg(5070), GeoTransform::new(0.0, 0.0, 1.0, 1.0), 3, 1)
    }

    fn raster(values: Vec<i32>, nodata: f64) -> Raster {
        Raster::new(grid(), nodata, Samples::I32(values)).unwrap()
    }

    #[test]
    fn later_inputs_win_where_valid() {
        let a = raster(vec![1, 1, 0], 0.0);
        let b = raster(vec![-9, 2, 2], -9.0);
        let out = mosaic(&grid(), DataType::I32, -1.0, &[a.clone(), b.clone()]).unwrap();
        assert_eq!(out.samples, Samples::I32(vec![1, 2, 2]));

        let out = mosaic(&grid(), DataType::I32, -1.0, &[b, a]).unwrap();
        assert_eq!(out.samples, Samples::I32(vec![1, 1, 2]));
    }

    #[test]
    fn empty_inputs_give_nodata() {
        let out = mosaic(&grid(), DataType::U32, 7.0, &[]).unwrap();
        assert!(out.is_empty());
        assert_eq!(out.nodata, 7.0);
    }

    #[test]
    fn unstorable_nodata_is_rejected() {
        assert!(matches!(
            mosaic(&grid(), DataType::U8, 300.0, &[]),
            Err(MosaicError::Raster(RasterError::NodataOutOfRange { .. }))
        ));
    }

    #[test]
    fn grid_mismatch_is_rejected() {
        let mut other = raster(vec![1, 2, 3], 0.0);
        other.grid.transform.origin_x = 0.5;
        assert!(matches!(
            mosaic(&grid(), DataType::I32, 0.0, &[other]),
            Err(MosaicError::GridMismatch { index: 0, .. })
        ));
    }
}
