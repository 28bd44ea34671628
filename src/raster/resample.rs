//! Reprojection of a raster onto another pixel grid.

use super::{DataType, PixelGrid, Raster, RasterError};
use crate::projection::{ProjectionError, Transformer};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resampling {
    #[default]
    Nearest,
    Bilinear,
    Cubic,
}

#[derive(Debug, Error)]
pub enum ReprojectError {
    #[error(transparent)]
    Projection(#[from] ProjectionError),
    #[error("{0:?} resampling would blend categories of a {1} raster")]
    CategoricalInterpolation(Resampling, DataType),
    #[error(transparent)]
    Raster(#[from] RasterError),
}

/// Resample `src` onto `target`, keeping the source data type and nodata.
///
/// Target pixel centers are mapped into the source CRS and sampled there.
/// Pixels outside the source, or whose kernel touches nodata, are nodata.
pub fn reproject(src: &Raster, target: &PixelGrid, method: Resampling) -> Result<Raster, ReprojectError> {
    if method != Resampling::Nearest && src.data_type().is_integer() {
        return Err(ReprojectError::CategoricalInterpolation(method, src.data_type()));
    }
    let transformer = Transformer::new(target.crs, src.grid.crs)?;
    debug!(
        "reprojecting {} onto {}x{} {} with {:?}",
        src, target.width, target.height, target.crs, method
    );

    let mut out = Raster::filled(*target, src.data_type(), src.nodata)?;
    for row in 0..target.height {
        for col in 0..target.width {
            let (x, y) = target.transform.pixel_center(col, row);
            let (sx, sy) = transformer.transform(x, y)?;
            let (u, v) = src.grid.transform.world_to_pixel(sx, sy);
            let value = match method {
                Resampling::Nearest => nearest(src, u, v),
                Resampling::Bilinear => bilinear(src, u, v),
                Resampling::Cubic => cubic(src, u, v),
            };
            if let Some(value) = value {
                out.set(col, row, value);
            }
        }
    }
    Ok(out)
}

fn nearest(src: &Raster, u: f64, v: f64) -> Option<f64> {
    if u < 0.0 || v < 0.0 {
        return None;
    }
    src.valid(u.floor() as u32, v.floor() as u32)
}

/// Sample at a pixel-center relative position, `None` off raster.
fn cell(src: &Raster, col: f64, row: f64) -> Option<f64> {
    if col < 0.0 || row < 0.0 {
        return None;
    }
    src.valid(col as u32, row as u32)
}

fn bilinear(src: &Raster, u: f64, v: f64) -> Option<f64> {
    let (x, y) = (u - 0.5, v - 0.5);
    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);
    let top = cell(src, x0, y0)? * (1.0 - fx) + cell(src, x0 + 1.0, y0)? * fx;
    let bottom = cell(src, x0, y0 + 1.0)? * (1.0 - fx) + cell(src, x0 + 1.0, y0 + 1.0)? * fx;
    Some(top * (1.0 - fy) + bottom * fy)
}

fn catmull_rom(p: [f64; 4], t: f64) -> f64 {
    0.5 * (2.0 * p[1]
        + (-p[0] + p[2]) * t
        + (2.0 * p[0] - 5.0 * p[1] + 4.0 * p[2] - p[3]) * t * t
        + (-p[0] + 3.0 * p[1] - 3.0 * p[2] + p[3]) * t * t * t)
}

fn cubic(src: &Raster, u: f64, v: f64) -> Option<f64> {
    let (x, y) = (u - 0.5, v - 0.5);
    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);
    let mut rows = [0.0; 4];
    for (j, row) in rows.iter_mut().enumerate() {
        let r = y0 + j as f64 - 1.0;
        let mut p = [0.0; 4];
        for (i, value) in p.iter_mut().enumerate() {
            *value = cell(src, x0 + i as f64 - 1.0, r)?;
        }
        *row = catmull_rom(p, fx);
    }
    Some(catmull_rom(rows, fy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::{Crs, Transformer};
    use crate::raster::{GeoTransform, Samples};

    fn source() -> Raster {
        let grid = PixelGrid::new(
            Crs::from_epsg(5070),
            GeoTransform::new(0.0, 40.0, 10.0, 10.0),
            4,
            4,
        );
        let values = (0..16).map(|v| v as f32).collect();
        Raster::new(grid, -1.0, Samples::F32(values)).unwrap()
    }

    #[test]
    fn nearest_on_finer_grid_replicates_pixels() {
        let src = source();
        let target = PixelGrid::new(src.grid.crs, GeoTransform::new(0.0, 40.0, 5.0, 5.0), 8, 8);
        let out = reproject(&src, &target, Resampling::Nearest).unwrap();
        assert_eq!(out.get(0, 0), Some(0.0));
        assert_eq!(out.get(1, 1), Some(0.0));
        assert_eq!(out.get(2, 0), Some(1.0));
        assert_eq!(out.get(7, 7), Some(15.0));
    }

    #[test]
    fn outside_source_is_nodata() {
        let src = source();
        let target = PixelGrid::new(src.grid.crs, GeoTransform::new(30.0, 40.0, 10.0, 10.0), 3, 1);
        let out = reproject(&src, &target, Resampling::Nearest).unwrap();
        assert_eq!(out.valid(0, 0), Some(3.0));
        assert_eq!(out.valid(1, 0), None);
        assert_eq!(out.valid(2, 0), None);
    }

    #[test]
    fn bilinear_interpolates_and_respects_nodata() {
        let mut src = source();
        let target = PixelGrid::new(src.grid.crs, GeoTransform::new(10.0, 30.0, 10.0, 10.0), 2, 1);
        // Centers fall on pixel corners of the source
        let shifted = PixelGrid {
            transform: GeoTransform::new(15.0, 25.0, 10.0, 10.0),
            ..target
        };
        let out = reproject(&src, &shifted, Resampling::Bilinear).unwrap();
        // mean of 5, 6, 9, 10
        assert_eq!(out.valid(0, 0), Some(7.5));

        src.set(2, 2, -1.0);
        let out = reproject(&src, &shifted, Resampling::Bilinear).unwrap();
        assert_eq!(out.valid(0, 0), None);
    }

    #[test]
    fn cubic_reproduces_linear_ramp() {
        let src = source();
        let target = PixelGrid::new(src.grid.crs, GeoTransform::new(15.0, 25.0, 10.0, 10.0), 1, 1);
        let out = reproject(&src, &target, Resampling::Cubic).unwrap();
        let v = out.valid(0, 0).unwrap();
        assert!((v - 7.5).abs() < 1e-5);
    }

    #[test]
    fn albers_keys_land_on_a_lat_lon_grid() {
        // 100 m pixels centered on the projection origin, key = row * 100 + col
        let grid = PixelGrid::new(
            Crs::from_epsg(5070),
            GeoTransform::new(-5000.0, 5000.0, 100.0, 100.0),
            100,
            100,
        );
        let src = Raster::new(grid, -1.0, Samples::I32((0..10000).collect())).unwrap();
        let to_lon_lat = Transformer::new(grid.crs, Crs::WGS84).unwrap();

        let (lon, lat) = to_lon_lat.transform(50.0, -50.0).unwrap();
        assert!((lon + 96.0).abs() < 0.01 && (lat - 23.0).abs() < 0.01);
        for (col, row) in [(50, 50), (10, 80), (97, 3)] {
            let (x, y) = grid.transform.pixel_center(col, row);
            let (lon, lat) = to_lon_lat.transform(x, y).unwrap();
            let target = PixelGrid::new(
                Crs::WGS84,
                GeoTransform::new(lon - 0.00005, lat + 0.00005, 0.0001, 0.0001),
                1,
                1,
            );
            let out = reproject(&src, &target, Resampling::Nearest).unwrap();
            assert_eq!(out.grid, target);
            assert_eq!(out.get(0, 0), Some((row * 100 + col) as f64));
        }
    }

    #[test]
    fn unstorable_source_nodata_is_rejected() {
        let grid = PixelGrid::new(Crs::from_epsg(5070), GeoTransform::new(0.0, 10.0, 10.0, 10.0), 1, 1);
        let src = Raster {
            grid,
            nodata: 300.0,
            samples: Samples::U8(vec![7]),
        };
        let wider = PixelGrid::new(grid.crs, GeoTransform::new(0.0, 10.0, 10.0, 10.0), 2, 1);
        assert!(matches!(
            reproject(&src, &wider, Resampling::Nearest),
            Err(ReprojectError::Raster(RasterError::NodataOutOfRange { .. }))
        ));
    }

    #[test]
    fn integer_rasters_reject_interpolation() {
        let grid = source().grid;
        let src = Raster::filled(grid, DataType::I32, -1.0).unwrap();
        assert!(matches!(
            reproject(&src, &grid, Resampling::Bilinear),
            Err(ReprojectError::CategoricalInterpolation(Resampling::Bilinear, DataType::I32))
        ));
    }
}
