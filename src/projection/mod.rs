use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use thiserror::Error;

mod primatives;

pub use primatives::{Interval, Region};

/// Points per edge when transforming a bounding box.
pub const DENSIFY_POINTS: usize = 21;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("unsupported CRS EPSG:{0}: {1}")]
    UnsupportedCrs(u16, String),
    #[error("failed to transform ({x}, {y}) from EPSG:{from} to EPSG:{to}: {message}")]
    TransformFailed {
        x: f64,
        y: f64,
        from: u16,
        to: u16,
        message: String,
    },
    #[error("bounds {0:?} have no finite image in the target CRS")]
    DegenerateBounds((f64, f64, f64, f64)),
}

/// Coordinate reference system identified by its EPSG code.
///
/// Only the code is stored so the type stays `Send + Sync`; PROJ definitions
/// are built where they are used.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Crs {
    pub epsg: u16,
}

impl Crs {
    pub const WGS84: Crs = Crs { epsg: 4326 };

    pub fn from_epsg(epsg: u16) -> Self {
        Self { epsg }
    }

    pub fn proj(&self) -> Result<Proj, ProjectionError> {
        Proj::from_epsg_code(self.epsg)
            .map_err(|e| ProjectionError::UnsupportedCrs(self.epsg, format!("{e:?}")))
    }

    pub fn is_geographic(&self) -> Result<bool, ProjectionError> {
        Ok(self.proj()?.is_latlong())
    }
}

impl Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EPSG:{}", self.epsg)
    }
}

/// Point transformer between two CRSs, working in degrees for geographic ones.
#[derive(Debug)]
pub struct Transformer {
    source: Crs,
    target: Crs,
    projs: Option<(Proj, Proj)>,
    source_latlong: bool,
    target_latlong: bool,
}

impl Transformer {
    pub fn new(source: Crs, target: Crs) -> Result<Self, ProjectionError> {
        if source == target {
            return Ok(Self {
                source,
                target,
                projs: None,
                source_latlong: false,
                target_latlong: false,
            });
        }
        let from = source.proj()?;
        let to = target.proj()?;
        Ok(Self {
            source,
            target,
            source_latlong: from.is_latlong(),
            target_latlong: to.is_latlong(),
            projs: Some((from, to)),
        })
    }

    pub fn is_identity(&self) -> bool {
        self.projs.is_none()
    }

    pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64), ProjectionError> {
        let Some((from, to)) = &self.projs else {
            return Ok((x, y));
        };
        let mut point = if self.source_latlong {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };
        transform(from, to, &mut point).map_err(|e| self.failed(x, y, format!("{e:?}")))?;
        let (u, v) = if self.target_latlong {
            (point.0.to_degrees(), point.1.to_degrees())
        } else {
            (point.0, point.1)
        };
        if u.is_finite() && v.is_finite() {
            Ok((u, v))
        } else {
            Err(self.failed(x, y, "non-finite result".into()))
        }
    }

    /// Bounding box of `region` in the target CRS, sampling each edge.
    ///
    /// Points that fail to transform are ignored as long as some succeed.
    pub fn transform_bounds(&self, region: &Region<f64>) -> Result<Region<f64>, ProjectionError> {
        if self.is_identity() {
            return Ok(*region);
        }
        let (x0, y0, x1, y1) = region.as_tuple();
        let n = DENSIFY_POINTS - 1;
        let mut points = Vec::with_capacity(4 * DENSIFY_POINTS);
        let mut last_error = None;
        for i in 0..=n {
            let t = i as f64 / n as f64;
            let x = x0 + t * (x1 - x0);
            let y = y0 + t * (y1 - y0);
            for (px, py) in [(x, y0), (x, y1), (x0, y), (x1, y)] {
                match self.transform(px, py) {
                    Ok(p) => points.push(p),
                    Err(e) => last_error = Some(e),
                }
            }
        }
        match (Region::from_points(&points), last_error) {
            (Some(bounds), _) => Ok(bounds),
            (None, Some(e)) => Err(e),
            (None, None) => Err(ProjectionError::DegenerateBounds(region.as_tuple())),
        }
    }

    fn failed(&self, x: f64, y: f64, message: String) -> ProjectionError {
        ProjectionError::TransformFailed {
            x,
            y,
            from: self.source.epsg,
            to: self.target.epsg,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_skips_proj() {
        let t = Transformer::new(Crs::from_epsg(5070), Crs::from_epsg(5070)).unwrap();
        assert!(t.is_identity());
        assert_eq!(t.transform(12.5, -3.0).unwrap(), (12.5, -3.0));
    }

    #[test]
    fn mercator_round_trip_in_degrees() {
        let forward = Transformer::new(Crs::WGS84, Crs::from_epsg(3857)).unwrap();
        let inverse = Transformer::new(Crs::from_epsg(3857), Crs::WGS84).unwrap();
        let (x, y) = forward.transform(-100.0, 40.0).unwrap();
        assert!((x - -11131949.08).abs() < 1.0);
        let (lon, lat) = inverse.transform(x, y).unwrap();
        assert!((lon - -100.0).abs() < 1e-6);
        assert!((lat - 40.0).abs() < 1e-6);
    }

    #[test]
    fn densified_bounds_contain_corners() {
        let t = Transformer::new(Crs::WGS84, Crs::from_epsg(3857)).unwrap();
        let bounds = t.transform_bounds(&Region::new(-101.0, 39.0, -99.0, 41.0)).unwrap();
        let (x0, y0) = t.transform(-101.0, 39.0).unwrap();
        let (x1, y1) = t.transform(-99.0, 41.0).unwrap();
        assert!(bounds.x_min() <= x0 && bounds.y_min() <= y0);
        assert!(bounds.x_max() >= x1 && bounds.y_max() >= y1);
    }

    #[test]
    fn unknown_epsg_is_unsupported() {
        assert!(matches!(
            Crs::from_epsg(1).proj(),
            Err(ProjectionError::UnsupportedCrs(1, _))
        ));
    }
}
