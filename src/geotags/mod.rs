// https://docs.ogc.org/is/19-008r4/19-008r4.html#_geotiff_tags_for_coordinate_transformations

use crate::tiff::{Endian, Ifd, TagData, TagId};
use num_traits::NumCast;
use std::fmt::Display;

mod error;
mod id;
mod keys;
mod value;

pub use error::GeoTiffError;
pub use id::{model_type, raster_type, GeoKeyId, ANGULAR_DEGREE};
pub use keys::{GeoKey, GeoKeyDirectory};
pub use value::GeoKeyValue;

#[derive(Clone, Debug, PartialEq)]
pub struct GeoTags {
    pub directory: GeoKeyDirectory,
    pub model: GeoModel,
}

#[derive(Clone, Debug, PartialEq)]
pub enum GeoModel {
    Transformed(GeoModelTransformed),
    Scaled(GeoModelScaled),
}

#[derive(Clone, Debug, PartialEq)]
pub struct GeoModelTransformed {
    pub transformation: [f64; 16],
    pub tiepoint: Option<[f64; 6]>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GeoModelScaled {
    pub pixel_scale: [f64; 3],
    pub tiepoint: [f64; 6],
}

impl GeoTags {
    pub fn from_tiepoint_and_scale(tiepoint: [f64; 6], pixel_scale: [f64; 3]) -> Self {
        Self {
            model: GeoModel::Scaled(GeoModelScaled {
                tiepoint,
                pixel_scale,
            }),
            directory: GeoKeyDirectory::default(),
        }
    }

    /// North-up georeferencing for an EPSG coded CRS.
    pub fn from_epsg(
        epsg: u16,
        geographic: bool,
        origin: (f64, f64),
        pixel_size: (f64, f64),
    ) -> Self {
        let mut tags = Self::from_tiepoint_and_scale(
            [0.0, 0.0, 0.0, origin.0, origin.1, 0.0],
            [pixel_size.0, pixel_size.1, 0.0],
        );
        let directory = &mut tags.directory;
        directory.set(
            GeoKeyId::GTRasterTypeGeoKey,
            GeoKeyValue::Short(vec![raster_type::PIXEL_IS_AREA]),
        );
        if geographic {
            directory.set(
                GeoKeyId::GTModelTypeGeoKey,
                GeoKeyValue::Short(vec![model_type::GEOGRAPHIC]),
            );
            directory.set(GeoKeyId::GeographicTypeGeoKey, GeoKeyValue::Short(vec![epsg]));
            directory.set(
                GeoKeyId::GeogAngularUnitsGeoKey,
                GeoKeyValue::Short(vec![ANGULAR_DEGREE]),
            );
        } else {
            directory.set(
                GeoKeyId::GTModelTypeGeoKey,
                GeoKeyValue::Short(vec![model_type::PROJECTED]),
            );
            directory.set(GeoKeyId::ProjectedCSTypeGeoKey, GeoKeyValue::Short(vec![epsg]));
        }
        tags
    }

    pub fn parse(ifd: &Ifd) -> Result<Self, GeoTiffError> {
        let tiepoint = get_tag_as_array(ifd, TagId::ModelTiepoint).ok();
        let pixel_scale = get_tag_as_array(ifd, TagId::ModelPixelScale).ok();
        let transformation = get_tag_as_array(ifd, TagId::ModelTransformation).ok();
        let model = match (tiepoint, pixel_scale, transformation) {
            (Some(tiepoint), Some(pixel_scale), _) => GeoModel::Scaled(GeoModelScaled {
                tiepoint,
                pixel_scale,
            }),
            (tiepoint, _, Some(transformation)) => GeoModel::Transformed(GeoModelTransformed {
                tiepoint,
                transformation,
            }),
            _ => return Err(GeoTiffError::MissingTag(TagId::ModelPixelScale)),
        };

        let directory = GeoKeyDirectory::parse(ifd)?;

        Ok(Self { model, directory })
    }

    pub fn add_to_ifd(&self, ifd: &mut Ifd, endian: Endian) {
        match &self.model {
            GeoModel::Transformed(model) => {
                ifd.set_tag(
                    TagId::ModelTransformation,
                    TagData::Double(model.transformation.to_vec()),
                    endian,
                );
                if let Some(tiepoint) = model.tiepoint {
                    ifd.set_tag(TagId::ModelTiepoint, TagData::Double(tiepoint.to_vec()), endian);
                }
            }
            GeoModel::Scaled(model) => {
                ifd.set_tag(
                    TagId::ModelTiepoint,
                    TagData::Double(model.tiepoint.to_vec()),
                    endian,
                );
                ifd.set_tag(
                    TagId::ModelPixelScale,
                    TagData::Double(model.pixel_scale.to_vec()),
                    endian,
                );
            }
        }
        self.directory.add_to_ifd(ifd, endian);
    }

    /// EPSG code of the projected or geographic CRS.
    pub fn epsg(&self) -> Option<u16> {
        self.directory
            .get(GeoKeyId::ProjectedCSTypeGeoKey)
            .or_else(|| self.directory.get(GeoKeyId::GeographicTypeGeoKey))
            .and_then(|v| v.as_number())
            // 32767 is "user defined"
            .filter(|code| *code != 0 && *code != 32767)
    }

    pub fn is_pixel_is_point(&self) -> bool {
        self.directory
            .get(GeoKeyId::GTRasterTypeGeoKey)
            .and_then(|v| v.as_number::<u16>())
            == Some(raster_type::PIXEL_IS_POINT)
    }

    /// Top-left corner of pixel (0, 0) and the (positive) pixel size.
    ///
    /// Only north-up models are supported. PixelIsPoint rasters are shifted
    /// half a pixel so the origin is the pixel corner.
    pub fn origin_and_pixel_size(&self) -> Result<((f64, f64), (f64, f64)), GeoTiffError> {
        let (origin, size) = match &self.model {
            GeoModel::Scaled(model) => {
                let [i, j, _, x, y, _] = model.tiepoint;
                let (sx, sy) = (model.pixel_scale[0], model.pixel_scale[1]);
                ((x - i * sx, y + j * sy), (sx, sy))
            }
            GeoModel::Transformed(model) => {
                let t = model.transformation;
                if t[1] != 0.0 || t[4] != 0.0 {
                    return Err(GeoTiffError::UnsupportedModel(
                        "rotated model transformation".into(),
                    ));
                }
                ((t[3], t[7]), (t[0], -t[5]))
            }
        };
        if !(size.0.is_normal() && size.0 > 0.0 && size.1.is_normal() && size.1 > 0.0) {
            return Err(GeoTiffError::UnsupportedModel(format!(
                "pixel size {size:?} is not north-up"
            )));
        }
        if !(origin.0.is_finite() && origin.1.is_finite()) {
            return Err(GeoTiffError::UnsupportedModel(format!(
                "non-finite origin {origin:?}"
            )));
        }
        if self.is_pixel_is_point() {
            Ok(((origin.0 - size.0 / 2.0, origin.1 + size.1 / 2.0), size))
        } else {
            Ok((origin, size))
        }
    }
}

impl Display for GeoTags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "GeoTIFF Tags:")?;
        match &self.model {
            GeoModel::Transformed(model) => {
                writeln!(f, "  Tiepoint: {:?}", model.tiepoint)?;
                writeln!(f, "  Transformation: {:?}", model.transformation)?;
            }
            GeoModel::Scaled(model) => {
                writeln!(f, "  Tiepoint: {:?}", model.tiepoint)?;
                writeln!(f, "  Pixel Scale: {:?}", model.pixel_scale)?;
            }
        }
        write!(
            f,
            "  Directory: {{version: {}, revision: {}.{}}}",
            self.directory.version, self.directory.revision.0, self.directory.revision.1,
        )?;
        for key in self.directory.keys.iter() {
            write!(f, "\n    {key}")?;
        }
        Ok(())
    }
}

fn get_tag_as_array<const N: usize, T: NumCast>(
    ifd: &Ifd,
    id: TagId,
) -> Result<[T; N], GeoTiffError> {
    ifd.get_tag(id)
        .map_err(|_| GeoTiffError::MissingTag(id))?
        .values::<T>()
        .ok_or(GeoTiffError::BadTag(id))?
        .try_into()
        .map_err(|_| GeoTiffError::BadTag(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projected_tags_round_trip_through_ifd() {
        let tags = GeoTags::from_epsg(5070, false, (-2400000.0, 3200000.0), (30.0, 30.0));
        let mut ifd = Ifd::default();
        tags.add_to_ifd(&mut ifd, Endian::Little);

        let parsed = GeoTags::parse(&ifd).unwrap();
        assert_eq!(parsed, tags);
        assert_eq!(parsed.epsg(), Some(5070));
        assert_eq!(
            parsed.origin_and_pixel_size().unwrap(),
            ((-2400000.0, 3200000.0), (30.0, 30.0))
        );
    }

    #[test]
    fn pixel_is_point_shifts_half_a_pixel() {
        let mut tags = GeoTags::from_epsg(4326, true, (-100.0, 40.0), (0.5, 0.5));
        tags.directory.set(
            GeoKeyId::GTRasterTypeGeoKey,
            GeoKeyValue::Short(vec![raster_type::PIXEL_IS_POINT]),
        );
        assert_eq!(tags.epsg(), Some(4326));
        assert_eq!(
            tags.origin_and_pixel_size().unwrap(),
            ((-100.25, 40.25), (0.5, 0.5))
        );
    }

    #[test]
    fn rotated_transformation_is_unsupported() {
        let mut transformation = [0.0; 16];
        transformation[0] = 10.0;
        transformation[1] = 1.0;
        transformation[5] = -10.0;
        let tags = GeoTags {
            directory: GeoKeyDirectory::default(),
            model: GeoModel::Transformed(GeoModelTransformed {
                transformation,
                tiepoint: None,
            }),
        };
        assert!(matches!(
            tags.origin_and_pixel_size(),
            Err(GeoTiffError::UnsupportedModel(_))
        ));
    }
}
