// https://docs.ogc.org/is/19-008r4/19-008r4.html#_summary_of_geokey_ids_and_names

use num_enum::{IntoPrimitive, TryFromPrimitive};

#[derive(Debug, PartialEq, Eq, Clone, Copy, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum GeoKeyId {
    GTModelTypeGeoKey = 1024,
    GTRasterTypeGeoKey = 1025,
    GTCitationGeoKey = 1026,
    GeographicTypeGeoKey = 2048,
    GeogCitationGeoKey = 2049,
    GeogGeodeticDatumGeoKey = 2050,
    GeogLinearUnitsGeoKey = 2052,
    GeogAngularUnitsGeoKey = 2054,
    ProjectedCSTypeGeoKey = 3072,
    PCSCitationGeoKey = 3073,
    ProjectionGeoKey = 3074,
    ProjLinearUnitsGeoKey = 3076,
    VerticalCSTypeGeoKey = 4096,
}

/// Values of `GTModelTypeGeoKey`.
pub mod model_type {
    pub const PROJECTED: u16 = 1;
    pub const GEOGRAPHIC: u16 = 2;
}

/// Values of `GTRasterTypeGeoKey`.
pub mod raster_type {
    pub const PIXEL_IS_AREA: u16 = 1;
    pub const PIXEL_IS_POINT: u16 = 2;
}

/// `GeogAngularUnitsGeoKey` value for degrees.
pub const ANGULAR_DEGREE: u16 = 9102;
