// https://docs.ogc.org/is/19-008r4/19-008r4.html#_requirements_class_geokeydirectorytag

use super::{GeoKeyId, GeoKeyValue, GeoTiffError};
use crate::tiff::{Endian, Ifd, TagData, TagId, TagType};
use std::fmt::Display;

#[derive(Clone, Debug, PartialEq)]
pub struct GeoKeyDirectory {
    pub version: u16,
    pub revision: (u16, u16),
    pub keys: Vec<GeoKey>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GeoKey {
    pub code: u16,
    pub value: GeoKeyValue,
}

impl GeoKey {
    pub fn id(&self) -> Option<GeoKeyId> {
        GeoKeyId::try_from(self.code).ok()
    }
}

impl Default for GeoKeyDirectory {
    fn default() -> Self {
        Self {
            version: 1,
            revision: (1, 0),
            keys: vec![],
        }
    }
}

impl GeoKeyDirectory {
    pub fn parse(ifd: &Ifd) -> Result<Self, GeoTiffError> {
        let directory_values: Vec<u16> = ifd
            .get_tag(TagId::GeoKeyDirectory)
            .map_err(|_| GeoTiffError::MissingTag(TagId::GeoKeyDirectory))?
            .values()
            .ok_or(GeoTiffError::BadTag(TagId::GeoKeyDirectory))?;

        if directory_values.len() < 4 {
            return Err(GeoTiffError::BadTag(TagId::GeoKeyDirectory));
        }
        let version = directory_values[0];
        let revision = directory_values[1];
        let minor_revision = directory_values[2];
        let key_count = directory_values[3] as usize;

        if directory_values.len() < 4 + key_count * 4 {
            return Err(GeoTiffError::BadTag(TagId::GeoKeyDirectory));
        }

        let keys = (0..key_count)
            .map(|i| {
                let entry = &directory_values[(i + 1) * 4..(i + 2) * 4];
                let (code, location, count, offset) = (entry[0], entry[1], entry[2], entry[3]);
                let value = if location == 0 {
                    GeoKeyValue::Short(vec![offset])
                } else if location == u16::from(TagId::GeoKeyDirectory) {
                    let start = offset as usize;
                    let end = start + count as usize;
                    directory_values
                        .get(start..end)
                        .map(|v| GeoKeyValue::Short(v.to_vec()))
                        .unwrap_or(GeoKeyValue::Undefined)
                } else {
                    param_value(ifd, location, offset as usize, count as usize)
                        .unwrap_or(GeoKeyValue::Undefined)
                };
                GeoKey { code, value }
            })
            .collect();

        Ok(Self {
            version,
            revision: (revision, minor_revision),
            keys,
        })
    }

    pub fn get(&self, id: GeoKeyId) -> Option<&GeoKeyValue> {
        let code: u16 = id.into();
        self.keys.iter().find(|k| k.code == code).map(|k| &k.value)
    }

    pub fn set(&mut self, id: GeoKeyId, value: GeoKeyValue) {
        let code: u16 = id.into();
        let key = GeoKey { code, value };
        match self.keys.binary_search_by_key(&code, |k| k.code) {
            Ok(index) => self.keys[index] = key,
            Err(index) => self.keys.insert(index, key),
        }
    }

    pub fn add_to_ifd(&self, ifd: &mut Ifd, endian: Endian) {
        let (key_directory, ascii_params, double_params) = self.unparse();
        ifd.set_tag(TagId::GeoKeyDirectory, TagData::Short(key_directory), endian);
        if !ascii_params.is_empty() {
            let mut ascii = ascii_params.into_bytes();
            ascii.push(0);
            ifd.set_tag(TagId::GeoAsciiParams, TagData::Ascii(ascii), endian);
        }
        if !double_params.is_empty() {
            ifd.set_tag(TagId::GeoDoubleParams, TagData::Double(double_params), endian);
        }
    }

    /// Flatten into (directory shorts, ascii params, double params).
    pub fn unparse(&self) -> (Vec<u16>, String, Vec<f64>) {
        let mut directory = vec![
            self.version,
            self.revision.0,
            self.revision.1,
            self.keys.len() as u16,
        ];
        let mut shorts = vec![];
        let mut asciis = String::new();
        let mut doubles = vec![];
        let dir_size = 4 * (self.keys.len() + 1) as u16;

        for key in &self.keys {
            directory.push(key.code);
            match &key.value {
                GeoKeyValue::Short(vec) => match vec.len() {
                    0 => directory.extend([0, 0, 0]),
                    1 => directory.extend([0, 1, vec[0]]),
                    n => {
                        directory.extend([
                            TagId::GeoKeyDirectory.into(),
                            n as u16,
                            dir_size + shorts.len() as u16,
                        ]);
                        shorts.extend(vec);
                    }
                },
                GeoKeyValue::Ascii(s) => {
                    // Each string is '|' terminated within GeoAsciiParams
                    directory.extend([
                        TagId::GeoAsciiParams.into(),
                        s.len() as u16 + 1,
                        asciis.len() as u16,
                    ]);
                    asciis.push_str(s);
                    asciis.push('|');
                }
                GeoKeyValue::Double(vec) => {
                    directory.extend([
                        TagId::GeoDoubleParams.into(),
                        vec.len() as u16,
                        doubles.len() as u16,
                    ]);
                    doubles.extend(vec);
                }
                GeoKeyValue::Undefined => directory.extend([0, 0, 0]),
            }
        }

        ([directory, shorts].concat(), asciis, doubles)
    }
}

fn param_value(ifd: &Ifd, location: u16, start: usize, count: usize) -> Option<GeoKeyValue> {
    let tag = ifd.get_tag_by_code(location)?;
    let end = start + count;
    match tag.datatype {
        TagType::Ascii => {
            let s = tag.as_string()?;
            let s = s.get(start..end.min(s.len()))?;
            Some(GeoKeyValue::Ascii(
                s.trim_end_matches(['|', '\0']).to_string(),
            ))
        }
        TagType::Double => tag
            .values::<f64>()?
            .get(start..end)
            .map(|v| GeoKeyValue::Double(v.to_vec())),
        TagType::Short => tag
            .values::<u16>()?
            .get(start..end)
            .map(|v| GeoKeyValue::Short(v.to_vec())),
        _ => None,
    }
}

impl Display for GeoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let id_string = match self.id() {
            Some(id) => format!("{id:?}"),
            None => format!("0x{:04X}", self.code),
        };
        write!(f, "{}: {}", id_string, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_survives_ifd() {
        let endian = Endian::Little;
        let mut directory = GeoKeyDirectory::default();
        directory.set(GeoKeyId::ProjectedCSTypeGeoKey, GeoKeyValue::Short(vec![5070]));
        directory.set(GeoKeyId::GTModelTypeGeoKey, GeoKeyValue::Short(vec![1]));
        directory.set(GeoKeyId::GTCitationGeoKey, GeoKeyValue::Ascii("NAD83 / Conus Albers".into()));
        directory.set(GeoKeyId::GeogGeodeticDatumGeoKey, GeoKeyValue::Double(vec![6269.0]));

        let mut ifd = Ifd::default();
        directory.add_to_ifd(&mut ifd, endian);
        let parsed = GeoKeyDirectory::parse(&ifd).unwrap();

        assert_eq!(parsed, directory);
        assert_eq!(
            parsed.get(GeoKeyId::ProjectedCSTypeGeoKey).and_then(|v| v.as_number::<u16>()),
            Some(5070)
        );
        // keys stay sorted by code
        assert_eq!(parsed.keys[0].id(), Some(GeoKeyId::GTModelTypeGeoKey));
    }

    #[test]
    fn short_directory_is_rejected() {
        let mut ifd = Ifd::default();
        ifd.set_tag(TagId::GeoKeyDirectory, TagData::Short(vec![1, 1, 0, 2]), Endian::Big);
        assert!(matches!(
            GeoKeyDirectory::parse(&ifd),
            Err(GeoTiffError::BadTag(TagId::GeoKeyDirectory))
        ));
    }
}
