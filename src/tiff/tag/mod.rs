// refs
// https://web.archive.org/web/20220119170528/http://www.exif.org/Exif2-2.PDF
// https://www.awaresystems.be/imaging/tiff/bigtiff.html

use super::Endian;
use num_enum::{FromPrimitive, IntoPrimitive};
use num_traits::NumCast;
use std::fmt::Display;

mod data;
mod id;

pub use data::TagData;
pub use id::TagId;

#[derive(Clone, Debug, PartialEq)]
pub struct Tag {
    pub code: u16,
    pub datatype: TagType,
    pub count: usize,
    pub data: Vec<u8>,
    pub endian: Endian,
}

impl Tag {
    pub fn new(id: TagId, data: TagData, endian: Endian) -> Self {
        Self {
            code: id.into(),
            datatype: data.tag_type(),
            count: data.len(),
            data: data.bytes(endian),
            endian,
        }
    }

    pub fn id(&self) -> Option<TagId> {
        TagId::try_from(self.code).ok()
    }

    /// Decode every element, coercing to `T`.
    ///
    /// Returns None for non-numeric datatypes or values that do not fit `T`.
    pub fn values<T: NumCast>(&self) -> Option<Vec<T>> {
        let e = self.endian;
        let bytes = self.data.as_slice();
        match self.datatype {
            TagType::Byte | TagType::Undefined => bytes.iter().map(|v| T::from(*v)).collect(),
            TagType::SByte => bytes.iter().map(|v| T::from(*v as i8)).collect(),
            TagType::Short => e.decode_all_to_primative::<2, u16, T>(bytes),
            TagType::SShort => e.decode_all_to_primative::<2, i16, T>(bytes),
            TagType::Long | TagType::Ifd => e.decode_all_to_primative::<4, u32, T>(bytes),
            TagType::SLong => e.decode_all_to_primative::<4, i32, T>(bytes),
            TagType::Float => e.decode_all_to_primative::<4, f32, T>(bytes),
            TagType::Double => e.decode_all_to_primative::<8, f64, T>(bytes),
            TagType::Long8 | TagType::Ifd8 => e.decode_all_to_primative::<8, u64, T>(bytes),
            TagType::SLong8 => e.decode_all_to_primative::<8, i64, T>(bytes),
            TagType::Rational => {
                let parts = e.decode_all::<4, u32>(bytes)?;
                parts
                    .chunks_exact(2)
                    .map(|c| T::from(c[0] as f64 / c[1] as f64))
                    .collect()
            }
            TagType::SRational => {
                let parts = e.decode_all::<4, i32>(bytes)?;
                parts
                    .chunks_exact(2)
                    .map(|c| T::from(c[0] as f64 / c[1] as f64))
                    .collect()
            }
            TagType::Ascii | TagType::Unknown => None,
        }
    }

    pub fn value<T: NumCast + Copy>(&self) -> Option<T> {
        self.values().and_then(|v| v.first().copied())
    }

    pub fn as_string(&self) -> Option<String> {
        match self.datatype {
            TagType::Ascii => String::from_utf8(self.data.clone())
                .ok()
                .map(|s| s.trim_end_matches('\0').to_string()),
            _ => None,
        }
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let id_string = match self.id() {
            Some(id) => format!("{id:?}"),
            None => format!("Unknown({})", self.code),
        };
        let mut value_string = match self.as_string() {
            Some(s) => s.replace('\n', "\\n"),
            None => match self.values::<f64>() {
                Some(v) if v.len() == 1 => format!("{}", v[0]),
                Some(v) => format!("{v:?}"),
                None => "Undefined".to_string(),
            },
        };
        if value_string.len() > 100 {
            value_string = format!("{}...", &value_string[..98]);
        }
        write!(
            f,
            "{} {:?}[{}]: {}",
            id_string, self.datatype, self.count, value_string
        )
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, IntoPrimitive, FromPrimitive)]
#[repr(u16)]
pub enum TagType {
    Byte = 1,
    Ascii = 2,
    Short = 3,
    Long = 4,
    Rational = 5,
    SByte = 6,
    Undefined = 7,
    SShort = 8,
    SLong = 9,
    SRational = 10,
    Float = 11,
    Double = 12,
    Ifd = 13,
    Long8 = 16,
    SLong8 = 17,
    Ifd8 = 18,

    #[num_enum(default)]
    Unknown = 0xFFFF,
}

impl TagType {
    pub fn size_in_bytes(&self) -> usize {
        match self {
            TagType::Byte => 1,
            TagType::Ascii => 1,
            TagType::Short => 2,
            TagType::Long => 4,
            TagType::Rational => 8,
            TagType::SByte => 1,
            TagType::Undefined => 1,
            TagType::SShort => 2,
            TagType::SLong => 4,
            TagType::SRational => 8,
            TagType::Float => 4,
            TagType::Double => 8,
            TagType::Ifd => 4,
            TagType::Long8 => 8,
            TagType::SLong8 => 8,
            TagType::Ifd8 => 8,

            TagType::Unknown => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_and_coerces_values() {
        let tag = Tag::new(TagId::TileOffsets, TagData::Long8(vec![8, 4096]), Endian::Big);
        assert_eq!(tag.datatype, TagType::Long8);
        assert_eq!(tag.count, 2);
        assert_eq!(tag.values::<u64>(), Some(vec![8, 4096]));
        assert_eq!(tag.value::<u32>(), Some(8));
    }

    #[test]
    fn ascii_strips_terminator() {
        let tag = Tag::new(TagId::GDALNoData, TagData::from_string("-9999"), Endian::Little);
        assert_eq!(tag.count, 6);
        assert_eq!(tag.as_string().as_deref(), Some("-9999"));
        assert_eq!(tag.values::<f64>(), None);
    }
}
