use super::TagType;
use crate::tiff::Endian;

/// Typed tag payload used when building IFDs for writing.
#[derive(Clone, Debug, PartialEq)]
pub enum TagData {
    Byte(Vec<u8>),
    Ascii(Vec<u8>),
    Short(Vec<u16>),
    Long(Vec<u32>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    Long8(Vec<u64>),
}

impl TagData {
    /// NUL-terminated ASCII, as TIFF readers expect.
    pub fn from_string(s: &str) -> Self {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        Self::Ascii(bytes)
    }

    pub fn from_short(v: u16) -> Self {
        Self::Short(vec![v])
    }

    pub fn from_long(v: u32) -> Self {
        Self::Long(vec![v])
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Byte(vec) => vec.len(),
            Self::Ascii(vec) => vec.len(),
            Self::Short(vec) => vec.len(),
            Self::Long(vec) => vec.len(),
            Self::Float(vec) => vec.len(),
            Self::Double(vec) => vec.len(),
            Self::Long8(vec) => vec.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tag_type(&self) -> TagType {
        match self {
            Self::Byte(_) => TagType::Byte,
            Self::Ascii(_) => TagType::Ascii,
            Self::Short(_) => TagType::Short,
            Self::Long(_) => TagType::Long,
            Self::Float(_) => TagType::Float,
            Self::Double(_) => TagType::Double,
            Self::Long8(_) => TagType::Long8,
        }
    }

    pub fn bytes(&self, endian: Endian) -> Vec<u8> {
        match self {
            Self::Byte(vec) => vec.clone(),
            Self::Ascii(vec) => vec.clone(),
            Self::Short(vec) => endian.encode_all::<2, u16>(vec),
            Self::Long(vec) => endian.encode_all::<4, u32>(vec),
            Self::Float(vec) => endian.encode_all::<4, f32>(vec),
            Self::Double(vec) => endian.encode_all::<8, f64>(vec),
            Self::Long8(vec) => endian.encode_all::<8, u64>(vec),
        }
    }
}
