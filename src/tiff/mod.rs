use std::fmt::Display;
use std::io::{self, Read, Seek};

mod endian;
mod error;
mod ifd;
mod tag;

pub use endian::Endian;
pub use error::TiffError;
pub use ifd::Ifd;
pub use tag::{Tag, TagData, TagId, TagType};

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Variant {
    Normal,
    Big,
}

impl Variant {
    fn read_offset<R: Read>(&self, endian: Endian, stream: &mut R) -> io::Result<u64> {
        match self {
            Variant::Normal => endian.read::<4, u32>(stream).map(|v| v as u64),
            Variant::Big => endian.read::<8, u64>(stream),
        }
    }

    fn encode_offset(&self, endian: Endian, value: u64) -> Vec<u8> {
        match self {
            Variant::Normal => endian.encode::<4, u32>(value as u32).to_vec(),
            Variant::Big => endian.encode::<8, u64>(value).to_vec(),
        }
    }

    pub const fn offset_bytesize(&self) -> usize {
        match self {
            Variant::Normal => 4,
            Variant::Big => 8,
        }
    }

    pub const fn header_bytesize(&self) -> usize {
        match self {
            Variant::Normal => 8,
            Variant::Big => 16,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Tiff {
    pub endian: Endian,
    pub variant: Variant,
    pub ifds: Vec<Ifd>,
}

impl Tiff {
    pub fn new(endian: Endian, variant: Variant) -> Self {
        Self {
            endian,
            variant,
            ifds: vec![],
        }
    }

    pub fn open<R: Read + Seek>(stream: &mut R) -> Result<Self, TiffError> {
        // TIFF Header
        let mut buf = [0; 4];
        stream.read_exact(&mut buf)?;

        let endian = match &buf[..2] {
            b"II" => Endian::Little,
            b"MM" => Endian::Big,
            _ => return Err(TiffError::BadMagicBytes),
        };

        let variant = match &buf[2..4] {
            b"\0*" | b"*\0" => Variant::Normal,
            b"\0+" | b"+\0" => Variant::Big,
            _ => return Err(TiffError::BadMagicBytes),
        };

        if Variant::Big == variant {
            // BigTIFFs have 4 extra bytes in the header
            let _offset_bytesize = endian.read::<2, u16>(stream)?; // 0x0008
            let _ = endian.read::<2, u16>(stream)?; // 0x0000
        }

        // IFDs
        let mut ifds = vec![];
        let mut ifd_offset = variant.read_offset(endian, stream)?;
        while ifd_offset != 0 {
            let (ifd, next_offset) = Ifd::parse(stream, ifd_offset, endian, variant)?;
            ifd_offset = next_offset;
            ifds.push(ifd);
        }

        Ok(Self {
            endian,
            variant,
            ifds,
        })
    }

    pub fn ifd0(&self) -> Result<&Ifd, TiffError> {
        self.ifds.first().ok_or(TiffError::NoIfd)
    }

    /// File header pointing at the first IFD.
    pub fn header_bytes(&self, first_ifd_offset: u64) -> Vec<u8> {
        let endian = self.endian;
        let mut bytes = endian.magic().to_vec();
        match self.variant {
            Variant::Normal => {
                bytes.extend(endian.encode::<2, u16>(42));
            }
            Variant::Big => {
                bytes.extend(endian.encode::<2, u16>(43));
                bytes.extend(endian.encode::<2, u16>(8));
                bytes.extend(endian.encode::<2, u16>(0));
            }
        }
        bytes.extend(self.variant.encode_offset(endian, first_ifd_offset));
        bytes
    }

    /// Header plus every IFD, chained in order, starting right after the header.
    pub fn encode_directories(&self) -> Vec<u8> {
        let mut offsets = vec![];
        let mut cursor = self.variant.header_bytesize() as u64;
        for ifd in self.ifds.iter() {
            offsets.push(cursor);
            cursor += ifd.encoded_size(self.variant) as u64;
        }

        let mut bytes = self.header_bytes(offsets.first().copied().unwrap_or(0));
        for (i, ifd) in self.ifds.iter().enumerate() {
            let next = offsets.get(i + 1).copied().unwrap_or(0);
            bytes.extend(ifd.encode(offsets[i], next, self.endian, self.variant));
        }
        bytes
    }

    /// Size of `encode_directories` output.
    pub fn directories_size(&self) -> usize {
        self.variant.header_bytesize()
            + self
                .ifds
                .iter()
                .map(|ifd| ifd.encoded_size(self.variant))
                .sum::<usize>()
    }
}

impl Display for Tiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, ifd) in self.ifds.iter().enumerate() {
            writeln!(f, "IFD {i}:")?;
            for tag in ifd.0.iter() {
                writeln!(f, "\t{}", tag)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn rejects_bad_magic() {
        let bytes = b"XX*\0\0\0\0\0".to_vec();
        assert!(matches!(
            Tiff::open(&mut Cursor::new(bytes)),
            Err(TiffError::BadMagicBytes)
        ));
    }

    #[test]
    fn chains_directories() {
        for variant in [Variant::Normal, Variant::Big] {
            let endian = Endian::Big;
            let mut tiff = Tiff::new(endian, variant);
            for width in [512u32, 256, 128] {
                let mut ifd = Ifd::default();
                ifd.set_tag(TagId::ImageWidth, TagData::from_long(width), endian);
                ifd.set_tag(TagId::Software, TagData::from_string("gnatsgo"), endian);
                tiff.ifds.push(ifd);
            }
            let bytes = tiff.encode_directories();
            assert_eq!(bytes.len(), tiff.directories_size());

            let parsed = Tiff::open(&mut Cursor::new(bytes)).unwrap();
            assert_eq!(parsed.variant, variant);
            assert_eq!(parsed.endian, endian);
            let widths: Vec<u32> = parsed
                .ifds
                .iter()
                .map(|ifd| ifd.get_tag_value(TagId::ImageWidth).unwrap())
                .collect();
            assert_eq!(widths, vec![512, 256, 128]);
            assert_eq!(
                parsed.ifd0().unwrap().get_tag(TagId::Software).unwrap().as_string().as_deref(),
                Some("gnatsgo")
            );
        }
    }
}
