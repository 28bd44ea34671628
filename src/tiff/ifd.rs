use super::{Endian, Tag, TagData, TagId, TagType, TiffError, Variant};
use num_traits::NumCast;
use std::io::{self, Read, Seek, SeekFrom};

#[derive(Clone, Debug, Default)]
pub struct Ifd(pub Vec<Tag>);

impl Ifd {
    pub fn parse<R: Read + Seek>(
        stream: &mut R,
        offset: u64,
        endian: Endian,
        variant: Variant,
    ) -> io::Result<(Ifd, u64)> {
        // IFD starts at offset
        stream.seek(SeekFrom::Start(offset))?;

        // IFD header is just the number of tags
        let tag_count = match variant {
            Variant::Normal => endian.read::<2, u16>(stream)? as u64,
            Variant::Big => endian.read::<8, u64>(stream)?,
        };

        let mut tags = Vec::with_capacity(tag_count as usize);
        for _ in 0..tag_count {
            let code = endian.read::<2, u16>(stream)?;
            let datatype: TagType = endian.read::<2, u16>(stream)?.into();
            let count = variant.read_offset(endian, stream)? as usize;

            let data_size = count * datatype.size_in_bytes();
            let offset_size = variant.offset_bytesize();

            let data = if data_size > offset_size {
                let data_offset = variant.read_offset(endian, stream)?;
                let pos = stream.stream_position()?;
                let mut data = vec![0; data_size];
                stream.seek(SeekFrom::Start(data_offset))?;
                stream.read_exact(&mut data)?;
                stream.seek(SeekFrom::Start(pos))?;
                data
            } else {
                let mut data = vec![0; offset_size];
                stream.read_exact(&mut data)?;
                data.truncate(data_size);
                data
            };

            tags.push(Tag {
                code,
                datatype,
                count,
                data,
                endian,
            });
        }

        let next_ifd_offset = variant.read_offset(endian, stream)?;
        Ok((Ifd(tags), next_ifd_offset))
    }

    pub fn get_tag_by_code(&self, code: u16) -> Option<&Tag> {
        self.0.iter().find(|tag| tag.code == code)
    }

    pub fn get_tag(&self, id: TagId) -> Result<&Tag, TiffError> {
        self.get_tag_by_code(id.into())
            .ok_or(TiffError::MissingTag(id))
    }

    pub fn get_tag_values<T: NumCast>(&self, id: TagId) -> Result<Vec<T>, TiffError> {
        self.get_tag(id)?.values().ok_or(TiffError::BadTag(id))
    }

    pub fn get_tag_value<T: NumCast + Copy>(&self, id: TagId) -> Result<T, TiffError> {
        self.get_tag(id)?.value().ok_or(TiffError::BadTag(id))
    }

    /// Insert or replace a tag, keeping entries sorted by code.
    pub fn set_tag(&mut self, id: TagId, data: TagData, endian: Endian) {
        let tag = Tag::new(id, data, endian);
        match self.0.binary_search_by_key(&tag.code, |t| t.code) {
            Ok(index) => self.0[index] = tag,
            Err(index) => self.0.insert(index, tag),
        }
    }

    pub fn remove_tag(&mut self, id: TagId) -> Option<Tag> {
        let code: u16 = id.into();
        let index = self.0.iter().position(|t| t.code == code)?;
        Some(self.0.remove(index))
    }

    fn entry_table_size(&self, variant: Variant) -> usize {
        let (count_size, entry_size) = match variant {
            Variant::Normal => (2, 12),
            Variant::Big => (8, 20),
        };
        count_size + self.0.len() * entry_size + variant.offset_bytesize()
    }

    /// Bytes taken by this IFD including out-of-line tag data.
    ///
    /// Depends only on tag types and counts, never on values.
    pub fn encoded_size(&self, variant: Variant) -> usize {
        let offset_size = variant.offset_bytesize();
        self.entry_table_size(variant)
            + self
                .0
                .iter()
                .filter(|tag| tag.data.len() > offset_size)
                .map(|tag| word_aligned(tag.data.len()))
                .sum::<usize>()
    }

    /// Serialize as it will sit at `offset` in the file.
    pub fn encode(&self, offset: u64, next_ifd_offset: u64, endian: Endian, variant: Variant) -> Vec<u8> {
        let offset_size = variant.offset_bytesize();
        let mut table = Vec::with_capacity(self.entry_table_size(variant));
        let mut extra = vec![];
        let extra_start = offset + self.entry_table_size(variant) as u64;

        match variant {
            Variant::Normal => table.extend(endian.encode::<2, u16>(self.0.len() as u16)),
            Variant::Big => table.extend(endian.encode::<8, u64>(self.0.len() as u64)),
        }

        for tag in self.0.iter() {
            table.extend(endian.encode::<2, u16>(tag.code));
            table.extend(endian.encode::<2, u16>(tag.datatype.into()));
            table.extend(variant.encode_offset(endian, tag.count as u64));
            if tag.data.len() > offset_size {
                let data_offset = extra_start + extra.len() as u64;
                table.extend(variant.encode_offset(endian, data_offset));
                extra.extend(&tag.data);
                extra.resize(word_aligned(extra.len()), 0);
            } else {
                let mut inline = tag.data.clone();
                inline.resize(offset_size, 0);
                table.extend(inline);
            }
        }
        table.extend(variant.encode_offset(endian, next_ifd_offset));

        table.extend(extra);
        table
    }
}

fn word_aligned(n: usize) -> usize {
    n + (n % 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_ifd(endian: Endian) -> Ifd {
        let mut ifd = Ifd::default();
        ifd.set_tag(TagId::ImageHeight, TagData::from_long(300), endian);
        ifd.set_tag(TagId::ImageWidth, TagData::from_long(200), endian);
        ifd.set_tag(TagId::GDALNoData, TagData::from_string("-9999"), endian);
        ifd.set_tag(TagId::ModelPixelScale, TagData::Double(vec![10.0, 10.0, 0.0]), endian);
        ifd
    }

    #[test]
    fn set_tag_keeps_codes_sorted() {
        let endian = Endian::Little;
        let mut ifd = sample_ifd(endian);
        ifd.set_tag(TagId::ImageWidth, TagData::from_long(256), endian);
        let codes: Vec<u16> = ifd.0.iter().map(|t| t.code).collect();
        let mut sorted = codes.clone();
        sorted.sort();
        assert_eq!(codes, sorted);
        assert_eq!(ifd.0.len(), 4);
        assert_eq!(ifd.get_tag_value::<u32>(TagId::ImageWidth).unwrap(), 256);
    }

    #[test]
    fn encodes_then_parses_for_both_variants() {
        for variant in [Variant::Normal, Variant::Big] {
            for endian in [Endian::Big, Endian::Little] {
                let ifd = sample_ifd(endian);
                let offset = 16;
                let bytes = ifd.encode(offset, 0, endian, variant);
                assert_eq!(bytes.len(), ifd.encoded_size(variant));

                let mut file = vec![0u8; offset as usize];
                file.extend(bytes);
                let (parsed, next) =
                    Ifd::parse(&mut Cursor::new(file), offset, endian, variant).unwrap();
                assert_eq!(next, 0);
                assert_eq!(parsed.0, ifd.0);
            }
        }
    }

    #[test]
    fn missing_tag_is_reported() {
        let ifd = sample_ifd(Endian::Little);
        assert!(matches!(
            ifd.get_tag(TagId::TileWidth),
            Err(TiffError::MissingTag(TagId::TileWidth))
        ));
        assert!(matches!(
            ifd.get_tag_value::<u16>(TagId::GDALNoData),
            Err(TiffError::BadTag(TagId::GDALNoData))
        ));
    }
}
