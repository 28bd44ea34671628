use eio::{FromBytes, ReadExt, ToBytes};
use num_traits::{cast::NumCast, ToPrimitive};
use std::io::{Read, Result};
use std::mem;

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Endian {
    Big,
    Little,
}

impl Endian {
    pub fn magic(&self) -> &'static [u8; 2] {
        match self {
            Endian::Big => b"MM",
            Endian::Little => b"II",
        }
    }

    pub fn read<const N: usize, T: FromBytes<N>>(&self, stream: &mut impl Read) -> Result<T> {
        let mut buf = [0u8; N];
        stream.read_exact(&mut buf)?;
        self.decode(buf)
    }

    pub fn decode<const N: usize, T: FromBytes<N>>(&self, bytes: [u8; N]) -> Result<T> {
        match self {
            Endian::Big => bytes.as_slice().read_be(),
            Endian::Little => bytes.as_slice().read_le(),
        }
    }

    pub fn decode_all<const N: usize, T: FromBytes<N>>(&self, bytes: &[u8]) -> Option<Vec<T>> {
        bytes
            .chunks_exact(mem::size_of::<T>())
            .map(|chunk| {
                chunk
                    .try_into()
                    .ok()
                    .and_then(|arr| self.decode::<N, T>(arr).ok())
            })
            .collect()
    }

    pub fn decode_all_to_primative<const N: usize, A: FromBytes<N> + ToPrimitive, T: NumCast>(
        &self,
        bytes: &[u8],
    ) -> Option<Vec<T>> {
        self.decode_all::<N, A>(bytes)?
            .into_iter()
            .map(|v| T::from(v))
            .collect()
    }

    pub fn encode<const N: usize, T: ToBytes<N>>(&self, value: T) -> [u8; N] {
        match self {
            Endian::Big => value.to_be_bytes(),
            Endian::Little => value.to_le_bytes(),
        }
    }

    pub fn encode_all<const N: usize, T: ToBytes<N> + Copy>(&self, values: &[T]) -> Vec<u8> {
        values.iter().flat_map(|v| self.encode(*v)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_both_byte_orders() {
        for endian in [Endian::Big, Endian::Little] {
            let bytes = endian.encode_all::<2, u16>(&[1, 513, 65535]);
            let values = endian.decode_all::<2, u16>(&bytes).unwrap();
            assert_eq!(values, vec![1, 513, 65535]);
        }
        assert_eq!(Endian::Big.encode::<2, u16>(0x0102), [1, 2]);
        assert_eq!(Endian::Little.encode::<2, u16>(0x0102), [2, 1]);
    }

    #[test]
    fn widens_to_primitive() {
        let bytes = Endian::Little.encode_all::<4, u32>(&[7, 9]);
        let values: Vec<u64> = Endian::Little
            .decode_all_to_primative::<4, u32, u64>(&bytes)
            .unwrap();
        assert_eq!(values, vec![7, 9]);
    }
}
