// Stateless range reads
//   ReadRange is a superset of Read + Seek where self is immutable, so one
//   open source can serve block reads from several workers.

use std::io::{Error, ErrorKind, Read, Result, Seek, SeekFrom};
use std::sync::Mutex;

pub trait ReadRange {
    /// Read bytes from a specific offset
    ///
    /// Required methods
    ///   fn read_range(&self, start: u64, buf: &mut [u8]) -> Result<usize>;
    ///
    /// Provided methods
    ///   fn read_range_exact(&self, start: u64, buf: &mut [u8]) -> Result<()> { ... }
    ///   fn read_range_to_vec(&self, start: u64, end: u64) -> Result<Vec<u8>> { ... }
    fn read_range(&self, start: u64, buf: &mut [u8]) -> Result<usize>;

    fn read_range_exact(&self, start: u64, buf: &mut [u8]) -> Result<()> {
        let n = buf.len();
        let mut filled = 0;
        while filled < n {
            match self.read_range(start + filled as u64, &mut buf[filled..])? {
                0 => {
                    return Err(Error::new(
                        ErrorKind::UnexpectedEof,
                        format!("Failed to completely fill buffer: {filled} < {n}"),
                    ))
                }
                bytes_read => filled += bytes_read,
            }
        }
        Ok(())
    }

    fn read_range_to_vec(&self, start: u64, end: u64) -> Result<Vec<u8>> {
        let n = end.saturating_sub(start) as usize;
        let mut buf = vec![0; n];
        self.read_range_exact(start, &mut buf)?;
        Ok(buf)
    }
}

impl<R: Read + Seek> ReadRange for Mutex<R> {
    fn read_range(&self, start: u64, buf: &mut [u8]) -> Result<usize> {
        let mut locked_self = self.lock().map_err(|e| Error::other(format!("{e:?}")))?;
        locked_self.seek(SeekFrom::Start(start))?;
        locked_self.read(buf)
    }
}

#[cfg(unix)]
impl ReadRange for std::fs::File {
    fn read_range(&self, start: u64, buf: &mut [u8]) -> Result<usize> {
        use std::os::unix::fs::FileExt;
        self.read_at(buf, start)
    }
}

#[cfg(windows)]
impl ReadRange for std::fs::File {
    fn read_range(&self, start: u64, buf: &mut [u8]) -> Result<usize> {
        use std::os::windows::fs::FileExt;
        self.seek_read(buf, start)
    }
}

impl ReadRange for [u8] {
    fn read_range(&self, start: u64, buf: &mut [u8]) -> Result<usize> {
        let start = (start as usize).min(self.len());
        let n = buf.len().min(self.len() - start);
        buf[..n].copy_from_slice(&self[start..start + n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;
    use std::io::{Cursor, Write};

    #[test]
    fn exact_reads_and_eof() {
        let source = Mutex::new(Cursor::new((0u8..32).collect::<Vec<_>>()));
        assert_eq!(source.read_range_to_vec(4, 8).unwrap(), vec![4, 5, 6, 7]);
        let err = source.read_range_to_vec(30, 40).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);

        let bytes: &[u8] = &[9, 8, 7];
        assert_eq!(bytes.read_range_to_vec(1, 3).unwrap(), vec![8, 7]);
    }

    #[test]
    fn parallel_file_reads_see_their_own_ranges() {
        let bytes: Vec<u8> = (0..64 * 1024).map(|i| (i / 1024) as u8).collect();
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&bytes).unwrap();
        let file = std::fs::File::open(tmp.path()).unwrap();

        let blocks: Vec<Vec<u8>> = (0..64u64)
            .into_par_iter()
            .map(|block| file.read_range_to_vec(block * 1024, (block + 1) * 1024).unwrap())
            .collect();
        for (block, data) in blocks.iter().enumerate() {
            assert!(data.iter().all(|b| *b as usize == block), "block {block}");
        }
    }
}
