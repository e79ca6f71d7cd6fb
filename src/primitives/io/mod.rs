//! Positional file I/O behind a narrow trait so the pager can be tested
//! against alternative backends.

use std::fs::{File, OpenOptions};
use std::path::Path;

use crate::types::{Result, UmbraError};

pub trait FileIo: Send + Sync + 'static {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()>;
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()>;
    fn sync_all(&self) -> Result<()>;
    fn len(&self) -> Result<u64>;
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// [`FileIo`] over a standard file using the platform's positional
/// read/write calls. The file handle is shared; offsets are explicit, so
/// no seek state is involved.
pub struct StdFileIo {
    file: File,
}

impl StdFileIo {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(UmbraError::from)?;
        Ok(Self { file })
    }

    pub fn new(file: File) -> Self {
        Self { file }
    }
}

#[cfg(unix)]
impl FileIo for StdFileIo {
    fn read_at(&self, mut off: u64, mut dst: &mut [u8]) -> Result<()> {
        use std::io::ErrorKind;
        use std::os::unix::fs::FileExt;

        while !dst.is_empty() {
            let read = self.file.read_at(dst, off)?;
            if read == 0 {
                return Err(UmbraError::Io(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "read_at reached EOF",
                )));
            }
            let (_, tail) = dst.split_at_mut(read);
            dst = tail;
            off += read as u64;
        }
        Ok(())
    }

    fn write_at(&self, mut off: u64, mut src: &[u8]) -> Result<()> {
        use std::io::ErrorKind;
        use std::os::unix::fs::FileExt;

        while !src.is_empty() {
            let written = self.file.write_at(src, off)?;
            if written == 0 {
                return Err(UmbraError::Io(std::io::Error::new(
                    ErrorKind::WriteZero,
                    "write_at wrote zero bytes",
                )));
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }

    fn sync_all(&self) -> Result<()> {
        self.file.sync_all().map_err(UmbraError::from)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

#[cfg(windows)]
impl FileIo for StdFileIo {
    fn read_at(&self, mut off: u64, mut dst: &mut [u8]) -> Result<()> {
        use std::io::ErrorKind;
        use std::os::windows::fs::FileExt;

        while !dst.is_empty() {
            let read = self.file.seek_read(dst, off)?;
            if read == 0 {
                return Err(UmbraError::Io(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "seek_read reached EOF",
                )));
            }
            let (_, tail) = dst.split_at_mut(read);
            dst = tail;
            off += read as u64;
        }
        Ok(())
    }

    fn write_at(&self, mut off: u64, mut src: &[u8]) -> Result<()> {
        use std::io::ErrorKind;
        use std::os::windows::fs::FileExt;

        while !src.is_empty() {
            let written = self.file.seek_write(src, off)?;
            if written == 0 {
                return Err(UmbraError::Io(std::io::Error::new(
                    ErrorKind::WriteZero,
                    "seek_write wrote zero bytes",
                )));
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }

    fn sync_all(&self) -> Result<()> {
        self.file.sync_all().map_err(UmbraError::from)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_positional_writes() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let io = StdFileIo::open(tmp.path()).unwrap();
        io.write_at(10, b"hello").unwrap();
        let mut buf = [0u8; 5];
        io.read_at(10, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        assert_eq!(io.len().unwrap(), 15);
    }

    #[test]
    fn read_past_eof_is_an_error() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let io = StdFileIo::open(tmp.path()).unwrap();
        let mut buf = [0u8; 4];
        assert!(io.read_at(0, &mut buf).is_err());
    }
}
