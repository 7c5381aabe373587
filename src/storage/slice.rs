use std::io::{Read, Seek, SeekFrom};

use crate::error::Result;
use crate::storage::StorageInput;

/// A bounded view over `[offset, offset + length)` of another input.
///
/// Positions are relative to the start of the slice. Reads stop at the end of
/// the slice, so `read_exact` past it fails with `UnexpectedEof`; seeking past
/// the end fails the same way.
#[derive(Debug)]
pub struct SliceInput {
    inner: Box<dyn StorageInput>,
    offset: u64,
    length: u64,
    position: u64,
}

impl SliceInput {
    /// Create a slice over `inner`, which must be at least `offset + length`
    /// bytes long.
    pub fn new(mut inner: Box<dyn StorageInput>, offset: u64, length: u64) -> Result<Self> {
        let size = inner.size()?;
        if offset.checked_add(length).is_none_or(|end| end > size) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("slice [{offset}, +{length}) exceeds input of {size} bytes"),
            )
            .into());
        }
        inner.seek(SeekFrom::Start(offset))?;
        Ok(SliceInput {
            inner,
            offset,
            length,
            position: 0,
        })
    }
}

impl Read for SliceInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining = self.length - self.position;
        if remaining == 0 {
            return Ok(0);
        }
        let n = (buf.len() as u64).min(remaining) as usize;
        let read = self.inner.read(&mut buf[..n])?;
        self.position += read as u64;
        Ok(read)
    }
}

impl Seek for SliceInput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::End(delta) => self.length.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        match target {
            Some(p) if p <= self.length => {
                self.inner.seek(SeekFrom::Start(self.offset + p))?;
                self.position = p;
                Ok(p)
            }
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "seek past end of slice",
            )),
        }
    }
}

impl StorageInput for SliceInput {
    fn size(&self) -> Result<u64> {
        Ok(self.length)
    }

    fn clone_input(&self) -> Result<Box<dyn StorageInput>> {
        let mut inner = self.inner.clone_input()?;
        inner.seek(SeekFrom::Start(self.offset + self.position))?;
        Ok(Box::new(SliceInput {
            inner,
            offset: self.offset,
            length: self.length,
            position: self.position,
        }))
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}
