use byteorder::{BigEndian, ByteOrder};

use crate::{Result, ZworldError};

/// Bounds-checked big-endian view over a mutable byte region.
///
/// Every header, table and file the tool touches is addressed through one of
/// these, so an offset that runs past the end of the image turns into
/// `ZworldError::OutOfBounds` instead of a panic.
pub struct ByteBuffer<'a> {
    data: &'a mut [u8],
}

impl<'a> ByteBuffer<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        ByteBuffer { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        self.data
    }

    fn check(&self, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(()),
            _ => Err(ZworldError::OutOfBounds {
                offset,
                len,
                size: self.data.len(),
            }),
        }
    }

    pub fn bytes(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.check(offset, len)?;
        Ok(&self.data[offset..offset + len])
    }

    pub fn bytes_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8]> {
        self.check(offset, len)?;
        Ok(&mut self.data[offset..offset + len])
    }

    pub fn read_u8(&self, offset: usize) -> Result<u8> {
        self.check(offset, 1)?;
        Ok(self.data[offset])
    }

    pub fn read_u16(&self, offset: usize) -> Result<u16> {
        Ok(BigEndian::read_u16(self.bytes(offset, 2)?))
    }

    pub fn read_u32(&self, offset: usize) -> Result<u32> {
        Ok(BigEndian::read_u32(self.bytes(offset, 4)?))
    }

    pub fn write_u8(&mut self, offset: usize, value: u8) -> Result<()> {
        self.check(offset, 1)?;
        self.data[offset] = value;
        Ok(())
    }

    pub fn write_u16(&mut self, offset: usize, value: u16) -> Result<()> {
        BigEndian::write_u16(self.bytes_mut(offset, 2)?, value);
        Ok(())
    }

    pub fn write_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        BigEndian::write_u32(self.bytes_mut(offset, 4)?, value);
        Ok(())
    }

    pub fn write_bytes(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        self.bytes_mut(offset, src.len())?.copy_from_slice(src);
        Ok(())
    }

    pub fn fill(&mut self, offset: usize, len: usize, value: u8) -> Result<()> {
        self.bytes_mut(offset, len)?.fill(value);
        Ok(())
    }

    /// Copy `len` bytes from `src` to `dest`; the ranges may overlap.
    pub fn move_within(&mut self, src: usize, len: usize, dest: usize) -> Result<()> {
        self.check(src, len)?;
        self.check(dest, len)?;
        self.data.copy_within(src..src + len, dest);
        Ok(())
    }
}

/// A sub-file living at `base` inside a larger buffer, with a logical size.
///
/// Addresses found inside a header are relative to the start of the file
/// that contains them, so the walker resolves them through the span rather
/// than against the whole image. The size is logical: a patch may shrink a
/// file without the underlying image changing length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSpan {
    pub base: usize,
    pub size: usize,
}

impl FileSpan {
    pub fn new(base: usize, size: usize) -> Self {
        FileSpan { base, size }
    }

    pub fn end(&self) -> usize {
        self.base + self.size
    }

    /// Absolute offset of `len` bytes at file-relative `offset`, provided the
    /// whole range lies inside the file.
    pub fn locate(&self, offset: usize, len: usize) -> Result<usize> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(self.base + offset),
            _ => Err(ZworldError::OutOfBounds {
                offset,
                len,
                size: self.size,
            }),
        }
    }
}
