//! # Label Area Transport
//!
//! The bus never touches DIMM hardware. Each DIMM is attached with a handle
//! implementing [`LabelAreaIo`], a synchronous byte-range read/write service
//! over that DIMM's configuration area. Retries and timeouts are the
//! implementor's concern; every error is propagated unchanged.

use crate::LabelIoError;
use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

/// Byte-range access to one DIMM's label area.
pub trait LabelAreaIo {
    /// Size of the label area in bytes.
    fn config_size(&self) -> u64;

    /// Fill `buf` from `offset`.
    ///
    /// # Errors
    /// Transport failure or an out-of-range access.
    fn read_bytes(&self, offset: u64, buf: &mut [u8]) -> Result<(), LabelIoError>;

    /// Persist `bytes` at `offset`. Returns only once the write is durable.
    ///
    /// # Errors
    /// Transport failure or an out-of-range access.
    fn write_bytes(&mut self, offset: u64, bytes: &[u8]) -> Result<(), LabelIoError>;
}

impl<T: LabelAreaIo + ?Sized> LabelAreaIo for Box<T> {
    fn config_size(&self) -> u64 {
        (**self).config_size()
    }

    fn read_bytes(&self, offset: u64, buf: &mut [u8]) -> Result<(), LabelIoError> {
        (**self).read_bytes(offset, buf)
    }

    fn write_bytes(&mut self, offset: u64, bytes: &[u8]) -> Result<(), LabelIoError> {
        (**self).write_bytes(offset, bytes)
    }
}

/// A label area held in memory.
///
/// Serves host-side image tooling and emulated DIMMs. Writes can be made to
/// fail after a given count with [`fail_after`](Self::fail_after).
#[derive(Debug, Clone, Default)]
pub struct MemoryLabelArea {
    data: Vec<u8>,
    writes: usize,
    fail_after: Option<usize>,
}

impl MemoryLabelArea {
    /// A zero-filled (unformatted) area of `config_size` bytes.
    #[must_use]
    pub fn new(config_size: usize) -> Self {
        Self::from_bytes(vec![0; config_size])
    }

    #[must_use]
    pub const fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            data,
            writes: 0,
            fail_after: None,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Raw access, bypassing write accounting and failure injection.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Let the next `writes` writes succeed and fail every one after that
    /// with an I/O error.
    pub fn fail_after(&mut self, writes: usize) {
        self.fail_after = Some(self.writes + writes);
    }

    pub const fn clear_failure(&mut self) {
        self.fail_after = None;
    }

    /// Number of successful writes so far.
    #[must_use]
    pub const fn writes(&self) -> usize {
        self.writes
    }

    fn range(&self, offset: u64, len: usize) -> Result<core::ops::Range<usize>, LabelIoError> {
        let out_of_range = LabelIoError::OutOfRange {
            offset,
            len,
            size: self.data.len() as u64,
        };
        let start = usize::try_from(offset).map_err(|_| out_of_range)?;
        let end = start.checked_add(len).ok_or(out_of_range)?;
        if end > self.data.len() {
            return Err(out_of_range);
        }
        Ok(start..end)
    }
}

impl LabelAreaIo for MemoryLabelArea {
    fn config_size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_bytes(&self, offset: u64, buf: &mut [u8]) -> Result<(), LabelIoError> {
        let range = self.range(offset, buf.len())?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write_bytes(&mut self, offset: u64, bytes: &[u8]) -> Result<(), LabelIoError> {
        if self.fail_after.is_some_and(|limit| self.writes >= limit) {
            return Err(LabelIoError::Device(EIO));
        }
        let range = self.range(offset, bytes.len())?;
        self.data[range].copy_from_slice(bytes);
        self.writes += 1;
        Ok(())
    }
}

const EIO: i32 = 5;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_back_writes() {
        let mut area = MemoryLabelArea::new(64);
        area.write_bytes(8, &[1, 2, 3]).unwrap();
        let mut buf = [0u8; 4];
        area.read_bytes(7, &mut buf).unwrap();
        assert_eq!(buf, [0, 1, 2, 3]);
        assert_eq!(area.writes(), 1);
    }

    #[test]
    fn out_of_range_is_rejected() {
        let mut area = MemoryLabelArea::new(16);
        assert!(matches!(
            area.write_bytes(15, &[0, 0]),
            Err(LabelIoError::OutOfRange { offset: 15, .. })
        ));
        let mut buf = [0u8; 1];
        assert!(area.read_bytes(u64::MAX, &mut buf).is_err());
    }

    #[test]
    fn injected_failure_leaves_bytes_untouched() {
        let mut area = MemoryLabelArea::new(16);
        area.fail_after(1);
        area.write_bytes(0, &[0xAA]).unwrap();
        assert_eq!(
            area.write_bytes(1, &[0xBB]),
            Err(LabelIoError::Device(EIO))
        );
        assert_eq!(&area.as_bytes()[..2], &[0xAA, 0x00]);
        area.clear_failure();
        area.write_bytes(1, &[0xBB]).unwrap();
        assert_eq!(area.writes(), 2);
    }
}
