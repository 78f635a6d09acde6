//! Little-endian field accessors.
//!
//! On-media structures are never aliased as native structs; every field is
//! read and written at an explicit byte offset.

use crate::LabelFormatError;

#[inline]
fn field<const N: usize>(buf: &[u8], off: usize) -> Result<[u8; N], LabelFormatError> {
    let end = off.checked_add(N).ok_or(LabelFormatError::TooShort {
        needed: usize::MAX,
        actual: buf.len(),
    })?;
    let s = buf.get(off..end).ok_or(LabelFormatError::TooShort {
        needed: end,
        actual: buf.len(),
    })?;
    let mut out = [0u8; N];
    out.copy_from_slice(s);
    Ok(out)
}

#[inline]
pub(crate) fn read_bytes<const N: usize>(
    buf: &[u8],
    off: usize,
) -> Result<[u8; N], LabelFormatError> {
    field::<N>(buf, off)
}

#[inline]
pub(crate) fn read_u16_le(buf: &[u8], off: usize) -> Result<u16, LabelFormatError> {
    field::<2>(buf, off).map(u16::from_le_bytes)
}

#[inline]
pub(crate) fn read_u32_le(buf: &[u8], off: usize) -> Result<u32, LabelFormatError> {
    field::<4>(buf, off).map(u32::from_le_bytes)
}

#[inline]
pub(crate) fn read_u64_le(buf: &[u8], off: usize) -> Result<u64, LabelFormatError> {
    field::<8>(buf, off).map(u64::from_le_bytes)
}

// Writers index into buffers the encoders sized themselves.

#[inline]
pub(crate) fn write_u16_le(buf: &mut [u8], off: usize, value: u16) {
    buf[off..off + 2].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn write_u32_le(buf: &mut [u8], off: usize, value: u32) {
    buf[off..off + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn write_u64_le(buf: &mut [u8], off: usize, value: u64) {
    buf[off..off + 8].copy_from_slice(&value.to_le_bytes());
}
