/// Fletcher-64 over little-endian 32-bit words.
///
/// A trailing partial word is zero-padded. Both running sums wrap at 32 bits;
/// the result is `hi << 32 | lo`.
#[must_use]
pub fn fletcher64(bytes: &[u8]) -> u64 {
    fletcher64_words(bytes, |_| false)
}

/// Fletcher-64 treating every word for which `zeroed(word_index)` holds as zero.
///
/// Used to checksum a structure as if its embedded checksum field were cleared
/// without copying the buffer.
pub(crate) fn fletcher64_words(bytes: &[u8], zeroed: impl Fn(usize) -> bool) -> u64 {
    let mut lo: u32 = 0;
    let mut hi: u32 = 0;
    for (i, chunk) in bytes.chunks(4).enumerate() {
        let word = if zeroed(i) {
            0
        } else {
            let mut w = [0u8; 4];
            w[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(w)
        };
        lo = lo.wrapping_add(word);
        hi = hi.wrapping_add(lo);
    }
    (u64::from(hi) << 32) | u64::from(lo)
}
