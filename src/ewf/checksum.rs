//! Adler-32 checksum, as defined by RFC 1950.
//!
//! Every section descriptor, table header, and volume header ends with a
//! trailing 4-byte Adler-32 of the record's own prefix. Neither `flate2` nor
//! any other crate in this workspace exposes a standalone Adler-32 hasher
//! (only the zlib stream as a whole carries one), so it is implemented here
//! directly — it is small and the definition is fixed by the RFC.

const MOD_ADLER: u32 = 65521;

/// Computes the Adler-32 checksum of `data`.
pub fn adler32(data: &[u8]) -> u32 {
    let mut a: u32 = 1;
    let mut b: u32 = 0;

    // Process in blocks to avoid overflowing `b` before the modulo reduction
    // (5552 is the largest n such that 255 * n * (n+1) / 2 + (n+1) * (MOD-1) <= 2^32 - 1).
    for chunk in data.chunks(5552) {
        for &byte in chunk {
            a += byte as u32;
            b += a;
        }
        a %= MOD_ADLER;
        b %= MOD_ADLER;
    }

    (b << 16) | a
}
