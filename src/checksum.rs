//! 16-bit byte-sum checksums.
//!
//! Two variants exist and they are not interchangeable: single records and versioned blocks store
//! the plain sum, chunk headers store the inverted sum. Reading a record with the wrong variant is
//! indistinguishable from corruption.
//!
//! The sum detects any single changed byte. It does not detect reordered bytes, nor several
//! changes whose deltas cancel out modulo 65536.

/// Wrapping sum of all bytes.
pub fn byte_sum(data: &[u8]) -> u16 {
    data.iter()
        .fold(0u16, |sum, &byte| sum.wrapping_add(u16::from(byte)))
}

/// Wrapping sum of all bytes, inverted. Used by chunk headers.
pub fn inverted_byte_sum(data: &[u8]) -> u16 {
    byte_sum(data) ^ 0xFFFF
}
