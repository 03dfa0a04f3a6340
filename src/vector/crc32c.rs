//! CRC32C (Castagnoli) kernels
//!
//! The scalar table kernel is the reference; the SSE4.2 kernel uses the
//! hardware `crc32` instruction with 8-byte striding. Both produce the
//! wire bit-pattern: seed `0xFFFF_FFFF`, reflected, final XOR.

/// Reflected CRC-32C polynomial.
const POLY: u32 = 0x82F6_3B78;

const TABLE: [u32; 256] = make_table();

const fn make_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0usize;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ POLY } else { crc >> 1 };
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Reference implementation, one table lookup per byte.
#[must_use]
pub(crate) fn crc32c_scalar(bytes: &[u8]) -> u32 {
    let mut crc = !0u32;
    for &b in bytes {
        crc = (crc >> 8) ^ TABLE[((crc ^ u32::from(b)) & 0xFF) as usize];
    }
    !crc
}

/// Hardware kernel striding 8 bytes per instruction.
///
/// The accumulator lives in a u64 whose upper half stays zero; the
/// instruction ignores the upper input bits and produces a 32-bit CRC.
///
/// # Safety
///
/// The caller must have verified SSE4.2 support on the running CPU.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse4.2")]
pub(crate) unsafe fn crc32c_sse42(bytes: &[u8]) -> u32 {
    use core::arch::x86_64::{_mm_crc32_u8, _mm_crc32_u64};

    let mut crc: u64 = u64::from(!0u32);
    let words = bytes.len() / 8;
    let ptr = bytes.as_ptr();
    for i in 0..words {
        // SAFETY: i * 8 + 8 <= bytes.len(), unaligned read is explicit.
        let v = unsafe { ptr.add(i * 8).cast::<u64>().read_unaligned() }.to_le();
        crc = unsafe { _mm_crc32_u64(crc, v) };
    }
    let mut crc32 = crc as u32;
    for &b in &bytes[words * 8..] {
        crc32 = unsafe { _mm_crc32_u8(crc32, b) };
    }
    !crc32
}

#[cfg(test)]
mod tests {
    use super::*;

    // Standard CRC-32C check value for the ASCII digits "123456789".
    const CHECK: u32 = 0xE306_9283;

    #[test]
    fn scalar_matches_check_value() {
        assert_eq!(crc32c_scalar(b"123456789"), CHECK);
    }

    #[test]
    fn scalar_empty_input() {
        assert_eq!(crc32c_scalar(b""), 0);
    }

    #[test]
    fn scalar_known_vectors() {
        // RFC 3720 appendix B.4: 32 zero bytes.
        assert_eq!(crc32c_scalar(&[0u8; 32]), 0x8A91_36AA);
        // 32 bytes of 0xFF.
        assert_eq!(crc32c_scalar(&[0xFFu8; 32]), 0x62A8_AB43);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn hardware_kernel_matches_scalar() {
        if !std::arch::is_x86_feature_detected!("sse4.2") {
            return;
        }
        for len in [0usize, 1, 7, 8, 9, 31, 32, 63, 200, 4096] {
            let data: Vec<u8> = (0..len).map(|i| (i * 131 % 251) as u8).collect();
            // SAFETY: feature presence checked above.
            let hw = unsafe { crc32c_sse42(&data) };
            assert_eq!(hw, crc32c_scalar(&data), "divergence at len {len}");
        }
    }
}
