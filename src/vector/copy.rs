//! Dispatched bulk copy kernels
//!
//! Large-buffer copies with forward progress; the destination length must
//! equal the source length (mismatch is a programming error). Small
//! buffers bypass the vector paths entirely.

/// Fallback for all platforms and short lengths.
pub(crate) fn copy_scalar(dst: &mut [u8], src: &[u8]) {
    dst.copy_from_slice(src);
}

/// 32-byte striding with AVX2 loads/stores; remainder handled bytewise.
///
/// # Safety
///
/// The caller must have verified AVX2 support and `dst.len() == src.len()`.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
pub(crate) unsafe fn copy_avx2(dst: &mut [u8], src: &[u8]) {
    use core::arch::x86_64::{__m256i, _mm256_loadu_si256, _mm256_storeu_si256};

    let len = src.len();
    let blocks = len / 32;
    let sp = src.as_ptr();
    let dp = dst.as_mut_ptr();
    for i in 0..blocks {
        // SAFETY: i * 32 + 32 <= len for both buffers; unaligned ops.
        unsafe {
            let v = _mm256_loadu_si256(sp.add(i * 32).cast::<__m256i>());
            _mm256_storeu_si256(dp.add(i * 32).cast::<__m256i>(), v);
        }
    }
    let done = blocks * 32;
    // SAFETY: the remainder ranges are in-bounds and non-overlapping.
    unsafe {
        std::ptr::copy_nonoverlapping(sp.add(done), dp.add(done), len - done);
    }
}

/// 64-byte striding under the AVX-512F feature gate.
///
/// The body is a plain block copy; with the feature enabled on the
/// function, codegen widens it to zmm moves. Eligible only on threads
/// placed on performance cores (hybrid-CPU policy).
///
/// # Safety
///
/// The caller must have verified AVX-512F support and
/// `dst.len() == src.len()`.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx512f")]
pub(crate) unsafe fn copy_avx512(dst: &mut [u8], src: &[u8]) {
    // SAFETY: lengths are equal per contract and buffers cannot overlap
    // (distinct &mut and & borrows).
    unsafe {
        std::ptr::copy_nonoverlapping(src.as_ptr(), dst.as_mut_ptr(), src.len());
    }
}
