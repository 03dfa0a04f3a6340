//! Runtime-dispatched data-plane primitives
//!
//! Checksum, hash, copy, and batch operators behind a per-thread dispatch
//! decision. The CPU feature probe runs once per process through the
//! standard library's feature detection (the safe expression of the
//! original guarded-probe design: a variant is selected only if it has
//! been proven present); the hybrid-CPU policy additionally caps
//! unplaced threads below AVX-512, since an efficiency core may not
//! execute it even when the package advertises the feature.
//!
//! Every operation is total. Dispatch never changes results: all
//! checksum variants are byte-identical and property-tested against the
//! scalar reference.

pub mod cpu;

mod copy;
mod crc32c;
mod hash;

use std::cell::Cell;
use std::sync::OnceLock;

use tracing::debug;

pub use cpu::{CpuClass, CpuTopology, pin_current_thread, topology};

/// Below this length every operator takes the scalar path; vector set-up
/// costs more than it saves on short inputs.
pub const VECTOR_CUTOFF: usize = 32;

/// Outcome of the one-shot CPU feature probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuFeatures {
    /// SSE4.2, which carries the CRC32C instruction.
    pub sse42: bool,
    /// AVX2 (32-byte integer vectors).
    pub avx2: bool,
    /// AVX-512 Foundation (64-byte vectors).
    pub avx512f: bool,
}

impl CpuFeatures {
    /// A probe result with every feature unavailable.
    #[must_use]
    pub const fn baseline() -> Self {
        Self {
            sse42: false,
            avx2: false,
            avx512f: false,
        }
    }
}

/// Dispatch variant selected for a thread, widest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Kernel {
    /// Portable reference path.
    Scalar,
    /// Hardware CRC32C, SSE-tier copy.
    Sse42,
    /// Hardware CRC32C, 32-byte copy striding.
    Avx2,
    /// Hardware CRC32C, 64-byte copy striding (performance cores only).
    Avx512,
}

static FEATURES: OnceLock<CpuFeatures> = OnceLock::new();

thread_local! {
    static THREAD_KERNEL: Cell<Option<Kernel>> = const { Cell::new(None) };
}

/// Probes the CPU once and caches the result.
///
/// Safe to call from any thread at any time; later calls are free.
pub fn init() -> CpuFeatures {
    *FEATURES.get_or_init(|| {
        let features = probe();
        debug!(?features, "probed vector features");
        features
    })
}

/// The cached probe result.
#[must_use]
pub fn features() -> CpuFeatures {
    init()
}

#[cfg(target_arch = "x86_64")]
fn probe() -> CpuFeatures {
    CpuFeatures {
        sse42: std::arch::is_x86_feature_detected!("sse4.2"),
        avx2: std::arch::is_x86_feature_detected!("avx2"),
        avx512f: std::arch::is_x86_feature_detected!("avx512f"),
    }
}

#[cfg(not(target_arch = "x86_64"))]
fn probe() -> CpuFeatures {
    CpuFeatures::baseline()
}

/// The dispatch variant for the calling thread.
///
/// Resolved on first use per thread: the widest variant that is both
/// proven present and permitted on the thread's CPU class, then cached.
/// Re-pinning a thread does not re-resolve; pin before first use.
#[must_use]
pub fn kernel() -> Kernel {
    THREAD_KERNEL.with(|k| {
        if let Some(resolved) = k.get() {
            return resolved;
        }
        let f = features();
        let resolved = if f.avx512f && cpu::thread_allows_avx512() {
            Kernel::Avx512
        } else if f.avx2 {
            Kernel::Avx2
        } else if f.sse42 {
            Kernel::Sse42
        } else {
            Kernel::Scalar
        };
        k.set(Some(resolved));
        resolved
    })
}

/// CRC32C over the input.
///
/// Seed `0xFFFF_FFFF`, reflected, final XOR; byte-identical across all
/// dispatch variants and equal to what wire-compatible peers emit.
#[must_use]
pub fn checksum(bytes: &[u8]) -> u32 {
    if bytes.len() < VECTOR_CUTOFF {
        return crc32c::crc32c_scalar(bytes);
    }
    checksum_with(kernel(), bytes)
}

/// CRC32C forced through a specific variant (dispatch-equivalence tests).
#[must_use]
pub fn checksum_with(kernel: Kernel, bytes: &[u8]) -> u32 {
    match kernel {
        Kernel::Scalar => crc32c::crc32c_scalar(bytes),
        #[cfg(target_arch = "x86_64")]
        Kernel::Sse42 | Kernel::Avx2 | Kernel::Avx512 => {
            if features().sse42 {
                // The CRC32C instruction ships with SSE4.2; wider tiers
                // change copy/batch striding, not checksum arithmetic.
                // SAFETY: presence proven by the cached probe.
                unsafe { crc32c::crc32c_sse42(bytes) }
            } else {
                crc32c::crc32c_scalar(bytes)
            }
        }
        #[cfg(not(target_arch = "x86_64"))]
        _ => crc32c::crc32c_scalar(bytes),
    }
}

/// Non-cryptographic hash, stable for the process lifetime.
///
/// Indexes intra-process tables only; never an integrity check.
#[must_use]
pub fn fast_hash(bytes: &[u8]) -> u32 {
    hash::fnv1a32(bytes)
}

/// Copies `src` into `dst`.
///
/// Lengths must match; mismatch is a programming error and panics. Large
/// buffers take the widest permitted copy kernel.
pub fn copy(dst: &mut [u8], src: &[u8]) {
    assert_eq!(dst.len(), src.len(), "copy length mismatch");
    if src.len() < 64 {
        copy::copy_scalar(dst, src);
        return;
    }
    match kernel() {
        #[cfg(target_arch = "x86_64")]
        Kernel::Avx512 => {
            if features().avx512f {
                // SAFETY: presence proven by the cached probe.
                unsafe { copy::copy_avx512(dst, src) };
                return;
            }
            copy::copy_scalar(dst, src);
        }
        #[cfg(target_arch = "x86_64")]
        Kernel::Avx2 => {
            if features().avx2 {
                // SAFETY: presence proven by the cached probe.
                unsafe { copy::copy_avx2(dst, src) };
                return;
            }
            copy::copy_scalar(dst, src);
        }
        _ => copy::copy_scalar(dst, src),
    }
}

/// Checksums a batch of buffers in one dispatch decision.
///
/// The kernel is resolved once for the whole batch instead of per frame.
#[must_use]
pub fn batch_checksum(batch: &[&[u8]]) -> Vec<u32> {
    let k = kernel();
    batch
        .iter()
        .map(|bytes| {
            if bytes.len() < VECTOR_CUTOFF {
                crc32c::crc32c_scalar(bytes)
            } else {
                checksum_with(k, bytes)
            }
        })
        .collect()
}

/// Variants available for equivalence testing on this machine.
#[must_use]
pub fn enabled_kernels() -> Vec<Kernel> {
    let f = features();
    let mut kernels = vec![Kernel::Scalar];
    if f.sse42 {
        kernels.push(Kernel::Sse42);
    }
    if f.avx2 {
        kernels.push(Kernel::Avx2);
    }
    if f.avx512f {
        kernels.push(Kernel::Avx512);
    }
    kernels
}
