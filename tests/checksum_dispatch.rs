//! Checksum dispatch equivalence
//!
//! Every enabled kernel must produce byte-identical CRC32C output, for
//! arbitrary inputs and for the exact populated wire header.

use proptest::prelude::*;

use weft::domain_types::AgentId;
use weft::transport::{FrameFlags, FrameHeader, FrameParams, MsgType, Priority};
use weft::vector::{self, Kernel};

proptest! {
    #[test]
    fn all_kernels_agree_on_arbitrary_input(data in prop::collection::vec(any::<u8>(), 0..4096)) {
        let reference = vector::checksum_with(Kernel::Scalar, &data);
        for kernel in vector::enabled_kernels() {
            prop_assert_eq!(
                vector::checksum_with(kernel, &data),
                reference,
                "kernel {:?} diverged on {} bytes",
                kernel,
                data.len()
            );
        }
        // The public dispatch entry agrees with the reference too.
        prop_assert_eq!(vector::checksum(&data), reference);
    }

    #[test]
    fn batch_checksum_matches_per_frame(frames in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..512), 1..16)) {
        let views: Vec<&[u8]> = frames.iter().map(Vec::as_slice).collect();
        let batch = vector::batch_checksum(&views);
        for (frame, crc) in frames.iter().zip(batch) {
            prop_assert_eq!(vector::checksum(frame), crc);
        }
    }
}

#[test]
fn fully_populated_header_checksums_identically_across_kernels() {
    // The exact 168-byte header of the wire format with every field
    // populated and the CRC field zeroed.
    let header = FrameHeader::new(
        &FrameParams {
            message_id: 0x0102_0304,
            timestamp_ns: 0x1122_3344_5566_7788,
            source: AgentId::new(0xDEAD),
            correlation: 0xBEEF,
            msg_type: MsgType::Request,
            priority: Priority::Critical,
            flags: FrameFlags::RESPONSE_EXPECTED,
            ttl_ms: 30_000,
            topic: "fabric/control/handshake",
        },
        4096,
    );
    let bytes = header.to_bytes();
    let covered = &bytes[..164];

    let reference = vector::checksum_with(Kernel::Scalar, covered);
    for kernel in vector::enabled_kernels() {
        assert_eq!(
            vector::checksum_with(kernel, covered),
            reference,
            "kernel {kernel:?} diverged on the wire header"
        );
    }

    // Sealing stores exactly the reference value.
    let mut sealed = header;
    sealed.seal();
    assert_eq!(sealed.to_bytes()[164..168], reference.to_le_bytes());
    assert!(sealed.verify_checksum());
}

#[test]
fn crc32c_reference_vectors_hold() {
    // Standard CRC-32C check value.
    assert_eq!(vector::checksum(b"123456789"), 0xE306_9283);
    // RFC 3720 B.4 vectors.
    assert_eq!(vector::checksum(&[0u8; 32]), 0x8A91_36AA);
    assert_eq!(vector::checksum(&[0xFFu8; 32]), 0x62A8_AB43);
}

#[test]
fn short_inputs_bypass_vector_paths() {
    // Inputs under the cutoff take the scalar path by contract; results
    // must match the forced-scalar kernel bit for bit.
    for len in 0..vector::VECTOR_CUTOFF {
        let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
        assert_eq!(
            vector::checksum(&data),
            vector::checksum_with(Kernel::Scalar, &data)
        );
    }
}

#[test]
fn copy_is_exact_for_large_buffers() {
    let src: Vec<u8> = (0..1_000_000usize).map(|i| (i * 31 % 256) as u8).collect();
    let mut dst = vec![0u8; src.len()];
    vector::copy(&mut dst, &src);
    assert_eq!(dst, src);
}

#[test]
fn probe_reports_a_consistent_feature_set() {
    let first = vector::features();
    let second = vector::features();
    assert_eq!(first, second, "probe result must be cached");
    // The widest selected kernel must be backed by a probed feature.
    match vector::kernel() {
        Kernel::Avx512 => assert!(first.avx512f),
        Kernel::Avx2 => assert!(first.avx2),
        Kernel::Sse42 => assert!(first.sse42),
        Kernel::Scalar => {}
    }
}
