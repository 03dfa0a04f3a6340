//! Fabric micro-benchmarks: checksum dispatch and ring throughput

use std::sync::Arc;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};

use weft::clock::SystemClock;
use weft::domain_types::AgentId;
use weft::transport::{Frame, FrameFlags, FrameParams, MsgType, Priority, RingTransport};
use weft::vector;

fn bench_checksum(c: &mut Criterion) {
    let mut group = c.benchmark_group("crc32c");
    for size in [64usize, 1024, 16 * 1024, 1024 * 1024] {
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("dispatch/{size}"), |b| {
            b.iter(|| vector::checksum(std::hint::black_box(&data)));
        });
        group.bench_function(format!("scalar/{size}"), |b| {
            b.iter(|| vector::checksum_with(vector::Kernel::Scalar, std::hint::black_box(&data)));
        });
    }
    group.finish();
}

fn bench_ring(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring");
    let payload = vec![0u8; 256];
    let frame = Frame::new(
        &FrameParams {
            message_id: 1,
            timestamp_ns: 0,
            source: AgentId::new(1),
            correlation: 0,
            msg_type: MsgType::Publish,
            priority: Priority::Normal,
            flags: FrameFlags::empty(),
            ttl_ms: 0,
            topic: "bench",
        },
        &payload,
    );

    group.throughput(Throughput::Elements(1));
    group.bench_function("write_read_roundtrip", |b| {
        let ring = RingTransport::new(1024, 16 * 1024 * 1024, Arc::new(SystemClock::new()));
        b.iter(|| {
            ring.write(frame.clone()).unwrap();
            ring.try_read(Priority::Normal).unwrap().unwrap()
        });
    });

    group.bench_function("batch_checksum_64_frames", |b| {
        let frames: Vec<Vec<u8>> = (0..64).map(|_| payload.clone()).collect();
        let views: Vec<&[u8]> = frames.iter().map(Vec::as_slice).collect();
        b.iter(|| vector::batch_checksum(std::hint::black_box(&views)));
    });

    group.finish();
}

criterion_group!(benches, bench_checksum, bench_ring);
criterion_main!(benches);
