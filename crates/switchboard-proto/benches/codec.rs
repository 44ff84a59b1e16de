//! Encode/decode benchmarks for the chat packets on the hot path.
//!
//! Run with:
//! ```bash
//! cargo bench --bench codec
//! ```

#![allow(clippy::expect_used)]

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use switchboard_proto::{
    BroadcastResponse, MessageField, NameField, Packet, ResultCode, WhisperResponse,
};

fn sample_packets() -> Vec<(&'static str, Packet)> {
    let text = "the quick brown fox jumps over the lazy dog ".repeat(20);
    vec![
        (
            "login_request",
            Packet::login_request("user0042", "correct-horse", "Wanderer")
                .expect("Failed to build login request"),
        ),
        (
            "broadcast_response",
            Packet::BroadcastResponse(BroadcastResponse {
                user: NameField::truncated("Wanderer"),
                message: MessageField::truncated(&text),
            }),
        ),
        (
            "whisper_response",
            Packet::WhisperResponse(WhisperResponse {
                result: ResultCode::Success,
                sender: NameField::truncated("Wanderer"),
                message: MessageField::truncated(&text),
            }),
        ),
    ]
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    for (name, packet) in sample_packets() {
        group.throughput(Throughput::Bytes(packet.packet_type().wire_size() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), &packet, |b, packet| {
            b.iter(|| black_box(packet.encode().expect("Failed to encode packet")));
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    for (name, packet) in sample_packets() {
        let bytes = packet.encode().expect("Failed to encode packet");
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), &bytes, |b, bytes| {
            b.iter(|| black_box(Packet::decode(bytes).expect("Failed to decode packet")));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
