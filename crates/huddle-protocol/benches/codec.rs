//! Codec benchmarks for huddle-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use huddle_protocol::{codec, ClientEvent, Encoding, ServerEvent};

fn bench_encode_message(c: &mut Criterion) {
    let event = ServerEvent::message("carol", "x".repeat(64), "3:04:05 PM");

    let mut group = c.benchmark_group("encode_message");
    group.throughput(Throughput::Elements(1));
    group.bench_function("json", |b| {
        b.iter(|| codec::encode(black_box(&event), Encoding::Json))
    });
    group.bench_function("msgpack", |b| {
        b.iter(|| codec::encode(black_box(&event), Encoding::MessagePack))
    });
    group.finish();
}

fn bench_decode_chat(c: &mut Criterion) {
    let event = ClientEvent::chat("x".repeat(64));
    let text = serde_json::to_string(&event).unwrap();
    let binary = codec::encode_binary(&event).unwrap();

    let mut group = c.benchmark_group("decode_chat");
    group.bench_function("json", |b| b.iter(|| codec::decode_text(black_box(&text))));
    group.bench_function("msgpack", |b| {
        b.iter(|| codec::decode_binary::<ClientEvent>(black_box(&binary)))
    });
    group.finish();
}

fn bench_roster(c: &mut Criterion) {
    let users: Vec<String> = (0..100).map(|i| format!("user-{}", i)).collect();
    let event = ServerEvent::room_users("lobby", users);

    c.bench_function("encode_roster_100", |b| {
        b.iter(|| codec::encode(black_box(&event), Encoding::Json))
    });
}

criterion_group!(benches, bench_encode_message, bench_decode_chat, bench_roster);
criterion_main!(benches);
