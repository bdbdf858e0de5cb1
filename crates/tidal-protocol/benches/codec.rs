//! Codec benchmarks for tidal-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;
use tidal_protocol::{codec, ChangeEvent, Frame};

fn email_row(id: u64) -> serde_json::Value {
    json!({
        "id": id,
        "created_at": "2024-05-01T12:00:00Z",
        "title": "Quarterly report",
        "summary": "Numbers are up.",
        "from_email": "u@x.com",
        "to_email": "team@x.com",
        "raw_id": null,
        "full_text": null,
    })
}

fn bench_encode_change(c: &mut Criterion) {
    let frame = Frame::change(1, ChangeEvent::insert(email_row(1)));
    let size = codec::encode(&frame).unwrap().len();

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(size as u64));
    group.bench_function("change", |b| b.iter(|| codec::encode(black_box(&frame))));
    group.finish();
}

fn bench_decode_change(c: &mut Criterion) {
    let frame = Frame::change(1, ChangeEvent::insert(email_row(1)));
    let encoded = codec::encode(&frame).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("change", |b| b.iter(|| codec::decode(black_box(&encoded))));
    group.finish();
}

fn bench_decode_rows(c: &mut Criterion) {
    let frame = Frame::Rows {
        id: 1,
        rows: (0..500).map(email_row).collect(),
    };
    let encoded = codec::encode(&frame).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("rows_500", |b| b.iter(|| codec::decode(black_box(&encoded))));
    group.finish();
}

criterion_group!(
    benches,
    bench_encode_change,
    bench_decode_change,
    bench_decode_rows
);
criterion_main!(benches);
