//! Codec benchmarks for relay-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use relay_protocol::{codec, ChangeNotification, EventKind, OutboundMessage, Partition};
use serde_json::json;

fn update_message(fields: usize) -> OutboundMessage {
    let image: serde_json::Map<String, serde_json::Value> = (0..fields)
        .map(|i| (format!("field_{i}"), json!({"value": i, "label": "x".repeat(16)})))
        .collect();

    OutboundMessage::update(
        Partition::WorkOrders,
        ChangeNotification {
            id: "wo-1".into(),
            event_name: EventKind::Modify,
            new_image: serde_json::Value::Object(image),
        },
    )
}

fn bench_encode_update(c: &mut Criterion) {
    let message = update_message(8);
    let size = codec::encode(&message).unwrap().len();

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(size as u64));
    group.bench_function("update_8_fields", |b| {
        b.iter(|| codec::encode(black_box(&message)))
    });
    group.finish();
}

fn bench_decode_inbound(c: &mut Criterion) {
    let data = br#"{"type":"refresh","token":"eyJhbGciOiJSUzI1NiJ9.e30.sig","resourcePartition":"students"}"#;

    c.bench_function("decode_inbound", |b| {
        b.iter(|| codec::decode_inbound(black_box(data)))
    });
}

criterion_group!(benches, bench_encode_update, bench_decode_inbound);
criterion_main!(benches);
