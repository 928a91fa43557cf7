//! Framing and codec benchmarks.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mbroker_protocol::{json, Envelope, Frame, FrameDecoder, Value, WireFormat};

const FORMATS: [WireFormat; 3] = [WireFormat::Json, WireFormat::Xml, WireFormat::Binary];

fn string_message(payload_size: usize) -> Envelope {
    Envelope::message(
        "sensors/kitchen/temperature",
        Value::String("x".repeat(payload_size)),
    )
}

fn structured_message() -> Envelope {
    let readings: Vec<Value> = (0..32)
        .map(|i| json!({"seq": i, "celsius": 20.5, "ok": true}))
        .collect();
    Envelope::message("sensors/kitchen", json!({"device": "k-1", "readings": readings}))
}

fn bench_frame_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");

    for size in [100, 1000, 10000] {
        let frame = Frame::new(Bytes::from("x".repeat(size)));

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| black_box(frame.encode().unwrap()));
        });
    }

    group.finish();
}

fn bench_frame_decoder(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decoder");

    // Many small frames delivered in one read
    for count in [10, 100, 1000] {
        let mut stream = Vec::new();
        for _ in 0..count {
            stream.extend_from_slice(&Frame::new(Bytes::from_static(b"payload")).encode().unwrap());
        }

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &stream, |b, stream| {
            b.iter(|| {
                let mut decoder = FrameDecoder::new();
                decoder.extend(stream);
                let mut n = 0;
                while let Some(frame) = decoder.decode_frame() {
                    black_box(frame);
                    n += 1;
                }
                n
            });
        });
    }

    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(1));

    let string = string_message(1000);
    let structured = structured_message();

    for format in FORMATS {
        group.bench_with_input(
            BenchmarkId::new("string_1k", format),
            &string,
            |b, envelope| {
                b.iter(|| black_box(format.encode(envelope).unwrap()));
            },
        );
        group.bench_with_input(
            BenchmarkId::new("structured", format),
            &structured,
            |b, envelope| {
                b.iter(|| black_box(format.encode(envelope).unwrap()));
            },
        );
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Elements(1));

    let string = string_message(1000);
    let structured = structured_message();

    for format in FORMATS {
        let encoded = format.encode(&string).unwrap();
        group.bench_with_input(
            BenchmarkId::new("string_1k", format),
            &encoded,
            |b, encoded| {
                b.iter(|| black_box(format.decode(encoded).unwrap()));
            },
        );

        let encoded = format.encode(&structured).unwrap();
        group.bench_with_input(
            BenchmarkId::new("structured", format),
            &encoded,
            |b, encoded| {
                b.iter(|| black_box(format.decode(encoded).unwrap()));
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_frame_encode,
    bench_frame_decoder,
    bench_encode,
    bench_decode,
);

criterion_main!(benches);
