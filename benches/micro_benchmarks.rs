//! Micro-benchmarks for the hot paths that do not need a database
//!
//! Run with: cargo bench --bench micro_benchmarks

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pgtwixt::conninfo::{grammar, ConnectionString};
use pgtwixt::protocol::{decode_frame, Frame};
use pgtwixt::stream::Stream;
use tokio::io::duplex;

// ============================================================================
// Connection string parsing
// ============================================================================

fn conninfo_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("conninfo");

    let simple = "host=localhost port=5432 user=postgres dbname=app";
    let quoted = r"host=db1,db2,db3 port=5432 password='s3cr\'et pass' options='-c search_path=app\\x'";

    group.bench_function("grammar_simple", |b| {
        b.iter(|| grammar::parse_pairs(black_box(simple)).unwrap())
    });
    group.bench_function("grammar_quoted", |b| {
        b.iter(|| grammar::parse_pairs(black_box(quoted)).unwrap())
    });
    group.bench_function("connection_string", |b| {
        b.iter(|| ConnectionString::parse(black_box(quoted)).unwrap())
    });

    group.finish();
}

// ============================================================================
// Frame decoding
// ============================================================================

fn wire(count: usize, payload: usize) -> BytesMut {
    let mut buf = BytesMut::new();
    let frame = Frame::typed(b'D', vec![b'x'; payload]);
    for _ in 0..count {
        frame.encode(&mut buf);
    }
    buf
}

fn decode_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for payload in [16usize, 256, 8192] {
        let input = wire(100, payload);
        group.throughput(Throughput::Bytes(input.len() as u64));
        group.bench_with_input(BenchmarkId::new("frames_x100", payload), &input, |b, input| {
            b.iter(|| {
                let mut buf = input.clone();
                let mut n = 0;
                while let Some(frame) = decode_frame(&mut buf, false).unwrap() {
                    n += frame.len();
                }
                black_box(n)
            })
        });
    }

    group.finish();
}

// ============================================================================
// Stream round trip
// ============================================================================

fn stream_benchmarks(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("stream");
    let frame = Frame::typed(b'D', vec![b'x'; 128]);
    group.throughput(Throughput::Elements(1000));

    group.bench_function("send_next_x1000", |b| {
        b.to_async(&runtime).iter(|| async {
            let (a, z) = duplex(1 << 20);
            let mut tx = Stream::backend(a);
            let mut rx = Stream::backend(z);
            for _ in 0..1000 {
                tx.send(&frame).await.unwrap();
            }
            tx.flush().await.unwrap();
            for _ in 0..1000 {
                black_box(rx.next().await.unwrap());
            }
        })
    });

    group.finish();
}

criterion_group!(benches, conninfo_benchmarks, decode_benchmarks, stream_benchmarks);
criterion_main!(benches);
