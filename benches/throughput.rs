//! Throughput benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use quickterm_core::{frame, LineEnding, Transcript};

fn framing_benchmark(c: &mut Criterion) {
    let command = "AT+CGDCONT=1,\"IP\",\"internet.example\"";

    let mut group = c.benchmark_group("framing");
    group.throughput(Throughput::Bytes(command.len() as u64));

    for ending in LineEnding::all() {
        group.bench_function(ending.label(), |b| {
            b.iter(|| black_box(frame(black_box(command), *ending)))
        });
    }

    group.finish();
}

fn transcript_benchmark(c: &mut Criterion) {
    let chunk: Vec<u8> = b"+CSQ: 23,99\r\nOK\r\n".repeat(64);

    let mut group = c.benchmark_group("transcript");
    group.throughput(Throughput::Bytes(chunk.len() as u64));

    group.bench_function("push_bytes", |b| {
        let mut transcript = Transcript::new();
        b.iter(|| {
            transcript.push_bytes(black_box(&chunk));
            if transcript.len() > 1 << 20 {
                transcript.clear();
            }
        })
    });

    group.bench_function("since", |b| {
        let mut transcript = Transcript::new();
        for _ in 0..256 {
            transcript.push_bytes(&chunk);
        }
        let offset = transcript.len() / 2;
        b.iter(|| black_box(transcript.since(black_box(offset)).len()))
    });

    group.finish();
}

criterion_group!(benches, framing_benchmark, transcript_benchmark);
criterion_main!(benches);
