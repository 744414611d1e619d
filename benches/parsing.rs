//! Benchmarks for transcript parsing and batching.
//!
//! Parsing is the only stage that scales with file size rather than with the
//! number of surviving messages.

// Criterion macros generate items without docs - this is expected for benchmarks
#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::cast_possible_truncation)]

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use mnemos::io::{Messages, ReverseDetection, SourceFormat, create_message_source};
use mnemos::services::chunk;
use std::hint::black_box;
use std::io::Cursor;

fn transcript(turns: usize) -> String {
    (0..turns)
        .map(|i| {
            let speaker = if i % 2 == 0 { "User" } else { "Assistant" };
            format!("[2024-03-01 10:{:02}] {speaker}: message number {i} with some text\n", i % 60)
        })
        .collect()
}

fn bench_transcript_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("transcript_parse");
    for turns in [100, 1_000, 10_000] {
        let text = transcript(turns);
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(turns), &text, |b, text| {
            b.iter(|| {
                let source = create_message_source(
                    Cursor::new(text.as_bytes().to_vec()),
                    SourceFormat::FreeformTranscript,
                    "bench.txt",
                    ReverseDetection::Never,
                );
                black_box(Messages::new(source).count())
            });
        });
    }
    group.finish();
}

fn bench_parse_and_chunk(c: &mut Criterion) {
    let text = transcript(10_000);
    let mut group = c.benchmark_group("parse_and_chunk");
    group.throughput(Throughput::Elements(10_000));
    for batch_size in [10, 100, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(batch_size), &batch_size, |b, &size| {
            b.iter(|| {
                let source = create_message_source(
                    Cursor::new(text.as_bytes().to_vec()),
                    SourceFormat::FreeformTranscript,
                    "bench.txt",
                    ReverseDetection::Never,
                );
                let batches = chunk(Messages::new(source), size, 0).unwrap();
                black_box(batches.map(|batch| batch.unwrap().len()).sum::<usize>())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_transcript_parse, bench_parse_and_chunk);
criterion_main!(benches);
