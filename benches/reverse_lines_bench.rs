use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::io::Cursor;
use wikitransp::event_log::RESUME_POINT_TAG;
use wikitransp::{ReverseLines, ScanOptions};

/// A log shaped like a long run: many check records, one resume point near the start
fn synthetic_log(lines: usize) -> Vec<u8> {
    let mut log = String::new();
    log.push_str(&format!(
        "2024-01-01T00:00:00Z  WARN     {RESUME_POINT_TAG}You may want to resume AT the last URL: https://img.test/0.png\n"
    ));
    for i in 0..lines {
        log.push_str(&format!(
            "2024-01-01T00:00:01Z DEBUG     CheckPng ⠶ ({i}) @ https://img.test/{i}.png\n"
        ));
    }
    log.into_bytes()
}

fn bench_resume_point_scan(c: &mut Criterion) {
    let log = synthetic_log(50_000);
    let mut group = c.benchmark_group("resume_point_scan");
    group.throughput(Throughput::Bytes(log.len() as u64));
    group.sample_size(20); // WHY: each iteration walks the whole log

    for chunk_size in [512usize, 4096, 65536] {
        group.bench_with_input(BenchmarkId::from_parameter(chunk_size), &chunk_size, |b, &chunk_size| {
            b.iter(|| {
                let options = ScanOptions::matching(RESUME_POINT_TAG).with_chunk_size(chunk_size);
                let first = ReverseLines::new(Cursor::new(log.as_slice()), options)
                    .unwrap()
                    .next();
                black_box(first)
            })
        });
    }
    group.finish();
}

fn bench_tail_lines(c: &mut Criterion) {
    let log = synthetic_log(50_000);
    let mut group = c.benchmark_group("tail_lines");
    group.bench_function("last_100_lines", |b| {
        b.iter(|| {
            let lines: Vec<_> = ReverseLines::new(Cursor::new(log.as_slice()), ScanOptions::default())
                .unwrap()
                .take(100)
                .collect();
            black_box(lines)
        })
    });
    group.finish();
}

criterion_group!(benches, bench_resume_point_scan, bench_tail_lines);
criterion_main!(benches);
