//! Benchmarks for bfind
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::fs;

fn benchmark_walk(c: &mut Criterion) {
    use bfind::walk::{walk, Flow, Visit, WalkOptions};

    // A moderate tree: 10 directories of 100 files each
    let tmp = tempfile::tempdir().expect("tempdir");
    for d in 0..10 {
        let dir = tmp.path().join(format!("dir{d:02}"));
        fs::create_dir(&dir).expect("mkdir");
        for f in 0..100 {
            fs::write(dir.join(format!("file{f:03}")), b"").expect("write");
        }
    }

    let opts = WalkOptions::default();
    c.bench_function("walk_1k_entries", |b| {
        b.iter(|| {
            let mut count = 0u64;
            walk(tmp.path(), &opts, &mut |visit: &mut Visit| {
                count += visit.depth() as u64;
                Ok(Flow::Continue)
            })
            .expect("walk");
            black_box(count);
        })
    });
}

fn benchmark_printf_compile(c: &mut Criterion) {
    use bfind::fmt::printf::compile;

    c.bench_function("printf_compile", |b| {
        b.iter(|| {
            let program = compile(black_box("%-10s %#m %TY-%Tm-%Td %p\\n")).expect("compile");
            black_box(program);
        })
    });
}

fn benchmark_expression_parse(c: &mut Criterion) {
    use bfind::expr::parse::parse_command;
    use bfind::sink::Sink;

    let args: Vec<String> = [
        "/tmp", "(", "-name", "*.rs", "-or", "-name", "*.toml", ")", "-and", "-size", "+1k",
        "-and", "!", "-hidden",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    c.bench_function("parse_expression", |b| {
        b.iter(|| {
            let parsed = parse_command(black_box(&args), Some(Sink::buffer())).expect("parse");
            black_box(parsed);
        })
    });
}

criterion_group!(
    benches,
    benchmark_walk,
    benchmark_printf_compile,
    benchmark_expression_parse
);
criterion_main!(benches);
