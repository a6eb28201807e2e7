// SPDX-License-Identifier: MIT OR Apache-2.0
//! Throughput of the worker contract: events through pipelines of varying
//! depth, with and without continuations.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use logpipe::{Engine, Event, Pipeline, Processor, ProcessorError};
use serde_json::json;
use std::time::Duration;

const BATCH: u64 = 1_000;

// ── Helpers ─────────────────────────────────────────────────────────────

fn stamp(index: usize) -> Processor {
    let field = format!("f{index}");
    Processor::transform(
        format!("stamp-{index}"),
        move |ev: &mut Event| -> Result<bool, ProcessorError> {
            ev.put(field.clone(), index as u64);
            Ok(true)
        },
    )
}

fn engine(depth: usize, workers: usize) -> Engine {
    let pipeline = (0..depth).fold(Pipeline::new("main"), |p, i| p.processor(stamp(i)));
    Engine::builder()
        .pipeline(pipeline)
        .output("main", BATCH as usize)
        .workers(workers)
        .queue_depth(256)
        .start()
        .expect("engine starts")
}

fn run_batch(engine: &Engine) {
    let output = engine.output("main").expect("output registered");
    for n in 0..BATCH {
        engine
            .submit("main", Event::from_json(json!({"n": n})).expect("object"))
            .expect("submit");
    }
    assert!(engine.wait_idle(Duration::from_secs(30)));
    while let Ok(event) = output.try_recv() {
        black_box(event);
    }
}

// ── Benchmarks ──────────────────────────────────────────────────────────

fn bench_pipeline_depth(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_depth");
    group.throughput(Throughput::Elements(BATCH));
    for depth in [1, 8, 32] {
        let engine = engine(depth, 2);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &engine, |b, engine| {
            b.iter(|| run_batch(engine));
        });
    }
    group.finish();
}

fn bench_workers(c: &mut Criterion) {
    let mut group = c.benchmark_group("workers");
    group.throughput(Throughput::Elements(BATCH));
    for workers in [1, 2, 4] {
        let engine = engine(8, workers);
        group.bench_with_input(BenchmarkId::from_parameter(workers), &engine, |b, engine| {
            b.iter(|| run_batch(engine));
        });
    }
    group.finish();
}

fn bench_continuations(c: &mut Criterion) {
    let head = (1..8).rev().fold(stamp(0), |next, i| stamp(i).on_success(next));
    let engine = Engine::builder()
        .pipeline(Pipeline::new("main").processor(head))
        .output("main", BATCH as usize)
        .start()
        .expect("engine starts");
    let mut group = c.benchmark_group("continuations");
    group.throughput(Throughput::Elements(BATCH));
    group.bench_function("chain_of_8", |b| b.iter(|| run_batch(&engine)));
    group.finish();
}

criterion_group!(benches, bench_pipeline_depth, bench_workers, bench_continuations);
criterion_main!(benches);
