//! Benchmarks for change propagation through the graph.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use weft_core::reactive::{effect, Cell, Computation, Reaction};
use weft_core::Graph;

/// A cell feeding `depth` computations in a line, observed by one reaction.
fn build_chain(graph: &Graph, depth: usize) -> (Cell<u64>, Vec<Computation<u64>>, Reaction) {
    let source = Cell::new(graph, 0u64);
    let mut links: Vec<Computation<u64>> = Vec::with_capacity(depth);

    let first = source.clone();
    links.push(Computation::new(graph, move || Ok(first.get() + 1)));
    for _ in 1..depth {
        let previous = links[links.len() - 1].clone();
        links.push(Computation::new(graph, move || Ok(previous.get()? + 1)));
    }

    let tail = links[links.len() - 1].clone();
    let sink = effect(graph, move |_| {
        black_box(tail.get()?);
        Ok(())
    })
    .unwrap();

    (source, links, sink)
}

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain");

    for depth in [1, 10, 100] {
        group.bench_with_input(BenchmarkId::new("set", depth), &depth, |b, &depth| {
            let graph = Graph::new();
            let (source, _links, _sink) = build_chain(&graph, depth);
            let mut next = 0u64;
            b.iter(|| {
                next += 1;
                source.set(black_box(next)).unwrap();
            })
        });
    }

    group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");

    for width in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("set", width), &width, |b, &width| {
            let graph = Graph::new();
            let source = Cell::new(&graph, 0u64);
            let sinks: Vec<Reaction> = (0..width)
                .map(|_| {
                    let read = source.clone();
                    effect(&graph, move |_| {
                        black_box(read.get());
                        Ok(())
                    })
                    .unwrap()
                })
                .collect();

            let mut next = 0u64;
            b.iter(|| {
                next += 1;
                source.set(black_box(next)).unwrap();
            });
            drop(sinks);
        });
    }

    group.finish();
}

fn bench_batch(c: &mut Criterion) {
    c.bench_function("batch_many_writes", |b| {
        let graph = Graph::new();
        let cells: Arc<Vec<Cell<u64>>> = Arc::new((0..64).map(|_| Cell::new(&graph, 0)).collect());
        let read = cells.clone();
        let total = Computation::new(&graph, move || Ok(read.iter().map(Cell::get).sum::<u64>()));
        let watched = total.clone();
        let _sink = effect(&graph, move |_| {
            black_box(watched.get()?);
            Ok(())
        })
        .unwrap();

        let mut next = 0u64;
        b.iter(|| {
            next += 1;
            graph
                .run_in_action(|| {
                    for cell in cells.iter() {
                        cell.set(next)?;
                    }
                    Ok(())
                })
                .unwrap();
        })
    });
}

criterion_group!(benches, bench_chain, bench_fan_out, bench_batch);
criterion_main!(benches);
