//! Benchmarks for the property access hot paths.
//!
//! Run with: `cargo bench --package lattice-metal --bench property_access`
//!
//! Covers cached computed reads, plain and observed writes, and dotted
//! path reads with and without a watching chain.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use lattice_metal::{add_observer, computed, define_property, watch, Method, Obj, Value};
use std::hint::black_box;

fn full_name(obj: &Obj, _: &str) -> Value {
    let first = obj.get("first");
    let last = obj.get("last");
    Value::from(format!(
        "{} {}",
        first.as_str().unwrap_or_default(),
        last.as_str().unwrap_or_default()
    ))
}

fn person() -> Obj {
    let obj = Obj::with_props([("first", "Ada"), ("last", "Lovelace")]);
    define_property(&obj, "full", computed(&["first", "last"], full_name).unwrap()).unwrap();
    obj
}

/// A chain of `depth` objects, each holding the next under `next`.
fn linked(depth: usize) -> (Obj, String) {
    let mut current = Obj::with_props([("value", 1)]);
    for _ in 0..depth {
        current = Obj::with_props([("next", current)]);
    }
    let mut path = vec!["next"; depth];
    path.push("value");
    (current, path.join("."))
}

fn bench_computed_get(c: &mut Criterion) {
    let obj = person();
    obj.get("full");
    c.bench_function("computed_get_cached", |b| b.iter(|| black_box(obj.get("full"))));

    let volatile = Obj::with_props([("first", "Ada"), ("last", "Lovelace")]);
    define_property(
        &volatile,
        "full",
        computed(&[], full_name).unwrap().volatile(),
    )
    .unwrap();
    c.bench_function("computed_get_volatile", |b| b.iter(|| black_box(volatile.get("full"))));
}

fn bench_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("set");

    let plain = Obj::with_props([("count", 0)]);
    let mut n = 0;
    group.bench_function("unwatched", |b| {
        b.iter(|| {
            n += 1;
            plain.set("count", black_box(n)).unwrap();
        })
    });

    for observers in [1usize, 8] {
        let obj = person();
        obj.get("full");
        for _ in 0..observers {
            add_observer(&obj, "full", None, Method::observer(|obj, key| {
                black_box(obj.get(key));
            }))
            .unwrap();
        }
        let mut flip = false;
        group.bench_with_input(BenchmarkId::new("observed", observers), &observers, |b, _| {
            b.iter(|| {
                flip = !flip;
                obj.set("first", if flip { "Augusta" } else { "Ada" }).unwrap();
            })
        });
    }

    group.finish();
}

fn bench_path_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("path_get");
    for depth in [1usize, 4, 16] {
        let (root, path) = linked(depth);
        group.bench_with_input(BenchmarkId::new("unwatched", depth), &path, |b, path| {
            b.iter(|| black_box(root.get(path)))
        });

        let (watched, path) = linked(depth);
        watch(&watched, &path).unwrap();
        group.bench_with_input(BenchmarkId::new("watched", depth), &path, |b, path| {
            b.iter(|| black_box(watched.get(path)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_computed_get, bench_set, bench_path_get);
criterion_main!(benches);
