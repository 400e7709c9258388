use blackbird_core::core_a::slope::Slope;
use blackbird_core::rings::{AslDone, Ring};
use blackbird_core::shape::{ShapeKind, ShapeTables};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fixed::types::{I16F16, U16F16};

fn leak<T: 'static + Default>(v: T) -> &'static mut T {
    Box::leak(Box::new(v))
}

/// Per-sample slope render: the hottest loop in Core A, called once per
/// audio sample per channel (spec.md §4.1).
fn slope_render_sample_bench(c: &mut Criterion) {
    let tables = ShapeTables::new();
    let ring: &'static mut Ring<AslDone> = leak(Ring::new());
    let (mut producer, _consumer) = ring.split();

    let mut slope = Slope::new();
    slope.toward(I16F16::from_num(5.0), 480, ShapeKind::Sine, 48_000, true);

    c.bench_function("Slope::render_sample(sine)", |b| {
        b.iter(|| black_box(slope.render_sample(&tables, black_box(0), black_box(0), &mut producer)))
    });
}

/// Block render at the three `priority` block sizes (spec.md §4.1
/// "priority"): bigger blocks trade per-sample precision for fewer context
/// switches back to Core B.
fn slope_render_block_bench(c: &mut Criterion) {
    let tables = ShapeTables::new();
    let ring: &'static mut Ring<AslDone> = leak(Ring::new());
    let (mut producer, _consumer) = ring.split();

    for block_size in [4usize, 240, 480] {
        let mut slope = Slope::new();
        slope.toward(I16F16::from_num(5.0), 480, ShapeKind::Linear, 48_000, true);
        let mut out = vec![I16F16::ZERO; block_size];
        c.bench_function(&format!("Slope::render_block({block_size})"), |b| {
            b.iter(|| slope.render_block(&tables, black_box(0), black_box(0), &mut out, &mut producer))
        });
    }
}

/// Shape LUT lookup + interpolation, the inner step every shaped slope
/// calls once per sample (spec.md §4.1 step 2).
fn shape_lookup_bench(c: &mut Criterion) {
    let tables = ShapeTables::new();
    let here = U16F16::from_num(0.37);
    c.bench_function("ShapeTables::lookup(sine)", |b| {
        b.iter(|| black_box(tables.lookup(black_box(ShapeKind::Sine), black_box(here))))
    });
    c.bench_function("ShapeTables::lookup(expo)", |b| {
        b.iter(|| black_box(tables.lookup(black_box(ShapeKind::Expo), black_box(here))))
    });
}

/// Volts-to-DAC-counts, run once per channel per sample on the way out of
/// the ISR (spec.md §4.1 step 4); kept here rather than skipped since it's
/// unconditionally on the hot path every other bench in this file feeds.
fn volts_to_counts_bench(c: &mut Criterion) {
    c.bench_function("volts_to_counts", |b| {
        b.iter(|| black_box(blackbird_core::config::volts_to_counts(black_box(3.0))))
    });
}

criterion_group!(
    slope,
    slope_render_sample_bench,
    slope_render_block_bench,
    shape_lookup_bench,
    volts_to_counts_bench
);
criterion_main!(slope);
