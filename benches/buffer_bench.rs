//! Criterion benchmarks for observation buffer hot paths.
//!
//! The buffer sits on every adapter's write path and under every Sample
//! query, so append and range-scan latency bound the whole agent.
//!
//! Run with: cargo bench --bench buffer_bench

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mtc_agent::buffer::ObservationBuffer;
use mtc_agent::catalog::DataItemRef;
use mtc_agent::observation::{Category, ObservationInput, ObservationValues, Representation};

fn data_item(id: &str) -> DataItemRef {
    DataItemRef {
        id: id.to_string(),
        name: None,
        device_uuid: "bench-dev".to_string(),
        category: Category::Sample,
        type_: "POSITION".to_string(),
        sub_type: None,
        composition_id: None,
        representation: Representation::Value,
        native_units: None,
    }
}

fn input(value: f64) -> ObservationInput {
    ObservationInput::new(
        data_item("x1"),
        Utc::now(),
        ObservationValues::Value(value.to_string()),
    )
}

fn buffer_append_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_append");
    group.throughput(Throughput::Elements(1));

    for capacity in [1024usize, 65536, 131072] {
        let buffer = ObservationBuffer::new(capacity).unwrap();
        let mut n = 0.0f64;
        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            &capacity,
            |b, _| {
                b.iter(|| {
                    n += 1.0;
                    black_box(buffer.append(input(n)));
                })
            },
        );
    }
    group.finish();
}

fn buffer_range_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_get_range");

    let buffer = ObservationBuffer::new(65536).unwrap();
    for n in 0..65536 {
        buffer.append(input(n as f64));
    }

    for span in [100usize, 1000, 10000] {
        group.throughput(Throughput::Elements(span as u64));
        let header = buffer.snapshot();
        group.bench_with_input(BenchmarkId::from_parameter(span), &span, |b, &span| {
            b.iter(|| {
                let set = buffer
                    .get_range(header.first_sequence, None, span, None)
                    .unwrap();
                black_box(set.observations.len())
            })
        });
    }
    group.finish();
}

criterion_group!(benches, buffer_append_throughput, buffer_range_scan);
criterion_main!(benches);
