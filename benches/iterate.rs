use std::hint::black_box;

use criterion::*;

mod common;
use common::*;

use fragment_engine::prelude::*;

fn iterate_benchmark(c: &mut Criterion) {
    init_fragments();

    let mut group = c.benchmark_group("iterate");
    group.sample_size(20);

    group.bench_function("for_each_write_wealth_100k", |b| {
        b.iter_batched(
            || {
                let engine = make_world(AGENTS_SMALL);
                let query = Query::builder().write::<Wealth>().unwrap().build().unwrap();
                (engine, query)
            },
            |(engine, query)| {
                engine.world_ref().for_each_write::<Wealth, _>(&query, |w| {
                    w.value *= 1.0001;
                });
                black_box(engine);
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("for_each_read_write_integrate_100k", |b| {
        b.iter_batched(
            || {
                let engine = make_world(AGENTS_SMALL);
                let query = Query::builder()
                    .read::<Velocity>().unwrap()
                    .write::<Position>().unwrap()
                    .build()
                    .unwrap();
                (engine, query)
            },
            |(engine, query)| {
                engine
                    .world_ref()
                    .for_each_read_write::<Velocity, Position, _>(&query, |vel, pos| {
                        pos.x += vel.dx;
                        pos.y += vel.dy;
                    });
                black_box(engine);
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("chunk_views_read_100k", |b| {
        b.iter_batched(
            || {
                let engine = make_world(AGENTS_SMALL);
                let query = Query::builder().read::<Position>().unwrap().build().unwrap();
                (engine, query)
            },
            |(engine, query)| {
                let mut sum = 0.0f32;
                engine.world_ref().for_each_chunk(&query, |view| {
                    if let Some(positions) = view.column::<Position>() {
                        for p in positions {
                            sum += p.x;
                        }
                    }
                });
                black_box(sum);
                black_box(engine);
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, iterate_benchmark);
criterion_main!(benches);
