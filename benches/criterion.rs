// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use ::parablock::BlockStrategy;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::mem::size_of;

const NUM_THREADS: &[usize] = &[1, 2, 4, 8];
const LENGTHS: &[usize] = &[10_000, 100_000, 1_000_000, 10_000_000];
const BLOCK_SIZES: &[usize] = &[100, 1000];

fn fill(c: &mut Criterion) {
    let mut group = c.benchmark_group("fill");
    for len in LENGTHS {
        group.throughput(Throughput::Bytes((len * 2 * size_of::<f32>()) as u64));
        group.bench_with_input(BenchmarkId::new("serial", len), len, serial::fill);
        for &num_threads in NUM_THREADS {
            group.bench_with_input(
                BenchmarkId::new(format!("rayon@{num_threads}"), len),
                len,
                |bencher, len| rayon::fill(bencher, num_threads, len),
            );
            for (block_strategy, strategy_name) in [
                (BlockStrategy::Contiguous, "contiguous"),
                (BlockStrategy::RoundRobin, "round-robin"),
            ] {
                for &block_size in BLOCK_SIZES {
                    group.bench_with_input(
                        BenchmarkId::new(
                            format!("parablock_{strategy_name}_b{block_size}@{num_threads}"),
                            len,
                        ),
                        len,
                        |bencher, len| {
                            parablock::fill(bencher, block_strategy, num_threads, block_size, len)
                        },
                    );
                }
            }
        }
    }
    group.finish();
}

fn add(c: &mut Criterion) {
    let mut group = c.benchmark_group("add");
    for len in LENGTHS {
        group.throughput(Throughput::Bytes((len * 2 * size_of::<f32>()) as u64));
        group.bench_with_input(BenchmarkId::new("serial", len), len, serial::add);
        for &num_threads in NUM_THREADS {
            group.bench_with_input(
                BenchmarkId::new(format!("rayon@{num_threads}"), len),
                len,
                |bencher, len| rayon::add(bencher, num_threads, len),
            );
            for (block_strategy, strategy_name) in [
                (BlockStrategy::Contiguous, "contiguous"),
                (BlockStrategy::RoundRobin, "round-robin"),
            ] {
                for &block_size in BLOCK_SIZES {
                    group.bench_with_input(
                        BenchmarkId::new(
                            format!("parablock_{strategy_name}_b{block_size}@{num_threads}"),
                            len,
                        ),
                        len,
                        |bencher, len| {
                            parablock::add(bencher, block_strategy, num_threads, block_size, len)
                        },
                    );
                }
            }
        }
    }
    group.finish();
}

/// Baseline benchmarks using serial loops (without any multi-threading
/// involved).
mod serial {
    use criterion::{black_box, Bencher};

    pub fn fill(bencher: &mut Bencher, len: &usize) {
        let mut a = vec![0.0f32; *len];
        let mut b = vec![0.0f32; *len];

        let a_slice = a.as_mut_slice();
        let b_slice = b.as_mut_slice();

        bencher.iter(|| {
            black_box(a_slice.iter_mut())
                .enumerate()
                .for_each(|(i, x)| *x = (i + 1) as f32);
            black_box(b_slice.iter_mut())
                .enumerate()
                .for_each(|(i, x)| *x = (i + 11) as f32);
        });
    }

    pub fn add(bencher: &mut Bencher, len: &usize) {
        let left = (0..*len).map(|i| (i + 1) as f32).collect::<Vec<f32>>();
        let right = (0..*len).map(|i| (i + 11) as f32).collect::<Vec<f32>>();
        let mut output = vec![0.0f32; *len];

        let left_slice = left.as_slice();
        let right_slice = right.as_slice();
        let output_slice = output.as_mut_slice();

        bencher.iter(|| {
            black_box(left_slice)
                .iter()
                .zip(black_box(right_slice))
                .zip(black_box(output_slice.iter_mut()))
                .for_each(|((&a, &b), out)| *out = a + b)
        });
    }
}

/// Benchmarks using Rayon.
mod rayon {
    use criterion::{black_box, Bencher};
    use rayon::iter::{
        IndexedParallelIterator, IntoParallelRefIterator, IntoParallelRefMutIterator,
        ParallelIterator,
    };

    pub fn fill(bencher: &mut Bencher, num_threads: usize, len: &usize) {
        let mut a = vec![0.0f32; *len];
        let mut b = vec![0.0f32; *len];

        let a_slice = a.as_mut_slice();
        let b_slice = b.as_mut_slice();

        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .unwrap();
        thread_pool.install(|| {
            bencher.iter(|| {
                black_box(a_slice.par_iter_mut())
                    .enumerate()
                    .for_each(|(i, x)| *x = (i + 1) as f32);
                black_box(b_slice.par_iter_mut())
                    .enumerate()
                    .for_each(|(i, x)| *x = (i + 11) as f32);
            })
        });
    }

    pub fn add(bencher: &mut Bencher, num_threads: usize, len: &usize) {
        let left = (0..*len).map(|i| (i + 1) as f32).collect::<Vec<f32>>();
        let right = (0..*len).map(|i| (i + 11) as f32).collect::<Vec<f32>>();
        let mut output = vec![0.0f32; *len];

        let left_slice = left.as_slice();
        let right_slice = right.as_slice();
        let output_slice = output.as_mut_slice();

        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .unwrap();
        thread_pool.install(|| {
            bencher.iter(|| {
                black_box(left_slice)
                    .par_iter()
                    .zip(black_box(right_slice))
                    .zip(black_box(output_slice.par_iter_mut()))
                    .for_each(|((&a, &b), out)| *out = a + b)
            })
        });
    }
}

/// Benchmarks using Parablock.
mod parablock {
    use criterion::{black_box, Bencher};
    use parablock::slice::SyncSlice;
    use parablock::{BlockStrategy, CpuPinningPolicy, ThreadCount, ThreadPoolBuilder};
    use std::num::NonZeroUsize;

    pub fn fill(
        bencher: &mut Bencher,
        block_strategy: BlockStrategy,
        num_threads: usize,
        block_size: usize,
        len: &usize,
    ) {
        let mut a = vec![0.0f32; *len];
        let mut b = vec![0.0f32; *len];

        let a_view = SyncSlice::new(&mut a);
        let b_view = SyncSlice::new(&mut b);

        let block_size = NonZeroUsize::new(block_size).unwrap();
        let mut thread_pool = ThreadPoolBuilder {
            num_threads: ThreadCount::try_from(num_threads).unwrap(),
            block_strategy,
            cpu_pinning: CpuPinningPolicy::IfSupported,
        }
        .build();

        bencher.iter(|| {
            thread_pool.parallel_for(*len, block_size, |i| {
                // SAFETY: the executor visits each index exactly once per
                // loop, so this is the only access to slot `i` of either
                // array during each round.
                unsafe {
                    *black_box(&a_view).get_mut(i) = (i + 1) as f32;
                    *black_box(&b_view).get_mut(i) = (i + 11) as f32;
                }
            })
        });
    }

    pub fn add(
        bencher: &mut Bencher,
        block_strategy: BlockStrategy,
        num_threads: usize,
        block_size: usize,
        len: &usize,
    ) {
        let left = (0..*len).map(|i| (i + 1) as f32).collect::<Vec<f32>>();
        let right = (0..*len).map(|i| (i + 11) as f32).collect::<Vec<f32>>();
        let mut output = vec![0.0f32; *len];

        let left_slice = left.as_slice();
        let right_slice = right.as_slice();
        let output_view = SyncSlice::new(&mut output);

        let block_size = NonZeroUsize::new(block_size).unwrap();
        let mut thread_pool = ThreadPoolBuilder {
            num_threads: ThreadCount::try_from(num_threads).unwrap(),
            block_strategy,
            cpu_pinning: CpuPinningPolicy::IfSupported,
        }
        .build();

        bencher.iter(|| {
            thread_pool.parallel_for(*len, block_size, |i| {
                // SAFETY: the executor visits each index exactly once per
                // loop, so this is the only access to slot `i` of the output
                // during each round.
                unsafe {
                    *black_box(&output_view).get_mut(i) =
                        black_box(left_slice)[i] + black_box(right_slice)[i]
                };
            })
        });
    }
}

criterion_group!(benches, fill, add);
criterion_main!(benches);
