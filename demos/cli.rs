// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! CLI tool to run the array-addition demo with configurable parameters.

use clap::{Parser, ValueEnum};
use parablock::slice::SyncSlice;
use parablock::{BlockStrategy, CpuPinningPolicy, ThreadCount, ThreadPoolBuilder};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha12Rng;
use std::num::NonZeroUsize;

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let mut thread_pool = ThreadPoolBuilder {
        num_threads: match cli.num_threads {
            Some(num_threads) => ThreadCount::Count(num_threads),
            None => ThreadCount::AvailableParallelism,
        },
        block_strategy: match cli.block_strategy {
            BlockStrategyCli::Contiguous => BlockStrategy::Contiguous,
            BlockStrategyCli::RoundRobin => BlockStrategy::RoundRobin,
        },
        cpu_pinning: CpuPinningPolicy::IfSupported,
    }
    .build();

    let len = cli.len;
    let block_size = cli.block_size;

    let mut a = vec![0.0f32; len];
    let mut b = vec![0.0f32; len];
    let mut c = vec![0.0f32; len];

    match cli.scenario {
        Scenario::Fixed => {
            let a_view = SyncSlice::new(&mut a);
            let b_view = SyncSlice::new(&mut b);
            thread_pool.parallel_for(len, block_size, |i| {
                // SAFETY: the executor visits each index exactly once, so this
                // is the only access to slot `i` of either array during this
                // loop.
                unsafe {
                    *a_view.get_mut(i) = (i + 1) as f32;
                    *b_view.get_mut(i) = (i + 11) as f32;
                }
            });
        }
        Scenario::Random => {
            let a_view = SyncSlice::new(&mut a);
            let b_view = SyncSlice::new(&mut b);
            let seed = cli.seed;
            thread_pool.parallel_for_blocks(len, block_size, |range| {
                let mut rng = ChaCha12Rng::seed_from_u64(seed + range.start as u64);
                for i in range {
                    // SAFETY: the executor yields each block exactly once and
                    // blocks are disjoint, so this is the only access to slot
                    // `i` of either array during this loop.
                    unsafe {
                        *a_view.get_mut(i) = rng.random_range(0.0..100.0);
                        *b_view.get_mut(i) = rng.random_range(0.0..100.0);
                    }
                }
            });
        }
    }

    // The fill loop above only returns once every slot of `a` and `b` is
    // written, so the sum loop reads fully initialized inputs.
    {
        let c_view = SyncSlice::new(&mut c);
        let (a, b) = (&a, &b);
        thread_pool.parallel_for(len, block_size, |i| {
            // SAFETY: the executor visits each index exactly once, so this is
            // the only access to slot `i` of the output during this loop.
            unsafe { *c_view.get_mut(i) = a[i] + b[i] };
        });
    }

    println!("Results (showing first {} elements):", cli.show);
    println!("Array a: {}", format_first(&a, cli.show));
    println!("Array b: {}", format_first(&b, cli.show));
    println!("Array c: {}", format_first(&c, cli.show));
}

/// Formats the first `show` elements of the array, separated by `" - "` and
/// followed by a trailing `" -"`.
fn format_first(values: &[f32], show: usize) -> String {
    let show = show.min(values.len());
    values[..show]
        .iter()
        .map(|value| value.to_string())
        .collect::<Vec<String>>()
        .join(" - ")
        + " -"
}

/// CLI tool to run the array-addition demo with configurable parameters.
#[derive(Parser, Debug, PartialEq, Eq)]
#[command(version)]
struct Cli {
    /// Number of worker threads. Default to the available parallelism.
    #[arg(long)]
    num_threads: Option<NonZeroUsize>,

    /// Policy to distribute blocks among threads.
    #[arg(long, value_enum, default_value_t = BlockStrategyCli::RoundRobin)]
    block_strategy: BlockStrategyCli,

    /// How to fill the two source arrays.
    #[arg(long, value_enum, default_value_t = Scenario::Fixed)]
    scenario: Scenario,

    /// Number of elements in each array.
    #[arg(long, default_value_t = 1000)]
    len: usize,

    /// Number of indices per block.
    #[arg(long, default_value_t = NonZeroUsize::new(100).unwrap())]
    block_size: NonZeroUsize,

    /// Number of leading elements to print per array.
    #[arg(long, default_value_t = 10)]
    show: usize,

    /// Seed from which each block's generator is derived. Used only for the
    /// random scenario.
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

/// Policy to distribute blocks among threads.
#[derive(ValueEnum, Clone, Debug, PartialEq, Eq)]
enum BlockStrategyCli {
    /// Each thread processes a consecutive run of blocks.
    Contiguous,
    /// Thread `t` of `T` processes blocks `t`, `t + T`, `t + 2*T`, etc.
    RoundRobin,
}

/// How to fill the two source arrays.
#[derive(ValueEnum, Clone, Debug, PartialEq, Eq)]
enum Scenario {
    /// Deterministic values: `a[i] = i + 1` and `b[i] = i + 11`.
    Fixed,
    /// Pseudo-random samples of `[0, 100)`, seeded per block.
    Random,
}
