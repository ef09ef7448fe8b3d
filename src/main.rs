// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Demo program that fills two arrays and adds them element-wise, each phase
//! running as one parallel block loop.

use parablock::slice::SyncSlice;
use parablock::{BlockStrategy, CpuPinningPolicy, ThreadCount, ThreadPoolBuilder};
use std::num::NonZeroUsize;

/// Number of elements in each array.
const LEN: usize = 1000;
/// Number of indices per block.
const BLOCK_SIZE: usize = 100;
/// Number of leading elements to print per array.
const SHOW: usize = 10;

fn main() {
    println!("Adding arrays in parallel!");

    let mut thread_pool = ThreadPoolBuilder {
        num_threads: ThreadCount::AvailableParallelism,
        block_strategy: BlockStrategy::RoundRobin,
        cpu_pinning: CpuPinningPolicy::No,
    }
    .build();

    let block_size = NonZeroUsize::new(BLOCK_SIZE).unwrap();

    let mut a = vec![0.0f32; LEN];
    let mut b = vec![0.0f32; LEN];
    let mut c = vec![0.0f32; LEN];

    {
        let a_view = SyncSlice::new(&mut a);
        let b_view = SyncSlice::new(&mut b);
        thread_pool.parallel_for(LEN, block_size, |i| {
            // SAFETY: the executor visits each index exactly once, so this is
            // the only access to slot `i` of either array during this loop.
            unsafe {
                *a_view.get_mut(i) = (i + 1) as f32;
                *b_view.get_mut(i) = (i + 11) as f32;
            }
        });
    }

    // The fill loop above only returns once every slot of `a` and `b` is
    // written, so the sum loop reads fully initialized inputs.
    {
        let c_view = SyncSlice::new(&mut c);
        let (a, b) = (&a, &b);
        thread_pool.parallel_for(LEN, block_size, |i| {
            // SAFETY: the executor visits each index exactly once, so this is
            // the only access to slot `i` of the output during this loop.
            unsafe { *c_view.get_mut(i) = a[i] + b[i] };
        });
    }

    println!("Results (showing first {SHOW} elements):");
    println!("Array a: {}", format_first(&a, SHOW));
    println!("Array b: {}", format_first(&b, SHOW));
    println!("Array c: {}", format_first(&c, SHOW));
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
