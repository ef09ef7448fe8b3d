// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Serial baseline of the array-addition demo, using plain loops without any
//! multi-threading involved.

/// Number of elements in each array.
const LEN: usize = 1000;
/// Number of leading elements to print per array.
const SHOW: usize = 10;

fn main() {
    println!("Adding arrays serially!");

    let mut a = vec![0.0f32; LEN];
    let mut b = vec![0.0f32; LEN];
    let mut c = vec![0.0f32; LEN];

    for i in 0..LEN {
        a[i] = (i + 1) as f32;
        b[i] = (i + 11) as f32;
    }

    for i in 0..LEN {
        c[i] = a[i] + b[i];
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
