// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Static partitioning of a fixed iteration space into blocks.

use crossbeam_utils::CachePadded;
use std::num::NonZeroUsize;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A factory for handing out blocks of iterations to various threads.
///
/// # Safety
///
/// Implementers of the [`BlockFactory`] trait must guarantee the following
/// contract.
///
/// Given a number of threads `num_threads` and a factory created by
/// `BlockFactory::new(num_threads)`, from which are derived `num_threads`
/// block sequences as `(0..num_threads).map(|i| factory.blocks(i)).collect()`
/// and an orchestrator as `factory.orchestrator()`:
///
/// - Given a number of elements `num_elements` and a block size `block_size`,
///   calling `orchestrator.reset_blocks(num_elements, block_size)` followed by
///   `blocks.iter()` on all the block sequences, the yielded ranges are
///   pairwise disjoint and their union is exactly `0..num_elements`. In other
///   words, each index in `0..num_elements` appears in one and only one
///   yielded range.
pub trait BlockFactory {
    /// Type of block sequence handed out to each thread.
    type Blocks: Blocks;
    /// Type of orchestrator for all the block sequences of this factory.
    type Orchestrator: BlockOrchestrator;

    /// Creates a new factory for an iteration space split across the given
    /// number of threads.
    fn new(num_threads: usize) -> Self;

    /// Returns the orchestrator object for all the block sequences created by
    /// this factory.
    fn orchestrator(self) -> Self::Orchestrator;

    /// Returns the block sequence for the given thread.
    fn blocks(&self, thread_id: usize) -> Self::Blocks;
}

/// An orchestrator for the block sequences given to all the threads.
pub trait BlockOrchestrator {
    /// Resets the iteration space to prepare a new computation round.
    fn reset_blocks(&self, num_elements: usize, block_size: NonZeroUsize);
}

/// The sequence of blocks that one thread processes during a round.
pub trait Blocks {
    /// Type of iterator returned by [`iter()`](Self::iter).
    type Iter<'a>: Iterator<Item = Range<usize>>
    where
        Self: 'a;

    /// Returns an iterator over the index ranges of the blocks owned by this
    /// thread.
    fn iter(&self) -> Self::Iter<'_>;
}

/// Dimensions of the iteration space for the current round, shared between the
/// orchestrator and the per-thread block sequences.
struct Layout {
    /// Total number of elements.
    num_elements: AtomicUsize,
    /// Number of indices per block. Never zero (`reset_blocks()` takes a
    /// [`NonZeroUsize`]), which keeps the block-count arithmetic well-defined.
    block_size: AtomicUsize,
}

impl Layout {
    /// Creates a layout for an empty iteration space.
    fn new() -> Self {
        Self {
            num_elements: AtomicUsize::new(0),
            block_size: AtomicUsize::new(1),
        }
    }

    /// Loads the dimensions of the current round.
    ///
    /// This uses `Ordering::Relaxed`, which is fine because it's the caller's
    /// responsibility to ensure that the `reset_blocks()` call happens before
    /// iterating any block sequence.
    fn load(&self) -> (usize, usize) {
        (
            self.num_elements.load(Ordering::Relaxed),
            self.block_size.load(Ordering::Relaxed),
        )
    }

    /// Publishes the dimensions for a new round.
    fn store(&self, num_elements: usize, block_size: NonZeroUsize) {
        self.num_elements.store(num_elements, Ordering::Relaxed);
        self.block_size
            .store(usize::from(block_size), Ordering::Relaxed);
    }
}

/// An orchestrator that publishes the round's dimensions to the per-thread
/// block sequences.
pub struct LayoutOrchestrator {
    /// Dimensions of the iteration space.
    layout: Arc<CachePadded<Layout>>,
}

impl BlockOrchestrator for LayoutOrchestrator {
    fn reset_blocks(&self, num_elements: usize, block_size: NonZeroUsize) {
        self.layout.store(num_elements, block_size);
    }
}

/// A factory that hands each thread a contiguous run of blocks.
pub struct ContiguousBlockFactory {
    /// Number of threads that iterate.
    num_threads: usize,
    /// Dimensions of the iteration space.
    layout: Arc<CachePadded<Layout>>,
}

// Here is a proof that `ContiguousBlockFactory` upholds the safety contract of
// `BlockFactory`.
//
// Upon calling `reset_blocks(num_elements, block_size)`, the shared `Layout`
// is updated to these dimensions. The iteration space then contains
// `num_blocks = num_elements.div_ceil(block_size)` blocks, where block `k`
// covers the indices `k * block_size..min((k + 1) * block_size, num_elements)`.
// By construction consecutive blocks are adjacent, block 0 starts at index 0,
// and the last block ends at `num_elements`, so the blocks partition
// `0..num_elements`.
//
// Thread `i` is handed the run of blocks from `(i * num_blocks) / num_threads`
// (inclusive) to `((i + 1) * num_blocks) / num_threads` (exclusive). These
// runs are adjacent, the first run starts at block 0 and the last run ends at
// block `num_blocks`, so each block belongs to one and only one thread. This
// ensures full coverage of `0..num_elements`, as well as uniqueness.
impl BlockFactory for ContiguousBlockFactory {
    type Blocks = ContiguousBlocks;
    type Orchestrator = LayoutOrchestrator;

    fn new(num_threads: usize) -> Self {
        Self {
            num_threads,
            layout: Arc::new(CachePadded::new(Layout::new())),
        }
    }

    fn orchestrator(self) -> LayoutOrchestrator {
        LayoutOrchestrator {
            layout: self.layout,
        }
    }

    fn blocks(&self, thread_id: usize) -> ContiguousBlocks {
        ContiguousBlocks {
            id: thread_id,
            num_threads: self.num_threads,
            layout: self.layout.clone(),
        }
    }
}

/// A contiguous run of blocks owned by one thread.
pub struct ContiguousBlocks {
    /// Index of the thread that owns this run.
    id: usize,
    /// Total number of threads.
    num_threads: usize,
    /// Dimensions of the iteration space.
    layout: Arc<CachePadded<Layout>>,
}

impl Blocks for ContiguousBlocks {
    type Iter<'a> = BlockIter;

    fn iter(&self) -> BlockIter {
        let (num_elements, block_size) = self.layout.load();
        let num_blocks = num_elements.div_ceil(block_size);
        BlockIter {
            next_block: (self.id * num_blocks) / self.num_threads,
            end_block: ((self.id + 1) * num_blocks) / self.num_threads,
            stride: 1,
            num_elements,
            block_size,
        }
    }
}

/// A factory that hands out blocks to threads in round-robin order.
pub struct RoundRobinBlockFactory {
    /// Number of threads that iterate.
    num_threads: usize,
    /// Dimensions of the iteration space.
    layout: Arc<CachePadded<Layout>>,
}

// Here is a proof that `RoundRobinBlockFactory` upholds the safety contract of
// `BlockFactory`.
//
// The blocks are laid out as for `ContiguousBlockFactory` (see the proof
// above): `num_blocks` adjacent blocks partitioning `0..num_elements`.
//
// Thread `i` is handed the blocks `i`, `i + num_threads`, `i + 2 *
// num_threads`, etc., below `num_blocks`. Each block `k < num_blocks` belongs
// to exactly the thread `k % num_threads`, so each block is yielded once and
// only once across the threads. This ensures full coverage of
// `0..num_elements`, as well as uniqueness.
impl BlockFactory for RoundRobinBlockFactory {
    type Blocks = RoundRobinBlocks;
    type Orchestrator = LayoutOrchestrator;

    fn new(num_threads: usize) -> Self {
        Self {
            num_threads,
            layout: Arc::new(CachePadded::new(Layout::new())),
        }
    }

    fn orchestrator(self) -> LayoutOrchestrator {
        LayoutOrchestrator {
            layout: self.layout,
        }
    }

    fn blocks(&self, thread_id: usize) -> RoundRobinBlocks {
        RoundRobinBlocks {
            id: thread_id,
            num_threads: self.num_threads,
            layout: self.layout.clone(),
        }
    }
}

/// An interleaved sequence of blocks owned by one thread.
pub struct RoundRobinBlocks {
    /// Index of the thread that owns this sequence.
    id: usize,
    /// Total number of threads.
    num_threads: usize,
    /// Dimensions of the iteration space.
    layout: Arc<CachePadded<Layout>>,
}

impl Blocks for RoundRobinBlocks {
    type Iter<'a> = BlockIter;

    fn iter(&self) -> BlockIter {
        let (num_elements, block_size) = self.layout.load();
        BlockIter {
            next_block: self.id,
            end_block: num_elements.div_ceil(block_size),
            stride: self.num_threads,
            num_elements,
            block_size,
        }
    }
}

/// Iterator over the index ranges of a sequence of blocks.
pub struct BlockIter {
    /// Position of the next block to yield.
    next_block: usize,
    /// First block position beyond this sequence.
    end_block: usize,
    /// Distance between consecutive block positions of this sequence.
    stride: usize,
    /// Total number of elements.
    num_elements: usize,
    /// Number of indices per block.
    block_size: usize,
}

impl Iterator for BlockIter {
    type Item = Range<usize>;

    #[inline(always)]
    fn next(&mut self) -> Option<Range<usize>> {
        if self.next_block >= self.end_block {
            return None;
        }
        let start = self.next_block * self.block_size;
        // The final block is truncated when the block size doesn't divide the
        // number of elements.
        let end = (start + self.block_size).min(self.num_elements);
        self.next_block += self.stride;
        Some(start..end)
    }
}
