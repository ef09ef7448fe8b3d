// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A thread pool executing parallel block loops at a lightweight cost.

use super::blocks::{
    BlockFactory, BlockOrchestrator, Blocks, ContiguousBlockFactory, RoundRobinBlockFactory,
};
use super::sync::{make_lending_group, Borrower, Lender, WorkerState};
use crate::macros::{log_debug, log_error, log_warn};
// Platforms that support `libc::sched_setaffinity()`.
#[cfg(all(
    not(miri),
    any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    )
))]
use nix::{
    sched::{sched_setaffinity, CpuSet},
    unistd::Pid,
};
use std::convert::TryFrom;
use std::num::NonZeroUsize;
use std::ops::Range;
use std::thread::JoinHandle;

/// Number of threads to spawn in a thread pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadCount {
    /// Spawn the number of threads returned by
    /// [`std::thread::available_parallelism()`].
    AvailableParallelism,
    /// Spawn the given number of threads.
    Count(NonZeroUsize),
}

impl TryFrom<usize> for ThreadCount {
    type Error = <NonZeroUsize as TryFrom<usize>>::Error;

    fn try_from(thread_count: usize) -> Result<Self, Self::Error> {
        let count = NonZeroUsize::try_from(thread_count)?;
        Ok(ThreadCount::Count(count))
    }
}

/// Strategy to distribute the blocks of an iteration space among threads.
///
/// Both strategies are static: every block is assigned to its thread before
/// the loop starts, and each index of the iteration space is processed exactly
/// once. They only differ in which thread touches which part of the data.
#[derive(Clone, Copy)]
pub enum BlockStrategy {
    /// Each thread processes a consecutive run of blocks of near-equal length.
    Contiguous,
    /// Thread `t` of `T` processes blocks `t`, `t + T`, `t + 2*T`, etc.
    RoundRobin,
}

/// Policy to pin worker threads to CPUs.
#[derive(Clone, Copy)]
pub enum CpuPinningPolicy {
    /// Don't pin worker threads to CPUs.
    No,
    /// Pin each worker thread to a CPU, if CPU pinning is supported and
    /// implemented on this platform.
    IfSupported,
    /// Pin each worker thread to a CPU. If CPU pinning isn't supported on this
    /// platform (or not implemented), building a thread pool will panic.
    Always,
}

/// A builder for [`ThreadPool`].
pub struct ThreadPoolBuilder {
    /// Number of worker threads to spawn in the pool.
    pub num_threads: ThreadCount,
    /// Strategy to distribute the blocks of an iteration space among threads.
    pub block_strategy: BlockStrategy,
    /// Policy to pin worker threads to CPUs.
    pub cpu_pinning: CpuPinningPolicy,
}

impl ThreadPoolBuilder {
    /// Spawns a thread pool.
    ///
    /// ```
    /// # use parablock::{BlockStrategy, CpuPinningPolicy, ThreadCount, ThreadPoolBuilder};
    /// # use std::num::NonZeroUsize;
    /// # use std::sync::atomic::{AtomicU64, Ordering};
    /// let pool_builder = ThreadPoolBuilder {
    ///     num_threads: ThreadCount::AvailableParallelism,
    ///     block_strategy: BlockStrategy::RoundRobin,
    ///     cpu_pinning: CpuPinningPolicy::No,
    /// };
    /// let mut thread_pool = pool_builder.build();
    ///
    /// let sum = AtomicU64::new(0);
    /// thread_pool.parallel_for(10, NonZeroUsize::new(3).unwrap(), |i| {
    ///     sum.fetch_add(i as u64 + 1, Ordering::Relaxed);
    /// });
    /// assert_eq!(sum.into_inner(), 5 * 11);
    /// ```
    pub fn build(&self) -> ThreadPool {
        ThreadPool::new(self)
    }
}

/// A thread pool that can execute parallel block loops.
///
/// Worker threads are spawned once by [`ThreadPoolBuilder::build()`] and
/// parked between loops, so the pool can be reused for many rounds. Dropping
/// the pool joins all the worker threads.
pub struct ThreadPool {
    inner: ThreadPoolEnum,
}

impl ThreadPool {
    /// Creates a new thread pool using the given parameters.
    fn new(builder: &ThreadPoolBuilder) -> Self {
        Self {
            inner: ThreadPoolEnum::new(builder),
        }
    }

    /// Returns the number of worker threads that have been spawned in this
    /// thread pool.
    pub fn num_threads(&self) -> NonZeroUsize {
        self.inner.num_threads()
    }

    /// Executes `op(i)` for every `i` in `0..len` on the pool's worker
    /// threads, and returns once all invocations have completed.
    ///
    /// The iteration space is cut into `len.div_ceil(block_size)` contiguous
    /// blocks of `block_size` indices each (the final block is truncated when
    /// `block_size` doesn't divide `len`), distributed among the threads
    /// following the pool's [`BlockStrategy`]. Each index is passed to `op`
    /// exactly once; no ordering is guaranteed between indices in different
    /// blocks.
    ///
    /// The call is synchronous: when it returns, all writes performed by `op`
    /// are visible to the caller, so two successive loops are fully ordered
    /// with respect to each other.
    ///
    /// It is the caller's responsibility that `op` is safe to run concurrently
    /// for different indices.
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero, or if `op` panicked on any worker thread.
    ///
    /// ```
    /// # use parablock::{BlockStrategy, CpuPinningPolicy, ThreadCount, ThreadPoolBuilder};
    /// # use std::num::NonZeroUsize;
    /// # use std::sync::atomic::{AtomicUsize, Ordering};
    /// # let mut thread_pool = ThreadPoolBuilder {
    /// #     num_threads: ThreadCount::AvailableParallelism,
    /// #     block_strategy: BlockStrategy::Contiguous,
    /// #     cpu_pinning: CpuPinningPolicy::No,
    /// # }
    /// # .build();
    /// let visited = AtomicUsize::new(0);
    /// thread_pool.parallel_for(1000, NonZeroUsize::new(333).unwrap(), |_| {
    ///     visited.fetch_add(1, Ordering::Relaxed);
    /// });
    /// assert_eq!(visited.into_inner(), 1000);
    /// ```
    pub fn parallel_for(
        &mut self,
        len: usize,
        block_size: NonZeroUsize,
        op: impl Fn(usize) + Sync,
    ) {
        self.parallel_for_blocks(len, block_size, |range| {
            for i in range {
                op(i);
            }
        });
    }

    /// Executes `op(range)` for every block of the iteration space `0..len`,
    /// and returns once all invocations have completed.
    ///
    /// This is the per-block variant of [`parallel_for()`](Self::parallel_for):
    /// `op` receives each block's index range in one call, which is useful to
    /// amortize per-block state such as a seeded random-number generator.
    /// Across all calls, the ranges are pairwise disjoint and cover `0..len`
    /// exactly once.
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero, or if `op` panicked on any worker thread.
    ///
    /// ```
    /// # use parablock::{BlockStrategy, CpuPinningPolicy, ThreadCount, ThreadPoolBuilder};
    /// # use std::num::NonZeroUsize;
    /// # use std::sync::atomic::{AtomicUsize, Ordering};
    /// # let mut thread_pool = ThreadPoolBuilder {
    /// #     num_threads: ThreadCount::AvailableParallelism,
    /// #     block_strategy: BlockStrategy::Contiguous,
    /// #     cpu_pinning: CpuPinningPolicy::No,
    /// # }
    /// # .build();
    /// let num_blocks = AtomicUsize::new(0);
    /// thread_pool.parallel_for_blocks(1000, NonZeroUsize::new(333).unwrap(), |range| {
    ///     assert!(range.len() == 333 || range.len() == 1);
    ///     num_blocks.fetch_add(1, Ordering::Relaxed);
    /// });
    /// assert_eq!(num_blocks.into_inner(), 4);
    /// ```
    pub fn parallel_for_blocks(
        &mut self,
        len: usize,
        block_size: NonZeroUsize,
        op: impl Fn(Range<usize>) + Sync,
    ) {
        assert!(
            len != 0,
            "cannot execute a parallel loop over an empty iteration space"
        );
        self.inner.parallel_for_blocks(len, block_size, op);
    }
}

/// Underlying [`ThreadPool`] implementation, dispatching over the
/// [`BlockStrategy`].
enum ThreadPoolEnum {
    Contiguous(ThreadPoolImpl<ContiguousBlockFactory>),
    RoundRobin(ThreadPoolImpl<RoundRobinBlockFactory>),
}

impl ThreadPoolEnum {
    /// Creates a new thread pool using the given parameters.
    fn new(builder: &ThreadPoolBuilder) -> Self {
        let num_threads: NonZeroUsize = match builder.num_threads {
            ThreadCount::AvailableParallelism => std::thread::available_parallelism()
                .expect("Getting the available parallelism failed"),
            ThreadCount::Count(count) => count,
        };
        let num_threads: usize = num_threads.into();
        match builder.block_strategy {
            BlockStrategy::Contiguous => ThreadPoolEnum::Contiguous(ThreadPoolImpl::new(
                num_threads,
                ContiguousBlockFactory::new(num_threads),
                builder.cpu_pinning,
            )),
            BlockStrategy::RoundRobin => ThreadPoolEnum::RoundRobin(ThreadPoolImpl::new(
                num_threads,
                RoundRobinBlockFactory::new(num_threads),
                builder.cpu_pinning,
            )),
        }
    }

    /// Returns the number of worker threads that have been spawned in this
    /// thread pool.
    fn num_threads(&self) -> NonZeroUsize {
        match self {
            ThreadPoolEnum::Contiguous(inner) => inner.num_threads(),
            ThreadPoolEnum::RoundRobin(inner) => inner.num_threads(),
        }
    }

    /// Executes `op` over every block of the iteration space `0..len`.
    fn parallel_for_blocks(
        &mut self,
        len: usize,
        block_size: NonZeroUsize,
        op: impl Fn(Range<usize>) + Sync,
    ) {
        match self {
            ThreadPoolEnum::Contiguous(inner) => inner.parallel_for_blocks(len, block_size, op),
            ThreadPoolEnum::RoundRobin(inner) => inner.parallel_for_blocks(len, block_size, op),
        }
    }
}

/// Underlying [`ThreadPool`] implementation, specialized to a
/// [`BlockStrategy`].
struct ThreadPoolImpl<F: BlockFactory> {
    /// Handles to all the worker threads in the pool.
    threads: Vec<WorkerThreadHandle>,
    /// Orchestrator for the block sequences distributed to the threads.
    block_orchestrator: F::Orchestrator,
    /// Loop body lent to the worker threads for each round.
    body: Lender,
}

/// Handle to a worker thread in a thread pool.
struct WorkerThreadHandle {
    /// Thread handle object.
    handle: JoinHandle<()>,
}

impl<F: BlockFactory> ThreadPoolImpl<F> {
    /// Creates a new thread pool using the given parameters.
    fn new(num_threads: usize, block_factory: F, cpu_pinning: CpuPinningPolicy) -> Self
    where
        F::Blocks: Send + 'static,
    {
        let (lender, borrowers) = make_lending_group(num_threads);

        #[cfg(any(
            miri,
            not(any(
                target_os = "android",
                target_os = "dragonfly",
                target_os = "freebsd",
                target_os = "linux"
            ))
        ))]
        match cpu_pinning {
            CpuPinningPolicy::No => (),
            CpuPinningPolicy::IfSupported => {
                log_warn!("Pinning threads to CPUs is not implemented on this platform.")
            }
            CpuPinningPolicy::Always => {
                panic!("Pinning threads to CPUs is not implemented on this platform.")
            }
        }

        let threads = borrowers
            .into_iter()
            .enumerate()
            .map(|(id, borrower)| {
                let mut context = ThreadContext {
                    blocks: block_factory.blocks(id),
                    body: borrower,
                };
                WorkerThreadHandle {
                    handle: std::thread::spawn(move || {
                        #[cfg(all(
                            not(miri),
                            any(
                                target_os = "android",
                                target_os = "dragonfly",
                                target_os = "freebsd",
                                target_os = "linux"
                            )
                        ))]
                        match cpu_pinning {
                            CpuPinningPolicy::No => (),
                            CpuPinningPolicy::IfSupported => {
                                let mut cpu_set = CpuSet::new();
                                if let Err(_e) = cpu_set.set(id) {
                                    log_warn!("Failed to set CPU affinity for thread #{id}: {_e}");
                                } else if let Err(_e) =
                                    sched_setaffinity(Pid::from_raw(0), &cpu_set)
                                {
                                    log_warn!("Failed to set CPU affinity for thread #{id}: {_e}");
                                } else {
                                    log_debug!("Pinned thread #{id} to CPU #{id}");
                                }
                            }
                            CpuPinningPolicy::Always => {
                                let mut cpu_set = CpuSet::new();
                                if let Err(e) = cpu_set.set(id) {
                                    panic!("Failed to set CPU affinity for thread #{id}: {e}");
                                } else if let Err(e) = sched_setaffinity(Pid::from_raw(0), &cpu_set)
                                {
                                    panic!("Failed to set CPU affinity for thread #{id}: {e}");
                                } else {
                                    log_debug!("Pinned thread #{id} to CPU #{id}");
                                }
                            }
                        }
                        context.run()
                    }),
                }
            })
            .collect();
        log_debug!("[main thread] Spawned threads");

        Self {
            threads,
            block_orchestrator: block_factory.orchestrator(),
            body: lender,
        }
    }

    /// Returns the number of worker threads that have been spawned in this
    /// thread pool.
    fn num_threads(&self) -> NonZeroUsize {
        self.threads.len().try_into().unwrap()
    }

    /// Executes `op` over every block of the iteration space `0..len`.
    ///
    /// The block partition derives from the safety contract of
    /// [`BlockFactory`]: after the `reset_blocks()` call, the block sequences
    /// iterated by the worker threads yield pairwise disjoint ranges whose
    /// union is exactly `0..len`, so `op` receives each block exactly once.
    fn parallel_for_blocks(
        &mut self,
        len: usize,
        block_size: NonZeroUsize,
        op: impl Fn(Range<usize>) + Sync,
    ) {
        self.block_orchestrator.reset_blocks(len, block_size);
        self.body.lend(&op);
    }
}

impl<F: BlockFactory> Drop for ThreadPoolImpl<F> {
    /// Joins all the threads in the pool.
    #[allow(clippy::single_match, clippy::unused_enumerate_index)]
    fn drop(&mut self) {
        self.body.finish_workers();

        log_debug!("[main thread] Joining threads in the pool...");
        for (_i, t) in self.threads.drain(..).enumerate() {
            let result = t.handle.join();
            match result {
                Ok(_) => log_debug!("[main thread] Thread {_i} joined with result: {result:?}"),
                Err(_) => log_error!("[main thread] Thread {_i} joined with result: {result:?}"),
            }
        }
        log_debug!("[main thread] Joined threads.");
    }
}

/// Context object owned by a worker thread.
struct ThreadContext<B: Blocks> {
    /// Blocks that this worker thread needs to process.
    blocks: B,
    /// Loop body borrowed from the main thread for each round.
    body: Borrower,
}

impl<B: Blocks> ThreadContext<B> {
    /// Main function run by this thread.
    fn run(&mut self) {
        loop {
            let blocks = &self.blocks;
            match self.body.borrow(|body| {
                for range in blocks.iter() {
                    body(range);
                }
            }) {
                WorkerState::Finished => break,
                WorkerState::Ready => continue,
            }
        }
    }
}
