// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::ops::Range;
use std::ptr::NonNull;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// An ergonomic wrapper around a [`Mutex`]-[`Condvar`] pair.
pub struct Status<T> {
    mutex: Mutex<T>,
    condvar: Condvar,
}

impl<T> Status<T> {
    /// Creates a new status initialized with the given value.
    pub fn new(t: T) -> Self {
        Self {
            mutex: Mutex::new(t),
            condvar: Condvar::new(),
        }
    }

    /// Attempts to set the status to the given value and notifies one waiting
    /// thread.
    ///
    /// Fails if the [`Mutex`] is poisoned.
    pub fn try_notify_one(&self, t: T) -> Result<(), PoisonError<MutexGuard<'_, T>>> {
        *self.mutex.lock()? = t;
        self.condvar.notify_one();
        Ok(())
    }

    /// Sets the status to the given value and notifies all waiting threads.
    pub fn notify_all(&self, t: T) {
        *self.mutex.lock().unwrap() = t;
        self.condvar.notify_all();
    }

    /// Waits until the predicate is true on this status.
    ///
    /// This returns a [`MutexGuard`], allowing to further inspect or modify the
    /// status.
    pub fn wait_while(&self, predicate: impl FnMut(&mut T) -> bool) -> MutexGuard<T> {
        self.condvar
            .wait_while(self.mutex.lock().unwrap(), predicate)
            .unwrap()
    }
}

/// The loop body of a computation round: an operation applied to each block of
/// the iteration space, shareable with the worker threads.
pub type LoopBody<'a> = dyn Fn(Range<usize>) + Sync + 'a;

/// A lifetime-erased reference to a [`LoopBody`]. This acts as a
/// [`&'a LoopBody<'a>`](LoopBody) but whose lifetime can be adjusted via the
/// `unsafe` function [`get()`](Self::get).
pub struct BodyView {
    ptr: Option<NonNull<LoopBody<'static>>>,
}

impl BodyView {
    /// Creates a new empty reference.
    pub fn empty() -> Self {
        Self { ptr: None }
    }

    /// Sets the underlying value to the given reference. Subsequent calls to
    /// [`get()`](Self::get) must ensure that the obtained reference doesn't
    /// outlive the reference that was set here.
    // The transmute is necessary because the lifetime is coerced to 'static.
    pub fn set(&mut self, body: &LoopBody<'_>) {
        let ptr: NonNull<LoopBody<'_>> = NonNull::from(body);
        // SAFETY: this only erases the lifetime to 'static; the invariant that
        // the erased reference doesn't outlive the original is documented on
        // `get()` and is the caller's responsibility.
        let ptr: NonNull<LoopBody<'static>> = unsafe { std::mem::transmute(ptr) };
        self.ptr = Some(ptr);
    }

    /// Clears the underlying reference. Subsequent calls to
    /// [`get()`](Self::get) will obtain [`None`].
    pub fn clear(&mut self) {
        self.ptr = None;
    }

    /// Returns the reference that was previously set with [`set()`](Self::set),
    /// or [`None`] if no reference was set or if the last reference was
    /// erased by a call to [`clear()`](Self::clear).
    ///
    /// # Safety
    ///
    /// The underlying object must be valid and not mutated during the whole
    /// output lifetime.
    // The cast is necessary because the lifetime is coerced to 'a.
    #[allow(clippy::unnecessary_cast)]
    pub unsafe fn get<'a>(&self) -> Option<&'a LoopBody<'a>> {
        self.ptr.map(|static_ptr| {
            let ptr = static_ptr.as_ptr() as *mut LoopBody<'a>;
            // SAFETY:
            // - This pointer points to a valid initialized `LoopBody`, as previously set
            //   via `set()`.
            // - The underlying `LoopBody` outlives the output lifetime, as ensured by the
            //   caller.
            // - The underlying `LoopBody` isn't mutated during the whole output lifetime,
            //   as ensured by the caller.
            unsafe { &*ptr }
        })
    }
}

/// SAFETY:
///
/// A [`BodyView`] acts as a [`&'a LoopBody<'a>`](LoopBody), and `LoopBody` is
/// [`Sync`]. Therefore it is sound to send it to another thread.
unsafe impl Send for BodyView {}
/// SAFETY:
///
/// A [`BodyView`] acts as a [`&'a LoopBody<'a>`](LoopBody), and `LoopBody` is
/// [`Sync`]. Therefore it is sound to share it among threads.
unsafe impl Sync for BodyView {}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier, RwLock};

    #[test]
    fn body_view_basic_usage() {
        let mut view = BodyView::empty();

        let count = AtomicUsize::new(0);
        let body = |range: Range<usize>| {
            count.fetch_add(range.len(), Ordering::Relaxed);
        };
        view.set(&body);

        let borrowed = unsafe { view.get().unwrap() };
        borrowed(0..10);
        borrowed(10..15);
        assert_eq!(count.load(Ordering::Relaxed), 15);

        view.clear();
        assert!(unsafe { view.get() }.is_none());
    }

    // This ignored test showcases how to misuse the unsafe API by obtaining a
    // reference whose lifetime extends beyond the underlying loop body's.
    // Running it under Miri returns a failure.
    #[ignore]
    #[test]
    fn body_view_bad_lifetime() {
        let mut view = BodyView::empty();
        {
            let count = AtomicUsize::new(0);
            let body = move |range: Range<usize>| {
                count.fetch_add(range.len(), Ordering::Relaxed);
            };
            view.set(&body);
        }
        // Undefined behavior: This obtains a reference to a loop body which
        // isn't live anymore.
        let body = unsafe { view.get().unwrap() };
        body(0..10);
    }

    #[test]
    fn body_view_multi_threaded() {
        const NUM_THREADS: usize = 2;

        let view = Arc::new(RwLock::new(BodyView::empty()));
        let steps: Arc<[_; 2]> = Arc::new(std::array::from_fn(|_| Barrier::new(NUM_THREADS + 1)));
        let count = Arc::new(AtomicUsize::new(0));

        let main = std::thread::spawn({
            let view = view.clone();
            let steps = steps.clone();
            let count = count.clone();
            move || {
                let body = move |range: Range<usize>| {
                    count.fetch_add(range.len(), Ordering::SeqCst);
                };
                view.write().unwrap().set(&body);

                steps[0].wait();

                steps[1].wait();

                view.write().unwrap().clear();
            }
        });

        let threads: [_; NUM_THREADS] = std::array::from_fn(move |i| {
            std::thread::spawn({
                let view = view.clone();
                let steps = steps.clone();
                move || {
                    steps[0].wait();

                    let guard = view.read().unwrap();
                    let body = unsafe { guard.get().unwrap() };
                    body(i * 10..i * 10 + 5);
                    drop(guard);

                    steps[1].wait();
                }
            })
        });

        main.join().unwrap();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(count.load(Ordering::SeqCst), NUM_THREADS * 5);
    }
}
