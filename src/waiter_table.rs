// Copyright (c) 2016 Daniel Grunwald
//
// Permission is hereby granted, free of charge, to any person obtaining a copy of this
// software and associated documentation files (the "Software"), to deal in the Software
// without restriction, including without limitation the rights to use, copy, modify, merge,
// publish, distribute, sublicense, and/or sell copies of the Software, and to permit persons
// to whom the Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all copies or
// substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR IMPLIED,
// INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A PARTICULAR
// PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE
// FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR
// OTHERWISE, ARISING FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! `WaiterMap<V, E>` — the per-primitive map from opaque key to a tabled
//! [`SafeContinuation`], plus the monotonic key generator spec.md §3 asks
//! for ("any unique token per wait site"). A plain `HashMap` is the
//! simplest safe-Rust rendition of the table; spec.md §9 explicitly
//! permits this over an intrusive list or a generational slot table.
//!
//! This type holds no lock of its own: every primitive embeds it inside
//! the *same* `parking_lot::Mutex` that guards its condition state (`set`,
//! `count`, `value`, ...), so that "check the condition" and "table or
//! resume this waiter" happen as one atomic step. A waiter table with its
//! own, separate lock would reopen exactly the registration/resume race
//! §4.1 exists to close: a `signal()` could drain an empty table moments
//! before a concurrent `wait()` — having already observed the unset
//! condition — inserts into it, stranding that waiter forever.
//!
//! Insertion order is tracked alongside the table itself so that
//! [`take_one`](Self::take_one) hands waiters out FIFO — the order permits
//! on a semaphore or a mutex release should go to whoever asked first.
//! `TaskQueue` additionally threads its own `VecDeque<WaitKey>` on top of
//! this for admission bookkeeping (peeking and conditionally popping the
//! head by flags) that this type has no reason to know about — see
//! `queue.rs`.

use std::collections::{HashMap, VecDeque};

/// Opaque per-wait-site identity, unique within a single `WaiterMap`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct WaitKey(u64);

use crate::continuation::SafeContinuation;

/// A waiter table for a primitive whose continuations carry success value
/// `V` and failure value `E`. Must be accessed only while the primitive's
/// own lock is held.
pub(crate) struct WaiterMap<V, E> {
    next_key: u64,
    order: VecDeque<WaitKey>,
    table: HashMap<WaitKey, SafeContinuation<V, E>>,
}

impl<V, E> WaiterMap<V, E> {
    pub(crate) fn new() -> Self {
        WaiterMap {
            next_key: 0,
            order: VecDeque::new(),
            table: HashMap::new(),
        }
    }

    /// Tables `cont` under a freshly generated key and returns the key so
    /// the caller can build an `on_cancel` closure that removes exactly
    /// this entry.
    pub(crate) fn insert(&mut self, cont: SafeContinuation<V, E>) -> WaitKey {
        let key = WaitKey(self.next_key);
        self.next_key += 1;
        self.table.insert(key, cont);
        self.order.push_back(key);
        key
    }

    /// Removes the entry for `key`, if still present. Called from the
    /// registry's cancellation hook.
    pub(crate) fn remove(&mut self, key: WaitKey) {
        self.table.remove(&key);
        self.order.retain(|&queued| queued != key);
    }

    /// Drains every tabled waiter so the caller can resume each outside the
    /// lock (or, equivalently, resume them while still holding it — both
    /// are conformant per spec.md §9). These are all released together, so
    /// unlike `take_one` the order among them is not meaningful.
    pub(crate) fn drain(&mut self) -> Vec<SafeContinuation<V, E>> {
        self.order.clear();
        self.table.drain().map(|(_, c)| c).collect()
    }

    /// Removes and returns the earliest-tabled waiter still present, or
    /// `None` if the table is empty — the permit-hand-off primitive for
    /// `AsyncSemaphore`/`AsyncMutex`, fair in admission order.
    pub(crate) fn take_one(&mut self) -> Option<SafeContinuation<V, E>> {
        let key = self.order.pop_front()?;
        self.table.remove(&key)
    }

    /// Removes and returns the entry for `key`, if still present. Used by
    /// `TaskQueue`, which tracks its own FIFO order separately and needs the
    /// continuation back to resume it (unlike [`remove`](Self::remove),
    /// which just discards it).
    pub(crate) fn take(&mut self, key: WaitKey) -> Option<SafeContinuation<V, E>> {
        self.order.retain(|&queued| queued != key);
        self.table.remove(&key)
    }

    pub(crate) fn len(&self) -> usize {
        self.table.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
