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

//! `SafeContinuation<V, E>` — an at-most-once resumable handle.
//!
//! Wraps a [`tokio::sync::oneshot::Sender`] with an atomic status word so
//! that two otherwise-racing parties — "resume me with a value" and
//! "cancel me" — can both attempt to settle the continuation, with exactly
//! one of them prevailing. `oneshot::Sender::send` already consumes `self`
//! and can only be called once; the status word resolves the *race to grab
//! the sender* that a plain `Mutex<Option<Sender<_>>>` alone would leave
//! unordered, and lets callers observe "has this already been resumed?"
//! without attempting (and failing) a send.

use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;

const WAITING: u8 = 0;
const WILL_RESUME: u8 = 1;
const RESUMED: u8 = 2;

/// A single-shot resumption handle for exactly one suspended caller.
///
/// `resume` may be called from the primitive's signalling path; `cancel` may
/// be called from the registry's cancellation hook. At most one of them
/// actually delivers a value to the waiting receiver.
pub(crate) struct SafeContinuation<V, E> {
    status: AtomicU8,
    sender: Mutex<Option<oneshot::Sender<Result<V, E>>>>,
}

impl<V, E> SafeContinuation<V, E> {
    /// Creates a new continuation paired with the receiver the suspended
    /// caller awaits.
    pub(crate) fn new() -> (Self, oneshot::Receiver<Result<V, E>>) {
        let (tx, rx) = oneshot::channel();
        (
            SafeContinuation {
                status: AtomicU8::new(WAITING),
                sender: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Whether this continuation has already been resumed (by either path).
    pub(crate) fn is_resumed(&self) -> bool {
        self.status.load(Ordering::Acquire) != WAITING
    }

    /// Attempts to resume the waiter with `value`. A no-op if some other
    /// party already won the race to resume this continuation.
    pub(crate) fn resume(&self, value: Result<V, E>) {
        if self
            .status
            .compare_exchange(WAITING, WILL_RESUME, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        if let Some(tx) = self.sender.lock().take() {
            // Dropped receivers (caller's frame gone, e.g. after its own
            // cancellation already tore things down) make `send` fail;
            // there is nobody left to deliver to, which is fine.
            let _ = tx.send(value);
        }
        self.status.store(RESUMED, Ordering::Release);
    }
}
