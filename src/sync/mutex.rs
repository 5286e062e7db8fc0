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

//! `AsyncMutex<T>` — a suspending mutual-exclusion lock guarding a value of
//! type `T` (spec.md §4.2). Unlike the rest of the event family, acquiring
//! the lock must hand back something that releases it exactly once and
//! exactly on drop — a bare `wait()/signal()` pair would let a caller
//! signal a lock it never held, or forget to release one it did. So
//! `AsyncMutex` does not implement the generic [`AsyncObject`](crate::wait::AsyncObject)
//! facade; it exposes `lock`/`lock_for`/`try_lock` returning an
//! [`AsyncMutexGuard`] instead (an Open Question resolution recorded in
//! `DESIGN.md`).

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;

use crate::cancellation::CancellationToken;
use crate::error::{AsyncObjectError, Cancelled};
use crate::registry::{suspend_cancellable, suspend_cancellable_timeout};
use crate::waiter_table::WaiterMap;

struct LockState {
    locked: bool,
    waiters: WaiterMap<(), Cancelled>,
}

/// An async-aware mutual-exclusion lock.
pub struct AsyncMutex<T> {
    state: SyncMutex<LockState>,
    data: SyncMutex<T>,
}

/// RAII guard returned by [`AsyncMutex::lock`]. Releases the lock on drop,
/// handing it directly to the next queued waiter if there is one.
pub struct AsyncMutexGuard<'a, T> {
    mutex: &'a AsyncMutex<T>,
    data: Option<parking_lot::MutexGuard<'a, T>>,
}

impl<T> AsyncMutex<T> {
    /// Creates a new, unlocked mutex wrapping `value`.
    pub fn new(value: T) -> Self {
        AsyncMutex {
            state: SyncMutex::new(LockState {
                locked: false,
                waiters: WaiterMap::new(),
            }),
            data: SyncMutex::new(value),
        }
    }

    /// Whether the mutex is currently held.
    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }

    #[cfg(test)]
    fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Acquires the lock, suspending while it is held by someone else.
    #[track_caller]
    pub async fn lock(
        &self,
        token: &CancellationToken,
    ) -> Result<AsyncMutexGuard<'_, T>, AsyncObjectError> {
        suspend_cancellable(token, |cont| self.register(cont)).await?;
        Ok(self.acquired_guard())
    }

    /// Like [`lock`](Self::lock), bounded by `duration`.
    #[track_caller]
    pub async fn lock_for(
        &self,
        duration: Duration,
        token: &CancellationToken,
    ) -> Result<AsyncMutexGuard<'_, T>, AsyncObjectError> {
        suspend_cancellable_timeout(token, duration, |cont| self.register(cont)).await?;
        Ok(self.acquired_guard())
    }

    /// Acquires the lock only if it is immediately available, without
    /// suspending.
    pub fn try_lock(&self) -> Option<AsyncMutexGuard<'_, T>> {
        let mut st = self.state.lock();
        if st.locked {
            return None;
        }
        st.locked = true;
        drop(st);
        Some(self.acquired_guard())
    }

    fn register(
        &self,
        cont: crate::continuation::SafeContinuation<(), Cancelled>,
    ) -> impl FnOnce() + '_ {
        let mut st = self.state.lock();
        let key = if st.locked {
            let key = st.waiters.insert(cont);
            drop(st);
            Some(key)
        } else {
            st.locked = true;
            drop(st);
            cont.resume(Ok(()));
            None
        };
        move || {
            if let Some(key) = key {
                self.state.lock().waiters.remove(key);
            }
        }
    }

    fn acquired_guard(&self) -> AsyncMutexGuard<'_, T> {
        AsyncMutexGuard {
            mutex: self,
            data: Some(
                self.data
                    .try_lock()
                    .expect("exclusive by the async lock/waiter protocol above"),
            ),
        }
    }

    fn release(&self) {
        let mut st = self.state.lock();
        if let Some(cont) = st.waiters.take_one() {
            // Hand off directly: `locked` stays `true`, ownership transfers
            // to the next waiter without a window where an unrelated
            // `try_lock` could steal it.
            drop(st);
            cont.resume(Ok(()));
        } else {
            st.locked = false;
        }
    }
}

impl<T> Deref for AsyncMutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.data.as_ref().expect("guard data present until drop")
    }
}

impl<T> DerefMut for AsyncMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.data.as_mut().expect("guard data present until drop")
    }
}

impl<T> Drop for AsyncMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.data.take();
        self.mutex.release();
    }
}
