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

//! `AsyncSemaphore` — a counting semaphore: `wait` decrements the permit
//! count if positive, otherwise parks; `signal` wakes exactly one parked
//! waiter if any, else replenishes the count up to `limit` (spec.md §4.2).

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::cancellation::CancellationToken;
use crate::error::{AsyncObjectError, Cancelled};
use crate::registry::{suspend_cancellable, suspend_cancellable_timeout};
use crate::wait::AsyncObject;
use crate::waiter_table::WaiterMap;

struct State {
    value: u64,
    limit: u64,
    waiters: WaiterMap<(), Cancelled>,
}

/// A counting semaphore bounded by `limit` permits.
pub struct AsyncSemaphore {
    state: Mutex<State>,
}

impl AsyncSemaphore {
    /// Creates a semaphore starting with `value` permits, never exceeding
    /// `limit` even after releases.
    pub fn new(value: u64, limit: u64) -> Self {
        assert!(value <= limit, "initial value must not exceed limit");
        AsyncSemaphore {
            state: Mutex::new(State {
                value,
                limit,
                waiters: WaiterMap::new(),
            }),
        }
    }

    /// The number of permits currently available (0 if waiters are parked).
    pub fn available_permits(&self) -> u64 {
        self.state.lock().value
    }

    #[cfg(test)]
    fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

#[async_trait]
impl AsyncObject for AsyncSemaphore {
    /// Releases one permit: hands it directly to a parked waiter if any,
    /// otherwise increments the available count up to `limit`.
    fn signal(&self) {
        let mut st = self.state.lock();
        if let Some(cont) = st.waiters.take_one() {
            drop(st);
            cont.resume(Ok(()));
            return;
        }
        st.value = (st.value + 1).min(st.limit);
    }

    #[track_caller]
    async fn wait(&self, token: &CancellationToken) -> Result<(), AsyncObjectError> {
        suspend_cancellable(token, |cont| {
            let mut st = self.state.lock();
            let key = if st.value > 0 {
                st.value -= 1;
                drop(st);
                cont.resume(Ok(()));
                None
            } else {
                let key = st.waiters.insert(cont);
                drop(st);
                Some(key)
            };
            move || {
                if let Some(key) = key {
                    self.state.lock().waiters.remove(key);
                }
            }
        })
        .await
    }

    #[track_caller]
    async fn wait_for(
        &self,
        duration: Duration,
        token: &CancellationToken,
    ) -> Result<(), AsyncObjectError> {
        suspend_cancellable_timeout(token, duration, |cont| {
            let mut st = self.state.lock();
            let key = if st.value > 0 {
                st.value -= 1;
                drop(st);
                cont.resume(Ok(()));
                None
            } else {
                let key = st.waiters.insert(cont);
                drop(st);
                Some(key)
            };
            move || {
                if let Some(key) = key {
                    self.state.lock().waiters.remove(key);
                }
            }
        })
        .await
    }
}
