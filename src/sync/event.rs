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

//! `AsyncEvent` — the simplest event-family primitive: a boolean condition
//! that, once set, releases every waiter (spec.md §4.2).

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::cancellation::CancellationToken;
use crate::error::{AsyncObjectError, Cancelled};
use crate::registry::{suspend_cancellable, suspend_cancellable_timeout};
use crate::wait::AsyncObject;
use crate::waiter_table::WaiterMap;

struct State {
    set: bool,
    waiters: WaiterMap<(), Cancelled>,
}

/// A one-way gate: `wait` suspends until [`signal`](AsyncEvent::signal) is
/// called (possibly before the wait even started), then stays open forever.
pub struct AsyncEvent {
    state: Mutex<State>,
}

impl AsyncEvent {
    /// Creates a new, unset event.
    pub fn new() -> Self {
        AsyncEvent {
            state: Mutex::new(State {
                set: false,
                waiters: WaiterMap::new(),
            }),
        }
    }

    /// Creates an event that is already set.
    pub fn new_set() -> Self {
        AsyncEvent {
            state: Mutex::new(State {
                set: true,
                waiters: WaiterMap::new(),
            }),
        }
    }

    /// Whether the event is currently set.
    pub fn is_set(&self) -> bool {
        self.state.lock().set
    }

    #[cfg(test)]
    fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

impl Default for AsyncEvent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AsyncObject for AsyncEvent {
    fn signal(&self) {
        let waiters = {
            let mut st = self.state.lock();
            if st.set {
                return; // already set: no-op, matching the nothing-to-release policy
            }
            st.set = true;
            st.waiters.drain()
        };
        tracing::debug!(released = waiters.len(), "event set, releasing waiters");
        for cont in waiters {
            cont.resume(Ok(()));
        }
    }

    #[track_caller]
    async fn wait(&self, token: &CancellationToken) -> Result<(), AsyncObjectError> {
        suspend_cancellable(token, |cont| {
            let mut st = self.state.lock();
            let key = if st.set {
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
            let key = if st.set {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationTokenSource;

    #[tokio::test]
    async fn wait_returns_immediately_if_already_set() {
        let event = AsyncEvent::new_set();
        let cts = CancellationTokenSource::new();
        event.wait(cts.token()).await.unwrap();
    }

    #[tokio::test]
    async fn wait_releases_on_signal() {
        let event = std::sync::Arc::new(AsyncEvent::new());
        let cts = CancellationTokenSource::new();
        let waiter = {
            let event = event.clone();
            let token = cts.token().clone();
            tokio::spawn(async move { event.wait(&token).await })
        };
        tokio::task::yield_now().await;
        event.signal();
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn no_lost_wakeup_wait_before_signal() {
        let event = std::sync::Arc::new(AsyncEvent::new());
        let cts = CancellationTokenSource::new();
        let mut waiters = Vec::new();
        for _ in 0..16 {
            let event = event.clone();
            let token = cts.token().clone();
            waiters.push(tokio::spawn(async move { event.wait(&token).await }));
        }
        tokio::task::yield_now().await;
        event.signal();
        for w in waiters {
            w.await.unwrap().unwrap();
        }
        assert_eq!(event.waiter_count(), 0);
    }

    #[tokio::test]
    async fn signal_twice_is_a_no_op() {
        let event = AsyncEvent::new();
        event.signal();
        event.signal();
        assert!(event.is_set());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_returns_timed_out() {
        let event = AsyncEvent::new();
        let cts = CancellationTokenSource::new();
        let result = event.wait_for(Duration::from_millis(50), cts.token()).await;
        assert_eq!(result, Err(AsyncObjectError::TimedOut));
        assert_eq!(event.waiter_count(), 0);
    }

    #[tokio::test]
    async fn zero_duration_timeout_returns_immediately() {
        let event = AsyncEvent::new();
        let cts = CancellationTokenSource::new();
        let result = tokio::time::timeout(
            Duration::from_millis(50),
            event.wait_for(Duration::ZERO, cts.token()),
        )
        .await
        .expect("wait_for(ZERO) must not actually suspend");
        assert_eq!(result, Err(AsyncObjectError::TimedOut));
    }

    #[tokio::test]
    async fn cancellation_reclaims_waiter_slot() {
        let event = std::sync::Arc::new(AsyncEvent::new());
        let cts = CancellationTokenSource::new();
        let token = cts.token().clone();
        let waiter = {
            let event = event.clone();
            tokio::spawn(async move { event.wait(&token).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(event.waiter_count(), 1);
        cts.cancel();
        let result = waiter.await.unwrap();
        assert_eq!(result, Err(AsyncObjectError::Cancelled));
        assert_eq!(event.waiter_count(), 0);
    }
}
