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

//! `CountdownEvent` — releases waiters once a live counter drops to or below
//! a threshold (spec.md §4.2, "most subtle" primitive).

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::cancellation::CancellationToken;
use crate::error::{AsyncObjectError, Cancelled};
use crate::registry::{suspend_cancellable, suspend_cancellable_timeout};
use crate::wait::AsyncObject;
use crate::waiter_table::WaiterMap;

struct State {
    /// Threshold at or below which the event is set.
    limit: u64,
    /// Baseline `count` restored by a parameter-less `reset()`.
    initial: u64,
    /// The live counter.
    count: u64,
    waiters: WaiterMap<(), Cancelled>,
}

impl State {
    fn is_set(&self) -> bool {
        self.count <= self.limit
    }
}

/// A countdown latch: waiters release once `count <= limit`.
pub struct CountdownEvent {
    state: Mutex<State>,
}

impl CountdownEvent {
    /// Creates a countdown with the given `limit` and starting `count`
    /// (which also becomes the `reset()` baseline).
    pub fn new(limit: u64, count: u64) -> Self {
        CountdownEvent {
            state: Mutex::new(State {
                limit,
                initial: count,
                count,
                waiters: WaiterMap::new(),
            }),
        }
    }

    /// The live counter.
    pub fn count(&self) -> u64 {
        self.state.lock().count
    }

    /// Whether `count <= limit` right now.
    pub fn is_set(&self) -> bool {
        self.state.lock().is_set()
    }

    /// `count <- max(count - by, 0)`; releases every waiter if this crosses
    /// the threshold.
    pub fn signal_by(&self, by: u64) {
        self.mutate_and_release(|st| st.count = st.count.saturating_sub(by));
    }

    /// `count <- count + by`. May "uncross" the threshold and make the
    /// event unset again; this has no effect on waiters already released.
    pub fn increment(&self, by: u64) {
        self.mutate_and_release(|st| st.count = st.count.saturating_add(by));
    }

    /// Restores `count` to the baseline set at construction (or by the last
    /// `reset_to`).
    pub fn reset(&self) {
        self.mutate_and_release(|st| st.count = st.initial);
    }

    /// Sets a new baseline `initial` and restores `count` to it.
    pub fn reset_to(&self, initial: u64) {
        self.mutate_and_release(|st| {
            st.initial = initial;
            st.count = initial;
        });
    }

    fn mutate_and_release(&self, mutate: impl FnOnce(&mut State)) {
        let waiters = {
            let mut st = self.state.lock();
            mutate(&mut st);
            if st.is_set() {
                st.waiters.drain()
            } else {
                Vec::new()
            }
        };
        if !waiters.is_empty() {
            tracing::debug!(released = waiters.len(), "countdown threshold reached");
        }
        for cont in waiters {
            cont.resume(Ok(()));
        }
    }
}

#[async_trait]
impl AsyncObject for CountdownEvent {
    /// `signal()` on a `CountdownEvent` decrements the counter by one —
    /// for arbitrary decrements use [`signal_by`](CountdownEvent::signal_by).
    fn signal(&self) {
        self.signal_by(1);
    }

    #[track_caller]
    async fn wait(&self, token: &CancellationToken) -> Result<(), AsyncObjectError> {
        suspend_cancellable(token, |cont| {
            let mut st = self.state.lock();
            let key = if st.is_set() {
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
            let key = if st.is_set() {
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
    use std::sync::Arc;

    #[tokio::test]
    async fn releases_once_threshold_reached() {
        let countdown = Arc::new(CountdownEvent::new(3, 2));
        countdown.increment(10); // count = 12
        assert!(!countdown.is_set());

        let waiter = {
            let countdown = countdown.clone();
            let cts = CancellationTokenSource::new();
            tokio::spawn(async move { countdown.wait(cts.token()).await })
        };
        tokio::task::yield_now().await;

        for _ in 0..9 {
            countdown.signal_by(1); // 12 -> 3 over 9 decrements
        }
        assert_eq!(countdown.count(), 3);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_times_out_while_countdown_continues() {
        let countdown = Arc::new(CountdownEvent::new(3, 2));
        countdown.increment(10); // count = 12
        let cts = CancellationTokenSource::new();
        let result = countdown
            .wait_for(Duration::from_secs(2), cts.token())
            .await;
        assert_eq!(result, Err(AsyncObjectError::TimedOut));
        // The countdown keeps ticking independently of the timed-out wait.
        countdown.signal_by(9);
        assert_eq!(countdown.count(), 3);
        assert!(countdown.is_set());
    }

    #[tokio::test]
    async fn increment_can_uncross_without_affecting_released_waiters() {
        let countdown = Arc::new(CountdownEvent::new(5, 5));
        countdown
            .wait(CancellationTokenSource::new().token())
            .await
            .unwrap();
        countdown.increment(10);
        assert!(!countdown.is_set());
        // A fresh wait must suspend again now that it is unset.
        let cts = CancellationTokenSource::new();
        let result = countdown
            .wait_for(Duration::from_millis(10), cts.token())
            .await;
        assert_eq!(result, Err(AsyncObjectError::TimedOut));
    }

    #[tokio::test]
    async fn reset_to_does_not_spuriously_release_outstanding_wait_below_new_threshold() {
        let countdown = Arc::new(CountdownEvent::new(0, 5));
        let waiter = {
            let countdown = countdown.clone();
            let cts = CancellationTokenSource::new();
            tokio::spawn(async move { countdown.wait(cts.token()).await })
        };
        tokio::task::yield_now().await;
        assert!(!countdown.is_set());
        countdown.reset_to(10); // still above limit(0): must not release
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        countdown.signal_by(10); // now crosses: count=0 <= limit=0
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn reset_restores_baseline() {
        let countdown = CountdownEvent::new(0, 3);
        countdown.signal_by(3);
        assert!(countdown.is_set());
        countdown.reset();
        assert_eq!(countdown.count(), 3);
        assert!(!countdown.is_set());
    }
}
