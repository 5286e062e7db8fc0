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

//! `AsyncBarrier` — a cyclic rendezvous point: waiters release together
//! once `limit` arrivals have accumulated, after which the barrier resets
//! for its next cycle (spec.md §4.2).

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::cancellation::CancellationToken;
use crate::error::{AsyncObjectError, Cancelled};
use crate::registry::{suspend_cancellable, suspend_cancellable_timeout};
use crate::wait::AsyncObject;
use crate::waiter_table::WaiterMap;

struct State {
    limit: u64,
    arrived: u64,
    waiters: WaiterMap<(), Cancelled>,
}

/// A reusable barrier for `limit` parties.
pub struct AsyncBarrier {
    state: Mutex<State>,
}

impl AsyncBarrier {
    /// Creates a barrier that releases once `limit` arrivals accumulate.
    pub fn new(limit: u64) -> Self {
        AsyncBarrier {
            state: Mutex::new(State {
                limit,
                arrived: 0,
                waiters: WaiterMap::new(),
            }),
        }
    }

    /// Arrivals accumulated in the current cycle.
    pub fn arrived(&self) -> u64 {
        self.state.lock().arrived
    }

    #[cfg(test)]
    fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Registers one arrival. Releases every current waiter and starts a
    /// fresh cycle once `limit` arrivals have accumulated.
    fn arrive(&self) {
        let waiters = {
            let mut st = self.state.lock();
            st.arrived += 1;
            if st.arrived >= st.limit {
                st.arrived = 0;
                st.waiters.drain()
            } else {
                Vec::new()
            }
        };
        if !waiters.is_empty() {
            tracing::debug!(released = waiters.len(), "barrier tripped");
        }
        for cont in waiters {
            cont.resume(Ok(()));
        }
    }
}

#[async_trait]
impl AsyncObject for AsyncBarrier {
    /// One party's arrival at the barrier.
    fn signal(&self) {
        self.arrive();
    }

    #[track_caller]
    async fn wait(&self, token: &CancellationToken) -> Result<(), AsyncObjectError> {
        suspend_cancellable(token, |cont| {
            let mut st = self.state.lock();
            let key = if st.limit == 0 {
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
            let key = if st.limit == 0 {
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
    async fn releases_all_once_limit_reached() {
        let barrier = Arc::new(AsyncBarrier::new(3));
        let cts = CancellationTokenSource::new();
        let mut waiters = Vec::new();
        for _ in 0..2 {
            let barrier = barrier.clone();
            let token = cts.token().clone();
            waiters.push(tokio::spawn(async move { barrier.wait(&token).await }));
        }
        tokio::task::yield_now().await;
        assert_eq!(barrier.waiter_count(), 2);

        barrier.signal();
        tokio::task::yield_now().await;
        assert_eq!(barrier.waiter_count(), 2); // third arrival still pending

        barrier.signal();
        tokio::task::yield_now().await;
        assert_eq!(barrier.waiter_count(), 2); // still one arrival short

        barrier.signal(); // third arrival: trips the barrier
        for w in waiters {
            w.await.unwrap().unwrap();
        }
        assert_eq!(barrier.arrived(), 0); // reset for the next cycle
    }

    #[tokio::test]
    async fn cycles_after_tripping() {
        let barrier = Arc::new(AsyncBarrier::new(2));
        barrier.signal();
        barrier.signal(); // first cycle trips with no waiters
        assert_eq!(barrier.arrived(), 0);

        let cts = CancellationTokenSource::new();
        let waiter = {
            let barrier = barrier.clone();
            let token = cts.token().clone();
            tokio::spawn(async move { barrier.wait(&token).await })
        };
        tokio::task::yield_now().await;
        barrier.signal();
        barrier.signal(); // second cycle's two arrivals: the waiter plus this signal
        waiter.await.unwrap().unwrap();
    }
}
