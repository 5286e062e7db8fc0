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

//! `TaskQueue` — a bounded-admission executor with priority propagation,
//! detachment, and serial "barrier"/"block" execution (spec.md §4.4).
//!
//! Built on the same registry as the event-family primitives: admission is
//! itself a suspension point, parked via [`suspend_cancellable`] exactly
//! like `AsyncEvent::wait`. What makes the queue different is what it parks
//! *on* — not a boolean condition but a FIFO line of other queued
//! admissions — and what it does on release: hand the resumed waiter's
//! body off to run, then drain further admissible entries per spec.md's
//! completion protocol.

use std::collections::{HashMap, VecDeque};
use std::future::Future;

use parking_lot::Mutex;

use crate::cancellation::CancellationToken;
use crate::error::{AsyncObjectError, Cancelled};
use crate::registry::suspend_cancellable;
use crate::waiter_table::{WaitKey, WaiterMap};

tokio::task_local! {
    /// The priority this body is currently running at, if it was admitted
    /// through a `TaskQueue`. Consulted by a nested `exec` call as the
    /// `currentContext` candidate in priority resolution — an ambient,
    /// per-task analogue of the "inherited execution context" spec.md
    /// talks about, since tokio tasks carry no such context natively.
    static CURRENT_PRIORITY: Priority;
}

/// Scheduling priority. Ordered `Low < Normal < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

/// Per-submission admission flags (spec.md §4.4).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    /// Priority is the max over `{requested, queueDefault, currentContext}`
    /// rather than `requested` alone.
    pub enforce: bool,
    /// Runs with no inherited execution context: `currentContext` is
    /// excluded from priority resolution.
    pub detached: bool,
    /// Once admitted, excludes any other admission until this one
    /// completes.
    pub block: bool,
    /// Like `block`, but also requires the queue to be quiescent
    /// (`currentRunning == 0`) before admission. Dominates `block` where
    /// they differ.
    pub barrier: bool,
}

struct State {
    blocked: bool,
    current_running: u32,
    order: VecDeque<WaitKey>,
    flags: HashMap<WaitKey, Flags>,
    waiters: WaiterMap<(), Cancelled>,
}

impl State {
    fn admits_fresh(&self, flags: &Flags) -> bool {
        !self.blocked && self.order.is_empty() && !(flags.barrier && self.current_running > 0)
    }

    fn admits_head(&self, flags: &Flags) -> bool {
        !self.blocked && !(flags.barrier && self.current_running > 0)
    }
}

/// A bounded-admission task executor.
pub struct TaskQueue {
    queue_default: Priority,
    state: Mutex<State>,
}

impl TaskQueue {
    /// Creates an empty queue using `queue_default` when neither `enforce`
    /// nor an explicit `requested` priority decides an admission's priority.
    pub fn new(queue_default: Priority) -> Self {
        TaskQueue {
            queue_default,
            state: Mutex::new(State {
                blocked: false,
                current_running: 0,
                order: VecDeque::new(),
                flags: HashMap::new(),
                waiters: WaiterMap::new(),
            }),
        }
    }

    /// Operations currently running (admitted, not yet completed).
    pub fn current_running(&self) -> u32 {
        self.state.lock().current_running
    }

    /// Whether a `block`/`barrier` admission currently excludes others.
    pub fn is_blocked(&self) -> bool {
        self.state.lock().blocked
    }

    #[cfg(test)]
    fn queued_count(&self) -> usize {
        self.state.lock().order.len()
    }

    /// Submits `body` for execution under `flags`, suspending until the
    /// queue admits it, then awaiting its result.
    ///
    /// `body` receives a clone of `token` so a running body can observe
    /// cancellation cooperatively (spec.md §4.4). Cancelling `token` while
    /// still queued removes the entry before the body ever runs and the
    /// caller sees
    /// [`AsyncObjectError::Cancelled`](crate::error::AsyncObjectError::Cancelled).
    /// Cancelling `token` once the body is running races the body against
    /// the cancellation the same way [`suspend_cancellable`] races any other
    /// wait: whichever settles first wins, and the caller sees `Cancelled`
    /// if cancellation does.
    #[track_caller]
    pub async fn exec<T, E, Fut>(
        &self,
        token: &CancellationToken,
        flags: Flags,
        requested_priority: Option<Priority>,
        body: impl FnOnce(CancellationToken) -> Fut + Send + 'static,
    ) -> Result<T, AsyncObjectError<E>>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.admit(token, &flags).await.map_err(lift_cancellation)?;
        let priority = self.resolve_priority(&flags, requested_priority);
        tracing::debug!(?priority, ?flags, "task admitted");

        let body_token = token.clone();
        let outcome = if flags.detached {
            let running = tokio::spawn(CURRENT_PRIORITY.scope(priority, body(body_token)));
            tokio::select! {
                biased;
                joined = running => match joined {
                    Ok(result) => result.map_err(AsyncObjectError::Failed),
                    Err(_join_error) => {
                        tracing::debug!("detached task panicked or was aborted");
                        Err(AsyncObjectError::Cancelled)
                    }
                },
                _ = token.cancelled() => {
                    tracing::trace!("exec: caller canceled while detached body still running");
                    Err(AsyncObjectError::Cancelled)
                }
            }
        } else {
            tokio::select! {
                biased;
                result = CURRENT_PRIORITY.scope(priority, body(body_token)) => {
                    result.map_err(AsyncObjectError::Failed)
                }
                _ = token.cancelled() => {
                    tracing::trace!("exec: caller canceled while body running");
                    Err(AsyncObjectError::Cancelled)
                }
            }
        };

        self.complete(&flags);
        outcome
    }

    fn resolve_priority(&self, flags: &Flags, requested: Option<Priority>) -> Priority {
        let current_context = if flags.detached {
            None
        } else {
            CURRENT_PRIORITY.try_with(|p| *p).ok()
        };
        if flags.enforce {
            [requested, Some(self.queue_default), current_context]
                .into_iter()
                .flatten()
                .max()
                .expect("queue_default is always present")
        } else {
            requested.unwrap_or(self.queue_default)
        }
    }

    #[track_caller]
    async fn admit(
        &self,
        token: &CancellationToken,
        flags: &Flags,
    ) -> Result<(), AsyncObjectError<Cancelled>> {
        suspend_cancellable(token, |cont| {
            let mut st = self.state.lock();
            let key = if st.admits_fresh(flags) {
                st.current_running += 1;
                if flags.block || flags.barrier {
                    st.blocked = true;
                }
                drop(st);
                cont.resume(Ok(()));
                None
            } else {
                let key = st.waiters.insert(cont);
                st.order.push_back(key);
                st.flags.insert(key, *flags);
                drop(st);
                Some(key)
            };
            move || {
                if let Some(key) = key {
                    let mut st = self.state.lock();
                    st.waiters.remove(key);
                    st.order.retain(|queued| *queued != key);
                    st.flags.remove(&key);
                }
            }
        })
        .await
    }

    /// The completion protocol: decrement `currentRunning`, clear `blocked`
    /// if this was the admission holding it, then drain admissible heads.
    fn complete(&self, flags: &Flags) {
        let resumed = {
            let mut st = self.state.lock();
            st.current_running -= 1;
            if flags.block || flags.barrier {
                st.blocked = false;
            }

            let mut resumed = Vec::new();
            loop {
                let Some(&key) = st.order.front() else {
                    break;
                };
                let head_flags = *st
                    .flags
                    .get(&key)
                    .expect("every tabled key has matching flags");
                if !st.admits_head(&head_flags) {
                    break;
                }
                st.order.pop_front();
                st.flags.remove(&key);
                let cont = st
                    .waiters
                    .take(key)
                    .expect("tabled key always has a tabled continuation");
                st.current_running += 1;
                if head_flags.block || head_flags.barrier {
                    st.blocked = true;
                }
                resumed.push(cont);
                if head_flags.block || head_flags.barrier {
                    break;
                }
            }
            resumed
        };
        if !resumed.is_empty() {
            tracing::debug!(drained = resumed.len(), "queue drained admissible heads");
        }
        for cont in resumed {
            cont.resume(Ok(()));
        }
    }
}

fn lift_cancellation<E>(err: AsyncObjectError<Cancelled>) -> AsyncObjectError<E> {
    match err {
        AsyncObjectError::Cancelled | AsyncObjectError::Failed(Cancelled) => {
            AsyncObjectError::Cancelled
        }
        AsyncObjectError::TimedOut => AsyncObjectError::TimedOut,
        AsyncObjectError::EarlyInvoke => AsyncObjectError::EarlyInvoke,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationTokenSource;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    async fn sleep_ok(d: Duration) -> Result<(), Cancelled> {
        tokio::time::sleep(d).await;
        Ok(())
    }

    #[tokio::test]
    async fn two_plain_admissions_run_concurrently() {
        let queue = Arc::new(TaskQueue::new(Priority::Normal));
        let cts = CancellationTokenSource::new();
        let a = {
            let queue = queue.clone();
            let token = cts.token().clone();
            tokio::spawn(async move {
                queue
                    .exec(&token, Flags::default(), None, |_token| sleep_ok(Duration::from_millis(20)))
                    .await
            })
        };
        tokio::task::yield_now().await;
        let b = {
            let queue = queue.clone();
            let token = cts.token().clone();
            tokio::spawn(async move {
                queue
                    .exec(&token, Flags::default(), None, |_token| sleep_ok(Duration::from_millis(20)))
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(queue.current_running(), 2); // both admitted synchronously
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        assert_eq!(queue.current_running(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn barrier_queue_ordering() {
        // Mirrors spec.md E5: 3 plain 1s tasks, a 2s barrier, a 1s tail.
        let queue = Arc::new(TaskQueue::new(Priority::Normal));
        let cts = CancellationTokenSource::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let started_at = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let queue = queue.clone();
            let token = cts.token().clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .exec::<(), Cancelled, _>(&token, Flags::default(), None, move |_token| async move {
                        order.lock().push("plain-start");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        Ok(())
                    })
                    .await
            }));
        }
        tokio::task::yield_now().await;

        let barrier_flags = Flags {
            barrier: true,
            ..Flags::default()
        };
        let barrier_handle = {
            let queue = queue.clone();
            let token = cts.token().clone();
            let order = order.clone();
            tokio::spawn(async move {
                queue
                    .exec::<(), Cancelled, _>(&token, barrier_flags, None, move |_token| async move {
                        order.lock().push("barrier-start");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                        Ok(())
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(queue.queued_count(), 1); // the barrier waits behind the 3 plain tasks

        let tail_handle = {
            let queue = queue.clone();
            let token = cts.token().clone();
            let order = order.clone();
            tokio::spawn(async move {
                queue
                    .exec::<(), Cancelled, _>(&token, Flags::default(), None, move |_token| async move {
                        order.lock().push("tail-start");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        Ok(())
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(queue.queued_count(), 2); // the tail queues behind the barrier too

        let _ = started_at;
        for h in handles {
            h.await.unwrap().unwrap();
        }
        barrier_handle.await.unwrap().unwrap();
        tail_handle.await.unwrap().unwrap();

        let order = order.lock();
        assert_eq!(order[0], "plain-start");
        assert_eq!(order[1], "plain-start");
        assert_eq!(order[2], "plain-start");
        assert_eq!(order[3], "barrier-start");
        assert_eq!(order[4], "tail-start");
    }

    #[tokio::test]
    async fn cancelling_a_queued_submission_drops_it_without_running() {
        let queue = Arc::new(TaskQueue::new(Priority::Normal));
        let blocking_cts = CancellationTokenSource::new();
        let _holder = {
            let queue = queue.clone();
            let token = blocking_cts.token().clone();
            tokio::spawn(async move {
                queue
                    .exec::<(), Cancelled, _>(&token, Flags { block: true, ..Flags::default() }, None, |_token| {
                        sleep_with_unit(Duration::from_millis(200))
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        let ran = Arc::new(AtomicUsize::new(0));
        let cts = CancellationTokenSource::new();
        let token = cts.token().clone();
        let ran2 = ran.clone();
        let queued = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .exec::<(), Cancelled, _>(&token, Flags::default(), None, move |_token| async move {
                        ran2.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(queue.queued_count(), 1);

        cts.cancel();
        let result = queued.await.unwrap();
        assert_eq!(result, Err(AsyncObjectError::Cancelled));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(queue.queued_count(), 0);
    }

    async fn sleep_with_unit(d: Duration) -> Result<(), Cancelled> {
        tokio::time::sleep(d).await;
        Ok(())
    }

    #[tokio::test]
    async fn cancelling_a_running_body_returns_cancelled_promptly() {
        let queue = Arc::new(TaskQueue::new(Priority::Normal));
        let cts = CancellationTokenSource::new();
        let token = cts.token().clone();
        let observed_cancel = Arc::new(AtomicUsize::new(0));
        let observed_cancel2 = observed_cancel.clone();
        let running = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .exec::<(), Cancelled, _>(&token, Flags::default(), None, move |body_token| async move {
                        body_token.cancelled().await;
                        observed_cancel2.fetch_add(1, Ordering::SeqCst);
                        // Cooperative cleanup would happen here; the enclosing
                        // `exec` has already raced this away and returned.
                        std::future::pending::<()>().await;
                        Ok(())
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(queue.current_running(), 1);

        cts.cancel();
        let result = running.await.unwrap();
        assert_eq!(result, Err(AsyncObjectError::Cancelled));
        tokio::task::yield_now().await;
        assert_eq!(observed_cancel.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn enforce_resolves_the_highest_candidate_priority() {
        let queue = TaskQueue::new(Priority::Low);
        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        let cts = CancellationTokenSource::new();
        queue
            .exec::<(), Cancelled, _>(
                cts.token(),
                Flags {
                    enforce: true,
                    ..Flags::default()
                },
                Some(Priority::Normal),
                move |_token| async move {
                    *seen2.lock() = CURRENT_PRIORITY.try_with(|p| *p).ok();
                    Ok(())
                },
            )
            .await
            .unwrap();
        assert_eq!(*seen.lock(), Some(Priority::Normal));
    }
}
