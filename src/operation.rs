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

//! `TaskOperation<T, E>` — the L2 wait protocol wearing an imperative
//! start/cancel/result face (spec.md §4.5): the NEW → EXECUTING → FINISHED
//! state machine familiar from platform operation-queue APIs, built here
//! on top of [`AsyncFuture`](crate::future::AsyncFuture) rather than
//! reinvented — `result()` is exactly a broadcast `get()` against a future
//! the spawned body fulfills exactly once.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::cancellation::{CancellationToken, CancellationTokenSource};
use crate::error::AsyncObjectError;
use crate::future::AsyncFuture;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    New,
    Executing,
    Finished,
}

/// A snapshot of a [`TaskOperation`]'s externally observable state,
/// published on every transition. The `tokio::sync::watch`-based
/// replacement for the KVO `isExecuting`/`isFinished` change notifications
/// spec.md §4.5 calls for — there is no KVO contract to integrate with on
/// this runtime, so embedding code that wants to observe transitions
/// subscribes to this channel instead (spec.md §9's "omit if the target
/// runtime lacks that contract", generalized into the nearest equivalent
/// rather than dropped outright).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationState {
    pub is_executing: bool,
    pub is_finished: bool,
    pub is_cancelled: bool,
}

/// A handle the operation's body can use to spawn *tracked* child tasks,
/// handed to the body only when `start`'s `track_children` is `true`.
/// Children spawned through it are awaited by the operation before it
/// transitions to `FINISHED`; children the body spawns any other way
/// (plain `tokio::spawn`) keep an independent lifetime, per spec.md §4.5.
pub struct ChildTasks {
    set: Mutex<JoinSet<()>>,
}

impl ChildTasks {
    fn new() -> Self {
        ChildTasks {
            set: Mutex::new(JoinSet::new()),
        }
    }

    /// Spawns `fut` as a tracked child: the operation will not finish until
    /// it (and every other tracked child) completes.
    pub fn spawn(&self, fut: impl Future<Output = ()> + Send + 'static) {
        self.set.lock().spawn(fut);
    }
}

struct Inner<T, E> {
    phase: Mutex<Phase>,
    result: AsyncFuture<T, AsyncObjectError<E>>,
    cancel: CancellationTokenSource,
    state_tx: watch::Sender<OperationState>,
}

fn emit_state<T, E>(inner: &Inner<T, E>) {
    let phase = *inner.phase.lock();
    let state = OperationState {
        is_executing: phase == Phase::Executing,
        is_finished: phase == Phase::Finished,
        is_cancelled: inner.cancel.token().is_cancelled(),
    };
    let _ = inner.state_tx.send(state);
}

fn flatten<E>(outer: AsyncObjectError<AsyncObjectError<E>>) -> AsyncObjectError<E> {
    match outer {
        AsyncObjectError::Failed(inner) => inner,
        AsyncObjectError::Cancelled => AsyncObjectError::Cancelled,
        AsyncObjectError::TimedOut => AsyncObjectError::TimedOut,
        AsyncObjectError::EarlyInvoke => AsyncObjectError::EarlyInvoke,
    }
}

/// An operation that adapts the wait protocol onto an imperative
/// start/cancel/result lifecycle.
pub struct TaskOperation<T, E> {
    inner: Arc<Inner<T, E>>,
}

impl<T, E> Clone for TaskOperation<T, E> {
    fn clone(&self) -> Self {
        TaskOperation {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> TaskOperation<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Creates a fresh operation in the `NEW` state.
    pub fn new() -> Self {
        let (state_tx, _rx) = watch::channel(OperationState {
            is_executing: false,
            is_finished: false,
            is_cancelled: false,
        });
        TaskOperation {
            inner: Arc::new(Inner {
                phase: Mutex::new(Phase::New),
                result: AsyncFuture::pending(),
                cancel: CancellationTokenSource::new(),
                state_tx,
            }),
        }
    }

    pub fn is_executing(&self) -> bool {
        *self.inner.phase.lock() == Phase::Executing
    }

    pub fn is_finished(&self) -> bool {
        *self.inner.phase.lock() == Phase::Finished
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.token().is_cancelled()
    }

    /// Subscribes to state-change notifications. The current state is
    /// always the initial value yielded by the returned receiver.
    pub fn subscribe(&self) -> watch::Receiver<OperationState> {
        self.inner.state_tx.subscribe()
    }

    /// Transitions `NEW → EXECUTING`, spawning `body` as a child task.
    /// A no-op returning `false` unless called from `NEW` — in particular,
    /// calling `start` twice, or after `cancel`, does nothing.
    ///
    /// `body` receives the operation's own cancellation token (cancelled by
    /// [`cancel`](Self::cancel)) and, when `track_children` is `true`, a
    /// [`ChildTasks`] handle for spawning tracked unstructured work.
    #[track_caller]
    pub fn start<Fut, F>(&self, track_children: bool, body: F) -> bool
    where
        F: FnOnce(CancellationToken, Option<Arc<ChildTasks>>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        {
            let mut phase = self.inner.phase.lock();
            if *phase != Phase::New {
                return false;
            }
            *phase = Phase::Executing;
        }
        emit_state(&self.inner);

        let child_token = self.inner.cancel.token().clone();
        let children = track_children.then(|| Arc::new(ChildTasks::new()));
        let children_to_drain = children.clone();
        let inner = self.inner.clone();

        tokio::spawn(async move {
            let outcome = body(child_token, children).await;

            if let Some(children) = children_to_drain {
                let mut set = {
                    let mut guard = children.set.lock();
                    std::mem::replace(&mut *guard, JoinSet::new())
                };
                while set.join_next().await.is_some() {}
            }

            let mut phase = inner.phase.lock();
            if *phase != Phase::Finished {
                *phase = Phase::Finished;
                drop(phase);
                inner.result.fulfill(outcome.map_err(AsyncObjectError::Failed));
            }
            emit_state(&inner);
        });

        true
    }

    /// Requests cooperative cancellation of the running (or not-yet-run)
    /// body and immediately transitions to `FINISHED`, regardless of
    /// whether the body has actually returned yet. If the body later
    /// settles anyway, that settlement is silently discarded — the
    /// cancellation result already won (future monotonicity, spec.md §7).
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
        let mut phase = self.inner.phase.lock();
        if *phase == Phase::Finished {
            return;
        }
        *phase = Phase::Finished;
        drop(phase);
        self.inner.result.fulfill(Err(AsyncObjectError::Cancelled));
        emit_state(&self.inner);
    }

    /// Awaits the body's result. Fails with
    /// [`AsyncObjectError::EarlyInvoke`] if read before `start`.
    #[track_caller]
    pub async fn result(&self, token: &CancellationToken) -> Result<T, AsyncObjectError<E>> {
        if *self.inner.phase.lock() == Phase::New {
            return Err(AsyncObjectError::EarlyInvoke);
        }
        self.inner.result.get(token).await.map_err(flatten)
    }
}

impl<T, E> Default for TaskOperation<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationTokenSource;
    use std::time::Duration;

    #[tokio::test]
    async fn early_invoke_before_start() {
        let op = TaskOperation::<i32, ()>::new();
        let cts = CancellationTokenSource::new();
        assert_eq!(
            op.result(cts.token()).await,
            Err(AsyncObjectError::EarlyInvoke)
        );
    }

    #[tokio::test]
    async fn start_then_result_returns_body_value() {
        let op = TaskOperation::<i32, ()>::new();
        assert!(op.start(false, |_token, _children| async { Ok(42) }));
        let cts = CancellationTokenSource::new();
        assert_eq!(op.result(cts.token()).await, Ok(42));
        assert!(op.is_finished());
        assert!(!op.is_executing());
    }

    #[tokio::test]
    async fn second_start_is_a_no_op() {
        let op = TaskOperation::<i32, ()>::new();
        assert!(op.start(false, |_t, _c| async { Ok(1) }));
        assert!(!op.start(false, |_t, _c| async { Ok(2) }));
        let cts = CancellationTokenSource::new();
        assert_eq!(op.result(cts.token()).await, Ok(1));
    }

    #[tokio::test]
    async fn cancel_before_start_finishes_immediately() {
        let op = TaskOperation::<i32, ()>::new();
        op.cancel();
        assert!(op.is_finished());
        assert!(op.is_cancelled());
        let cts = CancellationTokenSource::new();
        assert_eq!(op.result(cts.token()).await, Err(AsyncObjectError::Cancelled));
    }

    #[tokio::test]
    async fn cancel_while_executing_wins_over_late_completion() {
        let op = TaskOperation::<i32, ()>::new();
        op.start(false, |token, _children| async move {
            token.cancelled().await;
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(99)
        });
        tokio::task::yield_now().await;
        op.cancel();
        let cts = CancellationTokenSource::new();
        assert_eq!(op.result(cts.token()).await, Err(AsyncObjectError::Cancelled));
    }

    #[tokio::test]
    async fn tracked_children_are_awaited_before_finishing() {
        let op = TaskOperation::<i32, ()>::new();
        let flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag2 = flag.clone();
        op.start(true, move |_token, children| async move {
            let children = children.expect("tracking enabled");
            let flag3 = flag2.clone();
            children.spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                flag3.store(true, std::sync::atomic::Ordering::SeqCst);
            });
            Ok(1)
        });
        let cts = CancellationTokenSource::new();
        op.result(cts.token()).await.unwrap();
        assert!(flag.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn subscribe_observes_transitions() {
        let op = TaskOperation::<i32, ()>::new();
        let mut rx = op.subscribe();
        assert!(!rx.borrow().is_executing);
        op.start(false, |_t, _c| async { Ok(7) });
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_executing);
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_finished);
    }

    #[tokio::test]
    async fn propagated_failure_surfaces_verbatim() {
        let op = TaskOperation::<i32, &'static str>::new();
        op.start(false, |_t, _c| async { Err("boom") });
        let cts = CancellationTokenSource::new();
        assert_eq!(
            op.result(cts.token()).await,
            Err(AsyncObjectError::Failed("boom"))
        );
    }
}
