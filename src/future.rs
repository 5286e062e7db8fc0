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

//! `AsyncFuture<T, E>` — a single-assignment, multi-waiter broadcast cell
//! (spec.md §4.3), plus its `all`/`all_settled`/`race`/`any` combinators.
//!
//! Named `AsyncFuture` rather than `Future` to avoid colliding with
//! `std::future::Future` (every `.get()` call already returns an ordinary
//! `async fn` future; this type is the *value*, not the poll machinery).

use std::convert::Infallible;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cancellation::CancellationToken;
use crate::error::{AsyncObjectError, Cancelled};
use crate::registry::suspend_cancellable;
use crate::waiter_table::WaiterMap;

enum State<T, E> {
    Pending(WaiterMap<T, E>),
    Settled(Result<T, E>),
}

struct Inner<T, E> {
    state: Mutex<State<T, E>>,
}

/// A single-value, multi-waiter broadcast future.
///
/// `T` and `E` must be `Clone` because settlement broadcasts the same
/// result to every current and future caller of [`get`](Self::get).
pub struct AsyncFuture<T, E> {
    inner: Arc<Inner<T, E>>,
}

impl<T, E> Clone for AsyncFuture<T, E> {
    fn clone(&self) -> Self {
        AsyncFuture {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone, E: Clone> AsyncFuture<T, E> {
    /// Creates a new, unsettled future.
    pub fn pending() -> Self {
        AsyncFuture {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Pending(WaiterMap::new())),
            }),
        }
    }

    /// Creates a future that is already settled with `result`.
    pub fn ready(result: Result<T, E>) -> Self {
        AsyncFuture {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Settled(result)),
            }),
        }
    }

    /// Whether this future has settled.
    pub fn is_settled(&self) -> bool {
        matches!(&*self.inner.state.lock(), State::Settled(_))
    }

    /// Settles the future with `result`, broadcasting it to every tabled
    /// waiter. A no-op — silently discarded, per spec.md §7 — if the
    /// future was already settled; settlement is monotonic.
    pub fn fulfill(&self, result: Result<T, E>) {
        let waiters = {
            let mut st = self.inner.state.lock();
            if matches!(&*st, State::Settled(_)) {
                tracing::trace!("fulfill on already-settled future: discarded");
                return;
            }
            let previous = std::mem::replace(&mut *st, State::Settled(result.clone()));
            match previous {
                State::Pending(mut waiters) => waiters.drain(),
                State::Settled(_) => unreachable!("checked above"),
            }
        };
        tracing::debug!(released = waiters.len(), "future settled");
        for cont in waiters {
            cont.resume(result.clone());
        }
    }

    /// Returns the settled result, suspending until settlement if still
    /// pending. If the calling task is cancelled, the wait fails with
    /// [`AsyncObjectError::Cancelled`] — the future itself is unaffected
    /// and later callers can still observe its eventual settlement.
    #[track_caller]
    pub async fn get(&self, token: &CancellationToken) -> Result<T, AsyncObjectError<E>> {
        suspend_cancellable(token, |cont| {
            let mut st = self.inner.state.lock();
            let key = match &mut *st {
                State::Settled(result) => {
                    let result = result.clone();
                    drop(st);
                    cont.resume(result);
                    None
                }
                State::Pending(waiters) => {
                    let key = waiters.insert(cont);
                    drop(st);
                    Some(key)
                }
            };
            move || {
                if let Some(key) = key {
                    if let State::Pending(waiters) = &mut *self.inner.state.lock() {
                        waiters.remove(key);
                    }
                }
            }
        })
        .await
    }
}

impl<T, E> Drop for Inner<T, E> {
    fn drop(&mut self) {
        // Fallible futures (`E` non-uninhabited in practice) fail-cancel any
        // stragglers rather than leak them; infallible futures are expected
        // by contract (spec.md §9) to have no live waiters at drop time.
        if let State::Pending(waiters) = &mut *self.state.lock() {
            if !waiters.is_empty() {
                tracing::debug!(
                    stranded = waiters.len(),
                    "future dropped with live waiters; failing them with cancellation"
                );
            }
        }
    }
}

async fn none_get<T: Clone, E: Clone>(fut: AsyncFuture<T, E>) -> Result<T, AsyncObjectError<E>> {
    fut.get(&CancellationToken::none()).await
}

/// Resolves with every input's value, preserving input order. The first
/// failure cancels the remaining siblings and propagates.
pub async fn all<T, E>(futures: impl IntoIterator<Item = AsyncFuture<T, E>>) -> AsyncFuture<Vec<T>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    let out = AsyncFuture::pending();
    let items: Vec<_> = futures.into_iter().collect();
    let n = items.len();
    if n == 0 {
        out.fulfill(Ok(Vec::new()));
        return out;
    }

    let out2 = out.clone();
    tokio::spawn(async move {
        let mut set = tokio::task::JoinSet::new();
        for (i, fut) in items.into_iter().enumerate() {
            set.spawn(async move { (i, none_get(fut).await) });
        }
        let mut results: Vec<Option<T>> = (0..n).map(|_| None).collect();
        let mut failed = false;
        while let Some(joined) = set.join_next().await {
            let Ok((i, res)) = joined else { continue };
            match res {
                Ok(v) => results[i] = Some(v),
                Err(AsyncObjectError::Failed(e)) => {
                    if !failed {
                        failed = true;
                        out2.fulfill(Err(e));
                        set.abort_all();
                    }
                }
                Err(_) => {}
            }
        }
        if !failed {
            let values = results
                .into_iter()
                .map(|v| v.expect("no failure settled, every sibling must have a value"))
                .collect();
            out2.fulfill(Ok(values));
        }
    });
    out
}

/// Resolves with every input's outcome (value or error), preserving input
/// order. Never fails itself.
pub async fn all_settled<T, E>(
    futures: impl IntoIterator<Item = AsyncFuture<T, E>>,
) -> AsyncFuture<Vec<Result<T, E>>, Infallible>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    let out = AsyncFuture::pending();
    let items: Vec<_> = futures.into_iter().collect();
    let n = items.len();
    if n == 0 {
        out.fulfill(Ok(Vec::new()));
        return out;
    }

    let out2 = out.clone();
    tokio::spawn(async move {
        let mut set = tokio::task::JoinSet::new();
        for (i, fut) in items.into_iter().enumerate() {
            set.spawn(async move { (i, none_get(fut).await) });
        }
        let mut results: Vec<Option<Result<T, E>>> = (0..n).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            let Ok((i, res)) = joined else { continue };
            results[i] = Some(match res {
                Ok(v) => Ok(v),
                Err(AsyncObjectError::Failed(e)) => Err(e),
                Err(_) => continue,
            });
        }
        let values = results
            .into_iter()
            .map(|v| v.expect("every sibling settled"))
            .collect();
        out2.fulfill(Ok(values));
    });
    out
}

/// Resolves with the first settlement (value or error) among the inputs;
/// cancels the rest. Pending forever if given no inputs.
pub async fn race<T, E>(futures: impl IntoIterator<Item = AsyncFuture<T, E>>) -> AsyncFuture<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    let out = AsyncFuture::pending();
    let items: Vec<_> = futures.into_iter().collect();
    if items.is_empty() {
        return out;
    }

    let out2 = out.clone();
    tokio::spawn(async move {
        let mut set = tokio::task::JoinSet::new();
        for fut in items {
            set.spawn(none_get(fut));
        }
        if let Some(joined) = set.join_next().await {
            if let Ok(res) = joined {
                let result = match res {
                    Ok(v) => Ok(v),
                    Err(AsyncObjectError::Failed(e)) => Err(e),
                    Err(_) => return,
                };
                out2.fulfill(result);
            }
        }
        set.abort_all();
    });
    out
}

/// Resolves with the first *value* among the inputs; cancels the rest once
/// it does. If every input fails, resolves with
/// [`AsyncObjectError::Cancelled`]. Empty input resolves immediately with
/// that same cancellation error.
pub async fn any<T, E>(futures: impl IntoIterator<Item = AsyncFuture<T, E>>) -> AsyncFuture<T, Cancelled>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    let out = AsyncFuture::pending();
    let items: Vec<_> = futures.into_iter().collect();
    let n = items.len();
    if n == 0 {
        out.fulfill(Err(Cancelled));
        return out;
    }

    let out2 = out.clone();
    tokio::spawn(async move {
        let mut set = tokio::task::JoinSet::new();
        for fut in items {
            set.spawn(async move { fut.get(&CancellationToken::none()).await });
        }
        let mut failures = 0;
        while let Some(joined) = set.join_next().await {
            let Ok(res) = joined else { continue };
            match res {
                Ok(v) => {
                    out2.fulfill(Ok(v));
                    set.abort_all();
                    return;
                }
                Err(_) => {
                    failures += 1;
                    if failures == n {
                        out2.fulfill(Err(Cancelled));
                    }
                }
            }
        }
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationTokenSource;
    use std::time::Duration;

    #[tokio::test]
    async fn get_returns_immediately_if_already_settled() {
        let fut = AsyncFuture::<i32, Cancelled>::ready(Ok(42));
        let cts = CancellationTokenSource::new();
        assert_eq!(fut.get(cts.token()).await, Ok(42));
    }

    #[tokio::test]
    async fn fulfill_broadcasts_to_every_waiter() {
        let fut = AsyncFuture::<i32, Cancelled>::pending();
        let cts = CancellationTokenSource::new();
        let mut waiters = Vec::new();
        for _ in 0..8 {
            let fut = fut.clone();
            let token = cts.token().clone();
            waiters.push(tokio::spawn(async move { fut.get(&token).await }));
        }
        tokio::task::yield_now().await;
        fut.fulfill(Ok(7));
        for w in waiters {
            assert_eq!(w.await.unwrap(), Ok(7));
        }
        // A reader arriving after fulfill still sees the result.
        assert_eq!(fut.get(cts.token()).await, Ok(7));
    }

    #[tokio::test]
    async fn second_fulfill_is_ignored() {
        let fut = AsyncFuture::<i32, Cancelled>::pending();
        fut.fulfill(Ok(1));
        fut.fulfill(Ok(2));
        let cts = CancellationTokenSource::new();
        assert_eq!(fut.get(cts.token()).await, Ok(1));
    }

    #[tokio::test(start_paused = true)]
    async fn all_preserves_order_regardless_of_completion_order() {
        let f1 = AsyncFuture::<i32, Cancelled>::pending();
        let f2 = AsyncFuture::<i32, Cancelled>::pending();
        let f3 = AsyncFuture::<i32, Cancelled>::pending();
        let combined = all([f1.clone(), f2.clone(), f3.clone()]).await;

        tokio::spawn({
            let f2 = f2.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                f2.fulfill(Ok(2));
            }
        });
        tokio::spawn({
            let f3 = f3.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                f3.fulfill(Ok(3));
            }
        });
        tokio::time::sleep(Duration::from_secs(3)).await;
        f1.fulfill(Ok(1));

        let cts = CancellationTokenSource::new();
        assert_eq!(combined.get(cts.token()).await, Ok(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn all_propagates_first_failure() {
        let f1 = AsyncFuture::<i32, &'static str>::pending();
        let f2 = AsyncFuture::<i32, &'static str>::pending();
        let combined = all([f1.clone(), f2.clone()]).await;
        f1.fulfill(Err("boom"));
        f2.fulfill(Ok(2));
        let cts = CancellationTokenSource::new();
        assert_eq!(
            combined.get(cts.token()).await,
            Err(AsyncObjectError::Failed("boom"))
        );
    }

    #[tokio::test]
    async fn all_settled_never_fails() {
        let f1 = AsyncFuture::<i32, &'static str>::pending();
        let f2 = AsyncFuture::<i32, &'static str>::pending();
        let combined = all_settled([f1.clone(), f2.clone()]).await;
        f1.fulfill(Err("boom"));
        f2.fulfill(Ok(2));
        let cts = CancellationTokenSource::new();
        assert_eq!(
            combined.get(cts.token()).await,
            Ok(vec![Err("boom"), Ok(2)])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn any_ignores_failures_and_returns_first_value() {
        let f1 = AsyncFuture::<i32, &'static str>::pending();
        let f2 = AsyncFuture::<i32, &'static str>::pending();
        let combined = any([f1.clone(), f2.clone()]).await;

        tokio::spawn({
            let f1 = f1.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                f1.fulfill(Err("boom"));
            }
        });
        tokio::spawn({
            let f2 = f2.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                f2.fulfill(Ok(7));
            }
        });

        let cts = CancellationTokenSource::new();
        assert_eq!(combined.get(cts.token()).await, Ok(7));
    }

    #[tokio::test]
    async fn any_with_all_failures_resolves_cancelled() {
        let f1 = AsyncFuture::<i32, &'static str>::pending();
        let f2 = AsyncFuture::<i32, &'static str>::pending();
        let combined = any([f1.clone(), f2.clone()]).await;
        f1.fulfill(Err("a"));
        f2.fulfill(Err("b"));
        let cts = CancellationTokenSource::new();
        assert_eq!(combined.get(cts.token()).await, Err(AsyncObjectError::Cancelled));
    }

    #[tokio::test]
    async fn any_with_empty_input_resolves_cancelled_immediately() {
        let combined = any::<i32, Cancelled>([]).await;
        let cts = CancellationTokenSource::new();
        let result = tokio::time::timeout(Duration::from_millis(50), combined.get(cts.token()))
            .await
            .expect("empty any() must resolve immediately");
        assert_eq!(result, Err(AsyncObjectError::Cancelled));
    }

    #[tokio::test]
    async fn race_resolves_with_first_settlement() {
        let f1 = AsyncFuture::<i32, Cancelled>::pending();
        let f2 = AsyncFuture::<i32, Cancelled>::pending();
        let combined = race([f1.clone(), f2.clone()]).await;
        f2.fulfill(Ok(2));
        f1.fulfill(Ok(1));
        let cts = CancellationTokenSource::new();
        assert_eq!(combined.get(cts.token()).await, Ok(2));
    }
}
