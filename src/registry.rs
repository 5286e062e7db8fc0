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

//! The cancellable suspension registry (spec §4.1).
//!
//! [`suspend_cancellable`] and [`suspend_cancellable_timeout`] are the two
//! entry points every primitive in this crate funnels its `wait` /
//! `wait(for:)` through. Together they resolve the three races the registry
//! exists to close:
//!
//! - *registration/cancellation*: the caller's token may already be
//!   cancelled before `register` ever runs — handled by checking
//!   `token.is_cancelled()` up front and never touching the primitive.
//! - *resume/cancellation*: the signalling side and the cancellation hook
//!   may both attempt to settle the same continuation concurrently —
//!   handled by [`SafeContinuation`]'s atomic CAS, which lets exactly one
//!   of the two actually deliver a value.
//! - *registration/resume*: a primitive already in a terminal state (event
//!   set, future settled, countdown reached) must resume synchronously from
//!   within `register`, never tabling the entry — this is the primitive's
//!   own responsibility (see `sync::event` etc.), since only the primitive
//!   knows its terminal-state predicate.
//!
//! A timed-out or canceled wait always invokes the `on_cancel` closure
//! `register` hands back, so the primitive de-tables the entry before
//! returning — an abandoned entry that nobody ever resumes is exactly the
//! leak spec.md §8's "cancellation reclamation" property rules out.

use std::time::Duration;

use crate::cancellation::CancellationToken;
use crate::continuation::SafeContinuation;
use crate::error::AsyncObjectError;

/// Parks a continuation and races it against `token`'s cancellation.
#[track_caller]
pub(crate) async fn suspend_cancellable<V, E, F, OnCancel>(
    token: &CancellationToken,
    register: F,
) -> Result<V, AsyncObjectError<E>>
where
    F: FnOnce(SafeContinuation<V, E>) -> OnCancel,
    OnCancel: FnOnce(),
{
    let location = std::panic::Location::caller();
    if token.is_cancelled() {
        tracing::trace!(%location, "suspend_cancellable: token already canceled");
        return Err(AsyncObjectError::Cancelled);
    }

    let (cont, rx) = SafeContinuation::new();
    let on_cancel = register(cont);

    tokio::select! {
        biased;
        result = rx => settle(result),
        _ = token.cancelled() => {
            tracing::trace!(%location, "suspend_cancellable: canceled while suspended");
            on_cancel();
            Err(AsyncObjectError::Cancelled)
        }
    }
}

/// Like [`suspend_cancellable`], additionally bounded by `duration`. A
/// `duration` of zero is legal: if the primitive resumed synchronously
/// inside `register` (terminal state), that result wins; otherwise the
/// wait fails with [`AsyncObjectError::TimedOut`] without ever truly
/// suspending.
#[track_caller]
pub(crate) async fn suspend_cancellable_timeout<V, E, F, OnCancel>(
    token: &CancellationToken,
    duration: Duration,
    register: F,
) -> Result<V, AsyncObjectError<E>>
where
    F: FnOnce(SafeContinuation<V, E>) -> OnCancel,
    OnCancel: FnOnce(),
{
    let location = std::panic::Location::caller();
    if token.is_cancelled() {
        tracing::trace!(%location, "suspend_cancellable_timeout: token already canceled");
        return Err(AsyncObjectError::Cancelled);
    }

    let (cont, rx) = SafeContinuation::new();
    let on_cancel = register(cont);

    tokio::select! {
        biased;
        result = rx => settle(result),
        _ = token.cancelled() => {
            tracing::trace!(%location, "suspend_cancellable_timeout: canceled while suspended");
            on_cancel();
            Err(AsyncObjectError::Cancelled)
        }
        _ = tokio::time::sleep(duration) => {
            tracing::trace!(%location, ?duration, "suspend_cancellable_timeout: elapsed");
            on_cancel();
            Err(AsyncObjectError::TimedOut)
        }
    }
}

fn settle<V, E>(result: Result<Result<V, E>, tokio::sync::oneshot::error::RecvError>) -> Result<V, AsyncObjectError<E>> {
    match result {
        Ok(value) => value.map_err(AsyncObjectError::Failed),
        // The continuation's sender was dropped without ever sending —
        // nothing delivers this outside of tests that drop a continuation
        // directly, but treat it as cancellation rather than panicking.
        Err(_) => Err(AsyncObjectError::Cancelled),
    }
}
