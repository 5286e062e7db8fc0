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

//! Error kinds surfaced by this crate.
//!
//! Every suspending operation fails with one of a small, closed set of
//! *kinds* (matched on by variant, never by message) per spec: a waiter
//! whose task was cancelled, a bounded wait that elapsed, an
//! [`EarlyInvoke`](AsyncObjectError::EarlyInvoke) read of a
//! [`TaskOperation`](crate::operation::TaskOperation) result before it was
//! started, or a user error propagated verbatim from a
//! [`AsyncFuture<T, E>`](crate::future::AsyncFuture) or a `TaskQueue::exec` body.

use std::fmt;

/// The error type returned by every [`AsyncObject`](crate::wait::AsyncObject)
/// operation and by the `Future`/`TaskQueue` APIs that propagate a caller
/// supplied failure type `E`.
#[derive(thiserror::Error)]
#[non_exhaustive]
pub enum AsyncObjectError<E = Cancelled> {
    /// The calling task was cancelled before or during the wait.
    #[error("the operation was canceled")]
    Cancelled,

    /// A bounded wait (`wait(for:)`) elapsed before the condition held.
    #[error("the operation timed out")]
    TimedOut,

    /// [`TaskOperation::result`](crate::operation::TaskOperation::result) was
    /// read before the operation was started.
    #[error("result was read before the operation was started")]
    EarlyInvoke,

    /// A user-supplied failure value, propagated verbatim.
    #[error("{0}")]
    Failed(#[source] E),
}

impl<E: fmt::Debug> fmt::Debug for AsyncObjectError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsyncObjectError::Cancelled => f.write_str("Cancelled"),
            AsyncObjectError::TimedOut => f.write_str("TimedOut"),
            AsyncObjectError::EarlyInvoke => f.write_str("EarlyInvoke"),
            AsyncObjectError::Failed(e) => f.debug_tuple("Failed").field(e).finish(),
        }
    }
}

impl<E: Clone> Clone for AsyncObjectError<E> {
    fn clone(&self) -> Self {
        match self {
            AsyncObjectError::Cancelled => AsyncObjectError::Cancelled,
            AsyncObjectError::TimedOut => AsyncObjectError::TimedOut,
            AsyncObjectError::EarlyInvoke => AsyncObjectError::EarlyInvoke,
            AsyncObjectError::Failed(e) => AsyncObjectError::Failed(e.clone()),
        }
    }
}

impl<E: PartialEq> PartialEq for AsyncObjectError<E> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (AsyncObjectError::Cancelled, AsyncObjectError::Cancelled) => true,
            (AsyncObjectError::TimedOut, AsyncObjectError::TimedOut) => true,
            (AsyncObjectError::EarlyInvoke, AsyncObjectError::EarlyInvoke) => true,
            (AsyncObjectError::Failed(a), AsyncObjectError::Failed(b)) => a == b,
            _ => false,
        }
    }
}

impl<E> AsyncObjectError<E> {
    /// Whether this error represents task cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AsyncObjectError::Cancelled)
    }

    /// Whether this error represents a bounded wait timing out.
    pub fn is_timed_out(&self) -> bool {
        matches!(self, AsyncObjectError::TimedOut)
    }

    /// Maps the propagated-user-error arm, leaving the other kinds untouched.
    pub fn map_failed<E2>(self, f: impl FnOnce(E) -> E2) -> AsyncObjectError<E2> {
        match self {
            AsyncObjectError::Cancelled => AsyncObjectError::Cancelled,
            AsyncObjectError::TimedOut => AsyncObjectError::TimedOut,
            AsyncObjectError::EarlyInvoke => AsyncObjectError::EarlyInvoke,
            AsyncObjectError::Failed(e) => AsyncObjectError::Failed(f(e)),
        }
    }
}

/// Marker failure type for infallible primitives (events, the queue's
/// cancellation paths): there is no user `E` to report, only cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("the operation was canceled")]
pub struct Cancelled;

/// Convenience alias for the common case of a wait that can only fail with
/// cancellation or timeout (no propagated user error).
pub type Result<T, E = Cancelled> = std::result::Result<T, AsyncObjectError<E>>;
