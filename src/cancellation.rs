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

//! A C#/Swift-`Task`-like `CancellationToken` for structured cancellation.
//!
//! Operations that support cancellation accept `token: &CancellationToken`
//! and either cooperatively check [`CancellationToken::is_cancelled`] or
//! `.await` [`CancellationToken::cancelled`] to be notified. To create a
//! token, use [`CancellationTokenSource`], which additionally exposes
//! [`CancellationTokenSource::cancel`].
//!
//! This is the async descendant of a synchronous, thread-based
//! `CancellationToken`: the original registered `FnOnce` callbacks on a
//! mutex-guarded intrusive list and ran them on the cancelling thread. Here,
//! suspended waiters park on a [`tokio::sync::Notify`] instead of a callback
//! list — `notify_waiters` plays the role the callback list used to play —
//! but the atomic status word and its terminal-state short-circuit are
//! unchanged.
//!
//! ```
//! # tokio_test::block_on(async {
//! use async_objects::cancellation::CancellationTokenSource;
//! use std::time::Duration;
//!
//! let cts = CancellationTokenSource::new();
//! cts.cancel_after(Duration::from_millis(10));
//! cts.token().cancelled().await;
//! assert!(cts.is_cancelled());
//! # });
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::error::{AsyncObjectError, Cancelled};

const STATUS_NOT_CANCELLED: u8 = 0;
const STATUS_CANCELLED: u8 = 1;

struct Inner {
    status: AtomicU8,
    notify: Notify,
    // Never-cancellable tokens (`CancellationToken::none()`) have no source
    // keeping them alive via a sibling `Arc`; ordinary tokens are reached
    // only through the `Arc` held by their `CancellationTokenSource`.
    cancellable: bool,
}

/// A token that can be queried (and awaited) for cancellation.
///
/// Cloning a `CancellationToken` shares the same underlying state; every
/// clone observes the same cancellation.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

/// Owns the cancel side of a [`CancellationToken`].
///
/// Dropping the source does not cancel the token — cancellation only ever
/// happens via an explicit [`cancel`](CancellationTokenSource::cancel) or
/// [`cancel_after`](CancellationTokenSource::cancel_after) call.
pub struct CancellationTokenSource {
    token: CancellationToken,
}

impl CancellationTokenSource {
    /// Creates a new source with a fresh, not-yet-cancelled token.
    pub fn new() -> Self {
        CancellationTokenSource {
            token: CancellationToken {
                inner: Arc::new(Inner {
                    status: AtomicU8::new(STATUS_NOT_CANCELLED),
                    notify: Notify::new(),
                    cancellable: true,
                }),
            },
        }
    }

    /// The token managed by this source. Clone it to hand it to tasks that
    /// may outlive this source.
    #[inline]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Marks the token as cancelled, waking every current and future waiter.
    ///
    /// A no-op if the token was already cancelled.
    pub fn cancel(&self) {
        self.token.cancel()
    }

    /// Spawns a task that cancels the token after `dur` elapses.
    pub fn cancel_after(&self, dur: Duration) {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(dur).await;
            token.cancel();
        });
    }
}

impl Default for CancellationTokenSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    /// A token that can never be cancelled — the `none()` sentinel from the
    /// original C# API, used as a default for operations that accept an
    /// optional token.
    pub fn none() -> CancellationToken {
        CancellationToken {
            inner: Arc::new(Inner {
                status: AtomicU8::new(STATUS_NOT_CANCELLED),
                notify: Notify::new(),
                cancellable: false,
            }),
        }
    }

    /// Whether this token has been cancelled.
    ///
    /// Inherently racy under concurrent `cancel()`, but once `true` is
    /// observed it is never observed `false` again — tokens cannot be reset.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.status.load(Ordering::Acquire) == STATUS_CANCELLED
    }

    /// `Ok(())` if not cancelled, `Err(Cancelled)` otherwise.
    #[inline]
    #[track_caller]
    pub fn result(&self) -> Result<(), AsyncObjectError<Cancelled>> {
        if self.is_cancelled() {
            tracing::trace!(location = %std::panic::Location::caller(), "token already canceled");
            Err(AsyncObjectError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn cancel(&self) {
        if !self.inner.cancellable {
            return;
        }
        if self
            .inner
            .status
            .compare_exchange(
                STATUS_NOT_CANCELLED,
                STATUS_CANCELLED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return; // already canceled
        }
        tracing::debug!("cancellation token canceled");
        self.inner.notify.notify_waiters();
    }

    /// Resolves once this token is cancelled. Resolves immediately if the
    /// token is already cancelled — mirroring the synchronous `run()`
    /// short-circuit the registration-based design used for an
    /// already-canceled token.
    #[track_caller]
    pub async fn cancelled(&self) {
        if !self.inner.cancellable {
            std::future::pending::<()>().await;
            return;
        }
        loop {
            if self.is_cancelled() {
                return;
            }
            // Register before re-checking so a `cancel()` racing with this
            // loop can't slip through: `Notify::notified()` buffers one
            // permit from a concurrent `notify_waiters()` call made after
            // the future is created but before it is polled.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Derives a child token: cancelled either directly or whenever `self`
    /// is cancelled. Used by [`TaskOperation`](crate::operation::TaskOperation)
    /// to propagate cancellation into unstructured child tasks.
    pub fn child(&self) -> CancellationTokenSource {
        let source = CancellationTokenSource::new();
        let parent = self.clone();
        let child = source.token().clone();
        tokio::spawn(async move {
            parent.cancelled().await;
            child.cancel();
        });
        source
    }
}

impl fmt::Debug for CancellationTokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationTokenSource")
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
