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

//! Asynchronous coordination primitives for `tokio`: a cancellation-aware
//! suspension registry, a family of event-like synchronization objects
//! (event, countdown event, semaphore, mutex, barrier), a single-assignment
//! broadcast future with combinators, a priority-admission task queue, and
//! an imperative start/cancel/result operation built on top of all of it.
//!
//! Everything funnels through one registry (`registry::suspend_cancellable`)
//! built on [`cancellation::CancellationToken`] — the structured-cancellation
//! signal every suspension point races against — so that the same
//! exactly-once-resume and no-lost-wakeup guarantees hold everywhere: an
//! [`AsyncEvent`](sync::AsyncEvent) release, a [`queue::TaskQueue`]
//! admission, and an [`future::AsyncFuture`] settlement are all, underneath,
//! the same continuation being resumed exactly once.
//!
//! ```
//! # tokio_test::block_on(async {
//! use async_objects::prelude::*;
//! use std::sync::Arc;
//!
//! let event = Arc::new(AsyncEvent::new());
//! let cts = CancellationTokenSource::new();
//! let waiter = {
//!     let event = event.clone();
//!     let token = cts.token().clone();
//!     tokio::spawn(async move { event.wait(&token).await })
//! };
//! tokio::task::yield_now().await;
//! event.signal();
//! waiter.await.unwrap().unwrap();
//! # });
//! ```

pub mod cancellation;
mod continuation;
pub mod error;
pub mod future;
pub mod operation;
pub mod queue;
mod registry;
pub mod sync;
pub mod wait;
mod waiter_table;

/// Flat re-export surface for the common imports most consumers need.
pub mod prelude {
    pub use crate::cancellation::{CancellationToken, CancellationTokenSource};
    pub use crate::error::{AsyncObjectError, Cancelled};
    pub use crate::future::{all, all_settled, any, race, AsyncFuture};
    pub use crate::operation::{ChildTasks, OperationState, TaskOperation};
    pub use crate::queue::{Flags, Priority, TaskQueue};
    pub use crate::sync::{AsyncBarrier, AsyncEvent, AsyncMutex, AsyncMutexGuard, AsyncSemaphore, CountdownEvent};
    pub use crate::wait::AsyncObject;
}
