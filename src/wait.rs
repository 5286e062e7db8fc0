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

//! The uniform wait-protocol façade (spec §6): `signal` / `wait` /
//! `wait(for:)` implemented by every event-family primitive.

use std::time::Duration;

use async_trait::async_trait;

use crate::cancellation::CancellationToken;
use crate::error::AsyncObjectError;

/// Common wait protocol shared by the event-family primitives
/// (`AsyncEvent`, `CountdownEvent`, `AsyncSemaphore`, `AsyncBarrier`).
/// `AsyncMutex` deliberately does not implement this trait — see its
/// module doc.
///
/// `signal` never suspends. `wait` and `wait_for` are the suspension
/// points; both are cancellation-aware through the supplied
/// [`CancellationToken`].
#[async_trait]
pub trait AsyncObject: Send + Sync {
    /// Raises the condition this object waits on. Never suspends; a no-op
    /// if there is nothing to release.
    fn signal(&self);

    /// Suspends until the condition holds or `token` is canceled.
    async fn wait(&self, token: &CancellationToken) -> Result<(), AsyncObjectError>;

    /// Like [`wait`](AsyncObject::wait), bounded by `duration`. A zero
    /// duration is legal and returns immediately with the current state.
    async fn wait_for(
        &self,
        duration: Duration,
        token: &CancellationToken,
    ) -> Result<(), AsyncObjectError>;
}
