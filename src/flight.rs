//! Single-slot tracking for superseding background requests.
//!
//! Every service that allows at most one outstanding request of a kind keeps a
//! [`Flight`] inside its state mutex. Starting a new request aborts the
//! previous task and bumps the generation; a completing task may only commit
//! its result while its generation is still current. Aborting alone is not
//! enough: a task can finish its HTTP round-trip and be blocked on the state
//! mutex at the moment it is superseded, so the generation check is what keeps
//! stale results out.

use tokio::task::{AbortHandle, JoinError, JoinHandle};

#[derive(Debug, Default)]
pub(crate) struct Flight {
    generation: u64,
    handle: Option<AbortHandle>,
}

impl Flight {
    /// Cancel whatever is in flight and return the generation for a new request.
    pub(crate) fn begin(&mut self) -> u64 {
        self.cancel();
        self.generation
    }

    /// Record the task that owns the current generation.
    ///
    /// Must be called under the same lock as [`Flight::begin`] so the task
    /// cannot complete before it is attached.
    pub(crate) fn attach(&mut self, handle: AbortHandle) {
        self.handle = Some(handle);
    }

    /// Abort the in-flight task (if any) and invalidate its generation.
    ///
    /// Returns `true` if a task was still registered.
    pub(crate) fn cancel(&mut self) -> bool {
        let had_task = match self.handle.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        };
        self.generation = self.generation.wrapping_add(1);
        had_task
    }

    /// Mark the request for `generation` as finished.
    ///
    /// Returns `false` (and leaves the slot alone) when the request was
    /// superseded; the caller must then discard its result.
    pub(crate) fn complete(&mut self, generation: u64) -> bool {
        if self.generation != generation {
            return false;
        }
        self.handle = None;
        true
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.handle.is_some()
    }
}

/// Await a flight task, mapping an abort to the caller's cancellation error.
///
/// Panics inside the task are resumed on the awaiting side.
pub(crate) async fn join<T, E>(
    handle: JoinHandle<Result<T, E>>,
    cancelled: impl FnOnce() -> E,
) -> Result<T, E> {
    match handle.await {
        Ok(result) => result,
        Err(err) => Err(on_join_error(err, cancelled)),
    }
}

fn on_join_error<E>(err: JoinError, cancelled: impl FnOnce() -> E) -> E {
    if err.is_panic() {
        std::panic::resume_unwind(err.into_panic());
    }
    cancelled()
}
