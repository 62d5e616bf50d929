//! Lazily initialized, process-wide instances
//!
//! Concurrent first callers share a single in-flight initialization: the
//! first caller runs the init future, everyone else arriving before it
//! resolves waits on that same attempt, and all of them observe the same
//! outcome: either the same `Arc` or the same error. A failed attempt is
//! not cached, so the next caller after it retries.

use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{const_mutex, Mutex};

type Attempt<T, E> = Shared<BoxFuture<'static, Result<Arc<T>, E>>>;

pub struct Singleton<T, E> {
    attempt: Mutex<Option<Attempt<T, E>>>,
}

impl<T, E> std::fmt::Debug for Singleton<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Singleton")
            .field("attempt", &self.attempt.lock().is_some())
            .finish()
    }
}

impl<T, E> Default for Singleton<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Singleton<T, E> {
    pub const fn new() -> Self {
        Self {
            attempt: const_mutex(None),
        }
    }
}

impl<T, E> Singleton<T, E>
where
    T: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Return the instance, running `init` if no attempt is in flight and
    /// none has succeeded yet.
    ///
    /// Everyone awaiting a failed attempt receives its error; the slot is
    /// then cleared so a later call starts over.
    pub async fn get_or_try_init<F, Fut>(&self, init: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let attempt = {
            let mut slot = self.attempt.lock();
            match slot.as_ref() {
                Some(attempt) => attempt.clone(),
                None => {
                    let attempt = init().map(|result| result.map(Arc::new)).boxed().shared();
                    *slot = Some(attempt.clone());
                    attempt
                }
            }
        };

        let result = attempt.clone().await;
        if result.is_err() {
            let mut slot = self.attempt.lock();
            // a retry may already have replaced the failed attempt
            if slot.as_ref().is_some_and(|current| current.ptr_eq(&attempt)) {
                *slot = None;
            }
        }
        result
    }

    /// The instance, if initialization has completed
    pub fn get(&self) -> Option<Arc<T>> {
        self.attempt
            .lock()
            .as_ref()
            .and_then(|attempt| attempt.peek())
            .and_then(|result| result.as_ref().ok())
            .cloned()
    }

    pub fn is_initialized(&self) -> bool {
        self.get().is_some()
    }
}
