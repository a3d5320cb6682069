//! Per-fingerprint single-flight request coalescing.
//!
//! The first caller for a fingerprint becomes the leader: its work runs in
//! a detached task, so callers that stop waiting never cancel an in-flight
//! cycle. Followers subscribe to the leader's published outcome. The entry
//! is removed on completion, success or failure, so the next request for
//! the same fingerprint starts fresh work.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

use nimbus_core::error::FetchError;
use nimbus_core::types::{Fingerprint, WeatherSnapshot};

type Outcome = Result<WeatherSnapshot, FetchError>;
type Slot = watch::Receiver<Option<Outcome>>;

#[derive(Clone, Default)]
pub struct Coalescer {
    inflight: Arc<Mutex<HashMap<Fingerprint, Slot>>>,
}

impl Coalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` for this fingerprint unless a cycle is already in
    /// flight, in which case await that cycle's outcome instead. All
    /// waiters observe the same result.
    pub async fn run<F, Fut>(&self, fingerprint: &Fingerprint, work: F) -> Outcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let mut rx = {
            let mut inflight = self.inflight.lock();
            if let Some(rx) = inflight.get(fingerprint) {
                tracing::debug!(%fingerprint, "joining in-flight fetch cycle");
                rx.clone()
            } else {
                let (tx, rx) = watch::channel(None);
                inflight.insert(fingerprint.clone(), rx.clone());

                let fut = work();
                let guard = ClearOnDrop {
                    map: Arc::clone(&self.inflight),
                    fingerprint: fingerprint.clone(),
                };
                tokio::spawn(async move {
                    let outcome = fut.await;
                    // Remove before publishing: requests arriving after
                    // completion must start fresh work
                    drop(guard);
                    let _ = tx.send(Some(outcome));
                });
                rx
            }
        };

        loop {
            {
                let value = rx.borrow_and_update();
                if let Some(outcome) = value.as_ref() {
                    return outcome.clone();
                }
            }
            if rx.changed().await.is_err() {
                // The work task died without publishing (panic); surface a
                // retryable failure rather than hanging waiters
                return Err(FetchError::Cache("fetch cycle aborted".to_string()));
            }
        }
    }

    /// Number of cycles currently in flight (diagnostics and tests).
    pub fn inflight_count(&self) -> usize {
        self.inflight.lock().len()
    }
}

/// Clears the in-flight entry when the leader task finishes. A `Drop` impl
/// so the entry is removed even if the work future panics and the task
/// unwinds; a leaked entry would pin every later call for the fingerprint
/// to a dead channel.
struct ClearOnDrop {
    map: Arc<Mutex<HashMap<Fingerprint, Slot>>>,
    fingerprint: Fingerprint,
}

impl Drop for ClearOnDrop {
    fn drop(&mut self) {
        self.map.lock().remove(&self.fingerprint);
    }
}
