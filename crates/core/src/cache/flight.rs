//! Per-key request coalescing.
//!
//! The first caller for a key starts the work; callers arriving while it is
//! still running await the same shared future instead of starting their own.
//! Once it resolves the key is released and the next call starts fresh.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// Coalesces concurrent calls per key.
pub struct InFlight<T: Clone> {
    calls: Mutex<HashMap<String, (u64, Shared<BoxFuture<'static, T>>)>>,
    next_id: AtomicU64,
}

impl<T: Clone> std::fmt::Debug for InFlight<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlight").finish_non_exhaustive()
    }
}

impl<T: Clone> Default for InFlight<T> {
    fn default() -> Self {
        Self { calls: Mutex::new(HashMap::new()), next_id: AtomicU64::new(0) }
    }
}

impl<T> InFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `start()` for `key`, or join the call already in progress.
    ///
    /// `start` is only invoked by the caller that becomes the leader.
    pub async fn run<F, Fut>(&self, key: &str, start: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (id, call) = {
            let mut calls = self.calls.lock().await;
            match calls.get(key) {
                Some((id, call)) => {
                    tracing::debug!(key, "joining in-flight refresh");
                    (*id, call.clone())
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let call = start().boxed().shared();
                    calls.insert(key.to_string(), (id, call.clone()));
                    (id, call)
                }
            }
        };

        let output = call.await;

        let mut calls = self.calls.lock().await;
        if calls.get(key).is_some_and(|(current, _)| *current == id) {
            calls.remove(key);
        }

        output
    }

    pub async fn is_running(&self, key: &str) -> bool {
        self.calls.lock().await.contains_key(key)
    }
}
