//! Deduplication of concurrent operations.
//!
//! While an operation for a key is running, further callers for that key
//! await the same shared future instead of starting another one. The entry
//! is dropped once the operation finishes, successful or not.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::error::{Result, VaultError};

type InFlight<T> = Shared<BoxFuture<'static, Result<T>>>;

pub struct SingleFlight<T> {
    in_flight: Mutex<HashMap<String, InFlight<T>>>,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `make()` for `key`, or join the run already in progress.
    ///
    /// `make` is only called when no run is in progress.
    pub async fn run<F, Fut>(&self, key: &str, make: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let future = {
            let mut in_flight = self
                .in_flight
                .lock()
                .map_err(|_| VaultError::Other("single-flight map poisoned".to_string()))?;
            match in_flight.get(key) {
                Some(running) => running.clone(),
                None => {
                    let future = make().boxed().shared();
                    in_flight.insert(key.to_string(), future.clone());
                    future
                }
            }
        };

        let result = future.clone().await;

        if let Ok(mut in_flight) = self.in_flight.lock() {
            let finished = in_flight
                .get(key)
                .map(|entry| entry.ptr_eq(&future))
                .unwrap_or(false);
            if finished {
                in_flight.remove(key);
            }
        }
        result
    }

    /// Whether an operation for `key` is running.
    pub fn is_running(&self, key: &str) -> bool {
        self.in_flight
            .lock()
            .map(|in_flight| in_flight.contains_key(key))
            .unwrap_or(false)
    }
}

impl<T> Default for SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_run() {
        let flights = Arc::new(SingleFlight::<u32>::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flights = flights.clone();
            let runs = runs.clone();
            handles.push(tokio::spawn(async move {
                flights
                    .run("alice", move || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(7)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 7);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!flights.is_running("alice"));
    }

    #[tokio::test]
    async fn test_failure_is_shared_then_cleared() {
        let flights = SingleFlight::<u32>::new();

        let failed = flights
            .run("alice", || async { Err(VaultError::Network("down".to_string())) })
            .await;
        assert!(matches!(failed, Err(VaultError::Network(_))));

        // A later call starts fresh.
        let ok = flights.run("alice", || async { Ok(1) }).await;
        assert_eq!(ok.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let flights = SingleFlight::<&'static str>::new();
        let (a, b) = tokio::join!(
            flights.run("alice", || async { Ok("a") }),
            flights.run("bob", || async { Ok("b") }),
        );
        assert_eq!(a.unwrap(), "a");
        assert_eq!(b.unwrap(), "b");
    }
}
