//! Executor
//!
//! The client's public API is synchronous while every network collaborator is
//! async. The [`Executor`] owns a dedicated tokio runtime; [`Executor::run`]
//! spawns a future onto it and blocks the calling thread until the result is
//! handed back over a channel.
//!
//! Any number of threads may call `run` concurrently: work is always marshaled
//! onto the same runtime instead of creating a second one.

use std::future::Future;
use std::sync::mpsc;
use tokio::runtime::{Builder, Runtime};

use crate::error::{DriftError, DriftResult};

/// Dedicated execution context with a blocking join
pub struct Executor {
    runtime: Option<Runtime>,
}

impl Executor {
    /// Start a runtime with `worker_threads` threads
    pub fn new(worker_threads: usize) -> DriftResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("drift-io")
            .enable_all()
            .build()
            .map_err(|e| DriftError::Runtime(format!("failed to start runtime: {e}")))?;

        Ok(Self {
            runtime: Some(runtime),
        })
    }

    /// Run a future to completion on the executor, blocking the caller
    pub fn run<F, T>(&self, future: F) -> DriftResult<T>
    where
        F: Future<Output = DriftResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| DriftError::Runtime("executor is shut down".to_string()))?;

        let (tx, rx) = mpsc::sync_channel(1);
        runtime.spawn(async move {
            let _ = tx.send(future.await);
        });

        rx.recv()
            .map_err(|_| DriftError::Runtime("task aborted before completion".to_string()))?
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        // Dropping a runtime blocks; shut down in the background so the
        // executor can be released from any context.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_run_returns_value() {
        let executor = Executor::new(1).unwrap();
        let value = executor
            .run(async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(42)
            })
            .unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_run_propagates_errors() {
        let executor = Executor::new(1).unwrap();
        let result: DriftResult<()> =
            executor.run(async { Err(DriftError::WalkFailed("boom".to_string())) });
        assert!(matches!(result, Err(DriftError::WalkFailed(_))));
    }

    #[test]
    fn test_panicking_task_reports_runtime_error() {
        let executor = Executor::new(1).unwrap();
        let result: DriftResult<()> = executor.run(async {
            let fail = true;
            if fail {
                panic!("task failure");
            }
            Ok(())
        });
        assert!(matches!(result, Err(DriftError::Runtime(_))));
    }

    #[test]
    fn test_shared_across_threads() {
        let executor = Arc::new(Executor::new(2).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let executor = Arc::clone(&executor);
                thread::spawn(move || executor.run(async move { Ok(i * 2) }).unwrap())
            })
            .collect();

        let mut results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        results.sort_unstable();
        assert_eq!(results, vec![0, 2, 4, 6, 8, 10, 12, 14]);
    }
}
