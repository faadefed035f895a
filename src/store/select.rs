//! Backend selection
//!
//! Candidates are tried in priority order. The first one that builds and
//! answers its liveness probe in time becomes the active backend; the rest are
//! never touched.

use std::time::Duration;

use super::{Backend, StoreError};
use crate::error::{DriftError, DriftResult};

type BuildFn = Box<dyn FnOnce() -> Result<Backend, StoreError> + Send>;

/// A named backend constructor
pub struct Candidate {
    name: String,
    build: BuildFn,
}

impl Candidate {
    pub fn new<F>(name: impl Into<String>, build: F) -> Self
    where
        F: FnOnce() -> Result<Backend, StoreError> + Send + 'static,
    {
        Self {
            name: name.into(),
            build: Box::new(build),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Pick the first reachable backend
///
/// Failures of earlier candidates are logged and skipped. If no candidate is
/// reachable the error lists every backend tried.
pub async fn select(candidates: Vec<Candidate>, probe_timeout: Duration) -> DriftResult<Backend> {
    let mut tried = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        let Candidate { name, build } = candidate;

        let backend = match build() {
            Ok(backend) => backend,
            Err(e) => {
                tracing::warn!(backend = %name, error = %e, "Failed to construct blob store");
                tried.push(name);
                continue;
            }
        };

        let probe = tokio::time::timeout(probe_timeout, backend.probe())
            .await
            .unwrap_or(Err(StoreError::Timeout(probe_timeout)));

        match probe {
            Ok(()) => {
                tracing::info!(backend = %name, "Using blob store");
                return Ok(backend);
            }
            Err(e) => {
                tracing::warn!(backend = %name, error = %e, "Blob store unavailable, trying next");
                tried.push(name);
            }
        }
    }

    Err(DriftError::BackendUnavailable { tried })
}
