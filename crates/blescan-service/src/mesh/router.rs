//! Target discovery and candidate failover.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::MeshRadio;
use crate::error::MeshError;

/// Ordered list of reachable targets.
///
/// Candidates are the configured targets that answered the last discovery,
/// in configuration order. A candidate that fails a transmission is removed;
/// once the list is empty the next send runs a fresh discovery.
#[derive(Debug)]
pub struct MeshRouter {
    targets: Vec<String>,
    discovery_timeout: Duration,
    candidates: Mutex<Vec<String>>,
}

impl MeshRouter {
    pub fn new(targets: Vec<String>, discovery_timeout: Duration) -> Self {
        Self {
            targets,
            discovery_timeout,
            candidates: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.candidates.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Currently reachable candidates, best first.
    pub fn candidates(&self) -> Vec<String> {
        self.lock().clone()
    }

    /// Forget every candidate (after the radio was reopened).
    pub fn reset(&self) {
        self.lock().clear();
    }

    /// Run a discovery and replace the candidate list with the targets found.
    pub async fn rediscover(&self, radio: &dyn MeshRadio) -> Result<usize, MeshError> {
        let found = radio.discover(self.discovery_timeout).await?;
        let reachable: Vec<String> = self
            .targets
            .iter()
            .filter(|target| found.iter().any(|node| node == *target))
            .cloned()
            .collect();

        debug!(
            "Discovery found {} node(s), {} target(s) reachable",
            found.len(),
            reachable.len()
        );
        if reachable.is_empty() {
            warn!("No mesh target reachable (targets: {:?})", self.targets);
        }

        let count = reachable.len();
        *self.lock() = reachable;
        Ok(count)
    }

    /// Make sure there is at least one candidate, discovering if needed.
    /// Returns the number of candidates.
    pub async fn ensure_candidates(&self, radio: &dyn MeshRadio) -> Result<usize, MeshError> {
        let count = self.lock().len();
        if count > 0 {
            return Ok(count);
        }
        self.rediscover(radio).await
    }

    /// Send `payload` to the first candidate that accepts it.
    ///
    /// Failing candidates are dropped from the list as they fail. A fatal
    /// radio error is returned immediately; running out of candidates yields
    /// [`MeshError::NoReachableTarget`]. Returns the node that accepted.
    pub async fn send(&self, radio: &dyn MeshRadio, payload: &str) -> Result<String, MeshError> {
        self.ensure_candidates(radio).await?;

        loop {
            let Some(node) = self.lock().first().cloned() else {
                return Err(MeshError::NoReachableTarget);
            };

            match radio.send(&node, payload).await {
                Ok(()) => {
                    debug!("Sent {} byte(s) to {}", payload.len(), node);
                    return Ok(node);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    info!("Cannot reach target {}: {}", node, e);
                    self.lock().retain(|candidate| candidate != &node);
                }
            }
        }
    }
}
