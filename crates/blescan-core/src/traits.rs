//! Trait abstractions for scan sources.
//!
//! This module provides the [`ScanSource`] trait that abstracts over the
//! real Bluetooth scanner and the mock scanner used in tests.

use std::time::Duration;

use async_trait::async_trait;

use blescan_types::Observation;

use crate::error::Result;

/// A source of per-cycle BLE observations.
///
/// # Example
///
/// ```ignore
/// use blescan_core::ScanSource;
///
/// async fn count<S: ScanSource>(source: &S) -> usize {
///     source.scan(Duration::from_secs(1)).await.map(|o| o.len()).unwrap_or(0)
/// }
/// ```
#[async_trait]
pub trait ScanSource: Send + Sync {
    /// Scan for `duration` and return every device observed in that window.
    ///
    /// An error is transient: callers treat it as an empty result and try
    /// again on the next cycle.
    async fn scan(&self, duration: Duration) -> Result<Vec<Observation>>;
}
