//! Mock scan source for testing.
//!
//! [`MockScanner`] replays a script of scan results without Bluetooth
//! hardware. It implements [`ScanSource`], so the pipeline can be driven
//! end-to-end in tests.
//!
//! # Features
//!
//! - **Scripted scans**: each call to `scan` returns the next scripted result
//! - **Failure injection**: fail the next N scans
//! - **Latency simulation**: sleep for the requested scan duration

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use blescan_types::Observation;

use crate::error::{Error, Result};
use crate::traits::ScanSource;

/// A scripted scan source.
///
/// # Example
///
/// ```
/// use blescan_core::{MockScanner, ScanSource};
/// use blescan_types::Observation;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let scanner = MockScanner::builder()
///         .scan(vec![Observation::new("AA", -60)])
///         .build();
///
///     let first = scanner.scan(Duration::from_secs(1)).await.unwrap();
///     assert_eq!(first.len(), 1);
///     // the script is exhausted, further scans see nothing
///     assert!(scanner.scan(Duration::from_secs(1)).await.unwrap().is_empty());
/// }
/// ```
#[derive(Debug, Default)]
pub struct MockScanner {
    script: Mutex<VecDeque<Vec<Observation>>>,
    /// Returned once the script is exhausted.
    fallback: Vec<Observation>,
    simulate_duration: AtomicBool,
    remaining_failures: AtomicU32,
    scan_count: AtomicU32,
}

impl MockScanner {
    /// Create a scanner that never sees anything.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> MockScannerBuilder {
        MockScannerBuilder::default()
    }

    /// Append a scan result to the script.
    pub fn push_scan(&self, observations: Vec<Observation>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(observations);
        }
    }

    /// Fail the next `count` scans.
    pub fn fail_next(&self, count: u32) {
        self.remaining_failures.store(count, Ordering::SeqCst);
    }

    /// Number of scans performed so far, failed ones included.
    pub fn scan_count(&self) -> u32 {
        self.scan_count.load(Ordering::SeqCst)
    }

    /// Number of scripted results not yet returned.
    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ScanSource for MockScanner {
    async fn scan(&self, duration: Duration) -> Result<Vec<Observation>> {
        self.scan_count.fetch_add(1, Ordering::SeqCst);

        if self.simulate_duration.load(Ordering::Relaxed) {
            tokio::time::sleep(duration).await;
        }

        let failing = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::InvalidData("mock scan failure".to_string()));
        }

        let next = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front());
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}

/// Builder for [`MockScanner`].
#[derive(Debug, Default)]
pub struct MockScannerBuilder {
    script: VecDeque<Vec<Observation>>,
    fallback: Vec<Observation>,
    simulate_duration: bool,
    failures: u32,
}

impl MockScannerBuilder {
    /// Add one scripted scan result.
    #[must_use]
    pub fn scan(mut self, observations: Vec<Observation>) -> Self {
        self.script.push_back(observations);
        self
    }

    /// Repeat the same scan result `times` times.
    #[must_use]
    pub fn repeat(mut self, observations: Vec<Observation>, times: usize) -> Self {
        for _ in 0..times {
            self.script.push_back(observations.clone());
        }
        self
    }

    /// Result returned after the script runs out.
    #[must_use]
    pub fn fallback(mut self, observations: Vec<Observation>) -> Self {
        self.fallback = observations;
        self
    }

    /// Sleep for the requested duration on every scan.
    #[must_use]
    pub fn simulate_duration(mut self, enabled: bool) -> Self {
        self.simulate_duration = enabled;
        self
    }

    #[must_use]
    pub fn fail_first(mut self, count: u32) -> Self {
        self.failures = count;
        self
    }

    pub fn build(self) -> MockScanner {
        MockScanner {
            script: Mutex::new(self.script),
            fallback: self.fallback,
            simulate_duration: AtomicBool::new(self.simulate_duration),
            remaining_failures: AtomicU32::new(self.failures),
            scan_count: AtomicU32::new(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_fallback() {
        let scanner = MockScanner::builder()
            .repeat(vec![Observation::new("AA", -60)], 2)
            .fallback(vec![Observation::new("ZZ", -90)])
            .build();

        assert_eq!(scanner.remaining(), 2);
        for _ in 0..2 {
            let scan = scanner.scan(Duration::ZERO).await.unwrap();
            assert_eq!(scan[0].address, "AA");
        }
        let scan = scanner.scan(Duration::ZERO).await.unwrap();
        assert_eq!(scan[0].address, "ZZ");
        assert_eq!(scanner.scan_count(), 3);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let scanner = MockScanner::builder()
            .scan(vec![Observation::new("AA", -60)])
            .fail_first(2)
            .build();

        assert!(scanner.scan(Duration::ZERO).await.is_err());
        assert!(scanner.scan(Duration::ZERO).await.is_err());
        // the scripted scan was not consumed by the failures
        assert_eq!(scanner.scan(Duration::ZERO).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_duration() {
        let scanner = MockScanner::builder().simulate_duration(true).build();
        let start = tokio::time::Instant::now();
        scanner.scan(Duration::from_secs(1)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_push_scan() {
        let scanner = MockScanner::new();
        scanner.push_scan(vec![Observation::new("BB", -70)]);
        assert_eq!(scanner.scan(Duration::ZERO).await.unwrap()[0].address, "BB");
    }
}
