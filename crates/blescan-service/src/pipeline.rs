//! The scan loop.
//!
//! One cycle scans once, feeds the raw observations to both engines and
//! hands whatever they emit to the configured sinks. Everything here runs on
//! the loop's own task; sinks only append to files or enqueue.

use time::OffsetDateTime;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use blescan_core::{BeaconEngine, CountingEngine, Observation, ScanSource, now_local};

use crate::scantime::ScanTimeCalibrator;
use crate::sinks::Sink;

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// The cancellation token fired.
    Cancelled,
    /// The shutdown beacon was seen.
    ShutdownBeacon,
}

/// What one cycle produced.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub summaries: usize,
    pub stays: usize,
    pub snapshots: usize,
}

pub struct Pipeline<S: ScanSource> {
    source: S,
    counting: CountingEngine,
    beacon: BeaconEngine,
    counting_sinks: Vec<Box<dyn Sink>>,
    beacon_sinks: Vec<Box<dyn Sink>>,
    calibrator: ScanTimeCalibrator,
    clock: fn() -> OffsetDateTime,
}

impl<S: ScanSource> Pipeline<S> {
    pub fn new(
        source: S,
        counting: CountingEngine,
        beacon: BeaconEngine,
        calibrator: ScanTimeCalibrator,
    ) -> Self {
        Self {
            source,
            counting,
            beacon,
            counting_sinks: Vec::new(),
            beacon_sinks: Vec::new(),
            calibrator,
            clock: now_local,
        }
    }

    /// Receive counting summaries.
    pub fn add_counting_sink(&mut self, sink: Box<dyn Sink>) {
        info!("Counting output goes to {}", sink.name());
        self.counting_sinks.push(sink);
    }

    /// Receive stays and beacon snapshots.
    pub fn add_beacon_sink(&mut self, sink: Box<dyn Sink>) {
        info!("Beacon output goes to {}", sink.name());
        self.beacon_sinks.push(sink);
    }

    /// Replace the wall clock used to stamp cycles.
    pub fn with_clock(mut self, clock: fn() -> OffsetDateTime) -> Self {
        self.clock = clock;
        self
    }

    pub fn counting(&self) -> &CountingEngine {
        &self.counting
    }

    pub fn beacon(&self) -> &BeaconEngine {
        &self.beacon
    }

    /// Feed one scan that completed at `now` through both engines.
    ///
    /// A failing sink is logged and skipped; the others still receive the
    /// record.
    pub fn process(
        &mut self,
        observations: &[Observation],
        scan_secs: f64,
        now: OffsetDateTime,
    ) -> CycleReport {
        let mut report = CycleReport::default();

        if let Some(summary) = self.counting.process_scan_at(observations, scan_secs, now) {
            debug!(
                "Window closed: {} scans, {} observations",
                summary.scans,
                summary.tot_all()
            );
            report.summaries = 1;
            for sink in &mut self.counting_sinks {
                if let Err(e) = sink.save_summary(&summary, now) {
                    warn!("Sink {} failed to store summary: {}", sink.name(), e);
                }
            }
        }

        let output = self.beacon.process_scan_at(observations, now);
        report.stays = output.stays.len();
        for stay in &output.stays {
            for sink in &mut self.beacon_sinks {
                if let Err(e) = sink.save_stay(stay, now) {
                    warn!("Sink {} failed to store stay: {}", sink.name(), e);
                }
            }
        }
        if let Some(snapshot) = &output.snapshot {
            report.snapshots = 1;
            for sink in &mut self.beacon_sinks {
                if let Err(e) = sink.save_snapshot(snapshot, now) {
                    warn!("Sink {} failed to store beacon snapshot: {}", sink.name(), e);
                }
            }
        }

        report
    }

    /// Run cycles until cancelled or the shutdown beacon is seen.
    pub async fn run(&mut self, cancel: CancellationToken) -> Exit {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Exit::Cancelled,
            _ = self.calibrator.calibrate(&self.source) => {}
        }
        info!(
            "Scan loop started (target cycle {:.3}s)",
            self.calibrator.target()
        );

        loop {
            let requested = self.calibrator.requested();
            let started = Instant::now();

            let scanned = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Exit::Cancelled,
                result = self.source.scan(requested) => result,
            };
            let observations = match scanned {
                Ok(observations) => observations,
                Err(e) => {
                    warn!("Scan failed, treating as empty: {}", e);
                    Vec::new()
                }
            };

            let scan_secs = started.elapsed().as_secs_f64();
            let now = (self.clock)();
            self.process(&observations, scan_secs, now);

            if self.beacon.shutdown_requested() {
                info!("Stopping scan loop on shutdown beacon");
                return Exit::ShutdownBeacon;
            }

            self.calibrator.record(started.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use time::macros::datetime;

    use super::*;
    use crate::error::SinkError;
    use blescan_core::{BeaconConfig, CountingConfig, MockScanner};
    use blescan_types::{BeaconSnapshot, CountSummary, StayEvent};

    const UUID: &str = "e2c56db5dffb48d2b060d0f5a71096e0";

    /// Records what it receives; optionally fails every write.
    #[derive(Clone, Default)]
    struct RecordingSink {
        failing: bool,
        summaries: Arc<Mutex<Vec<CountSummary>>>,
        stays: Arc<Mutex<Vec<StayEvent>>>,
        snapshots: Arc<Mutex<Vec<BeaconSnapshot>>>,
    }

    impl Sink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        fn save_summary(&mut self, summary: &CountSummary, _now: OffsetDateTime) -> Result<(), SinkError> {
            if self.failing {
                let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
                return Err(SinkError::Store(denied.into()));
            }
            self.summaries.lock().unwrap().push(summary.clone());
            Ok(())
        }

        fn save_stay(&mut self, event: &StayEvent, _now: OffsetDateTime) -> Result<(), SinkError> {
            self.stays.lock().unwrap().push(event.clone());
            Ok(())
        }

        fn save_snapshot(
            &mut self,
            snapshot: &BeaconSnapshot,
            _now: OffsetDateTime,
        ) -> Result<(), SinkError> {
            self.snapshots.lock().unwrap().push(snapshot.clone());
            Ok(())
        }
    }

    fn pipeline(source: MockScanner) -> Pipeline<MockScanner> {
        let counting = CountingEngine::new(CountingConfig {
            device_id: 3,
            delta: 10,
            ..CountingConfig::default()
        })
        .unwrap();
        let beacon = BeaconEngine::new(BeaconConfig {
            device_id: 3,
            target_id: UUID.to_string(),
            scans: 2,
            threshold: 1,
            shutdown_id: Some("ffffffff".to_string()),
            location: None,
        })
        .unwrap();
        Pipeline::new(source, counting, beacon, ScanTimeCalibrator::new(1.0, None))
    }

    fn at(secs: i64) -> OffsetDateTime {
        datetime!(2026-03-01 12:00:00 UTC) + time::Duration::seconds(secs)
    }

    #[test]
    fn test_summary_reaches_every_counting_sink() {
        let mut pipeline = pipeline(MockScanner::new());
        let first = RecordingSink::default();
        let second = RecordingSink::default();
        pipeline.add_counting_sink(Box::new(first.clone()));
        pipeline.add_counting_sink(Box::new(second.clone()));

        let scan = vec![Observation::new("AA", -60)];
        for secs in 1..=10 {
            pipeline.process(&scan, 1.0, at(secs));
        }

        assert_eq!(first.summaries.lock().unwrap().len(), 1);
        assert_eq!(second.summaries.lock().unwrap().len(), 1);
        assert_eq!(first.summaries.lock().unwrap()[0].scans, 10);
    }

    #[test]
    fn test_failing_sink_does_not_block_others() {
        let mut pipeline = pipeline(MockScanner::new());
        let broken = RecordingSink {
            failing: true,
            ..RecordingSink::default()
        };
        let healthy = RecordingSink::default();
        pipeline.add_counting_sink(Box::new(broken));
        pipeline.add_counting_sink(Box::new(healthy.clone()));

        pipeline.process(&[], 1.0, at(9));
        let report = pipeline.process(&[], 1.0, at(10));

        assert_eq!(report.summaries, 1);
        assert_eq!(healthy.summaries.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_beacon_output_reaches_beacon_sinks_only() {
        let mut pipeline = pipeline(MockScanner::new());
        let counting = RecordingSink::default();
        let beacon = RecordingSink::default();
        pipeline.add_counting_sink(Box::new(counting.clone()));
        pipeline.add_beacon_sink(Box::new(beacon.clone()));

        let tag = vec![Observation::beacon("BB", -70, UUID, "0001", "0002")];
        pipeline.process(&tag, 1.0, at(1));
        pipeline.process(&[], 1.0, at(2));
        let report = pipeline.process(&[], 1.0, at(3));

        assert_eq!(report.stays, 1);
        assert_eq!(beacon.stays.lock().unwrap()[0].tag, "00010002");
        assert!(!beacon.snapshots.lock().unwrap().is_empty());
        assert!(counting.stays.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let scanner = MockScanner::builder().simulate_duration(true).build();
        let mut pipeline = pipeline(scanner);
        let cancel = CancellationToken::new();

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5500)).await;
            stopper.cancel();
        });

        assert_eq!(pipeline.run(cancel).await, Exit::Cancelled);
        assert_eq!(pipeline.source.scan_count(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exits_on_shutdown_beacon() {
        let scanner = MockScanner::builder()
            .scan(vec![Observation::new("AA", -60)])
            .scan(vec![Observation::beacon("FF", -50, UUID, "ffff", "ffff")])
            .fallback(vec![Observation::new("AA", -60)])
            .build();
        let mut pipeline = pipeline(scanner);

        let exit = pipeline.run(CancellationToken::new()).await;

        assert_eq!(exit, Exit::ShutdownBeacon);
        assert_eq!(pipeline.source.scan_count(), 2);
        assert!(pipeline.beacon().shutdown_requested());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_failure_counts_as_empty_scan() {
        let scanner = MockScanner::builder()
            .fail_first(2)
            .simulate_duration(true)
            .build();
        let mut pipeline = pipeline(scanner).with_clock(|| datetime!(2026-03-01 12:00:01 UTC));
        let cancel = CancellationToken::new();

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(3500)).await;
            stopper.cancel();
        });

        assert_eq!(pipeline.run(cancel).await, Exit::Cancelled);
        assert_eq!(pipeline.counting().scans_in_window(), 3);
    }
}
