//! Presence counting over wall-clock aligned windows.
//!
//! The scanner runs with a roughly one second cycle, which is too short to
//! see every device nearby. [`CountingEngine`] accumulates consecutive scans
//! into a window and emits one [`CountSummary`] each time the wall clock
//! crosses a multiple of `delta` seconds (with `delta = 10`: at :00, :10,
//! :20, ...). Window state is reset right after every flush.
//!
//! # Example
//!
//! ```
//! use blescan_core::counting::{CountingConfig, CountingEngine};
//! use blescan_types::Observation;
//! use time::macros::datetime;
//!
//! let mut engine = CountingEngine::new(CountingConfig::default()).unwrap();
//! let scan = vec![Observation::new("AA", -60)];
//!
//! assert!(engine.process_scan_at(&scan, 1.0, datetime!(2024-01-01 12:00:08 UTC)).is_none());
//! assert!(engine.process_scan_at(&scan, 1.0, datetime!(2024-01-01 12:00:09 UTC)).is_none());
//! let summary = engine
//!     .process_scan_at(&scan, 1.0, datetime!(2024-01-01 12:00:10 UTC))
//!     .unwrap();
//! assert_eq!(summary.scans, 3);
//! ```

use std::collections::{HashMap, HashSet};

use time::{Date, OffsetDateTime};
use tracing::debug;

use blescan_types::{CountSummary, Location, Observation, StaticDevice};

use crate::error::{Error, Result};
use crate::util::{now_local, second_of_day, start_of_day};

/// Settings of the counting engine.
#[derive(Debug, Clone, PartialEq)]
pub struct CountingConfig {
    /// Board identifier stamped on every summary.
    pub device_id: u32,
    /// Observations at or below this RSSI are ignored.
    pub rssi_threshold: i16,
    /// Observations above this RSSI count as close.
    pub close_threshold: i16,
    /// Window length in seconds.
    pub delta: u32,
    /// Fraction of the window's scans a device must appear in to be static.
    pub static_ratio: f64,
    pub location: Option<Location>,
}

impl Default for CountingConfig {
    fn default() -> Self {
        Self {
            device_id: 0,
            rssi_threshold: -100,
            close_threshold: -75,
            delta: 10,
            static_ratio: 0.7,
            location: None,
        }
    }
}

impl CountingConfig {
    /// Check the settings for values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.delta == 0 {
            return Err(Error::invalid_config("delta must be at least 1 second"));
        }
        if 86_400 % self.delta != 0 {
            return Err(Error::invalid_config(format!(
                "delta {} does not divide a day evenly",
                self.delta
            )));
        }
        if !(self.static_ratio > 0.0 && self.static_ratio <= 1.0) {
            return Err(Error::invalid_config(format!(
                "static ratio {} must be in (0, 1]",
                self.static_ratio
            )));
        }
        if self.close_threshold < self.rssi_threshold {
            return Err(Error::invalid_config(
                "close threshold must not be below the visibility threshold",
            ));
        }
        Ok(())
    }
}

/// Mutable state of the window being accumulated.
#[derive(Debug, Default)]
struct ScanWindow {
    /// Best RSSI per address this window.
    best: HashMap<String, i16>,
    /// RSSI of every visible observation.
    rssi: Vec<i16>,
    scans: u32,
    scan_time: f64,
    inst_all: Vec<usize>,
    inst_close: Vec<usize>,
    /// Number of scans each address appeared in.
    tally: HashMap<String, u32>,
}

/// Accumulates scans and emits a [`CountSummary`] per window.
#[derive(Debug)]
pub struct CountingEngine {
    config: CountingConfig,
    window: ScanWindow,
    /// Day and `second_of_day / delta` of the previous cycle.
    last_bucket: Option<(Date, u32)>,
}

impl CountingEngine {
    /// Create an engine after validating its settings.
    pub fn new(config: CountingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            window: ScanWindow::default(),
            last_bucket: None,
        })
    }

    pub fn config(&self) -> &CountingConfig {
        &self.config
    }

    /// Number of scans in the current window.
    pub fn scans_in_window(&self) -> u32 {
        self.window.scans
    }

    /// Process one scan cycle using the local wall clock.
    pub fn process_scan(
        &mut self,
        observations: &[Observation],
        scan_secs: f64,
    ) -> Option<CountSummary> {
        self.process_scan_at(observations, scan_secs, now_local())
    }

    /// Process one scan cycle that completed at `now`.
    ///
    /// Returns the flushed summary when this cycle crossed a window boundary.
    /// The scan itself is accounted to the window that closes.
    pub fn process_scan_at(
        &mut self,
        observations: &[Observation],
        scan_secs: f64,
        now: OffsetDateTime,
    ) -> Option<CountSummary> {
        self.accumulate(observations, scan_secs);

        let bucket = (now.date(), second_of_day(now) / self.config.delta);
        let crossed = matches!(self.last_bucket, Some(previous) if previous != bucket);
        self.last_bucket = Some(bucket);

        if crossed {
            Some(self.flush_at(now))
        } else {
            None
        }
    }

    fn accumulate(&mut self, observations: &[Observation], scan_secs: f64) {
        let window = &mut self.window;
        let mut seen_this_scan = HashSet::new();
        let mut all = 0;
        let mut close = 0;

        for obs in observations
            .iter()
            .filter(|o| o.rssi > self.config.rssi_threshold)
        {
            all += 1;
            if obs.rssi > self.config.close_threshold {
                close += 1;
            }
            window.rssi.push(obs.rssi);

            window
                .best
                .entry(obs.address.clone())
                .and_modify(|best| *best = (*best).max(obs.rssi))
                .or_insert(obs.rssi);

            if seen_this_scan.insert(obs.address.as_str()) {
                *window.tally.entry(obs.address.clone()).or_insert(0) += 1;
            }
        }

        window.scans += 1;
        window.scan_time += scan_secs;
        window.inst_all.push(all);
        window.inst_close.push(close);
    }

    /// Emit the current window as a summary stamped with the boundary at or
    /// before `now`, then reset the window.
    pub fn flush_at(&mut self, now: OffsetDateTime) -> CountSummary {
        let window = std::mem::take(&mut self.window);
        let delta = self.config.delta;
        let boundary_secs = (second_of_day(now) / delta) * delta;
        let timestamp = start_of_day(now) + time::Duration::seconds(i64::from(boundary_secs));

        let needed = self.config.static_ratio * f64::from(window.scans);
        let mut static_devices: Vec<StaticDevice> = window
            .tally
            .iter()
            .filter(|&(_, &count)| f64::from(count) >= needed)
            .filter_map(|(address, _)| {
                window.best.get(address).map(|&rssi| StaticDevice {
                    address: address.clone(),
                    rssi,
                })
            })
            .collect();
        static_devices.sort_by(|a, b| a.address.cmp(&b.address));

        debug!(
            "Counting flush at {}: {} scans, {} observations, {} static",
            timestamp,
            window.scans,
            window.rssi.len(),
            static_devices.len()
        );

        CountSummary {
            id: self.config.device_id,
            timestamp,
            scans: window.scans,
            scan_time: window.scan_time,
            rssi: window.rssi,
            inst_all: window.inst_all,
            inst_close: window.inst_close,
            static_devices,
            close_threshold: self.config.close_threshold,
            static_ratio: self.config.static_ratio,
            location: self.config.location,
        }
    }
}
