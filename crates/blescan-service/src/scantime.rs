//! Scan duration calibration.
//!
//! A scan requested for `t` seconds takes a little longer on real hardware
//! (adapter start/stop, result collection). The calibrator nudges the
//! requested duration by 0.1 % of the target after every cycle so that the
//! measured cycle time converges on the target, and persists the running
//! mean so the next start begins close to the right value.
//!
//! A stored value is checked with one measured scan before it is trusted.
//! When that cycle is more than 5 % off the target, [`ScanTimeCalibrator::calibrate`]
//! searches for a fresh value: it starts at half the target, steps by a
//! fifth of that, and halves the step every time a scan overshoots.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use blescan_core::ScanSource;

/// Name of the persisted value inside the state directory.
pub const STATE_FILE: &str = "scantime.txt";

/// Number of cycles between two saves.
const SAVE_EVERY: usize = 100;
/// Measured cycles further than this from the target trigger a search.
const MAX_DEVIATION: f64 = 0.05;
const STEP: f64 = 0.001;
/// Scans spent on one calibration search.
const SEARCH_ITERATIONS: usize = 15;
/// Divisor applied to the search step on overshoot.
const SEARCH_STEP_DIVISOR: f64 = 2.0;

#[derive(Debug)]
pub struct ScanTimeCalibrator {
    target: f64,
    current: f64,
    /// Loaded from the state file and not yet checked against a real cycle.
    unverified: bool,
    history: Vec<f64>,
    state_file: Option<PathBuf>,
}

impl ScanTimeCalibrator {
    /// Start from the stored value in `state_dir`, if any.
    pub fn new(target_secs: f64, state_dir: Option<&Path>) -> Self {
        let state_file = state_dir.map(|dir| dir.join(STATE_FILE));
        let stored = state_file.as_deref().and_then(read_stored);
        if let Some(value) = stored {
            info!("Loaded stored scan time {:.4}s", value);
        }

        Self {
            target: target_secs,
            current: stored.unwrap_or(target_secs),
            unverified: stored.is_some(),
            history: Vec::with_capacity(SAVE_EVERY),
            state_file,
        }
    }

    /// Duration to request for the next scan.
    pub fn requested(&self) -> Duration {
        Duration::from_secs_f64(self.current.max(0.0))
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    fn off_target(&self, cycle: f64) -> bool {
        (1.0 - cycle / self.target).abs() > MAX_DEVIATION
    }

    /// Check a stored value against one real scan and search for a new one
    /// when the cycle it produces is off target.
    ///
    /// Does nothing when the value was not loaded from the state file.
    pub async fn calibrate<S: ScanSource + ?Sized>(&mut self, source: &S) {
        if !self.unverified {
            return;
        }
        self.unverified = false;

        let Some(cycle) = measure(source, self.current).await else {
            warn!("Cannot verify stored scan time, keeping {:.4}s", self.current);
            return;
        };
        if !self.off_target(cycle) {
            info!(
                "Stored scan time {:.4}s gives {:.4}s cycles",
                self.current, cycle
            );
            return;
        }

        info!(
            "Stored scan time {:.4}s gives {:.4}s cycles, searching for a new value",
            self.current, cycle
        );
        self.search(source).await;
    }

    async fn search<S: ScanSource + ?Sized>(&mut self, source: &S) {
        let mut scan_time = self.target / 2.0;
        let mut step = scan_time / 5.0;

        for iteration in 1..=SEARCH_ITERATIONS {
            let Some(cycle) = measure(source, scan_time).await else {
                continue;
            };
            debug!(
                "Search {}: scan {:.4}s took {:.4}s",
                iteration, scan_time, cycle
            );
            if cycle == self.target {
                break;
            } else if cycle < self.target {
                scan_time += step;
            } else {
                scan_time -= step;
                step /= SEARCH_STEP_DIVISOR;
            }
            self.save(scan_time);
        }

        info!("Calibrated scan time {:.4}s", scan_time);
        self.save(scan_time);
        self.current = scan_time;
        self.history.clear();
    }

    /// Feed the measured duration of the last cycle.
    pub fn record(&mut self, measured: Duration) {
        let measured = measured.as_secs_f64();
        if measured > self.target {
            self.current -= STEP * self.target;
        } else if measured < self.target {
            self.current += STEP * self.target;
        }
        debug!("Cycle took {:.4}s, next scan {:.4}s", measured, self.current);

        self.history.push(self.current);
        if self.history.len() >= SAVE_EVERY {
            let mean = self.history.iter().sum::<f64>() / self.history.len() as f64;
            self.history.clear();
            self.save(mean);
        }
    }

    fn save(&self, value: f64) {
        let Some(path) = &self.state_file else {
            return;
        };
        if let Some(parent) = path.parent()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            warn!("Cannot create {}: {}", parent.display(), e);
            return;
        }
        if let Err(e) = std::fs::write(path, value.to_string()) {
            warn!("Cannot save scan time to {}: {}", path.display(), e);
        }
    }
}

/// Wall time of one scan requested for `secs`, or `None` if it failed.
async fn measure<S: ScanSource + ?Sized>(source: &S, secs: f64) -> Option<f64> {
    let started = Instant::now();
    match source.scan(Duration::from_secs_f64(secs.max(0.0))).await {
        Ok(_) => Some(started.elapsed().as_secs_f64()),
        Err(e) => {
            warn!("Calibration scan failed: {}", e);
            None
        }
    }
}

fn read_stored(path: &Path) -> Option<f64> {
    let text = std::fs::read_to_string(path).ok()?;
    match text.trim().parse::<f64>() {
        Ok(value) if value.is_finite() && value > 0.0 => Some(value),
        _ => {
            warn!("Ignoring unreadable scan time in {}", path.display());
            None
        }
    }
}
