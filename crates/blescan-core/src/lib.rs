//! Scanning and scan-analysis core of the blescan telemetry daemon.
//!
//! This crate turns Bluetooth Low Energy advertisements into the statistics
//! the daemon ships to its sinks.
//!
//! # Features
//!
//! - **Scanning**: bounded scan windows over btleplug via [`BleScanner`]
//! - **iBeacon parsing**: UUID, major and minor from manufacturer data
//! - **Presence counting**: wall-clock aligned windows with [`CountingEngine`]
//! - **Stay detection**: sliding-window beacon presence with [`BeaconEngine`]
//! - **Retry policy**: backoff schedules shared with the delivery workers
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use blescan_core::{BleScanner, CountingConfig, CountingEngine, ScanSource};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scanner = BleScanner::open().await?;
//!     let mut counting = CountingEngine::new(CountingConfig::default())?;
//!
//!     loop {
//!         let observations = scanner.scan(Duration::from_secs(1)).await?;
//!         if let Some(summary) = counting.process_scan(&observations, 1.0) {
//!             println!("{} devices in the last window", summary.tot_all());
//!         }
//!     }
//! }
//! ```

pub mod advertisement;
pub mod beacon;
pub mod counting;
pub mod error;
pub mod mock;
pub mod retry;
pub mod scan;
pub mod traits;
pub mod util;

pub use advertisement::{BeaconData, observation_from_parts, parse_ibeacon};
pub use beacon::{BeaconConfig, BeaconEngine, BeaconOutput};
pub use counting::{CountingConfig, CountingEngine};
pub use error::{Error, Result};
pub use mock::{MockScanner, MockScannerBuilder};
pub use retry::{RetryConfig, with_retry};
pub use scan::{BleScanner, get_adapter};
pub use traits::ScanSource;
pub use util::{create_identifier, now_local};

pub use blescan_types::{BeaconSnapshot, CountSummary, Observation, StayEvent};
