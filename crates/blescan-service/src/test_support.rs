//! Shared fixtures for unit tests.

use time::macros::datetime;

use blescan_types::{CountSummary, Location, StaticDevice, SummaryRecord};

/// A small window: two scans, one close device that stayed all along.
pub fn sample_summary() -> CountSummary {
    CountSummary {
        id: 7,
        timestamp: datetime!(2026-03-01 12:00:10 UTC),
        scans: 2,
        scan_time: 2.0,
        rssi: vec![-60, -90],
        inst_all: vec![1, 1],
        inst_close: vec![1, 0],
        static_devices: vec![StaticDevice {
            address: "AA:BB:CC:DD:EE:01".to_string(),
            rssi: -60,
        }],
        close_threshold: -75,
        static_ratio: 0.5,
        location: Some(Location {
            latitude: 47.5,
            longitude: 8.25,
        }),
    }
}

pub fn sample_record() -> SummaryRecord {
    SummaryRecord::from_summary(&sample_summary())
}
