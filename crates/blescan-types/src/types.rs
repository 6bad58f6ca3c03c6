//! Core types flowing through the scan pipeline.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A single device seen during one scan cycle.
///
/// Observations are ephemeral: the scan source produces a fresh list every
/// cycle and nothing stores them directly.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Observation {
    /// Bluetooth address (or platform identifier on macOS).
    pub address: String,
    /// Signal strength in dBm. Always negative in practice.
    pub rssi: i16,
    /// Beacon proximity UUID as lowercase hex, empty for non-beacons.
    pub service_uuid: String,
    /// Beacon major field as lowercase hex, empty for non-beacons.
    pub major: String,
    /// Beacon minor field as lowercase hex, empty for non-beacons.
    pub minor: String,
}

impl Observation {
    /// Create an observation for a plain (non-beacon) device.
    pub fn new(address: impl Into<String>, rssi: i16) -> Self {
        Self {
            address: address.into(),
            rssi,
            service_uuid: String::new(),
            major: String::new(),
            minor: String::new(),
        }
    }

    /// Create an observation carrying beacon manufacturer fields.
    pub fn beacon(
        address: impl Into<String>,
        rssi: i16,
        service_uuid: impl Into<String>,
        major: impl Into<String>,
        minor: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            rssi,
            service_uuid: service_uuid.into(),
            major: major.into(),
            minor: minor.into(),
        }
    }

    /// Tag identifier printed on the beacon: major and minor concatenated.
    #[must_use]
    pub fn tag(&self) -> String {
        format!("{}{}", self.major, self.minor)
    }

    /// Whether this observation carried beacon manufacturer data.
    #[must_use]
    pub fn is_beacon(&self) -> bool {
        !self.service_uuid.is_empty()
    }
}

/// Fixed geographic location of the board.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// A device that stayed in range for most of a counting window.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StaticDevice {
    pub address: String,
    /// Best RSSI seen for this device within the window.
    pub rssi: i16,
}

/// Summary statistics over a list of RSSI values.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RssiStats {
    pub mean: f64,
    /// Population standard deviation.
    pub std_dev: f64,
    pub min: i16,
    pub max: i16,
}

impl RssiStats {
    /// Compute statistics, or `None` for an empty list.
    #[must_use]
    pub fn from_values(values: &[i16]) -> Option<Self> {
        let min = *values.iter().min()?;
        let max = *values.iter().max()?;
        let n = values.len() as f64;
        let mean = values.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
        let variance = values
            .iter()
            .map(|&v| {
                let d = f64::from(v) - mean;
                d * d
            })
            .sum::<f64>()
            / n;

        Some(Self {
            mean,
            std_dev: variance.sqrt(),
            min,
            max,
        })
    }
}

/// Immutable snapshot emitted by the counting engine once per window.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CountSummary {
    /// Board identifier.
    pub id: u32,
    /// Window end, aligned to a multiple of the flush interval.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
    /// Number of scans accumulated in the window.
    pub scans: u32,
    /// Total scanning time in seconds.
    pub scan_time: f64,
    /// RSSI of every visible observation of every scan in the window.
    pub rssi: Vec<i16>,
    /// Per-scan count of visible devices.
    pub inst_all: Vec<usize>,
    /// Per-scan count of close devices.
    pub inst_close: Vec<usize>,
    /// Devices seen in at least `static_ratio` of the window's scans.
    pub static_devices: Vec<StaticDevice>,
    /// Configured close threshold in dBm.
    pub close_threshold: i16,
    /// Configured static ratio.
    pub static_ratio: f64,
    pub location: Option<Location>,
}

impl CountSummary {
    /// Number of visible observations in the window.
    #[must_use]
    pub fn tot_all(&self) -> usize {
        self.rssi.len()
    }

    /// Number of observations above the close threshold.
    #[must_use]
    pub fn tot_close(&self) -> usize {
        self.rssi
            .iter()
            .filter(|&&r| r > self.close_threshold)
            .count()
    }

    /// Mean of the per-scan visible counts.
    #[must_use]
    pub fn inst_all_mean(&self) -> Option<f64> {
        mean_of(&self.inst_all)
    }

    /// Mean of the per-scan close counts.
    #[must_use]
    pub fn inst_close_mean(&self) -> Option<f64> {
        mean_of(&self.inst_close)
    }

    #[must_use]
    pub fn stat_all(&self) -> usize {
        self.static_devices.len()
    }

    /// Static devices that are also close.
    #[must_use]
    pub fn stat_close(&self) -> usize {
        self.static_devices
            .iter()
            .filter(|d| d.rssi > self.close_threshold)
            .count()
    }

    /// RSSI statistics, `None` when the window saw nothing.
    #[must_use]
    pub fn rssi_stats(&self) -> Option<RssiStats> {
        RssiStats::from_values(&self.rssi)
    }
}

fn mean_of(values: &[usize]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<usize>() as f64 / values.len() as f64)
}

/// One complete presence episode of a beacon.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StayEvent {
    /// Board identifier.
    pub id: u32,
    /// When the beacon left the presence set.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
    /// Beacon address.
    pub address: String,
    /// Tag identifier (major + minor).
    pub tag: String,
    /// Seconds between entering and leaving the presence set.
    pub staying_secs: i64,
    /// One RSSI sample per cycle spent in the presence set.
    pub rssi_samples: Vec<i16>,
    pub location: Option<Location>,
}

impl StayEvent {
    /// Mean RSSI over the accumulated samples.
    #[must_use]
    pub fn mean_rssi(&self) -> Option<f64> {
        RssiStats::from_values(&self.rssi_samples).map(|s| s.mean)
    }
}

/// Periodic diagnostic snapshot of visible target beacons.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BeaconSnapshot {
    /// Board identifier.
    pub id: u32,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
    /// `(tag, rssi)` pairs sorted by tag.
    pub beacons: Vec<(String, i16)>,
}

/// Kind of output row, one daily file per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DataKind {
    Summary,
    Rssi,
    StayTime,
    Beacon,
}

impl DataKind {
    /// All kinds, in file-listing order.
    pub const ALL: [DataKind; 4] = [
        DataKind::Beacon,
        DataKind::Rssi,
        DataKind::StayTime,
        DataKind::Summary,
    ];

    /// File name suffix (`{HHMM}_{suffix}.csv`).
    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            DataKind::Summary => "summary",
            DataKind::Rssi => "rssi",
            DataKind::StayTime => "stay_time",
            DataKind::Beacon => "beacon",
        }
    }

    /// Header row of the reconstructed daily file.
    #[must_use]
    pub fn header(self) -> &'static [&'static str] {
        match self {
            DataKind::Summary => &[
                "ID",
                "Time",
                "Scans",
                "Scantime",
                "Tot.all",
                "Tot.close",
                "Inst.all",
                "Inst.close",
                "Stat.all",
                "Stat.close",
                "Avg RSSI",
                "Std RSSI",
                "Min RSSI",
                "Max RSSI",
                "RSSI thresh",
                "Stat.ratio",
                "Lat",
                "Lon",
            ],
            DataKind::Rssi => &["ID", "Time", "RSSI list"],
            DataKind::StayTime => &[
                "ID",
                "Time",
                "Tag Name",
                "Staying time",
                "Average RSSI",
                "Latitude",
                "Longitude",
            ],
            DataKind::Beacon => &["ID", "Time", "Beacon list", "RSSI list"],
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn summary(rssi: Vec<i16>) -> CountSummary {
        CountSummary {
            id: 7,
            timestamp: datetime!(2024-05-01 12:00:10 UTC),
            scans: 2,
            scan_time: 2.0,
            rssi,
            inst_all: vec![2, 1],
            inst_close: vec![1, 0],
            static_devices: vec![
                StaticDevice {
                    address: "AA".into(),
                    rssi: -60,
                },
                StaticDevice {
                    address: "BB".into(),
                    rssi: -90,
                },
            ],
            close_threshold: -75,
            static_ratio: 0.7,
            location: None,
        }
    }

    #[test]
    fn test_rssi_stats_population_std() {
        let stats = RssiStats::from_values(&[-60, -90]).unwrap();
        assert!((stats.mean + 75.0).abs() < 1e-9);
        assert!((stats.std_dev - 15.0).abs() < 1e-9);
        assert_eq!(stats.min, -90);
        assert_eq!(stats.max, -60);
    }

    #[test]
    fn test_rssi_stats_empty_is_none() {
        assert!(RssiStats::from_values(&[]).is_none());
    }

    #[test]
    fn test_summary_counts() {
        let s = summary(vec![-60, -90, -60]);
        assert_eq!(s.tot_all(), 3);
        assert_eq!(s.tot_close(), 2);
        assert_eq!(s.stat_all(), 2);
        assert_eq!(s.stat_close(), 1);
        assert_eq!(s.inst_all_mean(), Some(1.5));
        assert_eq!(s.inst_close_mean(), Some(0.5));
    }

    #[test]
    fn test_close_threshold_is_strict() {
        let s = summary(vec![-75, -74]);
        assert_eq!(s.tot_close(), 1);
    }

    #[test]
    fn test_observation_tag() {
        let obs = Observation::beacon("AA", -50, "f7826da6", "0001", "00ff");
        assert_eq!(obs.tag(), "000100ff");
        assert!(obs.is_beacon());
        assert!(!Observation::new("BB", -50).is_beacon());
    }

    #[test]
    fn test_data_kind_headers() {
        assert_eq!(DataKind::Summary.header().len(), 18);
        assert_eq!(DataKind::Rssi.header().join(","), "ID,Time,RSSI list");
        assert_eq!(DataKind::StayTime.suffix(), "stay_time");
    }
}
