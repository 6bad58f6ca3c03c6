//! Flat summary record shared by the HTTP and mesh sinks.
//!
//! The HTTP backend receives the record as a JSON object. Over the mesh link
//! the same fields travel as a single comma-joined line in [`MESH_FIELDS`]
//! order, values only, and the receiving node parses them back by index.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::format_description::FormatItem;
use time::macros::format_description;

use crate::error::{ParseError, ParseResult};
use crate::types::CountSummary;

const TIMESTAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
const LEGACY_TIME_FORMAT: &[FormatItem<'static>] =
    format_description!("[hour][minute][second]");

/// Positional field order of a mesh line.
pub const MESH_FIELDS: [&str; 19] = [
    "id",
    "timestamp",
    "time",
    "scans",
    "scantime",
    "tot_all",
    "tot_close",
    "inst_all",
    "inst_close",
    "stat_all",
    "stat_close",
    "rssi_avg",
    "rssi_std",
    "rssi_min",
    "rssi_max",
    "rssi_threshold",
    "static_ratio",
    "latitude",
    "longitude",
];

/// Number of fields in a mesh line.
pub const MESH_FIELD_COUNT: usize = MESH_FIELDS.len();

/// Wire representation of a [`CountSummary`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SummaryRecord {
    pub id: u32,
    /// `YYYY-MM-DD HH:MM:SS` in local time.
    pub timestamp: String,
    /// Legacy `HHMMSS` time.
    pub time: String,
    pub scans: u32,
    pub scantime: f64,
    pub tot_all: usize,
    pub tot_close: usize,
    pub inst_all: Option<f64>,
    pub inst_close: Option<f64>,
    pub stat_all: usize,
    pub stat_close: usize,
    pub rssi_avg: Option<f64>,
    pub rssi_std: Option<f64>,
    pub rssi_min: Option<i16>,
    pub rssi_max: Option<i16>,
    pub rssi_threshold: i16,
    pub static_ratio: f64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Round to three decimals, the precision used in every output.
#[must_use]
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

impl SummaryRecord {
    /// Flatten a summary into its wire record.
    #[must_use]
    pub fn from_summary(summary: &CountSummary) -> Self {
        let stats = summary.rssi_stats();
        Self {
            id: summary.id,
            timestamp: summary
                .timestamp
                .format(TIMESTAMP_FORMAT)
                .unwrap_or_default(),
            time: summary
                .timestamp
                .format(LEGACY_TIME_FORMAT)
                .unwrap_or_default(),
            scans: summary.scans,
            scantime: round3(summary.scan_time),
            tot_all: summary.tot_all(),
            tot_close: summary.tot_close(),
            inst_all: summary.inst_all_mean().map(round3),
            inst_close: summary.inst_close_mean().map(round3),
            stat_all: summary.stat_all(),
            stat_close: summary.stat_close(),
            rssi_avg: stats.map(|s| round3(s.mean)),
            rssi_std: stats.map(|s| round3(s.std_dev)),
            rssi_min: stats.map(|s| s.min),
            rssi_max: stats.map(|s| s.max),
            rssi_threshold: summary.close_threshold,
            static_ratio: summary.static_ratio,
            latitude: summary.location.map(|l| l.latitude),
            longitude: summary.location.map(|l| l.longitude),
        }
    }

    /// Encode as a comma-joined mesh line. Missing values become empty fields.
    #[must_use]
    pub fn to_mesh_line(&self) -> String {
        let fields = [
            self.id.to_string(),
            self.timestamp.clone(),
            self.time.clone(),
            self.scans.to_string(),
            self.scantime.to_string(),
            self.tot_all.to_string(),
            self.tot_close.to_string(),
            opt(self.inst_all),
            opt(self.inst_close),
            self.stat_all.to_string(),
            self.stat_close.to_string(),
            opt(self.rssi_avg),
            opt(self.rssi_std),
            opt(self.rssi_min),
            opt(self.rssi_max),
            self.rssi_threshold.to_string(),
            self.static_ratio.to_string(),
            opt(self.latitude),
            opt(self.longitude),
        ];
        fields.join(",")
    }

    /// Decode a line produced by [`SummaryRecord::to_mesh_line`].
    pub fn from_mesh_line(line: &str) -> ParseResult<Self> {
        let parts: Vec<&str> = line.trim().split(',').collect();
        if parts.len() != MESH_FIELD_COUNT {
            return Err(ParseError::FieldCount {
                expected: MESH_FIELD_COUNT,
                actual: parts.len(),
            });
        }

        Ok(Self {
            id: req(parts[0], "id")?,
            timestamp: parts[1].to_string(),
            time: parts[2].to_string(),
            scans: req(parts[3], "scans")?,
            scantime: req(parts[4], "scantime")?,
            tot_all: req(parts[5], "tot_all")?,
            tot_close: req(parts[6], "tot_close")?,
            inst_all: maybe(parts[7], "inst_all")?,
            inst_close: maybe(parts[8], "inst_close")?,
            stat_all: req(parts[9], "stat_all")?,
            stat_close: req(parts[10], "stat_close")?,
            rssi_avg: maybe(parts[11], "rssi_avg")?,
            rssi_std: maybe(parts[12], "rssi_std")?,
            rssi_min: maybe(parts[13], "rssi_min")?,
            rssi_max: maybe(parts[14], "rssi_max")?,
            rssi_threshold: req(parts[15], "rssi_threshold")?,
            static_ratio: req(parts[16], "static_ratio")?,
            latitude: maybe(parts[17], "latitude")?,
            longitude: maybe(parts[18], "longitude")?,
        })
    }
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn req<T: std::str::FromStr>(raw: &str, field: &'static str) -> ParseResult<T> {
    raw.trim().parse().map_err(|_| ParseError::InvalidField {
        field,
        value: raw.to_string(),
    })
}

fn maybe<T: std::str::FromStr>(raw: &str, field: &'static str) -> ParseResult<Option<T>> {
    if raw.trim().is_empty() {
        Ok(None)
    } else {
        req(raw, field).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Location, StaticDevice};
    use time::macros::datetime;

    fn sample_summary() -> CountSummary {
        CountSummary {
            id: 42,
            timestamp: datetime!(2024-05-01 09:30:20 UTC),
            scans: 10,
            scan_time: 10.0123,
            rssi: vec![-60, -90, -60, -90],
            inst_all: vec![2, 2],
            inst_close: vec![1, 1],
            static_devices: vec![StaticDevice {
                address: "AA".into(),
                rssi: -60,
            }],
            close_threshold: -75,
            static_ratio: 0.7,
            location: Some(Location {
                latitude: 35.5,
                longitude: 139.25,
            }),
        }
    }

    #[test]
    fn test_from_summary_fields() {
        let record = SummaryRecord::from_summary(&sample_summary());
        assert_eq!(record.timestamp, "2024-05-01 09:30:20");
        assert_eq!(record.time, "093020");
        assert_eq!(record.scantime, 10.012);
        assert_eq!(record.tot_all, 4);
        assert_eq!(record.tot_close, 2);
        assert_eq!(record.rssi_avg, Some(-75.0));
        assert_eq!(record.rssi_std, Some(15.0));
        assert_eq!(record.rssi_min, Some(-90));
        assert_eq!(record.stat_close, 1);
        assert_eq!(record.latitude, Some(35.5));
    }

    #[test]
    fn test_mesh_line_is_positional() {
        let record = SummaryRecord::from_summary(&sample_summary());
        let line = record.to_mesh_line();
        let parts: Vec<&str> = line.split(',').collect();
        assert_eq!(parts.len(), MESH_FIELD_COUNT);
        assert_eq!(parts[0], "42");
        assert_eq!(parts[2], "093020");
        assert_eq!(SummaryRecord::from_mesh_line(&line).unwrap(), record);
    }

    #[test]
    fn test_empty_window_encodes_blank_fields() {
        let mut summary = sample_summary();
        summary.rssi.clear();
        summary.location = None;
        let record = SummaryRecord::from_summary(&summary);
        assert_eq!(record.rssi_avg, None);

        let decoded = SummaryRecord::from_mesh_line(&record.to_mesh_line()).unwrap();
        assert_eq!(decoded.rssi_min, None);
        assert_eq!(decoded.longitude, None);
    }

    #[test]
    fn test_short_line_rejected() {
        let err = SummaryRecord::from_mesh_line("1,2,3").unwrap_err();
        assert!(matches!(err, ParseError::FieldCount { actual: 3, .. }));
    }

    #[test]
    fn test_bad_number_rejected() {
        let mut line = SummaryRecord::from_summary(&sample_summary()).to_mesh_line();
        line = line.replacen("42", "x42", 1);
        let err = SummaryRecord::from_mesh_line(&line).unwrap_err();
        assert!(matches!(err, ParseError::InvalidField { field: "id", .. }));
    }

    #[test]
    fn test_json_shape() {
        let record = SummaryRecord::from_summary(&sample_summary());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["id"], 42);
        assert_eq!(json["time"], "093020");
        assert_eq!(json["rssi_threshold"], -75);
    }
}
