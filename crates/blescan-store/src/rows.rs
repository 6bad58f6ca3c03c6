//! CSV row rendering for each data kind.
//!
//! Column order follows [`DataKind::header`]. Missing values (statistics of
//! an empty window, unknown location) are written as empty fields. List
//! columns hold a comma-joined string, which the CSV writer quotes.

use time::OffsetDateTime;
use time::format_description::FormatItem;
use time::macros::format_description;

use blescan_types::{
    BeaconSnapshot, CountSummary, DataKind, Location, StayEvent, SummaryRecord, round3,
};

const TIME_FORMAT: &[FormatItem<'static>] = format_description!("[hour]:[minute]:[second]");

/// One record destined for the shard file of its kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub kind: DataKind,
    pub fields: Vec<String>,
}

impl Row {
    /// Summary statistics of a counting window.
    pub fn summary(summary: &CountSummary) -> Self {
        let record = SummaryRecord::from_summary(summary);
        let fields = vec![
            record.id.to_string(),
            time_column(summary.timestamp),
            record.scans.to_string(),
            record.scantime.to_string(),
            record.tot_all.to_string(),
            record.tot_close.to_string(),
            opt(record.inst_all),
            opt(record.inst_close),
            record.stat_all.to_string(),
            record.stat_close.to_string(),
            opt(record.rssi_avg),
            opt(record.rssi_std),
            opt(record.rssi_min),
            opt(record.rssi_max),
            record.rssi_threshold.to_string(),
            record.static_ratio.to_string(),
            opt(record.latitude),
            opt(record.longitude),
        ];
        Self {
            kind: DataKind::Summary,
            fields,
        }
    }

    /// Every RSSI value of a counting window.
    pub fn rssi(summary: &CountSummary) -> Self {
        Self {
            kind: DataKind::Rssi,
            fields: vec![
                summary.id.to_string(),
                time_column(summary.timestamp),
                join(summary.rssi.iter()),
            ],
        }
    }

    /// One finished beacon stay.
    pub fn stay(event: &StayEvent) -> Self {
        let (lat, lon) = location_columns(event.location);
        Self {
            kind: DataKind::StayTime,
            fields: vec![
                event.id.to_string(),
                time_column(event.timestamp),
                event.tag.clone(),
                event.staying_secs.to_string(),
                event
                    .mean_rssi()
                    .map(|mean| format!("{:.3}", round3(mean)))
                    .unwrap_or_default(),
                lat,
                lon,
            ],
        }
    }

    /// Beacons visible in one scan, tags and RSSI in matching order.
    pub fn beacon(snapshot: &BeaconSnapshot) -> Self {
        Self {
            kind: DataKind::Beacon,
            fields: vec![
                snapshot.id.to_string(),
                time_column(snapshot.timestamp),
                join(snapshot.beacons.iter().map(|(tag, _)| tag)),
                join(snapshot.beacons.iter().map(|(_, rssi)| rssi)),
            ],
        }
    }
}

fn time_column(t: OffsetDateTime) -> String {
    t.format(TIME_FORMAT).unwrap_or_default()
}

fn location_columns(location: Option<Location>) -> (String, String) {
    match location {
        Some(l) => (l.latitude.to_string(), l.longitude.to_string()),
        None => (String::new(), String::new()),
    }
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn join<T: ToString>(values: impl Iterator<Item = T>) -> String {
    values.map(|v| v.to_string()).collect::<Vec<_>>().join(",")
}
