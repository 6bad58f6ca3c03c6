//! Destinations for engine output.
//!
//! Sinks are called synchronously from the scan loop, so every
//! implementation must return quickly: files are appended in place and
//! network sinks only enqueue.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::debug;

use blescan_store::{Row, ShardStore};
use blescan_types::{BeaconSnapshot, CountSummary, StayEvent, SummaryRecord};

use crate::delivery::{DeliveryController, Transport};
use crate::error::SinkError;
use crate::http::HttpTransport;
use crate::mesh::MeshTransport;

/// A destination for counting summaries and beacon events.
///
/// Every method defaults to ignoring its input, so a sink only implements
/// the kinds it accepts.
pub trait Sink: Send {
    fn name(&self) -> &str;

    fn save_summary(
        &mut self,
        _summary: &CountSummary,
        _now: OffsetDateTime,
    ) -> Result<(), SinkError> {
        Ok(())
    }

    fn save_stay(&mut self, _event: &StayEvent, _now: OffsetDateTime) -> Result<(), SinkError> {
        Ok(())
    }

    fn save_snapshot(
        &mut self,
        _snapshot: &BeaconSnapshot,
        _now: OffsetDateTime,
    ) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Writes rows into shard files of one storage location.
#[derive(Debug)]
pub struct StorageSink {
    name: String,
    store: ShardStore,
}

impl StorageSink {
    pub fn new(name: impl Into<String>, store: ShardStore) -> Self {
        Self {
            name: name.into(),
            store,
        }
    }
}

impl Sink for StorageSink {
    fn name(&self) -> &str {
        &self.name
    }

    /// One `summary` row and one `rssi` row per window. Both are attempted;
    /// the first failure is returned.
    fn save_summary(&mut self, summary: &CountSummary, now: OffsetDateTime) -> Result<(), SinkError> {
        let summary_row = self.store.save_row_at(&Row::summary(summary), now);
        let rssi_row = self.store.save_row_at(&Row::rssi(summary), now);
        summary_row.and(rssi_row)?;
        Ok(())
    }

    fn save_stay(&mut self, event: &StayEvent, now: OffsetDateTime) -> Result<(), SinkError> {
        self.store.save_row_at(&Row::stay(event), now)?;
        Ok(())
    }

    fn save_snapshot(
        &mut self,
        snapshot: &BeaconSnapshot,
        now: OffsetDateTime,
    ) -> Result<(), SinkError> {
        self.store.save_row_at(&Row::beacon(snapshot), now)?;
        Ok(())
    }
}

/// Hands summaries to a delivery controller.
pub struct QueueSink<T: Transport> {
    controller: Arc<DeliveryController<T>>,
    encode: fn(&CountSummary) -> T::Message,
}

impl<T: Transport> QueueSink<T> {
    pub fn new(controller: Arc<DeliveryController<T>>, encode: fn(&CountSummary) -> T::Message) -> Self {
        Self { controller, encode }
    }
}

impl QueueSink<HttpTransport> {
    /// Summaries as JSON records.
    pub fn http(controller: Arc<DeliveryController<HttpTransport>>) -> Self {
        Self::new(controller, SummaryRecord::from_summary)
    }
}

impl QueueSink<MeshTransport> {
    /// Summaries as positional mesh lines.
    pub fn mesh(controller: Arc<DeliveryController<MeshTransport>>) -> Self {
        Self::new(controller, |summary| {
            SummaryRecord::from_summary(summary).to_mesh_line()
        })
    }
}

impl<T: Transport> Sink for QueueSink<T> {
    fn name(&self) -> &str {
        self.controller.transport().name()
    }

    fn save_summary(&mut self, summary: &CountSummary, _now: OffsetDateTime) -> Result<(), SinkError> {
        self.controller.enqueue((self.encode)(summary));
        debug!(
            "Queued summary for {} ({} waiting)",
            self.name(),
            self.controller.queue_len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::delivery::DeliveryOptions;
    use crate::delivery::testing::ScriptedTransport;
    use crate::state::HealthFlags;
    use crate::test_support::sample_summary;
    use blescan_types::DataKind;

    #[test]
    fn test_storage_sink_writes_summary_and_rssi() {
        let dir = tempfile::tempdir().unwrap();
        let now = datetime!(2026-03-01 12:04:10 UTC);
        let store = ShardStore::open_at(dir.path(), 7, now).unwrap();
        let mut sink = StorageSink::new("sd", store);

        sink.save_summary(&sample_summary(), now).unwrap();

        let store = &sink.store;
        let summary = std::fs::read_to_string(store.shard_path(DataKind::Summary, now)).unwrap();
        let rssi = std::fs::read_to_string(store.shard_path(DataKind::Rssi, now)).unwrap();
        assert_eq!(summary.lines().count(), 1);
        assert!(summary.starts_with("7,12:00:10,"));
        assert_eq!(rssi.trim_end(), "7,12:00:10,\"-60,-90\"");
        assert_eq!(sink.name(), "sd");
    }

    #[test]
    fn test_rssi_row_written_when_summary_shard_fails() {
        let dir = tempfile::tempdir().unwrap();
        let now = datetime!(2026-03-01 12:04:10 UTC);
        let store = ShardStore::open_at(dir.path(), 7, now).unwrap();
        let summary_path = store.shard_path(DataKind::Summary, now);
        // a directory where the summary shard should be makes that write fail
        std::fs::create_dir(&summary_path).unwrap();
        let mut sink = StorageSink::new("sd", store);

        let result = sink.save_summary(&sample_summary(), now);

        assert!(result.is_err());
        let rssi = std::fs::read_to_string(sink.store.shard_path(DataKind::Rssi, now)).unwrap();
        assert_eq!(rssi.trim_end(), "7,12:00:10,\"-60,-90\"");
    }

    #[test]
    fn test_storage_sink_beacon_rows() {
        let dir = tempfile::tempdir().unwrap();
        let now = datetime!(2026-03-01 08:31:00 UTC);
        let store = ShardStore::open_at(dir.path(), 7, now).unwrap();
        let mut sink = StorageSink::new("sd", store);

        let snapshot = BeaconSnapshot {
            id: 7,
            timestamp: now,
            beacons: vec![("00010002".to_string(), -70)],
        };
        sink.save_snapshot(&snapshot, now).unwrap();
        let stay = StayEvent {
            id: 7,
            timestamp: now,
            address: "AA".to_string(),
            tag: "00010002".to_string(),
            staying_secs: 12,
            rssi_samples: vec![-70, -72],
            location: None,
        };
        sink.save_stay(&stay, now).unwrap();

        let beacon = std::fs::read_to_string(sink.store.shard_path(DataKind::Beacon, now)).unwrap();
        let stays = std::fs::read_to_string(sink.store.shard_path(DataKind::StayTime, now)).unwrap();
        assert_eq!(beacon.trim_end(), "7,08:31:00,00010002,-70");
        assert!(stays.starts_with("7,08:31:00,00010002,12,-71.000"));
    }

    #[tokio::test]
    async fn test_queue_sink_only_takes_summaries() {
        let controller = Arc::new(DeliveryController::new(
            ScriptedTransport::default(),
            DeliveryOptions::default(),
            HealthFlags::shared(),
        ));
        let mut sink = QueueSink::new(Arc::clone(&controller), |summary| summary.id);
        let now = datetime!(2026-03-01 12:00:10 UTC);

        sink.save_summary(&sample_summary(), now).unwrap();
        let snapshot = BeaconSnapshot {
            id: 7,
            timestamp: now,
            beacons: Vec::new(),
        };
        sink.save_snapshot(&snapshot, now).unwrap();

        assert_eq!(controller.queue_len(), 1);
        assert_eq!(sink.name(), "scripted");
    }
}
