//! Beacon stay detection.
//!
//! Target beacons are tracked across a ring of the last `scans` scan
//! results. An address is present while it appears in at least `threshold`
//! slots of the ring. While present it collects one RSSI sample per cycle;
//! the cycle it drops out of the present set a [`StayEvent`] is emitted
//! with everything collected for that episode.
//!
//! Independently of presence, a [`BeaconSnapshot`] of the target beacons
//! seen in the current scan is emitted at most once per second.

use std::collections::{BTreeSet, HashMap, HashSet};

use time::{Duration, OffsetDateTime};
use tracing::{debug, info};

use blescan_types::{BeaconSnapshot, Location, Observation, StayEvent};

use crate::error::{Error, Result};
use crate::util::now_local;

/// Settings of the beacon engine.
#[derive(Debug, Clone, PartialEq)]
pub struct BeaconConfig {
    pub device_id: u32,
    /// Proximity UUID of the beacon family to track, lowercase hex.
    pub target_id: String,
    /// Ring size in scans.
    pub scans: usize,
    /// Minimum number of ring slots an address must appear in.
    pub threshold: usize,
    /// Major+minor tag that requests a shutdown when seen.
    pub shutdown_id: Option<String>,
    pub location: Option<Location>,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            device_id: 0,
            target_id: String::new(),
            scans: 8,
            threshold: 5,
            shutdown_id: None,
            location: None,
        }
    }
}

impl BeaconConfig {
    pub fn validate(&self) -> Result<()> {
        if self.scans == 0 {
            return Err(Error::invalid_config("beacon window must hold at least one scan"));
        }
        if self.threshold == 0 || self.threshold > self.scans {
            return Err(Error::invalid_config(format!(
                "beacon threshold {} must be in 1..={}",
                self.threshold, self.scans
            )));
        }
        Ok(())
    }
}

/// Everything one beacon cycle produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BeaconOutput {
    /// Episodes that ended this cycle, ordered by address.
    pub stays: Vec<StayEvent>,
    pub snapshot: Option<BeaconSnapshot>,
}

impl BeaconOutput {
    pub fn is_empty(&self) -> bool {
        self.stays.is_empty() && self.snapshot.is_none()
    }
}

/// An address currently in the present set.
#[derive(Debug)]
struct Tracked {
    first_seen: OffsetDateTime,
    samples: Vec<i16>,
}

/// Sliding-window presence tracker for target beacons.
#[derive(Debug)]
pub struct BeaconEngine {
    config: BeaconConfig,
    /// Deduplicated addresses of the last `scans` scans.
    ring: Vec<HashSet<String>>,
    cursor: usize,
    /// Latest observation of every address still in the ring.
    latest: HashMap<String, Observation>,
    tracked: HashMap<String, Tracked>,
    last_snapshot: Option<OffsetDateTime>,
    shutdown: bool,
}

impl BeaconEngine {
    pub fn new(config: BeaconConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            ring: vec![HashSet::new(); config.scans],
            config,
            cursor: 0,
            latest: HashMap::new(),
            tracked: HashMap::new(),
            last_snapshot: None,
            shutdown: false,
        })
    }

    pub fn config(&self) -> &BeaconConfig {
        &self.config
    }

    /// Whether the shutdown tag has been seen. Stays raised once set.
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown
    }

    /// Addresses currently in the present set, sorted.
    pub fn present(&self) -> Vec<String> {
        let mut present: Vec<String> = self.tracked.keys().cloned().collect();
        present.sort();
        present
    }

    pub fn process_scan(&mut self, observations: &[Observation]) -> BeaconOutput {
        self.process_scan_at(observations, now_local())
    }

    /// Process one raw scan that completed at `now`.
    pub fn process_scan_at(
        &mut self,
        observations: &[Observation],
        now: OffsetDateTime,
    ) -> BeaconOutput {
        if let Some(shutdown_id) = &self.config.shutdown_id
            && !self.shutdown
            && observations.iter().any(|o| &o.tag() == shutdown_id)
        {
            info!("Shutdown beacon {} detected", shutdown_id);
            self.shutdown = true;
        }

        let targets: Vec<&Observation> = observations
            .iter()
            .filter(|o| o.service_uuid == self.config.target_id)
            .collect();

        self.record(&targets);
        let present = self.present_set();

        for address in &present {
            let Some(obs) = self.latest.get(address) else {
                continue;
            };
            self.tracked
                .entry(address.clone())
                .or_insert_with(|| Tracked {
                    first_seen: now,
                    samples: Vec::new(),
                })
                .samples
                .push(obs.rssi);
        }

        let mut exited: Vec<String> = self
            .tracked
            .keys()
            .filter(|address| !present.contains(*address))
            .cloned()
            .collect();
        exited.sort();

        let mut stays = Vec::with_capacity(exited.len());
        for address in exited {
            if let Some(tracked) = self.tracked.remove(&address) {
                let tag = self
                    .latest
                    .get(&address)
                    .map(Observation::tag)
                    .unwrap_or_default();
                stays.push(StayEvent {
                    id: self.config.device_id,
                    timestamp: now,
                    address,
                    tag,
                    staying_secs: (now - tracked.first_seen).as_seconds_f64().round() as i64,
                    rssi_samples: tracked.samples,
                    location: self.config.location,
                });
            }
        }
        if !stays.is_empty() {
            debug!("{} beacon stay(s) ended", stays.len());
        }

        self.prune_latest();

        let snapshot = self.snapshot_due(now).then(|| {
            self.last_snapshot = Some(now.replace_nanosecond(0).unwrap_or(now));
            let mut beacons: Vec<(String, i16)> =
                targets.iter().map(|o| (o.tag(), o.rssi)).collect();
            beacons.sort();
            BeaconSnapshot {
                id: self.config.device_id,
                timestamp: now,
                beacons,
            }
        });

        BeaconOutput { stays, snapshot }
    }

    fn record(&mut self, targets: &[&Observation]) {
        let slot: HashSet<String> = targets.iter().map(|o| o.address.clone()).collect();
        for obs in targets {
            self.latest.insert(obs.address.clone(), (*obs).clone());
        }
        self.ring[self.cursor] = slot;
        self.cursor = (self.cursor + 1) % self.config.scans;
    }

    fn present_set(&self) -> BTreeSet<String> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for slot in &self.ring {
            for address in slot {
                *counts.entry(address.as_str()).or_insert(0) += 1;
            }
        }
        counts
            .into_iter()
            .filter(|&(_, count)| count >= self.config.threshold)
            .map(|(address, _)| address.to_string())
            .collect()
    }

    /// Forget observations of addresses that left the ring and are not tracked.
    fn prune_latest(&mut self) {
        let ring = &self.ring;
        let tracked = &self.tracked;
        self.latest.retain(|address, _| {
            tracked.contains_key(address) || ring.iter().any(|slot| slot.contains(address))
        });
    }

    fn snapshot_due(&self, now: OffsetDateTime) -> bool {
        match self.last_snapshot {
            None => true,
            Some(last) => now - last >= Duration::SECOND,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const UUID: &str = "f7826da64fa24e988024bc5b71e0893e";

    fn engine(scans: usize, threshold: usize) -> BeaconEngine {
        BeaconEngine::new(BeaconConfig {
            device_id: 7,
            target_id: UUID.to_string(),
            scans,
            threshold,
            shutdown_id: Some("ffff0001".to_string()),
            location: None,
        })
        .unwrap()
    }

    fn tag(address: &str, rssi: i16) -> Observation {
        Observation::beacon(address, rssi, UUID, "0001", "0002")
    }

    fn at(secs: i64) -> OffsetDateTime {
        datetime!(2024-06-01 08:00:00 UTC) + Duration::seconds(secs)
    }

    #[test]
    fn test_window_eight_threshold_three_scenario() {
        let mut engine = engine(8, 3);
        let mut stays = Vec::new();

        for scan in 1..=12i64 {
            let observations = if scan <= 3 { vec![tag("AA", -70)] } else { vec![] };
            let output = engine.process_scan_at(&observations, at(scan));
            if scan == 3 {
                assert_eq!(engine.present(), vec!["AA".to_string()]);
            }
            if scan < 3 {
                assert!(engine.present().is_empty());
            }
            stays.extend(output.stays.into_iter().map(|s| (scan, s)));
        }

        assert_eq!(stays.len(), 1);
        let (exit_scan, stay) = &stays[0];
        assert_eq!(*exit_scan, 9);
        assert_eq!(stay.rssi_samples.len(), 6);
        assert_eq!(stay.staying_secs, 6);
        assert_eq!(stay.tag, "00010002");
        assert_eq!(stay.mean_rssi(), Some(-70.0));
    }

    #[test]
    fn test_stay_duration_is_rounded() {
        let mut engine = engine(2, 1);
        engine.process_scan_at(&[tag("AA", -70)], at(0));
        engine.process_scan_at(&[], at(1));
        let output = engine.process_scan_at(&[], at(1) + Duration::milliseconds(600));

        assert_eq!(output.stays.len(), 1);
        assert_eq!(output.stays[0].staying_secs, 2);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let mut engine = engine(4, 2);
        engine.process_scan_at(&[tag("AA", -60)], at(0));
        assert!(engine.present().is_empty());
        engine.process_scan_at(&[tag("AA", -60)], at(1));
        assert_eq!(engine.present(), vec!["AA".to_string()]);
    }

    #[test]
    fn test_duplicate_reports_count_once_per_slot() {
        let mut engine = engine(4, 2);
        engine.process_scan_at(&[tag("AA", -60), tag("AA", -61)], at(0));
        assert!(engine.present().is_empty());
    }

    #[test]
    fn test_samples_use_latest_rssi() {
        let mut engine = engine(3, 1);
        engine.process_scan_at(&[tag("AA", -60)], at(0));
        engine.process_scan_at(&[tag("AA", -65)], at(1));
        engine.process_scan_at(&[], at(2));
        engine.process_scan_at(&[], at(3));
        let out = engine.process_scan_at(&[], at(4));
        assert_eq!(out.stays.len(), 1);
        assert_eq!(out.stays[0].rssi_samples, vec![-60, -65, -65, -65]);
    }

    #[test]
    fn test_non_target_devices_ignored() {
        let mut engine = engine(2, 1);
        let other = Observation::beacon("BB", -50, "0000", "0001", "0002");
        let out = engine.process_scan_at(&[other, Observation::new("CC", -40)], at(0));
        assert!(engine.present().is_empty());
        assert_eq!(out.snapshot.unwrap().beacons, vec![]);
    }

    #[test]
    fn test_snapshot_cadence() {
        let mut engine = engine(2, 1);
        let t0 = datetime!(2024-06-01 08:00:00.400 UTC);
        assert!(engine.process_scan_at(&[], t0).snapshot.is_some());
        // last snapshot time is truncated to 08:00:00
        let t1 = datetime!(2024-06-01 08:00:00.900 UTC);
        assert!(engine.process_scan_at(&[], t1).snapshot.is_none());
        let t2 = datetime!(2024-06-01 08:00:01.000 UTC);
        assert!(engine.process_scan_at(&[], t2).snapshot.is_some());
    }

    #[test]
    fn test_snapshot_sorted_by_tag() {
        let mut engine = engine(2, 1);
        let a = Observation::beacon("AA", -70, UUID, "0002", "0001");
        let b = Observation::beacon("BB", -60, UUID, "0001", "0009");
        let snapshot = engine.process_scan_at(&[a, b], at(0)).snapshot.unwrap();
        assert_eq!(
            snapshot.beacons,
            vec![("00010009".to_string(), -60), ("00020001".to_string(), -70)]
        );
    }

    #[test]
    fn test_shutdown_tag_in_raw_scan() {
        let mut engine = engine(2, 1);
        engine.process_scan_at(&[tag("AA", -60)], at(0));
        assert!(!engine.shutdown_requested());

        let stop = Observation::beacon("FF", -80, "other", "ffff", "0001");
        engine.process_scan_at(&[stop], at(1));
        assert!(engine.shutdown_requested());
        engine.process_scan_at(&[], at(2));
        assert!(engine.shutdown_requested());
    }

    #[test]
    fn test_invalid_threshold() {
        let config = BeaconConfig {
            scans: 4,
            threshold: 5,
            ..Default::default()
        };
        assert!(BeaconEngine::new(config).is_err());
    }
}
