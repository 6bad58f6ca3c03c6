//! BLE scanning via btleplug.
//!
//! [`BleScanner`] turns one bounded scan window into a list of
//! [`Observation`]s. Only peripherals that advertised during the window are
//! reported; btleplug's peripheral cache also holds devices seen in earlier
//! scans, which must not be counted again.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures::StreamExt;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, info};

use blescan_types::Observation;

use crate::advertisement::observation_from_parts;
use crate::error::{Error, Result};
use crate::retry::{RetryConfig, with_retry};
use crate::traits::ScanSource;
use crate::util::create_identifier;

/// Budget for the adapter to acknowledge the end of a scan.
const STOP_SCAN_TIMEOUT: Duration = Duration::from_secs(2);

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters.into_iter().next().ok_or(Error::NoAdapter)
}

/// Scan source backed by the first local Bluetooth adapter.
pub struct BleScanner {
    adapter: Adapter,
}

impl BleScanner {
    /// Open the first adapter, retrying while the Bluetooth stack comes up.
    pub async fn open() -> Result<Self> {
        let adapter = with_retry(&RetryConfig::for_adapter(), "get_adapter", get_adapter).await?;
        info!("Bluetooth adapter ready");
        Ok(Self { adapter })
    }

    /// Wrap an adapter that was already acquired.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self { adapter }
    }

    async fn observe(&self, id: &PeripheralId) -> Result<Option<Observation>> {
        let peripheral = self.adapter.peripheral(id).await?;
        let Some(properties) = peripheral.properties().await? else {
            return Ok(None);
        };
        let Some(rssi) = properties.rssi else {
            return Ok(None);
        };

        let address = create_identifier(&properties.address.to_string(), id);
        Ok(Some(observation_from_parts(
            &address,
            rssi,
            &properties.manufacturer_data,
        )))
    }
}

#[async_trait]
impl ScanSource for BleScanner {
    async fn scan(&self, duration: Duration) -> Result<Vec<Observation>> {
        let mut events = self.adapter.events().await?;
        let deadline = Instant::now() + duration;

        self.adapter.start_scan(ScanFilter::default()).await?;

        let mut seen: HashSet<PeripheralId> = HashSet::new();
        while let Ok(Some(event)) = timeout_at(deadline, events.next()).await {
            match event {
                CentralEvent::DeviceDiscovered(id)
                | CentralEvent::DeviceUpdated(id)
                | CentralEvent::ManufacturerDataAdvertisement { id, .. }
                | CentralEvent::ServicesAdvertisement { id, .. }
                | CentralEvent::ServiceDataAdvertisement { id, .. } => {
                    seen.insert(id);
                }
                _ => {}
            }
        }

        timeout(STOP_SCAN_TIMEOUT, self.adapter.stop_scan())
            .await
            .map_err(|_| Error::timeout("stop_scan", STOP_SCAN_TIMEOUT))??;

        let mut observations = Vec::with_capacity(seen.len());
        for id in &seen {
            match self.observe(id).await {
                Ok(Some(observation)) => observations.push(observation),
                Ok(None) => {}
                Err(e) => debug!("Error reading peripheral properties: {}", e),
            }
        }

        debug!("Scan complete. Observed {} device(s)", observations.len());
        Ok(observations)
    }
}
