//! Edge telemetry daemon for BLE presence counting.
//!
//! This crate wires the scan-analysis engines of `blescan-core` to their
//! destinations:
//! - Shard files on one or more storage media (`blescan-store`)
//! - An HTTP endpoint, through a bounded retry-until-success queue
//! - A mesh radio network, for boards without their own uplink
//! - Two status LEDs summarizing the health of every delivery path
//!
//! # Configuration
//!
//! The daemon reads `~/.config/blescan/config.toml`:
//!
//! ```toml
//! [device]
//! id = 12
//! led = true
//!
//! [counting]
//! delta = 10
//! storage = ["sd"]
//! http = true
//!
//! [beacon]
//! target_id = "e2c56db5dffb48d2b060d0f5a71096e0"
//! storage = ["sd"]
//!
//! [storage_paths]
//! sd = "/media/sd/blescan"
//!
//! [http]
//! url = "https://collector.example.org/api/summary"
//!
//! [mesh]
//! enabled = false
//! ```
//!
//! # Delivery
//!
//! Every network destination is a [`DeliveryController`] around a
//! [`Transport`]. Enqueueing never blocks the scan loop; when a queue is
//! full the oldest message is dropped. The worker retries the head message
//! until the destination accepts it and raises health flags while it waits.

pub mod config;
pub mod delivery;
pub mod error;
pub mod http;
pub mod mesh;
pub mod pipeline;
pub mod scantime;
pub mod sinks;
pub mod state;
pub mod status;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{Config, ConfigError, ValidationError, default_config_path};
pub use delivery::{BoundedQueue, DeliveryController, DeliveryOptions, RunState, Transport};
pub use error::{DeliveryError, MeshError, SinkError};
pub use http::HttpTransport;
pub use mesh::{MeshRelay, MeshTransport, RelayOptions, Role};
pub use pipeline::{Exit, Pipeline};
pub use scantime::ScanTimeCalibrator;
pub use sinks::{QueueSink, Sink, StorageSink};
pub use state::{HealthFlag, HealthFlags, SharedHealth};
pub use status::{StatusLeds, SysfsLed};
