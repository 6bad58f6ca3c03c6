//! Platform-agnostic types for the blescan telemetry daemon.
//!
//! This crate provides the data model shared by the scan engines
//! (blescan-core), the file storage (blescan-store) and the delivery
//! sinks (blescan-service).
//!
//! # Features
//!
//! - Scan observations with parsed beacon fields
//! - Count summaries, stay events and beacon snapshots
//! - The flat summary record sent to the HTTP backend and over the mesh link
//! - Output data kinds with their CSV headers
//!
//! # Example
//!
//! ```
//! use blescan_types::{Observation, SummaryRecord};
//!
//! let obs = Observation::beacon("AA:BB", -61, "f7826da6", "0001", "0002");
//! assert_eq!(obs.tag(), "00010002");
//! assert!(SummaryRecord::from_mesh_line("garbage").is_err());
//! ```

pub mod error;
pub mod record;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use record::{MESH_FIELD_COUNT, MESH_FIELDS, SummaryRecord, round3};
pub use types::{
    BeaconSnapshot, CountSummary, DataKind, Location, Observation, RssiStats, StaticDevice,
    StayEvent,
};
