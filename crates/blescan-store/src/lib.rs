//! Local file storage for blescan telemetry.
//!
//! Rows are appended to short-lived shard files, one per data kind and
//! ten-minute slot, inside a per-day directory. On the next start the shards
//! of every past day are merged into one CSV file per kind.
//!
//! # Features
//!
//! - Bounded write latency: no shard holds more than ten minutes of rows
//! - Transparent day rollover
//! - Idempotent reconstruction of daily files after a restart or crash
//!
//! # Example
//!
//! ```no_run
//! use blescan_store::{Row, ShardStore, reconstruct_files};
//! use blescan_types::BeaconSnapshot;
//!
//! reconstruct_files("/media/usb")?;
//! let mut store = ShardStore::open("/media/usb", 7)?;
//!
//! let snapshot = BeaconSnapshot {
//!     id: 7,
//!     timestamp: time::OffsetDateTime::now_utc(),
//!     beacons: vec![],
//! };
//! store.save_row(&Row::beacon(&snapshot))?;
//! # Ok::<(), blescan_store::Error>(())
//! ```

mod error;
mod rows;
pub mod schema;
mod store;

pub use error::{Error, Result};
pub use rows::Row;
pub use store::{ReconstructReport, ShardStore, reconstruct_files, reconstruct_files_on};

/// Default storage location following platform conventions.
///
/// - Linux: `~/.local/share/blescan`
/// - macOS: `~/Library/Application Support/blescan`
/// - Windows: `C:\Users\<user>\AppData\Local\blescan`
pub fn default_data_dir() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("blescan")
}
