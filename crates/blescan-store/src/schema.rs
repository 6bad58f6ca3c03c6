//! On-disk layout of a storage location.
//!
//! ```text
//! {base}/ACC{id:02}_{YYYYMMDD}/{HHMM}_{kind}.csv   ten-minute shards of one day
//! {base}/ACC{id:02}_{YYYYMMDD}_{kind}.csv          reconstructed daily file
//! ```

use time::Date;
use time::format_description::FormatItem;
use time::macros::format_description;

use blescan_types::DataKind;

const DAY_FORMAT: &[FormatItem<'static>] = format_description!("[year][month][day]");

/// Prefix of every per-day shard directory.
pub const DAY_DIR_PREFIX: &str = "ACC";

/// Shard length in minutes.
pub const SHARD_MINUTES: u8 = 10;

/// Name of the shard directory of one device and day.
pub fn day_dir_name(device_id: u32, date: Date) -> String {
    format!(
        "{}{:02}_{}",
        DAY_DIR_PREFIX,
        device_id,
        date.format(DAY_FORMAT).unwrap_or_default()
    )
}

/// Parse the date out of a shard directory name.
///
/// Returns `None` for anything that is not `ACC{digits}_{YYYYMMDD}`.
pub fn parse_day_dir(name: &str) -> Option<Date> {
    let rest = name.strip_prefix(DAY_DIR_PREFIX)?;
    let (id, day) = rest.split_once('_')?;
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if day.len() != 8 {
        return None;
    }
    Date::parse(day, DAY_FORMAT).ok()
}

/// Start minute of the shard containing `minute`.
pub fn shard_minute(minute: u8) -> u8 {
    (minute / SHARD_MINUTES) * SHARD_MINUTES
}

/// Shard file name for an hour, shard start minute and kind.
pub fn shard_file_name(hour: u8, minute: u8, kind: DataKind) -> String {
    format!("{:02}{:02}_{}.csv", hour, minute, kind.suffix())
}

/// All shard file names of one kind in chronological order.
pub fn shard_file_names(kind: DataKind) -> impl Iterator<Item = String> {
    (0..24u8).flat_map(move |hour| {
        (0..60u8)
            .step_by(usize::from(SHARD_MINUTES))
            .map(move |minute| shard_file_name(hour, minute, kind))
    })
}

/// Name of the daily file reconstructed from a shard directory.
pub fn daily_file_name(day_dir: &str, kind: DataKind) -> String {
    format!("{}_{}.csv", day_dir, kind.suffix())
}
