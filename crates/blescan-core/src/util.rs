//! Utility functions for blescan-core.
//!
//! Wall-clock helpers shared by the engines, and identifier formatting for
//! btleplug peripherals.

use btleplug::platform::PeripheralId;
use time::{OffsetDateTime, Time};

/// Current local time, falling back to UTC when the offset is unknown.
///
/// `time` refuses to read the local offset from a multi-threaded process on
/// some platforms; UTC keeps the daemon running in that case.
pub fn now_local() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// Seconds elapsed since local midnight.
pub fn second_of_day(t: OffsetDateTime) -> u32 {
    let (h, m, s) = t.to_hms();
    u32::from(h) * 3600 + u32::from(m) * 60 + u32::from(s)
}

/// Midnight of the day containing `t`, in the same offset.
pub fn start_of_day(t: OffsetDateTime) -> OffsetDateTime {
    t.replace_time(Time::MIDNIGHT)
}

/// Format a peripheral ID as a string.
///
/// On macOS, peripheral IDs are UUIDs. On other platforms, they may be
/// MAC addresses or other formats.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Create an identifier string from an address and peripheral ID.
///
/// On macOS where addresses are 00:00:00:00:00:00, uses the peripheral ID.
/// On other platforms, uses the Bluetooth address.
pub fn create_identifier(address: &str, peripheral_id: &PeripheralId) -> String {
    if address == "00:00:00:00:00:00" {
        format_peripheral_id(peripheral_id)
    } else {
        address.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_second_of_day() {
        assert_eq!(second_of_day(datetime!(2024-01-01 00:00:00 UTC)), 0);
        assert_eq!(second_of_day(datetime!(2024-01-01 01:02:03 UTC)), 3723);
        assert_eq!(second_of_day(datetime!(2024-01-01 23:59:59 UTC)), 86_399);
    }

    #[test]
    fn test_start_of_day_keeps_offset() {
        let t = datetime!(2024-03-05 17:45:12 +09:00);
        assert_eq!(start_of_day(t), datetime!(2024-03-05 00:00:00 +09:00));
    }
}
