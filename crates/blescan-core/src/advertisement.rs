//! iBeacon advertisement parsing.
//!
//! The beacon tags used with this daemon advertise with Apple's company
//! identifier and the standard iBeacon layout in the manufacturer data:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 2 | Type/length prefix (`02 15`) |
//! | 2 | 16 | Proximity UUID |
//! | 18 | 2 | Major |
//! | 20 | 2 | Minor |
//! | 22 | 1 | Measured TX power (signed) |
//!
//! The company identifier itself is not part of the slice handed to
//! [`parse_ibeacon`]; btleplug strips it into the map key.

use std::collections::HashMap;

use bytes::Buf;

use blescan_types::Observation;

use crate::error::{Error, Result};

/// Bluetooth SIG company identifier for Apple, used by iBeacon tags.
pub const APPLE_COMPANY_ID: u16 = 0x004C;

/// Length of an iBeacon manufacturer payload.
pub const IBEACON_LEN: usize = 23;

/// Beacon fields decoded from manufacturer data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconData {
    /// Proximity UUID as 32 lowercase hex digits.
    pub uuid: String,
    /// Major as 4 lowercase hex digits.
    pub major: String,
    /// Minor as 4 lowercase hex digits.
    pub minor: String,
    /// Calibrated TX power at 1 m in dBm.
    pub tx_power: i8,
}

/// Parse an iBeacon payload (manufacturer data without the company id).
pub fn parse_ibeacon(data: &[u8]) -> Result<BeaconData> {
    if data.len() < IBEACON_LEN {
        return Err(Error::InvalidData(format!(
            "iBeacon payload requires {} bytes, got {}",
            IBEACON_LEN,
            data.len()
        )));
    }

    let mut buf = data;
    let prefix = buf.get_u16();
    if prefix != 0x0215 {
        return Err(Error::InvalidData(format!(
            "unexpected iBeacon prefix {:#06x}",
            prefix
        )));
    }

    let mut uuid_bytes = [0u8; 16];
    buf.copy_to_slice(&mut uuid_bytes);
    let major = buf.get_u16();
    let minor = buf.get_u16();
    let tx_power = buf.get_i8();

    Ok(BeaconData {
        uuid: uuid::Uuid::from_bytes(uuid_bytes).simple().to_string(),
        major: format!("{:04x}", major),
        minor: format!("{:04x}", minor),
        tx_power,
    })
}

/// Build an [`Observation`] from scan properties.
///
/// Devices without a valid iBeacon payload become plain observations with
/// empty beacon fields.
pub fn observation_from_parts(
    address: &str,
    rssi: i16,
    manufacturer_data: &HashMap<u16, Vec<u8>>,
) -> Observation {
    match manufacturer_data
        .get(&APPLE_COMPANY_ID)
        .map(|data| parse_ibeacon(data))
    {
        Some(Ok(beacon)) => {
            Observation::beacon(address, rssi, beacon.uuid, beacon.major, beacon.minor)
        }
        _ => Observation::new(address, rssi),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ibeacon_payload() -> Vec<u8> {
        let mut data = vec![0x02, 0x15];
        data.extend_from_slice(&[
            0xf7, 0x82, 0x6d, 0xa6, 0x4f, 0xa2, 0x4e, 0x98, 0x80, 0x24, 0xbc, 0x5b, 0x71, 0xe0,
            0x89, 0x3e,
        ]);
        data.extend_from_slice(&[0x00, 0x2a]); // major 42
        data.extend_from_slice(&[0x01, 0x00]); // minor 256
        data.push(0xc5); // -59 dBm
        data
    }

    #[test]
    fn test_parse_ibeacon() {
        let beacon = parse_ibeacon(&ibeacon_payload()).unwrap();
        assert_eq!(beacon.uuid, "f7826da64fa24e988024bc5b71e0893e");
        assert_eq!(beacon.major, "002a");
        assert_eq!(beacon.minor, "0100");
        assert_eq!(beacon.tx_power, -59);
    }

    #[test]
    fn test_parse_ibeacon_too_short() {
        let err = parse_ibeacon(&[0x02, 0x15, 0x00]).unwrap_err();
        assert!(err.to_string().contains("requires 23 bytes"));
    }

    #[test]
    fn test_parse_ibeacon_wrong_prefix() {
        let mut data = ibeacon_payload();
        data[1] = 0x16;
        assert!(parse_ibeacon(&data).is_err());
    }

    #[test]
    fn test_observation_from_parts() {
        let mut md = HashMap::new();
        md.insert(APPLE_COMPANY_ID, ibeacon_payload());
        let obs = observation_from_parts("AA:BB:CC:DD:EE:FF", -70, &md);
        assert_eq!(obs.tag(), "002a0100");
        assert_eq!(obs.service_uuid, "f7826da64fa24e988024bc5b71e0893e");

        let plain = observation_from_parts("11:22", -80, &HashMap::new());
        assert!(!plain.is_beacon());
        assert_eq!(plain.rssi, -80);
    }
}
