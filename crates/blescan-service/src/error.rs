//! Error types for the daemon's delivery paths.

use std::time::Duration;

/// Errors raised by the mesh radio and relay.
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    /// The serial link to the radio failed.
    #[error("Serial I/O error: {0}")]
    Serial(#[from] std::io::Error),

    /// The serial port could not be opened.
    #[cfg(feature = "xbee")]
    #[error("Failed to open serial port: {0}")]
    Port(#[from] tokio_serial::Error),

    /// The radio's reader task is gone; no response can arrive anymore.
    #[error("Radio connection closed")]
    Closed,

    /// No radio is open right now (starting up or restarting after a crash).
    #[error("Radio not ready")]
    NotReady,

    /// The radio did not answer in time.
    #[error("Radio {operation} timed out after {duration:?}")]
    Timeout {
        operation: &'static str,
        duration: Duration,
    },

    /// The radio reported a failed transmission.
    #[error("Transmit to {node} failed with status {status:#04x}")]
    TransmitFailed { node: String, status: u8 },

    /// The target node has not been discovered.
    #[error("Unknown node '{0}'")]
    UnknownNode(String),

    /// Discovery found none of the configured targets.
    #[error("No reachable target node")]
    NoReachableTarget,

    /// An AT command was rejected by the radio.
    #[error("AT command {command} failed with status {status}")]
    AtCommand { command: String, status: u8 },

    /// A frame from the radio could not be decoded.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
}

impl MeshError {
    /// Whether the radio stack itself is broken and must be re-initialized.
    ///
    /// Everything else is a failure of one candidate or one attempt.
    pub fn is_fatal(&self) -> bool {
        match self {
            MeshError::Serial(_) | MeshError::Closed => true,
            #[cfg(feature = "xbee")]
            MeshError::Port(_) => true,
            MeshError::NotReady
            | MeshError::Timeout { .. }
            | MeshError::TransmitFailed { .. }
            | MeshError::UnknownNode(_)
            | MeshError::NoReachableTarget
            | MeshError::AtCommand { .. }
            | MeshError::InvalidFrame(_) => false,
        }
    }

    pub fn timeout(operation: &'static str, duration: Duration) -> Self {
        MeshError::Timeout {
            operation,
            duration,
        }
    }
}

/// Errors raised while delivering one queued message.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The HTTP request could not be sent.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with something other than 200.
    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    /// The mesh relay could not deliver the message.
    #[error("Mesh delivery failed: {0}")]
    Mesh(#[from] MeshError),
}

/// Errors raised by a sink while saving one output.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Storage error: {0}")]
    Store(#[from] blescan_store::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(MeshError::Closed.is_fatal());
        assert!(MeshError::Serial(std::io::Error::other("unplugged")).is_fatal());

        assert!(!MeshError::timeout("send", Duration::from_secs(1)).is_fatal());
        assert!(
            !MeshError::TransmitFailed {
                node: "GW".into(),
                status: 0x21
            }
            .is_fatal()
        );
        assert!(!MeshError::UnknownNode("GW".into()).is_fatal());
        assert!(!MeshError::NotReady.is_fatal());
    }

    #[test]
    fn test_display() {
        let err = MeshError::TransmitFailed {
            node: "GW1".into(),
            status: 0x24,
        };
        assert_eq!(err.to_string(), "Transmit to GW1 failed with status 0x24");
        assert_eq!(
            DeliveryError::Status(503).to_string(),
            "Unexpected HTTP status 503"
        );
    }
}
