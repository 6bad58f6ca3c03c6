//! Mesh radio relay.
//!
//! Boards without internet access forward their summaries over a low-power
//! mesh network to one of a configured set of internet-capable target nodes.
//! A board whose own node id is in the target list acts as a receiver: it
//! accepts inbound lines and hands them to its HTTP controller.
//!
//! - [`MeshRadio`] / [`RadioFactory`]: the radio seam (XBee API mode over a
//!   serial port in production, a scripted network in tests)
//! - [`MeshRouter`]: discovery and ordered candidate failover
//! - [`MeshRelay`]: supervisor that (re)opens the radio, tears it down after
//!   a fatal error and restarts it after a cooldown
//! - [`MeshTransport`]: the [`Transport`](crate::delivery::Transport) used by
//!   the mesh delivery controller

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::MeshError;

pub mod frame;
mod relay;
mod router;
mod xbee;

#[cfg(test)]
pub(crate) mod mock;

pub use relay::{InboundHandler, MeshRelay, MeshTransport, RelayOptions};
pub use router::MeshRouter;
pub use xbee::{XBeeRadio, XBeeSettings};
#[cfg(feature = "xbee")]
pub use xbee::XBeeFactory;

/// Called with `(sender_node_id, payload)` for every inbound message.
pub type ReceiveCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// An open mesh radio.
#[async_trait]
pub trait MeshRadio: Send + Sync {
    /// Node identifier of this radio.
    fn node_id(&self) -> &str;

    /// Discover the network and return the node ids that answered in time.
    async fn discover(&self, timeout: Duration) -> Result<Vec<String>, MeshError>;

    /// Send one payload to a node by node id. `Ok` once the radio confirmed
    /// the transmission.
    async fn send(&self, node_id: &str, payload: &str) -> Result<(), MeshError>;

    /// Install the handler for inbound messages, replacing any previous one.
    fn set_receive_callback(&self, callback: ReceiveCallback);

    /// Release the radio. Further calls fail with [`MeshError::Closed`].
    async fn close(&self);
}

/// Opens (and configures) a radio. Called again after every crash.
#[async_trait]
pub trait RadioFactory: Send + Sync + 'static {
    async fn open(&self) -> Result<Arc<dyn MeshRadio>, MeshError>;
}

/// Role of this board on the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Forwards its own summaries to a target node.
    Sender,
    /// Internet-capable target: accepts inbound summaries.
    Receiver,
}

impl Role {
    /// A board is a receiver iff its node id is set and one of the targets.
    pub fn for_node(node_id: &str, targets: &[String]) -> Self {
        if !node_id.is_empty() && targets.iter().any(|t| t == node_id) {
            Role::Receiver
        } else {
            Role::Sender
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Sender => write!(f, "sender"),
            Role::Receiver => write!(f, "receiver"),
        }
    }
}
