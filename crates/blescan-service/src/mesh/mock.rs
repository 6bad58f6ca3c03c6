//! Scripted in-memory mesh for tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{MeshRadio, RadioFactory, ReceiveCallback};
use crate::error::MeshError;

#[derive(Default)]
pub struct MockRadio {
    pub node_id: String,
    /// Node ids answering discovery.
    pub visible: Mutex<Vec<String>>,
    /// Nodes whose transmissions fail with a transmit status.
    pub failing: Mutex<HashSet<String>>,
    /// Next send fails with a fatal serial error.
    pub crash_next_send: AtomicBool,
    pub closed: AtomicBool,
    pub sent: Mutex<Vec<(String, String)>>,
    pub discoveries: AtomicU32,
    callback: Mutex<Option<ReceiveCallback>>,
}

impl MockRadio {
    pub fn new(node_id: &str, visible: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            node_id: node_id.to_string(),
            visible: Mutex::new(visible.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        })
    }

    pub fn fail_node(&self, node: &str) {
        self.failing.lock().unwrap().insert(node.to_string());
    }

    pub fn heal_node(&self, node: &str) {
        self.failing.lock().unwrap().remove(node);
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn has_callback(&self) -> bool {
        self.callback.lock().unwrap().is_some()
    }

    /// Simulate an inbound message from `sender`.
    pub fn receive(&self, sender: &str, payload: &str) {
        let callback = self.callback.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback(sender, payload);
        }
    }
}

#[async_trait]
impl MeshRadio for MockRadio {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    async fn discover(&self, _timeout: Duration) -> Result<Vec<String>, MeshError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MeshError::Closed);
        }
        self.discoveries.fetch_add(1, Ordering::SeqCst);
        Ok(self.visible.lock().unwrap().clone())
    }

    async fn send(&self, node_id: &str, payload: &str) -> Result<(), MeshError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MeshError::Closed);
        }
        if self.crash_next_send.swap(false, Ordering::SeqCst) {
            return Err(MeshError::Serial(std::io::Error::other("device unplugged")));
        }
        if self.failing.lock().unwrap().contains(node_id) {
            return Err(MeshError::TransmitFailed {
                node: node_id.to_string(),
                status: 0x21,
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((node_id.to_string(), payload.to_string()));
        Ok(())
    }

    fn set_receive_callback(&self, callback: ReceiveCallback) {
        *self.callback.lock().unwrap() = Some(callback);
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Hands out the scripted radios in order, one per open. Fails while
/// `fail_opens` is non-zero.
#[derive(Default)]
pub struct MockFactory {
    pub radios: Mutex<Vec<Arc<MockRadio>>>,
    pub fail_opens: AtomicU32,
    pub opens: AtomicU32,
}

impl MockFactory {
    pub fn new(radios: Vec<Arc<MockRadio>>) -> Arc<Self> {
        Arc::new(Self {
            radios: Mutex::new(radios),
            ..Default::default()
        })
    }
}

#[async_trait]
impl RadioFactory for MockFactory {
    async fn open(&self) -> Result<Arc<dyn MeshRadio>, MeshError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .fail_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(MeshError::Serial(std::io::Error::other("port busy")));
        }
        let mut radios = self.radios.lock().unwrap();
        if radios.is_empty() {
            return Err(MeshError::Closed);
        }
        let radio = radios.remove(0);
        Ok(radio)
    }
}
