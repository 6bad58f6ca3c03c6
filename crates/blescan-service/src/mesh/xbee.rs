//! XBee radio in API mode over a serial port.
//!
//! Requests (AT commands, transmit requests) carry a frame id; the reader
//! task routes each response back to the waiting caller by that id. `ND`
//! answers arrive as several responses to one frame id and feed the running
//! discovery instead. Discovered node ids are remembered so that sends can
//! address nodes by name.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::SplitStream;
use futures::{Sink, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout, timeout_at};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use super::frame::{Frame, NodeInfo, XBeeCodec};
use super::{MeshRadio, ReceiveCallback};
#[cfg(feature = "xbee")]
use super::RadioFactory;
use crate::error::MeshError;

type FrameSink = Pin<Box<dyn Sink<Frame, Error = MeshError> + Send>>;

/// Serial and network settings of the local radio.
#[derive(Debug, Clone)]
pub struct XBeeSettings {
    pub port: String,
    pub baud_rate: u32,
    pub pan_id: u64,
    pub is_coordinator: bool,
    pub node_id: String,
    /// How long to wait for an AT response or transmit status.
    pub command_timeout: Duration,
}

#[derive(Default)]
struct Inner {
    pending: Mutex<HashMap<u8, oneshot::Sender<Frame>>>,
    discovery: Mutex<Option<mpsc::UnboundedSender<NodeInfo>>>,
    /// node id -> 64-bit address
    nodes: Mutex<HashMap<String, u64>>,
    callback: Mutex<Option<ReceiveCallback>>,
    closed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    fn dispatch(&self, frame: Frame) {
        match frame {
            Frame::ReceivePacket {
                source64, payload, ..
            } => {
                let sender = lock(&self.nodes)
                    .iter()
                    .find(|(_, addr)| **addr == source64)
                    .map(|(name, _)| name.clone())
                    .unwrap_or_else(|| format!("{:016X}", source64));
                let text = String::from_utf8_lossy(&payload);
                let callback = lock(&self.callback).clone();
                match callback {
                    Some(callback) => callback(&sender, &text),
                    None => debug!("Ignoring message from {}: no receiver", sender),
                }
            }
            Frame::AtResponse {
                command: [b'N', b'D'],
                status,
                data,
                ..
            } => {
                if status != 0 || data.is_empty() {
                    return;
                }
                match NodeInfo::parse(&data) {
                    Ok(node) => {
                        debug!("Discovered node '{}' ({:016X})", node.node_id, node.addr64);
                        lock(&self.nodes).insert(node.node_id.clone(), node.addr64);
                        if let Some(tx) = lock(&self.discovery).as_ref() {
                            let _ = tx.send(node);
                        }
                    }
                    Err(e) => warn!("Bad discovery answer: {}", e),
                }
            }
            response @ (Frame::AtResponse { .. } | Frame::TransmitStatus { .. }) => {
                let frame_id = response.frame_id().unwrap_or_default();
                match lock(&self.pending).remove(&frame_id) {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => debug!("Unsolicited response for frame {}", frame_id),
                }
            }
            other => debug!("Ignoring frame {:?}", other),
        }
    }

    fn shut_down(&self) {
        self.closed.store(true, Ordering::SeqCst);
        lock(&self.pending).clear();
        lock(&self.discovery).take();
    }
}

async fn read_frames<S>(mut stream: SplitStream<Framed<S, XBeeCodec>>, inner: Arc<Inner>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    while let Some(result) = stream.next().await {
        match result {
            Ok(frame) => inner.dispatch(frame),
            Err(e) => {
                warn!("Radio read failed: {}", e);
                break;
            }
        }
    }
    debug!("Radio reader finished");
    inner.shut_down();
}

/// An open XBee radio.
pub struct XBeeRadio {
    node_id: String,
    writer: tokio::sync::Mutex<FrameSink>,
    inner: Arc<Inner>,
    reader: Mutex<Option<JoinHandle<()>>>,
    next_frame_id: AtomicU8,
    command_timeout: Duration,
}

impl XBeeRadio {
    /// Open the serial port and configure the radio.
    #[cfg(feature = "xbee")]
    pub async fn open(settings: &XBeeSettings) -> Result<Self, MeshError> {
        use tokio_serial::SerialPortBuilderExt;

        let port = tokio_serial::new(&settings.port, settings.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()?;
        debug!("Opened {} at {} baud", settings.port, settings.baud_rate);

        let radio = Self::with_stream(port, &settings.node_id, settings.command_timeout);
        if let Err(e) = radio.configure(settings).await {
            radio.close().await;
            return Err(e);
        }
        Ok(radio)
    }

    /// Drive a radio over any byte stream speaking API frames.
    pub fn with_stream<S>(stream: S, node_id: &str, command_timeout: Duration) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (sink, stream) = Framed::new(stream, XBeeCodec).split();
        let inner = Arc::new(Inner::default());
        let reader = tokio::spawn(read_frames(stream, Arc::clone(&inner)));

        Self {
            node_id: node_id.to_string(),
            writer: tokio::sync::Mutex::new(Box::pin(sink)),
            inner,
            reader: Mutex::new(Some(reader)),
            next_frame_id: AtomicU8::new(1),
            command_timeout,
        }
    }

    /// Write network parameters and apply them.
    pub async fn configure(&self, settings: &XBeeSettings) -> Result<(), MeshError> {
        let label = if settings.node_id.is_empty() {
            " "
        } else {
            settings.node_id.as_str()
        };

        self.at("ID", &settings.pan_id.to_be_bytes()).await?;
        self.at("CE", &[u8::from(settings.is_coordinator)]).await?;
        self.at("NI", label.as_bytes()).await?;
        self.at("WR", &[]).await?;
        self.at("AC", &[]).await?;

        info!(
            "Radio configured: PAN {:#x}, coordinator {}, node '{}'",
            settings.pan_id, settings.is_coordinator, label
        );
        Ok(())
    }

    fn frame_id(&self) -> u8 {
        loop {
            let id = self.next_frame_id.fetch_add(1, Ordering::Relaxed);
            // 0 asks the radio not to answer
            if id != 0 {
                return id;
            }
        }
    }

    fn ensure_open(&self) -> Result<(), MeshError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            Err(MeshError::Closed)
        } else {
            Ok(())
        }
    }

    async fn write(&self, frame: Frame) -> Result<(), MeshError> {
        self.writer.lock().await.send(frame).await
    }

    async fn request(
        &self,
        operation: &'static str,
        build: impl FnOnce(u8) -> Frame,
    ) -> Result<Frame, MeshError> {
        self.ensure_open()?;
        let frame_id = self.frame_id();
        let (tx, rx) = oneshot::channel();
        lock(&self.inner.pending).insert(frame_id, tx);

        if let Err(e) = self.write(build(frame_id)).await {
            lock(&self.inner.pending).remove(&frame_id);
            return Err(e);
        }

        match timeout(self.command_timeout, rx).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(MeshError::Closed),
            Err(_) => {
                lock(&self.inner.pending).remove(&frame_id);
                Err(MeshError::timeout(operation, self.command_timeout))
            }
        }
    }

    /// Run an AT command and return its response data.
    pub async fn at(&self, command: &str, parameter: &[u8]) -> Result<Vec<u8>, MeshError> {
        let response = self
            .request("AT command", |id| Frame::at_command(id, command, parameter))
            .await?;
        match response {
            Frame::AtResponse {
                status: 0, data, ..
            } => Ok(data),
            Frame::AtResponse { status, .. } => Err(MeshError::AtCommand {
                command: command.to_string(),
                status,
            }),
            other => Err(MeshError::InvalidFrame(format!(
                "unexpected answer to {}: {:?}",
                command, other
            ))),
        }
    }
}

impl Drop for XBeeRadio {
    fn drop(&mut self) {
        if let Some(reader) = lock(&self.reader).take() {
            reader.abort();
        }
    }
}

#[async_trait]
impl MeshRadio for XBeeRadio {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    async fn discover(&self, duration: Duration) -> Result<Vec<String>, MeshError> {
        self.ensure_open()?;
        let (tx, mut rx) = mpsc::unbounded_channel();
        *lock(&self.inner.discovery) = Some(tx);

        let frame_id = self.frame_id();
        if let Err(e) = self.write(Frame::at_command(frame_id, "ND", &[])).await {
            lock(&self.inner.discovery).take();
            return Err(e);
        }

        let deadline = Instant::now() + duration;
        let mut found: Vec<String> = Vec::new();
        while let Ok(Some(node)) = timeout_at(deadline, rx.recv()).await {
            if !found.contains(&node.node_id) {
                found.push(node.node_id);
            }
        }
        lock(&self.inner.discovery).take();

        self.ensure_open()?;
        debug!("Discovery finished: {:?}", found);
        Ok(found)
    }

    async fn send(&self, node_id: &str, payload: &str) -> Result<(), MeshError> {
        let dest64 = lock(&self.inner.nodes)
            .get(node_id)
            .copied()
            .ok_or_else(|| MeshError::UnknownNode(node_id.to_string()))?;

        let response = self
            .request("transmit", |frame_id| Frame::TransmitRequest {
                frame_id,
                dest64,
                payload: payload.as_bytes().to_vec(),
            })
            .await?;
        match response {
            Frame::TransmitStatus {
                delivery_status: 0,
                ..
            } => Ok(()),
            Frame::TransmitStatus {
                delivery_status, ..
            } => Err(MeshError::TransmitFailed {
                node: node_id.to_string(),
                status: delivery_status,
            }),
            other => Err(MeshError::InvalidFrame(format!(
                "unexpected answer to transmit: {:?}",
                other
            ))),
        }
    }

    fn set_receive_callback(&self, callback: ReceiveCallback) {
        *lock(&self.inner.callback) = Some(callback);
    }

    async fn close(&self) {
        self.inner.shut_down();
        if let Err(e) = self.writer.lock().await.close().await {
            debug!("Closing radio link: {}", e);
        }
        if let Some(reader) = lock(&self.reader).take() {
            reader.abort();
        }
    }
}

/// Opens an [`XBeeRadio`] on the configured serial port.
#[cfg(feature = "xbee")]
#[derive(Debug, Clone)]
pub struct XBeeFactory {
    settings: XBeeSettings,
}

#[cfg(feature = "xbee")]
impl XBeeFactory {
    pub fn new(settings: XBeeSettings) -> Self {
        Self { settings }
    }
}

#[cfg(feature = "xbee")]
#[async_trait]
impl RadioFactory for XBeeFactory {
    async fn open(&self) -> Result<Arc<dyn MeshRadio>, MeshError> {
        let radio = XBeeRadio::open(&self.settings).await?;
        Ok(Arc::new(radio))
    }
}
