//! Mesh relay supervisor and its delivery transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use blescan_types::SummaryRecord;

use super::{MeshRadio, MeshRouter, RadioFactory, ReceiveCallback, Role};
use crate::delivery::Transport;
use crate::error::{DeliveryError, MeshError};
use crate::state::{HealthFlag, SharedHealth};

/// Receives summaries decoded from inbound mesh lines.
pub type InboundHandler = Arc<dyn Fn(SummaryRecord) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub role: Role,
    pub targets: Vec<String>,
    pub discovery_timeout: Duration,
    /// Receiver only: how often the network is rediscovered.
    pub rediscover_interval: Duration,
    /// Wait after a crash (or failed open) before reopening the radio.
    pub crash_cooldown: Duration,
}

/// Owns the radio for its whole life: opens it, routes sends through the
/// [`MeshRouter`], and tears it down and reopens it after a fatal error.
pub struct MeshRelay {
    factory: Arc<dyn RadioFactory>,
    options: RelayOptions,
    router: MeshRouter,
    health: SharedHealth,
    inbound: Option<InboundHandler>,
    radio: RwLock<Option<Arc<dyn MeshRadio>>>,
    crash_pending: AtomicBool,
    crashed: Notify,
    worker: tokio::sync::Mutex<Option<(JoinHandle<()>, CancellationToken)>>,
}

impl MeshRelay {
    pub fn new(
        factory: Arc<dyn RadioFactory>,
        options: RelayOptions,
        health: SharedHealth,
        inbound: Option<InboundHandler>,
    ) -> Arc<Self> {
        let router = MeshRouter::new(options.targets.clone(), options.discovery_timeout);
        Arc::new(Self {
            factory,
            options,
            router,
            health,
            inbound,
            radio: RwLock::new(None),
            crash_pending: AtomicBool::new(false),
            crashed: Notify::new(),
            worker: tokio::sync::Mutex::new(None),
        })
    }

    pub fn role(&self) -> Role {
        self.options.role
    }

    pub fn router(&self) -> &MeshRouter {
        &self.router
    }

    /// The open radio, if any.
    pub fn radio(&self) -> Option<Arc<dyn MeshRadio>> {
        self.radio
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_ready(&self) -> bool {
        self.radio().is_some()
    }

    /// Spawn the supervisor task. No-op when already running.
    pub async fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(self).supervise(cancel.clone()));
        info!("Mesh relay started as {}", self.options.role);
        *worker = Some((handle, cancel));
    }

    /// Stop the supervisor and close the radio. No-op when stopped.
    pub async fn stop(&self) {
        let Some((handle, cancel)) = self.worker.lock().await.take() else {
            return;
        };
        cancel.cancel();
        if let Err(e) = handle.await {
            error!("Mesh supervisor failed: {}", e);
        }
        info!("Mesh relay stopped");
    }

    /// Route one payload to a reachable target.
    pub async fn send(&self, payload: &str) -> Result<String, MeshError> {
        let radio = self.radio().ok_or(MeshError::NotReady)?;
        let result = self.router.send(radio.as_ref(), payload).await;
        if let Err(e) = &result
            && e.is_fatal()
        {
            self.report_fatal(e);
        }
        result
    }

    /// Whether a radio is open and at least one target is reachable.
    pub async fn probe(&self) -> bool {
        let Some(radio) = self.radio() else {
            return false;
        };
        match self.router.ensure_candidates(radio.as_ref()).await {
            Ok(count) => count > 0,
            Err(e) => {
                if e.is_fatal() {
                    self.report_fatal(&e);
                } else {
                    debug!("Mesh probe failed: {}", e);
                }
                false
            }
        }
    }

    /// Ask the supervisor to tear the radio down and restart it.
    pub fn report_fatal(&self, err: &MeshError) {
        error!("Mesh radio failure: {}", err);
        self.crash_pending.store(true, Ordering::SeqCst);
        self.crashed.notify_one();
    }

    async fn supervise(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let Some(radio) = self.open_radio(&cancel).await else {
                break;
            };
            self.install(Arc::clone(&radio));

            let cancelled = self.run_session(radio.as_ref(), &cancel).await;

            self.uninstall();
            radio.close().await;
            if cancelled {
                break;
            }

            self.health.raise(HealthFlag::MeshCrash);
            warn!(
                "Mesh radio torn down, restarting in {:?}",
                self.options.crash_cooldown
            );
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.options.crash_cooldown) => {}
            }
        }
        self.health.clear(HealthFlag::MeshSetup);
    }

    async fn open_radio(&self, cancel: &CancellationToken) -> Option<Arc<dyn MeshRadio>> {
        loop {
            self.health.raise(HealthFlag::MeshSetup);
            let result = tokio::select! {
                _ = cancel.cancelled() => return None,
                result = self.factory.open() => result,
            };
            self.health.clear(HealthFlag::MeshSetup);

            match result {
                Ok(radio) => {
                    self.health.clear(HealthFlag::MeshCrash);
                    info!("Mesh radio open as node '{}'", radio.node_id());
                    return Some(radio);
                }
                Err(e) => {
                    error!(
                        "Failed to open mesh radio: {}, retrying in {:?}",
                        e, self.options.crash_cooldown
                    );
                    self.health.raise(HealthFlag::MeshCrash);
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = sleep(self.options.crash_cooldown) => {}
                    }
                }
            }
        }
    }

    fn install(&self, radio: Arc<dyn MeshRadio>) {
        self.router.reset();
        self.crash_pending.store(false, Ordering::SeqCst);
        if self.options.role == Role::Receiver {
            radio.set_receive_callback(self.receive_callback());
        }
        *self.radio.write().unwrap_or_else(PoisonError::into_inner) = Some(radio);
    }

    fn uninstall(&self) {
        self.radio
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn receive_callback(&self) -> ReceiveCallback {
        let inbound = self.inbound.clone();
        Arc::new(move |sender: &str, payload: &str| {
            match SummaryRecord::from_mesh_line(payload) {
                Ok(record) => {
                    debug!("Received summary of device {} from {}", record.id, sender);
                    if let Some(handler) = &inbound {
                        handler(record);
                    }
                }
                Err(e) => warn!("Dropping malformed message from {}: {}", sender, e),
            }
        })
    }

    /// Returns `true` when cancelled, `false` after a fatal error.
    async fn run_session(&self, radio: &dyn MeshRadio, cancel: &CancellationToken) -> bool {
        let receiver = self.options.role == Role::Receiver;
        let mut rediscover = interval(self.options.rediscover_interval.max(Duration::from_secs(1)));
        rediscover.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return true,
                _ = self.crashed.notified() => {
                    if self.crash_pending.swap(false, Ordering::SeqCst) {
                        return false;
                    }
                }
                _ = rediscover.tick(), if receiver => {
                    match self.router.rediscover(radio).await {
                        Ok(count) => debug!("Rediscovery: {} target(s) reachable", count),
                        Err(e) if e.is_fatal() => {
                            error!("Mesh radio failure during discovery: {}", e);
                            return false;
                        }
                        Err(e) => warn!("Rediscovery failed: {}", e),
                    }
                }
            }
        }
    }
}

/// [`Transport`] delivering mesh lines through a [`MeshRelay`].
#[derive(Clone)]
pub struct MeshTransport {
    relay: Arc<MeshRelay>,
}

impl MeshTransport {
    pub fn new(relay: Arc<MeshRelay>) -> Self {
        Self { relay }
    }
}

#[async_trait]
impl Transport for MeshTransport {
    type Message = String;

    fn name(&self) -> &str {
        "mesh"
    }

    async fn deliver(&self, line: &String) -> Result<(), DeliveryError> {
        self.relay.send(line).await?;
        Ok(())
    }

    async fn probe(&self) -> bool {
        self.relay.probe().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::time::timeout;

    use super::*;
    use crate::delivery::{DeliveryController, DeliveryOptions};
    use crate::mesh::mock::{MockFactory, MockRadio};
    use crate::state::HealthFlags;
    use crate::test_support::sample_record;
    use blescan_core::RetryConfig;

    fn options(role: Role) -> RelayOptions {
        RelayOptions {
            role,
            targets: vec!["GW1".to_string(), "GW2".to_string()],
            discovery_timeout: Duration::from_secs(5),
            rediscover_interval: Duration::from_secs(60),
            crash_cooldown: Duration::from_secs(30),
        }
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        timeout(Duration::from_secs(3600), async {
            while !condition() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test(start_paused = true)]
    async fn test_receiver_forwards_decoded_lines() {
        let radio = MockRadio::new("GW1", &["GW1", "N2"]);
        let factory = MockFactory::new(vec![Arc::clone(&radio)]);
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let inbound: InboundHandler = Arc::new(move |record| sink.lock().unwrap().push(record));

        let relay = MeshRelay::new(factory, options(Role::Receiver), HealthFlags::shared(), Some(inbound));
        relay.start().await;
        wait_for(|| radio.has_callback()).await;

        let record = sample_record();
        radio.receive("N2", &record.to_mesh_line());
        radio.receive("N2", "garbage,line");

        assert_eq!(*received.lock().unwrap(), vec![record]);
        relay.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_receiver_rediscovers_periodically() {
        let radio = MockRadio::new("GW1", &["GW1"]);
        let factory = MockFactory::new(vec![Arc::clone(&radio)]);
        let relay = MeshRelay::new(factory, options(Role::Receiver), HealthFlags::shared(), None);
        relay.start().await;

        wait_for(|| radio.discoveries.load(Ordering::SeqCst) >= 3).await;
        assert_eq!(relay.router().candidates(), vec!["GW1"]);
        relay.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sender_never_installs_callback() {
        let radio = MockRadio::new("N1", &["GW1"]);
        let factory = MockFactory::new(vec![Arc::clone(&radio)]);
        let relay = MeshRelay::new(factory, options(Role::Sender), HealthFlags::shared(), None);
        relay.start().await;
        wait_for(|| relay.is_ready()).await;

        assert_eq!(relay.send("a,b").await.unwrap(), "GW1");
        assert!(!radio.has_callback());
        assert_eq!(radio.discoveries.load(Ordering::SeqCst), 1);
        relay.stop().await;
    }

    #[tokio::test]
    async fn test_send_before_open_is_not_ready() {
        let factory = MockFactory::new(Vec::new());
        let relay = MeshRelay::new(factory, options(Role::Sender), HealthFlags::shared(), None);
        assert!(matches!(relay.send("x").await, Err(MeshError::NotReady)));
        assert!(!relay.probe().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_restarts_after_cooldown() {
        let first = MockRadio::new("N1", &["GW1"]);
        let second = MockRadio::new("N1", &["GW2"]);
        let factory = MockFactory::new(vec![Arc::clone(&first), Arc::clone(&second)]);
        let health = HealthFlags::shared();
        let relay = MeshRelay::new(
            Arc::clone(&factory) as Arc<dyn RadioFactory>,
            options(Role::Sender),
            health.clone(),
            None,
        );
        relay.start().await;
        wait_for(|| relay.is_ready()).await;

        first.crash_next_send.store(true, Ordering::SeqCst);
        let err = relay.send("x").await.unwrap_err();
        assert!(err.is_fatal());

        wait_for(|| health.is_set(HealthFlag::MeshCrash)).await;
        assert!(first.closed.load(Ordering::SeqCst));
        assert!(!relay.is_ready());

        let crashed_at = tokio::time::Instant::now();
        wait_for(|| relay.is_ready()).await;
        assert!(crashed_at.elapsed() >= Duration::from_secs(29));
        assert_eq!(factory.opens.load(Ordering::SeqCst), 2);
        assert!(!health.is_set(HealthFlag::MeshCrash));

        assert_eq!(relay.send("y").await.unwrap(), "GW2");
        relay.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_open_is_retried() {
        let radio = MockRadio::new("N1", &["GW1"]);
        let factory = MockFactory::new(vec![Arc::clone(&radio)]);
        factory.fail_opens.store(2, Ordering::SeqCst);
        let health = HealthFlags::shared();
        let relay = MeshRelay::new(
            Arc::clone(&factory) as Arc<dyn RadioFactory>,
            options(Role::Sender),
            health.clone(),
            None,
        );
        relay.start().await;

        wait_for(|| relay.is_ready()).await;
        assert_eq!(factory.opens.load(Ordering::SeqCst), 3);
        assert!(!health.is_set(HealthFlag::MeshSetup));
        assert!(!health.is_set(HealthFlag::MeshCrash));
        relay.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_closes_radio_and_is_idempotent() {
        let radio = MockRadio::new("N1", &["GW1"]);
        let factory = MockFactory::new(vec![Arc::clone(&radio)]);
        let relay = MeshRelay::new(factory, options(Role::Sender), HealthFlags::shared(), None);
        relay.start().await;
        relay.start().await;
        wait_for(|| relay.is_ready()).await;

        relay.stop().await;
        relay.stop().await;
        assert!(radio.closed.load(Ordering::SeqCst));
        assert!(!relay.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_controller_over_relay_waits_for_target() {
        let radio = MockRadio::new("N1", &[]);
        let factory = MockFactory::new(vec![Arc::clone(&radio)]);
        let health = HealthFlags::shared();
        let relay = MeshRelay::new(factory, options(Role::Sender), health.clone(), None);
        relay.start().await;

        let controller = DeliveryController::new(
            MeshTransport::new(Arc::clone(&relay)),
            DeliveryOptions {
                capacity: 100,
                stacking_threshold: 10,
                retry: RetryConfig::fixed(Duration::from_secs(2)),
                drain_timeout: Duration::from_secs(5),
                stacking_flag: Some(HealthFlag::MeshStacking),
                unreachable_flag: Some(HealthFlag::MeshUnreachable),
            },
            health.clone(),
        );
        controller.enqueue("1,first".to_string());
        controller.enqueue("1,second".to_string());
        controller.start().await;

        wait_for(|| health.is_set(HealthFlag::MeshUnreachable)).await;
        radio.visible.lock().unwrap().push("GW2".to_string());

        wait_for(|| controller.stats().delivered() == 2).await;
        assert!(!health.is_set(HealthFlag::MeshUnreachable));
        let sent: Vec<String> = radio.sent().into_iter().map(|(_, line)| line).collect();
        assert_eq!(sent, vec!["1,first", "1,second"]);

        controller.stop().await;
        relay.stop().await;
    }
}
