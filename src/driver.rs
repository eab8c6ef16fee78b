//! Core driver logic for Envoy Fleet
//!
//! The driver owns the discovery registry, the poll scheduler and the managed
//! devices, and is the single task that mutates them. Everything else talks
//! to it through [`DriverHandle`]: commands go in over an `mpsc` channel and
//! state comes out as a `watch`ed [`FleetSnapshot`].

use crate::config::Config;
use crate::device::{DeviceSet, ManagedDevice};
use crate::discovery::{DiscoveryEvent, DiscoveryRegistry, DiscoverySource};
use crate::error::{FleetError, Result};
use crate::gateway::{GatewayConnector, SessionState};
use crate::host::DeviceHost;
use crate::logging::{StructuredLogger, get_logger};
use crate::scheduler::PollScheduler;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

mod commands;
mod lifecycle;
mod reconcile;
mod snapshot;
pub mod types;

pub use types::{
    DeviceSnapshot, DriverCommand, DriverState, EndpointSnapshot, FleetSnapshot, TickReport,
};

/// Fleet driver: lifecycle, scheduling and reconciliation
pub struct FleetDriver {
    config: Config,

    /// Interval the scheduler runs at and the energy integration assumes
    poll_interval: Duration,

    state: DriverState,

    registry: DiscoveryRegistry,
    scheduler: PollScheduler,
    devices: DeviceSet,

    connector: Arc<dyn GatewayConnector>,
    discovery: Arc<dyn DiscoverySource>,
    host: Arc<dyn DeviceHost>,

    logger: StructuredLogger,

    commands_tx: mpsc::UnboundedSender<DriverCommand>,
    commands_rx: mpsc::UnboundedReceiver<DriverCommand>,

    /// Discovery events forwarded from per-endpoint subscriptions
    events_tx: mpsc::UnboundedSender<(String, DiscoveryEvent)>,
    events_rx: mpsc::UnboundedReceiver<(String, DiscoveryEvent)>,
    subscribed: HashSet<String>,
    forwarders: Vec<JoinHandle<()>>,

    snapshot_tx: watch::Sender<Arc<FleetSnapshot>>,
    total_polls: u64,
    last_tick: Option<TickReport>,
}

/// Cloneable handle used by the web layer and `main`
#[derive(Clone)]
pub struct DriverHandle {
    commands: mpsc::UnboundedSender<DriverCommand>,
    snapshot: watch::Receiver<Arc<FleetSnapshot>>,
}

impl FleetDriver {
    /// Create a driver; nothing is loaded or contacted until [`Self::start`]
    pub fn new(
        config: Config,
        connector: Arc<dyn GatewayConnector>,
        discovery: Arc<dyn DiscoverySource>,
        host: Arc<dyn DeviceHost>,
    ) -> Result<Self> {
        if config.poll_interval_ms == 0 {
            return Err(FleetError::validation(
                "poll_interval_ms",
                "Must be greater than 0",
            ));
        }
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let poll_interval = Duration::from_millis(config.poll_interval_ms);
        let initial = Arc::new(snapshot::empty(&config));
        let (snapshot_tx, _) = watch::channel(initial);

        Ok(Self {
            config,
            poll_interval,
            state: DriverState::Initializing,
            registry: DiscoveryRegistry::new(),
            scheduler: PollScheduler::new(),
            devices: DeviceSet::new(),
            connector,
            discovery,
            host,
            logger: get_logger("driver"),
            commands_tx,
            commands_rx,
            events_tx,
            events_rx,
            subscribed: HashSet::new(),
            forwarders: Vec::new(),
            snapshot_tx,
            total_polls: 0,
            last_tick: None,
        })
    }

    pub fn handle(&self) -> DriverHandle {
        DriverHandle {
            commands: self.commands_tx.clone(),
            snapshot: self.snapshot_tx.subscribe(),
        }
    }

    /// Start the driver and process ticks, commands and discovery events
    /// until a shutdown command arrives
    pub async fn run(&mut self) -> Result<()> {
        self.logger.info("Starting fleet driver main loop");
        self.start().await?;

        loop {
            tokio::select! {
                _ = self.scheduler.tick() => {
                    self.poll_once().await;
                }
                Some(cmd) = self.commands_rx.recv() => {
                    if self.handle_command(cmd).await.is_break() {
                        break;
                    }
                }
                Some((endpoint_id, event)) = self.events_rx.recv() => {
                    self.handle_discovery_event(&endpoint_id, event).await;
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Stop polling, drop every session and the discovery subscriptions
    pub fn shutdown(&mut self) {
        self.state = DriverState::ShuttingDown;
        self.logger.info("Shutting down fleet driver");
        self.scheduler.stop();
        self.registry.teardown_all();
        for task in self.forwarders.drain(..) {
            task.abort();
        }
        self.subscribed.clear();
        self.publish_snapshot();
    }

    async fn handle_discovery_event(&mut self, endpoint_id: &str, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::AddressChanged { address } => {
                self.on_address_changed(endpoint_id, &address).await;
            }
            DiscoveryEvent::Discovered { .. } => {
                self.on_gateway_discovered(endpoint_id).await;
            }
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn driver_state(&self) -> &DriverState {
        &self.state
    }

    pub fn registry(&self) -> &DiscoveryRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &PollScheduler {
        &self.scheduler
    }

    pub fn devices(&self) -> &DeviceSet {
        &self.devices
    }

    pub fn device(&self, serial: &str) -> Option<&ManagedDevice> {
        self.devices.get(serial)
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn total_polls(&self) -> u64 {
        self.total_polls
    }

    /// Session state of an endpoint, `Absent` when unknown
    pub fn session_state(&self, endpoint_id: &str) -> SessionState {
        self.registry.session_state(endpoint_id)
    }
}

impl DriverHandle {
    fn send(&self, cmd: DriverCommand) -> Result<()> {
        self.commands
            .send(cmd)
            .map_err(|_| FleetError::generic("Driver is not running"))
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> DriverCommand,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx))?;
        rx.await
            .map_err(|_| FleetError::generic("Driver dropped the request"))
    }

    pub async fn add_device(&self, device: ManagedDevice) -> Result<SessionState> {
        self.request(|reply| DriverCommand::AddDevice { device, reply })
            .await?
    }

    pub async fn update_settings(
        &self,
        serial: &str,
        settings: crate::device::DeviceSettings,
    ) -> Result<SessionState> {
        let serial = serial.to_string();
        self.request(|reply| DriverCommand::UpdateSettings {
            serial,
            settings,
            reply,
        })
        .await?
    }

    pub async fn remove_device(&self, serial: &str) -> Result<bool> {
        let serial = serial.to_string();
        self.request(|reply| DriverCommand::RemoveDevice { serial, reply })
            .await
    }

    pub async fn poll_now(&self) -> Result<TickReport> {
        self.request(|reply| DriverCommand::PollNow { reply }).await
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(DriverCommand::Shutdown)
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Arc<FleetSnapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<FleetSnapshot>> {
        self.snapshot.clone()
    }
}
