//! Multi-device session management.
//!
//! The [`SessionManager`] is the single entry point applications use: it
//! owns the device registry, the scan controller, and at most one
//! connection session per device, and fans every observable change out
//! through the event dispatcher.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::join_all;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, info, warn};

use trackmate_types::{ConnectionState, DeviceRecord};

use crate::error::{Error, Result};
use crate::events::{EventDispatcher, EventReceiver, TagEvent};
use crate::registry::DeviceRegistry;
use crate::scan::{ScanController, ScanOptions, ScanSessionInfo, ScanUpdate};
use crate::session::{ConnectionConfig, HandshakeState, SessionHandle};
use crate::traits::{BleAdapter, PermissionGateway};

/// Default wait for a disconnect acknowledgement before force-removal.
pub const DEFAULT_DISCONNECT_ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Default time-to-live for discovered-but-inactive registry records.
pub const DEFAULT_REGISTRY_TTL: Duration = Duration::from_secs(300);

/// Configuration for the session manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Scan options used by [`SessionManager::start_scan`].
    pub scan: ScanOptions,
    /// Per-session connection tuning.
    pub connection: ConnectionConfig,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
    /// How long a device that never connected stays in the registry after
    /// its last sighting.
    pub registry_ttl: Duration,
    /// How long a disconnecting session gets to acknowledge teardown.
    pub disconnect_ack_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            scan: ScanOptions::default(),
            connection: ConnectionConfig::default(),
            event_capacity: 100,
            registry_ttl: DEFAULT_REGISTRY_TTL,
            disconnect_ack_timeout: DEFAULT_DISCONNECT_ACK_TIMEOUT,
        }
    }
}

impl ManagerConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scan options.
    #[must_use]
    pub fn scan(mut self, scan: ScanOptions) -> Self {
        self.scan = scan;
        self
    }

    /// Set the connection tuning.
    #[must_use]
    pub fn connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    /// Set the registry TTL for inactive records.
    #[must_use]
    pub fn registry_ttl(mut self, ttl: Duration) -> Self {
        self.registry_ttl = ttl;
        self
    }

    /// Set the disconnect acknowledgement timeout.
    #[must_use]
    pub fn disconnect_ack_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_ack_timeout = timeout;
        self
    }
}

/// Manager for scanning and concurrent per-device connection sessions.
///
/// At most one session exists per device id at a time. All state flows
/// through the internal registry; callers observe it via snapshots and the
/// event stream.
pub struct SessionManager<A: BleAdapter> {
    adapter: Arc<A>,
    registry: Arc<RwLock<DeviceRegistry>>,
    events: EventDispatcher,
    scan: ScanController<A>,
    sessions: Mutex<HashMap<String, SessionHandle>>,
    config: ManagerConfig,
    shut_down: AtomicBool,
}

impl<A: BleAdapter> SessionManager<A> {
    /// Create a manager over the given adapter and permission gateway.
    pub fn new(
        adapter: Arc<A>,
        permissions: Arc<dyn PermissionGateway>,
        config: ManagerConfig,
    ) -> Self {
        let registry = Arc::new(RwLock::new(DeviceRegistry::new()));
        let events = EventDispatcher::new(config.event_capacity);

        let (scan_tx, scan_rx) = mpsc::unbounded_channel();
        let scan = ScanController::new(Arc::clone(&adapter), permissions, scan_tx);
        tokio::spawn(pump_scan_updates(
            scan_rx,
            Arc::clone(&registry),
            events.clone(),
        ));

        Self {
            adapter,
            registry,
            events,
            scan,
            sessions: Mutex::new(HashMap::new()),
            config,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Subscribe to the event stream. Dropping the receiver unsubscribes.
    pub fn events(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Start a discovery scan using the configured options.
    ///
    /// Stale discovered-but-never-connected records are evicted first so
    /// the registry reflects devices that are plausibly still in range.
    #[tracing::instrument(skip(self))]
    pub async fn start_scan(&self) -> Result<ScanSessionInfo> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }

        let evicted = {
            let mut registry = self.registry.write().await;
            registry.prune_stale(self.config.registry_ttl, OffsetDateTime::now_utc())
        };
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "pruned stale device records");
        }

        self.scan.start(self.config.scan.clone()).await
    }

    /// Stop the current scan, if any.
    pub async fn stop_scan(&self) {
        self.scan.stop().await;
    }

    /// Whether a scan is currently running.
    pub async fn is_scanning(&self) -> bool {
        self.scan.is_scanning().await
    }

    /// Connect to a previously discovered device and start monitoring it.
    ///
    /// Returns once the session reaches the monitoring state. Idempotent
    /// while a session for the device is active: concurrent calls share the
    /// single underlying connect attempt.
    #[tracing::instrument(skip(self))]
    pub async fn connect(&self, id: &str) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }
        {
            let registry = self.registry.read().await;
            if !registry.contains(id) {
                return Err(Error::unknown_device(id));
            }
        }

        // The sessions lock is held across peripheral resolution and spawn
        // so two racing connect() calls cannot both start a handshake. A
        // session still tearing down is waited out first: the old platform
        // link must be fully released before a new one is opened.
        let (epoch, mut ready) = loop {
            let teardown = {
                let mut sessions = self.sessions.lock().await;
                match sessions.get(id) {
                    Some(handle) if handle.is_active() => {
                        debug!(device_id = %id, "session already active, sharing its handshake");
                        break (handle.epoch, handle.handshake());
                    }
                    Some(handle) if !handle.is_finished() => handle.done_signal(),
                    _ => {
                        sessions.remove(id);

                        let peripheral = self.adapter.peripheral(id).await?;
                        {
                            let mut registry = self.registry.write().await;
                            registry.set_connection_state(id, ConnectionState::Connecting)?;
                        }

                        let handle = crate::session::spawn(
                            peripheral,
                            self.config.connection.clone(),
                            Arc::clone(&self.registry),
                            self.events.clone(),
                        );
                        let epoch = handle.epoch;
                        let ready = handle.handshake();
                        sessions.insert(id.to_string(), handle);
                        break (epoch, ready);
                    }
                }
            };

            if tokio::time::timeout(self.config.disconnect_ack_timeout, teardown.cancelled())
                .await
                .is_err()
            {
                return Err(Error::timeout(
                    "session teardown",
                    self.config.disconnect_ack_timeout,
                ));
            }
        };

        loop {
            let state = ready.borrow_and_update().clone();
            match state {
                HandshakeState::Pending => {
                    if ready.changed().await.is_err() {
                        // Session task went away before settling the handshake
                        self.remove_session_if(id, epoch).await;
                        return Err(Error::Cancelled);
                    }
                }
                HandshakeState::Connected => {
                    info!(device_id = %id, "device connected");
                    return Ok(());
                }
                HandshakeState::Failed(reason) => {
                    self.remove_session_if(id, epoch).await;
                    return Err(Error::connection_failed(id, reason));
                }
            }
        }
    }

    /// Disconnect a device gracefully.
    ///
    /// A no-op for devices with no active session. If the session does not
    /// acknowledge teardown within the configured timeout it is aborted and
    /// a [`TagEvent::ForcedDisconnect`] is published.
    #[tracing::instrument(skip(self))]
    pub async fn disconnect(&self, id: &str) -> Result<()> {
        let (epoch, done) = {
            let sessions = self.sessions.lock().await;
            let Some(handle) = sessions.get(id) else {
                debug!(device_id = %id, "disconnect with no active session");
                return Ok(());
            };
            handle.request_disconnect();
            (handle.epoch, handle.done_signal())
        };

        // The map entry stays until the task is gone, so a concurrent
        // connect() cannot open a second platform link mid-teardown.
        let acked = tokio::time::timeout(self.config.disconnect_ack_timeout, done.cancelled())
            .await
            .is_ok();

        let mut sessions = self.sessions.lock().await;
        let stale = match sessions.get(id) {
            Some(handle) if handle.epoch == epoch => sessions.remove(id),
            _ => None,
        };
        if !acked && let Some(handle) = stale {
            warn!(device_id = %id, "disconnect not acknowledged, forcing removal");
            handle.abort();
            // Settle the registry and event before releasing the lock so a
            // waiting connect() cannot interleave with the force-removal.
            self.force_removed(id).await;
        }
        Ok(())
    }

    async fn remove_session_if(&self, id: &str, epoch: u64) {
        let mut sessions = self.sessions.lock().await;
        if sessions.get(id).is_some_and(|handle| handle.epoch == epoch) {
            sessions.remove(id);
        }
    }

    /// Snapshot of one device record.
    pub async fn device(&self, id: &str) -> Option<DeviceRecord> {
        self.registry.read().await.get(id).cloned()
    }

    /// Snapshot of every known device record.
    pub async fn discovered_devices(&self) -> Vec<DeviceRecord> {
        self.registry.read().await.all()
    }

    /// Snapshot of devices currently being monitored.
    pub async fn connected_devices(&self) -> Vec<DeviceRecord> {
        self.registry
            .read()
            .await
            .all()
            .into_iter()
            .filter(|record| record.connection_state == ConnectionState::Monitoring)
            .collect()
    }

    /// Ids of devices with an active session.
    pub async fn active_sessions(&self) -> Vec<String> {
        let sessions = self.sessions.lock().await;
        sessions
            .values()
            .filter(|handle| handle.is_active())
            .map(|handle| handle.device_id.clone())
            .collect()
    }

    /// Stop scanning, tear down every session, and reject further work.
    ///
    /// Sessions that do not acknowledge within the disconnect timeout are
    /// aborted and reported as [`TagEvent::ForcedDisconnect`]. Idempotent.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutting down");
        self.scan.stop().await;

        let handles: Vec<SessionHandle> = {
            let mut sessions = self.sessions.lock().await;
            sessions.drain().map(|(_, handle)| handle).collect()
        };
        for handle in &handles {
            handle.request_disconnect();
        }

        let timeout = self.config.disconnect_ack_timeout;
        let results = join_all(handles.into_iter().map(|handle| async move {
            let id = handle.device_id.clone();
            let acked = handle.join_within(timeout).await;
            (id, acked)
        }))
        .await;

        for (id, acked) in results {
            if !acked {
                warn!(device_id = %id, "no disconnect ack during shutdown, forcing removal");
                self.force_removed(&id).await;
            }
        }
        info!("shutdown complete");
    }

    async fn force_removed(&self, id: &str) {
        {
            let mut registry = self.registry.write().await;
            if let Err(e) = registry.set_connection_state(id, ConnectionState::Disconnected) {
                debug!(device_id = %id, error = %e, "state update on missing record");
            }
        }
        self.events.send(TagEvent::ForcedDisconnect {
            device_id: id.to_string(),
        });
    }
}

/// Fold scan controller updates into the registry and the event stream.
///
/// This task is the only writer for discovery data, so repeat sightings
/// refresh rssi without racing the de-duplicated `Discovered` events.
async fn pump_scan_updates(
    mut updates: mpsc::UnboundedReceiver<ScanUpdate>,
    registry: Arc<RwLock<DeviceRegistry>>,
    events: EventDispatcher,
) {
    while let Some(update) = updates.recv().await {
        match update {
            ScanUpdate::Discovered {
                identity,
                rssi,
                first_sighting,
            } => {
                let device = {
                    let mut registry = registry.write().await;
                    registry
                        .upsert_discovered(identity, rssi, OffsetDateTime::now_utc())
                        .identity
                        .clone()
                };
                if first_sighting {
                    events.send(TagEvent::Discovered { device, rssi });
                }
            }
            ScanUpdate::Interrupted { message } => {
                events.send(TagEvent::ScanInterrupted { message });
            }
            ScanUpdate::Finished => {
                events.send(TagEvent::ScanFinished);
            }
        }
    }
    debug!("scan update channel closed");
}
