//! Per-device connection sessions.
//!
//! A session owns the full lifecycle of one connected tag: the connect
//! handshake, GATT service discovery, characteristic subscriptions, the
//! notification decode loop, and teardown. Each session runs as its own
//! task; the manager holds a [`SessionHandle`] and talks to it only through
//! cancellation and join.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use trackmate_types::{ConnectionState, uuids};

use crate::error::{ConnectionFailureReason, Result};
use crate::events::{DisconnectReason, EventDispatcher, TagEvent};
use crate::registry::DeviceRegistry;
use crate::telemetry::{decode_battery, decode_location};
use crate::traits::{Notification, TagPeripheral};

/// Default connect handshake timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Tuning knobs for a connection session.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Deadline for the platform connect handshake.
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ConnectionConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect handshake timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Where a session's connect handshake currently stands.
///
/// Broadcast through a watch channel so every caller racing on the same
/// device observes the one underlying attempt's outcome.
#[derive(Debug, Clone)]
pub(crate) enum HandshakeState {
    Pending,
    Connected,
    Failed(ConnectionFailureReason),
}

static NEXT_EPOCH: AtomicU64 = AtomicU64::new(0);

/// Handle the manager keeps for a running session.
#[derive(Debug)]
pub(crate) struct SessionHandle {
    pub(crate) device_id: String,
    /// Unique per spawned session; map entries are only removed when the
    /// epoch still matches, so a handle is never mistaken for its successor.
    pub(crate) epoch: u64,
    cancel: CancellationToken,
    join: JoinHandle<()>,
    ready: watch::Receiver<HandshakeState>,
    done: CancellationToken,
}

impl SessionHandle {
    /// Whether the session task is still running and not shutting down.
    pub(crate) fn is_active(&self) -> bool {
        !self.cancel.is_cancelled() && !self.is_finished()
    }

    /// Whether the session task has exited (for any reason).
    pub(crate) fn is_finished(&self) -> bool {
        self.done.is_cancelled() || self.join.is_finished()
    }

    /// Request graceful teardown. The task acknowledges by exiting.
    pub(crate) fn request_disconnect(&self) {
        self.cancel.cancel();
    }

    /// Watch of the handshake outcome; settles exactly once.
    pub(crate) fn handshake(&self) -> watch::Receiver<HandshakeState> {
        self.ready.clone()
    }

    /// Token cancelled when the session task is fully gone, including when
    /// it is aborted.
    pub(crate) fn done_signal(&self) -> CancellationToken {
        self.done.clone()
    }

    /// Abort the session task outright, for a teardown that never
    /// acknowledged. The drop guard still marks the session done.
    pub(crate) fn abort(&self) {
        self.join.abort();
    }

    /// Wait for the session task to exit, bounded by `timeout`.
    ///
    /// Returns `false` when the deadline passed first; the task is then
    /// aborted so a hung peripheral cannot wedge shutdown.
    pub(crate) async fn join_within(mut self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, &mut self.join).await {
            Ok(_) => true,
            Err(_) => {
                self.join.abort();
                false
            }
        }
    }
}

/// Spawn a session task for one peripheral.
///
/// The handle's handshake watch settles once the session reaches
/// monitoring or fails. The registry record for `peripheral.id()` must
/// already exist and be in the `Connecting` state.
pub(crate) fn spawn<P: TagPeripheral>(
    peripheral: P,
    config: ConnectionConfig,
    registry: Arc<RwLock<DeviceRegistry>>,
    events: EventDispatcher,
) -> SessionHandle {
    let device_id = peripheral.id();
    let cancel = CancellationToken::new();
    let (ready_tx, ready_rx) = watch::channel(HandshakeState::Pending);
    let done = CancellationToken::new();
    let done_guard = done.clone().drop_guard();

    let session = ConnectionSession {
        peripheral,
        device_id: device_id.clone(),
        config,
        registry,
        events,
        cancel: cancel.clone(),
    };
    let join = tokio::spawn(async move {
        let _done = done_guard;
        session.run(ready_tx).await;
    });

    SessionHandle {
        device_id,
        epoch: NEXT_EPOCH.fetch_add(1, Ordering::Relaxed),
        cancel,
        join,
        ready: ready_rx,
        done,
    }
}

struct ConnectionSession<P: TagPeripheral> {
    peripheral: P,
    device_id: String,
    config: ConnectionConfig,
    registry: Arc<RwLock<DeviceRegistry>>,
    events: EventDispatcher,
    cancel: CancellationToken,
}

impl<P: TagPeripheral> ConnectionSession<P> {
    async fn set_state(&self, state: ConnectionState) {
        let mut registry = self.registry.write().await;
        if let Err(e) = registry.set_connection_state(&self.device_id, state) {
            debug!(device_id = %self.device_id, error = %e, "state update on missing record");
        }
    }

    async fn fail(
        &self,
        reason: ConnectionFailureReason,
        event_reason: DisconnectReason,
    ) -> ConnectionFailureReason {
        self.set_state(ConnectionState::Failed).await;
        self.events.send(TagEvent::Disconnected {
            device_id: self.device_id.clone(),
            reason: event_reason,
        });
        reason
    }

    #[tracing::instrument(skip_all, fields(device_id = %self.device_id))]
    async fn run(self, ready: watch::Sender<HandshakeState>) {
        match self.handshake().await {
            Ok(streams) => {
                let _ = ready.send_replace(HandshakeState::Connected);
                self.monitor(streams).await;
            }
            Err(reason) => {
                let _ = ready.send_replace(HandshakeState::Failed(reason));
            }
        }
    }

    /// Connect, discover services, and subscribe to both telemetry
    /// characteristics. On success the device is in `Monitoring`.
    async fn handshake(&self) -> std::result::Result<MonitorStreams, ConnectionFailureReason> {
        let connect = tokio::time::timeout(self.config.connect_timeout, self.peripheral.connect());
        match connect.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "connect handshake failed");
                return Err(self
                    .fail(
                        ConnectionFailureReason::ConnectFailed(e.to_string()),
                        DisconnectReason::ConnectFailed,
                    )
                    .await);
            }
            Err(_) => {
                warn!(timeout = ?self.config.connect_timeout, "connect handshake timed out");
                return Err(self
                    .fail(
                        ConnectionFailureReason::Timeout,
                        DisconnectReason::ConnectFailed,
                    )
                    .await);
            }
        }

        self.set_state(ConnectionState::ServiceDiscovery).await;
        let streams = match self.discover_and_subscribe().await {
            Ok(streams) => streams,
            Err(e) => {
                warn!(error = %e, "service discovery failed");
                // Best effort: release the half-open platform connection
                if let Err(e) = self.peripheral.cancel_connection().await {
                    debug!(error = %e, "cleanup disconnect after discovery failure failed");
                }
                return Err(self
                    .fail(
                        ConnectionFailureReason::ServiceDiscoveryFailed(e.to_string()),
                        DisconnectReason::ServiceDiscoveryFailed,
                    )
                    .await);
            }
        };

        self.set_state(ConnectionState::Monitoring).await;
        self.events.send(TagEvent::Connected {
            device_id: self.device_id.clone(),
        });
        info!("monitoring");

        Ok(streams)
    }

    async fn discover_and_subscribe(&self) -> Result<MonitorStreams> {
        self.peripheral.discover_services().await?;

        // The two telemetry channels are independent: losing one (a tag
        // with older firmware, say) still leaves a useful session. Zero
        // subscriptions is tolerated too; the session just sits idle.
        let mut subscriptions = Vec::new();
        for characteristic in [uuids::BATTERY_CHARACTERISTIC, uuids::LOCATION_CHARACTERISTIC] {
            match self.peripheral.subscribe(characteristic).await {
                Ok(()) => subscriptions.push(characteristic),
                Err(e) => {
                    warn!(%characteristic, error = %e, "subscription failed, continuing without it");
                }
            }
        }
        if subscriptions.is_empty() {
            warn!("no telemetry subscriptions succeeded");
        }

        Ok(MonitorStreams {
            subscriptions,
            notifications: self.peripheral.notifications().await?,
            disconnects: self.peripheral.watch_disconnect().await?,
        })
    }

    /// Decode-and-record loop. Runs until cancelled, the radio drops the
    /// link, or the notification channel closes.
    async fn monitor(self, mut streams: MonitorStreams) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.teardown(&streams.subscriptions).await;
                    return;
                }
                _ = streams.disconnects.recv() => {
                    info!("connection lost");
                    self.set_state(ConnectionState::Disconnected).await;
                    self.events.send(TagEvent::Disconnected {
                        device_id: self.device_id.clone(),
                        reason: DisconnectReason::Lost,
                    });
                    return;
                }
                notification = streams.notifications.recv() => match notification {
                    Some(notification) => self.handle_notification(notification).await,
                    None => {
                        // Channel closed without a disconnect signal; treat
                        // it as a lost link rather than hanging forever.
                        debug!("notification channel closed");
                        self.set_state(ConnectionState::Disconnected).await;
                        self.events.send(TagEvent::Disconnected {
                            device_id: self.device_id.clone(),
                            reason: DisconnectReason::Lost,
                        });
                        return;
                    }
                }
            }
        }
    }

    /// Decode one notification and fold it into the registry.
    ///
    /// Malformed payloads never tear the session down: the last good value
    /// stays in place and a [`TagEvent::DecodeError`] is published.
    async fn handle_notification(&self, notification: Notification) {
        let observed_at = OffsetDateTime::now_utc();
        match notification.characteristic {
            c if c == uuids::BATTERY_CHARACTERISTIC => {
                match decode_battery(&notification.payload) {
                    Ok(percent) => {
                        let accepted = {
                            let mut registry = self.registry.write().await;
                            registry.record_battery(&self.device_id, percent, observed_at)
                        };
                        if let Ok(true) = accepted {
                            self.events.send(TagEvent::BatteryUpdate {
                                device_id: self.device_id.clone(),
                                percent,
                            });
                        }
                    }
                    Err(e) => self.decode_error(e.to_string()),
                }
            }
            c if c == uuids::LOCATION_CHARACTERISTIC => {
                match decode_location(&notification.payload) {
                    Ok((latitude, longitude)) => {
                        let accepted = {
                            let mut registry = self.registry.write().await;
                            registry.record_location(
                                &self.device_id,
                                latitude,
                                longitude,
                                observed_at,
                            )
                        };
                        if let Ok(true) = accepted {
                            self.events.send(TagEvent::LocationUpdate {
                                device_id: self.device_id.clone(),
                                latitude,
                                longitude,
                            });
                        }
                    }
                    Err(e) => self.decode_error(e.to_string()),
                }
            }
            other => {
                debug!(characteristic = %other, "notification on unexpected characteristic");
            }
        }
    }

    fn decode_error(&self, message: String) {
        warn!(%message, "telemetry decode failed");
        self.events.send(TagEvent::DecodeError {
            device_id: self.device_id.clone(),
            message,
        });
    }

    /// Graceful, user-initiated teardown: unsubscribe, release the platform
    /// connection, and only then report `Disconnected`.
    async fn teardown(&self, subscriptions: &[Uuid]) {
        self.set_state(ConnectionState::Disconnecting).await;

        for &characteristic in subscriptions {
            if let Err(e) = self.peripheral.unsubscribe(characteristic).await {
                debug!(%characteristic, error = %e, "unsubscribe during teardown failed");
            }
        }
        if let Err(e) = self.peripheral.cancel_connection().await {
            debug!(error = %e, "platform disconnect failed");
        }

        self.set_state(ConnectionState::Disconnected).await;
        self.events.send(TagEvent::Disconnected {
            device_id: self.device_id.clone(),
            reason: DisconnectReason::User,
        });
        info!("disconnected");
    }
}

struct MonitorStreams {
    subscriptions: Vec<Uuid>,
    notifications: tokio::sync::mpsc::Receiver<Notification>,
    disconnects: tokio::sync::mpsc::Receiver<()>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPeripheral;
    use trackmate_types::DeviceIdentity;

    async fn registry_with(id: &str) -> Arc<RwLock<DeviceRegistry>> {
        let mut registry = DeviceRegistry::new();
        registry.upsert_discovered(DeviceIdentity::new(id), Some(-50), OffsetDateTime::now_utc());
        registry
            .set_connection_state(id, ConnectionState::Connecting)
            .unwrap();
        Arc::new(RwLock::new(registry))
    }

    async fn state_of(registry: &Arc<RwLock<DeviceRegistry>>, id: &str) -> ConnectionState {
        registry.read().await.get(id).unwrap().connection_state
    }

    async fn settled(handle: &SessionHandle) -> HandshakeState {
        let mut ready = handle.handshake();
        loop {
            let current = ready.borrow_and_update().clone();
            match current {
                HandshakeState::Pending => ready.changed().await.unwrap(),
                state => return state,
            }
        }
    }

    #[tokio::test]
    async fn test_successful_handshake_reaches_monitoring() {
        let peripheral = MockPeripheral::new("AA:BB");
        let registry = registry_with("AA:BB").await;
        let events = EventDispatcher::new(16);
        let mut rx = events.subscribe();

        let handle = spawn(
            peripheral.clone(),
            ConnectionConfig::default(),
            Arc::clone(&registry),
            events,
        );
        assert!(matches!(settled(&handle).await, HandshakeState::Connected));

        assert_eq!(
            state_of(&registry, "AA:BB").await,
            ConnectionState::Monitoring
        );
        assert!(matches!(
            rx.recv().await.unwrap(),
            TagEvent::Connected { .. }
        ));
        assert_eq!(peripheral.connect_count(), 1);
        assert_eq!(peripheral.subscribe_count(), 2);
    }

    #[tokio::test]
    async fn test_connect_failure_marks_failed() {
        let peripheral = MockPeripheral::new("AA:BB");
        peripheral.fail_next_connect("refused").await;
        let registry = registry_with("AA:BB").await;
        let events = EventDispatcher::new(16);
        let mut rx = events.subscribe();

        let handle = spawn(
            peripheral,
            ConnectionConfig::default(),
            Arc::clone(&registry),
            events,
        );
        assert!(matches!(
            settled(&handle).await,
            HandshakeState::Failed(ConnectionFailureReason::ConnectFailed(_))
        ));

        assert_eq!(state_of(&registry, "AA:BB").await, ConnectionState::Failed);
        assert!(matches!(
            rx.recv().await.unwrap(),
            TagEvent::Disconnected {
                reason: DisconnectReason::ConnectFailed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_service_discovery_failure_releases_connection() {
        let peripheral = MockPeripheral::new("AA:BB");
        peripheral.fail_next_discovery("no services").await;
        let registry = registry_with("AA:BB").await;
        let events = EventDispatcher::new(16);
        let mut rx = events.subscribe();

        let handle = spawn(
            peripheral.clone(),
            ConnectionConfig::default(),
            Arc::clone(&registry),
            events,
        );
        assert!(matches!(
            settled(&handle).await,
            HandshakeState::Failed(ConnectionFailureReason::ServiceDiscoveryFailed(_))
        ));

        assert_eq!(state_of(&registry, "AA:BB").await, ConnectionState::Failed);
        // The half-open connection was released
        assert_eq!(peripheral.disconnect_count(), 1);
        assert!(matches!(
            rx.recv().await.unwrap(),
            TagEvent::Disconnected {
                reason: DisconnectReason::ServiceDiscoveryFailed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_partial_subscription_still_monitors() {
        let peripheral = MockPeripheral::new("AA:BB");
        peripheral.fail_next_subscribe("notify unsupported").await;
        let registry = registry_with("AA:BB").await;
        let events = EventDispatcher::new(16);

        let handle = spawn(
            peripheral.clone(),
            ConnectionConfig::default(),
            Arc::clone(&registry),
            events,
        );
        assert!(matches!(settled(&handle).await, HandshakeState::Connected));

        // Battery subscription failed, location survived
        assert_eq!(
            state_of(&registry, "AA:BB").await,
            ConnectionState::Monitoring
        );
        assert_eq!(
            peripheral.subscribed().await,
            vec![uuids::LOCATION_CHARACTERISTIC]
        );

        // Teardown only releases what was actually subscribed
        handle.request_disconnect();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(peripheral.unsubscribe_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let peripheral = MockPeripheral::new("AA:BB");
        peripheral.hang_connect();
        let registry = registry_with("AA:BB").await;
        let events = EventDispatcher::new(16);

        let handle = spawn(
            peripheral,
            ConnectionConfig::new().connect_timeout(Duration::from_secs(2)),
            Arc::clone(&registry),
            events,
        );
        assert!(matches!(
            settled(&handle).await,
            HandshakeState::Failed(ConnectionFailureReason::Timeout)
        ));
        assert_eq!(state_of(&registry, "AA:BB").await, ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_battery_notification_updates_registry() {
        let peripheral = MockPeripheral::new("AA:BB");
        let registry = registry_with("AA:BB").await;
        let events = EventDispatcher::new(16);
        let mut rx = events.subscribe();

        let handle = spawn(
            peripheral.clone(),
            ConnectionConfig::default(),
            Arc::clone(&registry),
            events,
        );
        assert!(matches!(settled(&handle).await, HandshakeState::Connected));
        let _ = rx.recv().await; // Connected

        peripheral.notify(uuids::BATTERY_CHARACTERISTIC, vec![0x4B]).await;

        assert!(matches!(
            rx.recv().await.unwrap(),
            TagEvent::BatteryUpdate { percent: 75, .. }
        ));
        let record = registry.read().await.get("AA:BB").cloned().unwrap();
        assert_eq!(record.last_battery.unwrap().percent, 75);
    }

    #[tokio::test]
    async fn test_malformed_payload_keeps_session_and_value() {
        let peripheral = MockPeripheral::new("AA:BB");
        let registry = registry_with("AA:BB").await;
        let events = EventDispatcher::new(16);
        let mut rx = events.subscribe();

        let handle = spawn(
            peripheral.clone(),
            ConnectionConfig::default(),
            Arc::clone(&registry),
            events,
        );
        assert!(matches!(settled(&handle).await, HandshakeState::Connected));
        let _ = rx.recv().await; // Connected

        peripheral.notify(uuids::BATTERY_CHARACTERISTIC, vec![0x4B]).await;
        let _ = rx.recv().await; // BatteryUpdate 75

        // Two-byte battery payload is malformed
        peripheral
            .notify(uuids::BATTERY_CHARACTERISTIC, vec![0x50, 0x00])
            .await;
        assert!(matches!(
            rx.recv().await.unwrap(),
            TagEvent::DecodeError { .. }
        ));

        let record = registry.read().await.get("AA:BB").cloned().unwrap();
        assert_eq!(record.last_battery.unwrap().percent, 75);
        assert_eq!(record.connection_state, ConnectionState::Monitoring);
    }

    #[tokio::test]
    async fn test_external_drop_reports_lost() {
        let peripheral = MockPeripheral::new("AA:BB");
        let registry = registry_with("AA:BB").await;
        let events = EventDispatcher::new(16);
        let mut rx = events.subscribe();

        let handle = spawn(
            peripheral.clone(),
            ConnectionConfig::default(),
            Arc::clone(&registry),
            events,
        );
        assert!(matches!(settled(&handle).await, HandshakeState::Connected));
        let _ = rx.recv().await; // Connected

        peripheral.drop_link().await;

        assert!(matches!(
            rx.recv().await.unwrap(),
            TagEvent::Disconnected {
                reason: DisconnectReason::Lost,
                ..
            }
        ));
        assert_eq!(
            state_of(&registry, "AA:BB").await,
            ConnectionState::Disconnected
        );
        assert!(handle.join_within(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_graceful_teardown_unsubscribes_first() {
        let peripheral = MockPeripheral::new("AA:BB");
        let registry = registry_with("AA:BB").await;
        let events = EventDispatcher::new(16);
        let mut rx = events.subscribe();

        let handle = spawn(
            peripheral.clone(),
            ConnectionConfig::default(),
            Arc::clone(&registry),
            events,
        );
        assert!(matches!(settled(&handle).await, HandshakeState::Connected));
        let _ = rx.recv().await; // Connected

        handle.request_disconnect();

        assert!(matches!(
            rx.recv().await.unwrap(),
            TagEvent::Disconnected {
                reason: DisconnectReason::User,
                ..
            }
        ));
        assert_eq!(peripheral.unsubscribe_count(), 2);
        assert_eq!(peripheral.disconnect_count(), 1);
        assert_eq!(
            state_of(&registry, "AA:BB").await,
            ConnectionState::Disconnected
        );
    }

    #[tokio::test]
    async fn test_handshake_outcome_visible_to_late_observers() {
        let peripheral = MockPeripheral::new("AA:BB");
        peripheral.fail_next_connect("refused").await;
        let registry = registry_with("AA:BB").await;
        let events = EventDispatcher::new(16);

        let handle = spawn(
            peripheral,
            ConnectionConfig::default(),
            Arc::clone(&registry),
            events,
        );
        assert!(matches!(settled(&handle).await, HandshakeState::Failed(_)));

        // A watch taken after the handshake settled still sees the outcome
        let late = handle.handshake();
        assert!(matches!(
            *late.borrow(),
            HandshakeState::Failed(ConnectionFailureReason::ConnectFailed(_))
        ));
    }
}
