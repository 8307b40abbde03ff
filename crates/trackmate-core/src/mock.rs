//! Scriptable test doubles for the platform BLE traits.
//!
//! The mocks drive the exact code paths production uses: the scan
//! controller and session manager are generic over [`BleAdapter`], so tests
//! swap in [`MockAdapter`] and script radio behavior from the outside:
//! advertisements, notification payloads, link drops, injected failures,
//! and hangs for timeout coverage.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use trackmate_types::DeviceIdentity;

use crate::error::{ConnectionFailureReason, Error, Result};
use crate::traits::{
    AdapterEvent, AdapterState, BleAdapter, Notification, PermissionGateway, TagPeripheral,
};

/// Permission gateway with a fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct MockPermissions {
    allowed: bool,
}

impl MockPermissions {
    /// Permissions already granted.
    pub fn granted() -> Self {
        Self { allowed: true }
    }

    /// Permissions denied; the core must not prompt, only fail.
    pub fn denied() -> Self {
        Self { allowed: false }
    }
}

#[async_trait]
impl PermissionGateway for MockPermissions {
    async fn scan_allowed(&self) -> bool {
        self.allowed
    }
}

#[derive(Debug, Default)]
struct AdapterInner {
    state: RwLock<Option<AdapterState>>,
    scan_tx: RwLock<Option<mpsc::Sender<AdapterEvent>>>,
    peripherals: RwLock<HashMap<String, MockPeripheral>>,
    scan_starts: AtomicUsize,
    scan_stops: AtomicUsize,
}

/// Mock Bluetooth adapter.
///
/// Defaults to powered-on with no known peripherals.
#[derive(Debug, Clone, Default)]
pub struct MockAdapter {
    inner: Arc<AdapterInner>,
}

impl MockAdapter {
    /// Create a powered-on adapter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the reported power state.
    pub async fn set_state(&self, state: AdapterState) {
        *self.inner.state.write().await = Some(state);
    }

    /// Make a peripheral resolvable through [`BleAdapter::peripheral`].
    pub async fn add_peripheral(&self, peripheral: MockPeripheral) {
        self.inner
            .peripherals
            .write()
            .await
            .insert(peripheral.id(), peripheral);
    }

    /// Deliver an advertisement to the active scan, if any.
    pub async fn advertise(&self, identity: DeviceIdentity, rssi: Option<i16>) {
        if let Some(tx) = self.inner.scan_tx.read().await.as_ref() {
            let _ = tx.send(AdapterEvent::Discovered { identity, rssi }).await;
        }
    }

    /// Inject a mid-scan radio failure.
    pub async fn inject_scan_error(&self, message: &str) {
        if let Some(tx) = self.inner.scan_tx.read().await.as_ref() {
            let _ = tx
                .send(AdapterEvent::ScanError {
                    message: message.to_string(),
                })
                .await;
        }
    }

    /// How many times a platform scan was started.
    pub fn scan_start_count(&self) -> usize {
        self.inner.scan_starts.load(Ordering::SeqCst)
    }

    /// How many times a platform scan was stopped.
    pub fn scan_stop_count(&self) -> usize {
        self.inner.scan_stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BleAdapter for MockAdapter {
    type Peripheral = MockPeripheral;

    async fn state(&self) -> Result<AdapterState> {
        Ok(self
            .inner
            .state
            .read()
            .await
            .unwrap_or(AdapterState::PoweredOn))
    }

    async fn start_scan(&self, _service: Uuid) -> Result<mpsc::Receiver<AdapterEvent>> {
        self.inner.scan_starts.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(64);
        *self.inner.scan_tx.write().await = Some(tx);
        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<()> {
        self.inner.scan_stops.fetch_add(1, Ordering::SeqCst);
        self.inner.scan_tx.write().await.take();
        Ok(())
    }

    async fn peripheral(&self, id: &str) -> Result<Self::Peripheral> {
        self.inner
            .peripherals
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::unknown_device(id))
    }
}

#[derive(Debug, Default)]
struct PeripheralInner {
    name: Option<String>,
    latency: RwLock<Option<std::time::Duration>>,
    connect_error: RwLock<Option<String>>,
    discovery_error: RwLock<Option<String>>,
    subscribe_error: RwLock<Option<String>>,
    hang_connect: AtomicBool,
    hang_disconnect: AtomicBool,
    notif_tx: RwLock<Option<mpsc::Sender<Notification>>>,
    drop_tx: RwLock<Option<mpsc::Sender<()>>>,
    subscribed: RwLock<Vec<Uuid>>,
    connects: AtomicUsize,
    discoveries: AtomicUsize,
    subscribes: AtomicUsize,
    unsubscribes: AtomicUsize,
    disconnects: AtomicUsize,
}

/// Mock tracker tag peripheral.
///
/// Every operation succeeds immediately unless scripted otherwise. Failure
/// injection is one-shot; hangs are sticky.
#[derive(Debug, Clone)]
pub struct MockPeripheral {
    id: String,
    inner: Arc<PeripheralInner>,
}

impl MockPeripheral {
    /// Create a peripheral with the given platform id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            inner: Arc::new(PeripheralInner::default()),
        }
    }

    /// Create a peripheral with an advertised name.
    pub fn with_name(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            inner: Arc::new(PeripheralInner {
                name: Some(name.into()),
                ..Default::default()
            }),
        }
    }

    /// Add a fixed delay to connect and service discovery.
    pub async fn set_latency(&self, latency: std::time::Duration) {
        *self.inner.latency.write().await = Some(latency);
    }

    async fn simulate_latency(&self) {
        let latency = *self.inner.latency.read().await;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Fail the next connect attempt with this message.
    pub async fn fail_next_connect(&self, message: &str) {
        *self.inner.connect_error.write().await = Some(message.to_string());
    }

    /// Fail the next service discovery with this message.
    pub async fn fail_next_discovery(&self, message: &str) {
        *self.inner.discovery_error.write().await = Some(message.to_string());
    }

    /// Fail the next subscribe with this message.
    pub async fn fail_next_subscribe(&self, message: &str) {
        *self.inner.subscribe_error.write().await = Some(message.to_string());
    }

    /// Make connect attempts hang forever (for timeout coverage).
    pub fn hang_connect(&self) {
        self.inner.hang_connect.store(true, Ordering::SeqCst);
    }

    /// Make platform disconnects hang forever (for shutdown-ack coverage).
    pub fn hang_disconnect(&self) {
        self.inner.hang_disconnect.store(true, Ordering::SeqCst);
    }

    /// Deliver a characteristic notification.
    pub async fn notify(&self, characteristic: Uuid, payload: Vec<u8>) {
        if let Some(tx) = self.inner.notif_tx.read().await.as_ref() {
            let _ = tx
                .send(Notification {
                    characteristic,
                    payload,
                })
                .await;
        }
    }

    /// Simulate a radio-initiated link drop.
    pub async fn drop_link(&self) {
        if let Some(tx) = self.inner.drop_tx.read().await.as_ref() {
            let _ = tx.send(()).await;
        }
    }

    /// Characteristics currently subscribed.
    pub async fn subscribed(&self) -> Vec<Uuid> {
        self.inner.subscribed.read().await.clone()
    }

    /// Number of connect attempts.
    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Number of service discoveries.
    pub fn discovery_count(&self) -> usize {
        self.inner.discoveries.load(Ordering::SeqCst)
    }

    /// Number of subscribe calls.
    pub fn subscribe_count(&self) -> usize {
        self.inner.subscribes.load(Ordering::SeqCst)
    }

    /// Number of unsubscribe calls.
    pub fn unsubscribe_count(&self) -> usize {
        self.inner.unsubscribes.load(Ordering::SeqCst)
    }

    /// Number of platform disconnects.
    pub fn disconnect_count(&self) -> usize {
        self.inner.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TagPeripheral for MockPeripheral {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn advertised_name(&self) -> Option<String> {
        self.inner.name.clone()
    }

    async fn connect(&self) -> Result<()> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        if self.inner.hang_connect.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.simulate_latency().await;
        if let Some(message) = self.inner.connect_error.write().await.take() {
            return Err(Error::connection_failed(
                &self.id,
                ConnectionFailureReason::ConnectFailed(message),
            ));
        }
        Ok(())
    }

    async fn discover_services(&self) -> Result<()> {
        self.inner.discoveries.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if let Some(message) = self.inner.discovery_error.write().await.take() {
            return Err(Error::connection_failed(
                &self.id,
                ConnectionFailureReason::ServiceDiscoveryFailed(message),
            ));
        }
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<()> {
        self.inner.subscribes.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.inner.subscribe_error.write().await.take() {
            return Err(Error::connection_failed(
                &self.id,
                ConnectionFailureReason::ServiceDiscoveryFailed(message),
            ));
        }
        self.inner.subscribed.write().await.push(characteristic);
        Ok(())
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<()> {
        self.inner.unsubscribes.fetch_add(1, Ordering::SeqCst);
        self.inner
            .subscribed
            .write()
            .await
            .retain(|c| *c != characteristic);
        Ok(())
    }

    async fn notifications(&self) -> Result<mpsc::Receiver<Notification>> {
        let (tx, rx) = mpsc::channel(64);
        *self.inner.notif_tx.write().await = Some(tx);
        Ok(rx)
    }

    async fn watch_disconnect(&self) -> Result<mpsc::Receiver<()>> {
        let (tx, rx) = mpsc::channel(1);
        *self.inner.drop_tx.write().await = Some(tx);
        Ok(rx)
    }

    async fn cancel_connection(&self) -> Result<()> {
        if self.inner.hang_disconnect.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trackmate_types::uuids;

    #[tokio::test]
    async fn test_adapter_defaults_powered_on() {
        let adapter = MockAdapter::new();
        assert_eq!(adapter.state().await.unwrap(), AdapterState::PoweredOn);

        adapter.set_state(AdapterState::PoweredOff).await;
        assert_eq!(adapter.state().await.unwrap(), AdapterState::PoweredOff);
    }

    #[tokio::test]
    async fn test_adapter_resolves_registered_peripherals() {
        let adapter = MockAdapter::new();
        adapter
            .add_peripheral(MockPeripheral::with_name("AA:BB", "Tag"))
            .await;

        let peripheral = adapter.peripheral("AA:BB").await.unwrap();
        assert_eq!(peripheral.advertised_name().as_deref(), Some("Tag"));
        assert!(matches!(
            adapter.peripheral("missing").await,
            Err(Error::DeviceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_advertise_reaches_active_scan_only() {
        let adapter = MockAdapter::new();

        // No scan running: dropped silently
        adapter.advertise(DeviceIdentity::new("AA:BB"), Some(-50)).await;

        let mut rx = adapter.start_scan(uuids::TRACKER_SERVICE).await.unwrap();
        adapter.advertise(DeviceIdentity::new("AA:BB"), Some(-50)).await;
        assert!(matches!(
            rx.recv().await.unwrap(),
            AdapterEvent::Discovered { .. }
        ));
    }

    #[tokio::test]
    async fn test_one_shot_failure_injection() {
        let peripheral = MockPeripheral::new("AA:BB");
        peripheral.fail_next_connect("refused").await;

        assert!(peripheral.connect().await.is_err());
        assert!(peripheral.connect().await.is_ok());
        assert_eq!(peripheral.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_subscription_bookkeeping() {
        let peripheral = MockPeripheral::new("AA:BB");
        peripheral
            .subscribe(uuids::BATTERY_CHARACTERISTIC)
            .await
            .unwrap();
        peripheral
            .subscribe(uuids::LOCATION_CHARACTERISTIC)
            .await
            .unwrap();
        assert_eq!(peripheral.subscribed().await.len(), 2);

        peripheral
            .unsubscribe(uuids::BATTERY_CHARACTERISTIC)
            .await
            .unwrap();
        assert_eq!(
            peripheral.subscribed().await,
            vec![uuids::LOCATION_CHARACTERISTIC]
        );
    }
}
