//! Trait abstractions over the platform BLE surface.
//!
//! The session manager is generic over these traits so that production code
//! can run on the system Bluetooth stack ([`crate::platform`]) while tests
//! drive the exact same code paths through scriptable doubles
//! ([`crate::mock`]). Collaborators are explicit instances passed in by the
//! composing application; there are no global singletons.

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use trackmate_types::DeviceIdentity;

use crate::error::Result;

/// Power state of the Bluetooth adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    /// Radio is on and usable.
    PoweredOn,
    /// Radio is off.
    PoweredOff,
    /// State could not be determined.
    Unknown,
}

/// Events delivered by an adapter while a scan is active.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    /// A peripheral advertising the tracker service was seen.
    ///
    /// The adapter reports every advertisement; per-scan de-duplication is
    /// the scan controller's job.
    Discovered {
        identity: DeviceIdentity,
        rssi: Option<i16>,
    },
    /// The radio failed mid-scan (e.g. adapter powered off).
    ScanError { message: String },
}

/// A single characteristic notification from a connected peripheral.
#[derive(Debug, Clone)]
pub struct Notification {
    /// The characteristic that produced the value.
    pub characteristic: Uuid,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

/// Platform Bluetooth adapter.
#[async_trait]
pub trait BleAdapter: Send + Sync + 'static {
    /// The peripheral handle type this adapter produces.
    type Peripheral: TagPeripheral;

    /// Report the adapter's current power state.
    async fn state(&self) -> Result<AdapterState>;

    /// Start platform discovery filtered to the given service UUID.
    ///
    /// Discovery events arrive on the returned channel until the scan is
    /// stopped or the radio fails.
    async fn start_scan(&self, service: Uuid) -> Result<mpsc::Receiver<AdapterEvent>>;

    /// Stop platform discovery. Idempotent.
    async fn stop_scan(&self) -> Result<()>;

    /// Resolve a peripheral handle for a previously discovered device id.
    async fn peripheral(&self, id: &str) -> Result<Self::Peripheral>;
}

/// Handle to one tracker tag peripheral.
///
/// Cloning is cheap (handles are reference-like); all clones refer to the
/// same underlying platform connection.
#[async_trait]
pub trait TagPeripheral: Send + Sync + Clone + 'static {
    /// Platform-assigned device id.
    fn id(&self) -> String;

    /// Name from the advertisement, if any.
    fn advertised_name(&self) -> Option<String>;

    /// Establish the platform connection.
    async fn connect(&self) -> Result<()>;

    /// Enumerate GATT services and characteristics.
    async fn discover_services(&self) -> Result<()>;

    /// Subscribe to notifications on one characteristic.
    async fn subscribe(&self, characteristic: Uuid) -> Result<()>;

    /// Unsubscribe from notifications on one characteristic.
    async fn unsubscribe(&self, characteristic: Uuid) -> Result<()>;

    /// Open the notification channel for this peripheral.
    async fn notifications(&self) -> Result<mpsc::Receiver<Notification>>;

    /// Watch for radio-initiated disconnects. Yields once when the
    /// connection drops externally.
    async fn watch_disconnect(&self) -> Result<mpsc::Receiver<()>>;

    /// Release the platform connection.
    async fn cancel_connection(&self) -> Result<()>;
}

/// Gateway to the platform permission system.
///
/// The core only checks; prompting the user for permissions is the
/// composing application's responsibility.
#[async_trait]
pub trait PermissionGateway: Send + Sync + 'static {
    /// Whether BLE scanning is currently permitted.
    async fn scan_allowed(&self) -> bool;
}

/// Permission gateway for platforms where BLE scanning needs no runtime
/// grant (desktop Linux/macOS/Windows).
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysGranted;

#[async_trait]
impl PermissionGateway for AlwaysGranted {
    async fn scan_allowed(&self) -> bool {
        true
    }
}
