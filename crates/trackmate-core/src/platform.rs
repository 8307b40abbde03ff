//! System Bluetooth stack implementation of the platform traits.
//!
//! Wraps btleplug so the manager sees the same channel-based surface the
//! mocks provide. Advertisement filtering is done here as well as through
//! the scan filter, because some platforms ignore service filters.

use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use trackmate_types::DeviceIdentity;

use crate::error::{ConnectionFailureReason, DeviceNotFoundReason, Error, Result};
use crate::traits::{AdapterEvent, AdapterState, BleAdapter, Notification, TagPeripheral};

/// Bluetooth adapter backed by the system BLE stack.
pub struct SystemAdapter {
    adapter: Adapter,
    scan_cancel: RwLock<Option<CancellationToken>>,
}

impl SystemAdapter {
    /// Open the first Bluetooth adapter on the system.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let adapter = adapters
            .into_iter()
            .next()
            .ok_or_else(|| Error::AdapterUnavailable("no Bluetooth adapters found".to_string()))?;

        Ok(Self {
            adapter,
            scan_cancel: RwLock::new(None),
        })
    }
}

#[async_trait]
impl BleAdapter for SystemAdapter {
    type Peripheral = SystemPeripheral;

    async fn state(&self) -> Result<AdapterState> {
        Ok(match self.adapter.adapter_state().await? {
            CentralState::PoweredOn => AdapterState::PoweredOn,
            CentralState::PoweredOff => AdapterState::PoweredOff,
            _ => AdapterState::Unknown,
        })
    }

    async fn start_scan(&self, service: Uuid) -> Result<mpsc::Receiver<AdapterEvent>> {
        let mut events = self.adapter.events().await?;
        self.adapter
            .start_scan(ScanFilter {
                services: vec![service],
            })
            .await?;

        let cancel = CancellationToken::new();
        {
            let mut slot = self.scan_cancel.write().await;
            if let Some(previous) = slot.replace(cancel.clone()) {
                previous.cancel();
            }
        }

        let (tx, rx) = mpsc::channel(64);
        let adapter = self.adapter.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.next() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };

                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => continue,
                };
                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };
                let Ok(Some(properties)) = peripheral.properties().await else {
                    continue;
                };
                // Filter by advertised service ourselves; platform filters
                // are advisory on some backends
                if !properties.services.contains(&service) {
                    continue;
                }

                let identity = DeviceIdentity {
                    id: id.to_string(),
                    advertised_name: properties.local_name.clone(),
                };
                if tx
                    .send(AdapterEvent::Discovered {
                        identity,
                        rssi: properties.rssi,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            debug!("scan forwarding task finished");
        });

        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<()> {
        if let Some(cancel) = self.scan_cancel.write().await.take() {
            cancel.cancel();
        }
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn peripheral(&self, id: &str) -> Result<Self::Peripheral> {
        let peripherals = self.adapter.peripherals().await?;
        for peripheral in peripherals {
            if peripheral.id().to_string() == id {
                let name = match peripheral.properties().await {
                    Ok(Some(properties)) => properties.local_name,
                    _ => None,
                };
                return Ok(SystemPeripheral {
                    adapter: self.adapter.clone(),
                    peripheral: Arc::new(peripheral),
                    name,
                });
            }
        }
        Err(Error::DeviceNotFound(DeviceNotFoundReason::PeripheralGone {
            id: id.to_string(),
        }))
    }
}

/// Handle to one system peripheral.
#[derive(Clone)]
pub struct SystemPeripheral {
    adapter: Adapter,
    peripheral: Arc<Peripheral>,
    name: Option<String>,
}

impl SystemPeripheral {
    fn characteristic(&self, uuid: Uuid) -> Result<btleplug::api::Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| {
                Error::connection_failed(
                    self.id(),
                    ConnectionFailureReason::ServiceDiscoveryFailed(format!(
                        "characteristic {} not found",
                        uuid
                    )),
                )
            })
    }
}

#[async_trait]
impl TagPeripheral for SystemPeripheral {
    fn id(&self) -> String {
        self.peripheral.id().to_string()
    }

    fn advertised_name(&self) -> Option<String> {
        self.name.clone()
    }

    async fn connect(&self) -> Result<()> {
        self.peripheral.connect().await?;
        Ok(())
    }

    async fn discover_services(&self) -> Result<()> {
        self.peripheral.discover_services().await?;
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<()> {
        let characteristic = self.characteristic(characteristic)?;
        self.peripheral.subscribe(&characteristic).await?;
        Ok(())
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<()> {
        let characteristic = self.characteristic(characteristic)?;
        self.peripheral.unsubscribe(&characteristic).await?;
        Ok(())
    }

    async fn notifications(&self) -> Result<mpsc::Receiver<Notification>> {
        let mut stream = self.peripheral.notifications().await?;
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                let forwarded = tx
                    .send(Notification {
                        characteristic: notification.uuid,
                        payload: notification.value,
                    })
                    .await;
                if forwarded.is_err() {
                    break;
                }
            }
            debug!("notification forwarding task finished");
        });

        Ok(rx)
    }

    async fn watch_disconnect(&self) -> Result<mpsc::Receiver<()>> {
        let mut events = self.adapter.events().await?;
        let id = self.peripheral.id();
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(disconnected) = event
                    && disconnected == id
                {
                    if tx.send(()).await.is_err() {
                        debug!("disconnect watcher dropped");
                    }
                    break;
                }
            }
        });

        Ok(rx)
    }

    async fn cancel_connection(&self) -> Result<()> {
        if let Err(e) = self.peripheral.disconnect().await {
            warn!(error = %e, "platform disconnect failed");
            return Err(e.into());
        }
        Ok(())
    }
}
