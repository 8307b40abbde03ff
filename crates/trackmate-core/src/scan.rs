//! Discovery-phase control: time-boxed scanning with de-duplication.
//!
//! The scan controller checks adapter/permission preconditions, runs the
//! platform discovery for a bounded window, and forwards de-duplicated
//! sightings to the session manager. It never prompts for permissions and
//! never owns the registry; it only reports what the radio saw.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use trackmate_types::{DeviceIdentity, uuids};

use crate::error::{Error, Result};
use crate::traits::{AdapterEvent, AdapterState, BleAdapter, PermissionGateway};

/// Default scan window.
pub const DEFAULT_SCAN_WINDOW: Duration = Duration::from_secs(10);

/// Options for scanning.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// How long to scan before stopping automatically.
    pub window: Duration,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            window: DEFAULT_SCAN_WINDOW,
        }
    }
}

impl ScanOptions {
    /// Create new scan options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scan window.
    #[must_use]
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

/// Updates the controller reports to its owner while a scan runs.
#[derive(Debug, Clone)]
pub enum ScanUpdate {
    /// A peripheral advertising the tracker service was sighted.
    ///
    /// `first_sighting` is true exactly once per device per scan session;
    /// repeats still carry fresh rssi for the registry.
    Discovered {
        identity: DeviceIdentity,
        rssi: Option<i16>,
        first_sighting: bool,
    },
    /// The radio failed mid-scan; the scan has been force-stopped.
    Interrupted { message: String },
    /// The window elapsed or the scan was stopped.
    Finished,
}

/// Ephemeral state of one scan session.
#[derive(Debug)]
struct ActiveScan {
    /// Monotonic per-session tag. The session task only stops the platform
    /// scan when the slot still carries its own generation, so a superseded
    /// session exiting late cannot kill its successor's scan.
    generation: u64,
    started_at: OffsetDateTime,
    deadline: OffsetDateTime,
    cancel: CancellationToken,
}

/// Summary of the scan currently in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSessionInfo {
    /// When the scan started.
    pub started_at: OffsetDateTime,
    /// When the window elapses.
    pub deadline: OffsetDateTime,
}

/// Controller for the discovery phase.
pub struct ScanController<A: BleAdapter> {
    adapter: Arc<A>,
    permissions: Arc<dyn PermissionGateway>,
    updates: mpsc::UnboundedSender<ScanUpdate>,
    active: Arc<Mutex<Option<ActiveScan>>>,
    generation: AtomicU64,
}

impl<A: BleAdapter> ScanController<A> {
    /// Create a controller reporting updates to the given channel.
    pub fn new(
        adapter: Arc<A>,
        permissions: Arc<dyn PermissionGateway>,
        updates: mpsc::UnboundedSender<ScanUpdate>,
    ) -> Self {
        Self {
            adapter,
            permissions,
            updates,
            active: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
        }
    }

    /// Start a time-boxed scan.
    ///
    /// Preconditions are checked, never prompted for: the adapter must be
    /// powered on ([`Error::AdapterUnavailable`]) and scan permissions must
    /// already be granted ([`Error::PermissionDenied`]).
    ///
    /// Idempotent: if a scan is already active the existing session is kept
    /// and its info returned. Mid-scan radio errors do not surface here;
    /// they force-stop the scan and arrive as [`ScanUpdate::Interrupted`].
    pub async fn start(&self, options: ScanOptions) -> Result<ScanSessionInfo> {
        let mut active = self.active.lock().await;

        if let Some(scan) = active.as_ref()
            && !scan.cancel.is_cancelled()
        {
            debug!("scan already active, returning existing session");
            return Ok(ScanSessionInfo {
                started_at: scan.started_at,
                deadline: scan.deadline,
            });
        }

        match self.adapter.state().await? {
            AdapterState::PoweredOn => {}
            state => {
                return Err(Error::AdapterUnavailable(format!(
                    "adapter state is {:?}",
                    state
                )));
            }
        }
        if !self.permissions.scan_allowed().await {
            return Err(Error::PermissionDenied);
        }

        let mut events = self.adapter.start_scan(uuids::TRACKER_SERVICE).await?;
        info!(window_secs = options.window.as_secs(), "starting BLE scan");

        let started_at = OffsetDateTime::now_utc();
        let deadline = started_at + options.window;
        let cancel = CancellationToken::new();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;

        let task_cancel = cancel.clone();
        let adapter = Arc::clone(&self.adapter);
        let updates = self.updates.clone();
        let slot = Arc::clone(&self.active);
        let window = options.window;

        tokio::spawn(async move {
            let expiry = tokio::time::sleep(window);
            tokio::pin!(expiry);
            let mut seen: HashSet<String> = HashSet::new();

            loop {
                tokio::select! {
                    // Cancellation wins over queued discoveries: anything
                    // still in flight after stop() is dropped silently.
                    biased;

                    _ = task_cancel.cancelled() => {
                        debug!("scan cancelled");
                        break;
                    }
                    _ = &mut expiry => {
                        debug!("scan window elapsed");
                        break;
                    }
                    event = events.recv() => match event {
                        Some(AdapterEvent::Discovered { identity, rssi }) => {
                            let first_sighting = seen.insert(identity.id.clone());
                            let _ = updates.send(ScanUpdate::Discovered {
                                identity,
                                rssi,
                                first_sighting,
                            });
                        }
                        Some(AdapterEvent::ScanError { message }) => {
                            warn!(%message, "radio error mid-scan, force-stopping");
                            let _ = updates.send(ScanUpdate::Interrupted { message });
                            break;
                        }
                        None => {
                            debug!("adapter closed the discovery channel");
                            break;
                        }
                    }
                }
            }

            // Mark the session finished before the async stop so a
            // subsequent start() doesn't see a half-dead session as active.
            task_cancel.cancel();
            {
                // The slot lock spans the generation check and the platform
                // stop; a session that was already superseded leaves the new
                // session's platform scan alone.
                let mut active = slot.lock().await;
                if active
                    .as_ref()
                    .is_some_and(|scan| scan.generation == generation)
                {
                    *active = None;
                    if let Err(e) = adapter.stop_scan().await {
                        debug!(error = %e, "stop_scan after session end failed");
                    }
                }
            }
            let _ = updates.send(ScanUpdate::Finished);
            info!(discovered = seen.len(), "scan complete");
        });

        *active = Some(ActiveScan {
            generation,
            started_at,
            deadline,
            cancel,
        });

        Ok(ScanSessionInfo {
            started_at,
            deadline,
        })
    }

    /// Stop the scan. Idempotent; a no-op when not scanning.
    ///
    /// Only requests cancellation; the session task clears the slot and
    /// stops the platform scan itself, if it still owns it.
    pub async fn stop(&self) {
        let active = self.active.lock().await;
        if let Some(scan) = active.as_ref() {
            scan.cancel.cancel();
        }
    }

    /// Whether a scan session is currently active.
    pub async fn is_scanning(&self) -> bool {
        let active = self.active.lock().await;
        active
            .as_ref()
            .is_some_and(|scan| !scan.cancel.is_cancelled())
    }
}
