//! Watch command implementation: connect to one tag and stream telemetry.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use trackmate_core::manager::{ManagerConfig, SessionManager};
use trackmate_core::platform::SystemAdapter;
use trackmate_core::scan::ScanOptions;
use trackmate_core::traits::{AlwaysGranted, BleAdapter};
use trackmate_core::{DisconnectReason, TagEvent};

use crate::cli::OutputFormat;
use crate::format::format_event;

pub async fn run(device: &str, window: u64, format: OutputFormat) -> Result<()> {
    let adapter = Arc::new(
        SystemAdapter::new()
            .await
            .context("Failed to open Bluetooth adapter")?,
    );
    let config = ManagerConfig::new()
        .scan(ScanOptions::new().window(Duration::from_secs(window)));
    let manager = SessionManager::new(adapter, Arc::new(AlwaysGranted), config);

    let id = locate(&manager, device).await?;
    eprintln!("Connecting to {id}...");
    manager
        .connect(&id)
        .await
        .with_context(|| format!("Failed to connect to {id}"))?;
    eprintln!("Monitoring. Press Ctrl-C to stop.");

    let mut events = manager.events();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Disconnecting...");
                break;
            }
            event = events.recv() => {
                let Ok(event) = event else { break };
                match &event {
                    TagEvent::BatteryUpdate { .. }
                    | TagEvent::LocationUpdate { .. }
                    | TagEvent::DecodeError { .. } => {
                        println!("{}", format_event(&event, format)?);
                    }
                    TagEvent::Disconnected { reason, .. } => {
                        if *reason == DisconnectReason::Lost {
                            eprintln!("Connection lost");
                        }
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}

/// Scan until the requested tag shows up, matching by id or advertised name.
async fn locate(manager: &SessionManager<impl BleAdapter>, device: &str) -> Result<String> {
    let mut events = manager.events();
    manager
        .start_scan()
        .await
        .context("Failed to start scanning")?;
    eprintln!("Scanning for {device}...");

    loop {
        let Ok(event) = events.recv().await else {
            bail!("Event stream closed while scanning");
        };
        match event {
            TagEvent::Discovered { device: identity, .. } => {
                if identity.id == device || identity.advertised_name.as_deref() == Some(device) {
                    manager.stop_scan().await;
                    return Ok(identity.id);
                }
            }
            TagEvent::ScanInterrupted { message } => {
                bail!("Scan interrupted: {message}");
            }
            TagEvent::ScanFinished => {
                bail!("Device {device} not found within the scan window");
            }
            _ => {}
        }
    }
}
