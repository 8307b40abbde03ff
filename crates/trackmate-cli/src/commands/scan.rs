//! Scan command implementation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use trackmate_core::manager::{ManagerConfig, SessionManager};
use trackmate_core::platform::SystemAdapter;
use trackmate_core::scan::ScanOptions;
use trackmate_core::traits::AlwaysGranted;
use trackmate_core::TagEvent;

use crate::cli::OutputFormat;
use crate::format::{format_devices_json, format_devices_text};

pub async fn run(window: u64, format: OutputFormat) -> Result<()> {
    let adapter = Arc::new(
        SystemAdapter::new()
            .await
            .context("Failed to open Bluetooth adapter")?,
    );
    let config = ManagerConfig::new()
        .scan(ScanOptions::new().window(Duration::from_secs(window)));
    let manager = SessionManager::new(adapter, Arc::new(AlwaysGranted), config);

    let mut events = manager.events();
    manager
        .start_scan()
        .await
        .context("Failed to start scanning")?;

    if matches!(format, OutputFormat::Text) {
        eprintln!("Scanning for {window}s...");
    }

    while let Ok(event) = events.recv().await {
        match event {
            TagEvent::Discovered { device, rssi } => {
                if matches!(format, OutputFormat::Text) {
                    let name = device.advertised_name.as_deref().unwrap_or("(unnamed)");
                    let rssi = rssi.map_or("?".to_string(), |r| r.to_string());
                    eprintln!("  found {name} [{}] rssi {rssi}", device.id);
                }
            }
            TagEvent::ScanInterrupted { message } => {
                anyhow::bail!("Scan interrupted: {message}");
            }
            TagEvent::ScanFinished => break,
            _ => {}
        }
    }

    let devices = manager.discovered_devices().await;
    let content = match format {
        OutputFormat::Json => format_devices_json(&devices)?,
        OutputFormat::Text => format_devices_text(&devices),
    };
    println!("{content}");

    manager.shutdown().await;
    Ok(())
}
