//! Output formatting helpers.

use anyhow::Result;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use trackmate_core::TagEvent;
use trackmate_types::DeviceRecord;

use crate::cli::OutputFormat;

pub fn format_devices_text(devices: &[DeviceRecord]) -> String {
    if devices.is_empty() {
        return "No tracker tags found.".to_string();
    }

    let mut out = format!("Found {} tag(s):\n", devices.len());
    for record in devices {
        let name = record
            .identity
            .advertised_name
            .as_deref()
            .unwrap_or("(unnamed)");
        let rssi = record.rssi.map_or("?".to_string(), |r| r.to_string());
        out.push_str(&format!(
            "  {name}  id={}  rssi={rssi}  state={}\n",
            record.identity.id, record.connection_state
        ));
    }
    out.trim_end().to_string()
}

pub fn format_devices_json(devices: &[DeviceRecord]) -> Result<String> {
    Ok(serde_json::to_string_pretty(devices)?)
}

pub fn format_event(event: &TagEvent, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string(event)?),
        OutputFormat::Text => {
            let stamp = OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default();
            Ok(match event {
                TagEvent::BatteryUpdate { percent, .. } => {
                    format!("{stamp}  battery {percent}%")
                }
                TagEvent::LocationUpdate {
                    latitude,
                    longitude,
                    ..
                } => format!("{stamp}  location {latitude:.5}, {longitude:.5}"),
                TagEvent::DecodeError { message, .. } => {
                    format!("{stamp}  decode error: {message}")
                }
                other => format!("{stamp}  {other:?}"),
            })
        }
    }
}
