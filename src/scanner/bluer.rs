//! BlueZ D-Bus backend.
//!
//! Uses the `bluer` crate to run LE discovery through the BlueZ daemon. BlueZ
//! scans actively, so scan responses (which usually carry the local name) are
//! requested, and it decodes the payloads for us. Every device report, including
//! property changes on already known devices, becomes one event.

use super::{EVENT_CHANNEL_BUFFER_SIZE, ScanError};
use crate::advertisement::{AdvertisementEvent, EventError, EventResult};
use crate::mac_address::MacAddress;
use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session};
use futures::StreamExt;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Reports weaker than this are dropped by BlueZ before they reach us.
pub const RSSI_THRESHOLD_DBM: i16 = -120;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Start LE discovery on the default adapter.
///
/// Runs until the receiver is dropped or BlueZ ends the discovery session.
pub async fn start_scan() -> Result<mpsc::Receiver<EventResult>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;
    adapter.set_discovery_filter(discovery_filter()).await?;
    info!(adapter = adapter.name(), "starting LE discovery");

    let mut reports = Box::pin(adapter.discover_devices_with_changes().await?);
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_BUFFER_SIZE);

    // The task owns the session so discovery stays alive as long as it runs.
    tokio::spawn(async move {
        let _session = session;

        while let Some(report) = reports.next().await {
            let AdapterEvent::DeviceAdded(address) = report else {
                continue;
            };
            match read_device(&adapter, address).await {
                Ok(result) => {
                    if tx.send(result).await.is_err() {
                        break;
                    }
                }
                Err(error) => debug!(%address, %error, "could not read device properties"),
            }
        }

        info!("LE discovery ended");
    });

    Ok(rx)
}

fn discovery_filter() -> DiscoveryFilter {
    DiscoveryFilter {
        transport: DiscoveryTransport::Le,
        rssi: Some(RSSI_THRESHOLD_DBM),
        duplicate_data: true,
        ..Default::default()
    }
}

/// Read the current name and RSSI BlueZ holds for `address`.
async fn read_device(adapter: &Adapter, address: Address) -> Result<EventResult, bluer::Error> {
    let device = adapter.device(address)?;
    let identity = MacAddress::from(address);

    let Some(rssi) = device.rssi().await? else {
        return Ok(Err(EventError::MissingRssi(identity)));
    };
    let local_name = device.name().await?;

    Ok(Ok(AdvertisementEvent::new(
        identity,
        local_name,
        rssi,
        SystemTime::now(),
    )))
}
