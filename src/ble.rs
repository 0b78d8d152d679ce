//! BLE transport using btleplug.
//!
//! Scans for devices advertising a known printer name and drives one over
//! the TX/RX characteristics of the print service.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::model::Model;
use crate::protocol::{RX_CHARACTERISTIC, TX_CHARACTERISTIC};
use crate::transport::{NotifyCallback, Transport};
use crate::{CatPrinterError, Result};

fn ble_error(err: btleplug::Error) -> CatPrinterError {
    CatPrinterError::Transport(err.to_string())
}

/// A printer found by [`scan`].
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Platform identifier (address on Linux, UUID on macOS).
    pub id: String,
    /// Advertised name.
    pub name: String,
    /// Model resolved from the name.
    pub model: Model,
    peripheral: Peripheral,
}

async fn first_adapter() -> Result<Adapter> {
    let manager = Manager::new().await.map_err(ble_error)?;
    manager
        .adapters()
        .await
        .map_err(ble_error)?
        .into_iter()
        .next()
        .ok_or_else(|| CatPrinterError::Transport("No BLE adapter found".into()))
}

/// Scan for `timeout` and return every device advertising a known model name.
pub async fn scan(timeout: Duration) -> Result<Vec<DeviceInfo>> {
    let adapter = first_adapter().await?;
    tracing::info!(?timeout, "starting BLE scan");
    let mut events = adapter.events().await.map_err(ble_error)?;
    adapter.start_scan(ScanFilter::default()).await.map_err(ble_error)?;

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let mut found = Vec::new();
    let mut seen = HashSet::new();
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.next() => {
                let Some(event) = event else { break };
                let (CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id)) = event else {
                    continue;
                };
                if seen.contains(&id) {
                    continue;
                }
                let Ok(peripheral) = adapter.peripheral(&id).await else { continue };
                let Ok(Some(props)) = peripheral.properties().await else { continue };
                let Some(name) = props.local_name else { continue };
                let Some(model) = Model::from_name(&name) else { continue };
                tracing::info!(%name, %model, id = %id, "found printer");
                seen.insert(id.clone());
                found.push(DeviceInfo {
                    id: id.to_string(),
                    name,
                    model,
                    peripheral,
                });
            }
        }
    }

    adapter.stop_scan().await.map_err(ble_error)?;
    tracing::info!(count = found.len(), "BLE scan complete");
    Ok(found)
}

/// Scan until a device whose id or name equals `id_or_name` shows up.
pub async fn find(id_or_name: &str, timeout: Duration) -> Result<DeviceInfo> {
    scan(timeout)
        .await?
        .into_iter()
        .find(|d| d.id == id_or_name || d.name == id_or_name)
        .ok_or_else(|| CatPrinterError::Transport(format!("printer {id_or_name:?} not found")))
}

/// [`Transport`] over a BLE peripheral.
pub struct BleTransport {
    peripheral: Peripheral,
    tx: Option<Characteristic>,
    rx: Option<Characteristic>,
    pump: Option<JoinHandle<()>>,
}

impl BleTransport {
    pub fn new(device: &DeviceInfo) -> Self {
        Self {
            peripheral: device.peripheral.clone(),
            tx: None,
            rx: None,
            pump: None,
        }
    }

    fn characteristic(&self, uuid: Uuid) -> Result<&Characteristic> {
        [&self.tx, &self.rx]
            .into_iter()
            .flatten()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| CatPrinterError::Transport(format!("characteristic {uuid} not available")))
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn connect(&mut self) -> Result<()> {
        tracing::info!(id = %self.peripheral.id(), "connecting to printer");
        self.peripheral.connect().await.map_err(ble_error)?;
        self.peripheral.discover_services().await.map_err(ble_error)?;
        let characteristics = self.peripheral.characteristics();
        let lookup = |uuid: Uuid| {
            characteristics
                .iter()
                .find(|c| c.uuid == uuid)
                .cloned()
                .ok_or_else(|| CatPrinterError::Transport(format!("missing characteristic {uuid}")))
        };
        self.tx = Some(lookup(TX_CHARACTERISTIC)?);
        self.rx = Some(lookup(RX_CHARACTERISTIC)?);
        tracing::debug!("discovered print characteristics");
        Ok(())
    }

    async fn write(&mut self, characteristic: Uuid, data: &[u8]) -> Result<()> {
        let target = self.characteristic(characteristic)?;
        self.peripheral
            .write(target, data, WriteType::WithoutResponse)
            .await
            .map_err(ble_error)
    }

    async fn subscribe(&mut self, characteristic: Uuid, callback: NotifyCallback) -> Result<()> {
        let target = self.characteristic(characteristic)?.clone();
        let mut notifications = self.peripheral.notifications().await.map_err(ble_error)?;
        self.peripheral.subscribe(&target).await.map_err(ble_error)?;
        if let Some(previous) = self.pump.take() {
            previous.abort();
        }
        self.pump = Some(tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid == characteristic {
                    callback(&notification.value);
                }
            }
            tracing::debug!("notification stream ended");
        }));
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(rx) = self.rx.take() {
            if let Err(err) = self.peripheral.unsubscribe(&rx).await {
                tracing::debug!(error = %err, "unsubscribe failed");
            }
        }
        self.tx = None;
        self.peripheral.disconnect().await.map_err(ble_error)
    }
}

impl Drop for BleTransport {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}
