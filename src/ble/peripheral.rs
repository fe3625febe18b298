//! btleplug implementation of the scale transport.
//!
//! [`BtleplugConnector`] finds a scale by hardware address, connects and
//! resolves the notify/command characteristics; [`BtleplugChannel`] carries
//! the session traffic over them.

use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::future;
use futures::stream::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::transport::{NotificationStream, ScaleChannel, ScaleConnector, SubscriptionHandle};
use crate::ble::uuids::GattProfile;
use crate::error::{Error, Result};

/// Connects to scales through the first Bluetooth adapter.
pub struct BtleplugConnector {
    /// The BLE adapter to scan and connect with.
    adapter: Adapter,
    /// Characteristics to resolve after connecting.
    profile: GattProfile,
    /// How long to scan for the requested address.
    scan_timeout: Duration,
    /// Write type used for commands.
    write_type: WriteType,
}

impl BtleplugConnector {
    /// Default time to scan for the scale before giving up.
    pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

    /// Create a connector on the first available adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter))
    }

    /// Create a connector on a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            profile: GattProfile::default(),
            scan_timeout: Self::DEFAULT_SCAN_TIMEOUT,
            write_type: WriteType::WithResponse,
        }
    }

    /// Use a different service/characteristic layout.
    pub fn with_profile(mut self, profile: GattProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Change how long to scan for the scale.
    pub fn with_scan_timeout(mut self, scan_timeout: Duration) -> Self {
        self.scan_timeout = scan_timeout;
        self
    }

    /// Write commands without waiting for a response.
    pub fn without_write_response(mut self) -> Self {
        self.write_type = WriteType::WithoutResponse;
        self
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Scan until a peripheral with the given address is seen.
    async fn find_peripheral(&self, address: BDAddr) -> Result<Peripheral> {
        let mut events = self.adapter.events().await.map_err(Error::Bluetooth)?;

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(Error::Bluetooth)?;

        debug!("Scanning for scale {}", address);

        let search = async {
            // The adapter may already know the device from an earlier scan.
            if let Ok(known) = self.adapter.peripherals().await {
                if let Some(peripheral) = known.into_iter().find(|p| p.address() == address) {
                    return Some(peripheral);
                }
            }

            while let Some(event) = events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => continue,
                };

                match self.adapter.peripheral(&id).await {
                    Ok(peripheral) if peripheral.address() == address => return Some(peripheral),
                    Ok(_) => {}
                    Err(e) => trace!("Failed to get peripheral: {}", e),
                }
            }

            None
        };

        let found = tokio::time::timeout(self.scan_timeout, search)
            .await
            .ok()
            .flatten();

        if let Err(e) = self.adapter.stop_scan().await {
            debug!("Failed to stop scan: {}", e);
        }

        found.ok_or_else(|| Error::DeviceNotFound {
            address: address.to_string(),
        })
    }

    /// Find a characteristic of the configured service.
    fn find_characteristic(
        peripheral: &Peripheral,
        service: Uuid,
        uuid: Uuid,
    ) -> Result<Characteristic> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid && c.service_uuid == service)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })
    }

    /// Connect, discover services and resolve both characteristics.
    async fn open_channel(&self, peripheral: &Peripheral) -> Result<BtleplugChannel> {
        if !peripheral.is_connected().await.unwrap_or(false) {
            peripheral
                .connect()
                .await
                .map_err(|e| Error::ConnectionFailed {
                    reason: e.to_string(),
                })?;
        }

        peripheral.discover_services().await.map_err(Error::Bluetooth)?;

        let notify =
            Self::find_characteristic(peripheral, self.profile.service, self.profile.notify)?;
        let command =
            Self::find_characteristic(peripheral, self.profile.service, self.profile.command)?;

        debug!(
            "Resolved notify {} ({:?}) and command {} ({:?})",
            notify.uuid, notify.properties, command.uuid, command.properties
        );

        Ok(BtleplugChannel {
            peripheral: peripheral.clone(),
            notify,
            command,
            write_type: self.write_type,
            next_subscription: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl ScaleConnector for BtleplugConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn ScaleChannel>> {
        let bd_addr: BDAddr = address.parse().map_err(|_| Error::InvalidParameter {
            name: "address".to_string(),
            value: address.to_string(),
        })?;

        let peripheral = self.find_peripheral(bd_addr).await?;

        info!("Connecting to scale {}", bd_addr);

        match self.open_channel(&peripheral).await {
            Ok(channel) => {
                info!("Connected to scale {}", bd_addr);
                Ok(Arc::new(channel))
            }
            Err(e) => {
                // Release the half-open link so the next attempt starts clean.
                if let Err(disconnect_err) = peripheral.disconnect().await {
                    debug!("Failed to disconnect after setup error: {}", disconnect_err);
                }
                Err(e)
            }
        }
    }
}

/// A connected scale peripheral.
pub struct BtleplugChannel {
    /// The connected peripheral.
    peripheral: Peripheral,
    /// Characteristic the scale notifies on.
    notify: Characteristic,
    /// Characteristic commands are written to.
    command: Characteristic,
    /// Write type used for commands.
    write_type: WriteType,
    /// Subscription id counter.
    next_subscription: AtomicU64,
}

impl BtleplugChannel {
    /// Get the peripheral.
    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }
}

#[async_trait]
impl ScaleChannel for BtleplugChannel {
    async fn write_command(&self, data: &[u8]) -> Result<()> {
        self.peripheral
            .write(&self.command, data, self.write_type)
            .await
            .map_err(|e| Error::WriteFailed {
                reason: e.to_string(),
            })?;

        trace!("Wrote {} bytes to characteristic {}", data.len(), self.command.uuid);

        Ok(())
    }

    async fn subscribe_notifications(&self) -> Result<(SubscriptionHandle, NotificationStream)> {
        // Take the stream before subscribing so the first handshake packet is not missed.
        let notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(Error::Bluetooth)?;

        self.peripheral
            .subscribe(&self.notify)
            .await
            .map_err(Error::Bluetooth)?;

        debug!("Subscribed to notifications from {}", self.notify.uuid);

        let uuid = self.notify.uuid;
        let stream: NotificationStream = Box::pin(
            notifications.filter_map(move |n| future::ready((n.uuid == uuid).then_some(n.value))),
        );

        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        Ok((SubscriptionHandle::new(id), stream))
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()> {
        self.peripheral
            .unsubscribe(&self.notify)
            .await
            .map_err(Error::Bluetooth)?;

        debug!(
            "Unsubscribed from notifications from {} (subscription {})",
            self.notify.uuid,
            handle.id()
        );

        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        match self.peripheral.disconnect().await {
            Ok(_) => {
                info!("Disconnected from scale {}", self.peripheral.address());
                Ok(())
            }
            Err(e) => {
                warn!("Failed to disconnect: {}", e);
                Err(Error::Bluetooth(e))
            }
        }
    }
}
