use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::{SinkExt, StreamExt};
use futures::channel::mpsc::{channel, Sender};
use futures::stream::BoxStream;
use indexmap::{IndexMap, IndexSet};
use log::{debug, info, warn};
use tokio::spawn;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;

use crate::device::constants::{
    make_heart_rate_measurement_uuid, make_heart_rate_service_uuid, CONNECT_DEADLINE,
    DEFAULT_SCAN_DURATION, DISCOVER_DEADLINE, FACTORY_DEFAULT_PIN, IS_CONNECTED_DEADLINE,
    LINK_POLL_DELAY, SCAN_POLL_DELAY,
};
use crate::device::heart_rate::parse_heart_rate_measurement;
use crate::device::stack::PeripheralStack;
use crate::device::types::{LinkEvent, PermissionState, ScanBatch};
use crate::error::{DeviceError, ScanError, TelemetryError};
use crate::session::types::{DeviceId, DeviceStatus, DiscoveredDevice, Pin};

struct BtleInner {
    // created on first use; creating the manager is what makes the OS ask for permission
    manager: OnceCell<Manager>,
    // peripherals seen by any scan, so that connect() can find them by identifier
    peripherals: Mutex<IndexMap<DeviceId, Peripheral>>,
    scan_duration: Duration,
}

/// [`PeripheralStack`] on top of btleplug.
///
/// Scan and link streams are driven by tasks spawned on the current tokio runtime.
#[derive(Clone)]
pub struct BtleStack {
    inner: Arc<BtleInner>,
}

impl BtleStack {
    pub fn new() -> Self {
        Self::with_scan_duration(Duration::from_millis(DEFAULT_SCAN_DURATION))
    }

    pub fn with_scan_duration(scan_duration: Duration) -> Self {
        BtleStack {
            inner: Arc::new(BtleInner {
                manager: OnceCell::new(),
                peripherals: Mutex::new(IndexMap::new()),
                scan_duration,
            }),
        }
    }
}

impl Default for BtleStack {
    fn default() -> Self {
        Self::new()
    }
}

async fn emit<T>(sender: &mut Sender<T>, value: T) -> bool {
    // a closed channel means the session lost interest (superseded scan or link)
    sender.send(value).await.is_ok()
}

impl BtleInner {
    async fn manager(&self) -> Result<&Manager, DeviceError> {
        self.manager.get_or_try_init(|| async {
            info!("Initializing bluetooth manager");
            Manager::new().await.map_err(DeviceError::from)
        }).await
    }

    async fn adapters(&self) -> Result<Vec<Adapter>, DeviceError> {
        let adapters = self.manager().await?.adapters().await?;
        if adapters.is_empty() {
            return Err(DeviceError::NoAdapter);
        }
        Ok(adapters)
    }

    async fn start_scanning(&self) -> Result<Vec<Adapter>, DeviceError> {
        let adapters = self.adapters().await?;

        for adapter in &adapters {
            info!("Scanning using adapter {}...", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
            adapter.start_scan(ScanFilter::default()).await?;
        }

        Ok(adapters)
    }

    async fn find_peripherals(&self, adapters: &[Adapter]) -> Vec<(DiscoveredDevice, Peripheral)> {
        let mut found = Vec::new();

        for adapter in adapters {
            let peripherals = match adapter.peripherals().await {
                Ok(v) => v,
                Err(err) => {
                    warn!("Failed to query BLE adapter for peripherals: {}", err);
                    continue;
                },
            };

            for peripheral in peripherals {
                match peripheral.properties().await {
                    Err(err) => {
                        warn!("Could not query peripheral for properties: {:?}", err);
                    },
                    Ok(None) => {
                        debug!("Peripheral has no properties");
                    },
                    Ok(Some(properties)) => {
                        // nameless peripherals can never match a configured device name
                        if let Some(name) = properties.local_name {
                            let device = DiscoveredDevice {
                                name,
                                identifier: DeviceId(peripheral.id().to_string()),
                            };
                            found.push((device, peripheral));
                        }
                    },
                }
            }
        }

        found
    }

    async fn run_scan(&self, cancel: CancellationToken, mut sender: Sender<ScanBatch>) {
        let adapters = match self.start_scanning().await {
            Ok(adapters) => adapters,
            Err(err) => {
                warn!("Scanning failed {:?}", err);
                let err = if err.is_permission_denied() { ScanError::PermissionDenied } else { ScanError::from(err) };
                emit(&mut sender, Err(err)).await;
                return;
            },
        };

        let mut reported: IndexSet<DeviceId> = IndexSet::new();
        let deadline = sleep(self.scan_duration);
        tokio::pin!(deadline);

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Scan cancelled");
                    break 'mainloop;
                },
                _ = &mut deadline => {
                    info!("Scan finished, {} device(s) found", reported.len());
                    break 'mainloop;
                },
                _ = sleep(Duration::from_millis(SCAN_POLL_DELAY)) => {
                    let mut batch = Vec::new();

                    for (device, peripheral) in self.find_peripherals(&adapters).await {
                        self.peripherals.lock()
                            .expect("Failed to lock peripheral registry")
                            .insert(device.identifier.clone(), peripheral);

                        if reported.insert(device.identifier.clone()) {
                            info!("Discovered {} {}", device.name, device.identifier);
                            batch.push(device);
                        }
                    }

                    if !batch.is_empty() && !emit(&mut sender, Ok(batch)).await {
                        break 'mainloop;
                    }
                },
            }
        }

        for adapter in &adapters {
            if let Err(err) = adapter.stop_scan().await {
                warn!("Failed to stop scanning: {:?}", err);
            }
        }
    }

    async fn connect_peripheral(&self, peripheral: &Peripheral) -> Result<(), DeviceError> {
        info!("Connecting to peripheral...");
        timeout(Duration::from_millis(CONNECT_DEADLINE), peripheral.connect())
            .await
            .map_err(|_| DeviceError::Deadline("Connecting"))??;
        Ok(())
    }

    async fn discover_heart_rate(&self, peripheral: &Peripheral) -> Result<Option<Characteristic>, DeviceError> {
        let heart_rate_service_uuid = make_heart_rate_service_uuid();
        let heart_rate_measurement_uuid = make_heart_rate_measurement_uuid();

        info!("Connected; Discovering services...");
        timeout(Duration::from_millis(DISCOVER_DEADLINE), peripheral.discover_services())
            .await
            .map_err(|_| DeviceError::Deadline("Discovering services"))??;

        for service in peripheral.services() {
            if !service.uuid.eq(&heart_rate_service_uuid) {
                continue;
            }

            for characteristic in &service.characteristics {
                if !characteristic.uuid.eq(&heart_rate_measurement_uuid) {
                    continue;
                }

                info!("Subscribing to characteristic {:?} {:?}", service.uuid, characteristic.uuid);
                peripheral.subscribe(characteristic).await?;
                return Ok(Some(characteristic.clone()));
            }
        }

        Ok(None)
    }

    async fn is_connected(&self, peripheral: &Peripheral) -> bool {
        tokio::select! {
            _ = sleep(Duration::from_millis(IS_CONNECTED_DEADLINE)) => {
                // macOS
                warn!("Checking for connection status took too long");
                false
            }
            result = peripheral.is_connected() => match result {
                Err(err) => {
                    warn!("Error checking for connection state: {:?}", err);
                    false
                },
                Ok(connected) => connected,
            }
        }
    }

    async fn run_link(&self, device: DiscoveredDevice, pin: Pin, cancel: CancellationToken, mut sender: Sender<LinkEvent>) {
        if !emit(&mut sender, LinkEvent::Status(DeviceStatus::Connecting)).await {
            return;
        }

        let peripheral = self.peripherals.lock()
            .expect("Failed to lock peripheral registry")
            .get(&device.identifier)
            .cloned();

        let peripheral = match peripheral {
            Some(peripheral) => peripheral,
            None => {
                warn!("{}", DeviceError::UnknownDevice(device.identifier.to_string()));
                emit(&mut sender, LinkEvent::Status(DeviceStatus::Disconnected)).await;
                return;
            },
        };

        let connected = tokio::select! {
            _ = cancel.cancelled() => false,
            result = self.connect_peripheral(&peripheral) => match result {
                Ok(()) => true,
                Err(err) => {
                    warn!("Connecting to peripheral failed: {:?}", err);
                    false
                },
            },
        };
        if !connected {
            emit(&mut sender, LinkEvent::Status(DeviceStatus::Disconnected)).await;
            return;
        }

        if !emit(&mut sender, LinkEvent::Status(DeviceStatus::Connected)).await {
            self.disconnect(&peripheral).await;
            return;
        }

        // authorizing with the pin is device specific; a generic peripheral accepts every
        // pin except the factory default, which must be changed first
        if pin.as_str() == FACTORY_DEFAULT_PIN {
            info!("Peripheral still uses the factory default pin");
            emit(&mut sender, LinkEvent::Status(DeviceStatus::PinChangeRequired)).await;
            self.disconnect(&peripheral).await;
            return;
        }

        let heart_rate_char = match self.discover_heart_rate(&peripheral).await {
            Ok(v) => v,
            Err(err) => {
                warn!("Service discovery failed: {:?}", err);
                self.disconnect(&peripheral).await;
                emit(&mut sender, LinkEvent::Status(DeviceStatus::Disconnected)).await;
                return;
            },
        };

        let notifications_cancel = cancel.child_token();
        let mut notifications_task_handle = None;

        match heart_rate_char {
            Some(_) => {
                notifications_task_handle = Some(read_notifications_task(notifications_cancel.clone(), &peripheral, sender.clone()));
            },
            None => {
                info!("Peripheral has no heart rate sensor");
                emit(&mut sender, LinkEvent::HeartRate(Err(TelemetryError::SensorUnavailable))).await;
            },
        }

        info!("Peripheral ready");
        if emit(&mut sender, LinkEvent::Status(DeviceStatus::Ready)).await {
            'mainloop: loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        break 'mainloop;
                    },
                    _ = sleep(Duration::from_millis(LINK_POLL_DELAY)) => {
                        if !self.is_connected(&peripheral).await {
                            warn!("Connection lost");
                            break 'mainloop;
                        }
                    },
                }
            }
        }

        notifications_cancel.cancel();
        if let Some(handle) = notifications_task_handle.take() {
            info!("Waiting for read notifications task to stop");
            match handle.await {
                Ok(Err(err)) => warn!("Error during read notifications task: {:?}", err),
                Err(err) => warn!("Failed to join read notifications task: {:?}", err),
                Ok(Ok(())) => info!("Read notifications task stopped"),
            }
        }

        self.disconnect(&peripheral).await;
        emit(&mut sender, LinkEvent::Status(DeviceStatus::Disconnected)).await;
    }

    async fn disconnect(&self, peripheral: &Peripheral) {
        if let Err(err) = peripheral.disconnect().await {
            debug!("Failed to disconnect peripheral: {:?}", err);
        }
    }
}

fn read_notifications_task(cancel: CancellationToken, peripheral: &Peripheral, mut sender: Sender<LinkEvent>) -> JoinHandle<Result<(), DeviceError>> {
    let peripheral_clone = peripheral.clone();
    let heart_rate_measurement_uuid = make_heart_rate_measurement_uuid();

    return spawn(async move {
        let mut notification_stream = peripheral_clone.notifications().await?;
        let mut previous_value: Option<Result<u16, TelemetryError>> = None;

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                notification = notification_stream.next() => {
                    let Some(data) = notification else {
                        break 'mainloop;
                    };

                    if data.uuid.eq(&heart_rate_measurement_uuid) {
                        let value = parse_heart_rate_measurement(data.value.as_slice());
                        if let Err(err) = &value {
                            debug!("Heart rate measurement not usable: {}", err);
                        }

                        // avoid unnecessary updates
                        if previous_value.as_ref() != Some(&value) {
                            previous_value = Some(value.clone());
                            if !emit(&mut sender, LinkEvent::HeartRate(value)).await {
                                break 'mainloop;
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    });
}

#[async_trait]
impl PeripheralStack for BtleStack {
    async fn request_permission(&self) -> Result<PermissionState, DeviceError> {
        match self.inner.adapters().await {
            Ok(_) => Ok(PermissionState::Granted),
            // access was granted, there is just no radio to use
            Err(DeviceError::NoAdapter) => Ok(PermissionState::Granted),
            Err(err) if err.is_permission_denied() => Ok(PermissionState::Denied),
            Err(err) => Err(err),
        }
    }

    async fn bluetooth_is_on(&self) -> bool {
        match self.inner.adapters().await {
            Ok(_) => true,
            Err(err) => {
                info!("Bluetooth is not available: {}", err);
                false
            },
        }
    }

    fn scan(&self, cancel: CancellationToken) -> BoxStream<'static, ScanBatch> {
        let (sender, receiver) = channel::<ScanBatch>(16);
        let inner = self.inner.clone();

        spawn(async move {
            inner.run_scan(cancel, sender).await;
        });

        receiver.boxed()
    }

    fn connect(&self, device: DiscoveredDevice, pin: Pin, cancel: CancellationToken) -> BoxStream<'static, LinkEvent> {
        let (sender, receiver) = channel::<LinkEvent>(64);
        let inner = self.inner.clone();

        spawn(async move {
            inner.run_link(device, pin, cancel, sender).await;
        });

        receiver.boxed()
    }
}
