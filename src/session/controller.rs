//! The screen logic: reacts to session and device status changes by logging in,
//! finding the configured wristband, connecting to it and starting telemetry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use chrono::Utc;
use log::{debug, info, warn};
use tokio::time::Duration;

use crate::config::types::{Config, KnownDevice};
use crate::session::facade::{DeviceSessionFacade, HeartRateEvent};
use crate::session::observer::ObserverHandle;
use crate::session::telemetry::TelemetryPoll;
use crate::session::types::{
    Credentials, DeviceStatus, DiscoveredDevice, Pin, SessionStatus, UserKind,
};

/// Everything the screen displays, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    SessionStatus(SessionStatus),
    DeviceStatus(DeviceStatus),
    HeartRate(Option<u16>),
    Steps(Option<u32>),
    DeviceDiscovered(DiscoveredDevice),
    ScanFinished,
    DeviceRemembered(KnownDevice),
    Notice(String),
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub credentials: Credentials,
    pub target_name: String,
    pub pin_code: String,
    pub known_device: Option<KnownDevice>,
    pub poll_interval: Duration,
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        ControllerSettings {
            credentials: config.account.credentials(),
            target_name: config.device.target_name.clone(),
            pin_code: config.device.pin_code.clone(),
            known_device: config.device.known_device.clone(),
            poll_interval: Duration::from_secs(config.telemetry.poll_interval_secs),
        }
    }

    fn matches(&self, device: &DiscoveredDevice, kind: Option<UserKind>) -> bool {
        if !self.target_name.is_empty() && device.name == self.target_name {
            return true;
        }

        // an existing user reconnects to the remembered device, even if it was renamed
        match (&self.known_device, kind) {
            (Some(known), Some(UserKind::ExistingUser)) => known.identifier == device.identifier,
            _ => false,
        }
    }
}

type Sink = Arc<dyn Fn(ControllerEvent) + Send + Sync + 'static>;

#[derive(Default)]
struct ControllerState {
    session_observer: Option<ObserverHandle<SessionStatus>>,
    device_observer: Option<ObserverHandle<DeviceStatus>>,
    heart_rate_observer: Option<ObserverHandle<HeartRateEvent>>,
    telemetry_poll: Option<TelemetryPoll>,
    user_kind: Option<UserKind>,
    last_device: Option<DiscoveredDevice>,
}

pub struct SessionController {
    facade: DeviceSessionFacade,
    settings: Mutex<ControllerSettings>,
    sink: Sink,
    state: Mutex<ControllerState>,
}

impl SessionController {
    pub fn new<F>(facade: DeviceSessionFacade, settings: ControllerSettings, sink: F) -> Arc<Self>
    where
        F: Fn(ControllerEvent) + Send + Sync + 'static,
    {
        Arc::new(SessionController {
            facade,
            settings: Mutex::new(settings),
            sink: Arc::new(sink),
            state: Mutex::new(ControllerState::default()),
        })
    }

    pub fn start(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let handle = self.facade.subscribe_session_status(move |status| {
            if let Some(controller) = weak.upgrade() {
                controller.on_session_status(status);
            }
        });
        self.lock_state().session_observer = Some(handle);

        let facade = self.facade.clone();
        self.facade.runtime().spawn(async move {
            facade.initialize().await;
        });
    }

    /// Disposes every observer and stops the telemetry poll.
    pub fn shutdown(&self) {
        let mut state = self.lock_state();

        if let Some(handle) = state.session_observer.take() {
            handle.dispose();
        }
        if let Some(handle) = state.device_observer.take() {
            handle.dispose();
        }
        if let Some(handle) = state.heart_rate_observer.take() {
            handle.dispose();
        }
        if let Some(poll) = state.telemetry_poll.take() {
            poll.stop();
        }
        info!("Session controller stopped");
    }

    pub fn login(self: &Arc<Self>) {
        let credentials = self.lock_settings().credentials.clone();
        let weak = Arc::downgrade(self);
        let facade = self.facade.clone();

        self.facade.runtime().spawn(async move {
            match facade.authenticate(credentials).await {
                Ok(_) => info!("We have successfully logged in"),
                Err(err) => {
                    if let Some(controller) = weak.upgrade() {
                        controller.emit(ControllerEvent::Notice(format!("Login failed: {}", err)));
                    }
                },
            }
        });
    }

    /// Scans and connects to the first device matching the configured name (or the
    /// remembered device of an existing user). At most one connect per scan.
    pub fn scan_for_target(self: &Arc<Self>) {
        let has_target = {
            let settings = self.lock_settings();
            !settings.target_name.is_empty() || settings.known_device.is_some()
        };
        if !has_target {
            self.emit(ControllerEvent::Notice("No device name is configured, only listing nearby devices".to_string()));
        }

        let weak = Arc::downgrade(self);
        let connect_requested = AtomicBool::new(false);

        self.facade.scan(move |devices, finished, error| {
            let Some(controller) = weak.upgrade() else {
                return;
            };

            if let Some(error) = error {
                warn!("got error {}", error);
                controller.emit(ControllerEvent::Notice(format!("Scan problem: {}", error)));
            }

            let kind = controller.lock_state().user_kind;
            for device in devices {
                info!("name: {} | id: {}", device.name, device.identifier);
                controller.emit(ControllerEvent::DeviceDiscovered(device.clone()));

                let matched = controller.lock_settings().matches(&device, kind);
                if matched && !connect_requested.swap(true, Ordering::SeqCst) {
                    if controller.is_linked_to(&device) {
                        info!("Already linked to {}, keeping the link", device.name);
                    } else {
                        // we found our device and can connect to it
                        controller.connect(device);
                    }
                    break;
                }
            }

            if finished {
                info!("scan operation is finished");
                controller.emit(ControllerEvent::ScanFinished);
            }
        });
    }

    pub fn connect(&self, device: DiscoveredDevice) {
        let pin_code = self.lock_settings().pin_code.clone();

        match pin_code.parse::<Pin>() {
            Ok(pin) => {
                self.lock_state().last_device = Some(device.clone());
                self.facade.connect(device, pin);
            },
            Err(err) => {
                warn!("Configured pin is not usable: {}", err);
                self.emit(ControllerEvent::Notice(format!("Can not connect to {}: {}", device.name, err)));
            },
        }
    }

    fn is_linked_to(&self, device: &DiscoveredDevice) -> bool {
        let is_last_device = self.lock_state().last_device.as_ref()
            .map_or(false, |last| last.identifier == device.identifier);

        is_last_device && self.facade.device_status().has_link()
    }

    /// Retries the last device with another pin.
    pub fn submit_pin(&self, pin_code: &str) {
        self.lock_settings().pin_code = pin_code.trim().to_string();

        let last_device = self.lock_state().last_device.clone();
        match last_device {
            Some(device) => self.connect(device),
            None => self.emit(ControllerEvent::Notice("No device to send the pin to, scan first".to_string())),
        }
    }

    fn on_session_status(self: &Arc<Self>, status: SessionStatus) {
        self.emit(ControllerEvent::SessionStatus(status));

        match status {
            SessionStatus::Uninitialized => {
                info!("Session is not ready yet");
            },
            SessionStatus::AuthenticationRequired => {
                info!("Session is not authorized, logging in");
                self.login();
            },
            SessionStatus::ProfileIncomplete => {
                info!("User profile is incomplete, it must be completed before continuing with this user");
                self.emit(ControllerEvent::Notice("Your profile is incomplete. Complete it, or log in as another user.".to_string()));
            },
            SessionStatus::Ready(kind) => {
                match kind {
                    UserKind::NewUser => info!("Session is ready. User has not connected a device before"),
                    UserKind::ExistingUser => info!("Session is ready. User has connected a device before, reconnecting to it"),
                }
                self.lock_state().user_kind = Some(kind);
                self.prepare_bluetooth();
            },
            SessionStatus::NetworkRequired => {
                info!("Session needs a network connection to continue");
                self.emit(ControllerEvent::Notice("A network connection is required to continue.".to_string()));
            },
        }
    }

    fn prepare_bluetooth(self: &Arc<Self>) {
        {
            let mut state = self.lock_state();
            if state.device_observer.is_none() {
                let weak = Arc::downgrade(self);
                state.device_observer = Some(self.facade.subscribe_device_status(move |status| {
                    if let Some(controller) = weak.upgrade() {
                        controller.on_device_status(status);
                    }
                }));
            }
        }

        self.scan_for_target();
    }

    fn on_device_status(self: &Arc<Self>, status: DeviceStatus) {
        self.emit(ControllerEvent::DeviceStatus(status));

        match status {
            DeviceStatus::Ready => {
                info!("Device is connected and ready, synchronization starts automatically");
                self.facade.set_auto_connect(true);
                self.start_observers();
                self.remember_device();
            },
            DeviceStatus::Disconnected => {
                info!("Device is disconnected");
            },
            DeviceStatus::PinChangeRequired => {
                info!("Device is connected with its factory pin, which must be changed before use");
                self.emit(ControllerEvent::Notice("The device still uses its factory pin. Change the pin on the device, then enter the new pin.".to_string()));
            },
            DeviceStatus::PinRequired(attempts) => {
                info!("Pin was not accepted ({} attempts), another pin must be entered", attempts);
            },
            DeviceStatus::CriticalUpdateRequired => {
                info!("Device is connected, but its firmware must be updated before use");
                self.emit(ControllerEvent::Notice("The device firmware must be updated before it can be used.".to_string()));
            },
            DeviceStatus::UnregisteredOnServer => {
                info!("Device is not registered on the server, this can not be fixed automatically");
                self.emit(ControllerEvent::Notice("This device is not registered. Please contact support.".to_string()));
            },
            DeviceStatus::Connected => {
                info!("Radio link established, authorizing and checking the device");
            },
            DeviceStatus::Connecting => {
                debug!("Connecting to device");
            },
        }
    }

    fn start_observers(self: &Arc<Self>) {
        let mut state = self.lock_state();

        if state.heart_rate_observer.is_none() {
            let weak = Arc::downgrade(self);
            state.heart_rate_observer = Some(self.facade.subscribe_heart_rate(move |event| {
                let Some(controller) = weak.upgrade() else {
                    return;
                };

                let heart_rate = match event {
                    Ok(sample) => sample.heart_rate,
                    Err(err) => {
                        info!("got error instead of heart rate: {}", err);
                        None
                    },
                };
                controller.emit(ControllerEvent::HeartRate(heart_rate));
            }));
        }

        if state.telemetry_poll.is_none() {
            let interval = self.lock_settings().poll_interval;
            let weak: Weak<Self> = Arc::downgrade(self);

            state.telemetry_poll = Some(self.facade.poll_aggregate_telemetry(interval, move |sample| {
                if let Some(controller) = weak.upgrade() {
                    controller.emit(ControllerEvent::Steps(sample.step_count));
                }
            }));
        }
    }

    fn remember_device(&self) {
        let Some(device) = self.lock_state().last_device.clone() else {
            return;
        };

        let known = KnownDevice {
            identifier: device.identifier,
            name: device.name,
            last_connected: Utc::now(),
        };
        self.lock_settings().known_device = Some(known.clone());
        self.emit(ControllerEvent::DeviceRemembered(known));
    }

    fn emit(&self, event: ControllerEvent) {
        (self.sink)(event);
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ControllerState> {
        self.state.lock().expect("Failed to lock controller state")
    }

    fn lock_settings(&self) -> std::sync::MutexGuard<'_, ControllerSettings> {
        self.settings.lock().expect("Failed to lock controller settings")
    }
}
