//! The device session facade.
//!
//! One [`DeviceSessionFacade`] owns one session: the authentication status, one
//! link to a peripheral and the observers of both. The collaborators that do the
//! real work (an [`AuthService`] and a [`PeripheralStack`]) are injected, as is the
//! [`Dispatcher`] that runs observer callbacks on the display thread.
//!
//! Session and device lifecycles are independent: a ready session does not mean a
//! device is connected, and losing the device does not touch the session.

use std::sync::{Arc, Mutex};
use chrono::Local;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::runtime::Handle;
use tokio::sync::OnceCell;
use tokio::time::{interval_at, sleep, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::device::constants::RECONNECT_DELAY;
use crate::device::stack::PeripheralStack;
use crate::device::types::{LinkEvent, PermissionState};
use crate::error::{AuthError, ScanError, TelemetryError};
use crate::session::auth::AuthService;
use crate::session::dispatch::Dispatcher;
use crate::session::observer::{ObserverHandle, ObserverSlot};
use crate::session::telemetry::{DailySummaryCache, TelemetryPoll};
use crate::session::types::{
    Credentials, DeviceId, DeviceStatus, DiscoveredDevice, Pin, Session, SessionStatus, TelemetrySample,
};

pub type HeartRateEvent = Result<TelemetrySample, TelemetryError>;

struct Observers {
    session: Arc<ObserverSlot<SessionStatus>>,
    device: Arc<ObserverSlot<DeviceStatus>>,
    heart_rate: Arc<ObserverSlot<HeartRateEvent>>,
}

struct ActiveLink {
    generation: u64,
    cancel: CancellationToken,
    device: DiscoveredDevice,
    pin: Pin,
    // opened by auto-connect; keeps retrying until ready or waiting for the user
    reconnecting: bool,
}

struct ActiveScan {
    generation: u64,
    cancel: CancellationToken,
}

struct FacadeState {
    session_status: SessionStatus,
    device_status: DeviceStatus,
    pin_attempts: u32,
    // device the pin attempts were counted for
    pin_device: Option<DeviceId>,
    auto_connect: bool,
    next_generation: u64,
    scan: Option<ActiveScan>,
    link: Option<ActiveLink>,
}

impl FacadeState {
    fn generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}

struct Inner {
    auth: Arc<dyn AuthService>,
    stack: Arc<dyn PeripheralStack>,
    dispatcher: Arc<dyn Dispatcher>,
    runtime: Handle,
    summaries: DailySummaryCache,
    observers: Observers,
    permission: OnceCell<Result<PermissionState, String>>,
    state: Mutex<FacadeState>,
}

#[derive(Clone)]
pub struct DeviceSessionFacade {
    inner: Arc<Inner>,
}

impl DeviceSessionFacade {
    pub fn new(
        auth: Arc<dyn AuthService>,
        stack: Arc<dyn PeripheralStack>,
        dispatcher: Arc<dyn Dispatcher>,
        runtime: Handle,
    ) -> Self {
        let state = FacadeState {
            session_status: SessionStatus::Uninitialized,
            device_status: DeviceStatus::Disconnected,
            pin_attempts: 0,
            pin_device: None,
            auto_connect: false,
            next_generation: 0,
            scan: None,
            link: None,
        };

        DeviceSessionFacade {
            inner: Arc::new(Inner {
                auth,
                stack,
                dispatcher,
                runtime,
                summaries: DailySummaryCache::new(),
                observers: Observers {
                    session: ObserverSlot::new("session status"),
                    device: ObserverSlot::new("device status"),
                    heart_rate: ObserverSlot::new("heart rate"),
                },
                permission: OnceCell::new(),
                state: Mutex::new(state),
            }),
        }
    }

    pub fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    pub fn session_status(&self) -> SessionStatus {
        self.lock_state().session_status
    }

    pub fn device_status(&self) -> DeviceStatus {
        self.lock_state().device_status
    }

    /// The cached daily activity summaries, filled while a device is linked.
    pub fn data_provider(&self) -> &DailySummaryCache {
        &self.inner.summaries
    }

    /// When enabled, a link that drops after reaching `Ready` is re-established. Failed
    /// attempts are retried every `RECONNECT_DELAY` until the link is ready again, the
    /// device waits for the user, or another `connect` supersedes it.
    pub fn set_auto_connect(&self, enabled: bool) {
        self.lock_state().auto_connect = enabled;
    }

    /// Publishes the session status restored by the authentication service.
    ///
    /// Bluetooth permission is not requested here but on the first scan or connect.
    pub async fn initialize(&self) {
        let status = self.inner.auth.restore().await;
        info!("Session initialized: {:?}", status);
        self.set_session_status(status);
    }

    /// Logs in. Failures leave every status untouched and are never retried here.
    pub async fn authenticate(&self, credentials: Credentials) -> Result<Session, AuthError> {
        match self.inner.auth.login(&credentials).await {
            Ok(session) => {
                info!("Logged in as {}", session.login);
                self.set_session_status(SessionStatus::Ready(session.kind));
                Ok(session)
            },
            Err(err) => {
                warn!("Login failed: {}", err);
                Err(err)
            },
        }
    }

    pub fn subscribe_session_status<F>(&self, observer: F) -> ObserverHandle<SessionStatus>
    where
        F: Fn(SessionStatus) + Send + Sync + 'static,
    {
        self.inner.observers.session.subscribe(observer)
    }

    pub fn subscribe_device_status<F>(&self, observer: F) -> ObserverHandle<DeviceStatus>
    where
        F: Fn(DeviceStatus) + Send + Sync + 'static,
    {
        self.inner.observers.device.subscribe(observer)
    }

    pub fn subscribe_heart_rate<F>(&self, observer: F) -> ObserverHandle<HeartRateEvent>
    where
        F: Fn(HeartRateEvent) + Send + Sync + 'static,
    {
        self.inner.observers.heart_rate.subscribe(observer)
    }

    /// Discovers nearby devices, reporting batches as they are found.
    ///
    /// Starting a new scan (or connecting) supersedes the running one. Every call ends
    /// with exactly one `is_finished = true` callback; errors are passed in-band and
    /// do not finish the scan by themselves.
    pub fn scan<F>(&self, on_update: F)
    where
        F: FnMut(Vec<DiscoveredDevice>, bool, Option<ScanError>) + Send + 'static,
    {
        let (generation, cancel) = {
            let mut state = self.lock_state();
            if let Some(previous) = state.scan.take() {
                debug!("Superseding scan {}", previous.generation);
                previous.cancel.cancel();
            }

            let generation = state.generation();
            let cancel = CancellationToken::new();
            state.scan = Some(ActiveScan { generation, cancel: cancel.clone() });
            (generation, cancel)
        };

        let on_update = Arc::new(Mutex::new(on_update));
        let facade = self.clone();

        self.inner.runtime.spawn(async move {
            let deliver = |devices: Vec<DiscoveredDevice>, finished: bool, error: Option<ScanError>| {
                let on_update = on_update.clone();
                facade.inner.dispatcher.dispatch(Box::new(move || {
                    let mut on_update = on_update.lock().expect("Failed to lock scan callback");
                    (*on_update)(devices, finished, error);
                }));
            };

            info!("Scan {} started", generation);
            let ready = match facade.ensure_permission().await {
                Err(err) => Err(err),
                Ok(()) => {
                    if facade.inner.stack.bluetooth_is_on().await {
                        Ok(())
                    } else {
                        Err(ScanError::BluetoothOff)
                    }
                },
            };

            match ready {
                Err(err) => {
                    warn!("Scan {} can not start: {}", generation, err);
                    deliver(Vec::new(), false, Some(err));
                },
                Ok(()) => {
                    let mut batches = facade.inner.stack.scan(cancel.clone());

                    'mainloop: loop {
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                break 'mainloop;
                            },
                            batch = batches.next() => match batch {
                                Some(Ok(devices)) => deliver(devices, false, None),
                                Some(Err(err)) => {
                                    warn!("Scan {} reported an error: {}", generation, err);
                                    deliver(Vec::new(), false, Some(err));
                                },
                                None => break 'mainloop,
                            },
                        }
                    }
                },
            }

            deliver(Vec::new(), true, None);
            info!("Scan {} finished", generation);

            let mut state = facade.lock_state();
            if state.scan.as_ref().map(|scan| scan.generation) == Some(generation) {
                state.scan = None;
            }
        });
    }

    /// Opens a link to `device`. The outcome is only reported on the device status channel.
    ///
    /// Any running scan is stopped and any previous link is dropped first.
    pub fn connect(&self, device: DiscoveredDevice, pin: Pin) {
        self.open_link(device, pin, false);
    }

    fn open_link(&self, device: DiscoveredDevice, pin: Pin, reconnecting: bool) {
        let (generation, cancel) = {
            let mut state = self.lock_state();

            if let Some(scan) = state.scan.take() {
                debug!("Stopping scan {} to connect", scan.generation);
                scan.cancel.cancel();
            }

            if let Some(previous) = state.link.take() {
                debug!("Dropping link {} to {}", previous.generation, previous.device.name);
                previous.cancel.cancel();
            }

            if state.pin_device.as_ref() != Some(&device.identifier) {
                state.pin_attempts = 0;
                state.pin_device = Some(device.identifier.clone());
            }

            if state.device_status.has_link() {
                self.transition(&mut state, DeviceStatus::Disconnected);
            }

            let generation = state.generation();
            let cancel = CancellationToken::new();
            state.link = Some(ActiveLink {
                generation,
                cancel: cancel.clone(),
                device: device.clone(),
                pin: pin.clone(),
                reconnecting,
            });
            self.transition(&mut state, DeviceStatus::Connecting);
            (generation, cancel)
        };

        info!("Connecting to {} ({})", device.name, device.identifier);
        let facade = self.clone();

        self.inner.runtime.spawn(async move {
            facade.run_link(generation, device, pin, cancel).await;
        });
    }

    /// Delivers the cached step count of today every `interval`.
    ///
    /// There is no push channel for activity data, so this polls the summary cache.
    /// Heart rate, which is pushed, should be observed with
    /// [`DeviceSessionFacade::subscribe_heart_rate`] instead. The poll runs until the
    /// returned guard is dropped.
    pub fn poll_aggregate_telemetry<F>(&self, interval: Duration, on_sample: F) -> TelemetryPoll
    where
        F: FnMut(TelemetrySample) + Send + 'static,
    {
        let on_sample = Arc::new(Mutex::new(on_sample));
        let facade = self.clone();

        let handle = self.inner.runtime.spawn(async move {
            let mut ticks = interval_at(Instant::now() + interval, interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticks.tick().await;

                let summary = facade.inner.summaries.activity_summary(Local::now().date_naive());
                let sample = TelemetrySample::steps(summary.as_ref());
                let on_sample = on_sample.clone();

                facade.inner.dispatcher.dispatch(Box::new(move || {
                    let mut on_sample = on_sample.lock().expect("Failed to lock telemetry callback");
                    (*on_sample)(sample);
                }));
            }
        });

        TelemetryPoll::new(handle)
    }

    async fn ensure_permission(&self) -> Result<(), ScanError> {
        let stack = self.inner.stack.clone();

        // the OS prompt must be triggered at most once, so the outcome is kept
        let permission = self.inner.permission.get_or_init(|| async move {
            info!("Requesting bluetooth permission");
            stack.request_permission().await.map_err(|err| err.to_string())
        }).await;

        match permission {
            Ok(PermissionState::Granted) => Ok(()),
            Ok(PermissionState::Denied) => Err(ScanError::PermissionDenied),
            Err(message) => {
                warn!("Requesting bluetooth permission failed: {}", message);
                Err(ScanError::PermissionDenied)
            },
        }
    }

    async fn run_link(&self, generation: u64, device: DiscoveredDevice, pin: Pin, cancel: CancellationToken) {
        if let Err(err) = self.ensure_permission().await {
            warn!("Can not connect to {}: {}", device.name, err);
            let mut state = self.lock_state();
            if self.is_current_link(&state, generation) {
                self.transition(&mut state, DeviceStatus::Disconnected);
                state.link = None;
            }
            return;
        }

        let mut events = self.inner.stack.connect(device.clone(), pin.clone(), cancel.clone());
        let mut reached_ready = false;

        while let Some(event) = events.next().await {
            if matches!(event, LinkEvent::Status(DeviceStatus::Ready)) {
                reached_ready = true;
            }
            if !self.apply_link_event(generation, event) {
                debug!("Link {} was superseded", generation);
                return;
            }
        }

        let reconnect = {
            let mut state = self.lock_state();
            if !self.is_current_link(&state, generation) {
                return;
            }

            // a link that ended while waiting for the user keeps its state until retried
            if !state.device_status.requires_action() {
                self.transition(&mut state, DeviceStatus::Disconnected);
            }

            let reconnecting = state.link.as_ref().map_or(false, |link| link.reconnecting);
            let reconnect = state.auto_connect
                && (reached_ready || reconnecting)
                && !state.device_status.requires_action()
                && !cancel.is_cancelled();
            if !reconnect {
                state.link = None;
            }
            reconnect
        };

        if reconnect {
            info!("Link to {} lost, reconnecting in {} ms", device.name, RECONNECT_DELAY);
            sleep(Duration::from_millis(RECONNECT_DELAY)).await;

            let still_wanted = {
                let mut state = self.lock_state();
                let current = self.is_current_link(&state, generation);
                if current && !state.auto_connect {
                    state.link = None;
                }
                current && state.auto_connect
            };
            if still_wanted {
                self.open_link(device, pin, true);
            }
        }
    }

    /// Applies one event of link `generation`. Returns false once the link is superseded.
    fn apply_link_event(&self, generation: u64, event: LinkEvent) -> bool {
        let mut state = self.lock_state();
        if !self.is_current_link(&state, generation) {
            return false;
        }

        match event {
            LinkEvent::Status(status) => {
                if status == DeviceStatus::Ready {
                    state.pin_attempts = 0;
                }
                self.transition(&mut state, status);
            },
            LinkEvent::PinRejected => {
                state.pin_attempts += 1;
                let attempts = state.pin_attempts;
                self.transition(&mut state, DeviceStatus::PinRequired(attempts));
            },
            LinkEvent::HeartRate(value) => {
                let slot = self.inner.observers.heart_rate.clone();
                let event = value.map(TelemetrySample::heart_rate);
                self.inner.dispatcher.dispatch(Box::new(move || {
                    slot.notify(event);
                }));
            },
            LinkEvent::Activity(summary) => {
                self.inner.summaries.record(summary);
            },
        }

        true
    }

    fn is_current_link(&self, state: &FacadeState, generation: u64) -> bool {
        state.link.as_ref().map(|link| link.generation) == Some(generation)
    }

    // Called with the state lock held, so that jobs are queued in transition order.
    fn transition(&self, state: &mut FacadeState, next: DeviceStatus) {
        let previous = state.device_status;
        if previous == next {
            return;
        }

        if !previous.can_transition_to(&next) {
            warn!("Unexpected device status transition {:?} -> {:?}", previous, next);
        }
        debug!("Device status {:?} -> {:?}", previous, next);

        state.device_status = next;
        let slot = self.inner.observers.device.clone();
        self.inner.dispatcher.dispatch(Box::new(move || {
            slot.notify(next);
        }));
    }

    fn set_session_status(&self, next: SessionStatus) {
        let mut state = self.lock_state();
        if state.session_status == next {
            return;
        }

        debug!("Session status {:?} -> {:?}", state.session_status, next);
        state.session_status = next;
        let slot = self.inner.observers.session.clone();
        self.inner.dispatcher.dispatch(Box::new(move || {
            slot.notify(next);
        }));
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, FacadeState> {
        self.inner.state.lock().expect("Failed to lock session state")
    }
}
