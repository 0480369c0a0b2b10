#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use gobe_session::device::stack::PeripheralStack;
use gobe_session::device::types::{LinkEvent, PermissionState, ScanBatch};
use gobe_session::error::{AuthError, DeviceError};
use gobe_session::session::auth::AuthService;
use gobe_session::session::dispatch::DisplayThread;
use gobe_session::session::facade::DeviceSessionFacade;
use gobe_session::session::types::{
    Credentials, DeviceId, DeviceStatus, DiscoveredDevice, Pin, Session, SessionStatus, UserKind,
};

pub fn device(name: &str, identifier: &str) -> DiscoveredDevice {
    DiscoveredDevice {
        name: name.to_string(),
        identifier: DeviceId(identifier.to_string()),
    }
}

pub fn pin(code: &str) -> Pin {
    code.parse().unwrap()
}

pub fn happy_link() -> Vec<LinkEvent> {
    vec![
        LinkEvent::Status(DeviceStatus::Connecting),
        LinkEvent::Status(DeviceStatus::Connected),
        LinkEvent::Status(DeviceStatus::Ready),
    ]
}

fn until_cancelled<T: Send + 'static>(cancel: CancellationToken) -> BoxStream<'static, T> {
    stream::once(async move { cancel.cancelled().await })
        .filter_map(|()| async { None::<T> })
        .boxed()
}

/// A peripheral stack that plays back scripted scans and links.
pub struct FakeStack {
    pub permission: PermissionState,
    pub bluetooth_on: AtomicBool,
    pub permission_requests: AtomicUsize,
    pub scans_started: AtomicUsize,
    /// Keep scan streams open after their script, until cancelled.
    pub hold_scans_open: AtomicBool,
    /// Keep link streams open after their script, until cancelled.
    pub hold_links_open: AtomicBool,
    pub connects: Mutex<Vec<(DiscoveredDevice, String)>>,
    scans: Mutex<VecDeque<Vec<ScanBatch>>>,
    links: Mutex<VecDeque<Vec<LinkEvent>>>,
}

impl FakeStack {
    pub fn new() -> Self {
        FakeStack {
            permission: PermissionState::Granted,
            bluetooth_on: AtomicBool::new(true),
            permission_requests: AtomicUsize::new(0),
            scans_started: AtomicUsize::new(0),
            hold_scans_open: AtomicBool::new(false),
            hold_links_open: AtomicBool::new(false),
            connects: Mutex::new(Vec::new()),
            scans: Mutex::new(VecDeque::new()),
            links: Mutex::new(VecDeque::new()),
        }
    }

    pub fn denied() -> Self {
        FakeStack { permission: PermissionState::Denied, ..Self::new() }
    }

    pub fn script_scan(&self, batches: Vec<ScanBatch>) {
        self.scans.lock().unwrap().push_back(batches);
    }

    pub fn script_link(&self, events: Vec<LinkEvent>) {
        self.links.lock().unwrap().push_back(events);
    }

    pub fn connects(&self) -> Vec<(DiscoveredDevice, String)> {
        self.connects.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeripheralStack for FakeStack {
    async fn request_permission(&self) -> Result<PermissionState, DeviceError> {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
        Ok(self.permission)
    }

    async fn bluetooth_is_on(&self) -> bool {
        self.bluetooth_on.load(Ordering::SeqCst)
    }

    fn scan(&self, cancel: CancellationToken) -> BoxStream<'static, ScanBatch> {
        self.scans_started.fetch_add(1, Ordering::SeqCst);
        let batches = self.scans.lock().unwrap().pop_front().unwrap_or_default();
        let scripted = stream::iter(batches).boxed();

        if self.hold_scans_open.load(Ordering::SeqCst) {
            scripted.chain(until_cancelled(cancel)).boxed()
        } else {
            scripted
        }
    }

    fn connect(&self, device: DiscoveredDevice, pin: Pin, cancel: CancellationToken) -> BoxStream<'static, LinkEvent> {
        self.connects.lock().unwrap().push((device, pin.as_str().to_string()));
        let events = self.links.lock().unwrap().pop_front().unwrap_or_else(happy_link);

        // a link ends on its own after dropping or when it waits for the user
        let ends_by_itself = match events.last() {
            Some(LinkEvent::Status(status)) => *status == DeviceStatus::Disconnected || status.requires_action(),
            Some(LinkEvent::PinRejected) => true,
            _ => false,
        };
        let scripted = stream::iter(events).boxed();

        if ends_by_itself {
            scripted
        } else if self.hold_links_open.load(Ordering::SeqCst) {
            scripted.chain(until_cancelled(cancel)).boxed()
        } else {
            scripted.chain(stream::iter(vec![LinkEvent::Status(DeviceStatus::Disconnected)])).boxed()
        }
    }
}

pub struct FakeAuth {
    pub restored: SessionStatus,
    pub outcome: Result<UserKind, String>,
    pub logins: AtomicUsize,
}

impl FakeAuth {
    pub fn accepting(kind: UserKind) -> Self {
        FakeAuth {
            restored: SessionStatus::AuthenticationRequired,
            outcome: Ok(kind),
            logins: AtomicUsize::new(0),
        }
    }

    pub fn rejecting(reason: &str) -> Self {
        FakeAuth {
            restored: SessionStatus::AuthenticationRequired,
            outcome: Err(reason.to_string()),
            logins: AtomicUsize::new(0),
        }
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthService for FakeAuth {
    async fn restore(&self) -> SessionStatus {
        self.restored
    }

    async fn login(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        self.logins.fetch_add(1, Ordering::SeqCst);

        match &self.outcome {
            Ok(kind) => Ok(Session {
                login: credentials.login.clone(),
                kind: *kind,
                started_at: Utc::now(),
            }),
            Err(reason) => Err(AuthError::Rejected(reason.clone())),
        }
    }
}

pub struct Harness {
    pub facade: DeviceSessionFacade,
    pub display: Arc<DisplayThread>,
    pub stack: Arc<FakeStack>,
    pub auth: Arc<FakeAuth>,
}

impl Harness {
    pub fn new(stack: FakeStack, auth: FakeAuth) -> Self {
        let display = Arc::new(DisplayThread::spawn().unwrap());
        let stack = Arc::new(stack);
        let auth = Arc::new(auth);

        let facade = DeviceSessionFacade::new(
            auth.clone(),
            stack.clone(),
            display.clone(),
            tokio::runtime::Handle::current(),
        );

        Harness { facade, display, stack, auth }
    }

    /// Lets spawned work run, then waits for the display thread to catch up.
    pub async fn settle(&self) {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.display.flush().await;
    }

    pub async fn eventually<F: Fn() -> bool>(&self, what: &str, condition: F) {
        for _ in 0..200 {
            self.display.flush().await;
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for: {}", what);
    }
}

/// Collects everything passed to an observer.
pub struct Recorder<T> {
    values: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone + Send + 'static> Recorder<T> {
    pub fn new() -> Self {
        Recorder { values: Arc::new(Mutex::new(Vec::new())) }
    }

    pub fn observer(&self) -> impl Fn(T) + Send + Sync + 'static {
        let values = self.values.clone();
        move |value| values.lock().unwrap().push(value)
    }

    pub fn values(&self) -> Vec<T> {
        self.values.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.values.lock().unwrap().len()
    }
}
