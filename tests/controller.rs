mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;

use gobe_session::config::types::KnownDevice;
use gobe_session::device::types::LinkEvent;
use gobe_session::session::controller::{ControllerEvent, ControllerSettings, SessionController};
use gobe_session::session::types::{Credentials, DeviceId, DeviceStatus, SessionStatus, UserKind};
use common::{device, pin, FakeAuth, FakeStack, Harness, Recorder};

fn settings(target_name: &str, pin_code: &str) -> ControllerSettings {
    ControllerSettings {
        credentials: Credentials {
            login: "user@example.com".to_string(),
            password: "secret".to_string(),
        },
        target_name: target_name.to_string(),
        pin_code: pin_code.to_string(),
        known_device: None,
        poll_interval: Duration::from_secs(5),
    }
}

fn start(harness: &Harness, settings: ControllerSettings) -> (Arc<SessionController>, Recorder<ControllerEvent>) {
    let events = Recorder::new();
    let controller = SessionController::new(harness.facade.clone(), settings, events.observer());
    controller.start();
    (controller, events)
}

fn count(events: &Recorder<ControllerEvent>, wanted: &ControllerEvent) -> usize {
    events.values().iter().filter(|event| *event == wanted).count()
}

fn has_notice(events: &Recorder<ControllerEvent>) -> bool {
    events.values().iter().any(|event| matches!(event, ControllerEvent::Notice(_)))
}

#[tokio::test]
async fn connects_once_to_the_device_with_the_target_name() {
    let harness = Harness::new(FakeStack::new(), FakeAuth::accepting(UserKind::NewUser));
    harness.stack.hold_links_open.store(true, Ordering::SeqCst);
    harness.stack.script_scan(vec![Ok(vec![
        device("A", "id-a"),
        device("MyGobeName", "id-gobe"),
        device("C", "id-c"),
    ])]);

    let (controller, events) = start(&harness, settings("MyGobeName", "010401"));
    harness.eventually("device ready", || harness.facade.device_status() == DeviceStatus::Ready).await;
    harness.eventually("device remembered", || {
        events.values().iter().any(|event| matches!(event, ControllerEvent::DeviceRemembered(_)))
    }).await;
    harness.eventually("scan finished", || count(&events, &ControllerEvent::ScanFinished) == 1).await;
    harness.settle().await;

    let connects = harness.stack.connects();
    assert_eq!(connects.len(), 1);
    assert_eq!(connects[0].0, device("MyGobeName", "id-gobe"));
    assert_eq!(connects[0].1, "010401");

    assert_eq!(count(&events, &ControllerEvent::DeviceDiscovered(device("A", "id-a"))), 1);
    assert_eq!(count(&events, &ControllerEvent::DeviceDiscovered(device("MyGobeName", "id-gobe"))), 1);
    assert_eq!(count(&events, &ControllerEvent::DeviceDiscovered(device("C", "id-c"))), 0);
    assert_eq!(count(&events, &ControllerEvent::ScanFinished), 1);
    assert_eq!(count(&events, &ControllerEvent::SessionStatus(SessionStatus::Ready(UserKind::NewUser))), 1);

    controller.shutdown();
}

#[tokio::test]
async fn connects_at_most_once_per_scan() {
    let harness = Harness::new(FakeStack::new(), FakeAuth::accepting(UserKind::NewUser));
    harness.stack.hold_links_open.store(true, Ordering::SeqCst);
    harness.stack.script_scan(vec![
        Ok(vec![device("MyGobeName", "id-1")]),
        Ok(vec![device("MyGobeName", "id-2")]),
    ]);

    let (controller, events) = start(&harness, settings("MyGobeName", "010401"));
    harness.eventually("scan finished", || count(&events, &ControllerEvent::ScanFinished) == 1).await;
    harness.eventually("device ready", || harness.facade.device_status() == DeviceStatus::Ready).await;

    let connects = harness.stack.connects();
    assert_eq!(connects.len(), 1);
    assert_eq!(connects[0].0.identifier, DeviceId("id-1".to_string()));

    controller.shutdown();
}

#[tokio::test]
async fn failed_login_is_reported_and_not_retried() {
    let harness = Harness::new(FakeStack::new(), FakeAuth::rejecting("bad password"));

    let (controller, events) = start(&harness, settings("MyGobeName", "010401"));
    harness.eventually("login failure notice", || has_notice(&events)).await;
    harness.settle().await;

    assert_eq!(harness.auth.logins(), 1);
    assert_eq!(harness.stack.scans_started.load(Ordering::SeqCst), 0);
    assert_eq!(harness.stack.permission_requests.load(Ordering::SeqCst), 0);
    assert_eq!(harness.facade.device_status(), DeviceStatus::Disconnected);
    assert_eq!(events.values()[0], ControllerEvent::SessionStatus(SessionStatus::AuthenticationRequired));

    controller.shutdown();
}

#[tokio::test]
async fn existing_user_reconnects_to_the_remembered_device() {
    let harness = Harness::new(FakeStack::new(), FakeAuth::accepting(UserKind::ExistingUser));
    harness.stack.hold_links_open.store(true, Ordering::SeqCst);
    harness.stack.script_scan(vec![Ok(vec![device("A", "id-a"), device("Renamed", "id-7")])]);

    let mut settings = settings("MyGobeName", "010401");
    settings.known_device = Some(KnownDevice {
        identifier: DeviceId("id-7".to_string()),
        name: "MyGobeName".to_string(),
        last_connected: Utc::now(),
    });

    let (controller, _events) = start(&harness, settings);
    harness.eventually("device ready", || harness.facade.device_status() == DeviceStatus::Ready).await;

    let connects = harness.stack.connects();
    assert_eq!(connects.len(), 1);
    assert_eq!(connects[0].0, device("Renamed", "id-7"));

    controller.shutdown();
}

#[tokio::test]
async fn unusable_pin_is_reported_instead_of_connecting() {
    let harness = Harness::new(FakeStack::new(), FakeAuth::accepting(UserKind::NewUser));
    harness.stack.script_scan(vec![Ok(vec![device("MyGobeName", "id-1")])]);

    let (controller, events) = start(&harness, settings("MyGobeName", "12"));
    harness.eventually("scan finished", || count(&events, &ControllerEvent::ScanFinished) == 1).await;
    harness.settle().await;

    assert!(has_notice(&events));
    assert!(harness.stack.connects().is_empty());

    controller.shutdown();
}

#[tokio::test]
async fn submitted_pin_retries_the_last_device() {
    let harness = Harness::new(FakeStack::new(), FakeAuth::accepting(UserKind::NewUser));
    harness.stack.hold_links_open.store(true, Ordering::SeqCst);
    harness.stack.script_scan(vec![Ok(vec![device("MyGobeName", "id-1")])]);
    harness.stack.script_link(vec![
        LinkEvent::Status(DeviceStatus::Connecting),
        LinkEvent::Status(DeviceStatus::Connected),
        LinkEvent::PinRejected,
    ]);

    let (controller, events) = start(&harness, settings("MyGobeName", "1111"));
    harness.eventually("pin rejected", || {
        count(&events, &ControllerEvent::DeviceStatus(DeviceStatus::PinRequired(1))) == 1
    }).await;

    controller.submit_pin(" 4321 ");
    harness.eventually("device ready", || harness.facade.device_status() == DeviceStatus::Ready).await;

    let pins: Vec<String> = harness.stack.connects().into_iter().map(|(_, pin)| pin).collect();
    assert_eq!(pins, vec!["1111", "4321"]);

    controller.shutdown();
}

#[tokio::test]
async fn shutdown_stops_forwarding_events() {
    let harness = Harness::new(FakeStack::new(), FakeAuth::accepting(UserKind::NewUser));
    harness.stack.hold_links_open.store(true, Ordering::SeqCst);
    harness.stack.script_scan(vec![Ok(vec![device("MyGobeName", "id-1")])]);

    let (controller, events) = start(&harness, settings("MyGobeName", "010401"));
    harness.eventually("device ready", || {
        count(&events, &ControllerEvent::DeviceStatus(DeviceStatus::Ready)) == 1
    }).await;
    harness.settle().await;

    controller.shutdown();
    let delivered = events.len();

    harness.facade.connect(device("Other", "id-2"), pin("010401"));
    harness.eventually("second link ready", || harness.facade.device_status() == DeviceStatus::Ready).await;
    harness.settle().await;

    assert_eq!(events.len(), delivered);
}

#[tokio::test]
async fn rescanning_keeps_a_working_link() {
    let harness = Harness::new(FakeStack::new(), FakeAuth::accepting(UserKind::NewUser));
    harness.stack.hold_links_open.store(true, Ordering::SeqCst);
    harness.stack.script_scan(vec![Ok(vec![device("MyGobeName", "id-1")])]);
    harness.stack.script_scan(vec![Ok(vec![device("A", "id-a"), device("MyGobeName", "id-1")])]);

    let (controller, events) = start(&harness, settings("MyGobeName", "010401"));
    harness.eventually("device ready", || {
        count(&events, &ControllerEvent::DeviceStatus(DeviceStatus::Ready)) == 1
    }).await;
    harness.eventually("first scan finished", || count(&events, &ControllerEvent::ScanFinished) == 1).await;

    controller.scan_for_target();
    harness.eventually("second scan finished", || count(&events, &ControllerEvent::ScanFinished) == 2).await;
    harness.settle().await;

    assert_eq!(harness.stack.connects().len(), 1);
    assert_eq!(count(&events, &ControllerEvent::DeviceStatus(DeviceStatus::Disconnected)), 0);
    assert_eq!(harness.facade.device_status(), DeviceStatus::Ready);

    controller.shutdown();
}
