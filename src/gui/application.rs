use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use futures::channel::mpsc::{unbounded, UnboundedReceiver};
use futures::{SinkExt, StreamExt};
use iced::{Alignment, Application, Command, Element, Length, Settings, Size, Subscription, window};
use iced::event::{self, Event};
use iced::subscription;
use iced::theme::{self, Theme};
use iced::widget::{Column, button, column, container, horizontal_rule, row, text, text_input};
use iced::window::icon;
use indexmap::IndexMap;
use log::{debug, error, info};

use crate::config::io::ConfigIO;
use crate::config::types::Config;
use crate::device::connection::BtleStack;
use crate::error::AppRunError;
use crate::gui::open::open_link;
use crate::gui::style::LinkButtonStyleSheet;
use crate::gui::types::Message;
use crate::session::auth::OfflineAuthService;
use crate::session::controller::{ControllerEvent, ControllerSettings, SessionController};
use crate::session::dispatch::DisplayThread;
use crate::session::facade::DeviceSessionFacade;
use crate::session::types::{DeviceId, DeviceStatus, DiscoveredDevice, SessionStatus};

type ControllerEvents = Arc<Mutex<Option<UnboundedReceiver<ControllerEvent>>>>;

pub struct ApplicationFlags {
    config_io: ConfigIO,
    config: Config,
    notices: Vec<String>,
    controller: Arc<SessionController>,
    controller_events: ControllerEvents,
}

pub struct MyApplication {
    // messages that the user must click away
    notices: Vec<String>,

    config_io: ConfigIO,
    config: Config,
    // this flag is used to make sure that a user is not spammed with save configuration errors
    displayed_config_save_error: bool,

    controller: Arc<SessionController>,
    controller_events: ControllerEvents,

    // latest state from the session
    session_status: SessionStatus,
    device_status: DeviceStatus,
    heart_rate: Option<u16>,
    steps: Option<u32>,
    discovered: IndexMap<DeviceId, DiscoveredDevice>,
    scanning: bool,
    pin_input: String,
}

impl MyApplication {
    fn before_close(&mut self) {
        // tearing down the screen stops the observers and the telemetry poll
        self.controller.shutdown();
    }

    fn save_config(&self) -> Command<Message> {
        let config = self.config.clone();
        let config_io = self.config_io.clone();

        let fut = async move {
            match config_io.save(config).await {
                Ok(_) => None,
                Err(err) => {
                    error!("Failed to save config: {:?}", &err);
                    Some(format!("Failed to save config: {}", &err))
                },
            }
        };

        Command::perform(fut, Message::ConfigSaveComplete)
    }

    fn open_link(&self, url: String) -> Command<Message> {
        let fut = async move {
            match open_link(&url).await {
                Ok(_) => true,
                Err(err) => {
                    error!("Failed to open link: {:?}", &err);
                    false
                },
            }
        };

        Command::perform(fut, Message::LinkOpened)
    }

    fn on_controller_event(&mut self, event: ControllerEvent) -> Command<Message> {
        match event {
            ControllerEvent::SessionStatus(status) => {
                self.session_status = status;
            },
            ControllerEvent::DeviceStatus(status) => {
                self.device_status = status;
                if status != DeviceStatus::Ready {
                    self.heart_rate = None;
                }
            },
            ControllerEvent::HeartRate(heart_rate) => {
                self.heart_rate = heart_rate;
            },
            ControllerEvent::Steps(steps) => {
                self.steps = steps;
            },
            ControllerEvent::DeviceDiscovered(device) => {
                self.scanning = true;
                self.discovered.insert(device.identifier.clone(), device);
            },
            ControllerEvent::ScanFinished => {
                self.scanning = false;
            },
            ControllerEvent::DeviceRemembered(known) => {
                if self.config.device.known_device.as_ref().map(|d| &d.identifier) != Some(&known.identifier) {
                    info!("Remembering device {}", known.name);
                }
                self.config.device.known_device = Some(known);
                return self.save_config();
            },
            ControllerEvent::Notice(notice) => {
                self.notices.push(notice);
            },
        }

        Command::none()
    }
}

fn controller_subscription(events: ControllerEvents) -> Subscription<Message> {
    struct Controller;

    subscription::channel(
        std::any::TypeId::of::<Controller>(),
        64,
        move |mut output| async move {
            let receiver = events.lock().expect("Failed to lock controller events").take();

            if let Some(mut receiver) = receiver {
                while let Some(event) = receiver.next().await {
                    if output.send(Message::Controller(event)).await.is_err() {
                        break;
                    }
                }
            }

            // note: subscription::channel expects the future to never resolve
            futures::future::pending::<Infallible>().await
        },
    )
}

impl Application for MyApplication {
    type Executor = iced::executor::Default;
    type Message = Message;
    type Theme = Theme;
    type Flags = ApplicationFlags;

    fn new(flags: ApplicationFlags) -> (MyApplication, Command<Self::Message>) {
        let app = MyApplication {
            notices: flags.notices,
            config_io: flags.config_io,
            config: flags.config,
            displayed_config_save_error: false,
            controller: flags.controller,
            controller_events: flags.controller_events,
            session_status: SessionStatus::Uninitialized,
            device_status: DeviceStatus::Disconnected,
            heart_rate: None,
            steps: None,
            discovered: IndexMap::new(),
            scanning: false,
            pin_input: String::new(),
        };

        app.controller.start();
        (app, Command::none())
    }

    fn title(&self) -> String {
        String::from(concat!("GoBe Session ", env!("CARGO_PKG_VERSION")))
    }

    fn update(&mut self, message: Message) -> Command<Self::Message> {
        match message {
            Message::Controller(event) => {
                return self.on_controller_event(event);
            },
            Message::ConfigSaveComplete(error_message) => {
                if !self.displayed_config_save_error {
                    if let Some(error_message) = error_message {
                        self.displayed_config_save_error = true;
                        self.notices.push(error_message);
                    }
                }
            },
            Message::NoticeConfirmed => {
                if !self.notices.is_empty() {
                    self.notices.remove(0);
                }
            },
            Message::PinInput(value) => {
                // only digits can form a pin
                self.pin_input = value.chars().filter(|c| c.is_ascii_digit()).take(8).collect();
            },
            Message::SubmitPin => {
                if !self.pin_input.is_empty() {
                    self.controller.submit_pin(&self.pin_input);
                    self.pin_input.clear();
                }
            },
            Message::Rescan => {
                self.discovered.clear();
                self.scanning = true;
                self.controller.scan_for_target();
            },
            Message::RetryLogin => {
                self.controller.login();
            },
            Message::LinkPress(url) => {
                return self.open_link(url);
            },
            Message::LinkOpened(opened) => {
                debug!("Link opened: {}", opened);
            },
            Message::EventOccurred(Event::Window(id, window::Event::CloseRequested)) => {
                info!("Close requested");
                self.before_close();
                return window::close(id);
            },
            Message::EventOccurred(_) => {},
        }

        Command::none()
    }

    fn subscription(&self) -> Subscription<Message> {
        Subscription::batch([
            event::listen().map(Message::EventOccurred),
            controller_subscription(self.controller_events.clone()),
        ])
    }

    fn view(&self) -> Element<Message> {
        if let Some(notice) = self.notices.first() {
            return container(
                column![
                    text(notice),

                    button(text("Okay"))
                        .on_press(Message::NoticeConfirmed),

                ].align_items(Alignment::Center).spacing(20),
            )
            .width(Length::Fill)
            .padding(20)
            .into()
        }

        let unknown = || "unknown".to_string();
        let heart_rate = self.heart_rate.map(|bpm| format!("{} bpm", bpm)).unwrap_or_else(unknown);
        let steps = self.steps.map(|steps| steps.to_string()).unwrap_or_else(unknown);

        let status_line = |label: &'static str, value: String| -> Element<Message> {
            row![
                text(label).width(120),
                text(value),
            ]
            .spacing(10)
            .into()
        };

        let mut device_actions = Column::new().spacing(10).align_items(Alignment::Center);

        if let DeviceStatus::PinRequired(_) | DeviceStatus::PinChangeRequired = self.device_status {
            device_actions = device_actions.push(
                row![
                    text_input("Pin", self.pin_input.as_str())
                        .secure(true)
                        .width(120)
                        .on_input(Message::PinInput)
                        .on_submit(Message::SubmitPin),
                    button(text("Connect"))
                        .style(theme::Button::Primary)
                        .on_press(Message::SubmitPin),
                ]
                .align_items(Alignment::Center)
                .spacing(10),
            );
        }

        if self.device_status == DeviceStatus::UnregisteredOnServer {
            device_actions = device_actions.push(
                button(text("Contact support").size(14))
                    .style(theme::Button::Custom(Box::new(LinkButtonStyleSheet)))
                    .on_press(Message::LinkPress(self.config.support_url.clone())),
            );
        }

        let discovered = Column::with_children(
            self.discovered
                .values()
                .map(|device| text(format!("{}  ({})", device.name, device.identifier)).size(14))
                .map(Element::from)
        )
            .spacing(4)
            .width(Length::Fill);

        let mut rescan_button = button(text(if self.scanning { "Scanning…" } else { "Scan again" }));
        if !self.scanning && self.session_status.is_ready() {
            rescan_button = rescan_button.on_press(Message::Rescan);
        }

        let mut login_button = button(text("Log in again")).style(theme::Button::Secondary);
        if self.session_status == SessionStatus::AuthenticationRequired {
            login_button = login_button.on_press(Message::RetryLogin);
        }

        container(
            column![
                column![
                    status_line("Session", self.session_status.to_string()),
                    status_line("Device", self.device_status.to_string()),
                    status_line("Heart rate", heart_rate),
                    status_line("Steps today", steps),
                ].spacing(8),

                device_actions,

                horizontal_rule(10),

                text("Nearby devices"),
                discovered,

                row![rescan_button, login_button].spacing(20),
            ]
            .spacing(20)
            .width(Length::Fill)
            .height(Length::Fill),
        )
        .width(Length::Fill)
        .padding(20)
        .into()
    }
}

fn make_icon() -> icon::Icon {
    let bytes = include_bytes!(concat!(env!("OUT_DIR"), "/icon-32-rgba"));
    let bytes = bytes.to_vec();
    icon::from_rgba(bytes, 32, 32).expect("Failed to load window icon")
}

async fn load_config(config_io: &ConfigIO) -> (Config, Vec<String>) {
    let mut notices = Vec::new();

    let config = match config_io.read().await {
        Ok(config) => config,
        Err(err) => {
            if err.is_file_not_found_error() {
                // this is probably the first start of the app
                info!("Config file not found, using defaults");
            } else {
                error!("Failed to load config: {:?}", &err);
                notices.push(format!("Failed to load config: {}", &err));
            }
            Config::default()
        },
    };

    if config.account.login.is_empty() || config.device.target_name.is_empty() {
        notices.push(format!(
            "Enter your account and the name of your wristband in {}, then restart the application.",
            config_io.path().to_string_lossy(),
        ));
    }

    (config, notices)
}

pub fn run_application() -> Result<(), AppRunError> {
    let mut config_io = ConfigIO::new_sync()?;
    let mut config_locker = config_io.locker()?;
    let _lock_guard = config_locker.lock()?;

    // the session runs on its own runtime, so that it does not depend on the executor of the gui
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("session")
        .enable_all()
        .build()
        .map_err(|source| AppRunError::Runtime { source })?;

    let (config, notices) = runtime.block_on(load_config(&config_io));

    let display = DisplayThread::spawn().map_err(|source| AppRunError::DisplayThread { source })?;
    let facade = DeviceSessionFacade::new(
        Arc::new(OfflineAuthService::new(config.device.known_device.is_some())),
        Arc::new(BtleStack::new()),
        Arc::new(display),
        runtime.handle().clone(),
    );

    let (event_sender, event_receiver) = unbounded::<ControllerEvent>();
    let controller = SessionController::new(
        facade,
        ControllerSettings::from_config(&config),
        move |event| {
            if event_sender.unbounded_send(event).is_err() {
                debug!("Screen is gone, dropping controller event");
            }
        },
    );

    let flags = ApplicationFlags {
        config_io,
        config,
        notices,
        controller,
        controller_events: Arc::new(Mutex::new(Some(event_receiver))),
    };
    let mut settings = Settings::with_flags(flags);

    // handle exits ourselves (Event::CloseRequested)
    settings.id = Some("gobe-session".to_string());
    settings.window.exit_on_close_request = false;
    settings.window.size = Size::new(480.0, 560.0);
    settings.window.resizable = false;
    settings.window.icon = Some(make_icon());

    // this function will call process::exit() unless there was a startup error
    MyApplication::run(settings)?;
    Ok(())
}
