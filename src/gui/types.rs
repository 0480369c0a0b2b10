use iced::Event;

use crate::session::controller::ControllerEvent;

#[derive(Debug, Clone)]
pub enum Message {
    EventOccurred(Event),
    Controller(ControllerEvent),
    ConfigSaveComplete(Option<String>), // error message if saving failed
    NoticeConfirmed,
    PinInput(String),
    SubmitPin,
    Rescan,
    RetryLogin,
    LinkPress(String),
    LinkOpened(bool),
}
