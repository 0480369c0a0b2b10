use std::any::Any;
use std::io;
use thiserror::Error;
use msgbox::IconType;
use std::fmt::{Debug, Display};
use std::str::Utf8Error;
use btleplug;
use iced;
use serde_json;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (iced): {source}")]
    Iced { #[from] source: iced::Error },

    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start application (runtime): {source}")]
    Runtime { source: io::Error },

    #[error("Failed to start display thread: {source}")]
    DisplayThread { source: io::Error },
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No bluetooth adapter is available")]
    NoAdapter,

    #[error("Device {0} is not known to the bluetooth stack, scan for it first")]
    UnknownDevice(String),

    #[error("{0} took too long")]
    Deadline(&'static str),
}

impl DeviceError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, DeviceError::Btle { source: btleplug::Error::PermissionDenied })
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("No login configured")]
    MissingLogin,

    #[error("No password configured")]
    MissingPassword,

    #[error("Login {0:?} is not an email address")]
    MalformedLogin(String),

    #[error("The server rejected the credentials: {0}")]
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Not allowed to access Bluetooth")]
    PermissionDenied,

    #[error("Bluetooth is turned off")]
    BluetoothOff,

    #[error("Scanning failed: {source}")]
    Device { #[from] source: DeviceError },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("Device does not provide a heart rate sensor")]
    SensorUnavailable,

    #[error("Malformed heart rate measurement: {0}")]
    Malformed(&'static str),

    #[error("Sensor reported no skin contact")]
    NoContact,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PinFormatError {
    #[error("A pin must have between {min} and {max} digits, got {len}")]
    Length { min: usize, max: usize, len: usize },

    #[error("A pin may only contain the digits 0-9")]
    NotNumeric,
}

#[derive(Error, Debug)]
pub enum LinkOpenError {
    #[error("Only http(s) links may be opened")]
    NotHttp,

    #[error("Failed to open link: {source}")]
    IOError { #[from] source: io::Error },
}

pub fn readable_thread_panic_error(error: &Box<dyn Any + Send + 'static>) -> String {
    let mut stringified = String::from("???");

    if let Some(s) = error.downcast_ref::<&str>() {
        stringified = format!("{}", s);
    }
    else if let Some(s) = error.downcast_ref::<String>() {
        stringified = format!("{}", s);
    }
    let type_id = (**error).type_id();

    format!("panic from thread: [{:?}]: [{}]", type_id, stringified)
}

pub fn error_msgbox<T: Display>(message: &'static str, error: &T) {
    let message = format!("{}: {}", message, error);
    eprintln!("{}", &message);
    if let Err(err) = msgbox::create(concat!("GoBe Session ", env!("CARGO_PKG_VERSION")), &message, IconType::Error) {
        eprintln!("Failed to create msgbox: {:?}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_are_stringified() {
        let payload: Box<dyn Any + Send> = Box::new("observer exploded");
        let readable = readable_thread_panic_error(&payload);
        assert!(readable.contains("observer exploded"), "{}", readable);

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert!(readable_thread_panic_error(&payload).contains("owned message"));

        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert!(readable_thread_panic_error(&payload).contains("???"));
    }

    #[test]
    fn permission_denied_is_detected() {
        let err = DeviceError::from(btleplug::Error::PermissionDenied);
        assert!(err.is_permission_denied());
        assert!(!DeviceError::NoAdapter.is_permission_denied());
    }
}
