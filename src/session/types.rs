use std::fmt;
use std::str::FromStr;
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PinFormatError;

pub const PIN_MIN_DIGITS: usize = 4;
pub const PIN_MAX_DIGITS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserKind {
    /// The user never paired a device before.
    NewUser,
    /// The user paired a device before, which will be reconnected.
    ExistingUser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Uninitialized,
    AuthenticationRequired,
    ProfileIncomplete,
    Ready(UserKind),
    NetworkRequired,
}

impl SessionStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, SessionStatus::Ready(_))
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            SessionStatus::Uninitialized => "Not initialized",
            SessionStatus::AuthenticationRequired => "Login required",
            SessionStatus::ProfileIncomplete => "Profile incomplete",
            SessionStatus::Ready(UserKind::NewUser) => "Ready (new user)",
            SessionStatus::Ready(UserKind::ExistingUser) => "Ready",
            SessionStatus::NetworkRequired => "Network connection required",
        };

        write!(f, "{}", result)
    }
}

/// Connection state of the peripheral. Exactly one is active per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Disconnected,
    Connecting,
    /// The radio link is up; authorization and checks are still running.
    Connected,
    /// The pin was rejected. Carries the number of rejected attempts so far.
    PinRequired(u32),
    PinChangeRequired,
    CriticalUpdateRequired,
    UnregisteredOnServer,
    Ready,
}

impl DeviceStatus {
    /// States that wait for the user to do something before the device can be used.
    pub fn requires_action(&self) -> bool {
        matches!(
            self,
            DeviceStatus::PinRequired(_)
                | DeviceStatus::PinChangeRequired
                | DeviceStatus::CriticalUpdateRequired
                | DeviceStatus::UnregisteredOnServer
        )
    }

    /// True while a link to the peripheral is held open.
    pub fn has_link(&self) -> bool {
        matches!(self, DeviceStatus::Connecting | DeviceStatus::Connected | DeviceStatus::Ready)
    }

    pub fn can_transition_to(&self, next: &DeviceStatus) -> bool {
        use DeviceStatus::*;

        match (self, next) {
            // cable pull / radio off
            (_, Disconnected) => true,
            (Disconnected, Connecting) => true,
            (Connecting, Connected) => true,
            (Connected, PinRequired(_))
            | (Connected, PinChangeRequired)
            | (Connected, CriticalUpdateRequired)
            | (Connected, UnregisteredOnServer)
            | (Connected, Ready) => true,
            (from, Connecting) if from.requires_action() => true,
            _ => false,
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Disconnected => write!(f, "Disconnected"),
            DeviceStatus::Connecting => write!(f, "Connecting…"),
            DeviceStatus::Connected => write!(f, "Connected, checking device…"),
            DeviceStatus::PinRequired(attempt) => write!(f, "Pin rejected ({} attempts)", attempt),
            DeviceStatus::PinChangeRequired => write!(f, "Default pin must be changed"),
            DeviceStatus::CriticalUpdateRequired => write!(f, "Firmware update required"),
            DeviceStatus::UnregisteredOnServer => write!(f, "Device not registered, contact support"),
            DeviceStatus::Ready => write!(f, "Ready"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub name: String,
    pub identifier: DeviceId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetrySample {
    pub heart_rate: Option<u16>,
    pub step_count: Option<u32>,
    pub timestamp: DateTime<Local>,
}

impl TelemetrySample {
    pub fn heart_rate(bpm: u16) -> Self {
        TelemetrySample {
            heart_rate: Some(bpm),
            step_count: None,
            timestamp: Local::now(),
        }
    }

    pub fn steps(summary: Option<&ActivitySummary>) -> Self {
        TelemetrySample {
            heart_rate: None,
            step_count: summary.map(|summary| summary.steps),
            timestamp: Local::now(),
        }
    }
}

/// Aggregated activity of one calendar day, as cached by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivitySummary {
    pub date: NaiveDate,
    pub steps: u32,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub login: String,
    pub kind: UserKind,
    pub started_at: DateTime<Utc>,
}

/// Device-side access code, numeric.
#[derive(Clone, PartialEq, Eq)]
pub struct Pin(String);

impl Pin {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Pin {
    type Err = PinFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if s.len() < PIN_MIN_DIGITS || s.len() > PIN_MAX_DIGITS {
            return Err(PinFormatError::Length { min: PIN_MIN_DIGITS, max: PIN_MAX_DIGITS, len: s.len() });
        }

        if !s.chars().all(|c| c.is_ascii_digit()) {
            return Err(PinFormatError::NotNumeric);
        }

        Ok(Pin(s.to_string()))
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pin({})", "*".repeat(self.0.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeviceStatus::*;

    #[test]
    fn connection_progression_is_allowed() {
        assert!(Disconnected.can_transition_to(&Connecting));
        assert!(Connecting.can_transition_to(&Connected));
        for next in [PinRequired(1), PinChangeRequired, CriticalUpdateRequired, UnregisteredOnServer, Ready] {
            assert!(Connected.can_transition_to(&next), "Connected -> {:?}", next);
        }
    }

    #[test]
    fn disconnected_is_reachable_from_everywhere() {
        for from in [Connecting, Connected, PinRequired(3), PinChangeRequired, CriticalUpdateRequired, UnregisteredOnServer, Ready] {
            assert!(from.can_transition_to(&Disconnected), "{:?} -> Disconnected", from);
        }
    }

    #[test]
    fn shortcuts_are_rejected() {
        assert!(!Disconnected.can_transition_to(&Ready));
        assert!(!Connecting.can_transition_to(&Ready));
        assert!(!Ready.can_transition_to(&Connecting));
        assert!(!Disconnected.can_transition_to(&PinRequired(1)));
    }

    #[test]
    fn user_action_states_may_retry() {
        assert!(PinRequired(2).can_transition_to(&Connecting));
        assert!(PinChangeRequired.can_transition_to(&Connecting));
        assert!(!Connected.can_transition_to(&Connecting));
    }

    #[test]
    fn pin_parsing() {
        assert_eq!("010401".parse::<Pin>().unwrap().as_str(), "010401");
        assert_eq!(" 1234 ".parse::<Pin>().unwrap().as_str(), "1234");
        assert_eq!("12".parse::<Pin>(), Err(PinFormatError::Length { min: 4, max: 8, len: 2 }));
        assert_eq!("12a456".parse::<Pin>(), Err(PinFormatError::NotNumeric));
    }

    #[test]
    fn secrets_are_not_logged() {
        let credentials = Credentials { login: "me@example.com".into(), password: "hunter22".into() };
        assert!(!format!("{:?}", credentials).contains("hunter22"));
        let pin: Pin = "010401".parse().unwrap();
        assert_eq!(format!("{:?}", pin), "Pin(******)");
    }
}
