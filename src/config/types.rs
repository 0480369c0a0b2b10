use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::types::{Credentials, DeviceId};

pub const MIN_POLL_INTERVAL_SECS: u64 = 1;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_SUPPORT_URL: &str = "https://healbe.com";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountConfig {
    pub login: String,
    pub password: String,
}

impl AccountConfig {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            login: self.login.clone(),
            password: self.password.clone(),
        }
    }
}

/// The device that was last brought to `Ready`, reconnected on the next start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnownDevice {
    pub identifier: DeviceId,
    pub name: String,
    pub last_connected: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceConfig {
    /// Advertised name of the wristband to pair with, matched exactly.
    pub target_name: String,
    pub pin_code: String,
    pub known_device: Option<KnownDevice>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelemetryConfig {
    pub poll_interval_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        TelemetryConfig {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub account: AccountConfig,
    pub device: DeviceConfig,
    pub telemetry: TelemetryConfig,
    pub support_url: String,
}

impl Config {
    pub fn normalize(&mut self) {
        self.account.login = self.account.login.trim().to_string();
        self.device.target_name = self.device.target_name.trim().to_string();
        self.device.pin_code = self.device.pin_code.trim().to_string();
        self.telemetry.poll_interval_secs = self.telemetry.poll_interval_secs.max(MIN_POLL_INTERVAL_SECS);

        if self.support_url.trim().is_empty() {
            self.support_url = DEFAULT_SUPPORT_URL.to_string();
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            account: AccountConfig::default(),
            device: DeviceConfig::default(),
            telemetry: TelemetryConfig::default(),
            support_url: DEFAULT_SUPPORT_URL.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: Config = serde_json::from_str(r#"{ "device": { "targetName": "MyGobeName" } }"#).unwrap();

        assert_eq!(config.device.target_name, "MyGobeName");
        assert_eq!(config.device.known_device, None);
        assert_eq!(config.telemetry.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
        assert_eq!(config.support_url, DEFAULT_SUPPORT_URL);
    }

    #[test]
    fn known_device_is_persisted_in_camel_case() {
        let mut config = Config::default();
        config.device.known_device = Some(KnownDevice {
            identifier: DeviceId("AA:BB:CC:DD:EE:FF".into()),
            name: "MyGobeName".into(),
            last_connected: DateTime::parse_from_rfc3339("2024-03-01T10:00:00Z").unwrap().with_timezone(&Utc),
        });

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["device"]["knownDevice"]["identifier"], "AA:BB:CC:DD:EE:FF");
        assert_eq!(json["telemetry"]["pollIntervalSecs"], 5);

        let parsed: Config = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn normalize_trims_and_clamps() {
        let mut config = Config::default();
        config.account.login = " me@example.com ".into();
        config.device.pin_code = "010401\n".into();
        config.telemetry.poll_interval_secs = 0;
        config.support_url = "".into();

        config.normalize();

        assert_eq!(config.account.login, "me@example.com");
        assert_eq!(config.device.pin_code, "010401");
        assert_eq!(config.telemetry.poll_interval_secs, 1);
        assert_eq!(config.support_url, DEFAULT_SUPPORT_URL);
    }
}
