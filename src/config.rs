// config.rs
//
// Every tunable is fixed at compile time. Site values come from the build
// environment (see build.rs) and fall back to placeholders that `validate()`
// refuses, so a firmware image built without credentials never tries to join.

use std::fmt;
use std::time::Duration;

use crate::sensor::{FilterSize, HeaterProfile, Oversampling, SensorSettings};

pub const WIFI_SSID: &str = match option_env!("WIFI_SSID") {
    Some(v) => v,
    None => "YOUR_WIFI_SSID",
};
pub const WIFI_PASS: &str = match option_env!("WIFI_PASS") {
    Some(v) => v,
    None => "",
};
pub const SUPABASE_URL: &str = match option_env!("SUPABASE_URL") {
    Some(v) => v,
    None => "",
};
pub const SUPABASE_API_KEY: &str = match option_env!("SUPABASE_API_KEY") {
    Some(v) => v,
    None => "",
};
pub const DEVICE_ID: &str = match option_env!("DEVICE_ID") {
    Some(v) => v,
    None => "esp32-bme680",
};

pub const SW_VERSION: &str = env!("CARGO_PKG_VERSION");

// ----------------- Timing -----------------
pub const SEND_DATA_INTERVAL: Duration = Duration::from_millis(2000);
pub const CONNECTED_BLINK_INTERVAL: Duration = Duration::from_millis(1000);
pub const DISCONNECTED_BLINK_INTERVAL: Duration = Duration::from_millis(200);
pub const WIFI_POLL_INTERVAL: Duration = Duration::from_millis(500);
// Re-issue the station connect every N polls while waiting for the link.
pub const WIFI_REKICK_POLLS: u32 = 10;
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(10);
pub const LOOP_IDLE: Duration = Duration::from_millis(10);
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

// ----------------- Pins -----------------
pub const LED_GPIO: i32 = 2;
pub const I2C_SDA_GPIO: i32 = 21;
pub const I2C_SCL_GPIO: i32 = 22;
pub const I2C_BAUDRATE_KHZ: u32 = 100;

// ----------------- Backend -----------------
pub const TABLE_NAME: &str = "sensor_readings";
pub const REALTIME_CHANNEL: &str = "esp";
pub const REALTIME_EVENT: &str = "INSERT";
pub const REALTIME_SCHEMA: &str = "public";
// Empty filter = all rows.
pub const REALTIME_FILTER: &str = "";
pub const REALTIME_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const REALTIME_QUEUE_DEPTH: usize = 8;

// ----------------- Sensor -----------------
pub const SENSOR_SETTINGS: SensorSettings = SensorSettings {
    temperature_oversampling: Oversampling::X8,
    humidity_oversampling: Oversampling::X2,
    pressure_oversampling: Oversampling::X4,
    filter: FilterSize::Size3,
    heater: Some(HeaterProfile {
        temperature_c: 320,
        duration_ms: 150,
    }),
};

/// Seconds between uploads, as reported in every record.
pub const fn refresh_interval_seconds() -> u32 {
    (SEND_DATA_INTERVAL.as_millis() / 1000) as u32
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    WifiSsidMissing,
    WifiSsidTooLong,
    WifiPassTooLong,
    BackendUrlMissing,
    BackendUrlInvalid,
    ApiKeyMissing,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WifiSsidMissing => write!(f, "WIFI_SSID not configured"),
            Self::WifiSsidTooLong => write!(f, "WIFI_SSID longer than 32 bytes"),
            Self::WifiPassTooLong => write!(f, "WIFI_PASS longer than 64 bytes"),
            Self::BackendUrlMissing => write!(f, "SUPABASE_URL not configured"),
            Self::BackendUrlInvalid => write!(f, "SUPABASE_URL must start with https:// or http://"),
            Self::ApiKeyMissing => write!(f, "SUPABASE_API_KEY not configured"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Everything the firmware needs from its build environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiteConfig<'a> {
    pub ssid: &'a str,
    pub password: &'a str,
    pub backend_url: &'a str,
    pub api_key: &'a str,
    pub device_id: &'a str,
}

impl SiteConfig<'static> {
    pub const fn from_build_env() -> Self {
        Self {
            ssid: WIFI_SSID,
            password: WIFI_PASS,
            backend_url: SUPABASE_URL,
            api_key: SUPABASE_API_KEY,
            device_id: DEVICE_ID,
        }
    }
}

impl SiteConfig<'_> {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ssid.is_empty() || self.ssid == "YOUR_WIFI_SSID" {
            return Err(ConfigError::WifiSsidMissing);
        }
        if self.ssid.len() > 32 {
            return Err(ConfigError::WifiSsidTooLong);
        }
        if self.password.len() > 64 {
            return Err(ConfigError::WifiPassTooLong);
        }
        let url = self.backend_url.trim();
        if url.is_empty() {
            return Err(ConfigError::BackendUrlMissing);
        }
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(ConfigError::BackendUrlInvalid);
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::ApiKeyMissing);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> SiteConfig<'static> {
        SiteConfig {
            ssid: "lab",
            password: "secret",
            backend_url: "https://abc.supabase.co",
            api_key: "anon",
            device_id: "abc123",
        }
    }

    #[test]
    fn refresh_interval_is_whole_seconds() {
        assert_eq!(refresh_interval_seconds(), 2);
    }

    #[test]
    fn complete_site_config_passes() {
        assert_eq!(site().validate(), Ok(()));
    }

    #[test]
    fn placeholder_ssid_is_rejected() {
        let cfg = SiteConfig {
            ssid: "YOUR_WIFI_SSID",
            ..site()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::WifiSsidMissing));
    }

    #[test]
    fn backend_url_needs_scheme() {
        let cfg = SiteConfig {
            backend_url: "abc.supabase.co",
            ..site()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::BackendUrlInvalid));

        let cfg = SiteConfig {
            api_key: " ",
            ..site()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ApiKeyMissing));
    }
}
