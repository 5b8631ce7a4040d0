use std::net::Ipv4Addr;

use anyhow::Result;
use embedded_svc::wifi::{AuthMethod, ClientConfiguration, Configuration};
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::EspWifi;
use log::warn;

use crate::network::{NetworkError, NetworkLink};

/// Non-blocking station: the driver's retry loop owns the waiting.
pub struct EspNetworkLink {
    wifi: EspWifi<'static>,
    ssid: String,
}

impl EspNetworkLink {
    pub fn new(modem: Modem) -> Result<Self> {
        let sys_loop = EspSystemEventLoop::take()?;
        let nvs = EspDefaultNvsPartition::take()?;
        let wifi = EspWifi::new(modem, sys_loop, Some(nvs))?;
        Ok(Self {
            wifi,
            ssid: String::new(),
        })
    }
}

impl NetworkLink for EspNetworkLink {
    fn begin(&mut self, ssid: &str, password: &str) -> Result<(), NetworkError> {
        let auth_method = if password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };

        let cfg = Configuration::Client(ClientConfiguration {
            ssid: ssid
                .try_into()
                .map_err(|_| NetworkError::Config("WIFI_SSID too long"))?,
            password: password
                .try_into()
                .map_err(|_| NetworkError::Config("WIFI_PASS too long"))?,
            auth_method,
            ..Default::default()
        });

        let driver = |err: esp_idf_svc::sys::EspError| NetworkError::Driver(err.to_string());
        self.wifi.set_configuration(&cfg).map_err(driver)?;
        if !self.wifi.is_started().map_err(driver)? {
            self.wifi.start().map_err(driver)?;
        }
        self.wifi.connect().map_err(driver)?;
        self.ssid = ssid.to_string();
        Ok(())
    }

    fn request_connect(&mut self) {
        // Fails while an attempt is already in flight; the next kick retries.
        if let Err(err) = self.wifi.connect() {
            warn!("[WiFi] connect request failed: {err}");
        }
    }

    fn is_connected(&self) -> bool {
        self.wifi.is_up().unwrap_or(false)
    }

    fn ssid(&self) -> String {
        self.ssid.clone()
    }

    fn local_ip(&self) -> Option<Ipv4Addr> {
        self.wifi.sta_netif().get_ip_info().ok().map(|info| info.ip)
    }
}
