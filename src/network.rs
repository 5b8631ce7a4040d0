use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use log::{info, warn};

use crate::clock::Clock;
use crate::config::{DISCONNECTED_BLINK_INTERVAL, WIFI_REKICK_POLLS};
use crate::status::{StatusIndicator, StatusOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Disconnected,
    Connected,
}

impl From<bool> for ConnectivityState {
    fn from(connected: bool) -> Self {
        if connected {
            Self::Connected
        } else {
            Self::Disconnected
        }
    }
}

#[derive(Debug)]
pub enum NetworkError {
    Config(&'static str),
    Driver(String),
    GaveUp { attempts: u32 },
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(what) => write!(f, "invalid WiFi configuration: {what}"),
            Self::Driver(err) => write!(f, "WiFi driver error: {err}"),
            Self::GaveUp { attempts } => write!(f, "WiFi not connected after {attempts} polls"),
        }
    }
}

impl std::error::Error for NetworkError {}

/// A wireless station link.
pub trait NetworkLink {
    /// Configure the station and start a connection attempt. Does not wait for the link.
    fn begin(&mut self, ssid: &str, password: &str) -> Result<(), NetworkError>;

    /// Re-issue a connection attempt with the configuration given to `begin`.
    fn request_connect(&mut self);

    /// Cheap, non-blocking: associated and holding an address.
    fn is_connected(&self) -> bool;

    /// SSID of the configured network.
    fn ssid(&self) -> String;

    fn local_ip(&self) -> Option<Ipv4Addr>;

    fn connectivity(&self) -> ConnectivityState {
        self.is_connected().into()
    }
}

/// How long `connect_blocking` keeps polling before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Unattended deployment: nobody is there to cancel, so never give up.
    #[default]
    Unbounded,
    MaxAttempts(u32),
}

impl RetryPolicy {
    pub fn exhausted(&self, attempts: u32) -> bool {
        match self {
            Self::Unbounded => false,
            Self::MaxAttempts(max) => attempts >= *max,
        }
    }
}

/// Starts the link and blocks until it is up, blinking the status LED at the
/// disconnected rate so a human can see the attempt in progress.
pub fn connect_blocking<N, O, C>(
    link: &mut N,
    ssid: &str,
    password: &str,
    status: &mut StatusIndicator<O>,
    clock: &C,
    poll_interval: Duration,
    policy: RetryPolicy,
) -> Result<u32, NetworkError>
where
    N: NetworkLink,
    O: StatusOutput,
    C: Clock,
{
    info!("[WiFi] Connecting to {ssid:?}...");
    link.begin(ssid, password)?;

    let mut polls = 0u32;
    while !link.is_connected() {
        status.tick(clock.now_ms(), DISCONNECTED_BLINK_INTERVAL);
        clock.sleep(poll_interval);
        polls += 1;

        if policy.exhausted(polls) {
            warn!("[WiFi] Giving up after {polls} polls");
            return Err(NetworkError::GaveUp { attempts: polls });
        }
        if polls % WIFI_REKICK_POLLS == 0 {
            info!("[WiFi] Still waiting ({polls} polls), retrying connect...");
            link.request_connect();
        }
    }

    match link.local_ip() {
        Some(ip) => info!("[WiFi] Connected! IP: {ip}"),
        None => info!("[WiFi] Connected!"),
    }
    Ok(polls)
}
