use std::fmt;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::{LOOP_IDLE, RECONNECT_INTERVAL, SEND_DATA_INTERVAL, WIFI_POLL_INTERVAL};
use crate::network::{self, ConnectivityState, NetworkError, NetworkLink, RetryPolicy};
use crate::realtime::{LiveEvent, LiveUpdateListener, RealtimeTransport};
use crate::sensor::{EnvironmentalSensor, SensorError, SensorSettings};
use crate::status::{blink_interval_for, StatusIndicator, StatusOutput};
use crate::telemetry::{RemoteStore, TelemetryUploader, UploadOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Booting,
    WaitingForWiFi,
    Operational,
}

/// Fires when at least `period` has passed since it last fired.
#[derive(Debug, Clone, Copy)]
pub struct Interval {
    period: Duration,
    last_ms: u64,
}

impl Interval {
    pub fn new(period: Duration) -> Self {
        Self { period, last_ms: 0 }
    }

    pub fn due(&mut self, now_ms: u64) -> bool {
        if now_ms.saturating_sub(self.last_ms) < self.period.as_millis() as u64 {
            return false;
        }
        self.last_ms = now_ms;
        true
    }

    pub fn restart(&mut self, now_ms: u64) {
        self.last_ms = now_ms;
    }
}

#[derive(Debug)]
pub enum BootError {
    SensorMissing(SensorError),
    SensorConfig(SensorError),
    Network(NetworkError),
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SensorMissing(err) => write!(f, "sensor missing: {err}"),
            Self::SensorConfig(err) => write!(f, "sensor configuration failed: {err}"),
            Self::Network(err) => write!(f, "network bring-up failed: {err}"),
        }
    }
}

impl std::error::Error for BootError {}

impl From<NetworkError> for BootError {
    fn from(err: NetworkError) -> Self {
        Self::Network(err)
    }
}

pub type EventHandler = Box<dyn FnMut(&LiveEvent)>;

/// Default message handler: print what arrived.
pub fn log_live_event(event: &LiveEvent) {
    match event {
        LiveEvent::Change { raw } => {
            info!("[Realtime] Message received:");
            info!("{raw}");
        }
        LiveEvent::JoinRejected { reason } => warn!("[Realtime] Subscription refused: {reason}"),
    }
}

/// Owns every collaborator and runs the cooperative loop.
pub struct Driver<S, N, O, R, T, C> {
    sensor: S,
    link: N,
    status: StatusIndicator<O>,
    uploader: TelemetryUploader<R>,
    listener: Option<LiveUpdateListener<T>>,
    on_event: EventHandler,
    clock: C,
    state: DriverState,
    retry_policy: RetryPolicy,
    upload_timer: Interval,
    reconnect_timer: Interval,
    link_lost: bool,
}

impl<S, N, O, R, T, C> Driver<S, N, O, R, T, C>
where
    S: EnvironmentalSensor,
    N: NetworkLink,
    O: StatusOutput,
    R: RemoteStore,
    T: RealtimeTransport,
    C: Clock,
{
    pub fn new(sensor: S, link: N, led: O, uploader: TelemetryUploader<R>, clock: C) -> Self {
        Self {
            sensor,
            link,
            status: StatusIndicator::new(led),
            uploader,
            listener: None,
            on_event: Box::new(log_live_event),
            clock,
            state: DriverState::Booting,
            retry_policy: RetryPolicy::default(),
            upload_timer: Interval::new(SEND_DATA_INTERVAL),
            reconnect_timer: Interval::new(RECONNECT_INTERVAL),
            link_lost: false,
        }
    }

    pub fn with_listener(mut self, listener: LiveUpdateListener<T>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_event_handler(mut self, handler: impl FnMut(&LiveEvent) + 'static) -> Self {
        self.on_event = Box::new(handler);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn link(&self) -> &N {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut N {
        &mut self.link
    }

    pub fn status(&self) -> &StatusIndicator<O> {
        &self.status
    }

    pub fn uploader(&self) -> &TelemetryUploader<R> {
        &self.uploader
    }

    pub fn listener(&self) -> Option<&LiveUpdateListener<T>> {
        self.listener.as_ref()
    }

    pub fn listener_mut(&mut self) -> Option<&mut LiveUpdateListener<T>> {
        self.listener.as_mut()
    }

    /// Booting -> WaitingForWiFi. A missing sensor is fatal.
    pub fn boot(&mut self, settings: &SensorSettings) -> Result<(), BootError> {
        info!("[BME680] Starting sensor...");
        if let Err(err) = self.sensor.begin() {
            error!("[BME680] Sensor not found! ({err})");
            return Err(BootError::SensorMissing(err));
        }
        self.sensor
            .configure(settings)
            .map_err(BootError::SensorConfig)?;
        info!("[BME680] Sensor initialized");

        self.state = DriverState::WaitingForWiFi;
        Ok(())
    }

    /// WaitingForWiFi -> Operational. Blocks until the link is up.
    pub fn connect(&mut self, ssid: &str, password: &str) -> Result<(), BootError> {
        network::connect_blocking(
            &mut self.link,
            ssid,
            password,
            &mut self.status,
            &self.clock,
            WIFI_POLL_INTERVAL,
            self.retry_policy,
        )?;
        self.state = DriverState::Operational;
        Ok(())
    }

    /// Starts the live listener and sends one test record. The send window
    /// restarts at that insert, so the first periodic upload is a full interval later.
    pub fn start_services(&mut self) {
        if let Some(listener) = self.listener.as_mut() {
            listener.listen();
        }

        info!("[HTTP] Testing HTTP insert...");
        self.send_sensor_data();
        self.upload_timer.restart(self.clock.now_ms());
        info!("[HTTP] Test complete");
    }

    /// Reads the sensor and uploads one record. A failed read skips the upload.
    pub fn send_sensor_data(&mut self) -> Option<UploadOutcome> {
        let reading = match self.sensor.read() {
            Ok(reading) => reading,
            Err(err) => {
                error!("[BME680] Error reading sensor data: {err}");
                return None;
            }
        };

        let ssid = self.link.ssid();
        match self.uploader.upload(&reading, &ssid) {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                error!("[HTTP] {err}");
                None
            }
        }
    }

    /// One cooperative tick: listener, upload, reconnect, blink.
    /// Returns the outcome of the upload attempted this tick, if any.
    pub fn run_once(&mut self) -> Option<UploadOutcome> {
        if self.state != DriverState::Operational {
            debug!("run_once in {:?}, ignored", self.state);
            return None;
        }
        let now = self.clock.now_ms();

        if let Some(listener) = self.listener.as_mut() {
            listener.service(now);
            while let Some(event) = listener.next_event() {
                (self.on_event)(&event);
            }
        }

        let connectivity = self.link.connectivity();

        let mut outcome = None;
        if self.upload_timer.due(now) {
            outcome = match connectivity {
                ConnectivityState::Connected => self.send_sensor_data(),
                ConnectivityState::Disconnected => {
                    // No request is opened while the link is down.
                    let skipped = UploadOutcome::ServerUnreachable;
                    skipped.log();
                    Some(skipped)
                }
            };
        }

        self.watch_link(connectivity, now);
        self.status.tick(now, blink_interval_for(connectivity));
        outcome
    }

    fn watch_link(&mut self, connectivity: ConnectivityState, now: u64) {
        match (connectivity, self.link_lost) {
            (ConnectivityState::Disconnected, false) => {
                warn!("[WiFi] Connection lost, reconnecting...");
                self.link_lost = true;
                self.reconnect_timer.restart(now);
                self.link.request_connect();
            }
            (ConnectivityState::Disconnected, true) => {
                if self.reconnect_timer.due(now) {
                    info!("[WiFi] Still disconnected, retrying connect...");
                    self.link.request_connect();
                }
            }
            (ConnectivityState::Connected, true) => {
                match self.link.local_ip() {
                    Some(ip) => info!("[WiFi] Reconnected! IP: {ip}"),
                    None => info!("[WiFi] Reconnected!"),
                }
                self.link_lost = false;
            }
            (ConnectivityState::Connected, false) => {}
        }
    }

    pub fn run(&mut self) -> ! {
        loop {
            self.run_once();
            self.clock.sleep(LOOP_IDLE);
        }
    }
}

/// Never returns. Used when boot fails and there is nothing useful left to do.
pub fn halt<C: Clock>(clock: &C, reason: &BootError) -> ! {
    error!("Halting: {reason}");
    loop {
        clock.sleep(Duration::from_secs(1));
    }
}
