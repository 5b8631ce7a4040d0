//! Desktop stand-ins for the board, so the loop can run without hardware.

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use log::{info, warn};
use serde_json::{json, Value};

use crate::clock::{Clock, SystemClock};
use crate::config::{
    refresh_interval_seconds, LOOP_IDLE, REALTIME_CHANNEL, REALTIME_EVENT, REALTIME_FILTER,
    REALTIME_HEARTBEAT_INTERVAL, REALTIME_QUEUE_DEPTH, REALTIME_SCHEMA, SENSOR_SETTINGS,
    TABLE_NAME,
};
use crate::driver::Driver;
use crate::network::{NetworkError, NetworkLink};
use crate::realtime::{ChangeSubscription, LiveUpdateListener, RealtimeTransport, TransportError};
use crate::rest::PostgrestQuery;
use crate::sensor::{EnvironmentalSensor, Reading, SensorError, SensorSettings};
use crate::status::StatusOutput;
use crate::telemetry::{DeviceContext, RemoteStore, TelemetryUploader};

const SIM_BASE_URL: &str = "http://localhost:54321";
const SIM_API_KEY: &str = "sim-anon-key";
const SIM_SSID: &str = "sim-network";
const LINK_UP_AFTER: Duration = Duration::from_millis(1500);
const LINK_DROP_AT: Duration = Duration::from_secs(8);
const LINK_DROP_FOR: Duration = Duration::from_secs(3);
// Every Nth read times out.
const FAILING_READ_EVERY: u32 = 7;

/// Slow sine waves around typical indoor values.
#[derive(Default)]
pub struct SimulatedSensor {
    started: bool,
    reads: u32,
}

impl EnvironmentalSensor for SimulatedSensor {
    fn begin(&mut self) -> Result<(), SensorError> {
        self.started = true;
        Ok(())
    }

    fn configure(&mut self, settings: &SensorSettings) -> Result<(), SensorError> {
        info!("[BME680] Simulated settings: {settings:?}");
        Ok(())
    }

    fn read(&mut self) -> Result<Reading, SensorError> {
        if !self.started {
            return Err(SensorError::NotInitialized);
        }
        self.reads += 1;
        if self.reads % FAILING_READ_EVERY == 0 {
            return Err(SensorError::Timeout);
        }
        let t = self.reads as f32 / 5.0;
        Reading::from_raw(
            22.0 + 2.0 * t.sin(),
            101_325.0 + 150.0 * (t / 2.0).sin(),
            45.0 + 5.0 * t.cos(),
            15_000.0 + 3_000.0 * (t / 3.0).sin(),
        )
    }
}

/// Comes up shortly after `begin`, drops once, then recovers.
#[derive(Default)]
pub struct SimulatedLink {
    begun: Option<Instant>,
    ssid: String,
}

impl NetworkLink for SimulatedLink {
    fn begin(&mut self, ssid: &str, _password: &str) -> Result<(), NetworkError> {
        self.begun = Some(Instant::now());
        self.ssid = ssid.to_string();
        Ok(())
    }

    fn request_connect(&mut self) {
        info!("[WiFi] (sim) connect requested");
    }

    fn is_connected(&self) -> bool {
        let Some(begun) = self.begun else {
            return false;
        };
        let up = begun.elapsed();
        let dropped = up >= LINK_DROP_AT && up < LINK_DROP_AT + LINK_DROP_FOR;
        up >= LINK_UP_AFTER && !dropped
    }

    fn ssid(&self) -> String {
        self.ssid.clone()
    }

    fn local_ip(&self) -> Option<Ipv4Addr> {
        self.is_connected().then_some(Ipv4Addr::new(192, 168, 4, 2))
    }
}

pub struct ConsoleLed;

impl StatusOutput for ConsoleLed {
    fn set_level(&mut self, high: bool) {
        info!("[LED] {}", if high { "on" } else { "off" });
    }
}

/// Logs each request and answers 201. Inserted rows are forwarded to `LoopbackRealtime`.
pub struct LoggingStore {
    query: PostgrestQuery,
    echo: Option<Sender<(String, String)>>,
}

impl LoggingStore {
    pub fn new(echo: Option<Sender<(String, String)>>) -> Self {
        Self {
            query: PostgrestQuery::new(),
            echo,
        }
    }
}

impl RemoteStore for LoggingStore {
    fn insert(&mut self, table: &str, json_payload: &str, upsert: bool) -> i32 {
        self.query.insert(table, json_payload, upsert);
        let url = self.query.url(SIM_BASE_URL).unwrap_or_default();
        let prefer = self
            .query
            .headers(SIM_API_KEY)
            .into_iter()
            .find(|(name, _)| *name == "Prefer")
            .map(|(_, v)| v)
            .unwrap_or_default();
        info!("[HTTP] (sim) POST {url} Prefer: {prefer}");

        if let Some(echo) = &self.echo {
            let _ = echo.send((table.to_string(), json_payload.to_string()));
        }
        201
    }

    fn reset_query(&mut self) {
        self.query.reset();
    }
}

/// Answers joins and heartbeats, and replays inserted rows as change frames.
pub struct LoopbackRealtime {
    inserts: Receiver<(String, String)>,
    pending: VecDeque<String>,
    topic: String,
}

impl LoopbackRealtime {
    pub fn new(inserts: Receiver<(String, String)>) -> Self {
        Self {
            inserts,
            pending: VecDeque::new(),
            topic: String::new(),
        }
    }
}

impl RealtimeTransport for LoopbackRealtime {
    fn is_connected(&self) -> bool {
        true
    }

    fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        let frame: Value =
            serde_json::from_str(text).map_err(|err| TransportError::Send(err.to_string()))?;
        let topic = frame["topic"].as_str().unwrap_or_default().to_string();
        if frame["event"] == "phx_join" {
            self.topic = topic.clone();
        }
        let reply = json!({
            "topic": topic,
            "event": "phx_reply",
            "payload": { "status": "ok", "response": {} },
            "ref": frame["ref"],
        });
        self.pending.push_back(reply.to_string());
        Ok(())
    }

    fn try_recv(&mut self) -> Option<String> {
        if let Some(frame) = self.pending.pop_front() {
            return Some(frame);
        }
        let (table, payload) = self.inserts.try_recv().ok()?;
        let record: Value = serde_json::from_str(&payload).unwrap_or(Value::Null);
        let change = json!({
            "topic": self.topic,
            "event": "postgres_changes",
            "payload": {
                "data": {
                    "type": REALTIME_EVENT,
                    "schema": REALTIME_SCHEMA,
                    "table": table,
                    "record": record,
                }
            },
            "ref": null,
        });
        Some(change.to_string())
    }
}

/// Runs the full boot sequence and loop for `duration`.
pub fn run(duration: Duration) -> Result<()> {
    let clock = SystemClock::new();
    let (echo_tx, echo_rx) = mpsc::channel();

    let uploader = TelemetryUploader::new(
        LoggingStore::new(Some(echo_tx)),
        DeviceContext {
            device_id: crate::config::DEVICE_ID.to_string(),
            refresh_interval_seconds: refresh_interval_seconds(),
        },
        TABLE_NAME,
    );

    let mut listener = LiveUpdateListener::new(
        LoopbackRealtime::new(echo_rx),
        REALTIME_CHANNEL,
        SIM_API_KEY,
        REALTIME_HEARTBEAT_INTERVAL,
        REALTIME_QUEUE_DEPTH,
    );
    listener.subscribe(ChangeSubscription::new(
        TABLE_NAME,
        REALTIME_EVENT,
        REALTIME_SCHEMA,
        REALTIME_FILTER,
    ));

    let mut driver = Driver::new(
        SimulatedSensor::default(),
        SimulatedLink::default(),
        ConsoleLed,
        uploader,
        &clock,
    )
    .with_listener(listener);

    driver
        .boot(&SENSOR_SETTINGS)
        .map_err(|err| anyhow!("boot failed: {err}"))?;
    driver
        .connect(SIM_SSID, "")
        .map_err(|err| anyhow!("connect failed: {err}"))?;
    driver.start_services();

    let until = clock.now_ms() + duration.as_millis() as u64;
    while clock.now_ms() < until {
        driver.run_once();
        clock.sleep(LOOP_IDLE);
    }

    if driver.listener().is_some_and(|l| l.is_joined()) {
        info!("[Realtime] Channel still joined at exit");
    } else {
        warn!("[Realtime] Channel not joined at exit");
    }
    Ok(())
}
