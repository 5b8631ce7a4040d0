use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::Duration;

use env_telemetry::clock::Clock;
use env_telemetry::config::{SENSOR_SETTINGS, TABLE_NAME};
use env_telemetry::driver::{BootError, Driver, DriverState};
use env_telemetry::network::{NetworkError, NetworkLink, RetryPolicy};
use env_telemetry::realtime::{
    ChangeSubscription, LiveEvent, LiveUpdateListener, RealtimeTransport, TransportError,
};
use env_telemetry::sensor::{EnvironmentalSensor, Reading, SensorError, SensorSettings};
use env_telemetry::status::StatusOutput;
use env_telemetry::telemetry::{DeviceContext, RemoteStore, TelemetryUploader, CONNECTION_FAILURE};

#[derive(Default)]
struct TestClock {
    now: Cell<u64>,
}

impl Clock for TestClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }

    fn sleep_ms(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }
}

struct Bench {
    fail_reads: VecDeque<bool>,
}

impl EnvironmentalSensor for Bench {
    fn begin(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    fn configure(&mut self, _settings: &SensorSettings) -> Result<(), SensorError> {
        Ok(())
    }

    fn read(&mut self) -> Result<Reading, SensorError> {
        if self.fail_reads.pop_front().unwrap_or(false) {
            return Err(SensorError::Timeout);
        }
        Reading::from_raw(23.5, 101_325.0, 50.0, 15_000.0)
    }
}

struct Absent;

impl EnvironmentalSensor for Absent {
    fn begin(&mut self) -> Result<(), SensorError> {
        Err(SensorError::NotDetected { chip_id: Some(0x60) })
    }

    fn configure(&mut self, _settings: &SensorSettings) -> Result<(), SensorError> {
        Ok(())
    }

    fn read(&mut self) -> Result<Reading, SensorError> {
        Err(SensorError::NotInitialized)
    }
}

/// Comes up on the `up_after`-th poll.
struct Link {
    up_after: u32,
    polls: Cell<u32>,
    ssid: String,
}

impl Link {
    fn up_after(up_after: u32) -> Self {
        Self {
            up_after,
            polls: Cell::new(0),
            ssid: String::new(),
        }
    }
}

impl NetworkLink for Link {
    fn begin(&mut self, ssid: &str, _password: &str) -> Result<(), NetworkError> {
        self.ssid = ssid.to_string();
        Ok(())
    }

    fn request_connect(&mut self) {}

    fn is_connected(&self) -> bool {
        let polls = self.polls.get() + 1;
        self.polls.set(polls);
        polls > self.up_after
    }

    fn ssid(&self) -> String {
        self.ssid.clone()
    }

    fn local_ip(&self) -> Option<Ipv4Addr> {
        None
    }
}

#[derive(Default)]
struct Led {
    writes: Rc<RefCell<Vec<bool>>>,
}

impl StatusOutput for Led {
    fn set_level(&mut self, high: bool) {
        self.writes.borrow_mut().push(high);
    }
}

#[derive(Default)]
struct Store {
    codes: VecDeque<i32>,
    payloads: Vec<String>,
    resets: u32,
    /// Inserted rows, shared with the transport that echoes them back.
    echo: Rc<RefCell<VecDeque<String>>>,
}

impl RemoteStore for Store {
    fn insert(&mut self, _table: &str, json_payload: &str, _upsert: bool) -> i32 {
        self.payloads.push(json_payload.to_string());
        self.echo.borrow_mut().push_back(json_payload.to_string());
        self.codes.pop_front().unwrap_or(201)
    }

    fn reset_query(&mut self) {
        self.resets += 1;
    }
}

struct Echo {
    rows: Rc<RefCell<VecDeque<String>>>,
    replies: VecDeque<String>,
}

impl RealtimeTransport for Echo {
    fn is_connected(&self) -> bool {
        true
    }

    fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        let frame: serde_json::Value =
            serde_json::from_str(text).map_err(|e| TransportError::Send(e.to_string()))?;
        if frame["event"] == "phx_join" {
            self.replies.push_back(
                serde_json::json!({
                    "topic": frame["topic"],
                    "event": "phx_reply",
                    "payload": { "status": "ok", "response": {} },
                    "ref": frame["ref"],
                })
                .to_string(),
            );
        }
        Ok(())
    }

    fn try_recv(&mut self) -> Option<String> {
        if let Some(reply) = self.replies.pop_front() {
            return Some(reply);
        }
        let row = self.rows.borrow_mut().pop_front()?;
        Some(format!(
            r#"{{"topic":"realtime:esp","event":"postgres_changes","payload":{{"record":{row}}},"ref":null}}"#
        ))
    }
}

fn uploader(store: Store) -> TelemetryUploader<Store> {
    TelemetryUploader::new(
        store,
        DeviceContext {
            device_id: "abc123".into(),
            refresh_interval_seconds: 2,
        },
        TABLE_NAME,
    )
}

#[test]
fn boots_connects_and_reports() {
    let clock = TestClock::default();
    let led = Led::default();
    let led_writes = Rc::clone(&led.writes);

    let mut store = Store::default();
    store.codes.extend([201, CONNECTION_FAILURE, 500, 201]);
    let echo_rows = Rc::clone(&store.echo);

    let mut listener = LiveUpdateListener::new(
        Echo {
            rows: echo_rows,
            replies: VecDeque::new(),
        },
        "esp",
        "anon",
        Duration::from_secs(30),
        8,
    );
    listener.subscribe(ChangeSubscription::new(TABLE_NAME, "INSERT", "public", ""));

    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);

    let mut driver = Driver::new(
        Bench {
            fail_reads: VecDeque::from([false, false, true]),
        },
        Link::up_after(6),
        led,
        uploader(store),
        &clock,
    )
    .with_listener(listener)
    .with_event_handler(move |e: &LiveEvent| sink.borrow_mut().push(e.clone()));

    driver.boot(&SENSOR_SETTINGS).unwrap();
    assert_eq!(driver.state(), DriverState::WaitingForWiFi);

    driver.connect("lab", "secret").unwrap();
    assert_eq!(driver.state(), DriverState::Operational);
    // Six 500 ms polls, fast blink while waiting.
    assert_eq!(clock.now_ms(), 3000);
    assert!(led_writes.borrow().len() > 1);

    driver.start_services();
    let start = clock.now_ms();
    assert_eq!(driver.uploader().store().payloads.len(), 1);

    // Nothing more until a full send interval after the startup insert.
    clock.sleep_ms(10);
    driver.run_once();
    assert_eq!(driver.uploader().store().payloads.len(), 1);

    while clock.now_ms() < start + 9000 {
        clock.sleep_ms(10);
        driver.run_once();
    }

    // Startup insert at 3 s, then 5 s, 7 s (read fails), 9 s, 11 s.
    let store = driver.uploader().store();
    assert_eq!(store.payloads.len(), 4);
    assert_eq!(store.resets, 4);
    assert!(store.payloads.iter().all(|p| p.contains(r#""pressure":1013.25"#)));
    assert!(store.payloads.iter().all(|p| p.contains(r#""gas":15.0"#)));

    assert!(driver.listener().unwrap().is_joined());
    let events = events.borrow();
    assert_eq!(events.len(), 4);
    assert!(events
        .iter()
        .all(|e| matches!(e, LiveEvent::Change { raw } if raw.contains("abc123"))));
}

#[test]
fn bounded_connect_reports_failure() {
    let clock = TestClock::default();
    let mut driver: Driver<_, _, _, _, Echo, _> = Driver::new(
        Bench {
            fail_reads: VecDeque::new(),
        },
        Link::up_after(u32::MAX),
        Led::default(),
        uploader(Store::default()),
        &clock,
    )
    .with_retry_policy(RetryPolicy::MaxAttempts(4));

    driver.boot(&SENSOR_SETTINGS).unwrap();
    let err = driver.connect("lab", "").unwrap_err();
    assert!(matches!(
        err,
        BootError::Network(NetworkError::GaveUp { attempts: 4 })
    ));
    assert_eq!(driver.state(), DriverState::WaitingForWiFi);
}

#[test]
fn absent_sensor_is_fatal_at_boot() {
    let clock = TestClock::default();
    let mut driver: Driver<_, _, _, _, Echo, _> = Driver::new(
        Absent,
        Link::up_after(0),
        Led::default(),
        uploader(Store::default()),
        &clock,
    );

    let err = driver.boot(&SENSOR_SETTINGS).unwrap_err();
    assert!(matches!(
        err,
        BootError::SensorMissing(SensorError::NotDetected { chip_id: Some(0x60) })
    ));
    assert_eq!(driver.state(), DriverState::Booting);
}
