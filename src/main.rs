// main.rs
// ESP32 DevKit + BME680 (I2C0: SDA=GPIO21, SCL=GPIO22), status LED on GPIO2.
//
// Boot: sensor -> WiFi (blocking, LED blinks fast) -> Realtime listener -> test insert.
// Loop: service Realtime, insert a reading every 2 s, blink 1 s while connected.
//
// On a desktop target the same loop runs against simulated hardware:
//   cargo run -- 30   # seconds, default 20

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    use esp_idf_hal::delay::FreeRtos;
    use esp_idf_svc::log::EspLogger;
    use log::{info, warn};

    use env_telemetry::bme680::{self, Bme680};
    use env_telemetry::board::Board;
    use env_telemetry::clock::SystemClock;
    use env_telemetry::config::{
        refresh_interval_seconds, SiteConfig, SENSOR_SETTINGS, SW_VERSION, TABLE_NAME,
    };
    use env_telemetry::driver::{halt, Driver};
    use env_telemetry::supabase::SupabaseStore;
    use env_telemetry::telemetry::{DeviceContext, TelemetryUploader};
    use env_telemetry::wifi::EspNetworkLink;

    #[cfg(feature = "realtime")]
    type Transport = env_telemetry::ws_transport::EspRealtimeTransport;
    #[cfg(not(feature = "realtime"))]
    type Transport = env_telemetry::realtime::NoTransport;

    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();
    info!("env-telemetry v{SW_VERSION}");

    let site = SiteConfig::from_build_env();
    site.validate()?;

    let board = Board::init()?;
    let sensor = Bme680::new(board.i2c, FreeRtos, bme680::ADDR_PRIMARY);
    let link = EspNetworkLink::new(board.modem)?;
    let uploader = TelemetryUploader::new(
        SupabaseStore::new(site.backend_url, site.api_key),
        DeviceContext {
            device_id: site.device_id.to_string(),
            refresh_interval_seconds: refresh_interval_seconds(),
        },
        TABLE_NAME,
    );

    let mut driver: Driver<_, _, _, _, Transport, _> =
        Driver::new(sensor, link, board.led, uploader, SystemClock::new());

    if let Err(err) = driver.boot(&SENSOR_SETTINGS) {
        halt(&SystemClock::new(), &err);
    }
    driver.connect(site.ssid, site.password)?;

    #[cfg(feature = "realtime")]
    let mut driver = match realtime_listener(&site) {
        Ok(listener) => driver.with_listener(listener),
        Err(err) => {
            warn!("[Realtime] Listener unavailable: {err}");
            driver
        }
    };
    #[cfg(not(feature = "realtime"))]
    warn!("[Realtime] Built without the realtime feature");

    driver.start_services();
    driver.run()
}

#[cfg(all(target_os = "espidf", feature = "realtime"))]
fn realtime_listener(
    site: &env_telemetry::config::SiteConfig<'_>,
) -> anyhow::Result<
    env_telemetry::realtime::LiveUpdateListener<env_telemetry::ws_transport::EspRealtimeTransport>,
> {
    use anyhow::anyhow;
    use env_telemetry::config::{
        REALTIME_CHANNEL, REALTIME_EVENT, REALTIME_FILTER, REALTIME_HEARTBEAT_INTERVAL,
        REALTIME_QUEUE_DEPTH, REALTIME_SCHEMA, TABLE_NAME,
    };
    use env_telemetry::realtime::{realtime_endpoint, ChangeSubscription, LiveUpdateListener};
    use env_telemetry::ws_transport::EspRealtimeTransport;

    let url = realtime_endpoint(site.backend_url, site.api_key)
        .ok_or_else(|| anyhow!("SUPABASE_URL has no http(s) scheme"))?;
    let transport = EspRealtimeTransport::connect(&url)?;

    let mut listener = LiveUpdateListener::new(
        transport,
        REALTIME_CHANNEL,
        site.api_key,
        REALTIME_HEARTBEAT_INTERVAL,
        REALTIME_QUEUE_DEPTH,
    );
    listener.subscribe(ChangeSubscription::new(
        TABLE_NAME,
        REALTIME_EVENT,
        REALTIME_SCHEMA,
        REALTIME_FILTER,
    ));
    Ok(listener)
}

#[cfg(not(target_os = "espidf"))]
fn main() -> anyhow::Result<()> {
    use std::time::Duration;

    use anyhow::Context;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let seconds = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse::<u64>()
            .with_context(|| format!("usage: env-telemetry [seconds], got {arg:?}"))?,
        None => 20,
    };
    env_telemetry::simulator::run(Duration::from_secs(seconds))
}
