//! BME680 environmental telemetry node: WiFi, Supabase REST uploads and
//! Realtime change notifications on an ESP32.

pub mod bme680;
pub mod clock;
pub mod config;
pub mod driver;
pub mod network;
pub mod realtime;
pub mod rest;
pub mod sensor;
pub mod status;
pub mod telemetry;

#[cfg(target_os = "espidf")]
pub mod board;
#[cfg(target_os = "espidf")]
pub mod supabase;
#[cfg(target_os = "espidf")]
pub mod wifi;
#[cfg(all(target_os = "espidf", feature = "realtime"))]
pub mod ws_transport;

#[cfg(not(target_os = "espidf"))]
pub mod simulator;
