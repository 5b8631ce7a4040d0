use std::fmt;
use std::ops::{Deref, DerefMut};

use log::{error, info, warn};
use serde::Serialize;

use crate::sensor::Reading;

/// Response code a store returns when the server could not be reached at all.
pub const CONNECTION_FAILURE: i32 = -100;

/// Row shape of the `sensor_readings` table.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TelemetryRecord<'a> {
    pub device_id: &'a str,
    pub temperature: f32,
    pub pressure: f32,
    pub humidity: f32,
    #[serde(rename = "gas")]
    pub gas_resistance: f32,
    #[serde(rename = "ssid")]
    pub network_ssid: &'a str,
    #[serde(rename = "refresh_time")]
    pub refresh_interval_seconds: u32,
}

impl<'a> TelemetryRecord<'a> {
    pub fn new(reading: &Reading, context: &'a DeviceContext, ssid: &'a str) -> Self {
        Self {
            device_id: &context.device_id,
            temperature: reading.temperature,
            pressure: reading.pressure,
            humidity: reading.humidity,
            gas_resistance: reading.gas_resistance,
            network_ssid: ssid,
            refresh_interval_seconds: context.refresh_interval_seconds,
        }
    }
}

/// Static metadata attached to every record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceContext {
    pub device_id: String,
    pub refresh_interval_seconds: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    ServerUnreachable,
    TransportError(i32),
    Delivered(i32),
    UnexpectedResponse(i32),
}

impl UploadOutcome {
    pub fn from_code(code: i32) -> Self {
        match code {
            CONNECTION_FAILURE => Self::ServerUnreachable,
            i32::MIN..=-1 => Self::TransportError(code),
            200..=299 => Self::Delivered(code),
            _ => Self::UnexpectedResponse(code),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Delivered(_))
    }

    pub fn log(&self) {
        match self {
            Self::ServerUnreachable => error!("[HTTP] Error: could not reach the Supabase server"),
            Self::TransportError(code) => error!("[HTTP] Unknown error: code {code}"),
            Self::Delivered(code) => info!("[HTTP] Data sent. Response code: {code}"),
            Self::UnexpectedResponse(code) => warn!("[HTTP] Unexpected response: code {code}"),
        }
    }
}

#[derive(Debug)]
pub enum UploadError {
    Serialize(serde_json::Error),
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serialize(err) => write!(f, "record serialization failed: {err}"),
        }
    }
}

impl std::error::Error for UploadError {}

impl From<serde_json::Error> for UploadError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialize(err)
    }
}

/// A REST-style remote table store.
pub trait RemoteStore {
    /// Returns the HTTP status, or a negative transport code.
    fn insert(&mut self, table: &str, json_payload: &str, upsert: bool) -> i32;

    /// Drop any per-request builder state.
    fn reset_query(&mut self);
}

/// Borrow of a store for one request. Dropping it resets the store's query state.
pub struct QueryScope<'a, S: RemoteStore> {
    store: &'a mut S,
}

impl<'a, S: RemoteStore> QueryScope<'a, S> {
    pub fn new(store: &'a mut S) -> Self {
        Self { store }
    }
}

impl<S: RemoteStore> Deref for QueryScope<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.store
    }
}

impl<S: RemoteStore> DerefMut for QueryScope<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.store
    }
}

impl<S: RemoteStore> Drop for QueryScope<'_, S> {
    fn drop(&mut self) {
        self.store.reset_query();
    }
}

pub struct TelemetryUploader<S> {
    store: S,
    context: DeviceContext,
    table: String,
}

impl<S: RemoteStore> TelemetryUploader<S> {
    pub fn new(store: S, context: DeviceContext, table: &str) -> Self {
        Self {
            store,
            context,
            table: table.to_string(),
        }
    }

    pub fn context(&self) -> &DeviceContext {
        &self.context
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// One fire-and-forget insert. No retry; the next scheduled upload is the retry.
    pub fn upload(&mut self, reading: &Reading, ssid: &str) -> Result<UploadOutcome, UploadError> {
        let mut scope = QueryScope::new(&mut self.store);

        let record = TelemetryRecord::new(reading, &self.context, ssid);
        let payload = serde_json::to_string(&record)?;

        info!("[HTTP] Sending data to Supabase...");
        info!("{payload}");

        let code = scope.insert(&self.table, &payload, false);
        let outcome = UploadOutcome::from_code(code);
        outcome.log();
        Ok(outcome)
    }
}
