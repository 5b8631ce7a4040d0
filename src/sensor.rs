use std::fmt;

/// One environmental sample in upload units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// °C
    pub temperature: f32,
    /// hPa
    pub pressure: f32,
    /// %RH
    pub humidity: f32,
    /// kΩ
    pub gas_resistance: f32,
}

impl Reading {
    /// Builds a reading from driver units: pressure in Pa, gas resistance in Ω.
    pub fn from_raw(
        temperature_c: f32,
        pressure_pa: f32,
        humidity_pct: f32,
        gas_ohm: f32,
    ) -> Result<Self, SensorError> {
        let reading = Self {
            temperature: temperature_c,
            pressure: pressure_pa / 100.0,
            humidity: humidity_pct,
            gas_resistance: gas_ohm / 1000.0,
        };
        let all_finite = [
            reading.temperature,
            reading.pressure,
            reading.humidity,
            reading.gas_resistance,
        ]
        .iter()
        .all(|v| v.is_finite());
        if !all_finite {
            return Err(SensorError::InvalidData);
        }
        Ok(reading)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Oversampling {
    None,
    X1,
    X2,
    X4,
    X8,
    X16,
}

impl Oversampling {
    /// Register field value.
    pub const fn code(self) -> u8 {
        match self {
            Self::None => 0,
            Self::X1 => 1,
            Self::X2 => 2,
            Self::X4 => 3,
            Self::X8 => 4,
            Self::X16 => 5,
        }
    }

    pub const fn cycles(self) -> u32 {
        match self {
            Self::None => 0,
            Self::X1 => 1,
            Self::X2 => 2,
            Self::X4 => 4,
            Self::X8 => 8,
            Self::X16 => 16,
        }
    }
}

/// IIR filter coefficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterSize {
    Size0,
    Size1,
    Size3,
    Size7,
    Size15,
    Size31,
    Size63,
    Size127,
}

impl FilterSize {
    pub const fn code(self) -> u8 {
        match self {
            Self::Size0 => 0,
            Self::Size1 => 1,
            Self::Size3 => 2,
            Self::Size7 => 3,
            Self::Size15 => 4,
            Self::Size31 => 5,
            Self::Size63 => 6,
            Self::Size127 => 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaterProfile {
    pub temperature_c: u16,
    pub duration_ms: u16,
}

/// Applied once after `begin`; there is no runtime reconfiguration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorSettings {
    pub temperature_oversampling: Oversampling,
    pub humidity_oversampling: Oversampling,
    pub pressure_oversampling: Oversampling,
    pub filter: FilterSize,
    /// `None` turns the gas heater off.
    pub heater: Option<HeaterProfile>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorError {
    NotDetected { chip_id: Option<u8> },
    Bus(String),
    NotInitialized,
    Timeout,
    InvalidData,
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotDetected { chip_id: Some(id) } => {
                write!(f, "sensor not detected (chip id 0x{id:02X})")
            }
            Self::NotDetected { chip_id: None } => write!(f, "sensor not detected (no bus response)"),
            Self::Bus(err) => write!(f, "sensor bus error: {err}"),
            Self::NotInitialized => write!(f, "sensor used before begin()"),
            Self::Timeout => write!(f, "timeout waiting for measurement"),
            Self::InvalidData => write!(f, "measurement incomplete or out of range"),
        }
    }
}

impl std::error::Error for SensorError {}

pub trait EnvironmentalSensor {
    /// Probe and reset the device. Failure is fatal to the caller.
    fn begin(&mut self) -> Result<(), SensorError>;

    fn configure(&mut self, settings: &SensorSettings) -> Result<(), SensorError>;

    /// Blocking single-shot measurement.
    fn read(&mut self) -> Result<Reading, SensorError>;
}
