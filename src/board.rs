use anyhow::Result;
use esp_idf_hal::gpio::{AnyOutputPin, Output, PinDriver};
use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
use esp_idf_hal::modem::Modem;
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_hal::prelude::*;
use log::{info, warn};

use crate::config::{I2C_BAUDRATE_KHZ, I2C_SCL_GPIO, I2C_SDA_GPIO, LED_GPIO};
use crate::status::StatusOutput;

// ESP32 DevKit: BME680 on I2C0 (SDA=GPIO21, SCL=GPIO22), status LED on GPIO2.
pub struct Board {
    pub i2c: I2cDriver<'static>,
    pub led: StatusLed,
    pub modem: Modem,
}

impl Board {
    pub fn init() -> Result<Self> {
        let Peripherals {
            pins, i2c0, modem, ..
        } = Peripherals::take()?;

        let i2c_cfg = I2cConfig::new().baudrate(I2C_BAUDRATE_KHZ.kHz().into());
        let i2c = I2cDriver::new(i2c0, pins.gpio21, pins.gpio22, &i2c_cfg)?;

        let led = StatusLed(PinDriver::output(AnyOutputPin::from(pins.gpio2))?);
        info!(
            "[Board] I2C0 SDA=GPIO{I2C_SDA_GPIO} SCL=GPIO{I2C_SCL_GPIO} @ {I2C_BAUDRATE_KHZ} kHz, LED=GPIO{LED_GPIO}"
        );

        Ok(Self { i2c, led, modem })
    }
}

pub struct StatusLed(PinDriver<'static, AnyOutputPin, Output>);

impl StatusOutput for StatusLed {
    fn set_level(&mut self, high: bool) {
        let res = if high {
            self.0.set_high()
        } else {
            self.0.set_low()
        };
        if let Err(err) = res {
            warn!("[LED] GPIO write failed: {err}");
        }
    }
}
