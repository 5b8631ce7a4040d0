//! Bosch BME680 over I2C: forced-mode temperature, pressure, humidity and gas.
//!
//! Compensation uses the floating-point formulas from the Bosch BME68x reference API.

use core::fmt;

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use log::{debug, info, warn};

use crate::sensor::{EnvironmentalSensor, Reading, SensorError, SensorSettings};

pub const ADDR_PRIMARY: u8 = 0x77;
pub const ADDR_SECONDARY: u8 = 0x76;

const CHIP_ID: u8 = 0x61;

const REG_CHIP_ID: u8 = 0xD0;
const REG_RESET: u8 = 0xE0;
const REG_CTRL_GAS_0: u8 = 0x70;
const REG_CTRL_GAS_1: u8 = 0x71;
const REG_CTRL_HUM: u8 = 0x72;
const REG_CTRL_MEAS: u8 = 0x74;
const REG_CONFIG: u8 = 0x75;
const REG_RES_HEAT_0: u8 = 0x5A;
const REG_GAS_WAIT_0: u8 = 0x64;
const REG_FIELD_0: u8 = 0x1D;

const REG_COEFF_1: u8 = 0x8A;
const REG_COEFF_2: u8 = 0xE1;
const REG_COEFF_3: u8 = 0x00;
const LEN_COEFF_1: usize = 23;
const LEN_COEFF_2: usize = 14;
const LEN_COEFF_3: usize = 5;
const LEN_COEFF: usize = LEN_COEFF_1 + LEN_COEFF_2 + LEN_COEFF_3;
const LEN_FIELD: usize = 15;

const SOFT_RESET_CMD: u8 = 0xB6;
const MODE_SLEEP: u8 = 0b00;
const MODE_FORCED: u8 = 0b01;
const RUN_GAS: u8 = 0x10;
const HEAT_OFF: u8 = 0x08;

const NEW_DATA: u8 = 0x80;
const GAS_VALID: u8 = 0x20;
const HEAT_STAB: u8 = 0x10;

const AMBIENT_TEMPERATURE_C: f32 = 25.0;
const MAX_HEATER_TEMPERATURE_C: u16 = 400;
const NEW_DATA_POLLS: u32 = 10;
const NEW_DATA_POLL_MS: u32 = 5;

// Gas range correction tables.
const GAS_K1: [f32; 16] = [
    0.0, 0.0, 0.0, 0.0, 0.0, -1.0, 0.0, -0.8, 0.0, 0.0, -0.2, -0.5, 0.0, -1.0, 0.0, 0.0,
];
const GAS_K2: [f32; 16] = [
    0.0, 0.0, 0.0, 0.0, 0.1, 0.7, 0.0, -0.8, -0.1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
];

#[derive(Debug)]
pub enum Bme680Error<E> {
    Bus(E),
    UnexpectedChipId(u8),
    NotInitialized,
    Timeout,
}

impl<E: fmt::Debug> fmt::Display for Bme680Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus(err) => write!(f, "I2C error: {err:?}"),
            Self::UnexpectedChipId(id) => write!(f, "unexpected chip id 0x{id:02X}"),
            Self::NotInitialized => write!(f, "BME680 not initialized"),
            Self::Timeout => write!(f, "timeout waiting for BME680 new data"),
        }
    }
}

impl<E: fmt::Debug> std::error::Error for Bme680Error<E> {}

impl<E: fmt::Debug> From<Bme680Error<E>> for SensorError {
    fn from(err: Bme680Error<E>) -> Self {
        match err {
            Bme680Error::Bus(e) => SensorError::Bus(format!("{e:?}")),
            Bme680Error::UnexpectedChipId(id) => SensorError::NotDetected { chip_id: Some(id) },
            Bme680Error::NotInitialized => SensorError::NotInitialized,
            Bme680Error::Timeout => SensorError::Timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Calibration {
    pub par_t1: u16,
    pub par_t2: i16,
    pub par_t3: i8,
    pub par_p1: u16,
    pub par_p2: i16,
    pub par_p3: i8,
    pub par_p4: i16,
    pub par_p5: i16,
    pub par_p6: i8,
    pub par_p7: i8,
    pub par_p8: i16,
    pub par_p9: i16,
    pub par_p10: u8,
    pub par_h1: u16,
    pub par_h2: u16,
    pub par_h3: i8,
    pub par_h4: i8,
    pub par_h5: i8,
    pub par_h6: u8,
    pub par_h7: i8,
    pub par_gh1: i8,
    pub par_gh2: i16,
    pub par_gh3: i8,
    pub res_heat_val: i8,
    pub res_heat_range: u8,
    pub range_sw_err: i8,
}

impl Calibration {
    /// `c` is the three coefficient blocks concatenated in register order.
    pub fn from_coefficients(c: &[u8; LEN_COEFF]) -> Self {
        let u16le = |lsb: usize, msb: usize| u16::from_le_bytes([c[lsb], c[msb]]);
        let i16le = |lsb: usize, msb: usize| i16::from_le_bytes([c[lsb], c[msb]]);

        Self {
            par_t1: u16le(31, 32),
            par_t2: i16le(0, 1),
            par_t3: c[2] as i8,
            par_p1: u16le(4, 5),
            par_p2: i16le(6, 7),
            par_p3: c[8] as i8,
            par_p4: i16le(10, 11),
            par_p5: i16le(12, 13),
            par_p7: c[14] as i8,
            par_p6: c[15] as i8,
            par_p8: i16le(18, 19),
            par_p9: i16le(20, 21),
            par_p10: c[22],
            par_h1: (u16::from(c[25]) << 4) | u16::from(c[24] & 0x0F),
            par_h2: (u16::from(c[23]) << 4) | u16::from(c[24] >> 4),
            par_h3: c[26] as i8,
            par_h4: c[27] as i8,
            par_h5: c[28] as i8,
            par_h6: c[29],
            par_h7: c[30] as i8,
            par_gh2: i16le(33, 34),
            par_gh1: c[35] as i8,
            par_gh3: c[36] as i8,
            res_heat_val: c[37] as i8,
            res_heat_range: (c[39] & 0x30) >> 4,
            range_sw_err: (c[41] as i8 & 0xF0u8 as i8) / 16,
        }
    }

    /// Returns (°C, t_fine).
    pub fn temperature(&self, adc: u32) -> (f32, f32) {
        let adc = adc as f32;
        let t1 = f32::from(self.par_t1);
        let var1 = (adc / 16384.0 - t1 / 1024.0) * f32::from(self.par_t2);
        let d = adc / 131072.0 - t1 / 8192.0;
        let var2 = d * d * (f32::from(self.par_t3) * 16.0);
        let t_fine = var1 + var2;
        (t_fine / 5120.0, t_fine)
    }

    /// Pa.
    pub fn pressure(&self, adc: u32, t_fine: f32) -> f32 {
        let mut var1 = t_fine / 2.0 - 64000.0;
        let mut var2 = var1 * var1 * (f32::from(self.par_p6) / 131072.0);
        var2 += var1 * f32::from(self.par_p5) * 2.0;
        var2 = var2 / 4.0 + f32::from(self.par_p4) * 65536.0;
        var1 = (f32::from(self.par_p3) * var1 * var1 / 16384.0 + f32::from(self.par_p2) * var1)
            / 524288.0;
        var1 = (1.0 + var1 / 32768.0) * f32::from(self.par_p1);
        if var1 == 0.0 {
            return 0.0;
        }

        let mut p = 1048576.0 - adc as f32;
        p = (p - var2 / 4096.0) * 6250.0 / var1;
        let var1 = f32::from(self.par_p9) * p * p / 2147483648.0;
        let var2 = p * (f32::from(self.par_p8) / 32768.0);
        let scaled = p / 256.0;
        let var3 = scaled * scaled * scaled * (f32::from(self.par_p10) / 131072.0);
        p + (var1 + var2 + var3 + f32::from(self.par_p7) * 128.0) / 16.0
    }

    /// %RH, clamped to 0..=100.
    pub fn humidity(&self, adc: u16, t_fine: f32) -> f32 {
        let temp_comp = t_fine / 5120.0;
        let var1 = f32::from(adc)
            - (f32::from(self.par_h1) * 16.0 + f32::from(self.par_h3) / 2.0 * temp_comp);
        let var2 = var1
            * (f32::from(self.par_h2) / 262144.0
                * (1.0
                    + f32::from(self.par_h4) / 16384.0 * temp_comp
                    + f32::from(self.par_h5) / 1048576.0 * temp_comp * temp_comp));
        let var3 = f32::from(self.par_h6) / 16384.0;
        let var4 = f32::from(self.par_h7) / 2097152.0;
        let h = var2 + (var3 + var4 * temp_comp) * var2 * var2;
        h.clamp(0.0, 100.0)
    }

    /// Ω.
    pub fn gas_resistance(&self, adc: u16, range: u8) -> f32 {
        let range = usize::from(range & 0x0F);
        let var1 = 1340.0 + 5.0 * f32::from(self.range_sw_err);
        let var2 = var1 * (1.0 + GAS_K1[range] / 100.0);
        let var3 = 1.0 + GAS_K2[range] / 100.0;
        let range_f = (1u32 << range) as f32;
        1.0 / (var3 * 0.000000125 * range_f * ((f32::from(adc) - 512.0) / var2 + 1.0))
    }

    /// Heater resistance register value for a target temperature.
    pub fn heater_resistance(&self, target_c: u16, ambient_c: f32) -> u8 {
        let target = f32::from(target_c.min(MAX_HEATER_TEMPERATURE_C));
        let var1 = f32::from(self.par_gh1) / 16.0 + 49.0;
        let var2 = f32::from(self.par_gh2) / 32768.0 * 0.0005 + 0.00235;
        let var3 = f32::from(self.par_gh3) / 1024.0;
        let var4 = var1 * (1.0 + var2 * target);
        let var5 = var4 + var3 * ambient_c;
        let range = f32::from(self.res_heat_range);
        let val = f32::from(self.res_heat_val);
        let res = 3.4 * (var5 * (4.0 / (4.0 + range)) * (1.0 / (1.0 + val * 0.002)) - 25.0);
        res.clamp(0.0, 255.0) as u8
    }
}

/// 6-bit mantissa with a 2-bit ×4 multiplier.
pub fn gas_wait_code(duration_ms: u16) -> u8 {
    if duration_ms >= 0xFC0 {
        return 0xFF;
    }
    let mut dur = duration_ms;
    let mut factor = 0u8;
    while dur > 0x3F {
        dur /= 4;
        factor += 1;
    }
    dur as u8 + factor * 64
}

/// TPH conversion time for the configured oversampling, in ms.
pub fn measurement_duration_ms(settings: &SensorSettings) -> u32 {
    let cycles = settings.temperature_oversampling.cycles()
        + settings.pressure_oversampling.cycles()
        + settings.humidity_oversampling.cycles();
    let us = cycles * 1963 + 477 * 4 + 477 * 5 + 500;
    us / 1000 + 1
}

/// Compensated, driver-unit output of one forced measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub temperature_c: f32,
    pub pressure_pa: f32,
    pub humidity_pct: f32,
    /// `None` when the heater was off, unstable, or the conversion invalid.
    pub gas_resistance_ohm: Option<f32>,
}

pub struct Bme680<I, D> {
    i2c: I,
    delay: D,
    address: u8,
    calibration: Option<Calibration>,
    settings: Option<SensorSettings>,
}

impl<I: I2c, D: DelayNs> Bme680<I, D> {
    pub fn new(i2c: I, delay: D, address: u8) -> Self {
        Self {
            i2c,
            delay,
            address,
            calibration: None,
            settings: None,
        }
    }

    pub fn release(self) -> (I, D) {
        (self.i2c, self.delay)
    }

    fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), Bme680Error<I::Error>> {
        self.i2c
            .write(self.address, &[reg, value])
            .map_err(Bme680Error::Bus)
    }

    fn read_regs(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), Bme680Error<I::Error>> {
        self.i2c
            .write_read(self.address, &[reg], buf)
            .map_err(Bme680Error::Bus)
    }

    pub fn read_chip_id(&mut self) -> Result<u8, Bme680Error<I::Error>> {
        let mut id = [0u8; 1];
        self.read_regs(REG_CHIP_ID, &mut id)?;
        Ok(id[0])
    }

    pub fn init(&mut self) -> Result<(), Bme680Error<I::Error>> {
        self.write_reg(REG_RESET, SOFT_RESET_CMD)?;
        self.delay.delay_ms(10);

        let chip_id = self.read_chip_id()?;
        info!("[BME680] Chip ID: 0x{chip_id:02X}");
        if chip_id != CHIP_ID {
            return Err(Bme680Error::UnexpectedChipId(chip_id));
        }

        let mut coeff = [0u8; LEN_COEFF];
        let (first, rest) = coeff.split_at_mut(LEN_COEFF_1);
        let (second, third) = rest.split_at_mut(LEN_COEFF_2);
        self.read_regs(REG_COEFF_1, first)?;
        self.read_regs(REG_COEFF_2, second)?;
        self.read_regs(REG_COEFF_3, third)?;

        let calibration = Calibration::from_coefficients(&coeff);
        debug!(
            "[BME680] Calibration: T1={}, T2={}, T3={}",
            calibration.par_t1, calibration.par_t2, calibration.par_t3
        );
        self.calibration = Some(calibration);
        Ok(())
    }

    pub fn apply_settings(&mut self, settings: &SensorSettings) -> Result<(), Bme680Error<I::Error>> {
        let calibration = self.calibration.ok_or(Bme680Error::NotInitialized)?;

        // Config registers only latch in sleep mode.
        self.write_reg(REG_CTRL_MEAS, MODE_SLEEP)?;
        self.write_reg(REG_CTRL_HUM, settings.humidity_oversampling.code() & 0x07)?;
        self.write_reg(REG_CONFIG, settings.filter.code() << 2)?;
        self.write_reg(REG_CTRL_MEAS, self.ctrl_meas(settings, MODE_SLEEP))?;

        match settings.heater {
            Some(heater) => {
                let res = calibration.heater_resistance(heater.temperature_c, AMBIENT_TEMPERATURE_C);
                self.write_reg(REG_RES_HEAT_0, res)?;
                self.write_reg(REG_GAS_WAIT_0, gas_wait_code(heater.duration_ms))?;
                self.write_reg(REG_CTRL_GAS_0, 0)?;
                self.write_reg(REG_CTRL_GAS_1, RUN_GAS)?;
                info!(
                    "[BME680] Heater {} C for {} ms (res_heat=0x{res:02X})",
                    heater.temperature_c, heater.duration_ms
                );
            }
            None => {
                self.write_reg(REG_CTRL_GAS_1, 0)?;
                self.write_reg(REG_CTRL_GAS_0, HEAT_OFF)?;
                info!("[BME680] Heater off");
            }
        }

        self.settings = Some(*settings);
        Ok(())
    }

    fn ctrl_meas(&self, settings: &SensorSettings, mode: u8) -> u8 {
        (settings.temperature_oversampling.code() << 5)
            | (settings.pressure_oversampling.code() << 2)
            | mode
    }

    /// Runs one forced-mode conversion and blocks until it completes.
    pub fn perform_reading(&mut self) -> Result<Measurement, Bme680Error<I::Error>> {
        let calibration = self.calibration.ok_or(Bme680Error::NotInitialized)?;
        let settings = self.settings.ok_or(Bme680Error::NotInitialized)?;

        self.write_reg(REG_CTRL_MEAS, self.ctrl_meas(&settings, MODE_FORCED))?;

        let heater_ms = settings.heater.map_or(0, |h| u32::from(h.duration_ms));
        self.delay
            .delay_ms(measurement_duration_ms(&settings) + heater_ms);

        let mut field = [0u8; LEN_FIELD];
        let mut polls = 0;
        loop {
            self.read_regs(REG_FIELD_0, &mut field)?;
            if field[0] & NEW_DATA != 0 {
                break;
            }
            polls += 1;
            if polls >= NEW_DATA_POLLS {
                return Err(Bme680Error::Timeout);
            }
            self.delay.delay_ms(NEW_DATA_POLL_MS);
        }

        let adc_pres =
            (u32::from(field[2]) << 12) | (u32::from(field[3]) << 4) | (u32::from(field[4]) >> 4);
        let adc_temp =
            (u32::from(field[5]) << 12) | (u32::from(field[6]) << 4) | (u32::from(field[7]) >> 4);
        let adc_hum = (u16::from(field[8]) << 8) | u16::from(field[9]);
        let adc_gas = (u16::from(field[13]) << 2) | (u16::from(field[14]) >> 6);
        let gas_range = field[14] & 0x0F;
        let gas_ok = field[14] & GAS_VALID != 0 && field[14] & HEAT_STAB != 0;

        let (temperature_c, t_fine) = calibration.temperature(adc_temp);
        let gas_resistance_ohm = if settings.heater.is_some() && gas_ok {
            Some(calibration.gas_resistance(adc_gas, gas_range))
        } else {
            None
        };

        Ok(Measurement {
            temperature_c,
            pressure_pa: calibration.pressure(adc_pres, t_fine),
            humidity_pct: calibration.humidity(adc_hum, t_fine),
            gas_resistance_ohm,
        })
    }
}

impl<I, D> EnvironmentalSensor for Bme680<I, D>
where
    I: I2c,
    D: DelayNs,
{
    fn begin(&mut self) -> Result<(), SensorError> {
        match self.init() {
            Ok(()) => Ok(()),
            // No ACK at all means nothing is on the bus at this address.
            Err(Bme680Error::Bus(_)) => Err(SensorError::NotDetected { chip_id: None }),
            Err(err) => Err(err.into()),
        }
    }

    fn configure(&mut self, settings: &SensorSettings) -> Result<(), SensorError> {
        Ok(self.apply_settings(settings)?)
    }

    fn read(&mut self) -> Result<Reading, SensorError> {
        let m = self.perform_reading()?;
        let Some(gas) = m.gas_resistance_ohm else {
            warn!("[BME680] Gas measurement not valid");
            return Err(SensorError::InvalidData);
        };
        Reading::from_raw(m.temperature_c, m.pressure_pa, m.humidity_pct, gas)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use embedded_hal::i2c::{ErrorKind, ErrorType, Operation};

    use super::*;
    use crate::config::SENSOR_SETTINGS;

    /// Register-addressed device: a write sets the pointer, following bytes auto-increment.
    struct FakeBus {
        address: u8,
        regs: HashMap<u8, u8>,
        writes: Vec<(u8, u8)>,
        present: bool,
    }

    impl FakeBus {
        fn new() -> Self {
            let mut regs = HashMap::new();
            regs.insert(REG_CHIP_ID, CHIP_ID);
            Self {
                address: ADDR_PRIMARY,
                regs,
                writes: Vec::new(),
                present: true,
            }
        }

        fn set(&mut self, reg: u8, bytes: &[u8]) {
            for (i, b) in bytes.iter().enumerate() {
                self.regs.insert(reg + i as u8, *b);
            }
        }

        fn last_write(&self, reg: u8) -> Option<u8> {
            self.writes
                .iter()
                .rev()
                .find(|(r, _)| *r == reg)
                .map(|(_, v)| *v)
        }
    }

    impl ErrorType for FakeBus {
        type Error = ErrorKind;
    }

    impl I2c for FakeBus {
        fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            if !self.present || address != self.address {
                return Err(ErrorKind::NoAcknowledge(
                    embedded_hal::i2c::NoAcknowledgeSource::Address,
                ));
            }
            let mut pointer = 0u8;
            for op in operations {
                match op {
                    Operation::Write(bytes) => {
                        if let Some((reg, data)) = bytes.split_first() {
                            pointer = *reg;
                            for (i, b) in data.iter().enumerate() {
                                let r = reg.wrapping_add(i as u8);
                                self.regs.insert(r, *b);
                                self.writes.push((r, *b));
                            }
                        }
                    }
                    Operation::Read(buf) => {
                        for (i, b) in buf.iter_mut().enumerate() {
                            *b = *self.regs.get(&pointer.wrapping_add(i as u8)).unwrap_or(&0);
                        }
                    }
                }
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeDelay {
        total_ns: u64,
    }

    impl DelayNs for FakeDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.total_ns += u64::from(ns);
        }
    }

    // T1=0, T2=5120, P1=6250, H2=2048, everything else zero: the
    // compensation collapses to simple ratios of the raw ADC values.
    fn with_simple_calibration(bus: &mut FakeBus) {
        bus.set(REG_COEFF_1, &[0x00, 0x14]);
        bus.set(REG_COEFF_1 + 4, &[0x6A, 0x18]);
        bus.set(REG_COEFF_2, &[0x80, 0x00]);
    }

    fn with_field(bus: &mut FakeBus, status: u8, gas_flags: u8) {
        let mut field = [0u8; LEN_FIELD];
        field[0] = status;
        // pressure adc 947251
        field[2..5].copy_from_slice(&[0xE7, 0x43, 0x30]);
        // temperature adc 385024
        field[5..8].copy_from_slice(&[0x5E, 0x00, 0x00]);
        // humidity adc 5760
        field[8..10].copy_from_slice(&[0x16, 0x80]);
        // gas adc 512, range 0
        field[13] = 0x80;
        field[14] = gas_flags;
        bus.set(REG_FIELD_0, &field);
    }

    fn ready_sensor(status: u8, gas_flags: u8) -> Bme680<FakeBus, FakeDelay> {
        let mut bus = FakeBus::new();
        with_simple_calibration(&mut bus);
        with_field(&mut bus, status, gas_flags);
        let mut sensor = Bme680::new(bus, FakeDelay::default(), ADDR_PRIMARY);
        sensor.begin().unwrap();
        sensor.configure(&SENSOR_SETTINGS).unwrap();
        sensor
    }

    #[test]
    fn begin_rejects_wrong_chip() {
        let mut bus = FakeBus::new();
        bus.set(REG_CHIP_ID, &[0x58]);
        let mut sensor = Bme680::new(bus, FakeDelay::default(), ADDR_PRIMARY);
        assert_eq!(
            sensor.begin(),
            Err(SensorError::NotDetected {
                chip_id: Some(0x58)
            })
        );
    }

    #[test]
    fn begin_reports_absent_device() {
        let mut bus = FakeBus::new();
        bus.present = false;
        let mut sensor = Bme680::new(bus, FakeDelay::default(), ADDR_PRIMARY);
        assert_eq!(sensor.begin(), Err(SensorError::NotDetected { chip_id: None }));
    }

    #[test]
    fn read_before_begin_fails() {
        let mut sensor = Bme680::new(FakeBus::new(), FakeDelay::default(), ADDR_PRIMARY);
        assert_eq!(sensor.read(), Err(SensorError::NotInitialized));
    }

    #[test]
    fn configure_writes_control_registers() {
        let sensor = ready_sensor(NEW_DATA, GAS_VALID | HEAT_STAB);
        let (bus, _) = sensor.release();

        assert_eq!(bus.last_write(REG_RESET), Some(SOFT_RESET_CMD));
        assert_eq!(bus.last_write(REG_CTRL_HUM), Some(0x02));
        // osrs_t=x8 (4), osrs_p=x4 (3), sleep
        assert_eq!(bus.last_write(REG_CTRL_MEAS), Some(0x8C));
        assert_eq!(bus.last_write(REG_CONFIG), Some(0x08));
        assert_eq!(bus.last_write(REG_GAS_WAIT_0), Some(0x65));
        assert_eq!(bus.last_write(REG_RES_HEAT_0), Some(206));
        assert_eq!(bus.last_write(REG_CTRL_GAS_1), Some(RUN_GAS));
    }

    #[test]
    fn compensated_reading_in_upload_units() {
        let mut sensor = ready_sensor(NEW_DATA, GAS_VALID | HEAT_STAB);
        let reading = sensor.read().unwrap();

        assert_eq!(reading.temperature, 23.5);
        assert!((reading.pressure - 1013.25).abs() < 0.01, "{}", reading.pressure);
        assert_eq!(reading.humidity, 45.0);
        // 1 / 1.25e-7 Ω
        assert!((reading.gas_resistance - 8000.0).abs() < 1.0, "{}", reading.gas_resistance);

        let (bus, delay) = sensor.release();
        assert_eq!(bus.last_write(REG_CTRL_MEAS), Some(0x8C | MODE_FORCED));
        assert!(delay.total_ns >= 150_000_000);
    }

    #[test]
    fn unstable_heater_yields_no_reading() {
        let mut sensor = ready_sensor(NEW_DATA, GAS_VALID);
        assert_eq!(sensor.read(), Err(SensorError::InvalidData));
    }

    #[test]
    fn missing_new_data_flag_times_out() {
        let mut sensor = ready_sensor(0x00, GAS_VALID | HEAT_STAB);
        assert_eq!(sensor.read(), Err(SensorError::Timeout));
    }

    #[test]
    fn gas_wait_encoding() {
        assert_eq!(gas_wait_code(63), 63);
        assert_eq!(gas_wait_code(100), 25 + 64);
        assert_eq!(gas_wait_code(150), 37 + 64);
        assert_eq!(gas_wait_code(5000), 0xFF);
    }

    #[test]
    fn measurement_duration_for_default_oversampling() {
        // (8 + 4 + 2) * 1963 + 9 * 477 + 500 = 32275 us
        assert_eq!(measurement_duration_ms(&SENSOR_SETTINGS), 33);
    }

    #[test]
    fn humidity_coefficients_share_a_nibble_byte() {
        let mut c = [0u8; LEN_COEFF];
        c[23] = 0x3F;
        c[24] = 0xA5;
        c[25] = 0x2C;
        let cal = Calibration::from_coefficients(&c);
        assert_eq!(cal.par_h2, 0x3FA);
        assert_eq!(cal.par_h1, 0x2C5);
    }
}
