use std::thread;
use std::time::Duration;

use esp_idf_hal::i2c::I2cDriver;
use esp_idf_sys::EspError;

use super::{PpgSample, SampleBatch, SignalSource};
use crate::error::SensorError;

const SENSOR: &str = "MAX30102";
const ADDR: u8 = 0x57;
const I2C_TIMEOUT_TICKS: u32 = 100;

const REG_INTR_STATUS_1: u8 = 0x00;
const REG_INTR_ENABLE_1: u8 = 0x02;
const REG_INTR_ENABLE_2: u8 = 0x03;
const REG_FIFO_WR_PTR: u8 = 0x04;
const REG_OVF_COUNTER: u8 = 0x05;
const REG_FIFO_RD_PTR: u8 = 0x06;
const REG_FIFO_DATA: u8 = 0x07;
const REG_FIFO_CONFIG: u8 = 0x08;
const REG_MODE_CONFIG: u8 = 0x09;
const REG_SPO2_CONFIG: u8 = 0x0A;
const REG_LED1_PA: u8 = 0x0C;
const REG_LED2_PA: u8 = 0x0D;
const REG_PILOT_PA: u8 = 0x10;
const REG_PART_ID: u8 = 0xFF;

const PART_ID: u8 = 0x15;
const MODE_SPO2: u8 = 0x03;
const MODE_RESET: u8 = 0x40;
const MODE_SHDN: u8 = 0x80;

const FIFO_DEPTH: usize = 32;
const BYTES_PER_SAMPLE: usize = 6;
const SAMPLE_MASK: u32 = 0x03_FFFF;

/// Longest gap without a new FIFO entry before a read is abandoned. The
/// sensor produces 25 samples/s, so this is several sample periods.
const DATA_TIMEOUT: Duration = Duration::from_millis(250);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// MAX30102 pulse-oximetry front end, red LED on slot 1 and IR on slot 2,
/// 100 Hz with 4-sample averaging.
pub struct Max30102<'d> {
    i2c: I2cDriver<'d>,
    powered: bool,
}

fn bus_err(operation: &'static str) -> impl FnOnce(EspError) -> SensorError {
    move |e| SensorError::Bus {
        sensor: SENSOR,
        operation,
        details: e.to_string(),
    }
}

impl<'d> Max30102<'d> {
    pub fn new(i2c: I2cDriver<'d>) -> Result<Self, SensorError> {
        let mut dev = Self { i2c, powered: false };
        let id = dev.read_reg(REG_PART_ID)?;
        if id != PART_ID {
            return Err(SensorError::Device {
                sensor: SENSOR,
                details: format!("unexpected part id 0x{:02X}", id),
            });
        }
        dev.reset()?;
        log::info!("MAX30102 ready");
        Ok(dev)
    }

    fn write_reg(&mut self, reg: u8, val: u8) -> Result<(), SensorError> {
        self.i2c
            .write(ADDR, &[reg, val], I2C_TIMEOUT_TICKS)
            .map_err(bus_err("register write"))
    }

    fn read_reg(&mut self, reg: u8) -> Result<u8, SensorError> {
        let mut v = [0u8; 1];
        self.i2c
            .write_read(ADDR, &[reg], &mut v, I2C_TIMEOUT_TICKS)
            .map_err(bus_err("register read"))?;
        Ok(v[0])
    }

    fn configure(&mut self) -> Result<(), SensorError> {
        self.write_reg(REG_INTR_ENABLE_1, 0xC0)?;
        self.write_reg(REG_INTR_ENABLE_2, 0x00)?;
        self.write_reg(REG_FIFO_WR_PTR, 0x00)?;
        self.write_reg(REG_OVF_COUNTER, 0x00)?;
        self.write_reg(REG_FIFO_RD_PTR, 0x00)?;
        // sample average 4, no FIFO rollover, almost-full at 17 unread
        self.write_reg(REG_FIFO_CONFIG, 0x4F)?;
        self.write_reg(REG_MODE_CONFIG, MODE_SPO2)?;
        // ADC range 4096 nA, 100 Hz, 18-bit
        self.write_reg(REG_SPO2_CONFIG, 0x27)?;
        self.write_reg(REG_LED1_PA, 0x24)?;
        self.write_reg(REG_LED2_PA, 0x24)?;
        self.write_reg(REG_PILOT_PA, 0x7F)?;
        self.powered = true;
        Ok(())
    }

    /// Unread FIFO entries; a non-zero overflow counter means the FIFO is full.
    fn available(&mut self) -> Result<usize, SensorError> {
        if self.read_reg(REG_OVF_COUNTER)? > 0 {
            return Ok(FIFO_DEPTH);
        }
        let wr = self.read_reg(REG_FIFO_WR_PTR)?;
        let rd = self.read_reg(REG_FIFO_RD_PTR)?;
        Ok((wr.wrapping_sub(rd) & 0x1F) as usize)
    }

    fn read_fifo(&mut self, count: usize, out: &mut Vec<PpgSample>) -> Result<(), SensorError> {
        let mut buf = [0u8; FIFO_DEPTH * BYTES_PER_SAMPLE];
        let bytes = &mut buf[..count * BYTES_PER_SAMPLE];
        self.i2c
            .write_read(ADDR, &[REG_FIFO_DATA], bytes, I2C_TIMEOUT_TICKS)
            .map_err(bus_err("fifo read"))?;
        for chunk in bytes.chunks_exact(BYTES_PER_SAMPLE) {
            let red = u32::from_be_bytes([0, chunk[0], chunk[1], chunk[2]]) & SAMPLE_MASK;
            let ir = u32::from_be_bytes([0, chunk[3], chunk[4], chunk[5]]) & SAMPLE_MASK;
            out.push(PpgSample::new(ir, red));
        }
        Ok(())
    }
}

impl SignalSource for Max30102<'_> {
    fn read_batch(&mut self, size: usize) -> Result<SampleBatch, SensorError> {
        if !self.powered {
            self.write_reg(REG_MODE_CONFIG, MODE_SPO2)?;
            self.powered = true;
        }

        let mut samples = Vec::with_capacity(size);
        let mut idle = Duration::ZERO;
        while samples.len() < size {
            let available = self.available()?;
            if available == 0 {
                if idle >= DATA_TIMEOUT {
                    return Err(SensorError::Timeout {
                        sensor: SENSOR,
                        operation: "FIFO data",
                        waited_ms: idle.as_millis() as u64,
                    });
                }
                thread::sleep(POLL_INTERVAL);
                idle += POLL_INTERVAL;
                continue;
            }
            idle = Duration::ZERO;
            let take = available.min(size - samples.len());
            self.read_fifo(take, &mut samples)?;
        }
        Ok(SampleBatch::from_samples(samples))
    }

    fn reset(&mut self) -> Result<(), SensorError> {
        self.write_reg(REG_MODE_CONFIG, MODE_RESET)?;
        for _ in 0..10 {
            thread::sleep(Duration::from_millis(1));
            if self.read_reg(REG_MODE_CONFIG)? & MODE_RESET == 0 {
                // reading the status register clears the power-ready flag
                self.read_reg(REG_INTR_STATUS_1)?;
                return self.configure();
            }
        }
        Err(SensorError::Device {
            sensor: SENSOR,
            details: "soft reset did not complete".into(),
        })
    }

    fn shutdown(&mut self) -> Result<(), SensorError> {
        let mode = self.read_reg(REG_MODE_CONFIG)?;
        self.write_reg(REG_MODE_CONFIG, mode | MODE_SHDN)?;
        self.powered = false;
        Ok(())
    }
}
