use esp_idf_hal::delay::{Ets, FreeRtos};
use esp_idf_hal::gpio::{InputOutput, InputPin, OutputPin, PinDriver};

use super::TemperatureSource;

/// The sensor refuses to convert more often than this.
const MIN_INTERVAL_MS: u32 = 1_100;
const ATTEMPTS: u32 = 3;

/// DHT11 on a single open-drain data line.
pub struct Dht11<'d, P: InputPin + OutputPin> {
    pin: PinDriver<'d, P, InputOutput>,
    last_read_us: Option<i64>,
}

fn now_us() -> i64 {
    unsafe { esp_idf_sys::esp_timer_get_time() }
}

impl<'d, P: InputPin + OutputPin> Dht11<'d, P> {
    pub fn new(mut pin: PinDriver<'d, P, InputOutput>) -> Self {
        if let Err(e) = pin.set_high() {
            log::warn!("DHT11: idling data line failed: {}", e);
        }
        Self {
            pin,
            last_read_us: None,
        }
    }

    /// Microseconds until the line reaches `high`, or `None` on timeout.
    fn wait_for(&self, high: bool, timeout_us: i64) -> Option<i64> {
        let start = now_us();
        loop {
            let elapsed = now_us() - start;
            if self.pin.is_high() == high {
                return Some(elapsed);
            }
            if elapsed > timeout_us {
                return None;
            }
        }
    }

    fn read_frame(&mut self) -> Result<[u8; 5], &'static str> {
        if let Some(last) = self.last_read_us {
            let wait_us = MIN_INTERVAL_MS as i64 * 1000 - (now_us() - last);
            if wait_us > 0 {
                FreeRtos::delay_ms((wait_us / 1000) as u32 + 1);
            }
        }
        self.last_read_us = Some(now_us());

        self.pin.set_low().map_err(|_| "gpio write")?;
        FreeRtos::delay_ms(20);
        self.pin.set_high().map_err(|_| "gpio write")?;
        Ets::delay_us(30);

        // sensor response: ~80 us low, ~80 us high
        self.wait_for(false, 100).ok_or("no response")?;
        self.wait_for(true, 100).ok_or("no response")?;
        self.wait_for(false, 100).ok_or("no response")?;

        let mut data = [0u8; 5];
        for bit in 0..40 {
            self.wait_for(true, 80).ok_or("bit start timeout")?;
            let high_us = self.wait_for(false, 100).ok_or("bit end timeout")?;
            if high_us > 40 {
                data[bit / 8] |= 0x80 >> (bit % 8);
            }
        }

        let sum = data[..4].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        if sum != data[4] {
            return Err("checksum mismatch");
        }
        Ok(data)
    }
}

impl<P: InputPin + OutputPin> TemperatureSource for Dht11<'_, P> {
    fn read(&mut self) -> Option<f32> {
        for attempt in 1..=ATTEMPTS {
            match self.read_frame() {
                Ok(data) => {
                    let magnitude = data[2] as f32 + (data[3] & 0x7F) as f32 * 0.1;
                    return Some(if data[3] & 0x80 != 0 { -magnitude } else { magnitude });
                }
                Err(e) => log::debug!("DHT11 attempt {}/{} failed: {}", attempt, ATTEMPTS, e),
            }
        }
        None
    }
}
