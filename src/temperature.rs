use crate::debug_flags::{self, DEBUG_TEMP};
use crate::sensors::TemperatureSource;

/// Readings kept inline before the buffer has to grow.
const INITIAL_CAPACITY: usize = 64;

/// Averages a fixed number of thermometer reads, skipping failures.
pub struct TemperatureSampler<'a, T: TemperatureSource + ?Sized> {
    source: &'a mut T,
}

impl<'a, T: TemperatureSource + ?Sized> TemperatureSampler<'a, T> {
    pub fn new(source: &'a mut T) -> Self {
        Self { source }
    }

    /// Attempt exactly `n` reads and return the mean of the ones that
    /// succeeded, or 0.0 if none did.
    pub fn acquire(&mut self, n: usize) -> f32 {
        let mut readings: Vec<f32> = Vec::with_capacity(n.min(INITIAL_CAPACITY));
        for attempt in 1..=n {
            match self.source.read() {
                Some(t) => {
                    log::log!(
                        debug_flags::level(&DEBUG_TEMP),
                        "TEMP: read {}/{} = {:.1} C",
                        attempt,
                        n,
                        t
                    );
                    readings.push(t);
                }
                None => log::warn!("Sensor failure. Check wiring ({}/{})", attempt, n),
            }
        }

        if readings.is_empty() {
            log::warn!("No valid temperature readings this cycle");
            return 0.0;
        }
        let avg = readings.iter().sum::<f32>() / readings.len() as f32;
        log::info!(
            "Temperature: {:.1} C over {}/{} reads",
            avg,
            readings.len(),
            n
        );
        avg
    }
}
