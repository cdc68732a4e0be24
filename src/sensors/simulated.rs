//! Desktop stand-ins for the PPG and temperature sensors.

use std::f32::consts::PI;
use std::thread;
use std::time::Duration;

use super::{PpgSample, SampleBatch, SignalSource, TemperatureSource};
use crate::error::SensorError;

const SAMPLE_RATE_HZ: f32 = 25.0;
const IR_DC: f32 = 100_000.0;
const RED_DC: f32 = 80_000.0;

/// Bpm per simulated cycle; the third and sixth cycles are tachycardic so the
/// alert path gets exercised.
const BPM_SCRIPT: [f32; 6] = [72.0, 78.0, 118.0, 66.0, 84.0, 130.0];

/// Synthetic pulse waveform. The "finger" arrives a couple of batches after
/// every reset, like a patient re-seating their hand.
pub struct SimulatedPpg {
    phase: f32,
    cycle: usize,
    batches_since_reset: usize,
    finger_after: usize,
    sample_period: Duration,
    powered: bool,
}

impl SimulatedPpg {
    pub fn new(sample_period: Duration) -> Self {
        Self {
            phase: 0.0,
            cycle: 0,
            batches_since_reset: 0,
            finger_after: 2,
            sample_period,
            powered: true,
        }
    }

    fn bpm(&self) -> f32 {
        BPM_SCRIPT[self.cycle % BPM_SCRIPT.len()]
    }
}

impl SignalSource for SimulatedPpg {
    fn read_batch(&mut self, size: usize) -> Result<SampleBatch, SensorError> {
        if !self.powered {
            log::debug!("SIM PPG: waking from shutdown");
            self.powered = true;
        }
        thread::sleep(self.sample_period * size as u32);

        let finger = self.batches_since_reset >= self.finger_after;
        self.batches_since_reset += 1;
        let step = self.bpm() / 60.0 / SAMPLE_RATE_HZ;

        let batch = SampleBatch::from_samples((0..size).map(|_| {
            self.phase = (self.phase + step).fract();
            if !finger {
                return PpgSample::new(2_000, 1_500);
            }
            let wave = (2.0 * PI * self.phase).sin();
            PpgSample::new(
                (IR_DC + 1_000.0 * wave) as u32,
                (RED_DC + 400.0 * wave) as u32,
            )
        }));
        Ok(batch)
    }

    fn reset(&mut self) -> Result<(), SensorError> {
        self.batches_since_reset = 0;
        self.phase = 0.0;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), SensorError> {
        self.powered = false;
        self.cycle += 1;
        Ok(())
    }
}

/// Slowly drifting body temperature; every seventh read fails.
pub struct SimulatedThermometer {
    reads: u32,
}

impl SimulatedThermometer {
    pub fn new() -> Self {
        Self { reads: 0 }
    }
}

impl TemperatureSource for SimulatedThermometer {
    fn read(&mut self) -> Option<f32> {
        self.reads += 1;
        if self.reads % 7 == 0 {
            return None;
        }
        Some(36.4 + 0.4 * ((self.reads as f32) / 40.0).sin())
    }
}
