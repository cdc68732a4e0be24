//! Fakes shared by the unit tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::SensorError;
use crate::estimator::{Estimate, VitalEstimator};
use crate::outputs::Switch;
use crate::report::{CycleVitals, Reporter};
use crate::sensors::{PpgSample, SampleBatch, SignalSource, TemperatureSource};
use crate::timing::Clock;

/// Virtual time: `sleep` advances `now` instantly.
#[derive(Default)]
pub struct FakeClock {
    now: Mutex<Duration>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, d: Duration) {
        *self.now.lock().unwrap() += d;
    }
}

#[derive(Default)]
pub struct RecordingSwitch {
    history: Vec<bool>,
}

impl RecordingSwitch {
    pub fn history(&self) -> &[bool] {
        &self.history
    }

    pub fn is_on(&self) -> bool {
        self.history.last().copied().unwrap_or(false)
    }

    /// Number of off→on transitions.
    pub fn rising_edges(&self) -> usize {
        let mut prev = false;
        let mut n = 0;
        for &on in &self.history {
            if on && !prev {
                n += 1;
            }
            prev = on;
        }
        n
    }
}

impl Switch for RecordingSwitch {
    fn set(&mut self, on: bool) {
        self.history.push(on);
    }
}

pub fn batch_of(ir: u32, red: u32, n: usize) -> SampleBatch {
    SampleBatch::from_samples(std::iter::repeat(PpgSample::new(ir, red)).take(n))
}

pub fn finger() -> SampleBatch {
    batch_of(100_000, 90_000, 8)
}

pub fn no_finger() -> SampleBatch {
    batch_of(1_200, 900, 8)
}

/// Replays a fixed list of read results. Runs dry with a device error so a
/// broken test fails instead of hanging.
#[derive(Default)]
pub struct ScriptedSource {
    script: VecDeque<Result<SampleBatch, SensorError>>,
    pub reads: usize,
    pub resets: usize,
    pub shutdowns: usize,
}

impl ScriptedSource {
    pub fn new(script: impl IntoIterator<Item = Result<SampleBatch, SensorError>>) -> Self {
        Self {
            script: script.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl SignalSource for ScriptedSource {
    fn read_batch(&mut self, _size: usize) -> Result<SampleBatch, SensorError> {
        self.reads += 1;
        self.script.pop_front().unwrap_or_else(|| {
            Err(SensorError::Device {
                sensor: "scripted",
                details: "script exhausted".into(),
            })
        })
    }

    fn reset(&mut self) -> Result<(), SensorError> {
        self.resets += 1;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), SensorError> {
        self.shutdowns += 1;
        Ok(())
    }
}

/// Returns queued estimates in order, then invalid ones.
#[derive(Default)]
pub struct ScriptedEstimator {
    script: RefCell<VecDeque<Estimate>>,
}

impl ScriptedEstimator {
    pub fn new(script: impl IntoIterator<Item = Estimate>) -> Self {
        Self {
            script: RefCell::new(script.into_iter().collect()),
        }
    }

    pub fn calls_left(&self) -> usize {
        self.script.borrow().len()
    }
}

impl VitalEstimator for ScriptedEstimator {
    fn estimate(&self, _batch: &SampleBatch) -> Estimate {
        self.script.borrow_mut().pop_front().unwrap_or_default()
    }
}

pub fn valid(heart_rate: f32, spo2: f32) -> Estimate {
    Estimate {
        heart_rate,
        heart_rate_valid: true,
        spo2,
        spo2_valid: true,
    }
}

#[derive(Default)]
pub struct ScriptedThermometer {
    script: VecDeque<Option<f32>>,
    pub reads: usize,
}

impl ScriptedThermometer {
    pub fn new(script: impl IntoIterator<Item = Option<f32>>) -> Self {
        Self {
            script: script.into_iter().collect(),
            reads: 0,
        }
    }
}

impl TemperatureSource for ScriptedThermometer {
    fn read(&mut self) -> Option<f32> {
        self.reads += 1;
        self.script.pop_front().flatten()
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    pub sent: Vec<CycleVitals>,
    pub fail: bool,
}

impl Reporter for RecordingReporter {
    fn report(&mut self, vitals: &CycleVitals) -> anyhow::Result<u16> {
        self.sent.push(*vitals);
        if self.fail {
            anyhow::bail!("connection refused");
        }
        Ok(200)
    }
}
