use crate::alert::beep;
use crate::cancel::CancelToken;
use crate::config::{MonitorConfig, HUMAN_BPM_MAX, HUMAN_BPM_MIN};
use crate::debug_flags::{self, DEBUG_PPG};
use crate::error::CycleError;
use crate::estimator::{Estimate, VitalEstimator};
use crate::outputs::Switch;
use crate::sensors::SignalSource;
use crate::timing::{pause, Clock};

/// One accepted heart-rate / SpO2 pair, or the average of several.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VitalReading {
    pub heart_rate: f32,
    pub spo2: f32,
}

impl VitalReading {
    /// Keep an estimate only if the estimator trusts both values and the
    /// heart rate is humanly possible.
    pub fn accept(est: &Estimate) -> Option<Self> {
        let plausible = (HUMAN_BPM_MIN..=HUMAN_BPM_MAX).contains(&est.heart_rate);
        (est.heart_rate_valid && est.spo2_valid && plausible).then_some(Self {
            heart_rate: est.heart_rate,
            spo2: est.spo2,
        })
    }

    /// Arithmetic mean; zero for an empty slice.
    pub fn mean(readings: &[VitalReading]) -> Self {
        if readings.is_empty() {
            return Self::default();
        }
        let n = readings.len() as f32;
        let (hr, spo2) = readings
            .iter()
            .fold((0.0f32, 0.0f32), |(hr, o), r| (hr + r.heart_rate, o + r.spo2));
        Self {
            heart_rate: hr / n,
            spo2: spo2 / n,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FingerState {
    Unknown,
    Absent,
    Present,
}

/// Pulls batches from the PPG sensor until enough plausible readings are
/// collected. Borrows every handle it touches for the duration of one cycle.
pub struct AcquisitionLoop<'a, S: SignalSource + ?Sized, E: VitalEstimator + ?Sized> {
    source: &'a mut S,
    estimator: &'a E,
    buzzer: &'a mut dyn Switch,
    status: &'a mut dyn Switch,
    clock: &'a dyn Clock,
    config: &'a MonitorConfig,
    cancel: &'a CancelToken,
}

impl<'a, S: SignalSource + ?Sized, E: VitalEstimator + ?Sized> AcquisitionLoop<'a, S, E> {
    pub fn new(
        source: &'a mut S,
        estimator: &'a E,
        buzzer: &'a mut dyn Switch,
        status: &'a mut dyn Switch,
        clock: &'a dyn Clock,
        config: &'a MonitorConfig,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            source,
            estimator,
            buzzer,
            status,
            clock,
            config,
            cancel,
        }
    }

    /// Block until strictly more than `min_samples` readings are accepted,
    /// then return their average.
    ///
    /// Batches without a finger on the sensor and implausible estimates do
    /// not count. There is no time limit; only `cancel` or a sensor failure
    /// ends the loop early.
    pub fn acquire(&mut self, min_samples: usize) -> Result<VitalReading, CycleError> {
        log::info!("Oximetry starting ({} readings needed)", min_samples + 1);

        let mut readings: Vec<VitalReading> = Vec::new();
        let mut finger = FingerState::Unknown;
        let mut failures = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(CycleError::Cancelled);
            }

            let batch = match self.source.read_batch(self.config.batch_size) {
                Ok(batch) => {
                    failures = 0;
                    batch
                }
                Err(e) if e.is_recoverable() && failures < self.config.max_io_retries => {
                    failures += 1;
                    let wait = self.config.io_backoff(failures);
                    log::warn!(
                        "{} (retry {}/{} in {} ms)",
                        e,
                        failures,
                        self.config.max_io_retries,
                        wait.as_millis()
                    );
                    if !pause(self.clock, wait, self.cancel) {
                        return Err(CycleError::Cancelled);
                    }
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if !batch.finger_present(self.config.finger_threshold) {
                if finger != FingerState::Absent {
                    log::info!("No finger ...");
                }
                finger = FingerState::Absent;
                if debug_flags::is_on(&DEBUG_PPG) {
                    let (ir, red) = batch.means();
                    log::info!("PPG: no finger, mean ir={:.0} red={:.0}", ir, red);
                }
                if !pause(self.clock, self.config.no_finger_delay(), self.cancel) {
                    return Err(CycleError::Cancelled);
                }
                continue;
            }

            if finger != FingerState::Present {
                finger = FingerState::Present;
                log::info!("Finger detected, measuring");
                self.status.set(true);
                if !beep(self.buzzer, self.clock, self.config.ack_beep(), self.cancel) {
                    return Err(CycleError::Cancelled);
                }
            }

            let est = self.estimator.estimate(&batch);
            match VitalReading::accept(&est) {
                Some(reading) => {
                    readings.push(reading);
                    log::log!(
                        debug_flags::level(&DEBUG_PPG),
                        "PPG: reading {} hr={:.1} spo2={:.1}",
                        readings.len(),
                        reading.heart_rate,
                        reading.spo2
                    );
                }
                None => log::log!(
                    debug_flags::level(&DEBUG_PPG),
                    "PPG: discarded hr={:.1}({}) spo2={:.1}({})",
                    est.heart_rate,
                    est.heart_rate_valid,
                    est.spo2,
                    est.spo2_valid
                ),
            }

            if readings.len() > min_samples {
                let avg = VitalReading::mean(&readings);
                log::info!(
                    "Oximetry done: hr={:.1} bpm spo2={:.1}% over {} readings",
                    avg.heart_rate,
                    avg.spo2,
                    readings.len()
                );
                return Ok(avg);
            }
        }
    }
}
