#[cfg(target_os = "espidf")]
pub mod dht11;
#[cfg(target_os = "espidf")]
pub mod max30102;
#[cfg(not(target_os = "espidf"))]
pub mod simulated;

use crate::error::SensorError;

/// Inline capacity of a [`SampleBatch`].
pub const MAX_BATCH_SIZE: usize = 256;

/// One back-to-back infra-red / red intensity pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PpgSample {
    pub ir: u32,
    pub red: u32,
}

impl PpgSample {
    pub const fn new(ir: u32, red: u32) -> Self {
        Self { ir, red }
    }
}

/// A fixed-size run of samples. Built once by a [`SignalSource`], then only
/// read.
#[derive(Debug, Clone, Default)]
pub struct SampleBatch {
    samples: heapless::Vec<PpgSample, MAX_BATCH_SIZE>,
}

impl SampleBatch {
    /// Collect up to [`MAX_BATCH_SIZE`] samples; extras are dropped.
    pub fn from_samples(samples: impl IntoIterator<Item = PpgSample>) -> Self {
        let mut batch = Self::default();
        for s in samples {
            if batch.samples.push(s).is_err() {
                break;
            }
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn ir(&self) -> impl Iterator<Item = u32> + '_ {
        self.samples.iter().map(|s| s.ir)
    }

    pub fn red(&self) -> impl Iterator<Item = u32> + '_ {
        self.samples.iter().map(|s| s.red)
    }

    /// Mean IR and mean red intensity; `(0.0, 0.0)` for an empty batch.
    pub fn means(&self) -> (f64, f64) {
        if self.is_empty() {
            return (0.0, 0.0);
        }
        let n = self.samples.len() as f64;
        let (ir, red) = self
            .samples
            .iter()
            .fold((0u64, 0u64), |(ir, red), s| (ir + s.ir as u64, red + s.red as u64));
        (ir as f64 / n, red as f64 / n)
    }

    /// Liveness test: both channels bright enough to mean tissue contact.
    pub fn finger_present(&self, threshold: u32) -> bool {
        let (ir, red) = self.means();
        ir >= threshold as f64 && red >= threshold as f64
    }
}

/// Photoplethysmography front end.
pub trait SignalSource {
    /// Read `size` consecutive samples, waking the device if it was shut down.
    fn read_batch(&mut self, size: usize) -> Result<SampleBatch, SensorError>;
    /// Clear the FIFO and restore the measurement configuration.
    fn reset(&mut self) -> Result<(), SensorError>;
    /// Enter low-power mode until the next `read_batch`.
    fn shutdown(&mut self) -> Result<(), SensorError>;
}

/// Body/ambient thermometer. `None` means this read failed and may succeed
/// next time.
pub trait TemperatureSource {
    fn read(&mut self) -> Option<f32>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(ir: u32, red: u32, n: usize) -> SampleBatch {
        SampleBatch::from_samples(std::iter::repeat(PpgSample::new(ir, red)).take(n))
    }

    #[test]
    fn finger_gate_needs_both_channels() {
        assert!(batch(50_000, 50_000, 10).finger_present(50_000));
        assert!(!batch(49_999, 80_000, 10).finger_present(50_000));
        assert!(!batch(80_000, 49_999, 10).finger_present(50_000));
    }

    #[test]
    fn empty_batch_has_no_finger() {
        let b = SampleBatch::default();
        assert_eq!(b.means(), (0.0, 0.0));
        assert!(!b.finger_present(50_000));
    }

    #[test]
    fn means_use_wide_accumulator() {
        let b = SampleBatch::from_samples([
            PpgSample::new(u32::MAX, 10),
            PpgSample::new(u32::MAX, 30),
        ]);
        assert_eq!(b.means(), (u32::MAX as f64, 20.0));
    }

    #[test]
    fn capacity_is_bounded() {
        let b = batch(1, 1, MAX_BATCH_SIZE + 10);
        assert_eq!(b.len(), MAX_BATCH_SIZE);
    }
}
