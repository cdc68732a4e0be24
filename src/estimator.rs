//! Heart-rate / SpO2 estimation from one PPG batch.
//!
//! The measurement loop only relies on the [`VitalEstimator`] contract. The
//! bundled [`ValleyEstimator`] expects batches sampled at 25 Hz (100 Hz with
//! 4-sample averaging on the MAX30102).

use crate::sensors::SampleBatch;

/// Raw estimator output; validity flags are the estimator's own verdict.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Estimate {
    pub heart_rate: f32,
    pub heart_rate_valid: bool,
    pub spo2: f32,
    pub spo2_valid: bool,
}

pub trait VitalEstimator {
    fn estimate(&self, batch: &SampleBatch) -> Estimate;
}

const SAMPLE_RATE_HZ: f32 = 25.0;
const MA_TAPS: usize = 4;
const MIN_VALLEY_DISTANCE: usize = 4;
const MAX_VALLEYS: usize = 15;
const THRESHOLD_MIN: f32 = 30.0;
const THRESHOLD_MAX: f32 = 60.0;
// Calibrated range of the red/IR modulation ratio.
const RATIO_MIN: f32 = 0.02;
const RATIO_MAX: f32 = 1.84;

#[derive(Debug, Clone, Copy, Default)]
pub struct ValleyEstimator;

impl VitalEstimator for ValleyEstimator {
    fn estimate(&self, batch: &SampleBatch) -> Estimate {
        if batch.len() < MA_TAPS * 4 {
            return Estimate::default();
        }
        let ir: Vec<f32> = batch.ir().map(|v| v as f32).collect();
        let red: Vec<f32> = batch.red().map(|v| v as f32).collect();

        let valleys = find_valleys(&ir);
        let mut out = Estimate::default();
        if valleys.len() >= 2 {
            let span = (valleys[valleys.len() - 1] - valleys[0]) as f32;
            let interval = span / (valleys.len() - 1) as f32;
            out.heart_rate = SAMPLE_RATE_HZ * 60.0 / interval;
            out.heart_rate_valid = true;
        }
        if let Some(ratio) = median_ratio(&ir, &red, &valleys) {
            if ratio > RATIO_MIN && ratio < RATIO_MAX {
                out.spo2 = (-45.060 * ratio * ratio + 30.354 * ratio + 94.845).min(100.0);
                out.spo2_valid = true;
            }
        }
        out
    }
}

/// Valley positions of the IR trace, as indices into `ir`.
fn find_valleys(ir: &[f32]) -> Vec<usize> {
    let mean = ir.iter().sum::<f32>() / ir.len() as f32;
    let inverted: Vec<f32> = ir.iter().map(|v| mean - v).collect();
    let smooth: Vec<f32> = inverted
        .windows(MA_TAPS)
        .map(|w| w.iter().sum::<f32>() / MA_TAPS as f32)
        .collect();

    let threshold = (smooth.iter().sum::<f32>() / smooth.len() as f32)
        .clamp(THRESHOLD_MIN, THRESHOLD_MAX);

    let mut peaks: Vec<usize> = Vec::new();
    for i in 1..smooth.len() - 1 {
        let y = smooth[i];
        if y > threshold && y > smooth[i - 1] && y >= smooth[i + 1] {
            match peaks.last_mut() {
                Some(last) if i - *last < MIN_VALLEY_DISTANCE => {
                    if y > smooth[*last] {
                        *last = i;
                    }
                }
                _ => peaks.push(i),
            }
        }
    }
    peaks.truncate(MAX_VALLEYS);

    // Map each smoothed peak back to the raw minimum under its window.
    peaks
        .into_iter()
        .map(|p| {
            (p..(p + MA_TAPS).min(ir.len()))
                .min_by(|&a, &b| ir[a].total_cmp(&ir[b]))
                .unwrap_or(p)
        })
        .collect()
}

fn median_ratio(ir: &[f32], red: &[f32], valleys: &[usize]) -> Option<f32> {
    let mut ratios: Vec<f32> = valleys
        .windows(2)
        .filter_map(|w| {
            let (a, b) = (w[0], w[1]);
            if b <= a + 1 {
                return None;
            }
            let top = (a..=b).max_by(|&i, &j| ir[i].total_cmp(&ir[j]))?;
            let ir_ac = ir[top] - interpolate(ir, a, b, top);
            let red_top = (a..=b).max_by(|&i, &j| red[i].total_cmp(&red[j]))?;
            let red_ac = red[red_top] - interpolate(red, a, b, red_top);
            if ir_ac <= 0.0 || red_ac <= 0.0 || ir[top] <= 0.0 || red[red_top] <= 0.0 {
                return None;
            }
            Some((red_ac / red[red_top]) / (ir_ac / ir[top]))
        })
        .collect();
    if ratios.is_empty() {
        return None;
    }
    ratios.sort_by(f32::total_cmp);
    let mid = ratios.len() / 2;
    Some(if ratios.len() % 2 == 0 {
        (ratios[mid - 1] + ratios[mid]) / 2.0
    } else {
        ratios[mid]
    })
}

/// Baseline between the two valleys `a` and `b`, evaluated at `at`.
fn interpolate(trace: &[f32], a: usize, b: usize, at: usize) -> f32 {
    let t = (at - a) as f32 / (b - a) as f32;
    trace[a] + (trace[b] - trace[a]) * t
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::PpgSample;
    use std::f32::consts::PI;

    fn pulse(n: usize, period: f32, ir_amp: f32, red_amp: f32) -> SampleBatch {
        SampleBatch::from_samples((0..n).map(|i| {
            let phase = (2.0 * PI * i as f32 / period).sin();
            PpgSample::new(
                (100_000.0 + ir_amp * phase) as u32,
                (80_000.0 + red_amp * phase) as u32,
            )
        }))
    }

    #[test]
    fn recovers_rate_of_clean_waveform() {
        // 20-sample period at 25 Hz = 75 bpm
        let est = ValleyEstimator.estimate(&pulse(125, 20.0, 1_000.0, 400.0));
        assert!(est.heart_rate_valid);
        assert!((72.0..=78.0).contains(&est.heart_rate), "hr = {}", est.heart_rate);
        assert!(est.spo2_valid);
        assert!((90.0..=100.0).contains(&est.spo2), "spo2 = {}", est.spo2);
    }

    #[test]
    fn flat_signal_is_invalid() {
        let flat = SampleBatch::from_samples(
            std::iter::repeat(PpgSample::new(100_000, 80_000)).take(125),
        );
        let est = ValleyEstimator.estimate(&flat);
        assert!(!est.heart_rate_valid);
        assert!(!est.spo2_valid);
    }

    #[test]
    fn short_batch_is_invalid() {
        let est = ValleyEstimator.estimate(&pulse(8, 20.0, 1_000.0, 400.0));
        assert_eq!(est, Estimate::default());
    }
}
