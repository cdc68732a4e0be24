use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::sensors::MAX_BATCH_SIZE;

// ── Thresholds ──────────────────────────────────────────────────────

/// Normal ranges for the three vitals. Constant for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdConfig {
    pub min_bpm: f32,
    pub max_bpm: f32,
    pub max_temp_c: f32,
    pub min_oxi: f32,
}

pub const THRESHOLDS: ThresholdConfig = ThresholdConfig {
    min_bpm: 60.0,
    max_bpm: 100.0,
    max_temp_c: 37.5,
    min_oxi: 95.0,
};

/// Upper bound for the per-cycle reading counts.
pub const MAX_CYCLE_SAMPLES: usize = 1_000;

/// Heart rates outside this band are treated as estimator noise.
pub const HUMAN_BPM_MIN: f32 = 30.0;
pub const HUMAN_BPM_MAX: f32 = 220.0;

// ── Tuning ──────────────────────────────────────────────────────────

/// Tuning parameters, loaded once at start-up. Every field has a default so a
/// partial JSON document only overrides what it names.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Acquisition stops once strictly more than this many readings are kept.
    pub vital_samples: usize,
    pub temperature_samples: usize,
    pub batch_size: usize,
    /// Minimum mean IR and red intensity for a finger to count as present.
    pub finger_threshold: u32,
    pub no_finger_delay_ms: u64,
    pub ack_beep_ms: u64,
    pub alert_span_ms: u64,
    pub settle_pause_ms: u64,
    pub cycle_pause_ms: u64,
    /// Batches discarded by the background flush before the sensor reset.
    pub flush_reads: usize,
    pub io_retry_base_ms: u64,
    pub io_retry_max_ms: u64,
    pub max_io_retries: u32,
    pub report_url: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            vital_samples: 10,
            temperature_samples: 10,
            batch_size: 125,
            finger_threshold: 50_000,
            no_finger_delay_ms: 500,
            ack_beep_ms: 250,
            alert_span_ms: 5_000,
            settle_pause_ms: 500,
            cycle_pause_ms: 1_000,
            flush_reads: 4,
            io_retry_base_ms: 100,
            io_retry_max_ms: 2_000,
            max_io_retries: 5,
            report_url: None,
        }
    }
}

impl MonitorConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(text).context("invalid monitor config JSON")?;
        Ok(cfg.sanitized())
    }

    /// Clamp values the rest of the firmware cannot honour.
    pub fn sanitized(mut self) -> Self {
        if self.batch_size > MAX_BATCH_SIZE {
            log::warn!(
                "batch_size {} exceeds capacity, clamping to {}",
                self.batch_size,
                MAX_BATCH_SIZE
            );
            self.batch_size = MAX_BATCH_SIZE;
        }
        self.batch_size = self.batch_size.max(1);
        for (name, count) in [
            ("vital_samples", &mut self.vital_samples),
            ("temperature_samples", &mut self.temperature_samples),
        ] {
            if *count > MAX_CYCLE_SAMPLES {
                log::warn!("{} {} too large, clamping to {}", name, count, MAX_CYCLE_SAMPLES);
                *count = MAX_CYCLE_SAMPLES;
            }
        }
        if self.io_retry_max_ms < self.io_retry_base_ms {
            self.io_retry_max_ms = self.io_retry_base_ms;
        }
        self
    }

    pub fn no_finger_delay(&self) -> Duration {
        Duration::from_millis(self.no_finger_delay_ms)
    }

    pub fn ack_beep(&self) -> Duration {
        Duration::from_millis(self.ack_beep_ms)
    }

    pub fn alert_span(&self) -> Duration {
        Duration::from_millis(self.alert_span_ms)
    }

    pub fn settle_pause(&self) -> Duration {
        Duration::from_millis(self.settle_pause_ms)
    }

    pub fn cycle_pause(&self) -> Duration {
        Duration::from_millis(self.cycle_pause_ms)
    }

    /// Backoff before retry number `attempt` (1-based), doubling up to the cap.
    pub fn io_backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let ms = self
            .io_retry_base_ms
            .saturating_mul(1u64 << shift)
            .min(self.io_retry_max_ms);
        Duration::from_millis(ms)
    }
}

/// Host start-up: read the JSON file named by `VITALS_CONFIG`, if any.
#[cfg(not(target_os = "espidf"))]
pub fn load() -> MonitorConfig {
    let Ok(path) = std::env::var("VITALS_CONFIG") else {
        return MonitorConfig::default();
    };
    match std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path))
        .and_then(|text| MonitorConfig::from_json(&text))
    {
        Ok(cfg) => {
            log::info!("Config loaded from {}", path);
            cfg
        }
        Err(e) => {
            log::error!("Config load failed ({:#}), using defaults", e);
            MonitorConfig::default()
        }
    }
}

/// Device start-up: optional JSON document in NVS (`vitals` / `config`).
#[cfg(target_os = "espidf")]
pub fn load(nvs: esp_idf_svc::nvs::EspDefaultNvsPartition) -> MonitorConfig {
    use esp_idf_svc::nvs::EspNvs;

    let nvs = match EspNvs::new(nvs, "vitals", true) {
        Ok(nvs) => nvs,
        Err(e) => {
            log::warn!("NVS namespace unavailable ({}), using defaults", e);
            return MonitorConfig::default();
        }
    };
    let mut buf = [0u8; 1024];
    match nvs.get_str("config", &mut buf).ok().flatten() {
        Some(text) => MonitorConfig::from_json(text).unwrap_or_else(|e| {
            log::error!("Config in NVS rejected ({:#}), using defaults", e);
            MonitorConfig::default()
        }),
        None => MonitorConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = MonitorConfig::from_json(r#"{ "vital_samples": 4, "alert_span_ms": 0 }"#)
            .unwrap();
        assert_eq!(cfg.vital_samples, 4);
        assert_eq!(cfg.alert_span_ms, 0);
        assert_eq!(cfg.batch_size, 125);
        assert_eq!(cfg.finger_threshold, 50_000);
        assert!(cfg.report_url.is_none());
    }

    #[test]
    fn oversized_batch_is_clamped() {
        let cfg = MonitorConfig::from_json(r#"{ "batch_size": 4096 }"#).unwrap();
        assert_eq!(cfg.batch_size, MAX_BATCH_SIZE);
    }

    #[test]
    fn oversized_sample_counts_are_clamped() {
        let cfg = MonitorConfig::from_json(
            r#"{ "temperature_samples": 18446744073709551615, "vital_samples": 5000 }"#,
        )
        .unwrap();
        assert_eq!(cfg.temperature_samples, MAX_CYCLE_SAMPLES);
        assert_eq!(cfg.vital_samples, MAX_CYCLE_SAMPLES);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(MonitorConfig::from_json("{ vital_samples: ").is_err());
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let cfg = MonitorConfig::default();
        assert_eq!(cfg.io_backoff(1), Duration::from_millis(100));
        assert_eq!(cfg.io_backoff(2), Duration::from_millis(200));
        assert_eq!(cfg.io_backoff(4), Duration::from_millis(800));
        assert_eq!(cfg.io_backoff(10), Duration::from_millis(2_000));
    }

    #[test]
    fn default_thresholds() {
        assert_eq!(THRESHOLDS.min_bpm, 60.0);
        assert_eq!(THRESHOLDS.max_bpm, 100.0);
        assert_eq!(THRESHOLDS.max_temp_c, 37.5);
        assert_eq!(THRESHOLDS.min_oxi, 95.0);
    }
}
