use anyhow::Result;
use serde::Serialize;

use crate::debug_flags::{self, DEBUG_REPORT};

/// Averaged result of one measurement cycle, as posted to the collector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CycleVitals {
    #[serde(rename = "bpm")]
    pub heart_rate: f32,
    pub spo2: f32,
    pub temperature: f32,
}

impl CycleVitals {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Remote collector for cycle results. A failed report never stops the
/// measurement loop.
pub trait Reporter {
    /// Deliver one result; returns the collector's status code.
    fn report(&mut self, vitals: &CycleVitals) -> Result<u16>;
}

/// Fallback when no collector is configured: the payload goes to the log.
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&mut self, vitals: &CycleVitals) -> Result<u16> {
        log::info!("REPORT {}", vitals.to_json()?);
        Ok(200)
    }
}

/// Send `vitals` and log the outcome.
pub fn deliver(reporter: &mut dyn Reporter, vitals: &CycleVitals) {
    match reporter.report(vitals) {
        Ok(status) => log::log!(
            debug_flags::level(&DEBUG_REPORT),
            "Report delivered (status {})",
            status
        ),
        Err(e) => log::warn!("Report failed: {:#}", e),
    }
}
