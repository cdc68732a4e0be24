use core::fmt;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::config::ThresholdConfig;
use crate::outputs::Switch;
use crate::timing::{pause, Clock};

/// Half-period of the buzzer with every vital normal; each abnormal vital
/// shortens it by [`PERIOD_STEP`].
const BASE_PERIOD: Duration = Duration::from_millis(1_000);
const PERIOD_STEP: Duration = Duration::from_millis(250);

// ── Decision ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AlertDecision {
    pub abnormal_bpm: bool,
    pub high_temp: bool,
    pub low_oxi: bool,
}

impl AlertDecision {
    pub fn evaluate(t: &ThresholdConfig, heart_rate: f32, spo2: f32, temperature: f32) -> Self {
        Self {
            abnormal_bpm: heart_rate < t.min_bpm || heart_rate > t.max_bpm,
            high_temp: temperature > t.max_temp_c,
            low_oxi: spo2 < t.min_oxi,
        }
    }

    pub fn abnormal_count(&self) -> u32 {
        [self.abnormal_bpm, self.high_temp, self.low_oxi]
            .iter()
            .filter(|&&b| b)
            .count() as u32
    }

    pub fn is_normal(&self) -> bool {
        self.abnormal_count() == 0
    }

    pub fn level(&self) -> Option<AlertLevel> {
        AlertLevel::from_abnormal_count(self.abnormal_count())
    }

    /// Beep half-period, `None` when nothing is abnormal.
    pub fn beep_period(&self) -> Option<Duration> {
        self.level().map(AlertLevel::half_period)
    }
}

// ── Escalation ladder ───────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertLevel {
    Advisory,
    Watch,
    Warning,
}

impl AlertLevel {
    pub fn from_abnormal_count(n: u32) -> Option<Self> {
        match n {
            0 => None,
            1 => Some(Self::Advisory),
            2 => Some(Self::Watch),
            _ => Some(Self::Warning),
        }
    }

    pub fn abnormal_count(self) -> u32 {
        match self {
            AlertLevel::Advisory => 1,
            AlertLevel::Watch => 2,
            AlertLevel::Warning => 3,
        }
    }

    pub fn half_period(self) -> Duration {
        BASE_PERIOD - PERIOD_STEP * self.abnormal_count()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertLevel::Advisory => "advisory",
            AlertLevel::Watch => "watch",
            AlertLevel::Warning => "warning",
        }
    }
}

impl fmt::Display for AlertDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bpm={} temp={} oxi={}",
            if self.abnormal_bpm { "ABNORMAL" } else { "ok" },
            if self.high_temp { "HIGH" } else { "ok" },
            if self.low_oxi { "LOW" } else { "ok" },
        )
    }
}

// ── Buzzer driving ──────────────────────────────────────────────────

/// One on/off cycle. Returns `false` if cancelled; the buzzer is left off.
pub fn beep(
    buzzer: &mut dyn Switch,
    clock: &dyn Clock,
    half_period: Duration,
    cancel: &CancelToken,
) -> bool {
    buzzer.set(true);
    let kept_on = pause(clock, half_period, cancel);
    buzzer.set(false);
    kept_on && pause(clock, half_period, cancel)
}

pub struct AlertEngine<'a> {
    buzzer: &'a mut dyn Switch,
    clock: &'a dyn Clock,
    thresholds: &'a ThresholdConfig,
    cancel: &'a CancelToken,
}

impl<'a> AlertEngine<'a> {
    pub fn new(
        buzzer: &'a mut dyn Switch,
        clock: &'a dyn Clock,
        thresholds: &'a ThresholdConfig,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            buzzer,
            clock,
            thresholds,
            cancel,
        }
    }

    /// Beep at the escalation period until more than `span` has elapsed.
    /// Silent when every vital is in range. Blocks the calling thread.
    pub fn evaluate_and_alert(
        &mut self,
        heart_rate: f32,
        spo2: f32,
        temperature: f32,
        span: Duration,
    ) -> AlertDecision {
        let decision = AlertDecision::evaluate(self.thresholds, heart_rate, spo2, temperature);
        let Some(period) = decision.beep_period() else {
            log::info!("Vitals normal ({})", decision);
            return decision;
        };

        log::warn!(
            "ALERT {} ({}), beeping every {} ms for {} ms",
            decision.level().map_or("normal", AlertLevel::as_str),
            decision,
            period.as_millis(),
            span.as_millis()
        );

        let start = self.clock.now();
        while self.clock.now() - start <= span {
            if !beep(self.buzzer, self.clock, period, self.cancel) {
                log::info!("Alert interrupted by stop request");
                break;
            }
        }
        self.buzzer.set(false);
        decision
    }
}
