use std::sync::Arc;
use std::thread;

use crate::acquisition::AcquisitionLoop;
use crate::alert::{AlertDecision, AlertEngine};
use crate::cancel::CancelToken;
use crate::config::{MonitorConfig, ThresholdConfig, THRESHOLDS};
use crate::error::{CycleError, SensorError};
use crate::estimator::VitalEstimator;
use crate::outputs::Switch;
use crate::report::{self, CycleVitals, Reporter};
use crate::sensors::{SignalSource, TemperatureSource};
use crate::temperature::TemperatureSampler;
use crate::timing::{pause, Clock};

/// Everything the loop drives but never reads back.
pub struct Outputs {
    pub buzzer: Box<dyn Switch>,
    pub status: Box<dyn Switch>,
    pub reporter: Box<dyn Reporter>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleOutcome {
    pub vitals: CycleVitals,
    pub decision: AlertDecision,
}

/// Owns every hardware handle and runs measurement cycles back to back.
///
/// The PPG handle is shared with exactly one helper thread per cycle (the
/// flush). That thread borrows it inside a `thread::scope` which is joined
/// before the cycle returns, so the next acquisition can never overlap it.
pub struct CycleScheduler<S, E, T> {
    source: S,
    estimator: E,
    thermometer: T,
    outputs: Outputs,
    clock: Arc<dyn Clock>,
    config: MonitorConfig,
    thresholds: ThresholdConfig,
    cancel: CancelToken,
}

impl<S, E, T> CycleScheduler<S, E, T>
where
    S: SignalSource + Send,
    E: VitalEstimator,
    T: TemperatureSource,
{
    pub fn new(
        source: S,
        estimator: E,
        thermometer: T,
        outputs: Outputs,
        clock: Arc<dyn Clock>,
        config: MonitorConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            source,
            estimator,
            thermometer,
            outputs,
            clock,
            config,
            thresholds: THRESHOLDS,
            cancel,
        }
    }

    /// Run cycles until the cancel token fires. Sensor failures abort only
    /// the cycle they happen in.
    pub fn run(&mut self) {
        log::info!("Monitor running");
        while !self.cancel.is_cancelled() {
            match self.run_cycle() {
                Ok(outcome) => log::info!(
                    "Cycle complete: hr={:.1} spo2={:.1} temp={:.1} [{}]",
                    outcome.vitals.heart_rate,
                    outcome.vitals.spo2,
                    outcome.vitals.temperature,
                    if outcome.decision.is_normal() { "normal" } else { "ALERT" }
                ),
                Err(CycleError::Cancelled) => break,
                Err(CycleError::Sensor(e)) => {
                    log::error!("Cycle aborted: {}", e);
                    if let Err(e) = self.source.reset() {
                        log::error!("Sensor reset after failure also failed: {}", e);
                    }
                }
            }
            if !pause(&*self.clock, self.config.cycle_pause(), &self.cancel) {
                break;
            }
        }
        self.outputs.buzzer.set(false);
        self.outputs.status.set(false);
        log::info!("Monitor stopped");
    }

    /// One acquire → evaluate → alert cycle, with the sensor flush running
    /// beside the report and alert.
    pub fn run_cycle(&mut self) -> Result<CycleOutcome, CycleError> {
        self.outputs.buzzer.set(false);
        self.outputs.status.set(false);

        let reading = AcquisitionLoop::new(
            &mut self.source,
            &self.estimator,
            &mut *self.outputs.buzzer,
            &mut *self.outputs.status,
            &*self.clock,
            &self.config,
            &self.cancel,
        )
        .acquire(self.config.vital_samples)?;

        let temperature =
            TemperatureSampler::new(&mut self.thermometer).acquire(self.config.temperature_samples);

        self.outputs.status.set(false);
        if !pause(&*self.clock, self.config.settle_pause(), &self.cancel) {
            return Err(CycleError::Cancelled);
        }

        let vitals = CycleVitals {
            heart_rate: reading.heart_rate,
            spo2: reading.spo2,
            temperature,
        };

        let source = &mut self.source;
        let flush_reads = self.config.flush_reads;
        let batch_size = self.config.batch_size;
        let outputs = &mut self.outputs;
        let clock = &*self.clock;
        let thresholds = &self.thresholds;
        let cancel = &self.cancel;
        let span = self.config.alert_span();

        let decision = thread::scope(|scope| {
            let flush = scope.spawn(move || flush_source(source, flush_reads, batch_size));

            report::deliver(&mut *outputs.reporter, &vitals);
            let decision = AlertEngine::new(&mut *outputs.buzzer, clock, thresholds, cancel)
                .evaluate_and_alert(vitals.heart_rate, vitals.spo2, vitals.temperature, span);

            match flush.join() {
                Ok(Ok(())) => log::debug!("Sensor flushed"),
                Ok(Err(e)) => log::warn!("Sensor flush failed: {}", e),
                Err(_) => log::error!("Sensor flush thread panicked"),
            }
            decision
        });

        Ok(CycleOutcome { vitals, decision })
    }
}

/// Drain stale samples, then reset and power down the PPG sensor.
pub fn flush_source<S: SignalSource + ?Sized>(
    source: &mut S,
    reads: usize,
    batch_size: usize,
) -> Result<(), SensorError> {
    for _ in 0..reads {
        if let Err(e) = source.read_batch(batch_size) {
            if !e.is_recoverable() {
                return Err(e);
            }
            log::debug!("Flush read skipped: {}", e);
        }
    }
    source.reset()?;
    source.shutdown()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::SampleBatch;
    use crate::testing::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Read,
        Reset,
        Shutdown,
    }

    /// Records every call and counts any that start while another is still
    /// in progress.
    #[derive(Clone, Default)]
    struct InstrumentedSource {
        busy: Arc<AtomicBool>,
        overlaps: Arc<AtomicUsize>,
        calls: Arc<Mutex<Vec<Call>>>,
        cancel_after: Option<(usize, CancelToken)>,
    }

    impl InstrumentedSource {
        fn enter(&self, call: Call) {
            if self.busy.swap(true, Ordering::SeqCst) {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_millis(2));
            let mut calls = self.calls.lock().unwrap();
            calls.push(call);
            if let Some((limit, token)) = &self.cancel_after {
                if calls.len() >= *limit {
                    token.cancel();
                }
            }
            self.busy.store(false, Ordering::SeqCst);
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl SignalSource for InstrumentedSource {
        fn read_batch(&mut self, _size: usize) -> Result<SampleBatch, SensorError> {
            self.enter(Call::Read);
            Ok(finger())
        }

        fn reset(&mut self) -> Result<(), SensorError> {
            self.enter(Call::Reset);
            Ok(())
        }

        fn shutdown(&mut self) -> Result<(), SensorError> {
            self.enter(Call::Shutdown);
            Ok(())
        }
    }

    struct Shared<T>(Rc<RefCell<T>>);

    impl Switch for Shared<RecordingSwitch> {
        fn set(&mut self, on: bool) {
            self.0.borrow_mut().set(on)
        }
    }

    impl Reporter for Shared<RecordingReporter> {
        fn report(&mut self, vitals: &CycleVitals) -> anyhow::Result<u16> {
            self.0.borrow_mut().report(vitals)
        }
    }

    struct Rig {
        buzzer: Rc<RefCell<RecordingSwitch>>,
        status: Rc<RefCell<RecordingSwitch>>,
        reporter: Rc<RefCell<RecordingReporter>>,
        clock: Arc<FakeClock>,
        cancel: CancelToken,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                buzzer: Rc::default(),
                status: Rc::default(),
                reporter: Rc::default(),
                clock: Arc::new(FakeClock::new()),
                cancel: CancelToken::new(),
            }
        }

        fn scheduler<S: SignalSource + Send>(
            &self,
            source: S,
            hr: f32,
            spo2: f32,
            temp: f32,
        ) -> CycleScheduler<S, ScriptedEstimator, ScriptedThermometer> {
            let config = MonitorConfig {
                vital_samples: 1,
                temperature_samples: 2,
                batch_size: 8,
                flush_reads: 2,
                alert_span_ms: 1_000,
                ..MonitorConfig::default()
            };
            CycleScheduler::new(
                source,
                ScriptedEstimator::new(std::iter::repeat(valid(hr, spo2)).take(64)),
                ScriptedThermometer::new(std::iter::repeat(Some(temp)).take(64)),
                Outputs {
                    buzzer: Box::new(Shared(self.buzzer.clone())),
                    status: Box::new(Shared(self.status.clone())),
                    reporter: Box::new(Shared(self.reporter.clone())),
                },
                self.clock.clone(),
                config,
                self.cancel.clone(),
            )
        }
    }

    #[test]
    fn flush_never_overlaps_next_acquisition() {
        let rig = Rig::new();
        let source = InstrumentedSource::default();
        let mut scheduler = rig.scheduler(source.clone(), 72.0, 97.0, 36.6);

        for _ in 0..3 {
            scheduler.run_cycle().unwrap();
        }

        let one_cycle = [
            Call::Read,
            Call::Read,
            Call::Read,
            Call::Read,
            Call::Reset,
            Call::Shutdown,
        ];
        let expected: Vec<Call> = one_cycle.iter().copied().cycle().take(18).collect();
        assert_eq!(source.calls(), expected);
        assert_eq!(source.overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn normal_cycle_reports_and_stays_quiet() {
        let rig = Rig::new();
        let source = ScriptedSource::new((0..8).map(|_| Ok(finger())));
        let mut scheduler = rig.scheduler(source, 72.0, 97.0, 36.6);

        let outcome = scheduler.run_cycle().unwrap();

        assert!(outcome.decision.is_normal());
        assert_eq!(outcome.vitals.heart_rate, 72.0);
        assert_eq!(outcome.vitals.spo2, 97.0);
        assert_eq!(rig.reporter.borrow().sent, vec![outcome.vitals]);
        // only the acknowledgement beep
        assert_eq!(rig.buzzer.borrow().rising_edges(), 1);
        assert!(!rig.status.borrow().is_on());
    }

    #[test]
    fn abnormal_cycle_alerts_even_if_report_fails() {
        let rig = Rig::new();
        rig.reporter.borrow_mut().fail = true;
        let source = ScriptedSource::new((0..8).map(|_| Ok(finger())));
        let mut scheduler = rig.scheduler(source, 150.0, 80.0, 38.0);

        let outcome = scheduler.run_cycle().unwrap();

        assert_eq!(outcome.decision.abnormal_count(), 3);
        assert_eq!(rig.reporter.borrow().sent.len(), 1);
        // acknowledgement + beeps at 0, 0.5, 1.0 s of a 1 s span
        assert_eq!(rig.buzzer.borrow().rising_edges(), 1 + 3);
        assert!(!rig.buzzer.borrow().is_on());
    }

    #[test]
    fn sensor_failure_aborts_cycle_without_report() {
        let rig = Rig::new();
        let mut scheduler = rig.scheduler(ScriptedSource::default(), 72.0, 97.0, 36.6);

        let err = scheduler.run_cycle().unwrap_err();

        assert!(matches!(err, CycleError::Sensor(SensorError::Device { .. })));
        assert!(rig.reporter.borrow().sent.is_empty());
    }

    #[test]
    fn run_stops_on_cancel_with_outputs_off() {
        let rig = Rig::new();
        let source = InstrumentedSource {
            // one full cycle is six calls; cancel during the second acquisition
            cancel_after: Some((7, rig.cancel.clone())),
            ..InstrumentedSource::default()
        };
        let mut scheduler = rig.scheduler(source.clone(), 72.0, 97.0, 36.6);

        scheduler.run();

        assert_eq!(rig.reporter.borrow().sent.len(), 1);
        assert_eq!(source.calls().len(), 7);
        assert!(!rig.buzzer.borrow().is_on());
        assert!(!rig.status.borrow().is_on());
    }

    #[test]
    fn flush_drains_then_resets() {
        let mut source = ScriptedSource::new([
            Err(SensorError::Timeout {
                sensor: "MAX30102",
                operation: "data ready",
                waited_ms: 10,
            }),
            Ok(finger()),
        ]);
        flush_source(&mut source, 2, 8).unwrap();
        assert_eq!((source.reads, source.resets, source.shutdowns), (2, 1, 1));

        let mut dead = ScriptedSource::default();
        assert!(flush_source(&mut dead, 3, 8).is_err());
        assert_eq!((dead.reads, dead.resets), (1, 0));
    }
}
