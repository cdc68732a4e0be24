mod acquisition;
mod alert;
#[cfg(target_os = "espidf")]
mod board;
mod cancel;
mod config;
mod console;
mod debug_flags;
mod error;
mod estimator;
#[cfg(target_os = "espidf")]
mod http_client;
mod outputs;
mod report;
mod scheduler;
mod sensors;
mod temperature;
#[cfg(test)]
mod testing;
mod timing;

use anyhow::Result;
use log::{error, info};
use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::estimator::ValleyEstimator;
use crate::report::{LogReporter, Reporter};
use crate::scheduler::{CycleScheduler, Outputs};
use crate::timing::SystemClock;

#[cfg(target_os = "espidf")]
fn main() -> Result<()> {
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;

    esp_idf_sys::link_patches();
    // Use ESP-IDF logger so output goes to UART reliably.
    esp_idf_svc::log::EspLogger::initialize_default();

    info!("BOOT OK (vitals_monitor)");

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;
    let config = config::load(nvs.clone());

    let board::Board {
        ppg,
        thermometer,
        buzzer,
        status,
        modem,
    } = board::take()?;

    let wifi = match board::connect_wifi(modem, sys_loop, nvs) {
        Ok(wifi) => wifi,
        Err(e) => {
            error!("Wi-Fi bring-up failed: {:#}", e);
            None
        }
    };
    let reporter: Box<dyn Reporter> = match (&config.report_url, &wifi) {
        (Some(url), Some(_)) => Box::new(http_client::HttpReporter::new(url.clone())),
        _ => Box::new(LogReporter),
    };

    run(ppg, thermometer, buzzer, status, reporter, config)
}

#[cfg(not(target_os = "espidf"))]
fn main() -> Result<()> {
    use crate::outputs::LogSwitch;
    use crate::sensors::simulated::{SimulatedPpg, SimulatedThermometer};
    use std::time::Duration;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("BOOT OK (vitals_monitor, simulated sensors)");

    let config = config::load();
    if let Some(url) = &config.report_url {
        info!("report_url {} ignored on host builds; reports are logged", url);
    }

    run(
        // 10x real time
        SimulatedPpg::new(Duration::from_millis(4)),
        SimulatedThermometer::new(),
        LogSwitch::new("buzzer"),
        LogSwitch::new("status"),
        Box::new(LogReporter),
        config,
    )
}

fn run<S, T>(
    ppg: S,
    thermometer: T,
    buzzer: impl outputs::Switch + 'static,
    status: impl outputs::Switch + 'static,
    reporter: Box<dyn Reporter>,
    config: config::MonitorConfig,
) -> Result<()>
where
    S: sensors::SignalSource + Send,
    T: sensors::TemperatureSource,
{
    info!("Config: {:?}", config);

    let cancel = CancelToken::new();
    if let Err(e) = console::spawn(cancel.clone()) {
        error!("Console unavailable: {}", e);
    }

    let mut scheduler = CycleScheduler::new(
        ppg,
        ValleyEstimator,
        thermometer,
        Outputs {
            buzzer: Box::new(buzzer),
            status: Box::new(status),
            reporter,
        },
        Arc::new(SystemClock::new()),
        config,
        cancel,
    );
    scheduler.run();
    Ok(())
}
