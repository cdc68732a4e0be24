//! ESP32-S3 pin assignment and peripheral bring-up.

use anyhow::{anyhow, Result};
use esp_idf_hal::gpio::{Gpio10, Gpio15, Gpio16, PinDriver};
use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
use esp_idf_hal::modem::Modem;
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_hal::prelude::*;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};
use log::info;

use crate::outputs::GpioSwitch;
use crate::sensors::dht11::Dht11;
use crate::sensors::max30102::Max30102;

pub struct Board {
    pub ppg: Max30102<'static>,
    pub thermometer: Dht11<'static, Gpio10>,
    pub buzzer: GpioSwitch<'static, Gpio15>,
    pub status: GpioSwitch<'static, Gpio16>,
    pub modem: Modem,
}

pub fn take() -> Result<Board> {
    let p = Peripherals::take()?;

    // MAX30102 on the shared sensor header: SDA=GPIO8, SCL=GPIO7
    let i2c = I2cDriver::new(
        p.i2c0,
        p.pins.gpio8,
        p.pins.gpio7,
        &I2cConfig::new().baudrate(400.kHz().into()),
    )?;
    let ppg = Max30102::new(i2c)?;

    let thermometer = Dht11::new(PinDriver::input_output_od(p.pins.gpio10)?);
    let buzzer = GpioSwitch::new("buzzer", PinDriver::output(p.pins.gpio15)?);
    let status = GpioSwitch::new("status", PinDriver::output(p.pins.gpio16)?);

    Ok(Board {
        ppg,
        thermometer,
        buzzer,
        status,
        modem: p.modem,
    })
}

/// Join the access point named at build time. `Ok(None)` when no credentials
/// were compiled in.
pub fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs: EspDefaultNvsPartition,
) -> Result<Option<BlockingWifi<EspWifi<'static>>>> {
    let (Some(ssid), Some(password)) = (
        option_env!("VITALS_WIFI_SSID"),
        option_env!("VITALS_WIFI_PASS"),
    ) else {
        info!("No Wi-Fi credentials compiled in; reports stay local");
        return Ok(None);
    };

    let mut wifi = BlockingWifi::wrap(
        EspWifi::new(modem, sys_loop.clone(), Some(nvs))?,
        sys_loop,
    )?;
    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: ssid.try_into().map_err(|_| anyhow!("SSID longer than 32 bytes"))?,
        password: password
            .try_into()
            .map_err(|_| anyhow!("Wi-Fi password longer than 64 bytes"))?,
        auth_method: AuthMethod::WPA2Personal,
        ..Default::default()
    }))?;

    wifi.start()?;
    wifi.connect()?;
    wifi.wait_netif_up()?;
    info!("Wi-Fi connected to '{}'", ssid);
    Ok(Some(wifi))
}
