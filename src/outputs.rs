/// A two-state output: the buzzer or the status LED.
pub trait Switch {
    fn set(&mut self, on: bool);
}

/// Host stand-in that logs level changes.
#[cfg(not(target_os = "espidf"))]
pub struct LogSwitch {
    name: &'static str,
    on: bool,
}

#[cfg(not(target_os = "espidf"))]
impl LogSwitch {
    pub fn new(name: &'static str) -> Self {
        Self { name, on: false }
    }
}

#[cfg(not(target_os = "espidf"))]
impl Switch for LogSwitch {
    fn set(&mut self, on: bool) {
        if on != self.on {
            log::debug!("{} {}", self.name, if on { "ON" } else { "off" });
        }
        self.on = on;
    }
}

#[cfg(target_os = "espidf")]
pub use gpio::GpioSwitch;

#[cfg(target_os = "espidf")]
mod gpio {
    use esp_idf_hal::gpio::{Output, OutputPin, PinDriver};

    pub struct GpioSwitch<'d, P: OutputPin> {
        name: &'static str,
        pin: PinDriver<'d, P, Output>,
    }

    impl<'d, P: OutputPin> GpioSwitch<'d, P> {
        pub fn new(name: &'static str, pin: PinDriver<'d, P, Output>) -> Self {
            Self { name, pin }
        }
    }

    impl<'d, P: OutputPin> super::Switch for GpioSwitch<'d, P> {
        fn set(&mut self, on: bool) {
            let res = if on { self.pin.set_high() } else { self.pin.set_low() };
            if let Err(e) = res {
                log::warn!("{}: GPIO write failed: {}", self.name, e);
            }
        }
    }
}
