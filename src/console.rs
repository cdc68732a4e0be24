//! Line-oriented operator console: USB serial on the device, stdin on a host.

use std::thread::{self, JoinHandle};

use crate::cancel::CancelToken;
use crate::debug_flags;

pub fn handle_command(cmd: &str, cancel: &CancelToken) -> String {
    let cmd = cmd.trim().to_lowercase();
    let mut words = cmd.split_whitespace();
    match (words.next(), words.next()) {
        (Some("ping"), None) => "pong".into(),
        (Some("status"), None) | (Some("debug"), None) => debug_flags::status_line(),
        (Some("debug"), Some(name)) => match debug_flags::by_name(name) {
            Some(flag) => {
                let on = match words.next() {
                    Some("on") => {
                        debug_flags::set(flag, true);
                        true
                    }
                    Some("off") => {
                        debug_flags::set(flag, false);
                        false
                    }
                    _ => debug_flags::toggle(flag),
                };
                format!("{} debug {}", name, if on { "ON" } else { "off" })
            }
            None => format!("unknown flag '{}' (ppg, temp, report)", name),
        },
        (Some("stop"), None) => {
            cancel.cancel();
            "stopping after the current step".into()
        }
        (Some("help"), None) => {
            "commands: ping, status, debug [ppg|temp|report] [on|off], stop".into()
        }
        (None, _) => String::new(),
        _ => format!("unknown command '{}' (try help)", cmd),
    }
}

/// Start the console reader thread. It only touches atomics, never hardware.
pub fn spawn(cancel: CancelToken) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("console".into())
        .stack_size(16 * 1024)
        .spawn(move || reader::run(&cancel))
}

#[cfg(not(target_os = "espidf"))]
mod reader {
    use std::io::BufRead;

    use crate::cancel::CancelToken;

    pub fn run(cancel: &CancelToken) {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let reply = super::handle_command(&line, cancel);
            if !reply.is_empty() {
                println!("{}", reply);
            }
            if cancel.is_cancelled() {
                break;
            }
        }
    }
}

#[cfg(target_os = "espidf")]
mod reader {
    use std::time::Duration;

    use crate::cancel::CancelToken;

    pub fn run(cancel: &CancelToken) {
        init_usb_serial_jtag();

        let mut buf = [0u8; 1];
        let mut line = String::new();
        let tick_hz = esp_idf_sys::configTICK_RATE_HZ as u32;
        let ticks = ((10 * tick_hz) / 1000).max(1);

        while !cancel.is_cancelled() {
            let n = unsafe {
                esp_idf_sys::usb_serial_jtag_read_bytes(buf.as_mut_ptr().cast(), 1, ticks)
            };
            if n > 0 {
                match buf[0] {
                    b'\r' | b'\n' => {
                        if !line.is_empty() {
                            let reply = super::handle_command(&line, cancel);
                            write_line(&reply, ticks);
                            line.clear();
                        }
                    }
                    0x08 | 0x7f => {
                        line.pop();
                    }
                    b => {
                        if let Some(ch) = char::from_u32(b as u32) {
                            if !ch.is_control() {
                                line.push(ch);
                            }
                        }
                    }
                }
            } else if n < 0 {
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }

    fn init_usb_serial_jtag() {
        unsafe {
            let mut cfg = esp_idf_sys::usb_serial_jtag_driver_config_t {
                tx_buffer_size: 1024,
                rx_buffer_size: 1024,
            };
            esp_idf_sys::usb_serial_jtag_driver_install(&mut cfg);
        }
    }

    fn write_line(msg: &str, ticks: u32) {
        let mut line = String::with_capacity(msg.len() + 2);
        line.push_str(msg);
        line.push_str("\r\n");
        unsafe {
            esp_idf_sys::usb_serial_jtag_write_bytes(line.as_ptr().cast(), line.len(), ticks);
        }
    }
}
