use std::sync::atomic::{AtomicBool, Ordering};

/// Global debug flags toggled via console.
/// When a flag is true, the module logs at info! level instead of debug!.
pub static DEBUG_PPG: AtomicBool = AtomicBool::new(false);
pub static DEBUG_TEMP: AtomicBool = AtomicBool::new(false);
pub static DEBUG_REPORT: AtomicBool = AtomicBool::new(false);

pub fn is_on(flag: &AtomicBool) -> bool {
    flag.load(Ordering::Relaxed)
}

pub fn set(flag: &AtomicBool, val: bool) {
    flag.store(val, Ordering::Relaxed);
}

pub fn toggle(flag: &AtomicBool) -> bool {
    !flag.fetch_xor(true, Ordering::Relaxed)
}

/// Log level for a module's chatty per-sample lines.
pub fn level(flag: &AtomicBool) -> log::Level {
    if is_on(flag) {
        log::Level::Info
    } else {
        log::Level::Debug
    }
}

pub fn by_name(name: &str) -> Option<&'static AtomicBool> {
    match name {
        "ppg" => Some(&DEBUG_PPG),
        "temp" => Some(&DEBUG_TEMP),
        "report" => Some(&DEBUG_REPORT),
        _ => None,
    }
}

pub fn status_line() -> String {
    format!(
        "ppg={} temp={} report={}",
        if is_on(&DEBUG_PPG) { "ON" } else { "off" },
        if is_on(&DEBUG_TEMP) { "ON" } else { "off" },
        if is_on(&DEBUG_REPORT) { "ON" } else { "off" },
    )
}
