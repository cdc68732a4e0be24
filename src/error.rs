use thiserror::Error;

/// Failure reported by a hardware sensor adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[cfg_attr(not(target_os = "espidf"), allow(dead_code))]
pub enum SensorError {
    #[error("{sensor}: timed out after {waited_ms} ms waiting for {operation}")]
    Timeout {
        sensor: &'static str,
        operation: &'static str,
        waited_ms: u64,
    },
    #[error("{sensor}: bus error during {operation}: {details}")]
    Bus {
        sensor: &'static str,
        operation: &'static str,
        details: String,
    },
    #[error("{sensor}: device failure: {details}")]
    Device {
        sensor: &'static str,
        details: String,
    },
}

impl SensorError {
    /// Timeouts and bus glitches are worth retrying; a missing or wrong
    /// device is not.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SensorError::Timeout { .. } | SensorError::Bus { .. })
    }
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("measurement cycle cancelled")]
    Cancelled,
    #[error("sensor failure aborted the cycle: {0}")]
    Sensor(#[from] SensorError),
}
