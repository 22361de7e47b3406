//! Error type shared by every layer of the counter backend.
//!
//! Errors fall into three groups:
//! 1. Configuration errors (unknown channel, bad rate or sample count, ...). These are always
//!    returned before any hardware task is created.
//! 2. Hardware errors reported by the driver, carried unchanged as [`DaqError::Hardware`].
//! 3. Read failures: [`DaqError::Timeout`] and [`DaqError::ShortRead`].
//!
//! There is no local recovery anywhere: every error aborts the current acquisition after
//! its tasks were released, and aborts the experiment run calling it.

use thiserror::Error;

use crate::channel::ChanId;

/// NI-DAQmx status code returned when a read did not complete within its timeout.
pub const DAQMX_ERROR_SAMPLES_NOT_YET_AVAILABLE: i32 = -200284;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DaqError {
    #[error("unknown channel id {id}, registered ids are {known:?}")]
    UnknownChannel { id: ChanId, known: Vec<ChanId> },

    #[error("channel id {0} was requested more than once")]
    DuplicateChannel(ChanId),

    #[error("no counter channels requested")]
    NoChannels,

    #[error("acquisition rate must be a positive finite number of Hz, got {0}")]
    InvalidRate(f64),

    #[error("number of samples must be at least 1, got {0}")]
    InvalidSampleCount(usize),

    #[error("terminal {terminal} does not match '{expected}'")]
    InvalidTerminal { terminal: String, expected: String },

    #[error("voltage {value} V outside of the allowed range [{min}, {max}] V")]
    VoltageOutOfRange { value: f64, min: f64, max: f64 },

    #[error("invalid experiment parameters: {0}")]
    InvalidParams(String),

    /// Negative status code and extended error information reported by the driver.
    #[error("DAQmx error {code}: {message}")]
    Hardware { code: i32, message: String },

    #[error("read on task {task} timed out after {seconds} s")]
    Timeout { task: String, seconds: f64 },

    #[error("read on task {task} returned {got} samples, expected {expected}")]
    ShortRead {
        task: String,
        expected: usize,
        got: usize,
    },

    #[error("data sink error: {0}")]
    Sink(String),
}

impl DaqError {
    /// Builds the error matching a negative driver status code.
    ///
    /// Read timeouts are reported by NI-DAQmx as an ordinary status code; they are promoted to
    /// [`DaqError::Timeout`] so callers can tell them apart from configuration faults.
    pub fn from_status(code: i32, message: String, task: &str, timeout: Option<f64>) -> Self {
        match (code, timeout) {
            (DAQMX_ERROR_SAMPLES_NOT_YET_AVAILABLE, Some(seconds)) => DaqError::Timeout {
                task: task.to_string(),
                seconds,
            },
            _ => DaqError::Hardware { code, message },
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, DaqError::Timeout { .. })
    }
}

pub type DaqResult<T> = Result<T, DaqError>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn timeout_status_is_promoted() {
        let err = DaqError::from_status(
            DAQMX_ERROR_SAMPLES_NOT_YET_AVAILABLE,
            "Some or all of the samples requested have not yet been acquired.".into(),
            "ctr0",
            Some(2.5),
        );
        assert_eq!(
            err,
            DaqError::Timeout {
                task: "ctr0".into(),
                seconds: 2.5
            }
        );
        assert!(err.is_timeout());
    }

    #[test]
    fn other_status_stays_hardware() {
        let err = DaqError::from_status(-200220, "Device identifier is invalid.".into(), "clk", None);
        assert!(matches!(err, DaqError::Hardware { code: -200220, .. }));
        assert_eq!(err.to_string(), "DAQmx error -200220: Device identifier is invalid.");
    }
}
