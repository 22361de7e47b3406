//! Hardware and application layer of the photon counter: the NI-DAQmx driver, configuration,
//! logging and the Python extension module.
//!
//! Without the `nidaqmx` feature nothing links against NI-DAQmx and [`DefaultDriver`] is the
//! simulated driver of `nicounter_backend`.

pub mod config;
pub mod logging;
#[cfg(feature = "nidaqmx")]
pub mod nidaqmx;
#[cfg(feature = "python")]
pub mod python;

pub use crate::config::Conf;

/// Mean photon rate of the simulated APDs, in counts per second.
pub const SIM_COUNT_RATE: f64 = 20_000.;

#[cfg(feature = "nidaqmx")]
pub type DefaultDriver = crate::nidaqmx::NiDaqmx;
#[cfg(not(feature = "nidaqmx"))]
pub type DefaultDriver = nicounter_backend::SimulatedDriver;

#[cfg(feature = "nidaqmx")]
pub fn default_driver() -> DefaultDriver {
    crate::nidaqmx::NiDaqmx
}

#[cfg(not(feature = "nidaqmx"))]
pub fn default_driver() -> DefaultDriver {
    simulated_driver()
}

/// Driver used by `--simulate`, whatever the features.
pub fn simulated_driver() -> nicounter_backend::SimulatedDriver {
    let seed = nicounter_backend::unix_time_secs() as u64;
    nicounter_backend::SimulatedDriver::new().with_count_rate(SIM_COUNT_RATE, seed)
}

#[cfg(feature = "python")]
use pyo3::prelude::*;

#[cfg(feature = "python")]
#[pymodule]
fn niexpctrl_backend(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<python::PyPhotonCounter>()?;
    Ok(())
}
