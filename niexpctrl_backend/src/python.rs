//! Python class `PhotonCounter`, the entry point used by the measurement GUI.
//!
//! Counts come back as 2D `numpy.uint32` arrays shaped `(len(chan_ids), num_samples)`.
//! Configuration errors raise `ValueError`, read timeouts `TimeoutError` and every other
//! driver error `RuntimeError`.

use numpy::{IntoPyArray, PyArray2};
use pyo3::exceptions::{PyRuntimeError, PyTimeoutError, PyValueError};
use pyo3::prelude::*;

use nicounter_backend::{ChanId, ChannelMap, DaqError, Edge, PhotonCounter, DEFAULT_CHANNELS, RAW_APD_CHAN};

use crate::{default_driver, DefaultDriver};

fn to_py_err(err: DaqError) -> PyErr {
    match err {
        DaqError::Timeout { .. } => PyTimeoutError::new_err(err.to_string()),
        DaqError::Hardware { .. } | DaqError::ShortRead { .. } | DaqError::Sink(_) => {
            PyRuntimeError::new_err(err.to_string())
        }
        _ => PyValueError::new_err(err.to_string()),
    }
}

#[pyclass(name = "PhotonCounter", unsendable)]
pub struct PyPhotonCounter {
    inner: PhotonCounter<DefaultDriver>,
}

#[pymethods]
impl PyPhotonCounter {
    #[new]
    #[pyo3(signature = (device="Dev1", timeout_margin=1.0, ao_min=0.0, ao_max=5.0))]
    fn new(device: &str, timeout_margin: f64, ao_min: f64, ao_max: f64) -> PyResult<Self> {
        let channels = ChannelMap::new(device).map_err(to_py_err)?;
        Ok(Self {
            inner: PhotonCounter::new(default_driver(), channels)
                .with_timeout_margin(timeout_margin)
                .with_ao_range(ao_min, ao_max),
        })
    }

    #[pyo3(signature = (rate, num_samples, chan_ids=DEFAULT_CHANNELS.to_vec()))]
    fn read_counters<'py>(
        &mut self,
        py: Python<'py>,
        rate: f64,
        num_samples: usize,
        chan_ids: Vec<ChanId>,
    ) -> PyResult<&'py PyArray2<u32>> {
        let counts = self
            .inner
            .read_counters(rate, num_samples, &chan_ids)
            .map_err(to_py_err)?;
        Ok(counts.into_pyarray(py))
    }

    #[pyo3(signature = (rate, chan_ids=DEFAULT_CHANNELS.to_vec()))]
    fn read_counters_single<'py>(
        &mut self,
        py: Python<'py>,
        rate: f64,
        chan_ids: Vec<ChanId>,
    ) -> PyResult<&'py PyArray2<u32>> {
        let counts = self
            .inner
            .read_counters_single(rate, &chan_ids)
            .map_err(to_py_err)?;
        Ok(counts.into_pyarray(py))
    }

    /// Counts clocked by an external pulse train, e.g. a time tagger on `/Dev4/PFI0`.
    #[pyo3(signature = (clk_terminal, num_samples, chan_ids=vec![RAW_APD_CHAN], timeout=10.0, rising_edge=false))]
    fn read_counters_ext_clk<'py>(
        &mut self,
        py: Python<'py>,
        clk_terminal: &str,
        num_samples: usize,
        chan_ids: Vec<ChanId>,
        timeout: f64,
        rising_edge: bool,
    ) -> PyResult<&'py PyArray2<u32>> {
        let edge = if rising_edge { Edge::Rising } else { Edge::Falling };
        let counts = self
            .inner
            .read_counters_ext_clk(clk_terminal, edge, num_samples, &chan_ids, timeout)
            .map_err(to_py_err)?;
        Ok(counts.into_pyarray(py))
    }

    #[pyo3(signature = (volts, ao_index=0))]
    fn set_analog_voltage(&mut self, volts: f64, ao_index: usize) -> PyResult<()> {
        self.inner
            .set_analog_voltage(ao_index, volts)
            .map_err(to_py_err)
    }

    fn reset_device(&mut self) -> PyResult<()> {
        self.inner.reset_device().map_err(to_py_err)
    }

    fn channel_ids(&self) -> Vec<ChanId> {
        self.inner.channels().ids()
    }
}
