//! The hardware seam: the handful of DAQ operations a counter acquisition needs.
//!
//! [`DaqDriver`] mirrors the NI-DAQmx C functions one to one (task creation, channel creation,
//! sample clock timing, commit, start, read, stop, clear). The NI implementation lives in
//! `niexpctrl_backend::nidaqmx`; [`crate::sim::SimulatedDriver`] stands in for hardware in
//! tests and in simulation mode.
//!
//! Tasks are plain values owned by the caller. Releasing them is the caller's job, see
//! [`crate::task_stack::TaskStack`].

use crate::error::DaqResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleMode {
    /// Acquire exactly this many samples per channel, then stop
    Finite(u64),
    Continuous,
}

pub trait DaqDriver {
    type Task;

    fn create_task(&mut self, name: &str) -> DaqResult<Self::Task>;

    /// Adds a digital-input channel over all `lines` (e.g. `Dev1/port0`).
    fn create_di_chan(&mut self, task: &Self::Task, lines: &str) -> DaqResult<()>;

    /// Adds an edge-counting channel on `counter` (e.g. `Dev1/ctr0`) whose count-edges input
    /// is wired to `edge_terminal` (e.g. `/Dev1/PFI11`).
    fn create_ci_count_edges_chan(
        &mut self,
        task: &Self::Task,
        counter: &str,
        edge_terminal: &str,
    ) -> DaqResult<()>;

    fn create_ao_voltage_chan(
        &mut self,
        task: &Self::Task,
        chan: &str,
        min_val: f64,
        max_val: f64,
    ) -> DaqResult<()>;

    /// Sample clock timing; an empty `clk_src` selects the onboard clock.
    fn cfg_samp_clk_timing(
        &mut self,
        task: &Self::Task,
        clk_src: &str,
        rate: f64,
        active_edge: Edge,
        mode: SampleMode,
    ) -> DaqResult<()>;

    /// Programs the hardware with the task configuration without starting it.
    fn commit(&mut self, task: &Self::Task) -> DaqResult<()>;

    fn start(&mut self, task: &Self::Task) -> DaqResult<()>;

    /// Blocks until `buf` is full or `timeout` seconds have passed; returns samples read.
    fn read_counter_u32(&mut self, task: &Self::Task, buf: &mut [u32], timeout: f64)
        -> DaqResult<usize>;

    fn write_analog_scalar(&mut self, task: &Self::Task, value: f64, timeout: f64)
        -> DaqResult<()>;

    fn stop(&mut self, task: &Self::Task) -> DaqResult<()>;

    /// Frees the task. The handle is consumed and can not be used afterwards.
    fn clear(&mut self, task: Self::Task) -> DaqResult<()>;

    fn reset_device(&mut self, device: &str) -> DaqResult<()>;
}
