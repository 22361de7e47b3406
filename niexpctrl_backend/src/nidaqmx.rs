//! Provides a minimal rust wrapper for the parts of the NI-DAQmx C library used by counter
//! acquisitions.
//!
//! ## Overview
//!
//! [`NiTask`] encapsulates a handle to an NI-DAQmx task and provides methods that map to DAQmx
//! C-functions: creating digital-input, count-edges and analog-output channels, configuring
//! sample clock timing, committing, starting, reading counters and writing voltages.
//! [`NiDaqmx`] implements [`DaqDriver`] on top of it, which is how the rest of the backend
//! talks to real hardware.
//!
//! **Refer to implementations of the [`NiTask`] struct to see the wrapped methods and invoked
//! [DAQmx C-functions](https://www.ni.com/docs/en-US/bundle/ni-daqmx-c-api-ref/page/cdaqmx/help_file_title.html)**
//!
//! ## Error Handling
//!
//! Every DAQmx C-function returns an `int32` status which, if negative, indicates an error.
//! [`daqmx_call`] turns such a status into a [`DaqError`], fetching the extended error
//! information from the driver. Errors are logged at error level; with the default logging
//! setup they also end up in `nidaqmx_error.logs` in the directory of the calling shell.
//! The status of a read that ran out of time is reported as [`DaqError::Timeout`].
//!
//! ## Cleanup and Resource Management
//!
//! Tasks are released explicitly through [`DaqDriver::clear`]. `NiTask` also implements `Drop`
//! and clears a task that was never released, but this only covers programming errors:
//! a failure at that point can only be logged.
//!
//! This module is only compiled with the `nidaqmx` feature, which links against `NIDAQmx`.

use log::{error, warn};
use std::ffi::CString;

use nicounter_backend::{DaqDriver, DaqError, DaqResult, Edge, SampleMode};

type CConstStr = *const libc::c_char;
type CCharBuf = *mut libc::c_char;
type CFloat64 = libc::c_double;
type CUint32 = libc::c_uint;
type CUint64 = libc::c_ulonglong;
type CBool32 = libc::c_uint;
type CInt32 = libc::c_int;
pub type TaskHandle = *mut libc::c_void;

pub const DAQMX_VAL_RISING: CInt32 = 10280;
pub const DAQMX_VAL_FALLING: CInt32 = 10171;
pub const DAQMX_VAL_VOLTS: CInt32 = 10348;
pub const DAQMX_VAL_FINITESAMPS: CInt32 = 10178;
pub const DAQMX_VAL_CONTSAMPS: CInt32 = 10123;
pub const DAQMX_VAL_COUNTUP: CInt32 = 10128;
pub const DAQMX_VAL_CHANFORALLLINES: CInt32 = 1;
pub const DAQMX_VAL_TASK_COMMIT: CInt32 = 3;

#[link(name = "NIDAQmx")]
extern "C" {
    fn DAQmxResetDevice(name: CConstStr) -> CInt32;
    fn DAQmxGetExtendedErrorInfo(errorString: CCharBuf, bufferSize: CUint32) -> CInt32;

    fn DAQmxCreateTask(taskName: CConstStr, taskHandle_ptr: &mut TaskHandle) -> CInt32;
    fn DAQmxStartTask(handle: TaskHandle) -> CInt32;
    fn DAQmxStopTask(handle: TaskHandle) -> CInt32;
    fn DAQmxClearTask(handle: TaskHandle) -> CInt32;
    fn DAQmxTaskControl(handle: TaskHandle, action: CInt32) -> CInt32;

    fn DAQmxCfgSampClkTiming(
        handle: TaskHandle,
        src: CConstStr,
        rate: CFloat64,
        activeEdge: CInt32,
        sampleMode: CInt32,
        sampsPerChan: CUint64,
    ) -> CInt32;

    fn DAQmxCreateDIChan(
        handle: TaskHandle,
        lines: CConstStr,
        nameToAssignToLines: CConstStr,
        lineGrouping: CInt32,
    ) -> CInt32;
    fn DAQmxCreateCICountEdgesChan(
        handle: TaskHandle,
        counter: CConstStr,
        nameToAssignToChannel: CConstStr,
        edge: CInt32,
        initialCount: CUint32,
        countDirection: CInt32,
    ) -> CInt32;
    fn DAQmxSetCICountEdgesTerm(handle: TaskHandle, channel: CConstStr, data: CConstStr) -> CInt32;
    fn DAQmxCreateAOVoltageChan(
        handle: TaskHandle,
        name: CConstStr,
        assigned_name: CConstStr,
        minVal: CFloat64,
        maxVal: CFloat64,
        units: CInt32,
        customScaleName: CConstStr,
    ) -> CInt32;

    fn DAQmxReadCounterU32(
        handle: TaskHandle,
        numSampsPerChan: CInt32,
        timeout: CFloat64,
        readArray: *mut u32,
        arraySizeInSamps: CUint32,
        sampsPerChanRead: *mut CInt32,
        reserved: *mut CBool32,
    ) -> CInt32;
    fn DAQmxWriteAnalogScalarF64(
        handle: TaskHandle,
        autoStart: CBool32,
        timeout: CFloat64,
        value: CFloat64,
        reserved: *mut CBool32,
    ) -> CInt32;
}

/// Extended error information for the last failed DAQmx call of this thread.
fn extended_error_info() -> String {
    let mut err_buff = [0 as libc::c_char; 2048];
    unsafe {
        DAQmxGetExtendedErrorInfo(err_buff.as_mut_ptr(), err_buff.len() as CUint32);
    }
    unsafe { std::ffi::CStr::from_ptr(err_buff.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

/// Calls a DAQmx C-function and converts a negative status into a [`DaqError`].
///
/// `task` names the task in the error; `timeout` is the timeout of a read call, so that a
/// read running out of time is reported as [`DaqError::Timeout`].
pub fn daqmx_call<F: FnOnce() -> CInt32>(task: &str, timeout: Option<f64>, func: F) -> DaqResult<()> {
    let err_code = func();
    if err_code < 0 {
        let error_string = extended_error_info();
        error!("DAQmx Error on task {}: {}", task, error_string);
        return Err(DaqError::from_status(err_code, error_string, task, timeout));
    }
    Ok(())
}

fn to_cstring(value: &str) -> DaqResult<CString> {
    CString::new(value)
        .map_err(|_| DaqError::InvalidParams(format!("'{}' contains an interior NUL byte", value)))
}

/// Resets a National Instruments (NI) device: aborts its tasks and returns it to its
/// initialized state.
pub fn reset_ni_device(name: &str) -> DaqResult<()> {
    let name_cstr = to_cstring(name)?;
    daqmx_call(name, None, || unsafe { DAQmxResetDevice(name_cstr.as_ptr()) })
}

/// Represents a National Instruments (NI) DAQmx task.
///
/// Creating an instance corresponds to creating a new NI-DAQmx task; methods invoke the
/// associated DAQmx functions on it. The name is only used in error reports.
pub struct NiTask {
    handle: TaskHandle,
    name: String,
}

impl NiTask {
    pub fn new(name: &str) -> DaqResult<Self> {
        let mut taskhandle: TaskHandle = std::ptr::null_mut();
        // Names are left to the driver: identical counter names on several devices would collide
        let task_name_cstr = to_cstring("")?;
        daqmx_call(name, None, || unsafe {
            DAQmxCreateTask(task_name_cstr.as_ptr(), &mut taskhandle)
        })?;
        Ok(Self {
            handle: taskhandle,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn call<F: FnOnce() -> CInt32>(&self, func: F) -> DaqResult<()> {
        daqmx_call(&self.name, None, func)
    }

    pub fn clear(mut self) -> DaqResult<()> {
        let handle = std::mem::replace(&mut self.handle, std::ptr::null_mut());
        self.call(|| unsafe { DAQmxClearTask(handle) })
    }
    pub fn start(&self) -> DaqResult<()> {
        self.call(|| unsafe { DAQmxStartTask(self.handle) })
    }
    pub fn stop(&self) -> DaqResult<()> {
        self.call(|| unsafe { DAQmxStopTask(self.handle) })
    }
    pub fn commit(&self) -> DaqResult<()> {
        self.call(|| unsafe { DAQmxTaskControl(self.handle, DAQMX_VAL_TASK_COMMIT) })
    }

    pub fn cfg_sample_clk(
        &self,
        clk_src: &str,
        samp_rate: f64,
        active_edge: Edge,
        mode: SampleMode,
    ) -> DaqResult<()> {
        let src_cstring = to_cstring(clk_src)?;
        let (samp_mode, samps_per_chan) = match mode {
            SampleMode::Finite(n) => (DAQMX_VAL_FINITESAMPS, n),
            // Buffer size hint only in continuous mode
            SampleMode::Continuous => (DAQMX_VAL_CONTSAMPS, 1000),
        };
        self.call(|| unsafe {
            DAQmxCfgSampClkTiming(
                self.handle,
                src_cstring.as_ptr(),
                samp_rate as CFloat64,
                edge_val(active_edge),
                samp_mode,
                samps_per_chan as CUint64,
            )
        })
    }

    pub fn create_di_chan(&self, lines: &str) -> DaqResult<()> {
        let lines_cstr = to_cstring(lines)?;
        let assigned_name_cstr = to_cstring("")?;
        self.call(|| unsafe {
            DAQmxCreateDIChan(
                self.handle,
                lines_cstr.as_ptr(),
                assigned_name_cstr.as_ptr(),
                DAQMX_VAL_CHANFORALLLINES,
            )
        })
    }

    /// Counts rising edges on `counter`, with the count-edges input routed to `edge_terminal`.
    pub fn create_ci_count_edges_chan(&self, counter: &str, edge_terminal: &str) -> DaqResult<()> {
        let counter_cstr = to_cstring(counter)?;
        let assigned_name_cstr = to_cstring("")?;
        let term_cstr = to_cstring(edge_terminal)?;
        self.call(|| unsafe {
            DAQmxCreateCICountEdgesChan(
                self.handle,
                counter_cstr.as_ptr(),
                assigned_name_cstr.as_ptr(),
                DAQMX_VAL_RISING,
                0,
                DAQMX_VAL_COUNTUP,
            )
        })?;
        self.call(|| unsafe {
            DAQmxSetCICountEdgesTerm(self.handle, counter_cstr.as_ptr(), term_cstr.as_ptr())
        })
    }

    pub fn create_ao_chan(&self, name: &str, min_val: f64, max_val: f64) -> DaqResult<()> {
        let name_cstr = to_cstring(name)?;
        let assigned_name_cstr = to_cstring("")?;
        self.call(|| unsafe {
            DAQmxCreateAOVoltageChan(
                self.handle,
                name_cstr.as_ptr(),
                assigned_name_cstr.as_ptr(),
                min_val as CFloat64,
                max_val as CFloat64,
                DAQMX_VAL_VOLTS,
                std::ptr::null(),
            )
        })
    }

    /// Reads up to `buf.len()` samples of a single counter channel; returns samples read.
    pub fn read_counter_u32(&self, buf: &mut [u32], timeout: f64) -> DaqResult<usize> {
        let len = CInt32::try_from(buf.len())
            .map_err(|_| DaqError::InvalidSampleCount(buf.len()))?;
        let mut nread: CInt32 = 0;
        daqmx_call(&self.name, Some(timeout), || unsafe {
            DAQmxReadCounterU32(
                self.handle,
                len,
                timeout as CFloat64,
                buf.as_mut_ptr(),
                len as CUint32,
                &mut nread as *mut CInt32,
                std::ptr::null_mut(),
            )
        })?;
        Ok(nread.max(0) as usize)
    }

    pub fn write_analog_scalar(&self, value: f64, timeout: f64) -> DaqResult<()> {
        self.call(|| unsafe {
            DAQmxWriteAnalogScalarF64(
                self.handle,
                false as CBool32,
                timeout as CFloat64,
                value as CFloat64,
                std::ptr::null_mut(),
            )
        })
    }
}

fn edge_val(edge: Edge) -> CInt32 {
    match edge {
        Edge::Rising => DAQMX_VAL_RISING,
        Edge::Falling => DAQMX_VAL_FALLING,
    }
}

// Define deletion behavior
impl Drop for NiTask {
    fn drop(&mut self) {
        if self.handle.is_null() {
            return;
        }
        warn!("Task {} dropped without being cleared", self.name);
        let handle = self.handle;
        if let Err(e) = daqmx_call(&self.name, None, || unsafe { DAQmxClearTask(handle) }) {
            error!("Clearing dropped task {} failed: {}", self.name, e);
        }
    }
}

/// [`DaqDriver`] over the NI-DAQmx C library.
#[derive(Default)]
pub struct NiDaqmx;

impl DaqDriver for NiDaqmx {
    type Task = NiTask;

    fn create_task(&mut self, name: &str) -> DaqResult<NiTask> {
        NiTask::new(name)
    }

    fn create_di_chan(&mut self, task: &NiTask, lines: &str) -> DaqResult<()> {
        task.create_di_chan(lines)
    }

    fn create_ci_count_edges_chan(
        &mut self,
        task: &NiTask,
        counter: &str,
        edge_terminal: &str,
    ) -> DaqResult<()> {
        task.create_ci_count_edges_chan(counter, edge_terminal)
    }

    fn create_ao_voltage_chan(
        &mut self,
        task: &NiTask,
        chan: &str,
        min_val: f64,
        max_val: f64,
    ) -> DaqResult<()> {
        task.create_ao_chan(chan, min_val, max_val)
    }

    fn cfg_samp_clk_timing(
        &mut self,
        task: &NiTask,
        clk_src: &str,
        rate: f64,
        active_edge: Edge,
        mode: SampleMode,
    ) -> DaqResult<()> {
        task.cfg_sample_clk(clk_src, rate, active_edge, mode)
    }

    fn commit(&mut self, task: &NiTask) -> DaqResult<()> {
        task.commit()
    }

    fn start(&mut self, task: &NiTask) -> DaqResult<()> {
        task.start()
    }

    fn read_counter_u32(&mut self, task: &NiTask, buf: &mut [u32], timeout: f64) -> DaqResult<usize> {
        task.read_counter_u32(buf, timeout)
    }

    fn write_analog_scalar(&mut self, task: &NiTask, value: f64, timeout: f64) -> DaqResult<()> {
        task.write_analog_scalar(value, timeout)
    }

    fn stop(&mut self, task: &NiTask) -> DaqResult<()> {
        task.stop()
    }

    fn clear(&mut self, task: NiTask) -> DaqResult<()> {
        task.clear()
    }

    fn reset_device(&mut self, device: &str) -> DaqResult<()> {
        reset_ni_device(device)
    }
}
