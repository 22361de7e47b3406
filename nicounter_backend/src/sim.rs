//! A software stand-in for an NI DAQ card.
//!
//! [`SimulatedDriver`] implements [`DaqDriver`] without touching hardware. It is used by the
//! test-suite and by the command line in simulation mode, and supports:
//!
//! - **Scripted raw buffers**: [`SimulatedDriver::script_counts`] queues the exact cumulative
//!   counts the next read on a counter returns.
//! - **Generated counts**: with [`SimulatedDriver::with_count_rate`], counters without a script
//!   accumulate random edges around a mean photon rate.
//! - **Fault injection**: [`SimulatedDriver::inject_fault`] fails one step on one task.
//! - **Journal**: every call is recorded as a [`DriverCall`] to check ordering in tests.
//!
//! The simulator enforces the same preconditions as the NI driver where they matter here:
//! only live tasks can be used, and reads require a started task.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};

use crate::driver::{DaqDriver, Edge, SampleMode};
use crate::error::{DaqError, DaqResult};

/// DAQmx status for an operation on a task that has not been started.
const STATUS_TASK_NOT_RUNNING: i32 = -200983;
/// DAQmx status for a handle that was already cleared.
const STATUS_INVALID_TASK: i32 = -200088;
/// Status used for injected faults.
pub const STATUS_INJECTED_FAULT: i32 = -200000;

#[derive(Clone, Debug, PartialEq)]
pub enum DriverCall {
    CreateTask(String),
    CreateDiChan { task: String, lines: String },
    CreateCountEdgesChan { task: String, counter: String, terminal: String },
    CreateAoChan { task: String, chan: String },
    CfgSampClk { task: String, src: String, rate: f64, edge: Edge, mode: SampleMode },
    Commit(String),
    Start(String),
    Read { task: String, timeout: f64 },
    WriteAnalog { task: String, value: f64 },
    Stop(String),
    Clear(String),
    ResetDevice(String),
}

/// The step at which an injected fault fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SimStep {
    Create,
    Configure,
    Commit,
    Start,
    Read,
    Write,
    Stop,
    Clear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimTaskId(usize);

struct SimTask {
    name: String,
    counter: Option<String>,
    samp_rate: Option<f64>,
    started: bool,
    alive: bool,
}

pub struct SimulatedDriver {
    tasks: Vec<SimTask>,
    journal: Vec<DriverCall>,
    scripts: HashMap<String, VecDeque<Vec<u32>>>,
    totals: HashMap<String, u32>,
    faults: Vec<(SimStep, String)>,
    count_rate: Option<f64>,
    rng: StdRng,
    ao_values: HashMap<String, f64>,
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            journal: Vec::new(),
            scripts: HashMap::new(),
            totals: HashMap::new(),
            faults: Vec::new(),
            count_rate: None,
            rng: StdRng::seed_from_u64(0),
            ao_values: HashMap::new(),
        }
    }

    /// Counters without a script count random edges with a mean of `counts_per_sec`.
    pub fn with_count_rate(mut self, counts_per_sec: f64, seed: u64) -> Self {
        self.count_rate = Some(counts_per_sec);
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Queues the cumulative counts returned by the next read on `counter` (e.g. `Dev1/ctr0`).
    ///
    /// A script shorter than the read buffer produces a short read.
    pub fn script_counts(&mut self, counter: &str, raw: Vec<u32>) {
        self.scripts
            .entry(counter.to_string())
            .or_default()
            .push_back(raw);
    }

    /// Makes `step` fail on the task named `task`. Read faults report a timeout.
    pub fn inject_fault(&mut self, step: SimStep, task: &str) {
        self.faults.push((step, task.to_string()));
    }

    pub fn journal(&self) -> &[DriverCall] {
        &self.journal
    }

    pub fn clear_journal(&mut self) {
        self.journal.clear();
    }

    pub fn created_tasks(&self) -> usize {
        self.journal
            .iter()
            .filter(|call| matches!(call, DriverCall::CreateTask(_)))
            .count()
    }

    /// Names of tasks created and not cleared yet.
    pub fn alive_tasks(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| t.alive)
            .map(|t| t.name.clone())
            .collect()
    }

    /// Names of live tasks currently running.
    pub fn started_tasks(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| t.alive && t.started)
            .map(|t| t.name.clone())
            .collect()
    }

    /// Last voltage written to an analog output channel.
    pub fn ao_value(&self, chan: &str) -> Option<f64> {
        self.ao_values.get(chan).copied()
    }

    fn task_name(&self, task: &SimTaskId) -> String {
        self.tasks[task.0].name.clone()
    }

    fn live(&mut self, task: &SimTaskId) -> DaqResult<&mut SimTask> {
        let entry = &mut self.tasks[task.0];
        if entry.alive {
            Ok(entry)
        } else {
            Err(DaqError::Hardware {
                code: STATUS_INVALID_TASK,
                message: format!("Task {} has already been cleared", entry.name),
            })
        }
    }

    fn check_fault(&self, step: SimStep, name: &str) -> DaqResult<()> {
        if self.faults.iter().any(|(s, n)| *s == step && n == name) {
            Err(DaqError::Hardware {
                code: STATUS_INJECTED_FAULT,
                message: format!("Injected {step:?} fault on task {name}"),
            })
        } else {
            Ok(())
        }
    }

    fn generate(&mut self, counter: &str, samp_rate: f64, len: usize) -> Vec<u32> {
        let mut total = self.totals.get(counter).copied().unwrap_or(0);
        let mean = match self.count_rate {
            Some(rate) if samp_rate > 0. => (rate / samp_rate).max(0.),
            _ => 0.,
        };
        let max_step = (2. * mean).round().min(u32::MAX as f64) as u32;
        let raw: Vec<u32> = (0..len)
            .map(|_| {
                if max_step > 0 {
                    total = total.wrapping_add(self.rng.random_range(0..=max_step));
                }
                total
            })
            .collect();
        self.totals.insert(counter.to_string(), total);
        raw
    }
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl DaqDriver for SimulatedDriver {
    type Task = SimTaskId;

    fn create_task(&mut self, name: &str) -> DaqResult<SimTaskId> {
        self.journal.push(DriverCall::CreateTask(name.to_string()));
        self.check_fault(SimStep::Create, name)?;
        self.tasks.push(SimTask {
            name: name.to_string(),
            counter: None,
            samp_rate: None,
            started: false,
            alive: true,
        });
        Ok(SimTaskId(self.tasks.len() - 1))
    }

    fn create_di_chan(&mut self, task: &SimTaskId, lines: &str) -> DaqResult<()> {
        let name = self.task_name(task);
        self.journal.push(DriverCall::CreateDiChan {
            task: name.clone(),
            lines: lines.to_string(),
        });
        self.check_fault(SimStep::Configure, &name)?;
        self.live(task).map(|_| ())
    }

    fn create_ci_count_edges_chan(
        &mut self,
        task: &SimTaskId,
        counter: &str,
        edge_terminal: &str,
    ) -> DaqResult<()> {
        let name = self.task_name(task);
        self.journal.push(DriverCall::CreateCountEdgesChan {
            task: name.clone(),
            counter: counter.to_string(),
            terminal: edge_terminal.to_string(),
        });
        self.check_fault(SimStep::Configure, &name)?;
        self.live(task)?.counter = Some(counter.to_string());
        Ok(())
    }

    fn create_ao_voltage_chan(
        &mut self,
        task: &SimTaskId,
        chan: &str,
        _min_val: f64,
        _max_val: f64,
    ) -> DaqResult<()> {
        let name = self.task_name(task);
        self.journal.push(DriverCall::CreateAoChan {
            task: name.clone(),
            chan: chan.to_string(),
        });
        self.check_fault(SimStep::Configure, &name)?;
        // The AO channel name doubles as the "counter" slot to remember where writes go
        self.live(task)?.counter = Some(chan.to_string());
        Ok(())
    }

    fn cfg_samp_clk_timing(
        &mut self,
        task: &SimTaskId,
        clk_src: &str,
        rate: f64,
        active_edge: Edge,
        mode: SampleMode,
    ) -> DaqResult<()> {
        let name = self.task_name(task);
        self.journal.push(DriverCall::CfgSampClk {
            task: name.clone(),
            src: clk_src.to_string(),
            rate,
            edge: active_edge,
            mode,
        });
        self.check_fault(SimStep::Configure, &name)?;
        self.live(task)?.samp_rate = Some(rate);
        Ok(())
    }

    fn commit(&mut self, task: &SimTaskId) -> DaqResult<()> {
        let name = self.task_name(task);
        self.journal.push(DriverCall::Commit(name.clone()));
        self.check_fault(SimStep::Commit, &name)?;
        self.live(task).map(|_| ())
    }

    fn start(&mut self, task: &SimTaskId) -> DaqResult<()> {
        let name = self.task_name(task);
        self.journal.push(DriverCall::Start(name.clone()));
        self.check_fault(SimStep::Start, &name)?;
        self.live(task)?.started = true;
        Ok(())
    }

    fn read_counter_u32(
        &mut self,
        task: &SimTaskId,
        buf: &mut [u32],
        timeout: f64,
    ) -> DaqResult<usize> {
        let name = self.task_name(task);
        self.journal.push(DriverCall::Read {
            task: name.clone(),
            timeout,
        });
        if self.check_fault(SimStep::Read, &name).is_err() {
            return Err(DaqError::Timeout {
                task: name,
                seconds: timeout,
            });
        }
        let entry = self.live(task)?;
        if !entry.started {
            return Err(DaqError::Hardware {
                code: STATUS_TASK_NOT_RUNNING,
                message: format!("Task {name} must be running to read samples"),
            });
        }
        let counter = entry.counter.clone().unwrap_or_else(|| name.clone());
        let samp_rate = entry.samp_rate.unwrap_or(0.);

        let scripted = self
            .scripts
            .get_mut(&counter)
            .and_then(|queue| queue.pop_front());
        let raw = match scripted {
            Some(raw) => raw,
            None => self.generate(&counter, samp_rate, buf.len()),
        };
        let n = raw.len().min(buf.len());
        buf[..n].copy_from_slice(&raw[..n]);
        Ok(n)
    }

    fn write_analog_scalar(&mut self, task: &SimTaskId, value: f64, _timeout: f64) -> DaqResult<()> {
        let name = self.task_name(task);
        self.journal.push(DriverCall::WriteAnalog {
            task: name.clone(),
            value,
        });
        self.check_fault(SimStep::Write, &name)?;
        let entry = self.live(task)?;
        if !entry.started {
            return Err(DaqError::Hardware {
                code: STATUS_TASK_NOT_RUNNING,
                message: format!("Task {name} must be running to write samples"),
            });
        }
        let chan = entry.counter.clone().unwrap_or(name);
        self.ao_values.insert(chan, value);
        Ok(())
    }

    fn stop(&mut self, task: &SimTaskId) -> DaqResult<()> {
        let name = self.task_name(task);
        self.journal.push(DriverCall::Stop(name.clone()));
        self.check_fault(SimStep::Stop, &name)?;
        self.live(task)?.started = false;
        Ok(())
    }

    fn clear(&mut self, task: SimTaskId) -> DaqResult<()> {
        let name = self.task_name(&task);
        self.journal.push(DriverCall::Clear(name.clone()));
        self.check_fault(SimStep::Clear, &name)?;
        let entry = self.live(&task)?;
        entry.started = false;
        entry.alive = false;
        Ok(())
    }

    fn reset_device(&mut self, device: &str) -> DaqResult<()> {
        self.journal.push(DriverCall::ResetDevice(device.to_string()));
        self.totals.clear();
        self.ao_values.clear();
        Ok(())
    }
}
