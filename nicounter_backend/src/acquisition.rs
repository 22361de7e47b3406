//! Synchronized edge counting on several counters of one NI DAQ card.
//!
//! ## Overview
//!
//! [`PhotonCounter`] reads a number of sampling intervals from a set of APD channels and returns,
//! per channel, the number of photon edges detected during each interval.
//!
//! Counters on NI cards can not run on the onboard clock directly. The acquisition therefore
//! creates an auxiliary digital-input task whose only job is to run a continuous sample clock
//! at the requested rate, and clocks every counter task from that task's `di/SampleClock`:
//!
//! 1. Create, configure and commit the clock task (not started).
//! 2. For every channel, create a count-edges task on its own counter, wire the count-edges
//!    input to the channel's PFI terminal, clock it from the shared sample clock for a finite
//!    `intervals + 1` samples, and commit it (not started).
//! 3. Start all counter tasks, then start the clock task **last**. Counters only latch on clock
//!    edges, so starting the clock is what makes every counter begin together.
//! 4. Read every counter buffer with a timeout of `(intervals + 1) / rate` plus a margin.
//! 5. Return the first difference of each buffer as one row of an `Array2<u32>`.
//!
//! Reading `intervals + 1` raw samples is what makes the difference yield exactly `intervals`
//! values; callers always get back the number of intervals they asked for.
//!
//! ## Resource management
//!
//! All tasks of one call live in a [`TaskStack`] which is released on every exit path before
//! the call returns. Invalid requests (unknown channel, bad rate or sample count) are rejected
//! before the first task is created.

use log::{debug, error};
use ndarray::Array2;

use crate::channel::{check_pfi_terminal, ChanId, ChannelMap, CounterChannel};
use crate::driver::{DaqDriver, Edge, SampleMode};
use crate::error::{DaqError, DaqResult};
use crate::task_stack::TaskStack;
use crate::utils::{first_difference, TickTimer};

/// Seconds added to every read timeout on top of the nominal acquisition time.
pub const DEFAULT_TIMEOUT_MARGIN: f64 = 1.0;
/// Nominal rate handed to the driver when counters are clocked from an external terminal.
pub const EXT_CLK_MAX_RATE: f64 = 20e6;
/// Largest raw buffer a single counter read can request.
pub const MAX_RAW_SAMPLES: usize = i32::MAX as usize;
/// Default output range of the attenuator control voltage.
pub const DEFAULT_AO_RANGE: (f64, f64) = (0.0, 5.0);

/// Where the counters take their sample clock from.
#[derive(Clone, Debug, PartialEq)]
pub enum ClockSource {
    /// Sample clock of an auxiliary digital-input task running on `lines`, exported on
    /// `terminal`. The auxiliary task runs at the acquisition rate.
    Internal { lines: String, terminal: String },
    /// Pulses arriving on an external terminal, latched on `edge`.
    External {
        terminal: String,
        edge: Edge,
        timeout: f64,
    },
}

/// A validated acquisition request. Building one never touches hardware.
#[derive(Clone, Debug, PartialEq)]
pub struct AcquisitionPlan {
    pub rate: f64,
    pub intervals: usize,
    pub channels: Vec<CounterChannel>,
    pub clock: ClockSource,
    pub timeout_margin: f64,
}

impl AcquisitionPlan {
    /// Raw samples read per channel: one more than the number of intervals.
    pub fn buffer_len(&self) -> usize {
        self.intervals + 1
    }

    pub fn read_timeout(&self) -> f64 {
        match &self.clock {
            ClockSource::Internal { .. } => {
                self.buffer_len() as f64 * (1.0 / self.rate) + self.timeout_margin
            }
            ClockSource::External { timeout, .. } => *timeout,
        }
    }

    fn clk_src_and_edge(&self) -> (&str, Edge) {
        match &self.clock {
            ClockSource::Internal { terminal, .. } => (terminal.as_str(), Edge::Rising),
            ClockSource::External { terminal, edge, .. } => (terminal.as_str(), *edge),
        }
    }
}

pub struct PhotonCounter<D: DaqDriver> {
    driver: D,
    channels: ChannelMap,
    timeout_margin: f64,
    ao_range: (f64, f64),
}

impl<D: DaqDriver> PhotonCounter<D> {
    pub fn new(driver: D, channels: ChannelMap) -> Self {
        Self {
            driver,
            channels,
            timeout_margin: DEFAULT_TIMEOUT_MARGIN,
            ao_range: DEFAULT_AO_RANGE,
        }
    }

    pub fn with_timeout_margin(mut self, seconds: f64) -> Self {
        self.timeout_margin = seconds;
        self
    }

    pub fn with_ao_range(mut self, min: f64, max: f64) -> Self {
        self.ao_range = (min, max);
        self
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn channels(&self) -> &ChannelMap {
        &self.channels
    }

    /// Validates a request clocked by the auxiliary sample-clock task.
    pub fn plan(&self, rate: f64, num_samples: usize, chan_ids: &[ChanId]) -> DaqResult<AcquisitionPlan> {
        let clock = ClockSource::Internal {
            lines: self.channels.clock_lines(),
            terminal: self.channels.sample_clock_terminal(),
        };
        self.build_plan(rate, num_samples, chan_ids, clock)
    }

    fn build_plan(
        &self,
        rate: f64,
        num_samples: usize,
        chan_ids: &[ChanId],
        clock: ClockSource,
    ) -> DaqResult<AcquisitionPlan> {
        if !(rate.is_finite() && rate > 0.) {
            return Err(DaqError::InvalidRate(rate));
        }
        // `num_samples + 1` raw samples have to fit the driver's int32 sample count
        if num_samples == 0 || num_samples >= MAX_RAW_SAMPLES {
            return Err(DaqError::InvalidSampleCount(num_samples));
        }
        if !(self.timeout_margin.is_finite() && self.timeout_margin >= 0.) {
            return Err(DaqError::InvalidParams(format!(
                "timeout margin must be a non-negative number of seconds, got {}",
                self.timeout_margin
            )));
        }
        let channels = self.channels.resolve(chan_ids)?;
        let plan = AcquisitionPlan {
            rate,
            intervals: num_samples,
            channels,
            clock,
            timeout_margin: self.timeout_margin,
        };
        if !plan.read_timeout().is_finite() {
            return Err(DaqError::InvalidRate(rate));
        }
        Ok(plan)
    }

    /// Reads `num_samples` intervals at `rate` Hz on every channel of `chan_ids`.
    ///
    /// Returns an array shaped `(chan_ids.len(), num_samples)`; row `k` belongs to
    /// `chan_ids[k]`. Every task is released before returning, also on error.
    pub fn read_counters(
        &mut self,
        rate: f64,
        num_samples: usize,
        chan_ids: &[ChanId],
    ) -> DaqResult<Array2<u32>> {
        let plan = self.plan(rate, num_samples, chan_ids)?;
        self.execute(&plan)
    }

    /// Single interval variant of [`PhotonCounter::read_counters`].
    pub fn read_counters_single(&mut self, rate: f64, chan_ids: &[ChanId]) -> DaqResult<Array2<u32>> {
        self.read_counters(rate, 1, chan_ids)
    }

    /// Reads `num_samples` intervals clocked by pulses on an external terminal
    /// (e.g. a time tagger on `/Dev4/PFI0`), waiting at most `timeout` seconds per channel.
    pub fn read_counters_ext_clk(
        &mut self,
        clk_terminal: &str,
        edge: Edge,
        num_samples: usize,
        chan_ids: &[ChanId],
        timeout: f64,
    ) -> DaqResult<Array2<u32>> {
        check_pfi_terminal(clk_terminal)?;
        if !(timeout.is_finite() && timeout > 0.) {
            return Err(DaqError::InvalidParams(format!(
                "read timeout must be a positive number of seconds, got {timeout}"
            )));
        }
        let clock = ClockSource::External {
            terminal: clk_terminal.to_string(),
            edge,
            timeout,
        };
        let plan = self.build_plan(EXT_CLK_MAX_RATE, num_samples, chan_ids, clock)?;
        self.execute(&plan)
    }

    /// Runs a validated plan and releases every task it created.
    pub fn execute(&mut self, plan: &AcquisitionPlan) -> DaqResult<Array2<u32>> {
        let mut stack = TaskStack::new();
        let result = Self::run_plan(&mut self.driver, plan, &mut stack);
        let released = stack.release_all(&mut self.driver);
        finish(result, released)
    }

    fn run_plan(
        driver: &mut D,
        plan: &AcquisitionPlan,
        stack: &mut TaskStack<D>,
    ) -> DaqResult<Array2<u32>> {
        let mut timer = TickTimer::new();
        let buffer_len = plan.buffer_len();

        // Auxiliary task providing the sample clock: committed now, started last
        let clk = match &plan.clock {
            ClockSource::Internal { lines, .. } => {
                let clk = stack.create(driver, "clk")?;
                driver.create_di_chan(stack.task(clk), lines)?;
                driver.cfg_samp_clk_timing(
                    stack.task(clk),
                    "",
                    plan.rate,
                    Edge::Rising,
                    SampleMode::Continuous,
                )?;
                driver.commit(stack.task(clk))?;
                Some(clk)
            }
            ClockSource::External { .. } => None,
        };

        let (clk_src, edge) = plan.clk_src_and_edge();
        let mut counters = Vec::with_capacity(plan.channels.len());
        for chan in &plan.channels {
            let idx = stack.create(driver, &chan.counter)?;
            let task = stack.task(idx);
            driver.create_ci_count_edges_chan(task, &chan.counter, &chan.terminal)?;
            driver.cfg_samp_clk_timing(
                task,
                clk_src,
                plan.rate,
                edge,
                SampleMode::Finite(buffer_len as u64),
            )?;
            driver.commit(task)?;
            debug!(
                "Channel {} counts {} on {} ({} samples)",
                chan.id, chan.terminal, chan.counter, buffer_len
            );
            counters.push(idx);
        }
        timer.tick_trace("cfg (clock and counter tasks)");

        for &idx in &counters {
            stack.start(driver, idx)?;
        }
        if let Some(clk) = clk {
            stack.start(driver, clk)?;
        }
        timer.tick_trace("start");

        let timeout = plan.read_timeout();
        let mut counts = Array2::<u32>::zeros((counters.len(), plan.intervals));
        let mut raw = vec![0u32; buffer_len];
        for (row, &idx) in counters.iter().enumerate() {
            raw.fill(0);
            let got = driver.read_counter_u32(stack.task(idx), &mut raw, timeout)?;
            if got != buffer_len {
                return Err(DaqError::ShortRead {
                    task: stack.label(idx).to_string(),
                    expected: buffer_len,
                    got,
                });
            }
            counts.row_mut(row).assign(&first_difference(&raw));
        }
        timer.tick_trace("read");
        Ok(counts)
    }

    /// Writes one control voltage on `Dev<N>/ao<ao_index>` (laser attenuator).
    pub fn set_analog_voltage(&mut self, ao_index: usize, volts: f64) -> DaqResult<()> {
        let (min, max) = self.ao_range;
        if !(volts.is_finite() && min <= volts && volts <= max) {
            return Err(DaqError::VoltageOutOfRange {
                value: volts,
                min,
                max,
            });
        }
        let chan = self.channels.ao_chan(ao_index);
        let mut stack = TaskStack::new();
        let result = Self::write_voltage(&mut self.driver, &mut stack, &chan, (min, max), volts);
        let released = stack.release_all(&mut self.driver);
        finish(result, released)
    }

    fn write_voltage(
        driver: &mut D,
        stack: &mut TaskStack<D>,
        chan: &str,
        (min, max): (f64, f64),
        volts: f64,
    ) -> DaqResult<()> {
        let idx = stack.create(driver, chan)?;
        driver.create_ao_voltage_chan(stack.task(idx), chan, min, max)?;
        stack.start(driver, idx)?;
        driver.write_analog_scalar(stack.task(idx), volts, 1.0)?;
        debug!("Set {} to {} V", chan, volts);
        Ok(())
    }

    pub fn reset_device(&mut self) -> DaqResult<()> {
        debug!("Resetting device {}", self.channels.device());
        self.driver.reset_device(self.channels.device())
    }
}

/// Combines the outcome of an operation with the outcome of releasing its tasks.
///
/// The operation's own error wins; a release failure is only returned after a success.
fn finish<T>(result: DaqResult<T>, released: DaqResult<()>) -> DaqResult<T> {
    match (result, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(release_err)) => Err(release_err),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(release_err)) => {
            error!("Releasing tasks after a failed operation also failed: {}", release_err);
            Err(e)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sim::{DriverCall, SimStep, SimulatedDriver};
    use ndarray::array;

    fn counter() -> PhotonCounter<SimulatedDriver> {
        PhotonCounter::new(SimulatedDriver::new(), ChannelMap::new("Dev1").unwrap())
    }

    #[test]
    fn single_channel_single_interval() {
        let mut ctr = counter();
        ctr.driver_mut().script_counts("Dev1/ctr0", vec![1000, 1007]);
        let counts = ctr.read_counters(100., 1, &[11]).unwrap();
        assert_eq!(counts, array![[7]]);
        assert!(ctr.driver().alive_tasks().is_empty());
    }

    #[test]
    fn plan_timeout_and_buffer() {
        let ctr = counter();
        let plan = ctr.plan(2., 3, &[1, 4]).unwrap();
        assert_eq!(plan.buffer_len(), 4);
        assert_eq!(plan.read_timeout(), 4. * 0.5 + 1.);
        assert_eq!(plan.channels[1].counter, "Dev1/ctr1");

        let ctr = counter().with_timeout_margin(0.25);
        assert_eq!(ctr.plan(100., 1, &[11]).unwrap().read_timeout(), 0.02 + 0.25);
    }

    #[test]
    fn invalid_requests_create_no_task() {
        let mut ctr = counter();
        assert_eq!(ctr.read_counters(0., 1, &[11]), Err(DaqError::InvalidRate(0.)));
        assert!(matches!(ctr.read_counters(f64::NAN, 1, &[11]), Err(DaqError::InvalidRate(_))));
        assert_eq!(ctr.read_counters(10., 0, &[11]), Err(DaqError::InvalidSampleCount(0)));
        assert!(matches!(
            ctr.read_counters(10., 1, &[2]),
            Err(DaqError::UnknownChannel { id: 2, .. })
        ));
        assert_eq!(ctr.driver().created_tasks(), 0);
    }

    #[test]
    fn oversized_requests_create_no_task() {
        let mut ctr = counter();
        assert_eq!(
            ctr.read_counters(1., usize::MAX, &[11]),
            Err(DaqError::InvalidSampleCount(usize::MAX))
        );
        assert_eq!(
            ctr.read_counters(1., MAX_RAW_SAMPLES, &[11]),
            Err(DaqError::InvalidSampleCount(MAX_RAW_SAMPLES))
        );
        // (n + 1) / rate overflows to infinity
        assert_eq!(
            ctr.read_counters(1e-308, 1000, &[11]),
            Err(DaqError::InvalidRate(1e-308))
        );
        assert_eq!(ctr.driver().created_tasks(), 0);
    }

    #[test]
    fn clock_task_configuration() {
        let mut ctr = counter();
        ctr.read_counters(50., 2, &[8]).unwrap();
        let journal = ctr.driver().journal();
        assert!(journal.contains(&DriverCall::CreateDiChan {
            task: "clk".into(),
            lines: "Dev1/port0".into()
        }));
        assert!(journal.contains(&DriverCall::CfgSampClk {
            task: "clk".into(),
            src: "".into(),
            rate: 50.,
            edge: Edge::Rising,
            mode: SampleMode::Continuous,
        }));
        assert!(journal.contains(&DriverCall::CreateCountEdgesChan {
            task: "Dev1/ctr0".into(),
            counter: "Dev1/ctr0".into(),
            terminal: "/Dev1/PFI8".into(),
        }));
        assert!(journal.contains(&DriverCall::CfgSampClk {
            task: "Dev1/ctr0".into(),
            src: "/Dev1/di/SampleClock".into(),
            rate: 50.,
            edge: Edge::Rising,
            mode: SampleMode::Finite(3),
        }));
    }

    #[test]
    fn configuration_failure_releases_created_tasks() {
        let mut ctr = counter();
        ctr.driver_mut().inject_fault(SimStep::Commit, "Dev1/ctr1");
        let err = ctr.read_counters(10., 2, &[1, 4, 8]).unwrap_err();
        assert!(matches!(err, DaqError::Hardware { .. }));
        // Nothing was started and the third counter was never created
        assert!(!ctr
            .driver()
            .journal()
            .iter()
            .any(|c| matches!(c, DriverCall::Start(_))));
        assert_eq!(ctr.driver().created_tasks(), 3);
        assert!(ctr.driver().alive_tasks().is_empty());
    }

    #[test]
    fn short_read_is_fatal() {
        let mut ctr = counter();
        ctr.driver_mut().script_counts("Dev1/ctr0", vec![1, 2]);
        let err = ctr.read_counters(10., 3, &[1]).unwrap_err();
        assert_eq!(
            err,
            DaqError::ShortRead {
                task: "Dev1/ctr0".into(),
                expected: 4,
                got: 2
            }
        );
        assert!(ctr.driver().started_tasks().is_empty());
    }

    #[test]
    fn release_failure_after_success_is_reported() {
        let mut ctr = counter();
        ctr.driver_mut().inject_fault(SimStep::Stop, "clk");
        let err = ctr.read_counters(10., 1, &[11]).unwrap_err();
        assert!(matches!(err, DaqError::Hardware { .. }));
        // The clock task could not be stopped but was still cleared
        assert!(ctr.driver().alive_tasks().is_empty());
    }

    #[test]
    fn external_clock_has_no_clock_task() {
        let mut ctr = counter();
        ctr.driver_mut().script_counts("Dev1/ctr0", vec![0, 4, 9]);
        let counts = ctr
            .read_counters_ext_clk("/Dev1/PFI0", Edge::Falling, 2, &[11], 3.)
            .unwrap();
        assert_eq!(counts, array![[4, 5]]);
        let journal = ctr.driver().journal();
        assert!(!journal.contains(&DriverCall::CreateTask("clk".into())));
        assert!(journal.contains(&DriverCall::CfgSampClk {
            task: "Dev1/ctr0".into(),
            src: "/Dev1/PFI0".into(),
            rate: EXT_CLK_MAX_RATE,
            edge: Edge::Falling,
            mode: SampleMode::Finite(3),
        }));
        assert!(journal.contains(&DriverCall::Read {
            task: "Dev1/ctr0".into(),
            timeout: 3.
        }));
    }

    #[test]
    fn external_clock_needs_finite_timeout() {
        let mut ctr = counter();
        assert!(matches!(
            ctr.read_counters_ext_clk("/Dev1/PFI0", Edge::Falling, 2, &[11], f64::INFINITY),
            Err(DaqError::InvalidParams(_))
        ));
        assert!(matches!(
            ctr.read_counters_ext_clk("PXI_Trig0", Edge::Falling, 2, &[11], 1.),
            Err(DaqError::InvalidTerminal { .. })
        ));
        assert_eq!(ctr.driver().created_tasks(), 0);
    }

    #[test]
    fn analog_voltage() {
        let mut ctr = counter();
        ctr.set_analog_voltage(0, 2.5).unwrap();
        assert_eq!(ctr.driver().ao_value("Dev1/ao0"), Some(2.5));
        assert!(ctr.driver().alive_tasks().is_empty());

        assert_eq!(
            ctr.set_analog_voltage(0, 5.5),
            Err(DaqError::VoltageOutOfRange {
                value: 5.5,
                min: 0.,
                max: 5.
            })
        );
        let mut wide = counter().with_ao_range(-10., 10.);
        wide.set_analog_voltage(1, -3.).unwrap();
        assert_eq!(wide.driver().ao_value("Dev1/ao1"), Some(-3.));
    }

    #[test]
    fn reset_goes_to_mapped_device() {
        let mut ctr = PhotonCounter::new(SimulatedDriver::new(), ChannelMap::new("Dev4").unwrap());
        ctr.reset_device().unwrap();
        assert_eq!(ctr.driver().journal(), &[DriverCall::ResetDevice("Dev4".into())]);
    }
}
