//! The Task-vs-Time experiment: APD counts recorded against elapsed time.
//!
//! ## Overview
//!
//! [`TaskVsTime`] owns a [`PhotonCounter`], a [`DataSink`] and the experiment side of a
//! [`ControlChannel`]. Each call to [`TaskVsTime::run`] starts a fresh [`RunData`] and loops:
//!
//! 1. Acquire one count: a single-interval read of the configured channel at the sampling
//!    frequency or, in debug mode, the current wall-clock time followed by a sleep of one
//!    sampling period ("time vs time", no hardware needed).
//! 2. Append the count and the elapsed time since the run started.
//! 3. Push all data collected so far, with the run parameters, to the sink.
//! 4. Stop if the controller asked to.
//! 5. Every `autosave_interval` iterations (if enabled), post an autosave request.
//!
//! The run ends once `max_iters` iterations are done or on a stop request. Stop requests are
//! only looked at between iterations, never during a hardware read. Any acquisition or sink
//! error aborts the run and is returned to the caller.

use indexmap::IndexMap;
use log::{debug, info};
use serde::Serialize;
use std::thread;
use std::time::{Duration, Instant};

use crate::acquisition::PhotonCounter;
use crate::channel::{ChanId, ChannelMap, RAW_APD_CHAN};
use crate::control::ControlChannel;
use crate::driver::DaqDriver;
use crate::error::{DaqError, DaqResult};
use crate::sink::{DataSink, SinkRecord};
use crate::utils::unix_time_secs;

pub const TVT_TITLE: &str = "Task vs Time";
pub const TVT_XLABEL: &str = "Time (s)";
pub const TVT_YLABEL: &str = "Counts";

/// Wire names of the fixed run parameters; `extra` may not reuse them.
pub const RESERVED_PARAM_KEYS: [&str; 7] = [
    "DatasetName",
    "samplingFreq",
    "MaxIters",
    "CtrChanNum",
    "DebugMode",
    "shouldAutosave",
    "autosaveInterval",
];

/// Run parameters, pushed verbatim with every record. Field names on the wire follow the
/// keys the plotting GUI expects.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TaskVsTimeParams {
    #[serde(rename = "DatasetName")]
    pub dataset_name: String,
    /// Acquisition rate in Hz; also the loop rate in debug mode
    #[serde(rename = "samplingFreq")]
    pub sampling_freq: f64,
    /// `None` runs until stopped
    #[serde(rename = "MaxIters")]
    pub max_iters: Option<u64>,
    #[serde(rename = "CtrChanNum")]
    pub ctr_chan: ChanId,
    #[serde(rename = "DebugMode")]
    pub debug: bool,
    #[serde(rename = "shouldAutosave")]
    pub should_autosave: bool,
    #[serde(rename = "autosaveInterval")]
    pub autosave_interval: u64,
    /// Free-form parameters forwarded to the sink next to the ones above
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_json::Value>,
}

impl Default for TaskVsTimeParams {
    fn default() -> Self {
        Self {
            dataset_name: "TvT".to_string(),
            sampling_freq: 2.,
            max_iters: Some(7200),
            ctr_chan: RAW_APD_CHAN,
            debug: false,
            should_autosave: false,
            autosave_interval: 1_000_000,
            extra: IndexMap::new(),
        }
    }
}

impl TaskVsTimeParams {
    pub fn validate(&self, channels: &ChannelMap) -> DaqResult<()> {
        self.period()?;
        if self.should_autosave && self.autosave_interval == 0 {
            return Err(DaqError::InvalidParams(
                "autosave interval must be at least 1 iteration".to_string(),
            ));
        }
        if self.dataset_name.is_empty() {
            return Err(DaqError::InvalidParams("dataset name is empty".to_string()));
        }
        if let Some(key) = self.extra.keys().find(|k| RESERVED_PARAM_KEYS.contains(&k.as_str())) {
            return Err(DaqError::InvalidParams(format!(
                "extra parameter '{key}' shadows a run parameter"
            )));
        }
        channels.terminal(self.ctr_chan)?;
        Ok(())
    }

    /// One sampling period; fails unless the frequency is positive and the period fits a `Duration`.
    pub fn period(&self) -> DaqResult<Duration> {
        if !(self.sampling_freq.is_finite() && self.sampling_freq > 0.) {
            return Err(DaqError::InvalidRate(self.sampling_freq));
        }
        Duration::try_from_secs_f64(1. / self.sampling_freq)
            .map_err(|_| DaqError::InvalidRate(self.sampling_freq))
    }

    pub fn autosave_message(&self) -> String {
        format!("SAVE_REQ:AUTO of {} as TvT", self.dataset_name)
    }

    fn autosave_due(&self, iteration: u64) -> bool {
        self.should_autosave && (iteration + 1) % self.autosave_interval == 0
    }
}

/// Datasets of one run. Both vectors always have the same length.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunData {
    /// Seconds since the start of the run
    pub times: Vec<f64>,
    pub counts: Vec<f64>,
}

impl RunData {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// `max_iters` iterations done
    Completed,
    /// The controller asked to stop
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub iterations: u64,
    pub autosaves: u64,
}

pub struct TaskVsTime<D: DaqDriver, S: DataSink> {
    counter: PhotonCounter<D>,
    sink: S,
    control: ControlChannel,
    data: RunData,
}

impl<D: DaqDriver, S: DataSink> TaskVsTime<D, S> {
    pub fn new(counter: PhotonCounter<D>, sink: S, control: ControlChannel) -> Self {
        Self {
            counter,
            sink,
            control,
            data: RunData::default(),
        }
    }

    /// Data of the current or last run.
    pub fn data(&self) -> &RunData {
        &self.data
    }

    pub fn counter(&self) -> &PhotonCounter<D> {
        &self.counter
    }

    pub fn counter_mut(&mut self) -> &mut PhotonCounter<D> {
        &mut self.counter
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn run(&mut self, params: &TaskVsTimeParams) -> DaqResult<RunSummary> {
        params.validate(self.counter.channels())?;
        self.data = RunData::default();
        info!(
            "Starting Task vs Time '{}' at {} Hz on channel {}{}",
            params.dataset_name,
            params.sampling_freq,
            params.ctr_chan,
            if params.debug { " (debug)" } else { "" }
        );

        let period = params.period()?;
        let start = Instant::now();
        let mut iteration: u64 = 0;
        let mut autosaves: u64 = 0;

        let outcome = loop {
            if params.max_iters.is_some_and(|max| iteration >= max) {
                break RunOutcome::Completed;
            }

            let count = if params.debug {
                let now = unix_time_secs();
                thread::sleep(period);
                now
            } else {
                let counts = self
                    .counter
                    .read_counters_single(params.sampling_freq, &[params.ctr_chan])?;
                counts[[0, 0]] as f64
            };
            self.data.counts.push(count);
            self.data.times.push(start.elapsed().as_secs_f64());

            let record = SinkRecord {
                params,
                title: TVT_TITLE,
                xlabel: TVT_XLABEL,
                ylabel: TVT_YLABEL,
                datasets: [
                    ("times", self.data.times.as_slice()),
                    ("counts", self.data.counts.as_slice()),
                ]
                .into_iter()
                .collect(),
            };
            self.sink.push(&record)?;

            if self.control.poll_stop() {
                info!("Stop requested after {} iterations", iteration + 1);
                iteration += 1;
                break RunOutcome::Stopped;
            }

            if params.autosave_due(iteration) {
                debug!("Requesting autosave of {}", params.dataset_name);
                if self.control.post(params.autosave_message()) {
                    autosaves += 1;
                }
            }
            iteration += 1;
        };

        info!(
            "Task vs Time '{}' finished ({:?}) after {} iterations",
            params.dataset_name, outcome, iteration
        );
        Ok(RunSummary {
            outcome,
            iterations: iteration,
            autosaves,
        })
    }
}
