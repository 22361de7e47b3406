//! The data sink boundary: where the experiment publishes its growing datasets.
//!
//! After every iteration the experiment pushes a [`SinkRecord`] holding the run parameters,
//! plot metadata and every dataset collected so far. What happens to it is up to the sink:
//!
//! - [`MemorySink`] keeps the latest snapshot behind a shared lock, for a plotting thread;
//! - [`JsonLinesSink`] writes each record as one JSON line (e.g. to a GUI process on stdout);
//! - [`LogSink`] only logs a summary line.

use indexmap::IndexMap;
use log::info;
use parking_lot::Mutex;
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;

use crate::error::{DaqError, DaqResult};
use crate::experiment::TaskVsTimeParams;

#[derive(Debug, Serialize)]
pub struct SinkRecord<'a> {
    pub params: &'a TaskVsTimeParams,
    pub title: &'a str,
    pub xlabel: &'a str,
    pub ylabel: &'a str,
    pub datasets: IndexMap<&'a str, &'a [f64]>,
}

impl<'a> SinkRecord<'a> {
    pub fn to_json(&self) -> DaqResult<String> {
        serde_json::to_string(self).map_err(|e| DaqError::Sink(e.to_string()))
    }
}

pub trait DataSink {
    fn push(&mut self, record: &SinkRecord) -> DaqResult<()>;
}

/// Owned copy of the last record pushed to a [`MemorySink`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub params: Option<TaskVsTimeParams>,
    pub title: String,
    pub xlabel: String,
    pub ylabel: String,
    pub datasets: IndexMap<String, Vec<f64>>,
    /// Number of records pushed since the sink was created
    pub pushes: usize,
}

/// Keeps the latest record. Clones share the same snapshot.
#[derive(Clone, Default)]
pub struct MemorySink {
    latest: Arc<Mutex<Snapshot>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.latest.lock().clone()
    }

    pub fn pushes(&self) -> usize {
        self.latest.lock().pushes
    }
}

impl DataSink for MemorySink {
    fn push(&mut self, record: &SinkRecord) -> DaqResult<()> {
        let mut latest = self.latest.lock();
        latest.params = Some(record.params.clone());
        latest.title = record.title.to_string();
        latest.xlabel = record.xlabel.to_string();
        latest.ylabel = record.ylabel.to_string();
        latest.datasets = record
            .datasets
            .iter()
            .map(|(name, data)| (name.to_string(), data.to_vec()))
            .collect();
        latest.pushes += 1;
        Ok(())
    }
}

/// Serializes every record as a single line of JSON.
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> DataSink for JsonLinesSink<W> {
    fn push(&mut self, record: &SinkRecord) -> DaqResult<()> {
        let line = record.to_json()?;
        writeln!(self.writer, "{}", line)
            .and_then(|_| self.writer.flush())
            .map_err(|e| DaqError::Sink(e.to_string()))
    }
}

/// Logs the dataset name, the number of points and the latest value of every dataset.
#[derive(Default)]
pub struct LogSink;

impl DataSink for LogSink {
    fn push(&mut self, record: &SinkRecord) -> DaqResult<()> {
        let latest = record
            .datasets
            .iter()
            .map(|(name, data)| match data.last() {
                Some(value) => format!("{}={}", name, value),
                None => format!("{}=-", name),
            })
            .collect::<Vec<_>>()
            .join(", ");
        let points = record.datasets.values().map(|d| d.len()).max().unwrap_or(0);
        info!("{} [{} points] {}", record.params.dataset_name, points, latest);
        Ok(())
    }
}
