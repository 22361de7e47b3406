//! Photon counting on National Instruments DAQ cards.
//!
//! The crate reads APD photon counts from the onboard counters of an NI card and runs the
//! "Task vs Time" experiment on top of that:
//!
//! - [`channel`]: channel identifiers and their PFI terminals;
//! - [`driver`]: the [`DaqDriver`] seam over the DAQmx calls the crate needs;
//! - [`acquisition`]: [`PhotonCounter`], the synchronized multi-counter read;
//! - [`experiment`]: [`TaskVsTime`], the counts-vs-elapsed-time loop;
//! - [`sink`] and [`control`]: where the loop publishes data and how it is stopped;
//! - [`sim`]: [`SimulatedDriver`], a driver for tests and hardware-free runs.
//!
//! The binding to the real NI-DAQmx library lives in the `niexpctrl_backend` crate.

pub mod acquisition;
pub mod channel;
pub mod control;
pub mod driver;
pub mod error;
pub mod experiment;
pub mod sim;
pub mod sink;
pub mod task_stack;
pub mod utils;

pub use acquisition::*;
pub use channel::*;
pub use control::*;
pub use driver::*;
pub use error::*;
pub use experiment::*;
pub use sim::{DriverCall, SimStep, SimulatedDriver};
pub use sink::*;
pub use task_stack::TaskStack;
pub use utils::*;
