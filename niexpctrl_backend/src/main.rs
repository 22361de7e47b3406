use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::io::{stdin, stdout, BufRead};
use std::path::PathBuf;
use std::thread;

use nicounter_backend::{
    control_channel, ChanId, DaqDriver, DataSink, JsonLinesSink, LogSink, PhotonCounter,
    RunOutcome, TaskVsTime, TaskVsTimeParams, DEFAULT_CHANNELS,
};
use niexpctrl_backend::{default_driver, logging, simulated_driver, Conf};

#[derive(Parser, Debug)]
#[command(version, about = "Photon counting on NI DAQ counters")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Use the simulated driver instead of NI-DAQmx
    #[arg(long)]
    simulate: bool,
    /// Reset the DAQ device before doing anything else
    #[arg(long)]
    reset: bool,
    /// Debug logging, whatever the configured level
    #[arg(short, long)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record counts against elapsed time until done or until "stop" is typed
    Tvt {
        /// Record wall-clock time instead of counts; needs no hardware
        #[arg(long)]
        debug: bool,
        /// Negative runs until stopped
        #[arg(long, allow_hyphen_values = true)]
        max_iters: Option<i64>,
        #[arg(long)]
        sampling_freq: Option<f64>,
        #[arg(long)]
        dataset: Option<String>,
        /// Write every record to stdout as one line of JSON
        #[arg(long)]
        json: bool,
    },
    /// Read a number of intervals from several channels once and print them
    Read {
        #[arg(long, default_value_t = 10.)]
        rate: f64,
        #[arg(long, default_value_t = 10)]
        samples: usize,
        #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_CHANNELS)]
        chans: Vec<ChanId>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let conf = Conf::load(cli.config.as_deref())?;
    logging::init_from_settings(&conf.log, cli.verbose)?;

    if cli.simulate {
        info!("Using the simulated driver");
        run(simulated_driver(), &cli, &conf)
    } else {
        if cfg!(not(feature = "nidaqmx")) {
            warn!("Built without the nidaqmx feature, using the simulated driver");
        }
        run(default_driver(), &cli, &conf)
    }
}

fn run<D: DaqDriver>(driver: D, cli: &Cli, conf: &Conf) -> Result<()> {
    let channels = conf.daq.channel_map()?;
    let mut counter = PhotonCounter::new(driver, channels)
        .with_timeout_margin(conf.daq.timeout_margin)
        .with_ao_range(conf.daq.ao_min, conf.daq.ao_max);
    if cli.reset {
        counter.reset_device().context("device reset failed")?;
    }

    match &cli.command {
        Command::Read {
            rate,
            samples,
            chans,
        } => {
            let counts = counter
                .read_counters(*rate, *samples, chans)
                .context("acquisition failed")?;
            for (id, row) in chans.iter().zip(counts.rows()) {
                println!("{id:>3}: {row}");
            }
            Ok(())
        }
        Command::Tvt {
            debug,
            max_iters,
            sampling_freq,
            dataset,
            json,
        } => {
            let mut params = conf.run.to_params();
            params.debug |= *debug;
            if let Some(max_iters) = max_iters {
                params.max_iters = u64::try_from(*max_iters).ok();
            }
            if let Some(freq) = sampling_freq {
                params.sampling_freq = *freq;
            }
            if let Some(name) = dataset {
                params.dataset_name = name.clone();
            }
            if *json {
                run_tvt(counter, JsonLinesSink::new(stdout()), &params)
            } else {
                run_tvt(counter, LogSink, &params)
            }
        }
    }
}

fn run_tvt<D: DaqDriver, S: DataSink>(
    counter: PhotonCounter<D>,
    sink: S,
    params: &TaskVsTimeParams,
) -> Result<()> {
    let (handle, control) = control_channel();

    // Typing "stop" (or "q") ends the run after the current iteration
    let stopper = handle.clone();
    thread::spawn(move || {
        for line in stdin().lock().lines().map_while(|l| l.ok()) {
            if matches!(line.trim(), "stop" | "q") {
                stopper.stop();
                break;
            }
        }
    });
    let notes = thread::spawn(move || {
        while let Some(note) = handle.recv_note() {
            info!("{}", note);
        }
    });

    let mut exp = TaskVsTime::new(counter, sink, control);
    let result = exp.run(params);
    let points = exp.data().len();
    // Disconnects the notes thread
    drop(exp);
    if notes.join().is_err() {
        warn!("Note printer panicked");
    }

    let summary = result.context("Task vs Time aborted")?;
    match summary.outcome {
        RunOutcome::Completed => info!("Done: {} points", points),
        RunOutcome::Stopped => info!("Stopped: {} points", points),
    }
    Ok(())
}
