use anyhow::{Context, Result};
use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, SharedLogger, TermLogger, TerminalMode, WriteLogger,
};
use std::fs::OpenOptions;
use std::path::Path;

use crate::config::LogSettings;

/// Terminal logging at `level`, plus errors (DAQmx errors included) appended to `error_log`.
pub fn init_logging(level: LevelFilter, error_log: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(error_log)
        .with_context(|| format!("failed to open {}", error_log.display()))?;

    let term_config = ConfigBuilder::new()
        .set_target_level(LevelFilter::Debug)
        .build();
    let file_config = ConfigBuilder::new().set_time_format_rfc3339().build();

    let loggers: Vec<Box<dyn SharedLogger>> = vec![
        TermLogger::new(level, term_config, TerminalMode::Mixed, ColorChoice::Auto),
        WriteLogger::new(LevelFilter::Error, file_config, file),
    ];
    CombinedLogger::init(loggers).context("logger already initialized")
}

pub fn init_from_settings(settings: &LogSettings, verbose: bool) -> Result<()> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        settings.level_filter()?
    };
    init_logging(level, Path::new(&settings.error_log))
}
