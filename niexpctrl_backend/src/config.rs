use anyhow::{anyhow, Context, Result};
use confique::Config;
use log::LevelFilter;
use nicounter_backend::{ChanId, ChannelMap, TaskVsTimeParams};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::str::FromStr;

#[derive(Config, Debug, Clone)]
pub struct Conf {
    #[config(nested)]
    pub daq: DaqSettings,
    #[config(nested)]
    pub run: RunSettings,
    #[config(nested)]
    pub log: LogSettings,
}

#[derive(Config, Debug, Clone)]
pub struct DaqSettings {
    #[config(default = "Dev1")]
    pub device: String,
    /// Seconds added to every read timeout
    #[config(default = 1.0)]
    pub timeout_margin: f64,
    /// Channel id -> PFI terminal, replaces the standard wiring
    pub terminals: Option<HashMap<String, String>>,
    #[config(default = 0.0)]
    pub ao_min: f64,
    #[config(default = 5.0)]
    pub ao_max: f64,
}

#[derive(Config, Debug, Clone)]
pub struct RunSettings {
    #[config(default = "TvT")]
    pub dataset_name: String,
    #[config(default = 2.0)]
    pub sampling_freq: f64,
    /// Negative runs until stopped
    #[config(default = 7200)]
    pub max_iters: i64,
    #[config(default = 11)]
    pub ctr_chan: ChanId,
    #[config(default = false)]
    pub debug: bool,
    #[config(default = false)]
    pub should_autosave: bool,
    #[config(default = 1000000)]
    pub autosave_interval: u64,
}

#[derive(Config, Debug, Clone)]
pub struct LogSettings {
    #[config(default = "info")]
    pub level: String,
    /// DAQmx errors are appended to this file
    #[config(default = "nidaqmx_error.logs")]
    pub error_log: String,
}

impl Conf {
    /// Loads `path` on top of the defaults; without a path every default applies.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Conf::builder();
        if let Some(path) = path {
            if !path.exists() {
                return Err(anyhow!("config file {} does not exist", path.display()));
            }
            builder = builder.file(path);
        }
        builder.load().context("failed to load configuration")
    }
}

impl DaqSettings {
    pub fn channel_map(&self) -> Result<ChannelMap> {
        let map = match &self.terminals {
            None => ChannelMap::new(&self.device)?,
            Some(terminals) => {
                let terminals = terminals
                    .iter()
                    .map(|(id, terminal)| {
                        let id = id
                            .parse::<ChanId>()
                            .with_context(|| format!("invalid channel id '{id}' in [daq.terminals]"))?;
                        Ok((id, terminal.clone()))
                    })
                    .collect::<Result<BTreeMap<_, _>>>()?;
                ChannelMap::from_terminals(&self.device, terminals)?
            }
        };
        Ok(map)
    }
}

impl RunSettings {
    pub fn to_params(&self) -> TaskVsTimeParams {
        TaskVsTimeParams {
            dataset_name: self.dataset_name.clone(),
            sampling_freq: self.sampling_freq,
            max_iters: u64::try_from(self.max_iters).ok(),
            ctr_chan: self.ctr_chan,
            debug: self.debug,
            should_autosave: self.should_autosave,
            autosave_interval: self.autosave_interval,
            ..Default::default()
        }
    }
}

impl LogSettings {
    pub fn level_filter(&self) -> Result<LevelFilter> {
        LevelFilter::from_str(&self.level)
            .map_err(|_| anyhow!("unknown log level '{}'", self.level))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    // The file format is picked from the extension
    fn toml_file() -> NamedTempFile {
        tempfile::Builder::new().suffix(".toml").tempfile().unwrap()
    }

    #[test]
    fn defaults_without_file() {
        let conf = Conf::load(None).unwrap();
        assert_eq!(conf.daq.device, "Dev1");
        assert_eq!(conf.daq.timeout_margin, 1.0);
        assert_eq!((conf.daq.ao_min, conf.daq.ao_max), (0.0, 5.0));
        assert_eq!(conf.run.to_params(), TaskVsTimeParams::default());
        assert_eq!(conf.log.level_filter().unwrap(), LevelFilter::Info);
        assert_eq!(conf.log.error_log, "nidaqmx_error.logs");
        assert_eq!(conf.daq.channel_map().unwrap(), ChannelMap::new("Dev1").unwrap());
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = toml_file();
        writeln!(
            file,
            r#"
[daq]
device = "Dev4"
timeout_margin = 0.5

[daq.terminals]
11 = "/Dev4/PFI0"

[run]
dataset_name = "overnight"
max_iters = -1
debug = true

[log]
level = "debug"
"#
        )
        .unwrap();

        let conf = Conf::load(Some(file.path())).unwrap();
        let map = conf.daq.channel_map().unwrap();
        assert_eq!(map.device(), "Dev4");
        assert_eq!(map.ids(), vec![11]);
        assert_eq!(map.terminal(11).unwrap(), "/Dev4/PFI0");

        let params = conf.run.to_params();
        assert_eq!(params.dataset_name, "overnight");
        assert_eq!(params.max_iters, None);
        assert!(params.debug);
        assert_eq!(params.sampling_freq, 2.0);
        assert_eq!(conf.log.level_filter().unwrap(), LevelFilter::Debug);
    }

    #[test]
    fn bad_terminals_are_rejected() {
        let mut file = toml_file();
        writeln!(file, "[daq.terminals]\nx = \"/Dev1/PFI1\"").unwrap();
        let conf = Conf::load(Some(file.path())).unwrap();
        assert!(conf.daq.channel_map().is_err());

        let mut file = toml_file();
        writeln!(file, "[daq.terminals]\n1 = \"Dev1/ai0\"").unwrap();
        let conf = Conf::load(Some(file.path())).unwrap();
        assert!(conf.daq.channel_map().is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Conf::load(Some(Path::new("/nonexistent/niexpctrl.toml"))).is_err());
    }
}
