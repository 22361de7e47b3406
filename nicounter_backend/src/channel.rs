//! Maps the small integer identifiers used by the experiment to physical DAQ terminals.
//!
//! The photon detectors are wired to PFI terminals of a single DAQ card. Each detector is
//! named after the switch setting it is gated by (1, 4, 8) plus the raw, ungated APD
//! output (11). A [`ChannelMap`] holds this closed mapping for one device and is never
//! modified after construction.
//!
//! Resolving a list of identifiers with [`ChannelMap::resolve`] also assigns onboard
//! counters: the `k`-th requested channel counts on `Dev<N>/ctr<k>`.

use maplit::btreemap;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};

use crate::error::{DaqError, DaqResult};

pub type ChanId = u8;

/// Raw APD output, not gated by any switch.
pub const RAW_APD_CHAN: ChanId = 11;
/// Order in which channels are read when the caller does not pick any.
pub const DEFAULT_CHANNELS: [ChanId; 4] = [11, 1, 4, 8];

const DEVICE_PATTERN: &str = r"^Dev\d+$";
const PFI_PATTERN: &str = r"^/?Dev\d+/PFI\d+$";

/// A requested channel bound to the counter resource that will count its edges.
#[derive(Clone, Debug, PartialEq)]
pub struct CounterChannel {
    pub id: ChanId,
    /// Counter resource, e.g. `Dev1/ctr0`
    pub counter: String,
    /// Edge source terminal, e.g. `/Dev1/PFI11`
    pub terminal: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChannelMap {
    device: String,
    terminals: BTreeMap<ChanId, String>,
}

impl ChannelMap {
    /// Standard APD wiring on `device`: ids 1, 4, 8, 11 on the PFI line of the same number.
    pub fn new(device: &str) -> DaqResult<Self> {
        let terminals = btreemap! {
            1 => format!("/{device}/PFI1"),
            4 => format!("/{device}/PFI4"),
            8 => format!("/{device}/PFI8"),
            11 => format!("/{device}/PFI11"),
        };
        Self::from_terminals(device, terminals)
    }

    /// Custom wiring. Every terminal has to be a PFI line (`/Dev<N>/PFI<M>`).
    pub fn from_terminals(device: &str, terminals: BTreeMap<ChanId, String>) -> DaqResult<Self> {
        check_format(device, DEVICE_PATTERN, "Dev(number)")?;
        for terminal in terminals.values() {
            check_pfi_terminal(terminal)?;
        }
        Ok(Self {
            device: device.to_string(),
            terminals,
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn ids(&self) -> Vec<ChanId> {
        self.terminals.keys().copied().collect()
    }

    pub fn terminal(&self, id: ChanId) -> DaqResult<&str> {
        self.terminals
            .get(&id)
            .map(String::as_str)
            .ok_or_else(|| DaqError::UnknownChannel {
                id,
                known: self.ids(),
            })
    }

    /// Digital lines used by the auxiliary task whose only job is to run the sample clock.
    pub fn clock_lines(&self) -> String {
        format!("{}/port0", self.device)
    }

    /// Terminal carrying the sample clock of the auxiliary digital-input task.
    pub fn sample_clock_terminal(&self) -> String {
        format!("/{}/di/SampleClock", self.device)
    }

    pub fn counter(&self, index: usize) -> String {
        format!("{}/ctr{}", self.device, index)
    }

    pub fn ao_chan(&self, index: usize) -> String {
        format!("{}/ao{}", self.device, index)
    }

    /// Looks up every requested id and assigns counters in request order.
    ///
    /// Fails on the first unknown or repeated id, and on an empty request.
    pub fn resolve(&self, ids: &[ChanId]) -> DaqResult<Vec<CounterChannel>> {
        if ids.is_empty() {
            return Err(DaqError::NoChannels);
        }
        let mut seen = HashSet::new();
        ids.iter()
            .enumerate()
            .map(|(index, &id)| {
                if !seen.insert(id) {
                    return Err(DaqError::DuplicateChannel(id));
                }
                Ok(CounterChannel {
                    id,
                    counter: self.counter(index),
                    terminal: self.terminal(id)?.to_string(),
                })
            })
            .collect()
    }
}

/// Checks that `terminal` names a PFI line, e.g. `/Dev4/PFI0`.
pub fn check_pfi_terminal(terminal: &str) -> DaqResult<()> {
    check_format(terminal, PFI_PATTERN, "/Dev(number)/PFI(number)")
}

fn check_format(name: &str, pattern: &str, description: &str) -> DaqResult<()> {
    // Patterns are constants of this module
    let re = Regex::new(pattern).map_err(|e| DaqError::InvalidParams(e.to_string()))?;
    if re.is_match(name) {
        Ok(())
    } else {
        Err(DaqError::InvalidTerminal {
            terminal: name.to_string(),
            expected: description.to_string(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn standard_wiring() {
        let map = ChannelMap::new("Dev1").unwrap();
        assert_eq!(map.ids(), vec![1, 4, 8, 11]);
        assert_eq!(map.terminal(11).unwrap(), "/Dev1/PFI11");
        assert_eq!(map.terminal(4).unwrap(), "/Dev1/PFI4");
        assert_eq!(map.clock_lines(), "Dev1/port0");
        assert_eq!(map.sample_clock_terminal(), "/Dev1/di/SampleClock");
    }

    #[test]
    fn unknown_id() {
        let map = ChannelMap::new("Dev1").unwrap();
        assert_eq!(
            map.terminal(3),
            Err(DaqError::UnknownChannel {
                id: 3,
                known: vec![1, 4, 8, 11]
            })
        );
    }

    #[test]
    fn resolve_assigns_counters_in_request_order() {
        let map = ChannelMap::new("Dev2").unwrap();
        let chans = map.resolve(&DEFAULT_CHANNELS).unwrap();
        let pairs: Vec<_> = chans
            .iter()
            .map(|c| (c.id, c.counter.as_str(), c.terminal.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (11, "Dev2/ctr0", "/Dev2/PFI11"),
                (1, "Dev2/ctr1", "/Dev2/PFI1"),
                (4, "Dev2/ctr2", "/Dev2/PFI4"),
                (8, "Dev2/ctr3", "/Dev2/PFI8"),
            ]
        );
    }

    #[test]
    fn resolve_rejects_bad_requests() {
        let map = ChannelMap::new("Dev1").unwrap();
        assert_eq!(map.resolve(&[]), Err(DaqError::NoChannels));
        assert_eq!(map.resolve(&[1, 1]), Err(DaqError::DuplicateChannel(1)));
        assert!(matches!(
            map.resolve(&[1, 5]),
            Err(DaqError::UnknownChannel { id: 5, .. })
        ));
    }

    #[test]
    fn custom_terminals_are_checked() {
        let ok = ChannelMap::from_terminals("Dev4", btreemap! {3 => "/Dev4/PFI3".to_string()});
        assert_eq!(ok.unwrap().terminal(3).unwrap(), "/Dev4/PFI3");

        let bad = ChannelMap::from_terminals("Dev4", btreemap! {3 => "Dev4/ai0".to_string()});
        assert!(matches!(bad, Err(DaqError::InvalidTerminal { .. })));

        assert!(matches!(
            ChannelMap::new("PXI1Slot3"),
            Err(DaqError::InvalidTerminal { .. })
        ));
    }
}
