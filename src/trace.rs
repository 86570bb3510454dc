//! VCD (Value Change Dump) signal recorder
//!
//! A [`ModelObserver`] that samples named signals after every completed step
//! and renders the history as VCD text. One step is one time unit.

use tracing::warn;

use crate::error::Result;
use crate::observer::{ModelEvent, ModelObserver};
use crate::value::{Signals, ValueId};

/// One recorded transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalChange {
    pub time: u64,
    pub signal_idx: usize,
    pub value: u64,
    pub high_z: bool,
}

struct Traced {
    name: String,
    id: ValueId,
    bits: u8,
    vcd_id: String,
    last: Option<(u64, bool)>,
}

/// Records named signals of a model for waveform viewers
pub struct SignalRecorder {
    time: u64,
    timescale: String,
    module_name: String,
    /// Names requested before the first event; empty = all named signals
    requested: Vec<String>,
    traced: Vec<Traced>,
    resolved: bool,
    changes: Vec<SignalChange>,
}

impl SignalRecorder {
    pub fn new(module_name: &str) -> Self {
        Self {
            time: 0,
            timescale: "1ns".to_string(),
            module_name: module_name.to_string(),
            requested: Vec::new(),
            traced: Vec::new(),
            resolved: false,
            changes: Vec::new(),
        }
    }

    /// Trace only the given signal (may be called repeatedly)
    pub fn add_signal(&mut self, name: &str) {
        self.requested.push(name.to_string());
    }

    pub fn set_timescale(&mut self, timescale: &str) {
        self.timescale = timescale.to_string();
    }

    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn changes(&self) -> &[SignalChange] {
        &self.changes
    }

    /// VCD identifier for a traced signal: bijective base-94 over the
    /// printable ASCII range `!`..=`~`
    fn idx_to_vcd_id(idx: usize) -> String {
        const FIRST: u8 = b'!';
        const RADIX: usize = (b'~' - b'!') as usize + 1;

        let mut digits = Vec::new();
        let mut n = idx + 1;
        while n > 0 {
            n -= 1;
            digits.push((FIRST + (n % RADIX) as u8) as char);
            n /= RADIX;
        }
        digits.iter().rev().collect()
    }

    fn format_value(value: u64, high_z: bool, width: u8, vcd_id: &str) -> String {
        match (width, high_z) {
            (1, false) => format!("{}{}", value & 1, vcd_id),
            (1, true) => format!("z{}", vcd_id),
            (_, false) => format!("b{:0width$b} {}", value, vcd_id, width = width as usize),
            (_, true) => format!("bz {}", vcd_id),
        }
    }

    fn resolve(&mut self, signals: &Signals) {
        let ids: Vec<(String, ValueId)> = if self.requested.is_empty() {
            signals.named().map(|(n, id)| (n.to_string(), id)).collect()
        } else {
            self.requested
                .iter()
                .filter_map(|name| match signals.by_name(name) {
                    Some(id) => Some((name.clone(), id)),
                    None => {
                        warn!(signal = %name, "cannot trace unknown signal");
                        None
                    }
                })
                .collect()
        };
        self.traced = ids
            .into_iter()
            .enumerate()
            .map(|(idx, (name, id))| Traced {
                name,
                id,
                bits: signals.bits(id),
                vcd_id: Self::idx_to_vcd_id(idx),
                last: None,
            })
            .collect();
        self.resolved = true;
    }

    /// Sample every traced signal at the current time
    pub fn capture(&mut self, signals: &Signals) {
        if !self.resolved {
            self.resolve(signals);
        }
        let time = self.time;
        for (idx, traced) in self.traced.iter_mut().enumerate() {
            let now = signals.get(traced.id);
            if traced.last != Some(now) {
                traced.last = Some(now);
                self.changes.push(SignalChange {
                    time,
                    signal_idx: idx,
                    value: now.0,
                    high_z: now.1,
                });
            }
        }
        self.time += 1;
    }

    /// Render the recorded history as VCD text
    pub fn to_vcd(&self) -> String {
        let mut vcd = String::new();
        vcd.push_str(&format!("$timescale {} $end\n", self.timescale));
        vcd.push_str(&format!("$scope module {} $end\n", self.module_name));
        for traced in &self.traced {
            let safe_name = traced.name.replace('.', "_").replace('[', "_").replace(']', "");
            vcd.push_str(&format!(
                "$var wire {} {} {} $end\n",
                traced.bits, traced.vcd_id, safe_name
            ));
        }
        vcd.push_str("$upscope $end\n");
        vcd.push_str("$enddefinitions $end\n");

        let mut last_time: Option<u64> = None;
        for change in &self.changes {
            if last_time != Some(change.time) {
                vcd.push_str(&format!("#{}\n", change.time));
                last_time = Some(change.time);
            }
            let traced = &self.traced[change.signal_idx];
            vcd.push_str(&Self::format_value(change.value, change.high_z, traced.bits, &traced.vcd_id));
            vcd.push('\n');
        }
        vcd
    }

    pub fn save_vcd(&self, path: &str) -> Result<()> {
        std::fs::write(path, self.to_vcd())?;
        Ok(())
    }

    /// Drop recorded history; traced signals stay selected
    pub fn clear(&mut self) {
        self.changes.clear();
        self.time = 0;
        for traced in &mut self.traced {
            traced.last = None;
        }
    }
}

impl ModelObserver for SignalRecorder {
    fn handle_event(&mut self, event: ModelEvent, signals: &Signals) {
        match event {
            ModelEvent::Started | ModelEvent::Step | ModelEvent::MicroStep | ModelEvent::Break => {
                self.capture(signals)
            }
            ModelEvent::ManualChange | ModelEvent::Closed => {}
        }
    }
}
