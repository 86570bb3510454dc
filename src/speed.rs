//! Clock speed test
//!
//! Drives the single clock of a model as fast as the kernel allows for a
//! wall-clock window and reports the achieved frequency.

use std::time::{Duration, Instant};

use tracing::info;

use crate::error::{Error, Result};
use crate::model::Model;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedReport {
    /// Full clock cycles completed
    pub cycles: u64,
    pub elapsed: Duration,
    /// Cycles per second
    pub hz: f64,
}

impl SpeedReport {
    /// Human readable frequency, e.g. "1.25 MHz"
    pub fn format_hz(&self) -> String {
        let hz = self.hz;
        if hz >= 1e9 {
            format!("{:.2} GHz", hz / 1e9)
        } else if hz >= 1e6 {
            format!("{:.2} MHz", hz / 1e6)
        } else if hz >= 1e3 {
            format!("{:.2} kHz", hz / 1e3)
        } else {
            format!("{:.2} Hz", hz)
        }
    }
}

/// Run full clock cycles until `window` has elapsed
pub fn measure(model: &mut Model, window: Duration) -> Result<SpeedReport> {
    let clocks = model.clocks();
    let &[clock] = clocks.as_slice() else {
        return Err(Error::ClockCount { clocks: clocks.len() });
    };

    let start = Instant::now();
    let mut cycles = 0u64;
    loop {
        for _ in 0..2 {
            model.toggle_clock(clock)?;
            model.do_step()?;
        }
        cycles += 1;
        if start.elapsed() >= window {
            break;
        }
    }

    let elapsed = start.elapsed();
    let secs = elapsed.as_secs_f64();
    let hz = if secs > 0.0 { cycles as f64 / secs } else { 0.0 };
    let report = SpeedReport { cycles, elapsed, hz };
    info!(cycles, ?elapsed, hz = %report.format_hz(), "speed test finished");
    Ok(report)
}
