//! Clock node
//!
//! A clock only changes phase when the model applies a toggle between
//! stabilization rounds. Its update simply writes the current phase to the
//! driven net, so clock edges propagate like any other write.

use crate::error::{PinError, Result};
use crate::node::{check_widths, Node, UpdateCtx};
use crate::value::{Signals, ValueId};

/// Handle of a clock registered with a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClockId(pub(crate) usize);

impl ClockId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Low,
    High,
}

impl Phase {
    pub fn toggled(self) -> Phase {
        match self {
            Phase::Low => Phase::High,
            Phase::High => Phase::Low,
        }
    }

    pub fn bit(self) -> u64 {
        match self {
            Phase::Low => 0,
            Phase::High => 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Clock {
    phase: Phase,
    output: [ValueId; 1],
}

impl Clock {
    pub fn new(output: ValueId) -> Self {
        Self {
            phase: Phase::Low,
            output: [output],
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn output(&self) -> ValueId {
        self.output[0]
    }

    /// Flip the phase; the new level reaches the net on the next update
    pub(crate) fn toggle(&mut self) -> Phase {
        self.phase = self.phase.toggled();
        self.phase
    }
}

impl Node for Clock {
    fn kind(&self) -> &'static str {
        "clock"
    }

    fn inputs(&self) -> &[ValueId] {
        &[]
    }

    fn outputs(&self) -> &[ValueId] {
        &self.output
    }

    fn check_pins(&self, signals: &Signals) -> std::result::Result<(), PinError> {
        check_widths("clock", signals, &self.output, 1)
    }

    fn update(&mut self, ctx: &mut UpdateCtx<'_>) -> Result<()> {
        ctx.set(self.output[0], self.phase.bit(), false)?;
        Ok(())
    }
}
