//! Tri-state bus merge
//!
//! Resolves several tri-state drivers onto one net. One active driver is the
//! normal case, no active driver floats the bus, and disagreeing active
//! drivers burn it.

use crate::error::{PinError, Result};
use crate::node::{check_widths, Node, UpdateCtx};
use crate::value::{Signals, ValueId};

#[derive(Debug, Clone)]
pub struct BusMerge {
    bits: u8,
    drivers: Vec<ValueId>,
    output: [ValueId; 1],
}

impl BusMerge {
    pub fn new(bits: u8, drivers: Vec<ValueId>, output: ValueId) -> Self {
        Self {
            bits,
            drivers,
            output: [output],
        }
    }

    pub fn output(&self) -> ValueId {
        self.output[0]
    }
}

impl Node for BusMerge {
    fn kind(&self) -> &'static str {
        "bus"
    }

    fn inputs(&self) -> &[ValueId] {
        &self.drivers
    }

    fn outputs(&self) -> &[ValueId] {
        &self.output
    }

    fn check_pins(&self, signals: &Signals) -> std::result::Result<(), PinError> {
        if self.drivers.is_empty() {
            return Err(PinError::new("bus: no drivers", vec![self.output[0]]));
        }
        check_widths("bus", signals, &self.drivers, self.bits)?;
        check_widths("bus", signals, &self.output, self.bits)
    }

    fn update(&mut self, ctx: &mut UpdateCtx<'_>) -> Result<()> {
        let active: Vec<(ValueId, u64)> = self
            .drivers
            .iter()
            .filter_map(|&d| match ctx.get(d) {
                (_, true) => None,
                (value, false) => Some((d, value)),
            })
            .collect();

        match active.first().map(|&(_, value)| value) {
            None => {
                ctx.set(self.output[0], 0, true)?;
            }
            Some(value) => {
                if active.iter().any(|&(_, other)| other != value) {
                    let (nets, values) = active.into_iter().unzip();
                    return Err(ctx.burn_error(nets, values).into());
                }
                ctx.set(self.output[0], value, false)?;
            }
        }
        Ok(())
    }
}
