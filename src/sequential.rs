//! Stateful nodes: edge-triggered register and break detector

use crate::error::{PinError, Result};
use crate::node::{check_widths, Node, UpdateCtx};
use crate::value::{Signals, ValueId};

/// D flip-flop capturing D on a rising clock edge while enabled
#[derive(Debug, Clone)]
pub struct Register {
    bits: u8,
    // d, clock, optional enable
    inputs: Vec<ValueId>,
    output: [ValueId; 1],
    last_clock: bool,
    state: u64,
}

impl Register {
    pub fn new(bits: u8, d: ValueId, clock: ValueId, enable: Option<ValueId>, q: ValueId) -> Self {
        let mut inputs = vec![d, clock];
        inputs.extend(enable);
        Self {
            bits,
            inputs,
            output: [q],
            last_clock: false,
            state: 0,
        }
    }

    fn d(&self) -> ValueId {
        self.inputs[0]
    }

    fn clock(&self) -> ValueId {
        self.inputs[1]
    }

    fn enable(&self) -> Option<ValueId> {
        self.inputs.get(2).copied()
    }

    /// Currently stored value
    pub fn state(&self) -> u64 {
        self.state
    }
}

impl Node for Register {
    fn kind(&self) -> &'static str {
        "register"
    }

    fn inputs(&self) -> &[ValueId] {
        &self.inputs
    }

    fn outputs(&self) -> &[ValueId] {
        &self.output
    }

    fn check_pins(&self, signals: &Signals) -> std::result::Result<(), PinError> {
        check_widths("register", signals, &[self.d()], self.bits)?;
        check_widths("register", signals, &self.output, self.bits)?;
        check_widths("register", signals, &self.inputs[1..], 1)
    }

    fn update(&mut self, ctx: &mut UpdateCtx<'_>) -> Result<()> {
        let clock = ctx.read(self.clock())? != 0;
        let enabled = match self.enable() {
            Some(en) => ctx.read(en)? != 0,
            None => true,
        };
        let rising = clock && !self.last_clock;
        self.last_clock = clock;

        if rising && enabled {
            self.state = ctx.read(self.d())?;
        }
        ctx.set(self.output[0], self.state, false)?;
        Ok(())
    }
}

/// Stops a fast run when its input rises
#[derive(Debug, Clone)]
pub struct Break {
    input: [ValueId; 1],
    last: bool,
    fired: bool,
}

impl Break {
    pub fn new(input: ValueId) -> Self {
        Self {
            input: [input],
            last: false,
            fired: false,
        }
    }

    pub fn fired(&self) -> bool {
        self.fired
    }

    pub(crate) fn take_fired(&mut self) -> bool {
        std::mem::take(&mut self.fired)
    }
}

impl Node for Break {
    fn kind(&self) -> &'static str {
        "break"
    }

    fn inputs(&self) -> &[ValueId] {
        &self.input
    }

    fn outputs(&self) -> &[ValueId] {
        &[]
    }

    fn check_pins(&self, signals: &Signals) -> std::result::Result<(), PinError> {
        check_widths("break", signals, &self.input, 1)
    }

    fn update(&mut self, ctx: &mut UpdateCtx<'_>) -> Result<()> {
        let level = ctx.read(self.input[0])? != 0;
        if level && !self.last {
            self.fired = true;
        }
        self.last = level;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::node::run_node;

    fn update(node: &mut dyn Node, signals: &mut Signals) -> Result<()> {
        run_node(node, signals)
    }

    #[test]
    fn test_register_captures_on_rising_edge_only() {
        let mut signals = Signals::new();
        let d = signals.add(8).unwrap();
        let clk = signals.add(1).unwrap();
        let q = signals.add(8).unwrap();
        let mut reg = Register::new(8, d, clk, None, q);

        signals.set(d, 0x42, false);
        update(&mut reg, &mut signals).unwrap();
        assert_eq!(signals.get(q), (0, false));

        signals.set(clk, 1, false);
        update(&mut reg, &mut signals).unwrap();
        assert_eq!(signals.get(q), (0x42, false));

        // Still high: no second capture
        signals.set(d, 0x17, false);
        update(&mut reg, &mut signals).unwrap();
        assert_eq!(signals.get(q), (0x42, false));

        // Falling edge: no capture
        signals.set(clk, 0, false);
        update(&mut reg, &mut signals).unwrap();
        assert_eq!(signals.get(q), (0x42, false));

        signals.set(clk, 1, false);
        update(&mut reg, &mut signals).unwrap();
        assert_eq!(signals.get(q), (0x17, false));
        assert_eq!(reg.state(), 0x17);
    }

    #[test]
    fn test_register_enable() {
        let mut signals = Signals::new();
        let d = signals.add(1).unwrap();
        let clk = signals.add(1).unwrap();
        let en = signals.add(1).unwrap();
        let q = signals.add(1).unwrap();
        let mut reg = Register::new(1, d, clk, Some(en), q);

        signals.set(d, 1, false);
        signals.set(clk, 1, false);
        update(&mut reg, &mut signals).unwrap();
        assert_eq!(signals.get(q), (0, false));

        signals.set(clk, 0, false);
        update(&mut reg, &mut signals).unwrap();
        signals.set(en, 1, false);
        signals.set(clk, 1, false);
        update(&mut reg, &mut signals).unwrap();
        assert_eq!(signals.get(q), (1, false));
    }

    #[test]
    fn test_register_high_z_clock_fails() {
        let mut signals = Signals::new();
        let d = signals.add(1).unwrap();
        let clk = signals.add(1).unwrap();
        let q = signals.add(1).unwrap();
        signals.set(clk, 0, true);
        let mut reg = Register::new(1, d, clk, None, q);

        match update(&mut reg, &mut signals) {
            Err(Error::Node(e)) => assert_eq!(e.nets, vec![clk]),
            other => panic!("expected node error, got {:?}", other),
        }
    }

    #[test]
    fn test_break_fires_once_per_rising_edge() {
        let mut signals = Signals::new();
        let halt = signals.add(1).unwrap();
        let mut brk = Break::new(halt);

        update(&mut brk, &mut signals).unwrap();
        assert!(!brk.fired());

        signals.set(halt, 1, false);
        update(&mut brk, &mut signals).unwrap();
        assert!(brk.take_fired());
        assert!(!brk.fired());

        update(&mut brk, &mut signals).unwrap();
        assert!(!brk.fired());
    }
}
