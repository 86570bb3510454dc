//! Combinational gates
//!
//! Every fan-in gate is the same skeleton: reduce all inputs with one
//! bitwise operator, optionally invert, mask to the gate width. A gate kind
//! is nothing more than an (operator, invert) pair.

use serde::Deserialize;

use crate::error::{PinError, Result};
use crate::node::{check_widths, Node, UpdateCtx};
use crate::value::{mask, Signals, ValueId};

/// Reduction operator of a fan-in gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanInOp {
    And,
    Or,
    Xor,
}

impl FanInOp {
    #[inline(always)]
    fn identity(self, mask: u64) -> u64 {
        match self {
            FanInOp::And => mask,
            FanInOp::Or | FanInOp::Xor => 0,
        }
    }

    #[inline(always)]
    fn apply(self, acc: u64, value: u64) -> u64 {
        match self {
            FanInOp::And => acc & value,
            FanInOp::Or => acc | value,
            FanInOp::Xor => acc ^ value,
        }
    }
}

/// Reduce-then-invert strategy shared by the whole gate family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reduction {
    pub op: FanInOp,
    pub invert: bool,
}

impl Reduction {
    pub const AND: Reduction = Reduction { op: FanInOp::And, invert: false };
    pub const NAND: Reduction = Reduction { op: FanInOp::And, invert: true };
    pub const OR: Reduction = Reduction { op: FanInOp::Or, invert: false };
    pub const NOR: Reduction = Reduction { op: FanInOp::Or, invert: true };
    pub const XOR: Reduction = Reduction { op: FanInOp::Xor, invert: false };
    pub const XNOR: Reduction = Reduction { op: FanInOp::Xor, invert: true };

    /// Apply the reduction to a set of input patterns
    pub fn calculate(self, bits: u8, inputs: impl IntoIterator<Item = u64>) -> u64 {
        let mask = mask(bits);
        let reduced = inputs
            .into_iter()
            .fold(self.op.identity(mask), |acc, v| self.op.apply(acc, v & mask));
        if self.invert {
            !reduced & mask
        } else {
            reduced & mask
        }
    }

    fn name(self) -> &'static str {
        match (self.op, self.invert) {
            (FanInOp::And, false) => "and",
            (FanInOp::And, true) => "nand",
            (FanInOp::Or, false) => "or",
            (FanInOp::Or, true) => "nor",
            (FanInOp::Xor, false) => "xor",
            (FanInOp::Xor, true) => "xnor",
        }
    }
}

/// N-input gate of the AND/OR/XOR family
#[derive(Debug, Clone)]
pub struct FanIn {
    reduction: Reduction,
    bits: u8,
    inputs: Vec<ValueId>,
    output: ValueId,
}

impl FanIn {
    pub fn new(reduction: Reduction, bits: u8, inputs: Vec<ValueId>, output: ValueId) -> Self {
        Self { reduction, bits, inputs, output }
    }

    pub fn and(bits: u8, inputs: Vec<ValueId>, output: ValueId) -> Self {
        Self::new(Reduction::AND, bits, inputs, output)
    }

    pub fn nand(bits: u8, inputs: Vec<ValueId>, output: ValueId) -> Self {
        Self::new(Reduction::NAND, bits, inputs, output)
    }

    pub fn or(bits: u8, inputs: Vec<ValueId>, output: ValueId) -> Self {
        Self::new(Reduction::OR, bits, inputs, output)
    }

    pub fn nor(bits: u8, inputs: Vec<ValueId>, output: ValueId) -> Self {
        Self::new(Reduction::NOR, bits, inputs, output)
    }

    pub fn xor(bits: u8, inputs: Vec<ValueId>, output: ValueId) -> Self {
        Self::new(Reduction::XOR, bits, inputs, output)
    }

    pub fn xnor(bits: u8, inputs: Vec<ValueId>, output: ValueId) -> Self {
        Self::new(Reduction::XNOR, bits, inputs, output)
    }

    pub fn reduction(&self) -> Reduction {
        self.reduction
    }

    pub fn output(&self) -> ValueId {
        self.output
    }
}

impl Node for FanIn {
    fn kind(&self) -> &'static str {
        self.reduction.name()
    }

    fn inputs(&self) -> &[ValueId] {
        &self.inputs
    }

    fn outputs(&self) -> &[ValueId] {
        std::slice::from_ref(&self.output)
    }

    fn check_pins(&self, signals: &Signals) -> std::result::Result<(), PinError> {
        if self.inputs.is_empty() {
            return Err(PinError::new(format!("{}: gate has no inputs", self.kind()), vec![self.output]));
        }
        check_widths(self.kind(), signals, &self.inputs, self.bits)?;
        check_widths(self.kind(), signals, self.outputs(), self.bits)
    }

    fn update(&mut self, ctx: &mut UpdateCtx<'_>) -> Result<()> {
        let mut values = Vec::with_capacity(self.inputs.len());
        for &input in &self.inputs {
            values.push(ctx.read(input)?);
        }
        let out = self.reduction.calculate(self.bits, values);
        ctx.set(self.output, out, false)?;
        Ok(())
    }
}

/// Inverter
#[derive(Debug, Clone)]
pub struct Not {
    bits: u8,
    input: [ValueId; 1],
    output: [ValueId; 1],
}

impl Not {
    pub fn new(bits: u8, input: ValueId, output: ValueId) -> Self {
        Self {
            bits,
            input: [input],
            output: [output],
        }
    }
}

impl Node for Not {
    fn kind(&self) -> &'static str {
        "not"
    }

    fn inputs(&self) -> &[ValueId] {
        &self.input
    }

    fn outputs(&self) -> &[ValueId] {
        &self.output
    }

    fn check_pins(&self, signals: &Signals) -> std::result::Result<(), PinError> {
        check_widths("not", signals, &self.input, self.bits)?;
        check_widths("not", signals, &self.output, self.bits)
    }

    fn update(&mut self, ctx: &mut UpdateCtx<'_>) -> Result<()> {
        let value = ctx.read(self.input[0])?;
        ctx.set(self.output[0], !value & mask(self.bits), false)?;
        Ok(())
    }
}
