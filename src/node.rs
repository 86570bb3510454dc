//! Circuit nodes
//!
//! A node reads input values, writes output values and is re-evaluated by the
//! model whenever one of its inputs changes. The built-in kinds form the
//! closed [`Element`] set; anything else plugs in through [`Element::Custom`].

use std::fmt;

use crate::bus::BusMerge;
use crate::clock::Clock;
use crate::error::{BurnError, NodeError, PinError, Result};
use crate::gates::{FanIn, Not};
use crate::sequential::{Break, Register};
use crate::value::{Signals, ValueId};

/// Handle of a node inside a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// What a node sees while it is being updated
pub struct UpdateCtx<'a> {
    node: NodeId,
    label: &'a str,
    signals: &'a mut Signals,
}

impl<'a> UpdateCtx<'a> {
    pub(crate) fn new(node: NodeId, label: &'a str, signals: &'a mut Signals) -> Self {
        Self { node, label, signals }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn get(&self, id: ValueId) -> (u64, bool) {
        self.signals.get(id)
    }

    /// Read a value that must be driven
    pub fn read(&self, id: ValueId) -> std::result::Result<u64, NodeError> {
        let (value, high_z) = self.signals.get(id);
        if high_z {
            return Err(self.node_error(vec![id], "reading a high-Z value"));
        }
        Ok(value)
    }

    pub fn bits(&self, id: ValueId) -> u8 {
        self.signals.bits(id)
    }

    /// Write one of this node's outputs. Returns whether the value changed.
    pub fn set(&mut self, id: ValueId, value: u64, high_z: bool) -> std::result::Result<bool, NodeError> {
        if !self.signals.contains(id) || self.signals.value(id).writer() != Some(self.node) {
            return Err(self.node_error(vec![id], "writing a net driven by another node"));
        }
        Ok(self.signals.set(id, value, high_z))
    }

    pub fn node_error(&self, nets: Vec<ValueId>, message: impl Into<String>) -> NodeError {
        NodeError {
            node: self.node,
            label: self.label.to_string(),
            nets,
            message: message.into(),
        }
    }

    pub fn burn_error(&self, nets: Vec<ValueId>, values: Vec<u64>) -> BurnError {
        BurnError {
            node: self.node,
            label: self.label.to_string(),
            nets,
            values,
        }
    }
}

/// Interface every node kind implements
pub trait Node {
    /// Short kind name used in logs and error messages
    fn kind(&self) -> &'static str;

    fn inputs(&self) -> &[ValueId];

    fn outputs(&self) -> &[ValueId];

    /// Validate pin widths once, when the node is added to a model
    fn check_pins(&self, _signals: &Signals) -> std::result::Result<(), PinError> {
        Ok(())
    }

    /// Recompute outputs from the current inputs
    fn update(&mut self, ctx: &mut UpdateCtx<'_>) -> Result<()>;
}

/// Check that every listed net has the expected width
pub(crate) fn check_widths(
    kind: &str,
    signals: &Signals,
    nets: &[ValueId],
    bits: u8,
) -> std::result::Result<(), PinError> {
    for &net in nets {
        if !signals.contains(net) {
            return Err(PinError::new(format!("{}: unknown net {}", kind, net), vec![net]));
        }
        let actual = signals.bits(net);
        if actual != bits {
            return Err(PinError::new(
                format!("{}: net {} is {} bits wide, expected {}", kind, net, actual, bits),
                vec![net],
            ));
        }
    }
    Ok(())
}

/// All node kinds a model can hold
pub enum Element {
    FanIn(FanIn),
    Not(Not),
    Bus(BusMerge),
    Clock(Clock),
    Register(Register),
    Break(Break),
    Custom(Box<dyn Node>),
}

impl Element {
    fn as_node(&self) -> &dyn Node {
        match self {
            Element::FanIn(n) => n,
            Element::Not(n) => n,
            Element::Bus(n) => n,
            Element::Clock(n) => n,
            Element::Register(n) => n,
            Element::Break(n) => n,
            Element::Custom(n) => n.as_ref(),
        }
    }

    fn as_node_mut(&mut self) -> &mut dyn Node {
        match self {
            Element::FanIn(n) => n,
            Element::Not(n) => n,
            Element::Bus(n) => n,
            Element::Clock(n) => n,
            Element::Register(n) => n,
            Element::Break(n) => n,
            Element::Custom(n) => n.as_mut(),
        }
    }
}

impl Node for Element {
    fn kind(&self) -> &'static str {
        self.as_node().kind()
    }

    fn inputs(&self) -> &[ValueId] {
        self.as_node().inputs()
    }

    fn outputs(&self) -> &[ValueId] {
        self.as_node().outputs()
    }

    fn check_pins(&self, signals: &Signals) -> std::result::Result<(), PinError> {
        self.as_node().check_pins(signals)
    }

    fn update(&mut self, ctx: &mut UpdateCtx<'_>) -> Result<()> {
        self.as_node_mut().update(ctx)
    }
}

impl From<FanIn> for Element {
    fn from(n: FanIn) -> Self {
        Element::FanIn(n)
    }
}

impl From<Not> for Element {
    fn from(n: Not) -> Self {
        Element::Not(n)
    }
}

impl From<BusMerge> for Element {
    fn from(n: BusMerge) -> Self {
        Element::Bus(n)
    }
}

impl From<Clock> for Element {
    fn from(n: Clock) -> Self {
        Element::Clock(n)
    }
}

impl From<Register> for Element {
    fn from(n: Register) -> Self {
        Element::Register(n)
    }
}

impl From<Break> for Element {
    fn from(n: Break) -> Self {
        Element::Break(n)
    }
}

impl From<Box<dyn Node>> for Element {
    fn from(n: Box<dyn Node>) -> Self {
        Element::Custom(n)
    }
}

/// Claim the node's outputs for `NodeId(0)` and run one update
#[cfg(test)]
pub(crate) fn run_node(node: &mut dyn Node, signals: &mut Signals) -> Result<()> {
    let id = NodeId(0);
    for &out in node.outputs() {
        if signals.value(out).writer().is_none() {
            signals.set_writer(out, id).unwrap();
        }
    }
    let mut ctx = UpdateCtx::new(id, "test", signals);
    node.update(&mut ctx)
}
