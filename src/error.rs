//! Simulation errors
//!
//! Every failure carries the handles of the nodes and nets involved so a
//! front end can highlight them without the kernel knowing how.

use thiserror::Error;

use crate::model::ModelState;
use crate::node::NodeId;
use crate::value::ValueId;

/// Result type used throughout the kernel
pub type Result<T> = std::result::Result<T, Error>;

/// A node could not compute its outputs from its current inputs
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("node {node} `{label}`: {message}")]
pub struct NodeError {
    pub node: NodeId,
    pub label: String,
    pub nets: Vec<ValueId>,
    pub message: String,
}

/// Two or more active drivers on a bus disagree
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("bus conflict at node {node} `{label}`: drivers {nets:?} disagree ({values:?})")]
pub struct BurnError {
    pub node: NodeId,
    pub label: String,
    pub nets: Vec<ValueId>,
    pub values: Vec<u64>,
}

/// A full step did not reach a fixpoint within the round bound
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit did not settle after {rounds} rounds, still changing: {nodes:?}")]
pub struct OscillationError {
    pub rounds: usize,
    pub nodes: Vec<NodeId>,
}

/// Malformed wiring found while the graph is built
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct PinError {
    pub message: String,
    pub nets: Vec<ValueId>,
}

impl PinError {
    pub fn new(message: impl Into<String>, nets: Vec<ValueId>) -> Self {
        Self {
            message: message.into(),
            nets,
        }
    }
}

/// Kernel errors
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Burn(#[from] BurnError),

    #[error(transparent)]
    Oscillation(#[from] OscillationError),

    #[error(transparent)]
    Pin(#[from] PinError),

    #[error("no break within {cycles} clock cycles")]
    BreakTimeout { cycles: usize },

    #[error("cannot {operation} while model is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: ModelState,
    },

    #[error("model needs exactly one clock and at least one break to run fast")]
    NotRunnable,

    #[error("speed test needs exactly one clock, model has {clocks}")]
    ClockCount { clocks: usize },

    #[error("real-time clock {clock} needs a non-zero period")]
    InvalidPeriod { clock: usize },

    #[error("invalid model configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown signal: {0}")]
    UnknownSignal(String),

    #[error("failed to parse netlist JSON: {0}")]
    Netlist(#[from] serde_json::Error),

    #[error("invalid netlist: {0}")]
    InvalidNetlist(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Nodes to highlight for this error
    pub fn nodes(&self) -> Vec<NodeId> {
        match self {
            Error::Node(e) => vec![e.node],
            Error::Burn(e) => vec![e.node],
            Error::Oscillation(e) => e.nodes.clone(),
            _ => Vec::new(),
        }
    }

    /// Nets to highlight for this error
    pub fn nets(&self) -> Vec<ValueId> {
        match self {
            Error::Node(e) => e.nets.clone(),
            Error::Burn(e) => e.nets.clone(),
            Error::Pin(e) => e.nets.clone(),
            _ => Vec::new(),
        }
    }

    /// Errors after which the current run must not continue
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Node(_) | Error::Burn(_) | Error::Oscillation(_)
        )
    }
}
