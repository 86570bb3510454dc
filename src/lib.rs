//! Event-driven digital logic simulation kernel
//!
//! Features:
//! - Flat value and node arenas addressed by handles (no shared pointers)
//! - FIFO dirty queue; only nodes whose inputs changed are re-evaluated
//! - Full steps settle to a fixpoint, bounded to catch oscillating loops
//! - Micro-steps process one pending node at a time
//! - Tri-state buses with conflict detection
//! - Clocks toggled by step, fast run-to-break or real-time timer threads
//! - JSON netlist elaboration and a C ABI for embedding

pub mod bus;
pub mod clock;
pub mod error;
pub mod ffi;
pub mod gates;
pub mod model;
pub mod netlist;
pub mod node;
pub mod observer;
pub mod realtime;
pub mod sequential;
pub mod speed;
pub mod trace;
pub mod value;

pub use bus::BusMerge;
pub use clock::{Clock, ClockId, Phase};
pub use error::{BurnError, Error, NodeError, OscillationError, PinError, Result};
pub use gates::{FanIn, FanInOp, Not, Reduction};
pub use model::{Model, ModelConfig, ModelState};
pub use netlist::NetlistDef;
pub use node::{Element, Node, NodeId, UpdateCtx};
pub use observer::{EventLog, ModelEvent, ModelObserver};
pub use sequential::{Break, Register};
pub use speed::SpeedReport;
pub use trace::SignalRecorder;
pub use value::{SignalValue, Signals, ValueId};
