//! Model observers
//!
//! Front ends and data loggers register a [`ModelObserver`] to hear about
//! completed steps. Events are fired once per step, never per round.

use std::cell::RefCell;
use std::rc::Rc;

use crate::value::Signals;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelEvent {
    /// Initial stabilization finished
    Started,
    /// A full step reached a fixpoint
    Step,
    /// One pending node was processed interactively
    MicroStep,
    /// A fast run stopped at a break
    Break,
    /// An input was changed from outside
    ManualChange,
    /// The model was closed
    Closed,
}

pub trait ModelObserver {
    fn handle_event(&mut self, event: ModelEvent, signals: &Signals);
}

/// Shared observers stay readable by the code that registered them
impl<T: ModelObserver> ModelObserver for Rc<RefCell<T>> {
    fn handle_event(&mut self, event: ModelEvent, signals: &Signals) {
        self.borrow_mut().handle_event(event, signals);
    }
}

/// Collects every event it sees
#[derive(Debug, Default)]
pub struct EventLog {
    pub events: Vec<ModelEvent>,
}

impl ModelObserver for EventLog {
    fn handle_event(&mut self, event: ModelEvent, _signals: &Signals) {
        self.events.push(event);
    }
}
