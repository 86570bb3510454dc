//! Simulation model
//!
//! Owns the node and value arenas of one circuit instance and runs the
//! event-driven stabilization:
//!
//! - Writing a value queues every dependent node (once, FIFO).
//! - A micro-step evaluates exactly the next queued node.
//! - A full step drains the queue round by round until it is empty or the
//!   round bound is hit, which is reported as an oscillation.
//! - Clock toggles are only applied while the queue is empty, each one
//!   followed by its own stabilization.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, error, info, trace, warn};

use crate::bus::BusMerge;
use crate::clock::{Clock, ClockId, Phase};
use crate::error::{Error, OscillationError, PinError, Result};
use crate::gates::{FanIn, Not, Reduction};
use crate::node::{Element, Node, NodeId, UpdateCtx};
use crate::observer::{ModelEvent, ModelObserver};
use crate::realtime::{ClockCommand, RealTimeClocks, QUEUE_DEPTH};
use crate::sequential::{Break, Register};
use crate::value::{Signals, ValueId};

/// Default bound on rounds per full step
pub const DEFAULT_MAX_ROUNDS: usize = 1000;

/// Default number of clock cycles a fast run may take
pub const DEFAULT_BREAK_CYCLE_BUDGET: usize = 1_000_000;

/// Model tuning
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Rounds a full step may take before it counts as oscillating
    pub max_rounds: usize,
    /// Clock cycles `run_to_break` may take before giving up
    pub break_cycle_budget: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            break_cycle_budget: DEFAULT_BREAK_CYCLE_BUDGET,
        }
    }
}

impl ModelConfig {
    /// Both bounds must allow at least one round / cycle
    pub fn validate(&self) -> Result<()> {
        if self.max_rounds == 0 {
            return Err(Error::InvalidConfig("max_rounds must be at least 1".to_string()));
        }
        if self.break_cycle_budget == 0 {
            return Err(Error::InvalidConfig("break_cycle_budget must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    /// Graph under construction
    Uninitialized,
    /// All nodes queued for the initial pass
    Ready,
    /// Nothing pending
    Stable,
    /// Micro-stepping with work still queued
    Stepping,
    /// A step raised an error; build a new model to continue
    Failed,
    Closed,
}

struct NodeSlot {
    element: Element,
    label: String,
    needs_update: bool,
}

pub struct Model {
    config: ModelConfig,
    signals: Signals,
    nodes: Vec<NodeSlot>,
    queue: VecDeque<NodeId>,
    clocks: Vec<NodeId>,
    breaks: Vec<NodeId>,
    pending_toggles: VecDeque<ClockId>,
    observers: Vec<Box<dyn ModelObserver>>,
    real_time: Option<RealTimeClocks>,
    state: ModelState,
    step_count: u64,
    last_rounds: usize,
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

impl Model {
    pub fn new() -> Self {
        Self::build(ModelConfig::default())
    }

    pub fn with_config(config: ModelConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: ModelConfig) -> Self {
        Self {
            config,
            signals: Signals::new(),
            nodes: Vec::new(),
            queue: VecDeque::new(),
            clocks: Vec::new(),
            breaks: Vec::new(),
            pending_toggles: VecDeque::new(),
            observers: Vec::new(),
            real_time: None,
            state: ModelState::Uninitialized,
            step_count: 0,
            last_rounds: 0,
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    // ========================================================================
    // Graph construction
    // ========================================================================

    fn ensure_building(&self, operation: &'static str) -> Result<()> {
        if self.state != ModelState::Uninitialized {
            return Err(Error::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    /// Add an anonymous net
    pub fn add_value(&mut self, bits: u8) -> Result<ValueId> {
        self.ensure_building("add a value")?;
        Ok(self.signals.add(bits)?)
    }

    /// Add a net that is also a named observation point
    pub fn add_named_value(&mut self, name: &str, bits: u8) -> Result<ValueId> {
        let id = self.add_value(bits)?;
        self.signals.name(name, id)?;
        Ok(id)
    }

    /// Name an existing net for observation
    pub fn add_signal(&mut self, name: &str, id: ValueId) -> Result<()> {
        self.ensure_building("name a signal")?;
        if !self.signals.contains(id) {
            return Err(PinError::new(format!("unknown net {}", id), vec![id]).into());
        }
        self.signals.name(name, id)?;
        Ok(())
    }

    /// Register a node; its pins are validated and wired to their nets
    pub fn add_node(&mut self, label: &str, element: impl Into<Element>) -> Result<NodeId> {
        self.ensure_building("add a node")?;
        let element = element.into();
        // Pins from another model would index past this arena
        for &net in element.inputs().iter().chain(element.outputs()) {
            if !self.signals.contains(net) {
                return Err(PinError::new(
                    format!("node `{}` refers to unknown net {}", label, net),
                    vec![net],
                )
                .into());
            }
        }
        element.check_pins(&self.signals)?;

        let id = NodeId(self.nodes.len());
        let outputs = element.outputs();
        for (i, &out) in outputs.iter().enumerate() {
            if outputs[..i].contains(&out) {
                return Err(PinError::new(format!("node `{}` drives net {} twice", label, out), vec![out]).into());
            }
        }
        // Validate all writers before touching any net
        for &out in outputs {
            if let Some(existing) = self.signals.value(out).writer() {
                return Err(PinError::new(
                    format!("net {} already driven by node {}, `{}` cannot drive it too", out, existing, label),
                    vec![out],
                )
                .into());
            }
        }
        for &out in outputs {
            self.signals.set_writer(out, id)?;
        }
        for &input in element.inputs() {
            self.signals.add_observer(input, id);
        }

        match &element {
            Element::Clock(_) => self.clocks.push(id),
            Element::Break(_) => self.breaks.push(id),
            _ => {}
        }
        trace!(node = %id, kind = element.kind(), label, "node added");
        self.nodes.push(NodeSlot {
            element,
            label: label.to_string(),
            needs_update: false,
        });
        Ok(id)
    }

    /// Add a fan-in gate and create its output net
    pub fn add_gate(&mut self, label: &str, reduction: Reduction, bits: u8, inputs: &[ValueId]) -> Result<ValueId> {
        let out = self.add_value(bits)?;
        self.add_node(label, FanIn::new(reduction, bits, inputs.to_vec(), out))?;
        Ok(out)
    }

    pub fn add_not(&mut self, label: &str, bits: u8, input: ValueId) -> Result<ValueId> {
        let out = self.add_value(bits)?;
        self.add_node(label, Not::new(bits, input, out))?;
        Ok(out)
    }

    pub fn add_bus(&mut self, label: &str, bits: u8, drivers: &[ValueId]) -> Result<ValueId> {
        let out = self.add_value(bits)?;
        self.add_node(label, BusMerge::new(bits, drivers.to_vec(), out))?;
        Ok(out)
    }

    /// Add a clock driving a new named 1-bit net
    pub fn add_clock(&mut self, name: &str) -> Result<(ClockId, ValueId)> {
        let out = self.add_named_value(name, 1)?;
        self.add_node(name, Clock::new(out))?;
        Ok((ClockId(self.clocks.len() - 1), out))
    }

    pub fn add_register(
        &mut self,
        label: &str,
        bits: u8,
        d: ValueId,
        clock: ValueId,
        enable: Option<ValueId>,
    ) -> Result<ValueId> {
        let q = self.add_value(bits)?;
        self.add_node(label, Register::new(bits, d, clock, enable, q))?;
        Ok(q)
    }

    pub fn add_break(&mut self, label: &str, input: ValueId) -> Result<NodeId> {
        self.add_node(label, Break::new(input))
    }

    pub fn add_observer(&mut self, observer: impl ModelObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn state(&self) -> ModelState {
        self.state
    }

    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    /// Subscribe to changes of a single net
    pub fn listen(&mut self, id: ValueId, listener: crate::value::ValueListener) {
        self.signals.listen(id, listener);
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_label(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(id.0).map(|slot| slot.label.as_str())
    }

    pub fn node_kind(&self, id: NodeId) -> Option<&'static str> {
        self.nodes.get(id.0).map(|slot| slot.element.kind())
    }

    /// Whether the node is queued for re-evaluation; `None` for unknown nodes
    pub fn has_changed(&self, id: NodeId) -> Option<bool> {
        self.nodes.get(id.0).map(|slot| slot.needs_update)
    }

    pub fn needs_update(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Nodes the next micro-steps will evaluate, in order
    pub fn nodes_to_update(&self) -> Vec<NodeId> {
        self.queue.iter().copied().collect()
    }

    pub fn clocks(&self) -> Vec<ClockId> {
        (0..self.clocks.len()).map(ClockId).collect()
    }

    pub fn clock_phase(&self, clock: ClockId) -> Option<Phase> {
        let node = *self.clocks.get(clock.0)?;
        match &self.nodes[node.0].element {
            Element::Clock(c) => Some(c.phase()),
            _ => None,
        }
    }

    /// Exactly one clock and at least one break
    pub fn is_fast_runnable(&self) -> bool {
        self.clocks.len() == 1 && !self.breaks.is_empty()
    }

    /// Completed full steps
    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    /// Rounds taken by the last stabilization
    pub fn last_rounds(&self) -> usize {
        self.last_rounds
    }

    /// Look up a named signal
    pub fn signal(&self, name: &str) -> Option<ValueId> {
        self.signals.by_name(name)
    }

    pub fn peek(&self, name: &str) -> Result<(u64, bool)> {
        let id = self
            .signals
            .by_name(name)
            .ok_or_else(|| Error::UnknownSignal(name.to_string()))?;
        Ok(self.signals.get(id))
    }

    // ========================================================================
    // External inputs
    // ========================================================================

    /// Drive an external input; dependents are queued for the next step
    pub fn set_input(&mut self, id: ValueId, value: u64, high_z: bool) -> Result<()> {
        if matches!(self.state, ModelState::Failed | ModelState::Closed) {
            return Err(Error::InvalidState {
                operation: "set an input",
                state: self.state,
            });
        }
        if !self.signals.contains(id) {
            return Err(PinError::new(format!("unknown net {}", id), vec![id]).into());
        }
        if let Some(writer) = self.signals.value(id).writer() {
            return Err(PinError::new(
                format!("net {} is driven by node {} and cannot be set from outside", id, writer),
                vec![id],
            )
            .into());
        }
        self.signals.set(id, value, high_z);
        self.schedule_dirtied();
        Ok(())
    }

    pub fn poke(&mut self, name: &str, value: u64, high_z: bool) -> Result<()> {
        let id = self
            .signals
            .by_name(name)
            .ok_or_else(|| Error::UnknownSignal(name.to_string()))?;
        self.set_input(id, value, high_z)
    }

    /// Tell observers an input was edited from outside
    pub fn notify_manual_change(&mut self) {
        self.fire(ModelEvent::ManualChange);
    }

    // ========================================================================
    // Stepping
    // ========================================================================

    fn ensure_steppable(&self, operation: &'static str) -> Result<()> {
        match self.state {
            ModelState::Ready | ModelState::Stable | ModelState::Stepping => Ok(()),
            state => Err(Error::InvalidState { operation, state }),
        }
    }

    /// Evaluate every node once, in registration order, and stabilize
    pub fn init(&mut self) -> Result<()> {
        self.ensure_building("initialize")?;
        // Inputs set during construction may have queued nodes already;
        // the first round runs in registration order regardless
        self.queue.clear();
        for slot in &mut self.nodes {
            slot.needs_update = false;
        }
        for i in 0..self.nodes.len() {
            self.enqueue(NodeId(i));
        }
        self.state = ModelState::Ready;
        info!(
            nodes = self.nodes.len(),
            nets = self.signals.len(),
            clocks = self.clocks.len(),
            "model initializing"
        );
        self.settle()?;
        self.state = ModelState::Stable;
        self.fire(ModelEvent::Started);
        Ok(())
    }

    /// Process exactly the next queued node
    pub fn do_micro_step(&mut self, interactive: bool) -> Result<()> {
        self.ensure_steppable("micro-step")?;
        if self.queue.is_empty() {
            self.apply_next_toggle();
        }
        if let Some(id) = self.queue.pop_front() {
            self.evaluate(id)?;
        }
        self.state = if self.queue.is_empty() {
            ModelState::Stable
        } else {
            ModelState::Stepping
        };
        if interactive {
            self.fire(ModelEvent::MicroStep);
        }
        Ok(())
    }

    /// Stabilize, applying any pending clock toggles between rounds
    pub fn do_step(&mut self) -> Result<()> {
        self.ensure_steppable("step")?;
        self.step_quiet()?;
        self.fire(ModelEvent::Step);
        Ok(())
    }

    fn step_quiet(&mut self) -> Result<()> {
        self.settle()?;
        while self.apply_next_toggle() {
            self.settle()?;
        }
        self.state = ModelState::Stable;
        self.step_count += 1;
        debug!(step = self.step_count, rounds = self.last_rounds, "step complete");
        Ok(())
    }

    /// Request a clock toggle; it is applied by the next step
    pub fn toggle_clock(&mut self, clock: ClockId) -> Result<()> {
        self.ensure_steppable("toggle a clock")?;
        if clock.0 >= self.clocks.len() {
            return Err(PinError::new(format!("unknown clock {}", clock.0), Vec::new()).into());
        }
        self.pending_toggles.push_back(clock);
        Ok(())
    }

    /// Toggle every clock once and stabilize each edge
    pub fn clock_step(&mut self) -> Result<()> {
        for clock in self.clocks() {
            self.toggle_clock(clock)?;
        }
        self.do_step()
    }

    /// Run full clock cycles until a break fires. Returns the number of
    /// cycles executed, counting the one in which the break fired.
    pub fn run_to_break(&mut self) -> Result<usize> {
        self.ensure_steppable("run to break")?;
        if !self.is_fast_runnable() {
            return Err(Error::NotRunnable);
        }
        self.step_quiet()?;
        self.clear_breaks();

        let clock = ClockId(0);
        let budget = self.config.break_cycle_budget;
        info!(budget, "running to break");
        for cycle in 1..=budget {
            for _ in 0..2 {
                self.pending_toggles.push_back(clock);
                self.step_quiet()?;
                if self.take_break() {
                    info!(cycles = cycle, "break reached");
                    self.fire(ModelEvent::Break);
                    return Ok(cycle);
                }
            }
        }
        warn!(budget, "no break within cycle budget");
        self.fire(ModelEvent::Step);
        Err(Error::BreakTimeout { cycles: budget })
    }

    fn clear_breaks(&mut self) {
        self.take_break();
    }

    fn take_break(&mut self) -> bool {
        let mut fired = false;
        for &id in &self.breaks {
            if let Element::Break(b) = &mut self.nodes[id.0].element {
                fired |= b.take_fired();
            }
        }
        fired
    }

    fn apply_next_toggle(&mut self) -> bool {
        let Some(clock) = self.pending_toggles.pop_front() else {
            return false;
        };
        let node = self.clocks[clock.0];
        if let Element::Clock(c) = &mut self.nodes[node.0].element {
            let phase = c.toggle();
            trace!(clock = clock.0, ?phase, "clock toggled");
        }
        self.enqueue(node);
        true
    }

    fn enqueue(&mut self, id: NodeId) {
        let slot = &mut self.nodes[id.0];
        if !slot.needs_update {
            slot.needs_update = true;
            self.queue.push_back(id);
        }
    }

    fn schedule_dirtied(&mut self) {
        for id in self.signals.take_dirtied() {
            self.enqueue(id);
        }
    }

    /// Drain the queue round by round until nothing is pending
    fn settle(&mut self) -> Result<()> {
        let mut rounds = 0;
        while !self.queue.is_empty() {
            if rounds >= self.config.max_rounds {
                let nodes = self.nodes_to_update();
                warn!(rounds, pending = nodes.len(), "circuit is oscillating");
                self.state = ModelState::Failed;
                return Err(OscillationError { rounds, nodes }.into());
            }
            rounds += 1;
            let round: Vec<NodeId> = self.queue.drain(..).collect();
            trace!(round = rounds, nodes = round.len(), "round");
            for id in round {
                self.evaluate(id)?;
            }
        }
        self.last_rounds = rounds;
        Ok(())
    }

    fn evaluate(&mut self, id: NodeId) -> Result<()> {
        let slot = &mut self.nodes[id.0];
        slot.needs_update = false;
        let mut ctx = UpdateCtx::new(id, &slot.label, &mut self.signals);
        let result = slot.element.update(&mut ctx);
        self.schedule_dirtied();

        if let Err(e) = result {
            match &e {
                Error::Burn(burn) => error!(node = %id, nets = ?burn.nets, "bus conflict"),
                _ => warn!(node = %id, error = %e, "node update failed"),
            }
            self.state = ModelState::Failed;
            return Err(e);
        }
        Ok(())
    }

    fn fire(&mut self, event: ModelEvent) {
        let signals = &self.signals;
        for observer in self.observers.iter_mut() {
            observer.handle_event(event, signals);
        }
    }

    // ========================================================================
    // Real-time clocks
    // ========================================================================

    /// Start toggling `clock` from a timer thread every `half_period`
    pub fn start_real_time_clock(&mut self, clock: ClockId, half_period: Duration) -> Result<()> {
        self.ensure_steppable("start a real-time clock")?;
        if clock.0 >= self.clocks.len() {
            return Err(PinError::new(format!("unknown clock {}", clock.0), Vec::new()).into());
        }
        self.real_time
            .get_or_insert_with(RealTimeClocks::new)
            .start(clock, half_period)?;
        Ok(())
    }

    /// Apply queued timer toggles, one full step each. Waits up to
    /// `timeout` for the first one and takes at most one queue's worth, so
    /// a fast timer cannot keep the call busy. Returns the number of
    /// toggles applied.
    pub fn process_real_time(&mut self, timeout: Duration) -> Result<usize> {
        self.ensure_steppable("process real-time clocks")?;
        let mut commands = Vec::with_capacity(QUEUE_DEPTH);
        if let Some(rt) = &self.real_time {
            if let Some(first) = rt.next_timeout(timeout) {
                commands.push(first);
                while commands.len() < QUEUE_DEPTH {
                    match rt.try_next() {
                        Some(cmd) => commands.push(cmd),
                        None => break,
                    }
                }
            }
        }
        for cmd in &commands {
            match *cmd {
                ClockCommand::Toggle(clock) => {
                    self.pending_toggles.push_back(clock);
                    self.do_step()?;
                }
            }
        }
        Ok(commands.len())
    }

    /// Stop timers and detach observers; safe to call repeatedly
    pub fn close(&mut self) {
        if self.state == ModelState::Closed {
            return;
        }
        if let Some(mut rt) = self.real_time.take() {
            rt.stop();
        }
        self.fire(ModelEvent::Closed);
        self.observers.clear();
        self.signals.clear_listeners();
        self.queue.clear();
        self.pending_toggles.clear();
        self.state = ModelState::Closed;
        info!(steps = self.step_count, "model closed");
    }
}

impl Drop for Model {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::EventLog;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Two 1-bit drivers merged onto one bus
    fn bus_model() -> (Model, ValueId, ValueId, ValueId) {
        let mut model = Model::new();
        let a = model.add_named_value("a", 1).unwrap();
        let b = model.add_named_value("b", 1).unwrap();
        let out = model.add_bus("bus", 1, &[a, b]).unwrap();
        model.add_signal("out", out).unwrap();
        (model, a, b, out)
    }

    #[test]
    fn test_bus_scenario() {
        let (mut model, a, b, out) = bus_model();
        model.set_input(a, 0, true).unwrap();
        model.init().unwrap();

        model.set_input(a, 0, false).unwrap();
        model.set_input(b, 1, true).unwrap();
        model.do_step().unwrap();
        assert_eq!(model.signals().get(out), (0, false));

        model.set_input(a, 0, true).unwrap();
        model.set_input(b, 1, false).unwrap();
        model.do_step().unwrap();
        assert_eq!(model.signals().get(out), (1, false));

        model.set_input(a, 0, false).unwrap();
        model.set_input(b, 0, false).unwrap();
        model.do_step().unwrap();
        assert_eq!(model.signals().get(out), (0, false));

        model.set_input(b, 1, false).unwrap();
        match model.do_step() {
            Err(Error::Burn(e)) => assert_eq!(e.nets, vec![a, b]),
            other => panic!("expected burn, got {:?}", other),
        }
        assert_eq!(model.state(), ModelState::Failed);
        assert!(matches!(model.do_step(), Err(Error::InvalidState { .. })));
    }

    #[test]
    fn test_floating_bus_after_init() {
        let (mut model, a, b, out) = bus_model();
        model.set_input(a, 0, true).unwrap();
        model.set_input(b, 0, true).unwrap();
        model.init().unwrap();
        assert!(model.signals().value(out).is_high_z());
        assert_eq!(model.peek("out").unwrap(), (0, true));
    }

    #[test]
    fn test_init_reports_invalid_circuit() {
        let (mut model, _, _, _) = bus_model();
        model.poke("b", 1, false).unwrap();
        assert!(matches!(model.init(), Err(Error::Burn(_))));
        assert_eq!(model.state(), ModelState::Failed);
    }

    #[test]
    fn test_acyclic_chain_converges_within_depth() {
        let mut model = Model::new();
        let input = model.add_named_value("in", 1).unwrap();
        let mut net = input;
        let depth = 10;
        for i in 0..depth {
            net = model.add_not(&format!("inv{}", i), 1, net).unwrap();
        }
        model.add_signal("out", net).unwrap();
        model.init().unwrap();
        assert_eq!(model.peek("out").unwrap(), (0, false));

        model.poke("in", 1, false).unwrap();
        model.do_step().unwrap();
        assert_eq!(model.peek("out").unwrap(), (1, false));
        assert!(model.last_rounds() <= depth);
        assert_eq!(model.state(), ModelState::Stable);
        assert!(!model.needs_update());
    }

    #[test]
    fn test_self_fed_inverter_oscillates() {
        let mut model = Model::with_config(ModelConfig {
            max_rounds: 50,
            ..ModelConfig::default()
        })
        .unwrap();
        let net = model.add_value(1).unwrap();
        let inv = model.add_node("loop", Not::new(1, net, net)).unwrap();
        match model.init() {
            Err(Error::Oscillation(e)) => {
                assert_eq!(e.rounds, 50);
                assert_eq!(e.nodes, vec![inv]);
            }
            other => panic!("expected oscillation, got {:?}", other),
        }
        assert_eq!(model.state(), ModelState::Failed);
    }

    #[test]
    fn test_gated_inverter_loop_oscillates_on_step() {
        let mut model = Model::new();
        let en = model.add_named_value("en", 1).unwrap();
        let fb = model.add_value(1).unwrap();
        let x = model.add_gate("and", Reduction::AND, 1, &[en, fb]).unwrap();
        model.add_node("inv", Not::new(1, x, fb)).unwrap();
        model.init().unwrap();

        model.poke("en", 1, false).unwrap();
        let err = model.do_step().unwrap_err();
        assert!(matches!(err, Error::Oscillation(_)));
        assert!(!err.nodes().is_empty());
    }

    #[test]
    fn test_micro_steps_follow_fifo_order() {
        let mut model = Model::new();
        let a = model.add_named_value("a", 1).unwrap();
        let n1 = model.add_not("n1", 1, a).unwrap();
        let n2 = model.add_not("n2", 1, n1).unwrap();
        model.add_signal("y", n2).unwrap();
        model.init().unwrap();
        assert_eq!(model.peek("y").unwrap(), (0, false));

        model.poke("a", 1, false).unwrap();
        assert!(model.needs_update());
        assert_eq!(model.nodes_to_update(), vec![NodeId(0)]);
        assert_eq!(model.has_changed(NodeId(0)), Some(true));

        model.do_micro_step(true).unwrap();
        assert_eq!(model.state(), ModelState::Stepping);
        assert_eq!(model.nodes_to_update(), vec![NodeId(1)]);
        assert_eq!(model.peek("y").unwrap(), (0, false));

        model.do_micro_step(true).unwrap();
        assert_eq!(model.peek("y").unwrap(), (1, false));
        assert!(!model.needs_update());
        assert_eq!(model.state(), ModelState::Stable);

        // Nothing pending: a micro-step is a no-op
        model.do_micro_step(false).unwrap();
        assert_eq!(model.peek("y").unwrap(), (1, false));
    }

    /// Register fed back through an inverter: toggles on each rising edge
    fn toggle_flop() -> (Model, ClockId, ValueId) {
        let mut model = Model::new();
        let (clk, clk_net) = model.add_clock("clk").unwrap();
        let d = model.add_value(1).unwrap();
        let q = model.add_register("ff", 1, d, clk_net, None).unwrap();
        model.add_node("inv", Not::new(1, q, d)).unwrap();
        model.add_signal("q", q).unwrap();
        (model, clk, q)
    }

    #[test]
    fn test_register_advances_once_per_toggle_step() {
        let (mut model, clk, q) = toggle_flop();
        model.init().unwrap();
        assert_eq!(model.signals().get(q), (0, false));

        let mut seen = Vec::new();
        for _ in 0..6 {
            model.toggle_clock(clk).unwrap();
            model.do_step().unwrap();
            seen.push((model.clock_phase(clk), model.signals().get(q).0));
        }
        assert_eq!(
            seen,
            vec![
                (Some(Phase::High), 1),
                (Some(Phase::Low), 1),
                (Some(Phase::High), 0),
                (Some(Phase::Low), 0),
                (Some(Phase::High), 1),
                (Some(Phase::Low), 1),
            ]
        );
    }

    #[test]
    fn test_full_cycle_in_one_step_advances_once() {
        let (mut model, clk, q) = toggle_flop();
        model.init().unwrap();
        for expected in [1, 0, 1] {
            model.toggle_clock(clk).unwrap();
            model.toggle_clock(clk).unwrap();
            model.do_step().unwrap();
            assert_eq!(model.signals().get(q), (expected, false));
            assert_eq!(model.clock_phase(clk), Some(Phase::Low));
        }
    }

    #[test]
    fn test_toggle_waits_for_step() {
        let (mut model, clk, q) = toggle_flop();
        model.init().unwrap();
        model.toggle_clock(clk).unwrap();
        assert_eq!(model.clock_phase(clk), Some(Phase::Low));
        assert_eq!(model.signals().get(q), (0, false));
        assert!(!model.needs_update());

        // A micro-step on an idle model applies the toggle first
        model.do_micro_step(false).unwrap();
        assert_eq!(model.clock_phase(clk), Some(Phase::High));
    }

    #[test]
    fn test_run_to_break() {
        let mut model = Model::new();
        let (_, clk_net) = model.add_clock("clk").unwrap();
        let d = model.add_value(2).unwrap();
        let q = model.add_register("count", 2, d, clk_net, None).unwrap();
        // 2-bit counter: d = q + 1 built from xor/and
        let lo = model.add_value(1).unwrap();
        let hi = model.add_value(1).unwrap();
        model.add_node("split", Split { input: [q], outputs: [lo, hi] }).unwrap();
        let d_lo = model.add_not("d_lo", 1, lo).unwrap();
        let d_hi = model.add_gate("d_hi", Reduction::XOR, 1, &[hi, lo]).unwrap();
        model.add_node("join", Join { inputs: [d_lo, d_hi], output: [d] }).unwrap();
        let done = model.add_gate("done", Reduction::AND, 1, &[lo, hi]).unwrap();
        model.add_break("halt", done).unwrap();
        model.add_signal("q", q).unwrap();

        assert!(model.is_fast_runnable());
        model.init().unwrap();
        let cycles = model.run_to_break().unwrap();
        assert_eq!(cycles, 3);
        assert_eq!(model.peek("q").unwrap(), (3, false));
    }

    #[test]
    fn test_run_to_break_budget() {
        let mut model = Model::with_config(ModelConfig {
            break_cycle_budget: 5,
            ..ModelConfig::default()
        })
        .unwrap();
        model.add_clock("clk").unwrap();
        let never = model.add_named_value("never", 1).unwrap();
        model.add_break("halt", never).unwrap();
        model.init().unwrap();
        assert!(matches!(model.run_to_break(), Err(Error::BreakTimeout { cycles: 5 })));
    }

    #[test]
    fn test_run_to_break_needs_clock_and_break() {
        let (mut model, _, _) = toggle_flop();
        model.init().unwrap();
        assert!(!model.is_fast_runnable());
        assert!(matches!(model.run_to_break(), Err(Error::NotRunnable)));
    }

    #[test]
    fn test_pin_errors_at_construction() {
        let mut model = Model::new();
        let a = model.add_value(2).unwrap();
        let b = model.add_value(1).unwrap();
        assert!(matches!(
            model.add_gate("bad", Reduction::OR, 2, &[a, b]),
            Err(Error::Pin(_))
        ));

        let y = model.add_value(1).unwrap();
        model.add_node("inv1", Not::new(1, b, y)).unwrap();
        let err = model.add_node("inv2", Not::new(1, b, y)).unwrap_err();
        assert_eq!(err.nets(), vec![y]);

        assert!(model.set_input(y, 1, false).is_err());
        assert!(matches!(model.poke("nope", 1, false), Err(Error::UnknownSignal(_))));
    }

    #[test]
    fn test_graph_frozen_after_init() {
        let mut model = Model::new();
        model.add_value(1).unwrap();
        model.init().unwrap();
        assert!(matches!(model.add_value(1), Err(Error::InvalidState { .. })));
        assert!(matches!(model.init(), Err(Error::InvalidState { .. })));
    }

    #[test]
    fn test_observers_get_one_event_per_step() {
        let (mut model, clk, _) = toggle_flop();
        let log = Rc::new(RefCell::new(EventLog::default()));
        model.add_observer(log.clone());

        model.init().unwrap();
        model.toggle_clock(clk).unwrap();
        model.do_step().unwrap();
        model.notify_manual_change();
        model.close();
        model.close();

        assert_eq!(
            log.borrow().events,
            vec![
                ModelEvent::Started,
                ModelEvent::Step,
                ModelEvent::ManualChange,
                ModelEvent::Closed,
            ]
        );
        assert_eq!(model.state(), ModelState::Closed);
        assert!(matches!(model.do_step(), Err(Error::InvalidState { .. })));
    }

    #[test]
    fn test_value_listener() {
        let mut model = Model::new();
        let a = model.add_named_value("a", 1).unwrap();
        let y = model.add_not("inv", 1, a).unwrap();
        let changes = Rc::new(RefCell::new(Vec::new()));
        let sink = changes.clone();
        model.listen(y, Box::new(move |_, v, _| sink.borrow_mut().push(v)));

        model.init().unwrap();
        model.poke("a", 1, false).unwrap();
        model.do_step().unwrap();
        assert_eq!(*changes.borrow(), vec![1, 0]);
    }

    #[test]
    fn test_real_time_clock_toggles() {
        let (mut model, clk, _) = toggle_flop();
        model.init().unwrap();
        model.start_real_time_clock(clk, Duration::from_millis(1)).unwrap();

        let mut applied = 0;
        for _ in 0..100 {
            applied += model.process_real_time(Duration::from_millis(100)).unwrap();
            if applied >= 2 {
                break;
            }
        }
        assert!(applied >= 2);
        assert_eq!(model.step_count() as usize, applied);
        model.close();
        assert_eq!(model.state(), ModelState::Closed);
    }

    #[test]
    fn test_fast_real_time_clock_is_bounded() {
        let (mut model, clk, _) = toggle_flop();
        model.init().unwrap();
        assert!(matches!(
            model.start_real_time_clock(clk, Duration::ZERO),
            Err(Error::InvalidPeriod { .. })
        ));

        model.start_real_time_clock(clk, Duration::from_nanos(1)).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        let started = std::time::Instant::now();
        let applied = model.process_real_time(Duration::from_millis(10)).unwrap();
        assert!(applied >= 1 && applied <= QUEUE_DEPTH);
        assert!(started.elapsed() < Duration::from_secs(5));
        model.close();
    }

    #[test]
    fn test_high_z_gate_input_fails_step() {
        let mut model = Model::new();
        let a = model.add_named_value("a", 1).unwrap();
        model.add_gate("and", Reduction::AND, 1, &[a]).unwrap();
        model.init().unwrap();

        model.poke("a", 0, true).unwrap();
        match model.do_step() {
            Err(Error::Node(e)) => {
                assert_eq!(e.nets, vec![a]);
                assert_eq!(e.label, "and");
            }
            other => panic!("expected node error, got {:?}", other),
        }
        assert_eq!(model.state(), ModelState::Failed);
        assert!(matches!(model.do_step(), Err(Error::InvalidState { .. })));
    }

    #[test]
    fn test_node_cannot_write_foreign_net() {
        let mut model = Model::new();
        let a = model.add_named_value("a", 1).unwrap();
        let y = model.add_not("inv", 1, a).unwrap();
        model.add_signal("y", y).unwrap();
        model.add_node("rogue", Rogue { input: [a], target: y }).unwrap();

        match model.init() {
            Err(Error::Node(e)) => assert_eq!(e.nets, vec![y]),
            other => panic!("expected node error, got {:?}", other),
        }
        assert_eq!(model.state(), ModelState::Failed);
        assert_eq!(model.peek("y").unwrap(), (1, false));
    }

    #[test]
    fn test_dangling_pin_is_pin_error() {
        let mut model = Model::new();
        let a = model.add_value(1).unwrap();
        let foreign = ValueId(5);
        match model.add_node("stray", Rogue { input: [foreign], target: a }) {
            Err(Error::Pin(e)) => assert_eq!(e.nets, vec![foreign]),
            other => panic!("expected pin error, got {:?}", other.err()),
        }
        assert_eq!(model.node_count(), 0);
        assert!(model.signals().value(a).observers().is_empty());
    }

    #[test]
    fn test_zero_bounds_rejected() {
        let rounds = Model::with_config(ModelConfig {
            max_rounds: 0,
            ..ModelConfig::default()
        });
        assert!(matches!(rounds, Err(Error::InvalidConfig(_))));

        let budget = Model::with_config(ModelConfig {
            break_cycle_budget: 0,
            ..ModelConfig::default()
        });
        assert!(matches!(budget, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_init_runs_in_registration_order() {
        let mut model = Model::new();
        let a = model.add_named_value("a", 1).unwrap();
        let b = model.add_named_value("b", 1).unwrap();
        let ya = model.add_gate("or_a", Reduction::OR, 1, &[a]).unwrap();
        let yb = model.add_gate("or_b", Reduction::OR, 1, &[b]).unwrap();

        let order = Rc::new(RefCell::new(Vec::new()));
        for id in [ya, yb] {
            let sink = order.clone();
            model.listen(id, Box::new(move |changed, _, _| sink.borrow_mut().push(changed)));
        }

        // Queues or_b before or_a
        model.poke("b", 1, false).unwrap();
        model.poke("a", 1, false).unwrap();
        model.init().unwrap();
        assert_eq!(*order.borrow(), vec![ya, yb]);
    }

    #[test]
    fn test_lookups_after_init() {
        let (mut model, _, q) = toggle_flop();
        model.init().unwrap();
        assert!(matches!(model.add_signal("late", q), Err(Error::InvalidState { .. })));
        assert_eq!(model.node_kind(NodeId(0)), Some("clock"));
        assert_eq!(model.node_label(NodeId(1)), Some("ff"));
        assert_eq!(model.node_label(NodeId(99)), None);
        assert_eq!(model.has_changed(NodeId(99)), None);
    }

    /// Custom node that writes a net it never declared
    struct Rogue {
        input: [ValueId; 1],
        target: ValueId,
    }

    impl Node for Rogue {
        fn kind(&self) -> &'static str {
            "rogue"
        }
        fn inputs(&self) -> &[ValueId] {
            &self.input
        }
        fn outputs(&self) -> &[ValueId] {
            &[]
        }
        fn update(&mut self, ctx: &mut UpdateCtx<'_>) -> Result<()> {
            ctx.set(self.target, 0, false)?;
            Ok(())
        }
    }

    impl From<Rogue> for Element {
        fn from(n: Rogue) -> Self {
            Element::Custom(Box::new(n))
        }
    }

    /// Custom node: 2-bit net to two 1-bit nets
    struct Split {
        input: [ValueId; 1],
        outputs: [ValueId; 2],
    }

    impl Node for Split {
        fn kind(&self) -> &'static str {
            "split"
        }
        fn inputs(&self) -> &[ValueId] {
            &self.input
        }
        fn outputs(&self) -> &[ValueId] {
            &self.outputs
        }
        fn update(&mut self, ctx: &mut UpdateCtx<'_>) -> Result<()> {
            let v = ctx.read(self.input[0])?;
            ctx.set(self.outputs[0], v & 1, false)?;
            ctx.set(self.outputs[1], (v >> 1) & 1, false)?;
            Ok(())
        }
    }

    /// Custom node: two 1-bit nets to a 2-bit net
    struct Join {
        inputs: [ValueId; 2],
        output: [ValueId; 1],
    }

    impl Node for Join {
        fn kind(&self) -> &'static str {
            "join"
        }
        fn inputs(&self) -> &[ValueId] {
            &self.inputs
        }
        fn outputs(&self) -> &[ValueId] {
            &self.output
        }
        fn update(&mut self, ctx: &mut UpdateCtx<'_>) -> Result<()> {
            let lo = ctx.read(self.inputs[0])?;
            let hi = ctx.read(self.inputs[1])?;
            ctx.set(self.output[0], lo | (hi << 1), false)?;
            Ok(())
        }
    }

    impl From<Split> for Element {
        fn from(n: Split) -> Self {
            Element::Custom(Box::new(n))
        }
    }

    impl From<Join> for Element {
        fn from(n: Join) -> Self {
            Element::Custom(Box::new(n))
        }
    }
}
