//! Signal values
//!
//! All nets of a circuit live in one flat arena ([`Signals`]) and are
//! referenced by [`ValueId`]. Writing a value through [`Signals::set`] is the
//! only way changes propagate: every dependent node of a changed value is
//! queued for the model to pick up.

use std::collections::HashMap;
use std::fmt;

use crate::error::PinError;
use crate::node::NodeId;

/// Widest supported net
pub const MAX_BITS: u8 = 64;

/// Handle of a signal value inside [`Signals`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueId(pub(crate) usize);

impl ValueId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Bit mask for a width
#[inline(always)]
pub fn mask(bits: u8) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Callback fired when a watched value changes: (value, high_z)
pub type ValueListener = Box<dyn FnMut(ValueId, u64, bool)>;

/// A fixed-width, possibly tri-state net
#[derive(Debug, Clone)]
pub struct SignalValue {
    bits: u8,
    value: u64,
    high_z: bool,
    observers: Vec<NodeId>,
    writer: Option<NodeId>,
}

impl SignalValue {
    fn new(bits: u8) -> Self {
        Self {
            bits,
            value: 0,
            high_z: false,
            observers: Vec::new(),
            writer: None,
        }
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// Current value; a high-Z net reads as 0
    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn is_high_z(&self) -> bool {
        self.high_z
    }

    pub fn get(&self) -> (u64, bool) {
        (self.value, self.high_z)
    }

    /// Nodes re-evaluated when this value changes
    pub fn observers(&self) -> &[NodeId] {
        &self.observers
    }

    /// The node driving this value, `None` for external inputs
    pub fn writer(&self) -> Option<NodeId> {
        self.writer
    }
}

/// Arena of all signal values of one model
#[derive(Default)]
pub struct Signals {
    values: Vec<SignalValue>,
    names: Vec<(String, ValueId)>,
    name_to_idx: HashMap<String, ValueId>,
    listeners: Vec<(ValueId, ValueListener)>,
    dirtied: Vec<NodeId>,
}

impl Signals {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&mut self, bits: u8) -> Result<ValueId, PinError> {
        if bits == 0 || bits > MAX_BITS {
            return Err(PinError::new(
                format!("invalid bit width {} (must be 1..={})", bits, MAX_BITS),
                Vec::new(),
            ));
        }
        let id = ValueId(self.values.len());
        self.values.push(SignalValue::new(bits));
        Ok(id)
    }

    /// Register a named observation point
    pub(crate) fn name(&mut self, name: &str, id: ValueId) -> Result<(), PinError> {
        if self.name_to_idx.contains_key(name) {
            return Err(PinError::new(format!("duplicate signal name: {}", name), vec![id]));
        }
        self.name_to_idx.insert(name.to_string(), id);
        self.names.push((name.to_string(), id));
        Ok(())
    }

    pub(crate) fn add_observer(&mut self, id: ValueId, node: NodeId) {
        let observers = &mut self.values[id.0].observers;
        if !observers.contains(&node) {
            observers.push(node);
        }
    }

    pub(crate) fn set_writer(&mut self, id: ValueId, node: NodeId) -> Result<(), PinError> {
        let value = &mut self.values[id.0];
        if let Some(existing) = value.writer {
            return Err(PinError::new(
                format!("net {} already driven by node {}, {} cannot drive it too", id, existing, node),
                vec![id],
            ));
        }
        value.writer = Some(node);
        Ok(())
    }

    /// Write a value. Returns whether the state changed; if it did, every
    /// dependent node is queued for re-evaluation.
    pub fn set(&mut self, id: ValueId, value: u64, high_z: bool) -> bool {
        let slot = &mut self.values[id.0];
        let value = if high_z { 0 } else { value & mask(slot.bits) };
        if slot.value == value && slot.high_z == high_z {
            return false;
        }
        slot.value = value;
        slot.high_z = high_z;
        self.dirtied.extend_from_slice(&slot.observers);

        for (watched, listener) in self.listeners.iter_mut() {
            if *watched == id {
                listener(id, value, high_z);
            }
        }
        true
    }

    pub fn get(&self, id: ValueId) -> (u64, bool) {
        self.values[id.0].get()
    }

    pub fn value(&self, id: ValueId) -> &SignalValue {
        &self.values[id.0]
    }

    pub fn bits(&self, id: ValueId) -> u8 {
        self.values[id.0].bits
    }

    pub fn contains(&self, id: ValueId) -> bool {
        id.0 < self.values.len()
    }

    /// Subscribe to changes of a single value
    pub fn listen(&mut self, id: ValueId, listener: ValueListener) {
        self.listeners.push((id, listener));
    }

    pub(crate) fn clear_listeners(&mut self) {
        self.listeners.clear();
    }

    pub(crate) fn take_dirtied(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.dirtied)
    }

    /// Look up a named signal
    pub fn by_name(&self, name: &str) -> Option<ValueId> {
        self.name_to_idx.get(name).copied()
    }

    /// Named signals in registration order
    pub fn named(&self) -> impl Iterator<Item = (&str, ValueId)> + '_ {
        self.names.iter().map(|(name, id)| (name.as_str(), *id))
    }

    pub fn name_of(&self, id: ValueId) -> Option<&str> {
        self.names
            .iter()
            .find(|(_, v)| *v == id)
            .map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
