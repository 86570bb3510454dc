//! JSON netlist elaboration
//!
//! A netlist names every net once and wires nodes to nets by name. Building
//! a model from it runs the same pin checks as building one in code.

use serde::Deserialize;
use tracing::{debug, info};

use crate::bus::BusMerge;
use crate::clock::Clock;
use crate::error::{PinError, Result};
use crate::gates::{FanIn, Not, Reduction};
use crate::model::{Model, ModelConfig};
use crate::node::Element;
use crate::sequential::{Break, Register};
use crate::value::ValueId;

/// Net declaration
#[derive(Debug, Clone, Deserialize)]
pub struct SignalDef {
    pub name: String,
    pub bits: u8,
    /// Initial state of an undriven net
    #[serde(default)]
    pub high_z: bool,
    #[serde(default)]
    pub value: u64,
}

/// Fan-in gate or bus
#[derive(Debug, Clone, Deserialize)]
pub struct GateDef {
    #[serde(default)]
    pub label: Option<String>,
    pub bits: u8,
    pub inputs: Vec<String>,
    pub output: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotDef {
    #[serde(default)]
    pub label: Option<String>,
    pub bits: u8,
    pub input: String,
    pub output: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClockDef {
    #[serde(default)]
    pub label: Option<String>,
    pub output: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterDef {
    #[serde(default)]
    pub label: Option<String>,
    pub bits: u8,
    pub d: String,
    pub clock: String,
    #[serde(default)]
    pub enable: Option<String>,
    pub q: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BreakDef {
    #[serde(default)]
    pub label: Option<String>,
    pub input: String,
}

/// Node types (JSON deserialization)
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeDef {
    And(GateDef),
    Or(GateDef),
    Nand(GateDef),
    Nor(GateDef),
    Xor(GateDef),
    Xnor(GateDef),
    Bus(GateDef),
    Not(NotDef),
    Clock(ClockDef),
    Register(RegisterDef),
    Break(BreakDef),
}

impl NodeDef {
    fn type_name(&self) -> &'static str {
        match self {
            NodeDef::And(_) => "and",
            NodeDef::Or(_) => "or",
            NodeDef::Nand(_) => "nand",
            NodeDef::Nor(_) => "nor",
            NodeDef::Xor(_) => "xor",
            NodeDef::Xnor(_) => "xnor",
            NodeDef::Bus(_) => "bus",
            NodeDef::Not(_) => "not",
            NodeDef::Clock(_) => "clock",
            NodeDef::Register(_) => "register",
            NodeDef::Break(_) => "break",
        }
    }

    fn label(&self) -> Option<&str> {
        let label = match self {
            NodeDef::And(g)
            | NodeDef::Or(g)
            | NodeDef::Nand(g)
            | NodeDef::Nor(g)
            | NodeDef::Xor(g)
            | NodeDef::Xnor(g)
            | NodeDef::Bus(g) => &g.label,
            NodeDef::Not(n) => &n.label,
            NodeDef::Clock(c) => &c.label,
            NodeDef::Register(r) => &r.label,
            NodeDef::Break(b) => &b.label,
        };
        label.as_deref()
    }
}

/// Complete netlist
#[derive(Debug, Clone, Deserialize)]
pub struct NetlistDef {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub config: ModelConfig,
    pub signals: Vec<SignalDef>,
    /// Nets driven from outside the model
    #[serde(default)]
    pub inputs: Vec<String>,
    pub nodes: Vec<NodeDef>,
}

fn default_name() -> String {
    "top".to_string()
}

impl NetlistDef {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Resolves net names for one node
struct Wiring<'a> {
    model: &'a Model,
    label: &'a str,
}

impl Wiring<'_> {
    fn net(&self, name: &str) -> std::result::Result<ValueId, PinError> {
        self.model.signal(name).ok_or_else(|| {
            PinError::new(
                format!("node `{}` refers to unknown signal `{}`", self.label, name),
                Vec::new(),
            )
        })
    }

    fn nets(&self, names: &[String]) -> std::result::Result<Vec<ValueId>, PinError> {
        names.iter().map(|n| self.net(n)).collect()
    }
}

fn gate(reduction: Reduction, def: &GateDef, wiring: &Wiring<'_>) -> Result<Element> {
    Ok(FanIn::new(reduction, def.bits, wiring.nets(&def.inputs)?, wiring.net(&def.output)?).into())
}

fn elaborate(def: &NodeDef, wiring: &Wiring<'_>) -> Result<Element> {
    match def {
        NodeDef::And(g) => gate(Reduction::AND, g, wiring),
        NodeDef::Or(g) => gate(Reduction::OR, g, wiring),
        NodeDef::Nand(g) => gate(Reduction::NAND, g, wiring),
        NodeDef::Nor(g) => gate(Reduction::NOR, g, wiring),
        NodeDef::Xor(g) => gate(Reduction::XOR, g, wiring),
        NodeDef::Xnor(g) => gate(Reduction::XNOR, g, wiring),
        NodeDef::Bus(g) => Ok(BusMerge::new(g.bits, wiring.nets(&g.inputs)?, wiring.net(&g.output)?).into()),
        NodeDef::Not(n) => Ok(Not::new(n.bits, wiring.net(&n.input)?, wiring.net(&n.output)?).into()),
        NodeDef::Clock(c) => Ok(Clock::new(wiring.net(&c.output)?).into()),
        NodeDef::Register(r) => {
            let enable = r.enable.as_deref().map(|en| wiring.net(en)).transpose()?;
            Ok(Register::new(
                r.bits,
                wiring.net(&r.d)?,
                wiring.net(&r.clock)?,
                enable,
                wiring.net(&r.q)?,
            )
            .into())
        }
        NodeDef::Break(b) => Ok(Break::new(wiring.net(&b.input)?).into()),
    }
}

/// Build an uninitialized model from a parsed netlist
pub fn build_model(netlist: &NetlistDef) -> Result<Model> {
    let mut model = Model::with_config(netlist.config.clone())?;

    for signal in &netlist.signals {
        model.add_named_value(&signal.name, signal.bits)?;
    }

    for (idx, node) in netlist.nodes.iter().enumerate() {
        let label = node
            .label()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}{}", node.type_name(), idx));
        let element = elaborate(
            node,
            &Wiring {
                model: &model,
                label: &label,
            },
        )?;
        model.add_node(&label, element)?;
    }

    for name in &netlist.inputs {
        let id = model.signal(name).ok_or_else(|| {
            PinError::new(format!("unknown input signal `{}`", name), Vec::new())
        })?;
        if let Some(writer) = model.signals().value(id).writer() {
            return Err(PinError::new(
                format!("input `{}` is also driven by node {}", name, writer),
                vec![id],
            )
            .into());
        }
    }

    // Initial state of undriven nets
    for signal in &netlist.signals {
        let Some(id) = model.signal(&signal.name) else {
            continue;
        };
        if model.signals().value(id).writer().is_none() {
            model.set_input(id, signal.value, signal.high_z)?;
        }
    }

    info!(
        netlist = %netlist.name,
        signals = netlist.signals.len(),
        nodes = netlist.nodes.len(),
        "netlist elaborated"
    );
    Ok(model)
}

impl Model {
    /// Parse and elaborate a JSON netlist
    pub fn from_json(json: &str) -> Result<Model> {
        let netlist = NetlistDef::from_json(json)?;
        debug!(netlist = %netlist.name, "parsed netlist");
        build_model(&netlist)
    }
}
