//! # dma-core: Dynamic-Model Assembly Core
//!
//! Shared data model for the dynamic-model assembly engine: the network
//! snapshot handed over by the topology provider, the regulation topology
//! index, the run configuration, and the unified error type.
//!
//! ## Design Philosophy
//!
//! The snapshot is a **flat, id-keyed registry**: every device carries the
//! string ids of the elements it references (its connection bus, its
//! regulated bus, its owning HVDC line) instead of pointers into a shared
//! graph. No reference is followed without an existence check, and every
//! lookup that can miss returns `Option` or a typed error.
//!
//! Converter technology is a tagged enum ([`ConverterPayload`]) matched once
//! at ingestion; there is no downcasting anywhere downstream.
//!
//! ## Modules
//!
//! - [`config`] - Global run configuration (JSON, serde)
//! - [`error`] - Unified [`AssemblyError`] / [`AssemblyResult`]
//! - [`graph`] - Bus connectivity and main-connected-component labeling
//! - [`topology`] - The regulation topology index
//!
//! ## Integration with dma-io / dma-algo
//!
//! The dma-io crate loads the assembling database that names associations
//! and automatons over these ids; dma-algo consumes both to decide model
//! variants and expand wiring templates.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod config;
pub mod error;
pub mod graph;
pub mod topology;

pub use config::{ActivePowerCompensation, AssemblyConfig};
pub use error::{AssemblyError, AssemblyResult};
pub use graph::main_connected_component;
pub use topology::{Regulation, RegulationTopology};

/// Declared-automaton identifier from the assembling configuration.
pub type AutomatonId = String;
/// Bus (electrical node) identifier, as provided by the topology source.
pub type BusId = String;
/// Generator identifier.
pub type GeneratorId = String;
/// HVDC converter identifier.
pub type ConverterId = String;
/// HVDC line identifier.
pub type HvdcLineId = String;
/// AC line identifier.
pub type LineId = String;
/// Shunt compensator identifier.
pub type ShuntId = String;
/// Transformer identifier.
pub type TransformerId = String;
/// Voltage level identifier (groups buses and shunts).
pub type VoltageLevelId = String;

/// One point of a reactive capability diagram: reactive power bounds at a
/// given active power level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReactiveCurvePoint {
    pub p: f64,
    pub qmin: f64,
    pub qmax: f64,
}

impl ReactiveCurvePoint {
    pub fn new(p: f64, qmin: f64, qmax: f64) -> Self {
        Self { p, qmin, qmax }
    }
}

/// A generator as seen by the assembly engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generator {
    pub id: GeneratorId,
    /// Whether the machine takes part in voltage regulation at all.
    pub voltage_regulation_on: bool,
    /// Reactive capability diagram; may be empty.
    pub points: Vec<ReactiveCurvePoint>,
    pub qmin: f64,
    pub qmax: f64,
    pub pmin: f64,
    pub pmax: f64,
    /// Target active power set-point.
    pub target_p: f64,
    /// Bus the generator is physically connected to.
    pub connected_bus_id: BusId,
    /// Bus whose voltage the generator regulates (equals the connection bus
    /// for local regulation).
    pub regulated_bus_id: BusId,
}

impl Generator {
    /// True when the generator regulates a bus other than its own.
    pub fn regulates_remotely(&self) -> bool {
        self.regulated_bus_id != self.connected_bus_id
    }
}

/// Converter technology discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConverterKind {
    /// Current-source converter (LCC).
    CurrentSource,
    /// Voltage-source converter (VSC).
    VoltageSource,
}

/// Technology-specific converter data, resolved once at ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConverterPayload {
    CurrentSource {
        power_factor: f64,
    },
    VoltageSource {
        qmin: f64,
        qmax: f64,
        q: f64,
        points: Vec<ReactiveCurvePoint>,
        voltage_regulation_on: bool,
    },
}

impl ConverterPayload {
    pub fn kind(&self) -> ConverterKind {
        match self {
            ConverterPayload::CurrentSource { .. } => ConverterKind::CurrentSource,
            ConverterPayload::VoltageSource { .. } => ConverterKind::VoltageSource,
        }
    }

    /// Voltage regulation flag for VSC converters; current-source converters
    /// never regulate voltage.
    pub fn voltage_regulation_on(&self) -> bool {
        match self {
            ConverterPayload::CurrentSource { .. } => false,
            ConverterPayload::VoltageSource {
                voltage_regulation_on,
                ..
            } => *voltage_regulation_on,
        }
    }
}

/// One end of an HVDC line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Converter {
    pub id: ConverterId,
    /// Bus this converter end connects to (also its regulated bus for VSC).
    pub bus_id: BusId,
    pub payload: ConverterPayload,
}

/// Angle-droop active power control settings of an HVDC line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActivePowerControl {
    pub droop: f64,
    pub p0: f64,
}

/// An HVDC line with its two converter ends.
///
/// Both ends carry the same technology; a mixed line is rejected when the
/// snapshot is assembled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HvdcLine {
    pub id: HvdcLineId,
    pub converter1: Converter,
    pub converter2: Converter,
    pub pmax: f64,
    /// Present when angle-droop active power control is enabled.
    pub active_power_control: Option<ActivePowerControl>,
}

impl HvdcLine {
    pub fn converter_kind(&self) -> ConverterKind {
        self.converter1.payload.kind()
    }

    /// Look up one of the two converter ends by id.
    pub fn converter(&self, id: &str) -> Option<&Converter> {
        if self.converter1.id == id {
            Some(&self.converter1)
        } else if self.converter2.id == id {
            Some(&self.converter2)
        } else {
            None
        }
    }
}

/// A static var compensator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticVarCompensator {
    pub id: String,
    /// Whether the device currently regulates voltage.
    pub regulation_on: bool,
    /// Whether the device carries a standby-activation automaton.
    pub has_standby_automaton: bool,
    pub bmin: f64,
    pub bmax: f64,
    pub connected_bus_id: BusId,
    pub regulated_bus_id: BusId,
}

impl StaticVarCompensator {
    /// True when the compensator regulates a bus other than its own.
    pub fn regulates_remotely(&self) -> bool {
        self.regulated_bus_id != self.connected_bus_id
    }
}

/// A shunt compensator (only its identity matters to the assembly engine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shunt {
    pub id: ShuntId,
}

impl Shunt {
    pub fn new(id: impl Into<ShuntId>) -> Self {
        Self { id: id.into() }
    }
}

/// An AC line between two buses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Line {
    pub id: LineId,
    pub bus1: BusId,
    pub bus2: BusId,
    /// Operational status flag.
    pub connected: bool,
}

/// A two-winding transformer between two buses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transformer {
    pub id: TransformerId,
    pub bus1: BusId,
    pub bus2: BusId,
    pub connected: bool,
}

/// A bus together with the devices attached to it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Node {
    pub id: BusId,
    pub voltage_level: VoltageLevelId,
    /// Shunts attached to this bus, in declared order.
    pub shunts: Vec<Shunt>,
    pub generators: Vec<Generator>,
    /// Ids of HVDC converter ends landing on this bus.
    pub converter_ids: Vec<ConverterId>,
    pub svarcs: Vec<StaticVarCompensator>,
}

impl Node {
    pub fn new(id: impl Into<BusId>, voltage_level: impl Into<VoltageLevelId>) -> Self {
        Self {
            id: id.into(),
            voltage_level: voltage_level.into(),
            ..Self::default()
        }
    }
}

/// The full topology snapshot consumed by one assembly pass.
///
/// Construction is the only place that validates cross-references; after
/// [`NetworkSnapshot::build`] succeeds, every converter id found on a node
/// resolves to an HVDC line and every line endpoint resolves to a node.
#[derive(Debug, Clone, Default)]
pub struct NetworkSnapshot {
    nodes: Vec<Node>,
    lines: Vec<Line>,
    transformers: Vec<Transformer>,
    hvdc_lines: Vec<HvdcLine>,
    node_index: HashMap<BusId, usize>,
    converter_to_hvdc: HashMap<ConverterId, usize>,
}

impl NetworkSnapshot {
    /// Assemble and cross-check a snapshot.
    ///
    /// Fails with [`AssemblyError::Snapshot`] on duplicate bus ids, HVDC
    /// lines mixing converter technologies, or converter ids referenced by a
    /// node without an owning line.
    pub fn build(
        nodes: Vec<Node>,
        lines: Vec<Line>,
        transformers: Vec<Transformer>,
        hvdc_lines: Vec<HvdcLine>,
    ) -> AssemblyResult<Self> {
        let mut node_index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if node_index.insert(node.id.clone(), i).is_some() {
                return Err(AssemblyError::Snapshot(format!(
                    "duplicate bus id '{}'",
                    node.id
                )));
            }
        }

        let mut converter_to_hvdc = HashMap::new();
        for (i, hvdc) in hvdc_lines.iter().enumerate() {
            if hvdc.converter1.payload.kind() != hvdc.converter2.payload.kind() {
                return Err(AssemblyError::Snapshot(format!(
                    "HVDC line '{}' mixes converter technologies",
                    hvdc.id
                )));
            }
            converter_to_hvdc.insert(hvdc.converter1.id.clone(), i);
            converter_to_hvdc.insert(hvdc.converter2.id.clone(), i);
        }

        for node in &nodes {
            for conv_id in &node.converter_ids {
                if !converter_to_hvdc.contains_key(conv_id) {
                    return Err(AssemblyError::Snapshot(format!(
                        "converter '{}' on bus '{}' has no owning HVDC line",
                        conv_id, node.id
                    )));
                }
            }
        }

        Ok(Self {
            nodes,
            lines,
            transformers,
            hvdc_lines,
            node_index,
            converter_to_hvdc,
        })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn transformers(&self) -> &[Transformer] {
        &self.transformers
    }

    pub fn hvdc_lines(&self) -> &[HvdcLine] {
        &self.hvdc_lines
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.node_index.get(id).map(|&i| &self.nodes[i])
    }

    /// The HVDC line owning the given converter end.
    pub fn hvdc_line_of_converter(&self, converter_id: &str) -> Option<&HvdcLine> {
        self.converter_to_hvdc
            .get(converter_id)
            .map(|&i| &self.hvdc_lines[i])
    }

    /// Shunts of a voltage level with their owning node, in bus declaration
    /// order then per-bus declared order. The ordering is what makes
    /// multiple-association expansion indices reproducible.
    pub fn shunts_of_voltage_level(&self, voltage_level: &str) -> Vec<(&Node, &Shunt)> {
        self.nodes
            .iter()
            .filter(|n| n.voltage_level == voltage_level)
            .flat_map(|n| n.shunts.iter().map(move |s| (n, s)))
            .collect()
    }

    /// All generators of the snapshot, in node order.
    pub fn generators(&self) -> impl Iterator<Item = (&Node, &Generator)> {
        self.nodes
            .iter()
            .flat_map(|n| n.generators.iter().map(move |g| (n, g)))
    }
}
