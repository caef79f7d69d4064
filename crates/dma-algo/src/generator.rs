//! Generator model selection.
//!
//! Three independent axes combine into the model variant:
//!
//! 1. exclusion - a machine that does not regulate voltage, or that reaches
//!    another generator purely through switches, stays in the static network
//!    model ([`GeneratorModel::Network`]);
//! 2. diagram - finite-limit variants require the global infinite-limits
//!    flag off *and* a valid capability diagram; an invalid or missing
//!    diagram falls back to the unconstrained family and never aborts;
//! 3. regulation - a shared regulated bus selects the proportional family,
//!    a sole regulator selects plain or remote depending on whether the
//!    regulated bus is the connection bus.

use dma_core::{
    BusId, Generator, GeneratorId, Node, ReactiveCurvePoint, Regulation, RegulationTopology,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Concrete generator model variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeneratorModel {
    SignalNInfinite,
    SignalNRectangular,
    DiagramPqSignalN,
    RemoteSignalNInfinite,
    RemoteSignalNRectangular,
    RemoteDiagramPqSignalN,
    PropSignalNInfinite,
    PropSignalNRectangular,
    PropDiagramPqSignalN,
    /// The device stays in the static network model.
    Network,
}

impl GeneratorModel {
    /// True when the variant carries a finite diagram.
    pub fn uses_diagram(self) -> bool {
        !matches!(
            self,
            GeneratorModel::SignalNInfinite
                | GeneratorModel::RemoteSignalNInfinite
                | GeneratorModel::PropSignalNInfinite
                | GeneratorModel::Network
        )
    }

    pub fn is_network(self) -> bool {
        self == GeneratorModel::Network
    }
}

/// Decision record for one generator; immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorDefinition {
    pub id: GeneratorId,
    pub model: GeneratorModel,
    /// Connection bus.
    pub bus_id: BusId,
    pub points: Vec<ReactiveCurvePoint>,
    pub qmin: f64,
    pub qmax: f64,
    pub pmin: f64,
    pub pmax: f64,
    pub target_p: f64,
    pub regulated_bus_id: BusId,
}

/// Seam for the switch-path query answered by the topology provider: is
/// another generator reachable from this one across closed switches only?
pub trait SwitchConnectivity: Sync {
    fn other_generator_connected_by_switches(&self, node: &Node, generator: &Generator) -> bool;
}

/// Default oracle for snapshots without switch-level detail.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSwitchPaths;

impl SwitchConnectivity for NoSwitchPaths {
    fn other_generator_connected_by_switches(&self, _node: &Node, _generator: &Generator) -> bool {
        false
    }
}

/// Shape of a validated finite diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiagramShape {
    /// Constant q-bounds across all points.
    Rectangular,
    Curve,
}

/// Why a diagram was rejected (logged, never fatal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagramIssue {
    TooFewPoints,
    InvertedBounds,
    TargetOutsideSpan,
    EmptyBoundsAtTarget,
}

impl std::fmt::Display for DiagramIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            DiagramIssue::TooFewPoints => "fewer than two diagram points",
            DiagramIssue::InvertedBounds => "qmin above qmax at a diagram point",
            DiagramIssue::TargetOutsideSpan => "target P outside the diagram active power span",
            DiagramIssue::EmptyBoundsAtTarget => "empty reactive interval at target P",
        };
        f.write_str(text)
    }
}

fn diagram_shape(generator: &Generator) -> Result<DiagramShape, DiagramIssue> {
    if generator.points.len() < 2 {
        return Err(DiagramIssue::TooFewPoints);
    }
    if generator.points.iter().any(|pt| pt.qmin > pt.qmax) {
        return Err(DiagramIssue::InvertedBounds);
    }

    // evaluation is independent of the declared point order
    let mut points = generator.points.clone();
    points.sort_by(|a, b| a.p.total_cmp(&b.p));

    let target = generator.target_p;
    if target < points[0].p || target > points[points.len() - 1].p {
        return Err(DiagramIssue::TargetOutsideSpan);
    }
    let (qmin_at_target, qmax_at_target) = interpolate_bounds(&points, target);
    if qmin_at_target > qmax_at_target {
        return Err(DiagramIssue::EmptyBoundsAtTarget);
    }

    let rectangular = points
        .iter()
        .all(|pt| pt.qmin == points[0].qmin && pt.qmax == points[0].qmax);
    if rectangular {
        Ok(DiagramShape::Rectangular)
    } else {
        Ok(DiagramShape::Curve)
    }
}

fn interpolate_bounds(points: &[ReactiveCurvePoint], p: f64) -> (f64, f64) {
    debug_assert!(points.len() >= 2);
    for window in points.windows(2) {
        let (a, b) = (window[0], window[1]);
        if p >= a.p && p <= b.p {
            if b.p == a.p {
                return (a.qmin.min(b.qmin), a.qmax.max(b.qmax));
            }
            let t = (p - a.p) / (b.p - a.p);
            return (
                a.qmin + t * (b.qmin - a.qmin),
                a.qmax + t * (b.qmax - a.qmax),
            );
        }
    }
    let last = points[points.len() - 1];
    (last.qmin, last.qmax)
}

/// Pure per-generator decision procedure plus the bookkeeping that records
/// one immutable [`GeneratorDefinition`] per device.
pub struct GeneratorSelection<'a> {
    topology: &'a RegulationTopology,
    use_infinite_reactive_limits: bool,
    switches: &'a dyn SwitchConnectivity,
    definitions: Vec<GeneratorDefinition>,
    index_by_id: HashMap<GeneratorId, usize>,
    buses_with_dynamic_model: HashMap<BusId, GeneratorId>,
}

impl<'a> GeneratorSelection<'a> {
    pub fn new(
        topology: &'a RegulationTopology,
        use_infinite_reactive_limits: bool,
        switches: &'a dyn SwitchConnectivity,
    ) -> Self {
        Self {
            topology,
            use_infinite_reactive_limits,
            switches,
            definitions: Vec::new(),
            index_by_id: HashMap::new(),
            buses_with_dynamic_model: HashMap::new(),
        }
    }

    /// Decide the model variant for one generator. Pure: no state is touched.
    pub fn decide(&self, node: &Node, generator: &Generator) -> GeneratorModel {
        if !generator.voltage_regulation_on
            || self
                .switches
                .other_generator_connected_by_switches(node, generator)
        {
            return GeneratorModel::Network;
        }

        let finite_shape = if self.use_infinite_reactive_limits {
            None
        } else {
            match diagram_shape(generator) {
                Ok(shape) => Some(shape),
                Err(issue) => {
                    warn!(generator = %generator.id, %issue, "invalid reactive diagram, using unconstrained model");
                    None
                }
            }
        };

        let shared = self.topology.regulation(&generator.regulated_bus_id) == Regulation::Multiple;
        match (shared, generator.regulates_remotely(), finite_shape) {
            (true, _, None) => GeneratorModel::PropSignalNInfinite,
            (true, _, Some(DiagramShape::Rectangular)) => GeneratorModel::PropSignalNRectangular,
            (true, _, Some(DiagramShape::Curve)) => GeneratorModel::PropDiagramPqSignalN,
            (false, true, None) => GeneratorModel::RemoteSignalNInfinite,
            (false, true, Some(DiagramShape::Rectangular)) => {
                GeneratorModel::RemoteSignalNRectangular
            }
            (false, true, Some(DiagramShape::Curve)) => GeneratorModel::RemoteDiagramPqSignalN,
            (false, false, None) => GeneratorModel::SignalNInfinite,
            (false, false, Some(DiagramShape::Rectangular)) => GeneratorModel::SignalNRectangular,
            (false, false, Some(DiagramShape::Curve)) => GeneratorModel::DiagramPqSignalN,
        }
    }

    /// Record a decision. Idempotent by generator id: re-encountering a
    /// device leaves the first record untouched.
    pub fn record(&mut self, node: &Node, generator: &Generator, model: GeneratorModel) {
        if self.index_by_id.contains_key(&generator.id) {
            return;
        }
        if !model.is_network()
            && self.topology.regulation(&generator.regulated_bus_id) == Regulation::Multiple
        {
            self.buses_with_dynamic_model
                .entry(generator.regulated_bus_id.clone())
                .or_insert_with(|| generator.id.clone());
        }
        self.index_by_id
            .insert(generator.id.clone(), self.definitions.len());
        self.definitions.push(GeneratorDefinition {
            id: generator.id.clone(),
            model,
            bus_id: node.id.clone(),
            points: generator.points.clone(),
            qmin: generator.qmin,
            qmax: generator.qmax,
            pmin: generator.pmin,
            pmax: generator.pmax,
            target_p: generator.target_p,
            regulated_bus_id: generator.regulated_bus_id.clone(),
        });
    }

    /// Decide and record in one step.
    pub fn process(&mut self, node: &Node, generator: &Generator) {
        let model = self.decide(node, generator);
        self.record(node, generator, model);
    }

    pub fn definition(&self, id: &str) -> Option<&GeneratorDefinition> {
        self.index_by_id.get(id).map(|&i| &self.definitions[i])
    }

    /// Consume the pass, yielding definitions in first-seen order and the
    /// shared-bus representative map.
    pub fn finish(self) -> (Vec<GeneratorDefinition>, HashMap<BusId, GeneratorId>) {
        (self.definitions, self.buses_with_dynamic_model)
    }
}
