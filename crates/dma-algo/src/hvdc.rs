//! HVDC line model selection.
//!
//! A line is observed once per converter end present in the main connected
//! component. The first observation creates its definition (merge-by-id);
//! the second one, from the other end, proves both extremities are inside
//! and flips the position accordingly. Re-observing a known end is a no-op.
//!
//! The model table combines converter technology, SVC delegation,
//! angle-droop active power control and regulation sharing, in that
//! decision order.

use dma_core::{
    BusId, ConverterId, ConverterKind, ConverterPayload, HvdcLine, HvdcLineId, NetworkSnapshot,
    Node, ReactiveCurvePoint, Regulation, RegulationTopology,
};
use dma_io::AssemblingDatabase;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

/// Concrete HVDC model variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HvdcModel {
    HvdcPTanPhi,
    HvdcPTanPhiDangling,
    HvdcPTanPhiDanglingDiagramPQ,
    HvdcPTanPhiDiagramPQ,
    HvdcPQProp,
    HvdcPQPropDangling,
    HvdcPQPropDanglingDiagramPQ,
    HvdcPQPropDiagramPQ,
    HvdcPQPropDiagramPQEmulationSet,
    HvdcPQPropEmulationSet,
    HvdcPV,
    HvdcPVDangling,
    HvdcPVDanglingDiagramPQ,
    HvdcPVDanglingDiagramPQRpcl2Side1,
    HvdcPVDanglingRpcl2Side1,
    HvdcPVDiagramPQ,
    HvdcPVDiagramPQEmulationSet,
    HvdcPVDiagramPQEmulationSetRpcl2Side1,
    HvdcPVDiagramPQRpcl2Side1,
    HvdcPVEmulationSet,
    HvdcPVEmulationSetRpcl2Side1,
    HvdcPVRpcl2Side1,
}

/// Which extremities sit inside the main connected component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HvdcPosition {
    FirstInMainComponent,
    SecondInMainComponent,
    BothInMainComponent,
}

/// Reactive data of one VSC end, forwarded to the parameter writers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VscSideDefinition {
    pub converter_id: ConverterId,
    pub qmax: f64,
    pub qmin: f64,
    pub q: f64,
    pub pmax: f64,
    pub points: Vec<ReactiveCurvePoint>,
}

/// Decision record for one HVDC line, merged across both ends by line id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HvdcDefinition {
    pub id: HvdcLineId,
    pub converter_kind: ConverterKind,
    pub converter1_id: ConverterId,
    pub converter1_bus: BusId,
    pub converter2_id: ConverterId,
    pub converter2_bus: BusId,
    pub position: HvdcPosition,
    pub model: HvdcModel,
    /// Power factors of the two ends; zero for VSC lines.
    pub power_factors: [f64; 2],
    pub pmax: f64,
    pub vsc1: Option<VscSideDefinition>,
    pub vsc2: Option<VscSideDefinition>,
    pub voltage_regulation1: Option<bool>,
    pub voltage_regulation2: Option<bool>,
    pub droop: Option<f64>,
    pub p0: Option<f64>,
}

/// HVDC decision pass over the main-component nodes.
pub struct HvdcSelection<'a> {
    topology: &'a RegulationTopology,
    use_infinite_reactive_limits: bool,
    lines_in_svc: HashSet<HvdcLineId>,
    definitions: BTreeMap<HvdcLineId, HvdcDefinition>,
    seen_converters: HashSet<ConverterId>,
}

impl<'a> HvdcSelection<'a> {
    pub fn new(
        topology: &'a RegulationTopology,
        use_infinite_reactive_limits: bool,
        db: &AssemblingDatabase,
    ) -> Self {
        Self {
            topology,
            use_infinite_reactive_limits,
            lines_in_svc: lines_in_coordinated_svc(db),
            definitions: BTreeMap::new(),
            seen_converters: HashSet::new(),
        }
    }

    /// Whether a line's voltage control is delegated to an SVC automaton.
    pub fn is_in_svc(&self, line_id: &str) -> bool {
        self.lines_in_svc.contains(line_id)
    }

    /// Observe every converter end landing on one node.
    pub fn process_node(&mut self, snapshot: &NetworkSnapshot, node: &Node) {
        for converter_id in &node.converter_ids {
            let Some(line) = snapshot.hvdc_line_of_converter(converter_id) else {
                // snapshot construction guarantees ownership; stale ids are skipped
                warn!(converter = %converter_id, "converter without owning HVDC line, skipping");
                continue;
            };
            // re-observing a known end must not flip the position
            if !self.seen_converters.insert(converter_id.clone()) {
                continue;
            }
            let position = if self.definitions.contains_key(&line.id) {
                // Meeting the same line from a second converter means both
                // extremities are in the component: the pass only visits the
                // main connected component.
                HvdcPosition::BothInMainComponent
            } else if *converter_id == line.converter1.id {
                HvdcPosition::FirstInMainComponent
            } else if *converter_id == line.converter2.id {
                HvdcPosition::SecondInMainComponent
            } else {
                warn!(line = %line.id, converter = %converter_id, "HVDC line badly initialized, skipping converter");
                continue;
            };
            let model = self.compute_model(line, position, line.converter_kind());

            let definition = self
                .definitions
                .entry(line.id.clone())
                .or_insert_with(|| new_definition(line));
            definition.position = position;
            definition.model = model;
        }
    }

    fn compute_model(
        &self,
        line: &HvdcLine,
        position: HvdcPosition,
        kind: ConverterKind,
    ) -> HvdcModel {
        let infinite = self.use_infinite_reactive_limits;
        let in_svc = self.is_in_svc(&line.id);
        if position == HvdcPosition::BothInMainComponent {
            match kind {
                ConverterKind::CurrentSource => {
                    if infinite {
                        HvdcModel::HvdcPTanPhi
                    } else {
                        HvdcModel::HvdcPTanPhiDiagramPQ
                    }
                }
                ConverterKind::VoltageSource => {
                    let droop_control = line.active_power_control.is_some();
                    if !droop_control {
                        if in_svc {
                            if infinite {
                                HvdcModel::HvdcPVRpcl2Side1
                            } else {
                                HvdcModel::HvdcPVDiagramPQRpcl2Side1
                            }
                        } else {
                            self.compute_model_vsc(
                                line,
                                position,
                                HvdcModel::HvdcPQProp,
                                HvdcModel::HvdcPQPropDiagramPQ,
                                HvdcModel::HvdcPV,
                                HvdcModel::HvdcPVDiagramPQ,
                            )
                        }
                    } else if in_svc {
                        if infinite {
                            HvdcModel::HvdcPVEmulationSetRpcl2Side1
                        } else {
                            HvdcModel::HvdcPVDiagramPQEmulationSetRpcl2Side1
                        }
                    } else {
                        self.compute_model_vsc(
                            line,
                            position,
                            HvdcModel::HvdcPQPropEmulationSet,
                            HvdcModel::HvdcPQPropDiagramPQEmulationSet,
                            HvdcModel::HvdcPVEmulationSet,
                            HvdcModel::HvdcPVDiagramPQEmulationSet,
                        )
                    }
                }
            }
        } else {
            // only one extremity inside the main connected component
            match kind {
                ConverterKind::CurrentSource => {
                    if infinite {
                        HvdcModel::HvdcPTanPhiDangling
                    } else {
                        HvdcModel::HvdcPTanPhiDanglingDiagramPQ
                    }
                }
                ConverterKind::VoltageSource => {
                    if in_svc {
                        if infinite {
                            HvdcModel::HvdcPVDanglingRpcl2Side1
                        } else {
                            HvdcModel::HvdcPVDanglingDiagramPQRpcl2Side1
                        }
                    } else {
                        self.compute_model_vsc(
                            line,
                            position,
                            HvdcModel::HvdcPQPropDangling,
                            HvdcModel::HvdcPQPropDanglingDiagramPQ,
                            HvdcModel::HvdcPVDangling,
                            HvdcModel::HvdcPVDanglingDiagramPQ,
                        )
                    }
                }
            }
        }
    }

    /// Pick between proportional and direct voltage-control VSC variants
    /// from the regulation sharing at the in-component converter buses.
    fn compute_model_vsc(
        &self,
        line: &HvdcLine,
        position: HvdcPosition,
        multiple_infinite: HvdcModel,
        multiple_finite: HvdcModel,
        one_infinite: HvdcModel,
        one_finite: HvdcModel,
    ) -> HvdcModel {
        let regulation = match position {
            HvdcPosition::FirstInMainComponent => {
                self.topology.regulation(&line.converter1.bus_id)
            }
            HvdcPosition::SecondInMainComponent => {
                self.topology.regulation(&line.converter2.bus_id)
            }
            HvdcPosition::BothInMainComponent => {
                if self.topology.get(&line.converter1.bus_id) == Some(Regulation::Multiple)
                    || self.topology.get(&line.converter2.bus_id) == Some(Regulation::Multiple)
                {
                    Regulation::Multiple
                } else {
                    Regulation::One
                }
            }
        };

        let infinite = self.use_infinite_reactive_limits;
        if regulation == Regulation::Multiple {
            if infinite {
                multiple_infinite
            } else {
                multiple_finite
            }
        } else if infinite {
            one_infinite
        } else {
            one_finite
        }
    }

    /// Definitions keyed by line id, in id order.
    pub fn definitions(&self) -> &BTreeMap<HvdcLineId, HvdcDefinition> {
        &self.definitions
    }

    pub fn finish(self) -> BTreeMap<HvdcLineId, HvdcDefinition> {
        self.definitions
    }
}

/// Line ids whose voltage control is delegated to a coordinated-SVC
/// automaton: every line target reachable from an SVC automaton's
/// macro-connect requests through a single association.
fn lines_in_coordinated_svc(db: &AssemblingDatabase) -> HashSet<HvdcLineId> {
    let mut lines = HashSet::new();
    for automaton in db.dynamic_automatons().values() {
        if !automaton.is_svc() {
            continue;
        }
        for request in &automaton.macro_connects {
            if let Ok(assoc) = db.get_single_association(&request.association_id) {
                if let Some(line) = &assoc.line {
                    lines.insert(line.name.clone());
                }
            }
        }
    }
    lines
}

fn new_definition(line: &HvdcLine) -> HvdcDefinition {
    let mut power_factors = [0.0, 0.0];
    let mut vsc1 = None;
    let mut vsc2 = None;
    let mut voltage_regulation1 = None;
    let mut voltage_regulation2 = None;
    match (&line.converter1.payload, &line.converter2.payload) {
        (
            ConverterPayload::CurrentSource { power_factor: pf1 },
            ConverterPayload::CurrentSource { power_factor: pf2 },
        ) => {
            power_factors = [*pf1, *pf2];
        }
        _ => {
            for (converter, vsc, regulation) in [
                (&line.converter1, &mut vsc1, &mut voltage_regulation1),
                (&line.converter2, &mut vsc2, &mut voltage_regulation2),
            ] {
                if let ConverterPayload::VoltageSource {
                    qmin,
                    qmax,
                    q,
                    points,
                    voltage_regulation_on,
                } = &converter.payload
                {
                    *vsc = Some(VscSideDefinition {
                        converter_id: converter.id.clone(),
                        qmax: *qmax,
                        qmin: *qmin,
                        q: *q,
                        pmax: line.pmax,
                        points: points.clone(),
                    });
                    *regulation = Some(*voltage_regulation_on);
                }
            }
        }
    }

    HvdcDefinition {
        id: line.id.clone(),
        converter_kind: line.converter_kind(),
        converter1_id: line.converter1.id.clone(),
        converter1_bus: line.converter1.bus_id.clone(),
        converter2_id: line.converter2.id.clone(),
        converter2_bus: line.converter2.bus_id.clone(),
        position: HvdcPosition::BothInMainComponent,
        model: HvdcModel::HvdcPTanPhi,
        power_factors,
        pmax: line.pmax,
        vsc1,
        vsc2,
        voltage_regulation1,
        voltage_regulation2,
        droop: line.active_power_control.map(|c| c.droop),
        p0: line.active_power_control.map(|c| c.p0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dma_core::{ActivePowerControl, Converter};

    fn lcc(id: &str, bus: &str) -> Converter {
        Converter {
            id: id.into(),
            bus_id: bus.into(),
            payload: ConverterPayload::CurrentSource { power_factor: 0.95 },
        }
    }

    fn vsc(id: &str, bus: &str) -> Converter {
        Converter {
            id: id.into(),
            bus_id: bus.into(),
            payload: ConverterPayload::VoltageSource {
                qmin: -30.0,
                qmax: 30.0,
                q: 0.0,
                points: vec![],
                voltage_regulation_on: true,
            },
        }
    }

    fn hvdc_line(id: &str, converter1: Converter, converter2: Converter) -> HvdcLine {
        HvdcLine {
            id: id.into(),
            converter1,
            converter2,
            pmax: 200.0,
            active_power_control: None,
        }
    }

    fn snapshot_with(line: HvdcLine) -> NetworkSnapshot {
        let mut node1 = Node::new(line.converter1.bus_id.clone(), "VL1");
        node1.converter_ids.push(line.converter1.id.clone());
        let mut node2 = Node::new(line.converter2.bus_id.clone(), "VL2");
        node2.converter_ids.push(line.converter2.id.clone());
        NetworkSnapshot::build(vec![node1, node2], vec![], vec![], vec![line]).unwrap()
    }

    #[test]
    fn test_lcc_both_in_main_component() {
        let snapshot = snapshot_with(hvdc_line("HVDC1", lcc("C1", "B1"), lcc("C2", "B2")));
        let topology = RegulationTopology::from_snapshot(&snapshot);
        let db = AssemblingDatabase::empty();

        for infinite in [true, false] {
            let mut sel = HvdcSelection::new(&topology, infinite, &db);
            sel.process_node(&snapshot, snapshot.node("B1").unwrap());
            sel.process_node(&snapshot, snapshot.node("B2").unwrap());
            let def = &sel.definitions()["HVDC1"];
            assert_eq!(def.position, HvdcPosition::BothInMainComponent);
            let expected = if infinite {
                HvdcModel::HvdcPTanPhi
            } else {
                HvdcModel::HvdcPTanPhiDiagramPQ
            };
            assert_eq!(def.model, expected);
        }
    }

    #[test]
    fn test_lcc_dangling_variant() {
        let snapshot = snapshot_with(hvdc_line("HVDC1", lcc("C1", "B1"), lcc("C2", "B2")));
        let topology = RegulationTopology::from_snapshot(&snapshot);
        let db = AssemblingDatabase::empty();
        let mut sel = HvdcSelection::new(&topology, true, &db);
        // only converter 2's node is inside the main component
        sel.process_node(&snapshot, snapshot.node("B2").unwrap());
        let def = &sel.definitions()["HVDC1"];
        assert_eq!(def.position, HvdcPosition::SecondInMainComponent);
        assert_eq!(def.model, HvdcModel::HvdcPTanPhiDangling);
    }

    #[test]
    fn test_vsc_sole_regulators_direct_voltage_control() {
        let snapshot = snapshot_with(hvdc_line("HVDC1", vsc("C1", "B1"), vsc("C2", "B2")));
        let topology = RegulationTopology::from_snapshot(&snapshot);
        let db = AssemblingDatabase::empty();
        let mut sel = HvdcSelection::new(&topology, false, &db);
        sel.process_node(&snapshot, snapshot.node("B1").unwrap());
        sel.process_node(&snapshot, snapshot.node("B2").unwrap());
        assert_eq!(sel.definitions()["HVDC1"].model, HvdcModel::HvdcPVDiagramPQ);
    }

    #[test]
    fn test_vsc_shared_bus_selects_prop_family() {
        let line = hvdc_line("HVDC1", vsc("C1", "B1"), vsc("C2", "B2"));
        let mut node1 = Node::new("B1", "VL1");
        node1.converter_ids.push("C1".into());
        node1.generators.push(dma_core::Generator {
            id: "G1".into(),
            voltage_regulation_on: true,
            points: vec![],
            qmin: -5.0,
            qmax: 5.0,
            pmin: 0.0,
            pmax: 10.0,
            target_p: 5.0,
            connected_bus_id: "B1".into(),
            regulated_bus_id: "B1".into(),
        });
        let mut node2 = Node::new("B2", "VL2");
        node2.converter_ids.push("C2".into());
        let snapshot =
            NetworkSnapshot::build(vec![node1, node2], vec![], vec![], vec![line]).unwrap();
        let topology = RegulationTopology::from_snapshot(&snapshot);
        let db = AssemblingDatabase::empty();
        let mut sel = HvdcSelection::new(&topology, true, &db);
        sel.process_node(&snapshot, snapshot.node("B1").unwrap());
        sel.process_node(&snapshot, snapshot.node("B2").unwrap());
        assert_eq!(sel.definitions()["HVDC1"].model, HvdcModel::HvdcPQProp);
    }

    #[test]
    fn test_vsc_droop_control_emulation_variant() {
        let mut line = hvdc_line("HVDC1", vsc("C1", "B1"), vsc("C2", "B2"));
        line.active_power_control = Some(ActivePowerControl { droop: 1.0, p0: 0.0 });
        let snapshot = snapshot_with(line);
        let topology = RegulationTopology::from_snapshot(&snapshot);
        let db = AssemblingDatabase::empty();
        let mut sel = HvdcSelection::new(&topology, true, &db);
        sel.process_node(&snapshot, snapshot.node("B1").unwrap());
        sel.process_node(&snapshot, snapshot.node("B2").unwrap());
        let def = &sel.definitions()["HVDC1"];
        assert_eq!(def.model, HvdcModel::HvdcPVEmulationSet);
        assert_eq!(def.droop, Some(1.0));
    }

    #[test]
    fn test_svc_delegation_short_circuits() {
        let doc = format!(
            r#"<assembling>
  <singleAssociation id="HVDC_ASSOC"><line name="HVDC1"/></singleAssociation>
  <dynamicAutomaton id="SVC_ZONE" lib="{}">
    <macroConnect macroConnection="SVCToHVDC" id="HVDC_ASSOC"/>
  </dynamicAutomaton>
</assembling>"#,
            dma_io::SVC_MODEL_LIB
        );
        let db = AssemblingDatabase::from_str(&doc).unwrap();
        let snapshot = snapshot_with(hvdc_line("HVDC1", vsc("C1", "B1"), vsc("C2", "B2")));
        let topology = RegulationTopology::from_snapshot(&snapshot);
        let mut sel = HvdcSelection::new(&topology, false, &db);
        sel.process_node(&snapshot, snapshot.node("B1").unwrap());
        sel.process_node(&snapshot, snapshot.node("B2").unwrap());
        assert_eq!(
            sel.definitions()["HVDC1"].model,
            HvdcModel::HvdcPVDiagramPQRpcl2Side1
        );
    }

    #[test]
    fn test_merge_by_id_is_idempotent() {
        let snapshot = snapshot_with(hvdc_line("HVDC1", vsc("C1", "B1"), vsc("C2", "B2")));
        let topology = RegulationTopology::from_snapshot(&snapshot);
        let db = AssemblingDatabase::empty();
        let mut sel = HvdcSelection::new(&topology, true, &db);
        sel.process_node(&snapshot, snapshot.node("B1").unwrap());
        sel.process_node(&snapshot, snapshot.node("B2").unwrap());
        let first = sel.definitions()["HVDC1"].model;
        // replaying both nodes must not change the outcome or recreate the line
        sel.process_node(&snapshot, snapshot.node("B1").unwrap());
        sel.process_node(&snapshot, snapshot.node("B2").unwrap());
        assert_eq!(sel.definitions().len(), 1);
        assert_eq!(sel.definitions()["HVDC1"].model, first);
    }

    #[test]
    fn test_replaying_a_dangling_end_keeps_the_position() {
        let snapshot = snapshot_with(hvdc_line("HVDC1", lcc("C1", "B1"), lcc("C2", "B2")));
        let topology = RegulationTopology::from_snapshot(&snapshot);
        let db = AssemblingDatabase::empty();
        let mut sel = HvdcSelection::new(&topology, true, &db);
        sel.process_node(&snapshot, snapshot.node("B1").unwrap());
        sel.process_node(&snapshot, snapshot.node("B1").unwrap());
        let def = &sel.definitions()["HVDC1"];
        assert_eq!(def.position, HvdcPosition::FirstInMainComponent);
        assert_eq!(def.model, HvdcModel::HvdcPTanPhiDangling);
    }
}
