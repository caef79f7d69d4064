//! Declared-automaton expansion and wiring.
//!
//! Each dynamic automaton's macro-connect requests are expanded against the
//! association database into concrete [`ConnectionInstance`] records. An
//! instance's index is a positional discriminator scoped to one template id
//! on one automaton, counted in first-seen order; downstream writers place
//! repeated wiring slots by that index, so re-running the expansion on
//! unchanged input must reproduce identical numbering.
//!
//! Wiring is a second pass once per-device decisions are known: automatons
//! doing coordinated voltage control connect directly to generators that
//! received their own dynamic model, drop generators that were declared but
//! stayed on the static network model, and fall back to a network
//! measurement for everything else.

use dma_core::error::ReferenceKind;
use dma_core::{
    AssemblyError, AssemblyResult, AutomatonId, BusId, GeneratorId, NetworkSnapshot,
};
use dma_io::{AssemblingDatabase, SingleAssociation};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::warn;

/// Network element family a connection instance points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementType {
    Bus,
    Line,
    Transformer,
    Shunt,
    Generator,
}

/// One expanded wiring request: a template applied to one network element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInstance {
    pub template_id: String,
    pub automaton_id: AutomatonId,
    pub element_type: ElementType,
    pub target_id: String,
    /// Position among instances of the same template on the same automaton.
    pub index: usize,
}

/// An automaton together with its expanded connections, in request order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicModelDefinition {
    pub id: AutomatonId,
    pub lib: String,
    pub connections: Vec<ConnectionInstance>,
}

/// Expansion result over all declared automatons.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolvedModels {
    /// Automatons that resolved at least one connection, by id.
    pub models: BTreeMap<AutomatonId, DynamicModelDefinition>,
    /// Templates referenced by at least one kept connection.
    pub used_macro_connections: BTreeSet<String>,
}

/// Expand every automaton of the database against the snapshot.
///
/// Element lookups are scoped to `main_component`: only devices on buses
/// of the main connected island can receive connections, matching the
/// per-device selection passes. A request naming an unknown template or
/// association is a fatal configuration error. A request whose resolved
/// element is absent (or outside the component) is logged and skipped; an
/// automaton with no surviving connection is dropped entirely.
pub fn resolve(
    db: &AssemblingDatabase,
    snapshot: &NetworkSnapshot,
    main_component: &HashSet<BusId>,
) -> AssemblyResult<ResolvedModels> {
    let mut resolved = ResolvedModels::default();

    for automaton in db.dynamic_automatons().values() {
        let mut connections = Vec::new();
        // template id -> next positional index on this automaton
        let mut counters: HashMap<&str, usize> = HashMap::new();

        for request in &automaton.macro_connects {
            let template = db.get_macro_connection(&request.macro_connection)?;
            let targets =
                expand_association(db, snapshot, main_component, &request.association_id)?;
            for (element_type, target_id) in targets {
                let index = counters.entry(template.id.as_str()).or_insert(0);
                connections.push(ConnectionInstance {
                    template_id: template.id.clone(),
                    automaton_id: automaton.id.clone(),
                    element_type,
                    target_id,
                    index: *index,
                });
                *index += 1;
            }
        }

        if connections.is_empty() {
            warn!(automaton = %automaton.id, "automaton resolved no connection, dropping it");
            continue;
        }
        for connection in &connections {
            resolved
                .used_macro_connections
                .insert(connection.template_id.clone());
        }
        resolved.models.insert(
            automaton.id.clone(),
            DynamicModelDefinition {
                id: automaton.id.clone(),
                lib: automaton.lib.clone(),
                connections,
            },
        );
    }

    Ok(resolved)
}

/// Resolve one association id into `(element type, element id)` pairs, in
/// declared order. Elements missing from the snapshot or outside the main
/// connected component are skipped with a warning and consume no index.
fn expand_association(
    db: &AssemblingDatabase,
    snapshot: &NetworkSnapshot,
    main_component: &HashSet<BusId>,
    association_id: &str,
) -> AssemblyResult<Vec<(ElementType, String)>> {
    if db.is_multiple_association(association_id) {
        let assoc = db.get_multiple_association(association_id)?;
        let shunts: Vec<_> = snapshot
            .shunts_of_voltage_level(&assoc.shunts.voltage_level)
            .into_iter()
            .filter(|(node, _)| main_component.contains(&node.id))
            .collect();
        if shunts.is_empty() {
            warn!(association = %association_id, voltage_level = %assoc.shunts.voltage_level,
                  "no shunt found for multiple association");
        }
        return Ok(shunts
            .into_iter()
            .map(|(_, s)| (ElementType::Shunt, s.id.clone()))
            .collect());
    }
    if db.is_single_association(association_id) {
        let assoc = db.get_single_association(association_id)?;
        return Ok(expand_single(snapshot, main_component, assoc));
    }
    Err(AssemblyError::unknown(
        ReferenceKind::Association,
        association_id,
    ))
}

fn expand_single(
    snapshot: &NetworkSnapshot,
    main_component: &HashSet<BusId>,
    assoc: &SingleAssociation,
) -> Vec<(ElementType, String)> {
    let in_component = |bus: &str| main_component.contains(bus);

    if let Some(bus) = &assoc.bus {
        let node = snapshot
            .nodes()
            .iter()
            .find(|n| n.voltage_level == bus.voltage_level && in_component(&n.id));
        return match node {
            Some(node) => vec![(ElementType::Bus, node.id.clone())],
            None => {
                warn!(association = %assoc.id, voltage_level = %bus.voltage_level,
                      "no bus found in voltage level, skipping connection");
                vec![]
            }
        };
    }
    if let Some(line) = &assoc.line {
        let found = snapshot
            .lines()
            .iter()
            .any(|l| l.id == line.name && (in_component(&l.bus1) || in_component(&l.bus2)));
        if found {
            return vec![(ElementType::Line, line.name.clone())];
        }
        warn!(association = %assoc.id, line = %line.name, "line not found, skipping connection");
        return vec![];
    }
    if let Some(tfo) = &assoc.tfo {
        let found = snapshot
            .transformers()
            .iter()
            .any(|t| t.id == tfo.name && (in_component(&t.bus1) || in_component(&t.bus2)));
        if found {
            return vec![(ElementType::Transformer, tfo.name.clone())];
        }
        warn!(association = %assoc.id, tfo = %tfo.name, "transformer not found, skipping connection");
        return vec![];
    }
    if let Some(shunt) = &assoc.shunt {
        let exists = snapshot
            .nodes()
            .iter()
            .filter(|n| in_component(&n.id))
            .any(|n| n.shunts.iter().any(|s| s.id == shunt.name));
        if exists {
            return vec![(ElementType::Shunt, shunt.name.clone())];
        }
        warn!(association = %assoc.id, shunt = %shunt.name, "shunt not found, skipping connection");
        return vec![];
    }
    // generator lists expand to one instance per machine found in the
    // main component
    let known: HashSet<&str> = snapshot
        .generators()
        .filter(|(node, _)| in_component(&node.id))
        .map(|(_, g)| g.id.as_str())
        .collect();
    let mut out = Vec::new();
    for generator in &assoc.generators {
        if known.contains(generator.name.as_str()) {
            out.push((ElementType::Generator, generator.name.clone()));
        } else {
            warn!(association = %assoc.id, generator = %generator.name,
                  "generator not found, skipping connection");
        }
    }
    out
}

/// Final wiring of one connection, after model decisions are known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WiringTarget {
    /// Connection to the static network model; measurement-only wiring
    /// carries no positional index.
    NetworkElement {
        element_id: String,
        index: Option<usize>,
    },
    /// Direct connection to a device's own dynamic model.
    Device { device_id: String, index: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WiredConnection {
    pub template_id: String,
    pub automaton_id: AutomatonId,
    pub target: WiringTarget,
}

/// Turn expanded connections into their final wiring.
///
/// Coordinated-voltage-control automatons wire generators that carry their
/// own dynamic model directly, renumbered from 1 in expansion order; a
/// generator declared in the automaton's associations but left on the
/// static network model is dropped; every other target becomes a network
/// measurement. All other automatons wire each connection to the network
/// element it resolved to, keeping its index.
pub fn wire(
    resolved: &ResolvedModels,
    db: &AssemblingDatabase,
    generators_with_dynamic_model: &HashSet<GeneratorId>,
) -> Vec<WiredConnection> {
    let mut wired = Vec::new();
    for model in resolved.models.values() {
        let automaton = db.dynamic_automatons().get(&model.id);
        let is_svc = automaton.map(|a| a.is_svc()).unwrap_or(false);
        if !is_svc {
            for connection in &model.connections {
                wired.push(WiredConnection {
                    template_id: connection.template_id.clone(),
                    automaton_id: connection.automaton_id.clone(),
                    target: WiringTarget::NetworkElement {
                        element_id: connection.target_id.clone(),
                        index: Some(connection.index),
                    },
                });
            }
            continue;
        }

        // generators declared for this automaton, with or without a model
        let mut declared: HashSet<&str> = HashSet::new();
        if let Some(automaton) = automaton {
            for request in &automaton.macro_connects {
                if let Ok(assoc) = db.get_single_association(&request.association_id) {
                    for generator in &assoc.generators {
                        declared.insert(generator.name.as_str());
                    }
                }
            }
        }

        let mut device_index = 1;
        for connection in &model.connections {
            if generators_with_dynamic_model.contains(&connection.target_id) {
                wired.push(WiredConnection {
                    template_id: connection.template_id.clone(),
                    automaton_id: connection.automaton_id.clone(),
                    target: WiringTarget::Device {
                        device_id: connection.target_id.clone(),
                        index: device_index,
                    },
                });
                device_index += 1;
            } else if !declared.contains(connection.target_id.as_str()) {
                // voltage measurement on the network model
                wired.push(WiredConnection {
                    template_id: connection.template_id.clone(),
                    automaton_id: connection.automaton_id.clone(),
                    target: WiringTarget::NetworkElement {
                        element_id: connection.target_id.clone(),
                        index: None,
                    },
                });
            }
        }
    }
    wired
}

#[cfg(test)]
mod tests {
    use super::*;
    use dma_core::{Generator, Line, Node, Shunt};

    fn generator(id: &str, bus: &str) -> Generator {
        Generator {
            id: id.into(),
            voltage_regulation_on: true,
            points: vec![],
            qmin: -10.0,
            qmax: 10.0,
            pmin: 0.0,
            pmax: 50.0,
            target_p: 25.0,
            connected_bus_id: bus.into(),
            regulated_bus_id: bus.into(),
        }
    }

    fn shunt_snapshot() -> NetworkSnapshot {
        let mut node1 = Node::new("B1", "VL1");
        node1.shunts = vec![Shunt::new("S1"), Shunt::new("S2")];
        let mut node2 = Node::new("B2", "VL1");
        node2.shunts = vec![Shunt::new("S3")];
        NetworkSnapshot::build(vec![node1, node2], vec![], vec![], vec![]).unwrap()
    }

    fn all_buses(snapshot: &NetworkSnapshot) -> HashSet<BusId> {
        snapshot.nodes().iter().map(|n| n.id.clone()).collect()
    }

    #[test]
    fn test_multiple_association_expands_in_declared_order() {
        let db = AssemblingDatabase::from_str(
            r#"<assembling>
  <macroConnection id="ShuntToAutomaton">
    <connection var1="automaton_side" var2="shunt_side"/>
  </macroConnection>
  <multipleAssociation id="SHUNTS_VL1"><shunt voltageLevel="VL1"/></multipleAssociation>
  <dynamicAutomaton id="AUT" lib="PhaseShifterI">
    <macroConnect macroConnection="ShuntToAutomaton" id="SHUNTS_VL1"/>
  </dynamicAutomaton>
</assembling>"#,
        )
        .unwrap();
        let snapshot = shunt_snapshot();
        let resolved = resolve(&db, &snapshot, &all_buses(&snapshot)).unwrap();
        let connections = &resolved.models["AUT"].connections;
        let got: Vec<_> = connections
            .iter()
            .map(|c| (c.target_id.as_str(), c.index))
            .collect();
        assert_eq!(got, vec![("S1", 0), ("S2", 1), ("S3", 2)]);
        assert!(resolved.used_macro_connections.contains("ShuntToAutomaton"));
    }

    #[test]
    fn test_expansion_skips_shunts_outside_the_main_component() {
        let db = AssemblingDatabase::from_str(
            r#"<assembling>
  <macroConnection id="ShuntToAutomaton">
    <connection var1="automaton_side" var2="shunt_side"/>
  </macroConnection>
  <multipleAssociation id="SHUNTS_VL1"><shunt voltageLevel="VL1"/></multipleAssociation>
  <dynamicAutomaton id="AUT" lib="PhaseShifterI">
    <macroConnect macroConnection="ShuntToAutomaton" id="SHUNTS_VL1"/>
  </dynamicAutomaton>
</assembling>"#,
        )
        .unwrap();
        let snapshot = shunt_snapshot();
        // B2 (owning S3) sits on a dead island
        let component: HashSet<BusId> = ["B1".to_string()].into();
        let resolved = resolve(&db, &snapshot, &component).unwrap();
        let got: Vec<_> = resolved.models["AUT"]
            .connections
            .iter()
            .map(|c| (c.target_id.as_str(), c.index))
            .collect();
        assert_eq!(got, vec![("S1", 0), ("S2", 1)]);
    }

    #[test]
    fn test_repeated_template_gets_increasing_indices() {
        let db = AssemblingDatabase::from_str(
            r#"<assembling>
  <macroConnection id="LineToAutomaton">
    <connection var1="automaton_side" var2="line_side"/>
  </macroConnection>
  <singleAssociation id="L1_ASSOC"><line name="L1"/></singleAssociation>
  <singleAssociation id="L2_ASSOC"><line name="L2"/></singleAssociation>
  <dynamicAutomaton id="AUT" lib="CurrentLimitAutomaton">
    <macroConnect macroConnection="LineToAutomaton" id="L1_ASSOC"/>
    <macroConnect macroConnection="LineToAutomaton" id="L2_ASSOC"/>
  </dynamicAutomaton>
</assembling>"#,
        )
        .unwrap();
        let snapshot = NetworkSnapshot::build(
            vec![Node::new("B1", "VL1"), Node::new("B2", "VL2")],
            vec![
                Line {
                    id: "L1".into(),
                    bus1: "B1".into(),
                    bus2: "B2".into(),
                    connected: true,
                },
                Line {
                    id: "L2".into(),
                    bus1: "B1".into(),
                    bus2: "B2".into(),
                    connected: true,
                },
            ],
            vec![],
            vec![],
        )
        .unwrap();
        let resolved = resolve(&db, &snapshot, &all_buses(&snapshot)).unwrap();
        let got: Vec<_> = resolved.models["AUT"]
            .connections
            .iter()
            .map(|c| (c.target_id.as_str(), c.index))
            .collect();
        assert_eq!(got, vec![("L1", 0), ("L2", 1)]);
    }

    #[test]
    fn test_unknown_association_is_fatal() {
        let db = AssemblingDatabase::from_str(
            r#"<assembling>
  <macroConnection id="LineToAutomaton">
    <connection var1="a" var2="b"/>
  </macroConnection>
  <dynamicAutomaton id="AUT" lib="CurrentLimitAutomaton">
    <macroConnect macroConnection="LineToAutomaton" id="MISSING"/>
  </dynamicAutomaton>
</assembling>"#,
        )
        .unwrap();
        let snapshot = NetworkSnapshot::build(vec![], vec![], vec![], vec![]).unwrap();
        let err = resolve(&db, &snapshot, &HashSet::new()).unwrap_err();
        assert!(matches!(
            err,
            AssemblyError::UnknownReference {
                kind: ReferenceKind::Association,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_template_is_fatal() {
        let db = AssemblingDatabase::from_str(
            r#"<assembling>
  <singleAssociation id="L1_ASSOC"><line name="L1"/></singleAssociation>
  <dynamicAutomaton id="AUT" lib="CurrentLimitAutomaton">
    <macroConnect macroConnection="MISSING" id="L1_ASSOC"/>
  </dynamicAutomaton>
</assembling>"#,
        )
        .unwrap();
        let snapshot = NetworkSnapshot::build(vec![], vec![], vec![], vec![]).unwrap();
        let err = resolve(&db, &snapshot, &HashSet::new()).unwrap_err();
        assert!(matches!(
            err,
            AssemblyError::UnknownReference {
                kind: ReferenceKind::MacroConnection,
                ..
            }
        ));
    }

    #[test]
    fn test_automaton_without_surviving_connection_is_dropped() {
        let db = AssemblingDatabase::from_str(
            r#"<assembling>
  <macroConnection id="BusToAutomaton">
    <connection var1="a" var2="b"/>
  </macroConnection>
  <singleAssociation id="BUS_ASSOC"><bus voltageLevel="VL_ABSENT"/></singleAssociation>
  <dynamicAutomaton id="AUT" lib="TapChangerBlocking">
    <macroConnect macroConnection="BusToAutomaton" id="BUS_ASSOC"/>
  </dynamicAutomaton>
</assembling>"#,
        )
        .unwrap();
        let snapshot =
            NetworkSnapshot::build(vec![Node::new("B1", "VL1")], vec![], vec![], vec![]).unwrap();
        let resolved = resolve(&db, &snapshot, &all_buses(&snapshot)).unwrap();
        assert!(resolved.models.is_empty());
        assert!(resolved.used_macro_connections.is_empty());
    }

    fn svc_fixture() -> (AssemblingDatabase, NetworkSnapshot) {
        let doc = format!(
            r#"<assembling>
  <macroConnection id="SVCToGenerator">
    <connection var1="svc_side" var2="generator_side"/>
  </macroConnection>
  <macroConnection id="SVCToUMeasurement">
    <connection var1="svc_side" var2="bus_side"/>
  </macroConnection>
  <singleAssociation id="ZONE_GENS">
    <generator name="G0"/>
    <generator name="G1"/>
    <generator name="G2"/>
    <generator name="G3"/>
  </singleAssociation>
  <singleAssociation id="ZONE_LINE"><line name="L1"/></singleAssociation>
  <dynamicAutomaton id="SVC_ZONE" lib="{}">
    <macroConnect macroConnection="SVCToGenerator" id="ZONE_GENS"/>
    <macroConnect macroConnection="SVCToUMeasurement" id="ZONE_LINE"/>
  </dynamicAutomaton>
</assembling>"#,
            dma_io::SVC_MODEL_LIB
        );
        let db = AssemblingDatabase::from_str(&doc).unwrap();
        let mut node1 = Node::new("B1", "VL1");
        for id in ["G0", "G1", "G2", "G3"] {
            node1.generators.push(generator(id, "B1"));
        }
        let node2 = Node::new("B2", "VL2");
        let snapshot = NetworkSnapshot::build(
            vec![node1, node2],
            vec![Line {
                id: "L1".into(),
                bus1: "B1".into(),
                bus2: "B2".into(),
                connected: true,
            }],
            vec![],
            vec![],
        )
        .unwrap();
        (db, snapshot)
    }

    #[test]
    fn test_svc_wiring_splits_devices_and_measurements() {
        let (db, snapshot) = svc_fixture();
        let resolved = resolve(&db, &snapshot, &all_buses(&snapshot)).unwrap();
        // only G0 and G3 received their own dynamic model
        let with_models: HashSet<GeneratorId> = ["G0", "G3"].map(String::from).into();
        let wired = wire(&resolved, &db, &with_models);

        let devices: Vec<_> = wired
            .iter()
            .filter_map(|w| match &w.target {
                WiringTarget::Device { device_id, index } => Some((device_id.as_str(), *index)),
                _ => None,
            })
            .collect();
        assert_eq!(devices, vec![("G0", 1), ("G3", 2)]);

        // G1 and G2 are declared but stayed on the network model: dropped
        assert!(!wired.iter().any(|w| matches!(
            &w.target,
            WiringTarget::NetworkElement { element_id, .. } if element_id == "G1" || element_id == "G2"
        )));

        // the line target falls back to an index-less measurement
        assert!(wired.iter().any(|w| w.target
            == WiringTarget::NetworkElement {
                element_id: "L1".into(),
                index: None,
            }));
    }

    #[test]
    fn test_non_svc_wiring_keeps_indices() {
        let db = AssemblingDatabase::from_str(
            r#"<assembling>
  <macroConnection id="ShuntToAutomaton">
    <connection var1="a" var2="b"/>
  </macroConnection>
  <multipleAssociation id="SHUNTS_VL1"><shunt voltageLevel="VL1"/></multipleAssociation>
  <dynamicAutomaton id="AUT" lib="PhaseShifterI">
    <macroConnect macroConnection="ShuntToAutomaton" id="SHUNTS_VL1"/>
  </dynamicAutomaton>
</assembling>"#,
        )
        .unwrap();
        let snapshot = shunt_snapshot();
        let resolved = resolve(&db, &snapshot, &all_buses(&snapshot)).unwrap();
        let wired = wire(&resolved, &db, &HashSet::new());
        let got: Vec<_> = wired
            .iter()
            .map(|w| match &w.target {
                WiringTarget::NetworkElement { element_id, index } => {
                    (element_id.as_str(), index.unwrap())
                }
                _ => panic!("unexpected device wiring"),
            })
            .collect();
        assert_eq!(got, vec![("S1", 0), ("S2", 1), ("S3", 2)]);
    }
}
