//! Static var compensator model selection.
//!
//! Three independent axes refine the base voltage-control model: whether
//! the regulated bus is shared with other regulators (proportional
//! variants), whether regulation is remote, and whether the device carries
//! a standby-activation automaton (mode-handling variants). A device with
//! regulation switched off stays on the static network model.

use dma_core::{Regulation, RegulationTopology, StaticVarCompensator};
use serde::{Deserialize, Serialize};

/// Concrete SVarC model variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SvarcModel {
    Network,
    SvarcPV,
    SvarcPVModeHandling,
    SvarcPVProp,
    SvarcPVPropModeHandling,
    SvarcPVPropRemote,
    SvarcPVPropRemoteModeHandling,
    SvarcPVRemote,
    SvarcPVRemoteModeHandling,
}

impl SvarcModel {
    /// Whether the device keeps its static network representation.
    pub fn is_network(self) -> bool {
        self == SvarcModel::Network
    }
}

/// Decision record for one compensator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SvarcDefinition {
    pub id: String,
    pub model: SvarcModel,
    pub bmin: f64,
    pub bmax: f64,
    pub connected_bus_id: String,
    pub regulated_bus_id: String,
}

/// Pick the model for one compensator given the regulation topology.
pub fn select(svarc: &StaticVarCompensator, topology: &RegulationTopology) -> SvarcModel {
    if !svarc.regulation_on {
        return SvarcModel::Network;
    }
    let shared = topology.regulation(&svarc.regulated_bus_id) == Regulation::Multiple;
    let remote = svarc.regulates_remotely();
    let mode_handling = svarc.has_standby_automaton;
    match (shared, remote, mode_handling) {
        (true, true, true) => SvarcModel::SvarcPVPropRemoteModeHandling,
        (true, true, false) => SvarcModel::SvarcPVPropRemote,
        (true, false, true) => SvarcModel::SvarcPVPropModeHandling,
        (true, false, false) => SvarcModel::SvarcPVProp,
        (false, true, true) => SvarcModel::SvarcPVRemoteModeHandling,
        (false, true, false) => SvarcModel::SvarcPVRemote,
        (false, false, true) => SvarcModel::SvarcPVModeHandling,
        (false, false, false) => SvarcModel::SvarcPV,
    }
}

/// Decide and record one compensator.
pub fn define(svarc: &StaticVarCompensator, topology: &RegulationTopology) -> SvarcDefinition {
    SvarcDefinition {
        id: svarc.id.clone(),
        model: select(svarc, topology),
        bmin: svarc.bmin,
        bmax: svarc.bmax,
        connected_bus_id: svarc.connected_bus_id.clone(),
        regulated_bus_id: svarc.regulated_bus_id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dma_core::{NetworkSnapshot, Node};

    fn svarc(id: &str, connected: &str, regulated: &str) -> StaticVarCompensator {
        StaticVarCompensator {
            id: id.into(),
            regulation_on: true,
            has_standby_automaton: false,
            bmin: -0.5,
            bmax: 0.5,
            connected_bus_id: connected.into(),
            regulated_bus_id: regulated.into(),
        }
    }

    fn topology_of(nodes: Vec<Node>) -> RegulationTopology {
        let snapshot = NetworkSnapshot::build(nodes, vec![], vec![], vec![]).unwrap();
        RegulationTopology::from_snapshot(&snapshot)
    }

    #[test]
    fn test_regulation_off_stays_on_network_model() {
        let mut device = svarc("SVARC1", "B1", "B1");
        device.regulation_on = false;
        let topology = topology_of(vec![Node::new("B1", "VL1")]);
        assert_eq!(select(&device, &topology), SvarcModel::Network);
    }

    #[test]
    fn test_sole_local_regulator_gets_base_model() {
        let device = svarc("SVARC1", "B1", "B1");
        let mut node = Node::new("B1", "VL1");
        node.svarcs.push(device.clone());
        let topology = topology_of(vec![node]);
        assert_eq!(select(&device, &topology), SvarcModel::SvarcPV);
    }

    #[test]
    fn test_remote_and_mode_handling_axes() {
        let mut device = svarc("SVARC1", "B1", "B2");
        device.has_standby_automaton = true;
        let mut node = Node::new("B1", "VL1");
        node.svarcs.push(device.clone());
        let topology = topology_of(vec![node, Node::new("B2", "VL2")]);
        assert_eq!(
            select(&device, &topology),
            SvarcModel::SvarcPVRemoteModeHandling
        );
    }

    #[test]
    fn test_shared_regulated_bus_selects_proportional_variant() {
        let device = svarc("SVARC1", "B1", "B2");
        let other = svarc("SVARC2", "B2", "B2");
        let mut node1 = Node::new("B1", "VL1");
        node1.svarcs.push(device.clone());
        let mut node2 = Node::new("B2", "VL2");
        node2.svarcs.push(other);
        let topology = topology_of(vec![node1, node2]);
        assert_eq!(select(&device, &topology), SvarcModel::SvarcPVPropRemote);
    }
}
