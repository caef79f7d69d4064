//! Regulation topology index
//!
//! Maps each bus to the number of distinct elements regulating voltage
//! there, classified as none / one / multiple. The index is built once from
//! the full device population before any model-selection rule runs, and is
//! read-only afterward: every generator, HVDC and compensator rule depends
//! on whether its regulated bus is shared.

use crate::{BusId, NetworkSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How many distinct elements regulate voltage at a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regulation {
    None,
    One,
    Multiple,
}

/// Frozen bus-to-regulation-count index.
#[derive(Debug, Clone, Default)]
pub struct RegulationTopology {
    counts: HashMap<BusId, usize>,
}

impl RegulationTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the index from a snapshot: voltage-regulating generators,
    /// voltage-regulating VSC converter ends and regulating compensators
    /// each count once at their regulated bus. Every bus of the snapshot is
    /// observed, so unregulated buses classify as [`Regulation::None`].
    pub fn from_snapshot(snapshot: &NetworkSnapshot) -> Self {
        let mut topology = Self::new();
        for node in snapshot.nodes() {
            topology.observe_bus(&node.id);
        }
        for node in snapshot.nodes() {
            for generator in &node.generators {
                if generator.voltage_regulation_on {
                    topology.record_regulator(&generator.regulated_bus_id);
                }
            }
            for svarc in &node.svarcs {
                if svarc.regulation_on {
                    topology.record_regulator(&svarc.regulated_bus_id);
                }
            }
            for conv_id in &node.converter_ids {
                if let Some(hvdc) = snapshot.hvdc_line_of_converter(conv_id) {
                    if let Some(converter) = hvdc.converter(conv_id) {
                        if converter.payload.voltage_regulation_on() {
                            topology.record_regulator(&converter.bus_id);
                        }
                    }
                }
            }
        }
        topology
    }

    /// Register a bus with zero regulators (idempotent).
    pub fn observe_bus(&mut self, bus: &str) {
        self.counts.entry(bus.to_string()).or_insert(0);
    }

    /// Count one more regulating element at the given bus.
    pub fn record_regulator(&mut self, bus: &str) {
        *self.counts.entry(bus.to_string()).or_insert(0) += 1;
    }

    /// Classification for a registered bus, or `None` if the bus was never
    /// seen at all.
    pub fn get(&self, bus: &str) -> Option<Regulation> {
        self.counts.get(bus).map(|&n| match n {
            0 => Regulation::None,
            1 => Regulation::One,
            _ => Regulation::Multiple,
        })
    }

    /// Classification with the historical default: a bus absent from the
    /// index is treated as regulated by exactly one element. Callers relying
    /// on the distinction between "absent" and "intentionally unregulated"
    /// must use [`RegulationTopology::get`] instead.
    pub fn regulation(&self, bus: &str) -> Regulation {
        self.get(bus).unwrap_or(Regulation::One)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_by_count() {
        let mut topology = RegulationTopology::new();
        topology.observe_bus("B0");
        topology.record_regulator("B1");
        topology.record_regulator("B2");
        topology.record_regulator("B2");

        assert_eq!(topology.get("B0"), Some(Regulation::None));
        assert_eq!(topology.get("B1"), Some(Regulation::One));
        assert_eq!(topology.get("B2"), Some(Regulation::Multiple));
    }

    #[test]
    fn test_one_transitions_to_multiple_never_back() {
        let mut topology = RegulationTopology::new();
        topology.record_regulator("B1");
        assert_eq!(topology.regulation("B1"), Regulation::One);
        topology.record_regulator("B1");
        assert_eq!(topology.regulation("B1"), Regulation::Multiple);
        topology.record_regulator("B1");
        assert_eq!(topology.regulation("B1"), Regulation::Multiple);
    }

    #[test]
    fn test_absent_bus_defaults_to_one() {
        let topology = RegulationTopology::new();
        assert_eq!(topology.get("UNSEEN"), None);
        assert_eq!(topology.regulation("UNSEEN"), Regulation::One);
    }

    #[test]
    fn test_observed_bus_is_none_not_defaulted() {
        let mut topology = RegulationTopology::new();
        topology.observe_bus("B0");
        assert_eq!(topology.regulation("B0"), Regulation::None);
    }
}
