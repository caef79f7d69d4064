//! One assembly pass over a topology snapshot.
//!
//! Order matters: the regulation topology index is built and frozen before
//! any selection rule reads it, the per-device passes run over the main
//! connected component only, and automaton wiring runs last because the
//! coordinated-voltage-control split depends on knowing which generators
//! received their own dynamic model.

use crate::dynmodel::{self, ResolvedModels, WiredConnection};
use crate::generator::{GeneratorDefinition, GeneratorSelection, NoSwitchPaths, SwitchConnectivity};
use crate::hvdc::{HvdcDefinition, HvdcSelection};
use crate::svarc::{self, SvarcDefinition};
use dma_core::{
    main_connected_component, ActivePowerCompensation, AssemblyConfig, AssemblyResult, BusId,
    GeneratorId, HvdcLineId, NetworkSnapshot, Node, RegulationTopology,
};
use dma_io::AssemblingDatabase;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Everything one assembly pass decided, keyed for downstream writers.
#[derive(Debug, Clone, Serialize)]
pub struct AssemblyOutput {
    pub generators: Vec<GeneratorDefinition>,
    pub hvdc_lines: BTreeMap<HvdcLineId, HvdcDefinition>,
    pub svarcs: Vec<SvarcDefinition>,
    /// Representative regulating generator per shared bus.
    pub buses_with_dynamic_model: HashMap<BusId, GeneratorId>,
    pub models: ResolvedModels,
    pub connections: Vec<WiredConnection>,
    /// Passed through untouched for the parameter writers.
    pub active_power_compensation: ActivePowerCompensation,
}

impl AssemblyOutput {
    pub fn used_macro_connections(&self) -> &BTreeSet<String> {
        &self.models.used_macro_connections
    }
}

/// Run the full pass with the default switch oracle.
pub fn assemble(
    snapshot: &NetworkSnapshot,
    db: &AssemblingDatabase,
    config: &AssemblyConfig,
) -> AssemblyResult<AssemblyOutput> {
    assemble_with(snapshot, db, config, &NoSwitchPaths)
}

/// Run the full pass with a caller-provided switch-connectivity oracle.
pub fn assemble_with(
    snapshot: &NetworkSnapshot,
    db: &AssemblingDatabase,
    config: &AssemblyConfig,
    switches: &dyn SwitchConnectivity,
) -> AssemblyResult<AssemblyOutput> {
    let topology = RegulationTopology::from_snapshot(snapshot);
    let main_component = main_connected_component(snapshot);
    let infinite = config.use_infinite_reactive_limits;

    let nodes: Vec<&Node> = snapshot
        .nodes()
        .iter()
        .filter(|n| main_component.contains(&n.id))
        .collect();
    debug!(
        buses = nodes.len(),
        total = snapshot.nodes().len(),
        "assembling over the main connected component"
    );

    let mut generator_pass = GeneratorSelection::new(&topology, infinite, switches);
    run_generator_pass(&mut generator_pass, &nodes);

    let mut hvdc_pass = HvdcSelection::new(&topology, infinite, db);
    for node in &nodes {
        hvdc_pass.process_node(snapshot, node);
    }

    let mut svarcs = Vec::new();
    for node in &nodes {
        for device in &node.svarcs {
            svarcs.push(svarc::define(device, &topology));
        }
    }

    let (generators, buses_with_dynamic_model) = generator_pass.finish();
    let generators_with_dynamic_model: HashSet<GeneratorId> = generators
        .iter()
        .filter(|g| !g.model.is_network())
        .map(|g| g.id.clone())
        .collect();

    let models = dynmodel::resolve(db, snapshot, &main_component)?;
    let connections = dynmodel::wire(&models, db, &generators_with_dynamic_model);

    Ok(AssemblyOutput {
        generators,
        hvdc_lines: hvdc_pass.finish(),
        svarcs,
        buses_with_dynamic_model,
        models,
        connections,
        active_power_compensation: config.active_power_compensation,
    })
}

// The decision procedure is pure over frozen shared input, so decisions can
// run on the worker pool; records are committed sequentially in input order
// to keep first-seen numbering stable.
#[cfg(feature = "parallel")]
fn run_generator_pass(pass: &mut GeneratorSelection<'_>, nodes: &[&Node]) {
    use rayon::prelude::*;

    let devices: Vec<_> = nodes
        .iter()
        .flat_map(|node| node.generators.iter().map(move |g| (*node, g)))
        .collect();
    let decisions: Vec<_> = {
        let pass = &*pass;
        devices
            .par_iter()
            .map(|(node, generator)| pass.decide(node, generator))
            .collect()
    };
    for ((node, generator), model) in devices.into_iter().zip(decisions) {
        pass.record(node, generator, model);
    }
}

#[cfg(not(feature = "parallel"))]
fn run_generator_pass(pass: &mut GeneratorSelection<'_>, nodes: &[&Node]) {
    for node in nodes {
        for generator in &node.generators {
            pass.process(node, generator);
        }
    }
}
