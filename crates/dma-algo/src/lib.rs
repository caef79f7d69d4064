//! # dma-algo: Model Selection and Wiring
//!
//! The decision half of the dynamic-model assembly engine. Given a frozen
//! [`dma_core::NetworkSnapshot`], the assembling database from dma-io and
//! the run configuration, one call to [`assembly::assemble`] produces:
//!
//! - a model variant per generator, HVDC line and static var compensator,
//! - the expanded automaton connections with stable positional indices,
//! - the final wiring, splitting coordinated-voltage-control targets
//!   between direct device connections and network measurements.
//!
//! Every decision function is pure over shared immutable context; the
//! regulation topology index is built once and frozen before the first
//! rule reads it.

pub mod assembly;
pub mod dynmodel;
pub mod generator;
pub mod hvdc;
pub mod svarc;

pub use assembly::{assemble, assemble_with, AssemblyOutput};
pub use dynmodel::{
    ConnectionInstance, DynamicModelDefinition, ElementType, ResolvedModels, WiredConnection,
    WiringTarget,
};
pub use generator::{
    GeneratorDefinition, GeneratorModel, GeneratorSelection, NoSwitchPaths, SwitchConnectivity,
};
pub use hvdc::{HvdcDefinition, HvdcModel, HvdcPosition, HvdcSelection, VscSideDefinition};
pub use svarc::{SvarcDefinition, SvarcModel};
