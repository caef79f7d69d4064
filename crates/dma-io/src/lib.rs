//! # dma-io: Assembling Database Loader
//!
//! Parses the assembling XML document — macro connection templates, single
//! and multiple associations, dynamic automatons — into the flat lookup
//! tables consumed by the selection algorithms in dma-algo.
//!
//! The document is schema-checked during a single event walk; a missing
//! document or schema sidecar is a normal operating mode (see
//! [`assembling::AssemblingDatabase::from_file`]).

pub mod assembling;
pub mod schema;

pub use assembling::{
    AssemblingDatabase, BusTarget, DynamicAutomaton, MacroConnect, MacroConnection,
    MultipleAssociation, MultipleShunts, NamedTarget, SingleAssociation, VarPair, SVC_MODEL_LIB,
};
pub use schema::DocumentSchema;
