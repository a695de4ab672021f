//! Flow definitions: the stage graphs conversations are driven through.
//!
//! A flow is a directed (possibly cyclic) graph of stages. Each stage carries
//! the instruction for the utterance generator, a turn budget and optional
//! completion criteria judged by an external evaluator.

pub mod defaults;
pub mod definition;
pub mod loader;
pub mod registry;

pub use definition::{FlowConfig, FlowDefinition, StageConfig, StageDefinition};
pub use registry::{FlowRegistry, FlowSummary};
