//! Agent backend interfaces: how a run is started, streamed and cancelled,
//! and how model names resolve to provider/model pairs.

pub mod backend;
pub mod model;

pub use {
    backend::{AgentBackend, FragmentKind, ReplyFragment, RunEvent, RunOptions, RunRequest, RunStream},
    model::{ModelCatalog, ModelRef, ModelSelection, ModelSelectionCell, StaticModelCatalog},
};
