//! Pipeline stages and the shared context they mutate, per §4.7.

pub mod context;
pub mod stage;

pub use context::{PipelineContext, StageResults};
pub use stage::PipelineStage;
