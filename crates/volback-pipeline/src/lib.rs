//! volback-pipeline: streaming transform pipeline
//!
//! A [`Pipeline`] is an ordered list of named [`Stage`]s. Executing it spawns
//! one tokio task per stage; adjacent stages are joined by a single-slot
//! handoff, so a slow consumer throttles every producer upstream of it and
//! memory stays bounded no matter how large the payload is.
//!
//! A failing stage poisons its handoff: the next stage reads every byte that
//! was already written, then the error. Each stage the error passes through
//! wraps it with its own name, and [`PipelineError::origin_stage`] recovers
//! the stage that failed first.

pub mod error;
pub mod handoff;
pub mod pipeline;
pub mod stage;

pub use error::{PipelineError, UpstreamFailed};
pub use handoff::{handoff, HandoffReader, HandoffWriter, HANDOFF_CAPACITY};
pub use pipeline::{Pipeline, PipelineOutput, StageTasks};
pub use stage::{BoxReader, BoxWriter, Stage, Transform};
