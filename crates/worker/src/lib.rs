//! Reconstruction worker.
//!
//! - [`pipeline`]: one job attempt, from input download to output upload.
//! - [`pool`]: fixed-size pool of queue consumers with lease heartbeats and
//!   graceful shutdown.
//! - [`reaper`]: periodic dead-letter sweep of exhausted messages.

pub mod pipeline;
pub mod pool;
pub mod reaper;

pub use pipeline::{JobOutcome, JobPipeline, PipelineSettings};
pub use pool::{WorkerContext, WorkerPool};
