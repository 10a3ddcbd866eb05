//! Domain logic for the photogrammetry reconstruction service.
//!
//! Everything here is free of HTTP and database concerns so both the
//! submission gateway and the worker binary can share it:
//!
//! - [`job`]: the Job Record threaded through the pipeline and its
//!   one-directional status machine.
//! - [`submission`]: validation of inbound reconstruction requests.
//! - [`callback`]: the immutable webhook payload.
//! - [`queue`]: the Dispatch Queue seam plus an in-memory implementation.
//! - [`process`]: the supervised external process runner.
//! - [`provider`]: the reconstruction backend interface and registry.
//! - [`workspace`] / [`archive`]: per-attempt working directories and
//!   input extraction.

pub mod archive;
pub mod callback;
pub mod config;
pub mod error;
pub mod job;
pub mod job_error;
pub mod process;
pub mod provider;
pub mod queue;
pub mod retry;
pub mod submission;
pub mod types;
pub mod workspace;
