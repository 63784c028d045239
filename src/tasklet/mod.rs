//! # Tasklet Module
//!
//! Ready-made tasklets for work that does not fit the chunk-oriented pattern.

/// Work run on a worker thread with a timeout and cooperative cancellation.
pub mod callable;

/// Operating system commands run as a step.
pub mod command;
