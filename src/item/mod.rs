//! # Item Module
//!
//! Ready-made readers, processors and writers.
//!
//! In-memory and decorating components are always available. Components tied to
//! a file format sit behind a cargo feature of the same name.

/// In-memory reader and writer, checkpointing their position.
pub mod list;

/// Single-item lookahead and control-break grouping.
pub mod peekable;

/// Footer record verification.
pub mod footer;

/// Processor chains, validation and writer fan-out.
pub mod composite;

#[cfg(feature = "logger")]
#[cfg_attr(docsrs, doc(cfg(feature = "logger")))]
/// This module provides a logger item writer, useful for debugging purposes.
pub mod logger;

#[cfg(feature = "csv")]
#[cfg_attr(docsrs, doc(cfg(feature = "csv")))]
/// This module provides a restartable CSV item reader and writer.
pub mod csv;
