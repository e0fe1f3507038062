#![forbid(unsafe_code)]
//! Output capture and logger tree for a hierarchical test-execution engine.
//!
//! The host engine reports units starting, finishing and logging; this crate
//! keeps one [`LoggerNode`] per visible unit, shaped like the unit nesting:
//! - [`PriorityLineBuffer`] stores each node's `(priority, text)` lines and
//!   hands out snapshots that are safe to read while writers keep appending.
//! - [`LineSink`] / [`TeeReader`] turn raw process byte streams into lines.
//! - Containers track which of them accepts new children and keep a LIFO of
//!   deferred children (background processes, services) that are stopped
//!   only when the container itself is torn down.
//! - [`LoggerRegistry`] assigns ids, tracks the current container and passes
//!   finished results to a [`ResultSink`].
//!
//! ```rust
//! use std::sync::Arc;
//! use harness_log::{LogConfig, LoggerRegistry, MemorySink, UnitHandle, UnitKind, priority};
//!
//! let sink = Arc::new(MemorySink::new());
//! let root = UnitHandle::new(0, UnitKind::Suite, "run");
//! let registry = LoggerRegistry::init_with_sink(root.clone(), LogConfig::default(), sink.clone());
//!
//! let case = UnitHandle::new(1, UnitKind::TestCase, "smoke");
//! let logger = registry.unit_started(&case)?.expect("test cases get a logger");
//! registry.message_logged(&case, 2, "hello")?;
//! assert_eq!(logger.buffer().to_string_array(priority::INFO, priority::INFO), vec!["hello"]);
//!
//! registry.unit_finished(&case, None)?;
//! registry.unit_finished(&root, None)?;
//! assert_eq!(sink.records().len(), 2);
//! # Ok::<(), harness_log::LogError>(())
//! ```

mod buffer;
mod capture;
mod config;
mod container;
mod error;
mod node;
mod outcome;
pub mod priority;
mod registry;
mod sink;
mod unit;

pub use buffer::{
    strip_ansi, LogLine, OutputRun, Priority, PriorityLineBuffer, RenderOptions, Snapshot,
};
pub use capture::{LineSink, LineTarget, TeeReader};
pub use config::{LogConfig, RESULTS_DIR_ENV, SCRATCH_DIR_ENV};
pub use container::{DeferredShutdown, LoggerRef};
pub use error::{ConfigError, LogError, SinkError};
pub use node::{LinkMode, LoggerNode, NodeKind, Phase, ProcessControl, ProcessDetails};
pub use outcome::{Failure, FailureKind, Outcome};
pub use priority::{SeverityMap, Stream, UnknownStream};
pub use registry::LoggerRegistry;
pub use sink::{JsonDirSink, MemorySink, NullSink, ResultRecord, ResultSink};
pub use unit::{UnitHandle, UnitKind};

#[cfg(feature = "tokio")]
pub use capture::{capture_stream, ConsoleTarget};
