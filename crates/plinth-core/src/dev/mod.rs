//! Development mode: watch, rebuild incrementally, notify clients.
//!
//! The HTTP side lives in the CLI; this module owns the state machine, the
//! persistent transform cache and the change stream.

pub mod orchestrator;
pub mod watch;

pub use orchestrator::{DevMessage, DevOrchestrator, DevSnapshot, DevState, MessageKind, RebuildReport};
pub use watch::{ChangeKind, ChangeStream, FileChange, IgnoreRules, WatchError};
