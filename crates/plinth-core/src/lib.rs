#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! Asset pipeline orchestration.
//!
//! Takes entry specifiers plus an ordered rule table and produces hashed,
//! chunked output artifacts:
//!
//! ```text
//! entries -> resolve -> loader chain -> graph -> chunks -> emit -> optimize
//! ```
//!
//! [`dev::DevOrchestrator`] wraps the same pipeline in an incremental loop.

pub mod bundler;
pub mod config;
pub mod css;
pub mod dev;
pub mod error;
pub mod options;

pub use bundler::{BuildOutput, Pipeline};
pub use config::Config;
pub use error::{BuildError, Error};
pub use options::{Mode, PlinthOptions};

/// Crate version, reported by the CLI and embedded in emitted banners.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
