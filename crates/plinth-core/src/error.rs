use crate::bundler::{EmitError, OptimizeError, PartitionError, ResolveError, TransformError};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration and setup errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read config at {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No config file found in {root}")]
    ConfigNotFound { root: PathBuf },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    #[must_use]
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    #[must_use]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

/// Everything that can abort a build.
///
/// Every variant carries enough context to point at the failing unit and the
/// rule or step responsible for it.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] Error),

    #[error(transparent)]
    Resolution(#[from] ResolveError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Partition(#[from] PartitionError),

    #[error(transparent)]
    Emit(#[from] EmitError),

    #[error(transparent)]
    Optimize(#[from] OptimizeError),
}

impl BuildError {
    /// Stable machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Resolution(_) => "RESOLUTION_ERROR",
            Self::Transform(_) => "TRANSFORM_ERROR",
            Self::Partition(_) => "PARTITION_ERROR",
            Self::Emit(_) => "EMIT_ERROR",
            Self::Optimize(_) => "OPTIMIZE_ERROR",
        }
    }

    /// Identity of the unit or artifact the failure originated from.
    #[must_use]
    pub fn unit(&self) -> Option<String> {
        match self {
            Self::Config(_) => None,
            Self::Resolution(e) => Some(e.from.clone()),
            Self::Transform(e) => Some(e.unit.to_string()),
            Self::Partition(e) => e.chunk().map(str::to_string),
            Self::Emit(e) => Some(e.path.display().to_string()),
            Self::Optimize(e) => Some(e.artifact.clone()),
        }
    }

    /// Responsible rule, step or policy name.
    #[must_use]
    pub fn step(&self) -> Option<String> {
        match self {
            Self::Config(_) | Self::Emit(_) => None,
            Self::Resolution(e) => Some(e.specifier.clone()),
            Self::Transform(e) => Some(e.step.clone()),
            Self::Partition(e) => e.policy().map(str::to_string),
            Self::Optimize(e) => Some(e.pass.to_string()),
        }
    }
}
