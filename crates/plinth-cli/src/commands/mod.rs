pub mod build;
pub mod dev;
pub mod version;

use plinth_core::options::load;
use plinth_core::{Config, Error, Mode, Pipeline};

/// Load the project's options and configure a pipeline.
///
/// Mode precedence: `--mode`, then the config file's `mode`, then `NODE_ENV`.
pub(crate) fn load_pipeline(config: &Config, default_mode: Option<Mode>) -> Result<Pipeline, Error> {
    let (path, options) = load(&config.cwd, config.config_file.as_deref())?;
    let mode = config
        .mode
        .or(options.mode)
        .or(default_mode)
        .unwrap_or_else(|| config.effective_mode());
    tracing::debug!(config = %path.display(), %mode, "using config");
    Pipeline::new(config.cwd.clone(), options, mode)
}
