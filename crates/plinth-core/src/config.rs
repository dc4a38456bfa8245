use crate::options::Mode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable that selects the build mode.
pub const MODE_ENV: &str = "NODE_ENV";

/// Runtime configuration for the plinth CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Current working directory (project root).
    pub cwd: PathBuf,

    /// Whether to emit JSON logs.
    pub json_logs: bool,

    /// Verbosity level (0 = INFO, 1 = DEBUG, 2+ = TRACE).
    pub verbosity: u8,

    /// Explicit config file, overriding discovery.
    pub config_file: Option<PathBuf>,

    /// Explicit mode, overriding the environment.
    pub mode: Option<Mode>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            json_logs: false,
            verbosity: 0,
            config_file: None,
            mode: None,
        }
    }
}

impl Config {
    /// Create a new config with the given working directory.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            ..Default::default()
        }
    }

    /// Set verbosity level.
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set JSON log output.
    #[must_use]
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }

    /// Set an explicit config file.
    #[must_use]
    pub fn with_config_file(mut self, path: Option<PathBuf>) -> Self {
        self.config_file = path;
        self
    }

    /// Force a mode.
    #[must_use]
    pub fn with_mode(mut self, mode: Option<Mode>) -> Self {
        self.mode = mode;
        self
    }

    /// Resolve the effective mode: explicit flag, then `NODE_ENV`.
    ///
    /// Only `NODE_ENV=development` selects development; anything else,
    /// including an unset variable, builds for production.
    #[must_use]
    pub fn effective_mode(&self) -> Mode {
        if let Some(mode) = self.mode {
            return mode;
        }
        match std::env::var(MODE_ENV) {
            Ok(value) if value == "development" => Mode::Development,
            _ => Mode::Production,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_mode_from_env() {
        std::env::set_var(MODE_ENV, "development");
        assert_eq!(Config::new(".".into()).effective_mode(), Mode::Development);

        std::env::set_var(MODE_ENV, "staging");
        assert_eq!(Config::new(".".into()).effective_mode(), Mode::Production);

        std::env::remove_var(MODE_ENV);
        assert_eq!(Config::new(".".into()).effective_mode(), Mode::Production);
    }

    #[test]
    #[serial]
    fn test_flag_overrides_env() {
        std::env::set_var(MODE_ENV, "development");
        let config = Config::new(".".into()).with_mode(Some(Mode::Production));
        assert_eq!(config.effective_mode(), Mode::Production);
        std::env::remove_var(MODE_ENV);
    }
}
