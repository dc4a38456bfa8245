//! Config file discovery, parsing and validation.

use super::{PlinthOptions, RuleSet, PACKAGE_NAME_PLACEHOLDER};
use crate::error::Error;
use regex_lite::Regex;
use std::path::{Path, PathBuf};

/// Config file names searched in the project root, in order.
pub const CONFIG_FILES: &[&str] = &["plinth.config.json", ".plinthrc.json"];

/// Find the config file in `root`.
#[must_use]
pub fn find_config_file(root: &Path) -> Option<PathBuf> {
    CONFIG_FILES
        .iter()
        .map(|name| root.join(name))
        .find(|p| p.is_file())
}

/// Load options from `explicit` or the discovered config file in `root`.
///
/// Returns the path the options were read from.
///
/// # Errors
/// Returns an error if no file exists, it cannot be read, or it does not parse.
pub fn load(root: &Path, explicit: Option<&Path>) -> Result<(PathBuf, PlinthOptions), Error> {
    let path = match explicit {
        Some(p) if p.is_absolute() => p.to_path_buf(),
        Some(p) => root.join(p),
        None => find_config_file(root).ok_or_else(|| Error::ConfigNotFound {
            root: root.to_path_buf(),
        })?,
    };

    let text = std::fs::read_to_string(&path).map_err(|source| Error::ConfigRead {
        path: path.clone(),
        source,
    })?;
    let options: PlinthOptions =
        serde_json::from_str(&text).map_err(|source| Error::ConfigParse {
            path: path.clone(),
            source,
        })?;

    tracing::debug!(path = %path.display(), "loaded config");
    Ok((path, options))
}

impl PlinthOptions {
    /// Check the options for problems serde cannot catch.
    ///
    /// `is_known_loader` reports whether a loader name is registered.
    ///
    /// # Errors
    /// Returns the first problem found as [`Error::InvalidConfig`].
    pub fn validate(&self, is_known_loader: impl Fn(&str) -> bool) -> Result<(), Error> {
        let entries = self.entries();
        if entries.is_empty() {
            return Err(Error::invalid("entry: at least one entry is required"));
        }
        for (name, specs) in &entries {
            if name.is_empty() {
                return Err(Error::invalid("entry: entry names must not be empty"));
            }
            if specs.is_empty() || specs.iter().any(String::is_empty) {
                return Err(Error::invalid(format!(
                    "entry.{name}: specifiers must not be empty"
                )));
            }
        }

        let rules = RuleSet::compile(&self.module.rules)?;
        for (rule, loader) in rules.loader_names() {
            if !is_known_loader(loader) {
                return Err(Error::invalid(format!(
                    "module.{}: unknown loader '{loader}'",
                    rule.label
                )));
            }
        }

        for (key, group) in &self.optimization.split_chunks.cache_groups {
            if let Some(test) = &group.test {
                Regex::new(test).map_err(|e| {
                    Error::invalid(format!(
                        "optimization.splitChunks.cacheGroups.{key}.test: invalid pattern '{test}': {e}"
                    ))
                })?;
            }
            if group.min_chunks == 0 {
                return Err(Error::invalid(format!(
                    "optimization.splitChunks.cacheGroups.{key}.minChunks must be at least 1"
                )));
            }
            if let Some(name) = &group.name {
                if name.is_empty() || (name.contains('[') && name != PACKAGE_NAME_PLACEHOLDER) {
                    return Err(Error::invalid(format!(
                        "optimization.splitChunks.cacheGroups.{key}.name: unsupported name '{name}'"
                    )));
                }
            }
        }

        if !(1..=100).contains(&self.optimization.image_quality) {
            return Err(Error::invalid(
                "optimization.imageQuality must be between 1 and 100",
            ));
        }

        if self.dev_server.port == 0 {
            return Err(Error::invalid("devServer.port must not be 0"));
        }
        for (prefix, proxy) in &self.dev_server.proxy {
            if !prefix.starts_with('/') {
                return Err(Error::invalid(format!(
                    "devServer.proxy: prefix '{prefix}' must start with '/'"
                )));
            }
            if !(proxy.target.starts_with("http://") || proxy.target.starts_with("https://")) {
                return Err(Error::invalid(format!(
                    "devServer.proxy.{prefix}: target must be an http(s) URL"
                )));
            }
        }

        Ok(())
    }
}
