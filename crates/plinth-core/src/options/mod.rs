//! Typed build configuration.
//!
//! The configuration is a single JSON document (`plinth.config.json`) whose
//! recognized options map onto the structs below. Every nested section has
//! defaults; a handful of defaults depend on the build [`Mode`] and are
//! exposed through accessor methods instead of serde defaults.

mod load;
mod rules;

pub use load::{find_config_file, load, CONFIG_FILES};
pub use rules::{CompiledRule, Enforce, LoaderRef, RuleOptions, RuleSet};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Build mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Development,
    #[default]
    Production,
}

impl Mode {
    #[must_use]
    pub fn is_production(self) -> bool {
        self == Self::Production
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("unknown mode '{other}'")),
        }
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PlinthOptions {
    #[serde(default)]
    pub mode: Option<Mode>,
    #[serde(default = "default_context")]
    pub context: PathBuf,
    pub entry: EntryOptions,
    #[serde(default)]
    pub output: OutputOptions,
    #[serde(default)]
    pub resolve: ResolveOptions,
    #[serde(default)]
    pub externals: Vec<String>,
    #[serde(default)]
    pub devtool: Option<DevtoolSetting>,
    #[serde(default)]
    pub module: ModuleOptions,
    #[serde(default)]
    pub optimization: OptimizationOptions,
    #[serde(default)]
    pub html: Option<HtmlOptions>,
    #[serde(default)]
    pub copy: Vec<CopyPattern>,
    #[serde(default)]
    pub define: BTreeMap<String, String>,
    #[serde(default)]
    pub dev_server: DevServerOptions,
}

fn default_context() -> PathBuf {
    PathBuf::from(".")
}

impl PlinthOptions {
    /// Minimal options for a single entry, everything else defaulted.
    #[must_use]
    pub fn with_entry(entry: impl Into<String>) -> Self {
        Self {
            mode: None,
            context: default_context(),
            entry: EntryOptions::Single(entry.into()),
            output: OutputOptions::default(),
            resolve: ResolveOptions::default(),
            externals: Vec::new(),
            devtool: None,
            module: ModuleOptions::default(),
            optimization: OptimizationOptions::default(),
            html: None,
            copy: Vec::new(),
            define: BTreeMap::new(),
            dev_server: DevServerOptions::default(),
        }
    }

    /// Entries as `(name, specifiers)` pairs in a stable order.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, Vec<String>)> {
        self.entry.normalized()
    }

    /// Source map kind for the given mode.
    #[must_use]
    pub fn devtool_for(&self, mode: Mode) -> Devtool {
        match &self.devtool {
            Some(DevtoolSetting::Enabled(false)) => Devtool::None,
            Some(DevtoolSetting::Kind(kind)) => *kind,
            Some(DevtoolSetting::Enabled(true)) | None => match mode {
                Mode::Development => Devtool::InlineSourceMap,
                Mode::Production => Devtool::None,
            },
        }
    }

    /// Whether the optimization pass runs.
    #[must_use]
    pub fn minimize_for(&self, mode: Mode) -> bool {
        self.optimization.minimize.unwrap_or(mode.is_production())
    }
}

/// `entry`: a single specifier, a list (one entry named `main`) or a map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryOptions {
    Single(String),
    List(Vec<String>),
    Named(IndexMap<String, EntryValue>),
}

/// Value of a named entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryValue {
    One(String),
    Many(Vec<String>),
}

/// Name used for list and single-string entries.
pub const DEFAULT_ENTRY_NAME: &str = "main";

impl EntryOptions {
    #[must_use]
    pub fn normalized(&self) -> Vec<(String, Vec<String>)> {
        match self {
            Self::Single(spec) => vec![(DEFAULT_ENTRY_NAME.to_string(), vec![spec.clone()])],
            Self::List(specs) => vec![(DEFAULT_ENTRY_NAME.to_string(), specs.clone())],
            Self::Named(map) => map
                .iter()
                .map(|(name, value)| {
                    let specs = match value {
                        EntryValue::One(s) => vec![s.clone()],
                        EntryValue::Many(v) => v.clone(),
                    };
                    (name.clone(), specs)
                })
                .collect(),
        }
    }
}

/// `output` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputOptions {
    pub path: PathBuf,
    pub filename: Option<String>,
    pub chunk_filename: Option<String>,
    pub css_filename: Option<String>,
    pub css_chunk_filename: Option<String>,
    pub asset_filename: String,
    pub public_path: Option<String>,
    pub clean: bool,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            path: PathBuf::from("build"),
            filename: None,
            chunk_filename: None,
            css_filename: None,
            css_chunk_filename: None,
            asset_filename: "assets/[name].[hash:8][ext]".to_string(),
            public_path: None,
            clean: false,
        }
    }
}

impl OutputOptions {
    #[must_use]
    pub fn filename_for(&self, mode: Mode) -> String {
        self.filename.clone().unwrap_or_else(|| match mode {
            Mode::Development => "js/[name].js".to_string(),
            Mode::Production => "js/[name].[contenthash:8].js".to_string(),
        })
    }

    #[must_use]
    pub fn chunk_filename_for(&self, mode: Mode) -> String {
        self.chunk_filename.clone().unwrap_or_else(|| match mode {
            Mode::Development => "js/[name].chunk.js".to_string(),
            Mode::Production => "js/[name].[contenthash:8].chunk.js".to_string(),
        })
    }

    #[must_use]
    pub fn css_filename_for(&self, mode: Mode) -> String {
        self.css_filename.clone().unwrap_or_else(|| match mode {
            Mode::Development => "assets/css/[name].css".to_string(),
            Mode::Production => "assets/css/[name].[contenthash:8].css".to_string(),
        })
    }

    #[must_use]
    pub fn css_chunk_filename_for(&self, mode: Mode) -> String {
        self.css_chunk_filename.clone().unwrap_or_else(|| match mode {
            Mode::Development => "assets/css/[name].chunk.css".to_string(),
            Mode::Production => "assets/css/[name].[contenthash:8].chunk.css".to_string(),
        })
    }

    /// Public path prefix, always ending in `/` unless empty.
    #[must_use]
    pub fn public_path_for(&self, mode: Mode) -> String {
        let raw = self.public_path.clone().unwrap_or_else(|| match mode {
            Mode::Development => "/".to_string(),
            Mode::Production => "./".to_string(),
        });
        if raw.is_empty() || raw.ends_with('/') {
            raw
        } else {
            format!("{raw}/")
        }
    }
}

/// `resolve` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolveOptions {
    pub extensions: Vec<String>,
    pub alias: IndexMap<String, String>,
    pub modules: Vec<String>,
    pub main_fields: Vec<String>,
    pub main_files: Vec<String>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            extensions: vec![".js".to_string(), ".json".to_string()],
            alias: IndexMap::new(),
            modules: vec!["node_modules".to_string()],
            main_fields: vec!["module".to_string(), "main".to_string()],
            main_files: vec!["index".to_string()],
        }
    }
}

/// `devtool`: `false`, `true` (mode default) or a source map kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DevtoolSetting {
    Enabled(bool),
    Kind(Devtool),
}

/// Source map emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Devtool {
    /// No source maps.
    None,
    /// Source map appended as a `data:` URI comment.
    InlineSourceMap,
    /// Sibling `.map` file.
    SourceMap,
}

/// `module` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModuleOptions {
    pub rules: Vec<RuleOptions>,
}

/// `optimization` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OptimizationOptions {
    pub minimize: Option<bool>,
    pub warn_only: bool,
    pub image_quality: u8,
    pub preserve_license_comments: bool,
    pub split_chunks: SplitChunksOptions,
    pub runtime_chunk: RuntimeChunk,
}

impl Default for OptimizationOptions {
    fn default() -> Self {
        Self {
            minimize: None,
            warn_only: false,
            image_quality: 85,
            preserve_license_comments: false,
            split_chunks: SplitChunksOptions::default(),
            runtime_chunk: RuntimeChunk::Single,
        }
    }
}

/// `optimization.splitChunks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SplitChunksOptions {
    /// Cache groups in declaration order.
    pub cache_groups: IndexMap<String, CacheGroupOptions>,
    pub shared_chunks: bool,
}

impl Default for SplitChunksOptions {
    fn default() -> Self {
        Self {
            cache_groups: IndexMap::new(),
            shared_chunks: true,
        }
    }
}

/// Placeholder that names a cache group chunk after the matched package.
pub const PACKAGE_NAME_PLACEHOLDER: &str = "[package]";

/// One cache group of the partitioner policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheGroupOptions {
    pub test: Option<String>,
    pub priority: i32,
    pub name: Option<String>,
    pub min_chunks: usize,
    pub chunks: ChunksFilter,
}

impl Default for CacheGroupOptions {
    fn default() -> Self {
        Self {
            test: None,
            priority: 0,
            name: None,
            min_chunks: 1,
            chunks: ChunksFilter::All,
        }
    }
}

/// Which modules a cache group may take, by how they are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunksFilter {
    #[default]
    All,
    Initial,
    Async,
}

/// `optimization.runtimeChunk`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeChunk {
    #[default]
    Single,
    Multiple,
}

/// `html` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HtmlOptions {
    pub template: Option<PathBuf>,
    pub filename: String,
    pub title: String,
    pub inject: bool,
    pub minify: Option<bool>,
}

impl Default for HtmlOptions {
    fn default() -> Self {
        Self {
            template: None,
            filename: "index.html".to_string(),
            title: "plinth app".to_string(),
            inject: true,
            minify: None,
        }
    }
}

/// One `copy` pattern: a file or directory relative to the project root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyPattern {
    pub from: PathBuf,
    #[serde(default)]
    pub to: String,
}

/// Environment variable supplying the dev server port when the
/// configuration does not set one.
pub const PORT_ENV: &str = "PORT";

/// Port used when neither the configuration nor `PORT` sets one.
pub const DEFAULT_PORT: u16 = 3000;

/// `devServer` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DevServerOptions {
    pub host: String,
    pub port: u16,
    pub proxy: IndexMap<String, ProxyOptions>,
    pub hot: bool,
    pub live_reload: bool,
    pub history_api_fallback: bool,
    pub compress: bool,
    pub open: bool,
    pub static_dir: Option<PathBuf>,
    pub overlay: OverlayOptions,
    pub debounce_ms: u64,
}

impl Default for DevServerOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: std::env::var(PORT_ENV)
                .ok()
                .and_then(|p| p.trim().parse().ok())
                .unwrap_or(DEFAULT_PORT),
            proxy: IndexMap::new(),
            hot: true,
            live_reload: true,
            history_api_fallback: true,
            compress: true,
            open: false,
            static_dir: None,
            overlay: OverlayOptions::default(),
            debounce_ms: 50,
        }
    }
}

/// Proxy target for a path prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyOptions {
    pub target: String,
    #[serde(default)]
    pub change_origin: bool,
}

/// Which diagnostics the browser overlay shows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OverlayOptions {
    pub errors: bool,
    pub warnings: bool,
}

impl Default for OverlayOptions {
    fn default() -> Self {
        Self {
            errors: true,
            warnings: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_port_env_is_fallback_below_config() {
        std::env::set_var(PORT_ENV, "4321");
        assert_eq!(DevServerOptions::default().port, 4321);
        let implicit: PlinthOptions = serde_json::from_str(r#"{"entry": "a.js"}"#).unwrap();
        assert_eq!(implicit.dev_server.port, 4321);
        let explicit: PlinthOptions =
            serde_json::from_str(r#"{"entry": "a.js", "devServer": {"port": 8080}}"#).unwrap();
        assert_eq!(explicit.dev_server.port, 8080);

        std::env::set_var(PORT_ENV, "not-a-port");
        assert_eq!(DevServerOptions::default().port, DEFAULT_PORT);
        std::env::remove_var(PORT_ENV);
        assert_eq!(DevServerOptions::default().port, DEFAULT_PORT);
    }

    #[test]
    fn test_entry_list_is_main() {
        let opts: PlinthOptions =
            serde_json::from_str(r#"{"entry": ["./polyfill.js", "./index.js"]}"#).unwrap();
        assert_eq!(
            opts.entries(),
            vec![(
                "main".to_string(),
                vec!["./polyfill.js".to_string(), "./index.js".to_string()]
            )]
        );
    }

    #[test]
    fn test_entry_map_keeps_declaration_order() {
        let opts: PlinthOptions =
            serde_json::from_str(r#"{"entry": {"zeta": "./z.js", "alpha": ["./a.js"]}}"#)
                .unwrap();
        let names: Vec<_> = opts.entries().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_unknown_top_level_field_rejected() {
        let err = serde_json::from_str::<PlinthOptions>(r#"{"entry": "a.js", "plugins": []}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_mode_dependent_defaults() {
        let opts = PlinthOptions::with_entry("./index.js");
        assert_eq!(opts.output.filename_for(Mode::Development), "js/[name].js");
        assert_eq!(
            opts.output.filename_for(Mode::Production),
            "js/[name].[contenthash:8].js"
        );
        assert!(opts.minimize_for(Mode::Production));
        assert!(!opts.minimize_for(Mode::Development));
        assert_eq!(opts.devtool_for(Mode::Development), Devtool::InlineSourceMap);
        assert_eq!(opts.devtool_for(Mode::Production), Devtool::None);
    }

    #[test]
    fn test_devtool_false_and_kind() {
        let off: PlinthOptions =
            serde_json::from_str(r#"{"entry": "a.js", "devtool": false}"#).unwrap();
        assert_eq!(off.devtool_for(Mode::Development), Devtool::None);

        let ext: PlinthOptions =
            serde_json::from_str(r#"{"entry": "a.js", "devtool": "source-map"}"#).unwrap();
        assert_eq!(ext.devtool_for(Mode::Production), Devtool::SourceMap);
    }

    #[test]
    fn test_public_path_gets_trailing_slash() {
        let mut out = OutputOptions::default();
        out.public_path = Some("/static".to_string());
        assert_eq!(out.public_path_for(Mode::Production), "/static/");
        out.public_path = Some(String::new());
        assert_eq!(out.public_path_for(Mode::Production), "");
    }

    #[test]
    fn test_cache_groups_keep_declaration_order() {
        let opts: PlinthOptions = serde_json::from_str(
            r#"{"entry": "a.js", "optimization": {"splitChunks": {"cacheGroups": {
                "zz": {"test": "z"}, "aa": {"test": "a", "priority": 5}
            }}}}"#,
        )
        .unwrap();
        let keys: Vec<_> = opts
            .optimization
            .split_chunks
            .cache_groups
            .keys()
            .cloned()
            .collect();
        assert_eq!(keys, vec!["zz", "aa"]);
        assert_eq!(opts.optimization.split_chunks.cache_groups["aa"].priority, 5);
        assert_eq!(opts.optimization.split_chunks.cache_groups["zz"].min_chunks, 1);
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("development".parse::<Mode>().unwrap(), Mode::Development);
        assert_eq!("prod".parse::<Mode>().unwrap(), Mode::Production);
        assert!("staging".parse::<Mode>().is_err());
    }
}
