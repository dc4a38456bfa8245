//! Transform chain engine.
//!
//! A unit's chain is the concatenation of the `use` lists of every rule whose
//! predicate matches it, grouped post, normal, pre, and then applied
//! back-to-front: the last declared loader runs first. This ordering is part
//! of the configuration contract and must not change.
//!
//! ```ignore
//! { "test": "\\.scss$", "use": ["style", "css", "sass"] }
//! // sass -> css -> style
//! ```

use super::scan::Dependency;
use super::unit::{ModuleType, SourceUnit, UnitId};
use crate::options::{Enforce, LoaderRef, Mode, RuleSet};
use plinth_util::hash::PartsHasher;
use rustc_hash::FxHashMap as HashMap;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Error type returned by loaders.
pub type LoaderError = Box<dyn std::error::Error + Send + Sync>;

/// A side artifact produced by a loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideArtifact {
    /// Output-relative file name, already hashed.
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Content flowing through a chain.
#[derive(Debug, Clone, Default)]
pub struct Transformed {
    pub content: Vec<u8>,
    pub module_type: ModuleType,
    /// Dependencies a loader reports in addition to what the scanner finds.
    pub dependencies: Vec<Dependency>,
    pub artifacts: Vec<SideArtifact>,
    /// Stylesheet text moved out of the module into the chunk's CSS file.
    pub extracted_css: Option<String>,
    /// CSS Modules class map.
    pub css_modules: Option<BTreeMap<String, String>>,
    /// URL importers should receive instead of the module (url loader).
    pub url: Option<String>,
}

impl Transformed {
    /// Initial chain input for a unit.
    #[must_use]
    pub fn from_unit(unit: &SourceUnit) -> Self {
        Self {
            content: unit.raw.to_vec(),
            module_type: unit.kind.initial_module_type(),
            ..Self::default()
        }
    }

    /// Content as UTF-8 text.
    ///
    /// # Errors
    /// Fails if the content is not valid UTF-8.
    pub fn text(&self) -> Result<&str, LoaderError> {
        std::str::from_utf8(&self.content).map_err(|e| format!("content is not UTF-8: {e}").into())
    }

    pub fn set_text(&mut self, text: String) {
        self.content = text.into_bytes();
    }
}

/// Build-wide values loaders may read.
#[derive(Debug, Clone)]
pub struct LoaderSettings {
    pub mode: Mode,
    /// Project root.
    pub root: PathBuf,
    /// Base directory of stable module ids.
    pub context: PathBuf,
    /// Identifier replacements for the `define` loader.
    pub define: BTreeMap<String, String>,
    pub public_path: String,
    pub asset_filename: String,
}

/// What a loader sees about the unit it transforms.
#[derive(Debug, Clone, Copy)]
pub struct LoaderContext<'a> {
    pub unit: &'a UnitId,
    pub settings: &'a LoaderSettings,
}

impl LoaderContext<'_> {
    /// Stable id of the unit, relative to the context directory.
    #[must_use]
    pub fn relative_id(&self) -> String {
        self.unit.relative_to(&self.settings.context)
    }
}

/// A transform step.
///
/// Loaders must be referentially transparent: the same input, options and
/// settings always give the same output, so results can be cached.
pub trait Loader: Send + Sync {
    /// Name used in `module.rules[].use`.
    fn name(&self) -> &str;

    /// Transform `input` with this loader's declared `options`.
    ///
    /// # Errors
    /// Any error aborts the whole unit.
    fn apply(
        &self,
        input: Transformed,
        options: &serde_json::Value,
        ctx: &LoaderContext<'_>,
    ) -> Result<Transformed, LoaderError>;
}

/// Loaders by name.
#[derive(Clone, Default)]
pub struct LoaderRegistry {
    loaders: HashMap<String, Arc<dyn Loader>>,
}

impl std::fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.loaders.keys().collect();
        names.sort();
        f.debug_struct("LoaderRegistry").field("loaders", &names).finish()
    }
}

impl LoaderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in loader.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        super::loaders::register_builtins(&mut registry);
        registry
    }

    /// Register a loader, replacing any loader with the same name.
    pub fn register(&mut self, loader: Arc<dyn Loader>) {
        self.loaders.insert(loader.name().to_string(), loader);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Loader>> {
        self.loaders.get(name).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.loaders.contains_key(name)
    }
}

/// One step of a resolved chain.
#[derive(Clone)]
pub struct ChainStep {
    /// Label of the rule that contributed the step.
    pub rule: String,
    pub loader: Arc<dyn Loader>,
    pub options: serde_json::Value,
}

impl std::fmt::Debug for ChainStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainStep")
            .field("rule", &self.rule)
            .field("loader", &self.loader.name())
            .field("options", &self.options)
            .finish()
    }
}

/// The loaders for a unit, in execution order.
#[derive(Debug, Clone, Default)]
pub struct Chain {
    pub steps: Vec<ChainStep>,
    /// `sideEffects` from the last matching rule that sets it.
    pub side_effects: Option<bool>,
}

impl Chain {
    /// Loader names in execution order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.loader.name()).collect()
    }
}

/// A failed transform step.
#[derive(Error, Debug)]
#[error("Transform of {unit} failed in loader '{step}' ({rule}): {cause}")]
pub struct TransformError {
    pub unit: UnitId,
    pub rule: String,
    pub step: String,
    #[source]
    pub cause: LoaderError,
}

/// Resolves and applies loader chains.
#[derive(Debug)]
pub struct TransformEngine {
    rules: RuleSet,
    registry: LoaderRegistry,
    settings: LoaderSettings,
    settings_fingerprint: String,
}

impl TransformEngine {
    #[must_use]
    pub fn new(rules: RuleSet, registry: LoaderRegistry, settings: LoaderSettings) -> Self {
        let mut hasher = PartsHasher::new();
        hasher
            .part(settings.mode.as_str().as_bytes())
            .part(settings.public_path.as_bytes())
            .part(settings.asset_filename.as_bytes())
            .part(settings.context.to_string_lossy().as_bytes());
        for (key, value) in &settings.define {
            hasher.part(key.as_bytes()).part(value.as_bytes());
        }
        let settings_fingerprint = hasher.finish_hex();
        Self {
            rules,
            registry,
            settings,
            settings_fingerprint,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &LoaderSettings {
        &self.settings
    }

    /// Determine the chain for a unit.
    ///
    /// Loader names are checked when the options are validated; a name that
    /// is still unknown here is skipped with a warning.
    #[must_use]
    pub fn chain_for(&self, unit: &UnitId) -> Chain {
        let path = unit.path_str();
        let query = unit.query.as_deref();
        let matched: Vec<_> = self.rules.matching(&path, query).collect();

        let mut declared: Vec<(&str, &LoaderRef)> = Vec::new();
        for phase in [Enforce::Post, Enforce::Normal, Enforce::Pre] {
            for rule in matched.iter().filter(|r| r.enforce == phase) {
                declared.extend(rule.uses.iter().map(|u| (rule.label.as_str(), u)));
            }
        }

        let steps = declared
            .into_iter()
            .rev()
            .filter_map(|(rule, loader_ref)| match self.registry.get(loader_ref.name()) {
                Some(loader) => Some(ChainStep {
                    rule: rule.to_string(),
                    loader,
                    options: loader_ref.options().clone(),
                }),
                None => {
                    tracing::warn!(loader = loader_ref.name(), rule, "unknown loader skipped");
                    None
                }
            })
            .collect();

        let side_effects = matched.iter().rev().find_map(|r| r.side_effects);

        Chain {
            steps,
            side_effects,
        }
    }

    /// Fingerprint of a chain plus build settings, for cache validation.
    #[must_use]
    pub fn chain_fingerprint(&self, chain: &Chain) -> String {
        let mut hasher = PartsHasher::new();
        hasher.part(self.settings_fingerprint.as_bytes());
        for step in &chain.steps {
            hasher
                .part(step.loader.name().as_bytes())
                .part(step.options.to_string().as_bytes());
        }
        hasher.finish_hex()
    }

    /// Run a unit through its chain.
    ///
    /// With no matching rule the unit passes through unchanged.
    ///
    /// # Errors
    /// Returns [`TransformError`] naming the failed step; no partial output
    /// is returned.
    pub fn apply(&self, unit: &SourceUnit, chain: &Chain) -> Result<Transformed, TransformError> {
        let ctx = LoaderContext {
            unit: &unit.id,
            settings: &self.settings,
        };
        let mut current = Transformed::from_unit(unit);
        for step in &chain.steps {
            tracing::trace!(unit = %unit.id, loader = step.loader.name(), "apply loader");
            current = step
                .loader
                .apply(current, &step.options, &ctx)
                .map_err(|cause| TransformError {
                    unit: unit.id.clone(),
                    rule: step.rule.clone(),
                    step: step.loader.name().to_string(),
                    cause,
                })?;
        }
        Ok(current)
    }

    /// Resolve the chain for a unit and apply it.
    ///
    /// # Errors
    /// See [`TransformEngine::apply`].
    pub fn transform(&self, unit: &SourceUnit) -> Result<Transformed, TransformError> {
        let chain = self.chain_for(&unit.id);
        self.apply(unit, &chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::RuleOptions;

    /// Appends its name to the content.
    struct Tag(&'static str);

    impl Loader for Tag {
        fn name(&self) -> &str {
            self.0
        }

        fn apply(
            &self,
            mut input: Transformed,
            options: &serde_json::Value,
            _ctx: &LoaderContext<'_>,
        ) -> Result<Transformed, LoaderError> {
            let mut text = input.text()?.to_string();
            text.push_str(&format!("|{}", self.0));
            if let Some(suffix) = options.get("suffix").and_then(|v| v.as_str()) {
                text.push_str(suffix);
            }
            input.set_text(text);
            Ok(input)
        }
    }

    struct Fail;

    impl Loader for Fail {
        fn name(&self) -> &str {
            "fail"
        }

        fn apply(
            &self,
            _input: Transformed,
            _options: &serde_json::Value,
            _ctx: &LoaderContext<'_>,
        ) -> Result<Transformed, LoaderError> {
            Err("boom".into())
        }
    }

    fn settings() -> LoaderSettings {
        LoaderSettings {
            mode: Mode::Production,
            root: PathBuf::from("/app"),
            context: PathBuf::from("/app"),
            define: BTreeMap::new(),
            public_path: "/".to_string(),
            asset_filename: "[name][ext]".to_string(),
        }
    }

    fn engine(rules_json: &str) -> TransformEngine {
        let rules: Vec<RuleOptions> = serde_json::from_str(rules_json).unwrap();
        let mut registry = LoaderRegistry::new();
        for name in ["minify", "compile", "a", "b", "pre", "post"] {
            registry.register(Arc::new(Tag(name)));
        }
        registry.register(Arc::new(Fail));
        TransformEngine::new(RuleSet::compile(&rules).unwrap(), registry, settings())
    }

    fn unit(path: &str, content: &str) -> SourceUnit {
        SourceUnit::from_bytes(UnitId::new(path, None), content.as_bytes().to_vec())
    }

    fn run(e: &TransformEngine, u: &SourceUnit) -> String {
        String::from_utf8(e.transform(u).unwrap().content).unwrap()
    }

    #[test]
    fn test_reverse_declared_order() {
        let e = engine(r#"[{"test": "\\.js$", "use": ["minify", "compile"]}]"#);
        assert_eq!(run(&e, &unit("/app/a.js", "src")), "src|compile|minify");
    }

    #[test]
    fn test_later_rules_run_first_and_enforce_phases() {
        let e = engine(
            r#"[
                {"test": "\\.js$", "use": ["a"]},
                {"test": "\\.js$", "use": ["post"], "enforce": "post"},
                {"test": "\\.js$", "use": ["b"]},
                {"test": "\\.js$", "use": ["pre"], "enforce": "pre"}
            ]"#,
        );
        assert_eq!(run(&e, &unit("/app/a.js", "s")), "s|pre|b|a|post");
    }

    #[test]
    fn test_no_matching_rule_passes_through() {
        let e = engine(r#"[{"test": "\\.css$", "use": ["a"]}]"#);
        let u = unit("/app/a.js", "export const x = 1;\n");
        let out = e.transform(&u).unwrap();
        assert_eq!(out.content, u.raw.to_vec());
        assert_eq!(out.module_type, ModuleType::Script);
        assert!(e.chain_for(&u.id).steps.is_empty());
    }

    #[test]
    fn test_options_threaded_to_step() {
        let e = engine(r#"[{"test": "\\.js$", "use": [{"loader": "a", "options": {"suffix": "!"}}]}]"#);
        assert_eq!(run(&e, &unit("/app/a.js", "s")), "s|a!");
    }

    #[test]
    fn test_error_names_unit_rule_and_step() {
        let e = engine(r#"[{"test": "\\.js$", "use": ["a", "fail"]}]"#);
        let err = e.transform(&unit("/app/a.js", "s")).unwrap_err();
        assert_eq!(err.step, "fail");
        assert_eq!(err.rule, "rules[0] \\.js$");
        assert_eq!(err.unit.path, PathBuf::from("/app/a.js"));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_side_effects_last_rule_wins() {
        let e = engine(
            r#"[
                {"test": "\\.js$", "sideEffects": true},
                {"test": "lib", "sideEffects": false},
                {"test": "\\.js$"}
            ]"#,
        );
        assert_eq!(
            e.chain_for(&UnitId::new("/app/lib/a.js", None)).side_effects,
            Some(false)
        );
        assert_eq!(
            e.chain_for(&UnitId::new("/app/src/a.js", None)).side_effects,
            Some(true)
        );
    }

    #[test]
    fn test_fingerprint_depends_on_options() {
        let e1 = engine(r#"[{"test": "\\.js$", "use": [{"loader": "a", "options": {"x": 1}}]}]"#);
        let e2 = engine(r#"[{"test": "\\.js$", "use": [{"loader": "a", "options": {"x": 2}}]}]"#);
        let id = UnitId::new("/app/a.js", None);
        assert_ne!(
            e1.chain_fingerprint(&e1.chain_for(&id)),
            e2.chain_fingerprint(&e2.chain_for(&id))
        );
        assert_eq!(
            e1.chain_fingerprint(&e1.chain_for(&id)),
            e1.chain_fingerprint(&e1.chain_for(&id))
        );
    }
}
