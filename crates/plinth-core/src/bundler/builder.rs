//! Dependency graph builder.
//!
//! Traversal is level-synchronous: every unit of the current frontier is
//! read, transformed and scanned on the rayon pool, then a single
//! coordinator walks the results in frontier order and claims newly
//! discovered identities. Claiming happens in one place, so each identity is
//! transformed at most once per build, and the claim order (and therefore
//! every module index) is independent of thread scheduling.

use super::cache::{cache_key, ProcessedUnit, TransformCache};
use super::graph::{merge_edges, AssetFile, ModuleGraph, ModuleIndex, ModuleNode, Target};
use super::loader::{Chain, LoaderError, TransformEngine, TransformError, Transformed};
use super::resolve::{Resolution, Resolver};
use super::scan::{scan_script, scan_style, Dependency};
use super::template::{render, TemplateVars};
use super::unit::{ModuleType, SourceUnit, UnitId};
use crate::error::BuildError;
use plinth_util::hash::blake3_bytes;
use rayon::prelude::*;
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Counters reported after a graph build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BuildStats {
    /// Modules in the graph.
    pub modules: usize,
    /// Units run through their loader chain.
    pub transformed: usize,
    /// Units served from the transform cache.
    pub reused: usize,
}

/// Walks entries into a [`ModuleGraph`].
pub struct GraphBuilder<'a> {
    resolver: &'a Resolver,
    engine: &'a TransformEngine,
}

/// Everything the coordinator needs about one visited unit.
struct Visited {
    id: UnitId,
    processed: Arc<ProcessedUnit>,
    key: String,
    fresh: bool,
    side_effects: bool,
    resolutions: Vec<(Dependency, Resolution)>,
}

impl<'a> GraphBuilder<'a> {
    #[must_use]
    pub fn new(resolver: &'a Resolver, engine: &'a TransformEngine) -> Self {
        Self { resolver, engine }
    }

    /// Build the graph for `entries` (name, specifiers), resolved against the
    /// context directory.
    ///
    /// Cache entries whose key still matches are reused; fresh results are
    /// stored back and units no longer reachable are evicted.
    ///
    /// # Errors
    /// The first resolution or transform failure in discovery order.
    pub fn build(
        &self,
        entries: &[(String, Vec<String>)],
        cache: &mut TransformCache,
    ) -> Result<(ModuleGraph, BuildStats), BuildError> {
        let settings = self.engine.settings();
        let context = settings.context.as_path();
        let mut graph = ModuleGraph::new();
        let mut claimed: HashMap<UnitId, ModuleIndex> = HashMap::default();
        let mut frontier: Vec<UnitId> = Vec::new();
        let mut stats = BuildStats::default();

        for (name, specifiers) in entries {
            let mut modules = Vec::new();
            for specifier in specifiers {
                let resolution = self.resolver.resolve(specifier, context).map_err(|mut e| {
                    e.from = format!("entry '{name}'");
                    e
                })?;
                match resolution {
                    Resolution::Found(id) => {
                        let idx = claim(&mut claimed, &mut frontier, id);
                        if !modules.contains(&idx) {
                            modules.push(idx);
                        }
                    }
                    Resolution::External(ext) => {
                        tracing::warn!(entry = %name, external = %ext, "external entry ignored");
                    }
                }
            }
            graph.add_entry(name.clone(), modules);
        }

        while !frontier.is_empty() {
            tracing::trace!(units = frontier.len(), "processing frontier");
            let shared_cache: &TransformCache = cache;
            let results: Vec<Result<Visited, BuildError>> = frontier
                .par_iter()
                .map(|id| self.visit(id, shared_cache))
                .collect();

            let mut next = Vec::new();
            for visited in results {
                let visited = visited?;
                let idx = graph.len();
                debug_assert_eq!(claimed.get(&visited.id), Some(&idx));

                let mut resolved = Vec::new();
                let mut externals = Vec::new();
                for (dep, resolution) in visited.resolutions {
                    match resolution {
                        Resolution::Found(target) => {
                            let t = claim(&mut claimed, &mut next, target);
                            graph.set_specifier(idx, dep.specifier.clone(), Target::Module(t));
                            resolved.push((t, dep));
                        }
                        Resolution::External(name) => {
                            graph.set_specifier(idx, dep.specifier.clone(), Target::External(name.clone()));
                            if !externals.contains(&name) {
                                externals.push(name);
                            }
                        }
                    }
                }

                if visited.fresh {
                    stats.transformed += 1;
                    cache.insert(visited.id.clone(), visited.key, Arc::clone(&visited.processed));
                } else {
                    stats.reused += 1;
                }

                let asset = (visited.processed.output.module_type == ModuleType::Asset)
                    .then(|| self.asset_file(&visited.id, &visited.processed.output));
                graph.add(ModuleNode {
                    module_id: visited.id.relative_to(context),
                    kind: visited.id.kind(),
                    edges: merge_edges(resolved),
                    externals,
                    side_effects: visited.side_effects,
                    asset,
                    processed: visited.processed,
                    id: visited.id,
                });
            }
            frontier = next;
        }

        let live: HashSet<UnitId> = graph.nodes().iter().map(|n| n.id.clone()).collect();
        cache.retain(&live);
        stats.modules = graph.len();
        tracing::debug!(
            modules = stats.modules,
            transformed = stats.transformed,
            reused = stats.reused,
            "module graph built"
        );
        Ok((graph, stats))
    }

    /// Read, transform (or reuse), scan and resolve one unit.
    fn visit(&self, id: &UnitId, cache: &TransformCache) -> Result<Visited, BuildError> {
        let chain = self.engine.chain_for(id);
        let fingerprint = self.engine.chain_fingerprint(&chain);
        let unit = SourceUnit::read(id.clone())
            .map_err(|e| step_error(id, "source", "read", Box::new(e)))?;
        let key = cache_key(&unit.raw, &fingerprint);

        let (processed, fresh) = match cache.get(id, &key) {
            Some(hit) => (hit, false),
            None => {
                let output = self.engine.apply(&unit, &chain)?;
                let processed = scan(output).map_err(|cause| {
                    let rule = chain.steps.last().map_or("none", |s| s.rule.as_str());
                    step_error(id, rule, "scan", cause)
                })?;
                (Arc::new(processed), true)
            }
        };

        let from_dir = id.path.parent().unwrap_or_else(|| Path::new("/"));
        let mut resolutions = Vec::with_capacity(processed.dependencies.len());
        for dep in &processed.dependencies {
            // A repeated specifier resolves the same way; keep its binding.
            let known = resolutions
                .iter()
                .find(|(d, _): &&(Dependency, Resolution)| d.specifier == dep.specifier)
                .map(|(_, r)| r.clone());
            let resolution = match known {
                Some(resolution) => resolution,
                None => self.resolver.resolve(&dep.specifier, from_dir).map_err(|mut e| {
                    e.from = id.relative_to(&self.engine.settings().context);
                    e
                })?,
            };
            resolutions.push((dep.clone(), resolution));
        }

        Ok(Visited {
            side_effects: side_effects(self.resolver, id, &chain),
            id: id.clone(),
            processed,
            key,
            fresh,
            resolutions,
        })
    }

    fn asset_file(&self, id: &UnitId, output: &Transformed) -> AssetFile {
        let settings = self.engine.settings();
        let hash = blake3_bytes(&output.content);
        let stem = id.stem();
        let ext = id.ext();
        let name = render(
            &settings.asset_filename,
            &TemplateVars {
                name: &stem,
                ext: &ext,
                content_hash: &hash,
                ..TemplateVars::default()
            },
        );
        AssetFile {
            url: format!("{}{name}", settings.public_path),
            name,
        }
    }
}

fn claim(claimed: &mut HashMap<UnitId, ModuleIndex>, queue: &mut Vec<UnitId>, id: UnitId) -> ModuleIndex {
    if let Some(&idx) = claimed.get(&id) {
        return idx;
    }
    let idx = claimed.len();
    claimed.insert(id.clone(), idx);
    queue.push(id);
    idx
}

/// Rule override, then the package's `sideEffects`, then `true`.
fn side_effects(resolver: &Resolver, id: &UnitId, chain: &Chain) -> bool {
    chain
        .side_effects
        .or_else(|| {
            resolver
                .package_info(&id.path)
                .and_then(|pkg| pkg.side_effects_for(&id.path))
        })
        .unwrap_or(true)
}

fn step_error(id: &UnitId, rule: &str, step: &str, cause: LoaderError) -> BuildError {
    BuildError::Transform(TransformError {
        unit: id.clone(),
        rule: rule.to_string(),
        step: step.to_string(),
        cause,
    })
}

/// Discover dependencies, sites and exports in a chain's output.
fn scan(output: Transformed) -> Result<ProcessedUnit, LoaderError> {
    let (mut dependencies, sites, exports) = match output.module_type {
        ModuleType::Script => {
            let scanned = scan_script(output.text()?);
            (scanned.dependencies(), scanned.sites.clone(), scanned.exports())
        }
        ModuleType::Style => (scan_style(output.text()?).dependencies(), Vec::new(), Vec::new()),
        ModuleType::Asset => (Vec::new(), Vec::new(), Vec::new()),
    };
    dependencies.extend(output.dependencies.iter().cloned());
    Ok(ProcessedUnit {
        output,
        dependencies,
        sites,
        exports,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::loader::{LoaderRegistry, LoaderSettings};
    use crate::options::{Mode, ResolveOptions, RuleOptions, RuleSet};
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::tempdir;

    fn engine(root: &Path, rules: &[RuleOptions]) -> TransformEngine {
        TransformEngine::new(
            RuleSet::compile(rules).unwrap(),
            LoaderRegistry::with_builtins(),
            LoaderSettings {
                mode: Mode::Development,
                root: root.to_path_buf(),
                context: root.to_path_buf(),
                define: BTreeMap::new(),
                public_path: "/".to_string(),
                asset_filename: "assets/[name].[hash:8][ext]".to_string(),
            },
        )
    }

    fn build(root: &Path, cache: &mut TransformCache) -> Result<(ModuleGraph, BuildStats), BuildError> {
        let resolver = Resolver::new(root, &ResolveOptions::default(), &["react".to_string()]);
        let engine = engine(root, &[]);
        GraphBuilder::new(&resolver, &engine)
            .build(&[("main".to_string(), vec!["./a.js".to_string()])], cache)
    }

    #[test]
    fn test_builds_graph_and_visits_once() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        fs::write(root.join("a.js"), "import b from './b';\nimport c from './c';\n").unwrap();
        fs::write(root.join("b.js"), "import c from './c';\nexport default 1;\n").unwrap();
        fs::write(root.join("c.js"), "import React from 'react';\nexport default 2;\n").unwrap();

        let mut cache = TransformCache::new();
        let (graph, stats) = build(&root, &mut cache).unwrap();
        assert_eq!(graph.len(), 3);
        assert_eq!(stats.transformed, 3);
        assert_eq!(graph.get(0).module_id, "./a.js");
        assert_eq!(graph.get(1).module_id, "./b.js");
        assert_eq!(graph.get(2).externals, vec!["react".to_string()]);
        assert_eq!(
            graph.resolve_specifier(0, "./c"),
            Some(&Target::Module(2))
        );

        let (_, again) = build(&root, &mut cache).unwrap();
        assert_eq!(again.transformed, 0);
        assert_eq!(again.reused, 3);
    }

    #[test]
    fn test_cycle_terminates() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        fs::write(root.join("a.js"), "import './b';\n").unwrap();
        fs::write(root.join("b.js"), "import './a';\n").unwrap();

        let (graph, stats) = build(&root, &mut TransformCache::new()).unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(stats.transformed, 2);
        assert_eq!(graph.get(1).edges[0].target, 0);
    }

    #[test]
    fn test_resolution_error_names_importer() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        fs::write(root.join("a.js"), "import './missing';\n").unwrap();

        let err = build(&root, &mut TransformCache::new()).unwrap_err();
        assert_eq!(err.code(), "RESOLUTION_ERROR");
        assert_eq!(err.unit().as_deref(), Some("./a.js"));
    }

    #[test]
    fn test_changed_content_is_retransformed() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        fs::write(root.join("a.js"), "import './b';\n").unwrap();
        fs::write(root.join("b.js"), "export const x = 1;\n").unwrap();

        let mut cache = TransformCache::new();
        build(&root, &mut cache).unwrap();
        fs::write(root.join("b.js"), "export const x = 2;\n").unwrap();
        let (_, stats) = build(&root, &mut cache).unwrap();
        assert_eq!(stats.transformed, 1);
        assert_eq!(stats.reused, 1);
    }
}
