//! Asset pipeline.
//!
//! ## Usage
//!
//! ```ignore
//! use plinth_core::{Mode, Pipeline, PlinthOptions};
//!
//! let pipeline = Pipeline::new(root, PlinthOptions::with_entry("./index.js"), Mode::Production)?;
//! let output = pipeline.build()?;
//! output.write(&pipeline.output_dir(), pipeline.clean())?;
//! ```
//!
//! ## Architecture
//!
//! 1. **Resolution** - specifiers to unit identities ([`resolve`])
//! 2. **Transform** - loader chains, last declared first ([`loader`])
//! 3. **Graph** - concurrent traversal from the entries ([`builder`])
//! 4. **Chunks** - entry, cache group, shared, async and runtime chunks ([`chunks`])
//! 5. **Emit** - render, optimize, then hash and name ([`emit`], [`optimize`])
//! 6. **Document** - HTML and `manifest.json` ([`html`], [`manifest`])

pub mod builder;
pub mod cache;
pub mod chunks;
pub mod emit;
pub mod graph;
pub mod html;
pub mod lexer;
pub mod loader;
pub mod loaders;
pub mod manifest;
pub mod optimize;
pub mod output;
pub mod resolve;
pub mod runtime;
pub mod scan;
pub mod template;
pub mod treeshake;
pub mod unit;

pub use builder::{BuildStats, GraphBuilder};
pub use cache::TransformCache;
pub use chunks::{ChunkGraph, PartitionError, Partitioner};
pub use emit::{Artifact, ArtifactKind};
pub use graph::ModuleGraph;
pub use loader::{Loader, LoaderRegistry, TransformEngine, TransformError};
pub use manifest::{Manifest, MANIFEST_FILE};
pub use optimize::{OptimizeError, OptimizeOptions, OptimizeStats, Optimizer};
pub use output::EmitError;
pub use resolve::{ResolveError, Resolver};
pub use unit::UnitId;

use crate::error::{BuildError, Error};
use crate::options::{Mode, PlinthOptions, RuleSet};
use emit::{EmitOptions, Emitted};
use loader::LoaderSettings;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

/// Identifier the pipeline always defines for the build mode.
pub const NODE_ENV_DEFINE: &str = "process.env.NODE_ENV";

/// Counters for one pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    #[serde(flatten)]
    pub graph: BuildStats,
    pub chunks: usize,
    /// Modules dropped by dead-code elimination.
    pub shaken: usize,
    pub artifacts: usize,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimize: Option<OptimizeStats>,
}

/// Result of a successful build, held in memory.
#[derive(Debug)]
pub struct BuildOutput {
    pub mode: Mode,
    pub artifacts: Vec<Artifact>,
    pub manifest: Manifest,
    pub stats: PipelineStats,
    pub warnings: Vec<String>,
    /// Graph the artifacts were produced from, for incremental rebuilds.
    pub graph: ModuleGraph,
}

impl BuildOutput {
    /// Artifact by output-relative name.
    #[must_use]
    pub fn artifact(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.name == name)
    }

    /// Write every artifact under `out_dir`.
    ///
    /// # Errors
    /// See [`output::write_artifacts`].
    pub fn write(&self, out_dir: &Path, clean: bool) -> Result<(), EmitError> {
        output::write_artifacts(out_dir, &self.artifacts, clean)
    }
}

/// Reject an output directory that is, or contains, the project root or
/// the context.
fn check_output_dir(root: &Path, context: &Path, path: &Path) -> Result<(), Error> {
    let out = root.join(path);
    let out = dunce::canonicalize(&out).unwrap_or_else(|_| plinth_util::fs::normalize_lexically(&out));
    if root.starts_with(&out) || context.starts_with(&out) {
        return Err(Error::invalid(format!(
            "output.path '{}' must not be the project root, the context or one of their parents",
            path.display()
        )));
    }
    Ok(())
}

/// A configured build: options validated, rules compiled, loaders bound.
#[derive(Debug)]
pub struct Pipeline {
    root: PathBuf,
    options: PlinthOptions,
    mode: Mode,
    engine: TransformEngine,
    cancel: Arc<AtomicBool>,
}

impl Pipeline {
    /// Pipeline with the built-in loaders.
    ///
    /// # Errors
    /// Invalid options.
    pub fn new(root: impl Into<PathBuf>, options: PlinthOptions, mode: Mode) -> Result<Self, Error> {
        Self::with_registry(root, options, mode, LoaderRegistry::with_builtins())
    }

    /// Pipeline with a custom loader registry.
    ///
    /// # Errors
    /// Invalid options, including loader names missing from `registry`.
    pub fn with_registry(
        root: impl Into<PathBuf>,
        mut options: PlinthOptions,
        mode: Mode,
        registry: LoaderRegistry,
    ) -> Result<Self, Error> {
        let root = root.into();
        let root = dunce::canonicalize(&root).unwrap_or(root);
        options.validate(|name| registry.contains(name))?;
        options
            .define
            .entry(NODE_ENV_DEFINE.to_string())
            .or_insert_with(|| format!("\"{}\"", mode.as_str()));

        let context = root.join(&options.context);
        let context = dunce::canonicalize(&context).unwrap_or(context);
        check_output_dir(&root, &context, &options.output.path)?;
        let rules = RuleSet::compile(&options.module.rules)?;
        let settings = LoaderSettings {
            mode,
            root: root.clone(),
            context,
            define: options.define.clone(),
            public_path: options.output.public_path_for(mode),
            asset_filename: options.output.asset_filename.clone(),
        };
        let engine = TransformEngine::new(rules, registry, settings);
        tracing::debug!(root = %root.display(), %mode, "pipeline configured");

        Ok(Self {
            root,
            options,
            mode,
            engine,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    pub fn options(&self) -> &PlinthOptions {
        &self.options
    }

    /// Absolute output directory.
    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.root.join(&self.options.output.path)
    }

    /// Whether the output directory is emptied before writing.
    #[must_use]
    pub fn clean(&self) -> bool {
        self.options.output.clean
    }

    /// Flag that cancels the optimization pass at the next artifact.
    #[must_use]
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Full build with an empty cache.
    ///
    /// # Errors
    /// Any [`BuildError`].
    pub fn build(&self) -> Result<BuildOutput, BuildError> {
        self.build_with_cache(&mut TransformCache::new())
    }

    /// Build reusing `cache`; units whose content and chain are unchanged
    /// are not transformed again.
    ///
    /// # Errors
    /// Any [`BuildError`]. Nothing is emitted on failure.
    pub fn build_with_cache(&self, cache: &mut TransformCache) -> Result<BuildOutput, BuildError> {
        let started = Instant::now();
        let minimize = self.options.minimize_for(self.mode);

        // Resolution results may change between dev generations.
        let resolver = Resolver::new(&self.root, &self.options.resolve, &self.options.externals);
        let (graph, graph_stats) =
            GraphBuilder::new(&resolver, &self.engine).build(&self.options.entries(), cache)?;

        let partitioner = Partitioner::new(
            &self.options.optimization.split_chunks,
            self.options.optimization.runtime_chunk,
        )?;
        let chunks = partitioner.partition(&graph)?;

        let shake = if minimize {
            treeshake::shake(&graph)
        } else {
            treeshake::ShakeResult::keep_all(graph.len())
        };

        let emit_options = self.emit_options();
        let mut rendered = emit::render(&graph, &chunks, &shake, &emit_options);

        let optimizer = minimize.then(|| self.optimizer());
        let optimize_stats = match &optimizer {
            Some(optimizer) => Some(optimizer.run(&mut rendered)?),
            None => None,
        };
        let emitted = emit::finalize(rendered, &chunks, &emit_options, optimizer.as_ref())?;

        let manifest = Manifest::new(&emitted, &chunks.summary(&graph), &emit_options.public_path);
        let artifacts = self.document_artifacts(emitted, &manifest, optimizer.as_ref())?;

        let mut warnings = Vec::new();
        if let Some(optimizer) = &optimizer {
            warnings.extend(optimizer.take_warnings());
        }

        let stats = PipelineStats {
            graph: graph_stats,
            chunks: chunks.chunks().len(),
            shaken: shake.removed_count(),
            artifacts: artifacts.len(),
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            optimize: optimize_stats,
        };
        tracing::info!(
            mode = %self.mode,
            modules = stats.graph.modules,
            transformed = stats.graph.transformed,
            reused = stats.graph.reused,
            chunks = stats.chunks,
            artifacts = stats.artifacts,
            "build finished in {}ms",
            stats.duration_ms
        );

        Ok(BuildOutput {
            mode: self.mode,
            artifacts,
            manifest,
            stats,
            warnings,
            graph,
        })
    }

    fn emit_options(&self) -> EmitOptions {
        let output = &self.options.output;
        EmitOptions {
            filename: output.filename_for(self.mode),
            chunk_filename: output.chunk_filename_for(self.mode),
            css_filename: output.css_filename_for(self.mode),
            css_chunk_filename: output.css_chunk_filename_for(self.mode),
            public_path: output.public_path_for(self.mode),
            devtool: self.options.devtool_for(self.mode),
        }
    }

    fn optimizer(&self) -> Optimizer {
        let opts = &self.options.optimization;
        let optimizer = Optimizer::new(OptimizeOptions {
            warn_only: opts.warn_only,
            image_quality: opts.image_quality.clamp(1, 100),
            preserve_license_comments: opts.preserve_license_comments,
        });
        optimizer.share_cancel(Arc::clone(&self.cancel))
    }

    /// Emitted files plus copies, the HTML document and the manifest.
    fn document_artifacts(
        &self,
        emitted: Emitted,
        manifest: &Manifest,
        optimizer: Option<&Optimizer>,
    ) -> Result<Vec<Artifact>, BuildError> {
        let mut artifacts = emitted.artifacts;
        artifacts.extend(output::collect_copies(&self.root, &self.options.copy)?);

        if let Some(html) = &self.options.html {
            let template = match &html.template {
                Some(path) => {
                    let path = self.root.join(path);
                    let text = plinth_util::fs::read_to_string_lossy(&path)
                        .map_err(|source| Error::ConfigRead { path, source })?;
                    Some(text)
                }
                None => None,
            };
            let mut document = html::render_html(
                template.as_deref(),
                &html.title,
                html.inject,
                &emitted.entrypoints,
                &manifest.public_path,
            );
            if html.minify.unwrap_or(self.mode.is_production()) {
                document = match optimizer {
                    Some(optimizer) => optimizer.html(&html.filename, &document)?,
                    None => optimize::minify_html(&document),
                };
            }
            artifacts.push(Artifact::new(html.filename.clone(), ArtifactKind::Html, document));
        }

        artifacts.push(Artifact::new(MANIFEST_FILE, ArtifactKind::Manifest, manifest.to_json()));
        Ok(artifacts)
    }
}
