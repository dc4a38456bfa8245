//! Artifact emission.
//!
//! Emission runs in two phases so the optimization pass can sit between
//! them and hashes are taken over the final bytes:
//!
//! 1. [`render`] serializes every chunk: module factories keyed by stable
//!    ids, with import/export sites rewritten into registry calls, plus the
//!    chunk's merged stylesheet and the files of its asset modules.
//! 2. [`finalize`] hashes the rendered bytes, names every artifact from its
//!    template, and builds the runtime chunks last since they embed the
//!    names of every loadable chunk.

use super::chunks::{ChunkGraph, ChunkId, ChunkKind};
use super::graph::{ModuleGraph, ModuleIndex, ModuleNode, Target};
use super::loaders::js_string;
use super::optimize::{OptimizeError, Optimizer};
use super::runtime::{runtime_source, CHUNK_QUEUE, IDENT_PREFIX, REQUIRE};
use super::scan::{is_bundlable_url, scan_style, SiteKind};
use super::template::{render as render_template, TemplateVars};
use super::treeshake::ShakeResult;
use super::unit::ModuleType;
use crate::options::Devtool;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use indexmap::IndexMap;
use plinth_util::hash::{blake3_bytes, PartsHasher};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::ops::Range;

/// What an output file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    Script,
    Style,
    Asset,
    SourceMap,
    Html,
    Manifest,
    /// Copied verbatim by a `copy` pattern.
    Static,
}

/// An output file, held in memory until written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Path relative to the output directory, `/`-separated.
    pub name: String,
    pub kind: ArtifactKind,
    pub bytes: Vec<u8>,
}

impl Artifact {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ArtifactKind, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            kind,
            bytes: bytes.into(),
        }
    }
}

/// Naming and source map settings.
#[derive(Debug, Clone)]
pub struct EmitOptions {
    pub filename: String,
    pub chunk_filename: String,
    pub css_filename: String,
    pub css_chunk_filename: String,
    pub public_path: String,
    pub devtool: Devtool,
}

/// A chunk serialized but not yet named.
#[derive(Debug, Clone)]
pub struct RenderedChunk {
    pub chunk: ChunkId,
    pub name: String,
    pub kind: ChunkKind,
    pub js: String,
    pub css: Option<String>,
    map: Option<SourceMapBuilder>,
}

impl RenderedChunk {
    /// Whether a line-level source map tracks this chunk.
    #[must_use]
    pub fn has_source_map(&self) -> bool {
        self.map.is_some()
    }
}

/// A file emitted for an asset module or by a loader.
#[derive(Debug, Clone)]
pub struct RenderedAsset {
    /// Id of the module that produced it.
    pub module: String,
    pub bytes: Vec<u8>,
}

/// Output of [`render`].
#[derive(Debug, Clone, Default)]
pub struct Rendered {
    pub chunks: Vec<RenderedChunk>,
    /// Asset files by output name.
    pub assets: IndexMap<String, RenderedAsset>,
}

/// Files emitted for one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkFiles {
    pub kind: ChunkKind,
    pub js: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub css: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map: Option<String>,
}

/// Files one entry loads, in load order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntryFiles {
    pub js: Vec<String>,
    pub css: Vec<String>,
}

/// Output of [`finalize`].
#[derive(Debug, Clone, Default)]
pub struct Emitted {
    pub artifacts: Vec<Artifact>,
    /// Chunk name to its files, in chunk order.
    pub chunks: IndexMap<String, ChunkFiles>,
    pub entrypoints: IndexMap<String, EntryFiles>,
    /// Module id to emitted asset file.
    pub assets: BTreeMap<String, String>,
}

// =============================================================================
// Render
// =============================================================================

/// Serialize every non-runtime chunk.
#[must_use]
pub fn render(
    graph: &ModuleGraph,
    chunks: &ChunkGraph,
    shake: &ShakeResult,
    options: &EmitOptions,
) -> Rendered {
    let mut rendered = Rendered::default();
    for chunk in chunks.chunks() {
        if chunk.kind == ChunkKind::Runtime {
            continue;
        }
        let modules: Vec<ModuleIndex> = chunk
            .modules
            .iter()
            .copied()
            .filter(|&m| !shake.is_removed(m))
            .collect();

        let mut map = (options.devtool != Devtool::None).then(SourceMapBuilder::new);
        let mut js = format!(
            "(self.{CHUNK_QUEUE} = self.{CHUNK_QUEUE} || []).push([[{}], {{\n",
            js_string(&chunk.name)
        );
        let mut line = 1u32;
        for &m in &modules {
            let node = graph.get(m);
            let code = module_code(graph, chunks, shake, m);
            let _ = writeln!(
                js,
                "{}: function (module, exports, {REQUIRE}) {{{}",
                js_string(&node.module_id),
                code.header
            );
            line += 1;
            if let Some(map) = map.as_mut() {
                if node.module_type() == ModuleType::Script {
                    let original = node.processed.output.text().unwrap_or_default();
                    let source = map.add_source(&node.module_id, original);
                    for l in 0..line_count(&code.body) {
                        map.add_line_mapping(line + l, source, l);
                    }
                }
            }
            js.push_str(&code.body);
            line += count_newlines(&code.body);
            if !code.body.ends_with('\n') {
                js.push('\n');
                line += 1;
            }
            js.push_str("},\n");
            line += 1;

            for (name, bytes) in asset_files(node) {
                rendered.assets.entry(name).or_insert_with(|| RenderedAsset {
                    module: node.module_id.clone(),
                    bytes,
                });
            }
        }
        js.push('}');
        // Split points of async chunks run when imported, not on load.
        if chunk.kind == ChunkKind::Entry {
            let ids: Vec<String> = chunk
                .entry_modules
                .iter()
                .map(|&m| js_string(&graph.get(m).module_id))
                .collect();
            let requires: Vec<String> = chunk
                .requires
                .iter()
                .map(|&c| js_string(&chunks.get(c).name))
                .collect();
            let _ = write!(js, ", [{}], [{}]", ids.join(", "), requires.join(", "));
        }
        js.push_str("]);\n");

        let css_template = if chunk.kind == ChunkKind::Entry {
            &options.css_filename
        } else {
            &options.css_chunk_filename
        };
        let css_dir = parent_dir(&render_template(
            css_template,
            &TemplateVars {
                name: &chunk.name,
                ext: ".css",
                content_hash: "",
                ..TemplateVars::default()
            },
        ));
        let sheets: Vec<String> = modules
            .iter()
            .filter_map(|&m| {
                let css = graph.get(m).stylesheet()?;
                Some(rewrite_css(graph, m, css, &css_dir, &options.public_path))
            })
            .collect();
        let css = (!sheets.is_empty()).then(|| sheets.join("\n"));

        rendered.chunks.push(RenderedChunk {
            chunk: chunk.id,
            name: chunk.name.clone(),
            kind: chunk.kind,
            js,
            css,
            map,
        });
    }
    rendered
}

/// Files a module contributes besides its code.
fn asset_files(node: &ModuleNode) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<(String, Vec<u8>)> = node
        .processed
        .output
        .artifacts
        .iter()
        .map(|a| (a.name.clone(), a.bytes.clone()))
        .collect();
    if let Some(asset) = &node.asset {
        files.push((asset.name.clone(), node.processed.output.content.clone()));
    }
    files
}

struct ModuleCode {
    /// Appended to the factory's opening line.
    header: String,
    body: String,
}

fn module_code(
    graph: &ModuleGraph,
    chunks: &ChunkGraph,
    shake: &ShakeResult,
    idx: ModuleIndex,
) -> ModuleCode {
    let node = graph.get(idx);
    match node.module_type() {
        ModuleType::Script => script_code(graph, chunks, shake, idx),
        ModuleType::Style => ModuleCode {
            header: String::new(),
            body: format!(
                "module.exports = {};\n",
                node.processed
                    .output
                    .css_modules
                    .as_ref()
                    .and_then(|m| serde_json::to_string(m).ok())
                    .unwrap_or_else(|| "{}".to_string())
            ),
        },
        ModuleType::Asset => ModuleCode {
            header: String::new(),
            body: format!("module.exports = {};\n", js_string(node.public_url().unwrap_or_default())),
        },
    }
}

/// Rewrite a script's import/export sites into registry calls.
///
/// Every replacement keeps the line count of the text it replaces so the
/// body lines up with the loader output for source maps.
fn script_code(
    graph: &ModuleGraph,
    chunks: &ChunkGraph,
    shake: &ShakeResult,
    idx: ModuleIndex,
) -> ModuleCode {
    let node = graph.get(idx);
    let source = node.processed.output.text().unwrap_or_default();
    let mut edits: Vec<(Range<usize>, String)> = Vec::new();
    let mut getters: Vec<(String, String)> = Vec::new();
    let mut esm = false;

    for site in &node.processed.sites {
        let original = &source[site.range.clone()];
        let target = site
            .kind
            .dependency()
            .and_then(|dep| graph.resolve_specifier(idx, &dep.specifier));
        let replacement = match (&site.kind, target) {
            (SiteKind::Import { .. }, Some(Target::Module(t))) if shake.is_removed(*t) => {
                esm = true;
                String::new()
            }
            (
                SiteKind::Import {
                    default,
                    namespace,
                    named,
                    ..
                },
                Some(target),
            ) => {
                esm = true;
                import_statement(graph, target, default.as_deref(), namespace.as_deref(), named)
            }
            (SiteKind::ReExport { star, names, .. }, Some(target)) => {
                esm = true;
                let module = module_ref(graph, target);
                if names.is_empty() && *star {
                    format!("{REQUIRE}.r(exports, {module});")
                } else {
                    for (local, exported) in names {
                        let value = if local == "*" {
                            format!("{REQUIRE}.n({module})")
                        } else {
                            format!("{REQUIRE}.n({module})[{}]", js_string(local))
                        };
                        getters.push((exported.clone(), value));
                    }
                    format!("{module};")
                }
            }
            (SiteKind::DynamicImport { .. }, Some(target)) => dynamic_import(graph, chunks, target),
            (SiteKind::Require { .. }, Some(target)) => module_ref(graph, target),
            (SiteKind::ExportDecl { names }, _) => {
                esm = true;
                getters.extend(names.iter().map(|n| (n.clone(), n.clone())));
                String::new()
            }
            (SiteKind::ExportDefault { name }, _) => {
                esm = true;
                match name {
                    Some(name) => {
                        getters.push(("default".to_string(), name.clone()));
                        String::new()
                    }
                    None => {
                        let local = format!("{IDENT_PREFIX}default");
                        getters.push(("default".to_string(), local.clone()));
                        format!("var {local} = ")
                    }
                }
            }
            (SiteKind::ExportList { names }, _) => {
                esm = true;
                getters.extend(names.iter().map(|(local, exported)| (exported.clone(), local.clone())));
                String::new()
            }
            // Unresolved: leave the text alone.
            _ => continue,
        };
        edits.push((site.range.clone(), keep_lines(replacement, original)));
    }

    let mut body = source.to_string();
    for (range, text) in edits.into_iter().rev() {
        body.replace_range(range, &text);
    }

    let mut header = String::new();
    if esm {
        let _ = write!(header, " {REQUIRE}.m(exports);");
    }
    if !getters.is_empty() {
        let fields: Vec<String> = getters
            .iter()
            .map(|(name, value)| format!("{}: function () {{ return {value}; }}", js_string(name)))
            .collect();
        let _ = write!(header, " {REQUIRE}.d(exports, {{{}}});", fields.join(", "));
    }
    ModuleCode { header, body }
}

/// Expression yielding the exports of `target`.
fn module_ref(graph: &ModuleGraph, target: &Target) -> String {
    match target {
        Target::Module(t) => format!("{REQUIRE}({})", js_string(&graph.get(*t).module_id)),
        Target::External(name) => format!("{REQUIRE}.x({})", js_string(name)),
    }
}

fn import_statement(
    graph: &ModuleGraph,
    target: &Target,
    default: Option<&str>,
    namespace: Option<&str>,
    named: &[(String, String)],
) -> String {
    let module = module_ref(graph, target);
    if default.is_none() && namespace.is_none() && named.is_empty() {
        return format!("{module};");
    }
    let interop = format!("{REQUIRE}.n({module})");
    if let Some(ns) = namespace {
        let mut out = format!("var {ns} = {interop};");
        if let Some(d) = default {
            let _ = write!(out, " var {d} = {ns}[\"default\"];");
        }
        return out;
    }
    let mut fields = Vec::new();
    if let Some(d) = default {
        fields.push(format!("\"default\": {d}"));
    }
    fields.extend(
        named
            .iter()
            .map(|(imported, local)| format!("{}: {local}", js_string(imported))),
    );
    format!("var {{{}}} = {interop};", fields.join(", "))
}

fn dynamic_import(graph: &ModuleGraph, chunks: &ChunkGraph, target: &Target) -> String {
    let module = module_ref(graph, target);
    let load = match target {
        Target::Module(t) => {
            let names: Vec<String> = chunks
                .load_for_import(*t)
                .into_iter()
                .map(|c| js_string(&chunks.get(c).name))
                .collect();
            if names.is_empty() {
                "Promise.resolve()".to_string()
            } else {
                format!("{REQUIRE}.e([{}])", names.join(", "))
            }
        }
        Target::External(_) => "Promise.resolve()".to_string(),
    };
    format!("{load}.then(function () {{ return {REQUIRE}.n({module}); }})")
}

/// Pad `replacement` with the newlines `original` spanned.
fn keep_lines(mut replacement: String, original: &str) -> String {
    for _ in 0..count_newlines(original) {
        replacement.push('\n');
    }
    replacement
}

fn count_newlines(text: &str) -> u32 {
    text.bytes().filter(|&b| b == b'\n').count() as u32
}

fn line_count(text: &str) -> u32 {
    count_newlines(text) + u32::from(!text.is_empty() && !text.ends_with('\n'))
}

/// Drop bundled `@import`s and point `url()` references at emitted files.
fn rewrite_css(graph: &ModuleGraph, idx: ModuleIndex, css: &str, css_dir: &str, public_path: &str) -> String {
    let scan = scan_style(css);
    let mut edits: Vec<(Range<usize>, String)> = Vec::new();
    for import in &scan.imports {
        if is_bundlable_url(&import.url) && graph.resolve_specifier(idx, &import.url).is_some() {
            edits.push((import.range.clone(), String::new()));
        }
    }
    for url in &scan.urls {
        if let Some(Target::Module(t)) = graph.resolve_specifier(idx, &url.url) {
            if let Some(href) = css_url(graph.get(*t), css_dir, public_path) {
                edits.push((url.range.clone(), format!("url({})", js_string(&href))));
            }
        }
    }
    edits.sort_by_key(|(r, _)| r.start);
    let mut out = css.to_string();
    for (range, text) in edits.into_iter().rev() {
        out.replace_range(range, &text);
    }
    out
}

/// URL of `target` as seen from a stylesheet in `css_dir`.
///
/// Relative public paths resolve against the stylesheet, not the document,
/// so the reference is rebased onto the stylesheet's directory.
fn css_url(target: &ModuleNode, css_dir: &str, public_path: &str) -> Option<String> {
    let url = target.public_url()?;
    let relative = !(public_path.starts_with('/') || public_path.contains("://"));
    if url.starts_with("data:") || !relative {
        return Some(url.to_string());
    }
    let file = target
        .asset
        .as_ref()
        .map(|a| a.name.as_str())
        .or_else(|| target.processed.output.artifacts.first().map(|a| a.name.as_str()))?;
    let depth = css_dir.split('/').filter(|s| !s.is_empty()).count();
    Some(format!("{}{file}", "../".repeat(depth)))
}

fn parent_dir(name: &str) -> String {
    name.rsplit_once('/').map(|(dir, _)| dir.to_string()).unwrap_or_default()
}

// =============================================================================
// Finalize
// =============================================================================

/// Hash and name every rendered artifact and build the runtime chunks.
///
/// `optimizer`, when given, minifies the runtime source before it is hashed.
pub fn finalize(
    rendered: Rendered,
    chunks: &ChunkGraph,
    options: &EmitOptions,
    optimizer: Option<&Optimizer>,
) -> Result<Emitted, OptimizeError> {
    let mut emitted = Emitted::default();

    let chunk_hashes: Vec<String> = rendered
        .chunks
        .iter()
        .map(|c| {
            PartsHasher::new()
                .part(c.js.as_bytes())
                .part(c.css.as_deref().unwrap_or_default().as_bytes())
                .finish_hex()
        })
        .collect();
    let mut build_hasher = PartsHasher::new();
    for hash in &chunk_hashes {
        build_hasher.part(hash.as_bytes());
    }
    for (name, asset) in &rendered.assets {
        build_hasher.part(name.as_bytes()).part(&asset.bytes);
    }
    let build_hash = build_hasher.finish_hex();

    let mut files: BTreeMap<ChunkId, ChunkFiles> = BTreeMap::new();
    for (chunk, chunk_hash) in rendered.chunks.into_iter().zip(&chunk_hashes) {
        let (js_template, css_template) = if chunk.kind == ChunkKind::Entry {
            (&options.filename, &options.css_filename)
        } else {
            (&options.chunk_filename, &options.css_chunk_filename)
        };
        let js_name = name_for(js_template, &chunk.name, ".js", &chunk.js, chunk_hash, &build_hash);
        let mut js = chunk.js;
        let map = chunk.map.and_then(|map| {
            let (comment, artifact) = source_map(&map, &js_name, options.devtool);
            js.push_str(&comment);
            artifact
        });
        let map_name = map.as_ref().map(|a| a.name.clone());

        let css_name = chunk.css.map(|css| {
            let name = name_for(css_template, &chunk.name, ".css", &css, chunk_hash, &build_hash);
            emitted
                .artifacts
                .push(Artifact::new(name.clone(), ArtifactKind::Style, css));
            name
        });
        emitted
            .artifacts
            .push(Artifact::new(js_name.clone(), ArtifactKind::Script, js));
        emitted.artifacts.extend(map);
        files.insert(
            chunk.chunk,
            ChunkFiles {
                kind: chunk.kind,
                js: js_name,
                css: css_name,
                map: map_name,
            },
        );
    }

    for (name, asset) in rendered.assets {
        emitted.assets.insert(asset.module, name.clone());
        emitted
            .artifacts
            .push(Artifact::new(name, ArtifactKind::Asset, asset.bytes));
    }

    // Runtime chunks know every chunk that may be loaded on demand.
    let loadable: Vec<(&str, &ChunkFiles)> = files
        .iter()
        .filter(|(_, f)| !f.kind.is_initial())
        .map(|(&id, f)| (chunks.get(id).name.as_str(), f))
        .collect();
    let chunk_files: BTreeMap<String, String> = loadable
        .iter()
        .map(|(name, f)| ((*name).to_string(), f.js.clone()))
        .collect();
    let css_files: BTreeMap<String, String> = loadable
        .iter()
        .filter_map(|(name, f)| Some(((*name).to_string(), f.css.clone()?)))
        .collect();

    for chunk in chunks.chunks().iter().filter(|c| c.kind == ChunkKind::Runtime) {
        let mut source = runtime_source(&chunk.name, &chunk_files, &css_files, &options.public_path);
        if let Some(optimizer) = optimizer {
            source = optimizer.script(&chunk.name, &source)?;
        }
        let hash = blake3_bytes(source.as_bytes());
        let name = name_for(&options.filename, &chunk.name, ".js", &source, &hash, &build_hash);
        emitted
            .artifacts
            .push(Artifact::new(name.clone(), ArtifactKind::Script, source));
        files.insert(
            chunk.id,
            ChunkFiles {
                kind: ChunkKind::Runtime,
                js: name,
                css: None,
                map: None,
            },
        );
    }

    for chunk in chunks.chunks() {
        if let Some(f) = files.get(&chunk.id) {
            emitted.chunks.insert(chunk.name.clone(), f.clone());
        }
    }
    for entry in chunks.entrypoints() {
        let mut entry_files = EntryFiles::default();
        for id in &entry.chunks {
            if let Some(f) = files.get(id) {
                entry_files.js.push(f.js.clone());
                entry_files.css.extend(f.css.clone());
            }
        }
        emitted.entrypoints.insert(entry.name.clone(), entry_files);
    }
    Ok(emitted)
}

fn name_for(template: &str, name: &str, ext: &str, content: &str, chunk_hash: &str, build_hash: &str) -> String {
    let content_hash = blake3_bytes(content.as_bytes());
    render_template(
        template,
        &TemplateVars {
            name,
            ext,
            content_hash: &content_hash,
            chunk_hash: Some(chunk_hash),
            build_hash: Some(build_hash),
        },
    )
}

/// Trailing comment for the script plus, for external maps, the map file.
fn source_map(map: &SourceMapBuilder, js_name: &str, devtool: Devtool) -> (String, Option<Artifact>) {
    let file = js_name.rsplit('/').next().unwrap_or(js_name);
    let json = map.generate(file);
    if devtool == Devtool::InlineSourceMap {
        let comment = format!(
            "//# sourceMappingURL=data:application/json;charset=utf-8;base64,{}\n",
            STANDARD.encode(json.as_bytes())
        );
        return (comment, None);
    }
    let artifact = Artifact::new(format!("{js_name}.map"), ArtifactKind::SourceMap, json);
    (format!("//# sourceMappingURL={file}.map\n"), Some(artifact))
}

// =============================================================================
// Source Map Support
// =============================================================================

/// VLQ-encode a signed integer and append to output string.
fn vlq_encode(value: i64, out: &mut String) {
    const B64: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    #[allow(clippy::cast_sign_loss)]
    let mut v = (if value < 0 { ((-value) << 1) | 1 } else { value << 1 }) as u64;
    loop {
        let mut digit = (v & 0x1f) as u8;
        v >>= 5;
        if v > 0 {
            digit |= 0x20;
        }
        out.push(B64[digit as usize] as char);
        if v == 0 {
            break;
        }
    }
}

/// Line-level V3 source map for one chunk.
#[derive(Debug, Clone, Default)]
struct SourceMapBuilder {
    sources: Vec<String>,
    sources_content: Vec<String>,
    /// (output line, source index, source line)
    mappings: Vec<(u32, u32, u32)>,
}

impl SourceMapBuilder {
    fn new() -> Self {
        Self::default()
    }

    fn add_source(&mut self, path: &str, content: &str) -> u32 {
        let idx = self.sources.len() as u32;
        self.sources.push(path.to_string());
        self.sources_content.push(content.to_string());
        idx
    }

    fn add_line_mapping(&mut self, output_line: u32, source_idx: u32, source_line: u32) {
        self.mappings.push((output_line, source_idx, source_line));
    }

    fn generate(&self, file: &str) -> String {
        let mut mappings = String::new();
        let mut sorted = self.mappings.clone();
        sorted.sort_unstable();

        let mut line = 0u32;
        let mut prev_source = 0i64;
        let mut prev_source_line = 0i64;
        for (output_line, source_idx, source_line) in sorted {
            while line < output_line {
                mappings.push(';');
                line += 1;
            }
            vlq_encode(0, &mut mappings);
            vlq_encode(i64::from(source_idx) - prev_source, &mut mappings);
            vlq_encode(i64::from(source_line) - prev_source_line, &mut mappings);
            vlq_encode(0, &mut mappings);
            prev_source = i64::from(source_idx);
            prev_source_line = i64::from(source_line);
        }

        serde_json::json!({
            "version": 3,
            "file": file,
            "sources": self.sources,
            "sourcesContent": self.sources_content,
            "mappings": mappings,
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vlq() {
        let mut out = String::new();
        for v in [0, 1, -1, 16, 123] {
            vlq_encode(v, &mut out);
        }
        assert_eq!(out, "ACDgB2H");
    }

    #[test]
    fn test_source_map_lines() {
        let mut map = SourceMapBuilder::new();
        let a = map.add_source("./a.js", "x\ny\n");
        map.add_line_mapping(1, a, 0);
        map.add_line_mapping(2, a, 1);
        let json: serde_json::Value = serde_json::from_str(&map.generate("main.js")).unwrap();
        assert_eq!(json["mappings"], ";AAAA;AACA");
        assert_eq!(json["sources"][0], "./a.js");
    }

    #[test]
    fn test_keep_lines() {
        assert_eq!(keep_lines("x;".into(), "import {\n a\n} from 'b';"), "x;\n\n");
        assert_eq!(line_count("a\nb"), 2);
        assert_eq!(line_count("a\nb\n"), 2);
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir("assets/css/main.css"), "assets/css");
        assert_eq!(parent_dir("main.css"), "");
    }
}
