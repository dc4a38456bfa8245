//! Chunk partitioning.
//!
//! Import cycles are collapsed into strongly connected components first and
//! every component is placed as a unit, so each module lands in exactly one
//! chunk. Placement, in order of precedence:
//!
//! 1. the best matching cache group (highest `priority`, then declaration
//!    order) whose `chunks` filter and `minChunks` accept the component;
//! 2. the chunk of the only entry whose page can load it, statically or
//!    through `import()`;
//! 3. a shared chunk named after the entries that can load it (`a~b`);
//! 4. for modules only reached through `import()`, the async chunk of the
//!    split point, or a shared async chunk when several split points need it.
//!
//! Runtime chunks hold no modules.

use super::graph::{ModuleGraph, ModuleIndex};
use super::resolve::package_name_from_path;
use crate::options::{
    CacheGroupOptions, ChunksFilter, RuntimeChunk, SplitChunksOptions, PACKAGE_NAME_PLACEHOLDER,
};
use indexmap::IndexMap;
use regex_lite::Regex;
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;

/// Index of a chunk in the [`ChunkGraph`].
pub type ChunkId = usize;

/// Name of the single runtime chunk.
pub const RUNTIME_CHUNK_NAME: &str = "runtime";

/// Policy name recorded on shared chunks.
const SHARED_POLICY: &str = "sharedChunks";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    /// Module-loading bootstrap; no modules.
    Runtime,
    /// One per configured entry.
    Entry,
    /// Cache group or shared chunk loaded up front.
    Split,
    /// Loaded on demand through `import()`.
    Async,
}

impl ChunkKind {
    /// Whether the chunk is referenced directly by the HTML document.
    #[must_use]
    pub fn is_initial(self) -> bool {
        matches!(self, Self::Runtime | Self::Entry)
    }
}

/// A named group of modules emitted as one artifact.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: ChunkId,
    pub name: String,
    pub kind: ChunkKind,
    /// Modules, dependencies before dependents.
    pub modules: Vec<ModuleIndex>,
    /// Modules run once the chunk and its requirements are registered.
    pub entry_modules: Vec<ModuleIndex>,
    /// Chunks that must be registered before this one can run.
    pub requires: Vec<ChunkId>,
    /// Cache group key or policy that created the chunk.
    pub policy: Option<String>,
}

/// Load information for one entry.
#[derive(Debug, Clone)]
pub struct Entrypoint {
    pub name: String,
    pub runtime: ChunkId,
    /// Runtime first, then split chunks by name, then the entry chunk.
    pub chunks: Vec<ChunkId>,
}

/// A partitioning policy that cannot be satisfied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    #[error("cache group '{group}' has an invalid test pattern: {message}")]
    InvalidTest { group: String, message: String },

    #[error("chunk name '{name}' from {policy} collides with the chunk from {other}")]
    NameCollision {
        name: String,
        policy: String,
        other: String,
    },

    #[error("entry '{entry}' contains no modules")]
    EmptyEntry { entry: String },

    #[error(
        "module {module} is needed by entries {} but no cache group takes it and sharedChunks is disabled",
        .entries.join(", ")
    )]
    Ambiguous {
        module: String,
        entries: Vec<String>,
    },
}

impl PartitionError {
    /// Chunk or module the failure concerns.
    #[must_use]
    pub fn chunk(&self) -> Option<&str> {
        match self {
            Self::InvalidTest { .. } => None,
            Self::NameCollision { name, .. } => Some(name),
            Self::EmptyEntry { entry } => Some(entry),
            Self::Ambiguous { module, .. } => Some(module),
        }
    }

    /// Cache group or policy responsible.
    #[must_use]
    pub fn policy(&self) -> Option<&str> {
        match self {
            Self::InvalidTest { group, .. } => Some(group),
            Self::NameCollision { policy, .. } => Some(policy),
            Self::EmptyEntry { .. } => Some("entry"),
            Self::Ambiguous { .. } => Some(SHARED_POLICY),
        }
    }
}

struct CacheGroup<'a> {
    key: &'a str,
    options: &'a CacheGroupOptions,
    test: Option<Regex>,
}

/// Compiled partitioning policy.
pub struct Partitioner<'a> {
    groups: Vec<CacheGroup<'a>>,
    shared_chunks: bool,
    runtime: RuntimeChunk,
}

impl<'a> Partitioner<'a> {
    /// Compile the cache group patterns.
    ///
    /// # Errors
    /// [`PartitionError::InvalidTest`] for a pattern that does not compile.
    pub fn new(split: &'a SplitChunksOptions, runtime: RuntimeChunk) -> Result<Self, PartitionError> {
        let groups = split
            .cache_groups
            .iter()
            .map(|(key, options)| {
                let test = options
                    .test
                    .as_deref()
                    .map(Regex::new)
                    .transpose()
                    .map_err(|e| PartitionError::InvalidTest {
                        group: key.clone(),
                        message: e.to_string(),
                    })?;
                Ok(CacheGroup {
                    key,
                    options,
                    test,
                })
            })
            .collect::<Result<_, PartitionError>>()?;
        Ok(Self {
            groups,
            shared_chunks: split.shared_chunks,
            runtime,
        })
    }

    /// Partition `graph` into chunks.
    ///
    /// # Errors
    /// See [`PartitionError`].
    pub fn partition(&self, graph: &ModuleGraph) -> Result<ChunkGraph, PartitionError> {
        let mut out = ChunkGraph {
            chunks: Vec::new(),
            module_chunk: vec![ChunkId::MAX; graph.len()],
            entrypoints: Vec::new(),
            names: HashMap::default(),
        };

        // Runtime and entry chunks first, in configuration order.
        let mut entry_chunks = Vec::new();
        let mut runtimes = Vec::new();
        for (name, modules) in graph.entries() {
            if modules.is_empty() {
                return Err(PartitionError::EmptyEntry {
                    entry: name.clone(),
                });
            }
            let runtime = match self.runtime {
                RuntimeChunk::Single if runtimes.is_empty() => {
                    out.add(RUNTIME_CHUNK_NAME.to_string(), ChunkKind::Runtime, "runtimeChunk")?
                }
                RuntimeChunk::Single => runtimes[0],
                RuntimeChunk::Multiple => {
                    out.add(format!("{RUNTIME_CHUNK_NAME}~{name}"), ChunkKind::Runtime, "runtimeChunk")?
                }
            };
            runtimes.push(runtime);
            let chunk = out.add(name.clone(), ChunkKind::Entry, "entry")?;
            out.chunks[chunk].entry_modules = modules.clone();
            entry_chunks.push(chunk);
        }

        let reach = Reach::compute(graph);
        let components = graph.strongly_connected_components();
        let mut ordered: Vec<&Vec<ModuleIndex>> = components.iter().collect();
        ordered.sort_by_key(|c| c[0]);

        for component in ordered {
            let chunk = self.place(graph, &reach, component, &entry_chunks, &mut out)?;
            for &m in component {
                out.module_chunk[m] = chunk;
            }
        }

        for chunk in &mut out.chunks {
            let members: Vec<ModuleIndex> = (0..graph.len())
                .filter(|&m| out.module_chunk[m] == chunk.id)
                .collect();
            chunk.modules = graph.toposort(&members);
        }
        out.chunks.retain(|c| c.kind != ChunkKind::Async || !c.modules.is_empty());
        out.renumber();

        // Requirements: the chunks holding a root's static closure.
        // Runtime and entry chunks precede every dropped chunk, so their ids
        // are unchanged.
        for (e, (name, roots)) in graph.entries().iter().enumerate() {
            let (chunk, runtime) = (entry_chunks[e], runtimes[e]);
            let mut needed = out.chunks_of(&graph.static_closure(roots), chunk);
            needed.sort_by(|&a, &b| out.chunks[a].name.cmp(&out.chunks[b].name));
            out.chunks[chunk].requires = needed.clone();

            let mut load = vec![runtime];
            load.extend(needed);
            load.push(chunk);
            out.entrypoints.push(Entrypoint {
                name: name.clone(),
                runtime,
                chunks: load,
            });
        }
        // Chunks loaded on demand bring the chunks their modules statically
        // need. Entry chunks only hold modules no other page reaches, so an
        // on-demand chunk never needs one from a page that lacks it.
        for id in 0..out.chunks.len() {
            if !matches!(out.chunks[id].kind, ChunkKind::Async | ChunkKind::Split) {
                continue;
            }
            let roots = out.chunks[id].modules.clone();
            let mut needed: Vec<ChunkId> = out
                .chunks_of(&graph.static_closure(&roots), id)
                .into_iter()
                .filter(|&c| out.chunks[c].kind != ChunkKind::Entry)
                .collect();
            needed.sort_by(|&a, &b| out.chunks[a].name.cmp(&out.chunks[b].name));
            out.chunks[id].requires = needed;
        }

        tracing::debug!(chunks = out.chunks.len(), "partitioned module graph");
        Ok(out)
    }

    fn place(
        &self,
        graph: &ModuleGraph,
        reach: &Reach,
        component: &[ModuleIndex],
        entry_chunks: &[ChunkId],
        out: &mut ChunkGraph,
    ) -> Result<ChunkId, PartitionError> {
        let entries: BTreeSet<usize> = component
            .iter()
            .flat_map(|&m| reach.entries[m].iter().copied())
            .collect();
        let async_roots: BTreeSet<ModuleIndex> = component
            .iter()
            .flat_map(|&m| reach.async_roots[m].iter().copied())
            .collect();

        if let Some((group, member)) = self.best_group(graph, component, &entries, &async_roots) {
            let name = group_chunk_name(group, graph, member);
            return out.add(name, ChunkKind::Split, group.key);
        }

        let entry_names = |set: &BTreeSet<usize>| -> Vec<String> {
            set.iter().map(|&e| graph.entries()[e].0.clone()).collect()
        };

        if !entries.is_empty() {
            // Entries whose pages may load this component over any edges,
            // including `import()` of a module another entry loads statically.
            let effective: BTreeSet<usize> = component
                .iter()
                .flat_map(|&m| reach.entries_reaching[m].iter().copied())
                .collect();
            if effective.len() == 1 {
                let e = *effective.iter().next().unwrap_or(&0);
                return Ok(entry_chunks[e]);
            }
            let names = entry_names(&effective);
            if !self.shared_chunks {
                return Err(PartitionError::Ambiguous {
                    module: graph.get(component[0]).module_id.clone(),
                    entries: names,
                });
            }
            let mut sorted = names;
            sorted.sort();
            return out.add(sorted.join("~"), ChunkKind::Split, SHARED_POLICY);
        }

        // Only reachable through `import()`.
        let chunks: Vec<ChunkId> = async_roots
            .iter()
            .map(|&root| out.async_chunk(graph, root))
            .collect::<Result<_, _>>()?;
        if let [only] = chunks.as_slice() {
            return Ok(*only);
        }
        let mut names: Vec<String> = chunks.iter().map(|&c| out.chunks[c].name.clone()).collect();
        names.sort();
        out.add(names.join("~"), ChunkKind::Async, SHARED_POLICY)
    }

    /// Best matching cache group and the member that matched it.
    fn best_group(
        &self,
        graph: &ModuleGraph,
        component: &[ModuleIndex],
        entries: &BTreeSet<usize>,
        async_roots: &BTreeSet<ModuleIndex>,
    ) -> Option<(&CacheGroup<'a>, ModuleIndex)> {
        let roots = entries.len() + async_roots.len();
        let mut best: Option<(usize, ModuleIndex)> = None;
        for (order, group) in self.groups.iter().enumerate() {
            let filter_ok = match group.options.chunks {
                ChunksFilter::All => true,
                ChunksFilter::Initial => !entries.is_empty(),
                ChunksFilter::Async => entries.is_empty(),
            };
            if !filter_ok || roots < group.options.min_chunks {
                continue;
            }
            let matched = component.iter().copied().find(|&m| {
                group
                    .test
                    .as_ref()
                    .map_or(true, |re| re.is_match(&graph.get(m).id.path_str()))
            });
            let Some(member) = matched else { continue };
            let better = match best {
                None => true,
                // Earlier declaration wins ties, so only strictly higher
                // priority replaces.
                Some((b, _)) => group.options.priority > self.groups[b].options.priority,
            };
            if better {
                best = Some((order, member));
            }
        }
        best.map(|(order, member)| (&self.groups[order], member))
    }
}

fn group_chunk_name(group: &CacheGroup<'_>, graph: &ModuleGraph, member: ModuleIndex) -> String {
    match group.options.name.as_deref() {
        Some(PACKAGE_NAME_PLACEHOLDER) => package_name_from_path(&graph.get(member).id.path)
            .map_or_else(
                || group.key.to_string(),
                |pkg| format!("{}.{}", group.key, pkg.trim_start_matches('@').replace('/', "-")),
            ),
        Some(name) => name.to_string(),
        None => group.key.to_string(),
    }
}

/// Which roots reach each module.
struct Reach {
    /// Entry positions reaching a module over static edges.
    entries: Vec<BTreeSet<usize>>,
    /// Split points reaching a module over static edges.
    async_roots: Vec<BTreeSet<ModuleIndex>>,
    /// Entry positions reaching a module over any edges.
    entries_reaching: Vec<BTreeSet<usize>>,
}

impl Reach {
    fn compute(graph: &ModuleGraph) -> Self {
        let n = graph.len();
        let mut entries = vec![BTreeSet::new(); n];
        let mut entries_reaching = vec![BTreeSet::new(); n];
        let mut statically_reached: HashSet<ModuleIndex> = HashSet::default();

        for (e, (_, roots)) in graph.entries().iter().enumerate() {
            for m in graph.static_closure(roots) {
                entries[m].insert(e);
                statically_reached.insert(m);
            }
            for m in closure_all(graph, roots) {
                entries_reaching[m].insert(e);
            }
        }

        let mut split_points: Vec<ModuleIndex> = graph
            .nodes()
            .iter()
            .flat_map(|node| node.edges.iter().filter(|e| e.dynamic).map(|e| e.target))
            .filter(|t| !statically_reached.contains(t))
            .collect();
        split_points.sort_unstable();
        split_points.dedup();

        let mut async_roots = vec![BTreeSet::new(); n];
        for root in split_points {
            for m in graph.static_closure(&[root]) {
                if !statically_reached.contains(&m) {
                    async_roots[m].insert(root);
                }
            }
        }

        Self {
            entries,
            async_roots,
            entries_reaching,
        }
    }
}

fn closure_all(graph: &ModuleGraph, roots: &[ModuleIndex]) -> Vec<ModuleIndex> {
    let mut seen = vec![false; graph.len()];
    let mut stack = roots.to_vec();
    let mut out = Vec::new();
    while let Some(m) = stack.pop() {
        if std::mem::replace(&mut seen[m], true) {
            continue;
        }
        out.push(m);
        stack.extend(graph.get(m).edges.iter().map(|e| e.target).filter(|&t| !seen[t]));
    }
    out
}

/// Result of partitioning.
#[derive(Debug, Clone)]
pub struct ChunkGraph {
    chunks: Vec<Chunk>,
    module_chunk: Vec<ChunkId>,
    entrypoints: Vec<Entrypoint>,
    /// Chunk name to (id, policy).
    names: HashMap<String, (ChunkId, String)>,
}

impl ChunkGraph {
    #[must_use]
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    #[must_use]
    pub fn get(&self, id: ChunkId) -> &Chunk {
        &self.chunks[id]
    }

    #[must_use]
    pub fn chunk_of(&self, module: ModuleIndex) -> ChunkId {
        self.module_chunk[module]
    }

    #[must_use]
    pub fn entrypoints(&self) -> &[Entrypoint] {
        &self.entrypoints
    }

    #[must_use]
    pub fn chunk_id(&self, name: &str) -> Option<ChunkId> {
        self.names.get(name).map(|(id, _)| *id)
    }

    /// Chunks to load before `import()` of `module` can resolve, in load
    /// order. Empty when the module ships with an entry.
    #[must_use]
    pub fn load_for_import(&self, module: ModuleIndex) -> Vec<ChunkId> {
        let chunk = &self.chunks[self.module_chunk[module]];
        if chunk.kind == ChunkKind::Entry {
            return Vec::new();
        }
        let mut load = chunk.requires.clone();
        load.push(chunk.id);
        load
    }

    /// Chunks holding any of `modules`, excluding `own`, in id order.
    fn chunks_of(&self, modules: &[ModuleIndex], own: ChunkId) -> Vec<ChunkId> {
        let set: BTreeSet<ChunkId> = modules
            .iter()
            .map(|&m| self.module_chunk[m])
            .filter(|&c| c != own)
            .collect();
        set.into_iter().collect()
    }

    /// Get or create the chunk `name` owned by `policy`.
    fn add(&mut self, name: String, kind: ChunkKind, policy: &str) -> Result<ChunkId, PartitionError> {
        if let Some((id, owner)) = self.names.get(&name) {
            if owner == policy && kind != ChunkKind::Entry && kind != ChunkKind::Runtime {
                return Ok(*id);
            }
            return Err(PartitionError::NameCollision {
                name,
                policy: policy.to_string(),
                other: owner.clone(),
            });
        }
        let id = self.chunks.len();
        self.names.insert(name.clone(), (id, policy.to_string()));
        self.chunks.push(Chunk {
            id,
            name,
            kind,
            modules: Vec::new(),
            entry_modules: Vec::new(),
            requires: Vec::new(),
            policy: Some(policy.to_string()),
        });
        Ok(id)
    }

    /// The async chunk whose split point is `root`, created on first use.
    fn async_chunk(&mut self, graph: &ModuleGraph, root: ModuleIndex) -> Result<ChunkId, PartitionError> {
        if let Some(chunk) = self
            .chunks
            .iter()
            .find(|c| c.kind == ChunkKind::Async && c.entry_modules == [root])
        {
            return Ok(chunk.id);
        }
        let stem = graph.get(root).id.stem();
        let mut name = stem.clone();
        let mut n = 1;
        while self.names.contains_key(&name) {
            name = format!("{stem}-{n}");
            n += 1;
        }
        let id = self.add(name, ChunkKind::Async, "import()")?;
        self.chunks[id].entry_modules = vec![root];
        Ok(id)
    }

    /// Reassign ids after chunks were dropped.
    fn renumber(&mut self) {
        let remap: HashMap<ChunkId, ChunkId> = self
            .chunks
            .iter()
            .enumerate()
            .map(|(new, c)| (c.id, new))
            .collect();
        for (new, chunk) in self.chunks.iter_mut().enumerate() {
            chunk.id = new;
        }
        for c in &mut self.module_chunk {
            if let Some(&new) = remap.get(c) {
                *c = new;
            }
        }
        self.names = self
            .chunks
            .iter()
            .map(|c| {
                (
                    c.name.clone(),
                    (c.id, c.policy.clone().unwrap_or_default()),
                )
            })
            .collect();
    }

    /// Chunk name to module ids, for the manifest.
    #[must_use]
    pub fn summary(&self, graph: &ModuleGraph) -> IndexMap<String, Vec<String>> {
        self.chunks
            .iter()
            .map(|c| {
                (
                    c.name.clone(),
                    c.modules.iter().map(|&m| graph.get(m).module_id.clone()).collect(),
                )
            })
            .collect()
    }
}
