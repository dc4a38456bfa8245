//! Module dependency graph.
//!
//! Nodes are transformed units keyed by identity; edges are deduplicated
//! resolved dependencies. Import cycles are allowed.

use super::cache::ProcessedUnit;
use super::scan::{Binding, Dependency, DependencyKind};
use super::unit::{ContentKind, ModuleType, UnitId};
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;

/// Index of a module in the graph. Assigned in discovery order.
pub type ModuleIndex = usize;

/// A resolved, deduplicated dependency edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub target: ModuleIndex,
    /// `true` if every reference to the target is a dynamic import.
    pub dynamic: bool,
    /// Union of what the references bind.
    pub binding: Binding,
}

/// A file emitted for an asset module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetFile {
    pub name: String,
    pub url: String,
}

/// A transformed unit in the graph.
#[derive(Debug, Clone)]
pub struct ModuleNode {
    pub id: UnitId,
    /// Stable id relative to the context directory.
    pub module_id: String,
    pub kind: ContentKind,
    pub processed: Arc<ProcessedUnit>,
    pub edges: Vec<Edge>,
    /// Specifiers left to the environment.
    pub externals: Vec<String>,
    pub side_effects: bool,
    /// Output file for asset modules.
    pub asset: Option<AssetFile>,
}

impl ModuleNode {
    #[must_use]
    pub fn module_type(&self) -> ModuleType {
        self.processed.output.module_type
    }

    #[must_use]
    pub fn dependencies(&self) -> &[Dependency] {
        &self.processed.dependencies
    }

    /// URL importers receive: url-loader output or emitted asset file.
    #[must_use]
    pub fn public_url(&self) -> Option<&str> {
        self.processed
            .output
            .url
            .as_deref()
            .or_else(|| self.asset.as_ref().map(|a| a.url.as_str()))
    }

    /// Stylesheet this module contributes to its chunk's CSS file.
    #[must_use]
    pub fn stylesheet(&self) -> Option<&str> {
        match self.module_type() {
            ModuleType::Style => std::str::from_utf8(&self.processed.output.content).ok(),
            _ => self.processed.output.extracted_css.as_deref(),
        }
    }
}

/// What a specifier in a module resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Module(ModuleIndex),
    External(String),
}

/// The module graph.
#[derive(Debug, Default)]
pub struct ModuleGraph {
    nodes: Vec<ModuleNode>,
    index: HashMap<UnitId, ModuleIndex>,
    /// Entry name to entry modules, in configuration order.
    entries: Vec<(String, Vec<ModuleIndex>)>,
    specifiers: HashMap<(ModuleIndex, String), Target>,
}

impl ModuleGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, returning its index.
    pub fn add(&mut self, node: ModuleNode) -> ModuleIndex {
        let idx = self.nodes.len();
        self.index.insert(node.id.clone(), idx);
        self.nodes.push(node);
        idx
    }

    pub fn add_entry(&mut self, name: String, modules: Vec<ModuleIndex>) {
        self.entries.push((name, modules));
    }

    pub fn set_specifier(&mut self, from: ModuleIndex, specifier: String, target: Target) {
        self.specifiers.insert((from, specifier), target);
    }

    #[must_use]
    pub fn get(&self, idx: ModuleIndex) -> &ModuleNode {
        &self.nodes[idx]
    }

    pub fn get_mut(&mut self, idx: ModuleIndex) -> &mut ModuleNode {
        &mut self.nodes[idx]
    }

    #[must_use]
    pub fn index_of(&self, id: &UnitId) -> Option<ModuleIndex> {
        self.index.get(id).copied()
    }

    #[must_use]
    pub fn nodes(&self) -> &[ModuleNode] {
        &self.nodes
    }

    #[must_use]
    pub fn entries(&self) -> &[(String, Vec<ModuleIndex>)] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// What `specifier` in module `from` resolved to.
    #[must_use]
    pub fn resolve_specifier(&self, from: ModuleIndex, specifier: &str) -> Option<&Target> {
        self.specifiers.get(&(from, specifier.to_string()))
    }

    /// Static (non-dynamic) dependencies of a module.
    pub fn static_deps(&self, idx: ModuleIndex) -> impl Iterator<Item = ModuleIndex> + '_ {
        self.nodes[idx]
            .edges
            .iter()
            .filter(|e| !e.dynamic)
            .map(|e| e.target)
    }

    /// Reverse adjacency: importers of every module.
    #[must_use]
    pub fn importers(&self) -> Vec<Vec<ModuleIndex>> {
        let mut importers = vec![Vec::new(); self.nodes.len()];
        for (idx, node) in self.nodes.iter().enumerate() {
            for edge in &node.edges {
                if !importers[edge.target].contains(&idx) {
                    importers[edge.target].push(idx);
                }
            }
        }
        importers
    }

    /// Modules reachable from `roots` over static edges, roots included.
    #[must_use]
    pub fn static_closure(&self, roots: &[ModuleIndex]) -> Vec<ModuleIndex> {
        let mut seen = vec![false; self.nodes.len()];
        let mut out = Vec::new();
        let mut queue: VecDeque<ModuleIndex> = roots.iter().copied().collect();
        while let Some(idx) = queue.pop_front() {
            if std::mem::replace(&mut seen[idx], true) {
                continue;
            }
            out.push(idx);
            queue.extend(self.static_deps(idx).filter(|&d| !seen[d]));
        }
        out
    }

    /// Units in `changed` plus every unit that transitively imports one.
    #[must_use]
    pub fn transitive_dependents(&self, changed: &[UnitId]) -> HashSet<UnitId> {
        let importers = self.importers();
        let mut out = HashSet::default();
        let mut queue: VecDeque<ModuleIndex> =
            changed.iter().filter_map(|id| self.index_of(id)).collect();
        while let Some(idx) = queue.pop_front() {
            if out.insert(self.nodes[idx].id.clone()) {
                queue.extend(importers[idx].iter().copied());
            }
        }
        // Changed files not yet in the graph still need their cache dropped.
        out.extend(changed.iter().cloned());
        out
    }

    /// Modules in dependency order (dependencies before dependents).
    ///
    /// Modules on a cycle cannot be ordered; they are appended afterwards in
    /// index order.
    #[must_use]
    pub fn toposort(&self, subset: &[ModuleIndex]) -> Vec<ModuleIndex> {
        let member: HashSet<ModuleIndex> = subset.iter().copied().collect();
        let mut sorted_subset = subset.to_vec();
        sorted_subset.sort_unstable();

        let mut in_degree: HashMap<ModuleIndex, usize> =
            sorted_subset.iter().map(|&i| (i, 0)).collect();
        let mut dependents: HashMap<ModuleIndex, Vec<ModuleIndex>> = HashMap::default();
        for &idx in &sorted_subset {
            let mut deps: Vec<ModuleIndex> = self
                .nodes[idx]
                .edges
                .iter()
                .map(|e| e.target)
                .filter(|t| member.contains(t) && *t != idx)
                .collect();
            deps.dedup();
            for dep in deps {
                dependents.entry(dep).or_default().push(idx);
                *in_degree.entry(idx).or_default() += 1;
            }
        }

        let mut queue: VecDeque<ModuleIndex> = sorted_subset
            .iter()
            .copied()
            .filter(|i| in_degree[i] == 0)
            .collect();
        let mut result = Vec::with_capacity(subset.len());
        while let Some(idx) = queue.pop_front() {
            result.push(idx);
            if let Some(ds) = dependents.get(&idx) {
                for &d in ds {
                    let deg = in_degree.entry(d).or_default();
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(d);
                    }
                }
            }
        }

        if result.len() < sorted_subset.len() {
            let placed: HashSet<ModuleIndex> = result.iter().copied().collect();
            result.extend(sorted_subset.iter().copied().filter(|i| !placed.contains(i)));
        }
        result
    }

    /// Strongly connected components over all edges (Tarjan, iterative).
    ///
    /// Every module belongs to exactly one component; components are
    /// returned with their members sorted by index.
    #[must_use]
    pub fn strongly_connected_components(&self) -> Vec<Vec<ModuleIndex>> {
        const UNVISITED: usize = usize::MAX;
        let n = self.nodes.len();
        let mut index = vec![UNVISITED; n];
        let mut lowlink = vec![0usize; n];
        let mut on_stack = vec![false; n];
        let mut stack: Vec<ModuleIndex> = Vec::new();
        let mut components = Vec::new();
        let mut counter = 0usize;

        for root in 0..n {
            if index[root] != UNVISITED {
                continue;
            }
            // (node, next edge position)
            let mut work: Vec<(ModuleIndex, usize)> = vec![(root, 0)];
            index[root] = counter;
            lowlink[root] = counter;
            counter += 1;
            stack.push(root);
            on_stack[root] = true;

            while let Some(&mut (v, ref mut pos)) = work.last_mut() {
                if let Some(edge) = self.nodes[v].edges.get(*pos) {
                    *pos += 1;
                    let w = edge.target;
                    if index[w] == UNVISITED {
                        index[w] = counter;
                        lowlink[w] = counter;
                        counter += 1;
                        stack.push(w);
                        on_stack[w] = true;
                        work.push((w, 0));
                    } else if on_stack[w] {
                        lowlink[v] = lowlink[v].min(index[w]);
                    }
                    continue;
                }

                work.pop();
                if let Some(&(parent, _)) = work.last() {
                    lowlink[parent] = lowlink[parent].min(lowlink[v]);
                }
                if lowlink[v] == index[v] {
                    let mut component = Vec::new();
                    while let Some(w) = stack.pop() {
                        on_stack[w] = false;
                        component.push(w);
                        if w == v {
                            break;
                        }
                    }
                    component.sort_unstable();
                    components.push(component);
                }
            }
        }
        components
    }
}

/// Merge raw dependencies that resolved to the same target into one edge.
#[must_use]
pub fn merge_edges(resolved: impl IntoIterator<Item = (ModuleIndex, Dependency)>) -> Vec<Edge> {
    let mut edges: Vec<Edge> = Vec::new();
    for (target, dep) in resolved {
        let dynamic = dep.kind == DependencyKind::DynamicImport;
        match edges.iter_mut().find(|e| e.target == target) {
            Some(edge) => {
                edge.dynamic &= dynamic;
                let binding = std::mem::replace(&mut edge.binding, Binding::None);
                edge.binding = binding.merge(dep.binding);
            }
            None => edges.push(Edge {
                target,
                dynamic,
                binding: dep.binding,
            }),
        }
    }
    edges
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bundler::loader::Transformed;

    /// Graph with `n` script modules and the given static edges.
    pub(crate) fn graph(n: usize, edges: &[(usize, usize)]) -> ModuleGraph {
        let mut g = ModuleGraph::new();
        for i in 0..n {
            g.add(ModuleNode {
                id: UnitId::new(format!("/m{i}.js"), None),
                module_id: format!("./m{i}.js"),
                kind: ContentKind::Script,
                processed: Arc::new(ProcessedUnit {
                    output: Transformed::default(),
                    dependencies: Vec::new(),
                    sites: Vec::new(),
                    exports: Vec::new(),
                }),
                edges: Vec::new(),
                externals: Vec::new(),
                side_effects: true,
                asset: None,
            });
        }
        for &(from, to) in edges {
            g.nodes[from].edges.push(Edge {
                target: to,
                dynamic: false,
                binding: Binding::All,
            });
        }
        g
    }

    #[test]
    fn test_toposort_dependencies_first() {
        // 0 -> 1 -> 2, 0 -> 2
        let g = graph(3, &[(0, 1), (1, 2), (0, 2)]);
        assert_eq!(g.toposort(&[0, 1, 2]), vec![2, 1, 0]);
    }

    #[test]
    fn test_toposort_cycle_terminates() {
        let g = graph(3, &[(0, 1), (1, 0), (1, 2)]);
        let order = g.toposort(&[0, 1, 2]);
        assert_eq!(order.len(), 3);
        assert_eq!(order[0], 2);
    }

    #[test]
    fn test_scc() {
        // 0 -> 1 -> 2 -> 1, 2 -> 3
        let g = graph(4, &[(0, 1), (1, 2), (2, 1), (2, 3)]);
        let mut sccs = g.strongly_connected_components();
        sccs.sort();
        assert_eq!(sccs, vec![vec![0], vec![1, 2], vec![3]]);
    }

    #[test]
    fn test_transitive_dependents() {
        // 0 -> 1 -> 2, 3 -> 2, 4 alone
        let g = graph(5, &[(0, 1), (1, 2), (3, 2)]);
        let ids = g.transitive_dependents(&[g.get(2).id.clone()]);
        let mut idx: Vec<_> = ids.iter().filter_map(|id| g.index_of(id)).collect();
        idx.sort_unstable();
        assert_eq!(idx, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_static_closure_skips_dynamic() {
        let mut g = graph(3, &[(0, 1)]);
        g.nodes[0].edges.push(Edge {
            target: 2,
            dynamic: true,
            binding: Binding::All,
        });
        assert_eq!(g.static_closure(&[0]), vec![0, 1]);
    }

    #[test]
    fn test_merge_edges() {
        let edges = merge_edges(vec![
            (
                1,
                Dependency::new("./a", DependencyKind::DynamicImport, Binding::All),
            ),
            (
                1,
                Dependency::new("./a.js", DependencyKind::Import, Binding::None),
            ),
            (
                2,
                Dependency::new("./b", DependencyKind::Import, Binding::None),
            ),
        ]);
        assert_eq!(edges.len(), 2);
        assert!(!edges[0].dynamic);
        assert_eq!(edges[0].binding, Binding::All);
        assert!(!edges[1].binding.binds_anything());
    }
}
