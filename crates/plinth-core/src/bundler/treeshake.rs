//! Module-level dead code elimination.
//!
//! A module is dropped when it is side-effect free (rule `sideEffects` or the
//! package's `package.json`), is not an entry, and none of its live importers
//! bind any of its exports. Dropping a module can leave its own dependencies
//! unreachable; those are dropped as well. Dynamic imports, `require` and
//! namespace imports bind everything, so their targets always stay.

use super::graph::{ModuleGraph, ModuleIndex};

/// Modules removed before emission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShakeResult {
    removed: Vec<bool>,
}

impl ShakeResult {
    /// Nothing removed.
    #[must_use]
    pub fn keep_all(len: usize) -> Self {
        Self {
            removed: vec![false; len],
        }
    }

    #[must_use]
    pub fn is_removed(&self, module: ModuleIndex) -> bool {
        self.removed.get(module).copied().unwrap_or(false)
    }

    #[must_use]
    pub fn removed_count(&self) -> usize {
        self.removed.iter().filter(|&&r| r).count()
    }
}

/// Compute which modules can be dropped.
#[must_use]
pub fn shake(graph: &ModuleGraph) -> ShakeResult {
    let n = graph.len();
    let mut entry = vec![false; n];
    for (_, roots) in graph.entries() {
        for &r in roots {
            entry[r] = true;
        }
    }

    let mut pruned = vec![false; n];
    loop {
        let live = live_set(graph, &pruned);
        let mut bound = vec![false; n];
        for (idx, node) in graph.nodes().iter().enumerate() {
            if !live[idx] {
                continue;
            }
            for edge in &node.edges {
                if edge.binding.binds_anything() {
                    bound[edge.target] = true;
                }
            }
        }

        let mut changed = false;
        for m in 0..n {
            let node = graph.get(m);
            if live[m] && !pruned[m] && !entry[m] && !node.side_effects && !bound[m] {
                tracing::trace!(module = %node.module_id, "unused side-effect free module dropped");
                pruned[m] = true;
                changed = true;
            }
        }
        if !changed {
            return ShakeResult {
                removed: (0..n).map(|m| pruned[m] || !live[m]).collect(),
            };
        }
    }
}

/// Modules reachable from the entries without passing through `pruned`.
fn live_set(graph: &ModuleGraph, pruned: &[bool]) -> Vec<bool> {
    let mut live = vec![false; graph.len()];
    let mut stack: Vec<ModuleIndex> = graph
        .entries()
        .iter()
        .flat_map(|(_, roots)| roots.iter().copied())
        .collect();
    while let Some(m) = stack.pop() {
        if pruned[m] || std::mem::replace(&mut live[m], true) {
            continue;
        }
        stack.extend(graph.get(m).edges.iter().map(|e| e.target));
    }
    live
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::graph::tests::graph;
    use crate::bundler::scan::Binding;

    fn bind(g: &mut ModuleGraph, from: usize, binding: Binding) {
        for edge in &mut g.get_mut(from).edges {
            edge.binding = binding.clone();
        }
    }

    #[test]
    fn test_unused_pure_module_dropped_with_its_subtree() {
        // 0 -> 1 (side-effect import only) -> 2
        let mut g = graph(3, &[(0, 1), (1, 2)]);
        g.add_entry("main".into(), vec![0]);
        bind(&mut g, 0, Binding::None);
        g.get_mut(1).side_effects = false;

        let result = shake(&g);
        assert!(!result.is_removed(0));
        assert!(result.is_removed(1));
        assert!(result.is_removed(2));
        assert_eq!(result.removed_count(), 2);
    }

    #[test]
    fn test_bound_or_effectful_modules_kept() {
        let mut g = graph(3, &[(0, 1), (0, 2)]);
        g.add_entry("main".into(), vec![0]);
        g.get_mut(0).edges[0].binding = Binding::Named(vec!["x".into()]);
        g.get_mut(0).edges[1].binding = Binding::None;
        g.get_mut(1).side_effects = false;

        let result = shake(&g);
        assert!(!result.is_removed(1));
        assert!(!result.is_removed(2));
    }

    #[test]
    fn test_entries_never_dropped() {
        let mut g = graph(1, &[]);
        g.add_entry("main".into(), vec![0]);
        g.get_mut(0).side_effects = false;
        assert_eq!(shake(&g).removed_count(), 0);
    }
}
