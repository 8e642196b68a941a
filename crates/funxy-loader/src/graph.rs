//! Dependency graphs for modules and for files within a module.
//!
//! Kahn's algorithm with alphabetical tie-breaking keeps compilation
//! order deterministic. Cycle extraction follows dependency edges among
//! unprocessed nodes until one repeats, yielding the `a -> b -> a` path
//! shown in diagnostics.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;

/// A node in a dependency graph, identified by insertion index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeIdx(pub u32);

/// A generic dependency graph over named nodes.
#[derive(Debug, Default)]
pub struct DepGraph {
    names: Vec<String>,
    dependencies: Vec<Vec<NodeIdx>>,
    by_name: FxHashMap<String, NodeIdx>,
}

impl DepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, name: impl Into<String>) -> NodeIdx {
        let name = name.into();
        if let Some(existing) = self.by_name.get(&name) {
            return *existing;
        }
        let idx = NodeIdx(self.names.len() as u32);
        self.by_name.insert(name.clone(), idx);
        self.names.push(name);
        self.dependencies.push(Vec::new());
        idx
    }

    pub fn resolve(&self, name: &str) -> Option<NodeIdx> {
        self.by_name.get(name).copied()
    }

    /// Record that `from` depends on `to`. Self and duplicate edges are
    /// ignored.
    pub fn add_dependency(&mut self, from: NodeIdx, to: NodeIdx) {
        if from == to {
            return;
        }
        let deps = &mut self.dependencies[from.0 as usize];
        if !deps.contains(&to) {
            deps.push(to);
        }
    }

    pub fn name(&self, idx: NodeIdx) -> &str {
        &self.names[idx.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Topological sort: dependencies first, alphabetical among ties.
    ///
    /// On a cycle, returns the offending path (ending with the repeated
    /// name) as the error.
    pub fn topological_sort(&self) -> Result<Vec<NodeIdx>, Vec<String>> {
        let n = self.len();
        let mut in_degree: Vec<u32> = self
            .dependencies
            .iter()
            .map(|deps| deps.len() as u32)
            .collect();

        let mut ready: Vec<NodeIdx> = (0..n)
            .filter(|&i| in_degree[i] == 0)
            .map(|i| NodeIdx(i as u32))
            .collect();
        ready.sort_by(|a, b| self.name(*a).cmp(self.name(*b)));

        let mut queue = VecDeque::from(ready);
        let mut order = Vec::with_capacity(n);

        while let Some(idx) = queue.pop_front() {
            order.push(idx);
            let mut newly_ready = Vec::new();
            for (i, deps) in self.dependencies.iter().enumerate() {
                if in_degree[i] > 0 && deps.contains(&idx) {
                    in_degree[i] -= 1;
                    if in_degree[i] == 0 {
                        newly_ready.push(NodeIdx(i as u32));
                    }
                }
            }
            newly_ready.sort_by(|a, b| self.name(*a).cmp(self.name(*b)));
            queue.extend(newly_ready);
        }

        if order.len() == n {
            Ok(order)
        } else {
            Err(self.extract_cycle(&in_degree))
        }
    }

    /// Follow dependency edges among unprocessed nodes until one repeats.
    fn extract_cycle(&self, in_degree: &[u32]) -> Vec<String> {
        let start = match (0..self.len()).find(|&i| in_degree[i] > 0) {
            Some(i) => i,
            None => return Vec::new(),
        };

        let mut path: Vec<String> = Vec::new();
        let mut visited = vec![false; self.len()];
        let mut current = start;

        loop {
            if visited[current] {
                let repeated = self.names[current].clone();
                let begin = path.iter().position(|n| n == &repeated).unwrap_or(0);
                let mut cycle: Vec<String> = path[begin..].to_vec();
                cycle.push(repeated);
                return cycle;
            }
            visited[current] = true;
            path.push(self.names[current].clone());

            match self.dependencies[current]
                .iter()
                .find(|dep| in_degree[dep.0 as usize] > 0)
            {
                Some(dep) => current = dep.0 as usize,
                None => {
                    path.push(self.names[current].clone());
                    return path;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_resolve() {
        let mut graph = DepGraph::new();
        let a = graph.add_node("a");
        let b = graph.add_node("b");
        assert_eq!(graph.resolve("a"), Some(a));
        assert_ne!(a, b);
        // Re-adding returns the same node.
        assert_eq!(graph.add_node("a"), a);
    }

    #[test]
    fn sort_puts_dependencies_first() {
        let mut graph = DepGraph::new();
        let main = graph.add_node("main");
        let util = graph.add_node("util");
        let base = graph.add_node("base");
        graph.add_dependency(main, util);
        graph.add_dependency(util, base);

        let order = graph.topological_sort().unwrap();
        let names: Vec<&str> = order.iter().map(|i| graph.name(*i)).collect();
        assert_eq!(names, vec!["base", "util", "main"]);
    }

    #[test]
    fn ties_break_alphabetically() {
        let mut graph = DepGraph::new();
        graph.add_node("zeta");
        graph.add_node("alpha");
        let order = graph.topological_sort().unwrap();
        let names: Vec<&str> = order.iter().map(|i| graph.name(*i)).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn cycle_yields_path() {
        let mut graph = DepGraph::new();
        let a = graph.add_node("a");
        let b = graph.add_node("b");
        graph.add_dependency(a, b);
        graph.add_dependency(b, a);

        let cycle = graph.topological_sort().unwrap_err();
        assert_eq!(cycle.first(), cycle.last());
        assert!(cycle.len() >= 3, "cycle path should repeat its head: {cycle:?}");
    }
}
