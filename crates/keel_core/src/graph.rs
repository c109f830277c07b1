//! Stack dependency graph.
//!
//! Nodes are stacks; an edge `dependent -> dependency` means the dependent
//! needs the dependency's outputs or existence before it can be provisioned.
//! The graph rejects any edge that would close a cycle, so it is acyclic at
//! all times and [`StackGraph::build_order`] always covers every stack.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::stack::StackId;

#[derive(Debug, Clone, Default)]
pub struct StackGraph {
    /// Stacks in declaration order.
    nodes: Vec<StackId>,
    index: HashMap<StackId, usize>,
    /// `dependencies[i]` holds the nodes node `i` depends on.
    dependencies: Vec<BTreeSet<usize>>,
}

impl StackGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stack(&mut self, id: StackId) -> CoreResult<()> {
        if self.index.contains_key(&id) {
            return Err(CoreError::DuplicateStack(id.to_string()));
        }
        debug!("Adding stack {} to graph", id);
        self.index.insert(id.clone(), self.nodes.len());
        self.nodes.push(id);
        self.dependencies.push(BTreeSet::new());
        Ok(())
    }

    /// Declare that `dependent` requires `dependency`.
    ///
    /// Declaring the same edge twice is a no-op.
    pub fn add_dependency(&mut self, dependent: &StackId, dependency: &StackId) -> CoreResult<()> {
        let from = self.position(dependent)?;
        let to = self.position(dependency)?;

        if from == to {
            return Err(CoreError::DependencyCycle(vec![
                dependent.to_string(),
                dependent.to_string(),
            ]));
        }

        // The new edge closes a cycle iff the dependency already reaches the dependent.
        if let Some(path) = self.path(to, from) {
            let mut cycle = vec![dependent.to_string()];
            cycle.extend(path.into_iter().map(|i| self.nodes[i].to_string()));
            return Err(CoreError::DependencyCycle(cycle));
        }

        if self.dependencies[from].insert(to) {
            debug!("{} depends on {}", dependent, dependency);
        }
        Ok(())
    }

    pub fn contains(&self, id: &StackId) -> bool {
        self.index.contains_key(id)
    }

    /// Direct dependencies of `id`, in declaration order.
    pub fn dependencies_of(&self, id: &StackId) -> CoreResult<Vec<&StackId>> {
        let node = self.position(id)?;
        Ok(self.dependencies[node]
            .iter()
            .map(|&i| &self.nodes[i])
            .collect())
    }

    /// Stacks that directly depend on `id`, in declaration order.
    pub fn dependents_of(&self, id: &StackId) -> CoreResult<Vec<&StackId>> {
        let node = self.position(id)?;
        Ok(self
            .dependencies
            .iter()
            .enumerate()
            .filter(|(_, deps)| deps.contains(&node))
            .map(|(i, _)| &self.nodes[i])
            .collect())
    }

    /// Topological order, dependencies first.
    ///
    /// Among stacks that are ready at the same time, the one declared first
    /// comes first, so the order is deterministic.
    pub fn build_order(&self) -> Vec<&StackId> {
        let mut remaining: Vec<usize> = self.dependencies.iter().map(BTreeSet::len).collect();
        let mut ready: BTreeSet<usize> = remaining
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(i, _)| i)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(next) = ready.pop_first() {
            order.push(&self.nodes[next]);
            for (dependent, deps) in self.dependencies.iter().enumerate() {
                if deps.contains(&next) {
                    remaining[dependent] -= 1;
                    if remaining[dependent] == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }
        order
    }

    /// All edges as `(dependent, dependency)` pairs.
    pub fn edges(&self) -> Vec<(&StackId, &StackId)> {
        self.dependencies
            .iter()
            .enumerate()
            .flat_map(|(from, deps)| deps.iter().map(move |&to| (from, to)))
            .map(|(from, to)| (&self.nodes[from], &self.nodes[to]))
            .collect()
    }

    pub fn stacks(&self) -> &[StackId] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn position(&self, id: &StackId) -> CoreResult<usize> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| CoreError::UnknownStack(id.to_string()))
    }

    /// Dependency path from `start` to `goal`, both included.
    fn path(&self, start: usize, goal: usize) -> Option<Vec<usize>> {
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![vec![start]];
        while let Some(path) = stack.pop() {
            let node = *path.last()?;
            if node == goal {
                return Some(path);
            }
            if visited[node] {
                continue;
            }
            visited[node] = true;
            for &next in self.dependencies[node].iter().rev() {
                if !visited[next] {
                    let mut extended = path.clone();
                    extended.push(next);
                    stack.push(extended);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_config::StageName;

    fn id(name: &str) -> StackId {
        StackId::new(StageName::Dev, name)
    }

    fn graph(names: &[&str]) -> StackGraph {
        let mut graph = StackGraph::new();
        for name in names {
            graph.add_stack(id(name)).unwrap();
        }
        graph
    }

    fn names(order: Vec<&StackId>) -> Vec<String> {
        order.into_iter().map(|id| id.name.clone()).collect()
    }

    #[test]
    fn test_chain_orders_dependencies_first() {
        // Declared in reverse to show order comes from edges, not declaration.
        let mut graph = graph(&["c", "b", "a"]);
        graph.add_dependency(&id("b"), &id("a")).unwrap();
        graph.add_dependency(&id("c"), &id("b")).unwrap();

        assert_eq!(names(graph.build_order()), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_closing_the_chain_is_a_cycle() {
        let mut graph = graph(&["a", "b", "c"]);
        graph.add_dependency(&id("b"), &id("a")).unwrap();
        graph.add_dependency(&id("c"), &id("b")).unwrap();

        let err = graph.add_dependency(&id("a"), &id("c")).unwrap_err();
        match err {
            CoreError::DependencyCycle(path) => {
                assert_eq!(path, vec!["dev/a", "dev/c", "dev/b", "dev/a"]);
            }
            other => panic!("expected cycle, got {:?}", other),
        }

        // The rejected edge leaves the graph untouched.
        assert_eq!(names(graph.build_order()), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let mut graph = graph(&["a"]);
        assert!(matches!(
            graph.add_dependency(&id("a"), &id("a")),
            Err(CoreError::DependencyCycle(_))
        ));
    }

    #[test]
    fn test_unknown_and_duplicate_stacks() {
        let mut graph = graph(&["a"]);
        assert!(matches!(
            graph.add_dependency(&id("a"), &id("missing")),
            Err(CoreError::UnknownStack(name)) if name == "dev/missing"
        ));
        assert!(matches!(
            graph.add_stack(id("a")),
            Err(CoreError::DuplicateStack(_))
        ));
    }

    #[test]
    fn test_ties_follow_declaration_order() {
        let mut graph = graph(&["network", "repo", "database", "compute"]);
        graph.add_dependency(&id("database"), &id("network")).unwrap();
        graph.add_dependency(&id("compute"), &id("network")).unwrap();
        graph.add_dependency(&id("compute"), &id("database")).unwrap();
        graph.add_dependency(&id("compute"), &id("repo")).unwrap();

        assert_eq!(
            names(graph.build_order()),
            vec!["network", "repo", "database", "compute"]
        );
        assert_eq!(graph.dependencies_of(&id("compute")).unwrap().len(), 3);
        assert_eq!(
            names(graph.dependents_of(&id("network")).unwrap()),
            vec!["database", "compute"]
        );
        assert_eq!(graph.edges().len(), 4);
    }

    #[test]
    fn test_repeated_edge_is_idempotent() {
        let mut graph = graph(&["a", "b"]);
        graph.add_dependency(&id("b"), &id("a")).unwrap();
        graph.add_dependency(&id("b"), &id("a")).unwrap();
        assert_eq!(graph.edges().len(), 1);
    }
}
