// src/dag/graph.rs

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;

use crate::errors::{Result, WpflowError};
use crate::types::UnitId;
use crate::units::UnitMetadata;

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone, Default)]
struct DagNode {
    /// Direct dependencies: units that must complete before this one starts.
    deps: Vec<UnitId>,
    /// Direct dependents: units that list this one as a dependency.
    dependents: Vec<UnitId>,
}

/// Dependency graph keyed by unit id ("depends on" adjacency).
///
/// Built once per run and never mutated afterwards. Nodes are kept in a
/// `BTreeMap` so every iteration order (and therefore every scheduling
/// decision derived from it) is deterministic.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<UnitId, DagNode>,
}

impl DependencyGraph {
    /// Build the graph from unit metadata.
    ///
    /// Fails with [`WpflowError::MalformedDependency`] listing every
    /// dangling reference or duplicate id. Cycles are *not* rejected here;
    /// use [`detect_cycles`](Self::detect_cycles) or
    /// [`topological_sort`](Self::topological_sort).
    pub fn build(units: &[UnitMetadata]) -> Result<Self> {
        let mut nodes: BTreeMap<UnitId, DagNode> = BTreeMap::new();
        let mut problems = Vec::new();

        for unit in units {
            let mut deps = unit.dependencies.clone();
            deps.sort();
            deps.dedup();

            if nodes
                .insert(
                    unit.id.clone(),
                    DagNode {
                        deps,
                        dependents: Vec::new(),
                    },
                )
                .is_some()
            {
                problems.push(format!("unit '{}' is declared more than once", unit.id));
            }
        }

        let graph = Self::link(nodes);
        let known: BTreeSet<UnitId> = graph.nodes.keys().cloned().collect();
        problems.extend(graph.validate(&known));

        if problems.is_empty() {
            Ok(graph)
        } else {
            Err(WpflowError::MalformedDependency(problems))
        }
    }

    /// Populate dependents based on deps.
    fn link(mut nodes: BTreeMap<UnitId, DagNode>) -> Self {
        let edges: Vec<(UnitId, UnitId)> = nodes
            .iter()
            .flat_map(|(id, node)| node.deps.iter().map(move |dep| (dep.clone(), id.clone())))
            .collect();

        for (dep, dependent) in edges {
            if let Some(dep_node) = nodes.get_mut(&dep) {
                dep_node.dependents.push(dependent);
            }
        }

        Self { nodes }
    }

    /// All unit ids, in lexicographic order.
    pub fn units(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Immediate dependencies of a unit.
    pub fn dependencies_of(&self, id: &str) -> &[UnitId] {
        self.nodes
            .get(id)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a unit.
    pub fn dependents_of(&self, id: &str) -> &[UnitId] {
        self.nodes
            .get(id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Every unit that depends on `id` directly or transitively, sorted.
    pub fn transitive_dependents(&self, id: &str) -> Vec<UnitId> {
        let mut seen: BTreeSet<UnitId> = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([id]);

        while let Some(current) = queue.pop_front() {
            for dependent in self.dependents_of(current) {
                if dependent != id && seen.insert(dependent.clone()) {
                    queue.push_back(dependent.as_str());
                }
            }
        }

        seen.into_iter().collect()
    }

    /// Return the members of one dependency cycle, or `None` if the graph is
    /// acyclic.
    ///
    /// Uses Tarjan's (DFS based) strongly connected components; a component
    /// with more than one member, or a unit that depends on itself, is a
    /// cycle. Members are returned sorted.
    pub fn detect_cycles(&self) -> Option<Vec<UnitId>> {
        // Edge direction: dep -> unit.
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

        for id in self.nodes.keys() {
            graph.add_node(id.as_str());
        }
        for (id, node) in self.nodes.iter() {
            for dep in node.deps.iter().filter(|d| self.nodes.contains_key(*d)) {
                graph.add_edge(dep.as_str(), id.as_str(), ());
            }
        }

        tarjan_scc(&graph).into_iter().find_map(|component| {
            let is_cycle = component.len() > 1
                || component
                    .first()
                    .is_some_and(|node| graph.contains_edge(*node, *node));
            if !is_cycle {
                return None;
            }
            let mut members: Vec<UnitId> = component.iter().map(|s| s.to_string()).collect();
            members.sort();
            Some(members)
        })
    }

    /// Kahn's algorithm with lexicographic tie-breaking among units whose
    /// in-degree drops to zero at the same time.
    ///
    /// Fails with [`WpflowError::DependencyCycle`] rather than dropping the
    /// units that could not be ordered.
    pub fn topological_sort(&self) -> Result<Vec<UnitId>> {
        let mut in_degree: BTreeMap<&str, usize> = self
            .nodes
            .iter()
            .map(|(id, node)| {
                let degree = node
                    .deps
                    .iter()
                    .filter(|d| self.nodes.contains_key(*d))
                    .count();
                (id.as_str(), degree)
            })
            .collect();

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(id) = ready.pop_first() {
            order.push(id.to_string());
            for dependent in self.dependents_of(id) {
                if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(dependent.as_str());
                    }
                }
            }
        }

        if order.len() < self.nodes.len() {
            let remaining: Vec<UnitId> = in_degree
                .iter()
                .filter(|(_, degree)| **degree > 0)
                .map(|(id, _)| id.to_string())
                .collect();
            return Err(WpflowError::DependencyCycle(
                self.detect_cycles().unwrap_or(remaining),
            ));
        }

        Ok(order)
    }

    /// Check the graph against the set of known unit ids.
    ///
    /// Returns one message per problem (empty when valid) so that every
    /// dangling reference surfaces at once.
    pub fn validate(&self, known_ids: &BTreeSet<UnitId>) -> Vec<String> {
        let mut problems = Vec::new();

        for (id, node) in self.nodes.iter() {
            if !known_ids.contains(id) {
                problems.push(format!("unit '{}' is not among the known units", id));
            }
            for dep in node.deps.iter() {
                if !known_ids.contains(dep) {
                    problems.push(format!("unit '{}' depends on unknown unit '{}'", id, dep));
                }
            }
        }

        problems
    }
}
