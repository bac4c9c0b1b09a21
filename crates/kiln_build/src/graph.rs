//! The project dependency graph.
//!
//! Edges point from a dependency to its dependents, so a topological order
//! of the graph is a valid compilation order.

use std::collections::{HashMap, HashSet};

use kiln_common::{Project, ProjectId};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction::{Incoming, Outgoing};

use crate::error::BuildError;

/// A validated, acyclic set of projects.
#[derive(Debug)]
pub struct BuildGraph {
    graph: DiGraph<Project, ()>,
    index: HashMap<ProjectId, NodeIndex>,
    order: Vec<NodeIndex>,
}

impl BuildGraph {
    /// Builds the graph, rejecting duplicate names, dependencies on unknown
    /// projects, and cycles.
    pub fn new(projects: impl IntoIterator<Item = Project>) -> Result<Self, BuildError> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for project in projects {
            let id = project.id.clone();
            if index.contains_key(&id) {
                return Err(BuildError::DuplicateProject(id.to_string()));
            }
            index.insert(id, graph.add_node(project));
        }

        let mut edges = Vec::new();
        for node in graph.node_indices() {
            let project = &graph[node];
            for dep in &project.dependencies {
                let Some(&dep_node) = index.get(dep) else {
                    return Err(BuildError::UnknownDependency {
                        project: project.id.to_string(),
                        dependency: dep.to_string(),
                    });
                };
                edges.push((dep_node, node));
            }
        }
        for (from, to) in edges {
            graph.update_edge(from, to, ());
        }

        let order = toposort(&graph, None)
            .map_err(|cycle| BuildError::Cycle(graph[cycle.node_id()].id.to_string()))?;

        Ok(Self {
            graph,
            index,
            order,
        })
    }

    /// Number of projects.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns `true` if the graph has no projects.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Looks up a project by name.
    pub fn project(&self, id: &ProjectId) -> Option<&Project> {
        self.index.get(id).map(|&node| &self.graph[node])
    }

    /// All projects in dependency order.
    pub fn projects(&self) -> impl Iterator<Item = &Project> {
        self.order.iter().map(|&node| &self.graph[node])
    }

    /// The requested projects plus all their transitive dependencies, in
    /// dependency order (every project after all of its dependencies).
    pub fn closure(&self, requested: &[ProjectId]) -> Result<Vec<ProjectId>, BuildError> {
        let mut seen = HashSet::new();
        let mut stack = Vec::new();
        for id in requested {
            let node = self
                .index
                .get(id)
                .copied()
                .ok_or_else(|| BuildError::UnknownProject(id.to_string()))?;
            stack.push(node);
        }
        while let Some(node) = stack.pop() {
            if seen.insert(node) {
                stack.extend(self.graph.neighbors_directed(node, Incoming));
            }
        }
        Ok(self
            .order
            .iter()
            .filter(|node| seen.contains(*node))
            .map(|&node| self.graph[node].id.clone())
            .collect())
    }

    /// Projects that directly depend on `id`, sorted by name.
    pub fn dependents(&self, id: &ProjectId) -> Vec<ProjectId> {
        let Some(&node) = self.index.get(id) else {
            return Vec::new();
        };
        let mut dependents: Vec<ProjectId> = self
            .graph
            .neighbors_directed(node, Outgoing)
            .map(|n| self.graph[n].id.clone())
            .collect();
        dependents.sort();
        dependents
    }
}
