//! `DependencyGraph`: module-to-module edges derived from declared contracts.

use indexmap::IndexMap;
use petgraph::algo::{is_cyclic_directed, tarjan_scc};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::module::ModuleDescriptor;

/// Why one module must come before another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    /// `from` declares output `name`, which `to` declares as an input.
    Object { name: String },
    /// `to` is a literal child of group `from`.
    Child,
    /// `to` lists `from` as a required package.
    Package,
}

impl EdgeKind {
    /// Child and package edges must be honoured by the load order; object
    /// edges are honoured only where they are acyclic.
    pub fn is_hard(&self) -> bool {
        !matches!(self, EdgeKind::Object { .. })
    }
}

/// A directed edge `from -> to`: `from` loads before `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepEdge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
}

/// Modules and the dependency edges between them. Node order follows the
/// order descriptors were supplied in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyGraph {
    nodes: Vec<String>,
    edges: Vec<DepEdge>,
}

impl DependencyGraph {
    /// Build the graph for `descriptors`. Duplicate names collapse onto the
    /// first occurrence; self-edges are never added.
    pub fn build(descriptors: &[ModuleDescriptor]) -> Self {
        let mut graph = DependencyGraph::default();
        for d in descriptors {
            graph.add_node(&d.name);
        }
        for consumer in descriptors {
            for input in consumer.input_names() {
                for producer in descriptors {
                    if producer.name != consumer.name && producer.declares_output(input) {
                        graph.add_edge(
                            &producer.name,
                            &consumer.name,
                            EdgeKind::Object {
                                name: input.to_string(),
                            },
                        );
                    }
                }
            }
            for package in &consumer.packages {
                if graph.contains(package) {
                    graph.add_edge(package, &consumer.name, EdgeKind::Package);
                }
            }
            for child in &consumer.children {
                if graph.contains(child) {
                    graph.add_edge(&consumer.name, child, EdgeKind::Child);
                }
            }
        }
        graph
    }

    pub fn add_node(&mut self, name: &str) {
        if !self.contains(name) {
            self.nodes.push(name.to_string());
        }
    }

    /// Add an edge, ignoring self-edges and exact duplicates.
    pub fn add_edge(&mut self, from: &str, to: &str, kind: EdgeKind) {
        if from == to {
            return;
        }
        let edge = DepEdge {
            from: from.to_string(),
            to: to.to_string(),
            kind,
        };
        if !self.edges.contains(&edge) {
            self.add_node(from);
            self.add_node(to);
            self.edges.push(edge);
        }
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn edges(&self) -> &[DepEdge] {
        &self.edges
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.iter().any(|n| n == name)
    }

    /// Edges leaving `name`.
    pub fn dependents_of<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a DepEdge> + 'a {
        self.edges.iter().filter(move |e| e.from == name)
    }

    /// Edges entering `name`.
    pub fn dependencies_of<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a DepEdge> + 'a {
        self.edges.iter().filter(move |e| e.to == name)
    }

    /// Convert to a `petgraph` graph. The map gives each module's node index.
    pub fn to_petgraph(&self) -> (DiGraph<String, EdgeKind>, IndexMap<String, NodeIndex>) {
        self.filtered_petgraph(|_| true)
    }

    pub(crate) fn filtered_petgraph(
        &self,
        keep: impl Fn(&DepEdge) -> bool,
    ) -> (DiGraph<String, EdgeKind>, IndexMap<String, NodeIndex>) {
        let mut graph = DiGraph::new();
        let mut index = IndexMap::new();
        for name in &self.nodes {
            index.insert(name.clone(), graph.add_node(name.clone()));
        }
        for edge in self.edges.iter().filter(|e| keep(e)) {
            if let (Some(&a), Some(&b)) = (index.get(&edge.from), index.get(&edge.to)) {
                graph.add_edge(a, b, edge.kind.clone());
            }
        }
        (graph, index)
    }

    /// `true` if any cycle exists over all edges.
    pub fn is_acyclic(&self) -> bool {
        !is_cyclic_directed(&self.to_petgraph().0)
    }

    /// Groups of modules that lie on a common cycle, in node order.
    pub fn cycles(&self) -> Vec<Vec<String>> {
        self.cycles_where(|_| true)
    }

    pub(crate) fn cycles_where(&self, keep: impl Fn(&DepEdge) -> bool) -> Vec<Vec<String>> {
        let (graph, _) = self.filtered_petgraph(keep);
        let mut out: Vec<Vec<String>> = tarjan_scc(&graph)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .map(|scc| {
                let mut members: Vec<NodeIndex> = scc;
                members.sort();
                members.into_iter().map(|i| graph[i].clone()).collect()
            })
            .collect();
        out.sort_by_key(|c| self.position(&c[0]));
        out
    }

    fn position(&self, name: &str) -> usize {
        self.nodes.iter().position(|n| n == name).unwrap_or(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_edges() {
        let graph = DependencyGraph::build(&[
            ModuleDescriptor::new("gen").output("map", "Raster"),
            ModuleDescriptor::new("use").input("map", "Raster"),
        ]);
        assert_eq!(graph.nodes(), &["gen".to_string(), "use".to_string()]);
        assert_eq!(
            graph.edges(),
            &[DepEdge {
                from: "gen".into(),
                to: "use".into(),
                kind: EdgeKind::Object { name: "map".into() },
            }]
        );
        assert!(graph.is_acyclic());
    }

    #[test]
    fn test_package_and_child_edges() {
        let graph = DependencyGraph::build(&[
            ModuleDescriptor::new("base"),
            ModuleDescriptor::new("app").package("base").package("serde"),
            ModuleDescriptor::new("group").child("app"),
        ]);
        let kinds: Vec<_> = graph.edges().iter().map(|e| e.kind.clone()).collect();
        assert_eq!(kinds, vec![EdgeKind::Package, EdgeKind::Child]);
        assert_eq!(graph.dependencies_of("app").count(), 2);
        assert_eq!(graph.dependents_of("base").count(), 1);
    }

    #[test]
    fn test_self_edges_ignored() {
        let graph = DependencyGraph::build(&[ModuleDescriptor::new("loop")
            .input("x", "")
            .output("x", "")]);
        assert!(graph.edges().is_empty());
    }

    #[test]
    fn test_cycles_reported() {
        let graph = DependencyGraph::build(&[
            ModuleDescriptor::new("a").input("y", "").output("x", ""),
            ModuleDescriptor::new("b").input("x", "").output("y", ""),
            ModuleDescriptor::new("c").input("x", ""),
        ]);
        assert!(!graph.is_acyclic());
        assert_eq!(graph.cycles(), vec![vec!["a".to_string(), "b".to_string()]]);
        let (pg, index) = graph.to_petgraph();
        assert_eq!(pg.node_count(), 3);
        assert_eq!(pg.edge_count(), 3);
        assert_eq!(index.len(), 3);
    }
}
