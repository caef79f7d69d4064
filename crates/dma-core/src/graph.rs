//! Bus connectivity analysis.
//!
//! Builds an undirected bus graph from the snapshot's AC lines and
//! transformers and labels connected components with a breadth-first
//! search. The largest component is the *main* one; devices connected
//! outside it are assigned "dangling" model variants by the selection
//! rules.

use crate::{BusId, NetworkSnapshot};
use petgraph::graph::{NodeIndex, UnGraph};
use std::collections::{HashMap, HashSet, VecDeque};

/// Buses of the main (largest) connected component.
///
/// Disconnected lines and transformers do not contribute edges. An empty
/// snapshot yields an empty set.
pub fn main_connected_component(snapshot: &NetworkSnapshot) -> HashSet<BusId> {
    let mut graph: UnGraph<&str, ()> = UnGraph::default();
    let mut indices: HashMap<&str, NodeIndex> = HashMap::new();

    for node in snapshot.nodes() {
        let idx = graph.add_node(node.id.as_str());
        indices.insert(node.id.as_str(), idx);
    }
    let edges = snapshot
        .lines()
        .iter()
        .filter(|l| l.connected)
        .map(|l| (l.bus1.as_str(), l.bus2.as_str()))
        .chain(
            snapshot
                .transformers()
                .iter()
                .filter(|t| t.connected)
                .map(|t| (t.bus1.as_str(), t.bus2.as_str())),
        );
    for (a, b) in edges {
        if let (Some(&ia), Some(&ib)) = (indices.get(a), indices.get(b)) {
            graph.add_edge(ia, ib, ());
        }
    }

    let mut visited = HashSet::new();
    let mut best: Vec<NodeIndex> = Vec::new();
    for start in graph.node_indices() {
        if visited.contains(&start) {
            continue;
        }
        let mut queue = VecDeque::new();
        queue.push_back(start);
        let mut members = Vec::new();
        while let Some(node) = queue.pop_front() {
            if !visited.insert(node) {
                continue;
            }
            members.push(node);
            for neighbor in graph.neighbors(node) {
                if !visited.contains(&neighbor) {
                    queue.push_back(neighbor);
                }
            }
        }
        if members.len() > best.len() {
            best = members;
        }
    }

    best.into_iter().map(|i| graph[i].to_string()).collect()
}
