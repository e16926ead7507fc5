//! Arena-style directed multigraph.
//!
//! Control-transfer graphs, call graphs and the region map all share this
//! container. Nodes and edges live in the graph itself and are addressed
//! through opaque descriptors that stay valid across unrelated mutations,
//! which keeps algorithms like dominator construction free of shared
//! ownership cycles.

#![warn(missing_docs)]
#![deny(unsafe_code)]

use std::collections::BTreeMap;

/// Stable handle of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VertexDescriptor(u64);

/// Stable handle of an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EdgeDescriptor(u64);

/// Directed multigraph with node labels `N` and edge labels `E`.
///
/// Iteration over vertices and edges is in ascending descriptor order, i.e.
/// insertion order. Removing a node cascades to its incident edges.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(bound(
        serialize = "N: serde::Serialize, E: serde::Serialize",
        deserialize = "N: serde::Deserialize<'de>, E: serde::Deserialize<'de>"
    ))
)]
pub struct Digraph<N, E> {
    next_vertex: u64,
    next_edge: u64,
    #[cfg_attr(feature = "serde", serde(with = "map_as_pairs"))]
    vertices: BTreeMap<VertexDescriptor, N>,
    #[cfg_attr(feature = "serde", serde(with = "map_as_pairs"))]
    edges: BTreeMap<EdgeDescriptor, E>,
    #[cfg_attr(feature = "serde", serde(with = "map_as_pairs"))]
    sources: BTreeMap<EdgeDescriptor, VertexDescriptor>,
    #[cfg_attr(feature = "serde", serde(with = "map_as_pairs"))]
    destinations: BTreeMap<EdgeDescriptor, VertexDescriptor>,
    #[cfg_attr(feature = "serde", serde(with = "map_as_pairs"))]
    outgoing: BTreeMap<VertexDescriptor, Vec<EdgeDescriptor>>,
    #[cfg_attr(feature = "serde", serde(with = "map_as_pairs"))]
    incoming: BTreeMap<VertexDescriptor, Vec<EdgeDescriptor>>,
}

/// Map (de)serialization as a sequence of pairs.
///
/// Descriptor-keyed maps would otherwise be rejected by formats that only
/// allow string keys, like the JSON session snapshots.
#[cfg(feature = "serde")]
pub mod map_as_pairs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    /// Serialize `map` as a sequence of `(key, value)` pairs.
    pub fn serialize<K, V, S>(map: &BTreeMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        K: Serialize + Ord,
        V: Serialize,
        S: Serializer,
    {
        serializer.collect_seq(map.iter())
    }

    /// Deserialize a sequence of `(key, value)` pairs into a map.
    pub fn deserialize<'de, K, V, D>(deserializer: D) -> Result<BTreeMap<K, V>, D::Error>
    where
        K: Deserialize<'de> + Ord,
        V: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        let pairs = Vec::<(K, V)>::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

impl<N, E> Default for Digraph<N, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N, E> Digraph<N, E> {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            next_vertex: 1,
            next_edge: 1,
            vertices: BTreeMap::new(),
            edges: BTreeMap::new(),
            sources: BTreeMap::new(),
            destinations: BTreeMap::new(),
            outgoing: BTreeMap::new(),
            incoming: BTreeMap::new(),
        }
    }

    /// Add a node labelled `label`.
    pub fn insert_vertex(&mut self, label: N) -> VertexDescriptor {
        let vx = VertexDescriptor(self.next_vertex);

        self.next_vertex += 1;
        self.vertices.insert(vx, label);
        self.outgoing.insert(vx, Vec::new());
        self.incoming.insert(vx, Vec::new());

        vx
    }

    /// Add an edge labelled `label` from `from` to `to`.
    ///
    /// Returns `None` if either endpoint is not part of the graph.
    pub fn insert_edge(
        &mut self,
        label: E,
        from: VertexDescriptor,
        to: VertexDescriptor,
    ) -> Option<EdgeDescriptor> {
        if !self.vertices.contains_key(&from) || !self.vertices.contains_key(&to) {
            return None;
        }

        let ed = EdgeDescriptor(self.next_edge);

        self.next_edge += 1;
        self.edges.insert(ed, label);
        self.sources.insert(ed, from);
        self.destinations.insert(ed, to);
        self.outgoing.get_mut(&from).expect("endpoint checked").push(ed);
        self.incoming.get_mut(&to).expect("endpoint checked").push(ed);

        Some(ed)
    }

    /// Remove a node and every edge incident to it.
    pub fn remove_vertex(&mut self, vx: VertexDescriptor) -> Option<N> {
        let label = self.vertices.remove(&vx)?;
        let mut incident: Vec<EdgeDescriptor> = self
            .outgoing
            .remove(&vx)
            .into_iter()
            .flatten()
            .chain(self.incoming.remove(&vx).into_iter().flatten())
            .collect();

        incident.sort_unstable();
        incident.dedup();

        for ed in incident {
            self.detach_edge(ed);
        }

        Some(label)
    }

    /// Remove a single edge.
    pub fn remove_edge(&mut self, ed: EdgeDescriptor) -> Option<E> {
        if !self.edges.contains_key(&ed) {
            return None;
        }

        self.detach_edge(ed)
    }

    fn detach_edge(&mut self, ed: EdgeDescriptor) -> Option<E> {
        let label = self.edges.remove(&ed)?;

        if let Some(src) = self.sources.remove(&ed) {
            if let Some(out) = self.outgoing.get_mut(&src) {
                out.retain(|e| *e != ed);
            }
        }

        if let Some(dst) = self.destinations.remove(&ed) {
            if let Some(inc) = self.incoming.get_mut(&dst) {
                inc.retain(|e| *e != ed);
            }
        }

        Some(label)
    }

    /// Number of nodes.
    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Number of edges.
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// All node descriptors, in insertion order.
    pub fn vertices(&self) -> impl Iterator<Item = VertexDescriptor> + '_ {
        self.vertices.keys().copied()
    }

    /// All edge descriptors, in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = EdgeDescriptor> + '_ {
        self.edges.keys().copied()
    }

    /// Edges leaving `vx`.
    pub fn out_edges(&self, vx: VertexDescriptor) -> impl Iterator<Item = EdgeDescriptor> + '_ {
        self.outgoing.get(&vx).into_iter().flatten().copied()
    }

    /// Edges entering `vx`.
    pub fn in_edges(&self, vx: VertexDescriptor) -> impl Iterator<Item = EdgeDescriptor> + '_ {
        self.incoming.get(&vx).into_iter().flatten().copied()
    }

    /// Number of edges entering `vx`.
    pub fn in_degree(&self, vx: VertexDescriptor) -> usize {
        self.incoming.get(&vx).map_or(0, Vec::len)
    }

    /// Number of edges leaving `vx`.
    pub fn out_degree(&self, vx: VertexDescriptor) -> usize {
        self.outgoing.get(&vx).map_or(0, Vec::len)
    }

    /// Node the edge leaves from.
    pub fn source(&self, ed: EdgeDescriptor) -> VertexDescriptor {
        self.sources[&ed]
    }

    /// Node the edge points to.
    pub fn target(&self, ed: EdgeDescriptor) -> VertexDescriptor {
        self.destinations[&ed]
    }

    /// Label of a node.
    pub fn vertex_label(&self, vx: VertexDescriptor) -> Option<&N> {
        self.vertices.get(&vx)
    }

    /// Mutable label of a node.
    pub fn vertex_label_mut(&mut self, vx: VertexDescriptor) -> Option<&mut N> {
        self.vertices.get_mut(&vx)
    }

    /// Label of an edge.
    pub fn edge_label(&self, ed: EdgeDescriptor) -> Option<&E> {
        self.edges.get(&ed)
    }

    /// Mutable label of an edge.
    pub fn edge_label_mut(&mut self, ed: EdgeDescriptor) -> Option<&mut E> {
        self.edges.get_mut(&ed)
    }

    /// Map each node descriptor to its rank in insertion order.
    ///
    /// Dominator algorithms use this to index side tables by dense integers
    /// instead of descriptors.
    pub fn vertex_index(&self) -> BTreeMap<VertexDescriptor, usize> {
        self.vertices
            .keys()
            .enumerate()
            .map(|(idx, vx)| (*vx, idx))
            .collect()
    }

    /// First node whose label satisfies `pred`.
    pub fn find_vertex(&self, mut pred: impl FnMut(&N) -> bool) -> Option<VertexDescriptor> {
        self.vertices
            .iter()
            .find(|(_, label)| pred(label))
            .map(|(vx, _)| *vx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> (Digraph<&'static str, u32>, [VertexDescriptor; 4]) {
        let mut g = Digraph::new();
        let a = g.insert_vertex("a");
        let b = g.insert_vertex("b");
        let c = g.insert_vertex("c");
        let d = g.insert_vertex("d");

        g.insert_edge(0, a, b).unwrap();
        g.insert_edge(1, a, c).unwrap();
        g.insert_edge(2, b, d).unwrap();
        g.insert_edge(3, c, d).unwrap();

        (g, [a, b, c, d])
    }

    #[test]
    fn insert_and_query() {
        let (g, [a, b, _, d]) = diamond();

        assert_eq!(g.num_vertices(), 4);
        assert_eq!(g.num_edges(), 4);
        assert_eq!(g.vertex_label(a), Some(&"a"));
        assert_eq!(g.out_degree(a), 2);
        assert_eq!(g.in_degree(d), 2);

        let ab = g.out_edges(a).next().unwrap();
        assert_eq!(g.source(ab), a);
        assert_eq!(g.target(ab), b);
        assert_eq!(g.edge_label(ab), Some(&0));
    }

    #[test]
    fn remove_vertex_cascades() {
        let (mut g, [a, b, c, d]) = diamond();

        assert_eq!(g.remove_vertex(b), Some("b"));
        assert_eq!(g.num_vertices(), 3);
        assert_eq!(g.num_edges(), 2);
        assert_eq!(g.out_degree(a), 1);
        assert_eq!(g.in_degree(d), 1);
        assert!(g.vertex_label(b).is_none());

        // untouched descriptors stay valid
        assert_eq!(g.vertex_label(c), Some(&"c"));
        assert_eq!(g.vertex_label(d), Some(&"d"));
    }

    #[test]
    fn remove_edge_keeps_endpoints() {
        let (mut g, [a, b, _, _]) = diamond();
        let ab = g.out_edges(a).next().unwrap();

        assert_eq!(g.remove_edge(ab), Some(0));
        assert_eq!(g.remove_edge(ab), None);
        assert_eq!(g.num_edges(), 3);
        assert_eq!(g.vertex_label(b), Some(&"b"));
    }

    #[test]
    fn parallel_edges_and_self_loops() {
        let mut g = Digraph::<(), &'static str>::new();
        let v = g.insert_vertex(());
        let w = g.insert_vertex(());

        g.insert_edge("x", v, w).unwrap();
        g.insert_edge("y", v, w).unwrap();
        g.insert_edge("loop", v, v).unwrap();

        assert_eq!(g.out_degree(v), 3);
        assert_eq!(g.in_degree(w), 2);
        assert_eq!(g.in_degree(v), 1);

        g.remove_vertex(v);
        assert_eq!(g.num_edges(), 0);
    }

    #[test]
    fn dangling_endpoint_is_rejected() {
        let mut g = Digraph::<(), ()>::new();
        let v = g.insert_vertex(());
        let w = g.insert_vertex(());

        g.remove_vertex(w);
        assert_eq!(g.insert_edge((), v, w), None);
    }

    #[test]
    fn vertex_index_is_dense() {
        let (g, [a, b, c, d]) = diamond();
        let idx = g.vertex_index();

        assert_eq!(idx[&a], 0);
        assert_eq!(idx[&b], 1);
        assert_eq!(idx[&c], 2);
        assert_eq!(idx[&d], 3);
    }

    #[test]
    fn serde_round_trip() {
        let (g, [a, _, _, _]) = diamond();
        let bytes = bincode::serialize(&g).unwrap();
        let g2: Digraph<&str, u32> = bincode::deserialize(&bytes).unwrap();

        assert_eq!(g2.num_vertices(), 4);
        assert_eq!(g2.num_edges(), 4);
        assert_eq!(g2.vertex_label(a), Some(&"a"));
    }
}
