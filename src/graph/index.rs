use rustc_hash::{FxHashMap, FxHashSet};

use crate::types::NodeId;

/// Result of [`GraphIndex::add_edge`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EdgeOutcome {
    /// Self-loop or a missing endpoint.
    Invalid,
    /// Both directions were already present.
    AlreadyExists,
    /// The edge was inserted.
    Created,
}

#[derive(Clone, Debug, Default)]
struct Vertex {
    // Insertion order; enumeration walks it backwards.
    adjacency: Vec<NodeId>,
    members: FxHashSet<NodeId>,
}

impl Vertex {
    fn link(&mut self, other: NodeId) -> bool {
        if !self.members.insert(other) {
            return false;
        }
        self.adjacency.push(other);
        true
    }

    fn unlink(&mut self, other: NodeId) -> bool {
        if !self.members.remove(&other) {
            return false;
        }
        if let Some(pos) = self.adjacency.iter().rposition(|id| *id == other) {
            self.adjacency.remove(pos);
        }
        true
    }

    fn contains(&self, other: NodeId) -> bool {
        self.members.contains(&other)
    }
}

/// In-memory adjacency index for one partition.
///
/// Edges are undirected and stored in both endpoints. `edge_count` counts each
/// undirected edge once.
#[derive(Clone, Debug, Default)]
pub struct GraphIndex {
    vertices: FxHashMap<NodeId, Vertex>,
    esize: u64,
}

impl GraphIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of vertices.
    pub fn len(&self) -> u64 {
        self.vertices.len() as u64
    }

    /// Returns true if the index holds no vertex.
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Number of undirected edges.
    pub fn edge_count(&self) -> u64 {
        self.esize
    }

    /// Inserts `id`; false if it was already present.
    pub fn add_vertex(&mut self, id: NodeId) -> bool {
        if self.vertices.contains_key(&id) {
            return false;
        }
        self.vertices.insert(id, Vertex::default());
        true
    }

    /// Removes `id` together with every edge touching it.
    pub fn remove_vertex(&mut self, id: NodeId) -> bool {
        let Some(vertex) = self.vertices.remove(&id) else {
            return false;
        };
        for neighbor in vertex.adjacency {
            if let Some(other) = self.vertices.get_mut(&neighbor) {
                other.unlink(id);
            }
            self.esize -= 1;
        }
        true
    }

    /// Returns true if `id` is present.
    pub fn vertex_exists(&self, id: NodeId) -> bool {
        self.vertices.contains_key(&id)
    }

    /// Inserts the undirected edge `(a, b)`.
    pub fn add_edge(&mut self, a: NodeId, b: NodeId) -> EdgeOutcome {
        if a == b || !self.vertex_exists(a) || !self.vertex_exists(b) {
            return EdgeOutcome::Invalid;
        }
        if self.edge_exists(a, b) {
            return EdgeOutcome::AlreadyExists;
        }
        if let Some(vertex) = self.vertices.get_mut(&a) {
            vertex.link(b);
        }
        if let Some(vertex) = self.vertices.get_mut(&b) {
            vertex.link(a);
        }
        self.esize += 1;
        EdgeOutcome::Created
    }

    /// Removes the undirected edge `(a, b)`; false if it was not present.
    pub fn remove_edge(&mut self, a: NodeId, b: NodeId) -> bool {
        if !self.edge_exists(a, b) {
            return false;
        }
        if let Some(vertex) = self.vertices.get_mut(&a) {
            vertex.unlink(b);
        }
        if let Some(vertex) = self.vertices.get_mut(&b) {
            vertex.unlink(a);
        }
        self.esize -= 1;
        true
    }

    /// True only when each endpoint lists the other.
    pub fn edge_exists(&self, a: NodeId, b: NodeId) -> bool {
        match (self.vertices.get(&a), self.vertices.get(&b)) {
            (Some(va), Some(vb)) => va.contains(b) && vb.contains(a),
            _ => false,
        }
    }

    /// Neighbors of `id`, most recently added first. `None` if `id` is absent.
    pub fn neighbors(&self, id: NodeId) -> Option<impl Iterator<Item = NodeId> + '_> {
        self.vertices
            .get(&id)
            .map(|vertex| vertex.adjacency.iter().rev().copied())
    }

    /// Number of edges touching `id`.
    pub fn degree(&self, id: NodeId) -> Option<usize> {
        self.vertices.get(&id).map(|vertex| vertex.adjacency.len())
    }

    /// Every vertex id, in no particular order.
    pub fn vertex_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.vertices.keys().copied()
    }

    /// Every undirected edge once, as `(smaller, larger)`.
    pub fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.vertices.iter().flat_map(|(id, vertex)| {
            vertex
                .adjacency
                .iter()
                .filter(move |other| *id < **other)
                .map(move |other| (*id, *other))
        })
    }
}
