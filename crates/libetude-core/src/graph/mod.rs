//! The directed-acyclic operator graph: nodes, edges, topological order,
//! cycle detection, and serial execution.
//!
//! # Architecture
//!
//! Edges reference nodes by [`NodeId`] — an arena index into the graph's
//! node vector — rather than by owning pointer. This is deliberate: node
//! adjacency is naturally cyclic in representation (a node's `outgoing` list
//! points at nodes that may point back at it through other edges), and
//! arena indices break that reference cycle while still giving O(1) lookup
//! and tombstoned removal.
//!
//! # Two-phase build
//!
//! A [`Graph`] is mutated (`add_node`/`connect`/...) and then
//! [`topological_sort`](Graph::topological_sort)ed before
//! [`execute`](Graph::execute) will run it; optimizer passes
//! (see [`crate::optimizer`]) run between those two phases and clear
//! `is_sorted` so the executor re-sorts once before running.

pub mod edge;
pub mod node;

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

pub use edge::EdgeId;
pub use node::{NodeId, NodeState};
use node::NodeRecord;
use edge::Edge;

use crate::error::{LibetudeError, Result};
use crate::pool::MemoryPool;
use crate::registry::{AttributeHandle, OperatorRegistry};
use crate::tensor::Shape;

/// Errors specific to graph topology operations, distinct from the general
/// [`crate::error::LibetudeError`] taxonomy only in that they always carry
/// one of these causes; `From<GraphError> for LibetudeError` maps each
/// variant onto the matching closed-taxonomy kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Referenced a `NodeId` not present (or since removed) in this graph.
    NodeNotFound(NodeId),
    /// Referenced an `EdgeId` not present (or since removed) in this graph.
    EdgeNotFound(EdgeId),
    /// `connect(a, a)` was attempted.
    SelfLoop(NodeId),
    /// An identical edge already exists between these two nodes/slots.
    DuplicateEdge(NodeId, NodeId),
    /// `topological_sort` found every node could not be ordered: a cycle.
    Cycle,
    /// A node name was not unique, or `find_by_name` failed.
    NameConflict(String),
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::NodeNotFound(id) => write!(f, "node {} not found", id.index()),
            GraphError::EdgeNotFound(id) => write!(f, "edge {} not found", id.index()),
            GraphError::SelfLoop(id) => write!(f, "self-loop rejected on node {}", id.index()),
            GraphError::DuplicateEdge(a, b) => {
                write!(f, "duplicate edge {} -> {}", a.index(), b.index())
            }
            GraphError::Cycle => write!(f, "graph contains a cycle"),
            GraphError::NameConflict(name) => write!(f, "name conflict: '{name}'"),
        }
    }
}

impl From<GraphError> for LibetudeError {
    fn from(e: GraphError) -> Self {
        match e {
            GraphError::NodeNotFound(_) | GraphError::EdgeNotFound(_) => LibetudeError::not_found(e.to_string()),
            GraphError::SelfLoop(_) | GraphError::NameConflict(_) => {
                LibetudeError::invalid_argument(e.to_string())
            }
            GraphError::DuplicateEdge(..) => LibetudeError::already_exists(e.to_string()),
            GraphError::Cycle => LibetudeError::cycle(e.to_string()),
        }
    }
}

/// A directed-acyclic operator graph: nodes plus an operator registry and a
/// memory pool backing node allocation.
pub struct Graph {
    nodes: Vec<Option<NodeRecord>>,
    edges: Vec<Option<Edge>>,
    registry: Arc<OperatorRegistry>,
    pool: MemoryPool,
    execution_order: Vec<NodeId>,
    is_sorted: bool,
    is_optimized: bool,
    input_nodes: Vec<NodeId>,
    output_nodes: Vec<NodeId>,
}

impl Graph {
    /// Creates an empty graph backed by `pool` and resolving operator names
    /// through `registry`.
    pub fn new(registry: Arc<OperatorRegistry>, pool: MemoryPool) -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            registry,
            pool,
            execution_order: Vec::new(),
            is_sorted: false,
            is_optimized: false,
            input_nodes: Vec::new(),
            output_nodes: Vec::new(),
        }
    }

    /// The memory pool backing this graph's node storage and tensors.
    pub fn pool(&self) -> &MemoryPool {
        &self.pool
    }

    /// The operator registry this graph resolves `op_type` strings against.
    pub fn registry(&self) -> &OperatorRegistry {
        &self.registry
    }

    /// Adds a node. The new node's `execution_order` starts at -1
    /// (unsorted); tensor data for its inputs/outputs is allocated from
    /// `self.pool` per invocation, not at add time.
    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        op_type: impl Into<String>,
        attrs: AttributeHandle,
        input_shapes: Vec<Shape>,
        output_shapes: Vec<Shape>,
    ) -> Result<NodeId> {
        let name = name.into();
        if self.find_by_name(&name).is_some() {
            return Err(GraphError::NameConflict(name).into());
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Some(NodeRecord {
            name,
            op_type: op_type.into(),
            attrs,
            input_shapes,
            output_shapes,
            incoming: Vec::new(),
            outgoing: Vec::new(),
            execution_order: -1,
            state: NodeState::Ready,
            is_designated_output: false,
        }));
        self.is_sorted = false;
        Ok(id)
    }

    /// Marks `node` as a designated graph output (consulted by dead-code
    /// elimination and by result-collection after execution).
    pub fn mark_output(&mut self, node: NodeId) -> Result<()> {
        self.node_mut(node)?.is_designated_output = true;
        if !self.output_nodes.contains(&node) {
            self.output_nodes.push(node);
        }
        Ok(())
    }

    /// Marks `node` as a designated graph input.
    pub fn mark_input(&mut self, node: NodeId) -> Result<()> {
        self.node(node)?;
        if !self.input_nodes.contains(&node) {
            self.input_nodes.push(node);
        }
        Ok(())
    }

    /// The designated output nodes.
    pub fn output_nodes(&self) -> &[NodeId] {
        &self.output_nodes
    }

    /// The designated input nodes.
    pub fn input_nodes(&self) -> &[NodeId] {
        &self.input_nodes
    }

    /// Removes a node and every edge touching it (tombstones the slot; the
    /// `NodeId` becomes permanently invalid, never reused).
    pub fn remove_node(&mut self, id: NodeId) -> Result<()> {
        self.node(id)?;
        let incoming = self.node(id)?.incoming.clone();
        let outgoing = self.node(id)?.outgoing.clone();
        for e in incoming.into_iter().chain(outgoing) {
            // An edge touching both endpoints of a just-removed neighbor
            // may already be gone; ignore NotFound from a prior iteration.
            let _ = self.disconnect(e);
        }
        self.nodes[id.0 as usize] = None;
        self.input_nodes.retain(|n| *n != id);
        self.output_nodes.retain(|n| *n != id);
        self.is_sorted = false;
        Ok(())
    }

    /// Connects `src`'s output slot 0 to `dst`'s input slot 0. Use
    /// [`connect_slots`](Self::connect_slots) for multi-input/output nodes.
    pub fn connect(&mut self, src: NodeId, dst: NodeId) -> Result<EdgeId> {
        self.connect_slots(src, 0, dst, 0)
    }

    /// Connects `src`'s output `src_slot` to `dst`'s input `dst_slot`.
    /// Rejects self-loops and exact-duplicate edges.
    pub fn connect_slots(&mut self, src: NodeId, src_slot: usize, dst: NodeId, dst_slot: usize) -> Result<EdgeId> {
        self.node(src)?;
        self.node(dst)?;
        if src == dst {
            return Err(GraphError::SelfLoop(src).into());
        }
        if self.has_edge(src, src_slot, dst, dst_slot) {
            return Err(GraphError::DuplicateEdge(src, dst).into());
        }
        let id = EdgeId(self.edges.len() as u32);
        self.edges.push(Some(Edge { src, src_slot, dst, dst_slot }));
        self.node_mut(src)?.outgoing.push(id);
        self.node_mut(dst)?.incoming.push(id);
        self.is_sorted = false;
        Ok(id)
    }

    /// Removes an edge.
    pub fn disconnect(&mut self, id: EdgeId) -> Result<()> {
        let edge = self
            .edges
            .get(id.0 as usize)
            .and_then(|e| *e)
            .ok_or(GraphError::EdgeNotFound(id))?;
        self.edges[id.0 as usize] = None;
        if let Some(node) = self.nodes.get_mut(edge.src.0 as usize).and_then(|n| n.as_mut()) {
            node.outgoing.retain(|e| *e != id);
        }
        if let Some(node) = self.nodes.get_mut(edge.dst.0 as usize).and_then(|n| n.as_mut()) {
            node.incoming.retain(|e| *e != id);
        }
        self.is_sorted = false;
        Ok(())
    }

    fn has_edge(&self, src: NodeId, src_slot: usize, dst: NodeId, dst_slot: usize) -> bool {
        self.edges.iter().flatten().any(|e| {
            e.src == src && e.src_slot == src_slot && e.dst == dst && e.dst_slot == dst_slot
        })
    }

    /// Finds a node by its unique name.
    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .find_map(|(i, n)| n.as_ref().filter(|n| n.name == name).map(|_| NodeId(i as u32)))
    }

    /// Number of live (non-removed) nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    /// Number of live edges.
    pub fn edge_count(&self) -> usize {
        self.edges.iter().filter(|e| e.is_some()).count()
    }

    /// Whether the graph has been topologically sorted since its last
    /// structural mutation.
    pub fn is_sorted(&self) -> bool {
        self.is_sorted
    }

    /// Whether an optimizer pass has run since the last sort.
    pub fn is_optimized(&self) -> bool {
        self.is_optimized
    }

    pub(crate) fn set_optimized(&mut self, value: bool) {
        self.is_optimized = value;
    }

    /// The execution order assigned by the last successful
    /// [`topological_sort`](Self::topological_sort).
    pub fn execution_order(&self) -> &[NodeId] {
        &self.execution_order
    }

    /// A node's `op_type` string.
    pub fn op_type(&self, id: NodeId) -> Result<&str> {
        Ok(&self.node(id)?.op_type)
    }

    /// Rewrites a node's `op_type` in place (used by operator fusion).
    pub fn set_op_type(&mut self, id: NodeId, op_type: impl Into<String>) -> Result<()> {
        self.node_mut(id)?.op_type = op_type.into();
        Ok(())
    }

    /// A node's current execution state.
    pub fn state(&self, id: NodeId) -> Result<NodeState> {
        Ok(self.node(id)?.state)
    }

    pub(crate) fn set_state(&mut self, id: NodeId, state: NodeState) -> Result<()> {
        self.node_mut(id)?.state = state;
        Ok(())
    }

    /// Incoming edges of `id`.
    pub fn incoming(&self, id: NodeId) -> Result<&[EdgeId]> {
        Ok(&self.node(id)?.incoming)
    }

    /// Outgoing edges of `id`.
    pub fn outgoing(&self, id: NodeId) -> Result<&[EdgeId]> {
        Ok(&self.node(id)?.outgoing)
    }

    /// The endpoints of an edge: `(src, dst)`.
    pub fn endpoints(&self, id: EdgeId) -> Result<(NodeId, NodeId)> {
        let e = self.edges.get(id.0 as usize).and_then(|e| *e).ok_or(GraphError::EdgeNotFound(id))?;
        Ok((e.src, e.dst))
    }

    /// All live node IDs, in storage (insertion) order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().enumerate().filter_map(|(i, n)| n.is_some().then(|| NodeId(i as u32)))
    }

    fn node(&self, id: NodeId) -> Result<&NodeRecord> {
        self.nodes
            .get(id.0 as usize)
            .and_then(|n| n.as_ref())
            .ok_or_else(|| GraphError::NodeNotFound(id).into())
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeRecord> {
        self.nodes
            .get_mut(id.0 as usize)
            .and_then(|n| n.as_mut())
            .ok_or(GraphError::NodeNotFound(id))
            .map_err(LibetudeError::from)
    }

    /// Runs Kahn's algorithm: initializes a queue with zero-in-degree nodes
    /// in insertion order, dequeues FIFO into `execution_order`, decrements
    /// downstream in-degrees, enqueues newly-zeroed nodes. FIFO order (not
    /// merely the order in which in-degrees happen to hit zero) makes the
    /// result deterministic and stable across runs of the same graph. If
    /// any node remains un-queued, the graph has a cycle and this returns
    /// `GraphError::Cycle` without mutating `execution_order`.
    pub fn topological_sort(&mut self) -> Result<()> {
        let mut in_degree: Vec<usize> = alloc::vec![0; self.nodes.len()];
        for i in 0..self.nodes.len() {
            if let Some(node) = &self.nodes[i] {
                in_degree[i] = node.incoming.len();
            }
        }

        let mut queue: VecDeque<NodeId> = VecDeque::new();
        for (i, n) in self.nodes.iter().enumerate() {
            if n.is_some() && in_degree[i] == 0 {
                queue.push_back(NodeId(i as u32));
            }
        }

        let mut order = Vec::with_capacity(self.node_count());
        while let Some(id) = queue.pop_front() {
            order.push(id);
            let outgoing = self.node(id)?.outgoing.clone();
            for edge_id in outgoing {
                let (_, dst) = self.endpoints(edge_id)?;
                let slot = &mut in_degree[dst.0 as usize];
                *slot -= 1;
                if *slot == 0 {
                    queue.push_back(dst);
                }
            }
        }

        if order.len() != self.node_count() {
            return Err(GraphError::Cycle.into());
        }

        for (idx, id) in order.iter().enumerate() {
            self.node_mut(*id)?.execution_order = idx as i64;
        }
        self.execution_order = order;
        self.is_sorted = true;
        Ok(())
    }

    /// Runs an independent DFS with three-color marking (white/gray/black)
    /// to detect a cycle without mutating `execution_order` or any other
    /// sort-related state.
    pub fn has_cycle(&self) -> bool {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }
        let n = self.nodes.len();
        let mut color = alloc::vec![Color::White; n];

        fn visit(graph: &Graph, id: NodeId, color: &mut [Color]) -> bool {
            color[id.0 as usize] = Color::Gray;
            if let Ok(node) = graph.node(id) {
                for &edge_id in &node.outgoing {
                    if let Ok((_, dst)) = graph.endpoints(edge_id) {
                        match color[dst.0 as usize] {
                            Color::Gray => return true,
                            Color::White => {
                                if visit(graph, dst, color) {
                                    return true;
                                }
                            }
                            Color::Black => {}
                        }
                    }
                }
            }
            color[id.0 as usize] = Color::Black;
            false
        }

        for i in 0..n {
            if self.nodes[i].is_some() && color[i] == Color::White && visit(self, NodeId(i as u32), &mut color) {
                return true;
            }
        }
        false
    }

    /// Partitions `execution_order` into levels: the level of a node is the
    /// length of the longest path from any source to it, so all nodes at
    /// the same level are mutually independent and safe to dispatch to a
    /// worker pool together. Requires the graph to already be sorted.
    pub fn levels(&self) -> Result<Vec<Vec<NodeId>>> {
        if !self.is_sorted {
            return Err(LibetudeError::invalid_state("levels() requires topological_sort() first"));
        }
        let mut level_of: Vec<Option<usize>> = alloc::vec![None; self.nodes.len()];
        for &id in &self.execution_order {
            let mut level = 0usize;
            for &edge_id in &self.node(id)?.incoming {
                let (src, _) = self.endpoints(edge_id)?;
                if let Some(src_level) = level_of[src.0 as usize] {
                    level = level.max(src_level + 1);
                }
            }
            level_of[id.0 as usize] = Some(level);
        }
        let max_level = level_of.iter().filter_map(|l| *l).max().unwrap_or(0);
        let mut levels = alloc::vec![Vec::new(); max_level + 1];
        for &id in &self.execution_order {
            levels[level_of[id.0 as usize].unwrap()].push(id);
        }
        Ok(levels)
    }

    /// Serial execution: ensures the graph is sorted, then walks
    /// `execution_order` transitioning each node `Ready -> Running ->
    /// Completed`, invoking the registry's `forward` for its `op_type`.
    /// Short-circuits and returns the error on the first `Error`
    /// transition, leaving every remaining node `Ready`.
    pub fn execute(&mut self) -> Result<()> {
        if !self.is_sorted {
            self.topological_sort()?;
        }
        let order = self.execution_order.clone();
        for id in order {
            self.run_node(id)?;
        }
        Ok(())
    }

    pub(crate) fn run_node(&mut self, id: NodeId) -> Result<()> {
        self.set_state(id, NodeState::Running)?;
        let op_type = self.node(id)?.op_type.clone();
        let descriptor = self
            .registry
            .get(&op_type)
            .ok_or_else(|| LibetudeError::not_found(alloc::format!("operator '{op_type}' not registered")));

        let descriptor = match descriptor {
            Ok(d) => d,
            Err(e) => {
                self.set_state(id, NodeState::Error)?;
                return Err(e);
            }
        };

        let (input_shapes, output_shapes) = {
            let node = self.node(id)?;
            (node.input_shapes.clone(), node.output_shapes.clone())
        };

        let inputs: Result<Vec<_>> = input_shapes
            .iter()
            .map(|s| crate::tensor::Tensor::create(&self.pool, *s, crate::tensor::DataType::F32, false))
            .collect();
        let inputs = match inputs {
            Ok(v) => v,
            Err(e) => {
                self.set_state(id, NodeState::Error)?;
                return Err(e);
            }
        };

        let mut outputs: Vec<_> = match output_shapes
            .iter()
            .map(|s| crate::tensor::Tensor::create(&self.pool, *s, crate::tensor::DataType::F32, false))
            .collect::<Result<Vec<_>>>()
        {
            Ok(v) => v,
            Err(e) => {
                self.set_state(id, NodeState::Error)?;
                return Err(e);
            }
        };

        let input_refs: Vec<&crate::tensor::Tensor<'_>> = inputs.iter().collect();
        let result = {
            let node = self.node(id)?;
            (descriptor.forward)(&node.attrs, &input_refs, &mut outputs)
        };

        match result {
            Ok(()) => {
                self.set_state(id, NodeState::Completed)?;
                Ok(())
            }
            Err(e) => {
                self.set_state(id, NodeState::Error)?;
                Err(e)
            }
        }
    }
}

/// Re-exported for callers boxing up closures as attribute payloads without
/// a separate `alloc` import.
pub type BoxAny = Box<dyn core::any::Any + Send>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::OperatorRegistry;
    use crate::tensor::Shape;

    fn test_graph() -> Graph {
        let mut registry = OperatorRegistry::new();
        registry.register_all().unwrap();
        let pool = MemoryPool::create(1 << 16, 32).unwrap();
        Graph::new(Arc::new(registry), pool)
    }

    fn add(graph: &mut Graph, name: &str) -> NodeId {
        let shape = Shape::new(&[4]).unwrap();
        graph
            .add_node(name, "Linear", AttributeHandle::new(()), alloc::vec![shape], alloc::vec![shape])
            .unwrap()
    }

    #[test]
    fn linear_diamond_levels_and_order() {
        let mut graph = test_graph();
        let a = add(&mut graph, "A");
        let b = add(&mut graph, "B");
        let c = add(&mut graph, "C");
        let d = add(&mut graph, "D");
        graph.connect(a, b).unwrap();
        graph.connect(a, c).unwrap();
        graph.connect(b, d).unwrap();
        graph.connect(c, d).unwrap();
        graph.mark_output(d).unwrap();

        graph.execute().unwrap();
        assert_eq!(graph.node(a).unwrap().execution_order, 0);
        assert_eq!(graph.node(d).unwrap().execution_order, 3);
        for id in [a, b, c, d] {
            assert_eq!(graph.state(id).unwrap(), NodeState::Completed);
        }

        let levels = graph.levels().unwrap();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0], alloc::vec![a]);
        assert_eq!(levels[2], alloc::vec![d]);
        let mut mid = levels[1].clone();
        mid.sort();
        let mut expect = alloc::vec![b, c];
        expect.sort();
        assert_eq!(mid, expect);
    }

    #[test]
    fn cycle_is_detected_and_rejects_sort() {
        let mut graph = test_graph();
        let a = add(&mut graph, "A");
        let b = add(&mut graph, "B");
        let c = add(&mut graph, "C");
        graph.connect(a, b).unwrap();
        graph.connect(b, c).unwrap();
        graph.connect(c, a).unwrap();

        assert!(graph.has_cycle());
        let err = graph.topological_sort().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Cycle);
    }

    #[test]
    fn self_loop_rejected() {
        let mut graph = test_graph();
        let a = add(&mut graph, "A");
        assert!(graph.connect(a, a).is_err());
    }

    #[test]
    fn duplicate_edge_rejected() {
        let mut graph = test_graph();
        let a = add(&mut graph, "A");
        let b = add(&mut graph, "B");
        graph.connect(a, b).unwrap();
        assert!(graph.connect(a, b).is_err());
    }

    #[test]
    fn remove_node_tombstones_and_disconnects() {
        let mut graph = test_graph();
        let a = add(&mut graph, "A");
        let b = add(&mut graph, "B");
        graph.connect(a, b).unwrap();
        graph.remove_node(a).unwrap();
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.find_by_name("A").is_none());
    }

    #[test]
    fn sort_tie_break_is_deterministic_by_insertion_order() {
        let mut graph = test_graph();
        let a = add(&mut graph, "A");
        let b = add(&mut graph, "B");
        let c = add(&mut graph, "C");
        graph.topological_sort().unwrap();
        assert_eq!(graph.execution_order(), &[a, b, c]);
    }
}
