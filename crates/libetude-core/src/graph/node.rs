//! Node identity and per-node bookkeeping for the operator graph.

use alloc::string::String;
use alloc::vec::Vec;

use crate::registry::AttributeHandle;
use crate::tensor::Shape;

use super::edge::EdgeId;

/// Unique identifier for a node in a [`super::Graph`].
///
/// IDs are assigned sequentially and never reused within a graph instance;
/// removing a node tombstones its slot rather than reusing the index, so a
/// stale `NodeId` from before a removal is detectably invalid rather than
/// silently referring to a different node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Returns the raw numeric identifier.
    pub fn index(self) -> u32 {
        self.0
    }
}

/// A node's execution state, transitioned by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Not yet started; all inputs may or may not be available.
    Ready,
    /// Queued to run but not yet dispatched.
    Pending,
    /// Currently executing its operator's forward function.
    Running,
    /// Forward completed successfully; outputs hold fresh values.
    Completed,
    /// Forward failed; outputs are undefined, downstream nodes must not run.
    Error,
    /// Execution was cancelled before this node ran.
    Cancelled,
}

/// Internal bookkeeping for one graph node.
pub(crate) struct NodeRecord {
    pub name: String,
    pub op_type: String,
    pub attrs: AttributeHandle,
    pub input_shapes: Vec<Shape>,
    pub output_shapes: Vec<Shape>,
    pub incoming: Vec<EdgeId>,
    pub outgoing: Vec<EdgeId>,
    /// Assigned by `topological_sort`; -1 if unsorted.
    pub execution_order: i64,
    pub state: NodeState,
    /// True for nodes designated as graph inputs (sources with no incoming
    /// data dependency expected) or outputs (sinks consumed by the caller).
    pub is_designated_output: bool,
}
