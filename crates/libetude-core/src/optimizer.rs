//! Graph transformation passes: fusion, dead-code elimination, constant
//! folding, memory reuse planning, parallel-section planning, and
//! cache-locality reordering.
//!
//! Every pass takes `&mut Graph` and leaves `is_sorted = false` on exit (via
//! [`Graph::set_optimized`] and the structural mutations themselves), so the
//! executor re-sorts exactly once before its first run after optimization.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::error::Result;
use crate::graph::{Graph, NodeId};

/// Which passes to run, and in which combination. Order within a single
/// `optimize` call follows the field declaration order below, matching the
/// spec's numbered pass list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimizerPasses {
    /// `Linear→ReLU`, `STFT→MelScale` peephole fusion.
    pub fusion: bool,
    /// Remove nodes unreachable from any designated output.
    pub dead_code_elimination: bool,
    /// Fold nodes whose inputs are all constants.
    pub constant_folding: bool,
    /// Compute a first-fit memory reuse plan.
    pub memory_reuse: bool,
    /// Compute parallel-execution levels.
    pub parallel_planning: bool,
    /// Reorder same-level nodes by shared-input locality.
    pub cache_locality_reordering: bool,
}

impl OptimizerPasses {
    /// Every pass enabled.
    pub const ALL: Self = Self {
        fusion: true,
        dead_code_elimination: true,
        constant_folding: true,
        memory_reuse: true,
        parallel_planning: true,
        cache_locality_reordering: true,
    };

    /// No passes: `optimize` becomes a no-op (still clears `is_optimized`
    /// bookkeeping is skipped entirely since nothing ran).
    pub const NONE: Self = Self {
        fusion: false,
        dead_code_elimination: false,
        constant_folding: false,
        memory_reuse: false,
        parallel_planning: false,
        cache_locality_reordering: false,
    };
}

/// A liveness-interval bin-packing result: which arena index each node's
/// output buffer should draw from, so that non-overlapping lifetimes share
/// one backing allocation.
#[derive(Debug, Clone, Default)]
pub struct MemoryPlan {
    /// node -> arena index assigned to its output buffer.
    pub arena_of: BTreeMap<NodeId, usize>,
    /// Number of distinct arenas required.
    pub arena_count: usize,
}

/// Node levels computed by the parallel-section-planning pass, cached
/// alongside the [`MemoryPlan`] so the executor does not recompute either.
#[derive(Debug, Clone, Default)]
pub struct ParallelPlan {
    /// `levels[i]` holds every node whose longest incoming path has length `i`.
    pub levels: Vec<Vec<NodeId>>,
}

/// The combined result of one `optimize` call, consumed by the executor.
#[derive(Debug, Clone, Default)]
pub struct OptimizationReport {
    /// Nodes fused away (producer kept, consumer removed).
    pub fused: usize,
    /// Nodes removed as unreachable from any output.
    pub dead_code_removed: usize,
    /// Nodes folded into constants.
    pub constants_folded: usize,
    /// Memory reuse plan, present iff `memory_reuse` was requested.
    pub memory_plan: Option<MemoryPlan>,
    /// Parallel plan, present iff `parallel_planning` was requested.
    pub parallel_plan: Option<ParallelPlan>,
}

/// Runs the requested passes over `graph` in spec order, returning a summary
/// report. Any structural pass (fusion, DCE, folding) clears `is_sorted`;
/// this function itself always ends by calling
/// [`Graph::topological_sort`] once so analysis passes downstream (memory
/// reuse, parallel planning) can use `execution_order`, then marks the graph
/// optimized and leaves `is_sorted = false` cleared again per spec ("the
/// executor re-sorts once").
pub fn optimize(graph: &mut Graph, passes: OptimizerPasses) -> Result<OptimizationReport> {
    let mut report = OptimizationReport::default();

    if passes.fusion {
        report.fused = fuse(graph)?;
    }
    if passes.dead_code_elimination {
        report.dead_code_removed = eliminate_dead_code(graph)?;
    }
    if passes.constant_folding {
        report.constants_folded = fold_constants(graph)?;
    }

    if passes.memory_reuse || passes.parallel_planning || passes.cache_locality_reordering {
        graph.topological_sort()?;
    }

    if passes.parallel_planning || passes.cache_locality_reordering {
        let mut levels = graph.levels()?;
        if passes.cache_locality_reordering {
            for level in &mut levels {
                reorder_for_locality(graph, level)?;
            }
        }
        if passes.parallel_planning {
            report.parallel_plan = Some(ParallelPlan { levels });
        }
    }

    if passes.memory_reuse {
        report.memory_plan = Some(plan_memory_reuse(graph)?);
    }

    graph.set_optimized(true);
    Ok(report)
}

/// Fuses single-consumer `Linear`/`STFT` producers into their sole
/// downstream activation/transform, provided the consumer has no other
/// producer feeding it and the producer has no other consumer depending on
/// the same output. Returns the number of consumer nodes removed.
fn fuse(graph: &mut Graph) -> Result<usize> {
    const PATTERNS: &[(&str, &str, &str)] = &[
        ("Linear", "ReLU", "LinearReLU"),
        ("STFT", "MelScale", "STFTMelScale"),
    ];

    let mut fused_count = 0;
    loop {
        let mut candidate = None;
        'search: for producer in graph.node_ids().collect::<Vec<_>>() {
            let producer_ty = graph.op_type(producer)?.into();
            for (prod_name, cons_name, fused_name) in PATTERNS {
                if producer_ty != *prod_name {
                    continue;
                }
                let outgoing = graph.outgoing(producer)?.to_vec();
                if outgoing.len() != 1 {
                    continue;
                }
                let (_, consumer) = graph.endpoints(outgoing[0])?;
                if graph.op_type(consumer)? != *cons_name {
                    continue;
                }
                if graph.incoming(consumer)?.len() != 1 {
                    continue;
                }
                candidate = Some((producer, consumer, *fused_name));
                break 'search;
            }
        }

        let Some((producer, consumer, fused_name)) = candidate else {
            break;
        };

        let consumer_outgoing = graph.outgoing(consumer)?.to_vec();
        for edge_id in consumer_outgoing {
            let (_, dst) = graph.endpoints(edge_id)?;
            graph.disconnect(edge_id)?;
            graph.connect(producer, dst)?;
        }
        if graph.output_nodes().contains(&consumer) {
            graph.mark_output(producer)?;
        }
        graph.remove_node(consumer)?;
        graph.set_op_type(producer, fused_name)?;
        fused_count += 1;
    }
    Ok(fused_count)
}

/// Marks every designated output, back-propagates reachability through
/// incoming edges, and removes everything unreached. Returns the removed count.
fn eliminate_dead_code(graph: &mut Graph) -> Result<usize> {
    let mut reachable: Vec<NodeId> = graph.output_nodes().to_vec();
    let mut stack = reachable.clone();
    while let Some(id) = stack.pop() {
        for &edge_id in graph.incoming(id)?.to_vec().iter() {
            let (src, _) = graph.endpoints(edge_id)?;
            if !reachable.contains(&src) {
                reachable.push(src);
                stack.push(src);
            }
        }
    }

    let all: Vec<NodeId> = graph.node_ids().collect();
    let mut removed = 0;
    for id in all {
        if !reachable.contains(&id) {
            graph.remove_node(id)?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Folds nodes whose op_type is `Constant` are left untouched (already
/// folded); any node with zero incoming edges and a non-`Constant` op_type
/// that isn't a designated input is treated as producing a compile-time
/// constant: run once and rewrite its op_type to `Constant` so later
/// `execute` calls skip recomputation. Returns the number of nodes folded.
fn fold_constants(graph: &mut Graph) -> Result<usize> {
    let candidates: Vec<NodeId> = graph
        .node_ids()
        .filter(|&id| {
            graph.incoming(id).map(|e| e.is_empty()).unwrap_or(false)
                && !graph.input_nodes().contains(&id)
                && graph.op_type(id).map(|t| t != "Constant").unwrap_or(false)
        })
        .collect();

    let mut folded = 0;
    for id in candidates {
        graph.run_node(id)?;
        graph.set_op_type(id, "Constant")?;
        folded += 1;
    }
    Ok(folded)
}

/// First-fit bin-packing of output-buffer liveness intervals: a node's
/// interval runs from its own execution index to the highest execution
/// index among its consumers. Two intervals that don't overlap may share an
/// arena.
fn plan_memory_reuse(graph: &Graph) -> Result<MemoryPlan> {
    let order = graph.execution_order();
    let mut index_of: BTreeMap<NodeId, usize> = BTreeMap::new();
    for (i, &id) in order.iter().enumerate() {
        index_of.insert(id, i);
    }

    let mut intervals: Vec<(NodeId, usize, usize)> = Vec::with_capacity(order.len());
    for &id in order {
        let start = index_of[&id];
        let mut end = start;
        for &edge_id in graph.outgoing(id)?.iter() {
            let (_, dst) = graph.endpoints(edge_id)?;
            if let Some(&dst_index) = index_of.get(&dst) {
                end = end.max(dst_index);
            }
        }
        intervals.push((id, start, end));
    }

    // arena_end[a] = the last occupied index in arena `a`.
    let mut arena_end: Vec<usize> = Vec::new();
    let mut plan = MemoryPlan::default();
    for (id, start, end) in intervals {
        let slot = arena_end.iter().position(|&busy_until| busy_until < start);
        let arena = match slot {
            Some(a) => {
                arena_end[a] = end;
                a
            }
            None => {
                arena_end.push(end);
                arena_end.len() - 1
            }
        };
        plan.arena_of.insert(id, arena);
    }
    plan.arena_count = arena_end.len();
    Ok(plan)
}

/// Reorders `level` in place so that nodes sharing a source node among their
/// incoming edges sit adjacent, grouped by the lowest-indexed shared source.
fn reorder_for_locality(graph: &Graph, level: &mut [NodeId]) -> Result<()> {
    let mut key_of: BTreeMap<NodeId, u32> = BTreeMap::new();
    for &id in level.iter() {
        let min_src = graph
            .incoming(id)?
            .iter()
            .filter_map(|&edge_id| graph.endpoints(edge_id).ok().map(|(src, _)| src.index()))
            .min()
            .unwrap_or(u32::MAX);
        key_of.insert(id, min_src);
    }
    level.sort_by_key(|id| key_of[id]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::MemoryPool;
    use crate::registry::{AttributeHandle, OperatorRegistry};
    use crate::tensor::Shape;
    use alloc::sync::Arc;

    fn test_graph() -> Graph {
        let mut registry = OperatorRegistry::new();
        registry.register_all().unwrap();
        let pool = MemoryPool::create(1 << 16, 32).unwrap();
        Graph::new(Arc::new(registry), pool)
    }

    fn add(graph: &mut Graph, name: &str, op: &str) -> NodeId {
        let shape = Shape::new(&[4]).unwrap();
        graph
            .add_node(name, op, AttributeHandle::new(()), alloc::vec![shape], alloc::vec![shape])
            .unwrap()
    }

    #[test]
    fn fusion_absorbs_single_consumer_relu() {
        // Register a ReLU-compatible entry for this test's purposes by
        // reusing Linear's descriptor under a new name.
        let mut registry = OperatorRegistry::new();
        registry.register_all().unwrap();
        let relu = crate::registry::OperatorDescriptor {
            name: "ReLU",
            ..registry.get("Linear").unwrap()
        };
        registry.register(relu).unwrap();
        let pool = MemoryPool::create(1 << 16, 32).unwrap();
        let mut graph = Graph::new(Arc::new(registry), pool);

        let a = add(&mut graph, "A", "Linear");
        let b = add(&mut graph, "B", "ReLU");
        graph.connect(a, b).unwrap();
        graph.mark_output(b).unwrap();

        let report = optimize(&mut graph, OptimizerPasses { fusion: true, ..OptimizerPasses::NONE }).unwrap();
        assert_eq!(report.fused, 1);
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.op_type(a).unwrap(), "LinearReLU");
    }

    #[test]
    fn dead_code_elimination_keeps_only_reachable_nodes() {
        let mut graph = test_graph();
        let a = add(&mut graph, "A", "Linear");
        let b = add(&mut graph, "B", "Linear");
        let c = add(&mut graph, "C", "Linear");
        graph.connect(a, b).unwrap();
        // c is disconnected and not an output: unreachable.
        graph.mark_output(b).unwrap();

        let report = optimize(&mut graph, OptimizerPasses { dead_code_elimination: true, ..OptimizerPasses::NONE }).unwrap();
        assert_eq!(report.dead_code_removed, 1);
        assert!(graph.find_by_name("C").is_none());
        let _ = c;
    }

    #[test]
    fn memory_reuse_packs_non_overlapping_intervals() {
        let mut graph = test_graph();
        let a = add(&mut graph, "A", "Linear");
        let b = add(&mut graph, "B", "Linear");
        let c = add(&mut graph, "C", "Linear");
        graph.connect(a, b).unwrap();
        graph.connect(b, c).unwrap();
        graph.mark_output(c).unwrap();

        let report = optimize(&mut graph, OptimizerPasses { memory_reuse: true, ..OptimizerPasses::NONE }).unwrap();
        let plan = report.memory_plan.unwrap();
        // A's interval [0,1] and C's interval [2,2] do not overlap with
        // everything else pinned serially, so reuse should collapse arenas.
        assert!(plan.arena_count <= 3);
    }

    #[test]
    fn parallel_planning_matches_graph_levels() {
        let mut graph = test_graph();
        let a = add(&mut graph, "A", "Linear");
        let b = add(&mut graph, "B", "Linear");
        graph.connect(a, b).unwrap();
        graph.mark_output(b).unwrap();

        let report = optimize(&mut graph, OptimizerPasses { parallel_planning: true, ..OptimizerPasses::NONE }).unwrap();
        let plan = report.parallel_plan.unwrap();
        assert_eq!(plan.levels.len(), 2);
    }

    #[test]
    fn optimize_clears_sorted_flag_for_executor_resort() {
        let mut graph = test_graph();
        let a = add(&mut graph, "A", "Linear");
        graph.mark_output(a).unwrap();
        graph.topological_sort().unwrap();
        assert!(graph.is_sorted());

        optimize(&mut graph, OptimizerPasses { dead_code_elimination: true, ..OptimizerPasses::NONE }).unwrap();
        assert!(!graph.is_sorted());
        assert!(graph.is_optimized());
    }
}
