//! Serial and level-parallel graph execution.
//!
//! Serial mode walks `execution_order` directly. Parallel mode partitions
//! the sorted order into levels (see [`crate::graph::Graph::levels`]) and
//! runs a fixed worker pool per level behind a shared queue, joining at a
//! barrier before the next level starts — mirroring the single-lock
//! discipline [`crate::pool::MemoryPool`] already uses for its own
//! concurrency, rather than attempting fine-grained lock-free dispatch.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::error::{LibetudeError, Result};
use crate::graph::{Graph, NodeId, NodeState};

/// How a graph should be run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Walk `execution_order` on the calling thread.
    Serial,
    /// Dispatch each level's nodes across a fixed pool of worker threads.
    /// `num_threads <= 1` degenerates to [`ExecutionMode::Serial`].
    Parallel {
        /// Worker thread count.
        num_threads: usize,
    },
}

/// Runs a [`Graph`] under a chosen [`ExecutionMode`], with cooperative
/// cancellation and an optional wall-clock timeout.
pub struct Executor {
    mode: ExecutionMode,
    cancel: Arc<AtomicBool>,
}

impl Executor {
    /// Builds an executor in the given mode with a fresh cancellation flag.
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A clone of the cancellation flag, for an external caller (or
    /// [`Self::run_with_timeout`]'s watchdog) to request cancellation.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Requests cancellation; the next node-boundary poll will observe it.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Runs `graph` to completion, honoring `self.mode`.
    pub fn run(&self, graph: &mut Graph) -> Result<()> {
        match self.mode {
            ExecutionMode::Serial => self.run_serial(graph),
            ExecutionMode::Parallel { num_threads } if num_threads <= 1 => self.run_serial(graph),
            ExecutionMode::Parallel { num_threads } => self.run_parallel(graph, num_threads),
        }
    }

    /// Runs `graph`, spawning a watchdog thread that cancels execution once
    /// `budget` elapses.
    pub fn run_with_timeout(&self, graph: &mut Graph, budget: Duration) -> Result<()> {
        let cancel = self.cancel_handle();
        thread::scope(|scope| {
            let watchdog = scope.spawn(move || {
                let start = std::time::Instant::now();
                while start.elapsed() < budget {
                    if cancel.load(Ordering::Acquire) {
                        return;
                    }
                    thread::sleep(Duration::from_millis(1).min(budget / 4 + Duration::from_millis(1)));
                }
                cancel.store(true, Ordering::Release);
            });
            let result = self.run(graph);
            self.cancel.store(true, Ordering::Release);
            let _ = watchdog.join();
            result
        })
    }

    fn run_serial(&self, graph: &mut Graph) -> Result<()> {
        if !graph.is_sorted() {
            graph.topological_sort()?;
        }
        let order = graph.execution_order().to_vec();
        for id in order {
            if self.cancel.load(Ordering::Acquire) {
                self.cancel_remaining(graph)?;
                return Err(LibetudeError::cancelled("execution cancelled"));
            }
            if let Err(e) = graph.run_node(id) {
                self.cancel_remaining(graph)?;
                return Err(e);
            }
        }
        Ok(())
    }

    fn run_parallel(&self, graph: &mut Graph, num_threads: usize) -> Result<()> {
        if !graph.is_sorted() {
            graph.topological_sort()?;
        }
        let levels = graph.levels()?;
        let graph_lock = Mutex::new(graph);

        for level in &levels {
            if self.cancel.load(Ordering::Acquire) {
                let mut g = graph_lock.lock().expect("executor mutex poisoned");
                self.cancel_remaining(&mut g)?;
                return Err(LibetudeError::cancelled("execution cancelled"));
            }

            let queue = Mutex::new(level.iter().copied().collect::<VecDeque<NodeId>>());
            let failure: Mutex<Option<LibetudeError>> = Mutex::new(None);

            thread::scope(|scope| {
                for _ in 0..num_threads {
                    scope.spawn(|| loop {
                        if self.cancel.load(Ordering::Acquire) {
                            return;
                        }
                        let next = queue.lock().expect("executor queue mutex poisoned").pop_front();
                        let Some(id) = next else { return };
                        let outcome = graph_lock.lock().expect("executor mutex poisoned").run_node(id);
                        if let Err(e) = outcome {
                            *failure.lock().expect("executor failure mutex poisoned") = Some(e);
                            self.cancel.store(true, Ordering::Release);
                            return;
                        }
                    });
                }
            });

            if let Some(e) = failure.into_inner().expect("executor failure mutex poisoned") {
                let mut g = graph_lock.lock().expect("executor mutex poisoned");
                self.cancel_remaining(&mut g)?;
                return Err(e);
            }
            if self.cancel.load(Ordering::Acquire) {
                let mut g = graph_lock.lock().expect("executor mutex poisoned");
                self.cancel_remaining(&mut g)?;
                return Err(LibetudeError::cancelled("execution cancelled"));
            }
        }
        Ok(())
    }

    /// Transitions every node still `Ready` (never started) to `Cancelled`.
    /// Nodes already `Running`/`Completed`/`Error` are left as-is.
    fn cancel_remaining(&self, graph: &mut Graph) -> Result<()> {
        for id in graph.node_ids().collect::<alloc::vec::Vec<_>>() {
            if graph.state(id)? == NodeState::Ready {
                graph.set_state(id, NodeState::Cancelled)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::MemoryPool;
    use crate::registry::{AttributeHandle, OperatorRegistry};
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
    fn serial_mode_completes_every_node() {
        let mut graph = test_graph();
        let a = add(&mut graph, "A");
        let b = add(&mut graph, "B");
        graph.connect(a, b).unwrap();
        graph.mark_output(b).unwrap();

        let executor = Executor::new(ExecutionMode::Serial);
        executor.run(&mut graph).unwrap();
        assert_eq!(graph.state(a).unwrap(), NodeState::Completed);
        assert_eq!(graph.state(b).unwrap(), NodeState::Completed);
    }

    #[test]
    fn parallel_mode_with_one_thread_degenerates_to_serial() {
        let mut graph = test_graph();
        let a = add(&mut graph, "A");
        graph.mark_output(a).unwrap();

        let executor = Executor::new(ExecutionMode::Parallel { num_threads: 1 });
        executor.run(&mut graph).unwrap();
        assert_eq!(graph.state(a).unwrap(), NodeState::Completed);
    }

    #[test]
    fn parallel_mode_runs_a_diamond_to_completion() {
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

        let executor = Executor::new(ExecutionMode::Parallel { num_threads: 4 });
        executor.run(&mut graph).unwrap();
        for id in [a, b, c, d] {
            assert_eq!(graph.state(id).unwrap(), NodeState::Completed);
        }
    }

    #[test]
    fn cancellation_before_run_leaves_nodes_cancelled() {
        let mut graph = test_graph();
        let a = add(&mut graph, "A");
        graph.mark_output(a).unwrap();

        let executor = Executor::new(ExecutionMode::Serial);
        executor.cancel();
        let err = executor.run(&mut graph).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Cancelled);
        assert_eq!(graph.state(a).unwrap(), NodeState::Cancelled);
    }
}
