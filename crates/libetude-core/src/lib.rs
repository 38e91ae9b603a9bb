//! LibEtude core — a dataflow execution engine over a typed operator graph.
//!
//! This crate provides the substrate that both the WORLD-vocoder pipeline and
//! any neural-network subgraph run on:
//!
//! - [`pool`] — arena-style memory pools backing every tensor allocation.
//! - [`tensor`] — N-dimensional typed buffers carried between graph nodes.
//! - [`registry`] — a named factory/forward/destroy table for operators.
//! - [`graph`] — nodes, edges, topological scheduling, cycle detection.
//! - [`optimizer`] — fusion, dead-code elimination, memory reuse, level planning.
//! - [`executor`] — serial and level-parallel execution with cancellation.
//! - [`profiler`] — span-based timing and resource sampling with JSON reports.
//! - [`error`] — the closed error taxonomy shared by every layer above.
//!
//! # no_std
//!
//! The crate builds without `std` (the `std` feature is on by default) for
//! embedded targets; [`profiler`] and the executor's wall-clock timeout path
//! require `std`.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod error;
pub mod pool;
pub mod tensor;
pub mod registry;
pub mod graph;
pub mod optimizer;

#[cfg(feature = "std")]
pub mod executor;

#[cfg(feature = "std")]
pub mod profiler;

pub use error::{ErrorKind, LibetudeError, Result};
pub use pool::{MemoryPool, PoolStats};
pub use tensor::{DataType, DeviceLocation, Shape, Tensor};
pub use registry::{OperatorDescriptor, OperatorRegistry};
pub use graph::{EdgeId, Graph, NodeId, NodeState};
pub use optimizer::{MemoryPlan, OptimizationReport, OptimizerPasses, ParallelPlan};

#[cfg(feature = "std")]
pub use executor::{ExecutionMode, Executor};

#[cfg(feature = "std")]
pub use profiler::Profiler;
