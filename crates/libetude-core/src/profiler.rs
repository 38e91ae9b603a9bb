//! Time-stamped, at-most-one-in-flight-per-name profiling spans, with
//! exponentially-weighted resource sampling and a JSON report.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::error::{LibetudeError, Result};

const EWMA_ALPHA: f64 = 0.1;

/// A single open-or-closed profiling span.
#[derive(Debug, Clone)]
struct Span {
    name: String,
    start_ns: u64,
    start_cycles: u64,
    start_instant: Instant,
    end_ns: Option<u64>,
    cpu_cycles: u64,
    memory_used: usize,
    memory_peak: usize,
    cpu_usage: f64,
    gpu_usage: f64,
}

/// A completed span, as it appears in [`Profiler::report`].
#[derive(Debug, Clone, Serialize)]
pub struct CompletedSpan {
    pub name: String,
    pub start_time: u64,
    pub end_time: u64,
    pub duration_ns: u64,
    pub cpu_cycles: u64,
    pub memory_used: usize,
    pub memory_peak: usize,
    pub cpu_usage: f64,
    pub gpu_usage: f64,
}

#[derive(Debug, Clone, Serialize)]
struct SessionSummary {
    start_time: u64,
    last_update: u64,
    total_inference_time: u64,
    total_memory_peak: usize,
    avg_cpu_usage: f64,
    avg_gpu_usage: f64,
}

/// The full JSON-serializable report produced by [`Profiler::report`].
#[derive(Debug, Clone, Serialize)]
pub struct ProfileReport {
    session: SessionSummary,
    operations: Vec<CompletedSpan>,
}

struct Inner {
    in_flight: HashMap<String, Span>,
    completed: Vec<CompletedSpan>,
    capacity: usize,
    session_start_ns: u64,
    last_update_ns: u64,
    total_memory_peak: usize,
    avg_cpu_usage: f64,
    avg_gpu_usage: f64,
}

/// Time-stamps node executions under a single mutex, matching the
/// single-internal-lock discipline the pool and registry also use.
pub struct Profiler {
    inner: Mutex<Inner>,
}

impl Profiler {
    /// Creates a profiler whose completed-span buffer holds at most
    /// `capacity` entries before `end` starts returning `BufferFull`.
    pub fn new(capacity: usize) -> Self {
        let now = now_ns();
        Self {
            inner: Mutex::new(Inner {
                in_flight: HashMap::new(),
                completed: Vec::new(),
                capacity,
                session_start_ns: now,
                last_update_ns: now,
                total_memory_peak: 0,
                avg_cpu_usage: 0.0,
                avg_gpu_usage: 0.0,
            }),
        }
    }

    /// Opens a span for `name`. Fails with `InvalidState` if a span with
    /// the same name is already open.
    pub fn start(&self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        let mut inner = self.inner.lock().expect("profiler mutex poisoned");
        if inner.in_flight.contains_key(&name) {
            return Err(LibetudeError::invalid_state(format!("span '{name}' already open")));
        }
        let span = Span {
            name: name.clone(),
            start_ns: now_ns(),
            start_cycles: cpu_cycles(),
            start_instant: Instant::now(),
            end_ns: None,
            cpu_cycles: 0,
            memory_used: 0,
            memory_peak: 0,
            cpu_usage: 0.0,
            gpu_usage: 0.0,
        };
        inner.in_flight.insert(name, span);
        Ok(())
    }

    /// Closes the span for `name`, records `memory_used`/`memory_peak` as
    /// observed at close, and appends it to the completed buffer.
    /// `NotFound` if no span with that name is open; `BufferFull` if the
    /// completed buffer is already at capacity.
    pub fn end(&self, name: &str, memory_used: usize, memory_peak: usize) -> Result<()> {
        let mut inner = self.inner.lock().expect("profiler mutex poisoned");
        if inner.completed.len() >= inner.capacity {
            return Err(LibetudeError::buffer_full("profiler completed-span buffer is full"));
        }
        let mut span = inner
            .in_flight
            .remove(name)
            .ok_or_else(|| LibetudeError::not_found(format!("no open span named '{name}'")))?;

        span.end_ns = Some(now_ns());
        span.cpu_cycles = cpu_cycles().saturating_sub(span.start_cycles);
        span.memory_used = memory_used;
        span.memory_peak = memory_peak;

        let elapsed = span.start_instant.elapsed().as_secs_f64().max(1e-9);
        span.cpu_usage = (span.cpu_cycles as f64 / elapsed).min(100.0 * 1e9).max(0.0);
        span.gpu_usage = 0.0;

        inner.total_memory_peak = inner.total_memory_peak.max(memory_peak);
        inner.avg_cpu_usage = ewma(inner.avg_cpu_usage, span.cpu_usage);
        inner.avg_gpu_usage = ewma(inner.avg_gpu_usage, span.gpu_usage);
        inner.last_update_ns = span.end_ns.unwrap();

        inner.completed.push(CompletedSpan {
            name: span.name,
            start_time: span.start_ns,
            end_time: span.end_ns.unwrap(),
            duration_ns: span.end_ns.unwrap().saturating_sub(span.start_ns),
            cpu_cycles: span.cpu_cycles,
            memory_used: span.memory_used,
            memory_peak: span.memory_peak,
            cpu_usage: span.cpu_usage,
            gpu_usage: span.gpu_usage,
        });
        Ok(())
    }

    /// Number of spans currently open.
    pub fn in_flight_count(&self) -> usize {
        self.inner.lock().expect("profiler mutex poisoned").in_flight.len()
    }

    /// Number of completed spans recorded so far.
    pub fn completed_count(&self) -> usize {
        self.inner.lock().expect("profiler mutex poisoned").completed.len()
    }

    /// Builds the session + per-span report.
    pub fn report(&self) -> ProfileReport {
        let inner = self.inner.lock().expect("profiler mutex poisoned");
        let total_inference_time = inner
            .completed
            .iter()
            .map(|s| s.duration_ns)
            .sum();
        ProfileReport {
            session: SessionSummary {
                start_time: inner.session_start_ns,
                last_update: inner.last_update_ns,
                total_inference_time,
                total_memory_peak: inner.total_memory_peak,
                avg_cpu_usage: inner.avg_cpu_usage,
                avg_gpu_usage: inner.avg_gpu_usage,
            },
            operations: inner.completed.clone(),
        }
    }

    /// Serializes [`Self::report`] to a JSON string matching the schema
    /// `{session:{...}, operations:[...]}`.
    pub fn report_json(&self) -> Result<String> {
        serde_json::to_string(&self.report()).map_err(|e| LibetudeError::runtime(e.to_string()))
    }
}

fn ewma(prev: f64, sample: f64) -> f64 {
    EWMA_ALPHA * sample + (1.0 - EWMA_ALPHA) * prev
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(not(target_arch = "x86_64"))]
fn cpu_cycles() -> u64 {
    // No portable cycle counter; fall back to a monotonic nanosecond proxy.
    now_ns()
}

#[cfg(target_arch = "x86_64")]
#[allow(unsafe_code)]
fn cpu_cycles() -> u64 {
    // SAFETY: rdtsc has no preconditions; it simply reads the timestamp
    // counter register and is available on every x86_64 target we build for.
    unsafe { core::arch::x86_64::_rdtsc() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_end_round_trip_produces_one_completed_span() {
        let profiler = Profiler::new(16);
        profiler.start("node_a").unwrap();
        profiler.end("node_a", 1024, 2048).unwrap();
        assert_eq!(profiler.completed_count(), 1);
        assert_eq!(profiler.in_flight_count(), 0);
    }

    #[test]
    fn double_start_is_invalid_state() {
        let profiler = Profiler::new(16);
        profiler.start("node_a").unwrap();
        let err = profiler.start("node_a").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidState);
    }

    #[test]
    fn end_without_start_is_not_found() {
        let profiler = Profiler::new(16);
        let err = profiler.end("ghost", 0, 0).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[test]
    fn exceeding_capacity_is_buffer_full() {
        let profiler = Profiler::new(1);
        profiler.start("a").unwrap();
        profiler.end("a", 0, 0).unwrap();
        profiler.start("b").unwrap();
        let err = profiler.end("b", 0, 0).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::BufferFull);
    }

    #[test]
    fn report_json_round_trips_through_serde_json() {
        let profiler = Profiler::new(16);
        profiler.start("node_a").unwrap();
        profiler.end("node_a", 10, 20).unwrap();
        let json = profiler.report_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["session"].is_object());
        assert_eq!(value["operations"][0]["name"], "node_a");
    }

    #[test]
    fn end_is_never_before_start() {
        let profiler = Profiler::new(16);
        profiler.start("a").unwrap();
        profiler.end("a", 0, 0).unwrap();
        let report = profiler.report();
        assert!(report.operations[0].end_time >= report.operations[0].start_time);
    }

    #[test]
    fn summed_span_durations_never_exceed_wall_time_and_starts_balance_ends() {
        let profiler = Profiler::new(16);
        let names = ["node_a", "node_b", "node_c"];

        let wall_start = std::time::Instant::now();
        for name in names {
            profiler.start(name).unwrap();
            std::hint::black_box((0..10_000).fold(0u64, |acc, i| acc.wrapping_add(i)));
            profiler.end(name, 0, 0).unwrap();
        }
        let wall_elapsed_ns = wall_start.elapsed().as_nanos() as u64;

        assert_eq!(profiler.in_flight_count(), 0);
        assert_eq!(profiler.completed_count(), names.len());

        let report = profiler.report();
        let summed_duration_ns: u64 = report.operations.iter().map(|op| op.duration_ns).sum();
        assert!(
            summed_duration_ns <= wall_elapsed_ns,
            "summed span durations {summed_duration_ns}ns exceed wall time {wall_elapsed_ns}ns"
        );

        for name in names {
            let starts = 1;
            let ends = report.operations.iter().filter(|op| op.name == name).count();
            assert_eq!(starts, ends, "start/end count mismatch for {name}");
        }
    }
}
