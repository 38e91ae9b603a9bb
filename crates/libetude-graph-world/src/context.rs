//! The shared state a WORLD graph's nodes read and write: the evolving
//! `WorldParameters` bundle, which F0 algorithm to run, a progress hook, and
//! a cancellation flag the executor checks between nodes.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use libetude_core::error::Result;
use libetude_world::{F0Algorithm, WorldConfig, WorldParameters};

/// Mutable state shared by every node in one WORLD graph run.
pub struct WorldGraphContext {
    pub(crate) config: WorldConfig,
    pub(crate) signal: Mutex<Vec<f32>>,
    pub(crate) algorithm: F0Algorithm,
    pub(crate) params: Mutex<Option<WorldParameters>>,
    pub(crate) synthesized: Mutex<Option<Vec<f32>>>,
    cancelled: AtomicBool,
    progress: Mutex<Option<Box<dyn Fn(&str) + Send>>>,
}

impl WorldGraphContext {
    /// Creates a fresh context for analyzing/synthesizing over `config`.
    pub fn new(config: WorldConfig, algorithm: F0Algorithm) -> Self {
        Self {
            config,
            signal: Mutex::new(Vec::new()),
            algorithm,
            params: Mutex::new(None),
            synthesized: Mutex::new(None),
            cancelled: AtomicBool::new(false),
            progress: Mutex::new(None),
        }
    }

    /// Registers a progress callback invoked with a short stage label as
    /// each node completes.
    pub fn on_progress(&self, callback: impl Fn(&str) + Send + 'static) {
        *self.progress.lock().expect("progress mutex poisoned") = Some(Box::new(callback));
    }

    pub(crate) fn report_progress(&self, stage: &str) {
        if let Some(cb) = self.progress.lock().expect("progress mutex poisoned").as_ref() {
            cb(stage);
        }
    }

    /// Requests cancellation; nodes still to run observe this via the
    /// executor's between-node check and the graph's own checks in
    /// long-running stages.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> WorldConfig {
        self.config
    }

    /// Feeds the source audio this run analyzes/synthesizes from.
    pub fn set_input_signal(&self, signal: Vec<f32>) {
        *self.signal.lock().expect("signal mutex poisoned") = signal;
    }

    /// Returns the finished `WorldParameters`, if analysis has completed.
    pub fn take_params(&self) -> Option<WorldParameters> {
        self.params.lock().expect("params mutex poisoned").take()
    }

    /// Returns the synthesized waveform, if synthesis has completed.
    pub fn take_synthesized(&self) -> Option<Vec<f32>> {
        self.synthesized.lock().expect("synthesized mutex poisoned").take()
    }

    pub(crate) fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(libetude_core::error::LibetudeError::cancelled("world graph run was cancelled"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_callback_is_invoked() {
        let context = WorldGraphContext::new(WorldConfig::new(16000), F0Algorithm::Dio);
        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        context.on_progress(move |stage| seen_clone.lock().unwrap().push(stage.to_string()));
        context.report_progress("AudioInput");
        assert_eq!(seen.lock().unwrap().as_slice(), ["AudioInput"]);
    }

    #[test]
    fn cancel_flag_round_trips() {
        let context = WorldGraphContext::new(WorldConfig::new(16000), F0Algorithm::Dio);
        assert!(!context.is_cancelled());
        context.cancel();
        assert!(context.is_cancelled());
        assert!(context.check_cancelled().is_err());
    }
}
