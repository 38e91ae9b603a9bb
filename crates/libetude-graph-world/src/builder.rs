//! Assembles the eight WORLD stages into a [`Graph`] with a fixed, legal
//! topology: `AudioInput` is the sole source; the three analyzers fan out
//! from it; `ParameterMerge` joins them; `Synthesis` follows; `AudioOutput`
//! is the sink. `UtauMapping` sits between `ParameterMerge` and `Synthesis`
//! as an optional lyric/note alignment stage.

use std::sync::Arc;

use libetude_core::error::Result;
use libetude_core::graph::{Graph, NodeId};
use libetude_core::pool::MemoryPool;
use libetude_core::registry::OperatorRegistry;
use libetude_core::tensor::Shape;
use libetude_world::{F0Algorithm, WorldConfig};

use crate::context::WorldGraphContext;
use crate::operators::{WorldNode, descriptor_for, make_attrs};

/// A built WORLD graph plus the node ids the caller needs to feed input and
/// read output (everything else is wired internally).
pub struct WorldGraph {
    pub graph: Graph,
    pub context: Arc<WorldGraphContext>,
    pub audio_input: NodeId,
    pub audio_output: NodeId,
}

/// Builds a [`WorldGraph`] over fresh pool/registry instances, registering
/// all eight WORLD operators and wiring the topology the spec requires.
pub struct WorldGraphBuilder {
    config: WorldConfig,
    algorithm: F0Algorithm,
    pool_capacity: usize,
}

impl WorldGraphBuilder {
    pub fn new(config: WorldConfig) -> Self {
        Self { config, algorithm: F0Algorithm::Dio, pool_capacity: 1 << 20 }
    }

    pub fn with_algorithm(mut self, algorithm: F0Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_pool_capacity(mut self, bytes: usize) -> Self {
        self.pool_capacity = bytes;
        self
    }

    pub fn build(self) -> Result<WorldGraph> {
        let mut registry = OperatorRegistry::new();
        for role in [
            WorldNode::AudioInput,
            WorldNode::F0Extraction,
            WorldNode::SpectrumAnalysis,
            WorldNode::AperiodicityAnalysis,
            WorldNode::ParameterMerge,
            WorldNode::UtauMapping,
            WorldNode::Synthesis,
            WorldNode::AudioOutput,
        ] {
            registry.register(descriptor_for(role))?;
        }
        let registry = Arc::new(registry);
        let pool = MemoryPool::create(self.pool_capacity, 32)?;
        let context = Arc::new(WorldGraphContext::new(self.config, self.algorithm));

        let mut graph = Graph::new(registry, pool);
        let token_shape = Shape::new(&[1])?;

        let mut add = |role: WorldNode| -> Result<NodeId> {
            graph.add_node(role.op_type(), role.op_type(), make_attrs(role, context.clone()), vec![], vec![token_shape])
        };

        let audio_input = add(WorldNode::AudioInput)?;
        let f0_extraction = add(WorldNode::F0Extraction)?;
        let spectrum_analysis = add(WorldNode::SpectrumAnalysis)?;
        let aperiodicity_analysis = add(WorldNode::AperiodicityAnalysis)?;
        let parameter_merge = add(WorldNode::ParameterMerge)?;
        let utau_mapping = add(WorldNode::UtauMapping)?;
        let synthesis = add(WorldNode::Synthesis)?;
        let audio_output = add(WorldNode::AudioOutput)?;

        graph.mark_input(audio_input)?;
        graph.connect(audio_input, f0_extraction)?;
        graph.connect(audio_input, spectrum_analysis)?;
        graph.connect(audio_input, aperiodicity_analysis)?;
        graph.connect(f0_extraction, spectrum_analysis)?;
        graph.connect(f0_extraction, aperiodicity_analysis)?;
        graph.connect(f0_extraction, parameter_merge)?;
        graph.connect(spectrum_analysis, parameter_merge)?;
        graph.connect(aperiodicity_analysis, parameter_merge)?;
        graph.connect(parameter_merge, utau_mapping)?;
        graph.connect(utau_mapping, synthesis)?;
        graph.connect(synthesis, audio_output)?;
        graph.mark_output(audio_output)?;

        Ok(WorldGraph { graph, context, audio_input, audio_output })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topology_has_one_level_per_stage_group() {
        let mut world = WorldGraphBuilder::new(WorldConfig::new(16000)).build().unwrap();
        let levels = world.graph.levels().unwrap();
        // AudioInput; {F0Extraction}; {SpectrumAnalysis, AperiodicityAnalysis}; ParameterMerge; UtauMapping; Synthesis; AudioOutput
        assert_eq!(levels.len(), 7);
        assert_eq!(levels[0].len(), 1);
        assert_eq!(levels[2].len(), 2);
    }

    #[test]
    fn full_run_produces_synthesized_audio() {
        let config = WorldConfig::new(16000);
        let mut world = WorldGraphBuilder::new(config).build().unwrap();
        let sample_rate = 16000usize;
        let signal: Vec<f32> = (0..sample_rate)
            .map(|i| 0.8 * (2.0 * std::f32::consts::PI * 200.0 * i as f32 / sample_rate as f32).sin())
            .collect();
        world.context.set_input_signal(signal.clone());
        world.graph.execute().unwrap();
        let synthesized = world.context.take_synthesized().unwrap();
        assert!(!synthesized.is_empty());

        // Trim the leading/trailing frame's worth of samples, where WORLD
        // resynthesis is least reliable, before comparing waveforms.
        let frame_len = (config.frame_period / 1000.0 * sample_rate as f64).round() as usize;
        let trim = frame_len.max(1) * 2;
        assert!(signal.len() > trim * 2 && synthesized.len() > trim * 2);
        let input_trimmed = &signal[trim..signal.len() - trim];
        let output_trimmed = &synthesized[trim..synthesized.len() - trim];

        let max_lag = sample_rate / 100; // +/- 10 ms search window
        let peak = peak_normalized_correlation(input_trimmed, output_trimmed, max_lag);
        assert!(peak > 0.9, "peak correlation {peak} is below 0.9");
    }

    /// Slides `b` against `a` within `+/- max_lag` samples and returns the
    /// highest Pearson correlation coefficient observed at zero-mean.
    fn peak_normalized_correlation(a: &[f32], b: &[f32], max_lag: usize) -> f32 {
        let mut best = f32::MIN;
        for lag in 0..=(2 * max_lag) {
            let shift = lag as isize - max_lag as isize;
            let (a_start, b_start) = if shift >= 0 { (shift as usize, 0) } else { (0, (-shift) as usize) };
            let len = a.len().saturating_sub(a_start).min(b.len().saturating_sub(b_start));
            if len < max_lag {
                continue;
            }
            let a_slice = &a[a_start..a_start + len];
            let b_slice = &b[b_start..b_start + len];

            let a_mean = a_slice.iter().sum::<f32>() / len as f32;
            let b_mean = b_slice.iter().sum::<f32>() / len as f32;
            let mut num = 0.0f32;
            let mut a_var = 0.0f32;
            let mut b_var = 0.0f32;
            for (&av, &bv) in a_slice.iter().zip(b_slice) {
                let ad = av - a_mean;
                let bd = bv - b_mean;
                num += ad * bd;
                a_var += ad * ad;
                b_var += bd * bd;
            }
            if a_var <= f32::EPSILON || b_var <= f32::EPSILON {
                continue;
            }
            let corr = num / (a_var.sqrt() * b_var.sqrt());
            if corr > best {
                best = corr;
            }
        }
        best
    }

    #[test]
    fn cancellation_before_run_aborts_with_cancelled_error() {
        let config = WorldConfig::new(16000);
        let mut world = WorldGraphBuilder::new(config).build().unwrap();
        world.context.set_input_signal(vec![0.0; 4000]);
        world.context.cancel();
        assert!(world.graph.execute().is_err());
    }
}
