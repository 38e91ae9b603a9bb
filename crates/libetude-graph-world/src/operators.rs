//! Registers the WORLD pipeline's eight stages as graph operators. Each
//! node's real inputs/outputs are the fields of the shared
//! [`WorldGraphContext`] rather than the tensors the executor allocates —
//! tensors here are a one-element token carried through the graph purely so
//! the scheduler, profiler, and optimizer have something to account for,
//! matching how [`libetude_core::graph::Graph::run_node`] always allocates
//! fresh per-invocation tensors rather than threading real payloads through
//! them.

use std::sync::Arc;

use libetude_core::error::{LibetudeError, Result};
use libetude_core::registry::{AttributeHandle, OperatorDescriptor, SlotCounts, default_destroy};
use libetude_core::tensor::Tensor;
use libetude_world::{cheaptrick, d4c, f0, synth};

use crate::context::WorldGraphContext;

/// The eight WORLD pipeline stages, each bound to one graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorldNode {
    AudioInput,
    F0Extraction,
    SpectrumAnalysis,
    AperiodicityAnalysis,
    ParameterMerge,
    UtauMapping,
    Synthesis,
    AudioOutput,
}

impl WorldNode {
    /// The operator name this role registers under.
    pub fn op_type(self) -> &'static str {
        match self {
            WorldNode::AudioInput => "WorldAudioInput",
            WorldNode::F0Extraction => "WorldF0Extraction",
            WorldNode::SpectrumAnalysis => "WorldSpectrumAnalysis",
            WorldNode::AperiodicityAnalysis => "WorldAperiodicityAnalysis",
            WorldNode::ParameterMerge => "WorldParameterMerge",
            WorldNode::UtauMapping => "WorldUtauMapping",
            WorldNode::Synthesis => "WorldSynthesis",
            WorldNode::AudioOutput => "WorldAudioOutput",
        }
    }
}

/// Per-node attributes: which role this node plays, plus the context every
/// role reads and writes through.
pub(crate) struct WorldNodeAttrs {
    pub(crate) role: WorldNode,
    pub(crate) context: Arc<WorldGraphContext>,
}

pub(crate) fn make_attrs(role: WorldNode, context: Arc<WorldGraphContext>) -> AttributeHandle {
    AttributeHandle::new(WorldNodeAttrs { role, context })
}

fn ctx<'a>(attrs: &'a AttributeHandle) -> Result<&'a WorldNodeAttrs> {
    attrs.downcast_ref::<WorldNodeAttrs>().ok_or_else(|| LibetudeError::invalid_state("missing WorldNodeAttrs"))
}

fn token_create(_attrs: &[(&str, &str)]) -> Result<(AttributeHandle, SlotCounts)> {
    Err(LibetudeError::unsupported(
        "WORLD nodes are constructed directly by WorldGraphBuilder, not via registry create()",
    ))
}

fn audio_input_forward<'p>(attrs: &AttributeHandle, _inputs: &[&Tensor<'p>], outputs: &mut [Tensor<'p>]) -> Result<()> {
    let node = ctx(attrs)?;
    node.context.check_cancelled()?;
    node.context.report_progress("AudioInput");
    outputs[0].write_f32(&[node.context.signal.lock().expect("signal mutex poisoned").len() as f32])
}

fn f0_extraction_forward<'p>(attrs: &AttributeHandle, _inputs: &[&Tensor<'p>], outputs: &mut [Tensor<'p>]) -> Result<()> {
    let node = ctx(attrs)?;
    node.context.check_cancelled()?;
    let signal = node.context.signal.lock().expect("signal mutex poisoned").clone();
    let config = node.context.config();
    let estimate = match node.context.algorithm {
        libetude_world::F0Algorithm::Dio => f0::dio(&signal, &config)?,
        libetude_world::F0Algorithm::Harvest => f0::harvest(&signal, &config)?,
    };
    let frame_count = estimate.f0.len();
    {
        let mut params = node.context.params.lock().expect("params mutex poisoned");
        let bundle = params.get_or_insert_with(|| libetude_world::WorldParameters {
            config,
            audio_length: signal.len(),
            f0: Vec::new(),
            time_axis: Vec::new(),
            spectrogram: Vec::new(),
            aperiodicity: Vec::new(),
        });
        bundle.f0 = estimate.f0;
        bundle.time_axis = estimate.time_axis;
    }
    node.context.report_progress("F0Extraction");
    outputs[0].write_f32(&[frame_count as f32])
}

fn spectrum_analysis_forward<'p>(
    attrs: &AttributeHandle,
    _inputs: &[&Tensor<'p>],
    outputs: &mut [Tensor<'p>],
) -> Result<()> {
    let node = ctx(attrs)?;
    node.context.check_cancelled()?;
    let signal = node.context.signal.lock().expect("signal mutex poisoned").clone();
    let (f0, time_axis, config) = {
        let params = node.context.params.lock().expect("params mutex poisoned");
        let bundle = params.as_ref().ok_or_else(|| LibetudeError::invalid_state("F0Extraction must run first"))?;
        (bundle.f0.clone(), bundle.time_axis.clone(), bundle.config)
    };
    let spectrogram = cheaptrick::analyze(&signal, &f0, &time_axis, &config)?;
    let frame_count = spectrogram.len();
    {
        let mut params = node.context.params.lock().expect("params mutex poisoned");
        params.as_mut().expect("checked above").spectrogram = spectrogram;
    }
    node.context.report_progress("SpectrumAnalysis");
    outputs[0].write_f32(&[frame_count as f32])
}

fn aperiodicity_analysis_forward<'p>(
    attrs: &AttributeHandle,
    _inputs: &[&Tensor<'p>],
    outputs: &mut [Tensor<'p>],
) -> Result<()> {
    let node = ctx(attrs)?;
    node.context.check_cancelled()?;
    let signal = node.context.signal.lock().expect("signal mutex poisoned").clone();
    let (f0, time_axis, config) = {
        let params = node.context.params.lock().expect("params mutex poisoned");
        let bundle = params.as_ref().ok_or_else(|| LibetudeError::invalid_state("F0Extraction must run first"))?;
        (bundle.f0.clone(), bundle.time_axis.clone(), bundle.config)
    };
    let aperiodicity = d4c::analyze(&signal, &f0, &time_axis, &config)?;
    let frame_count = aperiodicity.len();
    {
        let mut params = node.context.params.lock().expect("params mutex poisoned");
        params.as_mut().expect("checked above").aperiodicity = aperiodicity;
    }
    node.context.report_progress("AperiodicityAnalysis");
    outputs[0].write_f32(&[frame_count as f32])
}

fn parameter_merge_forward<'p>(attrs: &AttributeHandle, _inputs: &[&Tensor<'p>], outputs: &mut [Tensor<'p>]) -> Result<()> {
    let node = ctx(attrs)?;
    node.context.check_cancelled()?;
    {
        let params = node.context.params.lock().expect("params mutex poisoned");
        let bundle = params.as_ref().ok_or_else(|| LibetudeError::invalid_state("analyzers must run first"))?;
        bundle.validate()?;
    }
    node.context.report_progress("ParameterMerge");
    outputs[0].write_f32(&[1.0])
}

/// A passthrough hook for lyric/note alignment metadata; the spec names
/// this stage without detailing its mapping, so this keeps `WorldParameters`
/// unchanged and exists only to occupy its place in the topology.
fn utau_mapping_forward<'p>(attrs: &AttributeHandle, _inputs: &[&Tensor<'p>], outputs: &mut [Tensor<'p>]) -> Result<()> {
    let node = ctx(attrs)?;
    node.context.check_cancelled()?;
    node.context.report_progress("UtauMapping");
    outputs[0].write_f32(&[1.0])
}

fn synthesis_forward<'p>(attrs: &AttributeHandle, _inputs: &[&Tensor<'p>], outputs: &mut [Tensor<'p>]) -> Result<()> {
    let node = ctx(attrs)?;
    node.context.check_cancelled()?;
    let waveform = {
        let params = node.context.params.lock().expect("params mutex poisoned");
        let bundle = params.as_ref().ok_or_else(|| LibetudeError::invalid_state("ParameterMerge must run first"))?;
        synth::synthesize(bundle)?
    };
    let sample_count = waveform.len();
    *node.context.synthesized.lock().expect("synthesized mutex poisoned") = Some(waveform);
    node.context.report_progress("Synthesis");
    outputs[0].write_f32(&[sample_count as f32])
}

fn audio_output_forward<'p>(attrs: &AttributeHandle, _inputs: &[&Tensor<'p>], outputs: &mut [Tensor<'p>]) -> Result<()> {
    let node = ctx(attrs)?;
    node.context.check_cancelled()?;
    node.context.report_progress("AudioOutput");
    outputs[0].write_f32(&[1.0])
}

pub(crate) fn descriptor_for(role: WorldNode) -> OperatorDescriptor {
    let forward = match role {
        WorldNode::AudioInput => audio_input_forward,
        WorldNode::F0Extraction => f0_extraction_forward,
        WorldNode::SpectrumAnalysis => spectrum_analysis_forward,
        WorldNode::AperiodicityAnalysis => aperiodicity_analysis_forward,
        WorldNode::ParameterMerge => parameter_merge_forward,
        WorldNode::UtauMapping => utau_mapping_forward,
        WorldNode::Synthesis => synthesis_forward,
        WorldNode::AudioOutput => audio_output_forward,
    };
    OperatorDescriptor { name: role.op_type(), create: token_create, forward, destroy: default_destroy }
}
