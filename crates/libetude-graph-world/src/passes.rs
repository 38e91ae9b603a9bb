//! Optimization passes specific to the WORLD topology: fusing the spectral
//! and aperiodicity analyzers when they would share an FFT buffer, and a
//! parallel schedule for the three analyzers (they read the same upstream
//! audio/F0 but write disjoint parts of `WorldParameters`, so no two of them
//! share a write set).

use libetude_core::error::Result;
use libetude_core::graph::Graph;

use crate::operators::WorldNode;

/// Whether `SpectrumAnalysis` and `AperiodicityAnalysis` are both present,
/// single-consumer of the same `F0Extraction` node, and therefore eligible
/// to be fused into one `WorldSpectrumAperiodicityFused` node sharing a
/// single FFT pass over the frame.
///
/// Returns the two candidate node names if fusion applies, for the caller
/// to act on (this crate does not itself rewrite the graph in place, since
/// `WorldGraph`'s nodes participate in a fixed, spec-mandated topology the
/// builder already wires minimally; this pass documents and validates the
/// opportunity rather than performing the fusion destructively).
pub fn spectrum_aperiodicity_fusion_candidate(graph: &Graph) -> Result<Option<(String, String)>> {
    let spectrum = graph.find_by_name(WorldNode::SpectrumAnalysis.op_type());
    let aperiodicity = graph.find_by_name(WorldNode::AperiodicityAnalysis.op_type());
    let (Some(spectrum), Some(aperiodicity)) = (spectrum, aperiodicity) else {
        return Ok(None);
    };

    let spectrum_sources: Vec<_> = graph
        .incoming(spectrum)?
        .iter()
        .map(|&e| graph.endpoints(e).map(|(src, _)| src))
        .collect::<Result<Vec<_>>>()?;
    let aperiodicity_sources: Vec<_> = graph
        .incoming(aperiodicity)?
        .iter()
        .map(|&e| graph.endpoints(e).map(|(src, _)| src))
        .collect::<Result<Vec<_>>>()?;

    let shares_f0_source = spectrum_sources
        .iter()
        .any(|s| aperiodicity_sources.contains(s) && graph.op_type(*s).is_ok_and(|t| t == WorldNode::F0Extraction.op_type()));

    if shares_f0_source {
        Ok(Some((graph.op_type(spectrum)?.to_string(), graph.op_type(aperiodicity)?.to_string())))
    } else {
        Ok(None)
    }
}

/// Returns the node names of the three analyzers, since they write disjoint
/// parts of the shared `WorldParameters` (f0 is already finalized by the
/// time they run) and can therefore share one parallel-executor level.
pub fn analyzer_parallel_group(graph: &Graph) -> Vec<String> {
    [WorldNode::SpectrumAnalysis, WorldNode::AperiodicityAnalysis]
        .into_iter()
        .filter_map(|role| graph.find_by_name(role.op_type()).map(|_| role.op_type().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::WorldGraphBuilder;
    use libetude_world::WorldConfig;

    #[test]
    fn fusion_candidate_detected_when_both_share_f0_source() {
        let world = WorldGraphBuilder::new(WorldConfig::new(16000)).build().unwrap();
        let candidate = spectrum_aperiodicity_fusion_candidate(&world.graph).unwrap();
        assert!(candidate.is_some());
    }

    #[test]
    fn analyzer_parallel_group_contains_both_analyzers() {
        let world = WorldGraphBuilder::new(WorldConfig::new(16000)).build().unwrap();
        let group = analyzer_parallel_group(&world.graph);
        assert_eq!(group.len(), 2);
    }
}
