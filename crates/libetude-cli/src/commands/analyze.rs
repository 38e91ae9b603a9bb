//! Runs the WORLD analysis/synthesis graph over a WAV file and reports F0
//! statistics plus a profiler JSON report.

use std::path::PathBuf;

use clap::Args;
use libetude_core::Profiler;
use libetude_graph_world::WorldGraphBuilder;
use libetude_world::{F0Algorithm, WorldConfig};

use super::common::{read_wav_mono, write_wav_mono};

#[derive(Args)]
pub struct AnalyzeArgs {
    /// Input WAV file
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// F0 extraction algorithm
    #[arg(long, default_value = "harvest")]
    f0_algorithm: String,

    /// Re-synthesize and write the reconstructed waveform here
    #[arg(long)]
    resynth_output: Option<PathBuf>,

    /// Write the profiler JSON report here
    #[arg(long)]
    profile_output: Option<PathBuf>,
}

pub fn run(args: AnalyzeArgs) -> anyhow::Result<()> {
    let algorithm = match args.f0_algorithm.to_ascii_lowercase().as_str() {
        "dio" => F0Algorithm::Dio,
        "harvest" => F0Algorithm::Harvest,
        other => anyhow::bail!("unknown F0 algorithm '{other}' (expected 'dio' or 'harvest')"),
    };

    println!("Reading {}...", args.input.display());
    let (signal, sample_rate) = read_wav_mono(&args.input)?;
    println!("  {} samples, {} Hz, {:.2}s", signal.len(), sample_rate, signal.len() as f32 / sample_rate as f32);

    let config = WorldConfig::new(sample_rate);
    let profiler = Profiler::new(64);

    profiler.start("world_graph_run").map_err(|e| anyhow::anyhow!("{e}"))?;
    let mut world = WorldGraphBuilder::new(config).with_algorithm(algorithm).build().map_err(|e| anyhow::anyhow!("{e}"))?;
    world.context.set_input_signal(signal.clone());
    world.graph.execute().map_err(|e| anyhow::anyhow!("{e}"))?;
    profiler
        .end("world_graph_run", signal.len() * std::mem::size_of::<f32>(), signal.len() * std::mem::size_of::<f32>())
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let params = world.context.take_params().ok_or_else(|| anyhow::anyhow!("analysis produced no parameters"))?;
    let voiced_frames = (0..params.f0.len()).filter(|&t| params.is_voiced(t)).count();
    let voiced_mean_f0 = if voiced_frames > 0 {
        params.f0.iter().filter(|&&f| f > 0.0).sum::<f64>() / voiced_frames as f64
    } else {
        0.0
    };

    println!("\nAnalysis:");
    println!("  frames: {}", params.f0.len());
    println!("  voiced: {voiced_frames} ({:.1}%)", 100.0 * voiced_frames as f32 / params.f0.len().max(1) as f32);
    println!("  mean voiced F0: {voiced_mean_f0:.1} Hz");

    if let Some(profile_path) = &args.profile_output {
        let report = profiler.report_json().map_err(|e| anyhow::anyhow!("{e}"))?;
        std::fs::write(profile_path, report)?;
        println!("\nWrote profiler report to {}", profile_path.display());
    }

    if let Some(resynth_path) = &args.resynth_output {
        let waveform = world.context.take_synthesized().ok_or_else(|| anyhow::anyhow!("no synthesized waveform"))?;
        write_wav_mono(resynth_path, &waveform, sample_rate)?;
        println!("Wrote resynthesized audio to {}", resynth_path.display());
    }

    Ok(())
}
