//! LibEtude CLI - command-line demo shell for the on-device TTS/singing
//! synthesis runtime.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "libetude")]
#[command(author, version, about = "LibEtude on-device synthesis runtime CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the WORLD analysis/synthesis graph over a WAV file
    Analyze(commands::analyze::AnalyzeArgs),

    /// Synthesize a placeholder utterance from text
    Synthesize(commands::synthesize::SynthesizeArgs),

    /// Synthesize a placeholder melody from a note sequence
    Sing(commands::synthesize::SingArgs),

    /// Inspect or edit the runtime configuration file
    Config(commands::config::ConfigArgs),
}

fn main() -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    tracing::debug!(command = ?std::mem::discriminant(&cli.command), "dispatching command");

    match cli.command {
        Commands::Analyze(args) => commands::analyze::run(args),
        Commands::Synthesize(args) => commands::synthesize::run(args),
        Commands::Sing(args) => commands::synthesize::run_sing(args),
        Commands::Config(args) => commands::config::run(args),
    }
}
