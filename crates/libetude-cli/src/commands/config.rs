//! Inspects and edits the user `RuntimeConfig` TOML file.

use clap::{Args, Subcommand};
use libetude_config::{F0Algorithm, MelScaleType, QualityMode, RuntimeConfig, ensure_user_config_dir};

use super::common::parse_key_val;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    action: ConfigAction,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the active config (defaults, overlaid with the file if present)
    Show,
    /// Write the default config to the user config directory
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Update one or more fields in place (`--set sample_rate=16000`)
    Set {
        #[arg(long = "set", value_parser = parse_key_val, required = true)]
        fields: Vec<(String, String)>,
    },
}

pub fn run(args: ConfigArgs) -> anyhow::Result<()> {
    let path = ensure_user_config_dir()?.join("runtime.toml");

    match args.action {
        ConfigAction::Show => {
            let config = if path.exists() { RuntimeConfig::load(&path)? } else { RuntimeConfig::default() };
            println!("{}", toml::to_string_pretty(&config)?);
            if !path.exists() {
                println!("# no config file at {}; showing defaults", path.display());
            }
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
            }
            RuntimeConfig::default().save(&path)?;
            println!("Wrote default config to {}", path.display());
        }
        ConfigAction::Set { fields } => {
            let mut config = if path.exists() { RuntimeConfig::load(&path)? } else { RuntimeConfig::default() };
            for (key, value) in fields {
                apply_field(&mut config, &key, &value)?;
            }
            config.validate()?;
            config.save(&path)?;
            println!("Updated {}", path.display());
        }
    }
    Ok(())
}

fn apply_field(config: &mut RuntimeConfig, key: &str, value: &str) -> anyhow::Result<()> {
    match key {
        "sample_rate" => config.sample_rate = value.parse()?,
        "quality_mode" => config.quality_mode = QualityMode::parse(value)?,
        "mel_scale" => config.mel_scale = MelScaleType::parse(value)?,
        "f0_algorithm" => config.f0_algorithm = F0Algorithm::parse(value)?,
        "n_mels" => config.n_mels = value.parse()?,
        "cache_max_bytes" => config.cache_max_bytes = value.parse()?,
        "cache_compress" => config.cache_compress = value.parse()?,
        other => anyhow::bail!("unknown config field '{other}'"),
    }
    Ok(())
}
