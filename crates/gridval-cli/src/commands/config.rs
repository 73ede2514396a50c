use std::fs;

use anyhow::{anyhow, bail, Context, Result};
use gridval_cli::common::load_config;
use gridval_cli::{Cli, ConfigCommands};
use gridval_core::EngineConfig;

pub fn handle(cli: &Cli, command: &ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let config = load_config(cli)?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
        ConfigCommands::Init { out, force } => {
            let path = out
                .clone()
                .or_else(EngineConfig::config_path)
                .ok_or_else(|| anyhow!("unable to determine the gridval config path"))?;
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            fs::write(&path, EngineConfig::default().to_toml()?)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Wrote default configuration to {}", path.display());
            Ok(())
        }
    }
}
