pub mod config;
pub mod engine;
pub mod import;
pub mod init;
pub mod participant;
pub mod serve;
pub mod stats;

use anyhow::Context;
use coach_core::config::Config;
use coach_core::Engine;
use std::path::Path;

/// Load the config and open the engine of an initialized root.
pub fn open_engine(root: &Path) -> anyhow::Result<(Config, Engine)> {
    let config = Config::load(root).context("failed to load config")?;
    let engine = Engine::open(root, &config).context("failed to open engine database")?;
    Ok((config, engine))
}
