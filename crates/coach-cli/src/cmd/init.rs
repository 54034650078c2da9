use anyhow::Context;
use coach_core::config::Config;
use coach_core::paths;
use coach_core::store::Store;
use std::path::Path;

use crate::output::print_json;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let dir = paths::coach_dir(root);
    std::fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let config_path = paths::config_path(root);
    let config_created = !config_path.exists();
    if config_created {
        Config::default()
            .save(root)
            .context("failed to write config.yaml")?;
    }

    let db_path = paths::database_path(root);
    let database_created = !db_path.exists();
    Store::open(&db_path).context("failed to create database")?;

    if json {
        return print_json(&serde_json::json!({
            "root": root,
            "config_created": config_created,
            "database_created": database_created,
        }));
    }

    println!("Initializing coach in: {}", root.display());
    let state = |created: bool| if created { "created:" } else { "exists: " };
    println!("  {} {}", state(config_created), paths::CONFIG_FILE);
    println!("  {} {}", state(database_created), paths::DATABASE_FILE);
    Ok(())
}
