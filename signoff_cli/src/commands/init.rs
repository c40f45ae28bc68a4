use anyhow::{Context, Result};
use std::path::PathBuf;

use signoff_db::RecoveryManager;
use signoff_db::workflow::definition;

use crate::config::Config;

pub fn run(db_path: Option<PathBuf>, attachments_dir: Option<PathBuf>) -> Result<()> {
    println!("Initialising sign-off database...\n");

    let mut config = Config::load_or_default()?;
    let customised = db_path.is_some() || attachments_dir.is_some();

    if let Some(custom_path) = db_path {
        config.db_path = custom_path;
    }
    if let Some(custom_dir) = attachments_dir {
        config.attachments_dir = custom_dir;
    }

    if config.db_path.exists() {
        anyhow::bail!("Database already exists at: {}", config.db_path.display())
    }

    create_directory_structure(&config)?;

    println!("Writing empty database to: {}", config.db_path.display());
    RecoveryManager::init_database(&config.db_path).context("Failed to write initial database")?;

    if customised || !Config::config_file()?.exists() {
        config.save().context("Failed to save configuration")?;
        println!("Configuration saved to: {}", Config::config_file()?.display());
    }

    println!("Pipeline has {} steps:", definition::STEP_COUNT);
    for step in definition::all() {
        println!("  {}. {}", step.step_number, step.label);
    }
    println!("Initialisation complete!");

    Ok(())
}

fn create_directory_structure(config: &Config) -> Result<()> {
    println!("Setting up directories...");

    let signoff_dir = Config::signoff_dir()?;
    std::fs::create_dir_all(&signoff_dir).context("Failed to create .signoff directory")?;
    println!("Created: {}", signoff_dir.display());

    if let Some(parent) = config.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    std::fs::create_dir_all(&config.attachments_dir)
        .context("Failed to create attachments directory")?;
    println!("Created: {}", config.attachments_dir.display());

    Ok(())
}
