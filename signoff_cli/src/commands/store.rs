use anyhow::Result;

use crate::config::Config;
use crate::store_manager::{self, StoreManager};

pub fn verify() -> Result<()> {
    let config = Config::load_or_default()?;
    println!("Verifying {}...", config.db_path.display());

    let inspection = store_manager::verify(&config.db_path)?;

    println!(
        "OK: {} workflow(s), {} pending WAL entries, snapshot checksums and history chains intact",
        inspection.workflows, inspection.wal_entries
    );
    Ok(())
}

pub fn compact() -> Result<()> {
    StoreManager::load()?.compact()
}
