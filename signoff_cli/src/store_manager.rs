use anyhow::{Context, Result, bail};
use std::path::Path;

use signoff_db::{Engine, FsAttachmentStore, Inspection, RecoveryManager, WorkflowService};

use crate::config::Config;

pub struct StoreManager {
    service: WorkflowService,
}

impl StoreManager {
    pub fn load() -> Result<Self> {
        let config = Config::load_or_default()?;
        Self::load_with(&config)
    }

    pub fn load_with(config: &Config) -> Result<Self> {
        let db_path = config.db_path.as_path();

        if !db_path.exists() {
            bail!(
                "Database not found at: {}\nRun 'signoff init' first.",
                db_path.display()
            );
        }

        tracing::debug!(path = %db_path.display(), "opening workflow store");

        let service = WorkflowService::open(db_path, Engine::with_config(config.engine))
            .context("Failed to load workflow store")?
            .with_attachment_store(Box::new(FsAttachmentStore::new(&config.attachments_dir)));

        Ok(Self { service })
    }

    pub fn service(&self) -> &WorkflowService {
        &self.service
    }

    pub fn compact(&self) -> Result<()> {
        println!("Compacting database...");
        self.service
            .compact()
            .context("Failed to compact database")?;
        println!("Database compacted");
        Ok(())
    }
}

/// Checks the database at `db_path` without recovering or rewriting it.
pub fn verify(db_path: &Path) -> Result<Inspection> {
    if !db_path.exists() {
        bail!(
            "Database not found at: {}\nRun 'signoff init' first.",
            db_path.display()
        );
    }

    let inspection = RecoveryManager::inspect(db_path).context("Database verification failed")?;

    for problem in &inspection.problems {
        println!("{}", problem);
    }
    if !inspection.problems.is_empty() {
        bail!("{} problem(s) found", inspection.problems.len());
    }
    Ok(inspection)
}
