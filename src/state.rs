//! The app-wide state threaded explicitly through axum handlers. This
//! deliberately replaces the donor's `OnceLock`-based global singleton
//! pattern (see `cache.rs` in the donor repo) with a value passed via
//! `axum::extract::State` — see SPEC_FULL.md §9.

use std::path::PathBuf;
use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::RwLock;

use crate::ingest::IngestHandle;
use crate::upload_staging::UploadStaging;
use crate::vault::Vault;

/// The single open vault, once unlocked. Held behind an `RwLock` so the
/// pre-unlock HTTP routes (`create_vault`/`unlock_vault`) can install it.
#[derive(Clone)]
pub struct VaultContext {
    pub pool: SqlitePool,
    pub staging: Arc<UploadStaging>,
    pub ingest: IngestHandle,
}

#[derive(Clone)]
pub struct AppState {
    pub vault_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub workers: usize,
    pub context: Arc<RwLock<Option<VaultContext>>>,
}

impl AppState {
    pub fn new(vault_dir: PathBuf, staging_dir: PathBuf, workers: usize) -> Self {
        AppState {
            vault_dir,
            staging_dir,
            workers,
            context: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn context(&self) -> Option<VaultContext> {
        self.context.read().await.clone()
    }

    /// Opens or creates `db` and installs it as the active vault context.
    pub async fn unlock(&self, db: &str, password: &str) -> crate::error::VaultResult<bool> {
        let path = self.vault_dir.join(format!("{db}.vault"));
        let vault = Vault::open(&path).await?;
        if !vault.check_password(password).await? {
            return Ok(false);
        }
        vault.set_password(password).await?;

        let staging = Arc::new(UploadStaging::new(self.staging_dir.join(db)).await?);
        let ingest = crate::ingest::spawn_workers(vault.pool.clone(), staging.clone(), self.workers);

        let context = VaultContext {
            pool: vault.pool,
            staging,
            ingest,
        };
        *self.context.write().await = Some(context);
        Ok(true)
    }

    pub async fn create(&self, db: &str, password: &str) -> crate::error::VaultResult<()> {
        let path = self.vault_dir.join(format!("{db}.vault"));
        if path.exists() {
            return Err(crate::error::VaultError::ClientMalformed(format!(
                "vault {db} already exists"
            )));
        }
        let vault = Vault::open(&path).await?;
        vault.set_password(password).await?;
        vault.shutdown().await?;
        Ok(())
    }
}
