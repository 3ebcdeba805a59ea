//! Process configuration: a debug/release split the same shape as the
//! donor's config loader, scoped to what CompactVault actually needs.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "compactvault", about = "A single-host content-addressed asset vault")]
struct Cli {
    /// Directory holding `<name>.vault` files.
    #[arg(long)]
    vault_dir: Option<PathBuf>,

    /// Directory for in-progress multi-part uploads.
    #[arg(long)]
    staging_dir: Option<PathBuf>,

    /// HTTP port to bind; auto-increments on conflict.
    #[arg(long)]
    port: Option<u16>,

    /// Ingestion worker pool size; defaults to host CPU count (min 4).
    #[arg(long)]
    workers: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub vault_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub port: u16,
    pub workers: usize,
}

impl Config {
    /// Loads configuration: in debug builds, attempts `.env` first and
    /// falls back to defaults with a warning; in release builds, CLI
    /// flags and environment variables are authoritative.
    pub fn load() -> Self {
        #[cfg(debug_assertions)]
        {
            if dotenvy::dotenv().is_ok() {
                tracing::info!("loaded .env file");
            } else {
                tracing::warn!("no .env file found, using defaults/CLI flags");
            }
        }

        let cli = Cli::parse();

        let vault_dir = cli
            .vault_dir
            .or_else(|| std::env::var("COMPACTVAULT_VAULT_DIR").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("./vaults"));

        let staging_dir = cli
            .staging_dir
            .or_else(|| std::env::var("COMPACTVAULT_STAGING_DIR").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("./upload_temp"));

        let port = cli
            .port
            .or_else(|| std::env::var("COMPACTVAULT_PORT").ok().and_then(|p| p.parse().ok()))
            .unwrap_or(8000);

        let workers = cli.workers.unwrap_or_else(crate::ingest::worker_count);

        Config {
            vault_dir,
            staging_dir,
            port,
            workers,
        }
    }
}
