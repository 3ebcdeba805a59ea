//! Vault lifecycle: opening a vault file, applying pragmas, password
//! set/check, and graceful shutdown.

use std::path::Path;
use std::str::FromStr;

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::database;
use crate::error::{VaultError, VaultResult};

const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;

pub struct Vault {
    pub pool: SqlitePool,
}

impl Vault {
    /// Opens (creating if absent) the vault file at `path`, applying the
    /// same pragma sequence the donor prototype used on every connection.
    pub async fn open(path: &Path) -> VaultResult<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(|e| VaultError::Internal(e.to_string()))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        for pragma in [
            "PRAGMA foreign_keys = ON",
            "PRAGMA journal_mode = WAL",
            "PRAGMA synchronous = NORMAL",
            "PRAGMA busy_timeout = 5000",
            "PRAGMA cache_size = -64000",
            "PRAGMA temp_store = MEMORY",
        ] {
            sqlx::query(pragma).execute(&pool).await?;
        }

        database::ensure_schema(&pool).await?;
        Ok(Vault { pool })
    }

    /// Stores a freshly-salted PBKDF2-HMAC-SHA256 hash of `password`.
    pub async fn set_password(&self, password: &str) -> VaultResult<()> {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);

        let mut key = [0u8; KEY_LEN];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, PBKDF2_ITERATIONS, &mut key);

        database::set_property(&self.pool, "password_salt", &hex::encode(salt)).await?;
        database::set_property(&self.pool, "password_hash", &hex::encode(key)).await?;
        Ok(())
    }

    /// Recomputes the PBKDF2 hash for `password` and compares it to the
    /// stored one. If no password has been set yet, any password is
    /// accepted (the initial-creation case).
    pub async fn check_password(&self, password: &str) -> VaultResult<bool> {
        let salt_hex = database::get_property(&self.pool, "password_salt").await?;
        let hash_hex = database::get_property(&self.pool, "password_hash").await?;
        let (Some(salt_hex), Some(hash_hex)) = (salt_hex, hash_hex) else {
            return Ok(true);
        };

        let salt = hex::decode(&salt_hex).map_err(|e| VaultError::Internal(e.to_string()))?;
        let mut key = [0u8; KEY_LEN];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, PBKDF2_ITERATIONS, &mut key);

        Ok(hex::encode(key) == hash_hex)
    }

    /// Full WAL checkpoint then close, matching the donor prototype's
    /// SIGINT/SIGTERM handler so the vault file is self-contained after
    /// shutdown.
    pub async fn shutdown(&self) -> VaultResult<()> {
        sqlx::query("PRAGMA wal_checkpoint(FULL)").execute(&self.pool).await?;
        self.pool.close().await;
        Ok(())
    }
}
