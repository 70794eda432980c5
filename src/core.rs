//! `Core` bundles everything a command handler — CLI or HTTP — needs to
//! act: the database pool, the resolved home directory and config, the
//! master encryption identity, the log broadcaster, the per-app deploy
//! coordinator, and an HTTP client for outbound webhooks. One instance is
//! built at startup and shared behind an `Arc` for the lifetime of the
//! process.

use std::sync::Arc;
use std::time::Duration;

use age::x25519;
use anyhow::Result;
use sqlx::SqlitePool;

use crate::broadcaster::LogBroadcaster;
use crate::config::{Home, PlatformConfig};
use crate::deploy::DeployCoordinator;
use crate::secrets::key;

pub struct Core {
    pub pool: SqlitePool,
    pub home: Home,
    pub config: PlatformConfig,
    pub identity: x25519::Identity,
    pub broadcaster: LogBroadcaster,
    pub coordinator: DeployCoordinator,
    pub http_client: reqwest::Client,
}

impl Core {
    /// Resolves `Home`, makes sure its directories exist, loads
    /// `dockhand.toml`, opens (and migrates) the sqlite database, and loads
    /// or generates the master age identity. Everything downstream assumes
    /// this has already run.
    pub async fn bootstrap() -> Result<Self> {
        let home = Home::resolve()?;
        home.ensure()?;
        let config = PlatformConfig::load(&home.config_path())?;
        let pool = crate::db::connect(&home.db_path()).await?;
        let identity = key::load_or_create(&home)?;
        let http_client = reqwest::Client::builder().timeout(Duration::from_secs(15)).build()?;

        Ok(Self {
            pool,
            home,
            config,
            identity,
            broadcaster: LogBroadcaster::default(),
            coordinator: DeployCoordinator::new(),
            http_client,
        })
    }

    pub fn recipient(&self) -> x25519::Recipient {
        key::recipient_of(&self.identity)
    }
}

pub type SharedCore = Arc<Core>;
