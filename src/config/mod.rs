pub mod validate;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Non-secret operational config at `<home>/dockhand.toml`. Secrets
/// (platform key, master key, deploy keys, managed SSH keys) never live
/// here — they live at the fixed paths `Home` resolves below.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PlatformConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    #[serde(default)]
    pub self_update_webhook_secret: Option<String>,
    #[serde(default)]
    pub self_update_compose_file: Option<String>,
    #[serde(default = "default_release_image")]
    pub release_image: String,
    #[serde(default = "default_base_dir")]
    pub remote_base_dir: String,
}

fn default_bind() -> String {
    "0.0.0.0:7070".to_string()
}

fn default_release_image() -> String {
    "ghcr.io/dockhand-rs/dockhand:latest".to_string()
}

fn default_base_dir() -> String {
    "/opt/dockhand".to_string()
}

impl PlatformConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }
}

/// Resolves the fixed set of paths under the control-plane home directory,
/// overridable via `DOCKHAND_HOME` (default: `~/.dockhand`).
#[derive(Debug, Clone)]
pub struct Home {
    root: PathBuf,
}

impl Home {
    pub fn resolve() -> Result<Self> {
        let root = match std::env::var_os("DOCKHAND_HOME") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()
                .context("could not determine home directory")?
                .join(".dockhand"),
        };
        Ok(Self { root })
    }

    pub fn ensure(&self) -> Result<()> {
        for dir in [self.root.clone(), self.envs_dir(), self.keys_dir(), self.backups_dir()] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("dockhand.toml")
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join("dockhand.db")
    }

    pub fn envs_dir(&self) -> PathBuf {
        self.root.join("envs")
    }

    pub fn env_path(&self, app_id: &str) -> PathBuf {
        self.envs_dir().join(format!("{}.json", app_id))
    }

    pub fn master_key_path(&self) -> PathBuf {
        self.root.join("master.key")
    }

    pub fn api_key_path(&self) -> PathBuf {
        self.root.join("api_key.txt")
    }

    pub fn deploy_keys_path(&self) -> PathBuf {
        self.root.join("deploy_keys.json")
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.root.join("keys")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }
}

#[cfg(unix)]
pub fn write_private_file(path: &Path, content: &[u8]) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .with_context(|| format!("failed to chmod {}", path.display()))?;
    Ok(())
}

#[cfg(not(unix))]
pub fn write_private_file(path: &Path, content: &[u8]) -> Result<()> {
    std::fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
}
