//! Master key lifecycle. One age x25519 keypair per control-plane
//! installation, stored at `Home::master_key_path()` — replacing the
//! teacher's per-app, multi-recipient key model with a single key that
//! encrypts every app's environment JSON.

use std::fs;

use age::secrecy::ExposeSecret;
use age::x25519;
use anyhow::{Context, Result};

use crate::config::{write_private_file, Home};

/// Loads the master identity, generating and persisting one on first use.
/// The generate-on-first-use path is the only place a master key is ever
/// created — there is no separate `init` step a caller must remember to
/// run first.
pub fn load_or_create(home: &Home) -> Result<x25519::Identity> {
    let path = home.master_key_path();
    if path.exists() {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read master key at {}", path.display()))?;
        let identity: x25519::Identity = content
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid master key at {}: {}", path.display(), e))?;
        return Ok(identity);
    }

    let identity = x25519::Identity::generate();
    write_private_file(&path, identity.to_string().expose_secret().as_bytes())
        .context("failed to persist generated master key")?;
    tracing::info!(path = %path.display(), "generated new master key");
    Ok(identity)
}

pub fn recipient_of(identity: &x25519::Identity) -> x25519::Recipient {
    identity.to_public()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn generates_once_and_reuses_on_second_load() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("DOCKHAND_HOME", dir.path());
        let home = Home::resolve().unwrap();
        home.ensure().unwrap();

        let first = load_or_create(&home).unwrap();
        let second = load_or_create(&home).unwrap();
        assert_eq!(first.to_string().expose_secret(), second.to_string().expose_secret());
        std::env::remove_var("DOCKHAND_HOME");
    }
}
