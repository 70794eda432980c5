//! Deploy keys: scoped, revocable bearer tokens for CI pipelines, stored
//! as a hashed JSON file rather than a database table — a deliberate
//! choice so a restored/copied `dockhand.db` never carries CI credentials
//! along with it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::Home;

#[derive(Debug, Error)]
pub enum DeployKeyError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("deploy key with label '{0}' already exists")]
    LabelTaken(String),
    #[error("no deploy key with label '{0}'")]
    NotFound(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployKeyRecord {
    pub label: String,
    pub key_hash: String,
    pub created_at: DateTime<Utc>,
    pub scopes: Vec<String>,
}

fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

fn load(home: &Home) -> Result<Vec<DeployKeyRecord>, DeployKeyError> {
    let path = home.deploy_keys_path();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&content)?)
}

fn save(home: &Home, keys: &[DeployKeyRecord]) -> Result<(), DeployKeyError> {
    let body = serde_json::to_string_pretty(keys)?;
    crate::config::write_private_file(&home.deploy_keys_path(), body.as_bytes())?;
    Ok(())
}

/// Generates a new deploy key under `label` with a fixed `["deploy"]`
/// scope and returns the plaintext key — the only time it is ever
/// visible; only its hash is persisted.
pub fn generate(home: &Home, label: &str) -> Result<String, DeployKeyError> {
    let mut keys = load(home)?;
    if keys.iter().any(|k| k.label == label) {
        return Err(DeployKeyError::LabelTaken(label.to_string()));
    }

    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let key = base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes);

    keys.push(DeployKeyRecord {
        label: label.to_string(),
        key_hash: hash_key(&key),
        created_at: Utc::now(),
        scopes: vec!["deploy".to_string()],
    });
    save(home, &keys)?;
    Ok(key)
}

/// Looks up a presented key by its hash. `None` means invalid — this is
/// not a constant-time comparison against a single secret (there is no
/// single secret; the search is over a hashed table), so timing here
/// leaks at most which bucket of the table was scanned, not key material.
pub fn validate(home: &Home, key: &str) -> Result<Option<DeployKeyRecord>, DeployKeyError> {
    let hash = hash_key(key);
    Ok(load(home)?.into_iter().find(|k| k.key_hash == hash))
}

pub fn list(home: &Home) -> Result<Vec<DeployKeyRecord>, DeployKeyError> {
    load(home)
}

pub fn revoke(home: &Home, label: &str) -> Result<(), DeployKeyError> {
    let mut keys = load(home)?;
    let before = keys.len();
    keys.retain(|k| k.label != label);
    if keys.len() == before {
        return Err(DeployKeyError::NotFound(label.to_string()));
    }
    save(home, &keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn home() -> (TempDir, Home) {
        let dir = TempDir::new().unwrap();
        std::env::set_var("DOCKHAND_HOME", dir.path());
        let home = Home::resolve().unwrap();
        home.ensure().unwrap();
        (dir, home)
    }

    #[test]
    fn generate_then_validate_round_trips() {
        let (_dir, home) = home();
        let key = generate(&home, "ci-main").unwrap();
        let record = validate(&home, &key).unwrap().expect("key should validate");
        assert_eq!(record.label, "ci-main");
        assert!(validate(&home, "not-the-key").unwrap().is_none());
    }

    #[test]
    fn duplicate_label_is_rejected() {
        let (_dir, home) = home();
        generate(&home, "dup").unwrap();
        assert!(matches!(generate(&home, "dup"), Err(DeployKeyError::LabelTaken(_))));
    }

    #[test]
    fn revoke_removes_key_and_is_idempotent_failure() {
        let (_dir, home) = home();
        generate(&home, "temp").unwrap();
        revoke(&home, "temp").unwrap();
        assert!(list(&home).unwrap().is_empty());
        assert!(matches!(revoke(&home, "temp"), Err(DeployKeyError::NotFound(_))));
    }
}
