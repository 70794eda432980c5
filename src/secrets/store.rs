//! Per-app environment storage: one age-encrypted JSON object per app at
//! `Home::env_path(app_id)`, keyed to the single master identity rather
//! than a per-stage recipient list.

use std::collections::BTreeMap;
use std::io::{Read as _, Write as _};

use age::x25519;
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::config::{write_private_file, Home};

pub type EnvMap = BTreeMap<String, String>;

pub fn encrypt(plaintext: &str, recipient: &x25519::Recipient) -> Result<Vec<u8>> {
    let encryptor = age::Encryptor::with_recipients(std::iter::once(recipient as &dyn age::Recipient))
        .map_err(|e| anyhow::anyhow!("encryption setup failed: {}", e))?;

    let mut output = vec![];
    let armor_writer = age::armor::ArmoredWriter::wrap_output(&mut output, age::armor::Format::AsciiArmor)?;
    let mut writer = encryptor
        .wrap_output(armor_writer)
        .context("failed to create age encryptor")?;
    writer.write_all(plaintext.as_bytes()).context("failed to write encrypted data")?;
    let armor_writer = writer.finish().context("failed to finalize encryption")?;
    armor_writer.finish()?;
    Ok(output)
}

pub fn decrypt(ciphertext: &[u8], identity: &x25519::Identity) -> Result<String> {
    let decryptor = age::Decryptor::new(age::armor::ArmoredReader::new(ciphertext))
        .context("failed to parse age file")?;
    let mut reader = decryptor
        .decrypt(std::iter::once(identity as &dyn age::Identity))
        .map_err(|e| anyhow::anyhow!("decryption failed: {}", e))?;
    let mut plaintext = String::new();
    reader.read_to_string(&mut plaintext).context("failed to read decrypted data")?;
    Ok(plaintext)
}

/// Reads and decrypts an app's environment. A missing file is an empty
/// environment, not an error — apps with no configured variables never
/// need an explicit empty write first.
pub fn read_env(home: &Home, app_id: i64, identity: &x25519::Identity) -> Result<EnvMap> {
    let path = home.env_path(&app_id.to_string());
    if !path.exists() {
        return Ok(EnvMap::new());
    }
    let ciphertext = std::fs::read(&path)
        .with_context(|| format!("failed to read env file: {}", path.display()))?;
    let plaintext = decrypt(&ciphertext, identity)?;
    serde_json::from_str(&plaintext).context("env file did not contain a JSON object")
}

pub fn write_env(home: &Home, app_id: i64, env: &EnvMap, identity: &x25519::Identity) -> Result<()> {
    let recipient = super::key::recipient_of(identity);
    let plaintext = serde_json::to_string(env).context("failed to serialise environment")?;
    let ciphertext = encrypt(&plaintext, &recipient)?;
    write_private_file(&home.env_path(&app_id.to_string()), &ciphertext)
        .context("failed to write env file")
}

/// Renders an environment map as a `.env` file body for upload alongside a
/// compose manifest.
pub fn render_dotenv(env: &EnvMap) -> String {
    env.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>().join("\n")
}

/// SHA-256 of the ciphertext on disk; `None` if the app has no env file
/// yet. Used to detect whether a redeploy actually needs to re-upload
/// `.env`.
pub fn compute_hash(home: &Home, app_id: i64) -> Result<Option<String>> {
    let path = home.env_path(&app_id.to_string());
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read(&path)
        .with_context(|| format!("failed to read env file: {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&content);
    Ok(Some(hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encrypt_decrypt() {
        let identity = x25519::Identity::generate();
        let recipient = identity.to_public();
        let ciphertext = encrypt("DATABASE_URL=postgres://x\n", &recipient).unwrap();
        let plaintext = decrypt(&ciphertext, &identity).unwrap();
        assert_eq!(plaintext, "DATABASE_URL=postgres://x\n");
    }

    #[test]
    fn render_dotenv_is_sorted_and_stable() {
        let mut env = EnvMap::new();
        env.insert("B".into(), "2".into());
        env.insert("A".into(), "1".into());
        assert_eq!(render_dotenv(&env), "A=1\nB=2");
    }

    #[test]
    fn decrypting_with_the_wrong_identity_fails_instead_of_returning_garbage() {
        let recipient = x25519::Identity::generate().to_public();
        let ciphertext = encrypt("SECRET=1\n", &recipient).unwrap();

        let other_identity = x25519::Identity::generate();
        let err = decrypt(&ciphertext, &other_identity).unwrap_err();
        assert!(err.to_string().to_lowercase().contains("decrypt"));
    }
}
