//! Passphrase-sealed credential file.
//!
//! All entries are kept as one JSON map, sealed with ChaCha20-Poly1305 under
//! a key derived from the passphrase with Argon2. The file is rewritten with
//! a fresh nonce on every mutation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use argon2::Argon2;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Persistence;
use crate::config::Config;

/// Credential file name in cache directory
const CREDENTIAL_FILE: &str = "credentials.json";

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// On-disk layout; every field is base64.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    salt: String,
    nonce: String,
    ciphertext: String,
}

pub struct EncryptedFileStore {
    path: PathBuf,
    salt: [u8; SALT_LEN],
    cipher: ChaCha20Poly1305,
    entries: Mutex<HashMap<String, String>>,
}

impl EncryptedFileStore {
    /// Default location: `credentials.json` in the config's cache directory
    pub fn default_path(config: &Config) -> Result<PathBuf> {
        Ok(config.cache_dir()?.join(CREDENTIAL_FILE))
    }

    /// Open the store at `path`, unsealing existing contents with `passphrase`.
    /// A missing file yields an empty store; nothing is written until the
    /// first mutation.
    pub fn open(path: impl Into<PathBuf>, passphrase: &str) -> Result<Self> {
        let path = path.into();

        if !path.exists() {
            let mut salt = [0u8; SALT_LEN];
            OsRng.fill_bytes(&mut salt);
            let cipher = Self::derive_cipher(passphrase, &salt)?;
            debug!(?path, "Credential file not found, starting empty");
            return Ok(Self {
                path,
                salt,
                cipher,
                entries: Mutex::new(HashMap::new()),
            });
        }

        let contents =
            std::fs::read_to_string(&path).context("Failed to read credential file")?;
        let envelope: Envelope =
            serde_json::from_str(&contents).context("Failed to parse credential file")?;

        let salt: [u8; SALT_LEN] = decode_fixed(&envelope.salt).context("Invalid salt")?;
        let nonce: [u8; NONCE_LEN] = decode_fixed(&envelope.nonce).context("Invalid nonce")?;
        let ciphertext = STANDARD
            .decode(&envelope.ciphertext)
            .context("Invalid ciphertext encoding")?;

        let cipher = Self::derive_cipher(passphrase, &salt)?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|_| anyhow!("Failed to decrypt credential file (wrong passphrase?)"))?;
        let entries: HashMap<String, String> =
            serde_json::from_slice(&plaintext).context("Failed to parse credential entries")?;

        debug!(?path, count = entries.len(), "Credential file unsealed");
        Ok(Self {
            path,
            salt,
            cipher,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn derive_cipher(passphrase: &str, salt: &[u8]) -> Result<ChaCha20Poly1305> {
        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| anyhow!("Key derivation failed: {}", e))?;
        Ok(ChaCha20Poly1305::new(Key::from_slice(&key)))
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("credential file lock poisoned"))
    }

    fn write(&self, entries: &HashMap<String, String>) -> Result<()> {
        let plaintext = serde_json::to_vec(entries)?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_ref())
            .map_err(|_| anyhow!("Failed to seal credential entries"))?;

        let envelope = Envelope {
            salt: STANDARD.encode(self.salt),
            nonce: STANDARD.encode(nonce),
            ciphertext: STANDARD.encode(ciphertext),
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&envelope)?)
            .context("Failed to write credential file")?;
        std::fs::rename(&tmp, &self.path).context("Failed to replace credential file")?;
        Ok(())
    }
}

fn decode_fixed<const N: usize>(encoded: &str) -> Result<[u8; N]> {
    let bytes = STANDARD.decode(encoded)?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| anyhow!("expected {} bytes, found {}", N, b.len()))
}

impl Persistence for EncryptedFileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    // Mutations are staged on a copy; memory changes only once the file has.

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.lock()?;
        let mut staged = entries.clone();
        staged.insert(key.to_string(), value.to_string());
        self.write(&staged)?;
        *entries = staged;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.lock()?;
        if !entries.contains_key(key) && !self.path.exists() {
            return Ok(());
        }
        let mut staged = entries.clone();
        staged.remove(key);
        self.write(&staged)?;
        *entries = staged;
        Ok(())
    }
}
