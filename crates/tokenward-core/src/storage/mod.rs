//! Durable key/value storage for session credentials.
//!
//! This module provides:
//! - `Persistence`: the synchronous, best-effort storage contract
//! - `MemoryStore`: process-local storage, used by tests
//! - `KeyringStore`: OS-level credential storage via keyring
//! - `EncryptedFileStore`: passphrase-sealed JSON file in the cache directory
//!
//! Only the session store writes through this interface.

pub mod file;
pub mod keychain;
pub mod memory;

use anyhow::Result;

pub use file::EncryptedFileStore;
pub use keychain::KeyringStore;
pub use memory::MemoryStore;

/// Storage key for the access credential
pub const ACCESS_CREDENTIAL_KEY: &str = "access-credential";

/// Storage key for the refresh credential
pub const REFRESH_CREDENTIAL_KEY: &str = "refresh-credential";

/// Synchronous key/value persistence.
///
/// `remove` on an absent key succeeds.
pub trait Persistence: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;
}
