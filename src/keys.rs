//! Chain-id keyed signing keys.

use serde::Deserialize;
use std::{collections::HashMap, path::Path, sync::Arc};

/// A single chain's signing material.
#[derive(Clone, Deserialize)]
pub struct ChainKey {
    /// Hex-encoded signing key.
    pub private_key: String,
    /// The address derived from the key, as configured.
    pub address: String,
}

impl std::fmt::Debug for ChainKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainKey")
            .field("private_key", &"<redacted>")
            .field("address", &self.address)
            .finish()
    }
}

/// Read-only store of signing keys, keyed by chain id.
///
/// Loaded from a plaintext JSON file of the form
/// `{"<chain_id>": {"private_key": "0x…", "address": "0x…"}}`. Encrypted
/// backends are external to the solver core.
#[derive(Debug, Clone, Default)]
pub struct KeyStore {
    keys: Arc<HashMap<String, ChainKey>>,
}

impl KeyStore {
    /// Loads keys from a plaintext JSON file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> eyre::Result<Self> {
        let keys: HashMap<String, ChainKey> =
            serde_json::from_str(&std::fs::read_to_string(path)?)?;
        Ok(Self { keys: Arc::new(keys) })
    }

    /// Builds a store from in-memory keys. Used for testing only.
    pub fn from_keys(keys: HashMap<String, ChainKey>) -> Self {
        Self { keys: Arc::new(keys) }
    }

    /// Returns the signing key for `chain_id`, if configured.
    pub fn key_for_chain(&self, chain_id: &str) -> Option<&ChainKey> {
        self.keys.get(chain_id)
    }
}
