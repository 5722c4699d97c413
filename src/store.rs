/*!
 # Per-host credential store

 Pairing with a gateway yields a client identity and a derived pre-shared
 key. Both are kept in a flat JSON file mapping the gateway host address to
 its record, so later runs can skip pairing entirely.

 The file is read once and written at most once per run. There is no
 locking; concurrent runs against the same file are not supported.
*/

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Result;

/// Default credential file, relative to the working directory
pub const CONFIG_FILE: &str = "tradfri_standalone_psk.conf";

/// Long-term credential for one gateway host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Opaque client identity presented during the DTLS handshake
    pub identity: String,
    /// Pre-shared key derived from the security code at pairing time
    pub key: String,
}

/// Credentials for all known gateway hosts, persisted as one JSON object
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PskStore {
    hosts: BTreeMap<String, Credentials>,
}

impl PskStore {
    /// Loads the store from `path`. A missing file is an empty store, not
    /// an error.
    pub fn load(path: &Path) -> Result<PskStore> {
        if !path.exists() {
            debug!("No credential file at {}, starting empty", path.display());
            return Ok(PskStore::default());
        }
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Writes the whole store to `path` as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        fs::write(path, bytes)?;
        debug!("Saved credentials to {}", path.display());
        Ok(())
    }

    /// Stored credentials for `host`, if it has been paired before
    pub fn get(&self, host: &str) -> Option<&Credentials> {
        self.hosts.get(host)
    }

    /// Records freshly paired credentials for `host`.
    ///
    /// A host's record is created once and never mutated afterward; callers
    /// only insert after `get` returned nothing.
    pub fn insert(&mut self, host: String, credentials: Credentials) {
        self.hosts.insert(host, credentials);
    }
}
