use crate::error::{Error, Result};
use crate::keypair::TlsKeyPair;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Bundle of named key pairs serialized to a single blob.
///
/// Entry order is deterministic so archives for the same inputs are
/// byte-identical.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TlsArchive {
    entries: BTreeMap<String, TlsKeyPair>,
}

impl TlsArchive {
    pub fn new() -> Self {
        TlsArchive::default()
    }

    pub fn add_key_pair(&mut self, name: &str, pair: TlsKeyPair) {
        self.entries.insert(name.to_string(), pair);
    }

    pub fn get_key_pair(&self, name: &str) -> Result<&TlsKeyPair> {
        self.entries
            .get(name)
            .ok_or_else(|| Error::KeyPairNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| Error::Serialization("failed to encode archive".to_string(), e))
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| Error::Serialization("failed to decode archive".to_string(), e))
    }
}
