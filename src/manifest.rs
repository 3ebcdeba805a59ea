//! Per-asset hash-chain manifest: an ordered list of chunk references with
//! a tamper-evident `previous_hash` link, plus filename/total size.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainEntry {
    pub chunk_hash: String,
    pub size: u64,
    pub previous_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub filename: String,
    pub total_size: u64,
    pub chain: Vec<ChainEntry>,
}

impl Manifest {
    pub fn new(filename: String) -> Self {
        Manifest {
            filename,
            total_size: 0,
            chain: Vec::new(),
        }
    }

    /// Appends a chain entry whose `previous_hash` links to the current
    /// last entry (or `None` if this is the first).
    pub fn push(&mut self, chunk_hash: String, size: u64) {
        let previous_hash = self.chain.last().map(|e| block_hash(e));
        self.chain.push(ChainEntry {
            chunk_hash,
            size,
            previous_hash,
        });
        self.total_size += size;
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Canonical sort-keyed serialization of a chain entry, hashed with the
/// same digest used for chunk content addressing.
pub fn block_hash(entry: &ChainEntry) -> String {
    let canonical = canonical_json(entry);
    let hash = blake2b_simd::Params::new().hash_length(64).hash(canonical.as_bytes());
    hex::encode(hash.as_bytes())
}

/// `ChainEntry` has exactly three fields; serializing through a `BTreeMap`
/// guarantees key order matches `serde_json`'s default field order here,
/// but we go through a map explicitly so the hash is stable even if fields
/// are reordered in the struct definition later.
fn canonical_json(entry: &ChainEntry) -> String {
    use std::collections::BTreeMap;
    let mut map: BTreeMap<&'static str, serde_json::Value> = BTreeMap::new();
    map.insert("chunk_hash", serde_json::Value::String(entry.chunk_hash.clone()));
    map.insert("size", serde_json::Value::Number(entry.size.into()));
    map.insert(
        "previous_hash",
        match &entry.previous_hash {
            Some(h) => serde_json::Value::String(h.clone()),
            None => serde_json::Value::Null,
        },
    );
    serde_json::to_string(&map).expect("BTreeMap<&str, Value> always serializes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_links_previous_hash() {
        let mut m = Manifest::new("a.txt".to_string());
        m.push("h1".to_string(), 10);
        m.push("h2".to_string(), 20);
        assert_eq!(m.chain[0].previous_hash, None);
        assert_eq!(
            m.chain[1].previous_hash.as_deref(),
            Some(block_hash(&m.chain[0]).as_str())
        );
        assert_eq!(m.total_size, 30);
    }

    #[test]
    fn round_trips_through_json() {
        let mut m = Manifest::new("f".to_string());
        m.push("abc".to_string(), 5);
        let encoded = m.encode().unwrap();
        let decoded = Manifest::decode(&encoded).unwrap();
        assert_eq!(decoded.filename, m.filename);
        assert_eq!(decoded.chain, m.chain);
    }

    #[test]
    fn block_hash_is_deterministic() {
        let entry = ChainEntry {
            chunk_hash: "deadbeef".to_string(),
            size: 42,
            previous_hash: None,
        };
        assert_eq!(block_hash(&entry), block_hash(&entry));
    }
}
