//! Node configuration and identity

use anyhow::Context;
use serde::{Deserialize, Serialize};
use shard_consensus::ConsensusConfig;
use shard_primitives::{KeyKind, PrivKey};
use std::path::{Path, PathBuf};

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Broadcast bind address (supervisor mode)
    pub listen_addr: String,
    /// Supervisor address to connect to (validator and submit modes)
    pub supervisor_addr: String,
    /// Data directory for blocks and state snapshots
    pub data_dir: PathBuf,
    /// Key scheme for a freshly generated identity
    pub key_type: String,
    /// Where the node identity is kept; a new key each run when unset
    pub key_file: Option<PathBuf>,
    /// Save a state snapshot every N heights (0 = only on shutdown)
    pub save_interval: u64,
    pub consensus: ConsensusConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:9000".to_string(),
            supervisor_addr: "127.0.0.1:9000".to_string(),
            data_dir: PathBuf::from("./data"),
            key_type: "ed25519".to_string(),
            key_file: None,
            save_interval: 100,
            consensus: ConsensusConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load from a JSON file; missing fields keep their defaults
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn key_kind(&self) -> anyhow::Result<KeyKind> {
        Ok(self.key_type.parse()?)
    }

    /// Load the node identity, creating the key file on first use
    pub fn load_identity(&self) -> anyhow::Result<PrivKey> {
        let kind = self.key_kind()?;
        let Some(path) = &self.key_file else {
            return Ok(PrivKey::generate(kind));
        };

        if path.exists() {
            let key = read_key_file(path)?;
            tracing::info!("Loaded {} identity from {}", key.kind(), path.display());
            return Ok(key);
        }

        let key = PrivKey::generate(kind);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, format!("{}:{}", kind, hex::encode(key.secret_bytes())))
            .with_context(|| format!("writing key file {}", path.display()))?;
        tracing::info!("Generated new {} identity in {}", kind, path.display());
        Ok(key)
    }
}

/// Parse a `<kind>:<hex secret>` key file
fn read_key_file(path: &Path) -> anyhow::Result<PrivKey> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading key file {}", path.display()))?;
    let (kind, secret) = raw
        .trim()
        .split_once(':')
        .with_context(|| format!("key file {} is not <type>:<hex>", path.display()))?;
    let kind: KeyKind = kind.parse()?;
    let bytes = hex::decode(secret).context("key file secret is not hex")?;
    Ok(PrivKey::from_bytes(kind, &bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: NodeConfig = serde_json::from_str(
            r#"{ "listen_addr": "0.0.0.0:7000", "consensus": { "batch_size": 50 } }"#,
        )
        .unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:7000");
        assert_eq!(config.consensus.batch_size, 50);
        assert_eq!(config.consensus.staking_power, 100);
        assert_eq!(config.save_interval, 100);
    }

    #[test]
    fn test_key_file_is_created_then_reused() {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig {
            key_type: "secp256k1".to_string(),
            key_file: Some(dir.path().join("keys").join("node.key")),
            ..Default::default()
        };

        let first = config.load_identity().unwrap();
        let second = config.load_identity().unwrap();
        assert_eq!(first.kind(), KeyKind::Secp256k1);
        assert_eq!(first.pub_key(), second.pub_key());
    }

    #[test]
    fn test_unknown_key_type_fails() {
        let config = NodeConfig {
            key_type: "rsa".to_string(),
            ..Default::default()
        };
        assert!(config.load_identity().is_err());
    }
}
