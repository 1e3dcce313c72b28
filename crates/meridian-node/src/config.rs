use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use meridian_core::types::Hash256;

/// Node configuration, loaded from a TOML file. Amendment policy lives
/// here, never in code: `features` names the amendments enabled at genesis
/// and `veto_amendments` the ones this operator refuses to vote for.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory for all persistent state.
    pub database_path: PathBuf,
    pub node_db: NodeDbConfig,
    /// Keep this many recent ledgers online; 0 keeps everything.
    pub online_delete: u32,

    /// Trusted validator list: base58 node public keys.
    pub validators: Vec<String>,
    /// Base58 seed for this node's validator key; absent = not validating.
    pub validator_seed: Option<String>,

    pub peers_max: usize,
    /// Do not advertise this node to peers.
    pub peer_private: bool,
    /// Bootstrap peer addresses.
    pub ips: Vec<String>,

    /// Reference fee in drops.
    pub fee_default: u64,

    /// Amendments active from genesis (hex ids).
    pub features: Vec<String>,
    /// Amendments this node votes against.
    pub veto_amendments: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeDbConfig {
    /// "sled" or "memory".
    pub backend: String,
    pub path: PathBuf,
}

impl Default for NodeDbConfig {
    fn default() -> Self {
        Self {
            backend: "sled".into(),
            path: PathBuf::from("nodestore"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("meridian-data"),
            node_db: NodeDbConfig::default(),
            online_delete: 0,
            validators: Vec::new(),
            validator_seed: None,
            peers_max: 21,
            peer_private: false,
            ips: Vec::new(),
            fee_default: meridian_core::constants::BASE_FEE_DROPS,
            features: Vec::new(),
            veto_amendments: Vec::new(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Config> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn feature_ids(&self) -> Vec<Hash256> {
        self.features
            .iter()
            .filter_map(|s| Hash256::from_hex(s).ok())
            .collect()
    }

    pub fn veto_ids(&self) -> Vec<Hash256> {
        self.veto_amendments
            .iter()
            .filter_map(|s| Hash256::from_hex(s).ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.node_db.backend, "sled");
        assert!(config.validators.is_empty());
        assert_eq!(config.fee_default, 10);
    }

    #[test]
    fn parses_partial_toml() {
        let raw = r#"
            database_path = "/var/lib/meridian"
            fee_default = 12
            validators = ["nXXXX"]

            [node_db]
            backend = "memory"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.database_path, PathBuf::from("/var/lib/meridian"));
        assert_eq!(config.fee_default, 12);
        assert_eq!(config.node_db.backend, "memory");
        // Unspecified fields fall back to defaults.
        assert_eq!(config.peers_max, 21);
    }

    #[test]
    fn feature_ids_parse_hex() {
        let mut config = Config::default();
        config.features = vec![
            "AB".repeat(32),
            "not hex".into(),
        ];
        assert_eq!(config.feature_ids().len(), 1);
    }
}
