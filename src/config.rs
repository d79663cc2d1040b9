use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{ChainError, ChainResult};

/// Where the node finds its first block on startup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReference {
    /// Build a fresh genesis block.
    Genesis,
    /// Resolve the mutable name and load whatever it points at.
    Resolve,
    /// Load a specific saved block.
    BlockHash(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiScheme {
    Http,
    Https,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub run_api: bool,
    #[serde(default)]
    pub run_leader: bool,
    #[serde(default)]
    pub run_follower: bool,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default = "default_api_scheme")]
    pub api_scheme: ApiScheme,
    #[serde(default = "default_module")]
    pub runner: String,
    #[serde(default = "default_module")]
    pub reader: String,
    #[serde(default = "default_serializer")]
    pub serializer: String,
    #[serde(default = "default_dag_api")]
    pub dag_api: String,
    #[serde(default = "default_ipfs_key")]
    pub ipfs_key: String,
    #[serde(default = "default_key_path")]
    pub key_path: PathBuf,
    #[serde(default = "default_interval_ms")]
    pub mining_interval_ms: u64,
    #[serde(default = "default_interval_ms")]
    pub pulling_interval_ms: u64,
    #[serde(default = "default_block_reference")]
    pub initial_block_reference: BlockReference,
}

fn default_api_port() -> u16 {
    2335
}

fn default_api_scheme() -> ApiScheme {
    ApiScheme::Http
}

fn default_module() -> String {
    "state".to_string()
}

fn default_serializer() -> String {
    "tree".to_string()
}

fn default_dag_api() -> String {
    "http://127.0.0.1:5001".to_string()
}

fn default_ipfs_key() -> String {
    "self".to_string()
}

fn default_key_path() -> PathBuf {
    PathBuf::from("./keys/node.toml")
}

fn default_block_reference() -> BlockReference {
    BlockReference::Genesis
}

fn default_interval_ms() -> u64 {
    10_000
}

impl NodeConfig {
    pub fn load(path: &Path) -> ChainResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|err| ChainError::Config(format!("unable to parse config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> ChainResult<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;
        let encoded = toml::to_string_pretty(self)
            .map_err(|err| ChainError::Config(format!("unable to encode config: {err}")))?;
        fs::write(path, encoded)?;
        Ok(())
    }

    pub fn validate(&self) -> ChainResult<()> {
        if self.run_leader && self.run_follower {
            return Err(ChainError::Config(
                "run_leader and run_follower are mutually exclusive".into(),
            ));
        }
        Ok(())
    }

    pub fn ensure_directories(&self) -> ChainResult<()> {
        if let Some(parent) = self.key_path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            run_api: false,
            run_leader: false,
            run_follower: false,
            api_port: default_api_port(),
            api_scheme: default_api_scheme(),
            runner: default_module(),
            reader: default_module(),
            serializer: default_serializer(),
            dag_api: default_dag_api(),
            ipfs_key: default_ipfs_key(),
            key_path: default_key_path(),
            mining_interval_ms: default_interval_ms(),
            pulling_interval_ms: default_interval_ms(),
            initial_block_reference: default_block_reference(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_from_an_empty_document() {
        let config: NodeConfig = toml::from_str("").unwrap();
        assert!(!config.run_api);
        assert_eq!(config.api_port, 2335);
        assert_eq!(config.api_scheme, ApiScheme::Http);
        assert_eq!(config.initial_block_reference, BlockReference::Genesis);
        assert_eq!(config.mining_interval_ms, 10_000);
        assert_eq!(config.pulling_interval_ms, 10_000);
    }

    #[test]
    fn round_trips_through_toml() {
        let mut config = NodeConfig::default();
        config.run_leader = true;
        config.initial_block_reference = BlockReference::BlockHash("QmHead".into());
        let encoded = toml::to_string_pretty(&config).unwrap();
        let decoded: NodeConfig = toml::from_str(&encoded).unwrap();
        assert!(decoded.run_leader);
        assert_eq!(
            decoded.initial_block_reference,
            BlockReference::BlockHash("QmHead".into())
        );
    }

    #[test]
    fn leader_and_follower_are_mutually_exclusive() {
        let mut config = NodeConfig::default();
        config.run_leader = true;
        config.run_follower = true;
        assert!(matches!(config.validate(), Err(ChainError::Config(_))));
    }

    #[test]
    fn block_reference_parses_both_shapes() {
        let genesis: NodeConfig =
            toml::from_str("initial_block_reference = \"genesis\"").unwrap();
        assert_eq!(genesis.initial_block_reference, BlockReference::Genesis);
        let pinned: NodeConfig =
            toml::from_str("initial_block_reference = { block_hash = \"QmX\" }").unwrap();
        assert_eq!(
            pinned.initial_block_reference,
            BlockReference::BlockHash("QmX".into())
        );
    }
}
