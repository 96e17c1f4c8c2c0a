//! Configuration file support for the Obscura node.
//!
//! Loads optional `obscura.toml` from the data directory. CLI flags
//! override config file values; defaults apply when neither is present.

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ObscuraConfig {
    pub node: NodeConfig,
}

/// Node configuration section.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub listen_host: String,
    pub listen_port: u16,
    pub data_dir: String,
    pub bootstrap_peers: Vec<String>,
    pub mine: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            listen_host: "0.0.0.0".into(),
            listen_port: crate::constants::DEFAULT_P2P_PORT,
            data_dir: "./obscura-data".into(),
            bootstrap_peers: vec![],
            mine: false,
        }
    }
}

impl ObscuraConfig {
    /// Load configuration from `obscura.toml` in the given directory.
    /// Returns defaults if the file doesn't exist.
    pub fn load(data_dir: &Path) -> Self {
        let config_path = data_dir.join("obscura.toml");
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "failed to parse {}: {}; using defaults",
                        config_path.display(),
                        e
                    );
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_valid() {
        let config = ObscuraConfig::default();
        assert_eq!(config.node.listen_port, crate::constants::DEFAULT_P2P_PORT);
        assert!(!config.node.mine);
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[node]
listen_port = 9999
bootstrap_peers = ["1.2.3.4:9471", "5.6.7.8:9471"]
mine = true
"#;
        let config: ObscuraConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.node.listen_port, 9999);
        assert_eq!(config.node.bootstrap_peers.len(), 2);
        assert!(config.node.mine);
    }

    #[test]
    fn missing_config_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = ObscuraConfig::load(dir.path());
        assert_eq!(config.node.listen_port, crate::constants::DEFAULT_P2P_PORT);
    }
}
