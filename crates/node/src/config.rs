//! Node Configuration

use consensus_helper::{ChainId, ConfigSource, PeerEndpoint, DEFAULT_CONFIG_NAME};
use std::path::PathBuf;

/// Node configuration; command-line flags are layered over [`Default`]
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Name of this peer
    pub peer_id: String,
    /// Address this peer is reachable on (`host:port`)
    pub address: String,
    /// Directory holding the root config file
    pub config_dir: PathBuf,
    /// Base name of the root config file
    pub config_name: String,
    /// Chain transactions run against
    pub chain: String,
    /// Execution deadline in milliseconds (0 = none)
    pub exec_deadline_ms: u64,
}

impl NodeConfig {
    pub fn endpoint(&self) -> PeerEndpoint {
        PeerEndpoint::new(&self.peer_id, &self.address)
    }

    pub fn config_source(&self) -> ConfigSource {
        ConfigSource::new(&self.config_name).with_search_path(&self.config_dir)
    }

    pub fn chain(&self) -> ChainId {
        ChainId::new(&self.chain)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            peer_id: "vp0".to_string(),
            address: "127.0.0.1:7051".to_string(),
            config_dir: PathBuf::from("./"),
            config_name: DEFAULT_CONFIG_NAME.to_string(),
            chain: ChainId::default_chain().as_str().to_string(),
            exec_deadline_ms: 0,
        }
    }
}
