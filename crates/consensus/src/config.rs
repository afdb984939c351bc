//! Replica configuration lookup
//!
//! The replica list lives in a file named `<base>.yaml`, `<base>.yml` or
//! `<base>.json`, searched for in a list of directories. Nothing is cached:
//! every lookup reads the file again so edits are picked up without a restart.

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Base name of the root config file
pub const DEFAULT_CONFIG_NAME: &str = "openchain";

/// Key holding the ordered list of replica `host:port` addresses
pub const REPLICAS_KEY: &str = "peer.validator.replicas.ips";

/// Extensions tried in each search directory, in order
const EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

#[derive(Debug, Default, Deserialize)]
struct RootConfig {
    #[serde(default)]
    peer: Option<PeerSection>,
}

#[derive(Debug, Default, Deserialize)]
struct PeerSection {
    #[serde(default)]
    validator: Option<ValidatorSection>,
}

#[derive(Debug, Default, Deserialize)]
struct ValidatorSection {
    #[serde(default)]
    replicas: Option<ReplicasSection>,
}

#[derive(Debug, Default, Deserialize)]
struct ReplicasSection {
    #[serde(default)]
    ips: Option<Vec<String>>,
}

impl RootConfig {
    fn replica_ips(self) -> Option<Vec<String>> {
        self.peer?.validator?.replicas?.ips
    }
}

/// Where to find the root config file
#[derive(Debug, Clone)]
pub struct ConfigSource {
    base_name: String,
    search_paths: Vec<PathBuf>,
}

impl ConfigSource {
    /// A source with no search paths yet
    pub fn new(base_name: impl Into<String>) -> Self {
        Self {
            base_name: base_name.into(),
            search_paths: Vec::new(),
        }
    }

    /// Append a directory to search
    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// First existing config file across the search paths
    pub fn locate(&self) -> Result<PathBuf, ConfigError> {
        self.search_paths
            .iter()
            .flat_map(|dir| {
                EXTENSIONS
                    .iter()
                    .map(move |ext| dir.join(format!("{}.{}", self.base_name, ext)))
            })
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| ConfigError::NotFound {
                base_name: self.base_name.clone(),
                searched: self.search_paths.clone(),
            })
    }

    /// Read the configured replica addresses, in file order
    pub fn replica_addresses(&self) -> Result<Vec<String>, ConfigError> {
        let path = self.locate()?;
        tracing::trace!("Reading replica config from {:?}", path);
        parse_replica_addresses(&path)
    }
}

impl Default for ConfigSource {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_NAME).with_search_path("./")
    }
}

fn parse_replica_addresses(path: &Path) -> Result<Vec<String>, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let root: RootConfig = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&contents)?,
        // An empty YAML document deserializes to unit, not a mapping
        _ if contents.trim().is_empty() => RootConfig::default(),
        _ => serde_yaml::from_str(&contents)?,
    };

    // An absent or null list is an empty network, not a load failure
    let ips = root.replica_ips().unwrap_or_default();
    if ips.is_empty() {
        tracing::debug!("No replicas listed under `{}` in {:?}", REPLICAS_KEY, path);
    }
    Ok(ips)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const YAML: &str = "\
peer:
  address: 10.0.0.2:7051
  validator:
    enabled: true
    replicas:
      ips:
        - 10.0.0.1:7051
        - 10.0.0.2:7051
";

    #[test]
    fn test_reads_yaml_list_in_order() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("openchain.yaml"), YAML).unwrap();

        let source = ConfigSource::new("openchain").with_search_path(dir.path());
        let ips = source.replica_addresses().unwrap();
        assert_eq!(ips, vec!["10.0.0.1:7051", "10.0.0.2:7051"]);
    }

    #[test]
    fn test_reads_json() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("openchain.json"),
            r#"{"peer":{"validator":{"replicas":{"ips":["a:1","b:2"]}}}}"#,
        )
        .unwrap();

        let source = ConfigSource::new("openchain").with_search_path(dir.path());
        assert_eq!(source.replica_addresses().unwrap(), vec!["a:1", "b:2"]);
    }

    #[test]
    fn test_first_search_path_wins() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        fs::write(
            first.path().join("openchain.yml"),
            "peer: {validator: {replicas: {ips: [\"first:1\"]}}}",
        )
        .unwrap();
        fs::write(second.path().join("openchain.yaml"), YAML).unwrap();

        let source = ConfigSource::new("openchain")
            .with_search_path(first.path())
            .with_search_path(second.path());
        assert_eq!(source.replica_addresses().unwrap(), vec!["first:1"]);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let source = ConfigSource::new("openchain").with_search_path(dir.path());
        assert!(matches!(
            source.replica_addresses(),
            Err(ConfigError::NotFound { .. })
        ));
    }

    #[test]
    fn test_missing_key_is_empty_network() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("openchain.yaml"), "peer:\n  address: x:1\n").unwrap();

        let source = ConfigSource::new("openchain").with_search_path(dir.path());
        assert!(source.replica_addresses().unwrap().is_empty());
    }

    #[test]
    fn test_null_list_is_empty_network() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("openchain.yaml"),
            "peer:\n  validator:\n    replicas:\n      ips:\n",
        )
        .unwrap();

        let source = ConfigSource::new("openchain").with_search_path(dir.path());
        assert!(source.replica_addresses().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_yaml() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("openchain.yaml"), "peer: [unterminated").unwrap();

        let source = ConfigSource::new("openchain").with_search_path(dir.path());
        assert!(matches!(
            source.replica_addresses(),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_default_source_searches_working_dir() {
        let source = ConfigSource::default();
        assert_eq!(source.base_name(), DEFAULT_CONFIG_NAME);
        assert_eq!(source.search_paths(), &[PathBuf::from("./")]);
    }
}
